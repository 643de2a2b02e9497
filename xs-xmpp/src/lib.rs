//! send-msg XMPP - the client side of an XMPP session, just large enough
//! to log in and exchange a few stanzas.
//!
//! Connection, STARTTLS, SRV lookup, SASL and resource binding come from
//! tokio-xmpp; stanzas are built and parsed with xmpp-parsers. This crate
//! adds on top:
//! - IQ round trips with a timeout, answering pings and disco#info meanwhile
//! - Roster retrieval and PEP publish/retrieve
//! - Event dispatching for inbound messages and presences

pub mod client;
pub mod events;
pub mod pubsub;
pub mod roster;
pub mod stanza;

// Re-export key types
pub use client::{ConnectionParams, ServerAddress, XmppClient};
pub use events::{ClientEvent, ClientEventType, ConnectionState, EventDispatcher};
pub use jid::{BareJid, FullJid, Jid};
pub use minidom::Element;
pub use pubsub::PubSubItem;
pub use roster::RosterExt;
pub use xmpp_parsers::{ns, roster::Subscription};
