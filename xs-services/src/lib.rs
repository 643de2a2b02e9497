//! send-msg services - the workflow that ties XMPP and OMEMO together.
//!
//! This crate provides:
//! - The `Service` lifecycle trait
//! - OMEMO device lists, bundles and messages as XML
//! - A PEP-backed `KeyDirectory` and own-device announcement
//! - Handling of stanzas that arrive during a send
//! - `SendMsg`, which logs in, sends one encrypted message and logs out

pub mod directory;
pub mod inbound;
pub mod omemo_xml;
pub mod send;
pub mod service;

// Re-export key types
pub use directory::XmppDirectory;
pub use inbound::Inbound;
pub use send::{DeviceRef, SendMsg, SendPolicy, SendReport};
pub use service::{Service, ServiceState};
