//! Client event types and event dispatcher.
//!
//! Inbound stanzas that are not answers to our own requests are broadcast
//! to subscribers, so higher layers can react to messages and presences
//! without owning the read loop.

use jid::Jid;
use minidom::Element;
use tokio::sync::broadcast;
use tracing::debug;

/// Kinds of events emitted by the client.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ClientEventType {
    /// Resource bound and initial setup done (`session_start`).
    SessionStart,
    /// A message stanza arrived (`message`).
    Message,
    /// A presence stanza arrived (`presence`).
    Presence,
    /// The stream was closed by either side (`disconnected`).
    Disconnected,
}

impl ClientEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SessionStart => "session_start",
            Self::Message => "message",
            Self::Presence => "presence",
            Self::Disconnected => "disconnected",
        }
    }

    /// Whether this event carries a stanza.
    pub fn is_stanza_event(&self) -> bool {
        matches!(self, Self::Message | Self::Presence)
    }
}

/// An event with its sender and optional stanza.
#[derive(Debug, Clone)]
pub struct ClientEvent {
    pub event_type: ClientEventType,
    /// Sender address, when the stanza carried a valid `from`.
    pub from: Option<Jid>,
    pub stanza: Option<Element>,
}

impl ClientEvent {
    pub fn session_start(jid: Jid) -> Self {
        Self {
            event_type: ClientEventType::SessionStart,
            from: Some(jid),
            stanza: None,
        }
    }

    pub fn disconnected() -> Self {
        Self {
            event_type: ClientEventType::Disconnected,
            from: None,
            stanza: None,
        }
    }

    /// Wrap an inbound message or presence.
    pub fn from_stanza(event_type: ClientEventType, stanza: Element) -> Self {
        let from = stanza.attr("from").and_then(|f| Jid::new(f).ok());
        Self {
            event_type,
            from,
            stanza: Some(stanza),
        }
    }
}

/// Broadcast-based event dispatcher.
///
/// Slow consumers that fall behind receive `RecvError::Lagged`.
#[derive(Clone)]
pub struct EventDispatcher {
    sender: broadcast::Sender<ClientEvent>,
}

impl EventDispatcher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.sender.subscribe()
    }

    pub fn dispatch(&self, event: ClientEvent) {
        let event_type = event.event_type.as_str();
        match self.sender.send(event) {
            Ok(count) => debug!("dispatched {event_type} to {count} subscriber(s)"),
            Err(_) => debug!("no subscribers for event {event_type}"),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(64)
    }
}

/// Connection state of the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    /// TCP, TLS, authentication and binding in progress.
    Connecting,
    /// Resource bound; stanzas can be exchanged.
    Connected,
    /// Session establishment failed.
    Failed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Failed => write!(f, "failed"),
        }
    }
}
