//! Builders and parsers for message, presence and IQ stanzas.

use jid::{BareJid, Jid};
use minidom::Element;
use xmpp_parsers::iq::{Iq, IqGetPayload, IqSetPayload, IqType};
use xmpp_parsers::message::Message;
use xmpp_parsers::ns;
use xmpp_parsers::presence::Presence;
use xmpp_parsers::stanza_error::{DefinedCondition, ErrorType, StanzaError};
use xs_core::XsError;

/// Generate a fresh stanza id.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Top-level stanza kinds in the client namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StanzaKind {
    Message,
    Presence,
    Iq,
    Other,
}

impl StanzaKind {
    pub fn of(element: &Element) -> Self {
        if !element.has_ns(ns::JABBER_CLIENT) {
            return Self::Other;
        }
        match element.name() {
            "message" => Self::Message,
            "presence" => Self::Presence,
            "iq" => Self::Iq,
            _ => Self::Other,
        }
    }
}

/// `<iq type='get'/>` with a fresh id, to `to` or the own account.
pub fn iq_get(to: Option<Jid>, payload: impl IqGetPayload) -> Iq {
    let iq = Iq::from_get(new_id(), payload);
    match to {
        Some(to) => iq.with_to(to),
        None => iq,
    }
}

/// `<iq type='set'/>` with a fresh id, to the own account.
pub fn iq_set(payload: impl IqSetPayload) -> Iq {
    Iq::from_set(new_id(), payload)
}

/// Result addressed back to the requester.
pub fn iq_result(request: &Iq, payload: Option<Element>) -> Iq {
    Iq {
        from: None,
        to: request.from.clone(),
        id: request.id.clone(),
        payload: IqType::Result(payload),
    }
}

/// Error reply carrying the given defined condition.
pub fn iq_error(request: &Iq, type_: ErrorType, condition: DefinedCondition) -> Iq {
    Iq {
        from: None,
        to: request.from.clone(),
        id: request.id.clone(),
        payload: IqType::Error(StanzaError {
            type_,
            by: None,
            defined_condition: condition,
            texts: Default::default(),
            other: None,
            alternate_address: None,
        }),
    }
}

/// A `chat` message addressed to `to`, with a fresh id and no body.
pub fn chat_message(to: &BareJid) -> Message {
    let mut message = Message::chat(Some(Jid::from(to.clone())));
    message.id = Some(new_id());
    message
}

/// A `chat` message with a plain body.
pub fn plain_message(to: &BareJid, body: &str) -> Message {
    chat_message(to).with_body(String::new(), body.to_string())
}

/// Initial available presence.
pub fn presence() -> Presence {
    Presence::available()
}

/// Body text of a message, if present.
pub fn body(message: &Element) -> Option<String> {
    message
        .children()
        .find(|c| c.is("body", ns::JABBER_CLIENT))
        .map(Element::text)
}

/// Name of a defined condition, e.g. `item-not-found`.
pub fn condition_name(condition: &DefinedCondition) -> String {
    Element::from(condition.clone()).name().to_string()
}

/// Convert a stanza error into `XsError::StanzaError`.
///
/// The defined condition becomes the error condition. The text and an
/// application-specific condition are appended to the text.
pub fn to_error(error: &StanzaError) -> XsError {
    let mut parts: Vec<String> = error.texts.values().cloned().collect();
    if let Some(specific) = &error.other {
        parts.push(specific.name().to_string());
    }

    XsError::StanzaError {
        condition: condition_name(&error.defined_condition),
        text: if parts.is_empty() {
            None
        } else {
            Some(parts.join(", "))
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xmpp_parsers::ping::Ping;
    use xmpp_parsers::roster::Roster;

    #[test]
    fn test_iq_builders() {
        let get = iq_get(Some(Jid::new("example.com").unwrap()), Ping);
        let el = Element::from(get);
        assert_eq!(el.attr("type"), Some("get"));
        assert_eq!(el.attr("to"), Some("example.com"));
        assert_eq!(el.attr("id").map(str::len), Some(32));
        assert!(el.has_child("ping", ns::PING));

        let set = Element::from(iq_set(Roster {
            ver: None,
            items: Vec::new(),
        }));
        assert_eq!(set.attr("type"), Some("set"));
        assert_eq!(set.attr("to"), None);
    }

    #[test]
    fn test_replies_go_back_to_requester() {
        let request: Element = "<iq xmlns='jabber:client' type='get' id='p1' from='example.com' \
             to='a@example.com/r'><ping xmlns='urn:xmpp:ping'/></iq>"
            .parse()
            .unwrap();
        let request = Iq::try_from(request).unwrap();

        let result = Element::from(iq_result(&request, None));
        assert_eq!(result.attr("type"), Some("result"));
        assert_eq!(result.attr("id"), Some("p1"));
        assert_eq!(result.attr("to"), Some("example.com"));

        let error = iq_error(&request, ErrorType::Cancel, DefinedCondition::ServiceUnavailable);
        let IqType::Error(e) = &error.payload else {
            panic!("not an error reply");
        };
        assert!(matches!(
            to_error(e),
            XsError::StanzaError { ref condition, .. } if condition == "service-unavailable"
        ));
    }

    #[test]
    fn test_error_with_specific_condition() {
        let el: Element = "<iq xmlns='jabber:client' type='error' id='x'><error type='cancel'>\
             <conflict xmlns='urn:ietf:params:xml:ns:xmpp-stanzas'/>\
             <precondition-not-met xmlns='http://jabber.org/protocol/pubsub#errors'/>\
             </error></iq>"
            .parse()
            .unwrap();
        let IqType::Error(error) = Iq::try_from(el).unwrap().payload else {
            panic!("not an error");
        };
        match to_error(&error) {
            XsError::StanzaError { condition, text } => {
                assert_eq!(condition, "conflict");
                assert_eq!(text.as_deref(), Some("precondition-not-met"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_message_helpers() {
        let bob = BareJid::new("bob@example.com").unwrap();
        let msg = Element::from(plain_message(&bob, "hello"));
        assert_eq!(StanzaKind::of(&msg), StanzaKind::Message);
        assert_eq!(msg.attr("type"), Some("chat"));
        assert_eq!(msg.attr("to"), Some("bob@example.com"));
        assert!(msg.attr("id").is_some());
        assert_eq!(body(&msg).as_deref(), Some("hello"));
        assert!(body(&Element::from(chat_message(&bob))).is_none());

        assert_eq!(StanzaKind::of(&Element::from(presence())), StanzaKind::Presence);
        assert_eq!(
            StanzaKind::of(&Element::bare("features", ns::STREAM)),
            StanzaKind::Other
        );
    }
}
