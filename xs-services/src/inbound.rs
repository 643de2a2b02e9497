//! Stanzas that arrive while a send is in progress.
//!
//! Device list notifications update the cached device lists. OMEMO messages
//! addressed to this device are decrypted so their sessions stay in step.
//! Everything else is only logged.

use tracing::{debug, info};
use xs_core::XsResult;
use xs_omemo::OmemoManager;
use xs_xmpp::{ns, pubsub, stanza, ClientEvent, ClientEventType, Element};

use crate::directory::devices_from_items;
use crate::omemo_xml;

/// What an inbound event amounted to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A contact (or this account) published a new device list.
    DeviceList { jid: String, devices: Vec<u32> },
    /// An OMEMO message for this device was decrypted.
    Encrypted {
        from: String,
        body: Option<String>,
        /// A one-time prekey was used up; the bundle needs republishing.
        bundle_changed: bool,
    },
    /// An unencrypted chat message.
    Plain { from: String, body: String },
    Ignored,
}

/// Handle one client event.
pub fn handle_event(manager: &OmemoManager, event: &ClientEvent) -> XsResult<Inbound> {
    match (&event.event_type, &event.stanza) {
        (ClientEventType::Message, Some(message)) => {
            let from = event
                .from
                .as_ref()
                .map(|j| j.to_bare().to_string())
                .unwrap_or_else(|| manager.own_jid().to_string());
            handle_message(manager, &from, message)
        }
        (ClientEventType::Presence, Some(presence)) => {
            debug!(
                "presence from {}",
                presence.attr("from").unwrap_or("unknown")
            );
            Ok(Inbound::Ignored)
        }
        _ => Ok(Inbound::Ignored),
    }
}

fn handle_message(manager: &OmemoManager, from: &str, message: &Element) -> XsResult<Inbound> {
    if let Some(items) = pubsub::event_items(message, ns::LEGACY_OMEMO_DEVICELIST) {
        let devices = devices_from_items(&items);
        manager.store().store_device_list(from, &devices)?;
        debug!("device list of {from} is now {devices:?}");
        return Ok(Inbound::DeviceList {
            jid: from.to_string(),
            devices,
        });
    }

    if let Some(encrypted) = message.get_child("encrypted", ns::LEGACY_OMEMO) {
        let parsed = omemo_xml::parse_encrypted(encrypted)?;
        if parsed.key_for(manager.own_device_id()).is_none() {
            debug!("OMEMO message from {from} is not for this device");
            return Ok(Inbound::Ignored);
        }
        let decrypted = manager.decrypt_message(from, &parsed)?;
        let body = decrypted
            .plaintext
            .map(|p| String::from_utf8_lossy(&p).into_owned());
        match &body {
            Some(text) => info!("encrypted message from {from}: {text}"),
            None => debug!("key transport message from {from}"),
        }
        return Ok(Inbound::Encrypted {
            from: from.to_string(),
            body,
            bundle_changed: decrypted.bundle_changed,
        });
    }

    match stanza::body(message) {
        Some(body) => {
            info!("message from {from}: {body}");
            Ok(Inbound::Plain {
                from: from.to_string(),
                body,
            })
        }
        None => Ok(Inbound::Ignored),
    }
}
