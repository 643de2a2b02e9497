//! OMEMO payloads as XML: device lists, bundles and `<encrypted/>`.
//!
//! Bundles and `<encrypted/>` go through the typed `legacy_omemo` elements.
//! Device lists are read by hand so one malformed entry does not hide the
//! other devices of a contact.

use xmpp_parsers::eme::ExplicitMessageEncryption;
use xmpp_parsers::legacy_omemo::{
    self, Device, DeviceList, Header, IdentityKey, IsPreKey, Key, Payload, PreKeyPublic, Prekeys,
    SignedPreKeyPublic, SignedPreKeySignature, IV,
};
use xmpp_parsers::message::Message;
use xs_core::constants;
use xs_core::{XsError, XsResult};
use xs_omemo::{Bundle, EncryptedKey, EncryptedMessage, PublicKey};
use xs_xmpp::{ns, Element};

/// PEP node holding the bundle of one device.
pub fn bundle_node(device_id: u32) -> String {
    format!("{}:{device_id}", ns::LEGACY_OMEMO_BUNDLES)
}

fn omemo_err(msg: impl Into<String>) -> XsError {
    XsError::Omemo(msg.into())
}

// ─── Device list ─────────────────────────────────────────────────────────

/// `<list><device id='…'/>…</list>`
pub fn device_list_element(device_ids: &[u32]) -> Element {
    DeviceList {
        devices: device_ids.iter().map(|&id| Device { id }).collect(),
    }
    .into()
}

/// Device ids from a `<list/>`. Malformed and duplicate entries are dropped.
pub fn parse_device_list(list: &Element) -> Vec<u32> {
    let mut ids = Vec::new();
    for device in list
        .children()
        .filter(|c| c.is("device", ns::LEGACY_OMEMO))
    {
        match device.attr("id").and_then(|v| v.trim().parse::<u32>().ok()) {
            Some(id) if id != 0 && !ids.contains(&id) => ids.push(id),
            Some(_) => {}
            None => tracing::debug!("ignoring malformed device entry"),
        }
    }
    ids
}

// ─── Bundle ──────────────────────────────────────────────────────────────

pub fn bundle_element(bundle: &Bundle) -> Element {
    legacy_omemo::Bundle {
        signed_pre_key_public: Some(SignedPreKeyPublic {
            signed_pre_key_id: Some(bundle.signed_prekey_id),
            data: bundle.signed_prekey.serialize(),
        }),
        signed_pre_key_signature: Some(SignedPreKeySignature {
            data: bundle.signed_prekey_signature.clone(),
        }),
        identity_key: Some(IdentityKey {
            data: bundle.identity_key.serialize(),
        }),
        prekeys: Some(Prekeys {
            keys: bundle
                .prekeys
                .iter()
                .map(|(id, key)| PreKeyPublic {
                    pre_key_id: *id,
                    data: key.serialize(),
                })
                .collect(),
        }),
    }
    .into()
}

/// Parse a `<bundle/>`. The signature is not checked here.
pub fn parse_bundle(bundle: &Element) -> XsResult<Bundle> {
    let parsed = legacy_omemo::Bundle::try_from(bundle.clone())
        .map_err(|e| omemo_err(format!("malformed bundle: {e}")))?;

    let spk = parsed
        .signed_pre_key_public
        .ok_or_else(|| omemo_err("bundle has no signed prekey"))?;
    let signed_prekey_id = spk
        .signed_pre_key_id
        .ok_or_else(|| omemo_err("signed prekey has no id"))?;
    let signed_prekey_signature = parsed
        .signed_pre_key_signature
        .ok_or_else(|| omemo_err("bundle has no signed prekey signature"))?
        .data;
    let identity_key = parsed
        .identity_key
        .ok_or_else(|| omemo_err("bundle has no identity key"))?;

    let mut prekeys = Vec::new();
    for pk in parsed.prekeys.map(|p| p.keys).unwrap_or_default() {
        prekeys.push((pk.pre_key_id, PublicKey::from_bytes(&pk.data)?));
    }
    if prekeys.is_empty() {
        return Err(omemo_err("bundle has no prekeys"));
    }

    Ok(Bundle {
        identity_key: PublicKey::from_bytes(&identity_key.data)?,
        signed_prekey_id,
        signed_prekey: PublicKey::from_bytes(&spk.data)?,
        signed_prekey_signature,
        prekeys,
    })
}

// ─── Encrypted message ───────────────────────────────────────────────────

fn to_wire(message: &EncryptedMessage) -> legacy_omemo::Encrypted {
    legacy_omemo::Encrypted {
        header: Header {
            sid: message.sid,
            keys: message
                .keys
                .iter()
                .map(|key| Key {
                    rid: key.rid,
                    prekey: if key.prekey {
                        IsPreKey::True
                    } else {
                        IsPreKey::False
                    },
                    data: key.data.clone(),
                })
                .collect(),
            iv: IV {
                data: message.iv.clone(),
            },
        },
        payload: message.payload.clone().map(|data| Payload { data }),
    }
}

pub fn encrypted_element(message: &EncryptedMessage) -> Element {
    to_wire(message).into()
}

pub fn parse_encrypted(encrypted: &Element) -> XsResult<EncryptedMessage> {
    let parsed = legacy_omemo::Encrypted::try_from(encrypted.clone())
        .map_err(|e| omemo_err(format!("malformed <encrypted/>: {e}")))?;
    Ok(EncryptedMessage {
        sid: parsed.header.sid,
        iv: parsed.header.iv.data,
        keys: parsed
            .header
            .keys
            .into_iter()
            .map(|key| EncryptedKey {
                rid: key.rid,
                prekey: key.prekey == IsPreKey::True,
                data: key.data,
            })
            .collect(),
        payload: parsed.payload.map(|p| p.data),
    })
}

/// Add the OMEMO parts to a `chat` message: `<encrypted/>`, the EME marker,
/// a storage hint and the fallback body.
pub fn attach_encrypted(message: &mut Message, encrypted: &EncryptedMessage, fallback: &str) {
    message.payloads.push(to_wire(encrypted).into());
    message.payloads.push(
        ExplicitMessageEncryption {
            namespace: ns::LEGACY_OMEMO.to_string(),
            name: Some("OMEMO".to_string()),
        }
        .into(),
    );
    message
        .payloads
        .push(Element::bare("store", constants::ns::HINTS));
    if !fallback.is_empty() {
        message.bodies.insert(
            String::new(),
            xmpp_parsers::message::Body(fallback.to_string()),
        );
    }
}
