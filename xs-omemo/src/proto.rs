//! Signal protocol v3 message framing.
//!
//! Both message types are a version byte followed by a protobuf body;
//! `SignalMessage` additionally carries an 8-byte truncated MAC.

use hmac::{Hmac, Mac};
use prost::Message;
use sha2::Sha256;
use xs_core::error::{XsError, XsResult};

use crate::keys::PublicKey;

/// Protocol version carried in the high and low nibble of the first byte.
pub const CIPHERTEXT_VERSION: u8 = 3;
const VERSION_BYTE: u8 = (CIPHERTEXT_VERSION << 4) | CIPHERTEXT_VERSION;
const MAC_LEN: usize = 8;

#[derive(Clone, PartialEq, prost::Message)]
pub struct SignalMessageProto {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub ratchet_key: Option<Vec<u8>>,
    #[prost(uint32, optional, tag = "2")]
    pub counter: Option<u32>,
    #[prost(uint32, optional, tag = "3")]
    pub previous_counter: Option<u32>,
    #[prost(bytes = "vec", optional, tag = "4")]
    pub ciphertext: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct PreKeySignalMessageProto {
    #[prost(uint32, optional, tag = "5")]
    pub registration_id: Option<u32>,
    #[prost(uint32, optional, tag = "1")]
    pub pre_key_id: Option<u32>,
    #[prost(uint32, optional, tag = "6")]
    pub signed_pre_key_id: Option<u32>,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub base_key: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "3")]
    pub identity_key: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "4")]
    pub message: Option<Vec<u8>>,
}

fn check_version(bytes: &[u8]) -> XsResult<()> {
    match bytes.first() {
        None => Err(XsError::Omemo("empty message".into())),
        Some(b) if b >> 4 != CIPHERTEXT_VERSION => {
            Err(XsError::Omemo(format!("unsupported message version {}", b >> 4)))
        }
        Some(_) => Ok(()),
    }
}

fn compute_mac(
    mac_key: &[u8],
    sender_identity: &PublicKey,
    receiver_identity: &PublicKey,
    body: &[u8],
) -> XsResult<Hmac<Sha256>> {
    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(mac_key)
        .map_err(|e| XsError::Crypto(format!("hmac init failed: {e}")))?;
    mac.update(&sender_identity.serialize());
    mac.update(&receiver_identity.serialize());
    mac.update(body);
    Ok(mac)
}

/// A ratchet message.
#[derive(Debug, Clone)]
pub struct SignalMessage {
    pub ratchet_key: PublicKey,
    pub counter: u32,
    pub previous_counter: u32,
    pub ciphertext: Vec<u8>,
    serialized: Vec<u8>,
}

impl SignalMessage {
    /// Build and MAC a message.
    pub fn new(
        mac_key: &[u8],
        sender_identity: &PublicKey,
        receiver_identity: &PublicKey,
        ratchet_key: PublicKey,
        counter: u32,
        previous_counter: u32,
        ciphertext: Vec<u8>,
    ) -> XsResult<Self> {
        let proto = SignalMessageProto {
            ratchet_key: Some(ratchet_key.serialize()),
            counter: Some(counter),
            previous_counter: Some(previous_counter),
            ciphertext: Some(ciphertext.clone()),
        };
        let mut serialized = vec![VERSION_BYTE];
        serialized.extend_from_slice(&proto.encode_to_vec());
        let mac = compute_mac(mac_key, sender_identity, receiver_identity, &serialized)?
            .finalize()
            .into_bytes();
        serialized.extend_from_slice(&mac[..MAC_LEN]);

        Ok(Self {
            ratchet_key,
            counter,
            previous_counter,
            ciphertext,
            serialized,
        })
    }

    /// Parse a serialized message. The MAC is checked separately, once the
    /// message keys are known.
    pub fn parse(bytes: &[u8]) -> XsResult<Self> {
        check_version(bytes)?;
        if bytes.len() <= 1 + MAC_LEN {
            return Err(XsError::Omemo("message too short".into()));
        }
        let body = &bytes[1..bytes.len() - MAC_LEN];
        let proto = SignalMessageProto::decode(body)
            .map_err(|e| XsError::Omemo(format!("malformed message: {e}")))?;

        let (Some(ratchet_key), Some(counter), Some(ciphertext)) =
            (proto.ratchet_key, proto.counter, proto.ciphertext)
        else {
            return Err(XsError::Omemo("incomplete message".into()));
        };

        Ok(Self {
            ratchet_key: PublicKey::from_bytes(&ratchet_key)?,
            counter,
            previous_counter: proto.previous_counter.unwrap_or(0),
            ciphertext,
            serialized: bytes.to_vec(),
        })
    }

    /// Check the truncated MAC.
    pub fn verify_mac(
        &self,
        mac_key: &[u8],
        sender_identity: &PublicKey,
        receiver_identity: &PublicKey,
    ) -> XsResult<()> {
        let split = self.serialized.len() - MAC_LEN;
        compute_mac(
            mac_key,
            sender_identity,
            receiver_identity,
            &self.serialized[..split],
        )?
        .verify_truncated_left(&self.serialized[split..])
        .map_err(|_| XsError::Omemo("bad message mac".into()))
    }

    pub fn serialize(&self) -> &[u8] {
        &self.serialized
    }
}

/// The first message(s) of a session, carrying what the receiver needs to
/// run X3DH as the responder.
#[derive(Debug, Clone)]
pub struct PreKeySignalMessage {
    pub registration_id: u32,
    pub pre_key_id: Option<u32>,
    pub signed_pre_key_id: u32,
    pub base_key: PublicKey,
    pub identity_key: PublicKey,
    pub message: SignalMessage,
    serialized: Vec<u8>,
}

impl PreKeySignalMessage {
    pub fn new(
        registration_id: u32,
        pre_key_id: Option<u32>,
        signed_pre_key_id: u32,
        base_key: PublicKey,
        identity_key: PublicKey,
        message: SignalMessage,
    ) -> Self {
        let proto = PreKeySignalMessageProto {
            registration_id: Some(registration_id),
            pre_key_id,
            signed_pre_key_id: Some(signed_pre_key_id),
            base_key: Some(base_key.serialize()),
            identity_key: Some(identity_key.serialize()),
            message: Some(message.serialize().to_vec()),
        };
        let mut serialized = vec![VERSION_BYTE];
        serialized.extend_from_slice(&proto.encode_to_vec());

        Self {
            registration_id,
            pre_key_id,
            signed_pre_key_id,
            base_key,
            identity_key,
            message,
            serialized,
        }
    }

    pub fn parse(bytes: &[u8]) -> XsResult<Self> {
        check_version(bytes)?;
        let proto = PreKeySignalMessageProto::decode(&bytes[1..])
            .map_err(|e| XsError::Omemo(format!("malformed prekey message: {e}")))?;

        let (Some(signed_pre_key_id), Some(base_key), Some(identity_key), Some(message)) = (
            proto.signed_pre_key_id,
            proto.base_key,
            proto.identity_key,
            proto.message,
        ) else {
            return Err(XsError::Omemo("incomplete prekey message".into()));
        };

        Ok(Self {
            registration_id: proto.registration_id.unwrap_or(0),
            pre_key_id: proto.pre_key_id,
            signed_pre_key_id,
            base_key: PublicKey::from_bytes(&base_key)?,
            identity_key: PublicKey::from_bytes(&identity_key)?,
            message: SignalMessage::parse(&message)?,
            serialized: bytes.to_vec(),
        })
    }

    pub fn serialize(&self) -> &[u8] {
        &self.serialized
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::KeyPair;

    fn sample(mac_key: &[u8], alice: &PublicKey, bob: &PublicKey) -> SignalMessage {
        SignalMessage::new(
            mac_key,
            alice,
            bob,
            KeyPair::generate().public,
            4,
            2,
            vec![0xaa; 32],
        )
        .unwrap()
    }

    #[test]
    fn test_signal_message_parse_and_mac() {
        let alice = KeyPair::generate().public;
        let bob = KeyPair::generate().public;
        let msg = sample(&[1u8; 32], &alice, &bob);
        assert_eq!(msg.serialize()[0], 0x33);

        let parsed = SignalMessage::parse(msg.serialize()).unwrap();
        assert_eq!(parsed.counter, 4);
        assert_eq!(parsed.previous_counter, 2);
        assert_eq!(parsed.ratchet_key, msg.ratchet_key);
        assert!(parsed.verify_mac(&[1u8; 32], &alice, &bob).is_ok());

        // identities in the wrong order, or a different key, must fail
        assert!(parsed.verify_mac(&[1u8; 32], &bob, &alice).is_err());
        assert!(parsed.verify_mac(&[2u8; 32], &alice, &bob).is_err());
    }

    #[test]
    fn test_signal_message_tampering_rejected() {
        let alice = KeyPair::generate().public;
        let bob = KeyPair::generate().public;
        let msg = sample(&[1u8; 32], &alice, &bob);

        let mut bytes = msg.serialize().to_vec();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        let parsed = SignalMessage::parse(&bytes).unwrap();
        assert!(parsed.verify_mac(&[1u8; 32], &alice, &bob).is_err());
    }

    #[test]
    fn test_bad_version_rejected() {
        let alice = KeyPair::generate().public;
        let bob = KeyPair::generate().public;
        let mut bytes = sample(&[1u8; 32], &alice, &bob).serialize().to_vec();
        bytes[0] = 0x22;
        assert!(SignalMessage::parse(&bytes).is_err());
        assert!(SignalMessage::parse(&[]).is_err());
    }

    #[test]
    fn test_prekey_message_parse() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate().public;
        let base = KeyPair::generate().public;
        let inner = sample(&[1u8; 32], &alice.public, &bob);
        let msg = PreKeySignalMessage::new(1234, Some(17), 1, base, alice.public, inner);

        let parsed = PreKeySignalMessage::parse(msg.serialize()).unwrap();
        assert_eq!(parsed.registration_id, 1234);
        assert_eq!(parsed.pre_key_id, Some(17));
        assert_eq!(parsed.signed_pre_key_id, 1);
        assert_eq!(parsed.base_key, base);
        assert_eq!(parsed.identity_key, alice.public);
        assert_eq!(parsed.message.serialize(), msg.message.serialize());
    }

    #[test]
    fn test_prekey_message_without_one_time_key() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate().public;
        let inner = sample(&[1u8; 32], &alice.public, &bob);
        let msg = PreKeySignalMessage::new(1, None, 3, KeyPair::generate().public, alice.public, inner);
        let parsed = PreKeySignalMessage::parse(msg.serialize()).unwrap();
        assert_eq!(parsed.pre_key_id, None);
    }
}
