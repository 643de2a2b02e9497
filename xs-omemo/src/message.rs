//! The `<encrypted/>` element contents, independent of XML.

/// Payload key material encrypted for one recipient device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedKey {
    /// Recipient device id.
    pub rid: u32,
    /// Whether `data` is a `PreKeySignalMessage`.
    pub prekey: bool,
    pub data: Vec<u8>,
}

/// An OMEMO message: header plus optional payload.
///
/// A message without payload is a key transport message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedMessage {
    /// Sender device id.
    pub sid: u32,
    pub iv: Vec<u8>,
    pub keys: Vec<EncryptedKey>,
    pub payload: Option<Vec<u8>>,
}

impl EncryptedMessage {
    /// The key addressed to a given device, if any.
    pub fn key_for(&self, device_id: u32) -> Option<&EncryptedKey> {
        self.keys.iter().find(|k| k.rid == device_id)
    }
}

/// Outcome of decrypting an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decrypted {
    /// Message body, or `None` for key transport messages.
    pub plaintext: Option<Vec<u8>>,
    /// A one-time prekey was consumed and replaced; the bundle should be republished.
    pub bundle_changed: bool,
}
