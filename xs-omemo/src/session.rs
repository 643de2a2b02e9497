//! Double Ratchet session state.
//!
//! A session is created by X3DH (see [`crate::x3dh`]) and then advanced by
//! every encrypt and decrypt. Until the peer has answered, outgoing messages
//! are wrapped as `PreKeySignalMessage` so the peer can build its side.

use serde::{Deserialize, Serialize};
use xs_core::constants::MAX_SKIP;
use xs_core::error::{XsError, XsResult};

use crate::cipher;
use crate::kdf::{ChainKey, MessageKeys, RootKey};
use crate::keys::{KeyPair, PublicKey};
use crate::proto::{PreKeySignalMessage, SignalMessage};

/// Receiving chains kept for late messages from earlier ratchet steps.
const MAX_RECEIVER_CHAINS: usize = 5;

#[derive(Clone, Serialize, Deserialize)]
pub(crate) struct SenderChain {
    pub(crate) ratchet: KeyPair,
    pub(crate) chain_key: ChainKey,
}

#[derive(Clone, Serialize, Deserialize)]
pub(crate) struct ReceiverChain {
    pub(crate) ratchet_key: PublicKey,
    pub(crate) chain_key: ChainKey,
    #[serde(default)]
    pub(crate) skipped: Vec<MessageKeys>,
}

impl ReceiverChain {
    fn message_keys_for(&mut self, counter: u32) -> XsResult<MessageKeys> {
        let index = self.chain_key.index();
        if counter < index {
            return match self.skipped.iter().position(|k| k.counter == counter) {
                Some(pos) => Ok(self.skipped.remove(pos)),
                None => Err(XsError::Omemo(format!(
                    "duplicate or expired message (counter {counter})"
                ))),
            };
        }
        if counter - index > MAX_SKIP {
            return Err(XsError::Omemo(format!(
                "message skips too far ahead ({} keys)",
                counter - index
            )));
        }

        let mut chain = self.chain_key.clone();
        while chain.index() < counter {
            self.skipped.push(chain.message_keys()?);
            chain = chain.next()?;
        }
        let excess = self.skipped.len().saturating_sub(MAX_SKIP as usize);
        self.skipped.drain(..excess);

        let keys = chain.message_keys()?;
        self.chain_key = chain.next()?;
        Ok(keys)
    }
}

/// Prekey information repeated on every message until the peer answers.
#[derive(Clone, Serialize, Deserialize)]
pub(crate) struct PendingPreKey {
    pub(crate) pre_key_id: Option<u32>,
    pub(crate) signed_pre_key_id: u32,
    pub(crate) base_key: PublicKey,
}

/// One encrypted message for the peer.
#[derive(Debug, Clone)]
pub enum OutgoingMessage {
    PreKey(PreKeySignalMessage),
    Whisper(SignalMessage),
}

impl OutgoingMessage {
    pub fn is_prekey(&self) -> bool {
        matches!(self, Self::PreKey(_))
    }

    pub fn serialize(&self) -> &[u8] {
        match self {
            Self::PreKey(m) => m.serialize(),
            Self::Whisper(m) => m.serialize(),
        }
    }
}

/// Ratchet state for one remote device.
#[derive(Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub(crate) local_identity: PublicKey,
    pub(crate) remote_identity: PublicKey,
    pub(crate) local_registration_id: u32,
    pub(crate) remote_registration_id: u32,
    pub(crate) root_key: RootKey,
    pub(crate) sender: SenderChain,
    pub(crate) receivers: Vec<ReceiverChain>,
    pub(crate) previous_counter: u32,
    pub(crate) pending_prekey: Option<PendingPreKey>,
    /// X3DH base key this session was built from.
    pub(crate) base_key: PublicKey,
}

impl SessionState {
    /// Identity key of the peer device.
    pub fn remote_identity(&self) -> &PublicKey {
        &self.remote_identity
    }

    pub fn remote_registration_id(&self) -> u32 {
        self.remote_registration_id
    }

    pub fn base_key(&self) -> &PublicKey {
        &self.base_key
    }

    /// Whether outgoing messages still carry prekey information.
    pub fn has_pending_prekey(&self) -> bool {
        self.pending_prekey.is_some()
    }

    /// Encrypt one message and advance the sending chain.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> XsResult<OutgoingMessage> {
        let keys = self.sender.chain_key.message_keys()?;
        let ciphertext = cipher::cbc_encrypt(&keys.cipher_key, &keys.iv, plaintext)?;
        let message = SignalMessage::new(
            &keys.mac_key,
            &self.local_identity,
            &self.remote_identity,
            self.sender.ratchet.public,
            keys.counter,
            self.previous_counter,
            ciphertext,
        )?;
        self.sender.chain_key = self.sender.chain_key.next()?;

        Ok(match &self.pending_prekey {
            Some(pending) => OutgoingMessage::PreKey(PreKeySignalMessage::new(
                self.local_registration_id,
                pending.pre_key_id,
                pending.signed_pre_key_id,
                pending.base_key,
                self.local_identity,
                message,
            )),
            None => OutgoingMessage::Whisper(message),
        })
    }

    /// Decrypt one message. The state is only updated if decryption succeeds.
    pub fn decrypt(&mut self, message: &SignalMessage) -> XsResult<Vec<u8>> {
        let mut next = self.clone();
        let plaintext = next.decrypt_in_place(message)?;
        *self = next;
        Ok(plaintext)
    }

    fn decrypt_in_place(&mut self, message: &SignalMessage) -> XsResult<Vec<u8>> {
        let chain = match self
            .receivers
            .iter()
            .position(|c| c.ratchet_key == message.ratchet_key)
        {
            Some(index) => index,
            None => self.ratchet_step(&message.ratchet_key)?,
        };

        let keys = self.receivers[chain].message_keys_for(message.counter)?;
        message.verify_mac(&keys.mac_key, &self.remote_identity, &self.local_identity)?;
        let plaintext = cipher::cbc_decrypt(&keys.cipher_key, &keys.iv, &message.ciphertext)?;

        self.pending_prekey = None;
        Ok(plaintext)
    }

    /// DH ratchet step on a new peer ratchet key. Returns the index of the
    /// new receiving chain.
    fn ratchet_step(&mut self, their_ratchet: &PublicKey) -> XsResult<usize> {
        let (root, receiving) = self
            .root_key
            .create_chain(&self.sender.ratchet.private.agree(their_ratchet))?;
        let ratchet = KeyPair::generate();
        let (root, sending) = root.create_chain(&ratchet.private.agree(their_ratchet))?;

        self.previous_counter = self.sender.chain_key.index().saturating_sub(1);
        self.root_key = root;
        self.sender = SenderChain {
            ratchet,
            chain_key: sending,
        };
        self.receivers.push(ReceiverChain {
            ratchet_key: *their_ratchet,
            chain_key: receiving,
            skipped: Vec::new(),
        });
        if self.receivers.len() > MAX_RECEIVER_CHAINS {
            self.receivers.remove(0);
        }
        Ok(self.receivers.len() - 1)
    }

    pub fn to_json(&self) -> XsResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> XsResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
