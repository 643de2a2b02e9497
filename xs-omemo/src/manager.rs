//! OMEMO device management and message encryption.
//!
//! `OmemoManager` owns this device's identity and drives everything that
//! touches sessions: creating the device on first use, keeping the prekey
//! pool filled, recording remote identities and their trust, and
//! encrypting/decrypting messages. Remote key material is looked up through
//! a [`KeyDirectory`], which the XMPP layer implements over PEP.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use rand::Rng;
use tracing::{debug, info, warn};
use xs_core::error::{EncryptionProblem, XsError, XsResult};

use crate::bundle::Bundle;
use crate::cipher;
use crate::keys::{KeyPair, PublicKey};
use crate::message::{Decrypted, EncryptedKey, EncryptedMessage};
use crate::proto::{PreKeySignalMessage, SignalMessage};
use crate::session::SessionState;
use crate::store::{OmemoStore, OwnDevice, PreKey, RemoteIdentity, SignedPreKey};
use crate::{x3dh, xeddsa, TrustLevel};

/// Devices to skip per bare JID, because a problem with them was already
/// reported and accepted.
pub type ExpectedProblems = HashMap<String, HashSet<u32>>;

/// Registration ids are 14-bit values.
const MAX_REGISTRATION_ID: u32 = 16380;

/// Where remote device lists and bundles come from.
#[async_trait]
pub trait KeyDirectory: Send {
    /// Device ids announced by a bare JID. An absent list is an empty list.
    async fn fetch_devices(&mut self, jid: &str) -> XsResult<Vec<u32>>;

    /// The bundle of one device, or `None` if it is not published.
    async fn fetch_bundle(&mut self, jid: &str, device_id: u32) -> XsResult<Option<Bundle>>;
}

/// The local OMEMO device and its key store.
pub struct OmemoManager {
    store: Box<dyn OmemoStore>,
    own_jid: String,
    own: OwnDevice,
    prekey_count: u32,
}

struct Target {
    jid: String,
    device_id: u32,
    bundle: Option<Bundle>,
}

impl OmemoManager {
    /// Load this device from the store, generating identity, signed prekey,
    /// and prekeys on first use.
    pub fn load_or_create(
        store: Box<dyn OmemoStore>,
        own_jid: &str,
        prekey_count: u32,
    ) -> XsResult<Self> {
        let own = match store.load_own_device()? {
            Some(own) => own,
            None => {
                let mut rng = rand::thread_rng();
                let own = OwnDevice {
                    device_id: rng.gen_range(1..=i32::MAX as u32),
                    registration_id: rng.gen_range(1..=MAX_REGISTRATION_ID),
                    identity: KeyPair::generate(),
                };
                store.save_own_device(&own)?;
                info!("created OMEMO device {} for {own_jid}", own.device_id);
                own
            }
        };

        let manager = Self {
            store,
            own_jid: own_jid.to_string(),
            own,
            prekey_count,
        };

        if manager.store.latest_signed_prekey()?.is_none() {
            manager.rotate_signed_prekey()?;
        }
        manager.refill_prekeys()?;
        Ok(manager)
    }

    pub fn own_device_id(&self) -> u32 {
        self.own.device_id
    }

    pub fn own_jid(&self) -> &str {
        &self.own_jid
    }

    /// Fingerprint of this device's identity key.
    pub fn own_fingerprint(&self) -> String {
        self.own.identity.public.fingerprint()
    }

    pub fn store(&self) -> &dyn OmemoStore {
        self.store.as_ref()
    }

    /// Generate and store a new signed prekey.
    pub fn rotate_signed_prekey(&self) -> XsResult<()> {
        let id = self
            .store
            .latest_signed_prekey()?
            .map(|k| k.id + 1)
            .unwrap_or(1);
        let key_pair = KeyPair::generate();
        let signature = xeddsa::sign(&self.own.identity.private, &key_pair.public.serialize());
        self.store.save_signed_prekey(&SignedPreKey {
            id,
            key_pair,
            signature: signature.to_vec(),
        })?;
        debug!("generated signed prekey {id}");
        Ok(())
    }

    /// Top the one-time prekey pool back up. Returns true if keys were added.
    pub fn refill_prekeys(&self) -> XsResult<bool> {
        let have = self.store.load_prekeys()?.len() as u32;
        if have >= self.prekey_count {
            return Ok(false);
        }
        let next = self.store.max_prekey_id()? + 1;
        for id in next..next + (self.prekey_count - have) {
            self.store.save_prekey(&PreKey {
                id,
                key_pair: KeyPair::generate(),
            })?;
        }
        debug!("generated {} prekeys", self.prekey_count - have);
        Ok(true)
    }

    /// The bundle to publish for this device.
    pub fn own_bundle(&self) -> XsResult<Bundle> {
        let signed = self
            .store
            .latest_signed_prekey()?
            .ok_or_else(|| XsError::Omemo("no signed prekey".into()))?;
        let prekeys = self
            .store
            .load_prekeys()?
            .into_iter()
            .map(|k| (k.id, k.key_pair.public))
            .collect();
        Ok(Bundle {
            identity_key: self.own.identity.public,
            signed_prekey_id: signed.id,
            signed_prekey: signed.key_pair.public,
            signed_prekey_signature: signed.signature,
            prekeys,
        })
    }

    /// Mark a device's identity as trusted.
    pub fn trust(&self, jid: &str, device_id: u32, identity_key: &[u8]) -> XsResult<()> {
        self.set_trust(jid, device_id, identity_key, TrustLevel::Trusted)
    }

    /// Mark a device's identity as distrusted; it is skipped when encrypting.
    pub fn distrust(&self, jid: &str, device_id: u32, identity_key: &[u8]) -> XsResult<()> {
        self.set_trust(jid, device_id, identity_key, TrustLevel::Distrusted)
    }

    fn set_trust(
        &self,
        jid: &str,
        device_id: u32,
        identity_key: &[u8],
        trust: TrustLevel,
    ) -> XsResult<()> {
        let key = PublicKey::from_bytes(identity_key)?;
        if let Some(existing) = self.store.load_identity(jid, device_id)? {
            if existing.key != key {
                self.store.remove_session(jid, device_id)?;
            }
        }
        self.store.save_identity(&RemoteIdentity {
            jid: jid.to_string(),
            device_id,
            key,
            trust,
        })?;
        info!("{trust} device {device_id} of {jid} ({})", key.fingerprint());
        Ok(())
    }

    /// Remember the identity key of a remote device and return its trust.
    ///
    /// A new device starts undecided. A changed key for a known device
    /// resets it to undecided and drops the old session.
    fn record_identity(&self, jid: &str, device_id: u32, key: &PublicKey) -> XsResult<TrustLevel> {
        match self.store.load_identity(jid, device_id)? {
            Some(existing) if existing.key == *key => Ok(existing.trust),
            existing => {
                if existing.is_some() {
                    warn!("identity key of device {device_id} of {jid} changed");
                    self.store.remove_session(jid, device_id)?;
                }
                self.store.save_identity(&RemoteIdentity {
                    jid: jid.to_string(),
                    device_id,
                    key: *key,
                    trust: TrustLevel::Undecided,
                })?;
                Ok(TrustLevel::Undecided)
            }
        }
    }

    /// Encrypt a message for every usable device of the recipients, plus this
    /// account's other devices.
    ///
    /// Fails with:
    /// - `EncryptionPrepare` listing devices whose bundle is missing or invalid
    ///   (unless listed in `expect_problems`),
    /// - `UndecidedDevice` for the first device without a trust decision,
    /// - `NoEligibleDevices` when a recipient is left with no device,
    /// - the directory's error when a lookup itself fails.
    pub async fn encrypt_message(
        &self,
        plaintext: &[u8],
        recipients: &[String],
        expect_problems: &ExpectedProblems,
        directory: &mut dyn KeyDirectory,
    ) -> XsResult<EncryptedMessage> {
        let mut jids: Vec<&str> = recipients.iter().map(String::as_str).collect();
        if !jids.contains(&self.own_jid.as_str()) {
            jids.push(&self.own_jid);
        }

        let mut targets = Vec::new();
        let mut problems = Vec::new();

        for jid in &jids {
            let devices = directory.fetch_devices(jid).await?;
            self.store.store_device_list(jid, &devices)?;
            let expected = expect_problems.get(*jid);

            for device_id in devices {
                if *jid == self.own_jid && device_id == self.own.device_id {
                    continue;
                }
                if expected.is_some_and(|set| set.contains(&device_id)) {
                    debug!("skipping device {device_id} of {jid} (problem expected)");
                    continue;
                }
                if self.store.load_session(jid, device_id)?.is_some() {
                    targets.push(Target {
                        jid: jid.to_string(),
                        device_id,
                        bundle: None,
                    });
                    continue;
                }

                match directory.fetch_bundle(jid, device_id).await {
                    Ok(Some(bundle)) => match bundle.verify() {
                        Ok(()) => targets.push(Target {
                            jid: jid.to_string(),
                            device_id,
                            bundle: Some(bundle),
                        }),
                        Err(e) => problems.push(EncryptionProblem::InvalidBundle {
                            jid: jid.to_string(),
                            device_id,
                            reason: e.to_string(),
                        }),
                    },
                    Ok(None) | Err(XsError::StanzaError { .. }) => {
                        problems.push(EncryptionProblem::MissingBundle {
                            jid: jid.to_string(),
                            device_id,
                        })
                    }
                    Err(e @ (XsError::Omemo(_) | XsError::Crypto(_) | XsError::Xml(_))) => {
                        problems.push(EncryptionProblem::InvalidBundle {
                            jid: jid.to_string(),
                            device_id,
                            reason: e.to_string(),
                        })
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        if !problems.is_empty() {
            return Err(XsError::EncryptionPrepare(problems));
        }

        let mut sessions: Vec<(String, u32, SessionState)> = Vec::new();
        for target in targets {
            let session = match &target.bundle {
                Some(bundle) => {
                    x3dh::initiate(&self.own.identity, self.own.registration_id, bundle)?
                }
                None => self
                    .store
                    .load_session(&target.jid, target.device_id)?
                    .ok_or_else(|| {
                        XsError::Omemo(format!(
                            "session with device {} of {} disappeared",
                            target.device_id, target.jid
                        ))
                    })?,
            };
            let identity_key = *session.remote_identity();

            match self.record_identity(&target.jid, target.device_id, &identity_key)? {
                TrustLevel::Trusted => {}
                TrustLevel::Distrusted => {
                    debug!(
                        "not encrypting for distrusted device {} of {}",
                        target.device_id, target.jid
                    );
                    continue;
                }
                TrustLevel::Undecided => {
                    return Err(XsError::UndecidedDevice {
                        jid: target.jid,
                        device_id: target.device_id,
                        identity_key: identity_key.serialize(),
                    })
                }
            }

            if target.bundle.is_some() {
                debug!(
                    "built new session with device {} of {}",
                    target.device_id, target.jid
                );
            }
            sessions.push((target.jid, target.device_id, session));
        }

        for jid in recipients {
            if !sessions.iter().any(|(j, _, _)| j == jid) {
                return Err(XsError::NoEligibleDevices(jid.clone()));
            }
        }

        let sealed = cipher::seal_payload(plaintext)?;
        let mut keys = Vec::with_capacity(sessions.len());
        for (jid, device_id, mut session) in sessions {
            let message = session.encrypt(&sealed.key_material)?;
            self.store.save_session(&jid, device_id, &session)?;
            keys.push(EncryptedKey {
                rid: device_id,
                prekey: message.is_prekey(),
                data: message.serialize().to_vec(),
            });
        }
        debug!("encrypted message for {} devices", keys.len());

        Ok(EncryptedMessage {
            sid: self.own.device_id,
            iv: sealed.iv.to_vec(),
            keys,
            payload: Some(sealed.ciphertext),
        })
    }

    /// Decrypt a message from a remote device.
    pub fn decrypt_message(&self, sender_jid: &str, message: &EncryptedMessage) -> XsResult<Decrypted> {
        let key = message.key_for(self.own.device_id).ok_or_else(|| {
            XsError::Omemo(format!(
                "message from {sender_jid} is not encrypted for device {}",
                self.own.device_id
            ))
        })?;

        let (key_material, bundle_changed) = if key.prekey {
            self.decrypt_prekey(sender_jid, message.sid, &key.data)?
        } else {
            let mut session = self
                .store
                .load_session(sender_jid, message.sid)?
                .ok_or_else(|| {
                    XsError::Omemo(format!(
                        "no session with device {} of {sender_jid}",
                        message.sid
                    ))
                })?;
            let plaintext = session.decrypt(&SignalMessage::parse(&key.data)?)?;
            self.store.save_session(sender_jid, message.sid, &session)?;
            (plaintext, false)
        };

        let plaintext = match &message.payload {
            Some(payload) => Some(cipher::open_payload(&key_material, &message.iv, payload)?),
            None => None,
        };
        Ok(Decrypted {
            plaintext,
            bundle_changed,
        })
    }

    fn decrypt_prekey(&self, sender_jid: &str, device_id: u32, data: &[u8]) -> XsResult<(Vec<u8>, bool)> {
        let message = PreKeySignalMessage::parse(data)?;

        if let Some(mut session) = self.store.load_session(sender_jid, device_id)? {
            if session.base_key() == &message.base_key {
                let plaintext = session.decrypt(&message.message)?;
                self.store.save_session(sender_jid, device_id, &session)?;
                return Ok((plaintext, false));
            }
        }

        let signed = self
            .store
            .load_signed_prekey(message.signed_pre_key_id)?
            .ok_or_else(|| {
                XsError::Omemo(format!("unknown signed prekey {}", message.signed_pre_key_id))
            })?;
        let one_time = match message.pre_key_id {
            Some(id) => Some(
                self.store
                    .load_prekey(id)?
                    .ok_or_else(|| XsError::Omemo(format!("unknown prekey {id}")))?,
            ),
            None => None,
        };

        let mut session = x3dh::respond(
            &self.own.identity,
            self.own.registration_id,
            &signed.key_pair,
            one_time.as_ref().map(|k| &k.key_pair),
            &message,
        )?;
        let plaintext = session.decrypt(&message.message)?;

        let trust = self.record_identity(sender_jid, device_id, &message.identity_key)?;
        if trust == TrustLevel::Undecided {
            debug!("decrypted message from undecided device {device_id} of {sender_jid}");
        }
        self.store.save_session(sender_jid, device_id, &session)?;

        let mut bundle_changed = false;
        if let Some(id) = message.pre_key_id {
            self.store.remove_prekey(id)?;
            bundle_changed = self.refill_prekeys()?;
        }
        Ok((plaintext, bundle_changed))
    }
}
