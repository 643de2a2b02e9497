//! Key storage behind the `OmemoStore` trait.
//!
//! `SqliteStore` persists to the per-account database from `xs-store`;
//! `MemoryStore` keeps everything in process and is used by tests.

use std::collections::HashMap;
use std::sync::Mutex;

use xs_core::error::{XsError, XsResult};
use xs_store::{
    Database, DeviceRecord, IdentityRecord, OwnIdentity, PreKeyRecord, SessionRecord,
    SignedPreKeyRecord, TrustLevel,
};

use crate::keys::{KeyPair, PublicKey};
use crate::session::SessionState;

/// This device's long-term identity.
#[derive(Clone, Debug)]
pub struct OwnDevice {
    pub device_id: u32,
    pub registration_id: u32,
    pub identity: KeyPair,
}

/// A signed prekey and its signature by the identity key.
#[derive(Clone, Debug)]
pub struct SignedPreKey {
    pub id: u32,
    pub key_pair: KeyPair,
    pub signature: Vec<u8>,
}

/// A one-time prekey.
#[derive(Clone, Debug)]
pub struct PreKey {
    pub id: u32,
    pub key_pair: KeyPair,
}

/// A remote device's identity key and our trust in it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteIdentity {
    pub jid: String,
    pub device_id: u32,
    pub key: PublicKey,
    pub trust: TrustLevel,
}

/// Storage for everything the OMEMO layer needs to remember.
pub trait OmemoStore: Send + Sync {
    fn load_own_device(&self) -> XsResult<Option<OwnDevice>>;
    fn save_own_device(&self, device: &OwnDevice) -> XsResult<()>;

    fn load_signed_prekey(&self, id: u32) -> XsResult<Option<SignedPreKey>>;
    fn latest_signed_prekey(&self) -> XsResult<Option<SignedPreKey>>;
    fn save_signed_prekey(&self, key: &SignedPreKey) -> XsResult<()>;

    fn load_prekey(&self, id: u32) -> XsResult<Option<PreKey>>;
    fn load_prekeys(&self) -> XsResult<Vec<PreKey>>;
    fn save_prekey(&self, key: &PreKey) -> XsResult<()>;
    fn remove_prekey(&self, id: u32) -> XsResult<()>;
    /// Highest prekey id ever handed out.
    fn max_prekey_id(&self) -> XsResult<u32>;

    /// Active device ids last seen for a JID.
    fn device_list(&self, jid: &str) -> XsResult<Vec<u32>>;
    fn store_device_list(&self, jid: &str, device_ids: &[u32]) -> XsResult<()>;

    fn load_identity(&self, jid: &str, device_id: u32) -> XsResult<Option<RemoteIdentity>>;
    fn save_identity(&self, identity: &RemoteIdentity) -> XsResult<()>;

    fn load_session(&self, jid: &str, device_id: u32) -> XsResult<Option<SessionState>>;
    fn save_session(&self, jid: &str, device_id: u32, session: &SessionState) -> XsResult<()>;
    fn remove_session(&self, jid: &str, device_id: u32) -> XsResult<()>;
}

// ─── SQLite ──────────────────────────────────────────────────────────────

/// `OmemoStore` over the per-account SQLite database.
#[derive(Clone)]
pub struct SqliteStore {
    db: Database,
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}

fn key_pair(private: &[u8], public: &[u8]) -> XsResult<KeyPair> {
    KeyPair::from_parts(private, public)
        .map_err(|e| XsError::Database(format!("corrupt key material: {e}")))
}

impl OmemoStore for SqliteStore {
    fn load_own_device(&self) -> XsResult<Option<OwnDevice>> {
        let conn = self.db.conn()?;
        OwnIdentity::load(&conn)?
            .map(|own| {
                Ok(OwnDevice {
                    device_id: own.device_id,
                    registration_id: own.registration_id,
                    identity: key_pair(&own.identity_private, &own.identity_public)?,
                })
            })
            .transpose()
    }

    fn save_own_device(&self, device: &OwnDevice) -> XsResult<()> {
        let conn = self.db.conn()?;
        OwnIdentity {
            device_id: device.device_id,
            registration_id: device.registration_id,
            identity_private: device.identity.private.as_bytes().to_vec(),
            identity_public: device.identity.public.serialize(),
            created_at: chrono::Utc::now().to_rfc3339(),
        }
        .save(&conn)
    }

    fn load_signed_prekey(&self, id: u32) -> XsResult<Option<SignedPreKey>> {
        let conn = self.db.conn()?;
        SignedPreKeyRecord::find_by_id(&conn, id)?
            .map(|r| signed_from_record(&r))
            .transpose()
    }

    fn latest_signed_prekey(&self) -> XsResult<Option<SignedPreKey>> {
        let conn = self.db.conn()?;
        SignedPreKeyRecord::find_latest(&conn)?
            .map(|r| signed_from_record(&r))
            .transpose()
    }

    fn save_signed_prekey(&self, key: &SignedPreKey) -> XsResult<()> {
        let conn = self.db.conn()?;
        SignedPreKeyRecord {
            id: key.id,
            private_key: key.key_pair.private.as_bytes().to_vec(),
            public_key: key.key_pair.public.serialize(),
            signature: key.signature.clone(),
            created_at: chrono::Utc::now().to_rfc3339(),
        }
        .save(&conn)
    }

    fn load_prekey(&self, id: u32) -> XsResult<Option<PreKey>> {
        let conn = self.db.conn()?;
        PreKeyRecord::find_by_id(&conn, id)?
            .map(|r| prekey_from_record(&r))
            .transpose()
    }

    fn load_prekeys(&self) -> XsResult<Vec<PreKey>> {
        let conn = self.db.conn()?;
        PreKeyRecord::list_all(&conn)?
            .iter()
            .map(prekey_from_record)
            .collect()
    }

    fn save_prekey(&self, key: &PreKey) -> XsResult<()> {
        let conn = self.db.conn()?;
        PreKeyRecord {
            id: key.id,
            private_key: key.key_pair.private.as_bytes().to_vec(),
            public_key: key.key_pair.public.serialize(),
        }
        .save(&conn)
    }

    fn remove_prekey(&self, id: u32) -> XsResult<()> {
        let conn = self.db.conn()?;
        PreKeyRecord::delete(&conn, id)?;
        Ok(())
    }

    fn max_prekey_id(&self) -> XsResult<u32> {
        let conn = self.db.conn()?;
        PreKeyRecord::max_id(&conn)
    }

    fn device_list(&self, jid: &str) -> XsResult<Vec<u32>> {
        let conn = self.db.conn()?;
        DeviceRecord::active_ids(&conn, jid)
    }

    fn store_device_list(&self, jid: &str, device_ids: &[u32]) -> XsResult<()> {
        self.db
            .transaction(|conn| DeviceRecord::replace_list(conn, jid, device_ids))
    }

    fn load_identity(&self, jid: &str, device_id: u32) -> XsResult<Option<RemoteIdentity>> {
        let conn = self.db.conn()?;
        IdentityRecord::find(&conn, jid, device_id)?
            .map(|r| {
                Ok(RemoteIdentity {
                    key: PublicKey::from_bytes(&r.identity_key)?,
                    jid: r.jid,
                    device_id: r.device_id,
                    trust: r.trust,
                })
            })
            .transpose()
    }

    fn save_identity(&self, identity: &RemoteIdentity) -> XsResult<()> {
        let conn = self.db.conn()?;
        let mut record =
            IdentityRecord::new(&identity.jid, identity.device_id, identity.key.serialize());
        record.trust = identity.trust;
        record.save(&conn)
    }

    fn load_session(&self, jid: &str, device_id: u32) -> XsResult<Option<SessionState>> {
        let conn = self.db.conn()?;
        SessionRecord::find(&conn, jid, device_id)?
            .map(|r| SessionState::from_json(&r.state))
            .transpose()
    }

    fn save_session(&self, jid: &str, device_id: u32, session: &SessionState) -> XsResult<()> {
        let conn = self.db.conn()?;
        SessionRecord::new(jid, device_id, session.to_json()?).save(&conn)
    }

    fn remove_session(&self, jid: &str, device_id: u32) -> XsResult<()> {
        let conn = self.db.conn()?;
        SessionRecord::delete(&conn, jid, device_id)?;
        Ok(())
    }
}

fn signed_from_record(r: &SignedPreKeyRecord) -> XsResult<SignedPreKey> {
    Ok(SignedPreKey {
        id: r.id,
        key_pair: key_pair(&r.private_key, &r.public_key)?,
        signature: r.signature.clone(),
    })
}

fn prekey_from_record(r: &PreKeyRecord) -> XsResult<PreKey> {
    Ok(PreKey {
        id: r.id,
        key_pair: key_pair(&r.private_key, &r.public_key)?,
    })
}

// ─── In-memory ───────────────────────────────────────────────────────────

#[derive(Default)]
struct MemoryState {
    own: Option<OwnDevice>,
    signed_prekeys: HashMap<u32, SignedPreKey>,
    prekeys: HashMap<u32, PreKey>,
    max_prekey_id: u32,
    devices: HashMap<String, Vec<u32>>,
    identities: HashMap<(String, u32), RemoteIdentity>,
    sessions: HashMap<(String, u32), String>,
}

/// `OmemoStore` kept entirely in memory.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> XsResult<std::sync::MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| XsError::Internal("memory store lock poisoned".into()))
    }
}

impl OmemoStore for MemoryStore {
    fn load_own_device(&self) -> XsResult<Option<OwnDevice>> {
        Ok(self.lock()?.own.clone())
    }

    fn save_own_device(&self, device: &OwnDevice) -> XsResult<()> {
        self.lock()?.own = Some(device.clone());
        Ok(())
    }

    fn load_signed_prekey(&self, id: u32) -> XsResult<Option<SignedPreKey>> {
        Ok(self.lock()?.signed_prekeys.get(&id).cloned())
    }

    fn latest_signed_prekey(&self) -> XsResult<Option<SignedPreKey>> {
        let state = self.lock()?;
        Ok(state
            .signed_prekeys
            .keys()
            .max()
            .and_then(|id| state.signed_prekeys.get(id))
            .cloned())
    }

    fn save_signed_prekey(&self, key: &SignedPreKey) -> XsResult<()> {
        self.lock()?.signed_prekeys.insert(key.id, key.clone());
        Ok(())
    }

    fn load_prekey(&self, id: u32) -> XsResult<Option<PreKey>> {
        Ok(self.lock()?.prekeys.get(&id).cloned())
    }

    fn load_prekeys(&self) -> XsResult<Vec<PreKey>> {
        let mut keys: Vec<PreKey> = self.lock()?.prekeys.values().cloned().collect();
        keys.sort_by_key(|k| k.id);
        Ok(keys)
    }

    fn save_prekey(&self, key: &PreKey) -> XsResult<()> {
        let mut state = self.lock()?;
        state.max_prekey_id = state.max_prekey_id.max(key.id);
        state.prekeys.insert(key.id, key.clone());
        Ok(())
    }

    fn remove_prekey(&self, id: u32) -> XsResult<()> {
        self.lock()?.prekeys.remove(&id);
        Ok(())
    }

    fn max_prekey_id(&self) -> XsResult<u32> {
        Ok(self.lock()?.max_prekey_id)
    }

    fn device_list(&self, jid: &str) -> XsResult<Vec<u32>> {
        Ok(self.lock()?.devices.get(jid).cloned().unwrap_or_default())
    }

    fn store_device_list(&self, jid: &str, device_ids: &[u32]) -> XsResult<()> {
        let mut ids = device_ids.to_vec();
        ids.sort_unstable();
        ids.dedup();
        self.lock()?.devices.insert(jid.to_string(), ids);
        Ok(())
    }

    fn load_identity(&self, jid: &str, device_id: u32) -> XsResult<Option<RemoteIdentity>> {
        Ok(self
            .lock()?
            .identities
            .get(&(jid.to_string(), device_id))
            .cloned())
    }

    fn save_identity(&self, identity: &RemoteIdentity) -> XsResult<()> {
        self.lock()?.identities.insert(
            (identity.jid.clone(), identity.device_id),
            identity.clone(),
        );
        Ok(())
    }

    fn load_session(&self, jid: &str, device_id: u32) -> XsResult<Option<SessionState>> {
        self.lock()?
            .sessions
            .get(&(jid.to_string(), device_id))
            .map(|json| SessionState::from_json(json))
            .transpose()
    }

    fn save_session(&self, jid: &str, device_id: u32, session: &SessionState) -> XsResult<()> {
        let json = session.to_json()?;
        self.lock()?.sessions.insert((jid.to_string(), device_id), json);
        Ok(())
    }

    fn remove_session(&self, jid: &str, device_id: u32) -> XsResult<()> {
        self.lock()?.sessions.remove(&(jid.to_string(), device_id));
        Ok(())
    }
}
