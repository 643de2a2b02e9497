//! send-msg store - SQLite persistence for OMEMO key material.
//!
//! This crate owns the per-account key database: initialization, versioned
//! migrations, and the record types for the own identity, prekeys, cached
//! device lists, remote identities with their trust level, and ratchet
//! sessions.

pub mod db;
pub mod migrations;
pub mod models;
pub mod schema;

// Re-export key types
pub use db::{Database, DatabaseStats, DbPool};
pub use models::device::DeviceRecord;
pub use models::identity::{IdentityRecord, TrustLevel};
pub use models::own_identity::OwnIdentity;
pub use models::prekey::{PreKeyRecord, SignedPreKeyRecord};
pub use models::session::SessionRecord;
