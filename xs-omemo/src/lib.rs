//! send-msg OMEMO - legacy OMEMO (`eu.siacs.conversations.axolotl`) encryption.
//!
//! This crate provides:
//! - Curve25519 key pairs and XEdDSA signatures
//! - X3DH session setup and the Double Ratchet (Signal protocol v3 wire format)
//! - AES-GCM payload encryption with per-device key transport
//! - Key storage behind the `OmemoStore` trait (SQLite or in-memory)
//! - `OmemoManager`, which ties devices, trust, and sessions together

pub mod bundle;
pub mod cipher;
pub mod kdf;
pub mod keys;
pub mod manager;
pub mod message;
pub mod proto;
pub mod session;
pub mod store;
pub mod x3dh;
pub mod xeddsa;

pub use bundle::Bundle;
pub use keys::{KeyPair, PrivateKey, PublicKey};
pub use manager::{ExpectedProblems, KeyDirectory, OmemoManager};
pub use message::{Decrypted, EncryptedKey, EncryptedMessage};
pub use session::SessionState;
pub use store::{MemoryStore, OmemoStore, OwnDevice, PreKey, RemoteIdentity, SignedPreKey, SqliteStore};
pub use xs_store::TrustLevel;
