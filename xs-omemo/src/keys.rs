//! Curve25519 key pairs and their wire encoding.
//!
//! Public keys travel as 33 bytes: the type byte `0x05` followed by the
//! Montgomery u-coordinate.

use std::fmt;

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use xs_core::error::{XsError, XsResult};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Type byte prefixed to serialized Curve25519 public keys.
pub const DJB_TYPE: u8 = 0x05;

/// A Curve25519 public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey([u8; 32]);

impl PublicKey {
    pub fn from_raw(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Decode a public key. Accepts the 33-byte typed form, or a bare
    /// 32-byte key as some clients publish.
    pub fn from_bytes(bytes: &[u8]) -> XsResult<Self> {
        let raw: &[u8] = match bytes.len() {
            33 if bytes[0] == DJB_TYPE => &bytes[1..],
            33 => {
                return Err(XsError::Crypto(format!(
                    "unknown public key type 0x{:02x}",
                    bytes[0]
                )))
            }
            32 => bytes,
            n => return Err(XsError::Crypto(format!("bad public key length {n}"))),
        };
        let mut key = [0u8; 32];
        key.copy_from_slice(raw);
        Ok(Self(key))
    }

    /// The 33-byte typed encoding.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(33);
        out.push(DJB_TYPE);
        out.extend_from_slice(&self.0);
        out
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Human-comparable fingerprint: lowercase hex in groups of eight.
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.0)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", hex(&self.0[..4]))
    }
}

/// A clamped Curve25519 private key.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct PrivateKey([u8; 32]);

impl PrivateKey {
    /// Wrap raw key bytes. The scalar is clamped.
    pub fn from_bytes(bytes: &[u8]) -> XsResult<Self> {
        let key: [u8; 32] = bytes
            .try_into()
            .map_err(|_| XsError::Crypto(format!("bad private key length {}", bytes.len())))?;
        Ok(Self(clamp(key)))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Public key for this private key.
    pub fn public_key(&self) -> PublicKey {
        let secret = x25519_dalek::StaticSecret::from(self.0);
        PublicKey(x25519_dalek::PublicKey::from(&secret).to_bytes())
    }

    /// X25519 Diffie-Hellman with a peer public key.
    pub fn agree(&self, their: &PublicKey) -> [u8; 32] {
        let secret = x25519_dalek::StaticSecret::from(self.0);
        secret
            .diffie_hellman(&x25519_dalek::PublicKey::from(their.0))
            .to_bytes()
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(..)")
    }
}

/// A Curve25519 key pair.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KeyPair {
    pub public: PublicKey,
    pub private: PrivateKey,
}

impl KeyPair {
    /// Generate a fresh key pair from the OS RNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        let private = PrivateKey(clamp(bytes));
        bytes.zeroize();
        Self {
            public: private.public_key(),
            private,
        }
    }

    /// Rebuild a key pair from stored bytes, checking that the halves match.
    pub fn from_parts(private: &[u8], public: &[u8]) -> XsResult<Self> {
        let private = PrivateKey::from_bytes(private)?;
        let public = PublicKey::from_bytes(public)?;
        if private.public_key() != public {
            return Err(XsError::Crypto("key pair halves do not match".into()));
        }
        Ok(Self { public, private })
    }
}

fn clamp(mut key: [u8; 32]) -> [u8; 32] {
    key[0] &= 248;
    key[31] &= 127;
    key[31] |= 64;
    key
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Format key bytes as lowercase hex in space-separated groups of eight.
pub fn fingerprint(bytes: &[u8]) -> String {
    hex(bytes)
        .as_bytes()
        .chunks(8)
        .map(|c| String::from_utf8_lossy(c).into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}
