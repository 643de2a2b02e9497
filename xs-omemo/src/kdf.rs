//! Key derivation for X3DH and the Double Ratchet.

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use xs_core::error::{XsError, XsResult};
use zeroize::{Zeroize, ZeroizeOnDrop};

type HmacSha256 = Hmac<Sha256>;

const ROOT_INFO: &[u8] = b"WhisperRatchet";
const X3DH_INFO: &[u8] = b"WhisperText";
const MESSAGE_KEYS_INFO: &[u8] = b"WhisperMessageKeys";

const MESSAGE_KEY_SEED: u8 = 0x01;
const CHAIN_KEY_SEED: u8 = 0x02;

/// HKDF-SHA256 expand into `len` bytes.
pub fn hkdf(ikm: &[u8], salt: &[u8], info: &[u8], len: usize) -> XsResult<Vec<u8>> {
    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
    let mut okm = vec![0u8; len];
    hk.expand(info, &mut okm)
        .map_err(|e| XsError::Crypto(format!("hkdf expand failed: {e}")))?;
    Ok(okm)
}

/// HMAC-SHA256 over `data`.
pub fn hmac_sha256(key: &[u8], data: &[&[u8]]) -> XsResult<[u8; 32]> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
        .map_err(|e| XsError::Crypto(format!("hmac init failed: {e}")))?;
    for part in data {
        mac.update(part);
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

fn split_64(mut okm: Vec<u8>) -> ([u8; 32], [u8; 32]) {
    let mut first = [0u8; 32];
    let mut second = [0u8; 32];
    first.copy_from_slice(&okm[..32]);
    second.copy_from_slice(&okm[32..64]);
    okm.zeroize();
    (first, second)
}

/// Derive the initial root and chain keys from the concatenated X3DH secrets.
pub fn derive_x3dh(master_secret: &[u8]) -> XsResult<(RootKey, ChainKey)> {
    let (root, chain) = split_64(hkdf(master_secret, &[0u8; 32], X3DH_INFO, 64)?);
    Ok((RootKey(root), ChainKey::new(chain, 0)))
}

/// Root key of the Double Ratchet.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct RootKey(pub(crate) [u8; 32]);

impl RootKey {
    /// DH ratchet step: mix a fresh DH output into the root, yielding the
    /// next root and a new chain key.
    pub fn create_chain(&self, dh_output: &[u8; 32]) -> XsResult<(RootKey, ChainKey)> {
        let (root, chain) = split_64(hkdf(dh_output, &self.0, ROOT_INFO, 64)?);
        Ok((RootKey(root), ChainKey::new(chain, 0)))
    }
}

/// A symmetric chain key and the index of the next message key it yields.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct ChainKey {
    key: [u8; 32],
    index: u32,
}

impl ChainKey {
    pub fn new(key: [u8; 32], index: u32) -> Self {
        Self { key, index }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    /// The chain key that follows this one.
    pub fn next(&self) -> XsResult<ChainKey> {
        Ok(ChainKey::new(
            hmac_sha256(&self.key, &[&[CHAIN_KEY_SEED]])?,
            self.index + 1,
        ))
    }

    /// Message keys for this chain position.
    pub fn message_keys(&self) -> XsResult<MessageKeys> {
        let mut seed = hmac_sha256(&self.key, &[&[MESSAGE_KEY_SEED]])?;
        let keys = MessageKeys::derive(&seed, self.index);
        seed.zeroize();
        keys
    }
}

/// Per-message cipher key, MAC key, and IV.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct MessageKeys {
    pub cipher_key: [u8; 32],
    pub mac_key: [u8; 32],
    pub iv: [u8; 16],
    pub counter: u32,
}

impl MessageKeys {
    fn derive(seed: &[u8; 32], counter: u32) -> XsResult<Self> {
        let mut okm = hkdf(seed, &[0u8; 32], MESSAGE_KEYS_INFO, 80)?;
        let mut keys = Self {
            cipher_key: [0u8; 32],
            mac_key: [0u8; 32],
            iv: [0u8; 16],
            counter,
        };
        keys.cipher_key.copy_from_slice(&okm[..32]);
        keys.mac_key.copy_from_slice(&okm[32..64]);
        keys.iv.copy_from_slice(&okm[64..80]);
        okm.zeroize();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unhex(s: &str) -> Vec<u8> {
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
            .collect()
    }

    #[test]
    fn test_hkdf_rfc5869_case1() {
        let ikm = [0x0bu8; 22];
        let salt = unhex("000102030405060708090a0b0c");
        let info = unhex("f0f1f2f3f4f5f6f7f8f9");
        let okm = hkdf(&ikm, &salt, &info, 42).unwrap();
        assert_eq!(
            okm,
            unhex(
                "3cb25f25faacd57a90434f64d0362f2a2d2d0a90cf1a5a4c5db02d56ecc4c5bf34007208d5b887185865"
            )
        );
    }

    #[test]
    fn test_chain_advances() {
        let chain = ChainKey::new([1u8; 32], 0);
        let next = chain.next().unwrap();
        assert_eq!(next.index(), 1);
        assert_ne!(next.key, chain.key);

        let a = chain.message_keys().unwrap();
        let b = next.message_keys().unwrap();
        assert_eq!(a.counter, 0);
        assert_eq!(b.counter, 1);
        assert_ne!(a.cipher_key, b.cipher_key);
        assert_ne!(a.cipher_key, a.mac_key);
    }

    #[test]
    fn test_root_step_is_deterministic() {
        let root = RootKey([9u8; 32]);
        let (r1, c1) = root.create_chain(&[3u8; 32]).unwrap();
        let (r2, c2) = root.create_chain(&[3u8; 32]).unwrap();
        assert_eq!(r1.0, r2.0);
        assert_eq!(c1.key, c2.key);
        let (r3, _) = root.create_chain(&[4u8; 32]).unwrap();
        assert_ne!(r1.0, r3.0);
    }
}
