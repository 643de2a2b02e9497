//! Symmetric ciphers: AES-256-CBC for ratchet messages, AES-128-GCM for payloads.

use aes::Aes256;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes128Gcm, Nonce};
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use cbc::{Decryptor, Encryptor};
use rand::rngs::OsRng;
use rand::RngCore;
use xs_core::error::{XsError, XsResult};

type Aes256CbcEnc = Encryptor<Aes256>;
type Aes256CbcDec = Decryptor<Aes256>;

/// Payload key length.
pub const PAYLOAD_KEY_LEN: usize = 16;
/// Payload IV length.
pub const PAYLOAD_IV_LEN: usize = 12;
/// GCM authentication tag length.
pub const TAG_LEN: usize = 16;

/// AES-256-CBC with PKCS#7 padding.
pub fn cbc_encrypt(key: &[u8; 32], iv: &[u8; 16], plaintext: &[u8]) -> XsResult<Vec<u8>> {
    let encryptor = Aes256CbcEnc::new_from_slices(key, iv)
        .map_err(|e| XsError::Crypto(format!("cipher init failed: {e}")))?;

    let mut buf = vec![0u8; plaintext.len() + 16];
    buf[..plaintext.len()].copy_from_slice(plaintext);
    let encrypted = encryptor
        .encrypt_padded_mut::<cbc::cipher::block_padding::Pkcs7>(&mut buf, plaintext.len())
        .map_err(|e| XsError::Crypto(format!("encryption failed: {e}")))?;
    Ok(encrypted.to_vec())
}

/// Inverse of [`cbc_encrypt`].
pub fn cbc_decrypt(key: &[u8; 32], iv: &[u8; 16], ciphertext: &[u8]) -> XsResult<Vec<u8>> {
    let decryptor = Aes256CbcDec::new_from_slices(key, iv)
        .map_err(|e| XsError::Crypto(format!("cipher init failed: {e}")))?;

    let mut buf = ciphertext.to_vec();
    let decrypted = decryptor
        .decrypt_padded_mut::<cbc::cipher::block_padding::Pkcs7>(&mut buf)
        .map_err(|e| XsError::Crypto(format!("decryption failed: {e}")))?;
    Ok(decrypted.to_vec())
}

/// Result of payload encryption.
pub struct SealedPayload {
    /// `key || tag`, transported per device through the ratchet.
    pub key_material: Vec<u8>,
    pub iv: [u8; PAYLOAD_IV_LEN],
    /// Ciphertext without the tag.
    pub ciphertext: Vec<u8>,
}

/// Encrypt a message body under a fresh AES-128-GCM key.
pub fn seal_payload(plaintext: &[u8]) -> XsResult<SealedPayload> {
    let mut key = [0u8; PAYLOAD_KEY_LEN];
    let mut iv = [0u8; PAYLOAD_IV_LEN];
    OsRng.fill_bytes(&mut key);
    OsRng.fill_bytes(&mut iv);

    let cipher = Aes128Gcm::new_from_slice(&key)
        .map_err(|e| XsError::Crypto(format!("cipher init failed: {e}")))?;
    let mut sealed = cipher
        .encrypt(Nonce::from_slice(&iv), plaintext)
        .map_err(|e| XsError::Crypto(format!("payload encryption failed: {e}")))?;

    let tag = sealed.split_off(sealed.len() - TAG_LEN);
    let mut key_material = key.to_vec();
    key_material.extend_from_slice(&tag);

    Ok(SealedPayload {
        key_material,
        iv,
        ciphertext: sealed,
    })
}

/// Decrypt a payload given the transported `key || tag`.
pub fn open_payload(key_material: &[u8], iv: &[u8], ciphertext: &[u8]) -> XsResult<Vec<u8>> {
    if key_material.len() < PAYLOAD_KEY_LEN + TAG_LEN {
        return Err(XsError::Crypto(format!(
            "key material too short ({} bytes)",
            key_material.len()
        )));
    }
    if iv.len() != PAYLOAD_IV_LEN {
        return Err(XsError::Crypto(format!("unsupported iv length {}", iv.len())));
    }
    let (key, tag) = key_material.split_at(PAYLOAD_KEY_LEN);

    let cipher = Aes128Gcm::new_from_slice(key)
        .map_err(|e| XsError::Crypto(format!("cipher init failed: {e}")))?;
    let mut sealed = ciphertext.to_vec();
    sealed.extend_from_slice(&tag[..TAG_LEN]);
    cipher
        .decrypt(Nonce::from_slice(iv), sealed.as_slice())
        .map_err(|_| XsError::Crypto("payload authentication failed".into()))
}
