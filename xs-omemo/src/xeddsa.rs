//! XEdDSA signatures over Curve25519 keys.
//!
//! Compatible with libsignal's `curve25519` signing: the Edwards sign bit of
//! the signer's public key is carried in the top bit of the signature.

use curve25519_dalek::edwards::EdwardsPoint;
use curve25519_dalek::montgomery::MontgomeryPoint;
use curve25519_dalek::scalar::Scalar;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha512};
use zeroize::Zeroize;

use crate::keys::{PrivateKey, PublicKey};

/// Sign `message` with a Curve25519 private key.
pub fn sign(private: &PrivateKey, message: &[u8]) -> [u8; 64] {
    let mut random = [0u8; 64];
    OsRng.fill_bytes(&mut random);
    let signature = sign_with_nonce(private, message, &random);
    random.zeroize();
    signature
}

fn sign_with_nonce(private: &PrivateKey, message: &[u8], random: &[u8; 64]) -> [u8; 64] {
    let a = Scalar::from_bytes_mod_order(*private.as_bytes());
    let ed_public = EdwardsPoint::mul_base(&a).compress();
    let sign_bit = ed_public.as_bytes()[31] & 0x80;

    let mut prefix = [0xffu8; 32];
    prefix[0] = 0xfe;
    let mut hasher = Sha512::new();
    hasher.update(prefix);
    hasher.update(private.as_bytes());
    hasher.update(message);
    hasher.update(random);
    let r = Scalar::from_hash(hasher);
    let big_r = EdwardsPoint::mul_base(&r).compress();

    let mut hasher = Sha512::new();
    hasher.update(big_r.as_bytes());
    hasher.update(ed_public.as_bytes());
    hasher.update(message);
    let h = Scalar::from_hash(hasher);
    let s = h * a + r;

    let mut signature = [0u8; 64];
    signature[..32].copy_from_slice(big_r.as_bytes());
    signature[32..].copy_from_slice(s.as_bytes());
    signature[63] &= 0x7f;
    signature[63] |= sign_bit;
    signature
}

/// Verify an XEdDSA signature made by the holder of `public`.
pub fn verify(public: &PublicKey, message: &[u8], signature: &[u8]) -> bool {
    let Ok(signature) = <[u8; 64]>::try_from(signature) else {
        return false;
    };
    let sign_bit = signature[63] >> 7;
    let Some(big_a) = MontgomeryPoint(*public.as_bytes()).to_edwards(sign_bit) else {
        return false;
    };

    let mut s_bytes = [0u8; 32];
    s_bytes.copy_from_slice(&signature[32..]);
    s_bytes[31] &= 0x7f;
    if s_bytes[31] & 0xe0 != 0 {
        return false;
    }
    let Some(s) = Option::<Scalar>::from(Scalar::from_canonical_bytes(s_bytes)) else {
        return false;
    };

    let mut hasher = Sha512::new();
    hasher.update(&signature[..32]);
    hasher.update(big_a.compress().as_bytes());
    hasher.update(message);
    let h = Scalar::from_hash(hasher);

    let check = EdwardsPoint::vartime_double_scalar_mul_basepoint(&h, &-big_a, &s).compress();
    check.as_bytes() == &signature[..32]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::KeyPair;

    #[test]
    fn test_sign_and_verify() {
        let pair = KeyPair::generate();
        let message = KeyPair::generate().public.serialize();
        let signature = sign(&pair.private, &message);
        assert!(verify(&pair.public, &message, &signature));
    }

    #[test]
    fn test_many_keys_verify() {
        // exercises both values of the carried sign bit
        for _ in 0..16 {
            let pair = KeyPair::generate();
            let signature = sign(&pair.private, b"signed prekey");
            assert!(verify(&pair.public, b"signed prekey", &signature));
        }
    }

    #[test]
    fn test_tampering_fails() {
        let pair = KeyPair::generate();
        let signature = sign(&pair.private, b"hello");

        assert!(!verify(&pair.public, b"hellp", &signature));

        let mut bad = signature;
        bad[5] ^= 0x01;
        assert!(!verify(&pair.public, b"hello", &bad));

        let mut flipped = signature;
        flipped[63] ^= 0x80;
        assert!(!verify(&pair.public, b"hello", &flipped));

        let other = KeyPair::generate();
        assert!(!verify(&other.public, b"hello", &signature));
        assert!(!verify(&pair.public, b"hello", &signature[..63]));
    }

    #[test]
    fn test_deterministic_with_fixed_nonce() {
        let pair = KeyPair::generate();
        let a = sign_with_nonce(&pair.private, b"msg", &[7u8; 64]);
        let b = sign_with_nonce(&pair.private, b"msg", &[7u8; 64]);
        let c = sign_with_nonce(&pair.private, b"msg", &[8u8; 64]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(verify(&pair.public, b"msg", &c));
    }
}
