//! Published key bundles.

use rand::seq::SliceRandom;
use xs_core::error::{XsError, XsResult};

use crate::keys::PublicKey;
use crate::xeddsa;

/// A device's public key material as published on its bundle node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bundle {
    pub identity_key: PublicKey,
    pub signed_prekey_id: u32,
    pub signed_prekey: PublicKey,
    pub signed_prekey_signature: Vec<u8>,
    pub prekeys: Vec<(u32, PublicKey)>,
}

impl Bundle {
    /// Check the signed prekey signature against the identity key.
    pub fn verify(&self) -> XsResult<()> {
        if xeddsa::verify(
            &self.identity_key,
            &self.signed_prekey.serialize(),
            &self.signed_prekey_signature,
        ) {
            Ok(())
        } else {
            Err(XsError::Crypto("signed prekey signature does not verify".into()))
        }
    }

    /// Pick a random one-time prekey, if the bundle has any.
    pub fn random_prekey(&self) -> Option<(u32, PublicKey)> {
        self.prekeys.choose(&mut rand::thread_rng()).copied()
    }
}
