//! X3DH session agreement for both sides of a new session.

use xs_core::error::XsResult;
use zeroize::Zeroize;

use crate::bundle::Bundle;
use crate::kdf;
use crate::keys::{KeyPair, PublicKey};
use crate::proto::PreKeySignalMessage;
use crate::session::{PendingPreKey, ReceiverChain, SenderChain, SessionState};

fn master_secret(parts: &[[u8; 32]]) -> Vec<u8> {
    let mut secret = vec![0xffu8; 32];
    for part in parts {
        secret.extend_from_slice(part);
    }
    secret
}

/// Start a session with a remote device from its published bundle.
///
/// The bundle signature is checked first. A random one-time prekey is used
/// when the bundle offers one.
pub fn initiate(
    own_identity: &KeyPair,
    own_registration_id: u32,
    bundle: &Bundle,
) -> XsResult<SessionState> {
    bundle.verify()?;

    let base = KeyPair::generate();
    let prekey = bundle.random_prekey();

    let mut parts = vec![
        own_identity.private.agree(&bundle.signed_prekey),
        base.private.agree(&bundle.identity_key),
        base.private.agree(&bundle.signed_prekey),
    ];
    if let Some((_, one_time)) = &prekey {
        parts.push(base.private.agree(one_time));
    }
    let mut secret = master_secret(&parts);
    parts.zeroize();
    let (root, chain) = kdf::derive_x3dh(&secret)?;
    secret.zeroize();

    let ratchet = KeyPair::generate();
    let (root, sending) = root.create_chain(&ratchet.private.agree(&bundle.signed_prekey))?;

    Ok(SessionState {
        local_identity: own_identity.public,
        remote_identity: bundle.identity_key,
        local_registration_id: own_registration_id,
        remote_registration_id: 0,
        root_key: root,
        sender: SenderChain {
            ratchet,
            chain_key: sending,
        },
        receivers: vec![ReceiverChain {
            ratchet_key: bundle.signed_prekey,
            chain_key: chain,
            skipped: Vec::new(),
        }],
        previous_counter: 0,
        pending_prekey: Some(PendingPreKey {
            pre_key_id: prekey.map(|(id, _)| id),
            signed_pre_key_id: bundle.signed_prekey_id,
            base_key: base.public,
        }),
        base_key: base.public,
    })
}

/// Build the responder side of a session from a received prekey message.
///
/// `one_time_prekey` must be the key named by `message.pre_key_id`, if any.
pub fn respond(
    own_identity: &KeyPair,
    own_registration_id: u32,
    signed_prekey: &KeyPair,
    one_time_prekey: Option<&KeyPair>,
    message: &PreKeySignalMessage,
) -> XsResult<SessionState> {
    let their_identity: &PublicKey = &message.identity_key;
    let their_base: &PublicKey = &message.base_key;

    let mut parts = vec![
        signed_prekey.private.agree(their_identity),
        own_identity.private.agree(their_base),
        signed_prekey.private.agree(their_base),
    ];
    if let Some(one_time) = one_time_prekey {
        parts.push(one_time.private.agree(their_base));
    }
    let mut secret = master_secret(&parts);
    parts.zeroize();
    let (root, chain) = kdf::derive_x3dh(&secret)?;
    secret.zeroize();

    Ok(SessionState {
        local_identity: own_identity.public,
        remote_identity: *their_identity,
        local_registration_id: own_registration_id,
        remote_registration_id: message.registration_id,
        root_key: root,
        sender: SenderChain {
            ratchet: signed_prekey.clone(),
            chain_key: chain,
        },
        receivers: Vec::new(),
        previous_counter: 0,
        pending_prekey: None,
        base_key: *their_base,
    })
}
