//! End-to-end send workflow against the in-process server.

mod common;

use common::{Pep, ALICE, BOB};
use xs_core::constants;
use xs_core::{ExitStatus, TrustPolicy, XsError};
use xs_services::{omemo_xml, DeviceRef, SendMsg, Service};
use xs_xmpp::{ns, stanza, Element};

fn decrypt_as(recipient: &xs_omemo::OmemoManager, message: &Element) -> String {
    let encrypted = message.get_child("encrypted", ns::LEGACY_OMEMO).unwrap();
    let parsed = omemo_xml::parse_encrypted(encrypted).unwrap();
    let decrypted = recipient.decrypt_message(ALICE, &parsed).unwrap();
    String::from_utf8(decrypted.plaintext.unwrap()).unwrap()
}

#[tokio::test]
async fn sends_encrypted_message_and_announces_device() {
    let dir = tempfile::TempDir::new().unwrap();
    let bob = common::device(BOB);
    let mut pep = Pep::default();
    pep.publish_device(BOB, &bob, &[]);

    let (listener, port) = common::listen().await;
    let server = tokio::spawn(common::serve(listener, pep));

    let mut svc = SendMsg::new(common::config(port, dir.path())).unwrap();
    svc.init().unwrap();
    let report = svc.send(BOB, "hello bob").await.unwrap();
    let session = server.await.unwrap();

    assert_eq!(report.recipient, BOB);
    assert_eq!(report.devices, vec![bob.own_device_id()]);
    assert_eq!(
        report.trusted,
        vec![DeviceRef {
            jid: BOB.into(),
            device_id: bob.own_device_id(),
        }]
    );
    assert!(report.skipped.is_empty());
    assert_eq!(report.notices, 0);
    assert_eq!(report.attempts, 2);

    assert!(session.bodies().is_empty());
    let sent = session.encrypted();
    assert_eq!(sent.len(), 1);
    let message = sent[0];
    assert_eq!(message.attr("to"), Some(BOB));
    assert_eq!(message.attr("type"), Some("chat"));
    assert_eq!(message.attr("id"), Some(report.message_id.as_str()));
    assert_eq!(
        message
            .get_child("encryption", ns::EME)
            .and_then(|e| e.attr("namespace")),
        Some(ns::LEGACY_OMEMO)
    );
    assert!(message.has_child("store", constants::ns::HINTS));
    assert_eq!(
        stanza::body(message).as_deref(),
        Some(constants::DEFAULT_FALLBACK_BODY)
    );
    assert_eq!(decrypt_as(&bob, message), "hello bob");

    // the sender's device is now discoverable
    let (own_id, _) = svc.fingerprint().unwrap();
    let list = session.pep.get(ALICE, ns::LEGACY_OMEMO_DEVICELIST).unwrap();
    assert_eq!(omemo_xml::parse_device_list(list), vec![own_id]);
    let bundle = session
        .pep
        .get(ALICE, &omemo_xml::bundle_node(own_id))
        .unwrap();
    assert!(omemo_xml::parse_bundle(bundle).unwrap().verify().is_ok());
}

#[tokio::test]
async fn second_send_reuses_session_and_trust() {
    let dir = tempfile::TempDir::new().unwrap();
    let bob = common::device(BOB);

    for (text, trust, attempts) in [
        ("first", TrustPolicy::Blind, 2),
        ("second", TrustPolicy::Manual, 1),
    ] {
        let mut pep = Pep::default();
        pep.publish_device(BOB, &bob, &[]);
        let (listener, port) = common::listen().await;
        let server = tokio::spawn(common::serve(listener, pep));

        let mut config = common::config(port, dir.path());
        config.omemo.trust = trust;
        let mut svc = SendMsg::new(config).unwrap();
        svc.init().unwrap();

        let report = svc.send(BOB, text).await.unwrap();
        let session = server.await.unwrap();
        assert_eq!(report.attempts, attempts);
        assert_eq!(decrypt_as(&bob, session.encrypted()[0]), text);
        svc.shutdown().unwrap();
    }
}

#[tokio::test]
async fn blind_trust_keeps_going_for_many_devices() {
    let dir = tempfile::TempDir::new().unwrap();
    let phones: Vec<_> = (0..9).map(|_| common::device(BOB)).collect();
    let ids: Vec<u32> = phones.iter().map(|p| p.own_device_id()).collect();

    let mut pep = Pep::default();
    pep.publish(
        BOB,
        ns::LEGACY_OMEMO_DEVICELIST,
        omemo_xml::device_list_element(&ids),
    );
    for phone in &phones {
        pep.publish_bundle(BOB, phone.own_device_id(), phone);
    }

    let (listener, port) = common::listen().await;
    let server = tokio::spawn(common::serve(listener, pep));

    let mut svc = SendMsg::new(common::config(port, dir.path())).unwrap();
    svc.init().unwrap();
    let report = svc.send(BOB, "hello everyone").await.unwrap();
    let session = server.await.unwrap();

    // one round per newly trusted device, then the send
    assert_eq!(report.trusted.len(), 9);
    assert_eq!(report.attempts, 10);
    let mut devices = report.devices.clone();
    devices.sort_unstable();
    let mut expected = ids.clone();
    expected.sort_unstable();
    assert_eq!(devices, expected);

    let message = session.encrypted()[0];
    for phone in &phones {
        assert_eq!(decrypt_as(phone, message), "hello everyone");
    }
}

#[tokio::test]
async fn device_without_bundle_is_skipped_with_notice() {
    let dir = tempfile::TempDir::new().unwrap();
    let bob = common::device(BOB);
    let mut pep = Pep::default();
    pep.publish_device(BOB, &bob, &[777]);

    let (listener, port) = common::listen().await;
    let server = tokio::spawn(common::serve(listener, pep));

    let mut svc = SendMsg::new(common::config(port, dir.path())).unwrap();
    svc.init().unwrap();
    let report = svc.send(BOB, "partial").await.unwrap();
    let session = server.await.unwrap();

    assert_eq!(
        report.skipped,
        vec![DeviceRef {
            jid: BOB.into(),
            device_id: 777
        }]
    );
    assert_eq!(report.notices, 1);
    assert_eq!(report.devices, vec![bob.own_device_id()]);
    assert_eq!(
        session.bodies(),
        vec![format!(
            "Could not find keys for device \"777\" of recipient \"{BOB}\". Skipping."
        )]
    );
    assert_eq!(decrypt_as(&bob, session.encrypted()[0]), "partial");
}

#[tokio::test]
async fn notices_can_be_disabled() {
    let dir = tempfile::TempDir::new().unwrap();
    let bob = common::device(BOB);
    let mut pep = Pep::default();
    pep.publish_device(BOB, &bob, &[777]);

    let (listener, port) = common::listen().await;
    let server = tokio::spawn(common::serve(listener, pep));

    let mut config = common::config(port, dir.path());
    config.omemo.notify_recipient_on_error = false;
    let mut svc = SendMsg::new(config).unwrap();
    svc.init().unwrap();
    let report = svc.send(BOB, "quiet").await.unwrap();
    let session = server.await.unwrap();

    assert_eq!(report.notices, 0);
    assert_eq!(report.skipped.len(), 1);
    assert!(session.bodies().is_empty());
    assert_eq!(session.encrypted().len(), 1);
}

#[tokio::test]
async fn manual_trust_refuses_undecided_device() {
    let dir = tempfile::TempDir::new().unwrap();
    let bob = common::device(BOB);
    let mut pep = Pep::default();
    pep.publish_device(BOB, &bob, &[]);

    let (listener, port) = common::listen().await;
    let server = tokio::spawn(common::serve(listener, pep));

    let mut config = common::config(port, dir.path());
    config.omemo.trust = TrustPolicy::Manual;
    let mut svc = SendMsg::new(config).unwrap();
    svc.init().unwrap();
    let err = svc.send(BOB, "secret").await.unwrap_err();
    let session = server.await.unwrap();

    assert!(matches!(
        err,
        XsError::UndecidedDevice { ref jid, device_id, .. }
            if jid == BOB && device_id == bob.own_device_id()
    ));
    assert_eq!(err.exit_status(), ExitStatus::Encryption);
    assert!(session.messages.is_empty());
}

#[tokio::test]
async fn trust_that_does_not_hold_ends_the_send() {
    let dir = tempfile::TempDir::new().unwrap();
    let bob = common::device(BOB);
    let impostor = common::device(BOB);
    let device_id = bob.own_device_id();

    // the same device id answers with a different identity key on the second read
    let mut pep = Pep::default();
    pep.publish(
        BOB,
        ns::LEGACY_OMEMO_DEVICELIST,
        omemo_xml::device_list_element(&[device_id]),
    );
    pep.publish_sequence(
        BOB,
        &omemo_xml::bundle_node(device_id),
        vec![
            omemo_xml::bundle_element(&bob.own_bundle().unwrap()),
            omemo_xml::bundle_element(&impostor.own_bundle().unwrap()),
        ],
    );

    let (listener, port) = common::listen().await;
    let server = tokio::spawn(common::serve(listener, pep));

    let mut svc = SendMsg::new(common::config(port, dir.path())).unwrap();
    svc.init().unwrap();
    let err = svc.send(BOB, "who are you").await.unwrap_err();
    let session = server.await.unwrap();

    let expected = format!("trusting device {device_id} of {BOB} did not take effect");
    assert!(matches!(err, XsError::Omemo(ref msg) if *msg == expected));
    assert!(session.encrypted().is_empty());
    assert_eq!(
        session.bodies(),
        vec![format!(
            "An error occured while attempting to encrypt.\nomemo error: {expected}"
        )]
    );
}

#[tokio::test]
async fn forbidden_device_list_gets_lookup_notice() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut pep = Pep::default();
    pep.forbid(BOB, ns::LEGACY_OMEMO_DEVICELIST);

    let (listener, port) = common::listen().await;
    let server = tokio::spawn(common::serve(listener, pep));

    let mut svc = SendMsg::new(common::config(port, dir.path())).unwrap();
    svc.init().unwrap();
    let err = svc.send(BOB, "can I see you?").await.unwrap_err();
    let session = server.await.unwrap();

    assert!(matches!(
        err,
        XsError::StanzaError { ref condition, .. } if condition == "forbidden"
    ));
    assert!(err.is_iq_failure());
    assert!(session.encrypted().is_empty());
    assert_eq!(
        session.bodies(),
        vec![
            "An error occured while fetching information on a recipient.\nstanza error: forbidden"
                .to_string()
        ]
    );
}

#[tokio::test]
async fn recipient_without_devices_gets_error_notice() {
    let dir = tempfile::TempDir::new().unwrap();
    let (listener, port) = common::listen().await;
    let server = tokio::spawn(common::serve(listener, Pep::default()));

    let mut svc = SendMsg::new(common::config(port, dir.path())).unwrap();
    svc.init().unwrap();
    let err = svc.send(BOB, "anyone?").await.unwrap_err();
    let session = server.await.unwrap();

    assert!(matches!(err, XsError::NoEligibleDevices(ref jid) if jid == BOB));
    assert_eq!(
        session.bodies(),
        vec![format!(
            "An error occured while attempting to encrypt.\nno eligible devices for {BOB}"
        )]
    );
    assert!(session.encrypted().is_empty());
}

#[tokio::test]
async fn refused_connection_fails_before_encrypting() {
    let dir = tempfile::TempDir::new().unwrap();
    let (listener, port) = common::listen().await;
    drop(listener);

    let mut svc = SendMsg::new(common::config(port, dir.path())).unwrap();
    svc.init().unwrap();
    let err = svc.send(BOB, "nobody home").await.unwrap_err();
    assert_eq!(err.exit_status(), ExitStatus::Connection);
}
