//! The send workflow: log in, encrypt one message for a recipient, send it
//! and log out.
//!
//! Encryption is retried while the failures are ones the workflow can settle
//! itself: undecided devices are trusted (under the blind trust policy) and
//! devices without usable keys are skipped after telling the recipient in
//! plain text. Anything else ends the attempt.

use std::path::PathBuf;

use serde::Serialize;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{debug, info, warn};
use xs_core::constants;
use xs_core::{AppConfig, EncryptionProblem, TrustPolicy, XsError, XsResult};
use xs_omemo::{ExpectedProblems, OmemoManager, SqliteStore};
use xs_store::Database;
use xs_xmpp::{
    stanza, BareJid, ClientEvent, ConnectionParams, EventDispatcher, Jid, RosterExt, XmppClient,
};

use crate::directory::{self, XmppDirectory};
use crate::inbound::{self, Inbound};
use crate::omemo_xml;
use crate::service::{Service, ServiceState};

/// How the send loop reacts to trust decisions and key problems.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendPolicy {
    pub trust: TrustPolicy,
    /// Tell the recipient in plain text about devices that were skipped.
    pub notify_recipient: bool,
    /// Body for clients that cannot decrypt.
    pub fallback_body: String,
}

impl SendPolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            trust: config.omemo.trust,
            notify_recipient: config.omemo.notify_recipient_on_error,
            fallback_body: config.omemo.fallback_body.clone(),
        }
    }
}

/// A device identified by bare JID and device id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceRef {
    pub jid: String,
    pub device_id: u32,
}

impl DeviceRef {
    fn new(jid: &str, device_id: u32) -> Self {
        Self {
            jid: jid.to_string(),
            device_id,
        }
    }
}

/// Outcome of a successful send.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SendReport {
    pub recipient: String,
    pub message_id: String,
    /// Devices the message key was encrypted for.
    pub devices: Vec<u32>,
    /// Devices trusted automatically on the way.
    pub trusted: Vec<DeviceRef>,
    /// Devices skipped because their keys were missing or invalid.
    pub skipped: Vec<DeviceRef>,
    /// Plain-text notices sent to the recipient.
    pub notices: usize,
    pub attempts: usize,
}

/// Service that sends one OMEMO message per call to `send`.
pub struct SendMsg {
    state: ServiceState,
    config: AppConfig,
    account: BareJid,
    manager: Option<OmemoManager>,
}

/// Parse an account address, dropping any resource.
fn account_jid(jid: &str) -> XsResult<BareJid> {
    let jid = Jid::new(jid.trim()).map_err(|e| XsError::InvalidJid(format!("{jid}: {e}")))?;
    if jid.node().is_none() {
        return Err(XsError::InvalidJid(format!("{jid} is not an account")));
    }
    Ok(jid.to_bare())
}

impl SendMsg {
    /// Create the service. The key store is opened by `init`.
    pub fn new(config: AppConfig) -> XsResult<Self> {
        let account = account_jid(&config.account.jid)?;
        Ok(Self {
            state: ServiceState::Created,
            config,
            account,
            manager: None,
        })
    }

    /// Create a running service around an already loaded manager.
    pub fn with_manager(config: AppConfig, manager: OmemoManager) -> XsResult<Self> {
        let mut service = Self::new(config)?;
        service.manager = Some(manager);
        service.state = ServiceState::Running;
        Ok(service)
    }

    /// Bare JID of the sending account.
    pub fn account(&self) -> &BareJid {
        &self.account
    }

    /// Key store file of the sending account.
    pub fn database_path(&self) -> PathBuf {
        Database::path_for_account(&self.config.effective_data_dir(), self.account.as_str())
    }

    pub fn manager(&self) -> XsResult<&OmemoManager> {
        self.manager
            .as_ref()
            .ok_or_else(|| XsError::ServiceNotInitialized("send".into()))
    }

    /// Own device id and identity fingerprint.
    pub fn fingerprint(&self) -> XsResult<(u32, String)> {
        let manager = self.manager()?;
        Ok((manager.own_device_id(), manager.own_fingerprint()))
    }

    /// Connect, send `body` to `recipient` and disconnect.
    ///
    /// The connection is closed exactly once, whatever the outcome.
    pub async fn send(&self, recipient: &str, body: &str) -> XsResult<SendReport> {
        let manager = self.manager()?;
        let recipient = account_jid(recipient)?;
        let params = ConnectionParams::from_config(&self.config)?;
        let policy = SendPolicy::from_config(&self.config);

        let dispatcher = EventDispatcher::new(64);
        let mut events = dispatcher.subscribe();
        let mut client = XmppClient::connect_with_dispatcher(&params, dispatcher).await?;

        let result = session(&mut client, manager, &policy, &recipient, body, &mut events).await;

        if let Err(e) = client.disconnect().await {
            debug!("disconnect: {e}");
        }
        result
    }
}

impl Service for SendMsg {
    fn name(&self) -> &str {
        "send"
    }

    fn state(&self) -> ServiceState {
        self.state
    }

    /// Open the account's key store, creating the data directory and this
    /// device's keys on first use.
    fn init(&mut self) -> XsResult<()> {
        if self.manager.is_some() {
            self.state = ServiceState::Running;
            return Ok(());
        }
        self.state = ServiceState::Initializing;
        let path = self.database_path();
        let opened = Database::open(&path).and_then(|db| {
            OmemoManager::load_or_create(
                Box::new(SqliteStore::new(db)),
                self.account.as_str(),
                self.config.omemo.prekey_count,
            )
        });
        match opened {
            Ok(manager) => {
                info!(
                    "OMEMO device {} loaded from {}",
                    manager.own_device_id(),
                    path.display()
                );
                self.manager = Some(manager);
                self.state = ServiceState::Running;
                Ok(())
            }
            Err(e) => {
                self.state = ServiceState::Failed;
                Err(e)
            }
        }
    }

    fn shutdown(&mut self) -> XsResult<()> {
        self.state = ServiceState::ShuttingDown;
        self.manager = None;
        self.state = ServiceState::Stopped;
        Ok(())
    }
}

/// Everything between session start and disconnect.
async fn session(
    client: &mut XmppClient,
    manager: &OmemoManager,
    policy: &SendPolicy,
    recipient: &BareJid,
    body: &str,
    events: &mut broadcast::Receiver<ClientEvent>,
) -> XsResult<SendReport> {
    client.add_feature(constants::ns::OMEMO_DEVICELIST_NOTIFY);
    client.send(stanza::presence()).await?;

    match client.fetch_roster().await {
        Ok(roster) if !roster.is_mutual(recipient) => {
            warn!("no mutual presence subscription with {recipient}, the message may not arrive")
        }
        Ok(_) => {}
        Err(e) if client.is_connected() => warn!("could not fetch roster: {e}"),
        Err(e) => return Err(e),
    }

    directory::announce_device(client, manager).await?;

    let report = encrypted_send(client, manager, policy, recipient, body).await;
    drain_events(client, manager, events).await;
    report
}

/// Encrypt and send, settling trust decisions and key problems on the way.
pub async fn encrypted_send(
    client: &mut XmppClient,
    manager: &OmemoManager,
    policy: &SendPolicy,
    recipient: &BareJid,
    body: &str,
) -> XsResult<SendReport> {
    let recipients = vec![recipient.to_string()];
    let mut expect_problems = ExpectedProblems::new();
    let mut report = SendReport {
        recipient: recipient.to_string(),
        ..SendReport::default()
    };

    // A round that neither trusts nor skips a new device returns.
    loop {
        report.attempts += 1;
        let result = {
            let mut keys = XmppDirectory::new(client);
            manager
                .encrypt_message(body.as_bytes(), &recipients, &expect_problems, &mut keys)
                .await
        };

        match result {
            Ok(encrypted) => {
                let mut message = stanza::chat_message(recipient);
                omemo_xml::attach_encrypted(&mut message, &encrypted, &policy.fallback_body);
                report.message_id = message.id.clone().unwrap_or_default();
                client.send(message).await?;

                report.devices = encrypted.keys.iter().map(|k| k.rid).collect();
                info!(
                    "sent encrypted message to {recipient} ({} devices)",
                    report.devices.len()
                );
                return Ok(report);
            }
            Err(XsError::UndecidedDevice {
                jid,
                device_id,
                identity_key,
            }) => {
                let device = DeviceRef::new(&jid, device_id);
                if policy.trust == TrustPolicy::Manual {
                    warn!("device {device_id} of {jid} has no trust decision");
                    return Err(XsError::UndecidedDevice {
                        jid,
                        device_id,
                        identity_key,
                    });
                }
                if report.trusted.contains(&device) {
                    return Err(XsError::Omemo(format!(
                        "trusting device {device_id} of {jid} did not take effect"
                    )));
                }
                manager.trust(&jid, device_id, &identity_key)?;
                report.trusted.push(device);
            }
            Err(XsError::EncryptionPrepare(problems)) => {
                for problem in &problems {
                    let notice = match problem {
                        EncryptionProblem::MissingBundle { jid, device_id } => format!(
                            "Could not find keys for device \"{device_id}\" of recipient \"{jid}\". Skipping."
                        ),
                        EncryptionProblem::InvalidBundle { jid, device_id, .. } => format!(
                            "Keys for device \"{device_id}\" of recipient \"{jid}\" are invalid. Skipping."
                        ),
                    };
                    warn!("{problem}");
                    notify(client, policy, recipient, &notice, &mut report).await;
                }
                let skipped = expect(&mut expect_problems, &problems);
                if skipped.is_empty() {
                    return Err(XsError::EncryptionPrepare(problems));
                }
                report.skipped.extend(skipped);
            }
            Err(e) if e.is_iq_failure() => {
                let notice =
                    format!("An error occured while fetching information on a recipient.\n{e}");
                notify(client, policy, recipient, &notice, &mut report).await;
                return Err(e);
            }
            Err(
                e @ (XsError::Disconnected
                | XsError::Connection(_)
                | XsError::Stream(_)
                | XsError::Xml(_)),
            ) => {
                return Err(e);
            }
            Err(e) => {
                let notice = format!("An error occured while attempting to encrypt.\n{e}");
                notify(client, policy, recipient, &notice, &mut report).await;
                return Err(e);
            }
        }
    }
}

/// Mark the devices behind `problems` as expected to fail.
///
/// Returns the devices that were not expected before. An empty result means
/// the round brought nothing new.
fn expect(expect_problems: &mut ExpectedProblems, problems: &[EncryptionProblem]) -> Vec<DeviceRef> {
    problems
        .iter()
        .filter(|problem| {
            expect_problems
                .entry(problem.jid().to_string())
                .or_default()
                .insert(problem.device_id())
        })
        .map(|problem| DeviceRef::new(problem.jid(), problem.device_id()))
        .collect()
}

/// Send a plain-text notice to the recipient, if notices are enabled.
async fn notify(
    client: &mut XmppClient,
    policy: &SendPolicy,
    recipient: &BareJid,
    text: &str,
    report: &mut SendReport,
) {
    if !policy.notify_recipient {
        debug!("not notifying {recipient}: {text}");
        return;
    }
    match client.send(stanza::plain_message(recipient, text)).await {
        Ok(()) => report.notices += 1,
        Err(e) => warn!("could not notify {recipient}: {e}"),
    }
}

/// Handle the events dispatched while the session was busy.
async fn drain_events(
    client: &mut XmppClient,
    manager: &OmemoManager,
    events: &mut broadcast::Receiver<ClientEvent>,
) {
    let mut republish_bundle = false;
    let mut relist = false;
    loop {
        let event = match events.try_recv() {
            Ok(event) => event,
            Err(TryRecvError::Lagged(missed)) => {
                warn!("missed {missed} inbound events");
                continue;
            }
            Err(_) => break,
        };
        match inbound::handle_event(manager, &event) {
            Ok(Inbound::Encrypted { bundle_changed, .. }) => republish_bundle |= bundle_changed,
            Ok(Inbound::DeviceList { jid, devices }) => {
                if jid == manager.own_jid() && !devices.contains(&manager.own_device_id()) {
                    relist = true;
                }
            }
            Ok(_) => {}
            Err(e) => warn!("could not handle inbound message: {e}"),
        }
    }

    if !client.is_connected() {
        return;
    }
    if republish_bundle {
        if let Err(e) = directory::publish_bundle(client, manager).await {
            warn!("could not republish bundle: {e}");
        }
    }
    if relist {
        if let Err(e) = directory::announce_device(client, manager).await {
            warn!("could not announce device again: {e}");
        }
    }
}
