//! OMEMO key directory over PEP.
//!
//! Device lists live on `eu.siacs.conversations.axolotl.devicelist` (item
//! `current`), bundles on `eu.siacs.conversations.axolotl.bundles:<id>`.
//! A node that does not exist (`item-not-found`) counts as empty.

use async_trait::async_trait;
use tracing::{debug, info};
use xs_core::{XsError, XsResult};
use xs_omemo::{Bundle, KeyDirectory, OmemoManager};
use xs_xmpp::{ns, pubsub, Jid, PubSubItem, XmppClient};

use crate::omemo_xml;

fn is_missing_node(err: &XsError) -> bool {
    matches!(err, XsError::StanzaError { condition, .. } if condition == "item-not-found")
}

/// The `current` item if present, else the first item with a payload.
fn current_item(items: &[PubSubItem]) -> Option<&PubSubItem> {
    items
        .iter()
        .find(|i| i.id.as_ref().map(|id| id.0.as_str()) == Some("current") && i.payload.is_some())
        .or_else(|| items.iter().find(|i| i.payload.is_some()))
}

/// Device ids carried by device list items.
pub fn devices_from_items(items: &[PubSubItem]) -> Vec<u32> {
    current_item(items)
        .and_then(|item| item.payload.as_ref())
        .filter(|list| list.is("list", ns::LEGACY_OMEMO))
        .map(omemo_xml::parse_device_list)
        .unwrap_or_default()
}

fn parse_jid(jid: &str) -> XsResult<Jid> {
    Jid::new(jid).map_err(|e| XsError::InvalidJid(format!("{jid}: {e}")))
}

/// `KeyDirectory` backed by an XMPP session.
pub struct XmppDirectory<'a> {
    client: &'a mut XmppClient,
}

impl<'a> XmppDirectory<'a> {
    pub fn new(client: &'a mut XmppClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl KeyDirectory for XmppDirectory<'_> {
    async fn fetch_devices(&mut self, jid: &str) -> XsResult<Vec<u32>> {
        let to = parse_jid(jid)?;
        match self
            .client
            .pubsub_items(Some(to), ns::LEGACY_OMEMO_DEVICELIST, None)
            .await
        {
            Ok(items) => {
                let devices = devices_from_items(&items);
                debug!("{jid} announces devices {devices:?}");
                Ok(devices)
            }
            Err(e) if is_missing_node(&e) => {
                debug!("{jid} has no device list");
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    async fn fetch_bundle(&mut self, jid: &str, device_id: u32) -> XsResult<Option<Bundle>> {
        let node = omemo_xml::bundle_node(device_id);
        let to = parse_jid(jid)?;
        let items = match self.client.pubsub_items(Some(to), &node, Some(1)).await {
            Ok(items) => items,
            Err(e) if is_missing_node(&e) => return Ok(None),
            Err(e) => return Err(e),
        };
        match current_item(&items).and_then(|item| item.payload.as_ref()) {
            Some(bundle) => omemo_xml::parse_bundle(bundle).map(Some),
            None => Ok(None),
        }
    }
}

/// Publish this device's bundle and make sure the own device list names it.
///
/// Returns whether the device list had to be republished.
pub async fn announce_device(client: &mut XmppClient, manager: &OmemoManager) -> XsResult<bool> {
    let own_jid = manager.own_jid().to_string();
    let own_id = manager.own_device_id();

    publish_bundle(client, manager).await?;

    let mut devices = XmppDirectory::new(client).fetch_devices(&own_jid).await?;
    let listed = devices.contains(&own_id);
    if !listed {
        devices.push(own_id);
        publish_device_list(client, &devices).await?;
        info!("announced device {own_id} in the device list of {own_jid}");
    }
    manager.store().store_device_list(&own_jid, &devices)?;
    Ok(!listed)
}

/// Publish this device's bundle on its bundle node.
pub async fn publish_bundle(client: &mut XmppClient, manager: &OmemoManager) -> XsResult<()> {
    let bundle = omemo_xml::bundle_element(&manager.own_bundle()?);
    client
        .pubsub_publish(
            &omemo_xml::bundle_node(manager.own_device_id()),
            Some("current"),
            bundle,
            Some(pubsub::open_access()),
        )
        .await?;
    debug!("published bundle of device {}", manager.own_device_id());
    Ok(())
}

/// Replace the own device list.
pub async fn publish_device_list(client: &mut XmppClient, devices: &[u32]) -> XsResult<()> {
    client
        .pubsub_publish(
            ns::LEGACY_OMEMO_DEVICELIST,
            Some("current"),
            omemo_xml::device_list_element(devices),
            Some(pubsub::open_access()),
        )
        .await
}
