//! Personal eventing (XEP-0060/XEP-0163): item retrieval and publishing.

use jid::Jid;
use minidom::Element;
use tracing::{debug, warn};
use xmpp_parsers::data_forms::{DataForm, DataFormType, Field};
use xmpp_parsers::iq::Iq;
use xmpp_parsers::ns;
use xmpp_parsers::pubsub::pubsub::{Item, Items, Publish, PublishOptions};
use xmpp_parsers::pubsub::{ItemId, NodeName, PubSub};
use xs_core::{XsError, XsResult};

use crate::client::XmppClient;
use crate::stanza;

/// One item of a node.
pub use xmpp_parsers::pubsub::Item as PubSubItem;

const PUBLISH_OPTIONS_FORM: &str = "http://jabber.org/protocol/pubsub#publish-options";

/// `pubsub#access_model=open`, so contacts without a subscription can read.
pub fn open_access() -> PublishOptions {
    PublishOptions {
        form: Some(DataForm::new(
            DataFormType::Submit,
            PUBLISH_OPTIONS_FORM,
            vec![Field::text_single("pubsub#access_model", "open")],
        )),
    }
}

/// `<iq type='get'>` for the items of `node` at `to` (or the own account).
pub fn items_request(to: Option<Jid>, node: &str, max_items: Option<u32>) -> Iq {
    let mut items = Items::new(node);
    items.max_items = max_items;
    stanza::iq_get(to, PubSub::Items(items))
}

/// `<iq type='set'>` publishing `payload` as item `item_id` on the own account's `node`.
pub fn publish_request(
    node: &str,
    item_id: Option<&str>,
    payload: Element,
    options: Option<PublishOptions>,
) -> Iq {
    let item = PubSubItem {
        id: item_id.map(|id| ItemId(id.to_string())),
        publisher: None,
        payload: Some(payload),
    };
    stanza::iq_set(PubSub::Publish {
        publish: Publish {
            node: NodeName(node.to_string()),
            items: vec![Item(item)],
        },
        publish_options: options,
    })
}

/// Items from the payload of a result IQ, in document order.
pub fn parse_items(payload: Option<Element>) -> XsResult<Vec<PubSubItem>> {
    let Some(payload) = payload else {
        return Ok(Vec::new());
    };
    match PubSub::try_from(payload) {
        Ok(PubSub::Items(items)) => Ok(items.items.into_iter().map(|i| i.0).collect()),
        Ok(_) => Err(XsError::Xml("pubsub result without items".into())),
        Err(e) => Err(XsError::Xml(format!("pubsub items: {e}"))),
    }
}

/// Items carried by a PEP `<event/>` notification for `node`, if this message is one.
pub fn event_items(message: &Element, node: &str) -> Option<Vec<PubSubItem>> {
    let items = message
        .get_child("event", ns::PUBSUB_EVENT)?
        .get_child("items", ns::PUBSUB_EVENT)?;
    if items.attr("node") != Some(node) {
        return None;
    }
    Some(
        items
            .children()
            .filter(|c| c.is("item", ns::PUBSUB_EVENT))
            .map(|item| PubSubItem {
                id: item.attr("id").map(|id| ItemId(id.to_string())),
                publisher: None,
                payload: item.children().next().cloned(),
            })
            .collect(),
    )
}

impl XmppClient {
    /// Retrieve the items of `node` from `jid`.
    pub async fn pubsub_items(
        &mut self,
        jid: Option<Jid>,
        node: &str,
        max_items: Option<u32>,
    ) -> XsResult<Vec<PubSubItem>> {
        let reply = self.iq(items_request(jid, node, max_items)).await?;
        parse_items(reply)
    }

    /// Publish an item on the own account's `node`.
    ///
    /// When the server rejects the publish options the item is published
    /// again without them.
    pub async fn pubsub_publish(
        &mut self,
        node: &str,
        item_id: Option<&str>,
        payload: Element,
        options: Option<PublishOptions>,
    ) -> XsResult<()> {
        let Some(options) = options else {
            self.iq(publish_request(node, item_id, payload, None)).await?;
            return Ok(());
        };

        match self
            .iq(publish_request(node, item_id, payload.clone(), Some(options)))
            .await
        {
            Ok(_) => Ok(()),
            Err(XsError::StanzaError { condition, text }) => {
                warn!(
                    "publish options rejected for {node} ({condition}{}), publishing without them",
                    text.map(|t| format!(": {t}")).unwrap_or_default()
                );
                self.iq(publish_request(node, item_id, payload, None)).await?;
                debug!("published {node} without options");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
