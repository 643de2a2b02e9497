//! In-process XMPP server with a PEP store, used by the send tests.
//!
//! The server authenticates `alice@example.com` with PLAIN, binds the
//! requested resource and then answers roster and pubsub requests until the
//! client closes the stream. Messages the client sends are collected.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use tokio_xmpp::{Packet, XmppCodec};
use xs_core::{AppConfig, TlsMode};
use xs_omemo::{MemoryStore, OmemoManager};
use xs_services::omemo_xml;
use xs_xmpp::{ns, stanza, Element, Jid};

pub const DOMAIN: &str = "example.com";
pub const ALICE: &str = "alice@example.com";
pub const BOB: &str = "bob@example.com";
pub const STEP: Duration = Duration::from_secs(5);

pub async fn listen() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

/// Sender configuration pointing at the local server.
pub fn config(port: u16, data_dir: &Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.account.jid = ALICE.into();
    config.account.password = "secret".into();
    config.account.resource = "test".into();
    config.connection.host = "127.0.0.1".into();
    config.connection.port = port;
    config.connection.tls = TlsMode::None;
    config.connection.connect_timeout_ms = 5_000;
    config.connection.iq_timeout_ms = 5_000;
    config.omemo.data_dir = data_dir.display().to_string();
    config.omemo.prekey_count = 5;
    config
}

/// An OMEMO device for `jid` with keys in memory.
pub fn device(jid: &str) -> OmemoManager {
    OmemoManager::load_or_create(Box::new(MemoryStore::new()), jid, 5).unwrap()
}

/// Published PEP items, keyed by owner and node.
///
/// A node can hold a queue of payloads: each read serves the head and moves
/// on, until the last payload stays for good.
#[derive(Default)]
pub struct Pep {
    nodes: HashMap<(String, String), Vec<Element>>,
    forbidden: HashSet<(String, String)>,
}

fn key(owner: &str, node: &str) -> (String, String) {
    (owner.to_string(), node.to_string())
}

impl Pep {
    pub fn publish(&mut self, owner: &str, node: &str, payload: Element) {
        self.nodes.insert(key(owner, node), vec![payload]);
    }

    /// Serve `payloads` one after the other on successive reads.
    pub fn publish_sequence(&mut self, owner: &str, node: &str, payloads: Vec<Element>) {
        self.nodes.insert(key(owner, node), payloads);
    }

    /// Answer reads of this node with `forbidden`.
    pub fn forbid(&mut self, owner: &str, node: &str) {
        self.forbidden.insert(key(owner, node));
    }

    pub fn get(&self, owner: &str, node: &str) -> Option<&Element> {
        self.nodes.get(&key(owner, node)).and_then(|q| q.first())
    }

    fn read(&mut self, owner: &str, node: &str) -> Option<Element> {
        let queue = self.nodes.get_mut(&key(owner, node))?;
        if queue.len() > 1 {
            Some(queue.remove(0))
        } else {
            queue.first().cloned()
        }
    }

    /// Publish the device list and bundle of `manager` under `jid`, plus
    /// any extra device ids that have no bundle.
    pub fn publish_device(&mut self, jid: &str, manager: &OmemoManager, extra: &[u32]) {
        let mut ids = vec![manager.own_device_id()];
        ids.extend_from_slice(extra);
        self.publish(
            jid,
            ns::LEGACY_OMEMO_DEVICELIST,
            omemo_xml::device_list_element(&ids),
        );
        self.publish_bundle(jid, manager.own_device_id(), manager);
    }

    /// Publish the bundle of `manager` as the bundle of `device_id`.
    pub fn publish_bundle(&mut self, jid: &str, device_id: u32, manager: &OmemoManager) {
        self.publish(
            jid,
            &omemo_xml::bundle_node(device_id),
            omemo_xml::bundle_element(&manager.own_bundle().unwrap()),
        );
    }
}

/// What the server saw during one session.
pub struct Session {
    pub messages: Vec<Element>,
    pub pep: Pep,
}

impl Session {
    pub fn bodies(&self) -> Vec<String> {
        self.messages
            .iter()
            .filter(|m| !m.has_child("encrypted", ns::LEGACY_OMEMO))
            .filter_map(stanza::body)
            .collect()
    }

    pub fn encrypted(&self) -> Vec<&Element> {
        self.messages
            .iter()
            .filter(|m| m.has_child("encrypted", ns::LEGACY_OMEMO))
            .collect()
    }
}

type Conn = Framed<TcpStream, XmppCodec>;

async fn next_packet(conn: &mut Conn) -> Option<Packet> {
    match tokio::time::timeout(STEP, conn.next()).await {
        Ok(Some(Ok(packet))) => Some(packet),
        Ok(_) => None,
        Err(_) => panic!("client sent nothing within {STEP:?}"),
    }
}

/// Next stanza; `None` once the client closed its stream.
async fn next_stanza(conn: &mut Conn) -> Option<Element> {
    loop {
        match next_packet(conn).await? {
            Packet::Stanza(stanza) => return Some(stanza),
            Packet::StreamEnd => {
                let _ = conn.send(Packet::StreamEnd).await;
                return None;
            }
            _ => continue,
        }
    }
}

async fn open_stream(conn: &mut Conn, id: &str, features: Element) {
    assert!(matches!(
        next_packet(conn).await,
        Some(Packet::StreamStart(_))
    ));
    let attrs: HashMap<String, String> = [
        ("xmlns", ns::JABBER_CLIENT),
        ("xmlns:stream", ns::STREAM),
        ("from", DOMAIN),
        ("id", id),
        ("version", "1.0"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    conn.send(Packet::StreamStart(attrs)).await.unwrap();
    conn.send(Packet::Stanza(features)).await.unwrap();
}

fn result(request: &Element) -> Element {
    Element::builder("iq", ns::JABBER_CLIENT)
        .attr("type", "result")
        .attr("id", request.attr("id").unwrap())
        .build()
}

fn error(request: &Element, condition: &str) -> Element {
    Element::builder("iq", ns::JABBER_CLIENT)
        .attr("type", "error")
        .attr("id", request.attr("id").unwrap())
        .append(
            Element::builder("error", ns::JABBER_CLIENT)
                .attr("type", "cancel")
                .append(Element::bare(condition, ns::XMPP_STANZAS))
                .build(),
        )
        .build()
}

async fn login(listener: &TcpListener) -> Conn {
    let (tcp, _) = listener.accept().await.unwrap();
    let mut conn = Framed::new(tcp, XmppCodec::new());

    let mechanism = Element::builder("mechanism", ns::SASL)
        .append("PLAIN")
        .build();
    let features = Element::builder("features", ns::STREAM)
        .append(Element::builder("mechanisms", ns::SASL).append(mechanism))
        .build();
    open_stream(&mut conn, "s1", features).await;

    let auth = next_stanza(&mut conn).await.unwrap();
    assert_eq!(BASE64.decode(auth.text()).unwrap(), b"\0alice\0secret");
    conn.send(Packet::Stanza(Element::bare("success", ns::SASL)))
        .await
        .unwrap();

    let mut conn = Framed::new(conn.into_inner(), XmppCodec::new());
    let features = Element::builder("features", ns::STREAM)
        .append(Element::bare("bind", ns::BIND))
        .build();
    open_stream(&mut conn, "s2", features).await;

    let bind = next_stanza(&mut conn).await.unwrap();
    let resource = bind
        .get_child("bind", ns::BIND)
        .and_then(|b| b.get_child("resource", ns::BIND))
        .map(Element::text)
        .unwrap();
    let jid = Element::builder("jid", ns::BIND)
        .append(format!("{ALICE}/{resource}"))
        .build();
    let mut reply = result(&bind);
    reply.append_child(Element::builder("bind", ns::BIND).append(jid).build());
    conn.send(Packet::Stanza(reply)).await.unwrap();
    conn
}

fn answer(iq: &Element, pep: &mut Pep) -> Element {
    if iq.has_child("query", ns::ROSTER) {
        let item = Element::builder("item", ns::ROSTER)
            .attr("jid", BOB)
            .attr("subscription", "both")
            .build();
        let mut reply = result(iq);
        reply.append_child(Element::builder("query", ns::ROSTER).append(item).build());
        return reply;
    }

    let Some(pubsub) = iq.get_child("pubsub", ns::PUBSUB) else {
        return error(iq, "service-unavailable");
    };

    if let Some(items) = pubsub.get_child("items", ns::PUBSUB) {
        let owner = iq
            .attr("to")
            .map(|to| Jid::new(to).unwrap().to_bare().to_string())
            .unwrap_or_else(|| ALICE.to_string());
        let node = items.attr("node").unwrap();
        if pep.forbidden.contains(&key(&owner, node)) {
            return error(iq, "forbidden");
        }
        return match pep.read(&owner, node) {
            Some(payload) => {
                let item = Element::builder("item", ns::PUBSUB)
                    .attr("id", "current")
                    .append(payload)
                    .build();
                let items = Element::builder("items", ns::PUBSUB)
                    .attr("node", node)
                    .append(item)
                    .build();
                let mut reply = result(iq);
                reply.append_child(Element::builder("pubsub", ns::PUBSUB).append(items).build());
                reply
            }
            None => error(iq, "item-not-found"),
        };
    }

    if let Some(publish) = pubsub.get_child("publish", ns::PUBSUB) {
        let node = publish.attr("node").unwrap();
        let payload = publish
            .get_child("item", ns::PUBSUB)
            .and_then(|item| item.children().next())
            .unwrap()
            .clone();
        pep.publish(ALICE, node, payload);
        return result(iq);
    }

    error(iq, "feature-not-implemented")
}

/// Serve one client until it closes the stream.
pub async fn serve(listener: TcpListener, mut pep: Pep) -> Session {
    let mut conn = login(&listener).await;
    let mut messages = Vec::new();
    while let Some(el) = next_stanza(&mut conn).await {
        match el.name() {
            "iq" => {
                let reply = answer(&el, &mut pep);
                conn.send(Packet::Stanza(reply)).await.unwrap();
            }
            "message" => messages.push(el),
            _ => {}
        }
    }
    Session { messages, pep }
}
