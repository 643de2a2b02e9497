//! In-process XMPP server used by the integration tests.
//!
//! The server speaks plain TCP, offers PLAIN authentication and resource
//! binding, and is otherwise driven step by step from the test body.

#![allow(dead_code)]

use std::collections::HashMap;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use tokio_xmpp::{Packet, XmppCodec};
use xs_core::TlsMode;
use xs_xmpp::{ns, BareJid, ConnectionParams, Element, ServerAddress};

pub const DOMAIN: &str = "example.com";
pub const STEP: Duration = Duration::from_secs(5);

pub async fn listen() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

pub fn params(port: u16) -> ConnectionParams {
    ConnectionParams {
        jid: BareJid::new("alice@example.com").unwrap(),
        password: "secret".into(),
        resource: "test".into(),
        server: ServerAddress::Host {
            host: "127.0.0.1".into(),
            port,
        },
        tls: TlsMode::None,
        connect_timeout: STEP,
        iq_timeout: STEP,
    }
}

fn header(id: &str) -> Packet {
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
    Packet::StreamStart(attrs)
}

fn sasl_features() -> Element {
    Element::builder("features", ns::STREAM)
        .append(
            Element::builder("mechanisms", ns::SASL).append(
                Element::builder("mechanism", ns::SASL)
                    .append("PLAIN")
                    .build(),
            ),
        )
        .build()
}

fn bind_features() -> Element {
    Element::builder("features", ns::STREAM)
        .append(Element::bare("bind", ns::BIND))
        .build()
}

/// Server side of one client connection.
pub struct ServerConn {
    framed: Framed<TcpStream, XmppCodec>,
}

impl ServerConn {
    fn new(tcp: TcpStream) -> Self {
        Self {
            framed: Framed::new(tcp, XmppCodec::new()),
        }
    }

    async fn packet(&mut self) -> Option<Packet> {
        match tokio::time::timeout(STEP, self.framed.next()).await {
            Ok(Some(Ok(packet))) => Some(packet),
            Ok(_) => None,
            Err(_) => panic!("client sent nothing within {STEP:?}"),
        }
    }

    async fn send_packet(&mut self, packet: Packet) {
        self.framed.send(packet).await.unwrap();
    }

    /// Read the client's stream header and answer with ours and `features`.
    async fn open_stream(&mut self, id: &str, features: Element) {
        match self.packet().await {
            Some(Packet::StreamStart(attrs)) => {
                assert_eq!(attrs.get("to").map(String::as_str), Some(DOMAIN));
            }
            other => panic!("expected stream header, got {other:?}"),
        }
        self.send_packet(header(id)).await;
        self.send_packet(Packet::Stanza(features)).await;
    }

    /// Next stanza, or `None` once the client closed its stream.
    ///
    /// A closing client gets the server's closing tag in return.
    pub async fn next(&mut self) -> Option<Element> {
        loop {
            match self.packet().await? {
                Packet::Stanza(stanza) => return Some(stanza),
                Packet::StreamEnd => {
                    let _ = self.framed.send(Packet::StreamEnd).await;
                    return None;
                }
                Packet::Text(_) | Packet::StreamStart(_) => continue,
            }
        }
    }

    /// Next stanza, which must arrive.
    pub async fn recv(&mut self) -> Element {
        self.next().await.expect("stream closed")
    }

    pub async fn send(&mut self, stanza: impl Into<Element>) {
        self.send_packet(Packet::Stanza(stanza.into())).await;
    }

    /// Answer an IQ request with a result carrying `payload`.
    pub async fn reply(&mut self, request: &Element, payload: Option<Element>) {
        let mut reply = Element::builder("iq", ns::JABBER_CLIENT)
            .attr("type", "result")
            .attr("id", request.attr("id").unwrap())
            .build();
        if let Some(payload) = payload {
            reply.append_child(payload);
        }
        self.send(reply).await;
    }

    /// Answer an IQ request with an error carrying `condition`.
    pub async fn reply_error(&mut self, request: &Element, condition: &str) {
        let reply = Element::builder("iq", ns::JABBER_CLIENT)
            .attr("type", "error")
            .attr("id", request.attr("id").unwrap())
            .append(
                Element::builder("error", ns::JABBER_CLIENT)
                    .attr("type", "cancel")
                    .append(Element::bare(condition, ns::XMPP_STANZAS))
                    .build(),
            )
            .build();
        self.send(reply).await;
    }
}

/// Accept one client and run authentication and binding.
pub async fn accept(listener: &TcpListener) -> ServerConn {
    let (tcp, _) = listener.accept().await.unwrap();
    let mut conn = ServerConn::new(tcp);
    conn.open_stream("s1", sasl_features()).await;

    let auth = conn.recv().await;
    assert!(auth.is("auth", ns::SASL));
    assert_eq!(auth.attr("mechanism"), Some("PLAIN"));
    let credentials = BASE64.decode(auth.text()).unwrap();
    assert_eq!(credentials, b"\0alice\0secret");
    conn.send(Element::bare("success", ns::SASL)).await;

    // The client drops its read buffer after <success/> and restarts the stream.
    let mut conn = ServerConn::new(conn.framed.into_inner());
    conn.open_stream("s2", bind_features()).await;

    let bind = conn.recv().await;
    let resource = bind
        .get_child("bind", ns::BIND)
        .and_then(|b| b.get_child("resource", ns::BIND))
        .map(Element::text)
        .unwrap();
    let jid = Element::builder("jid", ns::BIND)
        .append(format!("alice@{DOMAIN}/{resource}"))
        .build();
    conn.reply(
        &bind,
        Some(Element::builder("bind", ns::BIND).append(jid).build()),
    )
    .await;
    conn
}

/// Accept one client and reject its credentials.
pub async fn accept_and_refuse(listener: &TcpListener) {
    let (tcp, _) = listener.accept().await.unwrap();
    let mut conn = ServerConn::new(tcp);
    conn.open_stream("s1", sasl_features()).await;
    let _auth = conn.recv().await;
    conn.send(
        Element::builder("failure", ns::SASL)
            .append(Element::bare("not-authorized", ns::SASL))
            .build(),
    )
    .await;
}
