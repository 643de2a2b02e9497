//! XMPP client session.
//!
//! `XmppClient::connect` hands session establishment (SRV lookup, TCP,
//! STARTTLS, SASL, resource binding) to tokio-xmpp. Afterwards the client
//! sends stanzas and performs IQ round trips on a single task. Inbound
//! stanzas that arrive while an answer is awaited are handled in place:
//! pings and disco#info queries are answered, other requests are rejected
//! and messages/presences are dispatched as events.

use std::time::Duration;

use futures::StreamExt;
use jid::{BareJid, FullJid, Jid};
use minidom::Element;
use tokio::time::Instant;
use tokio_xmpp::starttls::ServerConfig;
use tokio_xmpp::tcp::TcpServerConnector;
use tokio_xmpp::{AuthError, ProtocolError, SimpleClient};
use tracing::{debug, info, warn};
use xmpp_parsers::disco::{DiscoInfoResult, Feature, Identity};
use xmpp_parsers::iq::{Iq, IqType};
use xmpp_parsers::ns;
use xmpp_parsers::stanza_error::{DefinedCondition, ErrorType};
use xs_core::constants;
use xs_core::{AppConfig, TlsMode, XsError, XsResult};

use crate::events::{ClientEvent, ClientEventType, ConnectionState, EventDispatcher};
use crate::stanza::{self, StanzaKind};

/// Where the TCP connection goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerAddress {
    /// Look up the `_xmpp-client._tcp` SRV records of the JID domain.
    Srv,
    Host { host: String, port: u16 },
}

impl std::fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Srv => write!(f, "SRV"),
            Self::Host { host, port } => write!(f, "{host}:{port}"),
        }
    }
}

/// Everything needed to open a session.
#[derive(Debug, Clone)]
pub struct ConnectionParams {
    pub jid: BareJid,
    pub password: String,
    pub resource: String,
    pub server: ServerAddress,
    pub tls: TlsMode,
    pub connect_timeout: Duration,
    pub iq_timeout: Duration,
}

impl ConnectionParams {
    /// Derive connection parameters from the application config.
    pub fn from_config(config: &AppConfig) -> XsResult<Self> {
        let jid = Jid::new(config.account.jid.trim())
            .map_err(|e| XsError::InvalidJid(format!("{}: {e}", config.account.jid)))?;
        if jid.node().is_none() {
            return Err(XsError::InvalidJid(config.account.jid.clone()));
        }
        let resource = jid
            .resource()
            .map(|r| r.to_string())
            .unwrap_or_else(|| config.effective_resource());
        let server = if config.use_srv() {
            ServerAddress::Srv
        } else {
            let host = if config.connection.host.is_empty() {
                jid.domain().to_string()
            } else {
                config.connection.host.clone()
            };
            ServerAddress::Host {
                host,
                port: config.effective_port(),
            }
        };

        Ok(Self {
            jid: jid.to_bare(),
            password: config.account.password.clone(),
            resource,
            server,
            tls: config.connection.tls,
            connect_timeout: Duration::from_millis(config.connection.connect_timeout_ms),
            iq_timeout: Duration::from_millis(config.connection.iq_timeout_ms),
        })
    }

    /// Account JID with the resource to bind.
    pub fn full_jid(&self) -> XsResult<FullJid> {
        self.jid
            .with_resource_str(&self.resource)
            .map_err(|e| XsError::InvalidJid(format!("resource '{}': {e}", self.resource)))
    }
}

/// The tokio-xmpp client, over TLS or plain TCP.
enum Session {
    StartTls(SimpleClient<ServerConfig>),
    Plain(SimpleClient<TcpServerConnector>),
}

impl Session {
    async fn open(params: &ConnectionParams) -> XsResult<Self> {
        let jid = Jid::from(params.full_jid()?);
        let password = params.password.clone();
        let session = match (params.tls, &params.server) {
            (TlsMode::Starttls, ServerAddress::Srv) => Self::StartTls(
                SimpleClient::new_with_jid_connector(ServerConfig::UseSrv, jid, password)
                    .await
                    .map_err(login_error)?,
            ),
            (TlsMode::Starttls, ServerAddress::Host { host, port }) => {
                let server = ServerConfig::Manual {
                    host: host.clone(),
                    port: *port,
                };
                Self::StartTls(
                    SimpleClient::new_with_jid_connector(server, jid, password)
                        .await
                        .map_err(login_error)?,
                )
            }
            (TlsMode::None, address) => {
                let address = match address {
                    ServerAddress::Srv => {
                        format!("{}:{}", params.jid.domain(), constants::DEFAULT_CLIENT_PORT)
                    }
                    ServerAddress::Host { host, port } => format!("{host}:{port}"),
                };
                warn!("connection to {address} is not encrypted");
                Self::Plain(
                    SimpleClient::new_with_jid_connector(
                        TcpServerConnector::new(address),
                        jid,
                        password,
                    )
                    .await
                    .map_err(login_error)?,
                )
            }
        };
        Ok(session)
    }

    fn bound_jid(&self) -> &Jid {
        match self {
            Self::StartTls(client) => client.bound_jid(),
            Self::Plain(client) => client.bound_jid(),
        }
    }

    async fn send(&mut self, stanza: Element) -> Result<(), tokio_xmpp::Error> {
        match self {
            Self::StartTls(client) => client.send_stanza(stanza).await,
            Self::Plain(client) => client.send_stanza(stanza).await,
        }
    }

    /// Next inbound stanza; `None` once the stream is closed or broken.
    async fn next(&mut self) -> Option<Element> {
        let next = match self {
            Self::StartTls(client) => client.next().await,
            Self::Plain(client) => client.next().await,
        };
        match next {
            Some(Ok(element)) => Some(element),
            Some(Err(e)) => {
                debug!("stream error: {e}");
                None
            }
            None => None,
        }
    }

    async fn end(self) -> Result<(), tokio_xmpp::Error> {
        match self {
            Self::StartTls(client) => client.end().await,
            Self::Plain(client) => client.end().await,
        }
    }
}

/// Map a session establishment failure onto the error categories.
fn login_error(err: tokio_xmpp::Error) -> XsError {
    match err {
        tokio_xmpp::Error::Auth(AuthError::Fail(condition)) => {
            XsError::AuthFailed(Element::from(condition).name().to_string())
        }
        tokio_xmpp::Error::Auth(e) => XsError::AuthFailed(e.to_string()),
        tokio_xmpp::Error::Protocol(ProtocolError::InvalidBindResponse) => {
            XsError::Bind("invalid response to resource binding".into())
        }
        tokio_xmpp::Error::Protocol(ProtocolError::NoTls) => {
            XsError::Tls("server does not offer STARTTLS".into())
        }
        other => stream_error(other),
    }
}

/// Map a failure on an established stream.
fn stream_error(err: tokio_xmpp::Error) -> XsError {
    match err {
        tokio_xmpp::Error::Io(e) => XsError::Connection(e.to_string()),
        tokio_xmpp::Error::Connection(e) => XsError::Connection(e.to_string()),
        tokio_xmpp::Error::Disconnected => XsError::Disconnected,
        tokio_xmpp::Error::JidParse(e) => XsError::InvalidJid(e.to_string()),
        tokio_xmpp::Error::Protocol(e) => XsError::Xml(e.to_string()),
        other => XsError::Stream(other.to_string()),
    }
}

/// An authenticated, bound XMPP session.
pub struct XmppClient {
    session: Option<Session>,
    jid: Jid,
    iq_timeout: Duration,
    dispatcher: EventDispatcher,
    state: ConnectionState,
    features: Vec<String>,
}

impl XmppClient {
    /// Connect with a private event dispatcher.
    pub async fn connect(params: &ConnectionParams) -> XsResult<Self> {
        Self::connect_with_dispatcher(params, EventDispatcher::default()).await
    }

    /// Connect, reporting events to `dispatcher`.
    pub async fn connect_with_dispatcher(
        params: &ConnectionParams,
        dispatcher: EventDispatcher,
    ) -> XsResult<Self> {
        if params.jid.node().is_none() {
            return Err(XsError::InvalidJid(format!("{} has no local part", params.jid)));
        }
        info!("connecting to {} via {} as {}", params.jid.domain(), params.server, params.jid);
        let session = match tokio::time::timeout(params.connect_timeout, Session::open(params)).await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(XsError::Timeout(format!(
                    "session with {} not established within {}ms",
                    params.jid.domain(),
                    params.connect_timeout.as_millis()
                )))
            }
        };

        let jid = session.bound_jid().clone();
        info!("session started as {jid}");
        dispatcher.dispatch(ClientEvent::session_start(jid.clone()));
        Ok(Self {
            session: Some(session),
            jid,
            iq_timeout: params.iq_timeout,
            dispatcher,
            state: ConnectionState::Connected,
            features: vec![
                ns::DISCO_INFO.to_string(),
                ns::PING.to_string(),
                ns::EME.to_string(),
                constants::ns::HINTS.to_string(),
            ],
        })
    }

    /// The bound full JID.
    pub fn jid(&self) -> &Jid {
        &self.jid
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    pub fn iq_timeout(&self) -> Duration {
        self.iq_timeout
    }

    /// Advertise an additional disco#info feature.
    pub fn add_feature(&mut self, feature: &str) {
        if !self.features.iter().any(|f| f == feature) {
            self.features.push(feature.to_string());
        }
    }

    pub fn features(&self) -> &[String] {
        &self.features
    }

    /// Send a stanza without waiting for anything.
    pub async fn send(&mut self, stanza: impl Into<Element>) -> XsResult<()> {
        let stanza = stanza.into();
        let session = match self.session.as_mut() {
            Some(session) if self.state == ConnectionState::Connected => session,
            _ => return Err(XsError::Disconnected),
        };
        debug!(
            "sending <{}> to {}",
            stanza.name(),
            stanza.attr("to").unwrap_or("server")
        );
        let sent = session.send(stanza).await;
        sent.map_err(|e| self.fail(stream_error(e)))
    }

    /// Send an IQ request and wait for the matching result payload.
    ///
    /// An `error` reply becomes `XsError::StanzaError`; no reply within the
    /// IQ timeout becomes `XsError::Timeout`.
    pub async fn iq(&mut self, request: Iq) -> XsResult<Option<Element>> {
        let id = request.id.clone();
        self.send(request).await?;

        let deadline = Instant::now() + self.iq_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let Some(element) = self.next_element(remaining).await? else {
                return Err(XsError::Timeout(format!(
                    "no response to iq {id} within {}ms",
                    self.iq_timeout.as_millis()
                )));
            };

            if StanzaKind::of(&element) == StanzaKind::Iq
                && element.attr("id") == Some(id.as_str())
                && matches!(element.attr("type"), Some("result") | Some("error"))
            {
                return match Iq::try_from(element) {
                    Ok(Iq {
                        payload: IqType::Result(payload),
                        ..
                    }) => Ok(payload),
                    Ok(Iq {
                        payload: IqType::Error(error),
                        ..
                    }) => Err(stanza::to_error(&error)),
                    Ok(_) => Err(XsError::Xml(format!("iq {id} answered with a request"))),
                    Err(e) => Err(XsError::StanzaError {
                        condition: "undefined-condition".into(),
                        text: Some(format!("malformed reply: {e}")),
                    }),
                };
            }
            self.handle_inbound(element).await?;
        }
    }

    /// Next inbound stanza, or `None` if nothing arrives within `wait`.
    async fn next_element(&mut self, wait: Duration) -> XsResult<Option<Element>> {
        let Some(session) = self.session.as_mut() else {
            return Err(XsError::Disconnected);
        };
        match tokio::time::timeout(wait, session.next()).await {
            Ok(Some(element)) => Ok(Some(element)),
            Ok(None) => Err(self.fail(XsError::Disconnected)),
            Err(_) => Ok(None),
        }
    }

    async fn handle_inbound(&mut self, element: Element) -> XsResult<()> {
        match StanzaKind::of(&element) {
            StanzaKind::Iq => self.handle_iq(element).await,
            StanzaKind::Message => {
                self.dispatcher
                    .dispatch(ClientEvent::from_stanza(ClientEventType::Message, element));
                Ok(())
            }
            StanzaKind::Presence => {
                self.dispatcher
                    .dispatch(ClientEvent::from_stanza(ClientEventType::Presence, element));
                Ok(())
            }
            StanzaKind::Other => {
                debug!("ignoring top-level <{}>", element.name());
                Ok(())
            }
        }
    }

    async fn handle_iq(&mut self, element: Element) -> XsResult<()> {
        let iq = match Iq::try_from(element) {
            Ok(iq) => iq,
            Err(e) => {
                debug!("ignoring malformed iq: {e}");
                return Ok(());
            }
        };

        let reply = match &iq.payload {
            IqType::Get(payload) if payload.is("ping", ns::PING) => {
                debug!("answering ping from {}", sender(&iq));
                stanza::iq_result(&iq, None)
            }
            IqType::Get(payload) if payload.is("query", ns::DISCO_INFO) => {
                let info = self.disco_info(payload.attr("node"));
                stanza::iq_result(&iq, Some(info.into()))
            }
            IqType::Get(_) | IqType::Set(_) => {
                stanza::iq_error(&iq, ErrorType::Cancel, DefinedCondition::ServiceUnavailable)
            }
            IqType::Result(_) | IqType::Error(_) => {
                debug!("ignoring unsolicited iq {}", iq.id);
                return Ok(());
            }
        };
        self.send(reply).await
    }

    fn disco_info(&self, node: Option<&str>) -> DiscoInfoResult {
        DiscoInfoResult {
            node: node.map(str::to_string),
            identities: vec![Identity {
                category: "client".into(),
                type_: "console".into(),
                lang: None,
                name: Some(constants::DISCO_IDENTITY_NAME.into()),
            }],
            features: self.features.iter().map(|f| Feature::new(f.as_str())).collect(),
            extensions: Vec::new(),
        }
    }

    fn fail(&mut self, err: XsError) -> XsError {
        if matches!(
            err,
            XsError::Disconnected | XsError::Stream(_) | XsError::Xml(_) | XsError::Connection(_)
        ) && self.state == ConnectionState::Connected
        {
            warn!("connection lost: {err}");
            self.state = ConnectionState::Failed;
            self.dispatcher.dispatch(ClientEvent::disconnected());
        }
        err
    }

    /// Close the stream. Calling this more than once is harmless.
    pub async fn disconnect(&mut self) -> XsResult<()> {
        if self.state != ConnectionState::Connected {
            return Ok(());
        }
        self.state = ConnectionState::Disconnected;
        let Some(session) = self.session.take() else {
            return Ok(());
        };
        info!("disconnecting");
        let result = match tokio::time::timeout(self.iq_timeout, session.end()).await {
            Ok(result) => result.map_err(stream_error),
            Err(_) => {
                debug!("server did not close the stream in time");
                Ok(())
            }
        };
        self.dispatcher.dispatch(ClientEvent::disconnected());
        if let Err(e) = &result {
            debug!("error while closing stream: {e}");
        }
        result
    }
}

fn sender(iq: &Iq) -> String {
    iq.from
        .as_ref()
        .map(|f| f.to_string())
        .unwrap_or_else(|| "server".into())
}
