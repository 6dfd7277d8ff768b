//! Public entry points: configure a dial, connect, register.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::jid::Jid;
use crate::protocol::{
    negotiate, DefaultMechanisms, FormHandler, LivenessConfig, MechanismProvider,
    NegotiationContext, Session, DEFAULT_PORT, DEFAULT_STEP_TIMEOUT,
};
use crate::transport::{
    join_host_port, ProxyDialer, TcpDialer, TlsUpgrader, TrafficLog, DEFAULT_CONNECT_TIMEOUT,
};

/// Settings for one connection attempt.
#[derive(Clone)]
pub struct DialerConfig {
    /// Bare identity, `local@domain`
    pub jid: String,
    /// SASL secret
    pub password: String,
    /// Explicit `host:port`; marks the connection trusted
    pub server: Option<String>,
    /// Transport capability; direct TCP when `None`
    pub proxy: Option<Arc<dyn ProxyDialer>>,
    /// Raw traffic sinks
    pub traffic: TrafficLog,
    /// Registration form handler; set to create the account during the handshake
    pub form_handler: Option<Arc<dyn FormHandler>>,
    /// TLS upgrader; rustls with the platform roots when `None`
    pub tls: Option<Arc<dyn TlsUpgrader>>,
    /// SASL mechanism selection
    pub mechanisms: Arc<dyn MechanismProvider>,
    /// Keepalive and ping timing
    pub liveness: LivenessConfig,
    /// Deadline for each handshake step
    pub step_timeout: Duration,
    /// TCP connect deadline for the direct dialer
    pub connect_timeout: Duration,
    /// Refuse servers that do not offer STARTTLS
    pub require_tls: bool,
}

impl DialerConfig {
    /// Create a configuration with defaults for everything but the credentials.
    pub fn new(jid: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            jid: jid.into(),
            password: password.into(),
            server: None,
            proxy: None,
            traffic: TrafficLog::default(),
            form_handler: None,
            tls: None,
            mechanisms: Arc::new(DefaultMechanisms),
            liveness: LivenessConfig::default(),
            step_timeout: DEFAULT_STEP_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            require_tls: false,
        }
    }

    /// Connect to `host:port` instead of the identity's domain.
    pub fn with_server(mut self, server: impl Into<String>) -> Self {
        self.server = Some(server.into());
        self
    }

    /// Open transports through `proxy`.
    pub fn with_proxy(mut self, proxy: Arc<dyn ProxyDialer>) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Tee raw traffic into `traffic`.
    pub fn with_traffic_log(mut self, traffic: TrafficLog) -> Self {
        self.traffic = traffic;
        self
    }

    /// Attempt in-band registration with `handler`.
    pub fn with_form_handler(mut self, handler: Arc<dyn FormHandler>) -> Self {
        self.form_handler = Some(handler);
        self
    }

    /// Use a specific TLS upgrader.
    pub fn with_tls(mut self, tls: Arc<dyn TlsUpgrader>) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Use a specific mechanism provider.
    pub fn with_mechanisms(mut self, mechanisms: Arc<dyn MechanismProvider>) -> Self {
        self.mechanisms = mechanisms;
        self
    }

    /// Set liveness timing.
    pub fn with_liveness(mut self, liveness: LivenessConfig) -> Self {
        self.liveness = liveness;
        self
    }

    /// Set the per-step handshake deadline.
    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }

    /// Set the TCP connect deadline.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Refuse servers that do not offer STARTTLS.
    pub fn with_require_tls(mut self, require: bool) -> Self {
        self.require_tls = require;
        self
    }

    /// Whether an explicit server was configured.
    pub fn is_trusted(&self) -> bool {
        self.server.is_some()
    }
}

impl fmt::Debug for DialerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DialerConfig")
            .field("jid", &self.jid)
            .field("password", &"<redacted>")
            .field("server", &self.server)
            .field("proxy", &self.proxy.is_some())
            .field("traffic", &self.traffic)
            .field("form_handler", &self.form_handler.is_some())
            .field("tls", &self.tls.is_some())
            .field("liveness", &self.liveness)
            .field("step_timeout", &self.step_timeout)
            .field("require_tls", &self.require_tls)
            .finish_non_exhaustive()
    }
}

/// Address to dial: the explicit server, else `domain:5222`.
pub fn resolve_server(config: &DialerConfig) -> Result<String> {
    if let Some(server) = &config.server {
        return Ok(server.clone());
    }
    let jid = Jid::parse(&config.jid)?;
    Ok(join_host_port(jid.domain(), DEFAULT_PORT))
}

/// Connects sessions for one configuration.
#[derive(Debug, Clone)]
pub struct Dialer {
    config: DialerConfig,
}

impl Dialer {
    /// Create a dialer.
    pub fn new(config: DialerConfig) -> Self {
        Self { config }
    }

    /// The configuration in use.
    pub fn config(&self) -> &DialerConfig {
        &self.config
    }

    /// Address this dialer connects to.
    pub fn resolve_server(&self) -> Result<String> {
        resolve_server(&self.config)
    }

    /// Dial, negotiate and start a session.
    pub async fn connect(&self) -> Result<Session> {
        dial(&self.config).await
    }

    /// Like [`Dialer::connect`], creating the account on the way.
    pub async fn register_account(&self, handler: Arc<dyn FormHandler>) -> Result<Session> {
        let config = self.config.clone().with_form_handler(handler);
        dial(&config).await
    }
}

async fn dial(config: &DialerConfig) -> Result<Session> {
    let jid = Jid::parse(&config.jid)?;
    let address = resolve_server(config)?;
    tracing::info!("Connecting to {} as {}", address, jid);
    if config.traffic.is_enabled() {
        tracing::debug!("Raw traffic logging enabled");
    }

    let stream = match &config.proxy {
        Some(proxy) => proxy.dial("tcp", &address).await?,
        None => {
            TcpDialer::new(config.connect_timeout)
                .dial("tcp", &address)
                .await?
        },
    };

    let ctx = NegotiationContext {
        jid: &jid,
        secret: &config.password,
        trusted: config.is_trusted(),
        require_tls: config.require_tls,
        tls: config.tls.as_deref(),
        mechanisms: &*config.mechanisms,
        form_handler: config.form_handler.as_deref(),
        traffic: &config.traffic,
        step_timeout: config.step_timeout,
    };
    let negotiated = negotiate(stream, &ctx).await?;
    Ok(Session::start(negotiated, config.liveness))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::XmppError;
    use proptest::prelude::*;

    #[test]
    fn test_resolve_default_port() {
        let config = DialerConfig::new("alice@example.com", "secret");
        assert_eq!(resolve_server(&config).unwrap(), "example.com:5222");
        assert!(!config.is_trusted());
    }

    #[test]
    fn test_resolve_override() {
        let config = DialerConfig::new("not an identity", "secret").with_server("10.0.0.1:5223");
        assert_eq!(resolve_server(&config).unwrap(), "10.0.0.1:5223");
        assert!(config.is_trusted());
    }

    #[test]
    fn test_resolve_invalid_identity() {
        let config = DialerConfig::new("alice", "secret");
        assert!(matches!(
            resolve_server(&config),
            Err(XmppError::InvalidIdentity(_))
        ));
    }

    #[test]
    fn test_debug_redacts_password() {
        let config = DialerConfig::new("alice@example.com", "hunter2");
        let debug = format!("{config:?}");
        assert!(!debug.contains("hunter2"));
    }

    #[tokio::test]
    async fn test_connect_rejects_invalid_identity() {
        let dialer = Dialer::new(DialerConfig::new("alice@@example.com", "secret"));
        assert!(matches!(
            dialer.connect().await,
            Err(XmppError::InvalidIdentity(_))
        ));
    }

    proptest! {
        #[test]
        fn prop_resolve_uses_domain(local in "[a-z0-9._-]{1,16}", domain in "[a-z0-9.-]{1,32}") {
            let config = DialerConfig::new(format!("{local}@{domain}"), "secret");
            prop_assert_eq!(resolve_server(&config).unwrap(), format!("{domain}:5222"));
        }

        #[test]
        fn prop_override_unchanged(jid in ".*", server in ".+") {
            let config = DialerConfig::new(jid, "secret").with_server(server.clone());
            prop_assert_eq!(resolve_server(&config).unwrap(), server);
        }
    }
}
