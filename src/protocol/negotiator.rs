//! Ordered stream negotiation (RFC 6120 section 4.3).
//!
//! [`negotiate`] drives one handshake from a freshly dialed byte stream to
//! a bound resource. Every step sends at most one request, waits for its
//! reply, and runs under the per-step deadline from the context.

use std::future::Future;
use std::time::Duration;

use base64::Engine;

use super::features::FeatureSet;
use super::form::FormHandler;
use super::register::{create_account, RegistrationStatus};
use super::sasl::MechanismProvider;
use super::stanza::{Iq, IqType};
use super::{NS_BIND, NS_CLIENT, NS_SASL, NS_SESSION, NS_STREAM, NS_TLS};
use crate::codec::{escape, Element, Frame};
use crate::error::{Result, Stage, XmppError};
use crate::jid::Jid;
use crate::transport::{bind, BoxedStream, RustlsUpgrader, TlsUpgrader, TrafficLog, XmlStream};

/// Default deadline for a single handshake step.
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(30);

/// Everything one handshake needs, borrowed from the dial configuration.
pub struct NegotiationContext<'a> {
    /// Identity being authenticated
    pub jid: &'a Jid,
    /// SASL secret
    pub secret: &'a str,
    /// Server address was chosen explicitly
    pub trusted: bool,
    /// Fail when the server does not offer STARTTLS
    pub require_tls: bool,
    /// Upgrader; the platform roots are loaded on first use when `None`
    pub tls: Option<&'a dyn TlsUpgrader>,
    /// SASL mechanism selection
    pub mechanisms: &'a dyn MechanismProvider,
    /// Registration form handler; registration is attempted only when set
    pub form_handler: Option<&'a dyn FormHandler>,
    /// Raw traffic sinks, re-attached after STARTTLS
    pub traffic: &'a TrafficLog,
    /// Deadline applied to each step
    pub step_timeout: Duration,
}

/// What the handshake did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandshakeReport {
    /// Steps executed, in order
    pub stages: Vec<Stage>,
    /// In-band registration outcome
    pub registration: RegistrationStatus,
    /// STARTTLS completed
    pub encrypted: bool,
    /// Server address was chosen explicitly
    pub trusted: bool,
}

/// A bound stream ready to become a session.
pub struct Negotiated {
    /// Transport, positioned after the last handshake reply
    pub stream: XmlStream,
    /// Full JID assigned by the server, verbatim
    pub jid: String,
    /// Features captured at stream open, before authentication
    pub features: FeatureSet,
    /// Handshake summary
    pub report: HandshakeReport,
}

/// Run the full handshake over `stream`.
pub async fn negotiate(stream: BoxedStream, ctx: &NegotiationContext<'_>) -> Result<Negotiated> {
    let domain = ctx.jid.domain();
    let mut report = HandshakeReport {
        trusted: ctx.trusted,
        ..HandshakeReport::default()
    };
    let mut xml = bind(stream, ctx.traffic);

    // RFC 6120, section 4.2
    report.stages.push(Stage::StreamOpen);
    let mut features = step(
        ctx,
        Stage::StreamOpen,
        open_stream(&mut xml, domain, Stage::StreamOpen),
    )
    .await?;
    tracing::debug!("Stream features: {:?}", features);

    // STARTTLS MUST be the first feature negotiated
    if let Some(starttls) = features.starttls {
        report.stages.push(Stage::Encrypt);
        tracing::debug!("Negotiating STARTTLS (required: {})", starttls.required);
        let (upgraded, reopened) = step(ctx, Stage::Encrypt, async move {
            let mut xml = starttls_upgrade(xml, ctx).await?;
            let features = open_stream(&mut xml, domain, Stage::Encrypt).await?;
            Ok::<_, XmppError>((xml, features))
        })
        .await?;
        xml = upgraded;
        features = reopened;
        report.encrypted = true;
        tracing::debug!("Stream features after STARTTLS: {:?}", features);
    } else if ctx.require_tls {
        return Err(XmppError::Protocol {
            stage: Stage::Encrypt,
            reason: "server does not offer STARTTLS".to_string(),
        });
    }

    match ctx.form_handler {
        Some(handler) if features.in_band_registration => {
            report.stages.push(Stage::Register);
            // Deadlines apply per round trip; the form handler may block on a user
            report.registration = create_account(
                &mut xml,
                Some(handler),
                ctx.jid.local(),
                ctx.secret,
                ctx.step_timeout,
            )
            .await?;
        },
        Some(_) => {
            tracing::debug!("Server does not advertise in-band registration");
            report.registration = RegistrationStatus::NotAdvertised;
        },
        None => {},
    }

    // RFC 6120, section 6
    report.stages.push(Stage::Authenticate);
    step(ctx, Stage::Authenticate, authenticate(&mut xml, ctx, &features)).await?;
    xml = xml.restart();
    let post_auth = step(
        ctx,
        Stage::Authenticate,
        open_stream(&mut xml, domain, Stage::Authenticate),
    )
    .await?;
    tracing::debug!("Stream features after authentication: {:?}", post_auth);

    // RFC 6120, section 7. Binding is mandatory whatever the server advertises.
    report.stages.push(Stage::BindResource);
    let jid = step(ctx, Stage::BindResource, bind_resource(&mut xml)).await?;
    tracing::debug!("Bound resource {}", jid);

    // RFC 3921, section 3
    if features.requires_session() {
        report.stages.push(Stage::EstablishSession);
        step(ctx, Stage::EstablishSession, establish_session(&mut xml, domain)).await?;
    }

    Ok(Negotiated {
        stream: xml,
        jid,
        features,
        report,
    })
}

async fn step<T>(
    ctx: &NegotiationContext<'_>,
    stage: Stage,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(ctx.step_timeout, fut).await {
        Ok(result) => result.map_err(|e| e.at(stage)),
        Err(_) => {
            tracing::debug!("Handshake step {} timed out", stage);
            Err(XmppError::Timeout { stage })
        },
    }
}

fn stream_header(domain: &str) -> String {
    format!(
        "<?xml version='1.0'?><stream:stream to='{}' xmlns='{NS_CLIENT}' xmlns:stream='{NS_STREAM}' version='1.0'>",
        escape(domain)
    )
}

/// Fail on `<stream:error>`.
fn check_stream_error(el: &Element) -> Result<()> {
    if !el.is("error", NS_STREAM) {
        return Ok(());
    }
    let condition = el
        .children()
        .find(|c| c.name() != "text")
        .map_or("undefined-condition", Element::name);
    match el.children().find(|c| c.name() == "text").map(Element::text) {
        Some(text) if !text.is_empty() => {
            Err(XmppError::StreamError(format!("{condition}: {text}")))
        },
        _ => Err(XmppError::StreamError(condition.to_string())),
    }
}

/// Read the next element as an IQ, surfacing stream errors.
pub(super) async fn read_iq(xml: &mut XmlStream) -> Result<Iq> {
    let el = xml.next_element().await?;
    check_stream_error(&el)?;
    Iq::from_element(&el)
}

async fn open_stream(xml: &mut XmlStream, domain: &str, stage: Stage) -> Result<FeatureSet> {
    xml.send(&stream_header(domain)).await?;

    match xml.next_frame().await? {
        Frame::StreamOpen(header) if header.is("stream", NS_STREAM) => {
            tracing::debug!("Stream opened (id: {:?})", header.attr("id"));
        },
        Frame::StreamOpen(header) => {
            return Err(XmppError::Protocol {
                stage,
                reason: format!("unexpected stream header <{}>", header.name()),
            });
        },
        Frame::Element(el) => {
            check_stream_error(&el)?;
            return Err(XmppError::Protocol {
                stage,
                reason: format!("expected stream header, got <{}>", el.name()),
            });
        },
        Frame::StreamClose => return Err(XmppError::SessionClosed),
    }

    let el = xml.next_element().await?;
    check_stream_error(&el)?;
    FeatureSet::from_element(&el)
}

async fn starttls_upgrade(mut xml: XmlStream, ctx: &NegotiationContext<'_>) -> Result<XmlStream> {
    xml.send_element(&Element::ns("starttls", NS_TLS)).await?;

    let reply = xml.next_element().await?;
    check_stream_error(&reply)?;
    if reply.is("failure", NS_TLS) {
        return Err(XmppError::Tls("server refused STARTTLS".to_string()));
    }
    if !reply.is("proceed", NS_TLS) {
        return Err(XmppError::Protocol {
            stage: Stage::Encrypt,
            reason: format!("expected <proceed/>, got <{}>", reply.name()),
        });
    }

    let raw = xml.unbind()?;
    let domain = ctx.jid.domain();
    let encrypted = match ctx.tls {
        Some(tls) => tls.upgrade(raw, domain, ctx.trusted).await?,
        None => {
            RustlsUpgrader::with_native_roots()?
                .upgrade(raw, domain, ctx.trusted)
                .await?
        },
    };
    Ok(bind(encrypted, ctx.traffic))
}

fn encode_payload(data: &[u8]) -> String {
    if data.is_empty() {
        // RFC 6120, section 6.4.2: empty initial response
        "=".to_string()
    } else {
        base64::engine::general_purpose::STANDARD.encode(data)
    }
}

fn decode_payload(text: &str) -> Result<Vec<u8>> {
    let text = text.trim();
    if text.is_empty() || text == "=" {
        return Ok(Vec::new());
    }
    Ok(base64::engine::general_purpose::STANDARD.decode(text)?)
}

async fn authenticate(
    xml: &mut XmlStream,
    ctx: &NegotiationContext<'_>,
    features: &FeatureSet,
) -> Result<()> {
    let mut mechanism = ctx.mechanisms.select(&features.mechanisms).ok_or_else(|| {
        XmppError::AuthenticationFailed(format!(
            "no supported mechanism among {:?}",
            features.mechanisms
        ))
    })?;
    tracing::debug!("Authenticating with {}", mechanism.name());

    let initial = mechanism.initial_response(ctx.jid.local(), ctx.secret)?;
    let auth = Element::ns("auth", NS_SASL)
        .with_attr("mechanism", mechanism.name())
        .with_text(encode_payload(&initial));
    xml.send_element(&auth).await?;

    loop {
        let el = xml.next_element().await?;
        check_stream_error(&el)?;
        match (el.name(), el.namespace()) {
            ("challenge", Some(NS_SASL)) => {
                let response = mechanism.respond(&decode_payload(&el.text())?)?;
                let reply = Element::ns("response", NS_SASL).with_text(encode_payload(&response));
                xml.send_element(&reply).await?;
            },
            ("success", Some(NS_SASL)) => {
                mechanism.verify_success(&decode_payload(&el.text())?)?;
                return Ok(());
            },
            ("failure", Some(NS_SASL)) => {
                let condition = el
                    .children()
                    .find(|c| c.name() != "text")
                    .map_or("not-authorized", Element::name);
                return Err(XmppError::AuthenticationFailed(condition.to_string()));
            },
            (name, _) => {
                return Err(XmppError::Protocol {
                    stage: Stage::Authenticate,
                    reason: format!("unexpected <{name}> during SASL exchange"),
                });
            },
        }
    }
}

async fn bind_resource(xml: &mut XmlStream) -> Result<String> {
    let request = Iq::new(IqType::Set, "bind_1").with_payload(Element::ns("bind", NS_BIND));
    xml.send(&request.to_xml()).await?;

    let reply = read_iq(xml).await?;
    if reply.kind != IqType::Result {
        return Err(XmppError::Protocol {
            stage: Stage::BindResource,
            reason: match reply.error {
                Some(error) => format!("bind rejected: {error}"),
                None => format!("bind reply of type {}", reply.kind),
            },
        });
    }

    reply
        .payload
        .as_ref()
        .filter(|p| p.is("bind", NS_BIND))
        .and_then(|b| b.child("jid", NS_BIND))
        .map(Element::text)
        .filter(|jid| !jid.is_empty())
        .ok_or_else(|| XmppError::Decode {
            stage: Stage::BindResource,
            reason: "bind reply carries no jid".to_string(),
        })
}

async fn establish_session(xml: &mut XmlStream, domain: &str) -> Result<()> {
    let request = Iq::new(IqType::Set, "sess_1")
        .with_to(domain)
        .with_payload(Element::ns("session", NS_SESSION));
    xml.send(&request.to_xml()).await?;

    let reply = read_iq(xml).await?;
    if reply.kind != IqType::Result {
        return Err(XmppError::SessionEstablishmentFailed);
    }
    Ok(())
}
