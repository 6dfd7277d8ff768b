//! In-band registration (XEP-0077).

use std::future::Future;
use std::time::Duration;

use tokio::runtime::{Handle, RuntimeFlavor};

use super::form::{BobData, Form, FormHandler};
use super::negotiator::read_iq;
use super::stanza::{Iq, IqType};
use super::{NS_BOB, NS_DATA_FORMS, NS_REGISTER};
use crate::codec::Element;
use crate::error::{Result, Stage, XmppError};
use crate::transport::XmlStream;

/// What happened to in-band registration during a handshake.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RegistrationStatus {
    /// No form handler was configured.
    #[default]
    NotRequested,
    /// A form handler was configured but the server does not offer
    /// in-band registration; the account was not created.
    NotAdvertised,
    /// The server accepted the registration.
    Created,
}

/// Registration query returned by the server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegisterQuery {
    /// Free-text instructions
    pub instructions: Option<String>,
    /// Legacy `<username/>` field present
    pub username: bool,
    /// Legacy `<password/>` field present
    pub password: bool,
    /// Account already registered
    pub registered: bool,
    /// Structured form, if the server uses data forms
    pub form: Option<Form>,
    /// Binary data referenced by the form
    pub data: Vec<BobData>,
}

impl RegisterQuery {
    /// Decode `<query xmlns='jabber:iq:register'/>`.
    pub fn from_element(el: &Element) -> Result<Self> {
        if !el.is("query", NS_REGISTER) {
            return Err(XmppError::Xml(format!(
                "expected registration query, got <{}>",
                el.name()
            )));
        }

        let form = match el.child("x", NS_DATA_FORMS) {
            Some(x) => Some(Form::from_element(x)?).filter(|f| !f.kind.is_empty()),
            None => None,
        };
        let data = el
            .children()
            .filter(|c| c.is("data", NS_BOB))
            .map(BobData::from_element)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            instructions: el.child("instructions", NS_REGISTER).map(Element::text),
            username: el.has_child("username", NS_REGISTER),
            password: el.has_child("password", NS_REGISTER),
            registered: el.has_child("registered", NS_REGISTER),
            form,
            data,
        })
    }
}

/// Map a registration error code to its outcome.
pub fn registration_error(code: Option<&str>) -> XmppError {
    match code {
        // <conflict xmlns='urn:ietf:params:xml:ns:xmpp-stanzas'/>
        Some("409") => XmppError::UsernameConflict,
        // <not-acceptable xmlns='urn:ietf:params:xml:ns:xmpp-stanzas'/>
        Some("406") => XmppError::MissingRequiredRegistrationInfo,
        _ => XmppError::RegistrationFailed,
    }
}

/// Payload of a "remove registration" request.
pub(crate) fn remove_query() -> Element {
    Element::ns("query", NS_REGISTER).with_child(Element::ns("remove", NS_REGISTER))
}

/// Create an account over the handshake stream.
///
/// Returns [`RegistrationStatus::NotRequested`] without any I/O when no
/// form handler is given. Each request/reply round trip must finish within
/// `timeout`; time spent in the form handler is not counted.
pub async fn create_account(
    stream: &mut XmlStream,
    handler: Option<&dyn FormHandler>,
    principal: &str,
    secret: &str,
    timeout: Duration,
) -> Result<RegistrationStatus> {
    let Some(handler) = handler else {
        return Ok(RegistrationStatus::NotRequested);
    };
    let at = |e: XmppError| e.at(Stage::Register);

    tracing::info!("Attempting to create account");
    let request = Iq::new(IqType::Get, "create_1").with_payload(Element::ns("query", NS_REGISTER));
    let reply = round_trip(stream, &request, timeout).await.map_err(at)?;
    if reply.kind != IqType::Result {
        tracing::debug!("Registration query rejected: {:?}", reply.error);
        return Err(XmppError::RegistrationFailed);
    }
    let query = reply
        .payload
        .as_ref()
        .ok_or_else(|| XmppError::Decode {
            stage: Stage::Register,
            reason: "reply carries no registration query".to_string(),
        })
        .and_then(|q| RegisterQuery::from_element(q).map_err(at))?;

    let submission = if let Some(form) = &query.form {
        tracing::debug!(
            "Registration form with {} fields and {} data blobs",
            form.fields.len(),
            query.data.len()
        );
        let filled = fill_form(handler, form, &query.data)?;
        Element::ns("query", NS_REGISTER).with_child(filled.to_element())
    } else if query.username && query.password {
        tracing::debug!("Falling back to legacy username/password registration");
        Element::ns("query", NS_REGISTER)
            .with_child(Element::ns("username", NS_REGISTER).with_text(principal))
            .with_child(Element::ns("password", NS_REGISTER).with_text(secret))
    } else {
        tracing::warn!("Registration query offers neither a form nor legacy fields");
        return Err(XmppError::RegistrationFailed);
    };

    let request = Iq::new(IqType::Set, "create_2").with_payload(submission);
    let outcome = round_trip(stream, &request, timeout).await.map_err(at)?;
    if outcome.kind == IqType::Error {
        let code = outcome.error.as_ref().and_then(|e| e.code.as_deref());
        tracing::debug!("Registration failed with code {:?}", code);
        return Err(registration_error(code));
    }

    tracing::info!("Account created");
    Ok(RegistrationStatus::Created)
}

/// Send `request` and read the reply, both within `timeout`.
async fn round_trip(stream: &mut XmlStream, request: &Iq, timeout: Duration) -> Result<Iq> {
    within(timeout, async {
        stream.send(&request.to_xml()).await?;
        read_iq(stream).await
    })
    .await
}

async fn within<T>(timeout: Duration, fut: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| XmppError::Timeout {
            stage: Stage::Register,
        })?
}

/// Run the (possibly blocking) form handler off the async scheduler.
fn fill_form(handler: &dyn FormHandler, form: &Form, data: &[BobData]) -> Result<Form> {
    match Handle::try_current().map(|h| h.runtime_flavor()) {
        Ok(RuntimeFlavor::MultiThread) => {
            tokio::task::block_in_place(|| handler.fill(form, data))
        },
        // block_in_place panics on a current-thread runtime
        _ => handler.fill(form, data),
    }
}
