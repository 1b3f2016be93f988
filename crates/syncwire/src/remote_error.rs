//! Classification of transport failures into a closed error taxonomy.
//!
//! Remote services reject calls with an error object tagged by a name
//! (`NotFound`, `BadRequest`, ...). [`classify`] maps that name onto an
//! [`ErrorKind`] and rewraps the failure with a structured detail list that a
//! UI layer can surface field by field. Unrecognized names are handed back
//! unchanged so nothing is masked.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A raw failure reported by the transport for one remote call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{message}")]
pub struct TransportError {
    /// Name tag used for classification (e.g. `NotFound`).
    pub name: Option<String>,
    pub message: String,
    /// HTTP-style status code, when the server sent one.
    pub code: Option<u16>,
    /// Field-level validation errors, `{ field: message }`.
    pub errors: Option<Value>,
    pub data: Option<Value>,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn named(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            message: message.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_code(mut self, code: u16) -> Self {
        self.code = Some(code);
        self
    }

    #[must_use]
    pub fn with_errors(mut self, errors: Value) -> Self {
        self.errors = Some(errors);
        self
    }
}

/// Kinds of remote failure surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Unauthorized,
    Forbidden,
    BadRequest,
    PaymentRequired,
    NotFound,
    MethodNotAllowed,
    NotAcceptable,
    Timeout,
    Conflict,
    LengthRequired,
    Unprocessable,
    RateLimited,
    ServerError,
    NotImplemented,
    BadGateway,
    Unavailable,
    /// Passthrough: the transport error carried no recognized name.
    Unknown,
}

impl ErrorKind {
    /// Maps a transport error name onto a kind. `None` for unrecognized names.
    pub fn from_name(name: &str) -> Option<Self> {
        let kind = match name {
            "NotAuthenticated" => ErrorKind::Unauthorized,
            "Forbidden" => ErrorKind::Forbidden,
            "BadRequest" => ErrorKind::BadRequest,
            "PaymentError" => ErrorKind::PaymentRequired,
            "NotFound" => ErrorKind::NotFound,
            "MethodNotAllowed" => ErrorKind::MethodNotAllowed,
            "NotAcceptable" => ErrorKind::NotAcceptable,
            "Timeout" => ErrorKind::Timeout,
            "Conflict" => ErrorKind::Conflict,
            "LengthRequired" => ErrorKind::LengthRequired,
            "Unprocessable" => ErrorKind::Unprocessable,
            "TooManyRequests" => ErrorKind::RateLimited,
            "GeneralError" => ErrorKind::ServerError,
            "NotImplemented" => ErrorKind::NotImplemented,
            "BadGateway" => ErrorKind::BadGateway,
            "Unavailable" => ErrorKind::Unavailable,
            _ => return None,
        };
        Some(kind)
    }

    /// Message used when the transport did not provide one.
    pub fn default_message(self) -> &'static str {
        match self {
            ErrorKind::Unauthorized => "The operation is unauthorized",
            ErrorKind::Forbidden => "The operation is forbidden",
            ErrorKind::BadRequest => "The request was rejected as invalid",
            ErrorKind::PaymentRequired => "The operation failed due to a payment error",
            ErrorKind::NotFound => "The resource could not be found",
            ErrorKind::MethodNotAllowed => "The method is not allowed",
            ErrorKind::NotAcceptable => "The server could not accept the data sent",
            ErrorKind::Timeout => "The operation timed out",
            ErrorKind::Conflict => "The operation failed due to a conflict",
            ErrorKind::LengthRequired => "The operation failed due to a missing request length",
            ErrorKind::Unprocessable => "The commit was rejected due to semantic errors",
            ErrorKind::RateLimited => "The operation failed because the rate limit was reached",
            ErrorKind::ServerError => "The operation failed due to a server error",
            ErrorKind::NotImplemented => "The operation is not implemented on the server",
            ErrorKind::BadGateway => {
                "The server was acting as a gateway and received an invalid upstream response"
            }
            ErrorKind::Unavailable => "The server is down for maintenance",
            ErrorKind::Unknown => "The remote call failed",
        }
    }

    /// Kinds that carry field-level validation detail.
    pub fn is_invalid(self) -> bool {
        matches!(self, ErrorKind::BadRequest | ErrorKind::Unprocessable)
    }
}

/// One entry of the structured error detail list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub title: String,
    pub detail: String,
    /// JSON pointer to the offending attribute, for validation errors.
    pub pointer: Option<String>,
}

/// A classified remote failure.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct RemoteError {
    pub kind: ErrorKind,
    pub message: String,
    pub details: Vec<ErrorDetail>,
    #[source]
    pub source: TransportError,
}

impl RemoteError {
    /// Details that point at a specific attribute.
    pub fn field_errors(&self) -> impl Iterator<Item = &ErrorDetail> {
        self.details.iter().filter(|d| d.pointer.is_some())
    }
}

/// Classifies a transport error by its name tag.
///
/// Returns the original error untouched when the name is missing or unknown.
pub fn classify(error: TransportError) -> Result<RemoteError, TransportError> {
    let Some(kind) = error.name.as_deref().and_then(ErrorKind::from_name) else {
        return Err(error);
    };

    let message = if error.message.is_empty() {
        kind.default_message().to_string()
    } else {
        error.message.clone()
    };
    let title = error.name.clone().unwrap_or_default();
    let details = build_details(kind, &title, &message, error.errors.as_ref());

    Ok(RemoteError {
        kind,
        message,
        details,
        source: error,
    })
}

fn build_details(
    kind: ErrorKind,
    title: &str,
    message: &str,
    errors: Option<&Value>,
) -> Vec<ErrorDetail> {
    if kind.is_invalid() {
        if let Some(Value::Object(fields)) = errors {
            if !fields.is_empty() {
                return fields
                    .iter()
                    .map(|(field, reason)| ErrorDetail {
                        title: title.to_string(),
                        detail: match reason {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        },
                        pointer: Some(format!("/data/attributes/{field}")),
                    })
                    .collect();
            }
        }
    }

    vec![ErrorDetail {
        title: title.to_string(),
        detail: message.to_string(),
        pointer: None,
    }]
}
