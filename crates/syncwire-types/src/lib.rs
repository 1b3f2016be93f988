//! # syncwire-types: Core types for `syncwire`
//!
//! This crate contains the value types shared across the `syncwire` crates:
//! - Naming ([`TypeName`], [`ServiceName`])
//! - Record addressing ([`RecordId`], [`RecordIdentity`])
//! - Push notifications ([`EventKind`])
//! - Remote methods ([`Method`])
//! - Call parameters ([`Params`])

use std::{
    fmt::{Debug, Display},
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Query parameters passed to a remote method (a JSON object).
pub type Params = serde_json::Map<String, Value>;

// ============================================================================
// Names
// ============================================================================

/// Name of a local record type in the identity-mapped cache (e.g. `post`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeName(String);

impl TypeName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for TypeName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TypeName {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for TypeName {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for TypeName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Name of a remote service exposed by the server (e.g. `posts`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceName(String);

impl ServiceName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ServiceName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ServiceName {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ServiceName {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for ServiceName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// Record addressing
// ============================================================================

/// Primary-key value of a record, rendered as a string.
///
/// Servers hand out both string ids (`"5a1f..."`) and numeric ids (`42`);
/// both are addressed by their textual form so that `"42"` and `42` name the
/// same cached record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Extracts an id from a JSON value.
    ///
    /// A non-empty string is taken verbatim and a number is rendered with its
    /// JSON text. Everything else (null, empty string, bool, object, array)
    /// carries no id.
    ///
    /// # Examples
    ///
    /// ```
    /// # use syncwire_types::RecordId;
    /// # use serde_json::json;
    /// assert_eq!(RecordId::from_value(&json!("1")), Some(RecordId::new("1")));
    /// assert_eq!(RecordId::from_value(&json!(7)), Some(RecordId::new("7")));
    /// assert_eq!(RecordId::from_value(&json!(null)), None);
    /// assert_eq!(RecordId::from_value(&json!("")), None);
    /// ```
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) if !s.is_empty() => Some(Self(s.clone())),
            Value::Number(n) => Some(Self(n.to_string())),
            _ => None,
        }
    }

    /// Extracts the id stored under `field` in a JSON object payload.
    pub fn from_payload(payload: &Value, field: &str) -> Option<Self> {
        payload.get(field).and_then(Self::from_value)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for RecordId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<u64> for RecordId {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

/// A (type name, primary key) pair uniquely addressing one cached record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordIdentity {
    pub type_name: TypeName,
    pub id: RecordId,
}

impl RecordIdentity {
    pub fn new(type_name: impl Into<TypeName>, id: impl Into<RecordId>) -> Self {
        Self {
            type_name: type_name.into(),
            id: id.into(),
        }
    }

    /// Key string used by the echo guard tables: `"<type>:<id>"`.
    ///
    /// # Examples
    ///
    /// ```
    /// # use syncwire_types::RecordIdentity;
    /// assert_eq!(RecordIdentity::new("post", "1").key(), "post:1");
    /// ```
    pub fn key(&self) -> String {
        format!("{}:{}", self.type_name, self.id)
    }
}

impl Display for RecordIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.type_name, self.id)
    }
}

// ============================================================================
// Event kinds and methods
// ============================================================================

/// Kind of change notification pushed by a remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Created,
    Updated,
    Patched,
    Removed,
}

impl EventKind {
    /// Every event kind, in listener attach order.
    pub const ALL: [EventKind; 4] = [
        EventKind::Created,
        EventKind::Updated,
        EventKind::Patched,
        EventKind::Removed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Created => "created",
            EventKind::Updated => "updated",
            EventKind::Patched => "patched",
            EventKind::Removed => "removed",
        }
    }
}

impl Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event name that is not one of the four known kinds.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown event kind: {0}")]
pub struct UnknownEventKind(pub String);

impl FromStr for EventKind {
    type Err = UnknownEventKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(EventKind::Created),
            "updated" => Ok(EventKind::Updated),
            "patched" => Ok(EventKind::Patched),
            "removed" => Ok(EventKind::Removed),
            other => Err(UnknownEventKind(other.to_string())),
        }
    }
}

/// A remote service method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Find,
    Get,
    Create,
    Update,
    Patch,
    Remove,
}

impl Method {
    pub const ALL: [Method; 6] = [
        Method::Find,
        Method::Get,
        Method::Create,
        Method::Update,
        Method::Patch,
        Method::Remove,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Method::Find => "find",
            Method::Get => "get",
            Method::Create => "create",
            Method::Update => "update",
            Method::Patch => "patch",
            Method::Remove => "remove",
        }
    }

    /// Returns true for methods that change server state.
    pub fn is_write(self) -> bool {
        !matches!(self, Method::Find | Method::Get)
    }

    /// The push event a successful call of this method is expected to echo.
    ///
    /// `patch` has none: patch responses commonly precede partial push events,
    /// so patched events are always merged.
    pub fn echo_kind(self) -> Option<EventKind> {
        match self {
            Method::Create => Some(EventKind::Created),
            Method::Update => Some(EventKind::Updated),
            Method::Remove => Some(EventKind::Removed),
            Method::Find | Method::Get | Method::Patch => None,
        }
    }
}

impl Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A method name that is not one of the six remote methods.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown method: {0}")]
pub struct UnknownMethod(pub String);

impl FromStr for Method {
    type Err = UnknownMethod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Method::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| UnknownMethod(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;
    use test_case::test_case;

    #[test_case(json!("abc"), Some("abc") ; "string id")]
    #[test_case(json!(42), Some("42") ; "integer id")]
    #[test_case(json!(0), Some("0") ; "zero is a valid id")]
    #[test_case(json!(""), None ; "empty string")]
    #[test_case(json!(null), None ; "null")]
    #[test_case(json!(true), None ; "bool")]
    #[test_case(json!({"id": 1}), None ; "object")]
    fn record_id_extraction(value: Value, expected: Option<&str>) {
        assert_eq!(RecordId::from_value(&value), expected.map(RecordId::from));
    }

    #[test]
    fn record_id_from_payload_uses_field() {
        let payload = json!({"_id": "9", "id": "other"});
        assert_eq!(RecordId::from_payload(&payload, "_id"), Some(RecordId::from("9")));
        assert_eq!(RecordId::from_payload(&payload, "missing"), None);
        assert_eq!(RecordId::from_payload(&json!([1, 2]), "_id"), None);
    }

    #[test]
    fn echo_kinds_follow_method_names() {
        assert_eq!(Method::Create.echo_kind(), Some(EventKind::Created));
        assert_eq!(Method::Update.echo_kind(), Some(EventKind::Updated));
        assert_eq!(Method::Remove.echo_kind(), Some(EventKind::Removed));
        assert_eq!(Method::Patch.echo_kind(), None);
        assert_eq!(Method::Find.echo_kind(), None);
        assert_eq!(Method::Get.echo_kind(), None);
    }

    #[test]
    fn unknown_event_kind_is_rejected() {
        assert_eq!(
            "deleted".parse::<EventKind>(),
            Err(UnknownEventKind("deleted".to_string()))
        );
    }

    #[test]
    fn method_serde_is_lowercase() {
        let json = serde_json::to_string(&Method::Remove).unwrap();
        assert_eq!(json, "\"remove\"");
        let parsed: Method = serde_json::from_str("\"patch\"").unwrap();
        assert_eq!(parsed, Method::Patch);
    }

    proptest! {
        /// Every known kind parses back from its own name.
        #[test]
        fn event_kind_names_parse(idx in 0usize..4) {
            let kind = EventKind::ALL[idx];
            prop_assert_eq!(kind.as_str().parse::<EventKind>(), Ok(kind));
        }

        /// Identity keys never collide for distinct ids of the same type.
        #[test]
        fn identity_keys_distinguish_ids(a in "[a-z0-9]{1,12}", b in "[a-z0-9]{1,12}") {
            prop_assume!(a != b);
            let left = RecordIdentity::new("post", a.as_str());
            let right = RecordIdentity::new("post", b.as_str());
            prop_assert_ne!(left.key(), right.key());
        }
    }
}
