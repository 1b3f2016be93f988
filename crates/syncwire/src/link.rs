//! Resolution of relative relationship links into service calls.
//!
//! A server may describe a lazy relationship with a link instead of ids:
//! `/comments/9` names a single record, `/comments?postId=1` a filtered
//! collection. [`LinkResolver`] turns such a link into a bound
//! [`RelationshipCall`].

use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde_json::Value;
use syncwire_types::{Method, Params, RecordId, ServiceName, TypeName};
use tracing::debug;

use crate::error::Result;
use crate::query_string;
use crate::registry::{ServiceRegistration, ServiceRegistry, TypeHint};
use crate::transport::CallRequest;

static LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^/([^/?]+)(?:/([^/?]+)|\?(.*))?$").expect("link pattern is valid")
});

/// A `get` or `find` call bound to its service.
#[derive(Debug, Clone)]
pub struct RelationshipCall {
    pub service: ServiceName,
    pub type_name: Option<TypeName>,
    pub method: Method,
    pub request: CallRequest,
    registration: Arc<ServiceRegistration>,
}

impl RelationshipCall {
    /// Returns true for a single-record fetch.
    pub fn is_singular(&self) -> bool {
        self.method == Method::Get
    }

    /// Performs the call.
    pub async fn invoke(&self) -> Result<Value> {
        self.registration.call(self.request.clone()).await
    }
}

/// Resolves links against a registry, registering unseen services.
#[derive(Debug, Clone)]
pub struct LinkResolver {
    registry: Arc<ServiceRegistry>,
}

impl LinkResolver {
    /// Resolves against `registry`, which also receives lazy registrations.
    pub fn new(registry: Arc<ServiceRegistry>) -> Self {
        Self { registry }
    }

    /// Resolves `link`. Returns `Ok(None)` when the link does not have the
    /// `/<service>`, `/<service>/<id>` or `/<service>?<query>` shape.
    ///
    /// `known_type` binds the service to that type when it is not bound yet.
    pub fn resolve(&self, link: &str, known_type: Option<&TypeName>) -> Result<Option<RelationshipCall>> {
        let Some(captures) = LINK.captures(link) else {
            return Ok(None);
        };
        let service = ServiceName::new(decode(&captures[1]));

        let request = match (captures.get(2), captures.get(3)) {
            (Some(id), _) => CallRequest::Get {
                id: RecordId::new(decode(id.as_str())),
                params: Params::new(),
            },
            (None, Some(query)) => CallRequest::Find {
                params: query_string::parse(query.as_str()),
            },
            (None, None) => CallRequest::Find {
                params: Params::new(),
            },
        };

        let registration = match known_type {
            Some(type_name) => self
                .registry
                .register(service.clone(), TypeHint::Named(type_name.clone()))?,
            None => self.registry.get_or_create(service.clone())?,
        };
        let method = request.method();
        debug!(link, service = %service, method = %method, "resolved relationship link");

        Ok(Some(RelationshipCall {
            service,
            type_name: registration.type_name(),
            method,
            request,
            registration,
        }))
    }
}

fn decode(segment: &str) -> String {
    String::from_utf8_lossy(&urlencoding::decode_binary(segment.as_bytes())).into_owned()
}
