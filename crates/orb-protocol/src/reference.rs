//! Object references and the per-adapter template they are built from.

use serde::{Deserialize, Serialize};

use crate::ids::{AdapterId, ObjectId};
use crate::policy::Lifespan;

/// A network endpoint advertised in outgoing references.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Everything an adapter contributes to the references it hands out.
///
/// Mutable only through `&mut`, which the adapter holds exclusively while
/// its creation callback runs. After that the template is shared behind an
/// `Arc` and read without locking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceTemplate {
    server_id: u32,
    orb_id: String,
    adapter_id: AdapterId,
    adapter_name: Vec<String>,
    lifespan: Lifespan,
    #[serde(skip_serializing_if = "Option::is_none")]
    incarnation: Option<u32>,
    endpoints: Vec<Endpoint>,
}

impl ReferenceTemplate {
    pub fn new(
        server_id: u32,
        orb_id: impl Into<String>,
        adapter_id: AdapterId,
        adapter_name: Vec<String>,
        lifespan: Lifespan,
    ) -> Self {
        Self {
            server_id,
            orb_id: orb_id.into(),
            adapter_id,
            adapter_name,
            lifespan,
            incarnation: None,
            endpoints: Vec::new(),
        }
    }

    pub fn with_incarnation(mut self, incarnation: u32) -> Self {
        self.incarnation = Some(incarnation);
        self
    }

    pub fn add_endpoint(&mut self, endpoint: Endpoint) {
        if !self.endpoints.contains(&endpoint) {
            self.endpoints.push(endpoint);
        }
    }

    pub fn set_endpoints(&mut self, endpoints: Vec<Endpoint>) {
        self.endpoints = endpoints;
    }

    pub fn server_id(&self) -> u32 {
        self.server_id
    }

    pub fn orb_id(&self) -> &str {
        &self.orb_id
    }

    pub fn adapter_id(&self) -> AdapterId {
        self.adapter_id
    }

    pub fn adapter_name(&self) -> &[String] {
        &self.adapter_name
    }

    pub fn lifespan(&self) -> Lifespan {
        self.lifespan
    }

    pub fn incarnation(&self) -> Option<u32> {
        self.incarnation
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    /// Build a reference to `object_id` using this template verbatim.
    pub fn make_reference(&self, object_id: ObjectId, type_id: &str) -> ObjectReference {
        ObjectReference {
            type_id: type_id.to_string(),
            adapter_id: self.adapter_id,
            object_id,
            server_id: self.server_id,
            endpoints: self.endpoints.clone(),
        }
    }
}

/// A target a request can be addressed to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectReference {
    pub type_id: String,
    pub adapter_id: AdapterId,
    pub object_id: ObjectId,
    pub server_id: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub endpoints: Vec<Endpoint>,
}

impl ObjectReference {
    /// A bare reference with no type information or endpoints.
    pub fn new(adapter_id: AdapterId, object_id: impl Into<ObjectId>) -> Self {
        Self {
            type_id: String::new(),
            adapter_id,
            object_id: object_id.into(),
            server_id: 0,
            endpoints: Vec::new(),
        }
    }

    pub fn with_type(mut self, type_id: impl Into<String>) -> Self {
        self.type_id = type_id.into();
        self
    }
}

impl std::fmt::Display for ObjectReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.adapter_id, self.object_id)?;
        if !self.type_id.is_empty() {
            write!(f, " ({})", self.type_id)?;
        }
        Ok(())
    }
}
