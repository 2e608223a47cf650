//! Protobuf messages for the slice of the xDS and Istio APIs this server reads.
//!
//! Field tags follow `envoy.service.discovery.v3`, `istio.mcp.v1alpha1` and
//! `istio.networking.v1alpha3`. Fields the server never reads are left out;
//! prost skips unknown tags on decode.

use prost::Message;
use prost_types::Any;

use crate::error::DnsError;

/// Type URL of an MCP `Resource` wrapper.
pub const MCP_RESOURCE_TYPE_URL: &str = "type.googleapis.com/istio.mcp.v1alpha1.Resource";

/// Type URL of a `ServiceEntry` body.
pub const SERVICE_ENTRY_BODY_TYPE_URL: &str =
    "type.googleapis.com/istio.networking.v1alpha3.ServiceEntry";

/// `envoy.service.discovery.v3.DiscoveryRequest`
#[derive(Clone, PartialEq, Message)]
pub struct DiscoveryRequest {
    #[prost(string, tag = "1")]
    pub version_info: String,
    #[prost(message, optional, tag = "2")]
    pub node: Option<Node>,
    #[prost(string, repeated, tag = "3")]
    pub resource_names: Vec<String>,
    #[prost(string, tag = "4")]
    pub type_url: String,
    #[prost(string, tag = "5")]
    pub response_nonce: String,
}

/// `envoy.service.discovery.v3.DiscoveryResponse`
#[derive(Clone, PartialEq, Message)]
pub struct DiscoveryResponse {
    #[prost(string, tag = "1")]
    pub version_info: String,
    #[prost(message, repeated, tag = "2")]
    pub resources: Vec<Any>,
    #[prost(string, tag = "4")]
    pub type_url: String,
    #[prost(string, tag = "5")]
    pub nonce: String,
}

impl DiscoveryResponse {
    /// Acknowledgment for this response.
    pub fn ack(&self) -> DiscoveryRequest {
        DiscoveryRequest {
            version_info: self.version_info.clone(),
            response_nonce: self.nonce.clone(),
            type_url: self.type_url.clone(),
            ..Default::default()
        }
    }
}

/// `envoy.config.core.v3.Node`
#[derive(Clone, PartialEq, Message)]
pub struct Node {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, tag = "2")]
    pub cluster: String,
    #[prost(message, optional, tag = "3")]
    pub metadata: Option<prost_types::Struct>,
}

/// `istio.mcp.v1alpha1.Resource`
#[derive(Clone, PartialEq, Message)]
pub struct Resource {
    #[prost(message, optional, tag = "1")]
    pub metadata: Option<ResourceMetadata>,
    #[prost(message, optional, tag = "2")]
    pub body: Option<Any>,
}

/// `istio.mcp.v1alpha1.Metadata`
#[derive(Clone, PartialEq, Message)]
pub struct ResourceMetadata {
    /// Fully qualified name, `<namespace>/<name>`.
    #[prost(string, tag = "1")]
    pub name: String,
}

/// `istio.networking.v1alpha3.ServiceEntry`
#[derive(Clone, PartialEq, Message)]
pub struct ServiceEntry {
    #[prost(string, repeated, tag = "1")]
    pub hosts: Vec<String>,
    #[prost(string, repeated, tag = "2")]
    pub addresses: Vec<String>,
    #[prost(enumeration = "Resolution", tag = "5")]
    pub resolution: i32,
}

/// `istio.networking.v1alpha3.ServiceEntry.Resolution`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum Resolution {
    /// Caller supplies the address; no DNS answer is needed.
    None = 0,
    Static = 1,
    Dns = 2,
    DnsRoundRobin = 3,
}

impl ServiceEntry {
    /// True when the entry's resolution is `NONE`.
    ///
    /// Reads the raw field: values this build does not know are not `NONE`.
    pub fn caller_supplies_address(&self) -> bool {
        self.resolution == Resolution::None as i32
    }

    /// Wrap this entry the way the control plane ships it: an MCP `Resource`
    /// whose body is the entry, packed in an `Any`.
    pub fn to_resource(&self, name: &str) -> Any {
        let resource = Resource {
            metadata: Some(ResourceMetadata {
                name: name.to_string(),
            }),
            body: Some(Any {
                type_url: SERVICE_ENTRY_BODY_TYPE_URL.to_string(),
                value: self.encode_to_vec(),
            }),
        };
        Any {
            type_url: MCP_RESOURCE_TYPE_URL.to_string(),
            value: resource.encode_to_vec(),
        }
    }
}

/// Decode a ServiceEntry from its MCP-wrapped `Any`.
///
/// Returns the resource name (possibly empty) along with the entry.
pub fn decode_service_entry(any: &Any) -> Result<(String, ServiceEntry), DnsError> {
    let resource = Resource::decode(any.value.as_slice())?;
    let name = resource.metadata.map(|m| m.name).unwrap_or_default();
    let body = resource
        .body
        .ok_or_else(|| DnsError::MalformedResource(format!("resource {name:?} has no body")))?;
    let entry = ServiceEntry::decode(body.value.as_slice())?;
    Ok((name, entry))
}
