//! Wire types for Cloud API v4 and request body builders.
//!
//! Responses are read leniently: only the fields the probe inspects are
//! modeled, and anything else is ignored.

use serde::Deserialize;
use serde_json::{Value, json};

use dcprobe_types::{
    ComputeSize, DatacenterId, DatacenterSpec, NicId, NicSpec, RequestStatus, ResourceState,
    ServerId, ServerSpec, VmState, VolumeSpec,
};

/// `{ "items": [...] }` envelope returned by every list endpoint.
#[derive(Debug, Deserialize)]
pub struct Collection<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Metadata {
    pub state: Option<ResourceState>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Image {
    pub id: String,
    pub properties: ImageProperties,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageProperties {
    pub name: String,
    pub location: String,
    pub image_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Datacenter {
    pub id: DatacenterId,
    #[serde(default)]
    pub metadata: Metadata,
    pub properties: DatacenterProperties,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatacenterProperties {
    pub name: String,
    pub location: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Server {
    pub id: ServerId,
    #[serde(default)]
    pub metadata: Metadata,
    pub properties: ServerProperties,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerProperties {
    pub name: String,
    pub cores: u32,
    pub ram: u32,
    pub vm_state: Option<VmState>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Nic {
    pub id: NicId,
    pub properties: NicProperties,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NicProperties {
    pub name: Option<String>,
    #[serde(default)]
    pub ips: Vec<String>,
    pub lan: Option<u32>,
}

impl Nic {
    #[must_use]
    pub fn primary_ip(&self) -> Option<&str> {
        self.properties.ips.first().map(String::as_str)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Lan {
    pub id: String,
    pub properties: LanProperties,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LanProperties {
    pub name: Option<String>,
    #[serde(default)]
    pub public: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RequestStatusBody {
    pub metadata: RequestStatusMetadata,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RequestStatusMetadata {
    pub status: RequestStatus,
    pub message: Option<String>,
}

// ============================================================================
// Request bodies
// ============================================================================

/// Composite create: the data center with all servers, volumes and NICs in
/// one request.
#[must_use]
pub fn build_datacenter_body(spec: &DatacenterSpec) -> Value {
    json!({
        "properties": {
            "name": spec.name.as_str(),
            "description": spec.description,
            "location": spec.location,
        },
        "entities": {
            "servers": {
                "items": spec.servers.iter().map(build_server_body).collect::<Vec<_>>(),
            },
        },
    })
}

fn build_server_body(server: &ServerSpec) -> Value {
    json!({
        "properties": {
            "name": server.name.as_str(),
            "cores": server.size.cores(),
            "ram": server.size.ram_mb(),
            "cpuFamily": server.cpu_family,
        },
        "entities": {
            "volumes": {
                "items": server.volumes.iter().map(build_volume_body).collect::<Vec<_>>(),
            },
            "nics": {
                "items": server.nics.iter().map(build_nic_body).collect::<Vec<_>>(),
            },
        },
    })
}

fn build_volume_body(volume: &VolumeSpec) -> Value {
    json!({
        "properties": {
            "name": volume.name.as_str(),
            "size": volume.size_gb,
            "type": "HDD",
            "image": volume.image_id,
            "imagePassword": volume.image_password.expose(),
            "sshKeys": volume.ssh_keys,
            "availabilityZone": volume.availability_zone,
        },
    })
}

fn build_nic_body(nic: &NicSpec) -> Value {
    let mut properties = json!({
        "name": nic.name.as_str(),
        "dhcp": nic.dhcp,
        "lan": nic.lan.value(),
    });
    if let Some(nat) = nic.nat {
        properties["nat"] = Value::Bool(nat);
    }
    json!({ "properties": properties })
}

#[must_use]
pub fn build_lan_patch(name: &str, public: bool) -> Value {
    json!({ "name": name, "public": public })
}

#[must_use]
pub fn build_server_resize(size: ComputeSize) -> Value {
    json!({ "cores": size.cores(), "ram": size.ram_mb() })
}
