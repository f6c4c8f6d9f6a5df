//! The two-server data center a probe run provisions.

use dcprobe_config::DatacenterSettings;
use dcprobe_types::{DatacenterSpec, LanId, NicSpec, NonEmptyString, ServerSpec, VolumeSpec};

/// Internet-facing LAN. Only the frontend is attached to it.
pub const PUBLIC_LAN: LanId = LanId::new(1);
/// LAN shared by every server.
pub const PRIVATE_LAN: LanId = LanId::new(2);
pub const PUBLIC_LAN_NAME: &str = "Public LAN";

/// Frontend with a public and a private NIC, backend with a private NIC only.
/// Both boot from `image_id` with `ssh_key` authorized for root.
#[must_use]
pub fn describe_datacenter(
    settings: &DatacenterSettings,
    image_id: &str,
    ssh_key: &str,
) -> DatacenterSpec {
    let public_nic = NicSpec {
        name: settings.public_nic_name.clone(),
        lan: PUBLIC_LAN,
        dhcp: true,
        nat: Some(false),
    };
    let private_nic = NicSpec {
        name: settings.private_nic_name.clone(),
        lan: PRIVATE_LAN,
        dhcp: true,
        nat: None,
    };

    let server = |name: &NonEmptyString, nics: Vec<NicSpec>| ServerSpec {
        name: name.clone(),
        size: settings.initial_size,
        cpu_family: settings.cpu_family.clone(),
        nics,
        volumes: vec![VolumeSpec {
            name: volume_name(name),
            size_gb: settings.volume_size_gb,
            image_id: image_id.to_string(),
            image_password: settings.image_password.clone(),
            ssh_keys: vec![ssh_key.trim().to_string()],
            availability_zone: settings.availability_zone.clone(),
        }],
    };

    DatacenterSpec {
        name: settings.name.clone(),
        description: settings.description.clone(),
        location: settings.location.clone(),
        servers: vec![
            server(&settings.frontend_name, vec![public_nic, private_nic.clone()]),
            server(&settings.backend_name, vec![private_nic]),
        ],
    }
}

fn volume_name(server: &NonEmptyString) -> NonEmptyString {
    // Non-empty prefix plus a fixed suffix is never empty.
    NonEmptyString::new(format!("{server} Volume")).unwrap_or_else(|_| server.clone())
}
