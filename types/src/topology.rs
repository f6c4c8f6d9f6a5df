//! Declarative description of the data center a probe run provisions.
//!
//! These are plain values; the API crate maps them onto the composite
//! create request.

use std::fmt;

use thiserror::Error;

use crate::{LanId, NonEmptyString, Secret};

/// RAM must be requested in whole multiples of this many megabytes.
pub const RAM_GRANULARITY_MB: u32 = 256;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidComputeSize {
    #[error("cores must be at least 1")]
    ZeroCores,
    #[error("ram must be a positive multiple of {RAM_GRANULARITY_MB} MB, got {0} MB")]
    Ram(u32),
}

/// Cores and RAM of one server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComputeSize {
    cores: u32,
    ram_mb: u32,
}

impl ComputeSize {
    pub fn new(cores: u32, ram_mb: u32) -> Result<Self, InvalidComputeSize> {
        if cores == 0 {
            return Err(InvalidComputeSize::ZeroCores);
        }
        if ram_mb == 0 || ram_mb % RAM_GRANULARITY_MB != 0 {
            return Err(InvalidComputeSize::Ram(ram_mb));
        }
        Ok(Self { cores, ram_mb })
    }

    #[must_use]
    pub const fn cores(self) -> u32 {
        self.cores
    }

    #[must_use]
    pub const fn ram_mb(self) -> u32 {
        self.ram_mb
    }

    /// True when both dimensions are strictly larger than `other`.
    #[must_use]
    pub const fn exceeds(self, other: Self) -> bool {
        self.cores > other.cores && self.ram_mb > other.ram_mb
    }
}

impl fmt::Display for ComputeSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} cores / {} MB", self.cores, self.ram_mb)
    }
}

#[derive(Debug, Clone)]
pub struct NicSpec {
    pub name: NonEmptyString,
    pub lan: LanId,
    pub dhcp: bool,
    /// `None` leaves the provider default in place.
    pub nat: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct VolumeSpec {
    pub name: NonEmptyString,
    pub size_gb: u32,
    pub image_id: String,
    pub image_password: Secret,
    pub ssh_keys: Vec<String>,
    pub availability_zone: String,
}

#[derive(Debug, Clone)]
pub struct ServerSpec {
    pub name: NonEmptyString,
    pub size: ComputeSize,
    pub cpu_family: String,
    pub nics: Vec<NicSpec>,
    pub volumes: Vec<VolumeSpec>,
}

#[derive(Debug, Clone)]
pub struct DatacenterSpec {
    pub name: NonEmptyString,
    pub description: String,
    pub location: String,
    pub servers: Vec<ServerSpec>,
}

impl DatacenterSpec {
    #[must_use]
    pub fn server(&self, name: &str) -> Option<&ServerSpec> {
        self.servers.iter().find(|s| s.name.as_str() == name)
    }

    /// Distinct LANs referenced by any NIC, ascending.
    #[must_use]
    pub fn lans(&self) -> Vec<LanId> {
        let mut lans: Vec<LanId> = self
            .servers
            .iter()
            .flat_map(|s| s.nics.iter().map(|n| n.lan))
            .collect();
        lans.sort_by_key(|lan| lan.value());
        lans.dedup();
        lans
    }
}
