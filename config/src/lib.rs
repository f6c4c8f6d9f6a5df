//! Configuration for a probe run.
//!
//! The file lives at `~/.dcprobe/config.toml` unless a path is given explicitly.
//! Every value has a default except the API credentials. String values may
//! reference environment variables as `${VAR}`; `DCPROBE_USERNAME`,
//! `DCPROBE_PASSWORD` and `DCPROBE_ENDPOINT` override the file.
//!
//! Parsing happens in two stages: the raw, all-optional TOML shape
//! ([`RawConfig`]) and the validated [`ProbeConfig`] handed to the rest of the
//! workspace. Nothing here is global; callers load once and pass it down.

mod env;

pub use env::expand_env_vars;

use std::path::{Path, PathBuf};
use std::time::Duration;

use dcprobe_types::{ComputeSize, InvalidComputeSize, NonEmptyString, Secret};
use serde::Deserialize;
use thiserror::Error;
use url::Url;

pub const DEFAULT_ENDPOINT: &str = "https://api.ionos.com/cloudapi/v4";

pub const ENV_USERNAME: &str = "DCPROBE_USERNAME";
pub const ENV_PASSWORD: &str = "DCPROBE_PASSWORD";
pub const ENV_ENDPOINT: &str = "DCPROBE_ENDPOINT";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no home directory; pass --config explicitly")]
    NoHomeDir,
    #[error("failed to read config at {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("missing required setting `{0}`")]
    Missing(&'static str),
    #[error("invalid `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

// ============================================================================
// Raw TOML shape
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfig {
    pub api: Option<RawApi>,
    pub datacenter: Option<RawDatacenter>,
    pub ssh: Option<RawSsh>,
    pub transfer: Option<RawTransfer>,
    pub probe: Option<RawProbe>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawApi {
    pub endpoint: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub request_timeout_secs: Option<u64>,
    pub completion_poll_interval_secs: Option<u64>,
    pub completion_timeout_secs: Option<u64>,
    pub allow_insecure_http: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawDatacenter {
    pub name: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub image_name: Option<String>,
    pub image_password: Option<String>,
    pub volume_size_gb: Option<u32>,
    pub availability_zone: Option<String>,
    pub cpu_family: Option<String>,
    pub cores: Option<u32>,
    pub ram_mb: Option<u32>,
    pub upgraded_cores: Option<u32>,
    pub upgraded_ram_mb: Option<u32>,
    pub frontend_name: Option<String>,
    pub backend_name: Option<String>,
    pub public_nic_name: Option<String>,
    pub private_nic_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawSsh {
    pub user: Option<String>,
    pub port: Option<u16>,
    pub public_key_path: Option<String>,
    pub private_key_path: Option<String>,
    pub remote_public_key_path: Option<String>,
    pub remote_private_key_path: Option<String>,
    pub ready_timeout_secs: Option<u64>,
    pub attempt_timeout_secs: Option<u64>,
    pub retry_backoff_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawTransfer {
    pub file_name: Option<String>,
    pub message: Option<String>,
    pub backend_user: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawProbe {
    pub keep_datacenter: Option<bool>,
    pub report_path: Option<String>,
}

// ============================================================================
// Validated configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub endpoint: Url,
    pub username: String,
    pub password: Secret,
    pub request_timeout: Duration,
    pub completion_poll_interval: Duration,
    pub completion_timeout: Duration,
    /// Permit plain-HTTP endpoints (mock servers only).
    pub allow_insecure_http: bool,
}

#[derive(Debug, Clone)]
pub struct DatacenterSettings {
    pub name: NonEmptyString,
    pub description: String,
    pub location: String,
    pub image_name: String,
    pub image_password: Secret,
    pub volume_size_gb: u32,
    pub availability_zone: String,
    pub cpu_family: String,
    pub initial_size: ComputeSize,
    pub upgraded_size: ComputeSize,
    pub frontend_name: NonEmptyString,
    pub backend_name: NonEmptyString,
    pub public_nic_name: NonEmptyString,
    pub private_nic_name: NonEmptyString,
}

#[derive(Debug, Clone)]
pub struct SshSettings {
    pub user: String,
    pub port: u16,
    pub public_key_path: PathBuf,
    pub private_key_path: PathBuf,
    pub remote_public_key_path: String,
    pub remote_private_key_path: String,
    pub ready_timeout: Duration,
    pub attempt_timeout: Duration,
    /// Zero means retry immediately; the attempt timeout paces the loop.
    pub retry_backoff: Duration,
}

#[derive(Debug, Clone)]
pub struct TransferSettings {
    pub file_name: NonEmptyString,
    pub message: String,
    pub backend_user: String,
}

#[derive(Debug, Clone, Default)]
pub struct ProbeSettings {
    pub keep_datacenter: bool,
    pub report_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub api: ApiSettings,
    pub datacenter: DatacenterSettings,
    pub ssh: SshSettings,
    pub transfer: TransferSettings,
    pub probe: ProbeSettings,
}

impl ProbeConfig {
    /// Load from `path`, or the default location when `None`.
    ///
    /// A missing default file is not an error: credentials may come from the
    /// environment alone. A missing explicit file is.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let lookup = |name: &str| std::env::var(name).ok();
        let (path, explicit) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => (config_path().ok_or(ConfigError::NoHomeDir)?, false),
        };

        if !explicit && !path.exists() {
            tracing::info!(path = %path.display(), "No config file; using defaults and environment");
            return Self::from_raw(RawConfig::default(), &lookup);
        }

        let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        let raw: RawConfig = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "Loaded config");
        Self::from_raw(raw, &lookup)
    }

    /// Parse TOML text, resolving `${VAR}` and overrides through `lookup`.
    pub fn from_toml_str(
        content: &str,
        lookup: &dyn Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        Self::from_raw(raw, lookup)
    }

    pub fn from_raw(
        raw: RawConfig,
        lookup: &dyn Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let expand = |value: Option<String>| value.map(|v| expand_env_vars(&v, lookup));

        let api = raw.api.unwrap_or_default();
        let dc = raw.datacenter.unwrap_or_default();
        let ssh = raw.ssh.unwrap_or_default();
        let transfer = raw.transfer.unwrap_or_default();
        let probe = raw.probe.unwrap_or_default();

        let endpoint_raw = lookup(ENV_ENDPOINT)
            .or_else(|| expand(api.endpoint))
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        let allow_insecure_http = api.allow_insecure_http.unwrap_or(false);
        let endpoint = parse_endpoint(&endpoint_raw, allow_insecure_http)?;

        let username = lookup(ENV_USERNAME)
            .or_else(|| expand(api.username))
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing("api.username"))?;
        let password = lookup(ENV_PASSWORD)
            .or_else(|| expand(api.password))
            .map(Secret::new)
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::Missing("api.password"))?;

        let api = ApiSettings {
            endpoint,
            username,
            password,
            request_timeout: positive_secs("api.request_timeout_secs", api.request_timeout_secs, 60)?,
            completion_poll_interval: positive_secs(
                "api.completion_poll_interval_secs",
                api.completion_poll_interval_secs,
                5,
            )?,
            completion_timeout: positive_secs(
                "api.completion_timeout_secs",
                api.completion_timeout_secs,
                3600,
            )?,
            allow_insecure_http,
        };

        let initial_size = ComputeSize::new(dc.cores.unwrap_or(1), dc.ram_mb.unwrap_or(1024))
            .map_err(|e| size_error("datacenter.cores/ram_mb", &e))?;
        let upgraded_size = ComputeSize::new(
            dc.upgraded_cores.unwrap_or(2),
            dc.upgraded_ram_mb.unwrap_or(2048),
        )
        .map_err(|e| size_error("datacenter.upgraded_cores/upgraded_ram_mb", &e))?;
        if !upgraded_size.exceeds(initial_size) {
            return Err(ConfigError::invalid(
                "datacenter.upgraded_cores/upgraded_ram_mb",
                format!("{upgraded_size} must exceed {initial_size} in both cores and RAM"),
            ));
        }

        let volume_size_gb = dc.volume_size_gb.unwrap_or(20);
        if volume_size_gb == 0 {
            return Err(ConfigError::invalid(
                "datacenter.volume_size_gb",
                "must be at least 1",
            ));
        }

        let datacenter = DatacenterSettings {
            name: non_empty("datacenter.name", expand(dc.name), "dcprobe")?,
            description: expand(dc.description)
                .unwrap_or_else(|| "dcprobe end-to-end datacenter".to_string()),
            location: expand(dc.location).unwrap_or_else(|| "de/fra".to_string()),
            image_name: expand(dc.image_name).unwrap_or_else(|| "ubuntu".to_string()),
            image_password: expand(dc.image_password)
                .map(Secret::new)
                .filter(|s| !s.is_empty())
                .ok_or(ConfigError::Missing("datacenter.image_password"))?,
            volume_size_gb,
            availability_zone: expand(dc.availability_zone)
                .unwrap_or_else(|| "ZONE_3".to_string()),
            cpu_family: expand(dc.cpu_family).unwrap_or_else(|| "INTEL_XEON".to_string()),
            initial_size,
            upgraded_size,
            frontend_name: non_empty("datacenter.frontend_name", dc.frontend_name, "Frontend")?,
            backend_name: non_empty("datacenter.backend_name", dc.backend_name, "Backend")?,
            public_nic_name: non_empty(
                "datacenter.public_nic_name",
                dc.public_nic_name,
                "Public NIC",
            )?,
            private_nic_name: non_empty(
                "datacenter.private_nic_name",
                dc.private_nic_name,
                "Private NIC",
            )?,
        };
        if datacenter.frontend_name == datacenter.backend_name {
            return Err(ConfigError::invalid(
                "datacenter.backend_name",
                "must differ from frontend_name",
            ));
        }

        let port = ssh.port.unwrap_or(22);
        if port == 0 {
            return Err(ConfigError::invalid("ssh.port", "must be non-zero"));
        }
        let ssh = SshSettings {
            user: expand(ssh.user).unwrap_or_else(|| "root".to_string()),
            port,
            public_key_path: expand_home(
                &expand(ssh.public_key_path).unwrap_or_else(|| "~/.ssh/id_rsa.pub".to_string()),
            ),
            private_key_path: expand_home(
                &expand(ssh.private_key_path).unwrap_or_else(|| "~/.ssh/id_rsa".to_string()),
            ),
            remote_public_key_path: expand(ssh.remote_public_key_path)
                .unwrap_or_else(|| "/root/.ssh/id_rsa.pub".to_string()),
            remote_private_key_path: expand(ssh.remote_private_key_path)
                .unwrap_or_else(|| "/root/.ssh/id_rsa".to_string()),
            ready_timeout: Duration::from_secs(ssh.ready_timeout_secs.unwrap_or(1800)),
            attempt_timeout: positive_secs(
                "ssh.attempt_timeout_secs",
                ssh.attempt_timeout_secs,
                60,
            )?,
            retry_backoff: Duration::from_secs(ssh.retry_backoff_secs.unwrap_or(0)),
        };

        let transfer = TransferSettings {
            file_name: non_empty(
                "transfer.file_name",
                expand(transfer.file_name),
                "dcprobe-transfer.txt",
            )?,
            message: expand(transfer.message).unwrap_or_else(|| "Test message".to_string()),
            backend_user: expand(transfer.backend_user).unwrap_or_else(|| "root".to_string()),
        };
        if transfer.file_name.contains('/') || transfer.file_name.contains('\'') {
            return Err(ConfigError::invalid(
                "transfer.file_name",
                "must be a plain file name",
            ));
        }

        let probe = ProbeSettings {
            keep_datacenter: probe.keep_datacenter.unwrap_or(false),
            report_path: expand(probe.report_path).map(|p| expand_home(&p)),
        };

        Ok(Self {
            api,
            datacenter,
            ssh,
            transfer,
            probe,
        })
    }

    pub fn path() -> Option<PathBuf> {
        config_path()
    }

    /// Values that must never appear in logs or reports.
    #[must_use]
    pub fn secrets(&self) -> [&str; 2] {
        [
            self.api.password.expose(),
            self.datacenter.image_password.expose(),
        ]
    }
}

#[must_use]
pub fn config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".dcprobe").join("config.toml"))
}

fn parse_endpoint(raw: &str, allow_insecure_http: bool) -> Result<Url, ConfigError> {
    // A trailing slash keeps `Url::join` from dropping the last path segment.
    let normalized = if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{raw}/")
    };
    let url =
        Url::parse(&normalized).map_err(|e| ConfigError::invalid("api.endpoint", e.to_string()))?;
    match url.scheme() {
        "https" => Ok(url),
        "http" if allow_insecure_http => Ok(url),
        "http" => Err(ConfigError::invalid(
            "api.endpoint",
            "plain http requires api.allow_insecure_http = true",
        )),
        other => Err(ConfigError::invalid(
            "api.endpoint",
            format!("unsupported scheme `{other}`"),
        )),
    }
}

fn positive_secs(
    field: &'static str,
    value: Option<u64>,
    default: u64,
) -> Result<Duration, ConfigError> {
    match value.unwrap_or(default) {
        0 => Err(ConfigError::invalid(field, "must be at least 1 second")),
        secs => Ok(Duration::from_secs(secs)),
    }
}

fn non_empty(
    field: &'static str,
    value: Option<String>,
    default: &str,
) -> Result<NonEmptyString, ConfigError> {
    NonEmptyString::new(value.unwrap_or_else(|| default.to_string()))
        .map_err(|_| ConfigError::invalid(field, "must not be empty"))
}

fn size_error(field: &'static str, err: &InvalidComputeSize) -> ConfigError {
    ConfigError::invalid(field, err.to_string())
}

fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir().map_or_else(|| PathBuf::from(path), |home| home.join(rest)),
        None => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    const MINIMAL: &str = r#"
[api]
username = "probe@example.com"
password = "correct-horse"

[datacenter]
image_password = "123123123"
"#;

    #[test]
    fn minimal_config_fills_defaults() {
        let config = ProbeConfig::from_toml_str(MINIMAL, &env(&[])).unwrap();

        assert_eq!(config.api.endpoint.as_str(), "https://api.ionos.com/cloudapi/v4/");
        assert_eq!(config.api.username, "probe@example.com");
        assert_eq!(config.api.completion_timeout, Duration::from_secs(3600));
        assert_eq!(config.datacenter.frontend_name.as_str(), "Frontend");
        assert_eq!(config.datacenter.backend_name.as_str(), "Backend");
        assert_eq!(config.datacenter.initial_size, ComputeSize::new(1, 1024).unwrap());
        assert_eq!(config.datacenter.upgraded_size, ComputeSize::new(2, 2048).unwrap());
        assert_eq!(config.ssh.ready_timeout, Duration::from_secs(1800));
        assert_eq!(config.ssh.attempt_timeout, Duration::from_secs(60));
        assert_eq!(config.ssh.retry_backoff, Duration::ZERO);
        assert_eq!(config.ssh.port, 22);
        assert!(!config.probe.keep_datacenter);
    }

    #[test]
    fn credentials_are_required() {
        let err = ProbeConfig::from_toml_str("", &env(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("api.username")));

        let err = ProbeConfig::from_toml_str("[api]\nusername = \"u\"\n", &env(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("api.password")));
    }

    #[test]
    fn environment_overrides_file() {
        let config = ProbeConfig::from_toml_str(
            MINIMAL,
            &env(&[
                (ENV_USERNAME, "env-user"),
                (ENV_ENDPOINT, "https://api.example.test/cloudapi/v4"),
            ]),
        )
        .unwrap();

        assert_eq!(config.api.username, "env-user");
        assert_eq!(
            config.api.endpoint.as_str(),
            "https://api.example.test/cloudapi/v4/"
        );
    }

    #[test]
    fn expands_variables_in_values() {
        let toml = r#"
[api]
username = "probe"
password = "${PROBE_PW}"

[datacenter]
image_password = "${IMAGE_PW}"
name = "dc-${RUN}"
"#;
        let config = ProbeConfig::from_toml_str(
            toml,
            &env(&[("PROBE_PW", "from-env-pw"), ("IMAGE_PW", "img-pass"), ("RUN", "7")]),
        )
        .unwrap();

        assert_eq!(config.api.password.expose(), "from-env-pw");
        assert_eq!(config.datacenter.name.as_str(), "dc-7");
    }

    #[test]
    fn rejects_plain_http_unless_allowed() {
        let toml = format!("{MINIMAL}\n");
        let err = ProbeConfig::from_toml_str(
            &toml,
            &env(&[(ENV_ENDPOINT, "http://127.0.0.1:8080/cloudapi/v4")]),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "api.endpoint", .. }));

        let toml = r#"
[api]
username = "u"
password = "p"
endpoint = "http://127.0.0.1:8080/cloudapi/v4"
allow_insecure_http = true

[datacenter]
image_password = "123123123"
"#;
        let config = ProbeConfig::from_toml_str(toml, &env(&[])).unwrap();
        assert_eq!(config.api.endpoint.scheme(), "http");
    }

    #[test]
    fn upgrade_must_grow_both_dimensions() {
        let toml = format!("{MINIMAL}upgraded_cores = 2\nupgraded_ram_mb = 1024\n");
        let err = ProbeConfig::from_toml_str(&toml, &env(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn ram_granularity_is_enforced() {
        let toml = format!("{MINIMAL}ram_mb = 1000\n");
        let err = ProbeConfig::from_toml_str(&toml, &env(&[])).unwrap_err();
        assert!(err.to_string().contains("256"));
    }

    #[test]
    fn zero_ready_timeout_is_accepted() {
        let toml = format!("{MINIMAL}\n[ssh]\nready_timeout_secs = 0\n");
        let config = ProbeConfig::from_toml_str(&toml, &env(&[])).unwrap();
        assert_eq!(config.ssh.ready_timeout, Duration::ZERO);
    }

    #[test]
    fn zero_attempt_timeout_is_rejected() {
        let toml = format!("{MINIMAL}\n[ssh]\nattempt_timeout_secs = 0\n");
        let err = ProbeConfig::from_toml_str(&toml, &env(&[])).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "ssh.attempt_timeout_secs",
                ..
            }
        ));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let toml = format!("{MINIMAL}\n[ssh]\nready_timeout = 5\n");
        assert!(matches!(
            ProbeConfig::from_toml_str(&toml, &env(&[])),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn load_reads_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, MINIMAL).unwrap();

        let config = ProbeConfig::load(Some(&path)).unwrap();
        assert_eq!(config.datacenter.image_password.expose(), "123123123");
    }

    #[test]
    fn load_missing_explicit_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = ProbeConfig::load(Some(&dir.path().join("absent.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn secrets_lists_both_passwords() {
        let config = ProbeConfig::from_toml_str(MINIMAL, &env(&[])).unwrap();
        assert_eq!(config.secrets(), ["correct-horse", "123123123"]);
    }
}
