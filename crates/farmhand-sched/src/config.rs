//! Configuration loading for farmhand.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{SchedError, SchedResult};
use crate::htcondor::{HTCONDOR_BACKEND, HtCondorConfig};
use crate::lsf::LsfConfig;
use crate::monitoring::MonitoringConfig;
use crate::monitoring::wire::API_PREFIX;
use crate::registry::BackendSettings;

/// Variable naming an explicit configuration file.
pub const ENV_CONFIG: &str = "FARMHAND_CONFIG";
/// Variable overriding the selected backend.
pub const ENV_BACKEND: &str = "FARMHAND_BACKEND";
/// Variable overriding the monitoring server address.
pub const ENV_MONITORING_ADDR: &str = "FARMHAND_MONITORING_ADDR";

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FarmhandConfig {
    /// Backend used when none is given on the command line.
    pub backend: String,

    /// HTCondor adapter settings.
    pub htcondor: HtCondorConfig,

    /// LSF adapter settings.
    pub lsf: LsfConfig,

    /// Monitoring server settings.
    pub monitoring: MonitoringConfig,
}

impl Default for FarmhandConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            htcondor: HtCondorConfig::default(),
            lsf: LsfConfig::default(),
            monitoring: MonitoringConfig::default(),
        }
    }
}

fn default_backend() -> String {
    HTCONDOR_BACKEND.to_string()
}

/// `~/.farmhand/config.yaml`, when a home directory is known.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".farmhand").join("config.yaml"))
}

impl FarmhandConfig {
    /// Parse a YAML document.
    pub fn from_yaml(text: &str) -> SchedResult<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml_ng::from_str(text)?)
    }

    /// Load configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> SchedResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            SchedError::ConfigError(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&content)
    }

    /// Load with the process environment.
    pub fn load(config_file: Option<&Path>) -> SchedResult<Self> {
        Self::load_with(config_file, |key| std::env::var(key).ok())
    }

    /// Load configuration with an explicit environment lookup.
    ///
    /// Order: `config_file`, then `$FARMHAND_CONFIG`, then the default path.
    /// An explicitly named file must exist; a missing default file yields
    /// defaults. Environment overrides are applied last.
    pub fn load_with<F>(config_file: Option<&Path>, env: F) -> SchedResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let explicit = config_file
            .map(Path::to_path_buf)
            .or_else(|| env(ENV_CONFIG).filter(|p| !p.is_empty()).map(PathBuf::from));

        let config = match explicit {
            Some(path) => {
                info!("Loading configuration from {}", path.display());
                Self::from_file(&path)?
            }
            None => match default_config_path().filter(|p| p.is_file()) {
                Some(path) => {
                    info!("Loading configuration from {}", path.display());
                    Self::from_file(&path)?
                }
                None => {
                    debug!("No configuration file found; using defaults");
                    Self::default()
                }
            },
        };

        let config = config.merge_env(env);
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides.
    fn merge_env<F>(mut self, env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(backend) = env(ENV_BACKEND).filter(|b| !b.is_empty()) {
            self.backend = backend;
        }
        if let Some(address) = env(ENV_MONITORING_ADDR).filter(|a| !a.is_empty()) {
            self.monitoring.address = Some(address);
        }
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> SchedResult<()> {
        if self.backend.trim().is_empty() {
            return Err(SchedError::ConfigError("backend must not be empty".into()));
        }
        if self.htcondor.command_timeout_secs == 0 || self.lsf.command_timeout_secs == 0 {
            return Err(SchedError::ConfigError(
                "command timeouts must be positive".into(),
            ));
        }
        if let Some(address) = &self.monitoring.address {
            if !address.starts_with("http://") && !address.starts_with("https://") {
                return Err(SchedError::ConfigError(format!(
                    "monitoring address must be an http(s) URL, got '{address}'"
                )));
            }
        }
        if !self.monitoring.api_prefix.starts_with('/') {
            return Err(SchedError::ConfigError(
                "monitoring API prefix must start with '/'".into(),
            ));
        }
        Ok(())
    }

    /// Adapter settings, with the monitoring address injected into the jobs
    /// of both backends unless configured separately.
    ///
    /// The API prefix is only handed down when it differs from the default.
    pub fn backend_settings(&self) -> BackendSettings {
        let prefix = (self.monitoring.api_prefix != API_PREFIX)
            .then(|| self.monitoring.api_prefix.clone());

        let mut htcondor = self.htcondor.clone();
        if htcondor.monitoring_url.is_none() {
            htcondor.monitoring_url = self.monitoring.address.clone();
        }
        if htcondor.monitoring_prefix.is_none() {
            htcondor.monitoring_prefix = prefix.clone();
        }
        let mut lsf = self.lsf.clone();
        if lsf.monitoring_url.is_none() {
            lsf.monitoring_url = self.monitoring.address.clone();
        }
        if lsf.monitoring_prefix.is_none() {
            lsf.monitoring_prefix = prefix;
        }
        BackendSettings { htcondor, lsf }
    }
}

/// Resolve `key=value` and `key:backend=value` arguments for one backend.
///
/// Unscoped arguments apply to every backend; scoped ones only to the named
/// backend (case-insensitive) and win over unscoped ones.
pub fn parse_backend_arguments<S: AsRef<str>>(
    args: &[S],
    backend: &str,
) -> SchedResult<BTreeMap<String, String>> {
    let mut unscoped = BTreeMap::new();
    let mut scoped = BTreeMap::new();

    for arg in args {
        let arg = arg.as_ref();
        let (key, value) = arg.split_once('=').ok_or_else(|| {
            SchedError::InvalidCommand(format!("backend argument '{arg}' is not key=value"))
        })?;
        match key.rsplit_once(':') {
            Some((name, scope)) => {
                if name.is_empty() || scope.is_empty() {
                    return Err(SchedError::InvalidCommand(format!(
                        "backend argument '{arg}' has an empty key or scope"
                    )));
                }
                if scope.eq_ignore_ascii_case(backend) {
                    scoped.insert(name.to_string(), value.to_string());
                }
            }
            None if key.is_empty() => {
                return Err(SchedError::InvalidCommand(format!(
                    "backend argument '{arg}' has an empty key"
                )));
            }
            None => {
                unscoped.insert(key.to_string(), value.to_string());
            }
        }
    }

    unscoped.extend(scoped);
    Ok(unscoped)
}
