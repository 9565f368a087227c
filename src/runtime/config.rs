use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::runtime::transport::{SshMode, SshProfile};

/// Environment variable pointing at an explicit configuration file.
pub const CONFIG_ENV: &str = "TRACESIM_CONF";
/// Environment variable overriding the facts directory.
pub const FACTS_ENV: &str = "TRACESIM_FACTS";
/// Well-known configuration file name searched in the home and current
/// directories.
pub const CONFIG_FILE_NAME: &str = "tracesim.yaml";
/// Facts directory fallback when neither configuration nor environment name
/// one.
pub const DEFAULT_FACTS_DIR: &str = "tsim_facts";

/// Fully resolved runtime settings for one request: defaults, overlaid by
/// the configuration file, overlaid by caller overrides.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub tsim_facts: PathBuf,
    pub controller_ip: Option<IpAddr>,
    /// Whether this process runs on the controller host; governs transport
    /// routing (direct versus nested).
    pub on_controller: bool,
    pub enable_mtr_fallback: bool,
    pub enable_reverse_trace: bool,
    pub force_forward_trace: bool,
    pub software_simulation_only: bool,
    pub verbose_level: u8,
    pub ssh: SshProfile,
    pub ssh_controller: SshProfile,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        let facts = env::var(FACTS_ENV).unwrap_or_else(|_| DEFAULT_FACTS_DIR.to_string());
        Self {
            tsim_facts: PathBuf::from(facts),
            controller_ip: None,
            on_controller: false,
            enable_mtr_fallback: true,
            enable_reverse_trace: true,
            force_forward_trace: false,
            software_simulation_only: false,
            verbose_level: 0,
            ssh: SshProfile::router_defaults(),
            ssh_controller: SshProfile::controller_defaults(),
        }
    }
}

/// Caller-level settings, applied with the highest precedence. `None`
/// leaves the file/default value in place.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub tsim_facts: Option<PathBuf>,
    pub controller_ip: Option<IpAddr>,
    pub no_mtr: bool,
    pub force_forward_trace: bool,
    pub software_simulation_only: bool,
    pub verbose_level: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
struct RawSshProfile {
    ssh_mode: Option<String>,
    ssh_user: Option<String>,
    ssh_key: Option<String>,
    #[serde(default)]
    ssh_options: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize, Default)]
struct RawConfig {
    tsim_facts: Option<String>,
    controller_ip: Option<String>,
    ansible_controller: Option<bool>,
    enable_mtr_fallback: Option<bool>,
    enable_reverse_trace: Option<bool>,
    force_forward_trace: Option<bool>,
    software_simulation_only: Option<bool>,
    verbose_level: Option<u8>,
    ssh_config: Option<RawSshProfile>,
    ssh_controller_config: Option<RawSshProfile>,
}

/// Load the effective configuration: defaults, then the first readable
/// configuration file, then `overrides`. A missing file is not an error; a
/// malformed one is skipped with a warning.
pub fn load_runtime_config(overrides: &ConfigOverrides) -> Result<RuntimeConfig> {
    let raw = read_first_config_file();
    resolve_config(raw, overrides)
}

fn resolve_config(raw: RawConfig, overrides: &ConfigOverrides) -> Result<RuntimeConfig> {
    let mut config = RuntimeConfig::default();

    if let Some(facts) = raw.tsim_facts {
        config.tsim_facts = PathBuf::from(facts);
    }
    if let Some(text) = raw.controller_ip {
        let addr = text
            .parse::<IpAddr>()
            .with_context(|| format!("invalid controller_ip in configuration: {text}"))?;
        config.controller_ip = Some(addr);
    }
    if let Some(flag) = raw.ansible_controller {
        config.on_controller = flag;
    }
    if let Some(flag) = raw.enable_mtr_fallback {
        config.enable_mtr_fallback = flag;
    }
    if let Some(flag) = raw.enable_reverse_trace {
        config.enable_reverse_trace = flag;
    }
    if let Some(flag) = raw.force_forward_trace {
        config.force_forward_trace = flag;
    }
    if let Some(flag) = raw.software_simulation_only {
        config.software_simulation_only = flag;
    }
    if let Some(level) = raw.verbose_level {
        config.verbose_level = level.min(3);
    }
    if let Some(profile) = raw.ssh_config {
        config.ssh = resolve_profile(profile, SshProfile::router_defaults());
    }
    if let Some(profile) = raw.ssh_controller_config {
        config.ssh_controller = resolve_profile(profile, SshProfile::controller_defaults());
    }

    if let Some(facts) = &overrides.tsim_facts {
        config.tsim_facts = facts.clone();
    }
    if let Some(addr) = overrides.controller_ip {
        config.controller_ip = Some(addr);
    }
    if overrides.no_mtr {
        config.enable_mtr_fallback = false;
    }
    if overrides.force_forward_trace {
        config.enable_reverse_trace = false;
        config.force_forward_trace = true;
    }
    if overrides.software_simulation_only {
        config.software_simulation_only = true;
        if overrides.force_forward_trace {
            config.enable_reverse_trace = false;
        }
    }
    if let Some(level) = overrides.verbose_level {
        config.verbose_level = level.min(3);
    }

    Ok(config)
}

fn resolve_profile(raw: RawSshProfile, defaults: SshProfile) -> SshProfile {
    let mode = match raw.ssh_mode.as_deref() {
        Some("user") => SshMode::User,
        Some("standard") | None => SshMode::Standard,
        Some(other) => {
            warn!("unknown ssh_mode {other:?}, using standard");
            SshMode::Standard
        }
    };
    SshProfile {
        mode,
        user: raw.ssh_user,
        key: raw.ssh_key,
        options: if raw.ssh_options.is_empty() {
            defaults.options
        } else {
            raw.ssh_options
        },
    }
}

/// Candidate configuration files in precedence order: the environment
/// pointer, the home directory, the current directory.
fn config_file_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Ok(path) = env::var(CONFIG_ENV) {
        candidates.push(PathBuf::from(path));
    }
    if let Ok(home) = env::var("HOME") {
        candidates.push(Path::new(&home).join(CONFIG_FILE_NAME));
    }
    candidates.push(PathBuf::from(CONFIG_FILE_NAME));
    candidates
}

fn read_first_config_file() -> RawConfig {
    for candidate in config_file_candidates() {
        let Ok(text) = fs::read_to_string(&candidate) else {
            continue;
        };
        match serde_yaml::from_str::<RawConfig>(&text) {
            Ok(raw) => {
                debug!(path = %candidate.display(), "loaded configuration file");
                return raw;
            }
            Err(err) => {
                warn!(
                    "ignoring malformed configuration file {}: {err}",
                    candidate.display()
                );
            }
        }
    }
    RawConfig::default()
}
