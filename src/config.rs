use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub terraform: TerraformConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TerraformConfig {
    pub binary: String,
    pub working_dir: PathBuf,
}

impl Default for TerraformConfig {
    fn default() -> Self {
        Self {
            binary: "terraform".to_string(),
            working_dir: PathBuf::from("./terraform"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub json: bool,
}

/// Command-line values that take precedence over the config file.
#[derive(Debug, Default)]
pub struct Overrides {
    pub bind: Option<String>,
    pub working_dir: Option<PathBuf>,
    pub terraform_bin: Option<String>,
    pub log_json: bool,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub bind: SocketAddr,
    pub binary: String,
    pub working_dir: PathBuf,
    pub log_json: bool,
}

pub fn default_config_path() -> Result<PathBuf> {
    let proj = directories::ProjectDirs::from("", "", "terraform-manager")
        .context("could not determine config directory")?;
    Ok(proj.config_dir().join("config.toml"))
}

/// An explicit path must exist. The default path is optional and falls back
/// to built-in defaults when absent.
pub fn load(explicit: Option<&Path>, overrides: Overrides) -> Result<ResolvedConfig> {
    let raw = match explicit {
        Some(path) => read_config(path)?,
        None => {
            let path = default_config_path()?;
            if path.exists() {
                read_config(&path)?
            } else {
                Config::default()
            }
        }
    };
    resolve(raw, overrides)
}

fn read_config(path: &Path) -> Result<Config> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config from {}", path.display()))?;
    parse_config(&contents)
}

pub fn parse_config(contents: &str) -> Result<Config> {
    toml::from_str(contents).context("failed to parse config TOML")
}

pub fn resolve(mut raw: Config, overrides: Overrides) -> Result<ResolvedConfig> {
    if let Some(bind) = overrides.bind {
        raw.server.bind = bind;
    }
    if let Some(dir) = overrides.working_dir {
        raw.terraform.working_dir = dir;
    }
    if let Some(bin) = overrides.terraform_bin {
        raw.terraform.binary = bin;
    }

    let bind: SocketAddr = raw
        .server
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {:?}", raw.server.bind))?;

    if raw.terraform.binary.trim().is_empty() {
        bail!("terraform.binary must not be empty");
    }

    Ok(ResolvedConfig {
        bind,
        binary: raw.terraform.binary,
        working_dir: raw.terraform.working_dir,
        log_json: raw.logging.json || overrides.log_json,
    })
}
