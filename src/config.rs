//! Broker configuration, loaded from `DAIV_SANDBOX_`-prefixed environment
//! variables via `envy`, with a secrets-directory fallback for the API key
//! (mirrors the original service's `secrets_dir` behavior for Docker/Compose
//! secrets).

use std::net::IpAddr;
use std::path::Path;

use serde::Deserialize;

/// Runtime used to launch executor/patch-extractor containers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Runtime {
    /// Default OCI runtime (runc).
    Runc,
    /// gVisor user-mode kernel runtime, for untrusted workloads.
    Runsc,
}

impl Default for Runtime {
    fn default() -> Self {
        Runtime::Runc
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Local,
    Production,
}

impl Default for Environment {
    fn default() -> Self {
        Environment::Production
    }
}

/// Settings parsed from `DAIV_SANDBOX_*` environment variables.
///
/// `api_key` is intentionally not populated by `envy` directly — see
/// [`Settings::load`], which fills it in from either the `API_KEY` env var
/// or a secrets file.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub environment: Environment,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub api_key: String,
    /// Path to a secrets directory (Docker/Compose style); when set and
    /// `api_key` is empty, `<secrets_dir>/daiv_sandbox_api_key` is read.
    #[serde(default = "default_secrets_dir")]
    pub secrets_dir: String,

    #[serde(default)]
    pub runtime: Runtime,
    #[serde(default = "default_run_uid")]
    pub run_uid: u32,
    #[serde(default = "default_run_gid")]
    pub run_gid: u32,

    #[serde(default = "default_git_image")]
    pub git_image: String,
}

fn default_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}
fn default_port() -> u16 {
    8000
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_secrets_dir() -> String {
    "/run/secrets".to_string()
}
fn default_run_uid() -> u32 {
    1000
}
fn default_run_gid() -> u32 {
    1000
}
fn default_git_image() -> String {
    "alpine/git:2.49.1".to_string()
}

/// API root, fixed per spec §6.
pub const API_V1_STR: &str = "/api/v1";

impl Settings {
    /// Load settings from the environment, resolving `API_KEY` from a
    /// secrets file when the env var itself is absent or empty.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are malformed, or
    /// if no API key can be resolved from either the environment or the
    /// secrets directory.
    pub fn load() -> anyhow::Result<Self> {
        let mut settings: Settings = envy::prefixed("DAIV_SANDBOX_")
            .from_env()
            .map_err(|e| anyhow::anyhow!("failed to load DAIV_SANDBOX_* config: {e}"))?;

        if settings.api_key.is_empty() {
            let secret_path = Path::new(&settings.secrets_dir).join("daiv_sandbox_api_key");
            if let Ok(contents) = std::fs::read_to_string(&secret_path) {
                settings.api_key = contents.trim().to_string();
            }
        }

        if settings.api_key.is_empty() {
            anyhow::bail!(
                "no API key configured: set DAIV_SANDBOX_API_KEY or provide {}/daiv_sandbox_api_key",
                settings.secrets_dir
            );
        }

        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_defaults_to_runc() {
        assert_eq!(Runtime::default(), Runtime::Runc);
    }

    #[test]
    fn environment_defaults_to_production() {
        assert_eq!(Environment::default(), Environment::Production);
    }

    #[test]
    fn default_host_is_unspecified() {
        assert_eq!(default_host(), IpAddr::from([0, 0, 0, 0]));
    }

    #[test]
    fn default_port_is_8000() {
        assert_eq!(default_port(), 8000);
    }
}
