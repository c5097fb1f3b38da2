//! Wire DTOs for the HTTP surface (spec §6). Kept separate from
//! `crate::domain` so the JSON shape can evolve independently of the
//! in-process model.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct StartSessionRequest {
    pub base_image: String,
    #[serde(default)]
    pub extract_patch: bool,
    #[serde(default)]
    pub ephemeral: bool,
    #[serde(default = "default_true")]
    pub network_enabled: bool,
    #[serde(default)]
    pub environment: HashMap<String, String>,
    #[serde(default)]
    pub memory_bytes: Option<i64>,
    #[serde(default)]
    pub cpus: Option<f64>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Serialize)]
pub struct StartSessionResponse {
    pub session_id: String,
}

#[derive(Debug, Deserialize)]
pub struct RunRequest {
    pub commands: Vec<String>,
    #[serde(default)]
    pub workdir: Option<String>,
    /// Base64-encoded tar archive, optionally gzip-framed.
    #[serde(default)]
    pub archive: Option<String>,
    #[serde(default)]
    pub fail_fast: bool,
}

#[derive(Debug, Serialize)]
pub struct RunResultDto {
    pub command: String,
    pub output: String,
    pub exit_code: i64,
}

#[derive(Debug, Serialize)]
pub struct RunResponse {
    pub results: Vec<RunResultDto>,
    /// Base64-encoded unified binary patch; `null` when there were no
    /// changes or patching was not requested for this session.
    pub patch: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct VersionResponse {
    pub version: &'static str,
}
