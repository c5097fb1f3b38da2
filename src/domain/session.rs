//! Session data model (spec §3, §4.5).
//!
//! A `Session` is never reloaded from an in-memory registry: the label keys
//! below are written onto the executor container at `start_session` time and
//! read back from the engine on every subsequent call, so the container
//! itself is the source of truth.

use std::collections::BTreeMap;

/// Label key carrying the container's role.
pub const LABEL_TYPE: &str = "type";
/// Label value for the command-executor container.
pub const LABEL_TYPE_CMD_EXECUTOR: &str = "cmd_executor";
/// Label value for the patch-extractor container.
pub const LABEL_TYPE_PATCH_EXTRACTOR: &str = "patch_extractor";

/// Label key carrying the patch-extractor container's id, stamped on the
/// executor so it can be found without a separate registry.
pub const LABEL_PATCH_EXTRACTOR_SESSION_ID: &str = "patch_extractor_session_id";
/// Label key carrying the shared workspace volume's name.
pub const LABEL_WORKDIR_VOLUME: &str = "workdir_volume";
/// Label key marking a session as ephemeral (archives purge `/repo` first).
pub const LABEL_EPHEMERAL: &str = "ephemeral";
/// Label applied to every volume and container this broker creates, so
/// out-of-band GC can find strays without guessing at naming conventions.
pub const LABEL_MANAGED: &str = "managed";

/// Canonical paths inside the executor, fixed regardless of base image.
pub const REPO_DIR: &str = "/repo";
pub const WORKDIR_DIR: &str = "/workdir";
pub const SANDBOX_HOME: &str = "/home/daiv-sandbox";

/// Prefix for workspace volume names; the suffix is a fresh UUID per session.
pub const WORKDIR_VOLUME_PREFIX: &str = "daiv-sandbox-workdir-";

/// Lifecycle states from spec §4.5. `Closed` is never actually observed on
/// a live container — it is what a lookup failure after close or a crash
/// collapses to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Ready,
    Closed,
}

/// A session as reconstructed from container/volume labels.
///
/// Mirrors the executor container: `executor_id` is also the session id
/// handed back to clients.
#[derive(Debug, Clone)]
pub struct Session {
    pub executor_id: String,
    pub patch_extractor_id: Option<String>,
    pub workdir_volume: Option<String>,
    pub ephemeral: bool,
    pub network_enabled: bool,
    pub state: SessionState,
}

impl Session {
    /// Whether patching is enabled for this session — true iff both the
    /// patch-extractor and the shared volume are recorded, per the §3
    /// invariant that the two always travel together.
    pub fn patching_enabled(&self) -> bool {
        self.patch_extractor_id.is_some() && self.workdir_volume.is_some()
    }
}

/// Labels to stamp on a freshly created executor container.
pub fn executor_labels(
    patch_extractor_id: Option<&str>,
    workdir_volume: Option<&str>,
    ephemeral: bool,
) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(LABEL_TYPE.to_string(), LABEL_TYPE_CMD_EXECUTOR.to_string());
    labels.insert(LABEL_MANAGED.to_string(), "1".to_string());
    if let Some(id) = patch_extractor_id {
        labels.insert(LABEL_PATCH_EXTRACTOR_SESSION_ID.to_string(), id.to_string());
    }
    if let Some(vol) = workdir_volume {
        labels.insert(LABEL_WORKDIR_VOLUME.to_string(), vol.to_string());
    }
    if ephemeral {
        labels.insert(LABEL_EPHEMERAL.to_string(), "1".to_string());
    }
    labels
}

/// Labels to stamp on a freshly created patch-extractor container.
pub fn patch_extractor_labels() -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(LABEL_TYPE.to_string(), LABEL_TYPE_PATCH_EXTRACTOR.to_string());
    labels.insert(LABEL_MANAGED.to_string(), "1".to_string());
    labels
}

/// Labels to stamp on a freshly created workspace volume.
pub fn workdir_volume_labels() -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(LABEL_MANAGED.to_string(), "1".to_string());
    labels
}

/// Result of executing a single command (spec §3 `RunResult`).
#[derive(Debug, Clone)]
pub struct RunResult {
    pub command: String,
    pub output: String,
    pub exit_code: i64,
    pub workdir: String,
}

/// Fixed environment injected for every command (spec §4.3).
///
/// Many tools refuse to run when `HOME` is unset or unwritable under a
/// non-root uid; pointing the XDG dirs at subpaths of `HOME` keeps caches
/// and config writes inside the sanitized, owned tree.
pub fn fixed_environment() -> Vec<(String, String)> {
    vec![
        ("HOME".to_string(), SANDBOX_HOME.to_string()),
        ("XDG_CACHE_HOME".to_string(), format!("{SANDBOX_HOME}/.cache")),
        ("XDG_CONFIG_HOME".to_string(), format!("{SANDBOX_HOME}/.config")),
        ("XDG_STATE_HOME".to_string(), format!("{SANDBOX_HOME}/.local/state")),
        ("XDG_DATA_HOME".to_string(), format!("{SANDBOX_HOME}/.local/share")),
    ]
}
