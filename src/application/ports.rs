//! Port trait definitions for the Application layer.
//!
//! Ports are the interfaces infrastructure must fulfill. This file imports
//! only from `crate::domain` and `crate::error` — never from `crate::infra`
//! or `crate::http`.

use std::collections::BTreeMap;

use crate::error::Result;

// ── Value Types ────────────────────────────────────────────────────────────

/// Posture to launch a container with (spec §6 "Container posture (fixed)").
pub struct RunOpts<'a> {
    pub labels: BTreeMap<String, String>,
    /// `None` runs with the engine's default network; `Some(false)` maps to
    /// `network_mode=none`.
    pub network_enabled: bool,
    /// Read-write bind of the workspace volume at `/repo`, when patching is
    /// enabled for this session.
    pub mount_repo_volume: Option<&'a str>,
    pub memory_bytes: Option<i64>,
    pub cpus: Option<f64>,
    pub run_uid: u32,
    pub run_gid: u32,
    /// Extra environment variables set on the container itself (the
    /// `environment` map from `start_session`'s request), distinct from the
    /// fixed per-command environment injected at `exec` time.
    pub env: &'a [(String, String)],
}

/// Read-only mount of the shared workspace volume, used for the
/// patch-extractor container only.
pub struct ReadOnlyMount<'a> {
    pub volume: &'a str,
    pub dest: &'a str,
}

/// Outcome of a single `exec` call.
pub struct ExecOutcome {
    pub exit_code: i64,
    pub combined_output: String,
}

/// Options narrowing an `exec` call (spec §4.2).
pub struct ExecOpts<'a> {
    pub workdir: &'a str,
    pub user: &'a str,
    pub env: &'a [(String, String)],
}

/// Streamed tar bytes returned by `get_archive`, plus the reported size.
pub struct ArchiveStream {
    pub tar_bytes: Vec<u8>,
    pub size: u64,
}

// ── Container Engine Port ───────────────────────────────────────────────────

/// Thin, typed interface over the container engine (spec §4.2). Generic
/// callers take `&impl ContainerEngine` rather than a boxed trait object —
/// there is exactly one production implementation and tests substitute a
/// hand-written fake.
#[allow(async_fn_in_trait)]
pub trait ContainerEngine {
    /// Whether the engine is reachable.
    async fn ping(&self) -> bool;

    /// Pull `image` if it is not already present locally.
    async fn pull_if_absent(&self, image: &str) -> Result<()>;

    /// Launch a detached container from `image` with the fixed posture
    /// (entrypoint `/bin/sh -lc "sleep 3600"`, `tty=true`, `remove=true`)
    /// plus the caller-supplied mounts/labels/caps. Returns the container id.
    async fn run_container(
        &self,
        image: &str,
        opts: &RunOpts<'_>,
        read_only_mount: Option<&ReadOnlyMount<'_>>,
    ) -> Result<String>;

    /// Run `argv` inside `container`, returning its exit code and combined
    /// stdout+stderr. Always takes an argv vector, never a shell string, so
    /// the entrypoint is not re-quoted.
    async fn exec(&self, container: &str, argv: &[&str], opts: &ExecOpts<'_>) -> Result<ExecOutcome>;

    /// Upload a tar stream into `container` at `dest`.
    async fn put_archive(&self, container: &str, dest: &str, tar_bytes: &[u8]) -> Result<()>;

    /// Download a tar stream of `src` from `container`.
    async fn get_archive(&self, container: &str, src: &str) -> Result<ArchiveStream>;

    /// Remove `container`. `NotFound` is absorbed, not surfaced.
    async fn remove_container(&self, container: &str) -> Result<()>;

    /// Create a named volume with the given labels.
    async fn create_volume(&self, name: &str, labels: &BTreeMap<String, String>) -> Result<()>;

    /// Remove a named volume. Callers are expected to log-and-continue on
    /// `VOLUME_IN_USE` or `NOT_FOUND` rather than treat them as fatal.
    async fn remove_volume(&self, name: &str) -> Result<()>;

    /// Read a single label off `container`, if present.
    async fn get_label(&self, container: &str, key: &str) -> Result<Option<String>>;

    /// Whether `container` is currently running (used for the single-restart
    /// recovery path in `run_on_session`).
    async fn is_running(&self, container: &str) -> Result<bool>;

    /// Start a stopped container (the restart half of the recovery path).
    async fn start_container(&self, container: &str) -> Result<()>;
}
