//! Patch Builder (spec §4.4) — orchestrates the patch-extractor companion
//! container to compute a binary-safe, rename-aware diff between a baseline
//! archive and the current state of the shared workspace volume.
//!
//! Imports only from `crate::domain`, `crate::application::ports`,
//! `crate::archive`, and `crate::scripts`.

use crate::application::ports::{ContainerEngine, ExecOpts};
use crate::error::{Result, SandboxError};
use crate::scripts::{GIT_DIFF_EXTRACTOR_SCRIPT, NOTHING_TO_COMMIT_MARKER};

/// Destination the baseline archive is uploaded to inside the
/// patch-extractor before the diff script runs.
const OLD_DEST: &str = "/workdir";

/// Run the diff script inside `patch_extractor_id` and return the patch
/// bytes, or `None` if there were no changes.
///
/// `baseline_tar` must already be the sanitized archive bytes used as the
/// turn's pre-state; the post-state is whatever is currently materialized
/// on the shared volume's read-only `/workdir/new` mount.
pub async fn build_patch(
    engine: &impl ContainerEngine,
    patch_extractor_id: &str,
    baseline_tar: &[u8],
) -> Result<Option<Vec<u8>>> {
    // `put_archive` uploads into an existing directory; `/workdir/old` isn't
    // provisioned anywhere else (the diff script itself only creates
    // `$META`, and runs after this upload anyway), so create it here first.
    let mkdir_opts = ExecOpts { workdir: "/workdir", user: "root:root", env: &[] };
    let mkdir_outcome = engine
        .exec(patch_extractor_id, &["/bin/sh", "-c", "mkdir -p /workdir/old"], &mkdir_opts)
        .await?;
    if mkdir_outcome.exit_code != 0 {
        return Err(SandboxError::PatchFailed(format!(
            "failed to provision /workdir/old: {}",
            mkdir_outcome.combined_output
        )));
    }

    engine.put_archive(patch_extractor_id, &format!("{OLD_DEST}/old"), baseline_tar).await?;

    let opts = ExecOpts { workdir: "/workdir", user: "root:root", env: &[] };
    let outcome = engine
        .exec(patch_extractor_id, &["/bin/sh", "-c", GIT_DIFF_EXTRACTOR_SCRIPT], &opts)
        .await?;

    if outcome.exit_code == 0 {
        let patch = outcome.combined_output.into_bytes();
        return Ok(if patch.is_empty() { None } else { Some(patch) });
    }

    if outcome.combined_output.contains(NOTHING_TO_COMMIT_MARKER) {
        return Ok(None);
    }

    Err(SandboxError::PatchFailed(outcome.combined_output))
}
