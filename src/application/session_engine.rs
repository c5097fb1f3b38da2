//! Session Engine (spec §4.3) — the stateful coordinator for the three
//! core use-cases: `start_session`, `run_on_session`, `close_session`.
//!
//! Imports only from `crate::domain`, `crate::application::ports`,
//! `crate::archive`, and `crate::application::patch_builder`. Never touches
//! `crate::http` or `crate::infra` directly — those are wired together in
//! `main.rs`.

use crate::application::patch_builder;
use crate::application::ports::{ContainerEngine, ExecOpts, ReadOnlyMount, RunOpts};
use crate::archive::sanitize_archive;
use crate::domain::session::{
    executor_labels, fixed_environment, patch_extractor_labels, workdir_volume_labels, RunResult,
    Session, SessionState, LABEL_EPHEMERAL, LABEL_PATCH_EXTRACTOR_SESSION_ID, LABEL_TYPE,
    LABEL_TYPE_CMD_EXECUTOR, LABEL_WORKDIR_VOLUME, REPO_DIR, SANDBOX_HOME, WORKDIR_DIR,
    WORKDIR_VOLUME_PREFIX,
};
use crate::error::{Result, SandboxError};

/// Inputs to `start_session` (spec §4.3).
pub struct StartSessionParams {
    pub base_image: String,
    pub extract_patch: bool,
    pub ephemeral: bool,
    pub network_enabled: bool,
    pub environment: Vec<(String, String)>,
    pub memory_bytes: Option<i64>,
    pub cpus: Option<f64>,
}

/// Inputs to `run_on_session` (spec §4.3).
pub struct RunParams {
    pub commands: Vec<String>,
    pub archive: Option<Vec<u8>>,
    pub fail_fast: bool,
    pub workdir: Option<String>,
}

/// Output of `run_on_session`.
pub struct RunOutcome {
    pub results: Vec<RunResult>,
    pub patch: Option<Vec<u8>>,
}

/// Provision a new session's containers (and, if patching is requested, its
/// shared workspace volume) and return the executor container id as the
/// session id.
///
/// # Errors
///
/// Returns [`SandboxError::InvalidInput`] for a missing base image, and
/// [`SandboxError::EngineError`]/[`SandboxError::EngineUnavailable`] for
/// engine-side failures.
pub async fn start_session(
    engine: &impl ContainerEngine,
    config: &crate::config::Settings,
    params: StartSessionParams,
) -> Result<String> {
    if params.base_image.trim().is_empty() {
        return Err(SandboxError::InvalidInput("base_image must not be empty".to_string()));
    }
    if !engine.ping().await {
        return Err(SandboxError::EngineUnavailable);
    }

    let (patch_extractor_id, workdir_volume) = if params.extract_patch {
        let volume = format!("{WORKDIR_VOLUME_PREFIX}{}", uuid::Uuid::new_v4());
        engine.create_volume(&volume, &workdir_volume_labels()).await?;

        engine.pull_if_absent(&config.git_image).await?;
        let patch_opts = RunOpts {
            labels: patch_extractor_labels(),
            network_enabled: false,
            mount_repo_volume: None,
            memory_bytes: None,
            cpus: None,
            run_uid: config.run_uid,
            run_gid: config.run_gid,
            env: &[],
        };
        let mount = ReadOnlyMount { volume: &volume, dest: "/workdir/new" };
        let patch_id = engine.run_container(&config.git_image, &patch_opts, Some(&mount)).await?;
        (Some(patch_id), Some(volume))
    } else {
        (None, None)
    };

    engine.pull_if_absent(&params.base_image).await?;
    let labels = executor_labels(patch_extractor_id.as_deref(), workdir_volume.as_deref(), params.ephemeral);
    let executor_opts = RunOpts {
        labels,
        network_enabled: params.network_enabled,
        mount_repo_volume: workdir_volume.as_deref(),
        memory_bytes: params.memory_bytes,
        cpus: params.cpus,
        run_uid: config.run_uid,
        run_gid: config.run_gid,
        env: &params.environment,
    };
    let executor_id = engine.run_container(&params.base_image, &executor_opts, None).await?;

    provision_canonical_dirs(engine, &executor_id, config.run_uid, config.run_gid).await?;

    Ok(executor_id)
}

/// Create and chown `/repo`, `/workdir`, and the sandbox HOME inside the
/// executor — the step that takes a session from `Created` to `Ready`.
async fn provision_canonical_dirs(
    engine: &impl ContainerEngine,
    executor_id: &str,
    run_uid: u32,
    run_gid: u32,
) -> Result<()> {
    let owner = format!("{run_uid}:{run_gid}");
    let script = format!(
        "mkdir -p {REPO_DIR} /workdir {SANDBOX_HOME} && chown -R {owner} {REPO_DIR} /workdir {SANDBOX_HOME}"
    );
    let opts = ExecOpts { workdir: "/", user: "root:root", env: &[] };
    let outcome = engine.exec(executor_id, &["/bin/sh", "-c", &script], &opts).await?;
    if outcome.exit_code != 0 {
        return Err(SandboxError::EngineError(format!(
            "failed to provision canonical directories: {}",
            outcome.combined_output
        )));
    }
    Ok(())
}

/// Reconstruct a [`Session`] purely from the executor container's labels —
/// there is no in-memory registry (spec §4.5, §9 "Polymorphism").
async fn load_session(engine: &impl ContainerEngine, session_id: &str) -> Result<Session> {
    let ty = engine.get_label(session_id, LABEL_TYPE).await?;
    if ty.as_deref() != Some(LABEL_TYPE_CMD_EXECUTOR) {
        return Err(SandboxError::SessionNotFound(session_id.to_string()));
    }
    let patch_extractor_id = engine.get_label(session_id, LABEL_PATCH_EXTRACTOR_SESSION_ID).await?;
    let workdir_volume = engine.get_label(session_id, LABEL_WORKDIR_VOLUME).await?;
    let ephemeral = engine.get_label(session_id, LABEL_EPHEMERAL).await?.is_some();

    Ok(Session {
        executor_id: session_id.to_string(),
        patch_extractor_id,
        workdir_volume,
        ephemeral,
        network_enabled: true,
        state: SessionState::Ready,
    })
}

/// Resolve `session_id`, recovering once from a stopped container via
/// restart before giving up with `SESSION_NOT_FOUND` (spec §4.3, §7).
async fn resolve_running_session(engine: &impl ContainerEngine, session_id: &str) -> Result<Session> {
    let session = load_session(engine, session_id).await?;

    if engine.is_running(session_id).await? {
        return Ok(session);
    }

    engine.start_container(session_id).await.map_err(|_| SandboxError::SessionNotFound(session_id.to_string()))?;
    if engine.is_running(session_id).await? {
        Ok(session)
    } else {
        Err(SandboxError::SessionNotFound(session_id.to_string()))
    }
}

/// Run `params.commands` in order against `session_id`, optionally
/// extracting an archive first and computing a patch afterward.
///
/// # Errors
///
/// Returns [`SandboxError::SessionNotFound`] if the container cannot be
/// recovered, [`SandboxError::InvalidInput`] for a malformed archive, and
/// [`SandboxError::PatchFailed`] if patch extraction fails for a non-benign
/// reason.
pub async fn run_on_session(
    engine: &impl ContainerEngine,
    config: &crate::config::Settings,
    session_id: &str,
    params: RunParams,
) -> Result<RunOutcome> {
    let session = resolve_running_session(engine, session_id).await?;

    if let Some(archive) = &params.archive {
        extract_archive(engine, session_id, &session, archive, config.run_uid, config.run_gid).await?;
    }

    let workdir = resolve_workdir(params.workdir.as_deref())?;
    let user = format!("{}:{}", config.run_uid, config.run_gid);
    let env = fixed_environment();
    let exec_opts = ExecOpts { workdir: &workdir, user: &user, env: &env };

    let mut results = Vec::with_capacity(params.commands.len());
    for command in &params.commands {
        let outcome = engine.exec(session_id, &["/bin/sh", "-c", command], &exec_opts).await?;
        let exit_code = outcome.exit_code;
        results.push(RunResult {
            command: command.clone(),
            output: outcome.combined_output,
            exit_code,
            workdir: workdir.to_string(),
        });
        if params.fail_fast && exit_code != 0 {
            break;
        }
    }

    let patch = match (session.patching_enabled(), session.patch_extractor_id.as_deref(), &params.archive) {
        (true, Some(patch_extractor_id), Some(archive)) => {
            let baseline = sanitize_archive(archive, config.run_uid, config.run_gid)?;
            patch_builder::build_patch(engine, patch_extractor_id, &baseline).await?
        }
        _ => None,
    };

    Ok(RunOutcome { results, patch })
}

/// Resolve a caller-supplied `workdir` override per spec §4.3 "Path
/// resolution": relative paths resolve under `/repo`; absolute paths are
/// honored as-is but must lie under `/repo` or `/workdir` — anywhere else
/// (including root) is rejected.
fn resolve_workdir(workdir: Option<&str>) -> Result<String> {
    let Some(raw) = workdir else {
        return Ok(REPO_DIR.to_string());
    };
    if raw.is_empty() {
        return Ok(REPO_DIR.to_string());
    }

    if !raw.starts_with('/') {
        return Ok(format!("{REPO_DIR}/{raw}"));
    }

    let under_repo = raw == REPO_DIR || raw.starts_with(&format!("{REPO_DIR}/"));
    let under_workdir = raw == WORKDIR_DIR || raw.starts_with(&format!("{WORKDIR_DIR}/"));
    if under_repo || under_workdir {
        Ok(raw.to_string())
    } else {
        Err(SandboxError::InvalidInput(format!(
            "workdir must be relative or lie under {REPO_DIR} or {WORKDIR_DIR}: {raw}"
        )))
    }
}

/// Sanitize and extract `archive` under `/repo`, purging it first when the
/// session is ephemeral, then re-normalize ownership/permissions.
async fn extract_archive(
    engine: &impl ContainerEngine,
    session_id: &str,
    session: &Session,
    archive: &[u8],
    run_uid: u32,
    run_gid: u32,
) -> Result<()> {
    let sanitized = sanitize_archive(archive, run_uid, run_gid)?;

    if session.ephemeral {
        let purge_opts = ExecOpts { workdir: "/", user: "root:root", env: &[] };
        let purge_script = format!("find {REPO_DIR} -mindepth 1 -delete");
        let outcome = engine.exec(session_id, &["/bin/sh", "-c", &purge_script], &purge_opts).await?;
        if outcome.exit_code != 0 {
            return Err(SandboxError::EngineError(format!(
                "failed to purge ephemeral workspace: {}",
                outcome.combined_output
            )));
        }
    }

    engine.put_archive(session_id, REPO_DIR, &sanitized).await?;

    let owner = format!("{run_uid}:{run_gid}");
    let normalize_script = format!("chmod -R a+rX,u+w {REPO_DIR} && chown -R {owner} {REPO_DIR}");
    let normalize_opts = ExecOpts { workdir: "/", user: "root:root", env: &[] };
    let outcome = engine.exec(session_id, &["/bin/sh", "-c", &normalize_script], &normalize_opts).await?;
    if outcome.exit_code != 0 {
        return Err(SandboxError::EngineError(format!(
            "failed to normalize extracted archive: {}",
            outcome.combined_output
        )));
    }

    Ok(())
}

/// Tear down a session's containers and, if recorded, its workspace volume.
/// Idempotent: closing an already-missing session returns success.
///
/// # Errors
///
/// Only propagates genuine engine errors; `NotFound`/`VOLUME_IN_USE` on
/// volume removal are logged and swallowed (spec §4.3, §7).
pub async fn close_session(engine: &impl ContainerEngine, session_id: &str) -> Result<()> {
    let session = match load_session(engine, session_id).await {
        Ok(s) => s,
        Err(SandboxError::SessionNotFound(_)) => return Ok(()),
        Err(e) => return Err(e),
    };

    if let Some(patch_extractor_id) = &session.patch_extractor_id {
        engine.remove_container(patch_extractor_id).await?;
    }
    engine.remove_container(session_id).await?;

    if let Some(volume) = &session.workdir_volume {
        if let Err(err) = engine.remove_volume(volume).await {
            tracing::warn!(volume = %volume, error = %err, "failed to remove workspace volume, leaving for GC");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::BTreeMap;

    use super::*;
    use crate::application::ports::{ArchiveStream, ExecOutcome};
    use crate::config::{Environment, Runtime, Settings};

    fn test_settings() -> Settings {
        Settings {
            host: std::net::IpAddr::from([0, 0, 0, 0]),
            port: 8000,
            environment: Environment::Local,
            log_level: "info".to_string(),
            api_key: "secret".to_string(),
            secrets_dir: "/run/secrets".to_string(),
            runtime: Runtime::Runc,
            run_uid: 1000,
            run_gid: 1000,
            git_image: "alpine/git:2.49.1".to_string(),
        }
    }

    #[derive(Default)]
    struct FakeEngine {
        labels: RefCell<BTreeMap<String, BTreeMap<String, String>>>,
        running: RefCell<BTreeMap<String, bool>>,
        removed_containers: RefCell<Vec<String>>,
        removed_volumes: RefCell<Vec<String>>,
        next_container_id: RefCell<u32>,
        exec_script: RefCell<Vec<String>>,
    }

    impl ContainerEngine for FakeEngine {
        async fn ping(&self) -> bool {
            true
        }

        async fn pull_if_absent(&self, _image: &str) -> Result<()> {
            Ok(())
        }

        async fn run_container(
            &self,
            _image: &str,
            opts: &RunOpts<'_>,
            _read_only_mount: Option<&ReadOnlyMount<'_>>,
        ) -> Result<String> {
            let mut next = self.next_container_id.borrow_mut();
            *next += 1;
            let id = format!("container-{next}");
            self.labels.borrow_mut().insert(id.clone(), opts.labels.clone());
            self.running.borrow_mut().insert(id.clone(), true);
            Ok(id)
        }

        async fn exec(&self, _container: &str, argv: &[&str], _opts: &ExecOpts<'_>) -> Result<ExecOutcome> {
            if let Some(script) = argv.last() {
                self.exec_script.borrow_mut().push((*script).to_string());
            }
            Ok(ExecOutcome { exit_code: 0, combined_output: String::new() })
        }

        async fn put_archive(&self, _container: &str, _dest: &str, _tar_bytes: &[u8]) -> Result<()> {
            Ok(())
        }

        async fn get_archive(&self, _container: &str, _src: &str) -> Result<ArchiveStream> {
            Ok(ArchiveStream { tar_bytes: Vec::new(), size: 0 })
        }

        async fn remove_container(&self, container: &str) -> Result<()> {
            self.removed_containers.borrow_mut().push(container.to_string());
            Ok(())
        }

        async fn create_volume(&self, _name: &str, _labels: &BTreeMap<String, String>) -> Result<()> {
            Ok(())
        }

        async fn remove_volume(&self, name: &str) -> Result<()> {
            self.removed_volumes.borrow_mut().push(name.to_string());
            Ok(())
        }

        async fn get_label(&self, container: &str, key: &str) -> Result<Option<String>> {
            Ok(self.labels.borrow().get(container).and_then(|m| m.get(key).cloned()))
        }

        async fn is_running(&self, container: &str) -> Result<bool> {
            Ok(*self.running.borrow().get(container).unwrap_or(&false))
        }

        async fn start_container(&self, container: &str) -> Result<()> {
            self.running.borrow_mut().insert(container.to_string(), true);
            Ok(())
        }
    }

    #[tokio::test]
    async fn start_session_without_patching_skips_volume_and_extractor() {
        let engine = FakeEngine::default();
        let config = test_settings();
        let params = StartSessionParams {
            base_image: "alpine:latest".to_string(),
            extract_patch: false,
            ephemeral: false,
            network_enabled: true,
            environment: Vec::new(),
            memory_bytes: None,
            cpus: None,
        };
        let session_id = start_session(&engine, &config, params).await.unwrap();
        assert_eq!(session_id, "container-1");
        assert!(engine.labels.borrow()[&session_id].get(LABEL_WORKDIR_VOLUME).is_none());
    }

    #[tokio::test]
    async fn start_session_with_patching_boots_extractor_first() {
        let engine = FakeEngine::default();
        let config = test_settings();
        let params = StartSessionParams {
            base_image: "alpine:latest".to_string(),
            extract_patch: true,
            ephemeral: false,
            network_enabled: true,
            environment: Vec::new(),
            memory_bytes: None,
            cpus: None,
        };
        let session_id = start_session(&engine, &config, params).await.unwrap();
        assert_eq!(session_id, "container-2", "patch-extractor should be container-1");
        let labels = engine.labels.borrow();
        assert!(labels[&session_id].contains_key(LABEL_PATCH_EXTRACTOR_SESSION_ID));
        assert!(labels[&session_id].contains_key(LABEL_WORKDIR_VOLUME));
    }

    #[tokio::test]
    async fn start_session_rejects_empty_base_image() {
        let engine = FakeEngine::default();
        let config = test_settings();
        let params = StartSessionParams {
            base_image: String::new(),
            extract_patch: false,
            ephemeral: false,
            network_enabled: true,
            environment: Vec::new(),
            memory_bytes: None,
            cpus: None,
        };
        let err = start_session(&engine, &config, params).await.unwrap_err();
        assert!(matches!(err, SandboxError::InvalidInput(_)));
    }

    #[test]
    fn resolve_workdir_defaults_to_repo() {
        assert_eq!(resolve_workdir(None).unwrap(), REPO_DIR);
        assert_eq!(resolve_workdir(Some("")).unwrap(), REPO_DIR);
    }

    #[test]
    fn resolve_workdir_joins_relative_paths_under_repo() {
        assert_eq!(resolve_workdir(Some("src")).unwrap(), format!("{REPO_DIR}/src"));
        assert_eq!(resolve_workdir(Some("a/b")).unwrap(), format!("{REPO_DIR}/a/b"));
    }

    #[test]
    fn resolve_workdir_honors_absolute_paths_under_repo_or_workdir() {
        assert_eq!(resolve_workdir(Some("/repo/nested")).unwrap(), "/repo/nested");
        assert_eq!(resolve_workdir(Some("/workdir")).unwrap(), "/workdir");
    }

    #[test]
    fn resolve_workdir_rejects_paths_outside_repo_and_workdir() {
        let err = resolve_workdir(Some("/etc")).unwrap_err();
        assert!(matches!(err, SandboxError::InvalidInput(_)));
        let err = resolve_workdir(Some("/")).unwrap_err();
        assert!(matches!(err, SandboxError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn close_session_is_idempotent() {
        let engine = FakeEngine::default();
        close_session(&engine, "never-existed").await.unwrap();
        close_session(&engine, "never-existed").await.unwrap();
    }

    #[tokio::test]
    async fn run_on_session_stops_after_first_failure_when_fail_fast() {
        #[derive(Default)]
        struct FailingEngine {
            inner: FakeEngine,
            command_exec_count: RefCell<u32>,
        }

        impl ContainerEngine for FailingEngine {
            async fn ping(&self) -> bool {
                self.inner.ping().await
            }
            async fn pull_if_absent(&self, image: &str) -> Result<()> {
                self.inner.pull_if_absent(image).await
            }
            async fn run_container(
                &self,
                image: &str,
                opts: &RunOpts<'_>,
                m: Option<&ReadOnlyMount<'_>>,
            ) -> Result<String> {
                self.inner.run_container(image, opts, m).await
            }
            async fn exec(&self, container: &str, argv: &[&str], opts: &ExecOpts<'_>) -> Result<ExecOutcome> {
                self.inner.exec(container, argv, opts).await?;
                // Only caller-submitted commands run in `/repo`; the directory
                // provisioning step runs in `/` and must not count.
                if opts.workdir != "/" {
                    let mut count = self.command_exec_count.borrow_mut();
                    *count += 1;
                    return Ok(ExecOutcome { exit_code: i64::from(*count == 2), combined_output: String::new() });
                }
                Ok(ExecOutcome { exit_code: 0, combined_output: String::new() })
            }
            async fn put_archive(&self, c: &str, d: &str, t: &[u8]) -> Result<()> {
                self.inner.put_archive(c, d, t).await
            }
            async fn get_archive(&self, c: &str, s: &str) -> Result<ArchiveStream> {
                self.inner.get_archive(c, s).await
            }
            async fn remove_container(&self, c: &str) -> Result<()> {
                self.inner.remove_container(c).await
            }
            async fn create_volume(&self, n: &str, l: &BTreeMap<String, String>) -> Result<()> {
                self.inner.create_volume(n, l).await
            }
            async fn remove_volume(&self, n: &str) -> Result<()> {
                self.inner.remove_volume(n).await
            }
            async fn get_label(&self, c: &str, k: &str) -> Result<Option<String>> {
                self.inner.get_label(c, k).await
            }
            async fn is_running(&self, c: &str) -> Result<bool> {
                self.inner.is_running(c).await
            }
            async fn start_container(&self, c: &str) -> Result<()> {
                self.inner.start_container(c).await
            }
        }

        let engine = FailingEngine::default();
        let config = test_settings();
        let start_params = StartSessionParams {
            base_image: "alpine:latest".to_string(),
            extract_patch: false,
            ephemeral: false,
            network_enabled: true,
            environment: Vec::new(),
            memory_bytes: None,
            cpus: None,
        };
        let session_id = start_session(&engine, &config, start_params).await.unwrap();

        let run_params = RunParams {
            commands: vec!["echo a".to_string(), "exit 1".to_string(), "echo c".to_string()],
            archive: None,
            fail_fast: true,
            workdir: None,
        };
        let outcome = run_on_session(&engine, &config, &session_id, run_params).await.unwrap();
        assert_eq!(outcome.results.len(), 2);
        assert_eq!(outcome.results[1].exit_code, 1);
    }
}
