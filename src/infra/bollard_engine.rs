//! Production `ContainerEngine` implementation (spec §4.2), backed by
//! `bollard`'s Docker Engine API client.

use std::collections::{BTreeMap, HashMap};

use bollard::container::{
    Config, CreateContainerOptions, DownloadFromContainerOptions, LogOutput,
    RemoveContainerOptions, UploadToContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::service::HostConfig;
use bollard::volume::{CreateVolumeOptions, RemoveVolumeOptions};
use bollard::Docker;
use futures_util::StreamExt;

use crate::application::ports::{ArchiveStream, ContainerEngine, ExecOpts, ExecOutcome, ReadOnlyMount, RunOpts};
use crate::error::{Result, SandboxError};

/// Fixed container entrypoint (spec §6): a long sleep keeps the container
/// alive between turns without requiring an idle-reaping service.
const ENTRYPOINT: [&str; 3] = ["/bin/sh", "-lc", "sleep 3600"];

pub struct BollardEngine {
    docker: Docker,
    runtime: Option<String>,
}

impl BollardEngine {
    /// Connect using the platform-default Docker socket/pipe.
    ///
    /// # Errors
    ///
    /// Returns an error if the local Docker connection cannot be established.
    pub fn connect(runtime: Option<String>) -> anyhow::Result<Self> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self { docker, runtime })
    }
}

impl ContainerEngine for BollardEngine {
    async fn ping(&self) -> bool {
        self.docker.ping().await.is_ok()
    }

    async fn pull_if_absent(&self, image: &str) -> Result<()> {
        if self.docker.inspect_image(image).await.is_ok() {
            return Ok(());
        }

        let options = CreateImageOptions::<&str> { from_image: image, ..Default::default() };
        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(event) = stream.next().await {
            let info = event?;
            if let Some(error) = info.error {
                return Err(SandboxError::EngineError(format!("pulling {image}: {error}")));
            }
        }
        Ok(())
    }

    async fn run_container(
        &self,
        image: &str,
        opts: &RunOpts<'_>,
        read_only_mount: Option<&ReadOnlyMount<'_>>,
    ) -> Result<String> {
        let mut binds = Vec::new();
        if let Some(volume) = opts.mount_repo_volume {
            binds.push(format!("{volume}:/repo:rw"));
        }
        if let Some(mount) = read_only_mount {
            binds.push(format!("{}:{}:ro", mount.volume, mount.dest));
        }

        let host_config = HostConfig {
            binds: if binds.is_empty() { None } else { Some(binds) },
            network_mode: if opts.network_enabled { None } else { Some("none".to_string()) },
            memory: opts.memory_bytes,
            nano_cpus: opts.cpus.map(|cpus| (cpus * 1_000_000_000.0) as i64),
            runtime: self.runtime.clone(),
            auto_remove: Some(true),
            ..Default::default()
        };

        let labels: HashMap<String, String> = opts.labels.clone().into_iter().collect();
        let env: Vec<String> = opts.env.iter().map(|(k, v)| format!("{k}={v}")).collect();

        let config = Config {
            image: Some(image.to_string()),
            entrypoint: Some(ENTRYPOINT.iter().map(|s| (*s).to_string()).collect()),
            user: Some(format!("{}:{}", opts.run_uid, opts.run_gid)),
            tty: Some(true),
            env: if env.is_empty() { None } else { Some(env) },
            labels: Some(labels),
            host_config: Some(host_config),
            ..Default::default()
        };

        let container = self.docker.create_container(None::<CreateContainerOptions<String>>, config).await?;
        self.docker.start_container::<String>(&container.id, None).await?;
        Ok(container.id)
    }

    async fn exec(&self, container: &str, argv: &[&str], opts: &ExecOpts<'_>) -> Result<ExecOutcome> {
        let env: Vec<String> = opts.env.iter().map(|(k, v)| format!("{k}={v}")).collect();
        let exec = self
            .docker
            .create_exec(
                container,
                CreateExecOptions {
                    cmd: Some(argv.iter().map(|s| (*s).to_string()).collect()),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    working_dir: Some(opts.workdir.to_string()),
                    user: Some(opts.user.to_string()),
                    env: Some(env),
                    ..Default::default()
                },
            )
            .await?;

        let mut combined_output = String::new();
        if let StartExecResults::Attached { mut output, .. } =
            self.docker.start_exec(&exec.id, None::<StartExecOptions>).await?
        {
            while let Some(chunk) = output.next().await {
                match chunk? {
                    LogOutput::StdOut { message } | LogOutput::StdErr { message } => {
                        combined_output.push_str(&String::from_utf8_lossy(&message));
                    }
                    LogOutput::Console { message } => {
                        combined_output.push_str(&String::from_utf8_lossy(&message));
                    }
                    LogOutput::StdIn { .. } => {}
                }
            }
        }

        let inspect = self.docker.inspect_exec(&exec.id).await?;
        let exit_code = inspect.exit_code.unwrap_or(-1);
        Ok(ExecOutcome { exit_code, combined_output })
    }

    async fn put_archive(&self, container: &str, dest: &str, tar_bytes: &[u8]) -> Result<()> {
        let options = UploadToContainerOptions::<&str> { path: dest, ..Default::default() };
        self.docker.upload_to_container(container, Some(options), tar_bytes.to_vec().into()).await?;
        Ok(())
    }

    async fn get_archive(&self, container: &str, src: &str) -> Result<ArchiveStream> {
        let options = DownloadFromContainerOptions::<&str> { path: src };
        let mut stream = self.docker.download_from_container(container, Some(options));
        let mut tar_bytes = Vec::new();
        while let Some(chunk) = stream.next().await {
            tar_bytes.extend_from_slice(&chunk?);
        }
        let size = tar_bytes.len() as u64;
        Ok(ArchiveStream { tar_bytes, size })
    }

    async fn remove_container(&self, container: &str) -> Result<()> {
        let options = RemoveContainerOptions { force: true, ..Default::default() };
        match self.docker.remove_container(container, Some(options)).await {
            Ok(()) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn create_volume(&self, name: &str, labels: &BTreeMap<String, String>) -> Result<()> {
        let labels: HashMap<String, String> = labels.clone().into_iter().collect();
        self.docker
            .create_volume(CreateVolumeOptions { name: name.to_string(), labels, ..Default::default() })
            .await?;
        Ok(())
    }

    async fn remove_volume(&self, name: &str) -> Result<()> {
        let options = RemoveVolumeOptions { force: false };
        self.docker.remove_volume(name, Some(options)).await?;
        Ok(())
    }

    async fn get_label(&self, container: &str, key: &str) -> Result<Option<String>> {
        let info = match self.docker.inspect_container(container, None).await {
            Ok(info) => info,
            Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }) => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        Ok(info.config.and_then(|c| c.labels).and_then(|labels| labels.get(key).cloned()))
    }

    async fn is_running(&self, container: &str) -> Result<bool> {
        let info = self.docker.inspect_container(container, None).await?;
        Ok(info.state.and_then(|s| s.running).unwrap_or(false))
    }

    async fn start_container(&self, container: &str) -> Result<()> {
        self.docker.start_container::<String>(container, None).await?;
        Ok(())
    }
}
