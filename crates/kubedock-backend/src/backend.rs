// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The backend contract and its kubernetes implementation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use kubedock_k8s::{ExecStdin, K8sClient, LogOptions};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::oneshot;
use tracing::{info, instrument, warn};

use crate::config::BackendConfig;
use crate::error::BackendError;
use crate::labels;
use crate::pod_spec::MAIN_CONTAINER_NAME;
use crate::types::{CleanupResult, Container, DeployState};

/// Operations a container engine front end needs from the backend.
#[async_trait]
pub trait Backend: Send + Sync {
	/// Deploy `container` and wait until it is no longer pending.
	///
	/// On a fatal failure the partially created resources are removed. The
	/// port mapping step may add entries to the container's mapped ports.
	async fn start_container(&self, container: &mut Container) -> Result<DeployState, BackendError>;

	/// Current state of a deployed container.
	async fn get_container_status(&self, container: &Container) -> Result<DeployState, BackendError>;

	/// Expose every mapped port on localhost through API server port-forwards.
	async fn create_port_forwards(&self, container: &Container);

	/// Expose every mapped port on all interfaces, proxied to the pod address.
	async fn create_reverse_proxies(&self, container: &Container);

	async fn get_pod_ip(&self, container: &Container) -> Result<String, BackendError>;

	/// Extract a tar archive into `target` inside the running container.
	async fn copy_to_container(
		&self,
		container: &Container,
		archive: ExecStdin,
		target: &str,
	) -> Result<(), BackendError>;

	/// Write a tar archive of `path` inside the running container to `writer`.
	async fn copy_from_container(
		&self,
		container: &Container,
		path: &str,
		writer: &mut (dyn AsyncWrite + Send + Unpin),
	) -> Result<(), BackendError>;

	/// Raw `st_mode` of `path` inside the running container.
	async fn get_file_mode(&self, container: &Container, path: &str) -> Result<u32, BackendError>;

	/// Run `command` in the application container, streaming its stdout to
	/// `writer`, and return its exit code.
	async fn exec_container(
		&self,
		container: &Container,
		command: Vec<String>,
		stdin: Option<ExecStdin>,
		writer: &mut (dyn AsyncWrite + Send + Unpin),
	) -> Result<i32, BackendError>;

	/// Write the container log to `writer`.
	///
	/// When following, the stream ends once the container is deleted.
	async fn get_logs(
		&self,
		container: &Container,
		follow: bool,
		tail: Option<u32>,
		writer: &mut (dyn AsyncWrite + Send + Unpin),
	) -> Result<(), BackendError>;

	/// Remove every resource of `container` and stop its bridge tasks.
	async fn delete_container(&self, container: &Container) -> Result<(), BackendError>;

	/// Remove every kubedock managed resource in the namespace.
	async fn delete_all(&self) -> Result<CleanupResult, BackendError>;

	/// Remove every resource created by the backend instance `instance_id`.
	async fn delete_with_instance_id(&self, instance_id: &str) -> Result<CleanupResult, BackendError>;

	/// Remove containers whose pod is older than `age`.
	async fn delete_older_than(&self, age: Duration) -> Result<CleanupResult, BackendError>;

	/// Receiver that resolves once the pod of `container` has been deleted.
	async fn watch_delete_container(&self, container: &Container) -> Result<oneshot::Receiver<()>, BackendError>;
}

/// Backend running containers as pods.
#[derive(Clone)]
pub struct KubernetesBackend {
	client: Arc<dyn K8sClient>,
	config: BackendConfig,
}

impl KubernetesBackend {
	pub fn new(client: Arc<dyn K8sClient>, config: BackendConfig) -> Self {
		Self { client, config }
	}

	pub fn client(&self) -> &Arc<dyn K8sClient> {
		&self.client
	}

	pub fn config(&self) -> &BackendConfig {
		&self.config
	}

	pub fn namespace(&self) -> &str {
		&self.config.namespace
	}

	async fn write_logs(
		&self,
		container: &Container,
		follow: bool,
		tail: Option<u32>,
		writer: &mut (dyn AsyncWrite + Send + Unpin),
	) -> Result<(), BackendError> {
		let opts = LogOptions {
			tail,
			timestamps: false,
			follow,
		};
		let mut stream = self
			.client
			.stream_logs(&container.pod_name(), self.namespace(), MAIN_CONTAINER_NAME, opts)
			.await?;
		let mut stop = follow.then(|| container.stop_channels().register());

		loop {
			let next = match stop.as_mut() {
				Some(stop) => tokio::select! {
					_ = stop => break,
					next = stream.next() => next,
				},
				None => stream.next().await,
			};
			match next {
				Some(chunk) => writer.write_all(&chunk?).await?,
				None => break,
			}
		}
		writer.flush().await?;
		Ok(())
	}

	/// Log the tail of the container output, for diagnosing a failed start.
	pub(crate) async fn dump_logs(&self, container: &Container) {
		let mut output = Vec::new();
		match self.write_logs(container, false, Some(100), &mut output).await {
			Ok(()) => warn!(
				container = %container.short_id,
				logs = %String::from_utf8_lossy(&output),
				"Output of failed container"
			),
			Err(e) => warn!(container = %container.short_id, error = %e, "Error reading logs of failed container"),
		}
	}
}

impl std::fmt::Debug for KubernetesBackend {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("KubernetesBackend")
			.field("config", &self.config)
			.finish_non_exhaustive()
	}
}

#[async_trait]
impl Backend for KubernetesBackend {
	#[instrument(skip(self, container), fields(container = %container.short_id, image = %container.image))]
	async fn start_container(&self, container: &mut Container) -> Result<DeployState, BackendError> {
		self.start(container).await
	}

	async fn get_container_status(&self, container: &Container) -> Result<DeployState, BackendError> {
		self.container_status(container).await
	}

	async fn create_port_forwards(&self, container: &Container) {
		for ports in [&container.host_ports, &container.mapped_ports] {
			if let Err(e) = self.forward_ports(container, ports).await {
				warn!(container = %container.short_id, error = %e, "Error creating port-forwards");
			}
		}
	}

	async fn create_reverse_proxies(&self, container: &Container) {
		for ports in [&container.host_ports, &container.mapped_ports] {
			if let Err(e) = self.proxy_ports(container, ports).await {
				warn!(container = %container.short_id, error = %e, "Error creating reverse proxies");
			}
		}
	}

	async fn get_pod_ip(&self, container: &Container) -> Result<String, BackendError> {
		self.pod_ip(container).await
	}

	#[instrument(skip(self, container, archive), fields(container = %container.short_id))]
	async fn copy_to_container(
		&self,
		container: &Container,
		archive: ExecStdin,
		target: &str,
	) -> Result<(), BackendError> {
		info!(target = %target, "Copying archive into container");
		self.copy_into(container, archive, target).await
	}

	#[instrument(skip(self, container, writer), fields(container = %container.short_id))]
	async fn copy_from_container(
		&self,
		container: &Container,
		path: &str,
		writer: &mut (dyn AsyncWrite + Send + Unpin),
	) -> Result<(), BackendError> {
		info!(path = %path, "Copying archive from container");
		self.copy_out(container, path, writer).await
	}

	async fn get_file_mode(&self, container: &Container, path: &str) -> Result<u32, BackendError> {
		self.file_mode(container, path).await
	}

	async fn exec_container(
		&self,
		container: &Container,
		command: Vec<String>,
		stdin: Option<ExecStdin>,
		writer: &mut (dyn AsyncWrite + Send + Unpin),
	) -> Result<i32, BackendError> {
		self.exec_in_container(container, command, stdin, writer).await
	}

	async fn get_logs(
		&self,
		container: &Container,
		follow: bool,
		tail: Option<u32>,
		writer: &mut (dyn AsyncWrite + Send + Unpin),
	) -> Result<(), BackendError> {
		self.write_logs(container, follow, tail, writer).await
	}

	async fn delete_container(&self, container: &Container) -> Result<(), BackendError> {
		self.remove_container(container).await
	}

	async fn delete_all(&self) -> Result<CleanupResult, BackendError> {
		self.remove_selected(&labels::managed_selector()).await
	}

	async fn delete_with_instance_id(&self, instance_id: &str) -> Result<CleanupResult, BackendError> {
		self.remove_selected(&labels::instance_selector(instance_id)).await
	}

	async fn delete_older_than(&self, age: Duration) -> Result<CleanupResult, BackendError> {
		self.remove_older_than(age).await
	}

	async fn watch_delete_container(&self, container: &Container) -> Result<oneshot::Receiver<()>, BackendError> {
		self.watch_deletion(container).await
	}
}
