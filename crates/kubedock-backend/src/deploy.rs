// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Staged deployment of a container as a pod.

use tracing::{debug, info, warn};

use crate::backend::KubernetesBackend;
use crate::error::BackendError;
use crate::network::map_container_tcp_ports;
use crate::pod_spec;
use crate::types::{Container, DeployState};

impl KubernetesBackend {
	/// Deploy `container`, removing what was created when a fatal stage fails.
	pub(crate) async fn start(&self, container: &mut Container) -> Result<DeployState, BackendError> {
		match self.deploy(container).await {
			Ok(state) => {
				info!(container = %container.short_id, state = %state, "Container started");
				Ok(state)
			}
			Err(e) => {
				warn!(container = %container.short_id, error = %e, "Error starting container");
				if e.removes_pod() {
					if self.config().dump_logs_on_failure {
						self.dump_logs(container).await;
					}
					if let Err(cleanup) = self.remove_container(container).await {
						debug!(container = %container.short_id, error = %cleanup, "Error removing failed container");
					}
				}
				Err(e)
			}
		}
	}

	async fn deploy(&self, container: &mut Container) -> Result<DeployState, BackendError> {
		let mut pod = pod_spec::build_pod(container, self.config())?;

		if container.has_volumes() {
			self.add_volumes(container, &mut pod).await?;
		}

		self.client().create_pod(self.namespace(), pod).await?;
		info!(container = %container.short_id, pod = %container.pod_name(), "Created pod");

		if container.has_volumes() {
			self.copy_volume_folders(container).await?;
		}

		let state = self
			.wait_ready_state(container, self.config().timeout_secs)
			.await?;

		map_container_tcp_ports(container)?;
		self.create_services(container).await?;

		Ok(state)
	}
}
