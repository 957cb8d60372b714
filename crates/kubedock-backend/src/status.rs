// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Pod status classification and readiness polling.

use std::time::Duration;

use kubedock_k8s::{ContainerStatus, Pod};
use tracing::{debug, instrument};

use crate::backend::KubernetesBackend;
use crate::error::BackendError;
use crate::types::{Container, DeployState};

/// Interval between two status polls.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

const COMPLETED_REASON: &str = "Completed";
const IMAGE_PULL_BACK_OFF: &str = "ImagePullBackOff";
const FAILED_PHASE: &str = "Failed";

fn completed(status: &ContainerStatus) -> bool {
	let reason = |state: Option<&kubedock_k8s::ContainerState>| {
		state
			.and_then(|s| s.terminated.as_ref())
			.and_then(|t| t.reason.as_deref())
			== Some(COMPLETED_REASON)
	};
	reason(status.state.as_ref()) || reason(status.last_state.as_ref())
}

fn pod_failed(pod: &Pod) -> bool {
	pod
		.status
		.as_ref()
		.and_then(|s| s.phase.as_deref())
		== Some(FAILED_PHASE)
}

/// Derive the deploy state from a pod.
///
/// Application container statuses are checked in order, and for each one
/// the first matching rule decides: a `Completed` termination, any restart,
/// an image pull back-off, a running state. Without a decision the pod
/// phase is used.
pub fn classify_pod(pod: &Pod) -> Result<DeployState, BackendError> {
	let statuses = pod
		.status
		.as_ref()
		.and_then(|s| s.container_statuses.as_deref())
		.unwrap_or_default();

	for status in statuses {
		if completed(status) {
			return Ok(DeployState::Completed);
		}
		if status.restart_count > 0 {
			return Err(BackendError::failed("failed to start container"));
		}
		let waiting_reason = status
			.state
			.as_ref()
			.and_then(|s| s.waiting.as_ref())
			.and_then(|w| w.reason.as_deref());
		if waiting_reason == Some(IMAGE_PULL_BACK_OFF) {
			return Err(BackendError::failed("failed to start container; error pulling image"));
		}
		if status.state.as_ref().and_then(|s| s.running.as_ref()).is_some() {
			return Ok(DeployState::Running);
		}
	}

	if pod_failed(pod) {
		return Err(BackendError::failed("failed to start container"));
	}
	Ok(DeployState::Pending)
}

/// Whether the named init container is running; errors when the pod failed.
pub fn init_container_running(pod: &Pod, name: &str) -> Result<bool, BackendError> {
	let running = pod
		.status
		.as_ref()
		.and_then(|s| s.init_container_statuses.as_deref())
		.unwrap_or_default()
		.iter()
		.filter(|s| s.name == name)
		.any(|s| s.state.as_ref().and_then(|st| st.running.as_ref()).is_some());

	if running {
		return Ok(true);
	}
	if pod_failed(pod) {
		return Err(BackendError::failed("failed to start container"));
	}
	Ok(false)
}

impl KubernetesBackend {
	/// Look up the pod of `container` and classify it.
	pub(crate) async fn container_status(&self, container: &Container) -> Result<DeployState, BackendError> {
		let pod = self
			.client()
			.get_pod(&container.pod_name(), self.namespace())
			.await?;
		classify_pod(&pod)
	}

	/// Poll until the container leaves `Pending`, at most `timeout_secs` polls.
	#[instrument(skip(self, container), fields(container = %container.short_id))]
	pub(crate) async fn wait_ready_state(
		&self,
		container: &Container,
		timeout_secs: u64,
	) -> Result<DeployState, BackendError> {
		for _ in 0..timeout_secs {
			let state = self.container_status(container).await?;
			if state != DeployState::Pending {
				return Ok(state);
			}
			tokio::time::sleep(POLL_INTERVAL).await;
		}
		Err(BackendError::timeout("starting container"))
	}

	/// Poll until the init container `name` runs, at most `timeout_secs` polls.
	#[instrument(skip(self, container), fields(container = %container.short_id))]
	pub(crate) async fn wait_init_container_running(
		&self,
		container: &Container,
		name: &str,
		timeout_secs: u64,
	) -> Result<(), BackendError> {
		for _ in 0..timeout_secs {
			let pod = self
				.client()
				.get_pod(&container.pod_name(), self.namespace())
				.await?;
			if init_container_running(&pod, name)? {
				debug!(init_container = name, "Init container running");
				return Ok(());
			}
			tokio::time::sleep(POLL_INTERVAL).await;
		}
		Err(BackendError::timeout(&format!("waiting for init container {name}")))
	}
}
