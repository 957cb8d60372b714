// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Deletion of container resources and the background reaper.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use kubedock_k8s::{K8sError, Pod};
use tracing::{debug, error, info, instrument};

use crate::backend::{Backend, KubernetesBackend};
use crate::error::BackendError;
use crate::labels::{self, CONTAINER_ID_LABEL};
use crate::types::{CleanupResult, Container};

/// Grace period given to pods on deletion.
const DELETE_GRACE_PERIOD_SECS: u32 = 0;

fn ignore_not_found(result: Result<(), K8sError>) -> Result<(), K8sError> {
	match result {
		Err(K8sError::PodNotFound { .. }) => Ok(()),
		other => other,
	}
}

fn is_older_than(pod: &Pod, age: Duration) -> bool {
	let Some(created) = pod.metadata.creation_timestamp.as_ref() else {
		return false;
	};
	let Ok(age) = chrono::Duration::from_std(age) else {
		return false;
	};
	Utc::now().signed_duration_since(created.0) > age
}

impl KubernetesBackend {
	/// Delete the pod, services and config maps of `container` and stop its
	/// bridge tasks.
	#[instrument(skip(self, container), fields(container = %container.short_id))]
	pub(crate) async fn remove_container(&self, container: &Container) -> Result<(), BackendError> {
		let stopped = container.stop_channels().close_all();
		debug!(stopped, "Closed stop channels");

		ignore_not_found(
			self
				.client()
				.delete_pod(&container.pod_name(), self.namespace(), DELETE_GRACE_PERIOD_SECS)
				.await,
		)?;
		self.remove_dependents(&labels::container_selector(container)).await
	}

	async fn remove_dependents(&self, selector: &str) -> Result<(), BackendError> {
		let services = self.client().delete_services(self.namespace(), selector).await?;
		let config_maps = self.client().delete_config_maps(self.namespace(), selector).await?;
		debug!(selector, services, config_maps, "Deleted dependent resources");
		Ok(())
	}

	async fn remove_pods(&self, pods: Vec<Pod>) -> Result<CleanupResult, BackendError> {
		let mut result = CleanupResult::default();
		for pod in pods {
			let Some(name) = pod.metadata.name.clone() else {
				continue;
			};
			ignore_not_found(
				self
					.client()
					.delete_pod(&name, self.namespace(), DELETE_GRACE_PERIOD_SECS)
					.await,
			)?;
			if let Some(short_id) = pod.metadata.labels.as_ref().and_then(|l| l.get(CONTAINER_ID_LABEL)) {
				self
					.remove_dependents(&format!("{CONTAINER_ID_LABEL}={short_id}"))
					.await?;
			}
			result.deleted.push(name);
			result.count += 1;
		}
		Ok(result)
	}

	/// Delete every pod, service and config map matching `selector`.
	#[instrument(skip(self))]
	pub(crate) async fn remove_selected(&self, selector: &str) -> Result<CleanupResult, BackendError> {
		let pods = self.client().list_pods(self.namespace(), selector).await?;
		let result = self.remove_pods(pods).await?;
		self.remove_dependents(selector).await?;
		info!(count = result.count, "Deleted containers");
		Ok(result)
	}

	/// Delete the containers whose pod was created more than `age` ago.
	#[instrument(skip(self))]
	pub(crate) async fn remove_older_than(&self, age: Duration) -> Result<CleanupResult, BackendError> {
		let pods = self
			.client()
			.list_pods(self.namespace(), &labels::managed_selector())
			.await?;
		let expired: Vec<Pod> = pods.into_iter().filter(|p| is_older_than(p, age)).collect();
		self.remove_pods(expired).await
	}
}

/// Start the background task that periodically deletes containers older
/// than `max_age`.
///
/// The first pass runs immediately, to catch resources left behind by a
/// previous run.
pub async fn start_cleanup_task(backend: Arc<KubernetesBackend>, interval: Duration, max_age: Duration) {
	info!(
		interval_secs = interval.as_secs(),
		max_age_secs = max_age.as_secs(),
		"Starting cleanup task"
	);

	run_cleanup(&backend, max_age).await;
	loop {
		tokio::time::sleep(interval).await;
		run_cleanup(&backend, max_age).await;
	}
}

async fn run_cleanup(backend: &KubernetesBackend, max_age: Duration) {
	debug!("Running stale container cleanup");

	match backend.delete_older_than(max_age).await {
		Ok(result) => {
			if result.count > 0 {
				info!(count = result.count, "Cleanup completed, deleted stale containers");
			} else {
				debug!("Cleanup completed, no stale containers found");
			}
		}
		Err(e) => {
			error!(error = %e, "Cleanup task failed");
		}
	}
}
