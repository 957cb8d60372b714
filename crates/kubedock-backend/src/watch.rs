// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use kubedock_k8s::K8sError;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::backend::KubernetesBackend;
use crate::error::BackendError;
use crate::status::POLL_INTERVAL;
use crate::types::Container;

impl KubernetesBackend {
	/// Resolve the returned receiver once the pod of `container` is gone,
	/// or the container is deleted through this backend.
	pub(crate) async fn watch_deletion(&self, container: &Container) -> Result<oneshot::Receiver<()>, BackendError> {
		let pod_name = container.pod_name();
		self.client().get_pod(&pod_name, self.namespace()).await?;

		let (mut tx, rx) = oneshot::channel();
		let mut stop = container.stop_channels().register();
		let client = Arc::clone(self.client());
		let namespace = self.namespace().to_string();

		tokio::spawn(async move {
			loop {
				tokio::select! {
					_ = &mut stop => break,
					_ = tx.closed() => return,
					_ = tokio::time::sleep(POLL_INTERVAL) => {}
				}
				match client.get_pod(&pod_name, &namespace).await {
					Err(K8sError::PodNotFound { .. }) => break,
					Err(e) => warn!(pod = %pod_name, error = %e, "Error watching pod"),
					Ok(_) => {}
				}
			}
			debug!(pod = %pod_name, "Pod deleted");
			let _ = tx.send(());
		});
		Ok(rx)
	}
}
