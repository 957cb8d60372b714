// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Exposure of pod ports on the local host.

use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use crate::backend::KubernetesBackend;
use crate::error::BackendError;
use crate::proxy::{self, ForwardTarget, ProxyTarget, RETRY_DELAY};
use crate::types::Container;

/// External to internal pairs of a port table that should be exposed.
///
/// Negative external ports are not exposed; ports outside the u16 range
/// are skipped with a warning.
pub fn exposed_mappings(ports: &HashMap<i32, i32>) -> Vec<(u16, u16)> {
	ports
		.iter()
		.filter(|(src, _)| **src >= 0)
		.filter_map(|(src, dst)| match (u16::try_from(*src), u16::try_from(*dst)) {
			(Ok(src), Ok(dst)) => Some((src, dst)),
			_ => {
				warn!(src, dst, "Skipping port mapping outside the valid port range");
				None
			}
		})
		.collect()
}

/// Assign a free local port to every exposed port that is not mapped yet,
/// when the container publishes all its ports.
pub fn map_container_tcp_ports(container: &mut Container) -> Result<(), BackendError> {
	if !container.publish_all {
		return Ok(());
	}

	let mapped: HashSet<i32> = container
		.host_ports
		.iter()
		.chain(container.mapped_ports.iter())
		.filter(|(src, _)| **src >= 0)
		.map(|(_, dst)| *dst)
		.collect();

	let unmapped: Vec<i32> = container
		.exposed_ports
		.iter()
		.filter(|port| !mapped.contains(port))
		.copied()
		.collect::<HashSet<_>>()
		.into_iter()
		.collect();

	for port in unmapped {
		let local = free_local_port()?;
		info!(container = %container.short_id, local, port, "Mapped exposed port");
		container.mapped_ports.insert(i32::from(local), port);
	}
	Ok(())
}

fn free_local_port() -> Result<u16, BackendError> {
	let listener =
		std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).map_err(BackendError::PortAllocation)?;
	let port = listener
		.local_addr()
		.map_err(BackendError::PortAllocation)?
		.port();
	Ok(port)
}

impl KubernetesBackend {
	/// IP address assigned to the pod of `container`.
	pub(crate) async fn pod_ip(&self, container: &Container) -> Result<String, BackendError> {
		let pod_name = container.pod_name();
		let pod = self.client().get_pod(&pod_name, self.namespace()).await?;
		pod
			.status
			.and_then(|s| s.pod_ip)
			.filter(|ip| !ip.is_empty())
			.ok_or(BackendError::NoPodAddress { pod: pod_name })
	}

	/// Start a port-forward task for every exposed pair of `ports`.
	///
	/// Returns the number of tasks spawned. The tasks are not awaited.
	pub(crate) async fn forward_ports(
		&self,
		container: &Container,
		ports: &HashMap<i32, i32>,
	) -> Result<usize, BackendError> {
		let pod_name = container.pod_name();
		self.client().get_pod(&pod_name, self.namespace()).await?;

		let mappings = exposed_mappings(ports);
		for (local_port, remote_port) in &mappings {
			let target = ForwardTarget {
				namespace: self.namespace().to_string(),
				pod: pod_name.clone(),
				local_port: *local_port,
				remote_port: *remote_port,
			};
			info!(pod = %pod_name, local = local_port, remote = remote_port, "Port-forward");

			let stop = container.stop_channels().register();
			let client = Arc::clone(self.client());
			tokio::spawn(async move {
				let port = target.local_port;
				if let Err(e) = proxy::forward_to_pod(client, target, stop).await {
					error!(port, error = %e, "Port-forward failed");
				}
			});
		}
		Ok(mappings.len())
	}

	/// Start a reverse proxy task for every exposed pair of `ports`, and wait
	/// until each of them is listening or has given up.
	///
	/// Returns the number of tasks spawned.
	pub(crate) async fn proxy_ports(
		&self,
		container: &Container,
		ports: &HashMap<i32, i32>,
	) -> Result<usize, BackendError> {
		let pod_name = container.pod_name();
		let address = self.pod_ip(container).await?;
		let ip: IpAddr = address.parse().map_err(|_| BackendError::InvalidPodAddress {
			pod: pod_name.clone(),
			address: address.clone(),
		})?;

		let mappings = exposed_mappings(ports);
		let mut started = Vec::with_capacity(mappings.len());
		for (local_port, remote_port) in &mappings {
			let target = ProxyTarget {
				local_port: *local_port,
				remote: SocketAddr::new(ip, *remote_port),
				max_retry: self.config().reverse_proxy_max_retry,
				retry_delay: RETRY_DELAY,
			};
			info!(pod = %pod_name, local = local_port, remote = %target.remote, "Reverse proxy");

			let stop = container.stop_channels().register();
			let (ready_tx, ready_rx) = oneshot::channel();
			tokio::spawn(async move {
				let port = target.local_port;
				if let Err(e) = proxy::reverse_proxy(target, stop, ready_tx).await {
					error!(port, error = %e, "Reverse proxy failed");
				}
			});
			started.push(ready_rx);
		}

		join_all(started).await;
		Ok(mappings.len())
	}
}
