// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Listener tasks backing port-forwards and reverse proxies.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use kubedock_k8s::K8sClient;
use tokio::io::copy_bidirectional;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::BackendError;

/// Delay between two attempts to open a reverse proxy listener.
pub const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Target of a port-forward: an internal port of a pod reached through the API server.
#[derive(Debug, Clone)]
pub struct ForwardTarget {
	pub namespace: String,
	pub pod: String,
	pub local_port: u16,
	pub remote_port: u16,
}

/// The accepted connection, or `None` after logging a failed accept.
fn accepted_or_logged<T>(accepted: std::io::Result<T>, port: u16) -> Option<T> {
	match accepted {
		Ok(accepted) => Some(accepted),
		Err(e) => {
			warn!(port, error = %e, "Error accepting port-forward connection");
			None
		}
	}
}

/// Accept connections on `127.0.0.1:<local_port>` and tunnel each of them to
/// the pod until `stop` fires.
pub async fn forward_to_pod(
	client: Arc<dyn K8sClient>,
	target: ForwardTarget,
	mut stop: oneshot::Receiver<()>,
) -> Result<(), BackendError> {
	let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, target.local_port))
		.await
		.map_err(|source| BackendError::Listen {
			port: target.local_port,
			source,
		})?;
	info!(
		pod = %target.pod,
		local = target.local_port,
		remote = target.remote_port,
		"Port-forward listening"
	);

	let mut connections = JoinSet::new();
	loop {
		tokio::select! {
			_ = &mut stop => {
				debug!(port = target.local_port, "Port-forward stopped");
				return Ok(());
			}
			accepted = listener.accept() => {
				let Some((mut inbound, peer)) = accepted_or_logged(accepted, target.local_port) else {
					continue;
				};
				while connections.try_join_next().is_some() {}

				let client = Arc::clone(&client);
				let target = target.clone();
				connections.spawn(async move {
					let mut upstream = match client
						.port_forward(&target.pod, &target.namespace, target.remote_port)
						.await
					{
						Ok(upstream) => upstream,
						Err(e) => {
							warn!(pod = %target.pod, port = target.remote_port, error = %e, "Error opening port-forward");
							return;
						}
					};
					if let Err(e) = copy_bidirectional(&mut inbound, &mut upstream).await {
						debug!(peer = %peer, error = %e, "Port-forward connection closed");
					}
				});
			}
		}
	}
}

/// A reverse proxy from a local port to an address inside the cluster.
#[derive(Debug, Clone)]
pub struct ProxyTarget {
	pub local_port: u16,
	pub remote: SocketAddr,
	pub max_retry: u32,
	pub retry_delay: Duration,
}

/// Serve a reverse proxy on `0.0.0.0:<local_port>` until `stop` fires.
///
/// `ready` is signalled once the listener is bound. Failing to listen, or a
/// listener that breaks, is retried up to `max_retry` attempts.
pub async fn reverse_proxy(
	target: ProxyTarget,
	mut stop: oneshot::Receiver<()>,
	ready: oneshot::Sender<()>,
) -> Result<(), BackendError> {
	let mut ready = Some(ready);
	for attempt in 1..=target.max_retry {
		match serve(&target, &mut stop, &mut ready).await {
			Ok(()) => return Ok(()),
			Err(e) => {
				warn!(port = target.local_port, attempt, error = %e, "Reverse proxy failed");
			}
		}
		if attempt == target.max_retry {
			break;
		}
		tokio::select! {
			_ = &mut stop => return Ok(()),
			_ = tokio::time::sleep(target.retry_delay) => {}
		}
	}
	Err(BackendError::ProxyRetriesExhausted {
		port: target.local_port,
		attempts: target.max_retry,
	})
}

async fn serve(
	target: &ProxyTarget,
	stop: &mut oneshot::Receiver<()>,
	ready: &mut Option<oneshot::Sender<()>>,
) -> Result<(), BackendError> {
	let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, target.local_port))
		.await
		.map_err(|source| BackendError::Listen {
			port: target.local_port,
			source,
		})?;
	if let Some(tx) = ready.take() {
		let _ = tx.send(());
	}
	info!(local = target.local_port, remote = %target.remote, "Reverse proxy listening");

	let mut connections = JoinSet::new();
	loop {
		tokio::select! {
			_ = &mut *stop => {
				debug!(port = target.local_port, "Reverse proxy stopped");
				return Ok(());
			}
			accepted = listener.accept() => {
				let (mut inbound, peer) = accepted?;
				while connections.try_join_next().is_some() {}

				let remote = target.remote;
				connections.spawn(async move {
					match TcpStream::connect(remote).await {
						Ok(mut outbound) => {
							if let Err(e) = copy_bidirectional(&mut inbound, &mut outbound).await {
								debug!(peer = %peer, error = %e, "Proxied connection closed");
							}
						}
						Err(e) => warn!(remote = %remote, error = %e, "Error connecting to pod"),
					}
				});
			}
		}
	}
}
