// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Container definition and deployment state types.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::warn;
use uuid::Uuid;

use crate::error::BackendError;

/// Length of the short container id, as used in resource names and labels.
pub const SHORT_ID_LENGTH: usize = 12;

/// Observable state of a deployed container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeployState {
	Pending,
	Failed,
	Running,
	Completed,
}

impl DeployState {
	/// Collapse a status lookup into a state, treating errors as `Failed`.
	pub fn from_result(result: &Result<DeployState, BackendError>) -> Self {
		match result {
			Ok(state) => *state,
			Err(_) => DeployState::Failed,
		}
	}
}

impl fmt::Display for DeployState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			DeployState::Pending => write!(f, "pending"),
			DeployState::Failed => write!(f, "failed"),
			DeployState::Running => write!(f, "running"),
			DeployState::Completed => write!(f, "completed"),
		}
	}
}

/// Outcome of a bulk delete.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupResult {
	/// Names of the pods that were deleted
	pub deleted: Vec<String>,
	/// Number of pods deleted
	pub count: u32,
}

/// Resource requests and limits, as kubernetes quantity strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceSpec {
	pub request_cpu: Option<String>,
	pub request_memory: Option<String>,
	pub limit_cpu: Option<String>,
	pub limit_memory: Option<String>,
}

/// Security context hints; numeric ids kept as strings until the pod is built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecurityHints {
	pub run_as_user: Option<String>,
	pub run_as_group: Option<String>,
	pub fs_group: Option<String>,
}

impl SecurityHints {
	pub fn is_empty(&self) -> bool {
		self.run_as_user.is_none() && self.run_as_group.is_none() && self.fs_group.is_none()
	}
}

/// Registry of stop senders for the bridge tasks spawned for a container.
///
/// Every spawned task holds the receiving half; firing or dropping the
/// sender ends the task.
#[derive(Clone, Default)]
pub struct StopChannels {
	senders: Arc<Mutex<Vec<oneshot::Sender<()>>>>,
}

impl StopChannels {
	fn lock(&self) -> MutexGuard<'_, Vec<oneshot::Sender<()>>> {
		self.senders.lock().unwrap_or_else(PoisonError::into_inner)
	}

	/// Register a new stop channel and return its receiving half.
	///
	/// Channels whose task has already finished are dropped.
	pub fn register(&self) -> oneshot::Receiver<()> {
		let (tx, rx) = oneshot::channel();
		let mut senders = self.lock();
		senders.retain(|tx| !tx.is_closed());
		senders.push(tx);
		rx
	}

	pub fn len(&self) -> usize {
		self.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Signal every registered task to stop. Returns the number signalled.
	pub fn close_all(&self) -> usize {
		let senders: Vec<_> = self.lock().drain(..).collect();
		let count = senders.len();
		for tx in senders {
			let _ = tx.send(());
		}
		count
	}
}

impl fmt::Debug for StopChannels {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("StopChannels")
			.field("registered", &self.len())
			.finish()
	}
}

/// A container as requested by the caller.
#[derive(Debug, Clone, Default)]
pub struct Container {
	pub id: String,
	pub short_id: String,
	pub name: String,
	pub image: String,
	pub entrypoint: Vec<String>,
	pub cmd: Vec<String>,
	/// Environment as `KEY=VALUE` strings
	pub env: Vec<String>,
	pub labels: HashMap<String, String>,
	pub network_aliases: Vec<String>,
	pub resources: ResourceSpec,
	pub pull_policy: Option<String>,
	pub security: SecurityHints,
	pub service_account: Option<String>,
	/// Destination path to host source directory
	pub volume_folders: HashMap<String, PathBuf>,
	/// Destination path to host source file
	pub volume_files: HashMap<String, PathBuf>,
	/// Destination path to raw content
	pub pre_archives: HashMap<String, Vec<u8>>,
	/// External port to internal port; a negative external port is not exposed
	pub host_ports: HashMap<i32, i32>,
	/// External port to internal port, filled in by the port mapping step
	pub mapped_ports: HashMap<i32, i32>,
	pub exposed_ports: Vec<i32>,
	pub publish_all: bool,
	stop_channels: StopChannels,
}

impl Container {
	/// Create a container with a fresh random id.
	pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
		let id = format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple());
		let short_id = id[..SHORT_ID_LENGTH].to_string();
		Self {
			id,
			short_id,
			name: name.into(),
			image: image.into(),
			..Default::default()
		}
	}

	/// Name of the pod backing this container.
	pub fn pod_name(&self) -> String {
		format!("kubedock-{}", self.short_id)
	}

	pub fn has_volumes(&self) -> bool {
		!self.volume_folders.is_empty() || !self.volume_files.is_empty() || !self.pre_archives.is_empty()
	}

	pub fn stop_channels(&self) -> &StopChannels {
		&self.stop_channels
	}

	/// Distinct internal ports the application container listens on.
	pub fn container_tcp_ports(&self) -> BTreeSet<i32> {
		self
			.host_ports
			.values()
			.chain(self.mapped_ports.values())
			.chain(self.exposed_ports.iter())
			.copied()
			.collect()
	}

	/// All external to internal pairs that are actually exposed.
	///
	/// An external port present in both `host_ports` and `mapped_ports`
	/// keeps its `host_ports` target.
	pub fn service_ports(&self) -> BTreeMap<i32, i32> {
		let mut ports: BTreeMap<i32, i32> = self
			.host_ports
			.iter()
			.filter(|(src, _)| **src >= 0)
			.map(|(src, dst)| (*src, *dst))
			.collect();
		for (&src, &dst) in self.mapped_ports.iter().filter(|(src, _)| **src >= 0) {
			match ports.get(&src) {
				Some(&kept) if kept != dst => {
					warn!(port = src, kept, ignored = dst, "Conflicting targets for external port");
				}
				Some(_) => {}
				None => {
					ports.insert(src, dst);
				}
			}
		}
		ports
	}

	/// Add a host bind, classified as a folder or a single file volume.
	pub fn add_bind(&mut self, dst: impl Into<String>, src: impl AsRef<Path>) -> Result<(), BackendError> {
		let src = src.as_ref();
		let metadata = std::fs::metadata(src).map_err(|source| BackendError::VolumeSource {
			path: src.to_path_buf(),
			source,
		})?;
		if metadata.is_dir() {
			self.volume_folders.insert(dst.into(), src.to_path_buf());
		} else {
			self.volume_files.insert(dst.into(), src.to_path_buf());
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn new_container_has_short_id_prefix() {
		let c = Container::new("web", "nginx");
		assert_eq!(c.id.len(), 64);
		assert_eq!(c.short_id.len(), SHORT_ID_LENGTH);
		assert!(c.id.starts_with(&c.short_id));
		assert_eq!(c.pod_name(), format!("kubedock-{}", c.short_id));
	}

	#[test]
	fn service_ports_skip_negative_external() {
		let mut c = Container::new("web", "nginx");
		c.host_ports.insert(-1, 80);
		c.host_ports.insert(8080, 8080);
		c.mapped_ports.insert(-5, 443);
		c.mapped_ports.insert(9000, 90);

		let ports = c.service_ports();
		assert_eq!(ports.len(), 2);
		assert_eq!(ports.get(&8080), Some(&8080));
		assert_eq!(ports.get(&9000), Some(&90));
	}

	#[test]
	fn service_ports_prefer_host_ports_on_conflict() {
		let mut c = Container::new("web", "nginx");
		c.host_ports.insert(8080, 80);
		c.mapped_ports.insert(8080, 443);
		c.mapped_ports.insert(9000, 90);

		let ports = c.service_ports();
		assert_eq!(ports, BTreeMap::from([(8080, 80), (9000, 90)]));
	}

	#[test]
	fn register_drops_finished_channels() {
		let channels = StopChannels::default();
		let finished = channels.register();
		let _running = channels.register();
		drop(finished);

		let _next = channels.register();
		assert_eq!(channels.len(), 2);
		assert_eq!(channels.close_all(), 2);
	}

	#[test]
	fn container_ports_are_distinct_internal_ports() {
		let mut c = Container::new("web", "nginx");
		c.host_ports.insert(-1, 80);
		c.host_ports.insert(8080, 80);
		c.mapped_ports.insert(9000, 443);
		c.exposed_ports = vec![443, 5432];

		let ports: Vec<i32> = c.container_tcp_ports().into_iter().collect();
		assert_eq!(ports, vec![80, 443, 5432]);
	}

	#[tokio::test]
	async fn close_all_stops_every_receiver() {
		let c = Container::new("web", "nginx");
		let rx1 = c.stop_channels().register();
		let rx2 = c.stop_channels().register();
		assert_eq!(c.stop_channels().len(), 2);

		assert_eq!(c.stop_channels().close_all(), 2);
		assert!(rx1.await.is_ok());
		assert!(rx2.await.is_ok());
		assert!(c.stop_channels().is_empty());
	}

	#[test]
	fn cloned_container_shares_stop_registry() {
		let c = Container::new("web", "nginx");
		let copy = c.clone();
		let _rx = copy.stop_channels().register();
		assert_eq!(c.stop_channels().len(), 1);
	}

	#[test]
	fn add_bind_classifies_paths() {
		let dir = tempfile::tempdir().unwrap();
		let file = dir.path().join("app.conf");
		std::fs::write(&file, "x").unwrap();

		let mut c = Container::new("web", "nginx");
		c.add_bind("/data", dir.path()).unwrap();
		c.add_bind("/etc/app.conf", &file).unwrap();

		assert_eq!(c.volume_folders.get("/data"), Some(&dir.path().to_path_buf()));
		assert_eq!(c.volume_files.get("/etc/app.conf"), Some(&file));
		assert!(c.has_volumes());
		assert!(c.add_bind("/x", dir.path().join("missing")).is_err());
	}

	#[test]
	fn from_result_maps_errors_to_failed() {
		let err: Result<DeployState, BackendError> = Err(BackendError::failed("boom"));
		assert_eq!(DeployState::from_result(&err), DeployState::Failed);
		assert_eq!(DeployState::from_result(&Ok(DeployState::Running)), DeployState::Running);
	}
}
