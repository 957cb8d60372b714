// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Volume staging through an init container.
//!
//! Pods with volumes get a `setup` init container that blocks until a
//! sentinel file exists. Folders are emptyDir volumes filled by streaming a
//! tar archive into `setup`; single files and raw content are mounted from
//! config maps. Creating the sentinel releases the init container, after
//! which the application container starts with everything in place.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use k8s_openapi::ByteString;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kubedock_k8s::{
	ConfigMap, ConfigMapVolumeSource, Container as PodContainer, EmptyDirVolumeSource, ExecRequest, Pod,
	Volume, VolumeMount,
};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};

use crate::archive;
use crate::backend::KubernetesBackend;
use crate::error::BackendError;
use crate::labels;
use crate::pod_spec;
use crate::sanitize;
use crate::types::Container;

/// Name of the init container that stages volumes.
pub const INIT_CONTAINER_NAME: &str = "setup";

const DONE_SENTINEL: &str = "/tmp/done";
const FILES_VOLUME: &str = "vfiles";
const RAW_VOLUME: &str = "pfiles";

/// Stable identifier for a path, usable as a config map key.
pub fn file_id(path: &str) -> String {
	hex::encode(Sha256::digest(path.as_bytes()))
}

/// Volume name for a folder destination, unique within `used`.
///
/// Falls back to a hash of the path when the path has no usable name or the
/// name is taken.
fn folder_volume_name(dst: &str, used: &mut HashSet<String>) -> String {
	let name = sanitize::resource_name(dst)
		.filter(|name| !used.contains(name))
		.unwrap_or_else(|| format!("v-{}", &file_id(dst)[..16]));
	used.insert(name.clone());
	name
}

fn mount(name: &str, path: &str, sub_path: Option<String>) -> VolumeMount {
	VolumeMount {
		name: name.to_string(),
		mount_path: path.to_string(),
		sub_path,
		..Default::default()
	}
}

fn config_map_volume(name: &str, config_map: &str) -> Volume {
	Volume {
		name: name.to_string(),
		config_map: Some(ConfigMapVolumeSource {
			name: config_map.to_string(),
			..Default::default()
		}),
		..Default::default()
	}
}

impl KubernetesBackend {
	fn config_map(&self, container: &Container, suffix: &str, data: BTreeMap<String, ByteString>) -> ConfigMap {
		ConfigMap {
			metadata: ObjectMeta {
				name: Some(format!("{}-{suffix}", container.short_id)),
				namespace: Some(self.namespace().to_string()),
				labels: Some(labels::labels(None, container, &self.config().instance_id)),
				annotations: Some(labels::annotations(None, container)),
				..Default::default()
			},
			binary_data: Some(data),
			..Default::default()
		}
	}

	/// Add the init container, volumes and mounts for every volume of
	/// `container` to `pod`, creating the config maps they need.
	#[instrument(skip(self, container, pod), fields(container = %container.short_id))]
	pub(crate) async fn add_volumes(&self, container: &Container, pod: &mut Pod) -> Result<(), BackendError> {
		let pull_policy = pod_spec::image_pull_policy(container, self.config())?;
		let spec = pod.spec.get_or_insert_with(Default::default);

		let mut volumes = Vec::new();
		let mut mounts = Vec::new();

		let mut used: HashSet<String> = [FILES_VOLUME, RAW_VOLUME]
			.into_iter()
			.map(String::from)
			.chain(spec.volumes.iter().flatten().map(|v| v.name.clone()))
			.collect();
		for dst in container.volume_folders.keys() {
			let name = folder_volume_name(dst, &mut used);
			volumes.push(Volume {
				name: name.clone(),
				empty_dir: Some(EmptyDirVolumeSource::default()),
				..Default::default()
			});
			mounts.push(mount(&name, dst, None));
		}

		if !container.volume_files.is_empty() {
			let mut data = BTreeMap::new();
			for src in container.volume_files.values() {
				let content = tokio::fs::read(src).await.map_err(|source| BackendError::VolumeSource {
					path: src.clone(),
					source,
				})?;
				data.insert(file_id(&src.to_string_lossy()), ByteString(content));
			}
			let config_map = self.config_map(container, "vf", data);
			let created = self.client().create_config_map(self.namespace(), config_map).await?;
			let config_map_name = created.metadata.name.unwrap_or_default();

			volumes.push(config_map_volume(FILES_VOLUME, &config_map_name));
			for (dst, src) in &container.volume_files {
				mounts.push(mount(FILES_VOLUME, dst, Some(file_id(&src.to_string_lossy()))));
			}
		}

		if !container.pre_archives.is_empty() {
			let data = container
				.pre_archives
				.iter()
				.map(|(dst, content)| (file_id(dst), ByteString(content.clone())))
				.collect();
			let config_map = self.config_map(container, "pf", data);
			let created = self.client().create_config_map(self.namespace(), config_map).await?;
			let config_map_name = created.metadata.name.unwrap_or_default();

			volumes.push(config_map_volume(RAW_VOLUME, &config_map_name));
			for dst in container.pre_archives.keys() {
				mounts.push(mount(RAW_VOLUME, dst, Some(file_id(dst))));
			}
		}

		spec.init_containers = Some(vec![PodContainer {
			name: INIT_CONTAINER_NAME.to_string(),
			image: Some(self.config().init_image.clone()),
			command: Some(vec![
				"sh".to_string(),
				"-c".to_string(),
				format!("while [ ! -f {DONE_SENTINEL} ]; do sleep 0.1 ; done"),
			]),
			volume_mounts: Some(mounts.clone()),
			image_pull_policy: Some(pull_policy),
			..Default::default()
		}]);
		if let Some(main) = spec.containers.first_mut() {
			main.volume_mounts.get_or_insert_with(Vec::new).extend(mounts);
		}
		spec.volumes.get_or_insert_with(Vec::new).extend(volumes);

		Ok(())
	}

	/// Wait for the init container, copy every folder into it and release it.
	///
	/// A folder that fails to copy is logged and skipped.
	#[instrument(skip(self, container), fields(container = %container.short_id))]
	pub(crate) async fn copy_volume_folders(&self, container: &Container) -> Result<(), BackendError> {
		self
			.wait_init_container_running(container, INIT_CONTAINER_NAME, self.config().timeout_secs)
			.await?;

		for (dst, src) in &container.volume_folders {
			if let Err(e) = self.copy_folder(container, src, dst).await {
				warn!(src = %src.display(), dst = %dst, error = %e, "Error copying folder volume");
			}
		}

		self.signal_done(container).await
	}

	async fn copy_folder(&self, container: &Container, src: &Path, dst: &str) -> Result<(), BackendError> {
		info!(src = %src.display(), dst = %dst, "Copying folder volume");
		let request = ExecRequest::new(INIT_CONTAINER_NAME, &["tar", "-xf", "-", "-C", dst])
			.with_stdin(archive::folder_reader(src.to_path_buf()));
		self
			.client()
			.exec(&container.pod_name(), self.namespace(), request)
			.await?;
		Ok(())
	}

	async fn signal_done(&self, container: &Container) -> Result<(), BackendError> {
		debug!(container = %container.short_id, "Releasing init container");
		let request = ExecRequest::new(INIT_CONTAINER_NAME, &["touch", DONE_SENTINEL]);
		self
			.client()
			.exec(&container.pod_name(), self.namespace(), request)
			.await?;
		Ok(())
	}
}
