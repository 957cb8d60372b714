// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Backend configuration.

use std::path::PathBuf;

/// Configuration for the kubernetes backend.
#[derive(Debug, Clone)]
pub struct BackendConfig {
	/// Namespace in which all resources are created
	pub namespace: String,
	/// Image used for the `setup` init container that stages volumes
	pub init_image: String,
	/// Image pull secret names added to every pod
	pub image_pull_secrets: Vec<String>,
	/// Optional pod resource used as the base for every pod
	pub pod_template: Option<PathBuf>,
	/// Max number of seconds to wait for a container to start
	pub timeout_secs: u64,
	/// Identifier of this backend instance, added as a label to all resources
	pub instance_id: String,
	/// Pull policy used when the container does not specify one
	pub default_pull_policy: String,
	/// Log the container output before removing a failed deployment
	pub dump_logs_on_failure: bool,
	/// Number of attempts a reverse proxy makes to open its listener
	pub reverse_proxy_max_retry: u32,
}

impl Default for BackendConfig {
	fn default() -> Self {
		Self {
			namespace: "default".to_string(),
			init_image: "busybox:1.36".to_string(),
			image_pull_secrets: Vec::new(),
			pod_template: None,
			timeout_secs: 60,
			instance_id: "kubedock".to_string(),
			default_pull_policy: "IfNotPresent".to_string(),
			dump_logs_on_failure: false,
			reverse_proxy_max_retry: 30,
		}
	}
}
