// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Backend error types.

use std::path::PathBuf;

use kubedock_k8s::K8sError;

/// Errors that can occur while deploying and managing containers.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
	/// A resource request or limit is not a valid quantity
	#[error("Invalid resource {key}: {value}")]
	InvalidResources { key: String, value: String },

	/// Unknown image pull policy
	#[error("Invalid image pull policy: {0}")]
	InvalidPullPolicy(String),

	/// A security context hint could not be parsed
	#[error("Invalid security context {field}: {value}")]
	InvalidSecurityContext { field: String, value: String },

	/// The base pod template could not be read or parsed
	#[error("Error opening podtemplate {path}: {message}")]
	PodTemplate { path: PathBuf, message: String },

	/// A polling wait exhausted its bound
	#[error("Timeout {operation}")]
	Timeout { operation: String },

	/// The pod reported a failure through its status
	#[error("{reason}")]
	ContainerFailed { reason: String },

	/// A single-file volume source could not be read
	#[error("Failed to read volume source {path}: {source}")]
	VolumeSource {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	/// `stat` output for a path in the container did not parse
	#[error("Invalid file mode for {path}: {output}")]
	InvalidFileMode { path: String, output: String },

	/// The pod has not been assigned an IP address yet
	#[error("Pod {pod} has no assigned IP address")]
	NoPodAddress { pod: String },

	/// The pod reported an IP address that does not parse
	#[error("Invalid address {address} for pod {pod}")]
	InvalidPodAddress { pod: String, address: String },

	/// No free local port could be allocated for a published port
	#[error("Failed to allocate a local port: {0}")]
	PortAllocation(#[source] std::io::Error),

	/// A local listener could not be bound
	#[error("Failed to listen on port {port}: {source}")]
	Listen {
		port: u16,
		#[source]
		source: std::io::Error,
	},

	/// A reverse proxy exhausted its retry budget
	#[error("Reverse proxy on port {port} gave up after {attempts} attempts")]
	ProxyRetriesExhausted { port: u16, attempts: u32 },

	/// Service creation failed after the pod was created
	#[error("Failed to create service {name}: {source}")]
	ServiceProvisioning {
		name: String,
		#[source]
		source: K8sError,
	},

	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	/// Kubernetes error
	#[error(transparent)]
	K8s(#[from] K8sError),
}

impl BackendError {
	pub(crate) fn timeout(operation: &str) -> Self {
		BackendError::Timeout {
			operation: operation.to_string(),
		}
	}

	pub(crate) fn failed(reason: &str) -> Self {
		BackendError::ContainerFailed {
			reason: reason.to_string(),
		}
	}

	/// Whether the error came from deriving the pod from the container
	/// definition, before anything was sent to the cluster.
	pub fn is_build_error(&self) -> bool {
		matches!(
			self,
			BackendError::InvalidResources { .. }
				| BackendError::InvalidPullPolicy(_)
				| BackendError::InvalidSecurityContext { .. }
				| BackendError::PodTemplate { .. }
		)
	}

	pub fn is_timeout(&self) -> bool {
		matches!(self, BackendError::Timeout { .. })
	}

	/// Whether a deployment failing with this error should have its pod removed.
	///
	/// Build errors happen before anything exists in the cluster. Service
	/// provisioning happens once the pod is already up; the pod is left
	/// running and the caller decides what to do with it.
	pub fn removes_pod(&self) -> bool {
		!self.is_build_error() && !matches!(self, BackendError::ServiceProvisioning { .. })
	}
}
