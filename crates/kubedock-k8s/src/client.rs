// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

use async_trait::async_trait;

use crate::error::K8sError;
use crate::types::{
	ConfigMap, ExecRequest, LogOptions, LogStream, Pod, PortForwardStream, Service,
};

/// Trait for K8s client operations.
///
/// This abstraction allows for easy mocking in tests while providing
/// a clean interface for the K8s operations needed to run containers
/// as pods.
#[async_trait]
pub trait K8sClient: Send + Sync {
	/// Create a new pod in the specified namespace.
	async fn create_pod(&self, namespace: &str, pod: Pod) -> Result<Pod, K8sError>;

	/// Get a specific pod by name from the specified namespace.
	async fn get_pod(&self, name: &str, namespace: &str) -> Result<Pod, K8sError>;

	/// List pods in a namespace matching the given label selector.
	async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>, K8sError>;

	/// Delete a pod by name from the specified namespace.
	async fn delete_pod(
		&self,
		name: &str,
		namespace: &str,
		grace_period_seconds: u32,
	) -> Result<(), K8sError>;

	/// Create a service in the specified namespace.
	async fn create_service(&self, namespace: &str, service: Service) -> Result<Service, K8sError>;

	/// Delete all services matching the label selector. Returns the number deleted.
	async fn delete_services(&self, namespace: &str, label_selector: &str)
		-> Result<usize, K8sError>;

	/// Create a config map in the specified namespace.
	async fn create_config_map(
		&self,
		namespace: &str,
		config_map: ConfigMap,
	) -> Result<ConfigMap, K8sError>;

	/// Delete all config maps matching the label selector. Returns the number deleted.
	async fn delete_config_maps(
		&self,
		namespace: &str,
		label_selector: &str,
	) -> Result<usize, K8sError>;

	/// Stream logs from a container in a pod.
	async fn stream_logs(
		&self,
		name: &str,
		namespace: &str,
		container: &str,
		opts: LogOptions,
	) -> Result<LogStream, K8sError>;

	/// Run a command inside a container, feeding it the optional stdin and
	/// streaming its stdout into the optional sink.
	///
	/// Resolves once the command exits; a non-success exit status is
	/// reported as [`K8sError::ExecFailed`].
	async fn exec(&self, name: &str, namespace: &str, request: ExecRequest)
		-> Result<(), K8sError>;

	/// Open a tunneled connection to `port` of the pod through the API server.
	async fn port_forward(
		&self,
		name: &str,
		namespace: &str,
		port: u16,
	) -> Result<PortForwardStream, K8sError>;
}
