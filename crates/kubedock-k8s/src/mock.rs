// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! In-memory K8s client for tests.
//!
//! The mock keeps every created object, records exec invocations together
//! with whatever was written to their stdin, and replays a scripted
//! sequence of pod statuses on `get_pod`.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::client::K8sClient;
use crate::error::K8sError;
use crate::types::{
	ConfigMap, ExecRequest, LogOptions, LogStream, Pod, PodStatus, PortForwardStream, Service,
};

/// A recorded exec invocation.
#[derive(Debug, Clone)]
pub struct ExecCall {
	pub pod: String,
	pub container: String,
	pub command: Vec<String>,
	pub stdin: Vec<u8>,
}

#[derive(Default)]
struct MockState {
	pods: BTreeMap<String, Pod>,
	services: Vec<Service>,
	config_maps: Vec<ConfigMap>,
	statuses: VecDeque<PodStatus>,
	exec_calls: Vec<ExecCall>,
	deleted_pods: Vec<String>,
	failing_exec_args: Vec<String>,
	exec_outputs: Vec<(String, Vec<u8>)>,
	fail_pod_creation: bool,
	fail_service_creation: bool,
	logs: Vec<u8>,
	port_forwards: Vec<(String, u16)>,
}

/// A mock K8s client backed by in-memory state.
#[derive(Clone, Default)]
pub struct MockK8sClient {
	state: Arc<Mutex<MockState>>,
}

impl MockK8sClient {
	/// Create a new, empty mock client.
	pub fn new() -> Self {
		Self::default()
	}

	fn lock(&self) -> MutexGuard<'_, MockState> {
		self.state.lock().unwrap_or_else(PoisonError::into_inner)
	}

	/// Queue a status to be reported by `get_pod`.
	///
	/// Statuses are consumed in FIFO order; the last one keeps being
	/// reported once the queue is down to a single entry.
	pub fn push_status(&self, status: PodStatus) {
		self.lock().statuses.push_back(status);
	}

	/// Store a pod directly, as if it had been created earlier.
	pub fn insert_pod(&self, pod: Pod) {
		let name = pod.metadata.name.clone().unwrap_or_default();
		self.lock().pods.insert(name, pod);
	}

	/// Make every exec whose command contains `arg` fail.
	pub fn fail_exec_with_arg(&self, arg: &str) {
		self.lock()
			.failing_exec_args
			.push(arg.to_string());
	}

	/// Make every exec whose command contains `arg` write `output` to stdout.
	pub fn set_exec_output(&self, arg: &str, output: &[u8]) {
		self.lock()
			.exec_outputs
			.push((arg.to_string(), output.to_vec()));
	}

	pub fn fail_pod_creation(&self) {
		self.lock().fail_pod_creation = true;
	}

	pub fn fail_service_creation(&self) {
		self.lock().fail_service_creation = true;
	}

	/// Set the log output returned by `stream_logs`.
	pub fn set_logs(&self, logs: &[u8]) {
		self.lock().logs = logs.to_vec();
	}

	pub fn pods(&self) -> Vec<Pod> {
		self.lock().pods.values().cloned().collect()
	}

	pub fn services(&self) -> Vec<Service> {
		self.lock().services.clone()
	}

	pub fn config_maps(&self) -> Vec<ConfigMap> {
		self.lock().config_maps.clone()
	}

	pub fn exec_calls(&self) -> Vec<ExecCall> {
		self.lock().exec_calls.clone()
	}

	pub fn deleted_pods(&self) -> Vec<String> {
		self.lock().deleted_pods.clone()
	}

	/// Pod name and port of every port-forward opened so far.
	pub fn port_forwards(&self) -> Vec<(String, u16)> {
		self.lock().port_forwards.clone()
	}
}

/// Matches `k=v,k2=v2` equality selectors against a label map.
fn matches_selector(labels: Option<&BTreeMap<String, String>>, selector: &str) -> bool {
	let empty = BTreeMap::new();
	let labels = labels.unwrap_or(&empty);
	selector
		.split(',')
		.filter(|s| !s.is_empty())
		.all(|term| match term.split_once('=') {
			Some((k, v)) => labels.get(k).map(|lv| lv == v).unwrap_or(false),
			None => labels.contains_key(term),
		})
}

#[async_trait]
impl K8sClient for MockK8sClient {
	async fn create_pod(&self, _namespace: &str, mut pod: Pod) -> Result<Pod, K8sError> {
		let mut state = self.lock();
		if state.fail_pod_creation {
			return Err(K8sError::ApiError {
				message: "pod creation rejected".to_string(),
			});
		}
		let name = pod.metadata.name.clone().unwrap_or_default();
		if state.pods.contains_key(&name) {
			return Err(K8sError::AlreadyExists {
				kind: "pod".to_string(),
				name,
			});
		}
		pod
			.metadata
			.creation_timestamp
			.get_or_insert_with(|| Time(k8s_openapi::chrono::Utc::now()));
		state.pods.insert(name, pod.clone());
		Ok(pod)
	}

	async fn get_pod(&self, name: &str, _namespace: &str) -> Result<Pod, K8sError> {
		let mut state = self.lock();
		let status = if state.statuses.len() > 1 {
			state.statuses.pop_front()
		} else {
			state.statuses.front().cloned()
		};
		let pod = state
			.pods
			.get_mut(name)
			.ok_or_else(|| K8sError::PodNotFound { name: name.into() })?;
		if status.is_some() {
			pod.status = status;
		}
		Ok(pod.clone())
	}

	async fn list_pods(&self, _namespace: &str, label_selector: &str) -> Result<Vec<Pod>, K8sError> {
		let state = self.lock();
		Ok(
			state
				.pods
				.values()
				.filter(|p| matches_selector(p.metadata.labels.as_ref(), label_selector))
				.cloned()
				.collect(),
		)
	}

	async fn delete_pod(
		&self,
		name: &str,
		_namespace: &str,
		_grace_period_seconds: u32,
	) -> Result<(), K8sError> {
		let mut state = self.lock();
		match state.pods.remove(name) {
			Some(_) => {
				state.deleted_pods.push(name.to_string());
				Ok(())
			}
			None => Err(K8sError::PodNotFound { name: name.into() }),
		}
	}

	async fn create_service(&self, _namespace: &str, service: Service) -> Result<Service, K8sError> {
		let mut state = self.lock();
		if state.fail_service_creation {
			return Err(K8sError::ApiError {
				message: "service creation rejected".to_string(),
			});
		}
		state.services.push(service.clone());
		Ok(service)
	}

	async fn delete_services(
		&self,
		_namespace: &str,
		label_selector: &str,
	) -> Result<usize, K8sError> {
		let mut state = self.lock();
		let before = state.services.len();
		state
			.services
			.retain(|s| !matches_selector(s.metadata.labels.as_ref(), label_selector));
		Ok(before - state.services.len())
	}

	async fn create_config_map(
		&self,
		_namespace: &str,
		config_map: ConfigMap,
	) -> Result<ConfigMap, K8sError> {
		self.lock()
			.config_maps
			.push(config_map.clone());
		Ok(config_map)
	}

	async fn delete_config_maps(
		&self,
		_namespace: &str,
		label_selector: &str,
	) -> Result<usize, K8sError> {
		let mut state = self.lock();
		let before = state.config_maps.len();
		state
			.config_maps
			.retain(|c| !matches_selector(c.metadata.labels.as_ref(), label_selector));
		Ok(before - state.config_maps.len())
	}

	async fn stream_logs(
		&self,
		name: &str,
		_namespace: &str,
		_container: &str,
		_opts: LogOptions,
	) -> Result<LogStream, K8sError> {
		let state = self.lock();
		if !state.pods.contains_key(name) {
			return Err(K8sError::PodNotFound { name: name.into() });
		}
		let logs = Bytes::from(state.logs.clone());
		Ok(Box::pin(futures::stream::iter(vec![Ok(logs)])))
	}

	async fn exec(
		&self,
		name: &str,
		_namespace: &str,
		request: ExecRequest,
	) -> Result<(), K8sError> {
		let ExecRequest {
			container,
			command,
			stdin,
			stdout,
		} = request;

		let mut input = Vec::new();
		if let Some(mut stdin) = stdin {
			stdin
				.read_to_end(&mut input)
				.await
				.map_err(|e| K8sError::ExecError {
					message: e.to_string(),
				})?;
		}

		let (output, failed) = {
			let mut state = self.lock();
			if !state.pods.contains_key(name) {
				return Err(K8sError::PodNotFound { name: name.into() });
			}
			state.exec_calls.push(ExecCall {
				pod: name.to_string(),
				container: container.clone(),
				command: command.clone(),
				stdin: input,
			});
			let output = state
				.exec_outputs
				.iter()
				.find(|(arg, _)| command.contains(arg))
				.map(|(_, output)| output.clone());
			let failed = command
				.iter()
				.any(|arg| state.failing_exec_args.contains(arg));
			(output, failed)
		};

		if let Some(mut sink) = stdout {
			let written = async {
				if let Some(output) = output {
					sink.write_all(&output).await?;
				}
				sink.shutdown().await
			};
			written.await.map_err(|e| K8sError::ExecError {
				message: e.to_string(),
			})?;
		}

		if failed {
			return Err(K8sError::ExecFailed {
				container,
				message: "command terminated with exit code 2".to_string(),
				exit_code: Some(2),
			});
		}
		Ok(())
	}

	/// Returns one end of an in-memory pipe whose other end echoes back.
	async fn port_forward(
		&self,
		name: &str,
		_namespace: &str,
		port: u16,
	) -> Result<PortForwardStream, K8sError> {
		{
			let mut state = self.lock();
			if !state.pods.contains_key(name) {
				return Err(K8sError::PodNotFound { name: name.into() });
			}
			state.port_forwards.push((name.to_string(), port));
		}
		let (local, remote) = tokio::io::duplex(64 * 1024);
		tokio::spawn(async move {
			let (mut reader, mut writer) = tokio::io::split(remote);
			let _ = tokio::io::copy(&mut reader, &mut writer).await;
		});
		Ok(Box::new(local))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::types::PodSpec;
	use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
	use tokio::io::AsyncWriteExt;

	fn pod(name: &str, labels: &[(&str, &str)]) -> Pod {
		Pod {
			metadata: ObjectMeta {
				name: Some(name.to_string()),
				labels: Some(
					labels
						.iter()
						.map(|(k, v)| (k.to_string(), v.to_string()))
						.collect(),
				),
				..Default::default()
			},
			spec: Some(PodSpec::default()),
			status: None,
		}
	}

	fn phase(p: &str) -> PodStatus {
		PodStatus {
			phase: Some(p.to_string()),
			..Default::default()
		}
	}

	#[tokio::test]
	async fn get_pod_replays_statuses_and_sticks_on_last() {
		let mock = MockK8sClient::new();
		mock.insert_pod(pod("p", &[]));
		mock.push_status(phase("Pending"));
		mock.push_status(phase("Running"));

		let first = mock.get_pod("p", "ns").await.unwrap();
		let second = mock.get_pod("p", "ns").await.unwrap();
		let third = mock.get_pod("p", "ns").await.unwrap();

		assert_eq!(first.status.unwrap().phase.as_deref(), Some("Pending"));
		assert_eq!(second.status.unwrap().phase.as_deref(), Some("Running"));
		assert_eq!(third.status.unwrap().phase.as_deref(), Some("Running"));
	}

	#[tokio::test]
	async fn list_pods_filters_on_selector() {
		let mock = MockK8sClient::new();
		mock.insert_pod(pod("a", &[("app", "x"), ("tier", "web")]));
		mock.insert_pod(pod("b", &[("app", "y")]));

		let found = mock.list_pods("ns", "app=x,tier=web").await.unwrap();
		assert_eq!(found.len(), 1);
		assert_eq!(found[0].metadata.name.as_deref(), Some("a"));
		assert_eq!(mock.list_pods("ns", "").await.unwrap().len(), 2);
	}

	#[tokio::test]
	async fn exec_records_stdin() {
		let mock = MockK8sClient::new();
		mock.insert_pod(pod("p", &[]));

		let req = ExecRequest::new("setup", &["cat"]).with_stdin(Box::pin(&b"hello"[..]));
		mock.exec("p", "ns", req).await.unwrap();

		let calls = mock.exec_calls();
		assert_eq!(calls.len(), 1);
		assert_eq!(calls[0].container, "setup");
		assert_eq!(calls[0].stdin, b"hello");
	}

	#[tokio::test]
	async fn exec_fails_for_configured_argument() {
		let mock = MockK8sClient::new();
		mock.insert_pod(pod("p", &[]));
		mock.fail_exec_with_arg("/broken");

		let req = ExecRequest::new("setup", &["tar", "-xf", "-", "-C", "/broken"]);
		let result = mock.exec("p", "ns", req).await;
		assert!(matches!(
			result,
			Err(K8sError::ExecFailed {
				exit_code: Some(2),
				..
			})
		));
	}

	#[tokio::test]
	async fn exec_writes_configured_stdout() {
		let mock = MockK8sClient::new();
		mock.insert_pod(pod("p", &[]));
		mock.set_exec_output("stat", b"81a4\n");

		let (tx, mut rx) = tokio::io::duplex(64);
		let req = ExecRequest::new("main", &["stat", "-c", "%f", "/etc/hosts"]).with_stdout(Box::pin(tx));
		mock.exec("p", "ns", req).await.unwrap();

		let mut output = Vec::new();
		rx.read_to_end(&mut output).await.unwrap();
		assert_eq!(output, b"81a4\n");
	}

	#[tokio::test]
	async fn port_forward_echoes() {
		let mock = MockK8sClient::new();
		mock.insert_pod(pod("p", &[]));

		let mut stream = mock.port_forward("p", "ns", 80).await.unwrap();
		stream.write_all(b"ping").await.unwrap();
		let mut buf = [0u8; 4];
		stream.read_exact(&mut buf).await.unwrap();
		assert_eq!(&buf, b"ping");
		assert_eq!(mock.port_forwards(), vec![("p".to_string(), 80)]);
	}

	#[tokio::test]
	async fn missing_pod_is_not_found() {
		let mock = MockK8sClient::new();
		let result = mock.get_pod("missing", "ns").await;
		assert!(matches!(result, Err(K8sError::PodNotFound { .. })));
	}
}
