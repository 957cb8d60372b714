// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::core::v1::{ConfigMap, Pod, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Status;
use kube::{
	api::{Api, AttachParams, DeleteParams, ListParams, LogParams, PostParams},
	Client,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::compat::FuturesAsyncReadCompatExt;
use tracing::{debug, instrument};

use crate::client::K8sClient;
use crate::error::K8sError;
use crate::types::{ExecRequest, LogOptions, LogStream, PortForwardStream};

/// Production K8s client implementation using the kube crate.
#[derive(Clone)]
pub struct KubeClient {
	client: Client,
}

impl KubeClient {
	/// Create a new KubeClient that auto-discovers cluster configuration.
	///
	/// This will attempt to load config from:
	/// 1. In-cluster service account (when running in K8s)
	/// 2. KUBECONFIG environment variable
	/// 3. ~/.kube/config
	pub async fn new() -> Result<Self, K8sError> {
		let client = Client::try_default().await?;
		debug!("K8s client initialized");
		Ok(Self { client })
	}

	/// Wrap an already configured kube client.
	pub fn from_client(client: Client) -> Self {
		Self { client }
	}

	fn pods(&self, namespace: &str) -> Api<Pod> {
		Api::namespaced(self.client.clone(), namespace)
	}
}

/// Exit code of a failed exec, reported as an `ExitCode` cause of the
/// `NonZeroExitCode` status.
fn exit_code(status: &Status) -> Option<i32> {
	status
		.details
		.as_ref()?
		.causes
		.as_ref()?
		.iter()
		.find(|cause| cause.reason.as_deref() == Some("ExitCode"))
		.and_then(|cause| cause.message.as_deref())
		.and_then(|code| code.parse().ok())
}

fn map_create_error(kind: &str, name: Option<&String>, err: kube::Error) -> K8sError {
	match err {
		kube::Error::Api(ref e) if e.code == 409 => K8sError::AlreadyExists {
			kind: kind.to_string(),
			name: name.cloned().unwrap_or_default(),
		},
		e => e.into(),
	}
}

#[async_trait]
impl K8sClient for KubeClient {
	#[instrument(skip(self, pod), fields(pod = ?pod.metadata.name))]
	async fn create_pod(&self, namespace: &str, pod: Pod) -> Result<Pod, K8sError> {
		self
			.pods(namespace)
			.create(&PostParams::default(), &pod)
			.await
			.map_err(|e| map_create_error("pod", pod.metadata.name.as_ref(), e))
	}

	async fn get_pod(&self, name: &str, namespace: &str) -> Result<Pod, K8sError> {
		match self.pods(namespace).get(name).await {
			Ok(pod) => Ok(pod),
			Err(kube::Error::Api(err)) if err.code == 404 => {
				Err(K8sError::PodNotFound { name: name.into() })
			}
			Err(e) => Err(e.into()),
		}
	}

	async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>, K8sError> {
		let lp = ListParams::default().labels(label_selector);
		let pod_list = self.pods(namespace).list(&lp).await?;
		Ok(pod_list.items)
	}

	#[instrument(skip(self))]
	async fn delete_pod(
		&self,
		name: &str,
		namespace: &str,
		grace_period_seconds: u32,
	) -> Result<(), K8sError> {
		let dp = DeleteParams {
			grace_period_seconds: Some(grace_period_seconds),
			..Default::default()
		};
		match self.pods(namespace).delete(name, &dp).await {
			Ok(_) => Ok(()),
			Err(kube::Error::Api(err)) if err.code == 404 => {
				Err(K8sError::PodNotFound { name: name.into() })
			}
			Err(e) => Err(e.into()),
		}
	}

	#[instrument(skip(self, service), fields(service = ?service.metadata.name))]
	async fn create_service(&self, namespace: &str, service: Service) -> Result<Service, K8sError> {
		let services: Api<Service> = Api::namespaced(self.client.clone(), namespace);
		services
			.create(&PostParams::default(), &service)
			.await
			.map_err(|e| map_create_error("service", service.metadata.name.as_ref(), e))
	}

	async fn delete_services(
		&self,
		namespace: &str,
		label_selector: &str,
	) -> Result<usize, K8sError> {
		let services: Api<Service> = Api::namespaced(self.client.clone(), namespace);
		let list = services
			.list(&ListParams::default().labels(label_selector))
			.await?;
		let mut deleted = 0;
		for svc in list.items {
			let Some(name) = svc.metadata.name else {
				continue;
			};
			match services.delete(&name, &DeleteParams::default()).await {
				Ok(_) => deleted += 1,
				Err(kube::Error::Api(err)) if err.code == 404 => {}
				Err(e) => return Err(e.into()),
			}
		}
		Ok(deleted)
	}

	#[instrument(skip(self, config_map), fields(config_map = ?config_map.metadata.name))]
	async fn create_config_map(
		&self,
		namespace: &str,
		config_map: ConfigMap,
	) -> Result<ConfigMap, K8sError> {
		let config_maps: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
		config_maps
			.create(&PostParams::default(), &config_map)
			.await
			.map_err(|e| map_create_error("configmap", config_map.metadata.name.as_ref(), e))
	}

	async fn delete_config_maps(
		&self,
		namespace: &str,
		label_selector: &str,
	) -> Result<usize, K8sError> {
		let config_maps: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
		let list = config_maps
			.list(&ListParams::default().labels(label_selector))
			.await?;
		let mut deleted = 0;
		for cm in list.items {
			let Some(name) = cm.metadata.name else {
				continue;
			};
			match config_maps.delete(&name, &DeleteParams::default()).await {
				Ok(_) => deleted += 1,
				Err(kube::Error::Api(err)) if err.code == 404 => {}
				Err(e) => return Err(e.into()),
			}
		}
		Ok(deleted)
	}

	async fn stream_logs(
		&self,
		name: &str,
		namespace: &str,
		container: &str,
		opts: LogOptions,
	) -> Result<LogStream, K8sError> {
		let lp = LogParams {
			container: Some(container.to_string()),
			follow: opts.follow,
			tail_lines: opts.tail.map(Into::into),
			timestamps: opts.timestamps,
			..Default::default()
		};

		let stream = self
			.pods(namespace)
			.log_stream(name, &lp)
			.await
			.map_err(|e| match e {
				kube::Error::Api(ref err) if err.code == 404 => K8sError::PodNotFound { name: name.into() },
				_ => K8sError::StreamError {
					message: e.to_string(),
				},
			})?;

		let compat_stream = stream.compat();
		let lines_stream = tokio_util::io::ReaderStream::new(compat_stream);
		let mapped = lines_stream.map(|result| result.map_err(std::io::Error::other));
		Ok(Box::pin(mapped))
	}

	#[instrument(skip(self, request), fields(container = %request.container, command = ?request.command))]
	async fn exec(
		&self,
		name: &str,
		namespace: &str,
		request: ExecRequest,
	) -> Result<(), K8sError> {
		let ExecRequest {
			container,
			command,
			stdin,
			stdout,
		} = request;

		let ap = AttachParams::default()
			.container(container.clone())
			.stdin(stdin.is_some())
			.stdout(stdout.is_some())
			.stderr(true);

		let mut attached = self
			.pods(namespace)
			.exec(name, command, &ap)
			.await
			.map_err(|e| match e {
				kube::Error::Api(ref err) if err.code == 404 => K8sError::PodNotFound { name: name.into() },
				_ => K8sError::ExecError {
					message: e.to_string(),
				},
			})?;

		let status = attached.take_status();
		let writer = attached.stdin();
		let output = attached.stdout();
		let reader = attached.stderr();

		let feed = async move {
			match (stdin, writer) {
				(Some(mut input), Some(mut writer)) => {
					tokio::io::copy(&mut input, &mut writer).await?;
					writer.shutdown().await
				}
				_ => Ok(()),
			}
		};
		let pump = async move {
			match (output, stdout) {
				(Some(mut output), Some(mut sink)) => {
					tokio::io::copy(&mut output, &mut sink).await?;
					sink.shutdown().await
				}
				(None, Some(mut sink)) => sink.shutdown().await,
				_ => Ok(()),
			}
		};
		let drain = async move {
			let mut buf = Vec::new();
			if let Some(mut reader) = reader {
				reader.read_to_end(&mut buf).await?;
			}
			Ok::<_, std::io::Error>(buf)
		};
		let (fed, pumped, stderr) = tokio::join!(feed, pump, drain);

		let status = match status {
			Some(status) => status.await,
			None => None,
		};
		if let Err(e) = attached.join().await {
			debug!(error = %e, "exec session closed with error");
		}

		let stderr = stderr
			.map(|buf| String::from_utf8_lossy(&buf).trim().to_string())
			.unwrap_or_default();

		match status {
			Some(s) if s.status.as_deref() == Some("Success") => {}
			Some(s) => {
				return Err(K8sError::ExecFailed {
					container,
					exit_code: exit_code(&s),
					message: s
						.message
						.filter(|m| !m.is_empty())
						.unwrap_or(stderr),
				});
			}
			None => {
				return Err(K8sError::ExecFailed {
					container,
					message: "no exit status reported".to_string(),
					exit_code: None,
				});
			}
		}

		fed.map_err(|e| K8sError::ExecError {
			message: format!("writing stdin: {e}"),
		})?;
		pumped.map_err(|e| K8sError::ExecError {
			message: format!("reading stdout: {e}"),
		})
	}

	async fn port_forward(
		&self,
		name: &str,
		namespace: &str,
		port: u16,
	) -> Result<PortForwardStream, K8sError> {
		let mut forwarder = self
			.pods(namespace)
			.portforward(name, &[port])
			.await
			.map_err(|e| match e {
				kube::Error::Api(ref err) if err.code == 404 => K8sError::PodNotFound { name: name.into() },
				_ => K8sError::PortForwardError {
					message: e.to_string(),
				},
			})?;

		let stream = forwarder
			.take_stream(port)
			.ok_or_else(|| K8sError::PortForwardError {
				message: format!("no stream available for port {port}"),
			})?;

		tokio::spawn(async move {
			if let Err(e) = forwarder.join().await {
				debug!(error = %e, port, "port-forward session closed with error");
			}
		});

		Ok(Box::new(stream))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use k8s_openapi::apimachinery::pkg::apis::meta::v1::{StatusCause, StatusDetails};

	fn failure(causes: Vec<StatusCause>) -> Status {
		Status {
			status: Some("Failure".into()),
			reason: Some("NonZeroExitCode".into()),
			details: Some(StatusDetails {
				causes: Some(causes),
				..Default::default()
			}),
			..Default::default()
		}
	}

	#[test]
	fn exit_code_is_read_from_causes() {
		let status = failure(vec![StatusCause {
			reason: Some("ExitCode".into()),
			message: Some("2".into()),
			..Default::default()
		}]);
		assert_eq!(exit_code(&status), Some(2));
	}

	#[test]
	fn exit_code_missing_without_cause() {
		assert_eq!(exit_code(&failure(vec![])), None);
		assert_eq!(exit_code(&Status::default()), None);
	}
}
