// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Commands and file transfer in the running application container.

use kubedock_k8s::{ExecRequest, ExecStdin, K8sError};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, instrument};

use crate::backend::KubernetesBackend;
use crate::error::BackendError;
use crate::pod_spec::MAIN_CONTAINER_NAME;
use crate::types::Container;

const OUTPUT_BUFFER: usize = 32 * 1024;

/// Parse the raw hex mode printed by `stat -c %f`.
pub fn parse_file_mode(path: &str, output: &str) -> Result<u32, BackendError> {
	u32::from_str_radix(output.trim(), 16).map_err(|_| BackendError::InvalidFileMode {
		path: path.to_string(),
		output: output.trim().to_string(),
	})
}

impl KubernetesBackend {
	/// Run `request` in the pod of `container`, copying its stdout into `writer`.
	async fn exec_with_output(
		&self,
		container: &Container,
		request: ExecRequest,
		writer: &mut (dyn AsyncWrite + Send + Unpin),
	) -> Result<(), BackendError> {
		let (sink, mut source) = tokio::io::duplex(OUTPUT_BUFFER);
		let request = request.with_stdout(Box::pin(sink));
		let pod_name = container.pod_name();

		let exec = self.client().exec(&pod_name, self.namespace(), request);
		// Owns the source: a failing writer closes the command's stdout.
		let copy = async move {
			tokio::io::copy(&mut source, writer).await?;
			writer.flush().await
		};
		let (executed, copied) = tokio::join!(exec, copy);
		executed?;
		copied?;
		Ok(())
	}

	pub(crate) async fn copy_into(
		&self,
		container: &Container,
		archive: ExecStdin,
		target: &str,
	) -> Result<(), BackendError> {
		let request =
			ExecRequest::new(MAIN_CONTAINER_NAME, &["tar", "-xf", "-", "-C", target]).with_stdin(archive);
		self
			.client()
			.exec(&container.pod_name(), self.namespace(), request)
			.await?;
		Ok(())
	}

	pub(crate) async fn copy_out(
		&self,
		container: &Container,
		path: &str,
		writer: &mut (dyn AsyncWrite + Send + Unpin),
	) -> Result<(), BackendError> {
		let request = ExecRequest::new(MAIN_CONTAINER_NAME, &["tar", "-cf", "-", path]);
		self.exec_with_output(container, request, writer).await
	}

	pub(crate) async fn file_mode(&self, container: &Container, path: &str) -> Result<u32, BackendError> {
		let mut output = Vec::new();
		let request = ExecRequest::new(MAIN_CONTAINER_NAME, &["stat", "-c", "%f", path]);
		self.exec_with_output(container, request, &mut output).await?;
		parse_file_mode(path, &String::from_utf8_lossy(&output))
	}

	/// Run `command` in the application container. A command that exits
	/// with a non-zero code is not an error; the code is returned.
	#[instrument(skip(self, container, stdin, writer), fields(container = %container.short_id))]
	pub(crate) async fn exec_in_container(
		&self,
		container: &Container,
		command: Vec<String>,
		stdin: Option<ExecStdin>,
		writer: &mut (dyn AsyncWrite + Send + Unpin),
	) -> Result<i32, BackendError> {
		let mut request = ExecRequest::from_command(MAIN_CONTAINER_NAME, command);
		if let Some(stdin) = stdin {
			request = request.with_stdin(stdin);
		}

		match self.exec_with_output(container, request, writer).await {
			Ok(()) => Ok(0),
			Err(BackendError::K8s(K8sError::ExecFailed {
				exit_code: Some(code),
				..
			})) => {
				debug!(code, "Command exited with non-zero code");
				Ok(code)
			}
			Err(e) => Err(e),
		}
	}
}
