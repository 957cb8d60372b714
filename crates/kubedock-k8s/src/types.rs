// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

use std::pin::Pin;

use bytes::Bytes;
use futures::Stream;
use tokio::io::{AsyncRead, AsyncWrite};

pub use k8s_openapi::api::core::v1::{
	ConfigMap, ConfigMapVolumeSource, Container, ContainerPort, ContainerState,
	ContainerStateRunning, ContainerStateTerminated, ContainerStateWaiting, ContainerStatus,
	EmptyDirVolumeSource, EnvVar, LocalObjectReference, Pod, PodSecurityContext, PodSpec, PodStatus,
	ResourceRequirements, Service, ServicePort, ServiceSpec, Volume, VolumeMount,
};

/// Options for log streaming.
#[derive(Debug, Clone, Default)]
pub struct LogOptions {
	pub tail: Option<u32>,
	pub timestamps: bool,
	pub follow: bool,
}

/// A pinned stream of log chunks from a container.
pub type LogStream = Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>>;

/// Byte source fed into the stdin of an exec'd command.
pub type ExecStdin = Pin<Box<dyn AsyncRead + Send>>;

/// Byte sink receiving the stdout of an exec'd command.
pub type ExecStdout = Pin<Box<dyn AsyncWrite + Send>>;

/// A command to run inside a named container of a pod.
pub struct ExecRequest {
	pub container: String,
	pub command: Vec<String>,
	pub stdin: Option<ExecStdin>,
	pub stdout: Option<ExecStdout>,
}

impl ExecRequest {
	pub fn new(container: impl Into<String>, command: &[&str]) -> Self {
		Self {
			container: container.into(),
			command: command.iter().map(|s| s.to_string()).collect(),
			stdin: None,
			stdout: None,
		}
	}

	pub fn from_command(container: impl Into<String>, command: Vec<String>) -> Self {
		Self {
			container: container.into(),
			command,
			stdin: None,
			stdout: None,
		}
	}

	pub fn with_stdin(mut self, stdin: ExecStdin) -> Self {
		self.stdin = Some(stdin);
		self
	}

	/// Stream the command's stdout into `stdout`, which is shut down once
	/// the command exits.
	pub fn with_stdout(mut self, stdout: ExecStdout) -> Self {
		self.stdout = Some(stdout);
		self
	}
}

impl std::fmt::Debug for ExecRequest {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ExecRequest")
			.field("container", &self.container)
			.field("command", &self.command)
			.field("stdin", &self.stdin.is_some())
			.field("stdout", &self.stdout.is_some())
			.finish()
	}
}

/// Bidirectional byte stream, as returned by a pod port-forward.
pub trait DuplexStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> DuplexStream for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// A single port-forward connection into a pod.
pub type PortForwardStream = Box<dyn DuplexStream>;
