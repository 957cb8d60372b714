// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! K8s client abstraction for kubedock.
//!
//! This crate provides:
//! - A trait-based K8s client abstraction for testability
//! - Production implementation using the kube crate
//! - An in-memory mock used by the backend tests
//! - Common types for exec, port-forwarding and log streaming

mod client;
mod error;
mod kube_client;
mod mock;
mod types;

pub use client::K8sClient;
pub use error::{K8sError, K8sResult};
pub use kube_client::KubeClient;
pub use mock::{ExecCall, MockK8sClient};
pub use types::{
	ConfigMap, ConfigMapVolumeSource, Container, ContainerPort, ContainerState,
	ContainerStateRunning, ContainerStateTerminated, ContainerStateWaiting, ContainerStatus,
	DuplexStream, EmptyDirVolumeSource, EnvVar, ExecRequest, ExecStdin, ExecStdout, LocalObjectReference,
	LogOptions, LogStream, Pod, PodSecurityContext, PodSpec, PodStatus, PortForwardStream,
	ResourceRequirements, Service, ServicePort, ServiceSpec, Volume, VolumeMount,
};
