// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Deployment core for kubedock.
//!
//! Turns a container definition into a pod, stages its volumes through an
//! init container, waits for it to become ready, creates services for its
//! network aliases and exposes its ports on the local host.
//!
//! # Architecture
//!
//! - [`KubernetesBackend`] implements the [`Backend`] contract on top of a
//!   [`kubedock_k8s::K8sClient`]
//! - [`pod_spec`] builds pods from containers and an optional template
//! - [`sanitize`] turns arbitrary strings into legal identifiers
//! - [`start_cleanup_task`] reaps stale resources in the background

pub mod archive;
mod backend;
mod cleanup;
mod config;
mod deploy;
mod error;
mod exec;
pub mod labels;
mod network;
pub mod pod_spec;
mod proxy;
pub mod sanitize;
mod services;
mod status;
mod types;
mod volumes;
mod watch;

pub use backend::{Backend, KubernetesBackend};
pub use cleanup::start_cleanup_task;
pub use config::BackendConfig;
pub use error::BackendError;
pub use exec::parse_file_mode;
pub use network::{exposed_mappings, map_container_tcp_ports};
pub use services::{build_services, is_valid_alias};
pub use status::{classify_pod, POLL_INTERVAL};
pub use types::{
	CleanupResult, Container, DeployState, ResourceSpec, SecurityHints, StopChannels, SHORT_ID_LENGTH,
};
pub use volumes::{file_id, INIT_CONTAINER_NAME};
