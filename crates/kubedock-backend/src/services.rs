// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::LazyLock;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kubedock_k8s::{Service, ServicePort, ServiceSpec};
use regex::Regex;
use tracing::{debug, info, instrument, warn};

use crate::backend::KubernetesBackend;
use crate::error::BackendError;
use crate::labels;
use crate::types::Container;

static VALID_ALIAS: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"^[a-z]([-a-z0-9]*[a-z0-9])?$").unwrap());

/// Whether `alias` can be used as a service name.
pub fn is_valid_alias(alias: &str) -> bool {
	alias.len() <= 63 && VALID_ALIAS.is_match(alias)
}

fn service_ports(container: &Container) -> Vec<ServicePort> {
	container
		.service_ports()
		.into_iter()
		.map(|(src, dst)| ServicePort {
			name: Some(format!("tcp-{src}-{dst}")),
			protocol: Some("TCP".to_string()),
			port: src,
			target_port: Some(IntOrString::Int(dst)),
			..Default::default()
		})
		.collect()
}

/// Services exposing the ports of `container` under each of its valid aliases.
pub fn build_services(container: &Container, namespace: &str, instance_id: &str) -> Vec<Service> {
	let ports = service_ports(container);
	if ports.is_empty() {
		if !container.network_aliases.is_empty() {
			debug!(container = %container.short_id, "Not creating services, container has no ports");
		}
		return Vec::new();
	}

	container
		.network_aliases
		.iter()
		.filter(|alias| {
			let valid = is_valid_alias(alias);
			if !valid {
				warn!(alias = %alias, "Ignoring network alias that is not a valid service name");
			}
			valid
		})
		.map(|alias| Service {
			metadata: ObjectMeta {
				name: Some(alias.clone()),
				namespace: Some(namespace.to_string()),
				labels: Some(labels::labels(None, container, instance_id)),
				annotations: Some(labels::annotations(None, container)),
				..Default::default()
			},
			spec: Some(ServiceSpec {
				selector: Some(labels::pod_match_labels(container)),
				ports: Some(ports.clone()),
				..Default::default()
			}),
			status: None,
		})
		.collect()
}

impl KubernetesBackend {
	/// Create the services for `container`. Returns the number created.
	#[instrument(skip(self, container), fields(container = %container.short_id))]
	pub(crate) async fn create_services(&self, container: &Container) -> Result<usize, BackendError> {
		let services = build_services(container, self.namespace(), &self.config().instance_id);
		let count = services.len();
		for service in services {
			let name = service.metadata.name.clone().unwrap_or_default();
			self
				.client()
				.create_service(self.namespace(), service)
				.await
				.map_err(|source| BackendError::ServiceProvisioning {
					name: name.clone(),
					source,
				})?;
			info!(service = %name, "Created service");
		}
		Ok(count)
	}
}
