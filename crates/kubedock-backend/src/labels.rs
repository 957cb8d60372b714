// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::BTreeMap;

use tracing::debug;

use crate::sanitize;
use crate::types::Container;

/// Label binding every resource to the container it was created for.
pub const CONTAINER_ID_LABEL: &str = "kubedock.containerid";
/// Label marking a resource as managed by kubedock.
pub const MANAGED_LABEL: &str = "kubedock";
/// Label carrying the id of the backend instance that created the resource.
pub const INSTANCE_ID_LABEL: &str = "kubedock.id";
pub const CONTAINER_NAME_ANNOTATION: &str = "kubedock.containername";

/// Labels for a resource created for `container`, layered on top of `base`.
///
/// Container labels that cannot be sanitized are dropped.
pub fn labels(
	base: Option<&BTreeMap<String, String>>,
	container: &Container,
	instance_id: &str,
) -> BTreeMap<String, String> {
	let mut labels = base.cloned().unwrap_or_default();

	for (key, value) in &container.labels {
		match (sanitize::label_key(key), sanitize::label_value(value)) {
			(Some(k), Some(v)) => {
				labels.insert(k, v);
			}
			_ => debug!(key = %key, value = %value, "dropping label that cannot be sanitized"),
		}
	}

	labels.extend(default_labels(instance_id));
	labels.insert(CONTAINER_ID_LABEL.to_string(), container.short_id.clone());
	labels
}

/// Labels shared by everything this backend instance creates.
pub fn default_labels(instance_id: &str) -> BTreeMap<String, String> {
	BTreeMap::from([
		(MANAGED_LABEL.to_string(), "true".to_string()),
		(INSTANCE_ID_LABEL.to_string(), instance_id.to_string()),
	])
}

/// Annotations carry the container labels verbatim, plus the container name.
pub fn annotations(base: Option<&BTreeMap<String, String>>, container: &Container) -> BTreeMap<String, String> {
	let mut annotations = base.cloned().unwrap_or_default();
	annotations.extend(container.labels.iter().map(|(k, v)| (k.clone(), v.clone())));
	annotations.insert(CONTAINER_NAME_ANNOTATION.to_string(), container.name.clone());
	annotations
}

/// Labels a service uses to select the pod of `container`.
pub fn pod_match_labels(container: &Container) -> BTreeMap<String, String> {
	BTreeMap::from([(CONTAINER_ID_LABEL.to_string(), container.short_id.clone())])
}

/// Render labels as an equality-based label selector.
pub fn selector(labels: &BTreeMap<String, String>) -> String {
	labels
		.iter()
		.map(|(k, v)| format!("{k}={v}"))
		.collect::<Vec<_>>()
		.join(",")
}

/// Selector for every resource belonging to `container`.
pub fn container_selector(container: &Container) -> String {
	selector(&pod_match_labels(container))
}

/// Selector for every kubedock managed resource.
pub fn managed_selector() -> String {
	format!("{MANAGED_LABEL}=true")
}

/// Selector for the resources of one backend instance.
pub fn instance_selector(instance_id: &str) -> String {
	format!("{MANAGED_LABEL}=true,{INSTANCE_ID_LABEL}={instance_id}")
}
