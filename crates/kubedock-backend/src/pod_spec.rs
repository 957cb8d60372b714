// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Pod assembly from a container definition and an optional base template.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kubedock_k8s::{
	Container as PodContainer, ContainerPort, EnvVar, LocalObjectReference, Pod, PodSecurityContext,
	ResourceRequirements,
};
use regex::Regex;

use crate::config::BackendConfig;
use crate::error::BackendError;
use crate::labels;
use crate::types::{Container, ResourceSpec, SecurityHints};

/// Name of the application container in every pod.
pub const MAIN_CONTAINER_NAME: &str = "main";

static QUANTITY: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(r"^[+-]?(\d+(\.\d*)?|\.\d+)(([KMGTPE]i)|[numkMGTPE]|([eE][+-]?\d+))?$").unwrap()
});

/// Load a pod resource from a YAML or JSON file.
pub fn load_pod_template(path: &Path) -> Result<Pod, BackendError> {
	let template_error = |message: String| BackendError::PodTemplate {
		path: path.to_path_buf(),
		message,
	};
	let contents = std::fs::read_to_string(path).map_err(|e| template_error(e.to_string()))?;
	// JSON templates parse as YAML too.
	serde_yaml::from_str(&contents).map_err(|e| template_error(e.to_string()))
}

/// Build the pod for `container`.
///
/// Volume staging is added separately, once the config maps exist.
pub fn build_pod(container: &Container, config: &BackendConfig) -> Result<Pod, BackendError> {
	let mut pod = match &config.pod_template {
		Some(path) => load_pod_template(path)?,
		None => Pod::default(),
	};

	let resources = resource_requirements(&container.resources)?;
	let pull_policy = image_pull_policy(container, config)?;

	pod.metadata.name = Some(container.pod_name());
	pod.metadata.namespace = Some(config.namespace.clone());
	pod.metadata.labels = Some(labels::labels(
		pod.metadata.labels.as_ref(),
		container,
		&config.instance_id,
	));
	pod.metadata.annotations = Some(labels::annotations(pod.metadata.annotations.as_ref(), container));
	// Server-side fields of an exported pod are rejected on create.
	pod.metadata.resource_version = None;
	pod.metadata.uid = None;
	pod.status = None;

	let mut spec = pod.spec.take().unwrap_or_default();
	let security_context = pod_security_context(spec.security_context.take(), &container.security)?;

	spec.containers = vec![PodContainer {
		name: MAIN_CONTAINER_NAME.to_string(),
		image: Some(container.image.clone()),
		command: non_empty(&container.entrypoint),
		args: non_empty(&container.cmd),
		env: non_empty(&env_vars(container)),
		ports: non_empty(&container_ports(container)),
		resources: Some(resources),
		image_pull_policy: Some(pull_policy),
		..Default::default()
	}];
	spec.restart_policy = Some("Never".to_string());
	if let Some(account) = &container.service_account {
		spec.service_account_name = Some(account.clone());
	}
	spec.security_context = security_context;

	if !config.image_pull_secrets.is_empty() {
		let secrets = spec.image_pull_secrets.get_or_insert_with(Vec::new);
		secrets.extend(config.image_pull_secrets.iter().map(|name| LocalObjectReference {
			name: name.clone(),
		}));
	}

	pod.spec = Some(spec);
	Ok(pod)
}

fn non_empty<T: Clone>(items: &[T]) -> Option<Vec<T>> {
	if items.is_empty() {
		None
	} else {
		Some(items.to_vec())
	}
}

fn env_vars(container: &Container) -> Vec<EnvVar> {
	container
		.env
		.iter()
		.map(|entry| {
			let (name, value) = entry.split_once('=').unwrap_or((entry.as_str(), ""));
			EnvVar {
				name: name.to_string(),
				value: Some(value.to_string()),
				value_from: None,
			}
		})
		.collect()
}

fn container_ports(container: &Container) -> Vec<ContainerPort> {
	container
		.container_tcp_ports()
		.into_iter()
		.map(|port| ContainerPort {
			name: Some(format!("kd-tcp-{port}")),
			container_port: port,
			protocol: Some("TCP".to_string()),
			..Default::default()
		})
		.collect()
}

fn quantity(key: &str, value: &Option<String>) -> Result<Option<Quantity>, BackendError> {
	match value {
		None => Ok(None),
		Some(v) if QUANTITY.is_match(v) => Ok(Some(Quantity(v.clone()))),
		Some(v) => Err(BackendError::InvalidResources {
			key: key.to_string(),
			value: v.clone(),
		}),
	}
}

fn quantities(entries: [(&str, &str, &Option<String>); 2]) -> Result<Option<BTreeMap<String, Quantity>>, BackendError> {
	let mut quantities = BTreeMap::new();
	for (name, key, value) in entries {
		if let Some(q) = quantity(key, value)? {
			quantities.insert(name.to_string(), q);
		}
	}
	Ok(if quantities.is_empty() { None } else { Some(quantities) })
}

fn resource_requirements(spec: &ResourceSpec) -> Result<ResourceRequirements, BackendError> {
	Ok(ResourceRequirements {
		requests: quantities([
			("cpu", "request-cpu", &spec.request_cpu),
			("memory", "request-memory", &spec.request_memory),
		])?,
		limits: quantities([
			("cpu", "limit-cpu", &spec.limit_cpu),
			("memory", "limit-memory", &spec.limit_memory),
		])?,
		claims: None,
	})
}

/// Resolve the pull policy, falling back to the configured default.
pub fn image_pull_policy(container: &Container, config: &BackendConfig) -> Result<String, BackendError> {
	let policy = container
		.pull_policy
		.as_deref()
		.unwrap_or(&config.default_pull_policy);
	match policy.to_ascii_lowercase().as_str() {
		"always" => Ok("Always".to_string()),
		"ifnotpresent" => Ok("IfNotPresent".to_string()),
		"never" => Ok("Never".to_string()),
		_ => Err(BackendError::InvalidPullPolicy(policy.to_string())),
	}
}

fn parse_id(field: &str, value: &Option<String>) -> Result<Option<i64>, BackendError> {
	value
		.as_deref()
		.map(|v| {
			v.trim().parse::<i64>().map_err(|_| BackendError::InvalidSecurityContext {
				field: field.to_string(),
				value: v.to_string(),
			})
		})
		.transpose()
}

fn pod_security_context(
	base: Option<PodSecurityContext>,
	hints: &SecurityHints,
) -> Result<Option<PodSecurityContext>, BackendError> {
	if hints.is_empty() {
		return Ok(base);
	}

	let mut context = base.unwrap_or_default();
	if let Some(uid) = parse_id("run-as-user", &hints.run_as_user)? {
		context.run_as_user = Some(uid);
	}
	if let Some(gid) = parse_id("run-as-group", &hints.run_as_group)? {
		context.run_as_group = Some(gid);
	}
	if let Some(fs_group) = parse_id("fs-group", &hints.fs_group)? {
		context.fs_group = Some(fs_group);
	}
	Ok(Some(context))
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Write;

	fn container() -> Container {
		let mut c = Container::new("web", "nginx:1.27");
		c.entrypoint = vec!["/docker-entrypoint.sh".into()];
		c.cmd = vec!["nginx".into(), "-g".into(), "daemon off;".into()];
		c.env = vec!["A=1".into(), "B=x=y".into(), "EMPTY".into()];
		c
	}

	#[test]
	fn builds_single_main_container() {
		let c = container();
		let pod = build_pod(&c, &BackendConfig::default()).unwrap();

		assert_eq!(pod.metadata.name, Some(c.pod_name()));
		assert_eq!(pod.metadata.namespace.as_deref(), Some("default"));
		let spec = pod.spec.unwrap();
		assert_eq!(spec.restart_policy.as_deref(), Some("Never"));
		assert_eq!(spec.containers.len(), 1);

		let main = &spec.containers[0];
		assert_eq!(main.name, MAIN_CONTAINER_NAME);
		assert_eq!(main.image.as_deref(), Some("nginx:1.27"));
		assert_eq!(main.command, Some(vec!["/docker-entrypoint.sh".to_string()]));
		assert_eq!(main.args.as_ref().map(|a| a.len()), Some(3));
		assert_eq!(main.image_pull_policy.as_deref(), Some("IfNotPresent"));
		assert!(main.ports.is_none());
	}

	#[test]
	fn env_splits_on_first_equals() {
		let env = env_vars(&container());
		let pairs: Vec<(String, Option<String>)> = env.into_iter().map(|e| (e.name, e.value)).collect();
		assert_eq!(
			pairs,
			vec![
				("A".to_string(), Some("1".to_string())),
				("B".to_string(), Some("x=y".to_string())),
				("EMPTY".to_string(), Some(String::new())),
			]
		);
	}

	#[test]
	fn container_ports_are_named_per_internal_port() {
		let mut c = container();
		c.host_ports.insert(8080, 80);
		c.host_ports.insert(-1, 9090);
		c.mapped_ports.insert(8443, 443);

		let ports = container_ports(&c);
		let mut names: Vec<String> = ports.iter().filter_map(|p| p.name.clone()).collect();
		names.sort();
		assert_eq!(names, vec!["kd-tcp-443", "kd-tcp-80", "kd-tcp-9090"]);
		assert!(ports.iter().all(|p| p.protocol.as_deref() == Some("TCP")));
	}

	#[test]
	fn rejects_invalid_quantity() {
		let mut c = container();
		c.resources.limit_memory = Some("lots".into());
		let err = build_pod(&c, &BackendConfig::default()).unwrap_err();
		assert!(matches!(err, BackendError::InvalidResources { ref key, .. } if key == "limit-memory"));
		assert!(err.is_build_error());
	}

	#[test]
	fn accepts_valid_quantities() {
		let spec = ResourceSpec {
			request_cpu: Some("250m".into()),
			request_memory: Some("64Mi".into()),
			limit_cpu: Some("1".into()),
			limit_memory: Some("1.5Gi".into()),
		};
		let resources = resource_requirements(&spec).unwrap();
		let requests = resources.requests.unwrap();
		assert_eq!(requests.get("cpu"), Some(&Quantity("250m".into())));
		assert_eq!(resources.limits.unwrap().len(), 2);
	}

	#[test]
	fn pull_policy_is_case_insensitive() {
		let mut c = container();
		let config = BackendConfig::default();
		c.pull_policy = Some("always".into());
		assert_eq!(image_pull_policy(&c, &config).unwrap(), "Always");
		c.pull_policy = Some("NEVER".into());
		assert_eq!(image_pull_policy(&c, &config).unwrap(), "Never");
		c.pull_policy = Some("sometimes".into());
		assert!(matches!(
			image_pull_policy(&c, &config),
			Err(BackendError::InvalidPullPolicy(_))
		));
	}

	#[test]
	fn security_hints_overlay_template_context() {
		let base = PodSecurityContext {
			run_as_non_root: Some(true),
			run_as_user: Some(1000),
			..Default::default()
		};
		let hints = SecurityHints {
			run_as_user: Some("2000".into()),
			fs_group: Some("3000".into()),
			..Default::default()
		};

		let context = pod_security_context(Some(base), &hints).unwrap().unwrap();
		assert_eq!(context.run_as_non_root, Some(true));
		assert_eq!(context.run_as_user, Some(2000));
		assert_eq!(context.fs_group, Some(3000));
		assert_eq!(context.run_as_group, None);
	}

	#[test]
	fn rejects_non_numeric_security_hint() {
		let hints = SecurityHints {
			run_as_group: Some("wheel".into()),
			..Default::default()
		};
		assert!(matches!(
			pod_security_context(None, &hints),
			Err(BackendError::InvalidSecurityContext { .. })
		));
	}

	#[test]
	fn template_fields_are_kept_unless_overwritten() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		write!(
			file,
			r#"
apiVersion: v1
kind: Pod
metadata:
  name: template
  labels:
    origin: template
spec:
  serviceAccountName: builder
  nodeSelector:
    pool: ci
  containers:
    - name: ignored
      image: ignored
"#
		)
		.unwrap();

		let config = BackendConfig {
			pod_template: Some(file.path().to_path_buf()),
			image_pull_secrets: vec!["registry".into()],
			..Default::default()
		};
		let c = container();
		let pod = build_pod(&c, &config).unwrap();

		assert_eq!(pod.metadata.name, Some(c.pod_name()));
		let labels = pod.metadata.labels.unwrap();
		assert_eq!(labels.get("origin").map(String::as_str), Some("template"));
		let spec = pod.spec.unwrap();
		assert_eq!(spec.service_account_name.as_deref(), Some("builder"));
		assert_eq!(spec.node_selector.unwrap().get("pool").map(String::as_str), Some("ci"));
		assert_eq!(spec.containers.len(), 1);
		assert_eq!(spec.containers[0].name, MAIN_CONTAINER_NAME);
		assert_eq!(
			spec.image_pull_secrets.unwrap(),
			vec![LocalObjectReference { name: "registry".into() }]
		);
	}

	#[test]
	fn service_account_hint_wins_over_template() {
		let mut c = container();
		c.service_account = Some("runner".into());
		let pod = build_pod(&c, &BackendConfig::default()).unwrap();
		assert_eq!(pod.spec.unwrap().service_account_name.as_deref(), Some("runner"));
	}

	#[test]
	fn unreadable_template_is_a_build_error() {
		let config = BackendConfig {
			pod_template: Some("/nonexistent/podtemplate.yaml".into()),
			..Default::default()
		};
		let err = build_pod(&container(), &config).unwrap_err();
		assert!(matches!(err, BackendError::PodTemplate { .. }));
	}
}
