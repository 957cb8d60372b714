// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Kubernetes backend configuration section.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ConfigError;

const DEFAULT_NAMESPACE: &str = "default";
const DEFAULT_INIT_IMAGE: &str = "busybox:1.36";
const DEFAULT_TIMEOUT_SECS: u64 = 60;
const DEFAULT_PULL_POLICY: &str = "IfNotPresent";
const DEFAULT_REVERSE_PROXY_MAX_RETRY: u32 = 30;
const DEFAULT_PRUNE_INTERVAL_SECS: u64 = 60;
const DEFAULT_PRUNE_MAX_AGE_SECS: u64 = 3600;

/// Kubernetes configuration layer (for merging).
///
/// All fields are optional to support layered configuration from
/// multiple sources (defaults, files, environment).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct KubernetesConfigLayer {
	pub namespace: Option<String>,
	pub init_image: Option<String>,
	pub image_pull_secrets: Option<Vec<String>>,
	pub pod_template: Option<PathBuf>,
	pub timeout_secs: Option<u64>,
	pub instance_id: Option<String>,
	pub pull_policy: Option<String>,
	pub dump_logs_on_failure: Option<bool>,
	pub reverse_proxy_max_retry: Option<u32>,
	pub prune_interval_secs: Option<u64>,
	pub prune_max_age_secs: Option<u64>,
}

impl KubernetesConfigLayer {
	/// Merges another layer on top of this one.
	/// Values from `other` take precedence when present.
	pub fn merge(&mut self, other: KubernetesConfigLayer) {
		if other.namespace.is_some() {
			self.namespace = other.namespace;
		}
		if other.init_image.is_some() {
			self.init_image = other.init_image;
		}
		if other.image_pull_secrets.is_some() {
			self.image_pull_secrets = other.image_pull_secrets;
		}
		if other.pod_template.is_some() {
			self.pod_template = other.pod_template;
		}
		if other.timeout_secs.is_some() {
			self.timeout_secs = other.timeout_secs;
		}
		if other.instance_id.is_some() {
			self.instance_id = other.instance_id;
		}
		if other.pull_policy.is_some() {
			self.pull_policy = other.pull_policy;
		}
		if other.dump_logs_on_failure.is_some() {
			self.dump_logs_on_failure = other.dump_logs_on_failure;
		}
		if other.reverse_proxy_max_retry.is_some() {
			self.reverse_proxy_max_retry = other.reverse_proxy_max_retry;
		}
		if other.prune_interval_secs.is_some() {
			self.prune_interval_secs = other.prune_interval_secs;
		}
		if other.prune_max_age_secs.is_some() {
			self.prune_max_age_secs = other.prune_max_age_secs;
		}
	}

	/// Resolve into the runtime configuration, filling in defaults.
	///
	/// Without a configured instance id a random one is generated, so every
	/// run labels its resources distinctly.
	pub fn finalize(self) -> KubernetesConfig {
		KubernetesConfig {
			namespace: self.namespace.unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
			init_image: self.init_image.unwrap_or_else(|| DEFAULT_INIT_IMAGE.to_string()),
			image_pull_secrets: self.image_pull_secrets.unwrap_or_default(),
			pod_template: self.pod_template,
			timeout_secs: self.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
			instance_id: self
				.instance_id
				.unwrap_or_else(|| Uuid::new_v4().simple().to_string()[..8].to_string()),
			pull_policy: self.pull_policy.unwrap_or_else(|| DEFAULT_PULL_POLICY.to_string()),
			dump_logs_on_failure: self.dump_logs_on_failure.unwrap_or(false),
			reverse_proxy_max_retry: self
				.reverse_proxy_max_retry
				.unwrap_or(DEFAULT_REVERSE_PROXY_MAX_RETRY),
			prune_interval_secs: self.prune_interval_secs.unwrap_or(DEFAULT_PRUNE_INTERVAL_SECS),
			prune_max_age_secs: self.prune_max_age_secs.unwrap_or(DEFAULT_PRUNE_MAX_AGE_SECS),
		}
	}
}

/// Kubernetes configuration (runtime).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KubernetesConfig {
	pub namespace: String,
	/// Image of the init container used to stage volumes
	pub init_image: String,
	pub image_pull_secrets: Vec<String>,
	/// Pod resource used as the base for every pod
	pub pod_template: Option<PathBuf>,
	/// Max seconds to wait for a container to start
	pub timeout_secs: u64,
	pub instance_id: String,
	/// Pull policy for containers that do not specify one
	pub pull_policy: String,
	pub dump_logs_on_failure: bool,
	pub reverse_proxy_max_retry: u32,
	/// Seconds between two runs of the stale resource reaper; 0 disables it
	pub prune_interval_secs: u64,
	pub prune_max_age_secs: u64,
}

impl Default for KubernetesConfig {
	fn default() -> Self {
		KubernetesConfigLayer::default().finalize()
	}
}

impl KubernetesConfig {
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.timeout_secs == 0 {
			return Err(ConfigError::InvalidValue {
				key: "kubernetes.timeout_secs".to_string(),
				message: "must be greater than zero".to_string(),
			});
		}
		if self.reverse_proxy_max_retry == 0 {
			return Err(ConfigError::InvalidValue {
				key: "kubernetes.reverse_proxy_max_retry".to_string(),
				message: "must be greater than zero".to_string(),
			});
		}
		if !matches!(
			self.pull_policy.to_ascii_lowercase().as_str(),
			"always" | "ifnotpresent" | "never"
		) {
			return Err(ConfigError::InvalidValue {
				key: "kubernetes.pull_policy".to_string(),
				message: format!("unknown pull policy '{}'", self.pull_policy),
			});
		}
		if !is_label_value(&self.instance_id) {
			return Err(ConfigError::InvalidValue {
				key: "kubernetes.instance_id".to_string(),
				message: format!("'{}' is not a valid label value", self.instance_id),
			});
		}
		Ok(())
	}
}

fn is_label_value(value: &str) -> bool {
	let bytes = value.as_bytes();
	!bytes.is_empty()
		&& bytes.len() <= 63
		&& bytes[0].is_ascii_alphanumeric()
		&& bytes[bytes.len() - 1].is_ascii_alphanumeric()
		&& bytes
			.iter()
			.all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	#[test]
	fn test_finalize_defaults() {
		let config = KubernetesConfigLayer::default().finalize();
		assert_eq!(config.namespace, "default");
		assert_eq!(config.timeout_secs, 60);
		assert_eq!(config.reverse_proxy_max_retry, 30);
		assert_eq!(config.pull_policy, "IfNotPresent");
		assert_eq!(config.instance_id.len(), 8);
		assert!(config.validate().is_ok());
	}

	#[test]
	fn test_merge_overrides_only_present_fields() {
		let mut base = KubernetesConfigLayer {
			namespace: Some("base".into()),
			image_pull_secrets: Some(vec!["a".into()]),
			..Default::default()
		};
		base.merge(KubernetesConfigLayer {
			image_pull_secrets: Some(vec!["b".into(), "c".into()]),
			dump_logs_on_failure: Some(true),
			..Default::default()
		});

		let config = base.finalize();
		assert_eq!(config.namespace, "base");
		assert_eq!(config.image_pull_secrets, vec!["b", "c"]);
		assert!(config.dump_logs_on_failure);
	}

	#[test]
	fn test_validate_rejects_bad_values() {
		let config = KubernetesConfig {
			pull_policy: "sometimes".into(),
			..Default::default()
		};
		assert!(config.validate().is_err());

		let config = KubernetesConfig {
			timeout_secs: 0,
			..Default::default()
		};
		assert!(config.validate().is_err());

		let config = KubernetesConfig {
			instance_id: "not valid!".into(),
			..Default::default()
		};
		assert!(config.validate().is_err());
	}

	proptest! {
		#[test]
		fn generated_instance_ids_are_valid(_unused in 0..50u32) {
			let config = KubernetesConfigLayer::default().finalize();
			prop_assert!(is_label_value(&config.instance_id));
		}
	}
}
