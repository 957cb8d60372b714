// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sources: environment variables and TOML files.

use std::path::PathBuf;

use tracing::{debug, trace};

use crate::error::ConfigError;
use crate::layer::KubedockConfigLayer;
use crate::sections::{KubernetesConfigLayer, LoggingConfigLayer};

/// Source precedence levels (higher = overrides lower).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
	Defaults = 10,
	ConfigFile = 20,
	Environment = 50,
}

/// Trait for configuration sources.
pub trait ConfigSource: Send + Sync {
	fn name(&self) -> &'static str;
	fn precedence(&self) -> Precedence;
	fn load(&self) -> Result<KubedockConfigLayer, ConfigError>;
}

/// Built-in defaults source.
pub struct DefaultsSource;

impl ConfigSource for DefaultsSource {
	fn name(&self) -> &'static str {
		"defaults"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Defaults
	}

	fn load(&self) -> Result<KubedockConfigLayer, ConfigError> {
		debug!("loading defaults");
		Ok(KubedockConfigLayer::default())
	}
}

/// TOML file configuration source.
pub struct TomlSource {
	path: PathBuf,
}

impl TomlSource {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	pub fn system() -> Self {
		Self::new("/etc/kubedock/kubedock.toml")
	}
}

impl ConfigSource for TomlSource {
	fn name(&self) -> &'static str {
		"toml-config"
	}

	fn precedence(&self) -> Precedence {
		Precedence::ConfigFile
	}

	fn load(&self) -> Result<KubedockConfigLayer, ConfigError> {
		if !self.path.exists() {
			debug!(path = %self.path.display(), "config file not found, skipping");
			return Ok(KubedockConfigLayer::default());
		}

		debug!(path = %self.path.display(), "loading config file");
		let content = std::fs::read_to_string(&self.path).map_err(|e| ConfigError::FileRead {
			path: self.path.clone(),
			source: e,
		})?;

		let layer: KubedockConfigLayer =
			toml::from_str(&content).map_err(|e| ConfigError::TomlParse {
				path: self.path.clone(),
				source: e,
			})?;

		trace!("parsed config layer from TOML");
		Ok(layer)
	}
}

/// Environment variable source.
///
/// Convention: KUBEDOCK_<FIELD>
pub struct EnvSource;

impl ConfigSource for EnvSource {
	fn name(&self) -> &'static str {
		"environment"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Environment
	}

	fn load(&self) -> Result<KubedockConfigLayer, ConfigError> {
		debug!("loading environment variables");
		Ok(KubedockConfigLayer {
			kubernetes: Some(load_kubernetes_from_env()?),
			logging: Some(LoggingConfigLayer {
				level: env_var("KUBEDOCK_LOG_LEVEL"),
			}),
		})
	}
}

fn env_var(name: &str) -> Option<String> {
	std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_bool(name: &str) -> Option<bool> {
	env_var(name).map(|v| v.eq_ignore_ascii_case("true") || v == "1")
}

fn env_list(name: &str) -> Option<Vec<String>> {
	env_var(name).map(|v| {
		v.split(',')
			.map(str::trim)
			.filter(|s| !s.is_empty())
			.map(String::from)
			.collect()
	})
}

fn env_u32(name: &str) -> Result<Option<u32>, ConfigError> {
	match env_var(name) {
		Some(v) => v.parse().map(Some).map_err(|_| ConfigError::InvalidValue {
			key: name.to_string(),
			message: format!("invalid u32 value '{v}'"),
		}),
		None => Ok(None),
	}
}

fn env_u64(name: &str) -> Result<Option<u64>, ConfigError> {
	match env_var(name) {
		Some(v) => v.parse().map(Some).map_err(|_| ConfigError::InvalidValue {
			key: name.to_string(),
			message: format!("invalid u64 value '{v}'"),
		}),
		None => Ok(None),
	}
}

fn load_kubernetes_from_env() -> Result<KubernetesConfigLayer, ConfigError> {
	Ok(KubernetesConfigLayer {
		namespace: env_var("KUBEDOCK_NAMESPACE"),
		init_image: env_var("KUBEDOCK_INIT_IMAGE"),
		image_pull_secrets: env_list("KUBEDOCK_IMAGE_PULL_SECRETS"),
		pod_template: env_var("KUBEDOCK_POD_TEMPLATE").map(PathBuf::from),
		timeout_secs: env_u64("KUBEDOCK_TIMEOUT")?,
		instance_id: env_var("KUBEDOCK_INSTANCE_ID"),
		pull_policy: env_var("KUBEDOCK_PULL_POLICY"),
		dump_logs_on_failure: env_bool("KUBEDOCK_DUMP_LOGS"),
		reverse_proxy_max_retry: env_u32("KUBEDOCK_REVERSE_PROXY_MAX_RETRY")?,
		prune_interval_secs: env_u64("KUBEDOCK_PRUNE_INTERVAL")?,
		prune_max_age_secs: env_u64("KUBEDOCK_PRUNE_MAX_AGE")?,
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Write;

	#[test]
	fn test_precedence_ordering() {
		assert!(Precedence::Defaults < Precedence::ConfigFile);
		assert!(Precedence::ConfigFile < Precedence::Environment);
	}

	#[test]
	fn test_missing_toml_file_is_empty_layer() {
		let layer = TomlSource::new("/nonexistent/kubedock.toml").load().unwrap();
		assert!(layer.kubernetes.is_none());
		assert!(layer.logging.is_none());
	}

	#[test]
	fn test_toml_file_is_parsed() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		writeln!(
			file,
			r#"
[kubernetes]
namespace = "ci"
image_pull_secrets = ["registry"]
timeout_secs = 120

[logging]
level = "debug"
"#
		)
		.unwrap();

		let layer = TomlSource::new(file.path()).load().unwrap();
		let kubernetes = layer.kubernetes.unwrap();
		assert_eq!(kubernetes.namespace.as_deref(), Some("ci"));
		assert_eq!(kubernetes.image_pull_secrets, Some(vec!["registry".to_string()]));
		assert_eq!(kubernetes.timeout_secs, Some(120));
		assert_eq!(layer.logging.unwrap().level.as_deref(), Some("debug"));
	}

	#[test]
	fn test_invalid_toml_is_reported() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		writeln!(file, "[kubernetes\nnamespace = ").unwrap();

		let err = TomlSource::new(file.path()).load().unwrap_err();
		assert!(matches!(err, ConfigError::TomlParse { .. }));
	}
}
