// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Layered configuration for kubedock.
//!
//! Values are resolved from built-in defaults, a TOML file
//! (`/etc/kubedock/kubedock.toml`) and `KUBEDOCK_*` environment variables,
//! in increasing order of precedence.
//!
//! # Usage
//!
//! ```ignore
//! use kubedock_config::load_config;
//!
//! let config = load_config()?;
//! println!("Deploying into {}", config.kubernetes.namespace);
//! ```

pub mod error;
pub mod layer;
pub mod sections;
pub mod sources;

pub use error::ConfigError;
pub use layer::KubedockConfigLayer;
pub use sections::*;
pub use sources::{ConfigSource, DefaultsSource, EnvSource, Precedence, TomlSource};

use tracing::{debug, info};

/// Fully resolved configuration.
#[derive(Debug, Clone, Default)]
pub struct KubedockConfig {
	pub kubernetes: KubernetesConfig,
	pub logging: LoggingConfig,
}

/// Load configuration from all sources with standard precedence.
///
/// Precedence (highest to lowest):
/// 1. Environment variables (`KUBEDOCK_*`)
/// 2. Config file (`/etc/kubedock/kubedock.toml`)
/// 3. Built-in defaults
pub fn load_config() -> Result<KubedockConfig, ConfigError> {
	load_from(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::system()),
		Box::new(EnvSource),
	])
}

/// Load configuration with a custom config file path.
pub fn load_config_with_file(
	config_path: impl Into<std::path::PathBuf>,
) -> Result<KubedockConfig, ConfigError> {
	load_from(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::new(config_path)),
		Box::new(EnvSource),
	])
}

fn load_from(mut sources: Vec<Box<dyn ConfigSource>>) -> Result<KubedockConfig, ConfigError> {
	sources.sort_by_key(|s| s.precedence());

	let mut merged = KubedockConfigLayer::default();
	for source in sources {
		debug!(source = source.name(), "loading configuration source");
		let layer = source.load()?;
		merged.merge(layer);
	}

	finalize(merged)
}

/// Finalize configuration layer into resolved config.
fn finalize(layer: KubedockConfigLayer) -> Result<KubedockConfig, ConfigError> {
	let kubernetes = layer.kubernetes.unwrap_or_default().finalize();
	let logging = layer.logging.unwrap_or_default().finalize();

	kubernetes.validate()?;

	info!(
		namespace = %kubernetes.namespace,
		instance_id = %kubernetes.instance_id,
		timeout_secs = kubernetes.timeout_secs,
		pod_template = ?kubernetes.pod_template,
		pull_secrets = kubernetes.image_pull_secrets.len(),
		"Configuration loaded"
	);

	Ok(KubedockConfig {
		kubernetes,
		logging,
	})
}
