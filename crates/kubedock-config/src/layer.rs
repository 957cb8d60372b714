// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use serde::Deserialize;

use crate::sections::{KubernetesConfigLayer, LoggingConfigLayer};

/// Configuration layer, all fields are Option for merging.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct KubedockConfigLayer {
	#[serde(default)]
	pub kubernetes: Option<KubernetesConfigLayer>,
	#[serde(default)]
	pub logging: Option<LoggingConfigLayer>,
}

impl KubedockConfigLayer {
	/// Merge another layer into this one. Other layer takes precedence.
	pub fn merge(&mut self, other: KubedockConfigLayer) {
		merge_option(&mut self.kubernetes, other.kubernetes, KubernetesConfigLayer::merge);
		merge_option(&mut self.logging, other.logging, LoggingConfigLayer::merge);
	}
}

fn merge_option<T, F>(target: &mut Option<T>, source: Option<T>, merge_fn: F)
where
	F: FnOnce(&mut T, T),
{
	match (target.as_mut(), source) {
		(Some(t), Some(s)) => merge_fn(t, s),
		(None, Some(s)) => *target = Some(s),
		_ => {}
	}
}
