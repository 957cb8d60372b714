// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

mod kubernetes;
mod logging;

pub use kubernetes::{KubernetesConfig, KubernetesConfigLayer};
pub use logging::{LoggingConfig, LoggingConfigLayer};
