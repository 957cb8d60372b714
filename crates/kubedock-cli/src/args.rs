// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Parsing of docker style `run` arguments.

use anyhow::{bail, Context, Result};
use kubedock_backend::Container;

/// A `-p` value: `[HOST:]CONTAINER`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortSpec {
	Published { host: i32, container: i32 },
	Exposed(i32),
}

pub fn parse_port(value: &str) -> Result<PortSpec> {
	let value = value.strip_suffix("/tcp").unwrap_or(value);
	let parse = |s: &str| -> Result<i32> {
		let port: u16 = s.parse().with_context(|| format!("invalid port '{s}'"))?;
		if port == 0 {
			bail!("port must be greater than zero");
		}
		Ok(i32::from(port))
	};

	match value.split_once(':') {
		Some((host, container)) => Ok(PortSpec::Published {
			host: parse(host)?,
			container: parse(container)?,
		}),
		None => Ok(PortSpec::Exposed(parse(value)?)),
	}
}

/// A `-v` value: `HOST_PATH:CONTAINER_PATH`.
pub fn parse_bind(value: &str) -> Result<(String, String)> {
	let Some((src, dst)) = value.split_once(':') else {
		bail!("bind '{value}' must be HOST_PATH:CONTAINER_PATH");
	};
	if src.is_empty() || !dst.starts_with('/') {
		bail!("bind '{value}' needs a host path and an absolute container path");
	}
	Ok((src.to_string(), dst.to_string()))
}

pub fn apply_ports(container: &mut Container, ports: &[PortSpec]) {
	for port in ports {
		match *port {
			PortSpec::Published { host, container: internal } => {
				container.host_ports.insert(host, internal);
			}
			PortSpec::Exposed(internal) => container.exposed_ports.push(internal),
		}
	}
}
