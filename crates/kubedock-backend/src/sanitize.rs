// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Conversion of arbitrary strings into legal kubernetes identifiers.
//!
//! Every function returns `None` when the input cannot be turned into a
//! legal identifier (for example because nothing alphanumeric is left).

/// Max length of a label value, the name part of a label key and a DNS-1123 label.
pub const MAX_LABEL_LENGTH: usize = 63;

/// Max length of a DNS-1123 subdomain, as used for label key prefixes.
pub const MAX_SUBDOMAIN_LENGTH: usize = 253;

fn trim_to_alphanumeric(value: &str, max: usize) -> String {
	let trimmed = value
		.trim_start_matches(|c: char| !c.is_ascii_alphanumeric())
		.trim_end_matches(|c: char| !c.is_ascii_alphanumeric());

	// Input is ASCII at this point, so byte slicing is on char boundaries.
	if trimmed.len() > max {
		trimmed[..max]
			.trim_end_matches(|c: char| !c.is_ascii_alphanumeric())
			.to_string()
	} else {
		trimmed.to_string()
	}
}

/// Sanitize a label value.
///
/// Illegal characters become `_`, leading and trailing non-alphanumerics are
/// trimmed and the result is capped at 63 characters. An empty value is a
/// legal label value and is returned as such.
pub fn label_value(value: &str) -> Option<String> {
	if value.is_empty() {
		return Some(String::new());
	}

	let mapped: String = value
		.chars()
		.map(|c| {
			if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
				c
			} else {
				'_'
			}
		})
		.collect();

	let result = trim_to_alphanumeric(&mapped, MAX_LABEL_LENGTH);
	if result.is_empty() {
		None
	} else {
		Some(result)
	}
}

/// Sanitize a label key of the form `[prefix/]name`.
///
/// The name part follows the label value rules but may not be empty; the
/// optional prefix must reduce to a DNS-1123 subdomain.
pub fn label_key(key: &str) -> Option<String> {
	let (prefix, name) = match key.rsplit_once('/') {
		Some((prefix, name)) => (Some(prefix), name),
		None => (None, key),
	};

	let name = label_value(name).filter(|n| !n.is_empty())?;
	match prefix {
		None => Some(name),
		Some(prefix) => dns_subdomain(prefix).map(|p| format!("{p}/{name}")),
	}
}

/// Sanitize a string into a DNS-1123 label, as used for resource and volume names.
pub fn resource_name(value: &str) -> Option<String> {
	let mapped: String = value
		.to_ascii_lowercase()
		.chars()
		.map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
		.collect();

	let result = trim_to_alphanumeric(&mapped, MAX_LABEL_LENGTH);
	if result.is_empty() {
		None
	} else {
		Some(result)
	}
}

fn dns_subdomain(value: &str) -> Option<String> {
	let segments: Vec<String> = value.split('.').filter_map(resource_name).collect();
	if segments.is_empty() {
		return None;
	}

	let joined = segments.join(".");
	let result = trim_to_alphanumeric(&joined, MAX_SUBDOMAIN_LENGTH);
	if result.is_empty() {
		None
	} else {
		Some(result)
	}
}
