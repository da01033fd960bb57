//! Case-insensitive multi-valued headers (component B).
//!
//! Grounded on `original_source/src/network/http/header.py`: keys are
//! lowercased on every entry point so reads are case-insensitive end to
//! end.

use indexmap::IndexMap;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Header {
	values: IndexMap<String, Vec<String>>,
}

impl Header {
	pub fn new() -> Header {
		Header::default()
	}

	fn unify(key: &str) -> String {
		key.to_ascii_lowercase()
	}

	/// First value for `key`, or "" when absent.
	pub fn get(&self, key: &str) -> String {
		self
			.values
			.get(&Self::unify(key))
			.and_then(|vs| vs.first())
			.cloned()
			.unwrap_or_default()
	}

	/// Appends `val` unless it is already present for `key`.
	pub fn add(&mut self, key: &str, val: impl Into<String>) {
		let key = Self::unify(key);
		let val = val.into();
		let entry = self.values.entry(key).or_default();
		if !entry.contains(&val) {
			entry.push(val);
		}
	}

	/// Replaces every value for `key` with a single `val`.
	pub fn set(&mut self, key: &str, val: impl Into<String>) {
		self.values.insert(Self::unify(key), vec![val.into()]);
	}

	/// Removes `key` entirely.
	pub fn delete(&mut self, key: &str) {
		self.values.shift_remove(&Self::unify(key));
	}

	pub fn contains_key(&self, key: &str) -> bool {
		self.values.contains_key(&Self::unify(key))
	}

	/// Iterates key -> value-list pairs.
	pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
		self.values.iter()
	}
}

/// Builds a single `cookie` header value from an ordered, de-duplicated
/// list of (name, value) pairs — first occurrence wins, insertion order
/// preserved, joined with `"; "` (spec §3 "Header (B)").
pub fn build_cookie_header<'a>(cookies: impl IntoIterator<Item = (&'a str, &'a str)>) -> String {
	let mut seen = std::collections::HashSet::new();
	let mut parts = Vec::new();
	for (name, value) in cookies {
		if !seen.insert(name.to_string()) {
			continue;
		}
		parts.push(format!("{name}={value}"));
	}
	parts.join("; ")
}
