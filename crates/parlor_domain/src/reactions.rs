#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Emoji → set of usernames, both kept in sorted order.
///
/// Empty emoji entries are never kept; `toggle` is the only mutator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Reactions(BTreeMap<String, BTreeSet<String>>);

impl Reactions {
	pub fn new() -> Self {
		Self::default()
	}

	/// Add `username` under `emoji`, or remove it if already present.
	///
	/// Returns `true` when the reaction was added.
	pub fn toggle(&mut self, emoji: &str, username: &str) -> bool {
		let users = self.0.entry(emoji.to_string()).or_default();

		if users.remove(username) {
			if users.is_empty() {
				self.0.remove(emoji);
			}
			false
		} else {
			users.insert(username.to_string());
			true
		}
	}

	pub fn users(&self, emoji: &str) -> Vec<&str> {
		self.0
			.get(emoji)
			.map(|set| set.iter().map(String::as_str).collect())
			.unwrap_or_default()
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	pub fn len(&self) -> usize {
		self.0.len()
	}

	pub fn iter(&self) -> impl Iterator<Item = (&str, &BTreeSet<String>)> {
		self.0.iter().map(|(k, v)| (k.as_str(), v))
	}
}
