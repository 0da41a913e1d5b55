#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

use crate::RoomName;

pub const DEFAULT_MAX_USERS: u32 = 100;

/// Room metadata. Membership is tracked separately by the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Room {
	pub name: RoomName,
	pub description: String,
	pub is_public: bool,
	/// Lowercase hex SHA-256 of the room password.
	pub password_hash: Option<String>,
	pub max_users: u32,
	pub persist_messages: bool,
	pub message_count: u64,
	pub created_by: String,
	/// Unix milliseconds.
	pub created_at: i64,
}

impl Room {
	/// Build a room from a creation request. The caller hashes the password.
	pub fn from_spec(name: RoomName, spec: &RoomSpec, password_hash: Option<String>, created_at: i64) -> Self {
		let created_by = spec
			.created_by
			.as_deref()
			.map(str::trim)
			.filter(|s| !s.is_empty())
			.unwrap_or("Anonymous")
			.to_string();

		Self {
			name,
			description: spec.description.as_deref().unwrap_or_default().trim().to_string(),
			is_public: spec.is_public.unwrap_or(true),
			password_hash,
			max_users: spec.max_users.unwrap_or(DEFAULT_MAX_USERS),
			persist_messages: spec.persist_messages.unwrap_or(true),
			message_count: 0,
			created_by,
			created_at,
		}
	}

	pub fn has_password(&self) -> bool {
		self.password_hash.is_some()
	}

	pub fn apply(&mut self, update: &RoomUpdate) {
		if let Some(description) = update.description.as_deref() {
			self.description = description.trim().to_string();
		}
		if let Some(is_public) = update.is_public {
			self.is_public = is_public;
		}
		if let Some(max_users) = update.max_users {
			self.max_users = max_users;
		}
	}

	/// Client-facing view; never exposes the password hash.
	pub fn summary(&self, active_users: usize) -> RoomSummary {
		RoomSummary {
			name: self.name.clone(),
			description: self.description.clone(),
			is_public: self.is_public,
			has_password: self.has_password(),
			max_users: self.max_users,
			persist_messages: self.persist_messages,
			message_count: self.message_count,
			created_by: self.created_by.clone(),
			created_at: self.created_at,
			active_users,
		}
	}
}

/// Room creation request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSpec {
	pub name: String,
	#[serde(default)]
	pub description: Option<String>,
	#[serde(default)]
	pub created_by: Option<String>,
	#[serde(default)]
	pub is_public: Option<bool>,
	#[serde(default)]
	pub max_users: Option<u32>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub password: Option<String>,
	#[serde(default)]
	pub persist_messages: Option<bool>,
}

impl RoomSpec {
	pub fn named(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			..Self::default()
		}
	}
}

/// Mutable room settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomUpdate {
	#[serde(default)]
	pub description: Option<String>,
	#[serde(default)]
	pub is_public: Option<bool>,
	#[serde(default)]
	pub max_users: Option<u32>,
}

/// Room listing entry with live membership size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
	pub name: RoomName,
	pub description: String,
	pub is_public: bool,
	pub has_password: bool,
	pub max_users: u32,
	pub persist_messages: bool,
	pub message_count: u64,
	pub created_by: String,
	pub created_at: i64,
	pub active_users: usize,
}

/// Aggregate statistics for one room's history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomStats {
	pub total_messages: u64,
	pub unique_users: usize,
	pub user_list: Vec<String>,
	pub oldest_message: Option<i64>,
	pub newest_message: Option<i64>,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn spec_defaults_match_room_defaults() {
		let room = Room::from_spec(RoomName::new("demo").unwrap(), &RoomSpec::named("demo"), None, 10);
		assert!(room.is_public);
		assert!(room.persist_messages);
		assert_eq!(room.max_users, DEFAULT_MAX_USERS);
		assert_eq!(room.created_by, "Anonymous");
		assert_eq!(room.message_count, 0);
	}

	#[test]
	fn summary_hides_password_hash() {
		let room = Room::from_spec(
			RoomName::new("vault").unwrap(),
			&RoomSpec::named("vault"),
			Some("abc".to_string()),
			10,
		);
		let json = serde_json::to_value(room.summary(2)).unwrap();
		assert_eq!(json["hasPassword"], true);
		assert_eq!(json["activeUsers"], 2);
		assert!(json.get("passwordHash").is_none());
	}

	#[test]
	fn update_only_touches_given_fields() {
		let mut room = Room::from_spec(RoomName::new("demo").unwrap(), &RoomSpec::named("demo"), None, 10);
		room.apply(&RoomUpdate {
			max_users: Some(5),
			..RoomUpdate::default()
		});
		assert_eq!(room.max_users, 5);
		assert!(room.is_public);
	}
}
