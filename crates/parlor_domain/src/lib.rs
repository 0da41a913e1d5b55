#![forbid(unsafe_code)]

pub mod error;
pub mod message;
pub mod reactions;
pub mod room;

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

pub use error::BrokerError;
pub use message::{Message, MessageType, ReplyRef};
pub use reactions::Reactions;
pub use room::{Room, RoomSpec, RoomStats, RoomSummary, RoomUpdate};

/// Room every message falls back to when no room is given.
pub const DEFAULT_ROOM: &str = "global";

/// Built-in rooms bootstrapped at startup. Configuration may add more.
pub const DEFAULT_ROOMS: [&str; 3] = ["global", "general", "random"];

/// Maximum room name length, counted in characters after trimming.
pub const MAX_ROOM_NAME_CHARS: usize = 50;

/// Validated room name: trimmed, non-empty, at most 50 characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomName(String);

impl RoomName {
	pub fn new(name: impl AsRef<str>) -> Result<Self, BrokerError> {
		let name = name.as_ref().trim();
		if name.is_empty() {
			return Err(BrokerError::InvalidName("room name cannot be empty".to_string()));
		}
		if name.chars().count() > MAX_ROOM_NAME_CHARS {
			return Err(BrokerError::InvalidName(format!(
				"room name too long (max {MAX_ROOM_NAME_CHARS} characters)"
			)));
		}
		Ok(Self(name.to_string()))
	}

	/// The well-known fallback room.
	pub fn default_room() -> Self {
		Self(DEFAULT_ROOM.to_string())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}

	pub fn into_string(self) -> String {
		self.0
	}
}

impl fmt::Display for RoomName {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl FromStr for RoomName {
	type Err = BrokerError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		RoomName::new(s)
	}
}

impl TryFrom<String> for RoomName {
	type Error = BrokerError;

	fn try_from(value: String) -> Result<Self, Self::Error> {
		RoomName::new(value)
	}
}

impl From<RoomName> for String {
	fn from(value: RoomName) -> Self {
		value.0
	}
}

/// Process-local connection identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnId(pub u64);

impl fmt::Display for ConnId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "conn-{}", self.0)
	}
}

/// Durable message identifier assigned by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerMessageId(pub uuid::Uuid);

impl ServerMessageId {
	/// Create a new random server message id.
	pub fn new_v4() -> Self {
		Self(uuid::Uuid::new_v4())
	}
}

impl fmt::Display for ServerMessageId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl FromStr for ServerMessageId {
	type Err = uuid::Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		uuid::Uuid::parse_str(s.trim()).map(Self)
	}
}

/// Message identifier as seen by clients.
///
/// Persisted messages carry the store's durable id. Memory-only messages get an
/// ephemeral `tmp-<unix ms>-<seq>` id, which can never be used to target
/// reactions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageId {
	Durable(ServerMessageId),
	Ephemeral(String),
}

impl MessageId {
	pub fn ephemeral(unix_ms: i64, seq: u64) -> Self {
		Self::Ephemeral(format!("tmp-{unix_ms}-{seq}"))
	}

	pub fn durable(&self) -> Option<ServerMessageId> {
		match self {
			Self::Durable(id) => Some(*id),
			Self::Ephemeral(_) => None,
		}
	}

	pub fn is_durable(&self) -> bool {
		matches!(self, Self::Durable(_))
	}
}

impl fmt::Display for MessageId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Durable(id) => write!(f, "{id}"),
			Self::Ephemeral(id) => f.write_str(id),
		}
	}
}

impl From<String> for MessageId {
	fn from(value: String) -> Self {
		match value.parse::<ServerMessageId>() {
			Ok(id) => Self::Durable(id),
			Err(_) => Self::Ephemeral(value),
		}
	}
}

impl From<MessageId> for String {
	fn from(value: MessageId) -> Self {
		value.to_string()
	}
}

impl From<ServerMessageId> for MessageId {
	fn from(value: ServerMessageId) -> Self {
		Self::Durable(value)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn room_name_is_trimmed_and_bounded() {
		assert_eq!(RoomName::new("  lobby ").unwrap().as_str(), "lobby");
		assert!(matches!(RoomName::new("   "), Err(BrokerError::InvalidName(_))));
		assert!(RoomName::new("a".repeat(50)).is_ok());
		assert!(matches!(RoomName::new("a".repeat(51)), Err(BrokerError::InvalidName(_))));
	}

	#[test]
	fn message_id_parses_durable_and_ephemeral() {
		let durable = ServerMessageId::new_v4();
		assert_eq!(MessageId::from(durable.to_string()), MessageId::Durable(durable));

		let tmp = MessageId::ephemeral(1_700_000_000_000, 3);
		assert_eq!(tmp.to_string(), "tmp-1700000000000-3");
		assert!(!MessageId::from(tmp.to_string()).is_durable());
	}

	#[test]
	fn room_name_rejects_invalid_json() {
		assert!(serde_json::from_str::<RoomName>("\"\"").is_err());
		let name: RoomName = serde_json::from_str("\" demo \"").unwrap();
		assert_eq!(name.as_str(), "demo");
	}
}
