#![forbid(unsafe_code)]

use thiserror::Error;

/// Failures surfaced by the room broker.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BrokerError {
	#[error("invalid room name: {0}")]
	InvalidName(String),

	#[error("room with this name already exists: {0}")]
	DuplicateRoom(String),

	#[error("room not found: {0}")]
	RoomNotFound(String),

	#[error("cannot delete default room: {0}")]
	ProtectedRoom(String),

	#[error("Room is full")]
	RoomFull,

	#[error("Password required")]
	PasswordRequired,

	#[error("Incorrect password")]
	InvalidPassword,

	/// Non-fatal; callers degrade to memory-only behaviour.
	#[error("persistence unavailable: {0}")]
	PersistenceUnavailable(String),

	#[error("message not found: {0}")]
	MessageNotFound(String),

	/// Malformed or oversized input; dropped without a reply.
	#[error("message rejected: {0}")]
	InvalidMessage(String),

	#[error("only the author can edit message {0}")]
	NotAuthor(String),
}

impl BrokerError {
	/// True for input problems that are dropped silently at the boundary.
	pub fn is_silent(&self) -> bool {
		matches!(self, Self::InvalidName(_) | Self::InvalidMessage(_))
	}
}
