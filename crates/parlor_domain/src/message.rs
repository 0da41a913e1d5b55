#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

use crate::{MessageId, Reactions, RoomName};

/// Kind of chat message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
	#[default]
	Message,
	Reply,
	System,
}

impl MessageType {
	/// Stable string identifier.
	pub const fn as_str(self) -> &'static str {
		match self {
			MessageType::Message => "message",
			MessageType::Reply => "reply",
			MessageType::System => "system",
		}
	}

	pub fn parse(s: &str) -> Option<Self> {
		match s {
			"message" => Some(Self::Message),
			"reply" => Some(Self::Reply),
			"system" => Some(Self::System),
			_ => None,
		}
	}
}

/// Context of the message being replied to, as supplied by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyRef {
	pub message_id: String,
	#[serde(default)]
	pub username: String,
	#[serde(default)]
	pub text: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub timestamp: Option<i64>,
}

/// A chat message as buffered, persisted and broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
	pub id: MessageId,
	pub username: String,
	pub text: String,
	pub room: RoomName,
	/// Unix milliseconds.
	pub timestamp: i64,
	pub message_type: MessageType,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub reply_to: Option<ReplyRef>,
	#[serde(default)]
	pub reactions: Reactions,
	#[serde(default)]
	pub is_edited: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub edited_at: Option<i64>,
}

impl Message {
	pub fn new(id: MessageId, username: String, text: String, room: RoomName, timestamp: i64) -> Self {
		Self {
			id,
			username,
			text,
			room,
			timestamp,
			message_type: MessageType::Message,
			reply_to: None,
			reactions: Reactions::default(),
			is_edited: false,
			edited_at: None,
		}
	}

	/// Attach reply context; the message becomes a `reply`.
	pub fn with_reply(mut self, reply_to: ReplyRef) -> Self {
		self.reply_to = Some(reply_to);
		self.message_type = MessageType::Reply;
		self
	}

	pub fn mark_edited(&mut self, text: String, at: i64) {
		self.text = text;
		self.is_edited = true;
		self.edited_at = Some(at);
	}
}
