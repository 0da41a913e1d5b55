#![forbid(unsafe_code)]

//! Wire events.
//!
//! Every frame carries one JSON object of the form
//! `{"event": "<kebab-case name>", "data": <payload>}`.

use parlor_domain::{Message, Reactions, ReplyRef, RoomSpec, RoomSummary, RoomUpdate};
use serde::{Deserialize, Serialize};

/// Room creation payload; identical to the domain request.
pub type CreateRoomPayload = RoomSpec;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomPayload {
	pub room: String,
	pub username: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub password: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveRoomPayload {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub room: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessagePayload {
	pub user_msg: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub room: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub timestamp: Option<i64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub reply_to: Option<ReplyRef>,
}

impl ChatMessagePayload {
	pub fn text(user_msg: impl Into<String>) -> Self {
		Self {
			user_msg: user_msg.into(),
			room: None,
			timestamp: None,
			reply_to: None,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditMessagePayload {
	pub message_id: String,
	pub user_msg: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
	pub room: String,
	pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionPayload {
	pub message_id: String,
	pub emoji: String,
	pub username: String,
	#[serde(default)]
	pub room: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteRoomPayload {
	pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRoomPayload {
	pub name: String,
	#[serde(flatten)]
	pub update: RoomUpdate,
}

/// `list-rooms` carries no fields. Clients may send `{}`, `null` or no `data` at all.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListRoomsPayload {}

/// Events sent by clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
	JoinRoom(JoinRoomPayload),
	LeaveRoom(LeaveRoomPayload),
	ChatMessage(ChatMessagePayload),
	EditMessage(EditMessagePayload),
	Typing(TypingPayload),
	StopTyping(TypingPayload),
	ToggleReaction(ReactionPayload),
	CreateRoom(CreateRoomPayload),
	UpdateRoom(UpdateRoomPayload),
	DeleteRoom(DeleteRoomPayload),
	ListRooms(Option<ListRoomsPayload>),
}

impl ClientEvent {
	pub fn list_rooms() -> Self {
		Self::ListRooms(Some(ListRoomsPayload::default()))
	}

	/// Wire name, for logs and metrics labels.
	pub fn name(&self) -> &'static str {
		match self {
			Self::JoinRoom(_) => "join-room",
			Self::LeaveRoom(_) => "leave-room",
			Self::ChatMessage(_) => "chat-message",
			Self::EditMessage(_) => "edit-message",
			Self::Typing(_) => "typing",
			Self::StopTyping(_) => "stop-typing",
			Self::ToggleReaction(_) => "toggle-reaction",
			Self::CreateRoom(_) => "create-room",
			Self::UpdateRoom(_) => "update-room",
			Self::DeleteRoom(_) => "delete-room",
			Self::ListRooms(_) => "list-rooms",
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserListPayload {
	pub room: String,
	pub users: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionUpdatePayload {
	pub message_id: String,
	pub room: String,
	pub reactions: Reactions,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomErrorPayload {
	pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomDeletedPayload {
	pub room: String,
}

/// Events sent by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
	UserList(UserListPayload),
	MessageHistory(Vec<Message>),
	ChatMessage(Message),
	MessageEdited(Message),
	UserTyping(TypingPayload),
	UserStopTyping(TypingPayload),
	ReactionUpdate(ReactionUpdatePayload),
	RoomError(RoomErrorPayload),
	RoomCreated(RoomSummary),
	RoomUpdated(RoomSummary),
	RoomDeleted(RoomDeletedPayload),
	RoomList(Vec<RoomSummary>),
}

impl ServerEvent {
	pub fn room_error(message: impl Into<String>) -> Self {
		Self::RoomError(RoomErrorPayload {
			message: message.into(),
		})
	}

	pub fn name(&self) -> &'static str {
		match self {
			Self::UserList(_) => "user-list",
			Self::MessageHistory(_) => "message-history",
			Self::ChatMessage(_) => "chat-message",
			Self::MessageEdited(_) => "message-edited",
			Self::UserTyping(_) => "user-typing",
			Self::UserStopTyping(_) => "user-stop-typing",
			Self::ReactionUpdate(_) => "reaction-update",
			Self::RoomError(_) => "room-error",
			Self::RoomCreated(_) => "room-created",
			Self::RoomUpdated(_) => "room-updated",
			Self::RoomDeleted(_) => "room-deleted",
			Self::RoomList(_) => "room-list",
		}
	}
}
