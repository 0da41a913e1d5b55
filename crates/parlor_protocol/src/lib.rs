#![forbid(unsafe_code)]

pub mod events;
pub mod framing;

pub use events::{
	ChatMessagePayload, ClientEvent, CreateRoomPayload, DeleteRoomPayload, EditMessagePayload, JoinRoomPayload,
	LeaveRoomPayload, ListRoomsPayload, ReactionPayload, ReactionUpdatePayload, RoomDeletedPayload, RoomErrorPayload,
	ServerEvent, TypingPayload, UpdateRoomPayload, UserListPayload,
};
pub use framing::{
	DEFAULT_MAX_FRAME_SIZE, FramingError, decode_frame, encode_frame, encode_frame_default, encode_frame_into,
	frame_len_from_payload_len, try_decode_frame_from_buffer,
};

/// Protocol version constants.
pub mod version {
	/// Current protocol major version (v1).
	pub const PROTOCOL_MAJOR: u32 = 1;
	/// Current protocol minor version.
	pub const PROTOCOL_MINOR: u32 = 0;

	/// ALPN identifier negotiated by client and server.
	pub const ALPN: &[u8] = b"parlor-v1";
}
