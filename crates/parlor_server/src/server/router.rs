#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parlor_domain::{BrokerError, Message, MessageId, ReplyRef, RoomName};
use parlor_protocol::ChatMessagePayload;

/// Current Unix time in milliseconds.
#[inline]
pub fn unix_ms_now() -> i64 {
	let elapsed = SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.unwrap_or(Duration::from_secs(0));
	i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX)
}

/// Escape the two characters that could open markup on a client.
pub fn sanitize(text: &str) -> String {
	text.replace('<', "&lt;").replace('>', "&gt;")
}

/// Resolve the destination room: explicit, else current, else the fallback.
///
/// An explicit name that fails validation yields `None`.
pub fn resolve_room(explicit: Option<&str>, current: Option<&RoomName>, fallback: &RoomName) -> Option<RoomName> {
	match explicit.map(str::trim).filter(|s| !s.is_empty()) {
		Some(name) => RoomName::new(name).ok(),
		None => Some(current.unwrap_or(fallback).clone()),
	}
}

/// Stateless message checks plus ephemeral id assignment.
#[derive(Debug)]
pub struct MessageRouter {
	max_chars: usize,
	seq: AtomicU64,
}

impl MessageRouter {
	pub fn new(max_chars: usize) -> Self {
		Self {
			max_chars,
			seq: AtomicU64::new(0),
		}
	}

	/// Accept raw client text, returning it sanitized.
	///
	/// Blank text and text over the length cap (counted before escaping) are
	/// rejected.
	pub fn accept_text(&self, raw: &str) -> Result<String, BrokerError> {
		if raw.trim().is_empty() {
			return Err(BrokerError::InvalidMessage("message is empty".to_string()));
		}
		if raw.chars().count() > self.max_chars {
			return Err(BrokerError::InvalidMessage(format!(
				"message exceeds {} characters",
				self.max_chars
			)));
		}
		Ok(sanitize(raw))
	}

	pub fn next_ephemeral_id(&self, now_ms: i64) -> MessageId {
		let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
		MessageId::ephemeral(now_ms, seq)
	}

	/// Stamp and classify an accepted message.
	pub fn build(&self, payload: ChatMessagePayload, text: String, username: &str, room: RoomName) -> Message {
		let now = unix_ms_now();
		let timestamp = payload.timestamp.filter(|ts| *ts > 0).unwrap_or(now);

		let msg = Message::new(self.next_ephemeral_id(now), username.to_string(), text, room, timestamp);
		match payload.reply_to {
			Some(reply) => msg.with_reply(ReplyRef {
				message_id: reply.message_id,
				username: sanitize(&reply.username),
				text: sanitize(&reply.text),
				timestamp: reply.timestamp,
			}),
			None => msg,
		}
	}
}
