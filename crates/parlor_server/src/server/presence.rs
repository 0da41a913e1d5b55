#![forbid(unsafe_code)]

use std::collections::HashMap;

use parlor_domain::RoomName;
use parlor_protocol::{ServerEvent, TypingPayload, UserListPayload};
use tokio::task::JoinHandle;

use crate::server::registry::RoomRegistry;

pub fn user_list_event(registry: &RoomRegistry, room: &RoomName) -> ServerEvent {
	ServerEvent::UserList(UserListPayload {
		room: room.to_string(),
		users: registry.usernames(room),
	})
}

pub fn typing_event(room: &RoomName, username: &str) -> ServerEvent {
	ServerEvent::UserTyping(TypingPayload {
		room: room.to_string(),
		username: username.to_string(),
	})
}

pub fn stop_typing_event(room: &RoomName, username: &str) -> ServerEvent {
	ServerEvent::UserStopTyping(TypingPayload {
		room: room.to_string(),
		username: username.to_string(),
	})
}

type TypingKey = (RoomName, String);

#[derive(Debug)]
struct TypingTimer {
	generation: u64,
	handle: JoinHandle<()>,
}

/// One expiry timer per (room, username).
///
/// Each arm bumps a generation counter; an expiry only counts if it carries the
/// generation of the timer that is still armed, so a timer that fires while
/// being replaced is ignored.
#[derive(Debug, Default)]
pub struct TypingTracker {
	timers: HashMap<TypingKey, TypingTimer>,
	next_generation: u64,
}

impl TypingTracker {
	pub fn new() -> Self {
		Self::default()
	}

	/// (Re)arm the timer. `spawn` receives the generation to report on expiry.
	pub fn arm(&mut self, room: &RoomName, username: &str, spawn: impl FnOnce(u64) -> JoinHandle<()>) {
		self.next_generation = self.next_generation.wrapping_add(1);
		let generation = self.next_generation;
		let handle = spawn(generation);

		if let Some(old) = self
			.timers
			.insert((room.clone(), username.to_string()), TypingTimer { generation, handle })
		{
			old.handle.abort();
		}
	}

	/// Cancel typing. Returns whether the user was typing.
	pub fn stop(&mut self, room: &RoomName, username: &str) -> bool {
		match self.timers.remove(&(room.clone(), username.to_string())) {
			Some(timer) => {
				timer.handle.abort();
				true
			}
			None => false,
		}
	}

	/// Handle a fired timer. Returns true if it was still current.
	pub fn expire(&mut self, room: &RoomName, username: &str, generation: u64) -> bool {
		let key = (room.clone(), username.to_string());
		match self.timers.get(&key) {
			Some(timer) if timer.generation == generation => {
				self.timers.remove(&key);
				true
			}
			_ => false,
		}
	}

	pub fn is_typing(&self, room: &RoomName, username: &str) -> bool {
		self.timers.contains_key(&(room.clone(), username.to_string()))
	}

	/// Cancel every timer in a room. Returns the usernames that were typing.
	pub fn clear_room(&mut self, room: &RoomName) -> Vec<String> {
		let keys: Vec<TypingKey> = self.timers.keys().filter(|(r, _)| r == room).cloned().collect();
		keys.into_iter()
			.filter_map(|key| {
				let timer = self.timers.remove(&key)?;
				timer.handle.abort();
				Some(key.1)
			})
			.collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::time::Duration;

	fn idle() -> JoinHandle<()> {
		tokio::spawn(async {
			tokio::time::sleep(Duration::from_secs(3600)).await;
		})
	}

	#[tokio::test]
	async fn refresh_invalidates_previous_generation() {
		let room = RoomName::default_room();
		let mut tracker = TypingTracker::new();

		let mut first = 0;
		tracker.arm(&room, "alice", |g| {
			first = g;
			idle()
		});
		let mut second = 0;
		tracker.arm(&room, "alice", |g| {
			second = g;
			idle()
		});

		assert_ne!(first, second);
		assert!(!tracker.expire(&room, "alice", first));
		assert!(tracker.is_typing(&room, "alice"));
		assert!(tracker.expire(&room, "alice", second));
		assert!(!tracker.is_typing(&room, "alice"));
	}

	#[tokio::test]
	async fn stop_and_clear() {
		let room = RoomName::default_room();
		let other = RoomName::new("other").expect("name");
		let mut tracker = TypingTracker::new();
		tracker.arm(&room, "alice", |_| idle());
		tracker.arm(&room, "bob", |_| idle());
		tracker.arm(&other, "carol", |_| idle());

		assert!(tracker.stop(&room, "alice"));
		assert!(!tracker.stop(&room, "alice"));

		assert_eq!(tracker.clear_room(&room), ["bob"]);
		assert!(tracker.is_typing(&other, "carol"));
	}
}
