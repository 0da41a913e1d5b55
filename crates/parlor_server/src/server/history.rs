#![forbid(unsafe_code)]

use std::collections::{HashMap, VecDeque};

use parlor_domain::{Message, MessageId, RoomName};

/// Per-room bounded ring buffers of recent messages, oldest first.
#[derive(Debug)]
pub struct RoomHistory {
	capacity: usize,
	buffers: HashMap<RoomName, VecDeque<Message>>,
}

impl RoomHistory {
	/// A capacity of zero disables buffering.
	pub fn new(capacity: usize) -> Self {
		Self {
			capacity,
			buffers: HashMap::new(),
		}
	}

	pub fn push(&mut self, msg: Message) {
		if self.capacity == 0 {
			return;
		}

		let buf = self.buffers.entry(msg.room.clone()).or_default();
		buf.push_back(msg);
		while buf.len() > self.capacity {
			buf.pop_front();
		}
	}

	pub fn snapshot(&self, room: &RoomName) -> Vec<Message> {
		self.buffers
			.get(room)
			.map(|buf| buf.iter().cloned().collect())
			.unwrap_or_default()
	}

	pub fn find_mut(&mut self, room: &RoomName, id: &MessageId) -> Option<&mut Message> {
		self.buffers.get_mut(room)?.iter_mut().find(|m| &m.id == id)
	}

	/// Locate a message when its room is unknown.
	pub fn locate(&self, id: &MessageId) -> Option<&Message> {
		self.buffers.values().flat_map(|buf| buf.iter()).find(|m| &m.id == id)
	}

	pub fn purge(&mut self, room: &RoomName) {
		self.buffers.remove(room);
	}

	pub fn len(&self, room: &RoomName) -> usize {
		self.buffers.get(room).map(VecDeque::len).unwrap_or(0)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	fn msg(room: &RoomName, n: i64) -> Message {
		Message::new(MessageId::ephemeral(n, n as u64), "alice".into(), format!("m{n}"), room.clone(), n)
	}

	#[test]
	fn hundred_and_first_push_evicts_oldest() {
		let room = RoomName::default_room();
		let mut history = RoomHistory::new(100);
		for n in 0..101 {
			history.push(msg(&room, n));
		}

		let snap = history.snapshot(&room);
		assert_eq!(snap.len(), 100);
		assert_eq!(snap.first().map(|m| m.timestamp), Some(1));
		assert_eq!(snap.last().map(|m| m.timestamp), Some(100));
	}

	#[test]
	fn rooms_are_isolated_and_purgeable() {
		let a = RoomName::new("a").expect("name");
		let b = RoomName::new("b").expect("name");
		let mut history = RoomHistory::new(10);
		history.push(msg(&a, 1));
		history.push(msg(&b, 2));

		history.purge(&a);
		assert!(history.snapshot(&a).is_empty());
		assert_eq!(history.len(&b), 1);
		assert!(history.locate(&MessageId::ephemeral(2, 2)).is_some());
	}

	#[test]
	fn zero_capacity_disables_buffering() {
		let room = RoomName::default_room();
		let mut history = RoomHistory::new(0);
		history.push(msg(&room, 1));
		assert_eq!(history.len(&room), 0);
	}

	proptest! {
		#[test]
		fn buffer_keeps_newest_in_order(capacity in 1usize..20, total in 0i64..60) {
			let room = RoomName::default_room();
			let mut history = RoomHistory::new(capacity);
			for n in 0..total {
				history.push(msg(&room, n));
			}

			let snap: Vec<i64> = history.snapshot(&room).iter().map(|m| m.timestamp).collect();
			let expected: Vec<i64> = (0..total).skip((total as usize).saturating_sub(capacity)).collect();
			prop_assert!(snap.len() <= capacity);
			prop_assert_eq!(snap, expected);
		}
	}
}
