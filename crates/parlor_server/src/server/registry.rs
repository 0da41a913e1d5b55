#![forbid(unsafe_code)]

use std::collections::{HashMap, HashSet};

use parlor_domain::{BrokerError, ConnId, Room, RoomName, RoomSummary, RoomUpdate};

use crate::server::guard;

/// A live connection inside a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
	pub conn: ConnId,
	pub username: String,
	pub joined_at: i64,
}

/// Result of a successful join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinOutcome {
	/// Room the connection left to make this join, if any.
	pub previous: Option<RoomName>,
	/// The connection was already in the room; membership is unchanged.
	pub already_member: bool,
	/// Previous username when a member rejoined under a new one.
	pub renamed_from: Option<String>,
}

#[derive(Debug)]
struct RoomEntry {
	room: Room,
	/// Join order.
	members: Vec<Member>,
}

/// Rooms and their live membership. A connection is in at most one room.
#[derive(Debug, Default)]
pub struct RoomRegistry {
	rooms: HashMap<RoomName, RoomEntry>,
	conn_room: HashMap<ConnId, RoomName>,
	/// Rooms that can never be deleted.
	protected: HashSet<RoomName>,
}

impl RoomRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_protected(names: impl IntoIterator<Item = RoomName>) -> Self {
		Self {
			protected: names.into_iter().collect(),
			..Self::default()
		}
	}

	pub fn is_protected(&self, name: &RoomName) -> bool {
		self.protected.contains(name)
	}

	/// Register a room with empty membership.
	pub fn insert(&mut self, room: Room) -> Result<&Room, BrokerError> {
		if self.rooms.contains_key(&room.name) {
			return Err(BrokerError::DuplicateRoom(room.name.to_string()));
		}

		let name = room.name.clone();
		let entry = self.rooms.entry(name).or_insert(RoomEntry {
			room,
			members: Vec::new(),
		});
		Ok(&entry.room)
	}

	pub fn contains(&self, name: &RoomName) -> bool {
		self.rooms.contains_key(name)
	}

	pub fn room(&self, name: &RoomName) -> Result<&Room, BrokerError> {
		self.rooms
			.get(name)
			.map(|e| &e.room)
			.ok_or_else(|| BrokerError::RoomNotFound(name.to_string()))
	}

	pub fn update_room(&mut self, name: &RoomName, update: &RoomUpdate) -> Result<&Room, BrokerError> {
		let entry = self
			.rooms
			.get_mut(name)
			.ok_or_else(|| BrokerError::RoomNotFound(name.to_string()))?;
		entry.room.apply(update);
		Ok(&entry.room)
	}

	/// Add `conn` to `name`, leaving its current room first.
	///
	/// Capacity is checked before anything is mutated, so a refused join
	/// leaves the connection where it was.
	pub fn join(
		&mut self,
		name: &RoomName,
		conn: ConnId,
		username: &str,
		joined_at: i64,
	) -> Result<JoinOutcome, BrokerError> {
		let entry = self
			.rooms
			.get_mut(name)
			.ok_or_else(|| BrokerError::RoomNotFound(name.to_string()))?;

		if let Some(member) = entry.members.iter_mut().find(|m| m.conn == conn) {
			let renamed_from =
				(member.username != username).then(|| std::mem::replace(&mut member.username, username.to_string()));
			return Ok(JoinOutcome {
				previous: None,
				already_member: true,
				renamed_from,
			});
		}

		guard::check_capacity(&entry.room, entry.members.len())?;

		let previous = self.leave(conn);

		if let Some(entry) = self.rooms.get_mut(name) {
			entry.members.push(Member {
				conn,
				username: username.to_string(),
				joined_at,
			});
		}
		self.conn_room.insert(conn, name.clone());

		Ok(JoinOutcome {
			previous,
			already_member: false,
			renamed_from: None,
		})
	}

	/// Remove `conn` from its current room. Returns that room.
	pub fn leave(&mut self, conn: ConnId) -> Option<RoomName> {
		let name = self.conn_room.remove(&conn)?;
		if let Some(entry) = self.rooms.get_mut(&name) {
			entry.members.retain(|m| m.conn != conn);
		}
		Some(name)
	}

	/// Remove a room. Returns its former members.
	pub fn delete_room(&mut self, name: &RoomName) -> Result<Vec<Member>, BrokerError> {
		if self.is_protected(name) {
			return Err(BrokerError::ProtectedRoom(name.to_string()));
		}

		let entry = self
			.rooms
			.remove(name)
			.ok_or_else(|| BrokerError::RoomNotFound(name.to_string()))?;

		for m in &entry.members {
			self.conn_room.remove(&m.conn);
		}
		Ok(entry.members)
	}

	pub fn room_of(&self, conn: ConnId) -> Option<&RoomName> {
		self.conn_room.get(&conn)
	}

	pub fn member(&self, conn: ConnId) -> Option<&Member> {
		let name = self.conn_room.get(&conn)?;
		self.rooms.get(name)?.members.iter().find(|m| m.conn == conn)
	}

	pub fn members(&self, name: &RoomName) -> &[Member] {
		self.rooms.get(name).map(|e| e.members.as_slice()).unwrap_or_default()
	}

	/// Usernames in join order, one per connection.
	pub fn usernames(&self, name: &RoomName) -> Vec<String> {
		self.members(name).iter().map(|m| m.username.clone()).collect()
	}

	pub fn connections(&self, name: &RoomName) -> Vec<ConnId> {
		self.members(name).iter().map(|m| m.conn).collect()
	}

	pub fn member_count(&self, name: &RoomName) -> usize {
		self.members(name).len()
	}

	/// Public rooms, newest first, with live member counts.
	pub fn public_rooms(&self) -> Vec<RoomSummary> {
		let mut entries: Vec<&RoomEntry> = self.rooms.values().filter(|e| e.room.is_public).collect();
		entries.sort_by(|a, b| {
			b.room
				.created_at
				.cmp(&a.room.created_at)
				.then_with(|| a.room.name.cmp(&b.room.name))
		});
		entries.into_iter().map(|e| e.room.summary(e.members.len())).collect()
	}

	pub fn increment_message_count(&mut self, name: &RoomName) {
		if let Some(entry) = self.rooms.get_mut(name) {
			entry.room.message_count = entry.room.message_count.saturating_add(1);
		}
	}

	pub fn room_count(&self) -> usize {
		self.rooms.len()
	}
}
