#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use parlor_domain::{Message, MessageId, Reactions, Room, RoomName, RoomStats, ServerMessageId};
use tokio::sync::Mutex;

use super::{MessageStore, validate_for_store};

/// Process-local store. Used for `memory:` URLs and in tests.
#[derive(Debug, Default)]
pub struct InMemoryStore {
	inner: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
	messages: HashMap<ServerMessageId, Message>,
	/// Per-room ids, oldest first.
	order: HashMap<RoomName, VecDeque<ServerMessageId>>,
	rooms: BTreeMap<RoomName, Room>,
	presence: HashMap<RoomName, BTreeMap<String, i64>>,
}

impl InMemoryStore {
	pub fn new() -> Self {
		Self::default()
	}
}

impl MemoryState {
	fn remove_room_messages(&mut self, room: &RoomName) -> u64 {
		let Some(ids) = self.order.remove(room) else {
			return 0;
		};
		for id in &ids {
			self.messages.remove(id);
		}
		ids.len() as u64
	}
}

#[async_trait::async_trait]
impl MessageStore for InMemoryStore {
	async fn save_message(&self, msg: &Message) -> anyhow::Result<ServerMessageId> {
		validate_for_store(msg)?;

		let id = ServerMessageId::new_v4();
		let mut stored = msg.clone();
		stored.id = MessageId::Durable(id);

		let mut inner = self.inner.lock().await;
		inner.order.entry(msg.room.clone()).or_default().push_back(id);
		inner.messages.insert(id, stored);
		Ok(id)
	}

	async fn recent_messages(&self, room: &RoomName, limit: usize) -> anyhow::Result<Vec<Message>> {
		let inner = self.inner.lock().await;
		let Some(ids) = inner.order.get(room) else {
			return Ok(Vec::new());
		};
		Ok(ids
			.iter()
			.rev()
			.take(limit)
			.filter_map(|id| inner.messages.get(id).cloned())
			.collect())
	}

	async fn message_count(&self, room: &RoomName) -> anyhow::Result<u64> {
		let inner = self.inner.lock().await;
		Ok(inner.order.get(room).map(|ids| ids.len() as u64).unwrap_or(0))
	}

	async fn trim_messages(&self, room: &RoomName, keep: usize) -> anyhow::Result<u64> {
		let mut guard = self.inner.lock().await;
		let inner = &mut *guard;
		let Some(ids) = inner.order.get_mut(room) else {
			return Ok(0);
		};

		let mut removed = 0;
		while ids.len() > keep {
			if let Some(id) = ids.pop_front() {
				inner.messages.remove(&id);
				removed += 1;
			}
		}
		Ok(removed)
	}

	async fn get_message(&self, id: ServerMessageId) -> anyhow::Result<Option<Message>> {
		let inner = self.inner.lock().await;
		Ok(inner.messages.get(&id).cloned())
	}

	async fn update_reactions(&self, id: ServerMessageId, reactions: &Reactions) -> anyhow::Result<bool> {
		let mut inner = self.inner.lock().await;
		let Some(msg) = inner.messages.get_mut(&id) else {
			return Ok(false);
		};
		msg.reactions = reactions.clone();
		Ok(true)
	}

	async fn mark_edited(&self, id: ServerMessageId, text: &str, edited_at: i64) -> anyhow::Result<bool> {
		let mut inner = self.inner.lock().await;
		let Some(msg) = inner.messages.get_mut(&id) else {
			return Ok(false);
		};
		msg.mark_edited(text.to_string(), edited_at);
		Ok(true)
	}

	async fn room_stats(&self, room: &RoomName) -> anyhow::Result<RoomStats> {
		let inner = self.inner.lock().await;
		let messages: Vec<&Message> = inner
			.order
			.get(room)
			.into_iter()
			.flatten()
			.filter_map(|id| inner.messages.get(id))
			.collect();

		let users: BTreeSet<&str> = messages.iter().map(|m| m.username.as_str()).collect();
		Ok(RoomStats {
			total_messages: messages.len() as u64,
			unique_users: users.len(),
			user_list: users.into_iter().map(str::to_string).collect(),
			oldest_message: messages.iter().map(|m| m.timestamp).min(),
			newest_message: messages.iter().map(|m| m.timestamp).max(),
		})
	}

	async fn load_rooms(&self) -> anyhow::Result<Vec<Room>> {
		let inner = self.inner.lock().await;
		Ok(inner.rooms.values().cloned().collect())
	}

	async fn create_room(&self, room: &Room) -> anyhow::Result<()> {
		let mut inner = self.inner.lock().await;
		inner.rooms.entry(room.name.clone()).or_insert_with(|| room.clone());
		Ok(())
	}

	async fn update_room(&self, room: &Room) -> anyhow::Result<()> {
		let mut inner = self.inner.lock().await;
		if let Some(existing) = inner.rooms.get_mut(&room.name) {
			existing.description = room.description.clone();
			existing.is_public = room.is_public;
			existing.max_users = room.max_users;
		}
		Ok(())
	}

	async fn delete_room(&self, name: &RoomName) -> anyhow::Result<()> {
		let mut inner = self.inner.lock().await;
		inner.remove_room_messages(name);
		inner.presence.remove(name);
		inner.rooms.remove(name);
		Ok(())
	}

	async fn increment_message_count(&self, name: &RoomName) -> anyhow::Result<()> {
		let mut inner = self.inner.lock().await;
		if let Some(room) = inner.rooms.get_mut(name) {
			room.message_count = room.message_count.saturating_add(1);
		}
		Ok(())
	}

	async fn add_user_to_room(&self, name: &RoomName, username: &str, joined_at: i64) -> anyhow::Result<()> {
		let mut inner = self.inner.lock().await;
		inner
			.presence
			.entry(name.clone())
			.or_default()
			.insert(username.to_string(), joined_at);
		Ok(())
	}

	async fn remove_user_from_room(&self, name: &RoomName, username: &str) -> anyhow::Result<()> {
		let mut inner = self.inner.lock().await;
		if let Some(users) = inner.presence.get_mut(name) {
			users.remove(username);
			if users.is_empty() {
				inner.presence.remove(name);
			}
		}
		Ok(())
	}

	async fn clear_presence(&self) -> anyhow::Result<()> {
		let mut inner = self.inner.lock().await;
		inner.presence.clear();
		Ok(())
	}
}
