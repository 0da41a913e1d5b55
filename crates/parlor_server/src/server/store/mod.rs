#![forbid(unsafe_code)]

//! Durable storage behind the broker.
//!
//! The broker treats every call here as best effort: failures and timeouts are
//! logged and the broker carries on with its in-memory state.

mod memory;
mod sql;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail};
use parlor_domain::{BrokerError, Message, Reactions, Room, RoomName, RoomStats, ServerMessageId};
use tracing::warn;

pub use memory::InMemoryStore;
pub use sql::SqlStore;

/// Username length cap enforced at the storage boundary.
pub const MAX_STORED_USERNAME_CHARS: usize = 50;

/// Message text length cap enforced at the storage boundary.
pub const MAX_STORED_TEXT_CHARS: usize = 500;

#[async_trait::async_trait]
pub trait MessageStore: Send + Sync {
	/// Persist `msg` and return its newly assigned durable id. The id already
	/// carried by `msg` is ignored.
	async fn save_message(&self, msg: &Message) -> anyhow::Result<ServerMessageId>;

	/// Most recent messages of a room, newest first.
	async fn recent_messages(&self, room: &RoomName, limit: usize) -> anyhow::Result<Vec<Message>>;

	async fn message_count(&self, room: &RoomName) -> anyhow::Result<u64>;

	/// Keep only the newest `keep` messages of a room. Returns how many were removed.
	async fn trim_messages(&self, room: &RoomName, keep: usize) -> anyhow::Result<u64>;

	async fn get_message(&self, id: ServerMessageId) -> anyhow::Result<Option<Message>>;

	/// Replace the reaction map of a message. Returns false if it does not exist.
	async fn update_reactions(&self, id: ServerMessageId, reactions: &Reactions) -> anyhow::Result<bool>;

	async fn mark_edited(&self, id: ServerMessageId, text: &str, edited_at: i64) -> anyhow::Result<bool>;

	async fn room_stats(&self, room: &RoomName) -> anyhow::Result<RoomStats>;

	async fn load_rooms(&self) -> anyhow::Result<Vec<Room>>;

	/// Insert a room; an existing row with the same name is left untouched.
	async fn create_room(&self, room: &Room) -> anyhow::Result<()>;

	async fn update_room(&self, room: &Room) -> anyhow::Result<()>;

	/// Remove a room together with its messages and presence rows.
	async fn delete_room(&self, name: &RoomName) -> anyhow::Result<()>;

	async fn increment_message_count(&self, name: &RoomName) -> anyhow::Result<()>;

	async fn add_user_to_room(&self, name: &RoomName, username: &str, joined_at: i64) -> anyhow::Result<()>;

	async fn remove_user_from_room(&self, name: &RoomName, username: &str) -> anyhow::Result<()>;

	/// Drop every presence row; membership is rebuilt from live connections.
	async fn clear_presence(&self) -> anyhow::Result<()>;
}

/// Open the store named by `database_url`.
///
/// `memory:` selects the in-process store, `sqlite:` and `postgres:` select
/// the sqlx backends (migrations run on connect).
pub async fn connect_store(database_url: &str) -> anyhow::Result<Arc<dyn MessageStore>> {
	let url = database_url.trim();
	if url == "memory:" {
		return Ok(Arc::new(InMemoryStore::new()));
	}
	if url.starts_with("sqlite:") || url.starts_with("postgres:") || url.starts_with("postgresql:") {
		return Ok(Arc::new(SqlStore::connect(url).await?));
	}
	Err(anyhow!("unsupported database_url scheme (expected memory:, sqlite: or postgres:)"))
}

/// Run a store call under `limit`, mapping errors and timeouts to
/// [`BrokerError::PersistenceUnavailable`].
pub async fn bounded<T>(
	limit: Duration,
	op: &'static str,
	fut: impl Future<Output = anyhow::Result<T>>,
) -> Result<T, BrokerError> {
	match tokio::time::timeout(limit, fut).await {
		Ok(Ok(v)) => Ok(v),
		Ok(Err(e)) => {
			warn!(op, error = %e, "store call failed; continuing in memory");
			metrics::counter!("parlor_server_persist_failures_total").increment(1);
			Err(BrokerError::PersistenceUnavailable(format!("{op}: {e}")))
		}
		Err(_) => {
			warn!(op, timeout_ms = limit.as_millis() as u64, "store call timed out; continuing in memory");
			metrics::counter!("parlor_server_persist_failures_total").increment(1);
			Err(BrokerError::PersistenceUnavailable(format!("{op}: timed out")))
		}
	}
}

fn validate_for_store(msg: &Message) -> anyhow::Result<()> {
	if msg.username.trim().is_empty() {
		bail!("username is required");
	}
	if msg.username.chars().count() > MAX_STORED_USERNAME_CHARS {
		bail!("username exceeds {MAX_STORED_USERNAME_CHARS} characters");
	}
	if msg.text.trim().is_empty() {
		bail!("message text is required");
	}
	if msg.text.chars().count() > MAX_STORED_TEXT_CHARS {
		bail!("message text exceeds {MAX_STORED_TEXT_CHARS} characters");
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use parlor_domain::{MessageId, RoomSpec};

	fn room(name: &str) -> RoomName {
		RoomName::new(name).expect("room name")
	}

	fn msg(room_name: &str, username: &str, text: &str, ts: i64) -> Message {
		Message::new(MessageId::ephemeral(ts, 0), username.into(), text.into(), room(room_name), ts)
	}

	#[tokio::test]
	async fn memory_url_opens_in_process_store() {
		let store = connect_store(" memory: ").await.expect("connect");
		let id = store.save_message(&msg("global", "alice", "hi", 1)).await.expect("save");
		let stored = store.get_message(id).await.expect("get").expect("present");
		assert_eq!(stored.id, MessageId::Durable(id));
		assert_eq!(stored.text, "hi");
	}

	#[tokio::test]
	async fn unknown_scheme_is_rejected() {
		assert!(connect_store("redis://localhost").await.is_err());
	}

	#[tokio::test]
	async fn store_enforces_field_caps() {
		let store = InMemoryStore::new();
		assert!(store.save_message(&msg("global", "alice", &"a".repeat(500), 1)).await.is_ok());
		assert!(store.save_message(&msg("global", "alice", &"a".repeat(501), 2)).await.is_err());
		assert!(store.save_message(&msg("global", &"u".repeat(51), "hi", 3)).await.is_err());
		assert_eq!(store.message_count(&room("global")).await.expect("count"), 1);
	}

	#[tokio::test]
	async fn sqlite_backend_roundtrips_messages_and_rooms() {
		let store = SqlStore::connect("sqlite::memory:").await.expect("connect sqlite");
		let demo = room("demo");

		let spec = RoomSpec::named("demo");
		let created = Room::from_spec(demo.clone(), &spec, Some("ab".repeat(32)), 10);
		store.create_room(&created).await.expect("create room");
		store.create_room(&created).await.expect("create room twice is a no-op");

		let rooms = store.load_rooms().await.expect("load rooms");
		assert_eq!(rooms, vec![created.clone()]);

		let mut ids = Vec::new();
		for i in 0..5 {
			ids.push(
				store
					.save_message(&msg("demo", "alice", &format!("m{i}"), 100 + i))
					.await
					.expect("save"),
			);
			store.increment_message_count(&demo).await.expect("increment");
		}

		let removed = store.trim_messages(&demo, 3).await.expect("trim");
		assert_eq!(removed, 2);

		let recent = store.recent_messages(&demo, 10).await.expect("recent");
		let texts: Vec<_> = recent.iter().map(|m| m.text.as_str()).collect();
		assert_eq!(texts, ["m4", "m3", "m2"]);
		assert!(store.get_message(ids[0]).await.expect("get").is_none());

		let mut reactions = Reactions::new();
		reactions.toggle("👍", "bob");
		assert!(store.update_reactions(ids[4], &reactions).await.expect("react"));
		assert!(store.mark_edited(ids[4], "m4!", 200).await.expect("edit"));
		let edited = store.get_message(ids[4]).await.expect("get").expect("present");
		assert_eq!(edited.reactions, reactions);
		assert!(edited.is_edited);
		assert_eq!(edited.edited_at, Some(200));
		assert_eq!(edited.text, "m4!");

		let stats = store.room_stats(&demo).await.expect("stats");
		assert_eq!(stats.total_messages, 3);
		assert_eq!(stats.user_list, ["alice"]);
		assert_eq!(stats.oldest_message, Some(102));
		assert_eq!(stats.newest_message, Some(104));

		let rooms = store.load_rooms().await.expect("load rooms");
		assert_eq!(rooms[0].message_count, 5);

		store.add_user_to_room(&demo, "alice", 1).await.expect("presence add");
		store.add_user_to_room(&demo, "alice", 2).await.expect("presence add twice");
		store.remove_user_from_room(&demo, "alice").await.expect("presence remove");
		store.clear_presence().await.expect("clear presence");

		store.delete_room(&demo).await.expect("delete");
		assert!(store.load_rooms().await.expect("load").is_empty());
		assert_eq!(store.message_count(&demo).await.expect("count"), 0);
	}
}
