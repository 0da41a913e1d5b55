#![forbid(unsafe_code)]

use std::str::FromStr;

use anyhow::{Context, anyhow};
use parlor_domain::{Message, MessageId, MessageType, Reactions, ReplyRef, Room, RoomName, RoomStats, ServerMessageId};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

use super::{MessageStore, validate_for_store};

/// sqlx-backed store (SQLite or Postgres).
///
/// Queries use `$N` placeholders, which both drivers bind positionally, so each
/// statement is written once and run against whichever pool is configured.
#[derive(Clone)]
pub struct SqlStore {
	backend: SqlBackend,
}

#[derive(Clone)]
enum SqlBackend {
	Sqlite(sqlx::SqlitePool),
	Postgres(sqlx::PgPool),
}

/// Run the same statement against whichever pool backs the store.
macro_rules! on_pool {
	($store:expr, $pool:ident => $body:expr) => {
		match &$store.backend {
			SqlBackend::Sqlite($pool) => $body,
			SqlBackend::Postgres($pool) => $body,
		}
	};
}

const MESSAGE_COLUMNS: &str =
	"id, room, username, text, timestamp, message_type, reply_to, reactions, is_edited, edited_at";

const ROOM_COLUMNS: &str =
	"name, description, is_public, password_hash, max_users, persist_messages, message_count, created_by, created_at";

#[derive(sqlx::FromRow)]
struct MessageRow {
	id: String,
	room: String,
	username: String,
	text: String,
	timestamp: i64,
	message_type: String,
	reply_to: Option<String>,
	reactions: String,
	is_edited: bool,
	edited_at: Option<i64>,
}

impl TryFrom<MessageRow> for Message {
	type Error = anyhow::Error;

	fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
		let id = ServerMessageId::from_str(&row.id).with_context(|| format!("message id {}", row.id))?;
		let room = RoomName::new(&row.room).map_err(|e| anyhow!("message {}: {e}", row.id))?;
		let reply_to = row
			.reply_to
			.as_deref()
			.map(serde_json::from_str::<ReplyRef>)
			.transpose()
			.context("decode reply_to")?;
		let reactions: Reactions = serde_json::from_str(&row.reactions).context("decode reactions")?;

		Ok(Message {
			id: MessageId::Durable(id),
			username: row.username,
			text: row.text,
			room,
			timestamp: row.timestamp,
			message_type: MessageType::parse(&row.message_type).unwrap_or_default(),
			reply_to,
			reactions,
			is_edited: row.is_edited,
			edited_at: row.edited_at,
		})
	}
}

#[derive(sqlx::FromRow)]
struct RoomRow {
	name: String,
	description: String,
	is_public: bool,
	password_hash: Option<String>,
	max_users: i64,
	persist_messages: bool,
	message_count: i64,
	created_by: String,
	created_at: i64,
}

impl TryFrom<RoomRow> for Room {
	type Error = anyhow::Error;

	fn try_from(row: RoomRow) -> Result<Self, Self::Error> {
		Ok(Room {
			name: RoomName::new(&row.name).map_err(|e| anyhow!("stored room {}: {e}", row.name))?,
			description: row.description,
			is_public: row.is_public,
			password_hash: row.password_hash,
			max_users: u32::try_from(row.max_users).unwrap_or(u32::MAX),
			persist_messages: row.persist_messages,
			message_count: u64::try_from(row.message_count).unwrap_or(0),
			created_by: row.created_by,
			created_at: row.created_at,
		})
	}
}

impl SqlStore {
	pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
		if database_url.starts_with("sqlite:") {
			let opts = SqliteConnectOptions::from_str(database_url)
				.context("parse sqlite url")?
				.create_if_missing(true);

			// every connection to an in-memory database gets its own database
			let max_connections = if database_url.contains(":memory:") { 1 } else { 8 };
			let pool = SqlitePoolOptions::new()
				.max_connections(max_connections)
				.connect_with(opts)
				.await
				.context("connect sqlite")?;
			sqlx::migrate!("migrations/sqlite")
				.run(&pool)
				.await
				.context("run sqlite migrations")?;

			Ok(Self {
				backend: SqlBackend::Sqlite(pool),
			})
		} else if database_url.starts_with("postgres:") || database_url.starts_with("postgresql:") {
			let pool = sqlx::PgPool::connect(database_url).await.context("connect postgres")?;
			sqlx::migrate!("migrations/postgres")
				.run(&pool)
				.await
				.context("run postgres migrations")?;

			Ok(Self {
				backend: SqlBackend::Postgres(pool),
			})
		} else {
			Err(anyhow!("unsupported database_url scheme (expected sqlite: or postgres:)"))
		}
	}
}

#[async_trait::async_trait]
impl MessageStore for SqlStore {
	async fn save_message(&self, msg: &Message) -> anyhow::Result<ServerMessageId> {
		validate_for_store(msg)?;

		let id = ServerMessageId::new_v4();
		let reply_to = msg
			.reply_to
			.as_ref()
			.map(serde_json::to_string)
			.transpose()
			.context("encode reply_to")?;
		let reactions = serde_json::to_string(&msg.reactions).context("encode reactions")?;
		let sql = format!(
			"INSERT INTO messages ({MESSAGE_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"
		);

		on_pool!(self, pool => {
			sqlx::query(&sql)
				.bind(id.to_string())
				.bind(msg.room.as_str())
				.bind(&msg.username)
				.bind(&msg.text)
				.bind(msg.timestamp)
				.bind(msg.message_type.as_str())
				.bind(reply_to.as_deref())
				.bind(&reactions)
				.bind(msg.is_edited)
				.bind(msg.edited_at)
				.execute(pool)
				.await
				.context("insert message")?;
		});

		Ok(id)
	}

	async fn recent_messages(&self, room: &RoomName, limit: usize) -> anyhow::Result<Vec<Message>> {
		let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE room = $1 ORDER BY seq DESC LIMIT $2");
		let limit = i64::try_from(limit).unwrap_or(i64::MAX);

		let rows: Vec<MessageRow> = on_pool!(self, pool => {
			sqlx::query_as(&sql)
				.bind(room.as_str())
				.bind(limit)
				.fetch_all(pool)
				.await
				.context("select recent messages")?
		});

		rows.into_iter().map(Message::try_from).collect()
	}

	async fn message_count(&self, room: &RoomName) -> anyhow::Result<u64> {
		let count: i64 = on_pool!(self, pool => {
			sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE room = $1")
				.bind(room.as_str())
				.fetch_one(pool)
				.await
				.context("count messages")?
		});
		Ok(u64::try_from(count).unwrap_or(0))
	}

	async fn trim_messages(&self, room: &RoomName, keep: usize) -> anyhow::Result<u64> {
		let keep = i64::try_from(keep).unwrap_or(i64::MAX);
		let removed = on_pool!(self, pool => {
			sqlx::query(
				"DELETE FROM messages WHERE room = $1 AND seq NOT IN \
				(SELECT seq FROM messages WHERE room = $1 ORDER BY seq DESC LIMIT $2)",
			)
			.bind(room.as_str())
			.bind(keep)
			.execute(pool)
			.await
			.context("trim messages")?
			.rows_affected()
		});
		Ok(removed)
	}

	async fn get_message(&self, id: ServerMessageId) -> anyhow::Result<Option<Message>> {
		let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1");
		let row: Option<MessageRow> = on_pool!(self, pool => {
			sqlx::query_as(&sql)
				.bind(id.to_string())
				.fetch_optional(pool)
				.await
				.context("select message")?
		});
		row.map(Message::try_from).transpose()
	}

	async fn update_reactions(&self, id: ServerMessageId, reactions: &Reactions) -> anyhow::Result<bool> {
		let reactions = serde_json::to_string(reactions).context("encode reactions")?;
		let updated = on_pool!(self, pool => {
			sqlx::query("UPDATE messages SET reactions = $1 WHERE id = $2")
				.bind(&reactions)
				.bind(id.to_string())
				.execute(pool)
				.await
				.context("update reactions")?
				.rows_affected()
		});
		Ok(updated > 0)
	}

	async fn mark_edited(&self, id: ServerMessageId, text: &str, edited_at: i64) -> anyhow::Result<bool> {
		let updated = on_pool!(self, pool => {
			sqlx::query("UPDATE messages SET text = $1, is_edited = $2, edited_at = $3 WHERE id = $4")
				.bind(text)
				.bind(true)
				.bind(edited_at)
				.bind(id.to_string())
				.execute(pool)
				.await
				.context("mark message edited")?
				.rows_affected()
		});
		Ok(updated > 0)
	}

	async fn room_stats(&self, room: &RoomName) -> anyhow::Result<RoomStats> {
		let (total, oldest, newest): (i64, Option<i64>, Option<i64>) = on_pool!(self, pool => {
			sqlx::query_as("SELECT COUNT(*), MIN(timestamp), MAX(timestamp) FROM messages WHERE room = $1")
				.bind(room.as_str())
				.fetch_one(pool)
				.await
				.context("select room stats")?
		});

		let user_list: Vec<String> = on_pool!(self, pool => {
			sqlx::query_scalar("SELECT DISTINCT username FROM messages WHERE room = $1 ORDER BY username")
				.bind(room.as_str())
				.fetch_all(pool)
				.await
				.context("select room users")?
		});

		Ok(RoomStats {
			total_messages: u64::try_from(total).unwrap_or(0),
			unique_users: user_list.len(),
			user_list,
			oldest_message: oldest,
			newest_message: newest,
		})
	}

	async fn load_rooms(&self) -> anyhow::Result<Vec<Room>> {
		let sql = format!("SELECT {ROOM_COLUMNS} FROM rooms ORDER BY created_at, name");
		let rows: Vec<RoomRow> = on_pool!(self, pool => {
			sqlx::query_as(&sql).fetch_all(pool).await.context("select rooms")?
		});
		rows.into_iter().map(Room::try_from).collect()
	}

	async fn create_room(&self, room: &Room) -> anyhow::Result<()> {
		let sql = format!(
			"INSERT INTO rooms ({ROOM_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
			ON CONFLICT (name) DO NOTHING"
		);
		on_pool!(self, pool => {
			sqlx::query(&sql)
				.bind(room.name.as_str())
				.bind(&room.description)
				.bind(room.is_public)
				.bind(room.password_hash.as_deref())
				.bind(i64::from(room.max_users))
				.bind(room.persist_messages)
				.bind(i64::try_from(room.message_count).unwrap_or(i64::MAX))
				.bind(&room.created_by)
				.bind(room.created_at)
				.execute(pool)
				.await
				.context("insert room")?;
		});
		Ok(())
	}

	async fn update_room(&self, room: &Room) -> anyhow::Result<()> {
		on_pool!(self, pool => {
			sqlx::query("UPDATE rooms SET description = $1, is_public = $2, max_users = $3 WHERE name = $4")
				.bind(&room.description)
				.bind(room.is_public)
				.bind(i64::from(room.max_users))
				.bind(room.name.as_str())
				.execute(pool)
				.await
				.context("update room")?;
		});
		Ok(())
	}

	async fn delete_room(&self, name: &RoomName) -> anyhow::Result<()> {
		on_pool!(self, pool => {
			let mut tx = pool.begin().await.context("begin delete room tx")?;
			for sql in [
				"DELETE FROM messages WHERE room = $1",
				"DELETE FROM room_members WHERE room = $1",
				"DELETE FROM rooms WHERE name = $1",
			] {
				sqlx::query(sql)
					.bind(name.as_str())
					.execute(&mut *tx)
					.await
					.context("delete room")?;
			}
			tx.commit().await.context("commit delete room tx")?;
		});
		Ok(())
	}

	async fn increment_message_count(&self, name: &RoomName) -> anyhow::Result<()> {
		on_pool!(self, pool => {
			sqlx::query("UPDATE rooms SET message_count = message_count + 1 WHERE name = $1")
				.bind(name.as_str())
				.execute(pool)
				.await
				.context("increment message count")?;
		});
		Ok(())
	}

	async fn add_user_to_room(&self, name: &RoomName, username: &str, joined_at: i64) -> anyhow::Result<()> {
		on_pool!(self, pool => {
			sqlx::query(
				"INSERT INTO room_members (room, username, joined_at) VALUES ($1, $2, $3) \
				ON CONFLICT (room, username) DO UPDATE SET joined_at = EXCLUDED.joined_at",
			)
			.bind(name.as_str())
			.bind(username)
			.bind(joined_at)
			.execute(pool)
			.await
			.context("upsert room member")?;
		});
		Ok(())
	}

	async fn remove_user_from_room(&self, name: &RoomName, username: &str) -> anyhow::Result<()> {
		on_pool!(self, pool => {
			sqlx::query("DELETE FROM room_members WHERE room = $1 AND username = $2")
				.bind(name.as_str())
				.bind(username)
				.execute(pool)
				.await
				.context("delete room member")?;
		});
		Ok(())
	}

	async fn clear_presence(&self) -> anyhow::Result<()> {
		on_pool!(self, pool => {
			sqlx::query("DELETE FROM room_members")
				.execute(pool)
				.await
				.context("clear room members")?;
		});
		Ok(())
	}
}
