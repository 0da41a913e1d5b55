#![forbid(unsafe_code)]

//! The chat broker.
//!
//! Room state lives behind one async mutex that is only held for short,
//! non-awaiting sections plus the non-blocking hub publish. Store calls always
//! run outside it, bounded by `persist_timeout`. Sends into one room are
//! ordered by a per-room gate so broadcast order equals acceptance order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use anyhow::Context as _;
use parlor_domain::{
	BrokerError, ConnId, Message, MessageId, Room, RoomName, RoomSpec, RoomStats, RoomSummary, RoomUpdate,
};
use parlor_protocol::{
	ChatMessagePayload, ClientEvent, CreateRoomPayload, ReactionPayload, ReactionUpdatePayload, RoomDeletedPayload,
	ServerEvent,
};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};

use crate::config::BrokerSettings;
use crate::server::guard;
use crate::server::history::RoomHistory;
use crate::server::hub::{ConnectionHub, HubConfig, HubItem};
use crate::server::presence::{TypingTracker, stop_typing_event, typing_event, user_list_event};
use crate::server::reactions::ReactionLedger;
use crate::server::registry::RoomRegistry;
use crate::server::router::{MessageRouter, resolve_room, unix_ms_now};
use crate::server::store::{MessageStore, bounded};

const SYSTEM_USER: &str = "system";
const MAX_USERNAME_CHARS: usize = 50;

#[derive(Debug, Default)]
struct Session {
	/// Username of the most recent successful join.
	username: Option<String>,
}

#[derive(Debug)]
struct BrokerState {
	registry: RoomRegistry,
	typing: TypingTracker,
	history: RoomHistory,
	sessions: HashMap<ConnId, Session>,
}

impl BrokerState {
	fn username(&self, conn: ConnId) -> Option<&str> {
		self.sessions.get(&conn)?.username.as_deref()
	}

	/// Connections in `room` other than those typing as `username`.
	fn typing_audience(&self, room: &RoomName, username: &str) -> Vec<ConnId> {
		self.registry
			.members(room)
			.iter()
			.filter(|m| m.username != username)
			.map(|m| m.conn)
			.collect()
	}
}

struct Shared {
	cfg: BrokerSettings,
	hub: ConnectionHub,
	store: Option<Arc<dyn MessageStore>>,
	state: Mutex<BrokerState>,
	send_gates: Mutex<HashMap<RoomName, Arc<Mutex<()>>>>,
	ledger: ReactionLedger,
	router: MessageRouter,
	next_conn: AtomicU64,
}

/// Cheap to clone; every connection task holds one.
#[derive(Clone)]
pub struct Broker {
	shared: Arc<Shared>,
}

impl Broker {
	pub fn new(cfg: BrokerSettings, store: Option<Arc<dyn MessageStore>>) -> Self {
		let hub = ConnectionHub::new(HubConfig {
			outbox_capacity: cfg.outbox_capacity,
			debug_logs: cfg.debug_logs,
		});

		let protected = cfg.default_rooms.iter().chain([&cfg.default_room]).cloned();
		let state = BrokerState {
			registry: RoomRegistry::with_protected(protected),
			typing: TypingTracker::new(),
			history: RoomHistory::new(cfg.history_capacity),
			sessions: HashMap::new(),
		};

		Self {
			shared: Arc::new(Shared {
				router: MessageRouter::new(cfg.max_message_chars),
				cfg,
				hub,
				store,
				state: Mutex::new(state),
				send_gates: Mutex::new(HashMap::new()),
				ledger: ReactionLedger::new(),
				next_conn: AtomicU64::new(1),
			}),
		}
	}

	pub fn config(&self) -> &BrokerSettings {
		&self.shared.cfg
	}

	/// Load persisted rooms and make sure the configured default rooms exist.
	///
	/// Store problems are logged; the broker then starts from defaults only.
	pub async fn bootstrap(&self) -> anyhow::Result<()> {
		let limit = self.shared.cfg.persist_timeout;

		let mut loaded = Vec::new();
		if let Some(store) = self.shared.store.as_deref() {
			let _ = bounded(limit, "clear_presence", store.clear_presence()).await;
			if let Ok(rooms) = bounded(limit, "load_rooms", store.load_rooms()).await {
				loaded = rooms;
			}
		}

		let now = unix_ms_now();
		let mut created = Vec::new();
		{
			let mut st = self.shared.state.lock().await;
			for room in loaded {
				let name = room.name.clone();
				if let Err(e) = st.registry.insert(room) {
					warn!(room = %name, error = %e, "skipping persisted room");
				}
			}

			let mut defaults = self.shared.cfg.default_rooms.clone();
			defaults.push(self.shared.cfg.default_room.clone());
			for name in defaults {
				if st.registry.contains(&name) {
					continue;
				}
				let spec = RoomSpec {
					created_by: Some(SYSTEM_USER.to_string()),
					..RoomSpec::named(name.as_str())
				};
				let room = Room::from_spec(name, &spec, None, now);
				st.registry
					.insert(room.clone())
					.context("insert default room")?;
				created.push(room);
			}

			info!(rooms = st.registry.room_count(), "broker bootstrapped");
		}

		if let Some(store) = self.shared.store.as_deref() {
			for room in &created {
				let _ = bounded(limit, "create_room", store.create_room(room)).await;
			}
		}
		Ok(())
	}

	/// Allocate a connection id and open its outbox.
	pub async fn connect(&self) -> (ConnId, mpsc::Receiver<HubItem>) {
		let conn = ConnId(self.shared.next_conn.fetch_add(1, Ordering::Relaxed));
		let rx = self.shared.hub.register(conn).await;
		self.shared.state.lock().await.sessions.insert(conn, Session::default());
		(conn, rx)
	}

	/// Implicit leave for a closed connection.
	pub async fn disconnect(&self, conn: ConnId) {
		let departed = {
			let mut st = self.shared.state.lock().await;
			st.sessions.remove(&conn);
			self.depart(&mut st, conn).await
		};
		self.shared.hub.unregister(conn).await;

		if let Some((room, username)) = departed {
			debug!(conn_id = %conn, room = %room, username = %username, "connection left on disconnect");
			self.forget_presence(&room, &username).await;
		}
	}

	/// Remove `conn` from its room and announce it. Caller holds the state lock.
	async fn depart(&self, st: &mut BrokerState, conn: ConnId) -> Option<(RoomName, String)> {
		let username = st.registry.member(conn).map(|m| m.username.clone())?;
		let room = st.registry.leave(conn)?;

		if st.typing.stop(&room, &username) {
			let audience = st.typing_audience(&room, &username);
			self.shared
				.hub
				.publish(&audience, stop_typing_event(&room, &username))
				.await;
		}
		let everyone = st.registry.connections(&room);
		self.shared
			.hub
			.publish(&everyone, user_list_event(&st.registry, &room))
			.await;
		Some((room, username))
	}

	async fn forget_presence(&self, room: &RoomName, username: &str) {
		if let Some(store) = self.shared.store.as_deref() {
			let _ = bounded(
				self.shared.cfg.persist_timeout,
				"remove_user_from_room",
				store.remove_user_from_room(room, username),
			)
			.await;
		}
	}

	/// Dispatch one inbound client event.
	///
	/// Malformed input is dropped silently; access and administrative failures
	/// go back to the sender as `room-error`.
	pub async fn handle_event(&self, conn: ConnId, event: ClientEvent) {
		let name = event.name();
		let result = match event {
			ClientEvent::JoinRoom(p) => self.join(conn, &p.room, &p.username, p.password.as_deref()).await,
			ClientEvent::LeaveRoom(p) => {
				self.leave(conn, p.room.as_deref()).await;
				Ok(())
			}
			ClientEvent::ChatMessage(p) => self.send_message(conn, p).await.map(|_| ()),
			ClientEvent::EditMessage(p) => self.edit_message(conn, &p.message_id, &p.user_msg).await.map(|_| ()),
			ClientEvent::Typing(p) => {
				self.set_typing(conn, &p.room).await;
				Ok(())
			}
			ClientEvent::StopTyping(p) => {
				self.stop_typing(conn, &p.room).await;
				Ok(())
			}
			ClientEvent::ToggleReaction(p) => self.toggle_reaction(conn, p).await.map(|_| ()),
			ClientEvent::CreateRoom(spec) => self.create_room_for(conn, spec).await,
			ClientEvent::UpdateRoom(p) => self.update_room_for(conn, &p.name, p.update).await,
			ClientEvent::DeleteRoom(p) => self.delete_room_for(conn, &p.name).await,
			ClientEvent::ListRooms(_) => {
				let rooms = self.public_rooms().await;
				self.shared.hub.send_to(conn, ServerEvent::RoomList(rooms)).await;
				Ok(())
			}
		};

		let Err(e) = result else {
			return;
		};

		let administrative = matches!(name, "create-room" | "update-room" | "delete-room");
		let unknown_target = name == "chat-message" && matches!(e, BrokerError::RoomNotFound(_));
		let dropped = !administrative && (e.is_silent() || unknown_target);
		let no_effect = matches!(
			e,
			BrokerError::MessageNotFound(_) | BrokerError::PersistenceUnavailable(_) | BrokerError::NotAuthor(_)
		);

		if dropped {
			debug!(conn_id = %conn, event = name, reason = %e, "dropping client event");
			metrics::counter!("parlor_server_messages_dropped_total").increment(1);
		} else if no_effect && !administrative {
			debug!(conn_id = %conn, event = name, reason = %e, "client event had no effect");
		} else {
			info!(conn_id = %conn, event = name, reason = %e, "client event refused");
			self.shared.hub.send_to(conn, ServerEvent::room_error(e.to_string())).await;
		}
	}

	/// Join `room` as `username`, leaving any current room first.
	///
	/// The room's send gate is held until the joiner's history is queued, so
	/// a concurrent send reaches the joiner either inside the history or after
	/// it, never both.
	pub async fn join(
		&self,
		conn: ConnId,
		room: &str,
		username: &str,
		password: Option<&str>,
	) -> Result<(), BrokerError> {
		let name = RoomName::new(room)?;
		let username = username.trim();
		if username.is_empty() || username.chars().count() > MAX_USERNAME_CHARS {
			return Err(BrokerError::InvalidName(format!("invalid username {username:?}")));
		}

		let gate = self.send_gate(&name).await;
		let ordered = gate.lock().await;

		let now = unix_ms_now();
		let (previous, replay_persisted) = {
			let mut st = self.shared.state.lock().await;

			if !st.registry.contains(&name) {
				if !self.shared.cfg.auto_create_rooms {
					self.shared.send_gates.lock().await.remove(&name);
					return Err(BrokerError::RoomNotFound(name.to_string()));
				}
				let spec = RoomSpec {
					created_by: Some(username.to_string()),
					persist_messages: Some(false),
					..RoomSpec::named(name.as_str())
				};
				st.registry.insert(Room::from_spec(name.clone(), &spec, None, now))?;
				info!(room = %name, username, "auto-created room");
			}

			let already_member = st.registry.room_of(conn) == Some(&name);
			let room = st.registry.room(&name)?;
			if !already_member {
				guard::check_password(room, password)?;
			}
			let replay_persisted = room.persist_messages && self.shared.store.is_some();

			let outcome = st.registry.join(&name, conn, username, now)?;
			st.sessions.entry(conn).or_default().username = Some(username.to_string());

			if let Some(old) = outcome.renamed_from.as_deref()
				&& st.typing.stop(&name, old)
			{
				let mut audience = st.typing_audience(&name, old);
				audience.retain(|c| *c != conn);
				self.shared.hub.publish(&audience, stop_typing_event(&name, old)).await;
			}

			let mut previous = None;
			if let Some(prev) = outcome.previous {
				if st.typing.stop(&prev, username) {
					let audience = st.typing_audience(&prev, username);
					self.shared
						.hub
						.publish(&audience, stop_typing_event(&prev, username))
						.await;
				}
				let left_behind = st.registry.connections(&prev);
				self.shared
					.hub
					.publish(&left_behind, user_list_event(&st.registry, &prev))
					.await;
				previous = Some(prev);
			}

			let everyone = st.registry.connections(&name);
			self.shared
				.hub
				.publish(&everyone, user_list_event(&st.registry, &name))
				.await;

			if !replay_persisted {
				let history = st.history.snapshot(&name);
				self.shared.hub.send_to(conn, ServerEvent::MessageHistory(history)).await;
			}

			info!(conn_id = %conn, room = %name, username, "joined room");
			(previous, replay_persisted)
		};

		let limit = self.shared.cfg.persist_timeout;
		if replay_persisted && let Some(store) = self.shared.store.as_deref() {
			let history = match bounded(
				limit,
				"recent_messages",
				store.recent_messages(&name, self.shared.cfg.persisted_history_limit),
			)
			.await
			{
				Ok(mut newest_first) => {
					newest_first.reverse();
					newest_first
				}
				Err(_) => self.shared.state.lock().await.history.snapshot(&name),
			};
			self.shared.hub.send_to(conn, ServerEvent::MessageHistory(history)).await;
		}
		drop(ordered);

		if let Some(store) = self.shared.store.as_deref() {
			if let Some(prev) = previous.as_ref() {
				let _ = bounded(limit, "remove_user_from_room", store.remove_user_from_room(prev, username)).await;
			}
			let _ = bounded(limit, "add_user_to_room", store.add_user_to_room(&name, username, now)).await;
		}

		Ok(())
	}

	/// Leave the current room. A named room that is not the current one is a no-op.
	pub async fn leave(&self, conn: ConnId, room: Option<&str>) {
		let departed = {
			let mut st = self.shared.state.lock().await;
			let current = st.registry.room_of(conn).cloned();
			let target = match room.map(RoomName::new) {
				Some(Ok(name)) => Some(name),
				Some(Err(_)) => None,
				None => current.clone(),
			};
			if target.is_none() || target != current {
				return;
			}
			self.depart(&mut st, conn).await
		};

		if let Some((room, username)) = departed {
			info!(conn_id = %conn, room = %room, username = %username, "left room");
			self.forget_presence(&room, &username).await;
		}
	}

	async fn send_gate(&self, room: &RoomName) -> Arc<Mutex<()>> {
		let mut gates = self.shared.send_gates.lock().await;
		gates.entry(room.clone()).or_default().clone()
	}

	/// Validate, persist, buffer and broadcast one chat message.
	pub async fn send_message(&self, conn: ConnId, payload: ChatMessagePayload) -> Result<Message, BrokerError> {
		let text = self.shared.router.accept_text(&payload.user_msg)?;

		let (username, room, persist) = {
			let st = self.shared.state.lock().await;
			let username = st
				.username(conn)
				.ok_or_else(|| BrokerError::InvalidMessage("sender has not joined a room".to_string()))?
				.to_string();
			let room = resolve_room(
				payload.room.as_deref(),
				st.registry.room_of(conn),
				&self.shared.cfg.default_room,
			)
			.ok_or_else(|| BrokerError::InvalidMessage("invalid room name".to_string()))?;
			let persist = st.registry.room(&room)?.persist_messages && self.shared.store.is_some();
			(username, room, persist)
		};

		let gate = self.send_gate(&room).await;
		let _ordered = gate.lock().await;

		let mut msg = self.shared.router.build(payload, text, &username, room.clone());

		let limit = self.shared.cfg.persist_timeout;
		let mut persisted = false;
		if persist && let Some(store) = self.shared.store.as_deref() {
			if let Ok(id) = bounded(limit, "save_message", store.save_message(&msg)).await {
				msg.id = MessageId::Durable(id);
				persisted = true;
			}
		}

		let mut st = self.shared.state.lock().await;
		if !st.registry.contains(&room) {
			return Err(BrokerError::RoomNotFound(room.to_string()));
		}
		if persisted {
			st.registry.increment_message_count(&room);
		}
		st.history.push(msg.clone());

		let recipients = st.registry.connections(&room);
		let delivered = self
			.shared
			.hub
			.publish(&recipients, ServerEvent::ChatMessage(msg.clone()))
			.await;
		drop(st);
		metrics::counter!("parlor_server_messages_total").increment(1);
		if self.shared.cfg.debug_logs {
			debug!(conn_id = %conn, room = %room, message_id = %msg.id, delivered, "message broadcast");
		}

		// Bookkeeping runs after delivery; the gate keeps trims in send order.
		if persisted && let Some(store) = self.shared.store.as_deref() {
			let _ = bounded(limit, "increment_message_count", store.increment_message_count(&room)).await;
			if let Ok(removed) = bounded(
				limit,
				"trim_messages",
				store.trim_messages(&room, self.shared.cfg.store_capacity),
			)
			.await && removed > 0
			{
				debug!(room = %room, removed, "trimmed persisted history");
			}
		}
		Ok(msg)
	}

	/// Edit a message. Only its author may do so.
	pub async fn edit_message(&self, conn: ConnId, message_id: &str, raw: &str) -> Result<Message, BrokerError> {
		let text = self.shared.router.accept_text(raw)?;
		let id = MessageId::from(message_id.trim().to_string());
		let limit = self.shared.cfg.persist_timeout;

		let (username, buffered) = {
			let st = self.shared.state.lock().await;
			let username = st
				.username(conn)
				.ok_or_else(|| BrokerError::InvalidMessage("editor has not joined a room".to_string()))?
				.to_string();
			(username, st.history.locate(&id).cloned())
		};

		let original = match (buffered, id.durable(), self.shared.store.as_deref()) {
			(Some(msg), _, _) => msg,
			(None, Some(durable), Some(store)) => bounded(limit, "get_message", store.get_message(durable))
				.await?
				.ok_or_else(|| BrokerError::MessageNotFound(id.to_string()))?,
			_ => return Err(BrokerError::MessageNotFound(id.to_string())),
		};
		if original.username != username {
			return Err(BrokerError::NotAuthor(id.to_string()));
		}

		let gate = self.send_gate(&original.room).await;
		let _ordered = gate.lock().await;

		let edited_at = unix_ms_now();
		if let (Some(durable), Some(store)) = (id.durable(), self.shared.store.as_deref()) {
			let _ = bounded(limit, "mark_edited", store.mark_edited(durable, &text, edited_at)).await;
		}

		let mut updated = original;
		updated.mark_edited(text, edited_at);

		let mut st = self.shared.state.lock().await;
		if let Some(buffered) = st.history.find_mut(&updated.room, &id) {
			buffered.mark_edited(updated.text.clone(), edited_at);
		}
		let recipients = st.registry.connections(&updated.room);
		self.shared
			.hub
			.publish(&recipients, ServerEvent::MessageEdited(updated.clone()))
			.await;
		debug!(conn_id = %conn, room = %updated.room, message_id = %id, "message edited");
		Ok(updated)
	}

	/// Announce typing in `room` and (re)arm its expiry timer.
	pub async fn set_typing(&self, conn: ConnId, room: &str) {
		let Ok(name) = RoomName::new(room) else {
			return;
		};

		let mut st = self.shared.state.lock().await;
		if st.registry.room_of(conn) != Some(&name) {
			return;
		}
		let Some(username) = st.registry.member(conn).map(|m| m.username.clone()) else {
			return;
		};

		let weak = Arc::downgrade(&self.shared);
		let timeout = self.shared.cfg.typing_timeout;
		let (timer_room, timer_user) = (name.clone(), username.clone());
		st.typing.arm(&name, &username, move |generation| {
			tokio::spawn(async move {
				tokio::time::sleep(timeout).await;
				expire_typing(weak, timer_room, timer_user, generation).await;
			})
		});

		let audience = st.typing_audience(&name, &username);
		self.shared.hub.publish(&audience, typing_event(&name, &username)).await;
	}

	/// Cancel typing in `room` and announce it immediately.
	pub async fn stop_typing(&self, conn: ConnId, room: &str) {
		let Ok(name) = RoomName::new(room) else {
			return;
		};

		let mut st = self.shared.state.lock().await;
		if st.registry.room_of(conn) != Some(&name) {
			return;
		}
		let Some(username) = st.registry.member(conn).map(|m| m.username.clone()) else {
			return;
		};

		st.typing.stop(&name, &username);
		let audience = st.typing_audience(&name, &username);
		self.shared
			.hub
			.publish(&audience, stop_typing_event(&name, &username))
			.await;
	}

	/// Toggle a reaction on a persisted message and broadcast the new map.
	pub async fn toggle_reaction(
		&self,
		conn: ConnId,
		payload: ReactionPayload,
	) -> Result<ReactionUpdatePayload, BrokerError> {
		let emoji = payload.emoji.trim();
		if emoji.is_empty() {
			return Err(BrokerError::InvalidMessage("emoji is required".to_string()));
		}

		let username = {
			let st = self.shared.state.lock().await;
			st.username(conn)
				.map(str::to_string)
				.unwrap_or_else(|| payload.username.trim().to_string())
		};
		if username.is_empty() {
			return Err(BrokerError::InvalidMessage("username is required".to_string()));
		}

		let id = MessageId::from(payload.message_id.trim().to_string());
		let Some(store) = self.shared.store.as_deref() else {
			return Err(BrokerError::MessageNotFound(id.to_string()));
		};

		let msg = self
			.shared
			.ledger
			.toggle(store, &id, emoji, &username, self.shared.cfg.persist_timeout)
			.await?;

		let update = ReactionUpdatePayload {
			message_id: id.to_string(),
			room: msg.room.to_string(),
			reactions: msg.reactions.clone(),
		};

		let mut st = self.shared.state.lock().await;
		if let Some(buffered) = st.history.find_mut(&msg.room, &id) {
			buffered.reactions = msg.reactions;
		}
		let recipients = st.registry.connections(&msg.room);
		self.shared
			.hub
			.publish(&recipients, ServerEvent::ReactionUpdate(update.clone()))
			.await;
		Ok(update)
	}

	/// Register a new room and persist its metadata.
	pub async fn create_room(&self, spec: CreateRoomPayload) -> Result<RoomSummary, BrokerError> {
		let name = RoomName::new(&spec.name)?;
		if spec.max_users == Some(0) {
			return Err(BrokerError::InvalidName("maxUsers must be at least 1".to_string()));
		}
		let password_hash = spec.password.as_deref().and_then(guard::hash_password);
		let room = Room::from_spec(name, &spec, password_hash, unix_ms_now());

		let summary = {
			let mut st = self.shared.state.lock().await;
			st.registry.insert(room.clone())?.summary(0)
		};
		info!(room = %room.name, created_by = %room.created_by, public = room.is_public, "room created");

		if let Some(store) = self.shared.store.as_deref() {
			let _ = bounded(self.shared.cfg.persist_timeout, "create_room", store.create_room(&room)).await;
		}
		Ok(summary)
	}

	async fn create_room_for(&self, conn: ConnId, spec: CreateRoomPayload) -> Result<(), BrokerError> {
		let summary = self.create_room(spec).await?;

		let recipients: Vec<ConnId> = if summary.is_public {
			self.shared.state.lock().await.sessions.keys().copied().collect()
		} else {
			vec![conn]
		};
		self.shared
			.hub
			.publish(&recipients, ServerEvent::RoomCreated(summary))
			.await;
		Ok(())
	}

	pub async fn update_room(&self, name: &str, update: RoomUpdate) -> Result<RoomSummary, BrokerError> {
		let name = RoomName::new(name)?;
		if update.max_users == Some(0) {
			return Err(BrokerError::InvalidName("maxUsers must be at least 1".to_string()));
		}

		let (room, summary) = {
			let mut st = self.shared.state.lock().await;
			let active = st.registry.member_count(&name);
			let room = st.registry.update_room(&name, &update)?.clone();
			let summary = room.summary(active);
			(room, summary)
		};

		if let Some(store) = self.shared.store.as_deref() {
			let _ = bounded(self.shared.cfg.persist_timeout, "update_room", store.update_room(&room)).await;
		}
		Ok(summary)
	}

	/// Public changes go to every connection; private ones to the room and the requester.
	async fn update_room_for(&self, conn: ConnId, name: &str, update: RoomUpdate) -> Result<(), BrokerError> {
		let summary = self.update_room(name, update).await?;

		let recipients: Vec<ConnId> = {
			let st = self.shared.state.lock().await;
			if summary.is_public {
				st.sessions.keys().copied().collect()
			} else {
				let mut members = st.registry.connections(&summary.name);
				if !members.contains(&conn) {
					members.push(conn);
				}
				members
			}
		};
		self.shared
			.hub
			.publish(&recipients, ServerEvent::RoomUpdated(summary))
			.await;
		Ok(())
	}

	/// Delete a non-default room, evicting its members and purging its history.
	pub async fn delete_room(&self, name: &str) -> Result<Vec<ConnId>, BrokerError> {
		let name = RoomName::new(name)?;

		let evicted = {
			let mut st = self.shared.state.lock().await;
			let members = st.registry.delete_room(&name)?;
			st.history.purge(&name);
			st.typing.clear_room(&name);

			let evicted: Vec<ConnId> = members.iter().map(|m| m.conn).collect();
			self.shared
				.hub
				.publish(
					&evicted,
					ServerEvent::RoomDeleted(RoomDeletedPayload {
						room: name.to_string(),
					}),
				)
				.await;
			evicted
		};
		self.shared.send_gates.lock().await.remove(&name);
		info!(room = %name, evicted = evicted.len(), "room deleted");

		if let Some(store) = self.shared.store.as_deref() {
			let _ = bounded(self.shared.cfg.persist_timeout, "delete_room", store.delete_room(&name)).await;
		}
		Ok(evicted)
	}

	async fn delete_room_for(&self, conn: ConnId, name: &str) -> Result<(), BrokerError> {
		let evicted = self.delete_room(name).await?;
		if !evicted.contains(&conn) {
			self.shared
				.hub
				.send_to(
					conn,
					ServerEvent::RoomDeleted(RoomDeletedPayload {
						room: name.trim().to_string(),
					}),
				)
				.await;
		}
		Ok(())
	}

	pub async fn public_rooms(&self) -> Vec<RoomSummary> {
		self.shared.state.lock().await.registry.public_rooms()
	}

	/// Statistics from the store for persisted rooms, else from the ring buffer.
	pub async fn room_stats(&self, name: &str) -> Result<RoomStats, BrokerError> {
		let name = RoomName::new(name)?;

		let (persist, buffered) = {
			let st = self.shared.state.lock().await;
			let room = st.registry.room(&name)?;
			(room.persist_messages, st.history.snapshot(&name))
		};

		if persist && let Some(store) = self.shared.store.as_deref() {
			if let Ok(stats) = bounded(self.shared.cfg.persist_timeout, "room_stats", store.room_stats(&name)).await {
				return Ok(stats);
			}
		}
		Ok(stats_from(&buffered))
	}

	pub async fn room_of(&self, conn: ConnId) -> Option<RoomName> {
		self.shared.state.lock().await.registry.room_of(conn).cloned()
	}

	pub async fn users(&self, room: &RoomName) -> Vec<String> {
		self.shared.state.lock().await.registry.usernames(room)
	}

	/// Ring-buffer snapshot, oldest first.
	pub async fn buffered_history(&self, room: &RoomName) -> Vec<Message> {
		self.shared.state.lock().await.history.snapshot(room)
	}

	pub async fn connection_count(&self) -> usize {
		self.shared.hub.connection_count().await
	}
}

async fn expire_typing(shared: Weak<Shared>, room: RoomName, username: String, generation: u64) {
	let Some(shared) = shared.upgrade() else {
		return;
	};

	let mut st = shared.state.lock().await;
	if !st.typing.expire(&room, &username, generation) {
		return;
	}
	let audience = st.typing_audience(&room, &username);
	shared.hub.publish(&audience, stop_typing_event(&room, &username)).await;
}

fn stats_from(messages: &[Message]) -> RoomStats {
	let mut user_list: Vec<String> = Vec::new();
	for m in messages {
		if !user_list.contains(&m.username) {
			user_list.push(m.username.clone());
		}
	}
	user_list.sort();

	RoomStats {
		total_messages: messages.len() as u64,
		unique_users: user_list.len(),
		user_list,
		oldest_message: messages.iter().map(|m| m.timestamp).min(),
		newest_message: messages.iter().map(|m| m.timestamp).max(),
	}
}
