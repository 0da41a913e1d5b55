#![forbid(unsafe_code)]

use std::time::Duration;

use parlor_domain::{BrokerError, Message, MessageId};
use tokio::sync::Mutex;

use crate::server::store::{MessageStore, bounded};

/// Serializes read-modify-write cycles on stored reaction maps.
///
/// Two toggles racing on the same message would otherwise both read the old
/// map and one write would be lost.
#[derive(Debug, Default)]
pub struct ReactionLedger {
	lock: Mutex<()>,
}

impl ReactionLedger {
	pub fn new() -> Self {
		Self::default()
	}

	/// Toggle `username` under `emoji` on a persisted message and return the
	/// updated message.
	pub async fn toggle(
		&self,
		store: &dyn MessageStore,
		id: &MessageId,
		emoji: &str,
		username: &str,
		limit: Duration,
	) -> Result<Message, BrokerError> {
		let Some(durable) = id.durable() else {
			return Err(BrokerError::MessageNotFound(id.to_string()));
		};

		let _guard = self.lock.lock().await;

		let mut msg = bounded(limit, "get_message", store.get_message(durable))
			.await?
			.ok_or_else(|| BrokerError::MessageNotFound(id.to_string()))?;

		msg.reactions.toggle(emoji, username);

		let written = bounded(limit, "update_reactions", store.update_reactions(durable, &msg.reactions)).await?;
		if !written {
			return Err(BrokerError::MessageNotFound(id.to_string()));
		}
		Ok(msg)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::server::store::InMemoryStore;
	use parlor_domain::RoomName;
	use std::sync::Arc;

	const LIMIT: Duration = Duration::from_secs(2);

	async fn stored(store: &InMemoryStore) -> MessageId {
		let msg = Message::new(
			MessageId::ephemeral(1, 1),
			"alice".into(),
			"hi".into(),
			RoomName::default_room(),
			1,
		);
		MessageId::Durable(store.save_message(&msg).await.expect("save"))
	}

	#[tokio::test]
	async fn toggle_twice_restores_empty_map() {
		let store = InMemoryStore::new();
		let id = stored(&store).await;
		let ledger = ReactionLedger::new();

		let on = ledger.toggle(&store, &id, "👍", "bob", LIMIT).await.expect("on");
		assert_eq!(on.reactions.users("👍"), ["bob"]);

		let off = ledger.toggle(&store, &id, "👍", "bob", LIMIT).await.expect("off");
		assert!(off.reactions.is_empty());
	}

	#[tokio::test]
	async fn ephemeral_and_unknown_ids_are_not_found() {
		let store = InMemoryStore::new();
		let ledger = ReactionLedger::new();

		let tmp = MessageId::ephemeral(5, 5);
		assert!(matches!(
			ledger.toggle(&store, &tmp, "👍", "bob", LIMIT).await,
			Err(BrokerError::MessageNotFound(_))
		));

		let missing = MessageId::Durable(parlor_domain::ServerMessageId::new_v4());
		assert!(matches!(
			ledger.toggle(&store, &missing, "👍", "bob", LIMIT).await,
			Err(BrokerError::MessageNotFound(_))
		));
	}

	#[tokio::test]
	async fn concurrent_toggles_do_not_lose_updates() {
		let store = Arc::new(InMemoryStore::new());
		let id = stored(&store).await;
		let ledger = Arc::new(ReactionLedger::new());

		let tasks: Vec<_> = (0..16)
			.map(|n| {
				let (store, ledger, id) = (store.clone(), ledger.clone(), id.clone());
				tokio::spawn(async move {
					ledger
						.toggle(store.as_ref(), &id, "🎉", &format!("user{n}"), LIMIT)
						.await
						.expect("toggle")
				})
			})
			.collect();
		for t in tasks {
			t.await.expect("join");
		}

		let durable = id.durable().expect("durable");
		let msg = store.get_message(durable).await.expect("get").expect("exists");
		assert_eq!(msg.reactions.users("🎉").len(), 16);
	}
}
