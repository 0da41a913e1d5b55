#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::Arc;

use parlor_domain::ConnId;
use parlor_protocol::ServerEvent;
use tokio::sync::{Mutex, mpsc};
use tracing::debug;

/// Per-connection outboxes. Publishing never waits on a slow consumer.
#[derive(Debug, Clone)]
pub struct ConnectionHub {
	inner: Arc<Mutex<Inner>>,
	cfg: HubConfig,
}

/// Configuration for `ConnectionHub`.
#[derive(Debug, Clone)]
pub struct HubConfig {
	/// Maximum number of queued events per connection.
	pub outbox_capacity: usize,

	pub debug_logs: bool,
}

impl Default for HubConfig {
	fn default() -> Self {
		Self {
			outbox_capacity: 256,
			debug_logs: false,
		}
	}
}

/// Items drained by a connection's writer.
#[derive(Debug, Clone)]
pub enum HubItem {
	Event(Arc<ServerEvent>),

	/// The outbox was full and this many events were dropped.
	Lagged {
		dropped: u64,
	},
}

#[derive(Debug, Default)]
struct Inner {
	outboxes: HashMap<ConnId, Outbox>,
}

#[derive(Debug)]
struct Outbox {
	tx: mpsc::Sender<HubItem>,
	pending_lag: u64,
}

impl ConnectionHub {
	pub fn new(cfg: HubConfig) -> Self {
		Self {
			inner: Arc::new(Mutex::new(Inner::default())),
			cfg,
		}
	}

	/// Open an outbox for `conn`, replacing any previous one.
	pub async fn register(&self, conn: ConnId) -> mpsc::Receiver<HubItem> {
		let (tx, rx) = mpsc::channel(self.cfg.outbox_capacity.max(1));

		let mut inner = self.inner.lock().await;
		inner.outboxes.insert(conn, Outbox { tx, pending_lag: 0 });

		if self.cfg.debug_logs {
			debug!(%conn, conns = inner.outboxes.len(), "hub: registered");
		}

		rx
	}

	pub async fn unregister(&self, conn: ConnId) {
		let mut inner = self.inner.lock().await;
		inner.outboxes.remove(&conn);
	}

	/// Deliver `event` to each of `conns`. Returns how many outboxes accepted it.
	pub async fn publish(&self, conns: &[ConnId], event: ServerEvent) -> usize {
		if conns.is_empty() {
			return 0;
		}

		let item = HubItem::Event(Arc::new(event));
		let mut inner = self.inner.lock().await;

		let mut delivered = 0;
		let mut dropped_total: u64 = 0;
		let mut closed = Vec::new();

		for conn in conns {
			let Some(outbox) = inner.outboxes.get_mut(conn) else {
				continue;
			};

			match outbox.tx.try_send(item.clone()) {
				Ok(()) => {
					delivered += 1;
					if outbox.pending_lag > 0
						&& outbox
							.tx
							.try_send(HubItem::Lagged {
								dropped: outbox.pending_lag,
							})
							.is_ok()
					{
						outbox.pending_lag = 0;
					}
				}
				Err(mpsc::error::TrySendError::Full(_)) => {
					dropped_total += 1;
					outbox.pending_lag = outbox.pending_lag.saturating_add(1);
				}
				Err(mpsc::error::TrySendError::Closed(_)) => closed.push(*conn),
			}
		}

		for conn in closed {
			inner.outboxes.remove(&conn);
		}

		if dropped_total > 0 {
			metrics::counter!("parlor_server_outbox_dropped_total").increment(dropped_total);
			if self.cfg.debug_logs {
				debug!(dropped = dropped_total, "hub: dropped due to full outboxes");
			}
		}

		delivered
	}

	/// Deliver `event` to a single connection.
	pub async fn send_to(&self, conn: ConnId, event: ServerEvent) -> bool {
		self.publish(&[conn], event).await == 1
	}

	pub async fn connection_count(&self) -> usize {
		let inner = self.inner.lock().await;
		inner.outboxes.values().filter(|o| !o.tx.is_closed()).count()
	}
}
