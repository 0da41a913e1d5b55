#![forbid(unsafe_code)]

use anyhow::{Context, anyhow};
use bytes::BytesMut;
use parlor_domain::ConnId;
use parlor_protocol::{ClientEvent, DEFAULT_MAX_FRAME_SIZE, FramingError, ServerEvent, encode_frame};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::server::broker::Broker;
use crate::server::hub::HubItem;

/// Serve one QUIC connection: a single bidirectional stream of
/// length-prefixed JSON frames.
pub async fn handle_connection(connection: quinn::Connection, broker: Broker) -> anyhow::Result<()> {
	struct ConnectionGaugeGuard;
	impl Drop for ConnectionGaugeGuard {
		fn drop(&mut self) {
			metrics::gauge!("parlor_server_active_connections").decrement(1.0);
		}
	}

	metrics::gauge!("parlor_server_active_connections").increment(1.0);
	let _conn_guard = ConnectionGaugeGuard;

	let remote = connection.remote_address();
	let (send, recv) = connection.accept_bi().await.context("accept bidirectional stream")?;

	let (conn_id, outbox) = broker.connect().await;
	info!(conn_id = %conn_id, %remote, "client connected");

	let writer = tokio::spawn(drain_outbox(conn_id, send, outbox));

	let result = read_events(conn_id, recv, &broker).await;

	broker.disconnect(conn_id).await;
	match writer.await {
		Ok(Err(e)) => debug!(conn_id = %conn_id, error = %e, "writer stopped"),
		Err(e) => warn!(conn_id = %conn_id, error = %e, "writer task failed"),
		Ok(Ok(())) => {}
	}

	info!(conn_id = %conn_id, %remote, "client disconnected");
	result
}

async fn read_events(conn_id: ConnId, mut recv: quinn::RecvStream, broker: &Broker) -> anyhow::Result<()> {
	let mut buf = BytesMut::with_capacity(16 * 1024);
	let mut tmp = [0u8; 8192];

	loop {
		let n = match recv.read(&mut tmp).await {
			Ok(Some(n)) => n,
			Ok(None) => return Ok(()),
			Err(quinn::ReadError::ConnectionLost(e)) => {
				debug!(conn_id = %conn_id, error = %e, "connection lost");
				return Ok(());
			}
			Err(e) => return Err(anyhow!(e).context("stream read failed")),
		};

		metrics::counter!("parlor_server_bytes_in_total").increment(n as u64);
		buf.extend_from_slice(&tmp[..n]);

		loop {
			match parlor_protocol::try_decode_frame_from_buffer::<ClientEvent>(&mut buf, DEFAULT_MAX_FRAME_SIZE) {
				Ok(Some(event)) => {
					metrics::counter!("parlor_server_events_in_total").increment(1);
					broker.handle_event(conn_id, event).await;
				}
				Ok(None) => break,
				Err(FramingError::Json(e)) => {
					debug!(conn_id = %conn_id, error = %e, "dropping undecodable frame");
					metrics::counter!("parlor_server_messages_dropped_total").increment(1);
				}
				Err(e) => {
					metrics::counter!("parlor_server_decode_errors_total").increment(1);
					return Err(anyhow!(e).context("failed to decode frame"));
				}
			}
		}
	}
}

async fn drain_outbox(
	conn_id: ConnId,
	mut send: quinn::SendStream,
	mut outbox: mpsc::Receiver<HubItem>,
) -> anyhow::Result<()> {
	while let Some(item) = outbox.recv().await {
		match item {
			HubItem::Event(event) => send_event(&mut send, &event).await?,
			HubItem::Lagged { dropped } => {
				debug!(conn_id = %conn_id, dropped, "client lagged; events were dropped");
			}
		}
	}

	let _ = send.finish();
	Ok(())
}

async fn send_event(send: &mut quinn::SendStream, event: &ServerEvent) -> anyhow::Result<()> {
	let frame = encode_frame(event, DEFAULT_MAX_FRAME_SIZE).map_err(|e| anyhow!(e))?;
	metrics::counter!("parlor_server_events_out_total").increment(1);
	metrics::counter!("parlor_server_bytes_out_total").increment(frame.len() as u64);

	send.write_all(&frame).await.context("stream write")?;
	Ok(())
}
