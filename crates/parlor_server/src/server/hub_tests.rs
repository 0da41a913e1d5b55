#![forbid(unsafe_code)]

use std::time::Duration;

use parlor_domain::ConnId;
use parlor_protocol::{ServerEvent, TypingPayload};
use tokio::time::timeout;

use crate::server::hub::{ConnectionHub, HubConfig, HubItem};

fn typing(username: &str) -> ServerEvent {
	ServerEvent::UserTyping(TypingPayload {
		room: "global".to_string(),
		username: username.to_string(),
	})
}

fn hub(capacity: usize) -> ConnectionHub {
	ConnectionHub::new(HubConfig {
		outbox_capacity: capacity,
		debug_logs: false,
	})
}

#[tokio::test]
async fn publish_reaches_only_listed_connections() {
	let hub = hub(16);
	let mut rx_a = hub.register(ConnId(1)).await;
	let mut rx_b = hub.register(ConnId(2)).await;

	let delivered = hub.publish(&[ConnId(2)], typing("bob")).await;
	assert_eq!(delivered, 1);

	let got_unexpected = timeout(Duration::from_millis(50), rx_a.recv()).await;
	assert!(got_unexpected.is_err(), "connection 1 received an event addressed to 2");

	let item = timeout(Duration::from_millis(250), rx_b.recv())
		.await
		.expect("expected to receive within timeout")
		.expect("channel open");

	match item {
		HubItem::Event(ev) => assert_eq!(*ev, typing("bob")),
		other => panic!("expected Event item, got: {other:?}"),
	}
}

#[tokio::test]
async fn dropped_receivers_are_pruned() {
	let hub = hub(16);

	{
		let _rx = hub.register(ConnId(1)).await;
	}

	assert_eq!(hub.publish(&[ConnId(1)], typing("alice")).await, 0);
	assert_eq!(hub.connection_count().await, 0);
	assert!(!hub.send_to(ConnId(1), typing("alice")).await);
}

async fn next(rx: &mut tokio::sync::mpsc::Receiver<HubItem>) -> HubItem {
	timeout(Duration::from_millis(250), rx.recv())
		.await
		.expect("expected item within timeout")
		.expect("channel open")
}

#[tokio::test]
async fn full_outbox_drops_and_then_reports_lag() {
	let hub = hub(2);
	let mut rx = hub.register(ConnId(7)).await;

	assert_eq!(hub.publish(&[ConnId(7)], typing("a-1")).await, 1);
	assert_eq!(hub.publish(&[ConnId(7)], typing("a-2")).await, 1);
	assert_eq!(hub.publish(&[ConnId(7)], typing("a-3")).await, 0);

	assert!(matches!(next(&mut rx).await, HubItem::Event(ev) if *ev == typing("a-1")));
	assert!(matches!(next(&mut rx).await, HubItem::Event(ev) if *ev == typing("a-2")));

	assert_eq!(hub.publish(&[ConnId(7)], typing("a-4")).await, 1);
	assert!(matches!(next(&mut rx).await, HubItem::Event(ev) if *ev == typing("a-4")));

	match next(&mut rx).await {
		HubItem::Lagged { dropped } => assert_eq!(dropped, 1),
		other => panic!("expected Lagged marker, got: {other:?}"),
	}
}
