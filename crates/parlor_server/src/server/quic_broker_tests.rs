use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use anyhow::Context as _;
use parlor_client_core::{ChatSession, ClientConfig};
use parlor_protocol::ServerEvent;

use crate::config::BrokerSettings;
use crate::quic::config::QuicServerConfig;
use crate::server::broker::Broker;
use crate::server::connection::handle_connection;

const WAIT: Duration = Duration::from_secs(5);

fn init_rustls_crypto_provider() {
	let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

async fn spawn_server() -> anyhow::Result<(SocketAddr, Broker)> {
	init_rustls_crypto_provider();

	let bind_addr: SocketAddr = "127.0.0.1:0".parse().context("parse bind addr")?;
	let (endpoint, _cert_der) = QuicServerConfig::dev(bind_addr).bind_dev_endpoint()?;
	let mut server_addr = endpoint.local_addr().context("local addr")?;
	if server_addr.ip().is_unspecified() {
		server_addr.set_ip(Ipv4Addr::LOCALHOST.into());
	}

	let broker = Broker::new(BrokerSettings::default(), None);
	broker.bootstrap().await?;

	let accept_broker = broker.clone();
	tokio::spawn(async move {
		while let Some(incoming) = endpoint.accept().await {
			let broker = accept_broker.clone();
			tokio::spawn(async move {
				if let Ok(connection) = incoming.await {
					let _ = handle_connection(connection, broker).await;
				}
			});
		}
	});

	Ok((server_addr, broker))
}

fn client_cfg(server_addr: SocketAddr) -> ClientConfig {
	ClientConfig {
		server_host: "localhost".to_string(),
		server_port: server_addr.port(),
		server_addr: Some(server_addr),
		..ClientConfig::default()
	}
}

fn lists(event: &ServerEvent, room: &str, users: &[&str]) -> bool {
	matches!(event, ServerEvent::UserList(p) if p.room == room && p.users == users)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn chat_round_trip_over_quic() -> anyhow::Result<()> {
	let (addr, broker) = spawn_server().await?;

	let mut alice = ChatSession::connect(client_cfg(addr)).await.context("alice connect")?;
	alice.join("global", "alice", None).await?;
	alice
		.wait_for(WAIT, |e| matches!(e, ServerEvent::MessageHistory(_)))
		.await
		.context("alice history")?;

	let mut bob = ChatSession::connect(client_cfg(addr)).await.context("bob connect")?;
	bob.join("global", "bob", None).await?;
	bob.wait_for(WAIT, |e| matches!(e, ServerEvent::MessageHistory(_)))
		.await
		.context("bob history")?;
	alice
		.wait_for(WAIT, |e| lists(e, "global", &["alice", "bob"]))
		.await
		.context("alice sees bob")?;

	alice.say("hello <bob>").await?;
	let got = bob
		.wait_for(WAIT, |e| matches!(e, ServerEvent::ChatMessage(_)))
		.await
		.context("bob receives message")?;
	match got {
		ServerEvent::ChatMessage(m) => {
			assert_eq!(m.username, "alice");
			assert_eq!(m.text, "hello &lt;bob&gt;");
			assert_eq!(m.room.as_str(), "global");
		}
		other => panic!("unexpected event: {other:?}"),
	}

	alice.close(0, "bye");
	bob.wait_for(WAIT, |e| lists(e, "global", &["bob"]))
		.await
		.context("bob sees alice leave")?;
	assert_eq!(broker.users(&parlor_domain::RoomName::default_room()).await, ["bob"]);

	Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn refused_join_reports_room_error() -> anyhow::Result<()> {
	let (addr, broker) = spawn_server().await?;
	broker
		.create_room(parlor_domain::RoomSpec {
			password: Some("secret".into()),
			..parlor_domain::RoomSpec::named("vault")
		})
		.await?;

	let mut client = ChatSession::connect(client_cfg(addr)).await.context("connect")?;
	client.join("vault", "mallory", Some("guess")).await?;
	let err = client
		.wait_for(WAIT, |e| matches!(e, ServerEvent::RoomError(_)))
		.await
		.context("room error")?;
	assert!(matches!(err, ServerEvent::RoomError(p) if p.message == "Incorrect password"));

	client.join("vault", "mallory", Some("secret")).await?;
	client
		.wait_for(WAIT, |e| lists(e, "vault", &["mallory"]))
		.await
		.context("joined after correct password")?;

	Ok(())
}
