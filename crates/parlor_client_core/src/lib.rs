#![forbid(unsafe_code)]

//! QUIC chat session client.
//!
//! A session is one bidirectional stream. Client events are written as
//! length-prefixed JSON frames; server events arrive the same way on the
//! receive half.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use bytes::BytesMut;
use parlor_domain::{ReplyRef, RoomSpec, RoomUpdate};
use parlor_protocol::{
	ChatMessagePayload, ClientEvent, DEFAULT_MAX_FRAME_SIZE, DeleteRoomPayload, EditMessagePayload, FramingError,
	JoinRoomPayload, LeaveRoomPayload, ReactionPayload, ServerEvent, TypingPayload, UpdateRoomPayload, encode_frame,
	try_decode_frame_from_buffer,
};
use quinn::{ClientConfig as QuinnClientConfig, Endpoint, TransportConfig, VarInt};
use tracing::{debug, info};

pub const DEFAULT_SERVER_PORT: u16 = 18203;

/// Client session configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
	/// Remote server host (DNS name or IP literal); also used as SNI.
	pub server_host: String,

	/// Remote server UDP port.
	pub server_port: u16,

	/// Resolved remote server address override.
	pub server_addr: Option<SocketAddr>,

	/// Maximum inbound/outbound frame size.
	pub max_frame_bytes: usize,

	/// Timeout for connect + stream setup.
	pub connect_timeout: Duration,
}

impl ClientConfig {
	/// Parse `host:port`, optionally prefixed with `quic://`.
	pub fn parse_endpoint(endpoint: &str) -> Result<(String, u16), ClientCoreError> {
		let raw = endpoint.trim();
		let host_port = raw.strip_prefix("quic://").unwrap_or(raw);

		let invalid = |why: &str| ClientCoreError::Protocol(format!("invalid endpoint {raw:?} (expected host:port): {why}"));

		let (host, port) = host_port.rsplit_once(':').ok_or_else(|| invalid("missing port"))?;
		let host = host.trim_start_matches('[').trim_end_matches(']');
		if host.is_empty() {
			return Err(invalid("missing host"));
		}
		let port = port.parse::<u16>().map_err(|_| invalid("bad port"))?;
		Ok((host.to_string(), port))
	}

	pub fn from_endpoint(endpoint: &str) -> Result<Self, ClientCoreError> {
		let (host, port) = Self::parse_endpoint(endpoint)?;
		Ok(Self {
			server_addr: format!("{host}:{port}").parse().ok(),
			server_host: host,
			server_port: port,
			..Self::default()
		})
	}
}

impl Default for ClientConfig {
	fn default() -> Self {
		Self {
			server_host: "localhost".to_string(),
			server_port: DEFAULT_SERVER_PORT,
			server_addr: Some(SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, DEFAULT_SERVER_PORT))),
			max_frame_bytes: DEFAULT_MAX_FRAME_SIZE,
			connect_timeout: Duration::from_secs(15),
		}
	}
}

/// Errors for client core operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientCoreError {
	/// QUIC endpoint setup failed.
	#[error("failed to create QUIC endpoint: {0}")]
	Endpoint(String),

	/// Connection establishment failed.
	#[error("failed to connect: {0}")]
	Connect(String),

	/// Protocol framing error.
	#[error(transparent)]
	Framing(#[from] FramingError),

	/// Protocol error (bad endpoint, unexpected stream state).
	#[error("protocol error: {0}")]
	Protocol(String),

	/// IO error.
	#[error("io error: {0}")]
	Io(String),

	/// Timed out waiting for the server.
	#[error("timed out after {0:?}")]
	Timeout(Duration),
}

/// Write half of a session.
pub struct SessionSender {
	send: quinn::SendStream,
	max_frame_bytes: usize,
}

/// Read half of a session.
pub struct SessionReceiver {
	recv: quinn::RecvStream,
	buf: BytesMut,
	max_frame_bytes: usize,
}

/// A connected chat session.
pub struct ChatSession {
	conn: quinn::Connection,
	tx: SessionSender,
	rx: SessionReceiver,
}

impl ChatSession {
	/// Connect and open the session stream.
	///
	/// The server only observes the stream once the first event is sent.
	pub async fn connect(cfg: ClientConfig) -> Result<Self, ClientCoreError> {
		let endpoint = make_client_endpoint().map_err(|e| ClientCoreError::Endpoint(format!("{e:#}")))?;
		let quinn_cfg = make_insecure_client_config().map_err(|e| ClientCoreError::Endpoint(format!("{e:#}")))?;

		let connect_timeout = cfg.connect_timeout;
		let server_name = cfg.server_host.clone();

		let candidates: Vec<SocketAddr> = match cfg.server_addr {
			Some(addr) => vec![addr],
			None => {
				let hostport = format!("{}:{}", cfg.server_host, cfg.server_port);
				let addrs: Vec<SocketAddr> = hostport
					.to_socket_addrs()
					.map_err(|e| ClientCoreError::Connect(format!("failed to resolve {hostport}: {e}")))?
					.collect();
				if addrs.is_empty() {
					return Err(ClientCoreError::Connect(format!(
						"DNS resolution returned no addresses for {hostport}"
					)));
				}
				addrs
			}
		};

		let mut last_err: Option<String> = None;
		let mut conn: Option<quinn::Connection> = None;

		for server_addr in candidates {
			let connecting = endpoint
				.connect_with(quinn_cfg.clone(), server_addr, &server_name)
				.map_err(|e| ClientCoreError::Connect(format!("connect_with({server_addr}, sni={server_name}): {e}")))?;

			match tokio::time::timeout(connect_timeout, connecting).await {
				Ok(Ok(c)) => {
					conn = Some(c);
					break;
				}
				Ok(Err(e)) => {
					last_err = Some(format!("connect failed (addr={server_addr}, sni={server_name}): {e}"));
				}
				Err(_) => {
					last_err = Some(format!(
						"connect timeout after {connect_timeout:?} (addr={server_addr}, sni={server_name})"
					));
				}
			}
		}

		let conn = conn.ok_or_else(|| {
			ClientCoreError::Connect(
				last_err.unwrap_or_else(|| format!("connect failed (no addresses attempted) (sni={server_name})")),
			)
		})?;

		info!(remote = %conn.remote_address(), "connected");

		let (send, recv) = tokio::time::timeout(connect_timeout, conn.open_bi())
			.await
			.map_err(|_| ClientCoreError::Timeout(connect_timeout))?
			.map_err(|e| ClientCoreError::Io(format!("open_bi failed: {e}")))?;

		Ok(Self {
			conn,
			tx: SessionSender {
				send,
				max_frame_bytes: cfg.max_frame_bytes,
			},
			rx: SessionReceiver {
				recv,
				buf: BytesMut::with_capacity(16 * 1024),
				max_frame_bytes: cfg.max_frame_bytes,
			},
		})
	}

	pub async fn send(&mut self, event: &ClientEvent) -> Result<(), ClientCoreError> {
		self.tx.send(event).await
	}

	pub async fn join(&mut self, room: &str, username: &str, password: Option<&str>) -> Result<(), ClientCoreError> {
		self.tx.join(room, username, password).await
	}

	pub async fn say(&mut self, text: &str) -> Result<(), ClientCoreError> {
		self.tx.say(text).await
	}

	/// Next server event; `None` once the server closes the stream.
	pub async fn next_event(&mut self) -> Result<Option<ServerEvent>, ClientCoreError> {
		self.rx.next_event().await
	}

	/// Read events until one matches `pred`, discarding the rest.
	pub async fn wait_for<F>(&mut self, limit: Duration, pred: F) -> Result<ServerEvent, ClientCoreError>
	where
		F: FnMut(&ServerEvent) -> bool,
	{
		self.rx.wait_for(limit, pred).await
	}

	pub fn into_parts(self) -> (quinn::Connection, SessionSender, SessionReceiver) {
		(self.conn, self.tx, self.rx)
	}

	pub fn close(&self, code: u32, reason: &str) {
		self.conn.close(VarInt::from_u32(code), reason.as_bytes());
	}
}

impl SessionSender {
	pub async fn send(&mut self, event: &ClientEvent) -> Result<(), ClientCoreError> {
		let frame = encode_frame(event, self.max_frame_bytes)?;
		self.send
			.write_all(&frame)
			.await
			.map_err(|e| ClientCoreError::Io(e.to_string()))?;
		debug!(event = event.name(), bytes = frame.len(), "sent event");
		Ok(())
	}

	pub async fn join(&mut self, room: &str, username: &str, password: Option<&str>) -> Result<(), ClientCoreError> {
		self.send(&ClientEvent::JoinRoom(JoinRoomPayload {
			room: room.to_string(),
			username: username.to_string(),
			password: password.map(str::to_string),
		}))
		.await
	}

	pub async fn leave(&mut self) -> Result<(), ClientCoreError> {
		self.send(&ClientEvent::LeaveRoom(LeaveRoomPayload::default())).await
	}

	pub async fn say(&mut self, text: &str) -> Result<(), ClientCoreError> {
		self.send(&ClientEvent::ChatMessage(ChatMessagePayload::text(text))).await
	}

	pub async fn reply(&mut self, text: &str, reply_to: ReplyRef) -> Result<(), ClientCoreError> {
		let mut payload = ChatMessagePayload::text(text);
		payload.reply_to = Some(reply_to);
		self.send(&ClientEvent::ChatMessage(payload)).await
	}

	pub async fn edit(&mut self, message_id: &str, text: &str) -> Result<(), ClientCoreError> {
		self.send(&ClientEvent::EditMessage(EditMessagePayload {
			message_id: message_id.to_string(),
			user_msg: text.to_string(),
		}))
		.await
	}

	pub async fn typing(&mut self, room: &str, username: &str, active: bool) -> Result<(), ClientCoreError> {
		let payload = TypingPayload {
			room: room.to_string(),
			username: username.to_string(),
		};
		let event = if active {
			ClientEvent::Typing(payload)
		} else {
			ClientEvent::StopTyping(payload)
		};
		self.send(&event).await
	}

	pub async fn react(&mut self, message_id: &str, emoji: &str, username: &str, room: &str) -> Result<(), ClientCoreError> {
		self.send(&ClientEvent::ToggleReaction(ReactionPayload {
			message_id: message_id.to_string(),
			emoji: emoji.to_string(),
			username: username.to_string(),
			room: room.to_string(),
		}))
		.await
	}

	pub async fn create_room(&mut self, spec: RoomSpec) -> Result<(), ClientCoreError> {
		self.send(&ClientEvent::CreateRoom(spec)).await
	}

	pub async fn delete_room(&mut self, name: &str) -> Result<(), ClientCoreError> {
		self.send(&ClientEvent::DeleteRoom(DeleteRoomPayload { name: name.to_string() }))
			.await
	}

	pub async fn update_room(&mut self, name: &str, update: RoomUpdate) -> Result<(), ClientCoreError> {
		self.send(&ClientEvent::UpdateRoom(UpdateRoomPayload {
			name: name.to_string(),
			update,
		}))
		.await
	}

	pub async fn list_rooms(&mut self) -> Result<(), ClientCoreError> {
		self.send(&ClientEvent::list_rooms()).await
	}

	pub fn finish(&mut self) {
		let _ = self.send.finish();
	}
}

impl SessionReceiver {
	pub async fn next_event(&mut self) -> Result<Option<ServerEvent>, ClientCoreError> {
		let mut tmp = [0u8; 8192];

		loop {
			if let Some(event) = try_decode_frame_from_buffer::<ServerEvent>(&mut self.buf, self.max_frame_bytes)? {
				return Ok(Some(event));
			}

			let n = match self.recv.read(&mut tmp).await {
				Ok(Some(n)) => n,
				Ok(None) => {
					info!("session stream closed");
					return Ok(None);
				}
				Err(e) => return Err(ClientCoreError::Io(e.to_string())),
			};
			self.buf.extend_from_slice(&tmp[..n]);
		}
	}

	pub async fn wait_for<F>(&mut self, limit: Duration, mut pred: F) -> Result<ServerEvent, ClientCoreError>
	where
		F: FnMut(&ServerEvent) -> bool,
	{
		let fut = async {
			loop {
				match self.next_event().await? {
					Some(event) if pred(&event) => return Ok(event),
					Some(event) => debug!(event = event.name(), "skipping event"),
					None => {
						return Err(ClientCoreError::Protocol(
							"stream closed before the expected event".to_string(),
						));
					}
				}
			}
		};
		tokio::time::timeout(limit, fut)
			.await
			.map_err(|_| ClientCoreError::Timeout(limit))?
	}
}

fn make_client_endpoint() -> anyhow::Result<Endpoint> {
	let addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0));
	let endpoint = Endpoint::client(addr).context("create client endpoint")?;
	Ok(endpoint)
}

/// Dev-only TLS config that skips server cert validation.
fn make_insecure_client_config() -> anyhow::Result<QuinnClientConfig> {
	let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

	#[derive(Debug)]
	struct NoVerifier;

	impl rustls::client::danger::ServerCertVerifier for NoVerifier {
		fn verify_server_cert(
			&self,
			_end_entity: &rustls::pki_types::CertificateDer<'_>,
			_intermediates: &[rustls::pki_types::CertificateDer<'_>],
			_server_name: &rustls::pki_types::ServerName<'_>,
			_ocsp_response: &[u8],
			_now: rustls::pki_types::UnixTime,
		) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
			Ok(rustls::client::danger::ServerCertVerified::assertion())
		}

		fn verify_tls12_signature(
			&self,
			_message: &[u8],
			_cert: &rustls::pki_types::CertificateDer<'_>,
			_dss: &rustls::DigitallySignedStruct,
		) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
			Err(rustls::Error::General("TLS1.2 not supported".into()))
		}

		fn verify_tls13_signature(
			&self,
			_message: &[u8],
			_cert: &rustls::pki_types::CertificateDer<'_>,
			_dss: &rustls::DigitallySignedStruct,
		) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
			Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
		}

		fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
			vec![
				rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
				rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
				rustls::SignatureScheme::RSA_PSS_SHA256,
				rustls::SignatureScheme::RSA_PSS_SHA384,
				rustls::SignatureScheme::RSA_PSS_SHA512,
				rustls::SignatureScheme::ED25519,
			]
		}
	}

	let mut tls = rustls::ClientConfig::builder()
		.with_root_certificates(rustls::RootCertStore::empty())
		.with_no_client_auth();

	tls.dangerous().set_certificate_verifier(Arc::new(NoVerifier));
	tls.alpn_protocols = vec![parlor_protocol::version::ALPN.to_vec()];

	let quic_tls = quinn::crypto::rustls::QuicClientConfig::try_from(tls)?;

	let mut cfg = QuinnClientConfig::new(Arc::new(quic_tls));

	let mut transport = TransportConfig::default();
	transport.max_concurrent_bidi_streams(VarInt::from_u32(4));
	cfg.transport_config(Arc::new(transport));

	Ok(cfg)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn default_config_targets_local_server() {
		let cfg = ClientConfig::default();
		assert_eq!(cfg.server_host, "localhost");
		assert_eq!(cfg.server_addr.map(|a| a.port()), Some(DEFAULT_SERVER_PORT));
		assert!(cfg.max_frame_bytes > 0);
	}

	#[test]
	fn endpoint_parsing() {
		assert_eq!(
			ClientConfig::parse_endpoint("quic://chat.example.com:443").ok(),
			Some(("chat.example.com".to_string(), 443))
		);
		assert_eq!(
			ClientConfig::parse_endpoint("127.0.0.1:18203").ok(),
			Some(("127.0.0.1".to_string(), 18203))
		);
		assert_eq!(
			ClientConfig::parse_endpoint("[::1]:9000").ok(),
			Some(("::1".to_string(), 9000))
		);
		assert!(ClientConfig::parse_endpoint("localhost").is_err());
		assert!(ClientConfig::parse_endpoint(":80").is_err());

		let cfg = ClientConfig::from_endpoint("127.0.0.1:9").expect("endpoint");
		assert_eq!(cfg.server_addr.map(|a| a.port()), Some(9));
		let named = ClientConfig::from_endpoint("chat.example.com:9").expect("endpoint");
		assert_eq!(named.server_addr, None);
	}
}
