#![forbid(unsafe_code)]

//! Plain HTTP side channel: liveness, readiness and read-only room views.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::CONTENT_TYPE;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use parlor_domain::BrokerError;
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::server::broker::Broker;

#[derive(Clone)]
pub struct HealthState {
	ready: Arc<AtomicBool>,
	broker: Broker,
}

impl HealthState {
	pub fn new(broker: Broker) -> Self {
		Self {
			ready: Arc::new(AtomicBool::new(false)),
			broker,
		}
	}

	pub fn mark_ready(&self) {
		self.ready.store(true, Ordering::Relaxed);
	}

	pub fn is_ready(&self) -> bool {
		self.ready.load(Ordering::Relaxed)
	}
}

pub fn spawn_health_server(bind: SocketAddr, state: HealthState) {
	tokio::spawn(async move {
		if let Err(err) = run_health_server(bind, state).await {
			warn!(error = %err, "health server stopped");
		}
	});
}

async fn run_health_server(bind: SocketAddr, state: HealthState) -> anyhow::Result<()> {
	let listener = TcpListener::bind(bind).await?;
	info!(%bind, "health server listening");
	loop {
		let (stream, _addr) = listener.accept().await?;
		let io = TokioIo::new(stream);
		let state = state.clone();
		tokio::spawn(async move {
			let service = service_fn(move |req| handle_health(req, state.clone()));
			if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
				warn!(error = %err, "health connection error");
			}
		});
	}
}

fn respond(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
	let mut resp = Response::new(Full::new(body.into()));
	*resp.status_mut() = status;
	resp
}

fn json<T: Serialize>(value: &T) -> Response<Full<Bytes>> {
	match serde_json::to_vec(value) {
		Ok(body) => {
			let mut resp = respond(StatusCode::OK, body);
			resp.headers_mut()
				.insert(CONTENT_TYPE, hyper::header::HeaderValue::from_static("application/json"));
			resp
		}
		Err(e) => {
			warn!(error = %e, "failed to encode health response");
			respond(StatusCode::INTERNAL_SERVER_ERROR, Bytes::new())
		}
	}
}

async fn handle_health(req: Request<Incoming>, state: HealthState) -> Result<Response<Full<Bytes>>, hyper::Error> {
	if req.method() != Method::GET {
		return Ok(respond(StatusCode::METHOD_NOT_ALLOWED, Bytes::new()));
	}

	let path = req.uri().path();
	let resp = match path {
		"/healthz" => respond(StatusCode::OK, Bytes::from_static(b"ok")),
		"/readyz" => {
			if state.is_ready() {
				respond(StatusCode::OK, Bytes::from_static(b"ready"))
			} else {
				respond(StatusCode::SERVICE_UNAVAILABLE, Bytes::from_static(b"not ready"))
			}
		}
		"/rooms" => json(&state.broker.public_rooms().await),
		_ => match room_stats_target(path) {
			Some(name) => match state.broker.room_stats(&name).await {
				Ok(stats) => json(&stats),
				Err(BrokerError::RoomNotFound(_) | BrokerError::InvalidName(_)) => {
					respond(StatusCode::NOT_FOUND, Bytes::from_static(b"room not found"))
				}
				Err(e) => respond(StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
			},
			None => respond(StatusCode::NOT_FOUND, Bytes::new()),
		},
	};
	Ok(resp)
}

/// `/rooms/<name>/stats` → percent-decoded `<name>`.
fn room_stats_target(path: &str) -> Option<String> {
	let raw = path.strip_prefix("/rooms/")?.strip_suffix("/stats")?;
	if raw.is_empty() || raw.contains('/') {
		return None;
	}
	urlencoding::decode(raw).ok().map(|name| name.into_owned())
}

#[cfg(test)]
mod tests {
	use super::room_stats_target;

	#[test]
	fn stats_paths() {
		assert_eq!(room_stats_target("/rooms/global/stats").as_deref(), Some("global"));
		assert_eq!(room_stats_target("/rooms//stats"), None);
		assert_eq!(room_stats_target("/rooms/a/b/stats"), None);
		assert_eq!(room_stats_target("/rooms/global"), None);
	}

	#[test]
	fn stats_paths_are_percent_decoded() {
		assert_eq!(room_stats_target("/rooms/my%20room/stats").as_deref(), Some("my room"));
		assert_eq!(room_stats_target("/rooms/caf%C3%A9/stats").as_deref(), Some("café"));
		assert_eq!(room_stats_target("/rooms/a%2Fb/stats").as_deref(), Some("a/b"));
		assert_eq!(room_stats_target("/rooms/%FF/stats"), None);
	}
}
