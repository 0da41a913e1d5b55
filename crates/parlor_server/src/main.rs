#![forbid(unsafe_code)]

mod config;
mod quic;
mod server;

use std::net::SocketAddr;
use std::path::PathBuf;

use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::quic::config::QuicServerConfig;
use crate::server::broker::Broker;
use crate::server::connection::handle_connection;
use crate::server::health::{HealthState, spawn_health_server};
use crate::server::store::connect_store;

const DEFAULT_BIND: &str = "127.0.0.1:18203";

fn usage_and_exit() -> ! {
	eprintln!(
		"Usage: parlor_server [--bind host:port] [--config path]\n\
\n\
Options:\n\
\t--bind     Bind address (default: {DEFAULT_BIND})\n\
\t          A quic:// prefix is accepted\n\
\t--config   Config file (default: ~/.parlor/config.toml)\n\
\t--help    Show this help\n\
"
	);
	std::process::exit(2)
}

struct Args {
	bind: SocketAddr,
	config: Option<PathBuf>,
}

fn parse_bind(raw: &str) -> Result<SocketAddr, String> {
	let raw = raw.trim();
	let host_port = raw.strip_prefix("quic://").unwrap_or(raw);
	host_port
		.parse::<SocketAddr>()
		.map_err(|e| format!("invalid bind address {raw:?} (expected host:port with an IP literal): {e}"))
}

fn parse_args() -> Args {
	let mut bind = DEFAULT_BIND.to_string();
	let mut config = None;

	let mut it = std::env::args().skip(1);
	while let Some(arg) = it.next() {
		match arg.as_str() {
			"--help" | "-h" => usage_and_exit(),
			"--bind" | "--listen" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				if v.trim().is_empty() {
					eprintln!("--bind must be non-empty (expected host:port)");
					usage_and_exit();
				}
				bind = v;
			}
			"--config" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				config = Some(PathBuf::from(v));
			}
			other => {
				eprintln!("Unknown argument: {other}");
				usage_and_exit();
			}
		}
	}

	let bind = parse_bind(&bind).unwrap_or_else(|e| {
		eprintln!("{e}");
		usage_and_exit();
	});

	Args { bind, config }
}

fn init_rustls_crypto_provider() {
	let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

fn init_tracing() {
	let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,parlor_server=debug".to_string());

	let otlp_endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
		.ok()
		.map(|v| v.trim().to_string())
		.filter(|v| !v.is_empty());
	let base = tracing_subscriber::registry()
		.with(tracing_subscriber::EnvFilter::new(filter))
		.with(tracing_subscriber::fmt::layer().with_target(false));

	if let Some(endpoint) = otlp_endpoint {
		use opentelemetry::global;
		use opentelemetry::trace::TracerProvider as _;
		use opentelemetry_otlp::WithExportConfig;

		match opentelemetry_otlp::SpanExporter::builder()
			.with_tonic()
			.with_endpoint(endpoint.clone())
			.build()
		{
			Ok(exporter) => {
				let tracer_provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
					.with_batch_exporter(exporter)
					.build();
				let tracer = tracer_provider.tracer("parlor_server");
				global::set_tracer_provider(tracer_provider);

				let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
				base.with(otel_layer).init();
				info!(endpoint = %endpoint, "otlp tracing enabled");
			}
			Err(e) => {
				base.init();
				warn!(error = %e, "failed to initialize otlp tracing");
			}
		}
	} else {
		base.init();
	}
}

fn init_metrics(bind: Option<&str>) {
	let Some(bind) = bind else {
		return;
	};

	match bind.parse::<SocketAddr>() {
		Ok(addr) => {
			if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new()
				.with_http_listener(addr)
				.install()
			{
				warn!(error = %e, "failed to start metrics exporter");
			} else {
				info!(%addr, "metrics exporter listening");
			}
		}
		Err(e) => {
			warn!(error = %e, %bind, "invalid metrics bind address (expected host:port)");
		}
	}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	init_rustls_crypto_provider();
	init_tracing();

	let args = parse_args();

	let config_path = match args.config {
		Some(path) => path,
		None => crate::config::default_config_path()?,
	};
	let server_cfg = crate::config::load_server_config_from_path(&config_path)?;
	info!(path = %config_path.display(), "loaded server config (toml + env overrides)");

	init_metrics(server_cfg.server.metrics_bind.as_deref());

	let store = if server_cfg.persistence.enabled {
		let Some(database_url) = server_cfg.persistence.database_url.as_deref() else {
			return Err(anyhow::anyhow!("persistence enabled but no database_url configured"));
		};
		match connect_store(database_url).await {
			Ok(store) => {
				info!("persistence enabled");
				Some(store)
			}
			Err(e) => {
				warn!(error = %e, "store unavailable; running memory-only");
				None
			}
		}
	} else {
		info!("persistence disabled; running memory-only");
		None
	};

	let broker = Broker::new(server_cfg.broker.clone(), store);
	broker.bootstrap().await?;

	let health_state = HealthState::new(broker.clone());
	if let Some(bind) = server_cfg.server.health_bind.as_deref() {
		match bind.parse::<SocketAddr>() {
			Ok(addr) => spawn_health_server(addr, health_state.clone()),
			Err(e) => warn!(error = %e, %bind, "invalid health bind address (expected host:port)"),
		}
	}

	let quic_cfg = QuicServerConfig::dev(args.bind);
	let endpoint = if let (Some(cert_path), Some(key_path)) = (
		server_cfg.server.tls_cert_path.as_deref(),
		server_cfg.server.tls_key_path.as_deref(),
	) {
		info!(cert = %cert_path.display(), key = %key_path.display(), "loading TLS cert/key");
		quic_cfg.bind_endpoint_with_tls(cert_path, key_path)?
	} else {
		let (endpoint, server_cert_der) = quic_cfg.bind_dev_endpoint()?;
		info!(
			bind = %args.bind,
			cert_der_len = server_cert_der.len(),
			"parlor_server: QUIC endpoint ready (dev self-signed cert)"
		);
		endpoint
	};

	health_state.mark_ready();

	while let Some(incoming) = endpoint.accept().await {
		metrics::counter!("parlor_server_connections_total").increment(1);

		let broker = broker.clone();
		tokio::spawn(async move {
			match incoming.await {
				Ok(connection) => {
					if let Err(e) = handle_connection(connection, broker).await {
						warn!(error = %e, "connection handler exited with error");
					}
				}
				Err(e) => {
					warn!(error = %e, "failed to establish QUIC connection");
				}
			}
		});
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	use super::parse_bind;

	#[test]
	fn bind_accepts_optional_scheme() {
		let expected: std::net::SocketAddr = "127.0.0.1:18203".parse().expect("addr");
		assert_eq!(parse_bind("127.0.0.1:18203"), Ok(expected));
		assert_eq!(parse_bind("quic://127.0.0.1:18203"), Ok(expected));
		assert!(parse_bind("localhost:18203").is_err());
	}
}
