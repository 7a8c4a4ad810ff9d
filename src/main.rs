//! Demo: routes weather station topics from a public broker.
//!
//! ```bash
//! BROKER_HOST=test.mosquitto.org RUST_LOG=info cargo run
//! ```

use mqtt_router::client::generate_client_id;
use mqtt_router::prelude::*;
use mqtt_router::sync_handler;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn register_routes(router: &MqttRouter) -> Result<()> {
	router
		.route("weather/+channel+/wflrealtime.txt")
		.raw_payload(true)
		.with_qos(QoS::ExactlyOnce)
		.handle(
			|topic: ArcStr, payload: Payload, params: TopicParams| async move {
				info!(
					topic = %topic,
					params = %params,
					text = payload.as_text().unwrap_or("<binary>"),
					"Realtime report"
				);
				Ok::<_, BoxError>(())
			},
		)?;

	router
		.route("weather/+channel+/wflwflexpj.json")
		.with_qos(QoS::ExactlyOnce)
		.handle(
			|topic: ArcStr, payload: Payload, params: TopicParams| async move {
				info!(
					topic = %topic,
					channel = params.get("channel").unwrap_or_default(),
					json = payload.is_json(),
					payload = %payload,
					"Forecast"
				);
				Ok::<_, BoxError>(())
			},
		)?;

	router
		.route("weather/#")
		.raw_payload(true)
		.fallback(true)
		.handle_sync(|topic, payload, _params| {
			let size = payload.as_bytes().map_or(0, |b| b.len());
			info!(topic = %topic, size = size, "Unrouted weather message");
			Ok::<_, BoxError>(())
		})?;

	router.subscribe(
		"weather/vt-dev/wflwflexpj.json",
		sync_handler(|topic, payload: Payload, _params| {
			info!(topic = %topic, payload = %payload, "Dev channel forecast");
			Ok::<_, BoxError>(())
		}),
	)?;

	router.on_shutdown(|| async {
		info!("Shutdown hook called");
		Ok::<_, BoxError>(())
	});
	Ok(())
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
	tracing_subscriber::registry()
		.with(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| "info".into()),
		)
		.with(
			tracing_subscriber::fmt::layer()
				.with_target(true)
				.with_thread_ids(false)
				.with_thread_names(false)
				.with_file(false)
				.with_line_number(false)
				.compact(),
		)
		.init();

	let host =
		std::env::var("BROKER_HOST").unwrap_or_else(|_| "localhost".into());
	let port = std::env::var("BROKER_PORT")
		.ok()
		.and_then(|p| p.parse().ok())
		.unwrap_or(1883);

	let router = MqttRouter::new();
	register_routes(&router)?;

	let config = MqttRouterConfig::new(
		&generate_client_id("mqtt-router-demo"),
		&host,
		port,
	);
	info!(host = %host, port = port, "Connecting to broker");
	let connection = router.connect_with_config(config).await?;

	tokio::signal::ctrl_c().await?;
	info!("Interrupted, shutting down");
	let report = connection.shutdown().await;
	if !report.is_clean() {
		for err in &report.errors {
			tracing::warn!(error = %err, "Shutdown hook problem");
		}
	}
	Ok(())
}
