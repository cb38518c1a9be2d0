#![forbid(unsafe_code)]

mod config;

use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use tickbridge_twitch::{Bridge, HostLogLayer, NormalizedEvent, Severity};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

fn usage_and_exit() -> ! {
	eprintln!(
		"Usage: tickbridge_host [--config path]\n\
\n\
Options:\n\
\t--config  Config file (default: <config dir>/tickbridge/config.toml)\n\
\t--help    Show this help\n\
"
	);
	std::process::exit(2)
}

struct Args {
	config: Option<PathBuf>,
}

fn parse_args() -> Args {
	let mut config = None;

	let mut it = std::env::args().skip(1);
	while let Some(arg) = it.next() {
		match arg.as_str() {
			"--help" | "-h" => usage_and_exit(),
			"--config" | "-c" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				if v.trim().is_empty() {
					eprintln!("--config must be non-empty");
					usage_and_exit();
				}
				config = Some(PathBuf::from(v));
			}
			other => {
				eprintln!("Unknown argument: {other}");
				usage_and_exit();
			}
		}
	}

	Args { config }
}

/// Emits one JSON line on stdout per record, the way the engine console consumes them.
fn emit_line(value: &serde_json::Value) {
	let mut out = std::io::stdout().lock();
	let _ = writeln!(out, "{value}");
}

fn emit_event(event: &NormalizedEvent) {
	match serde_json::to_value(event) {
		Ok(v) => emit_line(&v),
		Err(e) => warn!(error = %e, event_type = %event.event_type(), "failed to serialize event"),
	}
}

fn engine_log(severity: Severity, line: &str) {
	emit_line(&serde_json::json!({
		"type": "log",
		"severity": severity.as_str(),
		"message": line,
	}));
}

fn init_tracing() {
	let filter =
		std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tickbridge_host=debug,tickbridge_twitch=debug".to_string());

	tracing_subscriber::registry()
		.with(tracing_subscriber::EnvFilter::new(filter))
		.with(
			tracing_subscriber::fmt::layer()
				.with_target(false)
				.with_writer(std::io::stderr),
		)
		.with(HostLogLayer::new(Arc::new(engine_log)))
		.init();
}

fn init_metrics(bind: Option<&str>) {
	let Some(bind) = bind else {
		return;
	};

	match bind.parse::<std::net::SocketAddr>() {
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
	let args = parse_args();
	init_tracing();

	let config_path = args.config.unwrap_or_else(config::default_config_path);
	let host_cfg = config::load_host_config_from_path(&config_path)?;
	info!(path = %config_path.display(), "loaded host config (toml + env overrides)");

	init_metrics(host_cfg.host.metrics_bind.as_deref());

	let bridge = Bridge::new(host_cfg.bridge_config())?;
	let status = bridge.status();
	let mut consumer = bridge.tick_consumer();

	let (shutdown_tx, shutdown_rx) = watch::channel(false);
	let mut bridge_task = tokio::spawn(bridge.run(shutdown_rx));

	let mut ticker = tokio::time::interval(host_cfg.host.tick_interval);
	ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

	let mut announced_login = false;
	let mut shutting_down = false;

	let outcome = loop {
		tokio::select! {
			_ = ticker.tick() => {
				if !announced_login && let Some(login) = status.broadcaster_login() {
					info!(%login, "bridge authenticated");
					announced_login = true;
				}
				for event in consumer.tick() {
					emit_event(&event);
				}
			}
			res = &mut bridge_task => break res,
			_ = tokio::signal::ctrl_c(), if !shutting_down => {
				info!("shutdown requested");
				shutting_down = true;
				let _ = shutdown_tx.send(true);
			}
		}
	};

	for event in consumer.tick() {
		emit_event(&event);
	}

	match outcome {
		Ok(Ok(())) => {
			info!("bridge stopped");
			Ok(())
		}
		Ok(Err(e)) => {
			error!(kind = %e.kind(), error = %e, "bridge stopped with error");
			Err(e.into())
		}
		Err(e) => Err(anyhow::anyhow!(e).context("bridge task failed")),
	}
}
