//! Registration/heartbeat client (spec §4.5.4–§4.5.5).

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::Channel;
use tracing::Instrument;
use voila_protos::connect_message::Kind;
use voila_protos::crawler_register_client::CrawlerRegisterClient;
use voila_protos::{ConnectMessage, Heartbeat, Ping};

const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(4_500);
const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);

/// Registration connection state (spec §4.5.5). Exposed for observability
/// and tests; the loop itself only needs to know when to back off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
	Disconnected,
	Connecting,
	Connected,
	Stopped,
}

fn now_unix_secs() -> i64 {
	SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0)
}

/// Identity advertised on every connect attempt.
pub struct WorkerIdentity {
	pub id: String,
	pub store_id: String,
	pub version: i32,
	pub allowed_domains: Vec<String>,
	pub serve_port: u16,
}

/// Runs the registration/heartbeat loop against `crawlet_addr` until
/// `shutdown` resolves. Reconnects with a fixed 5s backoff on any stream
/// failure (spec §4.5.4).
pub async fn run(crawlet_addr: String, identity: WorkerIdentity, mut shutdown: tokio::sync::watch::Receiver<bool>) {
	loop {
		if *shutdown.borrow() {
			tracing::info!("registration loop stopping");
			return;
		}

		tracing::info!(addr = %crawlet_addr, "connecting to coordinator");
		let span = tracing::info_span!("registration", id = %identity.id, store_id = %identity.store_id);
		match connect_and_heartbeat(&crawlet_addr, &identity, &mut shutdown).instrument(span).await {
			Ok(()) => return,
			Err(e) => {
				tracing::warn!(error = %e, "registration stream failed, backing off");
			},
		}

		tokio::select! {
			_ = tokio::time::sleep(RECONNECT_BACKOFF) => {},
			_ = shutdown.changed() => {
				if *shutdown.borrow() {
					return;
				}
			},
		}
	}
}

async fn connect_and_heartbeat(crawlet_addr: &str, identity: &WorkerIdentity, shutdown: &mut tokio::sync::watch::Receiver<bool>) -> anyhow::Result<()> {
	let channel = Channel::from_shared(crawlet_addr.to_string())?.connect().await?;
	let mut client = CrawlerRegisterClient::new(channel);

	let (tx, rx) = mpsc::channel::<ConnectMessage>(8);
	let ping = ConnectMessage {
		kind: Some(Kind::Ping(Ping {
			timestamp: now_unix_secs(),
			id: identity.id.clone(),
			store_id: identity.store_id.clone(),
			version: identity.version,
			allowed_domains: identity.allowed_domains.clone(),
			serve_port: identity.serve_port as i32,
		})),
	};
	if tx.send(ping).await.is_err() {
		return Ok(());
	}

	let outbound = ReceiverStream::new(rx);
	let response = client.connect(outbound).await?;
	let mut inbound = response.into_inner();
	tracing::info!("registered with coordinator");

	let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
	ticker.tick().await; // first tick fires immediately; the Ping above already covers it

	loop {
		tokio::select! {
			biased;
			_ = shutdown.changed() => {
				if *shutdown.borrow() {
					tracing::info!("shutdown requested, closing registration stream");
					return Ok(());
				}
			},
			_ = ticker.tick() => {
				let heartbeat = ConnectMessage {
					kind: Some(Kind::Heartbeat(Heartbeat { timestamp: now_unix_secs() })),
				};
				if tx.send(heartbeat).await.is_err() {
					return Ok(());
				}
			},
			ack = tokio_stream::StreamExt::next(&mut inbound) => {
				match ack {
					Some(Ok(_)) => {},
					Some(Err(status)) => anyhow::bail!("connect stream error: {status}"),
					None => anyhow::bail!("coordinator closed connect stream"),
				}
			},
		}
	}
}
