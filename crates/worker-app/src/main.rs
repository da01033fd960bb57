//! CLI and process bootstrap (component G, spec §6.3).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use tonic::transport::Server;
use voila_protos::crawler_node_server::CrawlerNodeServer;
use voila_worker::parser::Parser as _;
use voila_worker::parsers::AsosParser;
use voila_worker::proxy_client::ProxyClient;
use voila_worker::registration::{self, WorkerIdentity};
use voila_worker::service::WorkerService;
use voila_worker_core::header::build_cookie_header;
use voila_worker_core::prelude::*;

#[derive(Parser)]
#[command(name = "voila-worker")]
struct Cli {
	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand)]
enum Command {
	/// Runs the worker server and the registration/heartbeat loop.
	Serve {
		#[arg(long, default_value = "0.0.0.0")]
		host: String,
		#[arg(long)]
		port: u16,
		#[arg(long)]
		crawlet_addr: String,
		/// Falls back to `VOILA_PROXY_URL` when absent (CLI wins over env).
		#[arg(long)]
		proxy_addr: Option<String>,
		#[arg(long, default_value_t = 6)]
		max_concurrency: usize,
		#[arg(long)]
		session_addr: Option<String>,
		#[arg(long)]
		debug: bool,
	},
	/// Runs one parse locally against the shipped parser, without a coordinator.
	Test {
		#[arg(long)]
		proxy_addr: Option<String>,
		#[arg(long)]
		target: Option<String>,
		#[arg(long = "type")]
		item_types: Vec<String>,
		#[arg(long, default_value = "Low")]
		level: String,
		#[arg(long)]
		disable_proxy: bool,
		#[arg(long)]
		enable_headless: bool,
		#[arg(long)]
		enable_session_init: bool,
		#[arg(long)]
		pretty: bool,
		#[arg(long)]
		debug: bool,
	},
}

/// CLI wins, environment is a fallback — the original unconditionally
/// overrode a provided `--proxy-addr` with `VOILA_PROXY_URL`, which spec
/// §9 flags as backwards from its evident intent.
fn resolve_proxy_addr(cli_value: Option<String>) -> anyhow::Result<String> {
	cli_value
		.or_else(|| std::env::var("VOILA_PROXY_URL").ok())
		.context("proxy address must be set via --proxy-addr or VOILA_PROXY_URL")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let cli = Cli::parse();

	match cli.command {
		Command::Serve {
			host,
			port,
			crawlet_addr,
			proxy_addr,
			max_concurrency,
			session_addr: _,
			debug,
		} => serve(host, port, crawlet_addr, resolve_proxy_addr(proxy_addr)?, max_concurrency, debug).await,
		Command::Test {
			proxy_addr,
			target,
			item_types: _,
			level,
			disable_proxy,
			enable_headless,
			enable_session_init,
			pretty,
			debug,
		} => test_run(resolve_proxy_addr(proxy_addr)?, target, &level, disable_proxy, enable_headless, enable_session_init, pretty, debug).await,
	}
}

async fn serve(host: String, port: u16, crawlet_addr: String, proxy_addr: String, max_concurrency: usize, debug: bool) -> anyhow::Result<()> {
	voila_worker_core::telemetry::init(debug);

	let fetcher = ProxyClient::new(proxy_addr);
	let parser: Arc<dyn voila_worker::parser::Parser> = Arc::new(AsosParser::new(fetcher.clone()));
	let identity = WorkerIdentity {
		id: parser.id().to_string(),
		store_id: parser.id().to_string(),
		version: parser.version(),
		allowed_domains: parser.allowed_domains(),
		serve_port: port,
	};

	let service = WorkerService::new(parser, fetcher, max_concurrency);

	let addr: SocketAddr = format!("{host}:{port}").parse().context("invalid --host/--port")?;

	let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

	let registration_task = tokio::spawn(registration::run(crawlet_addr, identity, shutdown_rx));

	tracing::info!(%addr, "starting worker server");
	let server = Server::builder().add_service(CrawlerNodeServer::new(service)).serve_with_shutdown(addr, async {
		let _ = tokio::signal::ctrl_c().await;
		tracing::info!("shutdown signal received");
	});

	server.await.context("server error")?;
	let _ = shutdown_tx.send(true);
	let _ = registration_task.await;
	Ok(())
}

fn parse_reliability_level(level: &str) -> Option<voila_worker::options::Reliability> {
	use voila_worker::options::Reliability;
	match level.to_ascii_lowercase().as_str() {
		"low" => Some(Reliability::Low),
		"med" | "medium" => Some(Reliability::Medium),
		"high" => Some(Reliability::High),
		_ => None,
	}
}

async fn test_run(
	proxy_addr: String,
	target: Option<String>,
	level: &str,
	disable_proxy: bool,
	enable_headless: bool,
	enable_session_init: bool,
	pretty: bool,
	debug: bool,
) -> anyhow::Result<()> {
	voila_worker_core::telemetry::init(debug);

	let fetcher = ProxyClient::new(proxy_addr);
	let parser = AsosParser::new(fetcher.clone());
	let ctx = Context::root()
		.derive(voila_worker_core::context::TRACING_ID, new_request_id())
		.derive(voila_worker_core::context::JOB_ID, new_request_id())
		.derive(voila_worker_core::context::STORE_ID, parser.id());

	let mut request = match target {
		Some(url) => voila_worker::request::Request::new(ctx.clone(), "GET", &url),
		None => parser
			.new_test_request(ctx.clone())
			.into_iter()
			.next()
			.context("parser produced no test request")?,
	};

	let crawl_options = parser.crawl_options(&request.url);
	for (k, v) in &crawl_options.headers {
		request.headers.set(k, v.clone());
	}
	// Set the cookie header only when a non-empty cookie string was actually
	// built (spec §9: the original inverted this check).
	let cookie = build_cookie_header(
		crawl_options
			.cookies
			.iter()
			.filter(|c| c.path.is_empty() || request.url.path.starts_with(&c.path))
			.map(|c| (c.name.as_str(), c.value.as_str())),
	);
	if !cookie.is_empty() {
		request.headers.set("cookie", cookie);
	}

	let request_options = voila_worker::options::RequestOptions {
		enable_proxy: !disable_proxy,
		enable_headless: enable_headless || crawl_options.enable_headless,
		js_wait_duration: Duration::ZERO,
		enable_session_init: enable_session_init || crawl_options.enable_session_init,
		keep_session: crawl_options.keep_session,
		disable_cookie_jar: crawl_options.disable_cookie_jar,
		disable_redirect: crawl_options.disable_redirect,
		reliability: parse_reliability_level(level).unwrap_or(crawl_options.reliability),
		request_filter_keys: Vec::new(),
	};

	let response = fetcher.fetch(&ctx, &request, &request_options).await.context("fetch failed")?;

	if !parser.check_test_response(&ctx, &response) {
		anyhow::bail!("check_test_response rejected the fetched response");
	}

	let response = Arc::new(response);
	let mut stream = parser.parse(ctx, response);
	while let Some(result) = tokio_stream::StreamExt::next(&mut stream).await {
		match result {
			Ok(voila_worker::parser::Yield::Item(item)) => {
				let json = item.to_json();
				if pretty {
					println!("{}", serde_json::to_string_pretty(&json)?);
				} else {
					println!("{json}");
				}
			},
			Ok(voila_worker::parser::Yield::Request(r)) => println!("-> follow-up request: {}", r.url),
			Ok(voila_worker::parser::Yield::Error(e)) => eprintln!("parser error: {e}"),
			Ok(voila_worker::parser::Yield::ContextOverride(_, inner)) => println!("-> context override: {inner:?}"),
			Err(e) => anyhow::bail!("parse failed: {e}"),
		}
	}

	Ok(())
}
