//! End-to-end coverage of the `CrawlerNode` gRPC surface (spec §8), standing
//! a real worker server up on a loopback listener the way the teacher's
//! `mock_ca_server.rs` stands up its test CA — no in-memory duplex
//! transport, just a real socket bound to an ephemeral port.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::{Channel, Server};
use voila_protos::crawler_node_client::CrawlerNodeClient;
use voila_protos::crawler_node_server::CrawlerNodeServer;
use voila_protos::{CanonicalUrlRequest, CrawlOptionsRequest, Empty, RawRequest, envelope};
use voila_worker::parsers::AsosParser;
use voila_worker::proxy_client::ProxyClient;
use voila_worker::service::WorkerService;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct TestWorker {
	client: CrawlerNodeClient<Channel>,
	task: tokio::task::JoinHandle<()>,
}

async fn start_worker(proxy_uri: String) -> TestWorker {
	let fetcher = ProxyClient::new(proxy_uri);
	let parser: Arc<dyn voila_worker::parser::Parser> = Arc::new(AsosParser::new(fetcher.clone()));
	let service = WorkerService::new(parser, fetcher, 4);

	let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
	let addr = listener.local_addr().unwrap();

	let task = tokio::spawn(async move {
		Server::builder()
			.add_service(CrawlerNodeServer::new(service))
			.serve_with_incoming(TcpListenerStream::new(listener))
			.await
			.expect("worker server failed");
	});

	let channel = Channel::from_shared(format!("http://{addr}")).unwrap().connect().await.unwrap();

	TestWorker {
		client: CrawlerNodeClient::new(channel),
		task,
	}
}

fn product_page_html() -> Vec<u8> {
	format!(
		r#"<html><body>
		<script>window.asos.pdp.config.product = {{"id":203423,"name":"Bodycon Midi Dress","brandName":"PrettyLittleThing","images":[{{"url":"https://img.asos.com/a.jpg"}}]}};</script>
		<script>window.asos.pdp.config.stockPriceApiUrl = '/api/product/catalogue/v3/stockprice?productIds=203423';</script>
		<script>window.asos.pdp.config.appVersion = '1.2.3';</script>
		<script>window.asos.pdp.config.ratings = {{"averageOverallRating": 4.5, "totalReviewCount": 12}};</script>
		<script id="split-structured-data" type="application/ld+json">{{"description": "A nice dress"}}</script>
		</body></html>"#
	)
	.into_bytes()
}

fn base_raw_request(url: &str) -> RawRequest {
	RawRequest {
		tracing_id: "T1".to_string(),
		job_id: "J1".to_string(),
		req_id: "R1".to_string(),
		store_id: "701fdaa85a5a18866ccbb357ad2ccff9".to_string(),
		url: url.to_string(),
		method: "GET".to_string(),
		body: Vec::new(),
		custom_headers: Default::default(),
		custom_cookies: Vec::new(),
		options: None,
		sharing_data: Default::default(),
		parent: None,
	}
}

async fn mock_proxy_returning(body: serde_json::Value, status: u16) -> MockServer {
	let server = MockServer::start().await;
	Mock::given(method("POST"))
		.and(path("/"))
		.respond_with(ResponseTemplate::new(status).set_body_json(body))
		.mount(&server)
		.await;
	server
}

#[tokio::test]
async fn version_and_allowed_domains_and_canonical_url() {
	let proxy = mock_proxy_returning(serde_json::json!({}), 200).await;
	let mut worker = start_worker(proxy.uri()).await;

	let version = worker.client.version(Empty {}).await.unwrap().into_inner();
	assert_eq!(version.version, 1);

	let domains = worker.client.allowed_domains(Empty {}).await.unwrap().into_inner();
	assert_eq!(domains.data, vec!["*.asos.com".to_string()]);

	let canon = worker
		.client
		.canonical_url(CanonicalUrlRequest {
			url: "https://www.asos.com/a/b/prd/203423?ref=1".to_string(),
		})
		.await
		.unwrap()
		.into_inner();
	assert_eq!(canon.data.unwrap().url, "https://www.asos.com/a/b/prd/203423");

	let options = worker
		.client
		.crawler_options(CrawlOptionsRequest {
			url: "https://www.asos.com/a/b/prd/203423".to_string(),
		})
		.await
		.unwrap()
		.into_inner();
	let data = options.data.unwrap();
	assert!(data.enable_headless);
	assert_eq!(data.cookies.len(), 7);

	worker.task.abort();
}

/// Scenario 4 (spec §8): a single `Parse` of a gzipped product page must
/// fetch the stock/price API internally and yield exactly one `Item`
/// envelope, zero errors. The page fetch and the stock-price fetch both
/// land on the same proxy endpoint, distinguished here by request body.
#[tokio::test]
async fn parse_product_page_yields_one_item_envelope() {
	let page_response = serde_json::json!({
		"statusCode": 200,
		"headers": {"content-type": {"values": ["text/html"]}},
		"body": BASE64.encode(product_page_html()),
		"request": {"method": "GET", "url": "https://www.asos.com/a/b/prd/203423"},
	});
	let stock_body = serde_json::json!([{"productPrice": {"current": {"value": 45.0}}}]).to_string();
	let stock_response = serde_json::json!({
		"statusCode": 200,
		"headers": {},
		"body": BASE64.encode(stock_body.as_bytes()),
		"request": {"method": "GET", "url": "https://www.asos.com/api/product/catalogue/v3/stockprice"},
	});

	let proxy = MockServer::start().await;
	Mock::given(method("POST"))
		.and(path("/"))
		.and(body_string_contains("prd/203423"))
		.respond_with(ResponseTemplate::new(200).set_body_json(page_response))
		.mount(&proxy)
		.await;
	Mock::given(method("POST"))
		.and(path("/"))
		.and(body_string_contains("stockprice"))
		.respond_with(ResponseTemplate::new(200).set_body_json(stock_response))
		.mount(&proxy)
		.await;

	let mut worker = start_worker(proxy.uri()).await;

	let raw = base_raw_request("https://www.asos.com/a/b/prd/203423");
	let mut stream = worker.client.parse(raw).await.unwrap().into_inner();

	let first = tokio_stream::StreamExt::next(&mut stream).await.unwrap().unwrap();
	let item = match first.kind {
		Some(envelope::Kind::Item(item)) => item,
		other => panic!("expected an item envelope, got {other:?}"),
	};
	assert_eq!(item.type_url, "voila.items.v1.Product");
	assert_eq!(item.index, 0);
	assert_eq!(item.tracing_id, "T1");
	assert_eq!(item.store_id, "701fdaa85a5a18866ccbb357ad2ccff9");
	let payload: serde_json::Value = serde_json::from_slice(&item.payload).unwrap();
	assert_eq!(payload["source"]["id"], "203423");
	assert_eq!(payload["title"], "Bodycon Midi Dress");
	assert_eq!(payload["current_price"], 45.0);

	assert!(tokio_stream::StreamExt::next(&mut stream).await.is_none());
	worker.task.abort();
}

#[tokio::test]
async fn proxy_failure_yields_a_single_internal_error_envelope() {
	let proxy = mock_proxy_returning(serde_json::json!({}), 503).await;
	let mut worker = start_worker(proxy.uri()).await;

	let raw = base_raw_request("https://www.asos.com/a/b/prd/203423");
	let mut stream = worker.client.parse(raw).await.unwrap().into_inner();

	let first = tokio_stream::StreamExt::next(&mut stream).await.unwrap().unwrap();
	match first.kind {
		Some(envelope::Kind::Error(err)) => {
			assert_eq!(err.code, voila_protos::Code::Internal as i32);
			assert_eq!(err.tracing_id, "T1");
		},
		other => panic!("expected an error envelope, got {other:?}"),
	}
	assert!(tokio_stream::StreamExt::next(&mut stream).await.is_none());
	worker.task.abort();
}

#[tokio::test]
async fn unrecognized_path_yields_unimplemented_error() {
	let fetch_response = serde_json::json!({
		"statusCode": 200,
		"headers": {"content-type": {"values": ["text/html"]}},
		"body": BASE64.encode(b"<html></html>"),
		"request": {"method": "GET", "url": "https://www.asos.com/women/cat"},
	});
	let proxy = mock_proxy_returning(fetch_response, 200).await;
	let mut worker = start_worker(proxy.uri()).await;

	let raw = base_raw_request("https://www.asos.com/women/cat");
	let mut stream = worker.client.parse(raw).await.unwrap().into_inner();

	let first = tokio_stream::StreamExt::next(&mut stream).await.unwrap().unwrap();
	match first.kind {
		Some(envelope::Kind::Error(err)) => assert_eq!(err.code, voila_protos::Code::Unimplemented as i32),
		other => panic!("expected an error envelope, got {other:?}"),
	}
	worker.task.abort();
}

#[tokio::test]
async fn concurrent_parse_calls_are_capped_by_max_concurrency() {
	let page_response = serde_json::json!({
		"statusCode": 200,
		"headers": {"content-type": {"values": ["text/html"]}},
		"body": BASE64.encode(product_page_html()),
		"request": {"method": "GET", "url": "https://www.asos.com/a/b/prd/203423"},
	});
	let stock_body = serde_json::json!([{"productPrice": {"current": {"value": 45.0}}}]).to_string();
	let stock_response = serde_json::json!({
		"statusCode": 200,
		"headers": {},
		"body": BASE64.encode(stock_body.as_bytes()),
		"request": {"method": "GET", "url": "https://www.asos.com/api/product/catalogue/v3/stockprice"},
	});

	let proxy = MockServer::start().await;
	Mock::given(method("POST"))
		.and(path("/"))
		.and(body_string_contains("prd/203423"))
		.respond_with(ResponseTemplate::new(200).set_body_json(page_response).set_delay(Duration::from_millis(50)))
		.mount(&proxy)
		.await;
	Mock::given(method("POST"))
		.and(path("/"))
		.and(body_string_contains("stockprice"))
		.respond_with(ResponseTemplate::new(200).set_body_json(stock_response))
		.mount(&proxy)
		.await;
	let worker = start_worker(proxy.uri()).await;

	let mut handles = Vec::new();
	for _ in 0..3 {
		let mut client = worker.client.clone();
		let raw = base_raw_request("https://www.asos.com/a/b/prd/203423");
		handles.push(tokio::spawn(async move {
			let mut stream = client.parse(raw).await.unwrap().into_inner();
			tokio_stream::StreamExt::next(&mut stream).await.unwrap().unwrap()
		}));
	}
	for h in handles {
		let env = h.await.unwrap();
		assert!(matches!(env.kind, Some(envelope::Kind::Item(_))));
	}
	worker.task.abort();
}
