//! The asos.com product-detail parser (component H, spec §4.4's concrete
//! example), grounded on `com.asos.ASOS` in the original crawler. Category,
//! category-JSON, and product-group parsing are out of scope here; those
//! paths fall through to an `Unimplemented` error, same as any unrecognized
//! path.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use voila_worker_core::header::build_cookie_header;
use voila_worker_core::prelude::*;

use crate::items::{Product, ProductSource};
use crate::options::{CrawlOptions, Reliability, RequestOptions};
use crate::parser::{Parser, ParseStream, Yield};
use crate::proxy_client::ProxyClient;
use crate::request::{Request, Response};

static PRODUCT_PATH: Lazy<Regex> =
	Lazy::new(|| Regex::new(r"^(/[a-z0-9_-]+)?(/[a-z0-9_-]+){2}/prd/[0-9]+/?$").unwrap());
static PRODUCT_GROUP: Lazy<Regex> =
	Lazy::new(|| Regex::new(r"^(/[a-z0-9_-]+)?(/[a-z0-9_-]+){2}/grp/[0-9]+/?$").unwrap());
static PRODUCT_DETAIL_DATA: Lazy<Regex> =
	Lazy::new(|| Regex::new(r"(?is)window\.asos\.pdp\.config\.product\s*=\s*(\{[^;]+\});").unwrap());
static STOCK_PRICE_URL: Lazy<Regex> = Lazy::new(|| {
	Regex::new(r"(?is)window\.asos\.pdp\.config\.stockPriceApiUrl\s*=\s*'(/api/product/catalogue/[^;]+)'\s*;").unwrap()
});
static APP_VERSION: Lazy<Regex> =
	Lazy::new(|| Regex::new(r"(?is)window\.asos\.pdp\.config\.appVersion\s*=\s*'([a-z0-9.-]+)';").unwrap());
static RATING: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)window\.asos\.pdp\.config\.ratings\s*=\s*(\{.*?\});").unwrap());
static DESCRIPTION: Lazy<Regex> = Lazy::new(|| {
	Regex::new(r#"(?is)<script\s+id="split-structured-data"\s+type="application/ld\+json">(.*?)</script>"#).unwrap()
});

/// The product/rating/description JSON pulled out of a product-detail page,
/// carried across the internal stock-price fetch (no coordinator
/// round-trip involved, unlike the Python original's `yield`-based
/// staging — this parser performs that second fetch itself, the way
/// `ASOS.parseProduct` calls `self._httpClient.do(...)` inline).
struct ProductPageData {
	product: serde_json::Value,
	rating: serde_json::Value,
	desc: serde_json::Value,
	crawl_url: String,
}

pub struct AsosParser {
	options: CrawlOptions,
	fetcher: ProxyClient,
}

impl AsosParser {
	pub fn new(fetcher: ProxyClient) -> AsosParser {
		let mut options = CrawlOptions {
			enable_headless: true,
			enable_session_init: true,
			reliability: Reliability::Medium,
			..Default::default()
		};
		options.add_cookie("geocountry", "US", "/");
		options.add_cookie("browseCountry", "US", "/");
		options.add_cookie("browseCurrency", "USD", "/");
		options.add_cookie("browseLanguage", "en-US", "/");
		options.add_cookie("browseSizeSchema", "US", "/");
		options.add_cookie("storeCode", "US", "/");
		options.add_cookie("currency", "2", "/");
		AsosParser { options, fetcher }
	}

	fn extract_json(re: &Regex, body: &str, what: &str) -> Result<serde_json::Value, CrawlError> {
		let captured = re
			.captures(body)
			.and_then(|c| c.get(1))
			.ok_or_else(|| CrawlError::internal(format!("extract {what} failed")))?;
		serde_json::from_str(captured.as_str()).map_err(|e| CrawlError::internal(format!("decode {what} failed: {e}")))
	}

	fn extract_json_opt(re: &Regex, body: &str) -> serde_json::Value {
		re.captures(body)
			.and_then(|c| c.get(1))
			.and_then(|m| serde_json::from_str(m.as_str()).ok())
			.unwrap_or(serde_json::json!({}))
	}

	/// Parses the product-detail page and builds the stock/price request
	/// that must be fetched to complete the item (spec §4.4; original
	/// `parseProduct`'s first half).
	fn extract_product_page(&self, ctx: Context, resp: &Response) -> Result<(ProductPageData, Request), CrawlError> {
		let body = String::from_utf8_lossy(&resp.body).to_string();

		let product = Self::extract_json(&PRODUCT_DETAIL_DATA, &body, "product detail")?;
		let rating = Self::extract_json_opt(&RATING, &body);
		let desc = Self::extract_json_opt(&DESCRIPTION, &body);

		let stock_path = STOCK_PRICE_URL
			.captures(&body)
			.and_then(|c| c.get(1))
			.map(|m| m.as_str().to_string())
			.ok_or_else(|| CrawlError::internal(format!("extract product stock url from {} failed", resp.rawurl())))?;
		let app_version = APP_VERSION
			.captures(&body)
			.and_then(|c| c.get(1))
			.map(|m| m.as_str().to_string())
			.ok_or_else(|| CrawlError::internal(format!("extract product api version from {} failed", resp.rawurl())))?;

		let resp_url = resp.url();
		let mut stock_url = Url::parse(&format!("{}://{}{}", resp_url.scheme, resp_url.host, stock_path));
		let mut q = stock_url.query();
		q.set("store", "US");
		q.set("currency", "USD");
		stock_url.raw_query = q.encode();

		let mut req = Request::new(ctx, "GET", &stock_url.to_string());
		req.headers.set("accept-encoding", "gzip, deflate, br");
		req.headers.set("accept", "*/*");
		req.headers.set("referer", resp.url().to_string());
		req.headers.set("user-agent", resp.request.headers.get("user-agent"));
		req.headers.set("asos-c-name", "asos-web-productpage");
		req.headers.set("asos-c-version", app_version);

		let copts = self.crawl_options(&stock_url);
		let cookie = build_cookie_header(
			copts
				.cookies
				.iter()
				.filter(|c| c.path.is_empty() || req.url.path.starts_with(&c.path))
				.map(|c| (c.name.as_str(), c.value.as_str())),
		);
		if !cookie.is_empty() {
			req.headers.set("cookie", cookie);
		}

		let data = ProductPageData {
			product,
			rating,
			desc,
			crawl_url: resp.rawurl().to_string(),
		};
		Ok((data, req))
	}

	/// Builds the final `Product` item from the staged page data and the
	/// stock/price API's response body (original `parseProduct`'s second
	/// half, `self._parseStockPrice`).
	fn build_item(data: &ProductPageData, stock_body: &[u8]) -> Result<Yield, CrawlError> {
		let stocks: serde_json::Value =
			serde_json::from_slice(stock_body).map_err(|e| CrawlError::internal(format!("decode stock response failed: {e}")))?;
		let sp = stocks
			.as_array()
			.and_then(|a| a.first())
			.ok_or_else(|| CrawlError::internal("got no valid stock price".to_string()))?;

		let product = &data.product;
		let rating = &data.rating;
		let desc = &data.desc;

		let item = Product {
			source: ProductSource {
				id: product["id"].as_str().map(str::to_string).unwrap_or_else(|| product["id"].to_string()),
				crawl_url: data.crawl_url.clone(),
			},
			title: product["name"].as_str().unwrap_or_default().to_string(),
			brand_name: product["brandName"].as_str().unwrap_or_default().to_string(),
			current_price: sp["productPrice"]["current"]["value"].as_f64().unwrap_or(0.0),
			currency: "USD".to_string(),
			description: desc.get("description").and_then(|d| d.as_str()).unwrap_or_default().to_string(),
			images: product["images"]
				.as_array()
				.map(|imgs| imgs.iter().filter_map(|i| i["url"].as_str().map(str::to_string)).collect())
				.unwrap_or_default(),
			rating: rating.get("averageOverallRating").and_then(|v| v.as_f64()).unwrap_or(0.0),
			review_count: rating.get("totalReviewCount").and_then(|v| v.as_i64()).unwrap_or(0),
		};

		Ok(Yield::Item(Box::new(item)))
	}
}

impl Parser for AsosParser {
	fn id(&self) -> &str {
		"701fdaa85a5a18866ccbb357ad2ccff9"
	}

	fn version(&self) -> i32 {
		1
	}

	fn allowed_domains(&self) -> Vec<String> {
		vec!["*.asos.com".to_string()]
	}

	fn crawl_options(&self, _url: &Url) -> CrawlOptions {
		self.options.clone()
	}

	fn canonical_url(&self, raw_url: &str) -> String {
		let mut u = Url::parse(raw_url);
		if u.scheme.is_empty() {
			u.scheme = "https".to_string();
		}
		if u.host.is_empty() {
			u.host = "www.asos.com".to_string();
		}
		if PRODUCT_PATH.is_match(&u.path) || PRODUCT_GROUP.is_match(&u.path) {
			u.raw_query.clear();
			u.fragment.clear();
			return u.to_string();
		}
		raw_url.to_string()
	}

	/// A single product-detail page is parsed to completion within one
	/// `Parse` call: the stock/price fetch that completes the item is
	/// performed internally, never yielded back to the coordinator as a
	/// follow-up request (spec §8 scenario 4).
	fn parse(&self, ctx: Context, resp: Arc<Response>) -> ParseStream {
		let path = resp.rawurl().path.trim_end_matches('/').to_string();
		if !PRODUCT_PATH.is_match(&path) {
			return Box::pin(tokio_stream::once(Err(CrawlError::unimplemented(format!("unsupported path {path}")))));
		}

		let extracted = self.extract_product_page(ctx.clone(), &resp);
		let fetcher = self.fetcher.clone();
		let request_options = RequestOptions::from_job(false, &self.options);

		Box::pin(async_stream::stream! {
			let result: Result<Yield, CrawlError> = async {
				let (data, stock_req) = extracted?;
				let stock_resp = fetcher.fetch(&ctx, &stock_req, &request_options).await?;
				if stock_resp.status != 200 {
					return Err(CrawlError::internal(format!("access stock api failed with status {}", stock_resp.status)));
				}
				Self::build_item(&data, &stock_resp.body)
			}
			.await;
			yield result;
		})
	}

	fn new_test_request(&self, ctx: Context) -> Vec<Request> {
		vec![Request::new(
			ctx,
			"GET",
			"https://www.asos.com/prettylittlething/prettylittlething-bodycon-midi-dress-in-black/prd/203423",
		)]
	}

	fn check_test_response(&self, _ctx: &Context, resp: &Response) -> bool {
		resp.status == 200
	}
}

#[cfg(test)]
mod tests {
	use base64::Engine;
	use base64::engine::general_purpose::STANDARD as BASE64;
	use bytes::Bytes;
	use wiremock::matchers::{method, path};
	use wiremock::{Mock, MockServer, ResponseTemplate};

	use super::*;

	fn sample_product_page() -> String {
		format!(
			r#"<html><body>
			<script>window.asos.pdp.config.product = {{"id":203423,"name":"Bodycon Midi Dress","brandName":"PrettyLittleThing","gender":"female","isInStock":true,"images":[{{"url":"https://img.asos.com/a.jpg","isPrimary":true}}],"variants":[]}};</script>
			<script>window.asos.pdp.config.stockPriceApiUrl = '/api/product/catalogue/v3/stockprice?productIds=203423';</script>
			<script>window.asos.pdp.config.appVersion = '1.2.3';</script>
			<script>window.asos.pdp.config.ratings = {{"averageOverallRating": 4.5, "totalReviewCount": 12}};</script>
			<script id="split-structured-data" type="application/ld+json">{{"description": "A nice dress"}}</script>
			</body></html>"#
		)
	}

	fn ctx() -> Context {
		Context::root()
	}

	fn req(ctx: Context, url: &str) -> Arc<Request> {
		Arc::new(Request::new(ctx, "GET", url))
	}

	fn unused_fetcher() -> ProxyClient {
		ProxyClient::new("http://unused.invalid")
	}

	#[test]
	fn canonical_url_strips_query_on_product_path() {
		let parser = AsosParser::new(unused_fetcher());
		let canon = parser.canonical_url("https://www.asos.com/prettylittlething/x/prd/203423?ref=1#x");
		assert_eq!(canon, "https://www.asos.com/prettylittlething/x/prd/203423");
	}

	#[test]
	fn canonical_url_leaves_unrecognized_path_unchanged() {
		let parser = AsosParser::new(unused_fetcher());
		let raw = "https://www.asos.com/search?q=dress";
		assert_eq!(parser.canonical_url(raw), raw);
	}

	#[tokio::test]
	async fn parse_product_page_fetches_stock_price_internally_and_yields_one_item() {
		let stock_body = serde_json::json!([{"productPrice": {"current": {"value": 45.0}}}]).to_string();
		let fetch_response = serde_json::json!({
			"statusCode": 200,
			"headers": {},
			"body": BASE64.encode(stock_body.as_bytes()),
			"request": {"method": "GET", "url": "https://www.asos.com/api/product/catalogue/v3/stockprice"},
		});
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path("/"))
			.respond_with(ResponseTemplate::new(200).set_body_json(fetch_response))
			.mount(&server)
			.await;

		let parser = AsosParser::new(ProxyClient::new(server.uri()));
		let url = "https://www.asos.com/prettylittlething/prettylittlething-bodycon-midi-dress-in-black/prd/203423";
		let mut headers = Header::new();
		headers.set("content-type", "text/html");
		let resp = Response::new(200, headers, Bytes::from(sample_product_page()), req(ctx(), url));

		let mut stream = parser.parse(ctx(), Arc::new(resp));
		let first = tokio_stream::StreamExt::next(&mut stream).await.unwrap().unwrap();
		match first {
			Yield::Item(item) => {
				let json = item.to_json();
				assert_eq!(json["title"], "Bodycon Midi Dress");
				assert_eq!(json["source"]["id"], "203423");
				assert_eq!(json["current_price"], 45.0);
			},
			other => panic!("expected Item yield, got {other:?}"),
		}
		assert!(tokio_stream::StreamExt::next(&mut stream).await.is_none());
	}

	#[tokio::test]
	async fn stock_fetch_failure_surfaces_as_internal_error() {
		let server = MockServer::start().await;
		Mock::given(method("POST")).and(path("/")).respond_with(ResponseTemplate::new(503)).mount(&server).await;

		let parser = AsosParser::new(ProxyClient::new(server.uri()));
		let url = "https://www.asos.com/prettylittlething/prettylittlething-bodycon-midi-dress-in-black/prd/203423";
		let mut headers = Header::new();
		headers.set("content-type", "text/html");
		let resp = Response::new(200, headers, Bytes::from(sample_product_page()), req(ctx(), url));

		let mut stream = parser.parse(ctx(), Arc::new(resp));
		let first = tokio_stream::StreamExt::next(&mut stream).await.unwrap();
		assert_matches::assert_matches!(first, Err(e) if e.code == Code::Internal);
	}

	#[tokio::test]
	async fn parse_unrecognized_path_is_unimplemented() {
		let parser = AsosParser::new(unused_fetcher());
		let resp = Response::new(200, Header::new(), Bytes::new(), req(ctx(), "https://www.asos.com/women/cat"));
		let mut stream = parser.parse(ctx(), Arc::new(resp));
		let first = tokio_stream::StreamExt::next(&mut stream).await.unwrap();
		assert_matches::assert_matches!(first, Err(e) if e.code == Code::Unimplemented);
	}
}
