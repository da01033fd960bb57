//! Proxy fetcher client (component C, spec §4.3 and §6.2).

use std::io::Cursor;
use std::sync::Arc;

use async_compression::tokio::bufread::{BrotliDecoder, GzipDecoder};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, BufReader};
use voila_worker_core::prelude::*;

use crate::options::{Reliability, RequestOptions};
use crate::request::{Request, Response};

const MAX_TTL_PER_REQUEST_SECS: i64 = 300;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
	#[error("proxy fetcher transport error: {0}")]
	Transport(#[from] reqwest::Error),
	#[error("proxy fetcher returned status {0}")]
	NonSuccess(u16),
	#[error("failed to decode proxy fetcher response: {0}")]
	Decode(String),
}

impl From<FetchError> for CrawlError {
	fn from(e: FetchError) -> Self {
		CrawlError::internal(e.to_string())
	}
}

#[derive(Serialize)]
struct WireHeaderValues {
	values: Vec<String>,
}

#[derive(Deserialize)]
struct WireHeaderValuesIn {
	#[serde(default)]
	values: Vec<String>,
}

#[derive(Serialize)]
struct WireProxyOptions {
	enable_proxy: bool,
	reliability: &'static str,
	enable_headless: bool,
	js_wait_duration: u64,
	enable_session_init: bool,
	keep_session: bool,
	disable_cookie_jar: bool,
	max_ttl_per_request: i64,
	disable_redirect: bool,
	request_filter_keys: Vec<String>,
}

#[derive(Serialize)]
struct WireProxyRequest {
	tracing_id: String,
	job_id: String,
	req_id: String,
	method: String,
	url: String,
	headers: IndexMap<String, WireHeaderValues>,
	body: String,
	options: WireProxyOptions,
}

#[derive(Deserialize)]
struct WireProxyResponse {
	status_code: u16,
	#[serde(default)]
	headers: IndexMap<String, WireHeaderValuesIn>,
	#[serde(default)]
	body: String,
	request: WireProxyRequestIn,
}

#[derive(Deserialize)]
struct WireProxyRequestIn {
	method: String,
	url: String,
	#[serde(default)]
	response: Option<Box<WireProxyResponse>>,
}

fn reliability_name(r: Reliability) -> &'static str {
	match r {
		Reliability::Default => "Default",
		Reliability::Low => "Low",
		Reliability::Medium => "Medium",
		Reliability::High => "High",
		Reliability::Realtime => "Realtime",
		Reliability::Intelligent => "Intelligent",
	}
}

/// A synchronous (from the caller's perspective) client for the proxy
/// fetcher service (spec §4.3). Holds only an immutable endpoint string,
/// so it is safe to share across parse tasks.
#[derive(Clone)]
pub struct ProxyClient {
	endpoint: String,
	http: reqwest::Client,
}

impl ProxyClient {
	pub fn new(endpoint: impl Into<String>) -> ProxyClient {
		ProxyClient {
			endpoint: endpoint.into(),
			http: reqwest::Client::new(),
		}
	}

	pub async fn fetch(
		&self,
		ctx: &Context,
		req: &Request,
		options: &RequestOptions,
	) -> Result<Response, FetchError> {
		tracing::info!(url = %req.url, "access");

		let req_id = {
			let v = ctx.get_string(voila_worker_core::context::REQ_ID);
			if v.is_empty() { new_request_id() } else { v }
		};

		let mut headers = IndexMap::new();
		for (k, vs) in req.headers.iter() {
			headers.insert(
				k.clone(),
				WireHeaderValues {
					values: vs.clone(),
				},
			);
		}

		let wire = WireProxyRequest {
			tracing_id: ctx.get_string(voila_worker_core::context::TRACING_ID),
			job_id: ctx.get_string(voila_worker_core::context::JOB_ID),
			req_id,
			method: req.method.clone(),
			url: req.url.to_string(),
			headers,
			body: BASE64.encode(&req.body),
			options: WireProxyOptions {
				enable_proxy: options.enable_proxy,
				reliability: reliability_name(options.reliability),
				enable_headless: options.enable_headless,
				js_wait_duration: options.js_wait_duration.as_secs(),
				enable_session_init: options.enable_session_init,
				keep_session: options.keep_session,
				disable_cookie_jar: options.disable_cookie_jar,
				max_ttl_per_request: MAX_TTL_PER_REQUEST_SECS,
				disable_redirect: options.disable_redirect,
				request_filter_keys: options.request_filter_keys.clone(),
			},
		};

		let http_resp = self.http.post(&self.endpoint).json(&wire).send().await?;
		if !http_resp.status().is_success() {
			return Err(FetchError::NonSuccess(http_resp.status().as_u16()));
		}
		let body = http_resp.text().await?;
		let wire_resp: WireProxyResponse =
			serde_json::from_str(&body).map_err(|e| FetchError::Decode(e.to_string()))?;

		build_response_inner(ctx, wire_resp, false).await
	}
}

/// Recursively rebuilds the `Response` chain. `is_sub` marks a redirect
/// predecessor: its body is linked but never decompressed (spec §4.3 step
/// 5, "sub-responses are NOT re-decompressed").
fn build_response_inner<'a>(
	ctx: &'a Context,
	wire: WireProxyResponse,
	is_sub: bool,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Response, FetchError>> + Send + 'a>> {
	Box::pin(async move {
		let mut header = Header::new();
		for (key, vs) in &wire.headers {
			for v in &vs.values {
				header.add(key, v.clone());
			}
		}

		let raw_body = BASE64
			.decode(wire.body.as_bytes())
			.map_err(|e| FetchError::Decode(e.to_string()))?;

		let body = if !is_sub && !raw_body.is_empty() {
			decompress(&mut header, raw_body).await?
		} else {
			raw_body
		};

		let parent_response = match wire.request.response {
			Some(sub) => Some(Arc::new(build_response_inner(ctx, *sub, true).await?)),
			None => None,
		};

		let mut req = Request::new(ctx.clone(), &wire.request.method, &wire.request.url);
		req.parent_response = parent_response;

		Ok(Response::new(
			wire.status_code,
			header,
			bytes::Bytes::from(body),
			Arc::new(req),
		))
	})
}

async fn decompress(header: &mut Header, raw: Vec<u8>) -> Result<Vec<u8>, FetchError> {
	let encoding = header.get("content-encoding").to_ascii_lowercase();
	if encoding.contains("gzip") {
		let mut out = Vec::new();
		let mut dec = GzipDecoder::new(BufReader::new(Cursor::new(raw)));
		dec
			.read_to_end(&mut out)
			.await
			.map_err(|e| FetchError::Decode(e.to_string()))?;
		header.delete("content-encoding");
		Ok(out)
	} else if encoding.contains("br") {
		let mut out = Vec::new();
		let mut dec = BrotliDecoder::new(BufReader::new(Cursor::new(raw)));
		dec
			.read_to_end(&mut out)
			.await
			.map_err(|e| FetchError::Decode(e.to_string()))?;
		header.delete("content-encoding");
		Ok(out)
	} else {
		Ok(raw)
	}
}
