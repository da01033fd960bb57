//! RawRequest ↔ domain Request conversion and yield → envelope dispatch
//! (component E, spec §4.5.2–§4.5.3).

use std::time::{SystemTime, UNIX_EPOCH};

use voila_protos::envelope::Kind;
use voila_protos::{Code as WireCode, Cookie as WireCookie, Envelope, Error as WireError, Item as WireItem, RawRequest};
use voila_worker_core::context::{INDEX, JOB_ID, REQ_ID, STORE_ID, TARGET_TYPES, TRACING_ID, reinject_reserved};
use voila_worker_core::header::build_cookie_header;
use voila_worker_core::prelude::*;

use crate::parser::{Yield, YieldPayload};
use crate::request::Request;

/// Keys never copied into a child's `sharing_data` overlay (spec §4.5.3
/// step 3: "every key from the child context EXCEPT the five reserved
/// ids" — tracing/job/req/store plus `target_types`).
const SHARING_DATA_EXCLUDED: [&str; 5] = [TRACING_ID, JOB_ID, REQ_ID, STORE_ID, TARGET_TYPES];

fn now_millis() -> i64 {
	SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
}

fn to_wire_code(code: Code) -> i32 {
	(match code {
		Code::Ok => WireCode::Ok,
		Code::Cancelled => WireCode::Cancelled,
		Code::Unknown => WireCode::Unknown,
		Code::InvalidArgument => WireCode::InvalidArgument,
		Code::DeadlineExceeded => WireCode::DeadlineExceeded,
		Code::NotFound => WireCode::NotFound,
		Code::AlreadyExists => WireCode::AlreadyExists,
		Code::PermissionDenied => WireCode::PermissionDenied,
		Code::Unauthenticated => WireCode::Unauthenticated,
		Code::ResourceExhausted => WireCode::ResourceExhausted,
		Code::FailedPrecondition => WireCode::FailedPrecondition,
		Code::Aborted => WireCode::Aborted,
		Code::OutOfRange => WireCode::OutOfRange,
		Code::Unimplemented => WireCode::Unimplemented,
		Code::Internal => WireCode::Internal,
		Code::Unavailable => WireCode::Unavailable,
		Code::DataLoss => WireCode::DataLoss,
	}) as i32
}

/// Builds the domain [`Request`] (and its seed [`Context`]) for an inbound
/// `RawRequest` (spec §4.5.2).
pub fn request_from_raw(raw: &RawRequest) -> Request {
	let mut ctx = Context::root();
	for (k, v) in &raw.sharing_data {
		ctx = ctx.derive(k.clone(), v.clone());
	}
	ctx = ctx
		.derive(TRACING_ID, raw.tracing_id.clone())
		.derive(JOB_ID, raw.job_id.clone())
		.derive(REQ_ID, raw.req_id.clone())
		.derive(STORE_ID, raw.store_id.clone());
	if let Some(opts) = &raw.options {
		if !opts.target_types.is_empty() {
			ctx = ctx.derive(TARGET_TYPES, opts.target_types.join(","));
		}
	}

	let mut headers = Header::new();
	for (k, v) in &raw.custom_headers {
		if k.eq_ignore_ascii_case("cookie") {
			continue;
		}
		headers.set(k, v.clone());
	}
	let cookie = build_cookie_header(raw.custom_cookies.iter().map(|c| (c.name.as_str(), c.value.as_str())));
	if !cookie.is_empty() {
		headers.set("cookie", cookie);
	}

	let mut req = Request::new(ctx, &raw.method, &raw.url);
	req.headers = headers;
	req.body = bytes::Bytes::from(raw.body.clone());
	req
}

/// Converts one parser yield into an outbound [`Envelope`] (spec §4.5.3
/// step 3). An item's `index` field comes from `nctx`'s `INDEX` key if the
/// parser set one, 0 otherwise — never a running per-call counter.
pub fn dispatch_yield(job_ctx: &Context, raw: &RawRequest, response_rawurl: &Url, yld: Yield) -> Envelope {
	let (override_ctx, payload) = yld.decompose();

	let base_ctx = match &payload {
		YieldPayload::Request(child) => child.context.clone(),
		_ => job_ctx.clone(),
	};
	let nctx = override_ctx.unwrap_or(base_ctx);
	let nctx = reinject_reserved(&nctx, job_ctx);

	let kind = match payload {
		YieldPayload::Request(child) => Kind::SubRequest(sub_request(raw, &nctx, response_rawurl, child)),
		YieldPayload::Error(err) => Kind::Error(wire_error(&nctx, &err)),
		YieldPayload::Item(item) => Kind::Item(wire_item(&nctx, item.as_ref())),
	};

	Envelope { kind: Some(kind) }
}

fn sub_request(raw: &RawRequest, nctx: &Context, response_rawurl: &Url, mut child: Request) -> RawRequest {
	if child.url.host.is_empty() {
		child.url.host = response_rawurl.host.clone();
	}
	if child.url.scheme.is_empty() {
		child.url.scheme = if response_rawurl.scheme.is_empty() {
			"https".to_string()
		} else {
			response_rawurl.scheme.clone()
		};
	}
	if !child.headers.contains_key("referer") {
		child.headers.set("referer", response_rawurl.to_string());
	}

	let mut custom_headers = std::collections::HashMap::new();
	let mut cookie_header = String::new();
	for (k, vs) in child.headers.iter() {
		if k == "cookie" {
			cookie_header = vs.first().cloned().unwrap_or_default();
			continue;
		}
		custom_headers.insert(k.clone(), vs.first().cloned().unwrap_or_default());
	}
	let custom_cookies = cookie_header
		.split("; ")
		.filter(|s| !s.is_empty())
		.filter_map(|pair| pair.split_once('='))
		.map(|(name, value)| WireCookie {
			name: name.to_string(),
			value: value.to_string(),
			domain: String::new(),
			path: String::new(),
		})
		.collect();

	let mut sharing_data = raw.sharing_data.clone();
	for (k, v) in nctx.values() {
		if SHARING_DATA_EXCLUDED.contains(&k.as_str()) {
			continue;
		}
		sharing_data.insert(k, v);
	}

	RawRequest {
		tracing_id: nctx.get_string(TRACING_ID),
		job_id: nctx.get_string(JOB_ID),
		req_id: nctx.get_string(REQ_ID),
		store_id: nctx.get_string(STORE_ID),
		url: child.url.to_string(),
		method: child.method.clone(),
		body: child.body.to_vec(),
		custom_headers,
		custom_cookies,
		options: raw.options.clone(),
		sharing_data,
		parent: Some(Box::new(raw.clone())),
	}
}

fn wire_error(nctx: &Context, err: &CrawlError) -> WireError {
	WireError {
		tracing_id: nctx.get_string(TRACING_ID),
		job_id: nctx.get_string(JOB_ID),
		req_id: nctx.get_string(REQ_ID),
		store_id: nctx.get_string(STORE_ID),
		code: to_wire_code(err.code),
		message: err.message.clone(),
		timestamp: now_millis(),
	}
}

fn wire_item(nctx: &Context, item: &dyn crate::parser::ItemPayload) -> WireItem {
	WireItem {
		tracing_id: nctx.get_string(TRACING_ID),
		job_id: nctx.get_string(JOB_ID),
		req_id: nctx.get_string(REQ_ID),
		store_id: nctx.get_string(STORE_ID),
		index: nctx.get_int(INDEX),
		timestamp: now_millis(),
		type_url: item.type_url().to_string(),
		payload: serde_json::to_vec(&item.to_json()).unwrap_or_default(),
	}
}

/// Builds the final Internal/Aborted error envelope emitted when the
/// parser's own stream ends in an error (spec §4.5.3 step 4).
pub fn final_error_envelope(job_ctx: &Context, err: &CrawlError) -> Envelope {
	Envelope {
		kind: Some(Kind::Error(wire_error(job_ctx, err))),
	}
}
