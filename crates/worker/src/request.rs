//! Domain `Request`/`Response` bundles (component B, spec §3).

use std::sync::Arc;

use bytes::Bytes;
use once_cell::sync::OnceCell;
use scraper::Html;
use voila_worker_core::prelude::*;

#[derive(Debug, Clone)]
pub struct Request {
	pub context: Context,
	pub method: String,
	pub url: Url,
	pub body: Bytes,
	pub headers: Header,
	/// The response that produced this request, when this request is a
	/// redirect hop or a sub-request chained off a prior fetch.
	pub parent_response: Option<Arc<Response>>,
}

impl Request {
	pub fn new(context: Context, method: &str, raw_url: &str) -> Request {
		let method = if method.is_empty() {
			"GET".to_string()
		} else {
			method.to_ascii_uppercase()
		};
		Request {
			context,
			method,
			url: Url::parse(raw_url),
			body: Bytes::new(),
			headers: Header::new(),
			parent_response: None,
		}
	}

	/// The URL of the earliest ancestor request, walking through
	/// parent-response chains. Used as the referer base.
	pub fn rawurl(&self) -> Url {
		match &self.parent_response {
			Some(parent) => parent.request.rawurl(),
			None => self.url.clone(),
		}
	}
}

pub struct Response {
	pub status: u16,
	pub headers: Header,
	pub body: Bytes,
	pub request: Arc<Request>,
	selector: OnceCell<Option<Html>>,
}

impl Response {
	pub fn new(status: u16, headers: Header, body: Bytes, request: Arc<Request>) -> Response {
		Response {
			status,
			headers,
			body,
			request,
			selector: OnceCell::new(),
		}
	}

	pub fn url(&self) -> Url {
		self.request.url.clone()
	}

	pub fn rawurl(&self) -> Url {
		self.request.rawurl()
	}

	/// A memoized HTML/XML selector built from the body, only when the
	/// `Content-Type` header names HTML, XHTML, or XML. `None` otherwise,
	/// and recomputed at most once per response (spec §3 "Response (B)").
	pub fn selector(&self) -> Option<&Html> {
		self
			.selector
			.get_or_init(|| {
				let content_type = self.headers.get("content-type").to_ascii_lowercase();
				let is_markup = content_type.contains("html") || content_type.contains("xml");
				if !is_markup {
					return None;
				}
				Some(Html::parse_document(&String::from_utf8_lossy(&self.body)))
			})
			.as_ref()
	}
}

impl std::fmt::Debug for Response {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f
			.debug_struct("Response")
			.field("status", &self.status)
			.field("body_len", &self.body.len())
			.finish()
	}
}
