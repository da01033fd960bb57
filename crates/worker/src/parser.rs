//! Parser adapter interface (component D, spec §4.4) and the yield-shape
//! normalization from spec §9 "Design Notes".

use std::pin::Pin;
use std::sync::Arc;

use tokio_stream::Stream;
use voila_worker_core::prelude::*;

use crate::options::CrawlOptions;
use crate::request::{Request, Response};

/// An opaque item payload a parser yields. The generated schema types for
/// item payloads are out of scope (spec §1); this is the minimal contract
/// the envelope layer needs to wrap one.
pub trait ItemPayload: Send + Sync + std::fmt::Debug {
	/// Names the payload's schema message, e.g. `"voila.items.v1.Product"`.
	fn type_url(&self) -> &'static str;
	fn to_json(&self) -> serde_json::Value;
}

/// A single yielded payload, already stripped of any context override
/// (see [`Yield::decompose`]).
#[derive(Debug)]
pub enum YieldPayload {
	Request(Request),
	Item(Box<dyn ItemPayload>),
	Error(CrawlError),
}

/// A single element a parser emits while parsing a response. Modeled as a
/// tagged value rather than the source's "context override plus payload"
/// tuple convention, so the dispatcher never needs to sniff a yielded
/// value's runtime type (spec §9).
#[derive(Debug)]
pub enum Yield {
	Request(Request),
	Item(Box<dyn ItemPayload>),
	Error(CrawlError),
	/// Wraps another yield, overriding the context it is dispatched with.
	ContextOverride(Context, Box<Yield>),
}

impl Yield {
	/// Unwraps any `ContextOverride` layers, returning the outermost
	/// override (if present) and the innermost payload.
	pub fn decompose(self) -> (Option<Context>, YieldPayload) {
		match self {
			Yield::ContextOverride(ctx, inner) => {
				let (_, payload) = inner.decompose();
				(Some(ctx), payload)
			},
			Yield::Request(r) => (None, YieldPayload::Request(r)),
			Yield::Item(i) => (None, YieldPayload::Item(i)),
			Yield::Error(e) => (None, YieldPayload::Error(e)),
		}
	}
}

/// A parser's streamed output. An `Err` ends the stream after exactly one
/// trailing error envelope is emitted (spec §4.4: "The parser's own
/// exceptions break the stream").
pub type ParseStream = Pin<Box<dyn Stream<Item = Result<Yield, CrawlError>> + Send>>;

/// The contract a site-specific parser implements (spec §4.4).
pub trait Parser: Send + Sync {
	/// Stable store identifier.
	fn id(&self) -> &str;
	/// Monotonic non-negative version.
	fn version(&self) -> i32;
	/// Wildcard domain patterns this parser claims.
	fn allowed_domains(&self) -> Vec<String>;
	/// Per-URL fetch policy.
	fn crawl_options(&self, url: &Url) -> CrawlOptions;
	/// Domain-specific URL canonicalization; idempotent, returns input
	/// unchanged when unrecognized.
	fn canonical_url(&self, raw_url: &str) -> String;
	/// Parses a fetched response into a stream of yields.
	fn parse(&self, ctx: Context, resp: Arc<Response>) -> ParseStream;
	/// Seed requests for local test mode (spec §6.3 `test` subcommand).
	fn new_test_request(&self, ctx: Context) -> Vec<Request>;
	/// Acceptance check for test mode.
	fn check_test_response(&self, ctx: &Context, resp: &Response) -> bool;
}

#[cfg(test)]
mod tests {
	use super::*;

	#[derive(Debug)]
	struct Noop;
	impl ItemPayload for Noop {
		fn type_url(&self) -> &'static str {
			"test.Noop"
		}
		fn to_json(&self) -> serde_json::Value {
			serde_json::json!({})
		}
	}

	#[test]
	fn decompose_bare_payload_has_no_override() {
		let y = Yield::Error(CrawlError::internal("boom"));
		let (ctx, payload) = y.decompose();
		assert!(ctx.is_none());
		assert!(matches!(payload, YieldPayload::Error(_)));
	}

	#[test]
	fn decompose_unwraps_context_override() {
		let over = Context::root().derive("k", "v");
		let y = Yield::ContextOverride(over.clone(), Box::new(Yield::Item(Box::new(Noop))));
		let (ctx, payload) = y.decompose();
		assert_eq!(ctx.unwrap().get("k"), "v");
		assert!(matches!(payload, YieldPayload::Item(_)));
	}
}
