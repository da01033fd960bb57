//! Per-parser fetch policy and per-call request options (spec §3
//! "CrawlOptions (D)" and §4.3 "RequestOptions").

use std::time::Duration;

use indexmap::IndexMap;
pub use voila_protos::Reliability;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieSpec {
	pub name: String,
	pub value: String,
	pub domain: String,
	pub path: String,
}

/// Per-parser, per-URL fetch policy (spec §3 "CrawlOptions (D)").
#[derive(Debug, Clone)]
pub struct CrawlOptions {
	pub enable_headless: bool,
	pub enable_session_init: bool,
	pub keep_session: bool,
	pub session_ttl: Duration,
	pub disable_cookie_jar: bool,
	pub disable_redirect: bool,
	pub reliability: Reliability,
	pub headers: IndexMap<String, String>,
	pub cookies: Vec<CookieSpec>,
}

impl Default for CrawlOptions {
	fn default() -> Self {
		CrawlOptions {
			enable_headless: false,
			enable_session_init: false,
			keep_session: false,
			session_ttl: Duration::ZERO,
			disable_cookie_jar: false,
			disable_redirect: false,
			reliability: Reliability::Default,
			headers: IndexMap::new(),
			cookies: Vec::new(),
		}
	}
}

impl CrawlOptions {
	pub fn add_cookie(&mut self, name: impl Into<String>, value: impl Into<String>, path: impl Into<String>) {
		self.cookies.push(CookieSpec {
			name: name.into(),
			value: value.into(),
			domain: String::new(),
			path: path.into(),
		});
	}
}

/// The fetch policy actually sent to the proxy fetcher for one call,
/// derived from a `RawRequest`'s job-level options merged with the
/// parser's `CrawlOptions` (spec §4.5.3 step 1).
#[derive(Debug, Clone)]
pub struct RequestOptions {
	pub enable_proxy: bool,
	pub enable_headless: bool,
	pub js_wait_duration: Duration,
	pub enable_session_init: bool,
	pub keep_session: bool,
	pub disable_cookie_jar: bool,
	pub disable_redirect: bool,
	pub reliability: Reliability,
	pub request_filter_keys: Vec<String>,
}

impl Default for RequestOptions {
	fn default() -> Self {
		RequestOptions {
			enable_proxy: true,
			enable_headless: false,
			js_wait_duration: Duration::ZERO,
			enable_session_init: false,
			keep_session: false,
			disable_cookie_jar: false,
			disable_redirect: false,
			reliability: Reliability::Default,
			request_filter_keys: Vec::new(),
		}
	}
}

impl RequestOptions {
	/// Builds the per-call options for a job (spec §4.5.3 step 1):
	/// `enable_proxy = !disable_proxy`, the rest copied from the parser's
	/// per-URL `CrawlOptions`.
	pub fn from_job(disable_proxy: bool, crawl_options: &CrawlOptions) -> RequestOptions {
		RequestOptions {
			enable_proxy: !disable_proxy,
			enable_headless: crawl_options.enable_headless,
			js_wait_duration: Duration::ZERO,
			enable_session_init: crawl_options.enable_session_init,
			keep_session: crawl_options.keep_session,
			disable_cookie_jar: crawl_options.disable_cookie_jar,
			disable_redirect: crawl_options.disable_redirect,
			reliability: crawl_options.reliability,
			request_filter_keys: Vec::new(),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn from_job_inverts_disable_proxy() {
		let copts = CrawlOptions {
			enable_headless: true,
			reliability: Reliability::Medium,
			..Default::default()
		};
		let opts = RequestOptions::from_job(false, &copts);
		assert!(opts.enable_proxy);
		assert!(opts.enable_headless);
		assert_eq!(opts.reliability, Reliability::Medium);

		let opts = RequestOptions::from_job(true, &copts);
		assert!(!opts.enable_proxy);
	}
}
