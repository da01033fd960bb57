//! The `CrawlerNode` gRPC server surface (component E, spec §4.5.1 and
//! §4.5.3), concurrency-capped via a semaphore (spec §5).

use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio_stream::Stream;
use tonic::{Request as TonicRequest, Response as TonicResponse, Status};
use tracing::Instrument;
use voila_protos::crawler_node_server::CrawlerNode;
use voila_protos::{
	AllowedDomainsResponse, CanonicalUrlData, CanonicalUrlRequest, CanonicalUrlResponse, Cookie as WireCookie, CrawlOptions as WireCrawlOptions,
	CrawlOptionsRequest, CrawlOptionsResponse, Empty, Envelope, RawRequest, VersionResponse,
};
use voila_worker_core::prelude::*;

use crate::envelope::{dispatch_yield, final_error_envelope, request_from_raw};
use crate::options::{CrawlOptions, RequestOptions};
use crate::parser::Parser;
use crate::proxy_client::ProxyClient;

pub struct WorkerService {
	parser: Arc<dyn Parser>,
	fetcher: ProxyClient,
	semaphore: Arc<Semaphore>,
}

impl WorkerService {
	pub fn new(parser: Arc<dyn Parser>, fetcher: ProxyClient, max_concurrency: usize) -> WorkerService {
		WorkerService {
			parser,
			fetcher,
			semaphore: Arc::new(Semaphore::new(max_concurrency)),
		}
	}
}

fn crawl_options_to_wire(opts: &CrawlOptions) -> WireCrawlOptions {
	WireCrawlOptions {
		enable_headless: opts.enable_headless,
		enable_session_init: opts.enable_session_init,
		keep_session: opts.keep_session,
		session_ttl_seconds: opts.session_ttl.as_secs() as i64,
		disable_cookie_jar: opts.disable_cookie_jar,
		disable_redirect: opts.disable_redirect,
		reliability: opts.reliability as i32,
		headers: opts.headers.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
		cookies: opts
			.cookies
			.iter()
			.map(|c| WireCookie {
				name: c.name.clone(),
				value: c.value.clone(),
				domain: c.domain.clone(),
				path: c.path.clone(),
			})
			.collect(),
	}
}

type EnvelopeStream = Pin<Box<dyn Stream<Item = Result<Envelope, Status>> + Send>>;

#[tonic::async_trait]
impl CrawlerNode for WorkerService {
	async fn version(&self, _req: TonicRequest<Empty>) -> Result<TonicResponse<VersionResponse>, Status> {
		Ok(TonicResponse::new(VersionResponse {
			version: self.parser.version(),
		}))
	}

	async fn crawler_options(&self, req: TonicRequest<CrawlOptionsRequest>) -> Result<TonicResponse<CrawlOptionsResponse>, Status> {
		let url = Url::parse(&req.into_inner().url);
		let opts = self.parser.crawl_options(&url);
		Ok(TonicResponse::new(CrawlOptionsResponse {
			data: Some(crawl_options_to_wire(&opts)),
		}))
	}

	async fn allowed_domains(&self, _req: TonicRequest<Empty>) -> Result<TonicResponse<AllowedDomainsResponse>, Status> {
		Ok(TonicResponse::new(AllowedDomainsResponse {
			data: self.parser.allowed_domains(),
		}))
	}

	async fn canonical_url(&self, req: TonicRequest<CanonicalUrlRequest>) -> Result<TonicResponse<CanonicalUrlResponse>, Status> {
		let canonical = self.parser.canonical_url(&req.into_inner().url);
		Ok(TonicResponse::new(CanonicalUrlResponse {
			data: Some(CanonicalUrlData { url: canonical }),
		}))
	}

	type ParseStream = EnvelopeStream;

	async fn parse(&self, req: TonicRequest<RawRequest>) -> Result<TonicResponse<Self::ParseStream>, Status> {
		let raw = req.into_inner();
		let permit = self
			.semaphore
			.clone()
			.acquire_owned()
			.await
			.map_err(|_| Status::internal("worker is shutting down"))?;

		let parser = self.parser.clone();
		let fetcher = self.fetcher.clone();
		let span = tracing::info_span!("parse", tracing_id = %raw.tracing_id, job_id = %raw.job_id);

		let stream = async_stream::stream! {
			let _permit = permit;
			let request = request_from_raw(&raw);
			let job_ctx = request.context.clone();

			tracing::info!("parse");

			let crawl_options = parser.crawl_options(&request.url);
			let job_options = raw.options.clone().unwrap_or_default();
			let request_options = RequestOptions::from_job(job_options.disable_proxy, &crawl_options);

			let response = match fetcher.fetch(&job_ctx, &request, &request_options).await {
				Ok(resp) => resp,
				Err(e) => {
					yield Ok(final_error_envelope(&job_ctx, &e.into()));
					return;
				},
			};

			if response.body.is_empty() {
				yield Ok(final_error_envelope(&job_ctx, &CrawlError::internal("no response got")));
				return;
			}

			let response_rawurl = response.rawurl();
			let response = Arc::new(response);
			let mut parse_stream = parser.parse(job_ctx.clone(), response);
			loop {
				match tokio_stream::StreamExt::next(&mut parse_stream).await {
					None => break,
					Some(Ok(yld)) => {
						let env = dispatch_yield(&job_ctx, &raw, &response_rawurl, yld);
						yield Ok(env);
					},
					Some(Err(e)) => {
						yield Ok(final_error_envelope(&job_ctx, &e));
						break;
					},
				}
			}
		};

		Ok(TonicResponse::new(Box::pin(stream.instrument(span))))
	}
}
