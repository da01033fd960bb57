pub mod context;
pub mod error;
pub mod header;
pub mod ident;
pub mod telemetry;
pub mod url;

pub mod prelude {
	pub use crate::context::Context;
	pub use crate::error::{Code, CrawlError};
	pub use crate::header::Header;
	pub use crate::ident::new_request_id;
	pub use crate::url::{Query, Url};
}
