//! Error kinds and the domain error types carried through the parse
//! pipeline (spec §7).

use thiserror::Error;

/// The standard RPC code table. Only a subset is actually produced by this
/// worker (`Internal`, `Unimplemented`, `Aborted`); the rest are carried so
/// a parser-raised or forwarded code round-trips without loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Code {
	Ok,
	Cancelled,
	Unknown,
	InvalidArgument,
	DeadlineExceeded,
	NotFound,
	AlreadyExists,
	PermissionDenied,
	Unauthenticated,
	ResourceExhausted,
	FailedPrecondition,
	Aborted,
	OutOfRange,
	Unimplemented,
	Internal,
	Unavailable,
	DataLoss,
}

impl Code {
	pub fn as_str(&self) -> &'static str {
		match self {
			Code::Ok => "OK",
			Code::Cancelled => "CANCELLED",
			Code::Unknown => "UNKNOWN",
			Code::InvalidArgument => "INVALID_ARGUMENT",
			Code::DeadlineExceeded => "DEADLINE_EXCEEDED",
			Code::NotFound => "NOT_FOUND",
			Code::AlreadyExists => "ALREADY_EXISTS",
			Code::PermissionDenied => "PERMISSION_DENIED",
			Code::Unauthenticated => "UNAUTHENTICATED",
			Code::ResourceExhausted => "RESOURCE_EXHAUSTED",
			Code::FailedPrecondition => "FAILED_PRECONDITION",
			Code::Aborted => "ABORTED",
			Code::OutOfRange => "OUT_OF_RANGE",
			Code::Unimplemented => "UNIMPLEMENTED",
			Code::Internal => "INTERNAL",
			Code::Unavailable => "UNAVAILABLE",
			Code::DataLoss => "DATA_LOSS",
		}
	}
}

/// A structured failure raised by a parser or a sub-layer, carrying a
/// [`Code`]. Equivalent to `original_source`'s `crawler/error.py::Error`.
#[derive(Debug, Error, Clone)]
#[error("{code:?}: {message}")]
pub struct CrawlError {
	pub code: Code,
	pub message: String,
}

impl CrawlError {
	pub fn new(code: Code, message: impl Into<String>) -> Self {
		CrawlError {
			code,
			message: message.into(),
		}
	}

	pub fn internal(message: impl Into<String>) -> Self {
		CrawlError::new(Code::Internal, message)
	}

	pub fn unimplemented(message: impl Into<String>) -> Self {
		CrawlError::new(Code::Unimplemented, message)
	}

	pub fn aborted(message: impl Into<String>) -> Self {
		CrawlError::new(Code::Aborted, message)
	}
}
