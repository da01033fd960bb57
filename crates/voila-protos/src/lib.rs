//! Generated gRPC/protobuf message and service definitions (component F).
//!
//! The `.proto` sources live under `proto/` and are compiled by `build.rs`
//! via `tonic-prost-build`. Treated as given per the spec: this crate only
//! wires the codegen up, it does not design the wire format.

pub mod voila {
	pub mod worker {
		pub mod v1 {
			tonic::include_proto!("voila.worker.v1");
		}
	}
}

pub use voila::worker::v1::*;
