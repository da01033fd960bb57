fn main() -> anyhow::Result<()> {
	tonic_prost_build::configure()
		.build_server(true)
		.build_client(true)
		.compile_protos(&["proto/worker.proto"], &["proto"])?;
	Ok(())
}
