fn main() -> Result<(), Box<dyn std::error::Error>> {
    let proto_file = "proto/google/bigtable/v2/bigtable.proto";
    println!("cargo:rerun-if-changed={}", proto_file);
    println!("cargo:rerun-if-changed=proto");

    // Vendored protoc and well-known types, so no system install is needed.
    std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
    let well_known = protoc_bin_vendored::include_path()?;

    let mut config = prost_build::Config::new();
    config.bytes(["."]);

    tonic_build::configure()
        .build_server(false)
        .build_client(true)
        .compile_with_config(
            config,
            &[proto_file],
            &[std::path::Path::new("proto"), well_known.as_path()],
        )?;

    Ok(())
}
