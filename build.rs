fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Only rerun if proto files change
    println!("cargo:rerun-if-changed=proto/topomesh/topology.proto");
    println!("cargo:rerun-if-changed=proto/topomesh/watch.proto");

    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(
            &[
                "proto/topomesh/topology.proto",
                "proto/topomesh/watch.proto",
            ],
            &["proto"],
        )?;
    Ok(())
}
