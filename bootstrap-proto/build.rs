fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=proto/bootstrapper.proto");
    println!("cargo:rerun-if-changed=proto/certifier.proto");
    println!("cargo:rerun-if-changed=proto/identity.proto");

    tonic_build::configure()
        .build_server(false)
        .build_client(true)
        .compile_protos(
            &[
                "proto/bootstrapper.proto",
                "proto/certifier.proto",
                "proto/identity.proto",
            ],
            &["proto"],
        )?;

    Ok(())
}
