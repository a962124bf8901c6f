#![allow(clippy::print_stdout)]

use std::path::PathBuf;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let proto_root = PathBuf::from("proto");
    let protos = [proto_root.join("profile/v1/profile.proto")];
    for proto in &protos {
        println!("cargo:rerun-if-changed={}", proto.display());
    }

    prost_build::Config::new()
        .protoc_executable(protobuf_src::protoc())
        .include_file("profile.rs")
        .compile_protos(&protos, &[proto_root, protobuf_src::include()])?;
    Ok(())
}
