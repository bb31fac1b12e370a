// Build script for ttsfleet-wire.
// Compiles the tagged-union wire messages shared by the worker and controller.

fn main() {
    std::env::set_var("PROTOC", protobuf_src::protoc());

    prost_build::Config::new()
        .out_dir("src/generated")
        .compile_protos(&["proto/tts.proto", "proto/health.proto"], &["proto/"])
        .unwrap_or_else(|e| panic!("failed to compile protos: {}", e));

    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=proto/");
}
