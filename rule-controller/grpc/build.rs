fn main() {
    let observe = tonic_build::manual::Method::builder()
        .name("observe")
        .route_name("Observe")
        .input_type("crate::proto::ObserveRequest")
        .output_type("crate::proto::ObserveResponse")
        .codec_path("tonic::codec::ProstCodec")
        .client_streaming()
        .server_streaming()
        .build();

    let service = tonic_build::manual::Service::builder()
        .name("RuleService")
        .package("dds")
        .method(observe)
        .build();

    tonic_build::manual::Builder::new().compile(&[service]);
}
