fn main() {
    let now = time::OffsetDateTime::now_utc();
    let format = |spec: &str| {
        time::format_description::parse(spec)
            .ok()
            .and_then(|fmt| now.format(&fmt).ok())
            .unwrap_or_else(|| "unknown".to_string())
    };

    let date = std::env::var("GLTF_VIEWER_BUILD_DATE")
        .unwrap_or_else(|_| format("[month repr:short] [day padding:space] [year]"));
    let time = std::env::var("GLTF_VIEWER_BUILD_TIME").unwrap_or_else(|_| format("[hour]:[minute]:[second]"));

    println!("cargo:rerun-if-env-changed=GLTF_VIEWER_BUILD_DATE");
    println!("cargo:rerun-if-env-changed=GLTF_VIEWER_BUILD_TIME");
    println!("cargo:rustc-env=GLTF_VIEWER_BUILD_DATE={}", date);
    println!("cargo:rustc-env=GLTF_VIEWER_BUILD_TIME={}", time);
}
