pub fn run() {
    println!(
        "dl {} ({} {}, rustc {})",
        env!("CARGO_PKG_VERSION"),
        option_env!("VERGEN_GIT_SHA").map_or("unknown", |sha| &sha[..sha.len().min(8)]),
        option_env!("VERGEN_BUILD_DATE").unwrap_or("unknown"),
        option_env!("VERGEN_RUSTC_SEMVER").unwrap_or("unknown"),
    );
}
