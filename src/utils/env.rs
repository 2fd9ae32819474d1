pub const fn project_name() -> &'static str {
    env!("CARGO_PKG_NAME")
}
