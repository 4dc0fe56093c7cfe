#[doc(hidden)]
pub fn __init_test(module_path: &'static str) {
    let crate_name = module_path.split("::").next().unwrap_or(module_path);

    let mut filter = format!("{crate_name}=trace");
    for name in crate::CRATE_NAMES {
        filter.push_str(&format!(",{name}=trace"));
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .compact()
        .try_init()
        .ok();
}

/// Initialize the logger for testing.
///
/// This logs to the stdout registered by the Rust test runner, and only captures logs from the
/// calling crate and the crates of this workspace.
///
/// # Example
///
/// ```
/// tally_log::init_test!();
/// ```
#[macro_export]
macro_rules! init_test {
    () => {
        $crate::__init_test(::std::module_path!());
    };
}
