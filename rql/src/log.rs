use log::LevelFilter;

pub fn init_logging(level: LevelFilter) {
    env_logger::builder()
        .format_target(false)
        .format_timestamp_secs()
        .filter_level(level)
        .parse_default_env()
        .init()
}

/// Debug logger for test binaries; further calls are no-ops
pub fn init_test_logging() {
    let _ = env_logger::builder()
        .format_timestamp_secs()
        .filter_level(LevelFilter::Debug)
        .parse_default_env()
        .is_test(true)
        .try_init();
}

#[cfg(test)]
#[ctor::ctor]
fn init() {
    init_test_logging()
}
