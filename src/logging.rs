use tracing::metadata::LevelFilter;
use tracing_subscriber::fmt::SubscriberBuilder;
use tracing_subscriber::EnvFilter;

/// Installs the global subscriber. With no verbosity and no debug flag, `RUST_LOG` decides.
pub fn log_init(verbose: u8, debug: bool) {
    let mut log_level = match verbose {
        0 => None,
        1 => Some(LevelFilter::WARN),
        2 => Some(LevelFilter::INFO),
        _ => Some(LevelFilter::DEBUG),
    };
    if debug {
        log_level = Some(LevelFilter::DEBUG);
    }

    // a second call keeps the first subscriber
    let _ = if let Some(log_level) = log_level {
        SubscriberBuilder::default().with_max_level(log_level).try_init()
    } else {
        SubscriberBuilder::default()
            .with_env_filter(EnvFilter::from_default_env())
            .try_init()
    };
}
