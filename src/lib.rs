//! picosense - Network sensor firmware with a self-updating OTA engine
//! Library shared by the device binary and the operator CLI

pub mod engine;

/// Install the fmt subscriber. `RUST_LOG` overrides `default_level`.
pub fn init_tracing(default_level: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .try_init();
}
