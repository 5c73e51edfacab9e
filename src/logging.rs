//! Log initialization for binaries and tests.
//!
//! The library itself only emits through the [`log`] facade; wiring a backend
//! is the host's job. These helpers cover the common case of "just show me
//! the engine's output" without forcing `env_logger` on hosts that bring
//! their own subscriber.

use std::sync::Once;

static INIT: Once = Once::new();

/// Initializes `env_logger` from `RUST_LOG`, defaulting to `info`.
///
/// Safe to call any number of times; only the first call does anything, so
/// every test can call it without coordinating.
pub fn init() {
    INIT.call_once(|| {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
            .format_timestamp_millis()
            .init();
    });
}

/// Like [`init`], but defaults to `debug` for the engine's own messages.
pub fn init_verbose() {
    INIT.call_once(|| {
        env_logger::Builder::from_env(
            env_logger::Env::default().default_filter_or("phalanx=debug,info"),
        )
        .format_timestamp_millis()
        .init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_init_is_harmless() {
        init();
        init_verbose();
        init();
        log::debug!("[logging] init exercised");
    }
}
