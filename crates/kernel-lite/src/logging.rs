//! Logging setup.
//!
//! Native builds log through `env_logger`; `RUST_LOG` overrides the
//! configured level. In the browser, records go to the developer console.

/// Initialize logging with `level` as the default filter.
///
/// Safe to call more than once; later calls are ignored.
#[cfg(not(target_arch = "wasm32"))]
pub fn init_logging(level: &str) {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .try_init();
}

/// Initialize logging with `level` as the maximum level.
///
/// Safe to call more than once; later calls are ignored.
#[cfg(all(target_arch = "wasm32", feature = "wasm"))]
pub fn init_logging(level: &str) {
    let filter = level.parse().unwrap_or(log::LevelFilter::Info);
    if log::set_logger(&console::CONSOLE).is_ok() {
        log::set_max_level(filter);
    }
}

#[cfg(all(target_arch = "wasm32", feature = "wasm"))]
mod console {
    use wasm_bindgen::JsValue;

    pub(super) static CONSOLE: ConsoleLogger = ConsoleLogger;

    pub(super) struct ConsoleLogger;

    impl log::Log for ConsoleLogger {
        fn enabled(&self, metadata: &log::Metadata<'_>) -> bool {
            metadata.level() <= log::max_level()
        }

        fn log(&self, record: &log::Record<'_>) {
            if !self.enabled(record.metadata()) {
                return;
            }
            let line = JsValue::from_str(&format!("{} {}", record.level(), record.args()));
            match record.level() {
                log::Level::Error => web_sys::console::error_1(&line),
                log::Level::Warn => web_sys::console::warn_1(&line),
                _ => web_sys::console::log_1(&line),
            }
        }

        fn flush(&self) {}
    }
}
