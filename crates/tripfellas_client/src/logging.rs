//! Simulation logger → Bevy tracing (LogPlugin из DefaultPlugins)
//!
//! Timestamp уже добавлен simulation logger'ом, поэтому в консоли будет
//! два времени: это ок, tracing время монотонное, наше: wall clock.

use bevy::log::{debug, error, info, warn};
use tripfellas_simulation::logger::{self, LogLevel, LogPrinter};

struct BevyLogPrinter;

impl LogPrinter for BevyLogPrinter {
    fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Debug => debug!("{}", message),
            LogLevel::Info => info!("{}", message),
            LogLevel::Warning => warn!("{}", message),
            LogLevel::Error => error!("{}", message),
        }
    }
}

pub fn init() {
    logger::set_logger(Box::new(BevyLogPrinter));
    logger::set_log_level(if cfg!(debug_assertions) {
        LogLevel::Debug
    } else {
        LogLevel::Info
    });
}
