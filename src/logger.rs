use std::io::Write;

use chrono::prelude::*;
use log::{Level, LevelFilter, Metadata, Record};

const CRATE: &str = "streamiumd";

pub struct Logger {
    level: LevelFilter,
}

impl Logger {
    pub fn init(level: LevelFilter) -> Result<(), log::SetLoggerError> {
        log::set_boxed_logger(Box::new(Logger { level }))?;
        log::set_max_level(level);
        Ok(())
    }
}

/// Target with the crate prefix removed; `None` for other crates.
fn module_target(target: &str) -> Option<&str> {
    if target == CRATE {
        Some("main")
    } else {
        target
            .strip_prefix(CRATE)
            .and_then(|t| t.strip_prefix("::"))
    }
}

fn level_name(level: Level) -> &'static str {
    match level {
        Level::Error => "error",
        Level::Warn => "warn",
        Level::Info => "info",
        Level::Debug => "debug",
        Level::Trace => "trace",
    }
}

impl log::Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level && module_target(metadata.target()).is_some()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let target = match module_target(record.target()) {
            Some(t) => t,
            None => return,
        };

        let line = format!(
            "{} {:5} {}: {}\n",
            Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            level_name(record.level()),
            target,
            record.args()
        );

        let _ = std::io::stderr().lock().write_all(line.as_bytes());
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}
