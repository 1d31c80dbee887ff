//! Operational log sink shared by the engine services

use std::fmt;
use std::ops::BitOr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use parking_lot::RwLock;
use tracing::{debug, error, info, trace, warn};

/// Bitmask of message categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LogLevel(u8);

impl LogLevel {
    pub const NONE: LogLevel = LogLevel(0);
    pub const ERROR: LogLevel = LogLevel(1);
    pub const RECOVERY: LogLevel = LogLevel(2);
    pub const COMMAND: LogLevel = LogLevel(4);
    pub const JOURNAL: LogLevel = LogLevel(8);
    pub const CACHE: LogLevel = LogLevel(16);
    pub const FULL: LogLevel = LogLevel(0xFF);

    pub const fn from_bits(bits: u8) -> Self {
        LogLevel(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: LogLevel) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }
}

impl BitOr for LogLevel {
    type Output = LogLevel;

    fn bitor(self, rhs: LogLevel) -> LogLevel {
        LogLevel(self.0 | rhs.0)
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match *self {
            LogLevel::ERROR => "ERROR",
            LogLevel::RECOVERY => "RECOVERY",
            LogLevel::COMMAND => "COMMAND",
            LogLevel::JOURNAL => "JOURNAL",
            LogLevel::CACHE => "CACHE",
            LogLevel::NONE => "NONE",
            _ => return write!(f, "{:#04x}", self.0),
        };
        f.write_str(name)
    }
}

type Sink = Box<dyn Fn(LogLevel, &str) + Send + Sync>;

struct LoggerInner {
    level: AtomicU8,
    sink: RwLock<Option<Sink>>,
}

/// Engine log.
///
/// Every enabled message becomes a `tracing` event under the `docdb::<level>`
/// target and is also handed to the optional callback set by [`Logger::on_message`].
#[derive(Clone)]
pub struct Logger {
    inner: Arc<LoggerInner>,
}

impl Logger {
    pub fn new(level: LogLevel) -> Self {
        Self {
            inner: Arc::new(LoggerInner {
                level: AtomicU8::new(level.bits()),
                sink: RwLock::new(None),
            }),
        }
    }

    pub fn level(&self) -> LogLevel {
        LogLevel(self.inner.level.load(Ordering::Relaxed))
    }

    pub fn set_level(&self, level: LogLevel) {
        self.inner.level.store(level.bits(), Ordering::Relaxed);
    }

    /// Install a callback receiving every enabled message
    pub fn on_message<F>(&self, callback: F)
    where
        F: Fn(LogLevel, &str) + Send + Sync + 'static,
    {
        *self.inner.sink.write() = Some(Box::new(callback));
    }

    pub fn is_enabled(&self, level: LogLevel) -> bool {
        self.level().contains(level)
    }

    pub fn write(&self, level: LogLevel, message: impl fmt::Display) {
        if !self.is_enabled(level) {
            return;
        }

        let message = message.to_string();
        match level {
            LogLevel::ERROR => error!(target: "docdb::error", "{}", message),
            LogLevel::RECOVERY => warn!(target: "docdb::recovery", "{}", message),
            LogLevel::COMMAND => info!(target: "docdb::command", "{}", message),
            LogLevel::JOURNAL => debug!(target: "docdb::journal", "{}", message),
            _ => trace!(target: "docdb::cache", "{}", message),
        }

        if let Some(sink) = self.inner.sink.read().as_ref() {
            sink(level, &message);
        }
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::new(LogLevel::ERROR | LogLevel::RECOVERY)
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger").field("level", &self.level()).finish()
    }
}
