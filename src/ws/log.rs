//! Logging sink used by connections.
//!
//! Connections never print; every diagnostic goes through a [`Logger`] together with the
//! [`LogContext`] of the connection that produced it. [`TracingLogger`] forwards to `tracing`.

use std::fmt;

/// Severity of a log line.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    Debug,
    Info,
    Error,
    Fatal,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Error => "error",
            Self::Fatal => "fatal",
        };
        f.write_str(level)
    }
}

/// Identity attached to every line logged on behalf of a component.
pub trait LogContext {
    fn prefix(&self) -> String;

    fn suffix(&self) -> String;
}

pub trait Logger: Send + Sync + 'static {
    fn log(&self, level: Level, ctx: &dyn LogContext, message: &str);

    fn debug(&self, ctx: &dyn LogContext, message: &str) {
        self.log(Level::Debug, ctx, message);
    }

    fn info(&self, ctx: &dyn LogContext, message: &str) {
        self.log(Level::Info, ctx, message);
    }

    fn error(&self, ctx: &dyn LogContext, message: &str) {
        self.log(Level::Error, ctx, message);
    }

    fn fatal(&self, ctx: &dyn LogContext, message: &str) {
        self.log(Level::Fatal, ctx, message);
    }
}

/// [`Logger`] that emits `tracing` events with `prefix` and `suffix` as fields.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log(&self, level: Level, ctx: &dyn LogContext, message: &str) {
        let prefix = ctx.prefix();
        let suffix = ctx.suffix();

        match level {
            Level::Debug => tracing::debug!(%prefix, %suffix, "{message}"),
            Level::Info => tracing::info!(%prefix, %suffix, "{message}"),
            Level::Error => tracing::error!(%prefix, %suffix, "{message}"),
            Level::Fatal => tracing::error!(fatal = true, %prefix, %suffix, "{message}"),
        }
    }
}
