//! Kernel-style print macros for veil
//!
//! Leveled logging that either goes to stderr or, once the interception
//! host hands over its own printer, to that printer.
//!
//! # Environment Variables
//!
//! - `VEIL_FLUSH_EPRINT=1` - Flush stderr after each record
//! - `VEIL_LOG_LEVEL=<level>` - off|error|warn|info|debug|trace, or 0..=5
//!
//! # Usage
//!
//! ```ignore
//! use veil_core::{kinfo, kwarn};
//!
//! kinfo!("plugin initializing");
//! kwarn!("unknown service {}", name);
//! ```
//!
//! Do not log from inside entry/return callbacks: the stderr path takes a
//! lock. Callbacks record into the engine's patch trail instead.

use std::fmt;
use std::io::Write;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Once, OnceLock};

use crate::env::{env_get_bool, env_get_opt};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Off = 0,
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl LogLevel {
    const BY_RANK: [LogLevel; 6] = [
        LogLevel::Off,
        LogLevel::Error,
        LogLevel::Warn,
        LogLevel::Info,
        LogLevel::Debug,
        LogLevel::Trace,
    ];

    /// Tag printed in front of every stderr record.
    pub fn tag(self) -> &'static str {
        match self {
            LogLevel::Off => "",
            LogLevel::Error => "E",
            LogLevel::Warn => "W",
            LogLevel::Info => "I",
            LogLevel::Debug => "D",
            LogLevel::Trace => "T",
        }
    }
}

impl TryFrom<u8> for LogLevel {
    type Error = u8;

    fn try_from(rank: u8) -> Result<Self, u8> {
        LogLevel::BY_RANK.get(rank as usize).copied().ok_or(rank)
    }
}

impl FromStr for LogLevel {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        if let Ok(rank) = s.parse::<u8>() {
            return LogLevel::try_from(rank).map_err(|_| ());
        }
        LogLevel::BY_RANK
            .into_iter()
            .find(|level| format!("{:?}", level).eq_ignore_ascii_case(s))
            .ok_or(())
    }
}

/// Host-provided log printer.
pub type LogSink = fn(LogLevel, fmt::Arguments<'_>);

static FROM_ENV: Once = Once::new();
static FLUSH: AtomicU8 = AtomicU8::new(0);
static LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);
static SINK: OnceLock<LogSink> = OnceLock::new();

/// Read `VEIL_LOG_LEVEL` and `VEIL_FLUSH_EPRINT`.
///
/// Runs at most once; the first record triggers it if nobody called it
/// earlier. An explicit `set_log_level` before that wins.
pub fn init() {
    FROM_ENV.call_once(|| {
        FLUSH.store(env_get_bool("VEIL_FLUSH_EPRINT", false) as u8, Ordering::Relaxed);
        if let Some(level) = env_get_opt::<LogLevel>("VEIL_LOG_LEVEL") {
            LEVEL.store(level as u8, Ordering::Relaxed);
        }
    });
}

/// Route all further records to `sink`. Only the first call wins.
pub fn set_sink(sink: LogSink) -> bool {
    SINK.set(sink).is_ok()
}

pub fn set_log_level(level: LogLevel) {
    init();
    LEVEL.store(level as u8, Ordering::Relaxed);
}

#[inline]
pub fn log_level() -> LogLevel {
    init();
    LogLevel::try_from(LEVEL.load(Ordering::Relaxed)).unwrap_or(LogLevel::Trace)
}

#[inline]
pub fn level_enabled(level: LogLevel) -> bool {
    level != LogLevel::Off && level <= log_level()
}

#[doc(hidden)]
pub fn _klog_impl(level: LogLevel, args: fmt::Arguments<'_>) {
    if !level_enabled(level) {
        return;
    }
    if let Some(sink) = SINK.get() {
        return sink(level, args);
    }
    let mut err = std::io::stderr().lock();
    let _ = writeln!(err, "veil[{}] {}", level.tag(), args);
    if FLUSH.load(Ordering::Relaxed) != 0 {
        let _ = err.flush();
    }
}

/// Log at an explicit level: `klog!(Warn, "x = {}", x)`.
#[macro_export]
macro_rules! klog {
    ($level:ident, $($arg:tt)*) => {
        $crate::kprint::_klog_impl($crate::kprint::LogLevel::$level, format_args!($($arg)*))
    };
}

/// Error level log (always shown unless logging is off)
#[macro_export]
macro_rules! kerror {
    ($($arg:tt)*) => { $crate::klog!(Error, $($arg)*) };
}

#[macro_export]
macro_rules! kwarn {
    ($($arg:tt)*) => { $crate::klog!(Warn, $($arg)*) };
}

#[macro_export]
macro_rules! kinfo {
    ($($arg:tt)*) => { $crate::klog!(Info, $($arg)*) };
}

#[macro_export]
macro_rules! kdebug {
    ($($arg:tt)*) => { $crate::klog!(Debug, $($arg)*) };
}

/// Trace level log (most verbose)
#[macro_export]
macro_rules! ktrace {
    ($($arg:tt)*) => { $crate::klog!(Trace, $($arg)*) };
}
