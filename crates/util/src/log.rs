//! Contains tools for leveled logging.
//!
//! The layer runs inside someone else's process, so logging has to work in
//! release builds and be quiet by default. The minimum [Level] is read from
//! `FXLAYER_LOG_LEVEL` the first time anything is logged (`debug`, `info`,
//! `warning`, `error` or `none`, defaulting to `info`). If `FXLAYER_LOG_FILE`
//! is set, every line is also appended to that file.
//!
//! Use the [crate::log_debug], [crate::log_info], [crate::log_warning] and
//! [crate::log_error] macros rather than calling [write] directly.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{IsTerminal, Write};
use std::panic::Location;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, OnceLock};

use time::{OffsetDateTime, format_description::well_known::Rfc3339};

/// Environment variable holding the minimum level.
pub const LEVEL_ENV: &str = "FXLAYER_LOG_LEVEL";

/// Environment variable holding an optional file to append log lines to.
pub const FILE_ENV: &str = "FXLAYER_LOG_FILE";

/// How important a log line is. Lines below the current [level] are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Level {
    Debug = 0,
    Info = 1,
    Warning = 2,
    Error = 3,
    /// Only valid as a threshold; nothing is logged at this level.
    None = 4,
}

impl Level {
    /// Parse a level name (case-insensitive). `warn` is accepted for
    /// [Level::Warning] and `off` for [Level::None].
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" | "trace" => Some(Level::Debug),
            "info" => Some(Level::Info),
            "warning" | "warn" => Some(Level::Warning),
            "error" => Some(Level::Error),
            "none" | "off" => Some(Level::None),
            _ => None,
        }
    }

    fn tag(self) -> &'static str {
        match self {
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warning => "WARNING",
            Level::Error => "ERROR",
            Level::None => "",
        }
    }

    fn color(self) -> &'static str {
        match self {
            Level::Debug => "\x1b[36m",
            Level::Info => "\x1b[35m",
            Level::Warning => "\x1b[33m",
            Level::Error => "\x1b[31m",
            Level::None => "",
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => Level::Debug,
            1 => Level::Info,
            2 => Level::Warning,
            3 => Level::Error,
            _ => Level::None,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Log a debug message.
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {{
        if $crate::log::enabled($crate::log::Level::Debug) {
            $crate::log::write($crate::log::Level::Debug, ::std::format_args!($($arg)*));
        }
    }};
}

/// Log some info to stdout.
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {{
        if $crate::log::enabled($crate::log::Level::Info) {
            $crate::log::write($crate::log::Level::Info, ::std::format_args!($($arg)*));
        }
    }};
}

/// Log a warning to stderr.
#[macro_export]
macro_rules! log_warning {
    ($($arg:tt)*) => {{
        if $crate::log::enabled($crate::log::Level::Warning) {
            $crate::log::write($crate::log::Level::Warning, ::std::format_args!($($arg)*));
        }
    }};
}

/// Log an error to stderr.
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {{
        if $crate::log::enabled($crate::log::Level::Error) {
            $crate::log::write($crate::log::Level::Error, ::std::format_args!($($arg)*));
        }
    }};
}

/// The current minimum level, initializing it from [LEVEL_ENV] if nothing has
/// set it yet.
pub fn level() -> Level {
    let raw = LEVEL.load(Ordering::Relaxed);
    if raw != UNSET {
        return Level::from_u8(raw);
    }

    let from_env = std::env::var(LEVEL_ENV)
        .ok()
        .and_then(|s| Level::parse(&s))
        .unwrap_or(Level::Info);

    // Another thread may have called `set_level` in the meantime, that wins.
    match LEVEL.compare_exchange(UNSET, from_env as u8, Ordering::Relaxed, Ordering::Relaxed) {
        Ok(_) => from_env,
        Err(current) => Level::from_u8(current),
    }
}

/// Override the minimum level.
pub fn set_level(level: Level) {
    LEVEL.store(level as u8, Ordering::Relaxed);
}

/// Whether a line at `level` would be written.
#[inline]
pub fn enabled(level: Level) -> bool {
    level != Level::None && level >= self::level()
}

/// Write one log line. This gets called by the log macros and generally
/// shouldn't be called directly.
#[track_caller]
pub fn write(level: Level, args: fmt::Arguments<'_>) {
    let loc = Location::caller();
    let when = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|e| format!("unknown time ({e})"));

    let plain = format_line(level, &args.to_string(), &when, loc, ("", "", ""));

    if level >= Level::Warning {
        let stderr = std::io::stderr();
        let line = if stderr.is_terminal() {
            format_line(level, &args.to_string(), &when, loc, colors(level))
        } else {
            plain.clone()
        };
        _ = writeln!(stderr.lock(), "{line}");
    } else {
        let stdout = std::io::stdout();
        let line = if stdout.is_terminal() {
            format_line(level, &args.to_string(), &when, loc, colors(level))
        } else {
            plain.clone()
        };
        _ = writeln!(stdout.lock(), "{line}");
    }

    if let Some(sink) = file_sink() {
        if let Ok(mut file) = sink.lock() {
            _ = writeln!(file, "{plain}");
        }
    }
}

fn colors(level: Level) -> (&'static str, &'static str, &'static str) {
    ("\x1b[34m", level.color(), "\x1b[0m")
}

fn format_line(
    level: Level,
    msg: &str,
    when: &str,
    loc: &Location<'_>,
    (blue, level_color, reset): (&str, &str, &str),
) -> String {
    let tag = level.tag();
    if level >= Level::Warning {
        format!(
            "{blue}fxlayer{reset} [{level_color}{tag}{reset}]: {msg}\n\
             \tWhere: {blue}{}:{}:{}{reset}\n\
             \tTime:  {blue}{when}{reset}",
            loc.file(),
            loc.line(),
            loc.column(),
        )
    } else {
        format!("{blue}fxlayer{reset} [{level_color}{tag}{reset}]: {msg}")
    }
}

fn file_sink() -> Option<&'static Mutex<File>> {
    FILE_SINK
        .get_or_init(|| {
            let path = std::env::var_os(FILE_ENV)?;
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .ok()
                .map(Mutex::new)
        })
        .as_ref()
}

const UNSET: u8 = u8::MAX;

static LEVEL: AtomicU8 = AtomicU8::new(UNSET);

static FILE_SINK: OnceLock<Option<Mutex<File>>> = OnceLock::new();

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_aliases() {
        assert_eq!(Level::parse("warn"), Some(Level::Warning));
        assert_eq!(Level::parse(" WARNING "), Some(Level::Warning));
        assert_eq!(Level::parse("off"), Some(Level::None));
        assert_eq!(Level::parse("Debug"), Some(Level::Debug));
        assert_eq!(Level::parse("loud"), None);
    }

    #[test]
    fn levels_are_ordered_by_severity() {
        assert!(Level::Debug < Level::Info);
        assert!(Level::Info < Level::Warning);
        assert!(Level::Warning < Level::Error);
        assert!(Level::Error < Level::None);
    }

    #[test]
    fn none_is_never_enabled() {
        set_level(Level::Debug);
        assert!(enabled(Level::Debug));
        assert!(!enabled(Level::None));
    }

    #[test]
    fn warnings_carry_a_location_trailer() {
        let loc = Location::caller();
        let line = format_line(Level::Warning, "oops", "now", loc, ("", "", ""));
        assert!(line.starts_with("fxlayer [WARNING]: oops"));
        assert!(line.contains("Where: "));
        assert!(line.contains("Time:  now"));

        let line = format_line(Level::Info, "hello", "now", loc, ("", "", ""));
        assert_eq!(line, "fxlayer [INFO]: hello");
    }
}
