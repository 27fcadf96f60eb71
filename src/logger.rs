//! Session log for the engine and the CLI.
//!
//! `log_info!`, `log_warn!` and `log_err!` append `[HH:MM:SS] [LEVEL] msg`
//! lines. Nothing is written anywhere until [`init`] or [`init_at`] opens a
//! file or [`set_echo_stderr`] turns on the stderr mirror, so library users
//! and unit tests get no log output.
//!
//! The default file sits next to the settings file and is truncated at
//! every launch.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::settings::EngineSettings;

const LOG_FILE_NAME: &str = "pixelcanvas.log";

struct Sink {
    file: Option<File>,
    echo_stderr: bool,
}

static SINK: Mutex<Sink> = Mutex::new(Sink {
    file: None,
    echo_stderr: false,
});

pub fn set_echo_stderr(enabled: bool) {
    if let Ok(mut sink) = SINK.lock() {
        sink.echo_stderr = enabled;
    }
}

/// Append a raw line. Logging never fails an edit, so I/O errors are dropped.
pub fn write_line(line: &str) {
    let Ok(mut sink) = SINK.lock() else { return };
    if sink.echo_stderr {
        eprintln!("{}", line);
    }
    if let Some(file) = sink.file.as_mut() {
        let _ = writeln!(file, "{}", line);
    }
}

pub fn write(level: &str, msg: &str) {
    write_line(&format!("[{}] [{}] {}", timestamp(), level, msg));
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::logger::write("INFO", &format!($($arg)*));
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::logger::write("WARN", &format!($($arg)*));
    };
}

#[macro_export]
macro_rules! log_err {
    ($($arg:tt)*) => {
        $crate::logger::write("ERROR", &format!($($arg)*));
    };
}

/// Where [`init`] puts the log: beside the settings file, or in the temp
/// directory when no config location is known.
pub fn default_log_path() -> PathBuf {
    EngineSettings::settings_path()
        .map(|p| p.with_file_name(LOG_FILE_NAME))
        .unwrap_or_else(|| std::env::temp_dir().join(LOG_FILE_NAME))
}

pub fn init() -> io::Result<()> {
    init_at(&default_log_path())
}

/// Open (truncating) the log at `path` and mirror panics into it.
/// A second call replaces the file but not the panic hook.
pub fn init_at(path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).write(true).truncate(true).open(path)?;

    let first = match SINK.lock() {
        Ok(mut sink) => sink.file.replace(file).is_none(),
        Err(_) => return Ok(()),
    };

    write_line(&format!("=== PixelCanvas session (unix {}) ===", unix_seconds().unwrap_or(0)));
    write_line(&format!("Log file: {}", path.display()));

    if first {
        let prev = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            // try_lock: the panic may have fired inside write_line.
            if let Ok(mut sink) = SINK.try_lock()
                && let Some(file) = sink.file.as_mut()
            {
                let _ = writeln!(file, "[{}] [PANIC] {}", timestamp(), info);
            }
            prev(info);
        }));
    }
    Ok(())
}

fn unix_seconds() -> Option<u64> {
    SystemTime::now().duration_since(UNIX_EPOCH).ok().map(|d| d.as_secs())
}

/// UTC time of day.
fn timestamp() -> String {
    let Some(secs) = unix_seconds() else {
        return "??:??:??".to_string();
    };
    format!("{:02}:{:02}:{:02}", (secs % 86400) / 3600, (secs % 3600) / 60, secs % 60)
}
