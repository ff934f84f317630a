use std::fs::{File, OpenOptions};
use std::io::{self, Stdout};
use std::path::Path;

use anyhow::anyhow;
use slog::{b, o, Drain};

use xmlblaster_conf::logging::{Log, To};

use crate::error::Result;

pub use slog::Logger;

/// Routes the `log` macros of all xmlBlaster crates into a slog logger built from `cfg`.
pub fn logger_init(cfg: &Log) -> Result<Logger> {
    let logger = config_logger(cfg.filename(), cfg.to, cfg.level.inner())?;
    log::set_boxed_logger(Box::new(LoggerEx(logger.clone())))
        .map_err(|e| anyhow!("logger init failed, {:?}", e))?;
    log::set_max_level(slog_log_to_level(cfg.level.inner()).to_level_filter());
    Ok(logger)
}

struct LoggerEx(Logger);

impl log::Log for LoggerEx {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, r: &log::Record) {
        let level = log_to_slog_level(r.metadata().level());
        let args = r.args();
        let target = r.target();
        let location = &record_as_location(r);
        let s = slog::RecordStatic { location, level, tag: target };

        self.0.log(&slog::Record::new(&s, args, b!()))
    }

    fn flush(&self) {}
}

fn log_to_slog_level(level: log::Level) -> slog::Level {
    match level {
        log::Level::Trace => slog::Level::Trace,
        log::Level::Debug => slog::Level::Debug,
        log::Level::Info => slog::Level::Info,
        log::Level::Warn => slog::Level::Warning,
        log::Level::Error => slog::Level::Error,
    }
}

fn slog_log_to_level(level: slog::Level) -> log::Level {
    match level {
        slog::Level::Trace => log::Level::Trace,
        slog::Level::Debug => log::Level::Debug,
        slog::Level::Info => log::Level::Info,
        slog::Level::Warning => log::Level::Warn,
        slog::Level::Error => log::Level::Error,
        slog::Level::Critical => log::Level::Error,
    }
}

fn record_as_location(r: &log::Record) -> slog::RecordLocation {
    let module = r.module_path_static().unwrap_or("<unknown>");
    let file = r.file_static().unwrap_or("<unknown>");
    let line = r.line().unwrap_or_default();

    slog::RecordLocation { file, line, column: 0, function: "", module }
}

fn timestamp_local(io: &mut dyn io::Write) -> io::Result<()> {
    write!(io, "{}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"))
}

pub fn config_logger(filename: String, to: To, level: slog::Level) -> Result<Logger> {
    let decorator = slog_term::PlainSyncDecorator::new(LogSink::new(filename, to)?);
    let drain = slog_term::FullFormat::new(decorator)
        .use_custom_timestamp(timestamp_local)
        .use_file_location()
        .build()
        .fuse();

    let drain = slog::LevelFilter::new(drain, level).fuse();

    let drain = slog_async::Async::new(drain)
        .chan_size(4096 * 4)
        .overflow_strategy(slog_async::OverflowStrategy::DropAndReport)
        .build()
        .fuse();

    Ok(Logger::root(drain, o!()))
}

struct LogSink {
    to: To,
    file: Option<File>,
    console: Stdout,
}

impl LogSink {
    fn new(filename: String, to: To) -> Result<Self> {
        let file = if to.file() && !filename.is_empty() { Some(open_file(&filename)?) } else { None };
        Ok(Self { to, file, console: std::io::stdout() })
    }
}

impl io::Write for LogSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.to.off() {
            return Ok(buf.len());
        }
        if self.to.console() {
            self.console.write_all(buf)?;
        }
        if let Some(file) = self.file.as_mut() {
            file.write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.to.console() {
            self.console.flush()?;
        }
        if let Some(file) = self.file.as_mut() {
            file.flush()?;
        }
        Ok(())
    }
}

/// Appends to `filename`, creating the log directory if needed.
fn open_file(filename: &str) -> Result<File> {
    if let Some(dir) = Path::new(filename).parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|e| anyhow!("cannot create log directory {:?}, {}", dir, e))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(filename)
        .map_err(|e| anyhow!("cannot open log file {}, {}", filename, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_mapping() {
        assert_eq!(log_to_slog_level(log::Level::Warn), slog::Level::Warning);
        assert_eq!(slog_log_to_level(slog::Level::Critical), log::Level::Error);
        assert_eq!(slog_log_to_level(log_to_slog_level(log::Level::Trace)), log::Level::Trace);
    }

    #[test]
    fn test_file_logger() {
        let filename = std::env::temp_dir()
            .join(format!("xmlblaster-logger-{}", std::process::id()))
            .join("client.log");
        let filename = filename.to_string_lossy().to_string();
        let logger = config_logger(filename.clone(), To::File, slog::Level::Info).unwrap();
        slog::info!(logger, "hello file");
        drop(logger);
        std::thread::sleep(std::time::Duration::from_millis(200));
        let content = std::fs::read_to_string(&filename).unwrap();
        assert!(content.contains("hello file"));
        let _ = std::fs::remove_file(&filename);
        let _ = std::fs::remove_dir(Path::new(&filename).parent().unwrap());
    }
}
