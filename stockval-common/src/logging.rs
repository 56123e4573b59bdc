//! Logging setup for stockval.
//!
//! Console output always goes to stderr. When `logging.file_path` is set a
//! second layer writes to that file through a non-blocking worker, rotated
//! either by size (`"10 MB"`) or by time (`"daily"`, `"hourly"`).
//!
//! # Formats
//!
//! - `json`: structured JSON lines
//! - `pretty` / `compact`: tracing-subscriber's human-readable formats
//! - anything else is treated as a line template using `%(asctime)s`,
//!   `%(name)s`, `%(levelname)s`, `%(message)s`, `%(filename)s` and
//!   `%(lineno)d` placeholders
//!
//! # Noise Filtering
//!
//! Noisy library modules (hyper, reqwest, h2, rustls) are pinned to `warn`
//! unless `RUST_LOG` overrides the whole filter.

use std::fmt::Write as _;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{Event, Level, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::format::{self, FormatEvent, FormatFields};
use tracing_subscriber::fmt::{FmtContext, MakeWriter};
use tracing_subscriber::layer::Layer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

use crate::config::{LogLevel, LoggingConfig, RotationPolicy};
use crate::error::{Error, Result};

/// Modules forced to `warn` regardless of the configured level.
pub const NOISY_MODULES: &[&str] = &[
    "hyper",
    "hyper_util",
    "reqwest",
    "h2",
    "rustls",
    "tokio_util",
];

/// Rotated files kept next to the active log file.
pub const DEFAULT_MAX_BACKUPS: usize = 5;

fn build_filter(level: LogLevel) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    let mut directives = String::from(level.filter_directive());
    for module in NOISY_MODULES {
        let _ = write!(directives, ",{module}=warn");
    }
    EnvFilter::new(&directives)
}

/// Keeps the background file writer alive. Drop it last to flush buffered lines.
#[must_use = "dropping the guard stops the file writer"]
#[derive(Default)]
pub struct LoggingGuard {
    file_guard: Option<WorkerGuard>,
}

impl LoggingGuard {
    /// Whether a file layer is active.
    pub fn has_file_output(&self) -> bool {
        self.file_guard.is_some()
    }
}

/// Initialize the global subscriber.
///
/// A subscriber that was already installed (tests, embedding) is left in place.
pub fn init_logging(config: &LoggingConfig, level: LogLevel) -> Result<LoggingGuard> {
    let filter = build_filter(level);
    let console = build_layer(&config.format, io::stderr, true);

    let mut guard = LoggingGuard::default();
    let file_layer = match config.resolved_file_path() {
        Some(path) => {
            let policy = config.rotation_policy()?;
            let (writer, file_guard) = open_file_writer(&path, policy)?;
            guard.file_guard = Some(file_guard);
            Some(build_layer(&config.format, writer, false))
        }
        None => None,
    };

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer)
        .try_init()
        .is_ok();

    tracing::info!(
        log_level = %level,
        log_format = %config.format,
        file = ?config.file_path,
        rotation = %config.rotation,
        installed,
        noise_filtered = NOISY_MODULES.len(),
        "Logging initialized"
    );

    Ok(guard)
}

fn open_file_writer(
    path: &Path,
    policy: RotationPolicy,
) -> Result<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let (dir, file_name) = split_log_path(path)?;
    let pair = match policy {
        RotationPolicy::Size(max_bytes) => tracing_appender::non_blocking(SizeRotatingWriter::new(
            path,
            max_bytes,
            DEFAULT_MAX_BACKUPS,
        )?),
        RotationPolicy::Daily => {
            tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, file_name))
        }
        RotationPolicy::Hourly => {
            tracing_appender::non_blocking(tracing_appender::rolling::hourly(dir, file_name))
        }
        RotationPolicy::Never => {
            tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name))
        }
    };
    Ok(pair)
}

fn split_log_path(path: &Path) -> Result<(PathBuf, String)> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| Error::Config(format!("log path has no file name: {}", path.display())))?;
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    Ok((dir, file_name))
}

fn build_layer<S, W>(format: &str, writer: W, ansi: bool) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a> + 'static,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    match format.trim().to_ascii_lowercase().as_str() {
        "json" => tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .with_writer(writer)
            .boxed(),
        "pretty" => tracing_subscriber::fmt::layer()
            .pretty()
            .with_ansi(ansi)
            .with_writer(writer)
            .boxed(),
        "compact" => tracing_subscriber::fmt::layer()
            .compact()
            .with_ansi(ansi)
            .with_target(true)
            .with_writer(writer)
            .boxed(),
        _ => tracing_subscriber::fmt::layer()
            .event_format(TemplateFormat::parse(format))
            .with_ansi(false)
            .with_writer(writer)
            .boxed(),
    }
}

// ============================================================================
// Template Format
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    AscTime,
    Name,
    LevelName,
    Message,
    FileName,
    LineNo,
}

/// Event formatter driven by a `%(field)s` line template.
#[derive(Debug, Clone)]
pub struct TemplateFormat {
    segments: Vec<Segment>,
}

impl TemplateFormat {
    /// Parse a template. Unknown placeholders are kept as literal text.
    pub fn parse(template: &str) -> Self {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut rest = template;

        while let Some(start) = rest.find("%(") {
            literal.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let Some(close) = after.find(')') else {
                literal.push_str(&rest[start..]);
                rest = "";
                break;
            };

            let name = &after[..close];
            // conversion character such as `s` or `d`
            let tail = &after[close + 1..];
            let conv_len = tail
                .chars()
                .next()
                .filter(char::is_ascii_alphabetic)
                .map_or(0, char::len_utf8);

            let segment = match name {
                "asctime" => Some(Segment::AscTime),
                "name" => Some(Segment::Name),
                "levelname" => Some(Segment::LevelName),
                "message" => Some(Segment::Message),
                "filename" => Some(Segment::FileName),
                "lineno" => Some(Segment::LineNo),
                _ => None,
            };

            match segment {
                Some(segment) => {
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(segment);
                }
                None => literal.push_str(&rest[start..start + 2 + close + 1 + conv_len]),
            }
            rest = &tail[conv_len..];
        }

        literal.push_str(rest);
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }
        if !segments.contains(&Segment::Message) {
            segments.push(Segment::Literal(" ".into()));
            segments.push(Segment::Message);
        }

        Self { segments }
    }
}

fn level_name(level: &Level) -> &'static str {
    if *level == Level::WARN {
        "WARNING"
    } else {
        level.as_str()
    }
}

impl<S, N> FormatEvent<S, N> for TemplateFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        let meta = event.metadata();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => writer.write_str(text)?,
                Segment::AscTime => write!(
                    writer,
                    "{}",
                    chrono::Local::now().format("%Y-%m-%d %H:%M:%S,%3f")
                )?,
                Segment::Name => writer.write_str(meta.target())?,
                Segment::LevelName => writer.write_str(level_name(meta.level()))?,
                Segment::Message => ctx.field_format().format_fields(writer.by_ref(), event)?,
                Segment::FileName => {
                    let file = meta
                        .file()
                        .and_then(|f| Path::new(f).file_name())
                        .and_then(|f| f.to_str())
                        .unwrap_or("?");
                    writer.write_str(file)?;
                }
                Segment::LineNo => match meta.line() {
                    Some(line) => write!(writer, "{line}")?,
                    None => writer.write_str("?")?,
                },
            }
        }
        writeln!(writer)
    }
}

// ============================================================================
// Size-based rotation
// ============================================================================

/// File writer that rolls `app.log` to `app.log.1 .. app.log.N` once it exceeds a size.
pub struct SizeRotatingWriter {
    path: PathBuf,
    max_bytes: u64,
    max_backups: usize,
    file: File,
    written: u64,
}

impl SizeRotatingWriter {
    pub fn new(path: impl Into<PathBuf>, max_bytes: u64, max_backups: usize) -> io::Result<Self> {
        let path = path.into();
        let file = open_append(&path)?;
        let written = file.metadata()?.len();
        Ok(Self {
            path,
            max_bytes,
            max_backups,
            file,
            written,
        })
    }

    fn backup_path(&self, index: usize) -> PathBuf {
        PathBuf::from(format!("{}.{index}", self.path.display()))
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;

        if self.max_backups == 0 {
            self.file = OpenOptions::new()
                .write(true)
                .truncate(true)
                .open(&self.path)?;
        } else {
            for index in (1..self.max_backups).rev() {
                let src = self.backup_path(index);
                if src.exists() {
                    fs::rename(&src, self.backup_path(index + 1))?;
                }
            }
            fs::rename(&self.path, self.backup_path(1))?;
            self.file = open_append(&self.path)?;
        }

        self.written = 0;
        Ok(())
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

impl Write for SizeRotatingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written > 0 && self.written + buf.len() as u64 > self.max_bytes {
            self.rotate()?;
        }
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}
