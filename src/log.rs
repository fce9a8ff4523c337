//! Logging from zonemirror.

use std::io::Write;
#[cfg(unix)]
use std::net::Ipv4Addr;
use std::sync::RwLock;

use camino::Utf8Path;

use crate::config::{LogLevel, LogTarget, LoggingConfig};

//----------- Logger -----------------------------------------------------------

/// The state of the zonemirror logger.
pub struct Logger {
    /// The inner state of the logger.
    inner: RwLock<Option<Inner>>,

    /// The fallback logger.
    fallback: std::io::Stderr,
}

impl Logger {
    fn new() -> Self {
        Self {
            inner: RwLock::new(None),
            fallback: std::io::stderr(),
        }
    }

    /// Launch the zonemirror logger.
    ///
    /// Until a configuration is applied, messages go to stderr.  Fails if a
    /// [`log`] logger has been set already.
    pub fn launch() -> Result<&'static Logger, log::SetLoggerError> {
        let this = Box::leak(Box::new(Self::new()));

        log::set_logger(this)?;
        log::set_max_level(log::LevelFilter::Info);

        Ok(this)
    }

    /// Prepare a change to the logger.
    ///
    /// Opening a new log target can fail; nothing changes until the result
    /// is passed to [`Self::apply()`].
    pub fn prepare(
        &self,
        config: &LoggingConfig,
    ) -> Result<Option<PreparedChange>, std::io::Error> {
        let Ok(inner) = self.inner.read() else {
            // A panic occurred while the lock was held.  Don't do anything.
            return Ok(None);
        };

        let target = config.target.value();
        let level = (*config.level.value()).into();

        let Some(inner) = &*inner else {
            return Ok(Some(PreparedChange {
                primary: Some(PrimaryLogger::new(target)?),
                level,
            }));
        };

        let primary = if !inner.primary.matches(target) {
            Some(PrimaryLogger::new(target)?)
        } else {
            None
        };

        if primary.is_none() && inner.level == level {
            return Ok(None);
        }

        Ok(Some(PreparedChange { primary, level }))
    }

    /// Apply a prepared change to the logger.
    pub fn apply(&self, change: PreparedChange) {
        let Ok(mut inner) = self.inner.write() else {
            // A panic occurred while the lock was held.  Don't do anything.
            return;
        };

        match (&mut *inner, change.primary) {
            (Some(inner), primary) => {
                if let Some(primary) = primary {
                    inner.primary = primary;
                }
                inner.level = change.level;
            }
            (None, Some(primary)) => {
                *inner = Some(Inner {
                    primary,
                    level: change.level,
                });
            }
            (None, None) => {
                // Prepared against a different state; nothing to log to.
                return;
            }
        }

        log::set_max_level(change.level);
    }
}

impl log::Log for Logger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        if let Ok(inner) = self.inner.read() {
            if let Some(inner) = &*inner {
                return inner.enabled(metadata);
            }
        }

        metadata.level() <= log::LevelFilter::Info
    }

    fn log(&self, record: &log::Record) {
        if let Ok(inner) = self.inner.read() {
            if let Some(inner) = &*inner {
                return inner.log(record);
            }
        }

        let mut logger = &self.fallback;
        let _ = writeln!(&mut logger, "{}", record.args());
    }

    fn flush(&self) {
        if let Ok(inner) = self.inner.read() {
            if let Some(inner) = &*inner {
                return inner.flush();
            }
        }

        let mut logger = &self.fallback;
        let _ = logger.flush();
    }
}

//----------- Inner ------------------------------------------------------------

/// The inner state of a [`Logger`].
struct Inner {
    /// The primary logger.
    primary: PrimaryLogger,

    /// A log level filter.
    level: log::LevelFilter,
}

impl log::Log for Inner {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        self.primary.log(record)
    }

    fn flush(&self) {
        self.primary.flush()
    }
}

//----------- PrimaryLogger ----------------------------------------------------

/// A primary logger.
enum PrimaryLogger {
    /// A file logger.
    File {
        /// The actual file.
        file: std::fs::File,

        /// The path to the file.
        path: Box<Utf8Path>,
    },

    /// A syslog logger.
    #[cfg(unix)]
    Syslog(syslog::BasicLogger),
}

impl PrimaryLogger {
    /// Initialize a new [`PrimaryLogger`].
    pub fn new(config: &LogTarget) -> Result<Self, std::io::Error> {
        match config {
            LogTarget::File(path) => {
                let file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&**path)?;

                Ok(Self::File {
                    file,
                    path: path.clone(),
                })
            }

            #[cfg(unix)]
            LogTarget::Syslog => {
                let formatter = syslog::Formatter3164 {
                    process: "zonemirror".into(),
                    ..Default::default()
                };
                let result = syslog::unix(formatter.clone())
                    .or_else(|_| syslog::tcp(formatter.clone(), (Ipv4Addr::LOCALHOST, 601)))
                    .or_else(|_| {
                        syslog::udp(
                            formatter.clone(),
                            (Ipv4Addr::LOCALHOST, 0),
                            (Ipv4Addr::LOCALHOST, 514),
                        )
                    });
                let logger = result.map_err(|err| match err {
                    syslog::Error::Initialization(err) => std::io::Error::other(err),
                    syslog::Error::Write(err) => err,
                    syslog::Error::Io(err) => err,
                })?;

                Ok(Self::Syslog(syslog::BasicLogger::new(logger)))
            }

            #[cfg(not(unix))]
            LogTarget::Syslog => Err(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "syslog is only available on UNIX systems",
            )),
        }
    }

    /// Whether this matches a configured logging target.
    pub fn matches(&self, config: &LogTarget) -> bool {
        match (self, config) {
            (Self::File { path: l, .. }, LogTarget::File(r)) => l == r,
            #[cfg(unix)]
            (Self::Syslog(_), LogTarget::Syslog) => true,
            _ => false,
        }
    }
}

impl log::Log for PrimaryLogger {
    fn enabled(&self, _metadata: &log::Metadata<'_>) -> bool {
        true
    }

    fn log(&self, record: &log::Record<'_>) {
        match self {
            PrimaryLogger::File { file, .. } => {
                let now = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
                let value = format!(
                    "[{now}] {} {}: {}\n",
                    record.level(),
                    record.target(),
                    record.args()
                );
                let mut file: &std::fs::File = file;
                let _ = file.write_all(value.as_bytes());
            }
            #[cfg(unix)]
            PrimaryLogger::Syslog(logger) => logger.log(record),
        }
    }

    fn flush(&self) {
        match self {
            PrimaryLogger::File { file, .. } => {
                let mut file: &std::fs::File = file;
                let _ = file.flush();
            }

            #[cfg(unix)]
            PrimaryLogger::Syslog(logger) => logger.flush(),
        }
    }
}

//------------------------------------------------------------------------------

/// A prepared change to the [`Logger`].
pub struct PreparedChange {
    /// The primary logger, if changed.
    primary: Option<PrimaryLogger>,

    /// The log level filter.
    level: log::LevelFilter,
}

impl From<LogLevel> for log::LevelFilter {
    fn from(value: LogLevel) -> Self {
        match value {
            LogLevel::Trace => log::LevelFilter::Trace,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Warning => log::LevelFilter::Warn,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Critical => log::LevelFilter::Error,
        }
    }
}

//----------- ExitError --------------------------------------------------------

/// A fatal error that has already been logged.
///
/// The process should exit with a failure code.
#[derive(Clone, Copy, Debug)]
pub struct ExitError;

//============ Tests ===========================================================

#[cfg(test)]
mod tests {
    use log::Log;

    use crate::config::{LogLevel, LogTarget, LoggingConfig, SettingSource};

    use super::Logger;

    #[test]
    fn logs_to_file() {
        let path = std::env::temp_dir().join(format!("zonemirror-log-{}.log", std::process::id()));
        let path = camino::Utf8PathBuf::try_from(path).unwrap();
        let _ = std::fs::remove_file(&path);

        let mut config = LoggingConfig::default();
        config
            .target
            .merge_value(Some(LogTarget::File(path.as_path().into())), SettingSource::File);
        config
            .level
            .merge_value(Some(LogLevel::Warning), SettingSource::File);

        let logger = Logger::new();
        let change = logger.prepare(&config).unwrap().unwrap();
        logger.apply(change);

        // Applying the same configuration again changes nothing.
        assert!(logger.prepare(&config).unwrap().is_none());

        logger.log(
            &log::Record::builder()
                .args(format_args!("zone 'example.org' expired"))
                .level(log::Level::Warn)
                .target("zonemirror::loader")
                .build(),
        );
        logger.log(
            &log::Record::builder()
                .args(format_args!("not shown"))
                .level(log::Level::Info)
                .target("zonemirror::loader")
                .build(),
        );
        logger.flush();

        let text = std::fs::read_to_string(&path).unwrap();
        let _ = std::fs::remove_file(&path);
        assert!(text.contains("WARN zonemirror::loader: zone 'example.org' expired"));
        assert!(!text.contains("not shown"));
    }
}
