//! Configuring zonemirror.
//!
//! As per convention, zonemirror is configured from three sources (from least
//! to most specific): configuration files, environment variables, and
//! command-line arguments.  This module defines and collects together these
//! sources.

use std::{
    fmt,
    hash::{Hash, Hasher},
    io,
    net::SocketAddr,
    time::Duration,
};

use camino::Utf8Path;

use crate::{
    loader::refresh::RefreshTiming,
    zone::{LoaderSettings, ZoneConfig},
};

pub mod args;
pub mod env;
pub mod file;

//----------- Config -----------------------------------------------------------

/// Configuration for zonemirror.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Config {
    /// Daemon-related configuration.
    pub daemon: DaemonConfig,

    /// The configuration of the zone loader.
    pub loader: LoaderConfig,

    /// The configuration of the zone server.
    pub server: ServerConfig,

    /// The zones to serve.
    pub zones: Vec<ZoneConfig>,
}

//--- Initialization

impl Config {
    /// Set up a [`clap::Command`] with config-related arguments.
    pub fn setup_cli(cmd: clap::Command) -> clap::Command {
        args::ArgsSpec::setup(cmd)
    }

    /// Initialize zonemirror's configuration.
    ///
    /// Environment variables and command-line arguments are processed, and
    /// the configuration file they point to is loaded.  A missing file is
    /// only tolerated at its default location.
    pub fn init(cli_matches: &clap::ArgMatches) -> Result<Self, ConfigError> {
        // Process environment variables and command-line arguments.
        let env = env::EnvSpec::process()?;
        let args = args::ArgsSpec::process(cli_matches);

        // Find the configuration file.
        let mut this = Self::default();
        env.clone().merge(&mut this);
        args.clone().merge(&mut this);
        let config_file = this.daemon.config_file.clone();

        // Load it, and let the environment and arguments override it.
        let mut this = match Self::load(config_file.clone()) {
            Ok(this) => this,
            Err(ConfigError::File {
                error: file::FileError::Load(error),
                ..
            }) if error.kind() == io::ErrorKind::NotFound
                && config_file.setting() == SettingSource::Default =>
            {
                this
            }
            Err(error) => return Err(error),
        };
        env.merge(&mut this);
        args.merge(&mut this);

        Ok(this)
    }

    /// Load the configuration file.
    ///
    /// Only settings from the file and defaults are filled in.
    pub fn load(config_file: Setting<Box<Utf8Path>>) -> Result<Self, ConfigError> {
        let path = config_file.value().clone();
        file::FileSpec::load(&path)
            .and_then(|spec| spec.build(config_file))
            .map_err(|error| ConfigError::File { path, error })
    }

    /// Reload the configuration file.
    ///
    /// Settings from environment variables and command-line arguments are
    /// carried over from `self`.
    pub fn reload(&self) -> Result<Self, ConfigError> {
        let mut this = Self::load(self.daemon.config_file.clone())?;
        let (new, old) = (&mut this.daemon.logging, &self.daemon.logging);
        new.level.inherit(&old.level);
        new.target.inherit(&old.target);
        Ok(this)
    }
}

//----------- DaemonConfig -----------------------------------------------------

/// Daemon-related configuration for zonemirror.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DaemonConfig {
    /// Logging configuration.
    pub logging: LoggingConfig,

    /// The location of the configuration file.
    pub config_file: Setting<Box<Utf8Path>>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            config_file: Setting::new("/etc/zonemirror/config.toml".into()),
        }
    }
}

//----------- LoggingConfig ----------------------------------------------------

/// Logging configuration for zonemirror.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoggingConfig {
    /// The minimum severity of messages to log.
    pub level: Setting<LogLevel>,

    /// Where to log messages to.
    pub target: Setting<LogTarget>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Setting::new(LogLevel::Info),
            target: Setting::new(LogTarget::File("/dev/stdout".into())),
        }
    }
}

//----------- LoaderConfig -----------------------------------------------------

/// Configuration for the zone loader.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoaderConfig {
    /// How long to wait for a single response from an upstream server.
    pub query_timeout: Duration,

    /// How long a complete zone transfer may take.
    pub transfer_timeout: Duration,

    /// Timing parameters for zone refreshes.
    pub refresh: RefreshTiming,

    /// Defaults for the loader settings of every zone.
    pub defaults: LoaderSettings,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            query_timeout: Duration::from_secs(5),
            transfer_timeout: Duration::from_secs(300),
            refresh: RefreshTiming::default(),
            defaults: LoaderSettings::default(),
        }
    }
}

//----------- ServerConfig -----------------------------------------------------

/// Configuration for the zone server.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServerConfig {
    /// Where to serve zones.
    pub servers: Vec<SocketConfig>,
}

//----------- SocketConfig -----------------------------------------------------

/// Configuration for serving / listening on a network socket.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SocketConfig {
    /// Listen exclusively over UDP.
    UDP {
        /// The socket address to listen on.
        addr: SocketAddr,
    },

    /// Listen exclusively over TCP.
    TCP {
        /// The socket address to listen on.
        addr: SocketAddr,
    },

    /// Listen over both TCP and UDP.
    TCPUDP {
        /// The socket address to listen on.
        addr: SocketAddr,
    },
}

impl SocketConfig {
    /// The socket address to listen on.
    pub fn addr(&self) -> SocketAddr {
        match *self {
            Self::UDP { addr } | Self::TCP { addr } | Self::TCPUDP { addr } => addr,
        }
    }

    /// Whether to listen over UDP.
    pub fn udp(&self) -> bool {
        matches!(self, Self::UDP { .. } | Self::TCPUDP { .. })
    }

    /// Whether to listen over TCP.
    pub fn tcp(&self) -> bool {
        matches!(self, Self::TCP { .. } | Self::TCPUDP { .. })
    }
}

//----------- LogLevel ---------------------------------------------------------

/// A severity level for logging.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    /// A function or variable was interacted with, for debugging.
    Trace,

    /// Something occurred that may be relevant to debugging.
    Debug,

    /// Things are proceeding as expected.
    Info,

    /// Something does not appear to be correct.
    Warning,

    /// Something is wrong (but zonemirror can recover).
    Error,

    /// Something is wrong and zonemirror can't function at all.
    Critical,
}

impl LogLevel {
    /// Represent a [`LogLevel`] as a string.
    pub const fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
            LogLevel::Critical => "critical",
        }
    }

    /// Parse a [`LogLevel`] from a string.
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "trace" => LogLevel::Trace,
            "debug" => LogLevel::Debug,
            "info" => LogLevel::Info,
            "warning" => LogLevel::Warning,
            "error" => LogLevel::Error,
            "critical" => LogLevel::Critical,
            _ => return None,
        })
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

//----------- LogTarget --------------------------------------------------------

/// A logging target.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogTarget {
    /// Append logs to a file.
    ///
    /// Use `/dev/stdout` or `/dev/stderr` to log to the terminal.
    File(Box<Utf8Path>),

    /// Write logs to the UNIX syslog.
    Syslog,
}

impl LogTarget {
    /// Parse a [`LogTarget`] from a string.
    ///
    /// Accepts `stdout`, `stderr`, `syslog`, and `file:<PATH>`.
    pub fn parse(s: &str) -> Option<Self> {
        if s == "stdout" {
            Some(Self::File("/dev/stdout".into()))
        } else if s == "stderr" {
            Some(Self::File("/dev/stderr".into()))
        } else if let Some(path) = s.strip_prefix("file:") {
            Some(Self::File(<&Utf8Path>::from(path).into()))
        } else if s == "syslog" {
            Some(Self::Syslog)
        } else {
            None
        }
    }
}

//----------- Setting ----------------------------------------------------------

/// A configured setting.
#[derive(Debug, Default, Clone, Copy)]
pub struct Setting<T> {
    /// The default for the value.
    pub default: T,

    /// The setting in the configuration file, if any.
    pub file: Option<T>,

    /// The setting from environment variables, if any.
    pub env: Option<T>,

    /// The setting from command-line arguments, if any.
    pub args: Option<T>,
}

impl<T> Setting<T> {
    /// Construct a new [`Setting`].
    pub const fn new(default: T) -> Self {
        Self {
            default,
            file: None,
            env: None,
            args: None,
        }
    }

    /// The current value.
    pub const fn value(&self) -> &T {
        // This is a 'const' implementation of:
        //
        // self.args.as_ref()
        //     .or(self.env.as_ref())
        //     .or(self.file.as_ref())
        //     .unwrap_or(&self.default)

        match self {
            Self {
                args: Some(value), ..
            }
            | Self {
                env: Some(value), ..
            }
            | Self {
                file: Some(value), ..
            }
            | Self { default: value, .. } => value,
        }
    }

    /// The source of the current value.
    pub const fn setting(&self) -> SettingSource {
        match self {
            Self { args: Some(_), .. } => SettingSource::Args,
            Self { env: Some(_), .. } => SettingSource::Env,
            Self { file: Some(_), .. } => SettingSource::File,
            Self { default: _, .. } => SettingSource::Default,
        }
    }

    /// Set the value from a particular source, if one was given.
    pub fn merge_value(&mut self, value: Option<T>, source: SettingSource) {
        let Some(value) = value else { return };
        match source {
            SettingSource::Default => self.default = value,
            SettingSource::File => self.file = Some(value),
            SettingSource::Env => self.env = Some(value),
            SettingSource::Args => self.args = Some(value),
        }
    }
}

impl<T: Clone> Setting<T> {
    /// Take over the values from the environment and arguments of another.
    pub fn inherit(&mut self, other: &Self) {
        self.env.clone_from(&other.env);
        self.args.clone_from(&other.args);
    }
}

impl<T: PartialEq> PartialEq for Setting<T> {
    fn eq(&self, other: &Self) -> bool {
        self.value() == other.value()
    }
}

impl<T: Eq> Eq for Setting<T> {}

impl<T: Hash> Hash for Setting<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.value().hash(state)
    }
}

//----------- SettingSource ----------------------------------------------------

/// The source of a configured setting.
///
/// There are four possible sources for a setting.  Each source has a designated
/// priority, with which it can override settings from other sources.  They are
/// enumerated here from lowest to highest priority.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SettingSource {
    /// A default.
    Default,

    /// The configuration file.
    File,

    /// Environment variables.
    Env,

    /// Command-line arguments.
    Args,
}

//----------- ConfigError ------------------------------------------------------

/// An error in configuring zonemirror.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// An error occurred regarding environment variables.
    Env(env::EnvError),

    /// An error occurred regarding the configuration file.
    File {
        /// The location of the config file.
        path: Box<Utf8Path>,

        /// The error that occurred.
        error: file::FileError,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Env(error) => error.fmt(f),
            ConfigError::File {
                error: file::FileError::Load(error),
                path,
            } => {
                write!(f, "could not load the config file '{path}': {error}")
            }
            ConfigError::File {
                error: file::FileError::Parse(error),
                path,
            } => {
                write!(f, "could not parse the config file '{path}': {error}")
            }
            ConfigError::File {
                error: file::FileError::Zone(error),
                path,
            } => {
                write!(f, "invalid zone in the config file '{path}': {error}")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Env(error) => Some(error),
            ConfigError::File { error, .. } => Some(error),
        }
    }
}

impl From<env::EnvError> for ConfigError {
    fn from(value: env::EnvError) -> Self {
        Self::Env(value)
    }
}

//============ Tests ===========================================================
