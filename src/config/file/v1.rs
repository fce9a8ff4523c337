//! Version 1 of the configuration file.

use std::{collections::HashMap, fmt, net::SocketAddr, str::FromStr, time::Duration};

use camino::Utf8Path;
use serde::Deserialize;

use crate::{
    config::{
        Config, DaemonConfig, LoaderConfig, LogLevel, LogTarget, LoggingConfig, ServerConfig,
        Setting, SettingSource, SocketConfig,
    },
    loader::refresh::RefreshTiming,
    zone::{LoaderSettings, XfrStrategy, ZoneConfig},
};

use super::FileError;

//----------- Spec -------------------------------------------------------------

/// A configuration file.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
pub struct Spec {
    /// Configuring the zonemirror daemon.
    pub daemon: DaemonSpec,

    /// Configuring how zones are loaded.
    pub loader: LoaderSpec,

    /// Configuring zone serving.
    pub server: ServerSpec,

    /// The zones to serve, by name.
    pub zones: HashMap<Box<str>, ZoneSpec>,
}

//--- Conversion

impl Spec {
    /// Build the internal configuration.
    pub fn build(self, config_file: Setting<Box<Utf8Path>>) -> Result<Config, FileError> {
        let loader = self.loader.build();
        let mut zones = self
            .zones
            .into_iter()
            .map(|(name, zone)| zone.build(&name, &loader.defaults))
            .collect::<Result<Vec<_>, _>>()?;
        zones.sort_by(|l, r| l.name.cmp(&r.name));
        Ok(Config {
            daemon: self.daemon.build(config_file),
            loader,
            server: self.server.build(),
            zones,
        })
    }
}

//----------- DaemonSpec -------------------------------------------------------

/// Configuring the zonemirror daemon.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
pub struct DaemonSpec {
    /// The minimum severity of messages to log.
    pub log_level: Option<LogLevelSpec>,

    /// The location logs are written to.
    pub log_target: Option<LogTargetSpec>,
}

//--- Conversion

impl DaemonSpec {
    /// Build the internal configuration.
    pub fn build(self, config_file: Setting<Box<Utf8Path>>) -> DaemonConfig {
        let mut logging = LoggingConfig::default();
        logging
            .level
            .merge_value(self.log_level.map(|l| l.build()), SettingSource::File);
        logging
            .target
            .merge_value(self.log_target.map(|t| t.0), SettingSource::File);
        DaemonConfig {
            logging,
            config_file,
        }
    }
}

//----------- LogLevelSpec -----------------------------------------------------

/// A severity level for logging.
#[derive(Copy, Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LogLevelSpec {
    /// A function or variable was interacted with, for debugging.
    Trace,

    /// Something occurred that may be relevant to debugging.
    Debug,

    /// Things are proceeding as expected.
    Info,

    /// Something does not appear to be correct.
    Warning,

    /// Something went wrong (but zonemirror can recover).
    Error,

    /// Something went wrong and zonemirror can't function at all.
    Critical,
}

//--- Conversion

impl LogLevelSpec {
    /// Build the internal configuration.
    pub fn build(self) -> LogLevel {
        match self {
            Self::Trace => LogLevel::Trace,
            Self::Debug => LogLevel::Debug,
            Self::Info => LogLevel::Info,
            Self::Warning => LogLevel::Warning,
            Self::Error => LogLevel::Error,
            Self::Critical => LogLevel::Critical,
        }
    }
}

//----------- LogTargetSpec ----------------------------------------------------

/// A logging target, as `stdout`, `stderr`, `syslog` or `file:<PATH>`.
#[derive(Clone, Debug)]
pub struct LogTargetSpec(LogTarget);

impl<'de> Deserialize<'de> for LogTargetSpec {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        LogTarget::parse(&s)
            .map(Self)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid log target {s:?}")))
    }
}

//----------- LoaderSpec -------------------------------------------------------

/// Configuring how zones are loaded.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
pub struct LoaderSpec {
    /// Seconds to wait for a single response from an upstream server.
    pub query_timeout: u64,

    /// Seconds a complete zone transfer may take.
    pub transfer_timeout: u64,

    /// Milliseconds to wait before retrying the first transfer of a zone.
    pub initial_backoff_ms: u64,

    /// The longest wait, in milliseconds, between attempts at a first
    /// transfer.
    pub max_backoff_ms: u64,

    /// The shortest refresh or retry interval, in milliseconds.
    pub min_interval_ms: u64,

    /// The largest random delay, in milliseconds, added to refresh intervals.
    pub refresh_jitter_ms: u64,

    /// The largest random delay, in milliseconds, added to retry intervals.
    pub retry_jitter_ms: u64,

    /// How zones are transferred, unless configured per zone.
    pub xfr: XfrStrategySpec,

    /// Whether NOTIFY messages must come from the configured upstream port.
    pub notify_match_port: bool,
}

impl Default for LoaderSpec {
    fn default() -> Self {
        let config = LoaderConfig::default();
        let timing = config.refresh;
        Self {
            query_timeout: config.query_timeout.as_secs(),
            transfer_timeout: config.transfer_timeout.as_secs(),
            initial_backoff_ms: millis(timing.initial_backoff),
            max_backoff_ms: millis(timing.max_backoff),
            min_interval_ms: millis(timing.min_interval),
            refresh_jitter_ms: millis(timing.refresh_jitter),
            retry_jitter_ms: millis(timing.retry_jitter),
            xfr: XfrStrategySpec(config.defaults.xfr),
            notify_match_port: config.defaults.notify_match_port,
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

//--- Conversion

impl LoaderSpec {
    /// Build the internal configuration.
    pub fn build(self) -> LoaderConfig {
        LoaderConfig {
            query_timeout: Duration::from_secs(self.query_timeout),
            transfer_timeout: Duration::from_secs(self.transfer_timeout),
            refresh: RefreshTiming {
                initial_backoff: Duration::from_millis(self.initial_backoff_ms),
                max_backoff: Duration::from_millis(self.max_backoff_ms),
                min_interval: Duration::from_millis(self.min_interval_ms),
                refresh_jitter: Duration::from_millis(self.refresh_jitter_ms),
                retry_jitter: Duration::from_millis(self.retry_jitter_ms),
            },
            defaults: LoaderSettings {
                xfr: self.xfr.0,
                notify_match_port: self.notify_match_port,
            },
        }
    }
}

//----------- XfrStrategySpec --------------------------------------------------

/// How to transfer a zone, as `ixfr` or `axfr`.
#[derive(Copy, Clone, Debug)]
pub struct XfrStrategySpec(XfrStrategy);

impl<'de> Deserialize<'de> for XfrStrategySpec {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map(Self).map_err(serde::de::Error::custom)
    }
}

//----------- ServerSpec -------------------------------------------------------

/// Configuring how zones are published.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
pub struct ServerSpec {
    /// Where to serve zones.
    pub servers: Vec<SocketSpec>,
}

//--- Conversion

impl ServerSpec {
    /// Build the internal configuration.
    pub fn build(self) -> ServerConfig {
        ServerConfig {
            servers: self.servers.into_iter().map(|s| s.build()).collect(),
        }
    }
}

//----------- ZoneSpec ---------------------------------------------------------

/// Configuring a secondary zone.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ZoneSpec {
    /// The upstream servers, as `ip` or `ip:port`.
    pub transfer_from: Vec<Box<str>>,

    /// How the zone is transferred.
    #[serde(default)]
    pub xfr: Option<XfrStrategySpec>,

    /// Whether NOTIFY messages must come from the configured upstream port.
    #[serde(default)]
    pub notify_match_port: Option<bool>,
}

//--- Conversion

impl ZoneSpec {
    /// Build the internal configuration.
    pub fn build(self, name: &str, defaults: &LoaderSettings) -> Result<ZoneConfig, FileError> {
        let loader = LoaderSettings {
            xfr: self.xfr.map_or(defaults.xfr, |x| x.0),
            notify_match_port: self
                .notify_match_port
                .unwrap_or(defaults.notify_match_port),
        };
        let peers = self.transfer_from.iter().map(|p| &**p);
        Ok(ZoneConfig::parse(name, peers, loader)?)
    }
}

//----------- SocketSpec -------------------------------------------------------

/// Configuration for serving / listening on a network socket.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged, expecting = "a URI string or an inline table")]
pub enum SocketSpec {
    /// A simple socket specification.
    Simple(SimpleSocketSpec),

    /// A complex socket specification.
    Complex(ComplexSocketSpec),
}

/// A simple [`SocketSpec`] as a string.
#[derive(Clone, Debug)]
pub enum SimpleSocketSpec {
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

/// A complex [`SocketSpec`] as a table.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, tag = "type")]
pub enum ComplexSocketSpec {
    /// Listen exclusively over UDP.
    #[serde(rename = "udp")]
    UDP {
        /// The socket address to listen on.
        addr: SocketAddr,
    },

    /// Listen exclusively over TCP.
    #[serde(rename = "tcp")]
    TCP {
        /// The socket address to listen on.
        addr: SocketAddr,
    },

    /// Listen over both TCP and UDP.
    #[serde(rename = "tcp-udp")]
    TCPUDP {
        /// The socket address to listen on.
        addr: SocketAddr,
    },
}

//--- Deserialization

impl FromStr for SimpleSocketSpec {
    type Err = ParseSimpleSocketSpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((protocol, address)) = s.split_once("://") else {
            // Default to TCP+UDP.
            return Ok(Self::TCPUDP { addr: s.parse()? });
        };

        match protocol {
            "udp" => Ok(Self::UDP {
                addr: address.parse()?,
            }),
            "tcp" => Ok(Self::TCP {
                addr: address.parse()?,
            }),
            _ => Err(ParseSimpleSocketSpecError::UnknownProtocol {
                protocol: protocol.into(),
            }),
        }
    }
}

impl<'de> Deserialize<'de> for SimpleSocketSpec {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

//--- Conversion

impl SocketSpec {
    /// Build the internal configuration.
    pub fn build(self) -> SocketConfig {
        match self {
            SocketSpec::Simple(spec) => spec.build(),
            SocketSpec::Complex(spec) => spec.build(),
        }
    }
}

impl SimpleSocketSpec {
    /// Build the internal configuration.
    pub fn build(self) -> SocketConfig {
        match self {
            Self::UDP { addr } => SocketConfig::UDP { addr },
            Self::TCP { addr } => SocketConfig::TCP { addr },
            Self::TCPUDP { addr } => SocketConfig::TCPUDP { addr },
        }
    }
}

impl ComplexSocketSpec {
    /// Build the internal configuration.
    pub fn build(self) -> SocketConfig {
        match self {
            Self::UDP { addr } => SocketConfig::UDP { addr },
            Self::TCP { addr } => SocketConfig::TCP { addr },
            Self::TCPUDP { addr } => SocketConfig::TCPUDP { addr },
        }
    }
}

//----------- ParseSimpleSocketSpecError ---------------------------------------

/// An error in parsing a [`SocketSpec`] URI string.
#[derive(Clone, Debug)]
pub enum ParseSimpleSocketSpecError {
    /// An unrecognized protocol was specified.
    UnknownProtocol {
        /// The specified protocol value.
        protocol: Box<str>,
    },

    /// The address could not be parsed.
    Address(std::net::AddrParseError),
}

impl fmt::Display for ParseSimpleSocketSpecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownProtocol { protocol } => {
                write!(f, "unrecognized protocol {protocol:?}")
            }
            Self::Address(error) => error.fmt(f),
        }
    }
}

impl From<std::net::AddrParseError> for ParseSimpleSocketSpecError {
    fn from(value: std::net::AddrParseError) -> Self {
        Self::Address(value)
    }
}

//============ Tests ===========================================================

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use camino::Utf8Path;

    use crate::{
        config::{file::FileSpec, LogLevel, LogTarget, Setting, SettingSource, SocketConfig},
        zone::{snapshot::tests::name, XfrStrategy},
    };

    fn config_file() -> Setting<Box<Utf8Path>> {
        Setting::new("/etc/zonemirror/config.toml".into())
    }

    #[test]
    fn full_file() {
        let spec = FileSpec::parse(
            r#"
            version = "v1"

            [daemon]
            log-level = "debug"
            log-target = "file:/var/log/zonemirror.log"

            [loader]
            query-timeout = 2
            xfr = "axfr"

            [server]
            servers = ["127.0.0.1:53", "udp://[::1]:5353", { type = "tcp", addr = "0.0.0.0:53" }]

            [zones."example.org."]
            transfer-from = ["10.240.0.1", "10.240.0.2:5353"]

            [zones."example.com."]
            transfer-from = ["[2001:db8::1]"]
            xfr = "ixfr"
            notify-match-port = true
            "#,
        )
        .unwrap();
        let config = spec.build(config_file()).unwrap();

        let logging = &config.daemon.logging;
        assert_eq!(*logging.level.value(), LogLevel::Debug);
        assert_eq!(logging.level.setting(), SettingSource::File);
        assert_eq!(
            *logging.target.value(),
            LogTarget::File("/var/log/zonemirror.log".into())
        );

        assert_eq!(config.loader.query_timeout, Duration::from_secs(2));
        assert_eq!(config.loader.transfer_timeout, Duration::from_secs(300));
        assert_eq!(config.loader.refresh.initial_backoff, Duration::from_millis(250));

        assert_eq!(
            config.server.servers,
            [
                SocketConfig::TCPUDP {
                    addr: "127.0.0.1:53".parse().unwrap()
                },
                SocketConfig::UDP {
                    addr: "[::1]:5353".parse().unwrap()
                },
                SocketConfig::TCP {
                    addr: "0.0.0.0:53".parse().unwrap()
                },
            ]
        );

        let [com, org] = &config.zones[..] else {
            panic!("expected two zones");
        };
        assert_eq!(org.name, name("example.org."));
        assert_eq!(org.peers.len(), 2);
        assert_eq!(org.loader.xfr, XfrStrategy::Axfr);
        assert!(!org.loader.notify_match_port);
        assert_eq!(com.name, name("example.com."));
        assert_eq!(com.loader.xfr, XfrStrategy::IxfrWithAxfrFallback);
        assert!(com.loader.notify_match_port);
    }

    #[test]
    fn minimal_file() {
        let spec = FileSpec::parse("version = \"v1\"").unwrap();
        let config = spec.build(config_file()).unwrap();
        assert!(config.zones.is_empty());
        assert_eq!(config.daemon.logging.level.setting(), SettingSource::Default);
    }

    #[test]
    fn reject_unknown_fields() {
        assert!(FileSpec::parse("version = \"v1\"\n[daemon]\nlog-colour = true").is_err());
        assert!(FileSpec::parse("version = \"v2\"").is_err());
    }

    #[test]
    fn reject_bad_zones() {
        let spec = FileSpec::parse(
            r#"
            version = "v1"
            [zones."example.org."]
            transfer-from = []
            "#,
        )
        .unwrap();
        assert!(spec.build(config_file()).is_err());

        let spec = FileSpec::parse(
            r#"
            version = "v1"
            [zones."example.org."]
            transfer-from = ["primary.example.net"]
            "#,
        )
        .unwrap();
        assert!(spec.build(config_file()).is_err());
    }
}
