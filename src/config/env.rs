//! Configuration from environment variables.

use std::fmt;

use camino::{Utf8Path, Utf8PathBuf};

use super::{Config, LogLevel, LogTarget, SettingSource};

//----------- EnvSpec ----------------------------------------------------------

/// Configuration-related environment variables.
#[derive(Clone, Debug, Default)]
pub struct EnvSpec {
    /// The configuration file to load.
    pub config: Option<Box<Utf8Path>>,

    /// The minimum severity of messages to log.
    pub log_level: Option<LogLevel>,

    /// The target of log messages.
    pub log_target: Option<LogTarget>,
}

impl EnvSpec {
    /// Process environment variables.
    pub fn process() -> Result<Self, EnvError> {
        Self::process_with(|var| std::env::var_os(var))
    }

    /// Process variables from the given source.
    fn process_with(
        source: impl Fn(&'static str) -> Option<std::ffi::OsString>,
    ) -> Result<Self, EnvError> {
        let var = |var: &'static str| -> Result<Option<String>, EnvError> {
            source(var)
                .map(|value| value.into_string().map_err(|_| EnvError::NonUtf8 { var }))
                .transpose()
        };

        let config_path =
            var("ZONEMIRROR_CONFIG_PATH")?.map(|path| Utf8PathBuf::from(path).into_boxed_path());

        let log_level = var("ZONEMIRROR_LOG_LEVEL")?
            .map(|value| {
                LogLevel::parse(&value).ok_or(EnvError::InvalidLogLevel {
                    value: value.into_boxed_str(),
                })
            })
            .transpose()?;

        let log_target = var("ZONEMIRROR_LOG")?
            .map(|value| {
                LogTarget::parse(&value).ok_or(EnvError::InvalidLogTarget {
                    value: value.into_boxed_str(),
                })
            })
            .transpose()?;

        Ok(Self {
            config: config_path,
            log_level,
            log_target,
        })
    }

    /// Merge this into a [`Config`].
    pub fn merge(self, config: &mut Config) {
        let daemon = &mut config.daemon;
        let source = SettingSource::Env;
        daemon.logging.level.merge_value(self.log_level, source);
        daemon.logging.target.merge_value(self.log_target, source);
        daemon.config_file.merge_value(self.config, source);
    }
}

//----------- EnvError ---------------------------------------------------------

/// An error in processing environment variables.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EnvError {
    /// A non-UTF-8 value was specified.
    NonUtf8 {
        /// The name of the offending environment variable.
        var: &'static str,
    },

    /// An invalid log level was specified.
    InvalidLogLevel {
        /// The log level value.
        value: Box<str>,
    },

    /// An invalid log target was specified.
    InvalidLogTarget {
        /// The log target value.
        value: Box<str>,
    },
}

impl fmt::Display for EnvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvError::NonUtf8 { var } => {
                write!(f, "'${var}' was not valid UTF-8")
            }
            EnvError::InvalidLogLevel { value } => {
                write!(
                    f,
                    "'$ZONEMIRROR_LOG_LEVEL' ({value:?}) is not a valid log level"
                )
            }
            EnvError::InvalidLogTarget { value } => {
                write!(
                    f,
                    "'$ZONEMIRROR_LOG' ({value:?}) is not a valid logging target"
                )
            }
        }
    }
}

impl std::error::Error for EnvError {}

//============ Tests ===========================================================

#[cfg(test)]
mod tests {
    use std::ffi::OsString;

    use crate::config::{LogLevel, LogTarget};

    use super::{EnvError, EnvSpec};

    fn process(vars: &[(&str, &str)]) -> Result<EnvSpec, EnvError> {
        EnvSpec::process_with(|var| {
            vars.iter()
                .find(|(name, _)| *name == var)
                .map(|(_, value)| OsString::from(*value))
        })
    }

    #[test]
    fn process_vars() {
        let spec = process(&[
            ("ZONEMIRROR_LOG_LEVEL", "warning"),
            ("ZONEMIRROR_LOG", "stderr"),
        ])
        .unwrap();
        assert_eq!(spec.log_level, Some(LogLevel::Warning));
        assert_eq!(spec.log_target, Some(LogTarget::File("/dev/stderr".into())));
        assert!(spec.config.is_none());
    }

    #[test]
    fn reject_invalid_vars() {
        assert_eq!(
            process(&[("ZONEMIRROR_LOG_LEVEL", "loud")]).unwrap_err(),
            EnvError::InvalidLogLevel {
                value: "loud".into()
            }
        );
        assert!(process(&[("ZONEMIRROR_LOG", "journald")]).is_err());
    }
}
