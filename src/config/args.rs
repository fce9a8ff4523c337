//! Configuration from command-line arguments.

use camino::{Utf8Path, Utf8PathBuf};
use clap::{
    builder::{EnumValueParser, PathBufValueParser, PossibleValue, TypedValueParser, ValueParser},
    Arg, ArgMatches, Command, ValueEnum, ValueHint,
};

use super::{Config, LogLevel, LogTarget, SettingSource};

//----------- ArgsSpec ---------------------------------------------------------

/// Configuration-related command-line arguments.
#[derive(Clone, Debug)]
pub struct ArgsSpec {
    /// The configuration file to load.
    pub config: Option<Box<Utf8Path>>,

    /// The minimum severity of messages to log.
    pub log_level: Option<LogLevel>,

    /// The target of log messages.
    pub log_target: Option<LogTarget>,
}

impl ArgsSpec {
    /// Set up a [`clap::Command`] with config-related arguments.
    pub fn setup(cmd: Command) -> Command {
        cmd.args([
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("PATH")
                .value_parser(ValueParser::new(
                    PathBufValueParser::new().try_map(Utf8PathBuf::try_from),
                ))
                .value_hint(ValueHint::FilePath)
                .help("The configuration file to load"),
            Arg::new("log_level")
                .long("log-level")
                .value_name("LEVEL")
                .value_parser(EnumValueParser::<LogLevel>::new())
                .help("The minimum severity of messages to log"),
            Arg::new("log_target")
                .short('l')
                .long("log")
                .value_name("TARGET")
                .value_parser(ValueParser::new(LogTargetParser))
                .help("Where logs should be written to"),
        ])
    }

    /// Process parsed command-line arguments.
    pub fn process(matches: &ArgMatches) -> Self {
        Self {
            config: matches
                .get_one::<Utf8PathBuf>("config")
                .map(|p| p.as_path().into()),
            log_level: matches.get_one::<LogLevel>("log_level").copied(),
            log_target: matches.get_one::<LogTarget>("log_target").cloned(),
        }
    }

    /// Merge this into a [`Config`].
    pub fn merge(self, config: &mut Config) {
        let daemon = &mut config.daemon;
        let source = SettingSource::Args;
        daemon.logging.level.merge_value(self.log_level, source);
        daemon.logging.target.merge_value(self.log_target, source);
        daemon.config_file.merge_value(self.config, source);
    }
}

//----------- LogTargetParser --------------------------------------------------

/// Parsing a [`LogTarget`] from a command-line argument.
#[derive(Clone, Debug, Default)]
pub struct LogTargetParser;

const LOG_TARGETS: [&str; 4] = ["stdout", "stderr", "file:<PATH>", "syslog"];

impl TypedValueParser for LogTargetParser {
    type Value = LogTarget;

    fn parse_ref(
        &self,
        cmd: &clap::Command,
        arg: Option<&clap::Arg>,
        value: &std::ffi::OsStr,
    ) -> Result<Self::Value, clap::Error> {
        // NOTE: Clap's own value parser types use 'Error::invalid_value()' to
        // produce the appropriate parsing errors, but this is not a publicly
        // visible function.  To work around this, we delegate to one of those
        // value parsers on error.

        let s = clap::builder::StringValueParser::default().parse_ref(cmd, arg, value)?;
        LogTarget::parse(&s).ok_or_else(|| {
            let parser = clap::builder::PossibleValuesParser::new(LOG_TARGETS);
            match parser.parse_ref(cmd, arg, value) {
                Err(err) => err,
                Ok(_) => clap::Error::new(clap::error::ErrorKind::InvalidValue),
            }
        })
    }

    fn possible_values(&self) -> Option<Box<dyn Iterator<Item = PossibleValue> + '_>> {
        Some(Box::new(LOG_TARGETS.into_iter().map(PossibleValue::new)))
    }
}

//------------------------------------------------------------------------------

impl ValueEnum for LogLevel {
    fn value_variants<'a>() -> &'a [Self] {
        &[
            LogLevel::Trace,
            LogLevel::Debug,
            LogLevel::Info,
            LogLevel::Warning,
            LogLevel::Error,
            LogLevel::Critical,
        ]
    }

    fn to_possible_value(&self) -> Option<PossibleValue> {
        Some(PossibleValue::new(self.as_str()))
    }
}

//============ Tests ===========================================================
