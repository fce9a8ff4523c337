//! Zone-specific loader settings.

use std::{fmt, str::FromStr};

//----------- LoaderSettings ---------------------------------------------------

/// How a zone is kept in sync with its upstream servers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoaderSettings {
    /// Which kinds of zone transfer to request.
    pub xfr: XfrStrategy,

    /// Whether NOTIFY messages must come from the exact configured port.
    ///
    /// By default only the source IP address is checked, since servers
    /// usually send NOTIFY messages from an ephemeral port.
    pub notify_match_port: bool,
}

//----------- XfrStrategy ------------------------------------------------------

/// The kinds of zone transfer to request from upstream servers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum XfrStrategy {
    /// Request an IXFR once a version of the zone is held.
    ///
    /// If the server refuses the IXFR or does not implement it, an AXFR is
    /// requested from the same server instead.
    #[default]
    IxfrWithAxfrFallback,

    /// Always request a full AXFR.
    Axfr,
}

impl XfrStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IxfrWithAxfrFallback => "ixfr",
            Self::Axfr => "axfr",
        }
    }

    /// Whether incremental transfers may be requested.
    pub fn allows_ixfr(&self) -> bool {
        matches!(self, Self::IxfrWithAxfrFallback)
    }
}

impl FromStr for XfrStrategy {
    type Err = ParseXfrStrategyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ixfr" => Ok(Self::IxfrWithAxfrFallback),
            "axfr" => Ok(Self::Axfr),
            _ => Err(ParseXfrStrategyError),
        }
    }
}

impl fmt::Display for XfrStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

//----------- ParseXfrStrategyError --------------------------------------------

/// An invalid [`XfrStrategy`] was specified.
#[derive(Clone, Debug)]
pub struct ParseXfrStrategyError;

impl std::error::Error for ParseXfrStrategyError {}

impl fmt::Display for ParseXfrStrategyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("the transfer kind must be 'ixfr' or 'axfr'")
    }
}
