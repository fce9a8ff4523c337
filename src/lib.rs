//! zonemirror: a secondary DNS server.
//!
//! Zones are transferred from their upstream (primary) servers with AXFR and
//! IXFR, kept up to date following the timers in their SOA records and the
//! NOTIFY messages of the primaries, and served from in-memory snapshots.

pub mod answer;
pub mod center;
pub mod config;
pub mod loader;
pub mod log;
pub mod net;
pub mod serial;
pub mod zone;

#[cfg(test)]
mod tests;
