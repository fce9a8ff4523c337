//! Networking abstractions.
//!
//! This module contains types for receiving DNS messages over the network
//! and answering them.

pub mod server;
