//! il-cli: Command-line interface for ilink
//!
//! Provides the `ilink` binary: device listing, lockdown queries, pairing
//! record inspection and local TCP forwarding to device ports.

pub mod commands;
pub mod output;
