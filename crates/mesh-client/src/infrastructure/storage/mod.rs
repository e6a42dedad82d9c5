//! Storage infrastructure: configuration file persistence.
//!
//! The `config` sub-module reads the TOML configuration file from the
//! platform-appropriate directory (or an explicit path), writes it back, and
//! turns it into the runtime settings used by the network layer.  A missing
//! file or missing keys fall back to defaults.

pub mod config;
