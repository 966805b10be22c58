#![cfg_attr(docsrs, feature(doc_cfg))]
//! # jbdbms_lib
//!
//! This crate provides a driver for the UART protocol of JBD ("Overkill Solar")
//! BMS (Battery Management System) devices.
//!
//! The driver is cooperative and single threaded: the host application calls
//! [`bms::Bms::poll`] from its main loop, the driver issues periodic queries,
//! reassembles the replies from the byte stream and keeps the last known
//! telemetry available through getters.
//!
//! ## Features
//!
//! - `default`: Enables `bin-dependencies`, which is intended for compiling the `jbdbms` command-line tool.
//!
//! ### Client Features
//! - `serialport`: Enables a [`transport::Transport`] over a local serial port using the `serialport` crate.
//!
//! ### Utility Features
//! - `protocol_serde`: Enables `serde` support for the configuration and decoded data structures.
//! - `bin-dependencies`: Enables all features required by the `jbdbms` binary executable.

/// Contains error types for the library.
mod error;

pub mod bms;
pub mod config;
pub mod framer;
/// Defines the communication protocol of the BMS.
pub mod protocol;
pub mod state;
pub mod transport;

pub use bms::Bms;
pub use config::{Config, Options};
pub use error::{Error, Result};

/// Serial port transport for BMS communication.
#[cfg_attr(docsrs, doc(cfg(feature = "serialport")))]
#[cfg(feature = "serialport")]
pub mod serialport;
