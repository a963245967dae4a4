//! Host side driver for the VEX V5 serial protocol.
//!
//! [`connection::Connection`] talks to a brain or controller over a
//! [`io::SerialBackend`], matching replies to requests. [`device::V5Device`]
//! builds file transfers and the usual brain operations on top of it.

pub mod checks;
pub mod commands;
pub mod config;
pub mod connection;
pub mod cursor;
pub mod device;
pub mod errors;
pub mod io;
pub mod ports;
pub mod responses;
pub mod v5;
pub mod version;
