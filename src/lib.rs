//! # Host side driver of ESP-AT WiFi modules
//!
//! The crate talks to an ESP8266/ESP32 running the AT firmware over a byte link. Commands are sent
//! one at a time by a producer thread, received bytes are decoded by the processor thread (or by
//! the reader thread in [config::InputMode::Direct]) and reported through events.
//!
//! * [Esp]: engine handle with the command API
//! * [Conn]: event driven connection handle
//! * [Netconn]: blocking connection API on top of [Conn]
//! * [pbuf::Pbuf]: reference counted buffer chains carrying received data
//!
//! See the `linux` demo for a complete setup on a serial port.
#![cfg_attr(feature = "strict", deny(warnings))]

extern crate alloc;

pub(crate) mod commands;
pub(crate) mod engine;
pub(crate) mod input;
pub(crate) mod msg;
pub(crate) mod responses;
pub(crate) mod sys;
pub(crate) mod threads;
pub(crate) mod timeout;
pub(crate) mod unicode;

pub mod buff;
pub mod config;
pub mod conn;
pub mod error;
pub mod esp;
pub mod event;
pub mod netconn;
pub mod parser;
pub mod pbuf;
pub mod types;
pub mod urc;

pub use config::Config;
pub use conn::Conn;
pub use error::Error;
pub use esp::{Esp, Link, TimeoutFn};
pub use event::{callback, Arg, Event, EventFn, EventKind, Flow};
pub use netconn::Netconn;

#[cfg(test)]
mod tests;
