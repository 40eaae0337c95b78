//! Core of the command bot: access control, rate limiting, admission and dispatch.
//!
//! Chat platforms live behind the ports in [`messaging`]; adapter crates implement them.

pub mod admission;
pub mod auth;
pub mod commands;
pub mod config;
pub mod dispatcher;
pub mod domain;
pub mod errors;
pub mod logging;
pub mod messaging;
pub mod ratelimit;
pub mod timing;

#[cfg(test)]
mod test_support;

pub use errors::{Error, Result};
