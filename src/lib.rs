//! A tiny harness for testing an IRC connection by hand.
//!
//! One [`session::Session`] is shared between three jobs: the input pump
//! relaying stdin to the server, the signal router turning SIGUSR1 into a
//! disconnect and SIGINT/SIGTERM/SIGUSR2 into a quit, and the error observer
//! printing the first thing that goes wrong.

pub mod config;
pub mod ctcp;
pub mod error;
pub mod harness;
pub mod input;
pub mod logger;
pub mod message;
pub mod observer;
pub mod session;
pub mod signals;
pub mod translate;

#[cfg(test)]
mod test_support;

pub use error::{Error, Result};
