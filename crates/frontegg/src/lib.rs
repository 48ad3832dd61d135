#![warn(
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::pedantic
)]
#![forbid(unsafe_code)]

pub mod audits;
mod authenticator;
mod client;
mod config;
pub mod error;
pub mod events;
mod proxy;
mod transport;

pub use audits::AuditsClient;
pub use authenticator::*;
pub use client::*;
pub use config::*;
pub use error::{ApiError, Error, Result};
pub use events::EventsClient;
pub use proxy::*;
pub use transport::*;
