//! External collaborators
//!
//! The pipeline talks to four kinds of outside services, each behind a
//! trait so deployments (and tests) can plug in their own:
//!
//! - [`Analyzer`] - NLP analysis, translation, image location
//! - [`SignalSource`] - weather warnings, seismic events, storm forecasts
//! - [`ConfirmationFeed`] - independent confirmations used for verification
//! - [`ChannelSender`] - outbound email/SMS transport
//!
//! HTTP implementations live next to each trait. Callers wrap every call
//! in [`crate::error::with_timeout`].

pub mod analyzer;
pub mod channels;
pub mod confirmation;
pub mod signals;

pub use analyzer::{Analysis, Analyzer, HttpAnalyzer};
pub use channels::{
    ChannelSender, DispatchMessage, LogChannelSender, MessageAttributes, WebhookChannelSender,
};
pub use confirmation::{ConfirmationFeed, FeedItem, HttpConfirmationFeed};
pub use signals::{HttpSignalSource, SeismicEvent, SignalSource, Signals, WeatherWarning};

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;

/// Token-bucket limiter shared by the HTTP adapters
pub(crate) fn per_second_limiter(requests_per_second: u32) -> DefaultDirectRateLimiter {
    let rate = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
    RateLimiter::direct(Quota::per_second(rate))
}

pub(crate) const USER_AGENT: &str = concat!("dsw-pipeline/", env!("CARGO_PKG_VERSION"));
