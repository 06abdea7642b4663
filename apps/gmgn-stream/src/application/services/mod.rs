//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `FeedClient`: connect, subscribe, register handlers, close
//! - `EventStream`: arrival-order iteration over typed events

mod client;
mod stream;

pub use client::{ClientError, FeedClient};
pub use stream::EventStream;
