//! Channel implementations.

mod direct;
mod relay;

pub use direct::DirectChannel;
pub use relay::RelayChannel;
