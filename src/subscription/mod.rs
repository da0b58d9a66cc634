//! Subscription feed handling
//!
//! Fetching, parsing and the persisted endpoint store.

pub mod feed;
pub mod parser;
pub mod store;

pub use feed::{FeedSource, HttpFeedSource};
pub use parser::{parse_descriptor, parse_subscription};
pub use store::SubscriptionStore;
