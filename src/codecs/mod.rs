//! Cache Codec Implementations
//!
//! Built-in implementations of the [`CacheCodec`](crate::traits::CacheCodec)
//! and [`SizeEstimator`](crate::traits::SizeEstimator) traits.

mod json;
pub use json::JsonCodec;
