//! Cache codec implementations
//!
//! Built-in implementations of the [`CacheCodec`](crate::traits::CacheCodec)
//! trait. JSON is the default; MessagePack and bincode are available behind
//! cargo features.

mod json;
pub use json::JsonCodec;

#[cfg(feature = "msgpack")]
mod msgpack;
#[cfg(feature = "msgpack")]
pub use msgpack::MsgPackCodec;

#[cfg(feature = "bincode")]
mod bincode;
#[cfg(feature = "bincode")]
pub use bincode::BincodeCodec;
