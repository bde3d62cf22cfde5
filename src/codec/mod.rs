//! Codec module - payload serialization for socket frames.
//!
//! [`MsgPackCodec`] encodes [`Value`](crate::Value)s and
//! [`ErrorDescriptor`](crate::ErrorDescriptor)s with `rmp-serde`.
//!
//! Codecs are marker structs with static methods rather than trait objects.
//!
//! # Example
//!
//! ```
//! use ipcwire_client::codec::MsgPackCodec;
//! use ipcwire_client::Value;
//!
//! let encoded = MsgPackCodec::encode(&Value::from("hello")).unwrap();
//! let decoded: Value = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, Value::from("hello"));
//! ```

mod msgpack;

pub use msgpack::MsgPackCodec;
