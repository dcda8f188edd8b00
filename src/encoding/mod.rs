//! # Encoding Module
//!
//! Key encoding shared by unique-index lookups and hash materialization.

pub mod key;

pub use key::{encode_key, encode_value, encode_values, type_prefix};
