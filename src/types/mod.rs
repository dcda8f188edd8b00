//! # Type System
//!
//! This module provides the value and type vocabulary shared by the whole
//! crate.
//!
//! ## Module Structure
//!
//! - `data_type`: `DataType` and `TypeAffinity`
//! - `value`: owned runtime `Value` and the shared `Row`
//! - `tristate`: three-valued predicate results
//!
//! ## Key Types
//!
//! | Type | Purpose |
//! |------|---------|
//! | `DataType` | Column / expression type discriminant |
//! | `Value` | Runtime value |
//! | `Row` | Shared, immutable row (`Arc<[Value]>`) |
//! | `Tristate` | TRUE / FALSE / UNKNOWN |

mod data_type;
mod tristate;
mod value;

pub use data_type::{DataType, TypeAffinity};
pub use tristate::Tristate;
pub use value::{Row, Value};
