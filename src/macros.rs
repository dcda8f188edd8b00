//! # Internal Macros
//!
//! This module provides internal macros for reducing boilerplate.
//!
//! ## arena_id!
//!
//! Generates a `u32` newtype used as an index into one of the statement
//! arenas (expressions, tables, join nests, query blocks, query specs,
//! subquery nodes, guards).
//!
//! ### Usage
//!
//! ```ignore
//! arena_id! {
//!     /// Index of a query block.
//!     BlockId
//! }
//!
//! let id = BlockId::new(3);
//! assert_eq!(id.index(), 3);
//! ```

/// Generates an arena index newtype with `new`, `index` and `Display`.
#[macro_export]
macro_rules! arena_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u32);

        impl $name {
            #[inline]
            pub fn new(index: usize) -> Self {
                Self(index as u32)
            }

            #[inline]
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                write!(f, "{}#{}", stringify!($name), self.0)
            }
        }
    };
}
