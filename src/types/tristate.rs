//! # Three-Valued Truth
//!
//! SQL predicates evaluate to TRUE, FALSE or UNKNOWN. `Tristate` implements
//! Kleene logic: UNKNOWN absorbs in AND only against TRUE, in OR only against
//! FALSE, and NOT UNKNOWN is UNKNOWN.
//!
//! ```text
//!   AND | T  F  U        OR | T  F  U
//!   ----+---------      ----+---------
//!    T  | T  F  U         T | T  T  T
//!    F  | F  F  F         F | T  F  U
//!    U  | U  F  U         U | T  U  U
//! ```

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tristate {
    True,
    False,
    Unknown,
}

impl Tristate {
    pub fn from_bool(b: bool) -> Self {
        if b {
            Tristate::True
        } else {
            Tristate::False
        }
    }

    pub fn is_true(self) -> bool {
        self == Tristate::True
    }

    pub fn is_false(self) -> bool {
        self == Tristate::False
    }

    pub fn is_unknown(self) -> bool {
        self == Tristate::Unknown
    }

    pub fn and(self, other: Tristate) -> Tristate {
        match (self, other) {
            (Tristate::False, _) | (_, Tristate::False) => Tristate::False,
            (Tristate::True, Tristate::True) => Tristate::True,
            _ => Tristate::Unknown,
        }
    }

    pub fn or(self, other: Tristate) -> Tristate {
        match (self, other) {
            (Tristate::True, _) | (_, Tristate::True) => Tristate::True,
            (Tristate::False, Tristate::False) => Tristate::False,
            _ => Tristate::Unknown,
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Tristate {
        match self {
            Tristate::True => Tristate::False,
            Tristate::False => Tristate::True,
            Tristate::Unknown => Tristate::Unknown,
        }
    }

    /// `x IS NOT FALSE`: UNKNOWN collapses to TRUE.
    pub fn is_not_false(self) -> Tristate {
        Tristate::from_bool(self != Tristate::False)
    }
}
