//! Active set vector entries.
//!
//! Each response in a parameter file carries an integer request code whose
//! low three bits ask for the function value, the gradient and the hessian.
//! The code is decoded once at the file boundary; everything past the reader
//! works with the three named flags.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Which of {value, gradient, hessian} the caller wants for one response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActiveSet {
    pub function: bool,
    pub gradient: bool,
    pub hessian: bool,
}

impl ActiveSet {
    pub const NONE: Self = Self {
        function: false,
        gradient: false,
        hessian: false,
    };

    pub const ALL: Self = Self {
        function: true,
        gradient: true,
        hessian: true,
    };

    /// Decode a request code. Returns `None` for codes outside `0..=7`.
    pub fn from_code(code: i64) -> Option<Self> {
        if !(0..=7).contains(&code) {
            return None;
        }
        Some(Self {
            function: code & 1 != 0,
            gradient: code & 2 != 0,
            hessian: code & 4 != 0,
        })
    }

    pub fn code(self) -> u8 {
        u8::from(self.function) | u8::from(self.gradient) << 1 | u8::from(self.hessian) << 2
    }

    pub fn is_empty(self) -> bool {
        self == Self::NONE
    }

    /// True when every field requested by `self` is also requested by `other`.
    pub fn is_subset_of(self, other: Self) -> bool {
        (!self.function || other.function)
            && (!self.gradient || other.gradient)
            && (!self.hessian || other.hessian)
    }
}

impl fmt::Display for ActiveSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_additive() {
        let all = ActiveSet::from_code(7).unwrap();
        assert_eq!(all, ActiveSet::ALL);

        let value_and_hessian = ActiveSet::from_code(5).unwrap();
        assert!(value_and_hessian.function);
        assert!(!value_and_hessian.gradient);
        assert!(value_and_hessian.hessian);

        for code in 0..=7 {
            assert_eq!(ActiveSet::from_code(code).unwrap().code() as i64, code);
        }
    }

    #[test]
    fn test_out_of_range_codes() {
        assert!(ActiveSet::from_code(-1).is_none());
        assert!(ActiveSet::from_code(8).is_none());
    }

    #[test]
    fn test_subset() {
        let grad = ActiveSet::from_code(2).unwrap();
        assert!(grad.is_subset_of(ActiveSet::ALL));
        assert!(!ActiveSet::ALL.is_subset_of(grad));
        assert!(ActiveSet::NONE.is_subset_of(grad));
        assert!(ActiveSet::NONE.is_empty());
    }
}
