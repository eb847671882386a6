//! Tolerant scalar used by the exact fallbacks of the geometric predicates.
//!
//! [`Rational`] wraps an `f64` and treats every magnitude below
//! [`RATIONAL_ZERO_TOLERANCE`] as zero. The name is historical: the value is not a
//! fraction, but it is the type every "exact" recomputation is routed through, so
//! that the zero test and the comparison rules live in one place.
//!
//! Arithmetic comes in two flavours: pure forms (`add`, `subtract`, `multiply`,
//! `divide`) returning a new value, and in-place forms (`increase_by`,
//! `decrease_by`, `multiply_by`, `divide_by`, `negate`) mutating the receiver and
//! returning it for chaining.

use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, Mul, Neg, Sub};

use num_traits::{One, Zero};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::predicates::RATIONAL_ZERO_TOLERANCE;

/// Errors produced by [`Rational`] arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum RationalError {
    /// The divisor of a division was zero within [`RATIONAL_ZERO_TOLERANCE`].
    #[error("Division by zero (dividend {dividend})")]
    DivisionByZero {
        /// The value that was about to be divided.
        dividend: f64,
    },
}

/// A tolerant floating scalar with an explicit zero test.
#[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Rational {
    value: f64,
}

impl Rational {
    /// Wraps a floating value.
    #[inline]
    #[must_use]
    pub const fn new(value: f64) -> Self {
        Self { value }
    }

    /// Returns the wrapped value.
    #[inline]
    #[must_use]
    pub const fn value(self) -> f64 {
        self.value
    }

    /// Whether the value is within [`RATIONAL_ZERO_TOLERANCE`] of zero.
    #[inline]
    #[must_use]
    pub fn is_zero(self) -> bool {
        self.value.abs() < RATIONAL_ZERO_TOLERANCE
    }

    /// Returns `self + other`.
    #[inline]
    #[must_use]
    pub fn add(self, other: Self) -> Self {
        Self::new(self.value + other.value)
    }

    /// Returns `self - other`.
    #[inline]
    #[must_use]
    pub fn subtract(self, other: Self) -> Self {
        Self::new(self.value - other.value)
    }

    /// Returns `self * other`.
    #[inline]
    #[must_use]
    pub fn multiply(self, other: Self) -> Self {
        Self::new(self.value * other.value)
    }

    /// Returns `self / other`.
    ///
    /// # Errors
    ///
    /// Returns [`RationalError::DivisionByZero`] if `other` is zero.
    #[inline]
    pub fn divide(self, other: Self) -> Result<Self, RationalError> {
        if other.is_zero() {
            return Err(RationalError::DivisionByZero {
                dividend: self.value,
            });
        }
        Ok(Self::new(self.value / other.value))
    }

    /// Adds `other` in place.
    #[inline]
    pub fn increase_by(&mut self, other: Self) -> &mut Self {
        self.value += other.value;
        self
    }

    /// Subtracts `other` in place.
    #[inline]
    pub fn decrease_by(&mut self, other: Self) -> &mut Self {
        self.value -= other.value;
        self
    }

    /// Multiplies by `other` in place.
    #[inline]
    pub fn multiply_by(&mut self, other: Self) -> &mut Self {
        self.value *= other.value;
        self
    }

    /// Divides by `other` in place. The receiver is untouched on error.
    ///
    /// # Errors
    ///
    /// Returns [`RationalError::DivisionByZero`] if `other` is zero.
    #[inline]
    pub fn divide_by(&mut self, other: Self) -> Result<&mut Self, RationalError> {
        *self = self.divide(other)?;
        Ok(self)
    }

    /// Negates in place.
    #[inline]
    pub fn negate(&mut self) -> &mut Self {
        self.value = -self.value;
        self
    }

    /// Sign of `self - other`, where a difference inside the zero tolerance
    /// counts as equal.
    #[must_use]
    pub fn compare_to(self, other: Self) -> Ordering {
        let difference = self.subtract(other);
        if difference.is_zero() {
            Ordering::Equal
        } else if difference.value > 0.0 {
            Ordering::Greater
        } else {
            Ordering::Less
        }
    }

    /// [`compare_to`](Self::compare_to) as `-1`, `0` or `1`.
    #[inline]
    #[must_use]
    pub fn signum_against(self, other: Self) -> i32 {
        match self.compare_to(other) {
            Ordering::Less => -1,
            Ordering::Equal => 0,
            Ordering::Greater => 1,
        }
    }
}

impl From<f64> for Rational {
    fn from(value: f64) -> Self {
        Self::new(value)
    }
}

impl From<Rational> for f64 {
    fn from(value: Rational) -> Self {
        value.value
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

impl Add for Rational {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::add(self, rhs)
    }
}

impl Sub for Rational {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        self.subtract(rhs)
    }
}

impl Mul for Rational {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self {
        self.multiply(rhs)
    }
}

impl Neg for Rational {
    type Output = Self;

    fn neg(self) -> Self {
        Self::new(-self.value)
    }
}

impl Zero for Rational {
    fn zero() -> Self {
        Self::new(0.0)
    }

    fn is_zero(&self) -> bool {
        Self::is_zero(*self)
    }
}

impl One for Rational {
    fn one() -> Self {
        Self::new(1.0)
    }
}
