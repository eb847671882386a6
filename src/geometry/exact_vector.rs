//! Three-component vector of [`Rational`] values.
//!
//! Used by the exact recomputations of plane, circle and sphere predicates when the
//! floating fast path lands inside its error band.

use std::fmt;

use nalgebra::Vector3;

use super::rational::{Rational, RationalError};

/// A 3-vector over [`Rational`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ExactVector {
    elements: [Rational; 3],
}

impl ExactVector {
    /// Builds a vector from its three components.
    #[inline]
    #[must_use]
    pub const fn new(elements: [Rational; 3]) -> Self {
        Self { elements }
    }

    /// Component access.
    #[inline]
    #[must_use]
    pub const fn elements(&self) -> &[Rational; 3] {
        &self.elements
    }

    /// Determinant of the 3×3 matrix whose rows are `rows`, by full expansion.
    #[must_use]
    pub fn det(rows: &[Self; 3]) -> Rational {
        let [a, b, c] = rows.map(|r| r.elements);
        a[0].multiply(b[1])
            .multiply(c[2])
            .add(a[1].multiply(b[2]).multiply(c[0]))
            .add(a[2].multiply(b[0]).multiply(c[1]))
            .subtract(a[0].multiply(b[2]).multiply(c[1]))
            .subtract(a[1].multiply(b[0]).multiply(c[2]))
            .subtract(a[2].multiply(b[1]).multiply(c[0]))
    }

    /// Sum of squared components.
    #[must_use]
    pub fn squared_length(&self) -> Rational {
        self.elements
            .iter()
            .fold(Rational::new(0.0), |acc, e| acc.add(e.multiply(*e)))
    }

    /// Returns `self + other`.
    #[must_use]
    pub fn add(&self, other: &Self) -> Self {
        Self::new([0, 1, 2].map(|i| self.elements[i].add(other.elements[i])))
    }

    /// Adds `other` in place.
    pub fn increase_by(&mut self, other: &Self) -> &mut Self {
        for (e, o) in self.elements.iter_mut().zip(other.elements) {
            e.increase_by(o);
        }
        self
    }

    /// Returns `self - other`.
    #[must_use]
    pub fn subtract(&self, other: &Self) -> Self {
        Self::new([0, 1, 2].map(|i| self.elements[i].subtract(other.elements[i])))
    }

    /// Subtracts `other` in place.
    pub fn decrease_by(&mut self, other: &Self) -> &mut Self {
        for (e, o) in self.elements.iter_mut().zip(other.elements) {
            e.decrease_by(o);
        }
        self
    }

    /// Returns `self * factor`.
    #[must_use]
    pub fn multiply(&self, factor: Rational) -> Self {
        Self::new(self.elements.map(|e| e.multiply(factor)))
    }

    /// Multiplies by `factor` in place.
    pub fn multiply_by(&mut self, factor: Rational) -> &mut Self {
        for e in &mut self.elements {
            e.multiply_by(factor);
        }
        self
    }

    /// Returns `self / factor`.
    ///
    /// # Errors
    ///
    /// Returns [`RationalError::DivisionByZero`] if `factor` is zero.
    pub fn divide(&self, factor: Rational) -> Result<Self, RationalError> {
        let [x, y, z] = self.elements;
        Ok(Self::new([x.divide(factor)?, y.divide(factor)?, z.divide(factor)?]))
    }

    /// Divides by `factor` in place. The receiver is untouched on error.
    ///
    /// # Errors
    ///
    /// Returns [`RationalError::DivisionByZero`] if `factor` is zero.
    pub fn divide_by(&mut self, factor: Rational) -> Result<&mut Self, RationalError> {
        *self = self.divide(factor)?;
        Ok(self)
    }

    /// Dot product.
    #[must_use]
    pub fn dot(&self, other: &Self) -> Rational {
        (0..3).fold(Rational::new(0.0), |acc, i| {
            acc.add(other.elements[i].multiply(self.elements[i]))
        })
    }

    /// Cross product.
    #[must_use]
    pub fn cross(&self, other: &Self) -> Self {
        Self::new([0, 1, 2].map(|i| {
            let j = (i + 1) % 3;
            let k = (i + 2) % 3;
            self.elements[j]
                .multiply(other.elements[k])
                .subtract(self.elements[k].multiply(other.elements[j]))
        }))
    }

    /// Negates every component in place.
    pub fn negate(&mut self) -> &mut Self {
        for e in &mut self.elements {
            e.negate();
        }
        self
    }

    /// Component-wise tolerant equality.
    #[must_use]
    pub fn equal_to(&self, other: &Self) -> bool {
        self.elements
            .iter()
            .zip(other.elements.iter())
            .all(|(a, b)| a.compare_to(*b).is_eq())
    }

    /// Converts back to a floating vector.
    #[must_use]
    pub fn to_vector(&self) -> Vector3<f64> {
        Vector3::new(
            self.elements[0].value(),
            self.elements[1].value(),
            self.elements[2].value(),
        )
    }
}

impl From<Vector3<f64>> for ExactVector {
    fn from(v: Vector3<f64>) -> Self {
        Self::new([Rational::new(v.x), Rational::new(v.y), Rational::new(v.z)])
    }
}

impl From<&Vector3<f64>> for ExactVector {
    fn from(v: &Vector3<f64>) -> Self {
        Self::from(*v)
    }
}

impl fmt::Display for ExactVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [x, y, z] = self.elements;
        write!(f, "({x}, {y}, {z})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ev(x: f64, y: f64, z: f64) -> ExactVector {
        ExactVector::from(Vector3::new(x, y, z))
    }

    #[test]
    fn test_det_matches_nalgebra() {
        let rows = [ev(1.0, 2.0, 3.0), ev(0.5, -1.0, 4.0), ev(2.0, 0.0, -1.5)];
        let m = nalgebra::Matrix3::new(1.0, 2.0, 3.0, 0.5, -1.0, 4.0, 2.0, 0.0, -1.5);
        assert_relative_eq!(ExactVector::det(&rows).value(), m.determinant(), epsilon = 1e-12);
    }

    #[test]
    fn test_cross_and_dot() {
        let x = ev(1.0, 0.0, 0.0);
        let y = ev(0.0, 1.0, 0.0);
        let z = x.cross(&y);
        assert!(z.equal_to(&ev(0.0, 0.0, 1.0)));
        assert!(x.dot(&y).is_zero());
        assert_relative_eq!(ev(1.0, 2.0, 2.0).squared_length().value(), 9.0);
    }

    #[test]
    fn test_in_place_arithmetic() {
        let mut v = ev(1.0, 2.0, 3.0);
        v.increase_by(&ev(1.0, 1.0, 1.0))
            .multiply_by(Rational::new(2.0))
            .decrease_by(&ev(4.0, 6.0, 8.0))
            .negate();
        assert!(v.equal_to(&ev(0.0, 0.0, 0.0)));
        assert!(ev(1.0, 1.0, 1.0).divide(Rational::new(0.0)).is_err());
        assert_relative_eq!(
            ev(2.0, 4.0, 6.0).divide(Rational::new(2.0)).unwrap().to_vector().z,
            3.0
        );
    }
}
