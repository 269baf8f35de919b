//! Decimal values proposed and compared by validators.
//!
//! A [`Value`] is a scalar, a vector or a matrix of [`Decimal`]s. Binary
//! floats never appear here: the consensus engine compares values with
//! fixed-precision subtract / abs / compare, and every number crosses the
//! wire as a decimal string.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A numeric value of one of three shapes.
///
/// Serialized adjacently tagged, for example
/// `{"kind":"vector","value":["1.5","-2"]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Value {
    /// A single decimal.
    Scalar(Decimal),
    /// An ordered list of decimals.
    Vector(Vec<Decimal>),
    /// Rows of decimals. Rows may differ in length.
    Matrix(Vec<Vec<Decimal>>),
}

impl Value {
    /// Short name of the value's shape, for diagnostics.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Scalar(_) => "scalar",
            Self::Vector(_) => "vector",
            Self::Matrix(_) => "matrix",
        }
    }

    /// Exact equality: same shape and identical decimals.
    ///
    /// Decimals compare numerically, so `1.50` equals `1.5`.
    pub fn equals(&self, other: &Self) -> bool {
        self == other
    }

    /// Whether every element of `self` is within `tolerance` of the
    /// corresponding element of `other`.
    ///
    /// Values of different kinds or shapes are never within tolerance, and
    /// a subtraction that overflows counts as a mismatch.
    pub fn within_tolerance(&self, other: &Self, tolerance: Decimal) -> bool {
        match (self, other) {
            (Self::Scalar(a), Self::Scalar(b)) => close(*a, *b, tolerance),
            (Self::Vector(a), Self::Vector(b)) => rows_close(a, b, tolerance),
            (Self::Matrix(a), Self::Matrix(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b)
                        .all(|(row_a, row_b)| rows_close(row_a, row_b, tolerance))
            }
            _ => false,
        }
    }
}

fn close(a: Decimal, b: Decimal, tolerance: Decimal) -> bool {
    a.checked_sub(b).is_some_and(|diff| diff.abs() <= tolerance)
}

fn rows_close(a: &[Decimal], b: &[Decimal], tolerance: Decimal) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| close(*x, *y, tolerance))
}
