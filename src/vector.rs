//! # Vector primitives
//!
//! Small numeric helpers shared by the index, the preference model and the
//! recommendation engine.
//!
//! Ranking is done with a plain inner product, so every stored preference and
//! every indexed embedding is expected to have unit L2 norm; under that
//! invariant the inner product equals cosine similarity. [`UnitVector`] is the
//! type that carries the invariant.

use serde::{Deserialize, Serialize};

use crate::error::{RecommendError, Result};

/// Tolerance used when accepting an externally supplied vector as "already unit norm".
pub const UNIT_NORM_TOLERANCE: f32 = 1e-3;

/// A finite, non-empty vector with L2 norm 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f32>", into = "Vec<f32>")]
pub struct UnitVector(Vec<f32>);

impl UnitVector {
    /// Scale `values` to unit length.
    ///
    /// # Errors
    /// `InvalidVector` if the input is empty, contains NaN/inf, or has zero norm.
    pub fn normalize(values: Vec<f32>) -> Result<Self> {
        check_finite(&values)?;
        let norm = l2_norm(&values);
        if norm <= f32::EPSILON {
            return Err(RecommendError::invalid_vector("zero norm"));
        }
        Ok(Self(values.into_iter().map(|v| v / norm).collect()))
    }

    /// Accept a vector that claims to be unit norm and has exactly `dim` components.
    ///
    /// Small drift (within [`UNIT_NORM_TOLERANCE`]) is corrected by renormalizing.
    pub fn from_unit(values: Vec<f32>, dim: usize) -> Result<Self> {
        validate_embedding(&values, dim)?;
        Self::normalize(values)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn dim(&self) -> usize {
        self.0.len()
    }

    pub fn into_inner(self) -> Vec<f32> {
        self.0
    }

    pub fn dot(&self, other: &[f32]) -> f32 {
        dot(&self.0, other)
    }
}

impl TryFrom<Vec<f32>> for UnitVector {
    type Error = RecommendError;

    fn try_from(values: Vec<f32>) -> Result<Self> {
        Self::normalize(values)
    }
}

impl From<UnitVector> for Vec<f32> {
    fn from(v: UnitVector) -> Self {
        v.0
    }
}

impl AsRef<[f32]> for UnitVector {
    fn as_ref(&self) -> &[f32] {
        &self.0
    }
}

/// Inner product of two equal-length slices.
///
/// Extra trailing components of the longer slice are ignored; callers validate
/// dimensions before reaching this point.
#[inline]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[inline]
pub fn l2_norm(v: &[f32]) -> f32 {
    dot(v, v).sqrt()
}

/// Reject empty, non-finite or wrong-dimension vectors.
pub fn validate_vector(values: &[f32], dim: usize) -> Result<()> {
    if values.len() != dim {
        return Err(RecommendError::invalid_vector(format!(
            "dimension mismatch: expected {dim}, got {}",
            values.len()
        )));
    }
    check_finite(values)
}

/// Reject anything that cannot be indexed as an item embedding: wrong
/// dimension, non-finite, or a norm further than [`UNIT_NORM_TOLERANCE`] from 1.
pub fn validate_embedding(values: &[f32], dim: usize) -> Result<()> {
    validate_vector(values, dim)?;
    let norm = l2_norm(values);
    if (norm - 1.0).abs() > UNIT_NORM_TOLERANCE {
        return Err(RecommendError::invalid_vector(format!(
            "expected unit norm, got {norm}"
        )));
    }
    Ok(())
}

fn check_finite(values: &[f32]) -> Result<()> {
    if values.is_empty() {
        return Err(RecommendError::invalid_vector("empty"));
    }
    if values.iter().any(|v| !v.is_finite()) {
        return Err(RecommendError::invalid_vector("non-finite component"));
    }
    Ok(())
}

/// Componentwise mean of a non-empty set of equal-length vectors.
///
/// Returns `None` when `vectors` is empty. The result is not renormalized.
pub fn componentwise_mean<'a, I>(vectors: I) -> Option<Vec<f32>>
where
    I: IntoIterator<Item = &'a [f32]>,
{
    let mut iter = vectors.into_iter();
    let first = iter.next()?;
    let mut sum = first.to_vec();
    let mut count = 1usize;
    for v in iter {
        for (acc, x) in sum.iter_mut().zip(v) {
            *acc += x;
        }
        count += 1;
    }
    let n = count as f32;
    sum.iter_mut().for_each(|x| *x /= n);
    Some(sum)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_scales_to_unit_length() {
        let v = UnitVector::normalize(vec![3.0, 4.0]).unwrap();
        assert!((l2_norm(v.as_slice()) - 1.0).abs() < 1e-6);
        assert!((v.as_slice()[0] - 0.6).abs() < 1e-6);
    }

    #[test]
    fn normalize_rejects_degenerate_input() {
        assert!(UnitVector::normalize(vec![]).is_err());
        assert!(UnitVector::normalize(vec![0.0, 0.0]).is_err());
        assert!(UnitVector::normalize(vec![f32::NAN, 1.0]).is_err());
    }

    #[test]
    fn from_unit_checks_dimension_and_norm() {
        assert!(UnitVector::from_unit(vec![1.0, 0.0], 2).is_ok());
        assert!(UnitVector::from_unit(vec![1.0, 0.0, 0.0], 2).is_err());
        assert!(UnitVector::from_unit(vec![2.0, 0.0], 2).is_err());
    }

    #[test]
    fn embedding_validation_requires_unit_norm() {
        assert!(validate_embedding(&[0.6, 0.8], 2).is_ok());
        assert!(validate_embedding(&[0.707, 0.707], 2).is_ok());
        assert!(validate_vector(&[3.0, 4.0], 2).is_ok());
        let err = validate_embedding(&[3.0, 4.0], 2).unwrap_err();
        assert_eq!(err.category(), "invalid_vector");
        assert!(validate_embedding(&[1.0, 0.0, 0.0], 2).is_err());
    }

    #[test]
    fn mean_of_toy_corpus() {
        let x = [1.0, 0.0];
        let y = [0.0, 1.0];
        let z = [0.707, 0.707];
        let mean = componentwise_mean([&x[..], &y[..], &z[..]]).unwrap();
        assert!((mean[0] - 0.569).abs() < 1e-3);
        assert!((mean[1] - 0.569).abs() < 1e-3);
        assert!(componentwise_mean(std::iter::empty::<&[f32]>()).is_none());
    }

    #[test]
    fn serde_rejects_zero_vector() {
        let ok: UnitVector = serde_json::from_str("[0.0, 2.0]").unwrap();
        assert_eq!(ok.as_slice(), &[0.0, 1.0]);
        assert!(serde_json::from_str::<UnitVector>("[0.0, 0.0]").is_err());
    }
}
