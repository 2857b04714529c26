//! Dual-sided illumination fusion.
//!
//! Each light-sheet side illuminates the sample from one direction; the
//! fused volume keeps the brighter of the sides at every voxel.

use kakapo_core::{Error, IlluminationPolicy, Result};
use ndarray::{s, Array3, Array4, ArrayView3, ArrayView4, Axis, Zip};
use rayon::prelude::*;

/// Fold `other` into `acc` by elementwise maximum.
///
/// # Errors
/// Returns [`Error::ShapeMismatch`] if the shapes differ.
pub fn fuse_max_into(acc: &mut Array3<u16>, other: ArrayView3<'_, u16>) -> Result<()> {
    check_shape(acc.shape(), other.shape())?;
    Zip::from(acc)
        .and(&other)
        .par_for_each(|a, &b| *a = (*a).max(b));
    Ok(())
}

/// Elementwise maximum across illumination sides of one timepoint.
///
/// A single side passes through unchanged.
///
/// # Errors
/// Returns [`Error::ShapeMismatch`] if the sides differ in shape, or a
/// configuration error if no side is given.
pub fn fuse_max(sides: &[ArrayView3<'_, u16>]) -> Result<Array3<u16>> {
    let (first, rest) = sides
        .split_first()
        .ok_or_else(|| Error::ConfigError("no illumination side to fuse".to_string()))?;
    let mut fused = first.to_owned();
    for side in rest {
        fuse_max_into(&mut fused, side.view())?;
    }
    Ok(fused)
}

/// Fuse owned sides, reusing the first side's buffer.
///
/// # Errors
/// Same as [`fuse_max`].
pub fn fuse_owned(sides: Vec<Array3<u16>>) -> Result<Array3<u16>> {
    let mut iter = sides.into_iter();
    let mut fused = iter
        .next()
        .ok_or_else(|| Error::ConfigError("no illumination side to fuse".to_string()))?;
    for side in iter {
        fuse_max_into(&mut fused, side.view())?;
    }
    Ok(fused)
}

/// Fuse whole (t, z, y, x) series.
///
/// Sides whose leading (timepoint) extents differ are aligned with `policy`
/// before fusion; under [`IlluminationPolicy::Truncate`] every side is cut to
/// the shortest extent.
///
/// # Errors
/// Returns [`Error::TimepointMismatch`] under the strict policy, or
/// [`Error::ShapeMismatch`] when the per-timepoint volumes disagree.
pub fn fuse_series(
    sides: &[ArrayView4<'_, u16>],
    policy: IlluminationPolicy,
) -> Result<Array4<u16>> {
    let counts: Vec<usize> = sides.iter().map(|side| side.len_of(Axis(0))).collect();
    let len = policy.aligned_len(&counts)?;
    let (first, rest) = sides
        .split_first()
        .ok_or_else(|| Error::ConfigError("no illumination side to fuse".to_string()))?;

    let mut fused = first.slice(s![..len, .., .., ..]).to_owned();
    for side in rest {
        let side = side.slice(s![..len, .., .., ..]);
        check_shape(fused.shape(), side.shape())?;
        fused
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .zip(side.axis_iter(Axis(0)).into_par_iter())
            .for_each(|(mut acc, other)| {
                acc.zip_mut_with(&other, |a, &b| *a = (*a).max(b));
            });
    }
    Ok(fused)
}

fn check_shape(expected: &[usize], found: &[usize]) -> Result<()> {
    if expected == found {
        Ok(())
    } else {
        Err(Error::ShapeMismatch {
            expected: expected.to_vec(),
            found: found.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array;

    fn ramp(shape: (usize, usize, usize, usize), offset: u16) -> Array4<u16> {
        let mut value = offset;
        Array::from_shape_simple_fn(shape, || {
            value = value.wrapping_mul(31).wrapping_add(7);
            value
        })
    }

    #[test]
    fn test_fuse_max_is_elementwise() {
        let a = ndarray::array![[[1u16, 9], [3, 4]]];
        let b = ndarray::array![[[5u16, 2], [3, 8]]];
        let fused = fuse_max(&[a.view(), b.view()]).unwrap();
        assert_eq!(fused, ndarray::array![[[5u16, 9], [3, 8]]]);
    }

    #[test]
    fn test_single_side_passes_through() {
        let a = ndarray::array![[[1u16, 2], [3, 4]]];
        assert_eq!(fuse_max(&[a.view()]).unwrap(), a);
    }

    #[test]
    fn test_fuse_rejects_shape_mismatch() {
        let a = Array3::<u16>::zeros((2, 3, 3));
        let b = Array3::<u16>::zeros((2, 3, 4));
        let err = fuse_max(&[a.view(), b.view()]).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
    }

    #[test]
    fn test_fuse_series_matches_pointwise_max() {
        let a = ramp((3, 2, 4, 4), 1);
        let b = ramp((3, 2, 4, 4), 11);
        let fused = fuse_series(&[a.view(), b.view()], IlluminationPolicy::Truncate).unwrap();
        for ((idx, &value), (&va, &vb)) in fused.indexed_iter().zip(a.iter().zip(b.iter())) {
            assert_eq!(value, va.max(vb), "mismatch at {idx:?}");
        }
    }

    #[test]
    fn test_fuse_series_truncates_to_shorter_side() {
        let a = ramp((5, 2, 3, 3), 3);
        let b = ramp((7, 2, 3, 3), 5);
        let fused = fuse_series(&[a.view(), b.view()], IlluminationPolicy::Truncate).unwrap();
        assert_eq!(fused.shape(), &[5, 2, 3, 3]);

        let b_cut = b.slice(s![..5, .., .., ..]);
        let mut expected = a.clone();
        expected.zip_mut_with(&b_cut, |x, &y| *x = (*x).max(y));
        assert_eq!(fused, expected);
    }

    #[test]
    fn test_fuse_series_strict_rejects_mismatch() {
        let a = ramp((5, 1, 2, 2), 3);
        let b = ramp((7, 1, 2, 2), 5);
        let err = fuse_series(&[a.view(), b.view()], IlluminationPolicy::Strict).unwrap_err();
        assert!(matches!(err, Error::TimepointMismatch { .. }));
    }

    #[test]
    fn test_fuse_owned_reuses_first() {
        let a = Array3::from_elem((1, 2, 2), 4u16);
        let b = Array3::from_elem((1, 2, 2), 6u16);
        let fused = fuse_owned(vec![a, b]).unwrap();
        assert!(fused.iter().all(|&v| v == 6));
        assert_eq!(fused.shape(), &[1, 2, 2]);
    }
}
