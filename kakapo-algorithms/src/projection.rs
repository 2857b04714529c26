//! Maximum-intensity projection along depth.

use crate::fusion::fuse_max_into;
use kakapo_core::{Error, Result};
use ndarray::{Array2, ArrayView3, Axis, Zip};

/// Maximum over z of a (z, y, x) volume.
///
/// A volume with no planes projects to zeros.
#[must_use]
pub fn max_projection(volume: ArrayView3<'_, u16>) -> Array2<u16> {
    let (_, height, width) = volume.dim();
    let mut planes = volume.axis_iter(Axis(0));
    let Some(first) = planes.next() else {
        return Array2::zeros((height, width));
    };
    let mut projection = first.to_owned();
    for plane in planes {
        Zip::from(&mut projection)
            .and(&plane)
            .par_for_each(|acc, &value| *acc = (*acc).max(value));
    }
    projection
}

/// Project each illumination side, then fuse the projections by maximum.
///
/// # Errors
/// Returns [`Error::ShapeMismatch`] if the sides differ laterally.
pub fn fused_max_projection(sides: &[ArrayView3<'_, u16>]) -> Result<Array2<u16>> {
    let (first, rest) = sides
        .split_first()
        .ok_or_else(|| Error::ConfigError("no illumination side to project".to_string()))?;
    let mut fused = max_projection(first.view()).insert_axis(Axis(0));
    for side in rest {
        let projection = max_projection(side.view()).insert_axis(Axis(0));
        fuse_max_into(&mut fused, projection.view())?;
    }
    Ok(fused.index_axis_move(Axis(0), 0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array3};

    #[test]
    fn test_projection_is_exact_max_over_z() {
        let volume = array![
            [[1u16, 65_535], [0, 7]],
            [[9, 2], [0, 3]],
            [[4, 5], [0, 8]],
        ];
        let projection = max_projection(volume.view());
        assert_eq!(projection, array![[9u16, 65_535], [0, 8]]);
    }

    #[test]
    fn test_projection_matches_fold_axis() {
        let volume = Array3::from_shape_fn((5, 6, 7), |(z, y, x)| {
            u16::try_from((z * 37 + y * 11 + x * 5) % 97).unwrap_or(0)
        });
        let expected = volume.fold_axis(Axis(0), 0u16, |&a, &b| a.max(b));
        assert_eq!(max_projection(volume.view()), expected);
    }

    #[test]
    fn test_empty_depth_projects_to_zeros() {
        let volume = Array3::<u16>::zeros((0, 3, 4));
        assert_eq!(max_projection(volume.view()), Array2::<u16>::zeros((3, 4)));
    }

    #[test]
    fn test_fused_projection_equals_projection_of_fused() {
        let a = Array3::from_shape_fn((4, 3, 3), |(z, y, x)| {
            u16::try_from(z * 9 + y * 3 + x).unwrap_or(0)
        });
        let b = Array3::from_shape_fn((4, 3, 3), |(z, y, x)| {
            u16::try_from(40 - (z * 9 + y * 3 + x)).unwrap_or(0)
        });
        let fused_first = crate::fusion::fuse_max(&[a.view(), b.view()]).unwrap();
        let expected = max_projection(fused_first.view());
        let projected_first = fused_max_projection(&[a.view(), b.view()]).unwrap();
        assert_eq!(projected_first, expected);
    }
}
