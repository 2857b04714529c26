//! Strided spatial decimation.

use ndarray::{s, Array3, Array4, ArrayView3, ArrayView4};

/// Length of an axis of `len` elements after keeping every `stride`-th one.
#[must_use]
pub fn decimated_len(len: usize, stride: usize) -> usize {
    len.div_ceil(stride.max(1))
}

/// Keep every `stride`-th element along y and x; z is untouched.
#[must_use]
pub fn decimate_xy(volume: ArrayView3<'_, u16>, stride: usize) -> Array3<u16> {
    let step = step(stride);
    volume.slice(s![.., ..;step, ..;step]).to_owned()
}

/// Keep every `depth_factor`-th plane and every `xy_stride`-th pixel in y and x.
#[must_use]
pub fn decimate_zyx(
    volume: ArrayView3<'_, u16>,
    depth_factor: usize,
    xy_stride: usize,
) -> Array3<u16> {
    let z = step(depth_factor);
    let xy = step(xy_stride);
    volume.slice(s![..;z, ..;xy, ..;xy]).to_owned()
}

/// Lateral decimation of a whole (t, z, y, x) series.
#[must_use]
pub fn decimate_series(series: ArrayView4<'_, u16>, stride: usize) -> Array4<u16> {
    let step = step(stride);
    series.slice(s![.., .., ..;step, ..;step]).to_owned()
}

/// Shape `(z, y, x)` after decimation.
#[must_use]
pub fn decimated_shape(
    shape: (usize, usize, usize),
    depth_factor: usize,
    xy_stride: usize,
) -> (usize, usize, usize) {
    (
        decimated_len(shape.0, depth_factor),
        decimated_len(shape.1, xy_stride),
        decimated_len(shape.2, xy_stride),
    )
}

#[allow(clippy::cast_possible_wrap)]
fn step(stride: usize) -> isize {
    stride.max(1) as isize
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array;

    #[test]
    fn test_decimated_len_rounds_up() {
        assert_eq!(decimated_len(64, 8), 8);
        assert_eq!(decimated_len(65, 8), 9);
        assert_eq!(decimated_len(3, 4), 1);
        assert_eq!(decimated_len(0, 4), 0);
        assert_eq!(decimated_len(5, 0), 5);
    }

    #[test]
    fn test_decimate_series_keeps_strided_elements() {
        let series = Array::from_shape_fn((2, 3, 64, 64), |(t, z, y, x)| {
            u16::try_from(t * 10_000 + z * 1_000 + y * 64 + x).unwrap_or(u16::MAX)
        });
        let out = decimate_series(series.view(), 8);
        assert_eq!(out.shape(), &[2, 3, 8, 8]);
        for ((t, z, y, x), &value) in out.indexed_iter() {
            assert_eq!(value, series[[t, z, y * 8, x * 8]]);
        }
    }

    #[test]
    fn test_decimate_xy_leaves_depth() {
        let volume = Array3::<u16>::zeros((7, 10, 10));
        let out = decimate_xy(volume.view(), 4);
        assert_eq!(out.dim(), (7, 3, 3));
    }

    #[test]
    fn test_decimate_zyx() {
        let volume = Array::from_shape_fn((6, 8, 8), |(z, y, x)| {
            u16::try_from(z * 100 + y * 10 + x).unwrap_or(0)
        });
        let out = decimate_zyx(volume.view(), 2, 4);
        assert_eq!(out.dim(), decimated_shape((6, 8, 8), 2, 4));
        assert_eq!(out[[1, 1, 1]], volume[[2, 4, 4]]);
        assert_eq!(out[[2, 0, 1]], volume[[4, 0, 4]]);
    }
}
