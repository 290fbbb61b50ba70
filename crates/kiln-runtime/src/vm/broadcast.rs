//! NumPy-style broadcasting.

use crate::{Result, RuntimeError};

/// Compute the broadcast shape of two operands.
///
/// ```text
/// broadcast_shape(&[2, 3, 4], &[3, 4])       -> [2, 3, 4]
/// broadcast_shape(&[8, 1, 6, 1], &[7, 1, 5]) -> [8, 7, 6, 5]
/// ```
pub fn broadcast_shape(a: &[usize], b: &[usize]) -> Result<Vec<usize>> {
    let rank = a.len().max(b.len());
    let dim = |shape: &[usize], i: usize| {
        let pad = rank - shape.len();
        if i < pad { 1 } else { shape[i - pad] }
    };

    (0..rank)
        .map(|i| match (dim(a, i), dim(b, i)) {
            (da, db) if da == db => Ok(da),
            (1, db) => Ok(db),
            (da, 1) => Ok(da),
            _ => Err(RuntimeError::InvalidArgument(format!(
                "cannot broadcast shapes {:?} and {:?} at dimension {}",
                a, b, i
            ))),
        })
        .collect()
}

/// Row-major strides of `shape`.
pub fn strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1; shape.len()];
    for i in (0..shape.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * shape[i + 1];
    }
    strides
}

/// For every element of `target`, the flat index of the `source` element
/// broadcast onto it.
pub fn broadcast_indices(source: &[usize], target: &[usize]) -> Vec<usize> {
    let pad = target.len() - source.len();
    let source_strides = strides(source);
    let count: usize = target.iter().product();
    let mut indices = Vec::with_capacity(count);
    let mut coord = vec![0usize; target.len()];

    for _ in 0..count {
        let flat = source
            .iter()
            .enumerate()
            .map(|(i, &d)| if d == 1 { 0 } else { coord[i + pad] * source_strides[i] })
            .sum();
        indices.push(flat);

        for axis in (0..target.len()).rev() {
            coord[axis] += 1;
            if coord[axis] < target[axis] {
                break;
            }
            coord[axis] = 0;
        }
    }
    indices
}
