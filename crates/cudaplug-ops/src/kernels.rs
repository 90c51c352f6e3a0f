//! Host reference kernels shared by the operation modules.

use smallvec::{smallvec, SmallVec};

pub(crate) type Dims = SmallVec<[usize; 6]>;

/// NumPy-style broadcast of two shapes, or `None` when a dimension pair is incompatible.
pub(crate) fn broadcast_shape(lhs: &[usize], rhs: &[usize]) -> Option<Vec<usize>> {
    let rank = lhs.len().max(rhs.len());
    let mut dims = vec![0; rank];
    for (axis, out) in dims.iter_mut().enumerate() {
        let l = dim_from_right(lhs, rank - axis - 1);
        let r = dim_from_right(rhs, rank - axis - 1);
        *out = match (l, r) {
            (a, b) if a == b => a,
            (1, b) => b,
            (a, 1) => a,
            _ => return None,
        };
    }
    Some(dims)
}

fn dim_from_right(dims: &[usize], offset: usize) -> usize {
    if offset < dims.len() {
        dims[dims.len() - offset - 1]
    } else {
        1
    }
}

/// Strides for reading `input` while iterating over `output_rank` dimensions; broadcast axes
/// get stride zero.
pub(crate) fn broadcast_strides(input: &[usize], output_rank: usize) -> Dims {
    let mut strides: Dims = smallvec![0; output_rank];
    let offset = output_rank - input.len();
    let mut acc = 1usize;
    for (axis, &dim) in input.iter().enumerate().rev() {
        strides[axis + offset] = if dim == 1 { 0 } else { acc };
        acc *= dim;
    }
    strides
}

/// Applies `f` elementwise over the broadcast of `lhs` and `rhs` into `out_dims`.
pub(crate) fn broadcast_binary<F>(
    lhs: &[f32],
    lhs_dims: &[usize],
    rhs: &[f32],
    rhs_dims: &[usize],
    out_dims: &[usize],
    f: F,
) -> Vec<f32>
where
    F: Fn(f32, f32) -> f32,
{
    if lhs_dims == out_dims && rhs_dims == out_dims {
        return lhs.iter().zip(rhs).map(|(&a, &b)| f(a, b)).collect();
    }

    let rank = out_dims.len();
    let lhs_strides = broadcast_strides(lhs_dims, rank);
    let rhs_strides = broadcast_strides(rhs_dims, rank);
    let count: usize = out_dims.iter().product();
    let mut coords: Dims = smallvec![0; rank];
    let mut result = Vec::with_capacity(count);
    for _ in 0..count {
        let mut l = 0;
        let mut r = 0;
        for axis in 0..rank {
            l += coords[axis] * lhs_strides[axis];
            r += coords[axis] * rhs_strides[axis];
        }
        result.push(f(lhs[l], rhs[r]));
        for axis in (0..rank).rev() {
            coords[axis] += 1;
            if coords[axis] < out_dims[axis] {
                break;
            }
            coords[axis] = 0;
        }
    }
    result
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Activation {
    Relu,
    Sigmoid,
    Tanh,
}

impl Activation {
    pub(crate) fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "relu" => Some(Activation::Relu),
            "sigmoid" => Some(Activation::Sigmoid),
            "tanh" => Some(Activation::Tanh),
            _ => None,
        }
    }

    #[inline]
    pub(crate) fn apply(self, x: f32) -> f32 {
        match self {
            Activation::Relu => x.max(0.0),
            Activation::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            Activation::Tanh => x.tanh(),
        }
    }
}
