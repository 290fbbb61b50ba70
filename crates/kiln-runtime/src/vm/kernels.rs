//! Reference kernels for VM instructions.

use crate::vm::broadcast::{broadcast_indices, broadcast_shape, strides};
use crate::vm::tensor::{Lanes, Tensor, is_float};
use crate::{Result, RuntimeError};
use kiln_bytecode::{ElementType, Opcode};

fn unsupported(op: Opcode, element_type: ElementType) -> RuntimeError {
    RuntimeError::Unimplemented(format!("{:?} on {} tensors", op, element_type))
}

// ──────────────────────────────── Elementwise ────────────────────────────────

pub fn unary(op: Opcode, x: &Tensor) -> Result<Tensor> {
    let f: fn(f64) -> f64 = match op {
        Opcode::Neg => |v| -v,
        Opcode::Abs => f64::abs,
        Opcode::Relu => |v| v.max(0.0),
        Opcode::Sigmoid => |v| 1.0 / (1.0 + (-v).exp()),
        Opcode::Tanh => f64::tanh,
        Opcode::Exp => f64::exp,
        Opcode::Log => f64::ln,
        Opcode::Sqrt => f64::sqrt,
        other => {
            return Err(RuntimeError::DataLoss(format!(
                "{:?} is not a unary opcode",
                other
            )));
        }
    };

    let out = match (op, x.lanes()?) {
        (_, Lanes::Float(v)) => Lanes::Float(v.into_iter().map(f).collect()),
        (Opcode::Neg, Lanes::Signed(v)) => {
            Lanes::Signed(v.into_iter().map(i64::wrapping_neg).collect())
        }
        (Opcode::Abs, Lanes::Signed(v)) => {
            Lanes::Signed(v.into_iter().map(i64::wrapping_abs).collect())
        }
        (Opcode::Relu, Lanes::Signed(v)) => Lanes::Signed(v.into_iter().map(|x| x.max(0)).collect()),
        (Opcode::Abs | Opcode::Relu, lanes @ Lanes::Unsigned(_)) => lanes,
        (Opcode::Neg, Lanes::Complex(v)) => {
            Lanes::Complex(v.into_iter().map(|(re, im)| (-re, -im)).collect())
        }
        _ => return Err(unsupported(op, x.element_type)),
    };
    Tensor::from_lanes(x.element_type, x.shape.clone(), &out)
}

fn zip_with<T: Copy, R>(
    a: &[T],
    b: &[T],
    f: impl Fn(T, T) -> Result<R>,
) -> Result<Vec<R>> {
    a.iter().zip(b).map(|(&x, &y)| f(x, y)).collect()
}

fn divide_by_zero() -> RuntimeError {
    RuntimeError::InvalidArgument("integer division by zero".to_string())
}

pub fn binary(op: Opcode, a: &Tensor, b: &Tensor) -> Result<Tensor> {
    if a.element_type != b.element_type {
        return Err(RuntimeError::InvalidArgument(format!(
            "{:?} operands have different element types {} and {}",
            op, a.element_type, b.element_type
        )));
    }
    let shape = broadcast_shape(&a.shape, &b.shape)?;
    let lhs = a.lanes()?.gather(&broadcast_indices(&a.shape, &shape));
    let rhs = b.lanes()?.gather(&broadcast_indices(&b.shape, &shape));

    let out = match (lhs, rhs) {
        (Lanes::Float(x), Lanes::Float(y)) => Lanes::Float(zip_with(&x, &y, |p, q| {
            Ok(match op {
                Opcode::Add => p + q,
                Opcode::Sub => p - q,
                Opcode::Mul => p * q,
                Opcode::Div => p / q,
                Opcode::Pow => p.powf(q),
                Opcode::Max => p.max(q),
                Opcode::Min => p.min(q),
                _ => return Err(unsupported(op, a.element_type)),
            })
        })?),
        (Lanes::Signed(x), Lanes::Signed(y)) => Lanes::Signed(zip_with(&x, &y, |p, q| {
            Ok(match op {
                Opcode::Add => p.wrapping_add(q),
                Opcode::Sub => p.wrapping_sub(q),
                Opcode::Mul => p.wrapping_mul(q),
                Opcode::Div => p.checked_div(q).ok_or_else(divide_by_zero)?,
                Opcode::Pow => (p as f64).powf(q as f64) as i64,
                Opcode::Max => p.max(q),
                Opcode::Min => p.min(q),
                _ => return Err(unsupported(op, a.element_type)),
            })
        })?),
        (Lanes::Unsigned(x), Lanes::Unsigned(y)) => Lanes::Unsigned(zip_with(&x, &y, |p, q| {
            Ok(match op {
                Opcode::Add => p.wrapping_add(q),
                Opcode::Sub => p.wrapping_sub(q),
                Opcode::Mul => p.wrapping_mul(q),
                Opcode::Div => p.checked_div(q).ok_or_else(divide_by_zero)?,
                Opcode::Pow => p.wrapping_pow(q.min(u32::MAX as u64) as u32),
                Opcode::Max => p.max(q),
                Opcode::Min => p.min(q),
                _ => return Err(unsupported(op, a.element_type)),
            })
        })?),
        (Lanes::Bool(x), Lanes::Bool(y)) => Lanes::Bool(zip_with(&x, &y, |p, q| {
            Ok(match op {
                Opcode::Max => p || q,
                Opcode::Min => p && q,
                _ => return Err(unsupported(op, a.element_type)),
            })
        })?),
        (Lanes::Complex(x), Lanes::Complex(y)) => Lanes::Complex(zip_with(&x, &y, |p, q| {
            let ((a_re, a_im), (b_re, b_im)) = (p, q);
            Ok(match op {
                Opcode::Add => (a_re + b_re, a_im + b_im),
                Opcode::Sub => (a_re - b_re, a_im - b_im),
                Opcode::Mul => (a_re * b_re - a_im * b_im, a_re * b_im + a_im * b_re),
                Opcode::Div => {
                    let denom = b_re * b_re + b_im * b_im;
                    (
                        (a_re * b_re + a_im * b_im) / denom,
                        (a_im * b_re - a_re * b_im) / denom,
                    )
                }
                _ => return Err(unsupported(op, a.element_type)),
            })
        })?),
        _ => return Err(unsupported(op, a.element_type)),
    };
    Tensor::from_lanes(a.element_type, shape, &out)
}

// ──────────────────────────────── MatMul ────────────────────────────────

struct MatMulShape {
    batch: Vec<usize>,
    a_batch: Vec<usize>,
    b_batch: Vec<usize>,
    m: usize,
    k: usize,
    n: usize,
    output: Vec<usize>,
}

fn matmul_shape(a: &[usize], b: &[usize]) -> Result<MatMulShape> {
    if a.is_empty() || b.is_empty() {
        return Err(RuntimeError::InvalidArgument(
            "MatMul operands must have rank >= 1".to_string(),
        ));
    }
    // Rank-1 operands are promoted to matrices and the added dim dropped.
    let a2: Vec<usize> = if a.len() == 1 { vec![1, a[0]] } else { a.to_vec() };
    let b2: Vec<usize> = if b.len() == 1 { vec![b[0], 1] } else { b.to_vec() };

    let (m, k) = (a2[a2.len() - 2], a2[a2.len() - 1]);
    let (k2, n) = (b2[b2.len() - 2], b2[b2.len() - 1]);
    if k != k2 {
        return Err(RuntimeError::InvalidArgument(format!(
            "MatMul inner dimensions differ: {:?} x {:?}",
            a, b
        )));
    }

    let a_batch = a2[..a2.len() - 2].to_vec();
    let b_batch = b2[..b2.len() - 2].to_vec();
    let batch = broadcast_shape(&a_batch, &b_batch)?;

    let mut output = batch.clone();
    if a.len() > 1 {
        output.push(m);
    }
    if b.len() > 1 {
        output.push(n);
    }
    Ok(MatMulShape {
        batch,
        a_batch,
        b_batch,
        m,
        k,
        n,
        output,
    })
}

fn matmul_lanes<T: Copy + Default>(
    s: &MatMulShape,
    a: &[T],
    b: &[T],
    mul_add: impl Fn(T, T, T) -> T,
) -> Vec<T> {
    let a_index = broadcast_indices(&s.a_batch, &s.batch);
    let b_index = broadcast_indices(&s.b_batch, &s.batch);
    let mut out = Vec::with_capacity(a_index.len() * s.m * s.n);
    for (&ai, &bi) in a_index.iter().zip(&b_index) {
        let a = &a[ai * s.m * s.k..];
        let b = &b[bi * s.k * s.n..];
        for row in 0..s.m {
            for col in 0..s.n {
                let mut acc = T::default();
                for i in 0..s.k {
                    acc = mul_add(acc, a[row * s.k + i], b[i * s.n + col]);
                }
                out.push(acc);
            }
        }
    }
    out
}

pub fn matmul(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    if a.element_type != b.element_type {
        return Err(RuntimeError::InvalidArgument(format!(
            "MatMul operands have different element types {} and {}",
            a.element_type, b.element_type
        )));
    }
    let shape = matmul_shape(&a.shape, &b.shape)?;
    let out = match (a.lanes()?, b.lanes()?) {
        (Lanes::Float(x), Lanes::Float(y)) => {
            Lanes::Float(matmul_lanes(&shape, &x, &y, |acc, p, q| acc + p * q))
        }
        (Lanes::Signed(x), Lanes::Signed(y)) => Lanes::Signed(matmul_lanes(&shape, &x, &y, |acc, p, q| {
            acc.wrapping_add(p.wrapping_mul(q))
        })),
        (Lanes::Unsigned(x), Lanes::Unsigned(y)) => {
            Lanes::Unsigned(matmul_lanes(&shape, &x, &y, |acc, p, q| {
                acc.wrapping_add(p.wrapping_mul(q))
            }))
        }
        _ => return Err(unsupported(Opcode::MatMul, a.element_type)),
    };
    Tensor::from_lanes(a.element_type, shape.output, &out)
}

// ──────────────────────────────── Layout ────────────────────────────────

pub fn reshape(x: &Tensor, dims: &[i64]) -> Result<Tensor> {
    let shape = dims
        .iter()
        .map(|&d| usize::try_from(d))
        .collect::<std::result::Result<Vec<usize>, _>>()
        .map_err(|_| {
            RuntimeError::InvalidArgument(format!("reshape target {:?} is not static", dims))
        })?;
    if shape.iter().product::<usize>() != x.element_count() {
        return Err(RuntimeError::InvalidArgument(format!(
            "cannot reshape {:?} to {:?}",
            x.shape, shape
        )));
    }
    Tensor::new(x.element_type, shape, x.data.clone())
}

pub fn transpose(x: &Tensor, perm: &[i64]) -> Result<Tensor> {
    let rank = x.shape.len();
    let mut seen = vec![false; rank];
    let perm: Vec<usize> = perm
        .iter()
        .map(|&p| {
            let axis = usize::try_from(p).ok().filter(|&a| a < rank && !seen[a]);
            if let Some(a) = axis {
                seen[a] = true;
            }
            axis
        })
        .collect::<Option<_>>()
        .filter(|p: &Vec<usize>| p.len() == rank)
        .ok_or_else(|| {
            RuntimeError::InvalidArgument(format!(
                "{:?} is not a permutation of rank {}",
                perm, rank
            ))
        })?;

    let shape: Vec<usize> = perm.iter().map(|&p| x.shape[p]).collect();
    let source_strides = strides(&x.shape);
    let element_size = x.element_type.dense_byte_count();
    let count = x.element_count();

    let mut data = Vec::with_capacity(x.data.len());
    let mut coord = vec![0usize; rank];
    for _ in 0..count {
        let flat: usize = coord
            .iter()
            .zip(&perm)
            .map(|(&c, &p)| c * source_strides[p])
            .sum();
        data.extend_from_slice(&x.data[flat * element_size..(flat + 1) * element_size]);

        for axis in (0..rank).rev() {
            coord[axis] += 1;
            if coord[axis] < shape[axis] {
                break;
            }
            coord[axis] = 0;
        }
    }
    Tensor::new(x.element_type, shape, data)
}

pub fn cast(x: &Tensor, target: ElementType) -> Result<Tensor> {
    if x.element_type == target {
        return Ok(x.clone());
    }
    Tensor::from_lanes(target, x.shape.clone(), &x.lanes()?)
}

// ──────────────────────────────── Softmax ────────────────────────────────

pub fn softmax(x: &Tensor, axis: i64) -> Result<Tensor> {
    if !is_float(x.element_type) {
        return Err(unsupported(Opcode::Softmax, x.element_type));
    }
    let rank = x.shape.len() as i64;
    let normalized = if axis < 0 { axis + rank } else { axis };
    if !(0..rank).contains(&normalized) {
        return Err(RuntimeError::InvalidArgument(format!(
            "softmax axis {} out of range for rank {}",
            axis, rank
        )));
    }
    let axis = normalized as usize;
    let outer: usize = x.shape[..axis].iter().product();
    let len = x.shape[axis];
    let inner: usize = x.shape[axis + 1..].iter().product();

    let Lanes::Float(mut values) = x.lanes()? else {
        return Err(unsupported(Opcode::Softmax, x.element_type));
    };
    for o in 0..outer {
        for i in 0..inner {
            let at = |j: usize| o * len * inner + j * inner + i;
            let max = (0..len)
                .map(|j| values[at(j)])
                .fold(f64::NEG_INFINITY, f64::max);
            let mut sum = 0.0;
            for j in 0..len {
                let e = (values[at(j)] - max).exp();
                values[at(j)] = e;
                sum += e;
            }
            for j in 0..len {
                values[at(j)] /= sum;
            }
        }
    }
    Tensor::from_lanes(x.element_type, x.shape.clone(), &Lanes::Float(values))
}
