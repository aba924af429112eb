//! In-flight reduction: folding received bytes into a destination buffer.
//!
//! [`reduce_slice`] applies an operator over whole elements. [`StreamReducer`]
//! wraps it for socket reads that end at arbitrary byte offsets: leftover
//! bytes of a split element are carried and completed by the next chunk.

use crate::buffer::Element;
use crate::config::MAX_ELEMENT_BYTES;
use crate::error::{BmpiError, Result};
use crate::types::{DataType, ReduceOp};

/// Types that support the four arithmetic operators.
pub(crate) trait Reducible: Copy + 'static {
    fn reduce(a: Self, b: Self, op: ReduceOp) -> Self;
}

macro_rules! impl_reducible {
    (int: $($ty:ty),*) => {
        $(
            impl Reducible for $ty {
                #[inline]
                fn reduce(a: Self, b: Self, op: ReduceOp) -> Self {
                    match op {
                        ReduceOp::None => b,
                        ReduceOp::Add => a.wrapping_add(b),
                        ReduceOp::Sub => a.wrapping_sub(b),
                        ReduceOp::Mul => a.wrapping_mul(b),
                        // Division by zero yields 0 rather than trapping.
                        ReduceOp::Div => if b == 0 { 0 } else { a.wrapping_div(b) },
                    }
                }
            }
        )*
    };
    (float: $($ty:ty),*) => {
        $(
            impl Reducible for $ty {
                #[inline]
                fn reduce(a: Self, b: Self, op: ReduceOp) -> Self {
                    match op {
                        ReduceOp::None => b,
                        ReduceOp::Add => a + b,
                        ReduceOp::Sub => a - b,
                        ReduceOp::Mul => a * b,
                        ReduceOp::Div => a / b,
                    }
                }
            }
        )*
    };
}

impl_reducible!(int: i8, i16, i32, i64);
impl_reducible!(float: f32, f64);

impl Reducible for [f32; 4] {
    #[inline]
    fn reduce(a: Self, b: Self, op: ReduceOp) -> Self {
        std::array::from_fn(|lane| f32::reduce(a[lane], b[lane], op))
    }
}

/// Element-wise `dst = dst OP src` on byte slices interpreted as `dtype`.
///
/// Both slices must have the same length, a whole number of elements.
pub fn reduce_slice(dst: &mut [u8], src: &[u8], dtype: DataType, op: ReduceOp) -> Result<()> {
    if dst.len() != src.len() {
        return Err(BmpiError::BufferSizeMismatch {
            expected: dst.len(),
            actual: src.len(),
        });
    }
    if op == ReduceOp::None {
        dst.copy_from_slice(src);
        return Ok(());
    }
    if dst.len() % dtype.size_in_bytes() != 0 {
        return Err(BmpiError::UnalignedLength {
            length: dst.len(),
            dtype,
        });
    }

    match dtype {
        // A packed vector is four consecutive f32 lanes in memory, so the
        // scalar f32 kernels cover it lane-wise.
        DataType::F32 | DataType::F32x4 => {
            let count = dst.len() / 4;
            // SAFETY: both slices hold exactly `count` f32 values.
            if !unsafe { crate::reduce_simd::reduce_f32_simd(dst, src, count, op) } {
                reduce_slice_typed::<f32>(dst, src, op);
            }
        }
        DataType::F64 => {
            let count = dst.len() / 8;
            // SAFETY: both slices hold exactly `count` f64 values.
            if !unsafe { crate::reduce_simd::reduce_f64_simd(dst, src, count, op) } {
                reduce_slice_typed::<f64>(dst, src, op);
            }
        }
        DataType::I8 => reduce_slice_typed::<i8>(dst, src, op),
        DataType::I16 => reduce_slice_typed::<i16>(dst, src, op),
        DataType::I32 => reduce_slice_typed::<i32>(dst, src, op),
        DataType::I64 => reduce_slice_typed::<i64>(dst, src, op),
    }
    Ok(())
}

fn reduce_slice_typed<T: Reducible + Element>(dst: &mut [u8], src: &[u8], op: ReduceOp) {
    let width = T::DATA_TYPE.size_in_bytes();
    for (d, s) in dst.chunks_exact_mut(width).zip(src.chunks_exact(width)) {
        let r = T::reduce(T::read_ne(d), T::read_ne(s), op);
        r.write_ne(d);
    }
}

/// Streaming front end of [`reduce_slice`].
///
/// Tracks how many bytes of the destination are final and carries any
/// trailing partial element between [`feed`](Self::feed) calls.
#[derive(Debug, Clone)]
pub struct StreamReducer {
    dtype: DataType,
    op: ReduceOp,
    carry: [u8; MAX_ELEMENT_BYTES],
    carry_len: usize,
    written: usize,
}

impl StreamReducer {
    pub fn new(dtype: DataType, op: ReduceOp) -> Self {
        Self {
            dtype,
            op,
            carry: [0; MAX_ELEMENT_BYTES],
            carry_len: 0,
            written: 0,
        }
    }

    /// Bytes of the destination that hold final values.
    pub fn position(&self) -> usize {
        self.written
    }

    /// Bytes waiting for the rest of their element.
    pub fn carried(&self) -> usize {
        self.carry_len
    }

    fn width(&self) -> usize {
        // Overwrite needs no element framing.
        if self.op == ReduceOp::None {
            1
        } else {
            self.dtype.size_in_bytes()
        }
    }

    /// Fold the next `incoming` bytes into `dest` (the whole destination
    /// buffer; the reducer remembers where it left off).
    pub fn feed(&mut self, dest: &mut [u8], mut incoming: &[u8]) -> Result<()> {
        let width = self.width();
        let needed = self.written + self.carry_len + incoming.len();
        if needed > dest.len() {
            return Err(BmpiError::BufferSizeMismatch {
                expected: dest.len(),
                actual: needed,
            });
        }

        if self.carry_len > 0 {
            let take = (width - self.carry_len).min(incoming.len());
            self.carry[self.carry_len..self.carry_len + take].copy_from_slice(&incoming[..take]);
            self.carry_len += take;
            incoming = &incoming[take..];
            if self.carry_len < width {
                return Ok(());
            }
            let end = self.written + width;
            reduce_slice(
                &mut dest[self.written..end],
                &self.carry[..width],
                self.dtype,
                self.op,
            )?;
            self.written = end;
            self.carry_len = 0;
        }

        let whole = incoming.len() / width * width;
        if whole > 0 {
            let end = self.written + whole;
            reduce_slice(
                &mut dest[self.written..end],
                &incoming[..whole],
                self.dtype,
                self.op,
            )?;
            self.written = end;
        }

        let rest = &incoming[whole..];
        self.carry[..rest.len()].copy_from_slice(rest);
        self.carry_len = rest.len();
        Ok(())
    }

    /// Fails if the stream ended inside an element.
    pub fn finish(&self) -> Result<()> {
        if self.carry_len != 0 {
            return Err(BmpiError::UnalignedLength {
                length: self.written + self.carry_len,
                dtype: self.dtype,
            });
        }
        Ok(())
    }
}
