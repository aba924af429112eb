//! Conversions between typed element slices and the byte buffers that
//! travel over bonded channels.
//!
//! Bytes are always in host order, matching what the reduction codec
//! reinterprets on the receiving side.

use crate::error::{BmpiError, Result};
use crate::types::DataType;
use bytes::{BufMut, BytesMut};

/// A scalar (or packed vector) that maps onto one [`DataType`].
pub trait Element: Copy + Send + Sync + 'static {
    const DATA_TYPE: DataType;

    /// Decode one element from exactly `DATA_TYPE.size_in_bytes()` bytes.
    fn read_ne(bytes: &[u8]) -> Self;

    /// Encode into exactly `DATA_TYPE.size_in_bytes()` bytes.
    fn write_ne(self, bytes: &mut [u8]);
}

macro_rules! impl_element {
    ($($ty:ty => $dt:expr),* $(,)?) => {
        $(
            impl Element for $ty {
                const DATA_TYPE: DataType = $dt;

                #[inline]
                fn read_ne(bytes: &[u8]) -> Self {
                    Self::from_ne_bytes(
                        bytes.try_into().expect("slice length matches element size"),
                    )
                }

                #[inline]
                fn write_ne(self, bytes: &mut [u8]) {
                    bytes.copy_from_slice(&self.to_ne_bytes());
                }
            }
        )*
    };
}

impl_element!(
    i8 => DataType::I8,
    i16 => DataType::I16,
    i32 => DataType::I32,
    i64 => DataType::I64,
    f32 => DataType::F32,
    f64 => DataType::F64,
);

impl Element for [f32; 4] {
    const DATA_TYPE: DataType = DataType::F32x4;

    #[inline]
    fn read_ne(bytes: &[u8]) -> Self {
        let mut out = [0.0f32; 4];
        for (lane, chunk) in out.iter_mut().zip(bytes.chunks_exact(4)) {
            *lane = f32::read_ne(chunk);
        }
        out
    }

    #[inline]
    fn write_ne(self, bytes: &mut [u8]) {
        for (lane, chunk) in self.iter().zip(bytes.chunks_exact_mut(4)) {
            lane.write_ne(chunk);
        }
    }
}

/// Encode a typed slice into a freshly allocated byte buffer.
pub fn to_bytes<T: Element>(values: &[T]) -> BytesMut {
    let width = T::DATA_TYPE.size_in_bytes();
    let mut out = BytesMut::with_capacity(values.len() * width);
    out.put_bytes(0, values.len() * width);
    for (v, chunk) in values.iter().zip(out.chunks_exact_mut(width)) {
        v.write_ne(chunk);
    }
    out
}

/// Decode a byte buffer into typed elements.
///
/// Fails if `bytes` is not a whole number of elements.
pub fn from_bytes<T: Element>(bytes: &[u8]) -> Result<Vec<T>> {
    let width = T::DATA_TYPE.size_in_bytes();
    if bytes.len() % width != 0 {
        return Err(BmpiError::UnalignedLength {
            length: bytes.len(),
            dtype: T::DATA_TYPE,
        });
    }
    Ok(bytes.chunks_exact(width).map(T::read_ne).collect())
}

/// A zero-filled receive buffer of `len` bytes.
pub fn zeroed(len: usize) -> BytesMut {
    BytesMut::zeroed(len)
}
