//! SIMD-accelerated f32/f64 reduction dispatch.
//!
//! Destination buffers come straight off the socket, so every kernel uses
//! unaligned loads and stores.

#[cfg(target_arch = "x86_64")]
mod x86_64;

#[cfg(target_arch = "aarch64")]
mod aarch64;

use crate::types::ReduceOp;

/// Try SIMD-accelerated f32 reduction. Returns `true` if handled.
///
/// # Safety
/// `dst` and `src` must both have at least `count * 4` bytes.
pub(crate) unsafe fn reduce_f32_simd(
    dst: &mut [u8],
    src: &[u8],
    count: usize,
    op: ReduceOp,
) -> bool {
    if op == ReduceOp::None {
        return false;
    }
    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("avx512f") {
            unsafe { x86_64::reduce_f32_op_avx512(dst, src, count, op) };
            return true;
        }
        if is_x86_feature_detected!("avx2") {
            unsafe { x86_64::reduce_f32_op_avx2(dst, src, count, op) };
            return true;
        }
    }
    #[cfg(target_arch = "aarch64")]
    {
        unsafe { aarch64::reduce_f32_op_neon(dst, src, count, op) };
        return true;
    }
    #[allow(unreachable_code)]
    {
        let _ = (dst, src, count);
        false
    }
}

/// Try SIMD-accelerated f64 reduction. Returns `true` if handled.
///
/// # Safety
/// `dst` and `src` must both have at least `count * 8` bytes.
pub(crate) unsafe fn reduce_f64_simd(
    dst: &mut [u8],
    src: &[u8],
    count: usize,
    op: ReduceOp,
) -> bool {
    if op == ReduceOp::None {
        return false;
    }
    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("avx512f") {
            unsafe { x86_64::reduce_f64_op_avx512(dst, src, count, op) };
            return true;
        }
        if is_x86_feature_detected!("avx2") {
            unsafe { x86_64::reduce_f64_op_avx2(dst, src, count, op) };
            return true;
        }
    }
    #[cfg(target_arch = "aarch64")]
    {
        unsafe { aarch64::reduce_f64_op_neon(dst, src, count, op) };
        return true;
    }
    #[allow(unreachable_code)]
    {
        let _ = (dst, src, count);
        false
    }
}
