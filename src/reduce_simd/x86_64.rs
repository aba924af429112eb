//! AVX2 and AVX-512 reduction kernels for x86_64.

use std::arch::x86_64::*;

use crate::reduce::Reducible;
use crate::types::ReduceOp;

// ── f32 ──────────────────────────────────────────────────────────────

#[target_feature(enable = "avx512f")]
pub(crate) unsafe fn reduce_f32_op_avx512(dst: &mut [u8], src: &[u8], count: usize, op: ReduceOp) {
    let dp = dst.as_mut_ptr() as *mut f32;
    let sp = src.as_ptr() as *const f32;
    let chunks = count / 16;
    let tail = count % 16;

    for i in 0..chunks {
        let off = i * 16;
        unsafe {
            let a = _mm512_loadu_ps(dp.add(off));
            let b = _mm512_loadu_ps(sp.add(off));
            let r = match op {
                ReduceOp::Add => _mm512_add_ps(a, b),
                ReduceOp::Sub => _mm512_sub_ps(a, b),
                ReduceOp::Mul => _mm512_mul_ps(a, b),
                ReduceOp::Div => _mm512_div_ps(a, b),
                ReduceOp::None => b,
            };
            _mm512_storeu_ps(dp.add(off), r);
        }
    }

    if tail > 0 {
        unsafe {
            reduce_f32_op_avx2(&mut dst[chunks * 64..], &src[chunks * 64..], tail, op);
        }
    }
}

#[target_feature(enable = "avx2")]
pub(crate) unsafe fn reduce_f32_op_avx2(dst: &mut [u8], src: &[u8], count: usize, op: ReduceOp) {
    let dp = dst.as_mut_ptr() as *mut f32;
    let sp = src.as_ptr() as *const f32;
    let chunks = count / 8;
    let tail = count % 8;

    for i in 0..chunks {
        let off = i * 8;
        unsafe {
            let a = _mm256_loadu_ps(dp.add(off));
            let b = _mm256_loadu_ps(sp.add(off));
            let r = match op {
                ReduceOp::Add => _mm256_add_ps(a, b),
                ReduceOp::Sub => _mm256_sub_ps(a, b),
                ReduceOp::Mul => _mm256_mul_ps(a, b),
                ReduceOp::Div => _mm256_div_ps(a, b),
                ReduceOp::None => b,
            };
            _mm256_storeu_ps(dp.add(off), r);
        }
    }

    let base = chunks * 8;
    for i in 0..tail {
        let idx = base + i;
        unsafe {
            let a = dp.add(idx).read_unaligned();
            let b = sp.add(idx).read_unaligned();
            dp.add(idx).write_unaligned(f32::reduce(a, b, op));
        }
    }
}

// ── f64 ──────────────────────────────────────────────────────────────

#[target_feature(enable = "avx512f")]
pub(crate) unsafe fn reduce_f64_op_avx512(dst: &mut [u8], src: &[u8], count: usize, op: ReduceOp) {
    let dp = dst.as_mut_ptr() as *mut f64;
    let sp = src.as_ptr() as *const f64;
    let chunks = count / 8;
    let tail = count % 8;

    for i in 0..chunks {
        let off = i * 8;
        unsafe {
            let a = _mm512_loadu_pd(dp.add(off));
            let b = _mm512_loadu_pd(sp.add(off));
            let r = match op {
                ReduceOp::Add => _mm512_add_pd(a, b),
                ReduceOp::Sub => _mm512_sub_pd(a, b),
                ReduceOp::Mul => _mm512_mul_pd(a, b),
                ReduceOp::Div => _mm512_div_pd(a, b),
                ReduceOp::None => b,
            };
            _mm512_storeu_pd(dp.add(off), r);
        }
    }

    if tail > 0 {
        unsafe {
            reduce_f64_op_avx2(&mut dst[chunks * 64..], &src[chunks * 64..], tail, op);
        }
    }
}

#[target_feature(enable = "avx2")]
pub(crate) unsafe fn reduce_f64_op_avx2(dst: &mut [u8], src: &[u8], count: usize, op: ReduceOp) {
    let dp = dst.as_mut_ptr() as *mut f64;
    let sp = src.as_ptr() as *const f64;
    let chunks = count / 4;
    let tail = count % 4;

    for i in 0..chunks {
        let off = i * 4;
        unsafe {
            let a = _mm256_loadu_pd(dp.add(off));
            let b = _mm256_loadu_pd(sp.add(off));
            let r = match op {
                ReduceOp::Add => _mm256_add_pd(a, b),
                ReduceOp::Sub => _mm256_sub_pd(a, b),
                ReduceOp::Mul => _mm256_mul_pd(a, b),
                ReduceOp::Div => _mm256_div_pd(a, b),
                ReduceOp::None => b,
            };
            _mm256_storeu_pd(dp.add(off), r);
        }
    }

    let base = chunks * 4;
    for i in 0..tail {
        let idx = base + i;
        unsafe {
            let a = dp.add(idx).read_unaligned();
            let b = sp.add(idx).read_unaligned();
            dp.add(idx).write_unaligned(f64::reduce(a, b, op));
        }
    }
}
