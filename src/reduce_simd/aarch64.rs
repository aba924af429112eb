//! NEON reduction kernels for aarch64.

use std::arch::aarch64::*;

use crate::reduce::Reducible;
use crate::types::ReduceOp;

// ── f32 (NEON, 4-wide) ──────────────────────────────────────────────

pub(crate) unsafe fn reduce_f32_op_neon(dst: &mut [u8], src: &[u8], count: usize, op: ReduceOp) {
    unsafe {
        let dp = dst.as_mut_ptr() as *mut f32;
        let sp = src.as_ptr() as *const f32;
        let chunks = count / 4;
        let tail = count % 4;

        for i in 0..chunks {
            let off = i * 4;
            let a = vld1q_f32(dp.add(off));
            let b = vld1q_f32(sp.add(off));
            let r = match op {
                ReduceOp::Add => vaddq_f32(a, b),
                ReduceOp::Sub => vsubq_f32(a, b),
                ReduceOp::Mul => vmulq_f32(a, b),
                ReduceOp::Div => vdivq_f32(a, b),
                ReduceOp::None => b,
            };
            vst1q_f32(dp.add(off), r);
        }

        let base = chunks * 4;
        for i in 0..tail {
            let idx = base + i;
            let a = dp.add(idx).read_unaligned();
            let b = sp.add(idx).read_unaligned();
            dp.add(idx).write_unaligned(f32::reduce(a, b, op));
        }
    }
}

// ── f64 (NEON, 2-wide) ──────────────────────────────────────────────

pub(crate) unsafe fn reduce_f64_op_neon(dst: &mut [u8], src: &[u8], count: usize, op: ReduceOp) {
    unsafe {
        let dp = dst.as_mut_ptr() as *mut f64;
        let sp = src.as_ptr() as *const f64;
        let chunks = count / 2;
        let tail = count % 2;

        for i in 0..chunks {
            let off = i * 2;
            let a = vld1q_f64(dp.add(off));
            let b = vld1q_f64(sp.add(off));
            let r = match op {
                ReduceOp::Add => vaddq_f64(a, b),
                ReduceOp::Sub => vsubq_f64(a, b),
                ReduceOp::Mul => vmulq_f64(a, b),
                ReduceOp::Div => vdivq_f64(a, b),
                ReduceOp::None => b,
            };
            vst1q_f64(dp.add(off), r);
        }

        if tail > 0 {
            let idx = chunks * 2;
            let a = dp.add(idx).read_unaligned();
            let b = sp.add(idx).read_unaligned();
            dp.add(idx).write_unaligned(f64::reduce(a, b, op));
        }
    }
}
