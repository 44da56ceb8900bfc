//! SIMD-dispatched distance kernels.
//!
//! Each kernel has a portable scalar path (manually unrolled so the
//! compiler can auto-vectorize) and an AVX2+FMA path. The pair actually
//! used is picked once at startup from runtime CPU feature detection and
//! stored in a function-pointer table; every public entry point routes
//! through that table.

use crate::metric::Metric;
use std::sync::OnceLock;

type KernelFn = fn(&[f32], &[f32]) -> f32;

struct Kernels {
    l2: KernelFn,
    dot: KernelFn,
}

static KERNELS: OnceLock<Kernels> = OnceLock::new();

fn kernels() -> &'static Kernels {
    KERNELS.get_or_init(|| {
        #[cfg(target_arch = "x86_64")]
        {
            if std::arch::is_x86_feature_detected!("avx2")
                && std::arch::is_x86_feature_detected!("fma")
            {
                return Kernels {
                    l2: l2_avx2,
                    dot: dot_avx2,
                };
            }
        }
        Kernels {
            l2: l2_scalar,
            dot: dot_scalar,
        }
    })
}

/// Compute squared L2 (Euclidean) distance between two vectors.
///
/// Avoids the sqrt; use where only relative ordering matters.
#[inline]
pub fn l2_distance_squared(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "Vector dimensions must match");
    (kernels().l2)(a, b)
}

/// Compute dot product of two vectors.
#[inline]
pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "Vector dimensions must match");
    (kernels().dot)(a, b)
}

/// Compute inner-product distance: `1 - <a, b>`.
///
/// Larger dot products count as nearer. On L2-normalized inputs this
/// orders results identically to angular distance.
#[inline]
pub fn inner_product_distance(a: &[f32], b: &[f32]) -> f32 {
    1.0 - dot_product(a, b)
}

/// Compute the L2 norm (magnitude) of a vector.
#[inline]
pub fn l2_norm(v: &[f32]) -> f32 {
    dot_product(v, v).sqrt()
}

/// Compute distance between two vectors using the specified metric.
#[inline]
pub fn distance(a: &[f32], b: &[f32], metric: Metric) -> f32 {
    match metric {
        Metric::L2 => l2_distance_squared(a, b),
        Metric::InnerProduct => inner_product_distance(a, b),
    }
}

/// Normalize a vector to unit length (in-place).
pub fn normalize(v: &mut [f32]) {
    let norm = l2_norm(v);
    if norm > 0.0 {
        let inv_norm = 1.0 / norm;
        for x in v.iter_mut() {
            *x *= inv_norm;
        }
    }
}

/// Normalize a vector to unit length (returns new vector).
pub fn normalized(v: &[f32]) -> Vec<f32> {
    let mut result = v.to_vec();
    normalize(&mut result);
    result
}

fn l2_scalar(a: &[f32], b: &[f32]) -> f32 {
    // Four accumulators over 8-wide chunks keep the dependency chains short.
    let mut sum0 = 0.0f32;
    let mut sum1 = 0.0f32;
    let mut sum2 = 0.0f32;
    let mut sum3 = 0.0f32;

    let a_chunks = a.chunks_exact(8);
    let b_chunks = b.chunks_exact(8);
    let a_remainder = a_chunks.remainder();
    let b_remainder = b_chunks.remainder();

    for (a_chunk, b_chunk) in a_chunks.zip(b_chunks) {
        let d0 = a_chunk[0] - b_chunk[0];
        let d1 = a_chunk[1] - b_chunk[1];
        let d2 = a_chunk[2] - b_chunk[2];
        let d3 = a_chunk[3] - b_chunk[3];
        let d4 = a_chunk[4] - b_chunk[4];
        let d5 = a_chunk[5] - b_chunk[5];
        let d6 = a_chunk[6] - b_chunk[6];
        let d7 = a_chunk[7] - b_chunk[7];

        sum0 += d0 * d0 + d4 * d4;
        sum1 += d1 * d1 + d5 * d5;
        sum2 += d2 * d2 + d6 * d6;
        sum3 += d3 * d3 + d7 * d7;
    }

    for (a_val, b_val) in a_remainder.iter().zip(b_remainder.iter()) {
        let d = a_val - b_val;
        sum0 += d * d;
    }

    sum0 + sum1 + sum2 + sum3
}

fn dot_scalar(a: &[f32], b: &[f32]) -> f32 {
    let mut sum0 = 0.0f32;
    let mut sum1 = 0.0f32;
    let mut sum2 = 0.0f32;
    let mut sum3 = 0.0f32;

    let a_chunks = a.chunks_exact(8);
    let b_chunks = b.chunks_exact(8);
    let a_remainder = a_chunks.remainder();
    let b_remainder = b_chunks.remainder();

    for (a_chunk, b_chunk) in a_chunks.zip(b_chunks) {
        sum0 += a_chunk[0] * b_chunk[0] + a_chunk[4] * b_chunk[4];
        sum1 += a_chunk[1] * b_chunk[1] + a_chunk[5] * b_chunk[5];
        sum2 += a_chunk[2] * b_chunk[2] + a_chunk[6] * b_chunk[6];
        sum3 += a_chunk[3] * b_chunk[3] + a_chunk[7] * b_chunk[7];
    }

    for (a_val, b_val) in a_remainder.iter().zip(b_remainder.iter()) {
        sum0 += a_val * b_val;
    }

    sum0 + sum1 + sum2 + sum3
}

#[cfg(target_arch = "x86_64")]
fn l2_avx2(a: &[f32], b: &[f32]) -> f32 {
    // Only installed in the dispatch table after runtime AVX2+FMA detection.
    unsafe { l2_avx2_impl(a, b) }
}

#[cfg(target_arch = "x86_64")]
fn dot_avx2(a: &[f32], b: &[f32]) -> f32 {
    // Only installed in the dispatch table after runtime AVX2+FMA detection.
    unsafe { dot_avx2_impl(a, b) }
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2,fma")]
unsafe fn l2_avx2_impl(a: &[f32], b: &[f32]) -> f32 {
    use std::arch::x86_64::*;

    let n = a.len();
    let mut acc0 = _mm256_setzero_ps();
    let mut acc1 = _mm256_setzero_ps();

    let mut i = 0;
    while i + 16 <= n {
        let d0 = _mm256_sub_ps(
            _mm256_loadu_ps(a.as_ptr().add(i)),
            _mm256_loadu_ps(b.as_ptr().add(i)),
        );
        let d1 = _mm256_sub_ps(
            _mm256_loadu_ps(a.as_ptr().add(i + 8)),
            _mm256_loadu_ps(b.as_ptr().add(i + 8)),
        );
        acc0 = _mm256_fmadd_ps(d0, d0, acc0);
        acc1 = _mm256_fmadd_ps(d1, d1, acc1);
        i += 16;
    }
    while i + 8 <= n {
        let d = _mm256_sub_ps(
            _mm256_loadu_ps(a.as_ptr().add(i)),
            _mm256_loadu_ps(b.as_ptr().add(i)),
        );
        acc0 = _mm256_fmadd_ps(d, d, acc0);
        i += 8;
    }

    let mut sum = hsum256(_mm256_add_ps(acc0, acc1));
    while i < n {
        let d = *a.get_unchecked(i) - *b.get_unchecked(i);
        sum += d * d;
        i += 1;
    }
    sum
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2,fma")]
unsafe fn dot_avx2_impl(a: &[f32], b: &[f32]) -> f32 {
    use std::arch::x86_64::*;

    let n = a.len();
    let mut acc0 = _mm256_setzero_ps();
    let mut acc1 = _mm256_setzero_ps();

    let mut i = 0;
    while i + 16 <= n {
        acc0 = _mm256_fmadd_ps(
            _mm256_loadu_ps(a.as_ptr().add(i)),
            _mm256_loadu_ps(b.as_ptr().add(i)),
            acc0,
        );
        acc1 = _mm256_fmadd_ps(
            _mm256_loadu_ps(a.as_ptr().add(i + 8)),
            _mm256_loadu_ps(b.as_ptr().add(i + 8)),
            acc1,
        );
        i += 16;
    }
    while i + 8 <= n {
        acc0 = _mm256_fmadd_ps(
            _mm256_loadu_ps(a.as_ptr().add(i)),
            _mm256_loadu_ps(b.as_ptr().add(i)),
            acc0,
        );
        i += 8;
    }

    let mut sum = hsum256(_mm256_add_ps(acc0, acc1));
    while i < n {
        sum += *a.get_unchecked(i) * *b.get_unchecked(i);
        i += 1;
    }
    sum
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
#[inline]
unsafe fn hsum256(v: std::arch::x86_64::__m256) -> f32 {
    use std::arch::x86_64::*;

    let lo = _mm256_castps256_ps128(v);
    let hi = _mm256_extractf128_ps(v, 1);
    let s = _mm_add_ps(lo, hi);
    let s = _mm_add_ps(s, _mm_movehl_ps(s, s));
    let s = _mm_add_ss(s, _mm_shuffle_ps(s, s, 1));
    _mm_cvtss_f32(s)
}
