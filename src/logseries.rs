//! Log-series abundance sampling.

use anyhow::{Result, bail};
use rand::Rng;

/// Largest integer-resolving f64: above this, `size + 1.0 == size`.
const MAX_EXACT_SIZE: f64 = 9_007_199_254_740_992.0;

/// Draw `n` abundances from a log-series distribution with parameter
/// `x = size / (size + alpha)`.
///
/// The draws share a single forward sweep over the cumulative distribution:
/// the underlying uniforms are sorted ascending and the abundance candidate
/// `k` only ever advances, using the recurrence
/// `P(k+1) = P(k) * k * x / (k + 1)`. The returned abundances are therefore
/// in ascending rank order of the uniform draws, not in draw order.
///
/// The optional `progress` callback receives `(assigned, n)` after each
/// assigned draw. It is a caller-visible side effect only and has no
/// influence on the output.
///
/// # Errors
/// Fails if `alpha` is not positive, if `size` is not positive, or if `size`
/// is too large to resolve neighboring integers in an f64.
pub fn draw<R: Rng + ?Sized>(
    n: usize,
    size: f64,
    alpha: f64,
    rng: &mut R,
    mut progress: Option<&mut dyn FnMut(usize, usize)>,
) -> Result<Vec<u64>> {
    if !(alpha > 0.0) {
        bail!("Fisher's alpha must be positive, but is {alpha}");
    }
    if !(size > 0.0) {
        bail!("community size must be positive, but is {size}");
    }
    if size >= MAX_EXACT_SIZE {
        bail!("community size {size} exceeds the integer resolution of f64");
    }

    let mut unifs: Vec<f64> = (0..n).map(|_| rng.random()).collect();
    unifs.sort_unstable_by(f64::total_cmp);

    let x = size / (size + alpha);
    // -ln(1 - x), with 1 - x computed directly to avoid cancellation.
    let norm = -(alpha / (size + alpha)).ln();

    let mut abundances = Vec::with_capacity(n);
    let mut k: u64 = 1;
    let mut prob = x / norm;
    let mut cum = prob;

    for (i, &u) in unifs.iter().enumerate() {
        while cum <= u {
            if prob == 0.0 {
                // Tail underflow: the cumulative can no longer advance.
                break;
            }
            prob *= x * k as f64 / (k as f64 + 1.0);
            k += 1;
            cum += prob;
        }
        abundances.push(k);
        if let Some(report) = progress.as_mut() {
            report(i + 1, n);
        }
    }

    Ok(abundances)
}
