//! Beta-distribution sampling for Thompson selection (spec.md §4.5).
//!
//! Single-pass approximation: `u = X/(X+Y)` where `X ~ Gamma(alpha,1)`,
//! `Y ~ Gamma(beta,1)`, each drawn via Marsaglia-Tsang. Reproducibility is
//! explicitly not required by the spec, so this reaches for `rand`'s thread
//! RNG the same way the teacher's `safety::rate_limiter` reaches for
//! wall-clock jitter — no seeded determinism attempted.

use rand::Rng;

/// Draws one sample from `Gamma(shape, 1)` via Marsaglia-Tsang. Valid for
/// `shape >= 1`; for `shape < 1` boosts via the standard `shape+1` trick and
/// corrects with a uniform draw.
fn sample_gamma(shape: f64, rng: &mut impl Rng) -> f64 {
    if shape < 1.0 {
        let u: f64 = rng.gen_range(0.0..1.0);
        return sample_gamma(shape + 1.0, rng) * u.powf(1.0 / shape);
    }

    let d = shape - 1.0 / 3.0;
    let c = 1.0 / (9.0 * d).sqrt();

    loop {
        let mut x;
        let mut v;
        loop {
            x = sample_standard_normal(rng);
            v = 1.0 + c * x;
            if v > 0.0 {
                break;
            }
        }
        v *= v * v;
        let u: f64 = rng.gen_range(0.0..1.0);
        if u < 1.0 - 0.0331 * x * x * x * x {
            return d * v;
        }
        if u.ln() < 0.5 * x * x + d * (1.0 - v + v.ln()) {
            return d * v;
        }
    }
}

fn sample_standard_normal(rng: &mut impl Rng) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen_range(0.0..1.0);
    (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
}

/// Draws one sample from `Beta(alpha, beta)`.
pub fn sample_beta(alpha: f64, beta: f64) -> f64 {
    let mut rng = rand::thread_rng();
    let x = sample_gamma(alpha, &mut rng);
    let y = sample_gamma(beta, &mut rng);
    if x + y <= 0.0 {
        0.5
    } else {
        x / (x + y)
    }
}
