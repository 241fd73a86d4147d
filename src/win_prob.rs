use crate::calibration::Prob3;

pub const DEFAULT_MAX_GOALS: u32 = 10;

/// Home/draw/away probabilities from two independent Poisson goal counts on `[0, max_goals]²`.
///
/// Each pmf folds the mass above `max_goals` into its last bucket, so the grid
/// always sums to one; the cost is that every scoreline past the bound is
/// scored as if it ended exactly at `max_goals`.
pub fn outcome_probs(home_xg: f64, away_xg: f64, max_goals: u32) -> Prob3 {
    let pmf_h = poisson_pmf(home_xg, max_goals);
    let pmf_a = poisson_pmf(away_xg, max_goals);

    let mut p_home = 0.0;
    let mut p_draw = 0.0;
    let mut p_away = 0.0;

    for i in 0..pmf_h.len() {
        p_draw += pmf_h[i] * pmf_a[i];
        // Mirror each off-diagonal pair so equal rates give identical sums.
        for j in (i + 1)..pmf_h.len() {
            p_home += pmf_h[j] * pmf_a[i];
            p_away += pmf_h[i] * pmf_a[j];
        }
    }

    Prob3 {
        home: p_home,
        draw: p_draw,
        away: p_away,
    }
}

/// Truncated Poisson pmf over `0..=max_k`; negative or undefined rates collapse onto zero goals.
pub fn poisson_pmf(lambda: f64, max_k: u32) -> Vec<f64> {
    let max_k = max_k.max(1) as usize;
    let mut out = vec![0.0; max_k + 1];
    let lambda = if lambda.is_finite() { lambda.max(0.0) } else { 0.0 };

    out[0] = (-lambda).exp();
    for k in 1..=max_k {
        out[k] = out[k - 1] * lambda / k as f64;
    }

    let sum: f64 = out.iter().sum();
    if sum < 1.0 {
        out[max_k] += 1.0 - sum;
    }
    out
}
