//! Piecewise recall model for ef_search sweeps.
//!
//! Recall of a filtered graph search is modelled against `x = ef_search`.
//! Below the transition point `x_c = k * topk / selectivity` recall grows
//! linearly with the effective beam (`x * selectivity / topk`); above it, a
//! sigmoid with steepness `b = beta * 4 * selectivity / topk` takes over,
//! shifted so both pieces meet at `x_c`.

use crate::error::{BenchError, Result};
use serde::{Deserialize, Serialize};

/// Fitted model parameters plus the operating point they were fitted at.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecallModel {
    /// Transition parameter.
    pub k: f64,
    /// Sigmoid steepness parameter.
    pub beta: f64,
    pub selectivity: f64,
    pub topk: usize,
    /// Sum of squared residuals over the fitted points.
    pub residual: f64,
}

impl RecallModel {
    pub fn new(k: f64, beta: f64, selectivity: f64, topk: usize) -> Self {
        Self {
            k,
            beta,
            selectivity,
            topk,
            residual: 0.0,
        }
    }

    /// Effective beam of a search: the eligible share of the beam, in units
    /// of topk. Reported alongside sweep points; the model itself takes ef.
    pub fn effective_x(ef_search: usize, selectivity: f64, topk: usize) -> f64 {
        ef_search as f64 * selectivity / topk as f64
    }

    /// Transition point between the linear and sigmoid pieces, in ef units.
    pub fn transition(&self) -> f64 {
        self.k * self.topk as f64 / self.selectivity
    }

    /// Predicted recall at `x = ef_search`, clamped to `[0, 1]`.
    pub fn predict(&self, x: f64) -> f64 {
        if self.selectivity <= 0.0 || self.topk == 0 {
            return 0.0;
        }
        let slope = self.selectivity / self.topk as f64;
        let x_c = self.transition();
        let y = if x <= x_c {
            x * slope
        } else {
            let b = self.beta * 4.0 * slope;
            let shift = x_c * slope - 0.5;
            1.0 / (1.0 + (-b * (x - x_c)).exp()) + shift
        };
        y.clamp(0.0, 1.0)
    }

    /// Predicted recall for an ef_search value at the model's operating point.
    pub fn predict_ef(&self, ef_search: usize) -> f64 {
        self.predict(ef_search as f64)
    }

    fn loss(&self, points: &[(f64, f64)]) -> f64 {
        points
            .iter()
            .map(|&(x, y)| {
                let r = self.predict(x) - y;
                r * r
            })
            .sum()
    }

    /// Least-squares fit of `(k, beta)` to `(ef_search, recall)` points.
    ///
    /// Deterministic: a coarse grid search followed by pattern-search
    /// refinement around the best grid point.
    pub fn fit(points: &[(f64, f64)], selectivity: f64, topk: usize) -> Result<Self> {
        if points.len() < 2 {
            return Err(BenchError::invalid_parameter(
                "recall model needs at least two sweep points",
            ));
        }
        if !(selectivity > 0.0 && selectivity <= 1.0) || topk == 0 {
            return Err(BenchError::invalid_parameter(format!(
                "recall model needs selectivity in (0, 1] and topk > 0, got {} and {}",
                selectivity, topk
            )));
        }

        let mut best = Self::new(0.4, 1.0, selectivity, topk);
        let mut best_loss = best.loss(points);
        for i in 1..=40 {
            for j in 0..=20 {
                let candidate = Self::new(
                    i as f64 * 0.05,
                    0.1 * 10f64.powf(j as f64 / 10.0),
                    selectivity,
                    topk,
                );
                let loss = candidate.loss(points);
                if loss < best_loss {
                    best = candidate;
                    best_loss = loss;
                }
            }
        }

        let mut dk = 0.025;
        let mut dbeta = best.beta * 0.25;
        for _ in 0..200 {
            let moves = [(dk, 0.0), (-dk, 0.0), (0.0, dbeta), (0.0, -dbeta)];
            let mut improved = false;
            for (ddk, ddb) in moves {
                let candidate = Self::new(best.k + ddk, best.beta + ddb, selectivity, topk);
                if candidate.k <= 0.0 || candidate.beta <= 0.0 {
                    continue;
                }
                let loss = candidate.loss(points);
                if loss < best_loss {
                    best = candidate;
                    best_loss = loss;
                    improved = true;
                }
            }
            if !improved {
                dk *= 0.5;
                dbeta *= 0.5;
                if dk < 1e-9 && dbeta < 1e-9 {
                    break;
                }
            }
        }

        best.residual = best_loss;
        Ok(best)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pieces_meet_at_transition() {
        let model = RecallModel::new(0.4, 1.0, 0.25, 10);
        let x_c = model.transition();
        assert!((x_c - 16.0).abs() < 1e-9);
        assert!((model.predict(x_c) - 0.4).abs() < 1e-9);
        assert!((model.predict(x_c + 1e-9) - 0.4).abs() < 1e-6);
        assert!((model.predict(8.0) - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_predict_takes_raw_ef() {
        // k = 0.4, beta = 1, sel = 0.25, topk = 10: x_c = 16, b = 0.1, shift = -0.1.
        let model = RecallModel::new(0.4, 1.0, 0.25, 10);
        let sigmoid = |ef: f64| 1.0 / (1.0 + (-0.1 * (ef - 16.0)).exp()) - 0.1;

        assert!((model.predict_ef(40) - 0.8168).abs() < 1e-4);
        for ef in [20, 40, 64, 100] {
            assert!((model.predict_ef(ef) - sigmoid(ef as f64)).abs() < 1e-12);
            assert_eq!(model.predict_ef(ef), model.predict(ef as f64));
        }
        assert!((model.predict_ef(12) - 0.3).abs() < 1e-12);
        assert!((RecallModel::effective_x(40, 0.25, 10) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_predict_is_monotone_and_bounded() {
        let model = RecallModel::new(0.6, 2.0, 0.5, 10);
        let mut last = 0.0;
        for ef in (10..=2000).step_by(10) {
            let y = model.predict_ef(ef);
            assert!((0.0..=1.0).contains(&y));
            assert!(y >= last);
            last = y;
        }
    }

    #[test]
    fn test_fit_recovers_parameters() {
        let truth = RecallModel::new(0.4, 1.0, 0.25, 10);
        let points: Vec<(f64, f64)> = [4, 8, 12, 16, 24, 32, 48, 64, 96, 128]
            .iter()
            .map(|&ef| (ef as f64, truth.predict_ef(ef)))
            .collect();

        let fitted = RecallModel::fit(&points, 0.25, 10).unwrap();
        assert!(fitted.residual < 1e-4, "residual {}", fitted.residual);
        for &(x, y) in &points {
            assert!((fitted.predict(x) - y).abs() < 0.01);
        }
    }

    #[test]
    fn test_fit_input_checks() {
        assert!(RecallModel::fit(&[(1.0, 0.5)], 0.5, 10).is_err());
        assert!(RecallModel::fit(&[(1.0, 0.5), (2.0, 0.6)], 0.0, 10).is_err());
        assert!(RecallModel::fit(&[(1.0, 0.5), (2.0, 0.6)], 0.5, 0).is_err());
    }
}
