use serde::{Deserialize, Serialize};

use crate::forest::CLASSES;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LogisticParams {
    pub learning_rate: f64,
    pub epochs: usize,
    pub l2: f64,
}

impl Default for LogisticParams {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            epochs: 300,
            l2: 1e-3,
        }
    }
}

/// Multinomial (softmax) logistic regression on already scaled inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoftmaxRegression {
    pub params: LogisticParams,
    /// One weight row per class.
    pub weights: Vec<Vec<f64>>,
    pub bias: Vec<f64>,
}

fn softmax(z: &[f64; CLASSES]) -> [f64; CLASSES] {
    let max = z.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exp = z.map(|v| (v - max).exp());
    let sum: f64 = exp.iter().sum();
    if !sum.is_finite() || sum <= 0.0 {
        return [1.0 / CLASSES as f64; CLASSES];
    }
    exp.map(|v| v / sum)
}

impl SoftmaxRegression {
    /// Full-batch gradient descent from zero weights; deterministic.
    pub fn fit(rows: &[Vec<f64>], labels: &[usize], params: LogisticParams) -> Self {
        let n = rows.len().min(labels.len());
        let width = rows.first().map(|r| r.len()).unwrap_or(0);
        let mut model = Self {
            params,
            weights: vec![vec![0.0; width]; CLASSES],
            bias: vec![0.0; CLASSES],
        };
        if n == 0 {
            return model;
        }

        let inv_n = 1.0 / n as f64;
        for _ in 0..params.epochs {
            let mut grad_w = vec![vec![0.0; width]; CLASSES];
            let mut grad_b = vec![0.0; CLASSES];
            for (row, &label) in rows.iter().zip(labels).take(n) {
                let p = model.predict_proba(row);
                for k in 0..CLASSES {
                    let err = p[k] - if k == label { 1.0 } else { 0.0 };
                    grad_b[k] += err;
                    for (g, x) in grad_w[k].iter_mut().zip(row) {
                        *g += err * x;
                    }
                }
            }
            for k in 0..CLASSES {
                for (w, g) in model.weights[k].iter_mut().zip(&grad_w[k]) {
                    *w -= params.learning_rate * (g * inv_n + params.l2 * *w);
                }
                model.bias[k] -= params.learning_rate * grad_b[k] * inv_n;
            }
        }
        model
    }

    pub fn predict_proba(&self, row: &[f64]) -> [f64; CLASSES] {
        let mut z = [0.0; CLASSES];
        for k in 0..CLASSES {
            let dot: f64 = self.weights[k].iter().zip(row).map(|(w, x)| w * x).sum();
            z[k] = dot + self.bias[k];
        }
        softmax(&z)
    }
}
