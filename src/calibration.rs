use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Team1,
    Draw,
    Team2,
}

impl Outcome {
    /// Index order used by every probability vector in the crate.
    pub const ALL: [Outcome; 3] = [Outcome::Team1, Outcome::Draw, Outcome::Team2];

    pub fn index(self) -> usize {
        match self {
            Outcome::Team1 => 0,
            Outcome::Draw => 1,
            Outcome::Team2 => 2,
        }
    }

    pub fn from_index(idx: usize) -> Option<Self> {
        Self::ALL.get(idx).copied()
    }

    pub fn label(self) -> &'static str {
        match self {
            Outcome::Team1 => "team1",
            Outcome::Draw => "draw",
            Outcome::Team2 => "team2",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "team1" | "1" => Some(Outcome::Team1),
            "draw" | "x" => Some(Outcome::Draw),
            "team2" | "2" => Some(Outcome::Team2),
            _ => None,
        }
    }

    /// Fixed preference used when everything else is tied.
    fn tie_rank(self) -> u8 {
        match self {
            Outcome::Team1 => 0,
            Outcome::Team2 => 1,
            Outcome::Draw => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prob3 {
    pub team1: f64,
    pub draw: f64,
    pub team2: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub samples: usize,
    pub brier: f64,
    pub log_loss: f64,
    pub accuracy: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct CalibrationBin {
    pub bucket_start: f64,
    pub bucket_end: f64,
    pub count: usize,
    pub avg_pred: f64,
    pub actual_rate: f64,
}

impl Prob3 {
    pub fn uniform() -> Self {
        Self {
            team1: 1.0 / 3.0,
            draw: 1.0 / 3.0,
            team2: 1.0 / 3.0,
        }
    }

    pub fn zero() -> Self {
        Self {
            team1: 0.0,
            draw: 0.0,
            team2: 0.0,
        }
    }

    pub fn from_array(p: [f64; 3]) -> Self {
        Self {
            team1: p[0],
            draw: p[1],
            team2: p[2],
        }
    }

    pub fn to_array(self) -> [f64; 3] {
        [self.team1, self.draw, self.team2]
    }

    pub fn get(&self, outcome: Outcome) -> f64 {
        match outcome {
            Outcome::Team1 => self.team1,
            Outcome::Draw => self.draw,
            Outcome::Team2 => self.team2,
        }
    }

    pub fn set(&mut self, outcome: Outcome, value: f64) {
        match outcome {
            Outcome::Team1 => self.team1 = value,
            Outcome::Draw => self.draw = value,
            Outcome::Team2 => self.team2 = value,
        }
    }

    pub fn sum(&self) -> f64 {
        self.team1 + self.draw + self.team2
    }

    /// Clamps negatives/NaN to zero and rescales to sum 1. A degenerate input
    /// becomes uniform over `allowed`.
    pub fn normalized(self, allowed: &[Outcome]) -> Self {
        let mut out = Prob3::zero();
        for outcome in allowed {
            let v = self.get(*outcome);
            out.set(*outcome, if v.is_finite() && v > 0.0 { v } else { 0.0 });
        }
        let sum = out.sum();
        if sum <= 1e-12 {
            let share = 1.0 / allowed.len().max(1) as f64;
            let mut flat = Prob3::zero();
            for outcome in allowed {
                flat.set(*outcome, share);
            }
            return flat;
        }
        Prob3 {
            team1: out.team1 / sum,
            draw: out.draw / sum,
            team2: out.team2 / sum,
        }
    }
}

pub fn classify_outcome(team1_score: i64, team2_score: i64) -> Outcome {
    if team1_score > team2_score {
        Outcome::Team1
    } else if team1_score < team2_score {
        Outcome::Team2
    } else {
        Outcome::Draw
    }
}

/// Arg-max with deterministic tie-breaking: `preference` (best first) decides
/// between outcomes whose probability is equal, then team1, team2, draw.
pub fn argmax_with_preference(p: Prob3, preference: &[Outcome]) -> Outcome {
    const EPS: f64 = 1e-12;
    let best = Outcome::ALL
        .iter()
        .map(|o| p.get(*o))
        .fold(f64::NEG_INFINITY, f64::max);
    let mut tied: Vec<Outcome> = Outcome::ALL
        .iter()
        .copied()
        .filter(|o| (p.get(*o) - best).abs() <= EPS)
        .collect();
    match tied.len() {
        0 => return Outcome::Team1,
        1 => return tied[0],
        _ => {}
    }
    for pref in preference {
        if tied.contains(pref) {
            return *pref;
        }
    }
    tied.sort_by_key(|o| o.tie_rank());
    tied[0]
}

pub fn argmax(p: Prob3) -> Outcome {
    argmax_with_preference(p, &[])
}

pub fn evaluate_probs(predictions: &[Prob3], outcomes: &[Outcome]) -> Metrics {
    if predictions.is_empty() || outcomes.is_empty() || predictions.len() != outcomes.len() {
        return Metrics {
            samples: 0,
            brier: 0.0,
            log_loss: 0.0,
            accuracy: 0.0,
        };
    }

    let mut brier_sum = 0.0_f64;
    let mut log_loss_sum = 0.0_f64;
    let mut correct = 0usize;

    for (p, outcome) in predictions.iter().zip(outcomes) {
        let y = one_hot(*outcome);
        brier_sum += (p.team1 - y.team1).powi(2)
            + (p.draw - y.draw).powi(2)
            + (p.team2 - y.team2).powi(2);

        let actual_prob = p.get(*outcome).clamp(1e-12, 1.0);
        log_loss_sum += -actual_prob.ln();

        if argmax(*p) == *outcome {
            correct += 1;
        }
    }

    let n = predictions.len() as f64;
    Metrics {
        samples: predictions.len(),
        brier: brier_sum / n,
        log_loss: log_loss_sum / n,
        accuracy: correct as f64 / n,
    }
}

pub fn calibration_bins(
    predictions: &[Prob3],
    outcomes: &[Outcome],
    class: Outcome,
    bins: usize,
) -> Vec<CalibrationBin> {
    let bins = bins.max(2);
    let mut counts = vec![0usize; bins];
    let mut pred_sum = vec![0.0_f64; bins];
    let mut actual_sum = vec![0.0_f64; bins];

    for (p, outcome) in predictions.iter().zip(outcomes) {
        let class_prob = p.get(class).clamp(0.0, 1.0);

        let idx = ((class_prob * bins as f64).floor() as usize).min(bins - 1);
        counts[idx] += 1;
        pred_sum[idx] += class_prob;
        if *outcome == class {
            actual_sum[idx] += 1.0;
        }
    }

    let mut out = Vec::with_capacity(bins);
    for i in 0..bins {
        let start = i as f64 / bins as f64;
        let end = (i + 1) as f64 / bins as f64;
        let count = counts[i];
        let (avg_pred, actual_rate) = if count > 0 {
            (pred_sum[i] / count as f64, actual_sum[i] / count as f64)
        } else {
            (0.0, 0.0)
        };
        out.push(CalibrationBin {
            bucket_start: start,
            bucket_end: end,
            count,
            avg_pred,
            actual_rate,
        });
    }
    out
}

/// Count-weighted mean gap between predicted and observed frequency.
pub fn expected_calibration_error(bins: &[CalibrationBin]) -> f64 {
    let total: usize = bins.iter().map(|b| b.count).sum();
    if total == 0 {
        return 0.0;
    }
    bins.iter()
        .map(|b| b.count as f64 * (b.avg_pred - b.actual_rate).abs())
        .sum::<f64>()
        / total as f64
}

fn one_hot(outcome: Outcome) -> Prob3 {
    let mut p = Prob3::zero();
    p.set(outcome, 1.0);
    p
}
