use crate::config::DEFAULT_BIN_WIDTH;

/// One probability band accumulating (predicted, outcome) pairs.
///
/// `lower` is inclusive; `upper` is exclusive except for the terminal bin,
/// which also accepts its upper bound so 1.0 has a home.
#[derive(Debug, Clone)]
pub struct CalibrationBin {
    pub label: String,
    pub lower: f64,
    pub upper: f64,
    count: usize,
    predicted_sum: f64,
    outcome_sum: f64,
    profit_sum: f64,
    profit_count: usize,
}

impl CalibrationBin {
    pub fn new(lower: f64, upper: f64) -> Self {
        Self {
            label: format!("{:.0}-{:.0}%", lower * 100.0, upper * 100.0),
            lower,
            upper,
            count: 0,
            predicted_sum: 0.0,
            outcome_sum: 0.0,
            profit_sum: 0.0,
            profit_count: 0,
        }
    }

    pub fn contains(&self, prob: f64, terminal: bool) -> bool {
        if terminal {
            prob >= self.lower && prob <= self.upper
        } else {
            prob >= self.lower && prob < self.upper
        }
    }

    pub fn record(&mut self, predicted: f64, outcome: f64, profit: Option<f64>) {
        self.count += 1;
        self.predicted_sum += predicted;
        self.outcome_sum += outcome;
        if let Some(p) = profit {
            self.profit_sum += p;
            self.profit_count += 1;
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn midpoint(&self) -> f64 {
        (self.lower + self.upper) / 2.0
    }

    /// Mean predicted probability of samples in this bin. 0.0 when empty.
    pub fn mean_predicted(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.predicted_sum / self.count as f64
        }
    }

    /// Empirical win frequency of samples in this bin. 0.0 when empty.
    pub fn mean_actual(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.outcome_sum / self.count as f64
        }
    }

    /// |mean predicted - mean actual|.
    pub fn calibration_error(&self) -> f64 {
        (self.mean_predicted() - self.mean_actual()).abs()
    }

    /// Multiplicative correction: actual frequency over stated confidence.
    /// Neutral (1.0) when the bin is empty or the mean prediction is zero.
    pub fn calibration_factor(&self) -> f64 {
        let predicted = self.mean_predicted();
        if self.count == 0 || predicted <= f64::EPSILON {
            1.0
        } else {
            self.mean_actual() / predicted
        }
    }

    /// Mean profit per sample that carried a profit. 0.0 when none did.
    pub fn mean_profit(&self) -> f64 {
        if self.profit_count == 0 {
            0.0
        } else {
            self.profit_sum / self.profit_count as f64
        }
    }
}

/// Uniform bin edges covering [0, 1] at the given width. The final edge is
/// pinned to exactly 1.0 to absorb accumulated float error.
pub fn uniform_boundaries(width: f64) -> Vec<f64> {
    let mut edges = Vec::new();
    let mut edge = 0.0;
    while edge < 1.0 - width / 2.0 {
        edges.push(edge);
        edge += width;
    }
    edges.push(1.0);
    edges
}

pub fn bins_from_boundaries(boundaries: &[f64]) -> Vec<CalibrationBin> {
    boundaries
        .windows(2)
        .map(|w| CalibrationBin::new(w[0], w[1]))
        .collect()
}

/// Label of the default-width bin a probability falls into, for standalone
/// callers that don't hold an engine (record grading, live factor lookup).
pub fn bin_label(prob: f64) -> String {
    let clamped = prob.clamp(0.0, 1.0);
    let n_bins = (1.0 / DEFAULT_BIN_WIDTH).round() as usize;
    let idx = ((clamped / DEFAULT_BIN_WIDTH).floor() as usize).min(n_bins - 1);
    let lower = idx as f64 * DEFAULT_BIN_WIDTH;
    let upper = (lower + DEFAULT_BIN_WIDTH).min(1.0);
    format!("{:.0}-{:.0}%", lower * 100.0, upper * 100.0)
}
