use crate::config::threshold_grid;
use crate::types::OutcomeResult;

/// One candidate bet: the edge decides whether a threshold takes it, the
/// chronological profit stream feeds the Sharpe-like ratio and drawdown.
#[derive(Debug, Clone, Copy)]
pub struct SimBet {
    pub created_at: i64,
    /// Calibrated probability minus market-implied probability.
    pub edge: f64,
    pub result: OutcomeResult,
    pub unit_profit: f64,
}

/// Evaluation of one candidate edge threshold over a train set.
#[derive(Debug, Clone)]
pub struct CandidateEval {
    pub threshold: f64,
    pub total_bets: usize,
    pub wins: usize,
    pub losses: usize,
    pub pushes: usize,
    /// wins / (wins + losses) — pushes and voids sit outside the denominator.
    pub hit_rate: f64,
    /// Mean profit per unit staked.
    pub roi: f64,
    /// Mean unit profit over its standard deviation.
    pub sharpe: f64,
    /// Deepest peak-to-trough drop of the cumulative profit curve.
    pub max_drawdown: f64,
}

/// Inclusive candidate grid from the configured bounds.
pub fn candidate_grid() -> Vec<f64> {
    let mut grid = Vec::new();
    let mut edge = threshold_grid::MIN_EDGE;
    while edge <= threshold_grid::MAX_EDGE + 1e-9 {
        grid.push(edge);
        edge += threshold_grid::STEP;
    }
    grid
}

/// Simulate flat unit stakes on every candidate whose edge clears the
/// threshold. `candidates` must already be in chronological order.
pub fn evaluate_candidate(threshold: f64, candidates: &[SimBet]) -> CandidateEval {
    let mut wins = 0usize;
    let mut losses = 0usize;
    let mut pushes = 0usize;
    let mut taken = 0usize;
    let mut profits = Vec::new();
    for bet in candidates.iter().filter(|b| b.edge >= threshold) {
        taken += 1;
        match bet.result {
            OutcomeResult::Win => wins += 1,
            OutcomeResult::Loss => losses += 1,
            OutcomeResult::Push | OutcomeResult::Void => pushes += 1,
        }
        profits.push(bet.unit_profit);
    }

    let decided = wins + losses;
    let hit_rate = if decided == 0 {
        0.0
    } else {
        wins as f64 / decided as f64
    };

    CandidateEval {
        threshold,
        total_bets: taken,
        wins,
        losses,
        pushes,
        hit_rate,
        roi: mean(&profits),
        sharpe: sharpe_ratio(&profits),
        max_drawdown: max_drawdown(&profits),
    }
}

impl CandidateEval {
    /// Volume and hit-rate floors a candidate must clear to be considered.
    pub fn qualifies(&self) -> bool {
        self.total_bets >= threshold_grid::MIN_BETS && self.hit_rate >= threshold_grid::MIN_HIT_RATE
    }
}

/// Best qualifying candidate by Sharpe-like ratio; ties break toward the
/// lower threshold (more volume). None when nothing qualifies.
pub fn select_threshold(evals: &[CandidateEval]) -> Option<&CandidateEval> {
    let mut best: Option<&CandidateEval> = None;
    let mut qualifying = evals.iter().filter(|e| e.qualifies()).collect::<Vec<_>>();
    qualifying.sort_by(|a, b| a.threshold.total_cmp(&b.threshold));
    for eval in qualifying {
        match best {
            None => best = Some(eval),
            Some(current) if eval.sharpe > current.sharpe => best = Some(eval),
            _ => {}
        }
    }
    best
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Mean over sample standard deviation. 0.0 for degenerate streams so a
/// zero-variance candidate never dominates on a division artifact.
fn sharpe_ratio(profits: &[f64]) -> f64 {
    if profits.len() < 2 {
        return 0.0;
    }
    let m = mean(profits);
    let var = profits.iter().map(|p| (p - m).powi(2)).sum::<f64>() / (profits.len() - 1) as f64;
    let sd = var.sqrt();
    if sd <= f64::EPSILON {
        0.0
    } else {
        m / sd
    }
}

fn max_drawdown(profits: &[f64]) -> f64 {
    let mut cumulative = 0.0_f64;
    let mut peak = 0.0_f64;
    let mut worst = 0.0_f64;
    for p in profits {
        cumulative += p;
        peak = peak.max(cumulative);
        worst = worst.max(peak - cumulative);
    }
    worst
}
