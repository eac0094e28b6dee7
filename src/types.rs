use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Segment — league + market kind, the unit everything is keyed by
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Segment {
    pub league: String,
    pub market: MarketKind,
}

impl Segment {
    pub fn new(league: impl Into<String>, market: MarketKind) -> Self {
        Self {
            league: league.into(),
            market,
        }
    }

    /// "nba/moneyline" — used in config keys and log lines.
    pub fn key(&self) -> String {
        format!("{}/{}", self.league, self.market)
    }
}

impl std::fmt::Display for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.league, self.market)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketKind {
    Moneyline,
    Spread,
    Total,
    PlayerProp,
}

impl MarketKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "moneyline" => Some(MarketKind::Moneyline),
            "spread" => Some(MarketKind::Spread),
            "total" => Some(MarketKind::Total),
            "player_prop" => Some(MarketKind::PlayerProp),
            _ => None,
        }
    }
}

impl std::fmt::Display for MarketKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MarketKind::Moneyline => "moneyline",
            MarketKind::Spread => "spread",
            MarketKind::Total => "total",
            MarketKind::PlayerProp => "player_prop",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Prediction payload — what the model asserted at decision time
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionPayload {
    /// Win probability for the taken selection.
    pub probability: f64,
    /// Which side was taken ("home", "away", "over", "under", ...).
    pub selection: String,
    /// Predicted outcome distribution, present for continuous markets
    /// (spread margin, game total, player prop value).
    pub distribution: Option<OutcomeDistribution>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OutcomeDistribution {
    pub mean: f64,
    pub std_dev: f64,
}

// ---------------------------------------------------------------------------
// Market payload — closed tagged union over the supported market shapes
// ---------------------------------------------------------------------------

/// Market-implied pricing at placement. Spread/total carry their line,
/// player props additionally carry the prop name.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MarketPayload {
    Moneyline {
        implied_prob: f64,
        decimal_odds: Option<f64>,
    },
    Spread {
        line: f64,
        implied_prob: f64,
        decimal_odds: Option<f64>,
    },
    Total {
        line: f64,
        implied_prob: f64,
        decimal_odds: Option<f64>,
    },
    PlayerProp {
        prop: String,
        line: f64,
        implied_prob: f64,
        decimal_odds: Option<f64>,
    },
}

impl MarketPayload {
    pub fn kind(&self) -> MarketKind {
        match self {
            MarketPayload::Moneyline { .. } => MarketKind::Moneyline,
            MarketPayload::Spread { .. } => MarketKind::Spread,
            MarketPayload::Total { .. } => MarketKind::Total,
            MarketPayload::PlayerProp { .. } => MarketKind::PlayerProp,
        }
    }

    pub fn implied_prob(&self) -> f64 {
        match self {
            MarketPayload::Moneyline { implied_prob, .. }
            | MarketPayload::Spread { implied_prob, .. }
            | MarketPayload::Total { implied_prob, .. }
            | MarketPayload::PlayerProp { implied_prob, .. } => *implied_prob,
        }
    }

    pub fn decimal_odds(&self) -> Option<f64> {
        match self {
            MarketPayload::Moneyline { decimal_odds, .. }
            | MarketPayload::Spread { decimal_odds, .. }
            | MarketPayload::Total { decimal_odds, .. }
            | MarketPayload::PlayerProp { decimal_odds, .. } => *decimal_odds,
        }
    }

    pub fn line(&self) -> Option<f64> {
        match self {
            MarketPayload::Moneyline { .. } => None,
            MarketPayload::Spread { line, .. }
            | MarketPayload::Total { line, .. }
            | MarketPayload::PlayerProp { line, .. } => Some(*line),
        }
    }

    pub fn prop(&self) -> Option<&str> {
        match self {
            MarketPayload::PlayerProp { prop, .. } => Some(prop),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Outcome payload — what actually happened
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeResult {
    Win,
    Loss,
    /// Landed exactly on the line — stake returned.
    Push,
    /// Market cancelled (postponement, scratched player).
    Void,
}

impl OutcomeResult {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "win" => Some(OutcomeResult::Win),
            "loss" => Some(OutcomeResult::Loss),
            "push" => Some(OutcomeResult::Push),
            "void" => Some(OutcomeResult::Void),
            _ => None,
        }
    }

    /// Binary outcome for scoring: 1.0 win, 0.0 loss, None for push/void.
    pub fn binary(&self) -> Option<f64> {
        match self {
            OutcomeResult::Win => Some(1.0),
            OutcomeResult::Loss => Some(0.0),
            OutcomeResult::Push | OutcomeResult::Void => None,
        }
    }
}

impl std::fmt::Display for OutcomeResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OutcomeResult::Win => "win",
            OutcomeResult::Loss => "loss",
            OutcomeResult::Push => "push",
            OutcomeResult::Void => "void",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomePayload {
    pub result: OutcomeResult,
    /// Realized value for continuous markets (final margin, total points, ...).
    pub actual_value: Option<f64>,
    /// Market-implied probability at close, if captured.
    pub closing_prob: Option<f64>,
}

// ---------------------------------------------------------------------------
// Record lifecycle
// ---------------------------------------------------------------------------

/// Monotonic lifecycle: pending -> resolved -> graded. Invalid is terminal
/// and reachable from pending or resolved, never from graded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Pending,
    Resolved,
    Graded,
    Invalid,
}

impl RecordStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(RecordStatus::Pending),
            "resolved" => Some(RecordStatus::Resolved),
            "graded" => Some(RecordStatus::Graded),
            "invalid" => Some(RecordStatus::Invalid),
            _ => None,
        }
    }

    pub fn can_transition_to(self, next: RecordStatus) -> bool {
        matches!(
            (self, next),
            (RecordStatus::Pending, RecordStatus::Resolved)
                | (RecordStatus::Resolved, RecordStatus::Graded)
                | (RecordStatus::Pending, RecordStatus::Invalid)
                | (RecordStatus::Resolved, RecordStatus::Invalid)
        )
    }
}

impl std::fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RecordStatus::Pending => "pending",
            RecordStatus::Resolved => "resolved",
            RecordStatus::Graded => "graded",
            RecordStatus::Invalid => "invalid",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Grading metrics — attached once, when a record is graded
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradedMetrics {
    /// Squared error (p - outcome)^2. None for push/void.
    pub brier_component: Option<f64>,
    /// Clamped negative log likelihood. None for push/void.
    pub log_loss_component: Option<f64>,
    /// Label of the probability band the prediction fell into, e.g. "70-75%".
    pub confidence_bin: String,
    /// Where the realized value landed in the predicted distribution (CDF).
    pub percentile_rank: Option<f64>,
    /// True when the record had positive edge and won.
    pub edge_realized: bool,
    /// Closing implied probability minus placement implied probability.
    /// Positive means the market moved toward our side.
    pub closing_line_value: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_key_formats_league_and_market() {
        let seg = Segment::new("nba", MarketKind::PlayerProp);
        assert_eq!(seg.key(), "nba/player_prop");
        assert_eq!(seg.to_string(), "nba/player_prop");
    }

    #[test]
    fn market_kind_roundtrips_through_parse() {
        for kind in [
            MarketKind::Moneyline,
            MarketKind::Spread,
            MarketKind::Total,
            MarketKind::PlayerProp,
        ] {
            assert_eq!(MarketKind::parse(&kind.to_string()), Some(kind));
        }
        assert_eq!(MarketKind::parse("parlay"), None);
    }

    #[test]
    fn market_payload_accessors() {
        let ml = MarketPayload::Moneyline {
            implied_prob: 0.55,
            decimal_odds: Some(1.82),
        };
        assert_eq!(ml.kind(), MarketKind::Moneyline);
        assert_eq!(ml.line(), None);
        assert_eq!(ml.prop(), None);

        let prop = MarketPayload::PlayerProp {
            prop: "points".to_string(),
            line: 25.5,
            implied_prob: 0.52,
            decimal_odds: None,
        };
        assert_eq!(prop.kind(), MarketKind::PlayerProp);
        assert_eq!(prop.line(), Some(25.5));
        assert_eq!(prop.prop(), Some("points"));
    }

    #[test]
    fn status_transitions_are_monotonic() {
        use RecordStatus::*;
        assert!(Pending.can_transition_to(Resolved));
        assert!(Resolved.can_transition_to(Graded));
        assert!(Pending.can_transition_to(Invalid));
        assert!(Resolved.can_transition_to(Invalid));

        assert!(!Resolved.can_transition_to(Pending));
        assert!(!Graded.can_transition_to(Resolved));
        assert!(!Graded.can_transition_to(Invalid));
        assert!(!Invalid.can_transition_to(Pending));
        assert!(!Pending.can_transition_to(Graded));
    }

    #[test]
    fn push_and_void_have_no_binary_outcome() {
        assert_eq!(OutcomeResult::Win.binary(), Some(1.0));
        assert_eq!(OutcomeResult::Loss.binary(), Some(0.0));
        assert_eq!(OutcomeResult::Push.binary(), None);
        assert_eq!(OutcomeResult::Void.binary(), None);
    }

    #[test]
    fn market_payload_serializes_with_kind_tag() {
        let total = MarketPayload::Total {
            line: 218.5,
            implied_prob: 0.5,
            decimal_odds: Some(1.91),
        };
        let json = serde_json::to_value(&total).unwrap();
        assert_eq!(json["kind"], "total");
        assert_eq!(json["line"], 218.5);
    }
}
