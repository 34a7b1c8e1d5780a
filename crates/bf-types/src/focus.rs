//! Decision vocabulary shared by the optimizer and the controller.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::BfResult;

/// Search direction along the focus axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    /// `+1` or `-1`; never zero.
    pub fn sign(self) -> i64 {
        match self {
            Self::Up => 1,
            Self::Down => -1,
        }
    }

    pub fn reversed(self) -> Self {
        match self {
            Self::Up => Self::Down,
            Self::Down => Self::Up,
        }
    }

    pub fn from_bool(up: bool) -> Self {
        if up {
            Self::Up
        } else {
            Self::Down
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:+}", self.sign())
    }
}

/// Inclusive clamp range for the focus target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bounds {
    pub lower: i64,
    pub upper: i64,
}

impl Bounds {
    /// `[initial - margin, initial + margin]` intersected with
    /// `[-global, global]`.
    pub fn around(initial: i64, margin: i64, global: i64) -> BfResult<Self> {
        if margin < 0 {
            return Err(crate::config_error!("bound margin must be non-negative, got {margin}"));
        }
        if global <= 0 {
            return Err(crate::config_error!("global bound must be positive, got {global}"));
        }

        if initial < -global || initial > global {
            return Err(crate::config_error!(
                "initial target {initial} lies outside the global range [-{global}, {global}]"
            ));
        }

        Ok(Self {
            lower: initial.saturating_sub(margin).max(-global),
            upper: initial.saturating_add(margin).min(global),
        })
    }

    pub fn clamp(&self, value: i64) -> i64 {
        value.clamp(self.lower, self.upper)
    }

    pub fn contains(&self, value: i64) -> bool {
        (self.lower..=self.upper).contains(&value)
    }
}

impl fmt::Display for Bounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.lower, self.upper)
    }
}

/// Why a decision round ended the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoundOutcome {
    /// First group: the value at the initial target becomes the record and the
    /// target takes its first step.
    Initial,
    /// Group value beat the record; keep going.
    NewRecord,
    /// Not a record, but closer to it than the previous round; keep going.
    Closer,
    /// Within tolerance of the record; hold the target.
    Converged,
    /// Moving away from the record; turn around.
    Reversed,
}

impl RoundOutcome {
    pub fn holds_target(self) -> bool {
        matches!(self, Self::Converged)
    }
}

impl fmt::Display for RoundOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Initial => "initial step",
            Self::NewRecord => "new record",
            Self::Closer => "closer approach",
            Self::Converged => "converged",
            Self::Reversed => "reversed",
        };
        f.write_str(label)
    }
}

/// Result of one optimizer round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    /// 1-based round number.
    pub round: u64,
    pub group_value: f64,
    pub outcome: RoundOutcome,
    pub previous_target: i64,
    pub target: i64,
    /// Direction after this round.
    pub direction: Direction,
    /// Record after this round.
    pub record_value: f64,
    /// Signed deviation of `group_value` from the record, when computed.
    pub relative_delta: Option<f64>,
}

impl Decision {
    pub fn is_hold(&self) -> bool {
        self.outcome.holds_target()
    }

    /// Whether the actuator needs the new target.
    pub fn target_changed(&self) -> bool {
        self.target != self.previous_target
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_hold() {
            write!(
                f,
                "round {}: group value {:.4}, target held at {} ({})",
                self.round, self.group_value, self.target, self.outcome
            )
        } else {
            write!(
                f,
                "round {}: group value {:.4}, target {} -> {} ({})",
                self.round, self.group_value, self.previous_target, self.target, self.outcome
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BfError;

    #[test]
    fn direction_reversal_never_zero() {
        assert_eq!(Direction::Up.sign(), 1);
        assert_eq!(Direction::Down.sign(), -1);
        assert_eq!(Direction::Up.reversed(), Direction::Down);
        assert_eq!(Direction::Down.reversed().reversed(), Direction::Down);
        assert_eq!(Direction::Up.to_string(), "+1");
    }

    #[test]
    fn bounds_use_margin_inside_global_range() {
        let bounds = Bounds::around(50, 20, 200).unwrap();
        assert_eq!(bounds, Bounds { lower: 30, upper: 70 });
        assert_eq!(bounds.clamp(71), 70);
        assert_eq!(bounds.clamp(12), 30);
        assert!(bounds.contains(30) && bounds.contains(70));
    }

    #[test]
    fn bounds_are_cut_by_global_range() {
        let bounds = Bounds::around(190, 20, 200).unwrap();
        assert_eq!(bounds, Bounds { lower: 170, upper: 200 });

        let bounds = Bounds::around(-195, 20, 200).unwrap();
        assert_eq!(bounds, Bounds { lower: -200, upper: -175 });
    }

    #[test]
    fn bounds_reject_target_outside_global_range() {
        let err = Bounds::around(250, 20, 200).unwrap_err();
        assert!(matches!(err, BfError::Config(_)));
        // Overlapping the global range is not enough.
        assert!(Bounds::around(210, 20, 200).is_err());
        assert!(Bounds::around(-201, 20, 200).is_err());
        assert_eq!(
            Bounds::around(200, 20, 200).unwrap(),
            Bounds { lower: 180, upper: 200 }
        );
        assert!(Bounds::around(0, -1, 200).is_err());
        assert!(Bounds::around(0, 20, 0).is_err());
    }

    #[test]
    fn decision_display_mentions_hold() {
        let decision = Decision {
            round: 3,
            group_value: 109.99,
            outcome: RoundOutcome::Converged,
            previous_target: 52,
            target: 52,
            direction: Direction::Up,
            record_value: 110.0,
            relative_delta: Some(-0.0001),
        };
        assert!(decision.is_hold());
        assert!(!decision.target_changed());
        assert!(decision.to_string().contains("held at 52"));
        assert!(decision.to_string().contains("converged"));
    }
}
