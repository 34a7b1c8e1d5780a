//! Per-round trace of an optimization run.

use bf_types::{BfResult, Decision, Direction, RoundOutcome};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;

/// One decision round as it happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundRecord {
    pub round: u64,
    pub group_value: f64,
    pub target: i64,
    pub outcome: RoundOutcome,
    pub direction: Direction,
    pub record_value: f64,
    pub relative_delta: Option<f64>,
    pub recorded_at: DateTime<Utc>,
}

impl From<&Decision> for RoundRecord {
    fn from(decision: &Decision) -> Self {
        Self {
            round: decision.round,
            group_value: decision.group_value,
            target: decision.target,
            outcome: decision.outcome,
            direction: decision.direction,
            record_value: decision.record_value,
            relative_delta: decision.relative_delta,
            recorded_at: Utc::now(),
        }
    }
}

/// Ordered list of rounds, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FocusHistory {
    records: Vec<RoundRecord>,
}

impl FocusHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, decision: &Decision) {
        self.records.push(RoundRecord::from(decision));
    }

    pub fn records(&self) -> &[RoundRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn last(&self) -> Option<&RoundRecord> {
        self.records.last()
    }

    /// Round with the highest group value (earliest on ties).
    pub fn best(&self) -> Option<&RoundRecord> {
        self.records.iter().fold(None, |best, record| match best {
            Some(current) if current.group_value >= record.group_value => Some(current),
            _ => Some(record),
        })
    }

    /// Targets in round order.
    pub fn targets(&self) -> Vec<i64> {
        self.records.iter().map(|r| r.target).collect()
    }

    /// Write one JSON object per round.
    pub fn write_json_lines<W: Write>(&self, mut writer: W) -> BfResult<()> {
        for record in &self.records {
            serde_json::to_writer(&mut writer, record)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decision(round: u64, group_value: f64, target: i64, outcome: RoundOutcome) -> Decision {
        Decision {
            round,
            group_value,
            outcome,
            previous_target: target - 1,
            target,
            direction: Direction::Up,
            record_value: group_value,
            relative_delta: None,
        }
    }

    #[test]
    fn tracks_rounds_in_order() {
        let mut history = FocusHistory::new();
        assert!(history.is_empty());

        history.push(&decision(1, 100.0, 51, RoundOutcome::Initial));
        history.push(&decision(2, 110.0, 52, RoundOutcome::NewRecord));
        history.push(&decision(3, 105.0, 53, RoundOutcome::Closer));

        assert_eq!(history.len(), 3);
        assert_eq!(history.targets(), vec![51, 52, 53]);
        assert_eq!(history.last().unwrap().outcome, RoundOutcome::Closer);
        assert_eq!(history.best().unwrap().round, 2);
    }

    #[test]
    fn best_prefers_earliest_on_ties() {
        let mut history = FocusHistory::new();
        history.push(&decision(1, 7.0, 1, RoundOutcome::Initial));
        history.push(&decision(2, 7.0, 2, RoundOutcome::Reversed));
        assert_eq!(history.best().unwrap().round, 1);
    }

    #[test]
    fn json_lines_export() {
        let mut history = FocusHistory::new();
        history.push(&decision(1, 100.0, 51, RoundOutcome::Initial));
        history.push(&decision(2, 99.0, 50, RoundOutcome::Reversed));

        let mut buffer = Vec::new();
        history.write_json_lines(&mut buffer).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);

        let parsed: RoundRecord = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(parsed.target, 50);
        assert_eq!(parsed.outcome, RoundOutcome::Reversed);
    }
}
