//! Single-variable hill climbing on the focus target.
//!
//! Each call to [`HillClimber::decide`] consumes one group value and moves
//! through three phases:
//!
//! 1. **Bootstrap** (first group): the value measured at the initial target
//!    becomes the record and the target takes one step in the initial
//!    direction.
//! 2. **First comparison** (second group): a new record keeps the direction,
//!    anything else reverses it.
//! 3. **Steady** (every later group): the first matching rule wins:
//!    new record, closer than the previous round, within tolerance (hold),
//!    otherwise reverse.
//!
//! A failed round leaves the state exactly as it was.

use bf_types::{
    internal_error, invalid_measurement, BfError, BfResult, Bounds, Decision, Direction,
    FocusConfig, RoundOutcome,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::history::FocusHistory;

/// Pick the initial search direction. Seeded runs are reproducible.
pub fn random_direction(seed: Option<u64>) -> Direction {
    let up = match seed {
        Some(seed) => StdRng::seed_from_u64(seed).gen_bool(0.5),
        None => rand::thread_rng().gen_bool(0.5),
    };
    Direction::from_bool(up)
}

/// Tuning constants for the search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClimberSettings {
    pub step_size: i64,
    pub bound_margin: i64,
    pub global_bound: i64,
    pub convergence_tolerance: f64,
}

impl Default for ClimberSettings {
    fn default() -> Self {
        Self {
            step_size: 1,
            bound_margin: 20,
            global_bound: 200,
            convergence_tolerance: 0.001,
        }
    }
}

impl From<&FocusConfig> for ClimberSettings {
    fn from(config: &FocusConfig) -> Self {
        Self {
            step_size: config.step_size,
            bound_margin: config.bound_margin,
            global_bound: config.global_bound,
            convergence_tolerance: config.convergence_tolerance,
        }
    }
}

/// Which rule set the next round is evaluated with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Bootstrap,
    FirstComparison,
    Steady,
}

/// Everything the climber remembers between rounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerState {
    pub initial_target: i64,
    pub current_target: i64,
    pub direction: Direction,
    pub bounds: Bounds,
    /// Best group value so far; `None` until the first round.
    pub record_value: Option<f64>,
    /// Group value of the last successful round.
    pub last_group_value: Option<f64>,
    pub previous_relative_delta: Option<f64>,
    pub groups_seen: u64,
}

impl OptimizerState {
    pub fn phase(&self) -> Phase {
        match self.groups_seen {
            0 => Phase::Bootstrap,
            1 => Phase::FirstComparison,
            _ => Phase::Steady,
        }
    }
}

/// The focus optimizer.
#[derive(Debug, Clone)]
pub struct HillClimber {
    settings: ClimberSettings,
    state: OptimizerState,
    history: FocusHistory,
}

impl HillClimber {
    pub fn new(
        initial_target: i64,
        direction: Direction,
        settings: ClimberSettings,
    ) -> BfResult<Self> {
        if settings.step_size <= 0 {
            return Err(bf_types::config_error!(
                "step size must be positive, got {}",
                settings.step_size
            ));
        }
        if !settings.convergence_tolerance.is_finite() || settings.convergence_tolerance < 0.0 {
            return Err(bf_types::config_error!(
                "convergence tolerance must be a non-negative number, got {}",
                settings.convergence_tolerance
            ));
        }

        let bounds = Bounds::around(initial_target, settings.bound_margin, settings.global_bound)?;

        Ok(Self {
            settings,
            state: OptimizerState {
                initial_target,
                current_target: initial_target,
                direction,
                bounds,
                record_value: None,
                last_group_value: None,
                previous_relative_delta: None,
                groups_seen: 0,
            },
            history: FocusHistory::new(),
        })
    }

    /// Build from validated configuration, drawing the direction from the
    /// configured seed.
    pub fn from_config(initial_target: i64, config: &FocusConfig) -> BfResult<Self> {
        Self::new(
            initial_target,
            random_direction(config.seed),
            ClimberSettings::from(config),
        )
    }

    pub fn state(&self) -> &OptimizerState {
        &self.state
    }

    pub fn settings(&self) -> &ClimberSettings {
        &self.settings
    }

    pub fn history(&self) -> &FocusHistory {
        &self.history
    }

    pub fn current_target(&self) -> i64 {
        self.state.current_target
    }

    pub fn bounds(&self) -> Bounds {
        self.state.bounds
    }

    /// Consume one group value and decide the next target.
    pub fn decide(&mut self, group_value: f64) -> BfResult<Decision> {
        if !group_value.is_finite() {
            return Err(invalid_measurement!(group_value, "group value is not finite"));
        }
        if group_value < 0.0 {
            return Err(invalid_measurement!(group_value, "brightness cannot be negative"));
        }

        let mut next = self.state.clone();
        let previous_target = next.current_target;
        next.groups_seen += 1;

        let (outcome, relative_delta) = match self.state.phase() {
            Phase::Bootstrap => {
                next.record_value = Some(group_value);
                next.current_target = self.step(next.initial_target, next.direction);
                (RoundOutcome::Initial, None)
            }
            Phase::FirstComparison => {
                let record = self.record()?;
                if group_value > record {
                    let prior = next
                        .last_group_value
                        .ok_or_else(|| internal_error!("first comparison without a prior group"))?;
                    let delta = relative_delta(prior, group_value)?;
                    next.record_value = Some(group_value);
                    next.previous_relative_delta = Some(delta);
                    next.current_target = self.step(next.current_target, next.direction);
                    (RoundOutcome::NewRecord, Some(delta))
                } else {
                    let delta = relative_delta(group_value, record)?;
                    next.previous_relative_delta = Some(delta);
                    next.direction = next.direction.reversed();
                    next.current_target = self.step(next.current_target, next.direction);
                    (RoundOutcome::Reversed, Some(delta))
                }
            }
            Phase::Steady => {
                let record = self.record()?;
                if group_value > record {
                    next.record_value = Some(group_value);
                    next.current_target = self.step(next.current_target, next.direction);
                    // Informational only; a zero record must not fail a new record.
                    (RoundOutcome::NewRecord, relative_delta(group_value, record).ok())
                } else {
                    let delta = relative_delta(group_value, record)?;
                    let closer = next
                        .previous_relative_delta
                        .is_some_and(|previous| delta.abs() < previous.abs());

                    if closer {
                        next.previous_relative_delta = Some(delta);
                        next.current_target = self.step(next.current_target, next.direction);
                        (RoundOutcome::Closer, Some(delta))
                    } else if delta.abs() <= self.settings.convergence_tolerance {
                        (RoundOutcome::Converged, Some(delta))
                    } else {
                        next.previous_relative_delta = Some(delta);
                        next.direction = next.direction.reversed();
                        next.current_target = self.step(next.current_target, next.direction);
                        (RoundOutcome::Reversed, Some(delta))
                    }
                }
            }
        };

        next.last_group_value = Some(group_value);

        let decision = Decision {
            round: next.groups_seen,
            group_value,
            outcome,
            previous_target,
            target: next.current_target,
            direction: next.direction,
            record_value: next.record_value.unwrap_or(group_value),
            relative_delta,
        };

        debug!(
            round = decision.round,
            group_value,
            outcome = %outcome,
            focus = decision.target,
            direction = %decision.direction,
            record = decision.record_value,
            "focus decision"
        );

        self.state = next;
        self.history.push(&decision);
        Ok(decision)
    }

    fn record(&self) -> BfResult<f64> {
        self.state
            .record_value
            .ok_or_else(|| internal_error!("no record value after bootstrap round"))
    }

    /// Move one step from `from`, clamped to the bounds.
    ///
    /// Targets and steps are integers, so the round-half-to-even rule for
    /// fractional targets never comes into play.
    fn step(&self, from: i64, direction: Direction) -> i64 {
        let moved = from.saturating_add(self.settings.step_size.saturating_mul(direction.sign()));
        self.state.bounds.clamp(moved)
    }
}

/// Signed fractional deviation of `value` from `record`.
fn relative_delta(value: f64, record: f64) -> BfResult<f64> {
    if record == 0.0 {
        return Err(BfError::DivisionByZero);
    }
    Ok((value - record) / record)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn climber_at(initial: i64, direction: Direction) -> HillClimber {
        HillClimber::new(initial, direction, ClimberSettings::default()).unwrap()
    }

    fn feed(climber: &mut HillClimber, values: &[f64]) -> Vec<Decision> {
        values.iter().map(|v| climber.decide(*v).unwrap()).collect()
    }

    #[test]
    fn bounds_follow_initial_target() {
        let climber = climber_at(50, Direction::Up);
        assert_eq!(climber.bounds(), Bounds { lower: 30, upper: 70 });
        assert_eq!(climber.state().phase(), Phase::Bootstrap);
    }

    #[test]
    fn bootstrap_takes_first_step() {
        let mut climber = climber_at(50, Direction::Up);
        let decision = climber.decide(100.0).unwrap();

        assert_eq!(decision.outcome, RoundOutcome::Initial);
        assert_eq!(decision.target, 51);
        assert_eq!(decision.previous_target, 50);
        assert_eq!(climber.state().record_value, Some(100.0));
        assert_eq!(climber.state().previous_relative_delta, None);
        assert_eq!(climber.state().phase(), Phase::FirstComparison);
    }

    #[test]
    fn first_comparison_new_record_keeps_direction() {
        let mut climber = climber_at(50, Direction::Up);
        let decisions = feed(&mut climber, &[100.0, 110.0]);

        assert_eq!(decisions[1].outcome, RoundOutcome::NewRecord);
        assert_eq!(decisions[1].target, 52);
        assert_eq!(climber.state().record_value, Some(110.0));
        let delta = climber.state().previous_relative_delta.unwrap();
        assert!((delta - (100.0 - 110.0) / 110.0).abs() < 1e-12);
    }

    #[test]
    fn first_comparison_without_record_reverses() {
        let mut climber = climber_at(50, Direction::Up);
        let decisions = feed(&mut climber, &[100.0, 95.0]);

        assert_eq!(decisions[1].outcome, RoundOutcome::Reversed);
        assert_eq!(decisions[1].direction, Direction::Down);
        assert_eq!(decisions[1].target, 50);
        assert_eq!(climber.state().record_value, Some(100.0));
        let delta = climber.state().previous_relative_delta.unwrap();
        assert!((delta + 0.05).abs() < 1e-12);
    }

    #[test]
    fn closer_approach_after_new_record_keeps_direction() {
        // 100 -> 110 records, previous delta -0.0909; 105 is only -0.0455 away.
        let mut climber = climber_at(50, Direction::Up);
        let decisions = feed(&mut climber, &[100.0, 110.0, 105.0]);

        assert_eq!(decisions[2].outcome, RoundOutcome::Closer);
        assert_eq!(decisions[2].direction, Direction::Up);
        assert_eq!(decisions[2].target, 53);
        let delta = climber.state().previous_relative_delta.unwrap();
        assert!((delta - (105.0 - 110.0) / 110.0).abs() < 1e-12);
    }

    #[test]
    fn not_closer_and_outside_tolerance_reverses() {
        let mut climber = climber_at(50, Direction::Up);
        let decisions = feed(&mut climber, &[100.0, 110.0, 95.0]);

        assert_eq!(decisions[2].outcome, RoundOutcome::Reversed);
        assert_eq!(decisions[2].direction, Direction::Down);
        assert_eq!(decisions[2].target, 51);
    }

    #[test]
    fn within_tolerance_holds_target() {
        let mut climber = climber_at(50, Direction::Up);
        let decisions = feed(&mut climber, &[100.0, 110.0, 109.99]);

        // |delta| = 0.0000909 is closer than -0.0909, so the closer rule wins
        // first; a second near-record round then converges.
        assert_eq!(decisions[2].outcome, RoundOutcome::Closer);
        assert_eq!(decisions[2].target, 53);

        let hold = climber.decide(109.99).unwrap();
        assert_eq!(hold.outcome, RoundOutcome::Converged);
        assert_eq!(hold.target, 53);
        assert!(!hold.target_changed());
    }

    #[test]
    fn converges_when_previous_delta_is_smaller() {
        // Reverse in round 2 with a tiny delta, then land inside tolerance
        // without getting any closer.
        let mut climber = climber_at(50, Direction::Up);
        let decisions = feed(&mut climber, &[110.0, 109.99, 109.99]);

        assert_eq!(decisions[1].outcome, RoundOutcome::Reversed);
        assert_eq!(decisions[1].target, 50);
        assert_eq!(decisions[2].outcome, RoundOutcome::Converged);
        assert_eq!(decisions[2].target, 50);
        assert_eq!(climber.current_target(), 50);
    }

    #[test]
    fn hold_repeats_while_rounds_stay_converged() {
        let mut climber = climber_at(50, Direction::Up);
        feed(&mut climber, &[110.0, 109.99]);

        for _ in 0..10 {
            let decision = climber.decide(109.95).unwrap();
            assert_eq!(decision.outcome, RoundOutcome::Converged);
            assert_eq!(decision.target, 50);
        }
    }

    #[test]
    fn convergence_is_not_sticky() {
        let mut climber = climber_at(50, Direction::Up);
        feed(&mut climber, &[110.0, 109.99, 109.99]);
        let decision = climber.decide(120.0).unwrap();
        assert_eq!(decision.outcome, RoundOutcome::NewRecord);
        assert_eq!(decision.target, 49);
    }

    #[test]
    fn target_is_clamped_at_upper_bound() {
        let settings = ClimberSettings {
            bound_margin: 2,
            ..ClimberSettings::default()
        };
        let mut climber = HillClimber::new(68, Direction::Up, settings).unwrap();
        assert_eq!(climber.bounds().upper, 70);

        let decisions = feed(&mut climber, &[100.0, 101.0, 102.0, 103.0]);
        let targets: Vec<i64> = decisions.iter().map(|d| d.target).collect();
        assert_eq!(targets, vec![69, 70, 70, 70]);
        assert!(!decisions[3].target_changed());
    }

    #[test]
    fn target_is_clamped_by_global_bound() {
        let mut climber = climber_at(199, Direction::Up);
        let decisions = feed(&mut climber, &[1.0, 2.0, 3.0]);
        assert_eq!(decisions[2].target, 200);
    }

    #[test]
    fn invalid_group_value_leaves_state_untouched() {
        let mut climber = climber_at(50, Direction::Up);
        climber.decide(100.0).unwrap();
        let before = climber.state().clone();

        assert!(matches!(
            climber.decide(f64::NAN),
            Err(BfError::InvalidMeasurement { .. })
        ));
        assert!(matches!(
            climber.decide(-1.0),
            Err(BfError::InvalidMeasurement { .. })
        ));
        assert_eq!(climber.state(), &before);
        assert_eq!(climber.history().len(), 1);
    }

    #[test]
    fn zero_record_fails_round_without_mutation() {
        let mut climber = climber_at(50, Direction::Up);
        climber.decide(0.0).unwrap();
        let before = climber.state().clone();

        assert!(matches!(climber.decide(0.0), Err(BfError::DivisionByZero)));
        assert_eq!(climber.state(), &before);
        assert_eq!(climber.state().phase(), Phase::FirstComparison);

        // A brighter group recovers.
        let decision = climber.decide(5.0).unwrap();
        assert_eq!(decision.outcome, RoundOutcome::NewRecord);
    }

    #[test]
    fn zero_first_group_still_climbs() {
        let mut climber = climber_at(0, Direction::Down);
        feed(&mut climber, &[0.0, 4.0]);
        let decision = climber.decide(8.0).unwrap();
        assert_eq!(decision.outcome, RoundOutcome::NewRecord);
        assert_eq!(decision.target, -3);
    }

    #[test]
    fn record_never_decreases_and_target_stays_in_bounds() {
        let mut climber = climber_at(-190, Direction::Down);
        let values = [
            50.0, 48.0, 51.0, 51.5, 49.0, 52.0, 51.99, 40.0, 60.0, 59.0, 58.0, 61.0, 10.0, 61.0,
            60.99, 62.0, 30.0, 31.0, 32.0, 70.0,
        ];
        let mut last_record = 0.0;
        for value in values {
            let decision = climber.decide(value).unwrap();
            assert!(decision.record_value >= last_record);
            assert!(climber.bounds().contains(decision.target));
            last_record = decision.record_value;
        }
    }

    #[test]
    fn identical_inputs_give_identical_targets() {
        let values = [100.0, 98.0, 99.0, 101.0, 100.5, 97.0, 103.0, 102.9];
        let run = || {
            let mut climber = climber_at(10, Direction::Down);
            feed(&mut climber, &values)
                .into_iter()
                .map(|d| d.target)
                .collect::<Vec<_>>()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn seeded_direction_is_reproducible() {
        assert_eq!(random_direction(Some(7)), random_direction(Some(7)));
        let config = FocusConfig {
            seed: Some(7),
            ..FocusConfig::default()
        };
        let climber = HillClimber::from_config(0, &config).unwrap();
        assert_eq!(climber.state().direction, random_direction(Some(7)));
    }

    #[test]
    fn rejects_bad_settings() {
        let settings = ClimberSettings {
            step_size: 0,
            ..ClimberSettings::default()
        };
        assert!(HillClimber::new(0, Direction::Up, settings).is_err());
        assert!(HillClimber::new(500, Direction::Up, ClimberSettings::default()).is_err());
    }
}
