//! # bf-optimizer
//!
//! Decision core of BeamFocus: a [`Batcher`] that averages per-image
//! brightness over fixed-size groups, and a [`HillClimber`] that turns each
//! group value into the next focus target.
//!
//! Neither component performs I/O. The controller feeds them in image order
//! and publishes whatever target they produce.

mod batcher;
mod climber;
mod history;

pub use batcher::Batcher;
pub use climber::{random_direction, ClimberSettings, HillClimber, OptimizerState, Phase};
pub use history::{FocusHistory, RoundRecord};
