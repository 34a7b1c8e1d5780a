//! Closed-loop focus controller.
//!
//! Ties a [`bf_io::MetricSource`], the [`bf_optimizer`] core and a
//! [`bf_io::ActuatorSink`] together behind a single consumer of image paths.

pub mod controller;

pub use controller::{ControllerEvent, FocusController, PublishOutcome, RoundReport};
