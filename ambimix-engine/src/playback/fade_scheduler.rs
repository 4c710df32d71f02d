//! Volume ramp scheduling
//!
//! A ramp is either handed to the host's gain automation (preferred) or
//! broken into discrete gain steps that the channel applies on a timer.
//! Both strategies share the curve math in `ambimix_common::FadeCurve`.
//!
//! # Strategy selection
//!
//! - **Automation**: the voice exposes `GainAutomation`. Linear ramps use a
//!   native linear ramp; other curves are sampled into a value table of
//!   16-256 points and scheduled as a value curve.
//! - **Stepped**: no automation. The ramp becomes ~30 steps per second
//!   (4-60 steps total), each applied with an immediate gain write.

use std::time::Duration;

use ambimix_common::FadeCurve;
use tracing::warn;

use crate::audio::{GainAutomation, Voice};
use crate::error::Result;

/// Fewest steps in a stepped ramp
pub const MIN_STEPS: usize = 4;

/// Most steps in a stepped ramp
pub const MAX_STEPS: usize = 60;

/// Stepped ramp resolution
pub const STEPS_PER_SECOND: f32 = 30.0;

/// One volume ramp
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FadeOperation {
    pub from: f32,
    pub to: f32,
    pub duration: Duration,
    pub curve: FadeCurve,
    /// Stop the channel when a ramp to zero completes
    pub stop_at_zero: bool,
}

impl FadeOperation {
    /// Whether completing this ramp stops the channel
    pub fn stops_channel(&self) -> bool {
        self.stop_at_zero && self.to == 0.0
    }
}

/// One discrete gain write of a stepped ramp
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RampStep {
    /// Offset from the start of the ramp
    pub at: Duration,
    pub gain: f32,
}

/// What remains for the channel to drive after a ramp is scheduled
#[derive(Debug, Clone, PartialEq)]
pub enum RampPlan {
    /// Host automation runs the ramp; only completion must be awaited
    Scheduled,
    /// Channel must apply these steps itself
    Stepped(Vec<RampStep>),
}

/// How ramps are realized for a voice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RampStrategy {
    Automation,
    Stepped,
}

/// Number of steps for a stepped ramp of `duration`
pub fn step_count(duration: Duration) -> usize {
    let steps = (duration.as_secs_f32() * STEPS_PER_SECOND).floor() as usize;
    steps.clamp(MIN_STEPS, MAX_STEPS)
}

/// Build the stepped plan for a ramp
///
/// Steps are evenly spaced; the last lands exactly on the target at the
/// end of the ramp.
pub fn stepped_plan(op: &FadeOperation) -> Vec<RampStep> {
    let steps = step_count(op.duration);
    (1..=steps)
        .map(|i| {
            let t = i as f32 / steps as f32;
            RampStep {
                at: op.duration.mul_f32(t),
                gain: op.curve.volume_at(op.from, op.to, t),
            }
        })
        .collect()
}

/// Per-voice ramp driver
///
/// Chosen by capability detection each time a ramp starts, so a voice
/// reopened on a different output picks the right strategy.
#[derive(Debug, Clone, Copy)]
pub struct FadeScheduler {
    strategy: RampStrategy,
}

impl FadeScheduler {
    /// Detect the strategy a voice supports
    pub fn for_voice(voice: &mut dyn Voice) -> Self {
        let strategy = if voice.automation().is_some() {
            RampStrategy::Automation
        } else {
            RampStrategy::Stepped
        };
        Self { strategy }
    }

    pub fn strategy(&self) -> RampStrategy {
        self.strategy
    }

    /// Cancel whatever the voice has scheduled
    ///
    /// Must precede every new ramp so automation curves never overlap.
    pub fn cancel(voice: &mut dyn Voice) {
        if let Some(automation) = voice.automation() {
            automation.cancel_scheduled();
        }
    }

    /// Start a ramp on `voice`
    ///
    /// Previous automation is cancelled first. If the host rejects the
    /// automation request the ramp falls back to stepping.
    pub fn begin(&self, op: &FadeOperation, voice: &mut dyn Voice) -> RampPlan {
        Self::cancel(voice);

        if self.strategy == RampStrategy::Automation {
            if let Some(automation) = voice.automation() {
                match schedule_automation(op, automation) {
                    Ok(()) => return RampPlan::Scheduled,
                    Err(e) => warn!("Gain automation rejected, stepping instead: {}", e),
                }
            }
        }

        RampPlan::Stepped(stepped_plan(op))
    }
}

fn schedule_automation(op: &FadeOperation, automation: &mut dyn GainAutomation) -> Result<()> {
    match op.curve {
        FadeCurve::Linear => automation.linear_ramp(op.from, op.to, op.duration),
        curve => {
            let table = curve.sample_table(op.from, op.to, op.duration);
            automation
                .value_curve(&table, op.duration)
                .or_else(|_| automation.linear_ramp(op.from, op.to, op.duration))
        }
    }
}
