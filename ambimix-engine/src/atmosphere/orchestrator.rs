//! Crossfade orchestration
//!
//! Drives a whole-mix transition toward a target atmosphere: removed
//! channels fade out and stop, added channels start silent and fade in,
//! retained channels glide to their new volume. Every fade runs
//! concurrently on its own channel; the orchestrator only samples their
//! timing to report aggregate progress.
//!
//! # Transition lifecycle
//!
//! ```text
//! Idle → Starting → InProgress → Completed
//!                        │    └─→ Failed     (every participant failed)
//!                        └──────→ Cancelled  (superseded)
//! ```
//!
//! Starting a transition while another is in flight supersedes the old
//! one: its call resolves `Cancelled` and it emits nothing further. The
//! channel fades it already issued keep running until the new transition
//! replaces them.
//!
//! The diff and command issuance of a transition run under the registry
//! writer (see `ChannelRegistry::writer`), and every command is preceded by
//! a supersession check. A superseded transition therefore issues no
//! command after its successor has read the live mix.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use ambimix_common::config::MixerConfig;
use ambimix_common::events::{EventBus, MixerEvent, TransitionPhase};
use ambimix_common::{AtmosphereDefinition, AtmosphereId, ChannelId, FadeCurve, Membership};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::atmosphere::diff::{compute_diff_with_epsilon, AtmosphereDiff};
use crate::error::Result;
use crate::playback::channel::{ramp_progress, Channel, FadeHandle, FadeOptions};
use crate::playback::{ChannelRegistry, RegistryWriter};

/// Overrides for one crossfade
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CrossfadeOptions {
    /// Fade length; the atmosphere default when None
    pub duration: Option<Duration>,
    /// Easing curve; the atmosphere default when None
    pub curve: Option<FadeCurve>,
}

impl CrossfadeOptions {
    pub fn over(duration: Duration) -> Self {
        Self {
            duration: Some(duration),
            curve: None,
        }
    }

    pub fn curve(mut self, curve: FadeCurve) -> Self {
        self.curve = Some(curve);
        self
    }
}

/// How a transition ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionOutcome {
    Completed,
    /// Superseded by a newer transition
    Cancelled,
    /// Every participating channel failed
    Failed,
}

/// Result of `crossfade_to`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionReport {
    pub transition_id: Uuid,
    pub atmosphere_id: Option<AtmosphereId>,
    pub outcome: TransitionOutcome,
    /// Memberships skipped because their source is unavailable
    pub missing: Vec<ChannelId>,
    /// Channels whose commands failed
    pub failed: Vec<ChannelId>,
}

impl TransitionReport {
    pub fn is_cancelled(&self) -> bool {
        self.outcome == TransitionOutcome::Cancelled
    }

    pub fn is_completed(&self) -> bool {
        self.outcome == TransitionOutcome::Completed
    }
}

/// Handle on one transition's lifecycle
///
/// The phase lock serializes supersession against event emission, so
/// once `cancel` returns the transition cannot emit again.
struct TransitionToken {
    id: Uuid,
    atmosphere_id: Option<AtmosphereId>,
    phase: Mutex<TransitionPhase>,
    cancel_tx: watch::Sender<bool>,
}

impl TransitionToken {
    fn new(atmosphere_id: Option<AtmosphereId>) -> Self {
        let (cancel_tx, _) = watch::channel(false);
        Self {
            id: Uuid::new_v4(),
            atmosphere_id,
            phase: Mutex::new(TransitionPhase::Idle),
            cancel_tx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, TransitionPhase> {
        self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn phase(&self) -> TransitionPhase {
        *self.lock()
    }

    /// Move to a non-terminal phase unless already cancelled
    fn advance(&self, next: TransitionPhase) {
        let mut phase = self.lock();
        if *phase != TransitionPhase::Cancelled {
            *phase = next;
        }
    }

    /// Cancel unless already finished; returns whether it was cancelled
    fn cancel(&self) -> bool {
        let mut phase = self.lock();
        if phase.is_terminal() {
            return false;
        }
        *phase = TransitionPhase::Cancelled;
        self.cancel_tx.send_replace(true);
        true
    }

    fn is_cancelled(&self) -> bool {
        self.phase() == TransitionPhase::Cancelled
    }

    /// Resolves once the transition is cancelled
    async fn cancelled(&self) {
        let mut rx = self.cancel_tx.subscribe();
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Run `f` while holding the phase lock, unless cancelled
    fn if_live<T>(&self, f: impl FnOnce(&mut TransitionPhase) -> T) -> Option<T> {
        let mut phase = self.lock();
        if *phase == TransitionPhase::Cancelled {
            return None;
        }
        Some(f(&mut phase))
    }
}

/// What `issue_commands` got through before finishing or being superseded
#[derive(Default)]
struct IssuedCommands {
    fades: Vec<FadeHandle>,
    /// Channels whose commands failed
    failed: Vec<ChannelId>,
    superseded: bool,
}

impl IssuedCommands {
    fn superseded() -> Self {
        Self {
            superseded: true,
            ..Self::default()
        }
    }

    fn check_superseded(&mut self, token: &TransitionToken) -> bool {
        if token.is_cancelled() {
            debug!(transition_id = %token.id, "Superseded while issuing commands");
            self.superseded = true;
        }
        self.superseded
    }
}

/// Mean progress of a set of fades (1.0 when there are none)
pub fn aggregate_progress(timings: &[(Instant, Duration)]) -> f32 {
    if timings.is_empty() {
        return 1.0;
    }
    let total: f32 = timings
        .iter()
        .map(|&(started_at, duration)| ramp_progress(started_at, duration))
        .sum();
    total / timings.len() as f32
}

/// Coordinates multi-channel crossfades between atmospheres
pub struct CrossfadeOrchestrator {
    events: EventBus,
    config: MixerConfig,
    latest: Mutex<Option<Arc<TransitionToken>>>,
    active_atmosphere: Mutex<Option<AtmosphereId>>,
}

impl CrossfadeOrchestrator {
    pub fn new(events: EventBus, config: MixerConfig) -> Self {
        Self {
            events,
            config,
            latest: Mutex::new(None),
            active_atmosphere: Mutex::new(None),
        }
    }

    fn latest(&self) -> MutexGuard<'_, Option<Arc<TransitionToken>>> {
        self.latest.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Atmosphere of the last completed transition
    pub fn active_atmosphere(&self) -> Option<AtmosphereId> {
        *self
            .active_atmosphere
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Forget the active atmosphere (e.g. after it was deleted)
    pub fn clear_active_atmosphere(&self) {
        *self
            .active_atmosphere
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Phase of the most recent transition (Idle before the first)
    pub fn phase(&self) -> TransitionPhase {
        self.latest()
            .as_ref()
            .map_or(TransitionPhase::Idle, |t| t.phase())
    }

    /// Id of the in-flight transition, if any
    pub fn current_transition(&self) -> Option<Uuid> {
        self.latest()
            .as_ref()
            .filter(|t| !t.phase().is_terminal())
            .map(|t| t.id)
    }

    /// Supersede the in-flight transition without starting a new one
    ///
    /// Returns whether a transition was cancelled. Channel fades it
    /// already issued keep running.
    pub fn cancel_current(&self) -> bool {
        let current = self.latest().clone();
        match current {
            Some(token) if token.cancel() => {
                info!(transition_id = %token.id, "Transition cancelled");
                true
            }
            _ => false,
        }
    }

    fn begin(&self, atmosphere_id: Option<AtmosphereId>) -> Arc<TransitionToken> {
        let token = Arc::new(TransitionToken::new(atmosphere_id));
        let previous = self.latest().replace(Arc::clone(&token));
        if let Some(previous) = previous {
            if previous.cancel() {
                info!(
                    transition_id = %previous.id,
                    superseded_by = %token.id,
                    "Transition superseded"
                );
            }
        }
        token.advance(TransitionPhase::Starting);
        token
    }

    /// Crossfade the live mix toward `target`
    ///
    /// Resolves when every participating fade has settled, or as soon as
    /// the transition is superseded. Missing sources and per-channel
    /// failures never abort the transition.
    pub async fn crossfade_to(
        &self,
        target: &AtmosphereDefinition,
        registry: &ChannelRegistry,
        options: CrossfadeOptions,
    ) -> TransitionReport {
        let duration = options.duration.unwrap_or_else(|| {
            if target.default_crossfade_ms > 0 {
                Duration::from_millis(target.default_crossfade_ms)
            } else {
                self.config.default_crossfade()
            }
        });
        let curve = options.curve.unwrap_or(target.default_curve);

        let token = self.begin(target.id);

        // Diff and commands run under the registry writer so that a newer
        // transition always diffs the mix this one left behind.
        let (diff, issued) = {
            let writer = registry.writer();
            if token.is_cancelled() {
                (AtmosphereDiff::default(), IssuedCommands::superseded())
            } else {
                let diff = compute_diff_with_epsilon(
                    target,
                    &writer.live_snapshot(),
                    writer.resolver().as_ref(),
                    self.config.volume_epsilon,
                );
                self.log_start(&token, &diff, duration);
                self.emit(
                    &token,
                    MixerEvent::TransitionStarted {
                        transition_id: token.id,
                        atmosphere_id: token.atmosphere_id,
                        duration_ms: duration.as_millis() as u64,
                        curve,
                        timestamp: chrono::Utc::now(),
                    },
                );

                let fade = FadeOptions {
                    duration: Some(duration),
                    curve,
                    stop_at_zero: false,
                };
                let issued = self.issue_commands(&token, target, &diff, &writer, fade);
                (diff, issued)
            }
        };
        let IssuedCommands {
            fades,
            failed,
            superseded,
        } = issued;
        if superseded {
            return self.report(&token, TransitionOutcome::Cancelled, &diff, failed);
        }

        token.advance(TransitionPhase::InProgress);

        if !self.await_fades(&token, fades).await {
            return self.report(&token, TransitionOutcome::Cancelled, &diff, failed);
        }

        let participants = diff.participant_count();
        if participants > 0 && failed.len() == participants {
            warn!(transition_id = %token.id, "Every participating channel failed");
            let outcome = match token.if_live(|phase| *phase = TransitionPhase::Failed) {
                Some(()) => TransitionOutcome::Failed,
                None => TransitionOutcome::Cancelled,
            };
            return self.report(&token, outcome, &diff, failed);
        }

        let completed = token.if_live(|phase| {
            *phase = TransitionPhase::Completed;
            *self
                .active_atmosphere
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = token.atmosphere_id;
            self.events.emit_lossy(MixerEvent::TransitionCompleted {
                transition_id: token.id,
                atmosphere_id: token.atmosphere_id,
                missing_ids: diff.missing.clone(),
                timestamp: chrono::Utc::now(),
            });
        });

        match completed {
            Some(()) => {
                info!(transition_id = %token.id, atmosphere_id = ?token.atmosphere_id, "Crossfade completed");
                self.report(&token, TransitionOutcome::Completed, &diff, failed)
            }
            None => self.report(&token, TransitionOutcome::Cancelled, &diff, failed),
        }
    }

    fn log_start(&self, token: &TransitionToken, diff: &AtmosphereDiff, duration: Duration) {
        info!(
            transition_id = %token.id,
            atmosphere_id = ?token.atmosphere_id,
            added = diff.added.len(),
            removed = diff.removed.len(),
            volume_changed = diff.volume_changed.len(),
            missing = diff.missing.len(),
            duration_ms = duration.as_millis() as u64,
            "Crossfade started"
        );
        if !diff.missing.is_empty() {
            warn!(
                transition_id = %token.id,
                missing = ?diff.missing,
                "Skipping memberships without a playable source"
            );
        }
    }

    /// Issue every channel command
    ///
    /// Checks for supersession before each command and stops issuing as
    /// soon as the transition is cancelled.
    fn issue_commands(
        &self,
        token: &TransitionToken,
        target: &AtmosphereDefinition,
        diff: &AtmosphereDiff,
        registry: &RegistryWriter<'_>,
        fade: FadeOptions,
    ) -> IssuedCommands {
        let mut issued = IssuedCommands::default();

        for removed in &diff.removed {
            if issued.check_superseded(token) {
                return issued;
            }
            if let Some(channel) = registry.get(removed.channel_id) {
                channel.cancel_fades();
                issued
                    .fades
                    .push(channel.fade_to(0.0, FadeOptions { stop_at_zero: true, ..fade }));
            }
        }

        for membership in &diff.added {
            if issued.check_superseded(token) {
                return issued;
            }
            match start_added(registry, membership, fade) {
                Ok(Some(handle)) => issued.fades.push(handle),
                Ok(None) => {}
                Err(e) => {
                    warn!(
                        transition_id = %token.id,
                        channel_id = membership.channel_id,
                        "Failed to start channel: {}",
                        e
                    );
                    issued.failed.push(membership.channel_id);
                    self.emit(
                        token,
                        MixerEvent::TransitionError {
                            transition_id: Some(token.id),
                            atmosphere_id: token.atmosphere_id,
                            channel_id: Some(membership.channel_id),
                            message: e.to_string(),
                            timestamp: chrono::Utc::now(),
                        },
                    );
                }
            }
        }

        for change in &diff.volume_changed {
            if issued.check_superseded(token) {
                return issued;
            }
            let (Some(channel), Some(membership)) =
                (registry.get(change.channel_id), target.membership(change.channel_id))
            else {
                continue;
            };
            apply_membership(&channel, membership);
            if membership.is_muted {
                channel.set_volume(change.to);
            } else {
                issued.fades.push(channel.fade_to(change.to, fade));
            }
        }

        // retained channels still take loop, mute and delay from the target
        for membership in &target.memberships {
            let unchanged = !diff.volume_changed.iter().any(|c| c.channel_id == membership.channel_id)
                && !diff.added.iter().any(|m| m.channel_id == membership.channel_id);
            if !unchanged {
                continue;
            }
            let Some(channel) = registry.get(membership.channel_id) else {
                continue;
            };
            if !channel.is_playing() {
                continue;
            }
            if issued.check_superseded(token) {
                return issued;
            }
            apply_membership(&channel, membership);
            // an earlier transition may still be ramping it elsewhere
            if channel.is_fading() {
                if membership.is_muted {
                    channel.cancel_fades();
                    channel.set_volume(membership.volume);
                } else {
                    issued.fades.push(channel.fade_to(membership.volume, fade));
                }
            }
        }

        issued
    }

    /// Wait for every fade, reporting progress; false when superseded
    async fn await_fades(&self, token: &TransitionToken, fades: Vec<FadeHandle>) -> bool {
        let timings: Vec<(Instant, Duration)> =
            fades.iter().map(|f| (f.started_at(), f.duration())).collect();
        let threshold = self.config.almost_complete_threshold;
        let mut almost_complete_sent = false;

        let settled = join_all(fades);
        tokio::pin!(settled);
        let cancelled = token.cancelled();
        tokio::pin!(cancelled);

        let mut ticker = tokio::time::interval(self.config.progress_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                _ = &mut cancelled => {
                    debug!(transition_id = %token.id, "Stopped waiting on superseded transition");
                    return false;
                }
                _ = &mut settled => break,
                _ = ticker.tick() => {
                    let progress = aggregate_progress(&timings);
                    self.emit_progress(token, progress);
                    if !almost_complete_sent && progress >= threshold {
                        almost_complete_sent = true;
                        self.emit_almost_complete(token);
                    }
                }
            }
        }

        self.emit_progress(token, 1.0);
        if !almost_complete_sent {
            self.emit_almost_complete(token);
        }
        !token.is_cancelled()
    }

    fn emit(&self, token: &TransitionToken, event: MixerEvent) {
        token.if_live(|_| self.events.emit_lossy(event));
    }

    fn emit_progress(&self, token: &TransitionToken, progress: f32) {
        self.emit(
            token,
            MixerEvent::TransitionProgress {
                transition_id: token.id,
                atmosphere_id: token.atmosphere_id,
                progress,
                timestamp: chrono::Utc::now(),
            },
        );
    }

    fn emit_almost_complete(&self, token: &TransitionToken) {
        self.emit(
            token,
            MixerEvent::TransitionAlmostComplete {
                transition_id: token.id,
                atmosphere_id: token.atmosphere_id,
                timestamp: chrono::Utc::now(),
            },
        );
    }

    fn report(
        &self,
        token: &TransitionToken,
        outcome: TransitionOutcome,
        diff: &AtmosphereDiff,
        failed: Vec<ChannelId>,
    ) -> TransitionReport {
        if outcome == TransitionOutcome::Cancelled {
            debug!(transition_id = %token.id, "Transition resolved as cancelled");
        }
        TransitionReport {
            transition_id: token.id,
            atmosphere_id: token.atmosphere_id,
            outcome,
            missing: diff.missing.clone(),
            failed,
        }
    }
}

/// Copy loop, delay and mute settings from a membership onto a channel
///
/// The delay window goes first so a looping flag set afterwards is not
/// overridden by a stale window.
pub fn apply_membership(channel: &Channel, membership: &Membership) {
    channel.set_delay(membership.min_seconds, membership.max_seconds);
    channel.set_loop(membership.is_looping);
    channel.set_mute(membership.is_muted);
}

/// Start an added channel silent, then ramp it in
///
/// Muted memberships receive their volume directly with no ramp.
fn start_added(
    registry: &RegistryWriter<'_>,
    membership: &Membership,
    fade: FadeOptions,
) -> Result<Option<FadeHandle>> {
    let channel = registry.ensure(membership.channel_id)?;
    apply_membership(&channel, membership);

    if membership.is_muted {
        channel.set_volume(membership.volume);
        channel.play()?;
        return Ok(None);
    }

    channel.set_volume(0.0);
    channel.play()?;
    Ok(Some(channel.fade_to(membership.volume, fade)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_progress_without_fades() {
        assert_eq!(aggregate_progress(&[]), 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_aggregate_progress_is_mean() {
        let now = Instant::now();
        let timings = vec![
            (now, Duration::from_millis(1000)),
            (now, Duration::from_millis(2000)),
        ];
        tokio::time::advance(Duration::from_millis(1000)).await;
        let progress = aggregate_progress(&timings);
        assert!((progress - 0.75).abs() < 1e-3, "progress {}", progress);
    }

    #[test]
    fn test_token_cancel_is_final() {
        let token = TransitionToken::new(Some(1));
        token.advance(TransitionPhase::Starting);
        assert!(token.cancel());
        assert!(!token.cancel());
        token.advance(TransitionPhase::InProgress);
        assert_eq!(token.phase(), TransitionPhase::Cancelled);
        assert!(token.if_live(|_| ()).is_none());
    }

    #[test]
    fn test_finished_token_cannot_be_cancelled() {
        let token = TransitionToken::new(None);
        token.if_live(|phase| *phase = TransitionPhase::Completed);
        assert!(!token.cancel());
        assert_eq!(token.phase(), TransitionPhase::Completed);
    }

    #[test]
    fn test_begin_supersedes_previous() {
        let orchestrator = CrossfadeOrchestrator::new(EventBus::new(16), MixerConfig::default());
        let first = orchestrator.begin(Some(1));
        let second = orchestrator.begin(Some(2));
        assert!(first.is_cancelled());
        assert_eq!(second.phase(), TransitionPhase::Starting);
        assert_eq!(orchestrator.current_transition(), Some(second.id));
        assert!(orchestrator.cancel_current());
        assert_eq!(orchestrator.phase(), TransitionPhase::Cancelled);
        assert!(!orchestrator.cancel_current());
    }
}
