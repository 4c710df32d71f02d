//! Single-source playback channel
//!
//! A channel owns one source's playback resource, its loop and random
//! delay behavior, its volume and its fade automation.
//!
//! # State machine
//!
//! ```text
//!            play (no delay)                 end, looping, no delay
//!   Stopped ───────────────► Playing ◄──────────────────────────┐
//!      ▲  │                   │  │ └────────────────────────────┘
//!      │  │ play (delay)      │  │ end, looping, delay window
//!      │  ▼                   │  ▼
//!      │ WaitingForDelay ◄────┘ WaitingForDelay ──timer──► Playing
//!      │
//!      └── stop / end of a non-looping source
//! ```
//!
//! # Timers
//!
//! A channel holds at most one delay timer and at most one fade task.
//! Each is a tokio task behind a token; replacing the slot aborts the
//! previous task, and a task that wakes up after losing its slot sees a
//! stale token and does nothing.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use ambimix_common::events::{ChannelPlaybackState, EventBus, MixerEvent};
use ambimix_common::{ChannelId, FadeCurve};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::audio::{AudioBackend, SourceHandle, TrackEndHook, Voice};
use crate::error::Result;
use crate::playback::fade_scheduler::{FadeOperation, FadeScheduler, RampPlan};

/// Default duration of `fade_to` when none is given
pub const DEFAULT_FADE: Duration = Duration::from_millis(2000);

/// Extra wait after a ramp's scheduled end before it is finalized
pub const DEFAULT_SETTLE_MARGIN: Duration = Duration::from_millis(20);

/// Shared dependencies handed to every channel
#[derive(Clone)]
pub struct ChannelContext {
    pub backend: Arc<dyn AudioBackend>,
    pub events: EventBus,
    pub default_fade: Duration,
    pub settle_margin: Duration,
    /// Runtime that fade and delay tasks are spawned on
    pub runtime: Option<Handle>,
}

impl ChannelContext {
    /// Captures the current tokio runtime, if there is one
    pub fn new(backend: Arc<dyn AudioBackend>, events: EventBus) -> Self {
        Self {
            backend,
            events,
            default_fade: DEFAULT_FADE,
            settle_margin: DEFAULT_SETTLE_MARGIN,
            runtime: Handle::try_current().ok(),
        }
    }

    pub fn with_timing(mut self, default_fade: Duration, settle_margin: Duration) -> Self {
        self.default_fade = default_fade;
        self.settle_margin = settle_margin;
        self
    }

    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Spawn on the captured runtime, else on the caller's
    ///
    /// Panics when neither exists.
    fn spawn<F>(&self, task: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match &self.runtime {
            Some(runtime) => runtime.spawn(task),
            None => tokio::spawn(task),
        }
    }
}

/// Options for `Channel::fade_to`
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FadeOptions {
    /// Ramp length; the channel default when None
    pub duration: Option<Duration>,
    pub curve: FadeCurve,
    /// Stop the channel once a ramp to zero completes
    pub stop_at_zero: bool,
}

impl FadeOptions {
    pub fn over(duration: Duration) -> Self {
        Self {
            duration: Some(duration),
            ..Self::default()
        }
    }

    pub fn curve(mut self, curve: FadeCurve) -> Self {
        self.curve = curve;
        self
    }

    pub fn stop_at_zero(mut self) -> Self {
        self.stop_at_zero = true;
        self
    }
}

/// How a fade ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FadeOutcome {
    /// Ramp ran to its end and the target volume was committed
    Completed,
    /// A newer fade, `cancel_fades` or `stop` abandoned the ramp
    Superseded,
}

/// Awaitable result of `Channel::fade_to`
///
/// Resolves to `FadeOutcome::Superseded` if the ramp is abandoned.
#[must_use = "a fade runs regardless, but its outcome is only observable by awaiting"]
pub struct FadeHandle {
    rx: Option<oneshot::Receiver<FadeOutcome>>,
    duration: Duration,
    started_at: Instant,
}

impl FadeHandle {
    fn pending(rx: oneshot::Receiver<FadeOutcome>, duration: Duration) -> Self {
        Self {
            rx: Some(rx),
            duration,
            started_at: Instant::now(),
        }
    }

    fn completed() -> Self {
        Self {
            rx: None,
            duration: Duration::ZERO,
            started_at: Instant::now(),
        }
    }

    /// Scheduled ramp length (zero for immediate fades)
    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Fraction of the scheduled duration elapsed (0.0-1.0)
    pub fn progress(&self) -> f32 {
        ramp_progress(self.started_at, self.duration)
    }
}

/// Fraction of `duration` elapsed since `started_at`, clamped to 1.0
pub fn ramp_progress(started_at: Instant, duration: Duration) -> f32 {
    if duration.is_zero() {
        return 1.0;
    }
    (started_at.elapsed().as_secs_f32() / duration.as_secs_f32()).min(1.0)
}

impl Future for FadeHandle {
    type Output = FadeOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.rx.as_mut() {
            None => Poll::Ready(FadeOutcome::Completed),
            Some(rx) => Pin::new(rx)
                .poll(cx)
                .map(|r| r.unwrap_or(FadeOutcome::Superseded)),
        }
    }
}

/// Persistable per-channel settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSettings {
    pub is_looping: bool,
    pub is_muted: bool,
    pub volume: f32,
    pub min_seconds: f64,
    pub max_seconds: f64,
}

/// Point-in-time view of a channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSnapshot {
    pub channel_id: ChannelId,
    pub location: String,
    pub state: ChannelPlaybackState,
    pub is_playing: bool,
    pub is_waiting_for_delay: bool,
    pub is_looping: bool,
    pub is_muted: bool,
    pub volume: f32,
    pub min_seconds: f64,
    /// Read-time clamped to at least `min_seconds`
    pub max_seconds: f64,
    pub is_loaded: bool,
    pub is_fading: bool,
}

/// Uniformly random delay in [min, max] seconds, in whole milliseconds
///
/// `max` below `min` is treated as `min`.
pub fn random_delay_ms(min_seconds: f64, max_seconds: f64, rng: &mut impl Rng) -> u64 {
    let min = min_seconds.max(0.0);
    let max = max_seconds.max(min);
    let seconds = min + rng.gen::<f64>() * (max - min);
    (seconds * 1000.0).floor() as u64
}

/// A scheduled task owning one channel slot
///
/// Dropping it aborts the task.
struct ScheduledTask {
    token: u64,
    handle: Option<JoinHandle<()>>,
}

impl ScheduledTask {
    fn new(token: u64, handle: JoinHandle<()>) -> Self {
        Self {
            token,
            handle: Some(handle),
        }
    }

    /// Release the slot without aborting (used by the task itself)
    fn detach(mut self) {
        self.handle.take();
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

struct ChannelInner {
    state: ChannelPlaybackState,
    is_looping: bool,
    is_muted: bool,
    volume: f32,
    delay_min: f64,
    delay_max: f64,
    voice: Option<Box<dyn Voice>>,
    /// Identifies the open voice; end-of-track from older voices is ignored
    voice_epoch: u64,
    delay_timer: Option<ScheduledTask>,
    fade: Option<ScheduledTask>,
    next_token: u64,
}

impl ChannelInner {
    fn has_delay(&self) -> bool {
        self.delay_min > 0.0 || self.delay_max > 0.0
    }

    fn effective_gain(&self) -> f32 {
        if self.is_muted {
            0.0
        } else {
            self.volume
        }
    }

    fn apply_gain(&mut self) {
        let gain = self.effective_gain();
        if let Some(voice) = self.voice.as_mut() {
            voice.set_gain(gain);
        }
    }

    fn apply_native_loop(&mut self) {
        let native = self.is_looping && !self.has_delay();
        if let Some(voice) = self.voice.as_mut() {
            voice.set_native_loop(native);
        }
    }

    fn token(&mut self) -> u64 {
        self.next_token += 1;
        self.next_token
    }

    fn owns_fade(&self, token: u64) -> bool {
        self.fade.as_ref().is_some_and(|f| f.token == token)
    }

    fn owns_delay(&self, token: u64) -> bool {
        self.delay_timer.as_ref().is_some_and(|t| t.token == token)
    }

    fn cancel_fade(&mut self) {
        if self.fade.take().is_some() {
            if let Some(voice) = self.voice.as_mut() {
                FadeScheduler::cancel(voice.as_mut());
            }
        }
    }
}

struct ChannelShared {
    id: ChannelId,
    source: SourceHandle,
    ctx: ChannelContext,
    inner: Mutex<ChannelInner>,
}

/// One independently controllable audio source in the mix
///
/// Cloning yields another handle to the same channel.
///
/// `fade_to` and delayed starts run as tokio tasks on the context's
/// runtime. Methods may be called from any thread, but a context built
/// outside a runtime without `with_runtime` must only be driven from
/// inside one.
#[derive(Clone)]
pub struct Channel {
    shared: Arc<ChannelShared>,
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.shared.id)
            .field("location", &self.shared.source.location)
            .finish()
    }
}

impl Channel {
    /// Create a stopped channel for a resolved source
    pub fn new(source: SourceHandle, ctx: ChannelContext) -> Self {
        Self {
            shared: Arc::new(ChannelShared {
                id: source.channel_id,
                source,
                ctx,
                inner: Mutex::new(ChannelInner {
                    state: ChannelPlaybackState::Stopped,
                    is_looping: false,
                    is_muted: false,
                    volume: 0.5,
                    delay_min: 0.0,
                    delay_max: 0.0,
                    voice: None,
                    voice_epoch: 0,
                    delay_timer: None,
                    fade: None,
                    next_token: 0,
                }),
            }),
        }
    }

    pub fn id(&self) -> ChannelId {
        self.shared.id
    }

    pub fn source(&self) -> &SourceHandle {
        &self.shared.source
    }

    /// Start playback, loading the source first if needed
    ///
    /// With a delay window the channel waits a fresh random delay before
    /// the source becomes audible. Calling `play` on a playing channel
    /// restarts the source.
    pub fn play(&self) -> Result<()> {
        let mut inner = self.shared.lock();

        if inner.voice.is_none() {
            if let Err(e) = self.shared.load(&mut inner) {
                warn!(channel_id = self.id(), "Failed to load source: {}", e);
                self.shared.set_state(&mut inner, ChannelPlaybackState::Stopped);
                return Err(e);
            }
        }

        inner.delay_timer = None;

        if inner.has_delay() {
            let delay = self.shared.draw_delay(&inner);
            info!(
                channel_id = self.id(),
                delay_ms = delay.as_millis() as u64,
                "Starting with initial delay"
            );
            if let Some(voice) = inner.voice.as_mut() {
                voice.pause();
                voice.rewind();
            }
            self.shared.set_state(&mut inner, ChannelPlaybackState::WaitingForDelay);
            self.shared.schedule_delay(&mut inner, delay);
            return Ok(());
        }

        let started = match inner.voice.as_mut() {
            Some(voice) => {
                voice.rewind();
                voice.play()
            }
            None => Ok(()),
        };

        if let Err(e) = started {
            warn!(channel_id = self.id(), "Playback failed to start: {}", e);
            self.shared.release_voice(&mut inner);
            self.shared.set_state(&mut inner, ChannelPlaybackState::Stopped);
            return Err(e);
        }

        debug!(channel_id = self.id(), "Playing immediately");
        self.shared.set_state(&mut inner, ChannelPlaybackState::Playing);
        Ok(())
    }

    /// Halt playback and release the playback resource
    ///
    /// Cancels any pending delay timer and fade. Safe to call repeatedly.
    pub fn stop(&self) {
        let mut inner = self.shared.lock();
        self.shared.stop_locked(&mut inner);
    }

    /// Set the logical volume (clamped to 0.0-1.0)
    pub fn set_volume(&self, volume: f32) {
        let mut inner = self.shared.lock();
        inner.volume = clamp_unit(volume);
        inner.apply_gain();
    }

    pub fn volume(&self) -> f32 {
        self.shared.lock().volume
    }

    pub fn set_mute(&self, muted: bool) {
        let mut inner = self.shared.lock();
        inner.is_muted = muted;
        inner.apply_gain();
    }

    /// Flip the mute flag, returning the new value
    pub fn toggle_mute(&self) -> bool {
        let mut inner = self.shared.lock();
        inner.is_muted = !inner.is_muted;
        inner.apply_gain();
        inner.is_muted
    }

    pub fn is_muted(&self) -> bool {
        self.shared.lock().is_muted
    }

    /// Enable or disable looping
    ///
    /// Ignored (looping stays on) while a delay window is configured.
    pub fn set_loop(&self, looping: bool) {
        let mut inner = self.shared.lock();
        self.shared.set_loop_locked(&mut inner, looping);
    }

    /// Flip the loop flag, returning the new value
    pub fn toggle_loop(&self) -> bool {
        let mut inner = self.shared.lock();
        let wanted = !inner.is_looping;
        self.shared.set_loop_locked(&mut inner, wanted);
        inner.is_looping
    }

    pub fn is_looping(&self) -> bool {
        self.shared.lock().is_looping
    }

    /// Configure the random delay window between loop iterations, in seconds
    ///
    /// Negative values are clamped to zero. A non-empty window forces
    /// looping on and replaces native looping with manual re-triggering.
    pub fn set_delay(&self, min_seconds: f64, max_seconds: f64) {
        let mut inner = self.shared.lock();
        self.shared.set_delay_locked(&mut inner, min_seconds, max_seconds);
    }

    pub fn has_delay_settings(&self) -> bool {
        self.shared.lock().has_delay()
    }

    /// Delay window in seconds, with max clamped to at least min
    pub fn delay_window(&self) -> (f64, f64) {
        let inner = self.shared.lock();
        (inner.delay_min, inner.delay_max.max(inner.delay_min))
    }

    /// Draw a random delay from the current window (zero without one)
    pub fn random_delay(&self) -> Duration {
        let inner = self.shared.lock();
        self.shared.draw_delay(&inner)
    }

    pub fn playback_state(&self) -> ChannelPlaybackState {
        self.shared.lock().state
    }

    /// Playing or waiting for a delayed start
    pub fn is_playing(&self) -> bool {
        self.playback_state().is_active()
    }

    pub fn is_waiting_for_delay(&self) -> bool {
        self.playback_state() == ChannelPlaybackState::WaitingForDelay
    }

    /// Whether the playback resource is open
    pub fn is_loaded(&self) -> bool {
        self.shared.lock().voice.is_some()
    }

    /// Whether a fade is in flight
    pub fn is_fading(&self) -> bool {
        self.shared.lock().fade.is_some()
    }

    /// Whether a delay timer is pending
    pub fn has_pending_delay(&self) -> bool {
        self.shared.lock().delay_timer.is_some()
    }

    /// Current output gain as reported by the voice (0.0 when unloaded)
    pub fn output_gain(&self) -> f32 {
        self.shared.lock().voice.as_ref().map_or(0.0, |v| v.gain())
    }

    /// Ramp the volume to `target` (clamped to 0.0-1.0)
    ///
    /// Any previous fade is cancelled first. Without an open playback
    /// resource the volume is set directly and the handle resolves at once.
    /// On completion the logical volume becomes `target`; with
    /// `stop_at_zero` and a zero target the channel is stopped.
    pub fn fade_to(&self, target: f32, options: FadeOptions) -> FadeHandle {
        let target = clamp_unit(target);
        let duration = options.duration.unwrap_or(self.shared.ctx.default_fade);
        let mut inner = self.shared.lock();

        inner.cancel_fade();

        if inner.voice.is_none() {
            inner.volume = target;
            return FadeHandle::completed();
        }

        let token = inner.token();
        let Some(voice) = inner.voice.as_mut() else {
            return FadeHandle::completed();
        };

        let op = FadeOperation {
            from: voice.gain(),
            to: target,
            duration,
            curve: options.curve,
            stop_at_zero: options.stop_at_zero,
        };
        let plan = FadeScheduler::for_voice(voice.as_mut()).begin(&op, voice.as_mut());

        debug!(
            channel_id = self.id(),
            from = op.from,
            to = op.to,
            duration_ms = duration.as_millis() as u64,
            curve = %op.curve,
            "Fade started"
        );

        let (tx, rx) = oneshot::channel();
        let shared = Arc::clone(&self.shared);
        let handle = self.shared.ctx.spawn(async move {
            shared.run_fade(token, op, plan, tx).await;
        });
        inner.fade = Some(ScheduledTask::new(token, handle));

        FadeHandle::pending(rx, duration)
    }

    /// Cancel the in-flight fade, leaving the logical volume unchanged
    pub fn cancel_fades(&self) {
        self.shared.lock().cancel_fade();
    }

    /// End-of-track notification from the host
    pub fn handle_track_end(&self) {
        let epoch = self.shared.lock().voice_epoch;
        self.shared.on_track_end(epoch);
    }

    /// Snapshot of the channel's state
    pub fn state(&self) -> ChannelSnapshot {
        let inner = self.shared.lock();
        ChannelSnapshot {
            channel_id: self.id(),
            location: self.shared.source.location.clone(),
            state: inner.state,
            is_playing: inner.state.is_active(),
            is_waiting_for_delay: inner.state == ChannelPlaybackState::WaitingForDelay,
            is_looping: inner.is_looping,
            is_muted: inner.is_muted,
            volume: inner.volume,
            min_seconds: inner.delay_min,
            max_seconds: inner.delay_max.max(inner.delay_min),
            is_loaded: inner.voice.is_some(),
            is_fading: inner.fade.is_some(),
        }
    }

    /// Restore persisted settings without changing playback state
    pub fn set_state(&self, settings: &ChannelSettings) {
        let mut inner = self.shared.lock();
        inner.is_muted = settings.is_muted;
        inner.volume = clamp_unit(settings.volume);
        self.shared
            .set_delay_locked(&mut inner, settings.min_seconds, settings.max_seconds);
        self.shared.set_loop_locked(&mut inner, settings.is_looping);
        inner.apply_gain();
    }

    /// Release every resource; called when the channel leaves the mix
    pub fn release(&self) {
        self.stop();
        debug!(channel_id = self.id(), "Channel released");
    }
}

impl ChannelShared {
    fn lock(&self) -> MutexGuard<'_, ChannelInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn load(self: &Arc<Self>, inner: &mut ChannelInner) -> Result<()> {
        inner.voice_epoch += 1;
        let epoch = inner.voice_epoch;
        let weak: Weak<ChannelShared> = Arc::downgrade(self);
        let hook = TrackEndHook::new(move || {
            if let Some(shared) = weak.upgrade() {
                shared.on_track_end(epoch);
            }
        });

        let voice = self.ctx.backend.open(&self.source, hook)?;
        inner.voice = Some(voice);
        inner.apply_native_loop();
        inner.apply_gain();
        debug!(channel_id = self.id, location = %self.source.location, "Source loaded");
        Ok(())
    }

    fn release_voice(&self, inner: &mut ChannelInner) {
        if let Some(mut voice) = inner.voice.take() {
            voice.pause();
            voice.close();
        }
    }

    fn stop_locked(&self, inner: &mut ChannelInner) {
        if inner.delay_timer.take().is_some() {
            debug!(channel_id = self.id, "Cancelled pending delay");
        }
        inner.cancel_fade();
        self.release_voice(inner);
        self.set_state(inner, ChannelPlaybackState::Stopped);
    }

    fn set_state(&self, inner: &mut ChannelInner, state: ChannelPlaybackState) {
        if inner.state == state {
            return;
        }
        inner.state = state;
        self.ctx.events.emit_lossy(MixerEvent::ChannelStateChanged {
            channel_id: self.id,
            is_playing: state.is_active(),
            is_waiting_for_delay: state == ChannelPlaybackState::WaitingForDelay,
            timestamp: chrono::Utc::now(),
        });
    }

    fn set_loop_locked(&self, inner: &mut ChannelInner, looping: bool) {
        if inner.has_delay() {
            if !looping {
                debug!(channel_id = self.id, "Loop forced on by delay window");
            }
            inner.is_looping = true;
        } else {
            inner.is_looping = looping;
        }
        inner.apply_native_loop();
    }

    fn set_delay_locked(&self, inner: &mut ChannelInner, min_seconds: f64, max_seconds: f64) {
        inner.delay_min = non_negative(min_seconds);
        inner.delay_max = non_negative(max_seconds);
        if inner.has_delay() {
            inner.is_looping = true;
        }
        inner.apply_native_loop();
        debug!(
            channel_id = self.id,
            min_seconds = inner.delay_min,
            max_seconds = inner.delay_max,
            "Delay window set"
        );
    }

    fn draw_delay(&self, inner: &ChannelInner) -> Duration {
        if !inner.has_delay() {
            return Duration::ZERO;
        }
        let ms = random_delay_ms(inner.delay_min, inner.delay_max, &mut rand::thread_rng());
        Duration::from_millis(ms)
    }

    fn schedule_delay(self: &Arc<Self>, inner: &mut ChannelInner, delay: Duration) {
        let token = inner.token();
        let shared = Arc::clone(self);
        let handle = self.ctx.spawn(async move {
            tokio::time::sleep(delay).await;
            shared.fire_delay(token);
        });
        inner.delay_timer = Some(ScheduledTask::new(token, handle));
    }

    fn fire_delay(&self, token: u64) {
        let mut inner = self.lock();
        if !inner.owns_delay(token) {
            return;
        }
        if let Some(timer) = inner.delay_timer.take() {
            timer.detach();
        }
        if inner.state != ChannelPlaybackState::WaitingForDelay {
            return;
        }

        let result = match inner.voice.as_mut() {
            Some(voice) => {
                voice.rewind();
                voice.play()
            }
            None => return,
        };

        match result {
            Ok(()) => {
                debug!(channel_id = self.id, "Delay expired, playing");
                self.set_state(&mut inner, ChannelPlaybackState::Playing);
            }
            Err(e) => warn!(channel_id = self.id, "Failed to replay after delay: {}", e),
        }
    }

    fn on_track_end(self: &Arc<Self>, epoch: u64) {
        let mut inner = self.lock();
        if inner.voice_epoch != epoch || inner.voice.is_none() {
            return;
        }

        let has_delay = inner.has_delay();
        self.ctx.events.emit_lossy(MixerEvent::ChannelEnded {
            channel_id: self.id,
            is_looping: inner.is_looping,
            has_delay,
            timestamp: chrono::Utc::now(),
        });

        if !inner.is_looping {
            self.set_state(&mut inner, ChannelPlaybackState::Stopped);
            return;
        }
        if inner.state != ChannelPlaybackState::Playing {
            return;
        }

        if has_delay {
            let delay = self.draw_delay(&inner);
            info!(
                channel_id = self.id,
                delay_ms = delay.as_millis() as u64,
                "Finished, waiting before replay"
            );
            self.set_state(&mut inner, ChannelPlaybackState::WaitingForDelay);
            self.schedule_delay(&mut inner, delay);
        } else if let Some(voice) = inner.voice.as_mut() {
            voice.rewind();
            if let Err(e) = voice.play() {
                warn!(channel_id = self.id, "Failed to replay: {}", e);
            }
        }
    }

    async fn run_fade(
        self: Arc<Self>,
        token: u64,
        op: FadeOperation,
        plan: RampPlan,
        tx: oneshot::Sender<FadeOutcome>,
    ) {
        let start = Instant::now();

        if let RampPlan::Stepped(steps) = plan {
            for step in steps {
                tokio::time::sleep_until(start + step.at).await;
                let mut inner = self.lock();
                if !inner.owns_fade(token) {
                    return;
                }
                if let Some(voice) = inner.voice.as_mut() {
                    voice.set_gain(step.gain);
                }
            }
        }

        tokio::time::sleep_until(start + op.duration + self.ctx.settle_margin).await;

        let mut inner = self.lock();
        if !inner.owns_fade(token) {
            return;
        }
        if let Some(task) = inner.fade.take() {
            task.detach();
        }

        inner.volume = op.to;
        if inner.is_muted && op.to > 0.0 {
            inner.is_muted = false;
        }
        if op.stops_channel() {
            self.stop_locked(&mut inner);
        } else {
            inner.apply_gain();
        }
        drop(inner);

        debug!(channel_id = self.id, volume = op.to, "Fade completed");
        let _ = tx.send(FadeOutcome::Completed);
    }
}

fn clamp_unit(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

fn non_negative(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::SimulatedBackend;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn channel_with(backend: &SimulatedBackend) -> Channel {
        let ctx = ChannelContext::new(Arc::new(backend.clone()), EventBus::new(100));
        Channel::new(SourceHandle::new(1, "rain.ogg"), ctx)
    }

    #[test]
    fn test_random_delay_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..1000 {
            let ms = random_delay_ms(2.0, 5.0, &mut rng);
            assert!((2000..=5000).contains(&ms), "{} out of range", ms);
        }
    }

    #[test]
    fn test_random_delay_max_below_min() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(random_delay_ms(3.0, 1.0, &mut rng), 3000);
    }

    #[test]
    fn test_clamp_helpers() {
        assert_eq!(clamp_unit(1.4), 1.0);
        assert_eq!(clamp_unit(-0.2), 0.0);
        assert_eq!(clamp_unit(f32::NAN), 0.0);
        assert_eq!(non_negative(-3.0), 0.0);
    }

    #[test]
    fn test_delay_forces_loop() {
        let channel = channel_with(&SimulatedBackend::new());
        channel.set_loop(false);
        channel.set_delay(0.0, 4.0);
        assert!(channel.has_delay_settings());
        assert!(channel.is_looping());

        channel.set_loop(false);
        assert!(channel.is_looping());
        assert!(channel.toggle_loop());
    }

    #[test]
    fn test_clearing_delay_restores_loop_control() {
        let channel = channel_with(&SimulatedBackend::new());
        channel.set_delay(1.0, 2.0);
        channel.set_delay(-1.0, 0.0);
        assert!(!channel.has_delay_settings());
        channel.set_loop(false);
        assert!(!channel.is_looping());
    }

    #[test]
    fn test_delay_window_clamped_at_read() {
        let channel = channel_with(&SimulatedBackend::new());
        channel.set_delay(4.0, 1.0);
        assert_eq!(channel.delay_window(), (4.0, 4.0));
        assert_eq!(channel.state().max_seconds, 4.0);
    }

    #[test]
    fn test_mute_is_independent_of_volume() {
        let channel = channel_with(&SimulatedBackend::new());
        channel.set_volume(0.7);
        assert!(channel.toggle_mute());
        assert_eq!(channel.volume(), 0.7);
        assert!(!channel.toggle_mute());
    }

    #[tokio::test]
    async fn test_fade_without_resource_is_immediate() {
        let channel = channel_with(&SimulatedBackend::new());
        let handle = channel.fade_to(0.9, FadeOptions::over(Duration::from_secs(5)));
        assert_eq!(handle.duration(), Duration::ZERO);
        assert_eq!(handle.await, FadeOutcome::Completed);
        assert_eq!(channel.volume(), 0.9);
    }

    #[tokio::test]
    async fn test_set_state_restores_settings() {
        let channel = channel_with(&SimulatedBackend::new());
        channel.set_state(&ChannelSettings {
            is_looping: false,
            is_muted: true,
            volume: 0.3,
            min_seconds: 1.0,
            max_seconds: 3.0,
        });
        let snapshot = channel.state();
        assert!(snapshot.is_looping);
        assert!(snapshot.is_muted);
        assert_eq!(snapshot.volume, 0.3);
        assert_eq!(snapshot.state, ChannelPlaybackState::Stopped);
    }
}
