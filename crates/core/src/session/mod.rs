//! Session ownership and the per-frame animation loop.
//!
//! A [`Session`] is built once and owns the pattern engine, the frame gate
//! and the tone scheduler. [`AnimationDriver`] runs the loop on top of it:
//! each delivered tick goes through the gate and, when admitted, produces a
//! vertex set that is presented to the renderer and, unless muted, turned
//! into tones. Exactly one tick is outstanding while the driver runs.

use serde::{Deserialize, Serialize};

use crate::{
    audio::{AudioDevice, AudioState, ToneScheduler},
    config::{AppConfig, MAX_COMPLEXITY},
    render::Renderer,
    timeline::{FrameGate, FrameMetrics, TickScheduler, TickToken},
    PatternEngine, Result, TessellationError, TransformKind, VertexSet,
};

/// Long-lived components of one audio-visual session.
#[derive(Debug)]
pub struct Session {
    pattern: PatternEngine,
    gate: FrameGate,
    tones: ToneScheduler,
}

impl Session {
    /// Creates the engine, gate and scheduler from one configuration.
    pub fn new(config: &AppConfig, device: Box<dyn AudioDevice>) -> Self {
        Self {
            pattern: PatternEngine::new(config.pattern.clone()),
            gate: FrameGate::new(config.frame.clone()),
            tones: ToneScheduler::new(device, &config.audio),
        }
    }

    /// Returns the pattern engine.
    pub fn pattern(&self) -> &PatternEngine {
        &self.pattern
    }

    /// Returns the frame gate.
    pub fn gate(&self) -> &FrameGate {
        &self.gate
    }

    /// Returns the tone scheduler.
    pub fn tones(&self) -> &ToneScheduler {
        &self.tones
    }
}

/// Whether the loop currently has a tick outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverState {
    Idle,
    Running,
}

/// User-adjustable values read on every tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Parameters {
    pub complexity: u32,
    pub transform: TransformKind,
    pub muted: bool,
}

/// Discrete events coming from the control surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlEvent {
    TogglePlay,
    ToggleMute,
    Reset,
    SetComplexity(u32),
    SetTransform(TransformKind),
}

/// What a delivered tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// A new frame was produced and handed on.
    Rendered { vertices: usize, tones: usize },
    /// The gate rejected the tick; the loop keeps going.
    Throttled,
    /// The tick was cancelled or the driver is not running.
    Ignored,
}

/// Serializable snapshot of the whole driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverStatus {
    pub state: DriverState,
    pub parameters: Parameters,
    pub vertex_count: usize,
    pub frame: FrameMetrics,
    pub audio: AudioState,
    pub init_error: Option<String>,
}

/// Cooperative animation loop over a [`Session`].
pub struct AnimationDriver<R: Renderer, T: TickScheduler> {
    session: Session,
    renderer: R,
    ticker: T,
    params: Parameters,
    state: DriverState,
    pending: Option<TickToken>,
    start_requested: bool,
    initialized: bool,
    disposed: bool,
    init_error: Option<String>,
    vertices: VertexSet,
}

impl<R: Renderer, T: TickScheduler> AnimationDriver<R, T> {
    /// Creates an idle driver over a fresh [`Session`].
    pub fn new(config: &AppConfig, device: Box<dyn AudioDevice>, renderer: R, ticker: T) -> Self {
        Self::with_session(Session::new(config, device), config, renderer, ticker)
    }

    /// Creates an idle driver over an existing session. The initial
    /// complexity is clamped to `1..=MAX_COMPLEXITY`.
    pub fn with_session(session: Session, config: &AppConfig, renderer: R, ticker: T) -> Self {
        Self {
            session,
            renderer,
            ticker,
            params: Parameters {
                complexity: config.session.complexity.clamp(1, MAX_COMPLEXITY),
                transform: config.session.transform,
                muted: config.session.muted,
            },
            state: DriverState::Idle,
            pending: None,
            start_requested: false,
            initialized: false,
            disposed: false,
            init_error: None,
            vertices: VertexSet::empty(),
        }
    }

    /// Acquires the audio output. A failure is returned and kept in
    /// [`DriverStatus::init_error`], but the visual loop stays usable with
    /// audio off. A start requested earlier takes effect here.
    pub fn initialize(&mut self) -> Result<()> {
        if self.disposed {
            return Err(TessellationError::msg("session has been shut down"));
        }
        if self.initialized {
            return Ok(());
        }

        let audio = self.session.tones.initialize();
        self.initialized = true;
        if let Err(err) = &audio {
            tracing::error!(%err, "audio unavailable, continuing without sound");
            self.init_error = Some(err.to_string());
        }

        if std::mem::take(&mut self.start_requested) {
            self.start();
        }
        audio
    }

    /// Returns true once [`AnimationDriver::initialize`] has run.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Enters the running state and requests the first tick. Before
    /// initialization the request is remembered instead.
    pub fn start(&mut self) {
        if self.disposed || self.state == DriverState::Running {
            return;
        }
        if !self.initialized {
            tracing::debug!("start deferred until initialization completes");
            self.start_requested = true;
            return;
        }

        self.state = DriverState::Running;
        self.pending = Some(self.ticker.request_tick());
        tracing::info!(params = ?self.params, "animation started");
    }

    /// Stops the loop. No tick is delivered after this returns.
    pub fn stop(&mut self) {
        self.start_requested = false;
        if let Some(token) = self.pending.take() {
            self.ticker.cancel_tick(token);
        }
        if self.state == DriverState::Running {
            self.state = DriverState::Idle;
            tracing::info!("animation stopped");
        }
    }

    /// Same as [`AnimationDriver::stop`].
    pub fn pause(&mut self) {
        self.stop();
    }

    /// Starts an idle loop or stops a running one.
    pub fn toggle_play(&mut self) {
        match self.state {
            DriverState::Running => self.stop(),
            DriverState::Idle => self.start(),
        }
    }

    /// Returns to idle and drops per-session output: the last frame, the
    /// pattern caches, live tones and pacing history. The audio context stays
    /// open for the next start.
    pub fn reset(&mut self) {
        self.stop();
        self.vertices = VertexSet::empty();
        self.session.pattern.cleanup();
        self.session.tones.retire_all();
        self.session.gate.reset();
        tracing::info!("session reset");
    }

    /// Changes the subdivision depth used from the next tick on. Values
    /// outside `1..=MAX_COMPLEXITY` are rejected.
    pub fn set_complexity(&mut self, complexity: u32) -> Result<()> {
        if !(1..=MAX_COMPLEXITY).contains(&complexity) {
            return Err(TessellationError::InvalidComplexity(complexity));
        }
        self.params.complexity = complexity;
        Ok(())
    }

    /// Changes the transform used from the next tick on.
    pub fn set_transform(&mut self, transform: TransformKind) {
        self.params.transform = transform;
    }

    /// Muting silences the live batch immediately and suspends the output
    /// context rather than waiting for the next tick. Unmuting resumes the
    /// context; tones return with the next admitted frame.
    pub fn set_muted(&mut self, muted: bool) {
        if self.params.muted == muted {
            return;
        }
        self.params.muted = muted;
        if muted {
            self.session.tones.retire_all();
            self.session.tones.suspend();
        } else {
            self.session.tones.resume();
        }
    }

    /// Routes a control-surface event to the matching operation.
    pub fn apply(&mut self, event: ControlEvent) -> Result<()> {
        tracing::debug!(?event, "control event");
        match event {
            ControlEvent::TogglePlay => self.toggle_play(),
            ControlEvent::ToggleMute => self.set_muted(!self.params.muted),
            ControlEvent::Reset => self.reset(),
            ControlEvent::SetComplexity(complexity) => self.set_complexity(complexity)?,
            ControlEvent::SetTransform(transform) => self.set_transform(transform),
        }
        Ok(())
    }

    /// Handles a tick delivered by the host. `timestamp` is in milliseconds
    /// on a monotonic clock.
    pub fn tick(&mut self, token: TickToken, timestamp: f64) -> TickOutcome {
        if self.state != DriverState::Running || self.pending != Some(token) {
            return TickOutcome::Ignored;
        }
        self.pending = None;

        let outcome = if self.session.gate.admit(timestamp) {
            self.produce_frame()
        } else {
            tracing::debug!(timestamp, fps = self.session.gate.fps(), "frame throttled");
            TickOutcome::Throttled
        };

        self.pending = Some(self.ticker.request_tick());
        outcome
    }

    fn produce_frame(&mut self) -> TickOutcome {
        let Parameters {
            complexity,
            transform,
            muted,
        } = self.params;

        let vertices = match self.session.pattern.generate(complexity, transform) {
            Ok(vertices) => vertices,
            Err(err) => {
                tracing::warn!(%err, "pattern generation failed");
                return TickOutcome::Throttled;
            }
        };

        self.renderer.present(&vertices);
        let tones = if !muted && self.session.tones.is_initialized() {
            self.session.tones.schedule_notes(&vertices)
        } else {
            0
        };

        let count = vertices.len();
        self.vertices = vertices;
        TickOutcome::Rendered {
            vertices: count,
            tones,
        }
    }

    /// Releases every resource the session holds. Idempotent; also runs on
    /// drop.
    pub fn shutdown(&mut self) {
        if self.disposed {
            return;
        }
        self.stop();
        self.session.tones.cleanup();
        self.session.gate.cleanup();
        self.session.pattern.cleanup();
        self.vertices = VertexSet::empty();
        self.disposed = true;
        tracing::info!("session shut down");
    }

    /// Returns the current loop state.
    pub fn state(&self) -> DriverState {
        self.state
    }

    /// Returns the parameters the next tick will use.
    pub fn parameters(&self) -> Parameters {
        self.params
    }

    /// The most recently produced frame.
    pub fn vertices(&self) -> &VertexSet {
        &self.vertices
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn ticker(&self) -> &T {
        &self.ticker
    }

    pub fn ticker_mut(&mut self) -> &mut T {
        &mut self.ticker
    }

    /// Returns a serializable snapshot of the whole driver.
    pub fn status(&self) -> DriverStatus {
        DriverStatus {
            state: self.state,
            parameters: self.params,
            vertex_count: self.vertices.len(),
            frame: self.session.gate.metrics(),
            audio: self.session.tones.state(),
            init_error: self.init_error.clone(),
        }
    }
}

impl<R: Renderer, T: TickScheduler> Drop for AnimationDriver<R, T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<R: Renderer, T: TickScheduler> std::fmt::Debug for AnimationDriver<R, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnimationDriver")
            .field("state", &self.state)
            .field("params", &self.params)
            .field("pending", &self.pending)
            .field("initialized", &self.initialized)
            .field("vertices", &self.vertices.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        audio::{ContextState, OfflineDevice, OfflineProbe},
        render::FrameRecorder,
        timeline::ManualTicker,
    };

    type Driver = AnimationDriver<FrameRecorder, ManualTicker>;

    fn config(complexity: u32, transform: TransformKind) -> AppConfig {
        let mut config = AppConfig::default();
        config.session.complexity = complexity;
        config.session.transform = transform;
        config
    }

    fn driver_with(config: &AppConfig, device: OfflineDevice) -> (Driver, OfflineProbe) {
        let probe = device.probe();
        let driver = AnimationDriver::new(
            config,
            Box::new(device),
            FrameRecorder::default(),
            ManualTicker::new(),
        );
        (driver, probe)
    }

    fn running(complexity: u32) -> (Driver, OfflineProbe) {
        let (mut driver, probe) = driver_with(
            &config(complexity, TransformKind::Reflection),
            OfflineDevice::new(8_000),
        );
        driver.initialize().unwrap();
        driver.start();
        (driver, probe)
    }

    fn pump(driver: &mut Driver, timestamp: f64) -> TickOutcome {
        let token = driver
            .ticker_mut()
            .take_pending()
            .expect("a tick should be outstanding");
        driver.tick(token, timestamp)
    }

    #[test]
    fn start_waits_for_initialization() {
        let (mut driver, _probe) = driver_with(&AppConfig::default(), OfflineDevice::new(8_000));

        driver.start();
        assert_eq!(driver.state(), DriverState::Idle);
        assert!(driver.ticker().pending().is_none());

        driver.initialize().unwrap();
        assert_eq!(driver.state(), DriverState::Running);
        assert!(driver.ticker().pending().is_some());
    }

    #[test]
    fn admitted_tick_renders_and_schedules_tones() {
        let (mut driver, probe) = running(3);

        let outcome = pump(&mut driver, 0.0);

        assert_eq!(
            outcome,
            TickOutcome::Rendered {
                vertices: 48,
                tones: 48
            }
        );
        assert_eq!(driver.vertices().len(), 48);
        assert_eq!(driver.renderer().frames_presented(), 1);
        assert_eq!(probe.live_tones(), 48);
        assert!(driver.ticker().pending().is_some(), "loop must continue");
    }

    #[test]
    fn throttled_tick_keeps_the_loop_alive() {
        let (mut driver, _probe) = running(1);
        pump(&mut driver, 0.0);

        let outcome = pump(&mut driver, 100.0);

        assert_eq!(outcome, TickOutcome::Throttled);
        assert_eq!(driver.renderer().frames_presented(), 1);
        assert!(driver.ticker().pending().is_some());
        assert_eq!(
            pump(&mut driver, 116.0),
            TickOutcome::Rendered {
                vertices: 3,
                tones: 3
            }
        );
    }

    #[test]
    fn stop_cancels_the_outstanding_tick() {
        let (mut driver, _probe) = running(1);
        let token = driver.ticker().pending().unwrap();

        driver.stop();

        assert_eq!(driver.state(), DriverState::Idle);
        assert!(driver.ticker().pending().is_none());
        assert_eq!(driver.tick(token, 0.0), TickOutcome::Ignored);
        assert_eq!(driver.renderer().frames_presented(), 0);
    }

    #[test]
    fn parameter_changes_apply_on_next_tick() {
        let (mut driver, _probe) = running(1);
        pump(&mut driver, 0.0);

        driver.apply(ControlEvent::SetComplexity(2)).unwrap();
        driver
            .apply(ControlEvent::SetTransform(TransformKind::Identity))
            .unwrap();
        assert_eq!(driver.vertices().len(), 3);

        pump(&mut driver, 16.0);
        assert_eq!(driver.vertices().len(), 12);
        assert_eq!(driver.parameters().transform, TransformKind::Identity);
        assert!(driver.apply(ControlEvent::SetComplexity(0)).is_err());
        assert!(driver
            .apply(ControlEvent::SetComplexity(MAX_COMPLEXITY + 1))
            .is_err());
        assert_eq!(driver.parameters().complexity, 2);
    }

    #[test]
    fn oversized_initial_complexity_is_clamped() {
        let (driver, _probe) = driver_with(
            &config(16, TransformKind::Identity),
            OfflineDevice::new(8_000),
        );
        assert_eq!(driver.parameters().complexity, MAX_COMPLEXITY);
    }

    #[test]
    fn muting_silences_and_suspends_audio() {
        let (mut driver, probe) = running(2);
        pump(&mut driver, 0.0);
        assert_eq!(probe.live_tones(), 12);

        driver.apply(ControlEvent::ToggleMute).unwrap();
        assert_eq!(probe.live_tones(), 0);
        assert_eq!(probe.context_state(), ContextState::Suspended);

        let outcome = pump(&mut driver, 16.0);
        assert_eq!(
            outcome,
            TickOutcome::Rendered {
                vertices: 12,
                tones: 0
            }
        );

        driver.apply(ControlEvent::ToggleMute).unwrap();
        assert_eq!(probe.context_state(), ContextState::Running);
        pump(&mut driver, 32.0);
        assert_eq!(probe.live_tones(), 12);
    }

    #[test]
    fn reset_mid_run_keeps_audio_usable() {
        let (mut driver, probe) = running(3);
        pump(&mut driver, 0.0);
        pump(&mut driver, 16.0);

        driver.apply(ControlEvent::Reset).unwrap();

        assert_eq!(driver.state(), DriverState::Idle);
        assert!(driver.vertices().is_empty());
        assert_eq!(driver.status().audio.active_tones, 0);
        assert_eq!(probe.live_tones(), 0);
        assert_eq!(driver.session().pattern().cached_results(), 0);
        assert_eq!(driver.status().frame.frame_count, 0);
        assert_eq!(probe.context_state(), ContextState::Running);

        driver.apply(ControlEvent::TogglePlay).unwrap();
        assert_eq!(
            pump(&mut driver, 500.0),
            TickOutcome::Rendered {
                vertices: 48,
                tones: 48
            }
        );
        assert_eq!(probe.contexts_created(), 1);
    }

    #[test]
    fn audio_failure_leaves_visuals_running() {
        let (mut driver, _probe) = driver_with(
            &config(2, TransformKind::Reflection),
            OfflineDevice::unavailable(),
        );
        driver.start();

        let err = driver.initialize().unwrap_err();
        assert!(matches!(err, TessellationError::AudioInit(_)));
        assert_eq!(driver.state(), DriverState::Running);

        let outcome = pump(&mut driver, 0.0);
        assert_eq!(
            outcome,
            TickOutcome::Rendered {
                vertices: 12,
                tones: 0
            }
        );
        let status = driver.status();
        assert!(status.init_error.is_some());
        assert!(!status.audio.initialized);
    }

    #[test]
    fn shutdown_releases_audio_and_is_final() {
        let (mut driver, probe) = running(2);
        pump(&mut driver, 0.0);

        driver.shutdown();
        driver.shutdown();

        assert_eq!(probe.live_tones(), 0);
        assert_eq!(probe.context_state(), ContextState::Closed);
        assert!(!driver.status().frame.is_active);
        driver.start();
        assert_eq!(driver.state(), DriverState::Idle);
        assert!(driver.initialize().is_err());
    }

    #[test]
    fn dropping_a_running_driver_closes_audio() {
        let (mut driver, probe) = running(1);
        pump(&mut driver, 0.0);
        drop(driver);

        assert_eq!(probe.live_tones(), 0);
        assert_eq!(probe.context_state(), ContextState::Closed);
    }

    #[test]
    fn status_serializes_to_json() {
        let (mut driver, _probe) = running(1);
        pump(&mut driver, 0.0);

        let json = serde_json::to_value(driver.status()).unwrap();

        assert_eq!(json["state"], "running");
        assert_eq!(json["parameters"]["transform"], "reflection");
        assert_eq!(json["vertex_count"], 3);
    }
}
