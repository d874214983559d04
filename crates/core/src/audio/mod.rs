//! Tone scheduling on top of an abstract audio output capability.
//!
//! [`AudioDevice`] and [`AudioContext`] describe what the host audio stack has
//! to provide: node creation, wiring and transport. [`ToneScheduler`] turns a
//! vertex set into one short enveloped tone per vertex and guarantees that
//! every node it creates is released again.

mod offline;

use serde::{Deserialize, Serialize};

pub use offline::{OfflineDevice, OfflineProbe};

use crate::{
    config::{AudioConfig, EnvelopeConfig},
    Result, TessellationError, ToneMapping, VertexSet,
};

/// Handle to a node living inside an [`AudioContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u64);

/// Transport state of an output context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContextState {
    Running,
    Suspended,
    Closed,
}

/// Factory for output contexts.
pub trait AudioDevice {
    /// Opens a new running context.
    fn create_context(&mut self) -> Result<Box<dyn AudioContext>>;
}

/// A live audio graph. Times are seconds on the context's own clock.
pub trait AudioContext {
    fn current_time(&self) -> f64;
    fn state(&self) -> ContextState;
    /// The terminal node that reaches the speakers.
    fn destination(&self) -> NodeId;

    fn create_gain(&mut self, level: f32) -> Result<NodeId>;
    fn create_tone(&mut self, frequency: f32) -> Result<NodeId>;
    fn connect(&mut self, from: NodeId, to: NodeId) -> Result<()>;
    /// Detaches the node from the graph and releases it.
    fn disconnect(&mut self, node: NodeId) -> Result<()>;
    /// Replaces the gain automation of `gain` with `envelope` starting at `at`.
    fn schedule_envelope(&mut self, gain: NodeId, envelope: &Envelope, at: f64) -> Result<()>;

    fn start(&mut self, source: NodeId, at: f64) -> Result<()>;
    fn stop(&mut self, source: NodeId, at: f64) -> Result<()>;

    fn suspend(&mut self) -> Result<()>;
    fn resume(&mut self) -> Result<()>;
    fn close(&mut self) -> Result<()>;
}

/// Attack/decay amplitude shape: silent at the start, a linear ramp to
/// `peak` over `attack`, then an exponential decay to `floor` at `duration`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub attack: f64,
    pub peak: f32,
    pub floor: f32,
    pub duration: f64,
}

impl Envelope {
    /// Gain at `elapsed` seconds after the envelope starts.
    pub fn level_at(&self, elapsed: f64) -> f32 {
        if elapsed <= 0.0 {
            0.0
        } else if elapsed < self.attack {
            self.peak * (elapsed / self.attack) as f32
        } else if elapsed < self.duration && self.duration > self.attack && self.peak > 0.0 {
            let progress = (elapsed - self.attack) / (self.duration - self.attack);
            self.peak * (self.floor / self.peak).powf(progress as f32)
        } else {
            self.floor
        }
    }
}

impl From<EnvelopeConfig> for Envelope {
    fn from(config: EnvelopeConfig) -> Self {
        Self {
            attack: config.attack,
            peak: config.peak,
            floor: config.floor,
            duration: config.duration,
        }
    }
}

impl Default for Envelope {
    fn default() -> Self {
        EnvelopeConfig::default().into()
    }
}

/// One scheduled tone tied to a single vertex.
#[derive(Debug, Clone, PartialEq)]
pub struct ToneEvent {
    pub index: usize,
    pub frequency: f32,
    pub start_time: f64,
    pub stop_time: f64,
    pub source: NodeId,
    pub gain: NodeId,
}

/// Snapshot of the scheduler for status reporting.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AudioState {
    pub initialized: bool,
    pub context_state: ContextState,
    pub active_tones: usize,
}

struct AudioOutput {
    context: Box<dyn AudioContext>,
    master: NodeId,
}

/// Owns the audio output context and at most one live batch of tone events.
pub struct ToneScheduler {
    device: Box<dyn AudioDevice>,
    mapping: ToneMapping,
    envelope: Envelope,
    master_level: f32,
    output: Option<AudioOutput>,
    live: Vec<ToneEvent>,
}

impl ToneScheduler {
    /// Creates an uninitialized scheduler. No context is opened until
    /// [`ToneScheduler::initialize`].
    pub fn new(device: Box<dyn AudioDevice>, config: &AudioConfig) -> Self {
        Self {
            device,
            mapping: ToneMapping::from_config(config),
            envelope: config.envelope.into(),
            master_level: config.master_gain,
            output: None,
            live: Vec::new(),
        }
    }

    /// Returns true while an output context is held.
    pub fn is_initialized(&self) -> bool {
        self.output.is_some()
    }

    pub fn mapping(&self) -> &ToneMapping {
        &self.mapping
    }

    /// Returns the events of the current batch.
    pub fn live_events(&self) -> &[ToneEvent] {
        &self.live
    }

    /// Acquires the output context and the master gain. Calling this again
    /// while initialized does nothing.
    pub fn initialize(&mut self) -> Result<()> {
        if self.output.is_some() {
            return Ok(());
        }

        let mut context = self
            .device
            .create_context()
            .map_err(|err| TessellationError::AudioInit(err.to_string()))?;

        let master = match create_master(context.as_mut(), self.master_level) {
            Ok(master) => master,
            Err(err) => {
                if let Err(close_err) = context.close() {
                    tracing::warn!(%close_err, "failed to close audio context after setup error");
                }
                return Err(TessellationError::AudioInit(err.to_string()));
            }
        };

        self.output = Some(AudioOutput { context, master });
        tracing::info!(master_gain = self.master_level, "tone scheduler initialized");
        Ok(())
    }

    /// Retires the previous batch, then schedules one tone per vertex.
    /// Returns the number of tones that were scheduled. Individual failures
    /// are logged and skipped.
    pub fn schedule_notes(&mut self, vertices: &VertexSet) -> usize {
        if self.output.is_none() {
            tracing::warn!("tone scheduler used before initialization");
            return 0;
        }
        self.retire_all();

        let Some(output) = self.output.as_mut() else {
            return 0;
        };
        let start = output.context.current_time();
        for index in 0..vertices.len() {
            let frequency = self.mapping.frequency_for(index);
            match start_tone(output, &self.envelope, frequency, start) {
                Ok((source, gain)) => self.live.push(ToneEvent {
                    index,
                    frequency,
                    start_time: start,
                    stop_time: start + self.envelope.duration,
                    source,
                    gain,
                }),
                Err(err) => tracing::warn!(index, frequency, %err, "skipping tone event"),
            }
        }

        tracing::debug!(requested = vertices.len(), scheduled = self.live.len(), "scheduled tones");
        self.live.len()
    }

    /// Stops and disconnects every live tone event.
    pub fn retire_all(&mut self) {
        let events = std::mem::take(&mut self.live);
        let Some(output) = self.output.as_mut() else {
            return;
        };

        let now = output.context.current_time();
        for event in events {
            let context = output.context.as_mut();
            let steps = [
                context.stop(event.source, now),
                context.disconnect(event.source),
                context.disconnect(event.gain),
            ];
            for err in steps.into_iter().filter_map(|step| step.err()) {
                tracing::warn!(index = event.index, %err, "error retiring tone event");
            }
        }
    }

    /// Suspends a running output context. Failures are logged.
    pub fn suspend(&mut self) {
        if let Some(output) = self.output.as_mut() {
            if output.context.state() == ContextState::Running {
                match output.context.suspend() {
                    Ok(()) => tracing::info!("audio context suspended"),
                    Err(err) => tracing::warn!(%err, "error suspending audio context"),
                }
            }
        }
    }

    /// Resumes a suspended output context. Failures are logged.
    pub fn resume(&mut self) {
        if let Some(output) = self.output.as_mut() {
            if output.context.state() == ContextState::Suspended {
                match output.context.resume() {
                    Ok(()) => tracing::info!("audio context resumed"),
                    Err(err) => tracing::warn!(%err, "error resuming audio context"),
                }
            }
        }
    }

    /// Releases every tone, the master gain and the context. Safe to call
    /// repeatedly.
    pub fn cleanup(&mut self) {
        self.retire_all();

        if let Some(mut output) = self.output.take() {
            if let Err(err) = output.context.disconnect(output.master) {
                tracing::warn!(%err, "error releasing master gain");
            }
            if output.context.state() != ContextState::Closed {
                match output.context.close() {
                    Ok(()) => tracing::info!("audio context closed"),
                    Err(err) => tracing::warn!(%err, "error closing audio context"),
                }
            }
        }
    }

    /// Returns the current audio state. A scheduler without a context
    /// reports [`ContextState::Closed`].
    pub fn state(&self) -> AudioState {
        AudioState {
            initialized: self.output.is_some(),
            context_state: self
                .output
                .as_ref()
                .map(|output| output.context.state())
                .unwrap_or(ContextState::Closed),
            active_tones: self.live.len(),
        }
    }
}

impl Drop for ToneScheduler {
    fn drop(&mut self) {
        self.cleanup();
    }
}

impl std::fmt::Debug for ToneScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToneScheduler")
            .field("mapping", &self.mapping)
            .field("envelope", &self.envelope)
            .field("initialized", &self.output.is_some())
            .field("live", &self.live.len())
            .finish()
    }
}

fn create_master(context: &mut dyn AudioContext, level: f32) -> Result<NodeId> {
    let master = context.create_gain(level)?;
    let destination = context.destination();
    if let Err(err) = context.connect(master, destination) {
        let _ = context.disconnect(master);
        return Err(err);
    }
    Ok(master)
}

/// Creates and wires a single tone. Nodes created before a failure are
/// released before the error is returned.
fn start_tone(
    output: &mut AudioOutput,
    envelope: &Envelope,
    frequency: f32,
    start: f64,
) -> Result<(NodeId, NodeId)> {
    let master = output.master;
    let context = output.context.as_mut();
    let source = context.create_tone(frequency)?;
    let gain = match context.create_gain(0.0) {
        Ok(gain) => gain,
        Err(err) => {
            let _ = context.disconnect(source);
            return Err(err);
        }
    };

    let wired = context
        .connect(source, gain)
        .and_then(|_| context.connect(gain, master))
        .and_then(|_| context.schedule_envelope(gain, envelope, start))
        .and_then(|_| context.start(source, start))
        .and_then(|_| context.stop(source, start + envelope.duration));

    match wired {
        Ok(()) => Ok((source, gain)),
        Err(err) => {
            let _ = context.disconnect(source);
            let _ = context.disconnect(gain);
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PatternEngine, TransformKind};

    fn vertices(complexity: u32) -> VertexSet {
        PatternEngine::default()
            .generate(complexity, TransformKind::Reflection)
            .unwrap()
    }

    fn scheduler(device: OfflineDevice) -> ToneScheduler {
        ToneScheduler::new(Box::new(device), &AudioConfig::default())
    }

    #[test]
    fn envelope_ramps_up_then_decays() {
        let envelope = Envelope::default();

        assert_eq!(envelope.level_at(0.0), 0.0);
        assert!((envelope.level_at(0.05) - 0.05).abs() < 1e-6);
        assert!((envelope.level_at(0.1) - 0.1).abs() < 1e-6);
        assert!(envelope.level_at(0.3) < 0.1 && envelope.level_at(0.3) > 0.001);
        assert!((envelope.level_at(0.5) - 0.001).abs() < 1e-6);
    }

    #[test]
    fn initialize_is_idempotent() {
        let device = OfflineDevice::new(48_000);
        let probe = device.probe();
        let mut tones = scheduler(device);

        tones.initialize().unwrap();
        tones.initialize().unwrap();

        assert_eq!(probe.contexts_created(), 1);
        assert_eq!(probe.context_state(), ContextState::Running);
        assert!(tones.state().initialized);
    }

    #[test]
    fn schedules_one_tone_per_vertex() {
        let device = OfflineDevice::new(48_000);
        let probe = device.probe();
        let mut tones = scheduler(device);
        tones.initialize().unwrap();

        let scheduled = tones.schedule_notes(&vertices(2));

        assert_eq!(scheduled, 12);
        assert_eq!(tones.live_events().len(), 12);
        assert_eq!(probe.live_tones(), 12);
        let event = &tones.live_events()[3];
        assert!((event.frequency - 330.0).abs() < 1e-3);
        assert!((event.stop_time - event.start_time - 0.5).abs() < 1e-9);
    }

    #[test]
    fn base_triangle_sounds_the_first_three_ratios() {
        let device = OfflineDevice::new(48_000);
        let probe = device.probe();
        let mut tones = scheduler(device);
        tones.initialize().unwrap();

        tones.schedule_notes(&vertices(1));

        let expected = [220.0, 247.5, 275.0];
        let found = probe.tone_frequencies();
        assert_eq!(found.len(), expected.len());
        for (actual, expected) in found.iter().zip(expected) {
            assert!((actual - expected).abs() < 1e-3, "{actual} vs {expected}");
        }
        for event in tones.live_events() {
            assert_eq!(probe.gain_level(event.gain), Some(0.0));
        }
    }

    #[test]
    fn previous_batch_is_retired_before_the_next() {
        let device = OfflineDevice::new(48_000).with_voice_limit(48);
        let probe = device.probe();
        let mut tones = scheduler(device);
        tones.initialize().unwrap();

        tones.schedule_notes(&vertices(1));
        let first_sources: Vec<NodeId> = tones.live_events().iter().map(|e| e.source).collect();
        let scheduled = tones.schedule_notes(&vertices(3));

        assert_eq!(scheduled, 48, "all voices must be free for the new batch");
        assert_eq!(probe.live_tones(), 48);
        assert!(first_sources.iter().all(|id| !probe.contains(*id)));
    }

    #[test]
    fn failing_tones_are_skipped_without_leaking() {
        let device = OfflineDevice::new(48_000).with_voice_limit(2);
        let probe = device.probe();
        let mut tones = scheduler(device);
        tones.initialize().unwrap();

        let scheduled = tones.schedule_notes(&vertices(1));

        assert_eq!(scheduled, 2);
        assert_eq!(probe.live_tones(), 2);
        // two tone gains plus the master
        assert_eq!(probe.gain_nodes(), 3);
    }

    #[test]
    fn cleanup_releases_everything_and_can_repeat() {
        let device = OfflineDevice::new(48_000);
        let probe = device.probe();
        let mut tones = scheduler(device);
        tones.initialize().unwrap();
        tones.schedule_notes(&vertices(2));

        tones.cleanup();
        tones.cleanup();

        assert_eq!(tones.live_events().len(), 0);
        assert_eq!(probe.live_tones(), 0);
        assert_eq!(probe.context_state(), ContextState::Closed);
        assert_eq!(
            tones.state(),
            AudioState {
                initialized: false,
                context_state: ContextState::Closed,
                active_tones: 0,
            }
        );
    }

    #[test]
    fn dropping_the_scheduler_closes_the_context() {
        let device = OfflineDevice::new(48_000);
        let probe = device.probe();
        {
            let mut tones = scheduler(device);
            tones.initialize().unwrap();
            tones.schedule_notes(&vertices(1));
        }
        assert_eq!(probe.live_tones(), 0);
        assert_eq!(probe.context_state(), ContextState::Closed);
    }

    #[test]
    fn initialization_failure_leaves_audio_off() {
        let mut tones = scheduler(OfflineDevice::unavailable());

        let err = tones.initialize().unwrap_err();

        assert!(matches!(err, TessellationError::AudioInit(_)));
        assert!(!tones.is_initialized());
        assert_eq!(tones.schedule_notes(&vertices(1)), 0);
    }

    #[test]
    fn scheduling_before_initialize_is_ignored() {
        let device = OfflineDevice::new(48_000);
        let probe = device.probe();
        let mut tones = scheduler(device);

        assert_eq!(tones.schedule_notes(&vertices(1)), 0);
        assert_eq!(probe.contexts_created(), 0);
    }

    #[test]
    fn suspend_and_resume_follow_context_state() {
        let device = OfflineDevice::new(48_000);
        let probe = device.probe();
        let mut tones = scheduler(device);

        tones.suspend();
        tones.initialize().unwrap();
        tones.resume();
        assert_eq!(probe.context_state(), ContextState::Running);

        tones.suspend();
        assert_eq!(tones.state().context_state, ContextState::Suspended);
        tones.resume();
        assert_eq!(probe.context_state(), ContextState::Running);
    }
}
