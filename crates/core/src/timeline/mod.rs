use serde::{Deserialize, Serialize};

use crate::config::FrameConfig;

/// Snapshot of the gate's pacing state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameMetrics {
    pub fps: u32,
    pub frame_count: u64,
    pub is_active: bool,
}

/// Admission controller for animation ticks.
///
/// Every call to [`FrameGate::admit`] measures the instantaneous rate from the
/// previous timestamp (milliseconds) and admits the tick only when that rate
/// is at or above `min_fps`. The first timestamp, and any timestamp that does
/// not move forward, carries no rate evidence and is admitted without touching
/// the measured fps.
#[derive(Debug, Clone)]
pub struct FrameGate {
    config: FrameConfig,
    last_frame_time: Option<f64>,
    fps: f64,
    frame_count: u64,
    is_active: bool,
}

impl FrameGate {
    /// Creates an active gate whose fps starts at `target_fps`.
    pub fn new(config: FrameConfig) -> Self {
        let fps = config.target_fps;
        Self {
            config,
            last_frame_time: None,
            fps,
            frame_count: 0,
            is_active: true,
        }
    }

    /// Returns true when the tick at `timestamp` (milliseconds) should
    /// produce a frame. Always false once the gate is cleaned up.
    pub fn admit(&mut self, timestamp: f64) -> bool {
        if !self.is_active {
            return false;
        }

        let delta = self.last_frame_time.map(|last| timestamp - last);
        self.last_frame_time = Some(timestamp);
        self.frame_count += 1;

        match delta {
            Some(delta) if delta > 0.0 => {
                self.fps = 1000.0 / delta;
                tracing::trace!(timestamp, delta, fps = self.fps, "frame gate sample");
                self.fps >= self.config.min_fps
            }
            Some(delta) => {
                tracing::debug!(timestamp, delta, "non-monotonic frame timestamp");
                true
            }
            None => true,
        }
    }

    /// Instantaneous rate measured on the last admitted sample.
    pub fn fps(&self) -> f64 {
        self.fps
    }

    /// Returns false after [`FrameGate::cleanup`].
    pub fn is_active(&self) -> bool {
        self.is_active
    }

    /// Returns the current metrics with fps rounded to a whole number.
    pub fn metrics(&self) -> FrameMetrics {
        FrameMetrics {
            fps: self.fps.round().max(0.0) as u32,
            frame_count: self.frame_count,
            is_active: self.is_active,
        }
    }

    /// Forgets the timestamp history. The gate stays active.
    pub fn reset(&mut self) {
        self.last_frame_time = None;
        self.frame_count = 0;
        self.fps = self.config.target_fps;
    }

    /// Deactivates the gate for good. A new gate is needed to admit again.
    pub fn cleanup(&mut self) {
        self.is_active = false;
        self.reset();
        tracing::debug!("frame gate cleaned up");
    }
}

impl Default for FrameGate {
    fn default() -> Self {
        Self::new(FrameConfig::default())
    }
}

/// Identifies one requested tick. Tokens are never reused by a scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TickToken(u64);

impl TickToken {
    /// Returns the raw token value.
    pub fn id(self) -> u64 {
        self.0
    }
}

/// Host-side timer that delivers one tick at a time, typically synchronised
/// with the display refresh.
pub trait TickScheduler {
    /// Requests a single future tick.
    fn request_tick(&mut self) -> TickToken;
    /// Withdraws a previously requested tick. Unknown tokens are ignored.
    fn cancel_tick(&mut self, token: TickToken);
}

/// Tick scheduler pumped explicitly by its owner. Useful for headless hosts
/// and tests: the owner takes the pending token and delivers it together with
/// a timestamp of its choosing.
#[derive(Debug, Default)]
pub struct ManualTicker {
    next_id: u64,
    pending: Option<TickToken>,
}

impl ManualTicker {
    /// Creates a ticker with nothing outstanding.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the outstanding tick without consuming it.
    pub fn pending(&self) -> Option<TickToken> {
        self.pending
    }

    /// Removes and returns the outstanding tick, if any.
    pub fn take_pending(&mut self) -> Option<TickToken> {
        self.pending.take()
    }
}

impl TickScheduler for ManualTicker {
    fn request_tick(&mut self) -> TickToken {
        if let Some(stale) = self.pending {
            tracing::warn!(token = stale.id(), "replacing outstanding tick");
        }
        self.next_id += 1;
        let token = TickToken(self.next_id);
        self.pending = Some(token);
        token
    }

    fn cancel_tick(&mut self, token: TickToken) {
        if self.pending == Some(token) {
            self.pending = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate(min_fps: f64) -> FrameGate {
        FrameGate::new(FrameConfig {
            target_fps: 60.0,
            min_fps,
        })
    }

    #[test]
    fn admits_steady_stream_above_floor() {
        let mut gate = gate(30.0);
        let admitted: Vec<bool> = (0..10).map(|i| gate.admit(i as f64 * 20.0)).collect();

        assert!(admitted.iter().all(|&ok| ok));
        assert!((gate.fps() - 50.0).abs() < 1e-9);
        assert_eq!(gate.metrics().frame_count, 10);
    }

    #[test]
    fn rejects_stream_below_floor() {
        let mut gate = gate(30.0);
        assert!(gate.admit(0.0), "first tick has no rate evidence");
        for i in 1..5 {
            assert!(!gate.admit(i as f64 * 50.0));
        }
        assert_eq!(gate.metrics().fps, 20);
    }

    #[test]
    fn exact_floor_is_admitted() {
        let mut gate = gate(25.0);
        gate.admit(100.0);
        assert!(gate.admit(140.0));
    }

    #[test]
    fn non_monotonic_timestamps_are_admitted_without_rate_update() {
        let mut gate = gate(30.0);
        gate.admit(0.0);
        gate.admit(100.0);
        let fps = gate.fps();

        assert!(gate.admit(100.0));
        assert!(gate.admit(90.0));
        assert_eq!(gate.fps(), fps);
        assert_eq!(gate.metrics().frame_count, 4);
    }

    #[test]
    fn reset_restores_target_rate() {
        let mut gate = gate(30.0);
        gate.admit(0.0);
        gate.admit(500.0);
        gate.reset();

        let metrics = gate.metrics();
        assert_eq!(metrics.fps, 60);
        assert_eq!(metrics.frame_count, 0);
        assert!(gate.admit(10_000.0));
    }

    #[test]
    fn cleanup_is_one_shot() {
        let mut gate = gate(30.0);
        gate.cleanup();

        assert!(!gate.is_active());
        assert!(!gate.admit(0.0));
        assert!(!gate.admit(16.0));
        gate.reset();
        assert!(!gate.admit(32.0));
    }

    #[test]
    fn manual_ticker_cancels_only_matching_token() {
        let mut ticker = ManualTicker::new();
        let first = ticker.request_tick();
        ticker.cancel_tick(TickToken(first.id() + 7));
        assert_eq!(ticker.pending(), Some(first));

        ticker.cancel_tick(first);
        assert_eq!(ticker.take_pending(), None);

        let second = ticker.request_tick();
        assert_ne!(first, second);
    }
}
