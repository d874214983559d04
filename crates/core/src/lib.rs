//! Core library for the Harmonic Tessellations engine.
//!
//! A session renders an evolving Sierpinski-style triangle pattern and plays
//! one short pentatonic tone per vertex. Each module owns one stage of the
//! per-frame pipeline: [`timeline`] paces ticks, [`pattern`] produces vertex
//! sets, [`render`] consumes them, [`audio`] turns them into tone events and
//! [`session`] drives the loop.

pub mod audio;
pub mod config;
pub mod error;
pub mod mapping;
pub mod pattern;
pub mod render;
pub mod session;
pub mod timeline;

pub use audio::{
    AudioContext, AudioDevice, AudioState, ContextState, Envelope, NodeId, OfflineDevice,
    OfflineProbe, ToneEvent, ToneScheduler,
};
pub use config::{
    AppConfig, AudioConfig, EnvelopeConfig, FrameConfig, PatternConfig, SessionConfig,
    MAX_COMPLEXITY,
};
pub use error::{Result, TessellationError};
pub use mapping::ToneMapping;
pub use pattern::{PatternEngine, PatternKey, Point, TransformKind, VertexSet};
pub use render::{Bounds, FrameRecorder, Renderer, Viewport};
pub use session::{
    AnimationDriver, ControlEvent, DriverState, DriverStatus, Parameters, Session, TickOutcome,
};
pub use timeline::{FrameGate, FrameMetrics, ManualTicker, TickScheduler, TickToken};
