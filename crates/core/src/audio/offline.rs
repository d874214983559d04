use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use super::{AudioContext, AudioDevice, ContextState, Envelope, NodeId};
use crate::{Result, TessellationError};

const DESTINATION: NodeId = NodeId(0);

/// Software implementation of the audio output capability.
///
/// Nodes are tracked in memory and the context clock only moves when the
/// owner advances it through an [`OfflineProbe`]. No samples are produced.
/// Each node feeds at most one downstream node. Creating a new context
/// invalidates the previous one.
#[derive(Debug)]
pub struct OfflineDevice {
    shared: Arc<Mutex<OfflineGraph>>,
    available: bool,
}

impl OfflineDevice {
    /// Creates a device whose contexts report `sample_rate`.
    pub fn new(sample_rate: u32) -> Self {
        Self {
            shared: Arc::new(Mutex::new(OfflineGraph::new(sample_rate))),
            available: true,
        }
    }

    /// A device whose contexts can never be created.
    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new(48_000)
        }
    }

    /// Caps the number of tone sources that may exist at once. Creating a
    /// tone beyond the cap fails.
    pub fn with_voice_limit(self, limit: usize) -> Self {
        lock(&self.shared).voice_limit = Some(limit);
        self
    }

    /// Returns a handle for inspecting and driving the graph.
    pub fn probe(&self) -> OfflineProbe {
        OfflineProbe {
            shared: self.shared.clone(),
        }
    }
}

impl AudioDevice for OfflineDevice {
    fn create_context(&mut self) -> Result<Box<dyn AudioContext>> {
        if !self.available {
            return Err(TessellationError::audio("no audio output device available"));
        }

        let mut graph = lock(&self.shared);
        graph.generation += 1;
        graph.contexts_created += 1;
        graph.state = ContextState::Running;
        graph.time = 0.0;
        graph.nodes.clear();
        graph.nodes.insert(
            DESTINATION,
            Node {
                kind: NodeKind::Destination,
                output: None,
            },
        );
        tracing::debug!(generation = graph.generation, "offline audio context created");

        Ok(Box::new(OfflineContext {
            shared: self.shared.clone(),
            generation: graph.generation,
        }))
    }
}

/// Shared view over the graph of an [`OfflineDevice`].
#[derive(Debug, Clone)]
pub struct OfflineProbe {
    shared: Arc<Mutex<OfflineGraph>>,
}

impl OfflineProbe {
    /// Returns the sample rate the device was created with.
    pub fn sample_rate(&self) -> u32 {
        lock(&self.shared).sample_rate
    }

    /// Returns the context clock in seconds.
    pub fn current_time(&self) -> f64 {
        lock(&self.shared).time
    }

    /// Returns how many contexts the device has opened.
    pub fn contexts_created(&self) -> usize {
        lock(&self.shared).contexts_created
    }

    /// Returns the state of the most recent context.
    pub fn context_state(&self) -> ContextState {
        lock(&self.shared).state
    }

    /// Returns true while `node` exists in the graph.
    pub fn contains(&self, node: NodeId) -> bool {
        lock(&self.shared).nodes.contains_key(&node)
    }

    /// Tone sources that still exist in the graph.
    pub fn live_tones(&self) -> usize {
        lock(&self.shared).tone_count()
    }

    /// Frequencies of the tone sources that have been started, in creation
    /// order.
    pub fn tone_frequencies(&self) -> Vec<f32> {
        lock(&self.shared)
            .nodes
            .values()
            .filter_map(|node| match node.kind {
                NodeKind::Tone {
                    frequency,
                    start: Some(_),
                    ..
                } => Some(frequency),
                _ => None,
            })
            .collect()
    }

    /// Static level of a gain node, or `None` for any other node.
    pub fn gain_level(&self, node: NodeId) -> Option<f32> {
        match lock(&self.shared).nodes.get(&node)?.kind {
            NodeKind::Gain { level, .. } => Some(level),
            _ => None,
        }
    }

    /// Returns the number of gain nodes, including the master.
    pub fn gain_nodes(&self) -> usize {
        lock(&self.shared)
            .nodes
            .values()
            .filter(|node| matches!(node.kind, NodeKind::Gain { .. }))
            .count()
    }

    /// Moves the context clock forward. A suspended or closed context does
    /// not advance.
    pub fn advance(&self, seconds: f64) {
        let mut graph = lock(&self.shared);
        if graph.state == ContextState::Running {
            graph.time += seconds.max(0.0);
        }
    }
}

struct OfflineContext {
    shared: Arc<Mutex<OfflineGraph>>,
    generation: u64,
}

impl OfflineContext {
    fn open_graph(&self) -> Result<MutexGuard<'_, OfflineGraph>> {
        let graph = self
            .shared
            .lock()
            .map_err(|_| TessellationError::msg("offline audio graph has been poisoned"))?;
        if graph.generation != self.generation || graph.state == ContextState::Closed {
            return Err(TessellationError::audio("audio context is closed"));
        }
        Ok(graph)
    }
}

impl AudioContext for OfflineContext {
    fn current_time(&self) -> f64 {
        lock(&self.shared).time
    }

    fn state(&self) -> ContextState {
        let graph = lock(&self.shared);
        if graph.generation == self.generation {
            graph.state
        } else {
            ContextState::Closed
        }
    }

    fn destination(&self) -> NodeId {
        DESTINATION
    }

    fn create_gain(&mut self, level: f32) -> Result<NodeId> {
        let mut graph = self.open_graph()?;
        Ok(graph.insert(NodeKind::Gain {
            level,
            automation: None,
        }))
    }

    fn create_tone(&mut self, frequency: f32) -> Result<NodeId> {
        let mut graph = self.open_graph()?;
        if !(frequency.is_finite() && frequency > 0.0) {
            return Err(TessellationError::audio(format!(
                "invalid tone frequency {frequency}"
            )));
        }
        if let Some(limit) = graph.voice_limit {
            if graph.tone_count() >= limit {
                return Err(TessellationError::audio(format!(
                    "voice limit of {limit} reached"
                )));
            }
        }
        Ok(graph.insert(NodeKind::Tone {
            frequency,
            start: None,
            stop: None,
        }))
    }

    fn connect(&mut self, from: NodeId, to: NodeId) -> Result<()> {
        let mut graph = self.open_graph()?;
        match graph.nodes.get(&to).map(|node| &node.kind) {
            None => return Err(unknown(to)),
            Some(NodeKind::Tone { .. }) => {
                return Err(TessellationError::audio("tone sources have no inputs"))
            }
            Some(_) => {}
        }
        let node = graph.nodes.get_mut(&from).ok_or_else(|| unknown(from))?;
        if matches!(node.kind, NodeKind::Destination) {
            return Err(TessellationError::audio("the destination has no outputs"));
        }
        node.output = Some(to);
        Ok(())
    }

    fn disconnect(&mut self, node: NodeId) -> Result<()> {
        let mut graph = self.open_graph()?;
        if node == DESTINATION {
            return Err(TessellationError::audio("the destination cannot be released"));
        }
        graph.nodes.remove(&node).ok_or_else(|| unknown(node))?;
        for other in graph.nodes.values_mut() {
            if other.output == Some(node) {
                other.output = None;
            }
        }
        Ok(())
    }

    fn schedule_envelope(&mut self, gain: NodeId, envelope: &Envelope, at: f64) -> Result<()> {
        let mut graph = self.open_graph()?;
        match graph.nodes.get_mut(&gain).map(|node| &mut node.kind) {
            Some(NodeKind::Gain { automation, .. }) => {
                *automation = Some((*envelope, at));
                Ok(())
            }
            Some(_) => Err(TessellationError::audio("envelopes apply to gain nodes only")),
            None => Err(unknown(gain)),
        }
    }

    fn start(&mut self, source: NodeId, at: f64) -> Result<()> {
        let mut graph = self.open_graph()?;
        match graph.nodes.get_mut(&source).map(|node| &mut node.kind) {
            Some(NodeKind::Tone { start: Some(_), .. }) => {
                Err(TessellationError::audio("tone source already started"))
            }
            Some(NodeKind::Tone { start, .. }) => {
                *start = Some(at);
                Ok(())
            }
            Some(_) => Err(TessellationError::audio("only tone sources can start")),
            None => Err(unknown(source)),
        }
    }

    fn stop(&mut self, source: NodeId, at: f64) -> Result<()> {
        let mut graph = self.open_graph()?;
        match graph.nodes.get_mut(&source).map(|node| &mut node.kind) {
            Some(NodeKind::Tone { start: None, .. }) => {
                Err(TessellationError::audio("tone source was never started"))
            }
            Some(NodeKind::Tone { stop, .. }) => {
                *stop = Some(stop.map_or(at, |current| current.min(at)));
                Ok(())
            }
            Some(_) => Err(TessellationError::audio("only tone sources can stop")),
            None => Err(unknown(source)),
        }
    }

    fn suspend(&mut self) -> Result<()> {
        let mut graph = self.open_graph()?;
        graph.state = ContextState::Suspended;
        Ok(())
    }

    fn resume(&mut self) -> Result<()> {
        let mut graph = self.open_graph()?;
        graph.state = ContextState::Running;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let mut graph = self.open_graph()?;
        graph.state = ContextState::Closed;
        graph.nodes.clear();
        Ok(())
    }
}

#[derive(Debug, Clone)]
enum NodeKind {
    Destination,
    Gain {
        level: f32,
        automation: Option<(Envelope, f64)>,
    },
    Tone {
        frequency: f32,
        start: Option<f64>,
        stop: Option<f64>,
    },
}

#[derive(Debug, Clone)]
struct Node {
    kind: NodeKind,
    output: Option<NodeId>,
}

#[derive(Debug)]
struct OfflineGraph {
    sample_rate: u32,
    generation: u64,
    contexts_created: usize,
    state: ContextState,
    time: f64,
    next_id: u64,
    voice_limit: Option<usize>,
    nodes: BTreeMap<NodeId, Node>,
}

impl OfflineGraph {
    fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            generation: 0,
            contexts_created: 0,
            state: ContextState::Closed,
            time: 0.0,
            next_id: DESTINATION.0,
            voice_limit: None,
            nodes: BTreeMap::new(),
        }
    }

    fn insert(&mut self, kind: NodeKind) -> NodeId {
        self.next_id += 1;
        let id = NodeId(self.next_id);
        self.nodes.insert(id, Node { kind, output: None });
        id
    }

    fn tone_count(&self) -> usize {
        self.nodes
            .values()
            .filter(|node| matches!(node.kind, NodeKind::Tone { .. }))
            .count()
    }
}

fn lock(shared: &Mutex<OfflineGraph>) -> MutexGuard<'_, OfflineGraph> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

fn unknown(node: NodeId) -> TessellationError {
    TessellationError::audio(format!("unknown audio node {}", node.0))
}
