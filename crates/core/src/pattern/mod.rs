//! Fractal geometry: recursive triangle subdivision followed by a single
//! whole-shape transform.

use std::{
    collections::HashMap,
    fmt,
    str::FromStr,
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};

use crate::{config::PatternConfig, Result, TessellationError};

/// A 2-D point in pattern space. The base triangle is centred on the origin.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    /// Creates a point from its coordinates.
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Returns the point halfway between `self` and `other`.
    pub fn midpoint(self, other: Point) -> Point {
        Point::new((self.x + other.x) / 2.0, (self.y + other.y) / 2.0)
    }

    /// Distance from the origin.
    pub fn norm(self) -> f64 {
        self.x.hypot(self.y)
    }

    fn rotated(self, angle: f64) -> Point {
        let (sin, cos) = angle.sin_cos();
        Point::new(self.x * cos - self.y * sin, self.x * sin + self.y * cos)
    }

    fn reflected(self) -> Point {
        Point::new(-self.x, self.y)
    }
}

/// Ordered vertex sequence where every consecutive triple is one triangle.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VertexSet(Vec<Point>);

impl VertexSet {
    /// Creates a set with no vertices.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns the number of vertices, always a multiple of three.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the vertices in order.
    pub fn points(&self) -> &[Point] {
        &self.0
    }

    /// Consumes the set and returns the vertices.
    pub fn into_points(self) -> Vec<Point> {
        self.0
    }

    /// Iterates over the triangle faces in order.
    pub fn triangles(&self) -> impl Iterator<Item = [Point; 3]> + '_ {
        self.0.chunks_exact(3).map(|face| [face[0], face[1], face[2]])
    }

    /// Returns a copy mirrored across the y-axis.
    pub fn reflected(&self) -> VertexSet {
        VertexSet(self.0.iter().map(|p| p.reflected()).collect())
    }
}

/// Post-processing applied to the whole subdivided shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TransformKind {
    /// Rotation about the origin by an angle derived from wall-clock time.
    Rotation,
    /// Mirror across the y-axis.
    Reflection,
    /// No-op. Unknown kind names resolve here.
    Identity,
}

impl TransformKind {
    pub const ALL: [TransformKind; 3] = [Self::Rotation, Self::Reflection, Self::Identity];

    /// Returns the lowercase name used in configuration and on the command
    /// line.
    pub fn name(self) -> &'static str {
        match self {
            Self::Rotation => "rotation",
            Self::Reflection => "reflection",
            Self::Identity => "identity",
        }
    }

    /// Whether the output of this kind depends on the time of the call.
    /// Results of time-varying kinds are never cached.
    pub fn is_time_varying(self) -> bool {
        matches!(self, Self::Rotation)
    }

    /// Lenient lookup: unknown names degrade to [`TransformKind::Identity`].
    pub fn from_name(name: &str) -> Self {
        name.parse().unwrap_or_else(|_| {
            tracing::warn!(name, "unknown transformation kind, using identity");
            Self::Identity
        })
    }
}

impl FromStr for TransformKind {
    type Err = TessellationError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| TessellationError::UnknownTransform(s.to_string()))
    }
}

impl fmt::Display for TransformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<String> for TransformKind {
    fn from(value: String) -> Self {
        Self::from_name(&value)
    }
}

impl From<TransformKind> for String {
    fn from(value: TransformKind) -> Self {
        value.name().to_string()
    }
}

/// Cache key for fully transformed results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PatternKey {
    pub complexity: u32,
    pub transform: TransformKind,
}

/// Generates transformed fractal vertex sets.
///
/// Two caches are kept for the lifetime of the engine: subdivided base shapes
/// keyed by complexity, and transformed results keyed by [`PatternKey`] for
/// time-independent kinds only. Callers always receive an owned copy.
#[derive(Debug)]
pub struct PatternEngine {
    config: PatternConfig,
    shapes: HashMap<u32, Vec<Point>>,
    results: HashMap<PatternKey, VertexSet>,
}

impl PatternEngine {
    /// Creates an engine with empty caches.
    pub fn new(config: PatternConfig) -> Self {
        Self {
            config,
            shapes: HashMap::new(),
            results: HashMap::new(),
        }
    }

    /// Generates the pattern using the current wall-clock time for any
    /// time-varying transform.
    pub fn generate(&mut self, complexity: u32, transform: TransformKind) -> Result<VertexSet> {
        self.generate_at(complexity, transform, epoch_seconds())
    }

    /// Generates the pattern as it looks at `time_seconds` since the epoch.
    pub fn generate_at(
        &mut self,
        complexity: u32,
        transform: TransformKind,
        time_seconds: f64,
    ) -> Result<VertexSet> {
        if complexity == 0 {
            return Err(TessellationError::InvalidComplexity(complexity));
        }

        let key = PatternKey {
            complexity,
            transform,
        };
        if let Some(cached) = self.results.get(&key) {
            return Ok(cached.clone());
        }

        let base_size = self.config.base_size;
        let shape = self
            .shapes
            .entry(complexity)
            .or_insert_with(|| subdivided_triangle(base_size, complexity));

        let angle = time_seconds * self.config.rotation_rate;
        let vertices = VertexSet(
            shape
                .iter()
                .map(|&p| match transform {
                    TransformKind::Rotation => p.rotated(angle),
                    TransformKind::Reflection => p.reflected(),
                    TransformKind::Identity => p,
                })
                .collect(),
        );

        if !transform.is_time_varying() {
            self.results.insert(key, vertices.clone());
        }
        tracing::debug!(complexity, %transform, vertices = vertices.len(), "generated pattern");
        Ok(vertices)
    }

    /// Number of cached transformed results.
    pub fn cached_results(&self) -> usize {
        self.results.len()
    }

    /// Drops every cached shape and result.
    pub fn cleanup(&mut self) {
        self.shapes.clear();
        self.results.clear();
    }
}

impl Default for PatternEngine {
    fn default() -> Self {
        Self::new(PatternConfig::default())
    }
}

/// Equilateral triangle with its centroid on the origin: top, bottom-left,
/// bottom-right.
pub fn base_triangle(size: f64) -> [Point; 3] {
    let sqrt3 = 3.0_f64.sqrt();
    [
        Point::new(0.0, -size * sqrt3 / 3.0),
        Point::new(-size / 2.0, size * sqrt3 / 6.0),
        Point::new(size / 2.0, size * sqrt3 / 6.0),
    ]
}

fn subdivided_triangle(size: f64, complexity: u32) -> Vec<Point> {
    let mut vertices = base_triangle(size).to_vec();
    for _ in 1..complexity {
        vertices = subdivide(&vertices);
    }
    vertices
}

/// Splits every face into its four Sierpinski children. Child order is
/// corner-1, corner-2, corner-3, centre.
fn subdivide(vertices: &[Point]) -> Vec<Point> {
    let mut next = Vec::with_capacity(vertices.len() * 4);
    for face in vertices.chunks_exact(3) {
        let (p1, p2, p3) = (face[0], face[1], face[2]);
        let m12 = p1.midpoint(p2);
        let m23 = p2.midpoint(p3);
        let m31 = p3.midpoint(p1);
        next.extend_from_slice(&[p1, m12, m31, m12, p2, m23, m31, m23, p3, m12, m23, m31]);
    }
    next
}

fn epoch_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or_default()
}
