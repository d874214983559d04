use serde::{Deserialize, Serialize};

use crate::{Point, VertexSet};

/// Consumer of every admitted frame.
pub trait Renderer {
    /// Receives one admitted frame.
    fn present(&mut self, vertices: &VertexSet);
}

/// Axis-aligned bounding box of a vertex set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: Point,
    pub max: Point,
}

impl Bounds {
    /// Returns the bounds of `vertices`, or `None` when the set is empty.
    pub fn of(vertices: &VertexSet) -> Option<Bounds> {
        let (first, rest) = vertices.points().split_first()?;
        Some(rest.iter().fold(
            Bounds {
                min: *first,
                max: *first,
            },
            |bounds, p| Bounds {
                min: Point::new(bounds.min.x.min(p.x), bounds.min.y.min(p.y)),
                max: Point::new(bounds.max.x.max(p.x), bounds.max.y.max(p.y)),
            },
        ))
    }

    pub fn width(&self) -> f64 {
        self.max.x - self.min.x
    }

    pub fn height(&self) -> f64 {
        self.max.y - self.min.y
    }

    pub fn center(&self) -> Point {
        self.min.midpoint(self.max)
    }
}

/// Target drawing area in view units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
    pub padding: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 800.0,
            height: 520.0,
            padding: 20.0,
        }
    }
}

impl Viewport {
    /// Uniform scale and centring that fit `bounds` inside the padded area.
    /// Degenerate bounds use a unit scale.
    pub fn fit(&self, bounds: &Bounds) -> ViewTransform {
        let usable_w = (self.width - 2.0 * self.padding).max(0.0);
        let usable_h = (self.height - 2.0 * self.padding).max(0.0);
        let scale = match (bounds.width() > 0.0, bounds.height() > 0.0) {
            (true, true) => (usable_w / bounds.width()).min(usable_h / bounds.height()),
            (true, false) => usable_w / bounds.width(),
            (false, true) => usable_h / bounds.height(),
            (false, false) => 1.0,
        };
        ViewTransform {
            scale,
            source_center: bounds.center(),
            view_center: Point::new(self.width / 2.0, self.height / 2.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewTransform {
    pub scale: f64,
    pub source_center: Point,
    pub view_center: Point,
}

impl ViewTransform {
    /// Maps a pattern-space point into view coordinates.
    pub fn apply(&self, p: Point) -> Point {
        Point::new(
            self.view_center.x + (p.x - self.source_center.x) * self.scale,
            self.view_center.y + (p.y - self.source_center.y) * self.scale,
        )
    }
}

/// Renderer that keeps the most recent frame in view coordinates. The current
/// implementation does not draw; it is the hand-off point for a real
/// surface and the observation point for headless runs.
#[derive(Debug, Default)]
pub struct FrameRecorder {
    viewport: Viewport,
    frames_presented: u64,
    last_bounds: Option<Bounds>,
    last_frame: Vec<Point>,
}

impl FrameRecorder {
    /// Creates a recorder that fits frames into `viewport`.
    pub fn new(viewport: Viewport) -> Self {
        Self {
            viewport,
            ..Self::default()
        }
    }

    /// Returns how many frames have been presented.
    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    pub fn last_bounds(&self) -> Option<Bounds> {
        self.last_bounds
    }

    /// Last presented frame, mapped into the viewport.
    pub fn last_frame(&self) -> &[Point] {
        &self.last_frame
    }
}

impl Renderer for FrameRecorder {
    fn present(&mut self, vertices: &VertexSet) {
        self.frames_presented += 1;
        self.last_bounds = Bounds::of(vertices);
        self.last_frame = match self.last_bounds {
            Some(bounds) => {
                let view = self.viewport.fit(&bounds);
                vertices.points().iter().map(|&p| view.apply(p)).collect()
            }
            None => Vec::new(),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PatternEngine, TransformKind};

    #[test]
    fn fits_pattern_inside_padded_viewport() {
        let vertices = PatternEngine::default()
            .generate(3, TransformKind::Reflection)
            .unwrap();
        let mut recorder = FrameRecorder::new(Viewport::default());
        recorder.present(&vertices);

        assert_eq!(recorder.frames_presented(), 1);
        assert_eq!(recorder.last_frame().len(), 48);
        for p in recorder.last_frame() {
            assert!(p.x >= 20.0 - 1e-9 && p.x <= 780.0 + 1e-9);
            assert!(p.y >= 20.0 - 1e-9 && p.y <= 500.0 + 1e-9);
        }
    }

    #[test]
    fn bounds_of_base_triangle() {
        let vertices = PatternEngine::default()
            .generate(1, TransformKind::Identity)
            .unwrap();
        let bounds = Bounds::of(&vertices).unwrap();
        assert!((bounds.width() - 0.8).abs() < 1e-12);
        assert!((bounds.height() - 0.8 * 3.0_f64.sqrt() / 2.0).abs() < 1e-12);
    }

    #[test]
    fn empty_frames_clear_the_recording() {
        let mut recorder = FrameRecorder::default();
        recorder.present(&VertexSet::empty());
        assert!(recorder.last_bounds().is_none());
        assert!(recorder.last_frame().is_empty());
    }
}
