use serde::{Deserialize, Serialize};

use crate::color::Rgba;
use crate::drawing::DrawPrimitive;
use crate::geometry::Point2;

/// Default bound on per-body position history.
pub const DEFAULT_HISTORY_CAPACITY: usize = 10_000;

/// Visual shape of a rigid body. Each variant carries only its own fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum BodyShape {
    Circle,
    Box,
    Triangle,
    Polygon { vertices: Vec<Point2> },
    Compound { parts: Vec<CompoundPart> },
}

/// One piece of a compound body, in body-local coordinates
/// (+x = orientation direction, scaled by `BodyStyle::size`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompoundPart {
    pub offset: Point2,
    pub primitive: DrawPrimitive,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BodyStyle {
    pub shape: BodyShape,
    /// Size in meters.
    pub size: f64,
    pub color: Rgba,
    pub label: bool,
    /// Label offset from the body center, in meters.
    pub label_offset: Point2,
    /// Length of the orientation arrow in meters.
    pub orientation_length: f64,
    pub orientation_color: Rgba,
    /// Arrow thickness in pixels.
    pub orientation_thickness: u32,
}

impl Default for BodyStyle {
    fn default() -> Self {
        Self {
            shape: BodyShape::Circle,
            size: 0.1,
            color: Rgba::opaque(0, 0, 255),
            label: true,
            label_offset: Point2::new(0.0, -0.2),
            orientation_length: 0.15,
            orientation_color: Rgba::WHITE,
            orientation_thickness: 2,
        }
    }
}

/// Enumerated style update: every settable field is optional, nothing else
/// is settable. Applied atomically under the scene lock.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BodyStyleUpdate {
    pub shape: Option<BodyShape>,
    pub size: Option<f64>,
    pub color: Option<Rgba>,
    /// Adjusts only the alpha channel of the current color.
    pub alpha: Option<u8>,
    pub label: Option<bool>,
    pub label_offset: Option<Point2>,
    pub orientation_length: Option<f64>,
    pub orientation_color: Option<Rgba>,
    pub orientation_thickness: Option<u32>,
}

impl BodyStyleUpdate {
    pub fn apply(&self, style: &mut BodyStyle) {
        if let Some(shape) = &self.shape {
            style.shape = shape.clone();
        }
        if let Some(size) = self.size {
            style.size = size;
        }
        if let Some(color) = self.color {
            style.color = color;
        }
        if let Some(alpha) = self.alpha {
            style.color.a = alpha;
        }
        if let Some(label) = self.label {
            style.label = label;
        }
        if let Some(offset) = self.label_offset {
            style.label_offset = offset;
        }
        if let Some(length) = self.orientation_length {
            style.orientation_length = length;
        }
        if let Some(color) = self.orientation_color {
            style.orientation_color = color;
        }
        if let Some(thickness) = self.orientation_thickness {
            style.orientation_thickness = thickness;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrajectoryMode {
    Time,
    Distance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineStyle {
    Solid,
    Dotted,
    Dashed,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TrajectoryColor {
    Solid { color: Rgba },
    /// Interpolate from `gradient_start` (at the body) to `gradient_end`
    /// (at the tail).
    Gradient,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryStyle {
    pub enabled: bool,
    pub mode: TrajectoryMode,
    /// Seconds in time mode, meters in distance mode.
    pub length: f64,
    pub line_style: LineStyle,
    /// Line thickness in pixels.
    pub thickness: u32,
    pub color: TrajectoryColor,
    pub gradient_start: Rgba,
    pub gradient_end: Rgba,
    /// Dot spacing in meters (dotted style).
    pub dot_spacing: f64,
    /// Dash length in meters (dashed style).
    pub dash_length: f64,
}

impl Default for TrajectoryStyle {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: TrajectoryMode::Time,
            length: 5.0,
            line_style: LineStyle::Solid,
            thickness: 2,
            color: TrajectoryColor::Solid {
                color: Rgba::opaque(100, 100, 255),
            },
            gradient_start: Rgba::opaque(0, 0, 255),
            gradient_end: Rgba::opaque(0, 255, 0),
            dot_spacing: 0.05,
            dash_length: 0.1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrajectoryStyleUpdate {
    pub enabled: Option<bool>,
    pub mode: Option<TrajectoryMode>,
    pub length: Option<f64>,
    pub line_style: Option<LineStyle>,
    pub thickness: Option<u32>,
    pub color: Option<TrajectoryColor>,
    pub gradient_start: Option<Rgba>,
    pub gradient_end: Option<Rgba>,
    pub dot_spacing: Option<f64>,
    pub dash_length: Option<f64>,
}

impl TrajectoryStyleUpdate {
    pub fn apply(&self, style: &mut TrajectoryStyle) {
        if let Some(enabled) = self.enabled {
            style.enabled = enabled;
        }
        if let Some(mode) = self.mode {
            style.mode = mode;
        }
        if let Some(length) = self.length {
            style.length = length;
        }
        if let Some(line_style) = self.line_style {
            style.line_style = line_style;
        }
        if let Some(thickness) = self.thickness {
            style.thickness = thickness;
        }
        if let Some(color) = self.color {
            style.color = color;
        }
        if let Some(start) = self.gradient_start {
            style.gradient_start = start;
        }
        if let Some(end) = self.gradient_end {
            style.gradient_end = end;
        }
        if let Some(spacing) = self.dot_spacing {
            style.dot_spacing = spacing;
        }
        if let Some(dash) = self.dash_length {
            style.dash_length = dash;
        }
    }
}

/// One recorded pose. Entries are never mutated after insertion, so
/// snapshots may share them freely.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistoryEntry {
    pub position: Point2,
    pub orientation: f64,
    /// Seconds since the Unix epoch.
    pub timestamp: f64,
}

/// Fixed-capacity ring buffer of pose history. Storage is preallocated up
/// front so steady-state updates never allocate.
#[derive(Debug, Clone)]
pub struct PositionHistory {
    entries: Vec<HistoryEntry>,
    head: usize,
    capacity: usize,
}

impl PositionHistory {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Vec::with_capacity(capacity),
            head: 0,
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn push(&mut self, entry: HistoryEntry) {
        if self.entries.len() < self.capacity {
            self.entries.push(entry);
        } else {
            self.entries[self.head] = entry;
            self.head = (self.head + 1) % self.capacity;
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.head = 0;
    }

    /// Rebuilds with a new capacity, keeping the most recent entries.
    pub fn set_capacity(&mut self, capacity: usize) {
        let capacity = capacity.max(1);
        let chronological: Vec<HistoryEntry> = self.iter().copied().collect();
        let skip = chronological.len().saturating_sub(capacity);
        self.entries = Vec::with_capacity(capacity);
        self.entries.extend(chronological.into_iter().skip(skip));
        self.head = 0;
        self.capacity = capacity;
    }

    /// Entries in chronological order, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &HistoryEntry> {
        let (older, newer) = if self.entries.len() < self.capacity {
            (&self.entries[..], &self.entries[..0])
        } else {
            let (newer, older) = self.entries.split_at(self.head);
            (older, newer)
        };
        older.iter().chain(newer.iter())
    }
}

impl Default for PositionHistory {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_CAPACITY)
    }
}

/// A tracked or manually-positioned entity: robots, payloads, anything a
/// command or the MoCap feed moves around.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RigidBody {
    pub name: String,
    pub position: Option<Point2>,
    pub orientation: Option<f64>,
    /// Fallback when `orientation` is absent, so rendering always has a
    /// concrete angle.
    pub last_orientation: f64,
    pub mocap_name: Option<String>,
    pub auto_track: bool,
    #[serde(skip)]
    pub tracking_lost: bool,
    pub style: BodyStyle,
    pub trajectory_style: TrajectoryStyle,
    #[serde(skip)]
    pub history: PositionHistory,
    #[serde(default)]
    pub z_order: i64,
    #[serde(skip)]
    pub z_seq: u64,
    #[serde(skip)]
    pub last_update: f64,
}

impl RigidBody {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            position: None,
            orientation: None,
            last_orientation: 0.0,
            mocap_name: None,
            auto_track: false,
            tracking_lost: false,
            style: BodyStyle::default(),
            trajectory_style: TrajectoryStyle::default(),
            history: PositionHistory::default(),
            z_order: 0,
            z_seq: 0,
            last_update: 0.0,
        }
    }

    /// Records a new pose. A missing orientation clears the current one but
    /// keeps the last known angle for `effective_orientation`.
    pub fn update_position(&mut self, x: f64, y: f64, orientation: Option<f64>, now: f64) {
        self.position = Some(Point2::new(x, y));
        match orientation {
            Some(angle) => {
                self.orientation = Some(angle);
                self.last_orientation = angle;
            }
            None => self.orientation = None,
        }
        self.history.push(HistoryEntry {
            position: Point2::new(x, y),
            orientation: self.effective_orientation(),
            timestamp: now,
        });
        self.last_update = now;
    }

    /// Always a concrete angle: the explicit orientation if present, else
    /// the last known one (0 before the first update).
    pub fn effective_orientation(&self) -> f64 {
        self.orientation.unwrap_or(self.last_orientation)
    }

    /// Trajectory polyline per the current style, oldest point first.
    pub fn trajectory_points(&self, now: f64) -> Vec<Point2> {
        if !self.trajectory_style.enabled || self.history.len() < 2 {
            return Vec::new();
        }
        match self.trajectory_style.mode {
            TrajectoryMode::Time => self.time_trajectory(now),
            TrajectoryMode::Distance => self.distance_trajectory(),
        }
    }

    fn time_trajectory(&self, now: f64) -> Vec<Point2> {
        let cutoff = now - self.trajectory_style.length;
        self.history
            .iter()
            .filter(|entry| entry.timestamp >= cutoff)
            .map(|entry| entry.position)
            .collect()
    }

    /// Walks the history backward accumulating segment length; the final
    /// point is interpolated so the polyline length is exactly the
    /// configured length when enough history exists.
    fn distance_trajectory(&self) -> Vec<Point2> {
        let max_distance = self.trajectory_style.length;
        let entries: Vec<Point2> = self.history.iter().map(|entry| entry.position).collect();
        let mut points: Vec<Point2> = Vec::new();
        let mut total = 0.0;

        for i in (1..entries.len()).rev() {
            let p1 = entries[i];
            let p2 = entries[i - 1];
            if points.is_empty() {
                points.push(p1);
            }
            let segment = p1.distance_to(p2);
            if total + segment <= max_distance {
                points.push(p2);
                total += segment;
            } else {
                let remaining = max_distance - total;
                let ratio = if segment > 0.0 { remaining / segment } else { 0.0 };
                points.push(Point2::new(
                    p1.x + (p2.x - p1.x) * ratio,
                    p1.y + (p2.y - p1.y) * ratio,
                ));
                break;
            }
        }

        points.reverse();
        points
    }
}
