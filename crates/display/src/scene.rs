use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::calibrator::{CalibrationError, Field, FieldCalibrator, SCREEN_FIELD};
use crate::drawing::Drawing;
use crate::geometry::Point2;
use crate::rigidbody::{
    BodyStyle, BodyStyleUpdate, RigidBody, TrajectoryStyle, TrajectoryStyleUpdate,
    DEFAULT_HISTORY_CAPACITY,
};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SceneError {
    #[error("rigid body '{0}' already exists")]
    AlreadyExists(String),
    #[error("rigid body '{0}' not found")]
    BodyNotFound(String),
    #[error("drawing '{0}' not found")]
    DrawingNotFound(String),
    #[error(transparent)]
    Calibration(#[from] CalibrationError),
}

/// Current time as seconds since the Unix epoch. Taken outside the scene
/// lock so lock hold times stay bounded by map work only.
pub fn epoch_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// One renderable entity in draw order.
#[derive(Debug, Clone)]
pub enum FrameItem {
    Body(RigidBody),
    Drawing(Drawing),
}

impl FrameItem {
    fn sort_key(&self) -> (i64, u64) {
        match self {
            FrameItem::Body(body) => (body.z_order, body.z_seq),
            FrameItem::Drawing(drawing) => (drawing.z_order, drawing.z_seq),
        }
    }
}

/// Point-in-time view for one render pass: a cloned calibrator plus all
/// entities pre-sorted by `(z_order, sequence)`.
#[derive(Debug, Clone)]
pub struct FrameSnapshot {
    pub calibrator: FieldCalibrator,
    pub items: Vec<FrameItem>,
    pub timestamp: f64,
}

#[derive(Debug)]
struct SceneState {
    calibrator: FieldCalibrator,
    bodies: HashMap<String, RigidBody>,
    drawings: HashMap<String, Drawing>,
    z_sequence: u64,
    history_capacity: usize,
}

impl SceneState {
    fn next_sequence(&mut self) -> u64 {
        self.z_sequence += 1;
        self.z_sequence
    }
}

/// Serializable scene content. The `"screen"` field is deliberately
/// excluded: it belongs to the installation, not the experiment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SceneDoc {
    pub fields: Vec<Field>,
    pub rigidbodies: Vec<RigidBody>,
    pub drawings: Vec<Drawing>,
}

/// The single source of truth shared by the connection workers, the render
/// loop, and the MoCap feed. One coarse lock guards everything; every
/// operation holds it for one map/field operation only, never across I/O.
/// Readers that outlive a lock acquisition use the snapshot methods.
#[derive(Debug)]
pub struct Scene {
    inner: Mutex<SceneState>,
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

impl Scene {
    pub fn new() -> Self {
        Self::with_history_capacity(DEFAULT_HISTORY_CAPACITY)
    }

    pub fn with_history_capacity(history_capacity: usize) -> Self {
        Self {
            inner: Mutex::new(SceneState {
                calibrator: FieldCalibrator::new(),
                bodies: HashMap::new(),
                drawings: HashMap::new(),
                z_sequence: 0,
                history_capacity: history_capacity.max(1),
            }),
        }
    }

    // A poisoned lock means a panic mid-mutation elsewhere; the state
    // itself is still structurally valid (every mutation is a single map
    // operation), so recover the guard rather than cascading the panic.
    fn state(&self) -> MutexGuard<'_, SceneState> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn create_rigidbody(
        &self,
        name: &str,
        style: BodyStyle,
        trajectory_style: TrajectoryStyle,
        mocap_name: Option<String>,
        auto_track: bool,
    ) -> Result<(), SceneError> {
        let mut state = self.state();
        if state.bodies.contains_key(name) {
            return Err(SceneError::AlreadyExists(name.to_string()));
        }
        let sequence = state.next_sequence();
        let mut body = RigidBody::new(name);
        body.style = style;
        body.trajectory_style = trajectory_style;
        body.mocap_name = mocap_name;
        body.auto_track = auto_track;
        body.history.set_capacity(state.history_capacity);
        body.z_seq = sequence;
        state.bodies.insert(name.to_string(), body);
        Ok(())
    }

    pub fn remove_rigidbody(&self, name: &str) -> Result<(), SceneError> {
        let mut state = self.state();
        state
            .bodies
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| SceneError::BodyNotFound(name.to_string()))
    }

    /// Records a new pose for a body, in world coordinates. The command
    /// path and the MoCap feed both come through here.
    pub fn update_position(
        &self,
        name: &str,
        x: f64,
        y: f64,
        orientation: Option<f64>,
    ) -> Result<(), SceneError> {
        let now = epoch_seconds();
        let mut state = self.state();
        let body = state
            .bodies
            .get_mut(name)
            .ok_or_else(|| SceneError::BodyNotFound(name.to_string()))?;
        body.update_position(x, y, orientation, now);
        Ok(())
    }

    pub fn update_style(&self, name: &str, update: &BodyStyleUpdate) -> Result<(), SceneError> {
        let mut state = self.state();
        let body = state
            .bodies
            .get_mut(name)
            .ok_or_else(|| SceneError::BodyNotFound(name.to_string()))?;
        update.apply(&mut body.style);
        Ok(())
    }

    pub fn update_trajectory(
        &self,
        name: &str,
        update: &TrajectoryStyleUpdate,
    ) -> Result<(), SceneError> {
        let mut state = self.state();
        let body = state
            .bodies
            .get_mut(name)
            .ok_or_else(|| SceneError::BodyNotFound(name.to_string()))?;
        update.apply(&mut body.trajectory_style);
        Ok(())
    }

    pub fn set_z_order(&self, name: &str, z_order: i64) -> Result<(), SceneError> {
        let mut state = self.state();
        let body = state
            .bodies
            .get_mut(name)
            .ok_or_else(|| SceneError::BodyNotFound(name.to_string()))?;
        body.z_order = z_order;
        Ok(())
    }

    /// Sets the MoCap binding. Toggling `auto_track` clears the history:
    /// positions recorded under the other tracking mode would render as a
    /// misleading trajectory.
    pub fn set_tracking(
        &self,
        name: &str,
        mocap_name: Option<String>,
        auto_track: bool,
    ) -> Result<(), SceneError> {
        let mut state = self.state();
        let body = state
            .bodies
            .get_mut(name)
            .ok_or_else(|| SceneError::BodyNotFound(name.to_string()))?;
        body.mocap_name = mocap_name;
        if body.auto_track != auto_track {
            body.auto_track = auto_track;
            body.history.clear();
        }
        Ok(())
    }

    pub fn set_tracking_lost(&self, name: &str, lost: bool) -> Result<(), SceneError> {
        let mut state = self.state();
        let body = state
            .bodies
            .get_mut(name)
            .ok_or_else(|| SceneError::BodyNotFound(name.to_string()))?;
        body.tracking_lost = lost;
        Ok(())
    }

    pub fn create_field(
        &self,
        name: &str,
        world_points: [Point2; 4],
        local_points: [Point2; 4],
    ) -> Result<(), SceneError> {
        let mut state = self.state();
        state.calibrator.register(name, world_points, local_points)?;
        Ok(())
    }

    pub fn remove_field(&self, name: &str) -> Result<(), SceneError> {
        let mut state = self.state();
        state.calibrator.remove(name)?;
        Ok(())
    }

    pub fn convert(&self, point: Point2, from: &str, to: &str) -> Result<Point2, SceneError> {
        let state = self.state();
        Ok(state.calibrator.convert(point, from, to)?)
    }

    pub fn transform_orientation(
        &self,
        from: &str,
        to: &str,
        position: Point2,
        angle: f64,
    ) -> Result<f64, SceneError> {
        let state = self.state();
        Ok(state
            .calibrator
            .transform_orientation(from, to, position, angle)?)
    }

    /// Inserts or wholesale-replaces a drawing by id.
    pub fn add_drawing(&self, mut drawing: Drawing) {
        let mut state = self.state();
        drawing.z_seq = state.next_sequence();
        state.drawings.insert(drawing.id.clone(), drawing);
    }

    pub fn remove_drawing(&self, id: &str) -> Result<(), SceneError> {
        let mut state = self.state();
        state
            .drawings
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| SceneError::DrawingNotFound(id.to_string()))
    }

    pub fn clear_drawings(&self) {
        self.state().drawings.clear();
    }

    /// Empties bodies and drawings; fields survive.
    pub fn clear(&self) {
        let mut state = self.state();
        state.bodies.clear();
        state.drawings.clear();
        info!("scene_cleared");
    }

    /// Clears everything, fields included, except `"screen"`: the display
    /// calibration is preserved into the fresh registry so there is always
    /// a usable display frame.
    pub fn clear_all(&self) {
        let mut state = self.state();
        state.bodies.clear();
        state.drawings.clear();
        let screen = state.calibrator.get(SCREEN_FIELD).cloned();
        let mut calibrator = FieldCalibrator::new();
        if let Some(screen) = screen {
            // Re-registering a previously valid field cannot fail.
            let _ = calibrator.register_field(screen);
        }
        state.calibrator = calibrator;
        info!("scene_cleared_all");
    }

    pub fn set_history_capacity(&self, capacity: usize) {
        let mut state = self.state();
        let capacity = capacity.max(1);
        state.history_capacity = capacity;
        for body in state.bodies.values_mut() {
            body.history.set_capacity(capacity);
        }
    }

    pub fn body_snapshot(&self, name: &str) -> Option<RigidBody> {
        self.state().bodies.get(name).cloned()
    }

    pub fn bodies_snapshot(&self) -> HashMap<String, RigidBody> {
        self.state().bodies.clone()
    }

    pub fn body_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state().bodies.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn drawing_snapshot(&self, id: &str) -> Option<Drawing> {
        self.state().drawings.get(id).cloned()
    }

    pub fn drawings_snapshot(&self) -> HashMap<String, Drawing> {
        self.state().drawings.clone()
    }

    pub fn drawing_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.state().drawings.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn field(&self, name: &str) -> Option<Field> {
        self.state().calibrator.get(name).cloned()
    }

    pub fn field_names(&self) -> Vec<String> {
        self.state().calibrator.field_names()
    }

    pub fn calibrator_snapshot(&self) -> FieldCalibrator {
        self.state().calibrator.clone()
    }

    /// Everything one render pass needs, captured in a single lock
    /// acquisition: a calibrator clone and all entities sorted by
    /// `(z_order, sequence)`.
    pub fn frame_snapshot(&self) -> FrameSnapshot {
        let timestamp = epoch_seconds();
        let state = self.state();
        let mut items: Vec<FrameItem> = Vec::with_capacity(state.bodies.len() + state.drawings.len());
        items.extend(state.bodies.values().cloned().map(FrameItem::Body));
        items.extend(state.drawings.values().cloned().map(FrameItem::Drawing));
        let calibrator = state.calibrator.clone();
        drop(state);
        items.sort_by_key(|item| item.sort_key());
        FrameSnapshot {
            calibrator,
            items,
            timestamp,
        }
    }

    /// Serializable dump of fields (minus `"screen"`), bodies, and
    /// drawings.
    pub fn to_doc(&self) -> SceneDoc {
        let state = self.state();
        let mut fields: Vec<Field> = state
            .calibrator
            .fields()
            .filter(|f| f.name != SCREEN_FIELD)
            .cloned()
            .collect();
        fields.sort_by(|a, b| a.name.cmp(&b.name));
        let mut rigidbodies: Vec<RigidBody> = state.bodies.values().cloned().collect();
        rigidbodies.sort_by(|a, b| a.name.cmp(&b.name));
        let mut drawings: Vec<Drawing> = state.drawings.values().cloned().collect();
        drawings.sort_by(|a, b| a.id.cmp(&b.id));
        SceneDoc {
            fields,
            rigidbodies,
            drawings,
        }
    }

    /// Replaces the scene content with a previously dumped document. The
    /// current `"screen"` calibration is preserved, exactly as `clear_all`
    /// does.
    pub fn from_doc(&self, doc: SceneDoc) -> Result<(), SceneError> {
        // Validate fields before touching live state so a bad document
        // cannot leave a half-loaded scene behind.
        let mut calibrator = FieldCalibrator::new();
        for field in &doc.fields {
            calibrator.register_field(field.clone())?;
        }

        let mut state = self.state();
        if let Some(screen) = state.calibrator.get(SCREEN_FIELD).cloned() {
            calibrator.register_field(screen)?;
        }
        state.calibrator = calibrator;
        state.bodies.clear();
        state.drawings.clear();
        let capacity = state.history_capacity;
        for mut body in doc.rigidbodies {
            let sequence = state.next_sequence();
            body.z_seq = sequence;
            body.history.set_capacity(capacity);
            state.bodies.insert(body.name.clone(), body);
        }
        for mut drawing in doc.drawings {
            let sequence = state.next_sequence();
            drawing.z_seq = sequence;
            state.drawings.insert(drawing.id.clone(), drawing);
        }
        info!(
            fields = state.calibrator.field_names().len(),
            bodies = state.bodies.len(),
            drawings = state.drawings.len(),
            "scene_loaded"
        );
        Ok(())
    }
}
