//! Core of the projector scene server: calibrated coordinate fields
//! related by planar homographies, the concurrent scene of rigid bodies
//! and drawing overlays, and the command registry that drives both over
//! the wire protocol.
//!
//! The render loop, connection layer, and MoCap feed live in the server
//! crate and consume this one through snapshots and the `Scene` API.

mod calibrator;
mod color;
mod command;
mod drawing;
mod geometry;
mod handlers;
mod rigidbody;
mod scene;

pub use calibrator::{
    CalibrationError, Field, FieldCalibrator, BASE_FIELD, FALLBACK_PIXELS_PER_METER,
    ORIENTATION_PROBE_DISTANCE, SCREEN_FIELD,
};
pub use color::Rgba;
pub use command::{
    error_response, success_response, CommandError, CommandRegistry, FatalError, Handler, Params,
};
pub use drawing::{DrawPrimitive, Drawing, PrimitiveStyle};
pub use geometry::{
    is_axis_aligned_rectangle, GeometryError, Homography, Point2, GEOMETRY_EPSILON,
};
pub use handlers::builtin_registry;
pub use rigidbody::{
    BodyShape, BodyStyle, BodyStyleUpdate, CompoundPart, HistoryEntry, LineStyle, PositionHistory,
    RigidBody, TrajectoryColor, TrajectoryMode, TrajectoryStyle, TrajectoryStyleUpdate,
    DEFAULT_HISTORY_CAPACITY,
};
pub use scene::{epoch_seconds, FrameItem, FrameSnapshot, Scene, SceneDoc, SceneError};
