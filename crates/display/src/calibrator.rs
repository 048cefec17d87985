use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::geometry::{is_axis_aligned_rectangle, GeometryError, Homography, Point2};

/// The implicit identity/world frame. Never stored in the registry.
pub const BASE_FIELD: &str = "base";
/// The physical display frame. Ordinary to the registry except that it
/// cannot be removed.
pub const SCREEN_FIELD: &str = "screen";

/// Probe offset used to reconstruct angles across a homography, in world
/// units of the source frame.
pub const ORIENTATION_PROBE_DISTANCE: f64 = 0.1;

/// Linear scale used for `distance_to_pixels` before a screen field exists.
pub const FALLBACK_PIXELS_PER_METER: f64 = 100.0;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CalibrationError {
    #[error("local points for field '{0}' must form an axis-aligned rectangle")]
    InvalidGeometry(String),
    #[error("unknown field '{0}'")]
    UnknownField(String),
    #[error("field '{0}' is reserved")]
    ReservedField(String),
    #[error(transparent)]
    Geometry(#[from] GeometryError),
}

/// A named planar coordinate system: four local points (an axis-aligned
/// rectangle, `[BL, BR, TR, TL]` counter-clockwise) paired with four world
/// points (an arbitrary quad encoding the perspective distortion).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub world_points: [Point2; 4],
    pub local_points: [Point2; 4],
}

impl Field {
    pub fn new(
        name: impl Into<String>,
        world_points: [Point2; 4],
        local_points: [Point2; 4],
    ) -> Result<Self, CalibrationError> {
        let name = name.into();
        if !is_axis_aligned_rectangle(&local_points) {
            return Err(CalibrationError::InvalidGeometry(name));
        }
        Ok(Self {
            name,
            world_points,
            local_points,
        })
    }
}

#[derive(Debug, Clone)]
struct CalibratedField {
    field: Field,
    local_to_world: Homography,
    world_to_local: Homography,
}

/// Registry of calibrated fields. Homographies are computed once at
/// registration; conversions between two non-base fields always compose
/// through the shared base frame rather than estimating a direct transform.
///
/// Cloning is cheap enough for per-frame snapshots (a handful of fields,
/// each a few hundred bytes).
#[derive(Debug, Clone, Default)]
pub struct FieldCalibrator {
    fields: HashMap<String, CalibratedField>,
}

impl FieldCalibrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers or wholesale-replaces a field. The homography pair is
    /// solved here so conversion never pays for it.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        world_points: [Point2; 4],
        local_points: [Point2; 4],
    ) -> Result<(), CalibrationError> {
        let name = name.into();
        if name == BASE_FIELD {
            return Err(CalibrationError::ReservedField(name));
        }
        let field = Field::new(name, world_points, local_points)?;
        self.register_field(field)
    }

    pub fn register_field(&mut self, field: Field) -> Result<(), CalibrationError> {
        if field.name == BASE_FIELD {
            return Err(CalibrationError::ReservedField(field.name));
        }
        if !is_axis_aligned_rectangle(&field.local_points) {
            return Err(CalibrationError::InvalidGeometry(field.name));
        }
        let local_to_world = Homography::from_quad_to_quad(&field.local_points, &field.world_points)?;
        let world_to_local = Homography::from_quad_to_quad(&field.world_points, &field.local_points)?;
        debug!(field = %field.name, "field_registered");
        self.fields.insert(
            field.name.clone(),
            CalibratedField {
                field,
                local_to_world,
                world_to_local,
            },
        );
        Ok(())
    }

    /// Removes a field and its cached homographies. `"base"` and
    /// `"screen"` are rejected.
    pub fn remove(&mut self, name: &str) -> Result<(), CalibrationError> {
        if name == BASE_FIELD || name == SCREEN_FIELD {
            return Err(CalibrationError::ReservedField(name.to_string()));
        }
        if self.fields.remove(name).is_none() {
            return Err(CalibrationError::UnknownField(name.to_string()));
        }
        debug!(field = name, "field_removed");
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        name == BASE_FIELD || self.fields.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Field> {
        self.fields.get(name).map(|c| &c.field)
    }

    /// Registered fields, excluding the implicit base frame.
    pub fn fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.values().map(|c| &c.field)
    }

    pub fn field_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.fields.keys().cloned().collect();
        names.sort();
        names
    }

    fn lookup(&self, name: &str) -> Result<&CalibratedField, CalibrationError> {
        self.fields
            .get(name)
            .ok_or_else(|| CalibrationError::UnknownField(name.to_string()))
    }

    /// Converts a point between two frames. `from == to` is an identity
    /// short-circuit, valid even for unregistered names.
    pub fn convert(&self, point: Point2, from: &str, to: &str) -> Result<Point2, CalibrationError> {
        if from == to {
            return Ok(point);
        }
        let world = if from == BASE_FIELD {
            point
        } else {
            self.lookup(from)?.local_to_world.apply(point)?
        };
        if to == BASE_FIELD {
            return Ok(world);
        }
        Ok(self.lookup(to)?.world_to_local.apply(world)?)
    }

    /// Transforms an angle between frames by probing a nearby point.
    ///
    /// Angles do not transform linearly under a homography, so a probe
    /// point a small fixed distance from `position` along `angle` is
    /// converted alongside it and the angle reconstructed with `atan2`.
    /// `position` must be expressed in the `from` frame and must be the
    /// position the angle applies at; passing any other point yields a
    /// wrong angle under perspective.
    pub fn transform_orientation(
        &self,
        from: &str,
        to: &str,
        position: Point2,
        angle: f64,
    ) -> Result<f64, CalibrationError> {
        let probe = Point2::new(
            position.x + ORIENTATION_PROBE_DISTANCE * angle.cos(),
            position.y + ORIENTATION_PROBE_DISTANCE * angle.sin(),
        );
        let origin = self.convert(position, from, to)?;
        let tip = self.convert(probe, from, to)?;
        Ok((tip.y - origin.y).atan2(tip.x - origin.x))
    }

    /// Screen-pixel length of a world-space distance at a given world
    /// position.
    ///
    /// The scale varies across the field and by direction under
    /// perspective, so four probes (± `distance` along each axis) are
    /// converted to the screen frame, the two opposite-direction probe
    /// distances are averaged per axis, and the axes averaged. The
    /// symmetric probe cancels first-order perspective skew. Without a
    /// screen field a fixed linear scale applies. Never below one pixel.
    pub fn distance_to_pixels(&self, position: Point2, distance: f64) -> f64 {
        if !self.fields.contains_key(SCREEN_FIELD) {
            return (distance * FALLBACK_PIXELS_PER_METER).max(1.0);
        }
        let pixels = self.probe_scale(position, distance);
        match pixels {
            Ok(p) => p.max(1.0),
            Err(_) => (distance * FALLBACK_PIXELS_PER_METER).max(1.0),
        }
    }

    fn probe_scale(&self, position: Point2, distance: f64) -> Result<f64, CalibrationError> {
        let center = self.convert(position, BASE_FIELD, SCREEN_FIELD)?;
        let probes = [
            Point2::new(position.x + distance, position.y),
            Point2::new(position.x - distance, position.y),
            Point2::new(position.x, position.y + distance),
            Point2::new(position.x, position.y - distance),
        ];
        let mut screen = [Point2::default(); 4];
        for (out, probe) in screen.iter_mut().zip(probes.iter()) {
            *out = self.convert(*probe, BASE_FIELD, SCREEN_FIELD)?;
        }
        let x_scale = (center.distance_to(screen[0]) + center.distance_to(screen[1])) / 2.0;
        let y_scale = (center.distance_to(screen[2]) + center.distance_to(screen[3])) / 2.0;
        Ok((x_scale + y_scale) / 2.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> [Point2; 4] {
        [
            Point2::new(x0, y0),
            Point2::new(x1, y0),
            Point2::new(x1, y1),
            Point2::new(x0, y1),
        ]
    }

    fn calibrator_with_screen() -> FieldCalibrator {
        let mut calibrator = FieldCalibrator::new();
        // 2m x 2m table centered on the origin, projected onto 1920x1080
        // with a slight keystone.
        calibrator
            .register(
                SCREEN_FIELD,
                [
                    Point2::new(-1.0, -1.0),
                    Point2::new(1.0, -1.0),
                    Point2::new(1.1, 1.0),
                    Point2::new(-1.1, 1.0),
                ],
                rect(0.0, 1080.0, 1920.0, 0.0),
            )
            .expect("screen registration");
        calibrator
    }

    #[test]
    fn base_to_field_round_trip() {
        let calibrator = calibrator_with_screen();
        let p = Point2::new(0.3, -0.7);
        let there = calibrator.convert(p, BASE_FIELD, SCREEN_FIELD).expect("to");
        let back = calibrator
            .convert(there, SCREEN_FIELD, BASE_FIELD)
            .expect("back");
        assert!((back.x - p.x).abs() < 1e-9);
        assert!((back.y - p.y).abs() < 1e-9);
    }

    #[test]
    fn composition_matches_direct_conversion() {
        let mut calibrator = calibrator_with_screen();
        calibrator
            .register(
                "arena",
                [
                    Point2::new(-0.5, -0.5),
                    Point2::new(0.5, -0.4),
                    Point2::new(0.6, 0.5),
                    Point2::new(-0.6, 0.5),
                ],
                rect(0.0, 0.0, 10.0, 10.0),
            )
            .expect("arena registration");

        let p = Point2::new(4.0, 6.0);
        let via_base = calibrator
            .convert(
                calibrator.convert(p, "arena", BASE_FIELD).expect("hop 1"),
                BASE_FIELD,
                SCREEN_FIELD,
            )
            .expect("hop 2");
        let direct = calibrator
            .convert(p, "arena", SCREEN_FIELD)
            .expect("direct");
        assert!((via_base.x - direct.x).abs() < 1e-9);
        assert!((via_base.y - direct.y).abs() < 1e-9);
    }

    #[test]
    fn identity_quad_registration_is_identity() {
        let mut calibrator = FieldCalibrator::new();
        let square = rect(0.0, 0.0, 1.0, 1.0);
        calibrator
            .register(SCREEN_FIELD, square, square)
            .expect("registration");
        let p = calibrator
            .convert(Point2::new(0.0, 0.0), BASE_FIELD, SCREEN_FIELD)
            .expect("convert");
        assert!((p.x).abs() < 1e-9);
        assert!((p.y).abs() < 1e-9);
    }

    #[test]
    fn non_rectangular_local_points_are_rejected() {
        let mut calibrator = FieldCalibrator::new();
        let result = calibrator.register(
            "skewed",
            rect(0.0, 0.0, 1.0, 1.0),
            [
                Point2::new(0.0, 0.0),
                Point2::new(1.0, 0.1),
                Point2::new(1.0, 1.0),
                Point2::new(0.0, 1.0),
            ],
        );
        assert!(matches!(result, Err(CalibrationError::InvalidGeometry(_))));
    }

    #[test]
    fn registering_base_is_rejected() {
        let mut calibrator = FieldCalibrator::new();
        let square = rect(0.0, 0.0, 1.0, 1.0);
        assert!(matches!(
            calibrator.register(BASE_FIELD, square, square),
            Err(CalibrationError::ReservedField(_))
        ));
    }

    #[test]
    fn removing_screen_or_base_is_rejected() {
        let mut calibrator = calibrator_with_screen();
        assert!(matches!(
            calibrator.remove(SCREEN_FIELD),
            Err(CalibrationError::ReservedField(_))
        ));
        assert!(matches!(
            calibrator.remove(BASE_FIELD),
            Err(CalibrationError::ReservedField(_))
        ));
    }

    #[test]
    fn removing_unknown_field_reports_it() {
        let mut calibrator = FieldCalibrator::new();
        assert_eq!(
            calibrator.remove("ghost"),
            Err(CalibrationError::UnknownField("ghost".to_string()))
        );
    }

    #[test]
    fn unknown_field_conversion_reports_it() {
        let calibrator = FieldCalibrator::new();
        assert_eq!(
            calibrator.convert(Point2::new(0.0, 0.0), BASE_FIELD, "ghost"),
            Err(CalibrationError::UnknownField("ghost".to_string()))
        );
    }

    #[test]
    fn same_unregistered_name_is_identity() {
        let calibrator = FieldCalibrator::new();
        let p = Point2::new(3.0, 4.0);
        assert_eq!(calibrator.convert(p, "ghost", "ghost").expect("identity"), p);
    }

    #[test]
    fn orientation_identity_within_same_field() {
        let calibrator = calibrator_with_screen();
        let angle = calibrator
            .transform_orientation(SCREEN_FIELD, SCREEN_FIELD, Point2::new(100.0, 100.0), 0.8)
            .expect("identity orientation");
        assert!((angle - 0.8).abs() < 1e-9);
    }

    #[test]
    fn orientation_flips_with_inverted_screen_axis() {
        // The screen's local Y axis points down, so a +90° world angle
        // reads as -90° in screen space for an axis-aligned projection.
        let mut calibrator = FieldCalibrator::new();
        calibrator
            .register(
                SCREEN_FIELD,
                rect(-1.0, -1.0, 1.0, 1.0),
                rect(0.0, 1080.0, 1920.0, 0.0),
            )
            .expect("registration");
        let angle = calibrator
            .transform_orientation(
                BASE_FIELD,
                SCREEN_FIELD,
                Point2::new(0.0, 0.0),
                std::f64::consts::FRAC_PI_2,
            )
            .expect("orientation");
        assert!((angle + std::f64::consts::FRAC_PI_2).abs() < 1e-9);
    }

    #[test]
    fn distance_to_pixels_without_screen_uses_fallback() {
        let calibrator = FieldCalibrator::new();
        let pixels = calibrator.distance_to_pixels(Point2::new(0.0, 0.0), 0.5);
        assert!((pixels - 0.5 * FALLBACK_PIXELS_PER_METER).abs() < 1e-9);
    }

    #[test]
    fn distance_to_pixels_never_below_one() {
        let calibrator = calibrator_with_screen();
        let pixels = calibrator.distance_to_pixels(Point2::new(0.0, 0.0), 1e-9);
        assert_eq!(pixels, 1.0);
    }

    #[test]
    fn distance_to_pixels_uniform_for_affine_screen() {
        // Axis-aligned projection with no keystone: 1920 px per 2 m.
        let mut calibrator = FieldCalibrator::new();
        calibrator
            .register(
                SCREEN_FIELD,
                rect(-1.0, -1.0, 1.0, 1.0),
                rect(0.0, 0.0, 1920.0, 1920.0),
            )
            .expect("registration");
        let pixels = calibrator.distance_to_pixels(Point2::new(0.2, -0.3), 0.1);
        assert!((pixels - 96.0).abs() < 1e-6, "pixels = {pixels}");
    }

    #[test]
    fn re_registration_replaces_the_field() {
        let mut calibrator = calibrator_with_screen();
        calibrator
            .register(
                SCREEN_FIELD,
                rect(-2.0, -2.0, 2.0, 2.0),
                rect(0.0, 0.0, 100.0, 100.0),
            )
            .expect("re-registration");
        let p = calibrator
            .convert(Point2::new(2.0, 2.0), BASE_FIELD, SCREEN_FIELD)
            .expect("convert");
        assert!((p.x - 100.0).abs() < 1e-9);
        assert!((p.y - 100.0).abs() < 1e-9);
    }
}
