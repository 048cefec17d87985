//! Built-in command handlers.
//!
//! Coordinate parameters default to the `"base"` (world) frame; a `field`
//! parameter converts them at command time, so stored scene state is always
//! in world coordinates. Field corner lists are `[BL, BR, TR, TL]`,
//! counter-clockwise from bottom-left.

use serde_json::{json, Value};

use crate::calibrator::BASE_FIELD;
use crate::color::Rgba;
use crate::command::{
    opt_bool, opt_f64, opt_i64, opt_str, opt_u32, opt_vertices, require_f64, require_quad,
    require_str, CommandError, CommandRegistry, Params,
};
use crate::drawing::{DrawPrimitive, Drawing, PrimitiveStyle};
use crate::geometry::Point2;
use crate::rigidbody::{
    BodyShape, BodyStyle, BodyStyleUpdate, LineStyle, TrajectoryColor, TrajectoryMode,
    TrajectoryStyle, TrajectoryStyleUpdate,
};
use crate::scene::{Scene, SceneDoc, SceneError};

/// Registry with the complete built-in command set.
pub fn builtin_registry() -> CommandRegistry {
    let mut registry = CommandRegistry::new();

    registry.register("ping", |_, _| Ok(json!({ "message": "pong" })));
    registry.register("status", status);

    registry.register("create_rigidbody", create_rigidbody);
    registry.register("remove_rigidbody", remove_rigidbody);
    registry.register("update_position", update_position);
    registry.register("update_style", update_style);
    registry.register("update_trajectory", update_trajectory);
    registry.register("set_tracking", set_tracking);
    registry.register("set_tracking_lost", set_tracking_lost);
    registry.register("get_rigidbody", get_rigidbody);
    registry.register("list_rigidbodies", |scene, _| {
        Ok(json!({ "rigidbodies": scene.body_names() }))
    });

    registry.register("create_field", create_field);
    registry.register("remove_field", remove_field);
    registry.register("get_field", get_field);
    registry.register("list_fields", |scene, _| {
        Ok(json!({ "fields": scene.field_names() }))
    });
    registry.register("convert_point", convert_point);

    registry.register("draw_circle", draw_circle);
    registry.register("draw_box", draw_box);
    registry.register("draw_line", draw_line);
    registry.register("draw_arrow", draw_arrow);
    registry.register("draw_polygon", draw_polygon);
    registry.register("draw_text", draw_text);
    registry.register("remove_drawing", remove_drawing);
    registry.register("list_drawings", |scene, _| {
        Ok(json!({ "drawings": scene.drawing_ids() }))
    });
    registry.register("clear_drawings", |scene, _| {
        scene.clear_drawings();
        Ok(json!({ "message": "all drawings cleared" }))
    });

    registry.register("clear_scene", |scene, _| {
        scene.clear();
        Ok(json!({ "message": "scene cleared (rigid bodies and drawings removed, fields kept)" }))
    });
    registry.register("clear_all", |scene, _| {
        scene.clear_all();
        Ok(json!({ "message": "scene fully cleared (screen field preserved)" }))
    });
    registry.register("dump_scene", dump_scene);
    registry.register("load_scene", load_scene);

    registry
}

fn status(scene: &Scene, _params: &Params) -> Result<Value, CommandError> {
    let bodies = scene.body_names();
    let fields = scene.field_names();
    let drawings = scene.drawing_ids();
    Ok(json!({
        "rigidbody_count": bodies.len(),
        "rigidbodies": bodies,
        "field_count": fields.len(),
        "fields": fields,
        "drawing_count": drawings.len(),
        "drawings": drawings,
    }))
}

// Rigid bodies

fn create_rigidbody(scene: &Scene, params: &Params) -> Result<Value, CommandError> {
    let name = require_str(params, "name")?;
    let mocap_name = opt_str(params, "mocap_name")?.map(str::to_string);
    let auto_track = opt_bool(params, "auto_track")?.unwrap_or(false);
    if auto_track && mocap_name.is_none() {
        return Err(CommandError::Invalid(
            "cannot enable auto_track: mocap_name is required".to_string(),
        ));
    }

    let mut style = BodyStyle::default();
    if let Some(style_params) = object_param(params, "style")? {
        parse_style_update(&style_params)?.apply(&mut style);
    }
    let mut trajectory = TrajectoryStyle::default();
    if let Some(traj_params) = object_param(params, "trajectory")? {
        parse_trajectory_update(&traj_params)?.apply(&mut trajectory);
    }

    scene.create_rigidbody(name, style, trajectory, mocap_name.clone(), auto_track)?;

    let mut response = json!({ "name": name });
    if let Some(mocap_name) = mocap_name {
        response["mocap_name"] = Value::String(mocap_name);
    }
    if auto_track {
        response["auto_track"] = Value::Bool(true);
    }
    Ok(response)
}

fn remove_rigidbody(scene: &Scene, params: &Params) -> Result<Value, CommandError> {
    let name = require_str(params, "name")?;
    scene.remove_rigidbody(name)?;
    Ok(json!({ "name": name }))
}

fn update_position(scene: &Scene, params: &Params) -> Result<Value, CommandError> {
    let name = require_str(params, "name")?;
    let x = require_f64(params, "x")?;
    let y = require_f64(params, "y")?;
    let orientation = opt_f64(params, "orientation")?;
    let field = opt_str(params, "field")?.unwrap_or(BASE_FIELD);

    let (world, orientation) = if field == BASE_FIELD {
        (Point2::new(x, y), orientation)
    } else {
        // The orientation probe needs the position the angle applies at,
        // expressed in the source field, before any conversion.
        let field_position = Point2::new(x, y);
        let world = scene.convert(field_position, field, BASE_FIELD)?;
        let orientation = match orientation {
            Some(angle) => {
                Some(scene.transform_orientation(field, BASE_FIELD, field_position, angle)?)
            }
            None => None,
        };
        (world, orientation)
    };

    // First update of an unseen body creates it with default styling.
    match scene.update_position(name, world.x, world.y, orientation) {
        Err(SceneError::BodyNotFound(_)) => {
            let _ = scene.create_rigidbody(
                name,
                BodyStyle::default(),
                TrajectoryStyle::default(),
                None,
                false,
            );
            scene.update_position(name, world.x, world.y, orientation)?;
        }
        other => other?,
    }
    Ok(json!({ "name": name }))
}

fn update_style(scene: &Scene, params: &Params) -> Result<Value, CommandError> {
    let name = require_str(params, "name")?;
    let mut style_params = params.clone();
    style_params.remove("name");
    let update = parse_style_update(&style_params)?;
    scene.update_style(name, &update)?;
    Ok(json!({ "name": name }))
}

fn update_trajectory(scene: &Scene, params: &Params) -> Result<Value, CommandError> {
    let name = require_str(params, "name")?;
    let mut traj_params = params.clone();
    traj_params.remove("name");
    let update = parse_trajectory_update(&traj_params)?;
    scene.update_trajectory(name, &update)?;
    Ok(json!({ "name": name }))
}

fn set_tracking(scene: &Scene, params: &Params) -> Result<Value, CommandError> {
    let name = require_str(params, "name")?;
    let mocap_name = opt_str(params, "mocap_name")?.map(str::to_string);
    let auto_track = opt_bool(params, "auto_track")?.unwrap_or(false);
    if auto_track && mocap_name.is_none() {
        return Err(CommandError::Invalid(
            "cannot enable auto_track: mocap_name is required".to_string(),
        ));
    }
    scene.set_tracking(name, mocap_name, auto_track)?;
    Ok(json!({ "name": name, "auto_track": auto_track }))
}

fn set_tracking_lost(scene: &Scene, params: &Params) -> Result<Value, CommandError> {
    let name = require_str(params, "name")?;
    let lost = params
        .get("lost")
        .and_then(Value::as_bool)
        .ok_or_else(|| CommandError::Invalid("missing required boolean parameter 'lost'".to_string()))?;
    scene.set_tracking_lost(name, lost)?;
    Ok(json!({ "name": name, "lost": lost }))
}

fn get_rigidbody(scene: &Scene, params: &Params) -> Result<Value, CommandError> {
    let name = require_str(params, "name")?;
    let body = scene
        .body_snapshot(name)
        .ok_or_else(|| CommandError::NotFound(format!("rigid body '{name}' not found")))?;
    let mut doc = serde_json::to_value(&body)
        .map_err(|e| CommandError::Fatal(format!("rigid body serialization failed: {e}")))?;
    doc["effective_orientation"] = json!(body.effective_orientation());
    doc["tracking_lost"] = Value::Bool(body.tracking_lost);
    doc["history_len"] = json!(body.history.len());
    Ok(json!({ "rigidbody": doc }))
}

// Fields

fn create_field(scene: &Scene, params: &Params) -> Result<Value, CommandError> {
    let name = require_str(params, "name")?;
    let world_points = require_quad(params, "world_points")?;
    let local_points = require_quad(params, "local_points")?;
    scene.create_field(name, world_points, local_points)?;
    Ok(json!({ "name": name }))
}

fn remove_field(scene: &Scene, params: &Params) -> Result<Value, CommandError> {
    let name = require_str(params, "name")?;
    scene.remove_field(name)?;
    Ok(json!({ "name": name }))
}

fn get_field(scene: &Scene, params: &Params) -> Result<Value, CommandError> {
    let name = require_str(params, "name")?;
    let field = scene
        .field(name)
        .ok_or_else(|| CommandError::NotFound(format!("field '{name}' not found")))?;
    let doc = serde_json::to_value(&field)
        .map_err(|e| CommandError::Fatal(format!("field serialization failed: {e}")))?;
    Ok(json!({ "field": doc }))
}

fn convert_point(scene: &Scene, params: &Params) -> Result<Value, CommandError> {
    let x = require_f64(params, "x")?;
    let y = require_f64(params, "y")?;
    let from = opt_str(params, "from")?.unwrap_or(BASE_FIELD);
    let to = opt_str(params, "to")?.unwrap_or(BASE_FIELD);
    let point = scene.convert(Point2::new(x, y), from, to)?;
    Ok(json!({ "x": point.x, "y": point.y, "from": from, "to": to }))
}

// Drawings

fn to_world(scene: &Scene, x: f64, y: f64, field: &str) -> Result<Point2, CommandError> {
    if field == BASE_FIELD {
        return Ok(Point2::new(x, y));
    }
    Ok(scene.convert(Point2::new(x, y), field, BASE_FIELD)?)
}

fn primitive_style(params: &Params, default_thickness: u32) -> Result<PrimitiveStyle, CommandError> {
    let color = match params.get("color") {
        None | Some(Value::Null) => Rgba::WHITE,
        Some(value) => Rgba::parse(value).map_err(CommandError::Invalid)?,
    };
    Ok(PrimitiveStyle {
        color,
        thickness: opt_u32(params, "thickness")?.unwrap_or(default_thickness),
        filled: opt_bool(params, "filled")?.unwrap_or(true),
    })
}

fn insert_drawing(
    scene: &Scene,
    params: &Params,
    id: &str,
    primitive: DrawPrimitive,
    position: Point2,
    end: Option<Point2>,
) -> Result<Value, CommandError> {
    let z_order = opt_i64(params, "z_order")?.unwrap_or(0);
    scene.add_drawing(Drawing {
        id: id.to_string(),
        primitive,
        position,
        end,
        z_order,
        z_seq: 0,
    });
    let mut response = json!({ "id": id });
    if z_order != 0 {
        response["z_order"] = json!(z_order);
    }
    Ok(response)
}

fn draw_circle(scene: &Scene, params: &Params) -> Result<Value, CommandError> {
    let id = require_str(params, "id")?;
    let x = require_f64(params, "x")?;
    let y = require_f64(params, "y")?;
    let radius = require_f64(params, "radius")?;
    let field = opt_str(params, "field")?.unwrap_or(BASE_FIELD);
    let position = to_world(scene, x, y, field)?;
    let primitive = DrawPrimitive::Circle {
        radius,
        style: primitive_style(params, 0)?,
    };
    insert_drawing(scene, params, id, primitive, position, None)
}

fn draw_box(scene: &Scene, params: &Params) -> Result<Value, CommandError> {
    let id = require_str(params, "id")?;
    let x = require_f64(params, "x")?;
    let y = require_f64(params, "y")?;
    let width = require_f64(params, "width")?;
    let height = require_f64(params, "height")?;
    let angle = opt_f64(params, "angle")?.unwrap_or(0.0);
    let field = opt_str(params, "field")?.unwrap_or(BASE_FIELD);
    let position = to_world(scene, x, y, field)?;
    let primitive = DrawPrimitive::Box {
        width,
        height,
        angle,
        style: primitive_style(params, 0)?,
    };
    insert_drawing(scene, params, id, primitive, position, None)
}

fn draw_segment(
    scene: &Scene,
    params: &Params,
    arrow: bool,
) -> Result<Value, CommandError> {
    let id = require_str(params, "id")?;
    let x1 = require_f64(params, "x1")?;
    let y1 = require_f64(params, "y1")?;
    let x2 = require_f64(params, "x2")?;
    let y2 = require_f64(params, "y2")?;
    let field = opt_str(params, "field")?.unwrap_or(BASE_FIELD);
    let start = to_world(scene, x1, y1, field)?;
    let end = to_world(scene, x2, y2, field)?;
    let style = primitive_style(params, 2)?;
    let primitive = if arrow {
        DrawPrimitive::Arrow { style }
    } else {
        DrawPrimitive::Line { style }
    };
    insert_drawing(scene, params, id, primitive, start, Some(end))
}

fn draw_line(scene: &Scene, params: &Params) -> Result<Value, CommandError> {
    draw_segment(scene, params, false)
}

fn draw_arrow(scene: &Scene, params: &Params) -> Result<Value, CommandError> {
    draw_segment(scene, params, true)
}

fn draw_polygon(scene: &Scene, params: &Params) -> Result<Value, CommandError> {
    let id = require_str(params, "id")?;
    let vertices = opt_vertices(params, "vertices")?
        .ok_or_else(|| CommandError::Invalid("missing required parameter 'vertices'".to_string()))?;
    if vertices.len() < 3 {
        return Err(CommandError::Invalid(
            "polygon requires at least 3 vertices".to_string(),
        ));
    }
    let field = opt_str(params, "field")?.unwrap_or(BASE_FIELD);
    let mut world_vertices = Vec::with_capacity(vertices.len());
    for v in &vertices {
        world_vertices.push(to_world(scene, v.x, v.y, field)?);
    }
    let anchor = world_vertices[0];
    let primitive = DrawPrimitive::Polygon {
        vertices: world_vertices,
        style: primitive_style(params, 0)?,
    };
    insert_drawing(scene, params, id, primitive, anchor, None)
}

fn draw_text(scene: &Scene, params: &Params) -> Result<Value, CommandError> {
    let id = require_str(params, "id")?;
    let x = require_f64(params, "x")?;
    let y = require_f64(params, "y")?;
    let text = require_str(params, "text")?.to_string();
    let font_size = opt_u32(params, "font_size")?.unwrap_or(24);
    let field = opt_str(params, "field")?.unwrap_or(BASE_FIELD);
    let position = to_world(scene, x, y, field)?;
    let primitive = DrawPrimitive::Text {
        text,
        font_size,
        style: primitive_style(params, 0)?,
    };
    insert_drawing(scene, params, id, primitive, position, None)
}

fn remove_drawing(scene: &Scene, params: &Params) -> Result<Value, CommandError> {
    let id = require_str(params, "id")?;
    scene.remove_drawing(id)?;
    Ok(json!({ "id": id }))
}

// Scene-level

fn dump_scene(scene: &Scene, _params: &Params) -> Result<Value, CommandError> {
    let doc = serde_json::to_value(scene.to_doc())
        .map_err(|e| CommandError::Fatal(format!("scene serialization failed: {e}")))?;
    Ok(json!({ "scene": doc }))
}

fn load_scene(scene: &Scene, params: &Params) -> Result<Value, CommandError> {
    let data = params
        .get("scene")
        .ok_or_else(|| CommandError::Invalid("missing required parameter 'scene'".to_string()))?;
    let doc: SceneDoc = serde_json::from_value(data.clone())
        .map_err(|e| CommandError::Invalid(format!("malformed scene document: {e}")))?;
    let fields = doc.fields.len();
    let rigidbodies = doc.rigidbodies.len();
    let drawings = doc.drawings.len();
    scene.from_doc(doc)?;
    Ok(json!({
        "message": "scene loaded",
        "fields": fields,
        "rigidbodies": rigidbodies,
        "drawings": drawings,
    }))
}

// Typed update parsing. Unknown parameter names are validation errors, not
// silently accepted.

fn object_param(params: &Params, key: &str) -> Result<Option<Params>, CommandError> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(map)) => Ok(Some(map.clone())),
        Some(_) => Err(CommandError::Invalid(format!(
            "parameter '{key}' must be an object"
        ))),
    }
}

fn parse_color_param(params: &Params, key: &str) -> Result<Option<Rgba>, CommandError> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => Rgba::parse(value).map(Some).map_err(CommandError::Invalid),
    }
}

fn parse_shape(params: &Params) -> Result<Option<BodyShape>, CommandError> {
    let Some(value) = params.get("shape") else {
        return Ok(None);
    };
    match value {
        Value::Null => Ok(None),
        Value::String(name) => match name.as_str() {
            "circle" => Ok(Some(BodyShape::Circle)),
            "box" => Ok(Some(BodyShape::Box)),
            "triangle" => Ok(Some(BodyShape::Triangle)),
            "polygon" => {
                let vertices = opt_vertices(params, "polygon_vertices")?.ok_or_else(|| {
                    CommandError::Invalid(
                        "shape 'polygon' requires 'polygon_vertices'".to_string(),
                    )
                })?;
                if vertices.len() < 3 {
                    return Err(CommandError::Invalid(
                        "polygon shape requires at least 3 vertices".to_string(),
                    ));
                }
                Ok(Some(BodyShape::Polygon { vertices }))
            }
            other => Err(CommandError::Invalid(format!(
                "unknown shape '{other}' (expected circle, box, triangle, or polygon)"
            ))),
        },
        // Structured form, covers compound shapes.
        Value::Object(_) => serde_json::from_value(value.clone())
            .map(Some)
            .map_err(|e| CommandError::Invalid(format!("malformed shape object: {e}"))),
        _ => Err(CommandError::Invalid(
            "parameter 'shape' must be a string or shape object".to_string(),
        )),
    }
}

fn parse_style_update(params: &Params) -> Result<BodyStyleUpdate, CommandError> {
    const KNOWN: &[&str] = &[
        "shape",
        "polygon_vertices",
        "size",
        "color",
        "alpha",
        "label",
        "label_offset",
        "orientation_length",
        "orientation_color",
        "orientation_thickness",
    ];
    for key in params.keys() {
        if !KNOWN.contains(&key.as_str()) {
            return Err(CommandError::Invalid(format!(
                "unknown style parameter '{key}'"
            )));
        }
    }

    let label_offset = match params.get("label_offset") {
        None | Some(Value::Null) => None,
        Some(value) => Some(crate::command::parse_point(value, "parameter 'label_offset'")?),
    };
    let alpha = match opt_i64(params, "alpha")? {
        None => None,
        Some(n) => Some(
            u8::try_from(n)
                .map_err(|_| CommandError::Invalid(format!("alpha must be 0-255, got {n}")))?,
        ),
    };

    Ok(BodyStyleUpdate {
        shape: parse_shape(params)?,
        size: opt_f64(params, "size")?,
        color: parse_color_param(params, "color")?,
        alpha,
        label: opt_bool(params, "label")?,
        label_offset,
        orientation_length: opt_f64(params, "orientation_length")?,
        orientation_color: parse_color_param(params, "orientation_color")?,
        orientation_thickness: opt_u32(params, "orientation_thickness")?,
    })
}

fn parse_trajectory_update(params: &Params) -> Result<TrajectoryStyleUpdate, CommandError> {
    const KNOWN: &[&str] = &[
        "enabled",
        "mode",
        "length",
        "style",
        "thickness",
        "color",
        "gradient_start",
        "gradient_end",
        "dot_spacing",
        "dash_length",
    ];
    for key in params.keys() {
        if !KNOWN.contains(&key.as_str()) {
            return Err(CommandError::Invalid(format!(
                "unknown trajectory parameter '{key}'"
            )));
        }
    }

    let mode = match opt_str(params, "mode")? {
        None => None,
        Some("time") => Some(TrajectoryMode::Time),
        Some("distance") => Some(TrajectoryMode::Distance),
        Some(other) => {
            return Err(CommandError::Invalid(format!(
                "unknown trajectory mode '{other}' (expected time or distance)"
            )))
        }
    };
    let line_style = match opt_str(params, "style")? {
        None => None,
        Some("solid") => Some(LineStyle::Solid),
        Some("dotted") => Some(LineStyle::Dotted),
        Some("dashed") => Some(LineStyle::Dashed),
        Some(other) => {
            return Err(CommandError::Invalid(format!(
                "unknown trajectory style '{other}' (expected solid, dotted, or dashed)"
            )))
        }
    };
    let color = match params.get("color") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s == "gradient" => Some(TrajectoryColor::Gradient),
        Some(value) => Some(TrajectoryColor::Solid {
            color: Rgba::parse(value).map_err(CommandError::Invalid)?,
        }),
    };

    Ok(TrajectoryStyleUpdate {
        enabled: opt_bool(params, "enabled")?,
        mode,
        length: opt_f64(params, "length")?,
        line_style,
        thickness: opt_u32(params, "thickness")?,
        color,
        gradient_start: parse_color_param(params, "gradient_start")?,
        gradient_end: parse_color_param(params, "gradient_end")?,
        dot_spacing: opt_f64(params, "dot_spacing")?,
        dash_length: opt_f64(params, "dash_length")?,
    })
}
