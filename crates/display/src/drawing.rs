use serde::{Deserialize, Serialize};

use crate::color::Rgba;
use crate::geometry::Point2;

/// Stroke/fill settings shared by every primitive. `thickness == 0` means
/// filled; a positive thickness means outline/line width in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PrimitiveStyle {
    pub color: Rgba,
    pub thickness: u32,
    pub filled: bool,
}

impl Default for PrimitiveStyle {
    fn default() -> Self {
        Self {
            color: Rgba::WHITE,
            thickness: 0,
            filled: true,
        }
    }
}

/// One drawable primitive. Each variant carries only its own geometry;
/// positions live outside (in `Drawing` for overlays, in the compound-part
/// offset for body shapes).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DrawPrimitive {
    Circle {
        radius: f64,
        style: PrimitiveStyle,
    },
    Box {
        width: f64,
        height: f64,
        /// Local rotation in radians.
        angle: f64,
        style: PrimitiveStyle,
    },
    Line {
        style: PrimitiveStyle,
    },
    Arrow {
        style: PrimitiveStyle,
    },
    Polygon {
        vertices: Vec<Point2>,
        style: PrimitiveStyle,
    },
    Text {
        text: String,
        font_size: u32,
        style: PrimitiveStyle,
    },
}

impl DrawPrimitive {
    /// True for segment shapes that need a second endpoint.
    pub fn needs_end_point(&self) -> bool {
        matches!(self, DrawPrimitive::Line { .. } | DrawPrimitive::Arrow { .. })
    }

    pub fn style(&self) -> &PrimitiveStyle {
        match self {
            DrawPrimitive::Circle { style, .. }
            | DrawPrimitive::Box { style, .. }
            | DrawPrimitive::Line { style }
            | DrawPrimitive::Arrow { style }
            | DrawPrimitive::Polygon { style, .. }
            | DrawPrimitive::Text { style, .. } => style,
        }
    }
}

/// A persistent overlay, rendered every frame until removed. Positioned in
/// world coordinates (field coordinates are converted at creation time).
/// Immutable after creation except for wholesale replacement by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Drawing {
    pub id: String,
    pub primitive: DrawPrimitive,
    pub position: Point2,
    /// Second endpoint for line/arrow shapes, in world coordinates.
    pub end: Option<Point2>,
    #[serde(default)]
    pub z_order: i64,
    #[serde(skip)]
    pub z_seq: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_shapes_need_an_end_point() {
        let style = PrimitiveStyle::default();
        assert!(DrawPrimitive::Line { style }.needs_end_point());
        assert!(DrawPrimitive::Arrow { style }.needs_end_point());
        assert!(!DrawPrimitive::Circle { radius: 0.05, style }.needs_end_point());
        assert!(!DrawPrimitive::Text {
            text: "hi".to_string(),
            font_size: 24,
            style,
        }
        .needs_end_point());
    }

    #[test]
    fn primitive_serializes_with_type_tag() {
        let primitive = DrawPrimitive::Circle {
            radius: 0.25,
            style: PrimitiveStyle::default(),
        };
        let value = serde_json::to_value(&primitive).expect("serialize");
        assert_eq!(value["type"], "circle");
        assert_eq!(value["radius"], 0.25);
    }
}
