use std::collections::HashMap;

use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::warn;

use crate::calibrator::CalibrationError;
use crate::geometry::Point2;
use crate::scene::{Scene, SceneError};

/// Parameters of one request: everything in the JSON object besides
/// `"action"`.
pub type Params = Map<String, Value>;

/// A handler bug surfaced through `execute`. The connection layer is
/// expected to log it and take the process down: a broken invariant in a
/// live experiment is worse than a crash that gets noticed immediately.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("fatal failure in command '{action}': {message}")]
pub struct FatalError {
    pub action: String,
    pub message: String,
}

/// Recoverable handler failures become error responses; `Fatal` escapes
/// the registry as `FatalError`.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CommandError {
    #[error("{0}")]
    Invalid(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Fatal(String),
}

impl From<SceneError> for CommandError {
    fn from(err: SceneError) -> Self {
        match err {
            SceneError::BodyNotFound(_) | SceneError::DrawingNotFound(_) => {
                CommandError::NotFound(err.to_string())
            }
            SceneError::AlreadyExists(_) => CommandError::Invalid(err.to_string()),
            SceneError::Calibration(inner) => inner.into(),
        }
    }
}

impl From<CalibrationError> for CommandError {
    fn from(err: CalibrationError) -> Self {
        match err {
            CalibrationError::UnknownField(_) => CommandError::NotFound(err.to_string()),
            _ => CommandError::Invalid(err.to_string()),
        }
    }
}

pub type Handler = Box<dyn Fn(&Scene, &Params) -> Result<Value, CommandError> + Send + Sync>;

/// Maps wire actions to handlers. An explicit value, constructed at
/// startup and passed by reference into the connection layer; tests build
/// a fresh one each.
#[derive(Default)]
pub struct CommandRegistry {
    handlers: HashMap<String, Handler>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler. Re-registering the same action overwrites the
    /// previous handler and is logged, not fatal.
    pub fn register<F>(&mut self, action: impl Into<String>, handler: F)
    where
        F: Fn(&Scene, &Params) -> Result<Value, CommandError> + Send + Sync + 'static,
    {
        let action = action.into();
        if self.handlers.insert(action.clone(), Box::new(handler)).is_some() {
            warn!(action = %action, "command_reregistered");
        }
    }

    pub fn contains(&self, action: &str) -> bool {
        self.handlers.contains_key(action)
    }

    pub fn action_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Dispatches one request.
    ///
    /// Unknown actions and recoverable handler errors come back as error
    /// responses (`Ok`); only `CommandError::Fatal` crosses as `Err`. A
    /// handler response without an explicit `"status"` is treated as
    /// success.
    pub fn execute(
        &self,
        action: &str,
        scene: &Scene,
        params: &Params,
    ) -> Result<Value, FatalError> {
        let Some(handler) = self.handlers.get(action) else {
            return Ok(json!({
                "status": "error",
                "message": format!("unknown action '{action}'"),
                "available_commands": self.action_names(),
            }));
        };
        match handler(scene, params) {
            Ok(value) => Ok(normalize_response(value)),
            Err(CommandError::Invalid(message)) | Err(CommandError::NotFound(message)) => {
                Ok(error_response(&message))
            }
            Err(CommandError::Fatal(message)) => Err(FatalError {
                action: action.to_string(),
                message,
            }),
        }
    }
}

pub fn success_response() -> Value {
    json!({ "status": "success" })
}

pub fn error_response(message: &str) -> Value {
    json!({ "status": "error", "message": message })
}

fn normalize_response(value: Value) -> Value {
    match value {
        Value::Object(mut map) => {
            map.entry("status".to_string())
                .or_insert_with(|| Value::String("success".to_string()));
            Value::Object(map)
        }
        Value::Null => success_response(),
        other => json!({ "status": "success", "result": other }),
    }
}

// Typed parameter extraction. Missing or mistyped parameters are client
// mistakes and report as `Invalid`.

pub fn require_str<'p>(params: &'p Params, key: &str) -> Result<&'p str, CommandError> {
    params
        .get(key)
        .ok_or_else(|| CommandError::Invalid(format!("missing required parameter '{key}'")))?
        .as_str()
        .ok_or_else(|| CommandError::Invalid(format!("parameter '{key}' must be a string")))
}

pub fn opt_str<'p>(params: &'p Params, key: &str) -> Result<Option<&'p str>, CommandError> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_str()
            .map(Some)
            .ok_or_else(|| CommandError::Invalid(format!("parameter '{key}' must be a string"))),
    }
}

pub fn require_f64(params: &Params, key: &str) -> Result<f64, CommandError> {
    params
        .get(key)
        .ok_or_else(|| CommandError::Invalid(format!("missing required parameter '{key}'")))?
        .as_f64()
        .ok_or_else(|| CommandError::Invalid(format!("parameter '{key}' must be a number")))
}

pub fn opt_f64(params: &Params, key: &str) -> Result<Option<f64>, CommandError> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_f64()
            .map(Some)
            .ok_or_else(|| CommandError::Invalid(format!("parameter '{key}' must be a number"))),
    }
}

pub fn opt_bool(params: &Params, key: &str) -> Result<Option<bool>, CommandError> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_bool()
            .map(Some)
            .ok_or_else(|| CommandError::Invalid(format!("parameter '{key}' must be a boolean"))),
    }
}

pub fn opt_i64(params: &Params, key: &str) -> Result<Option<i64>, CommandError> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_i64()
            .map(Some)
            .ok_or_else(|| CommandError::Invalid(format!("parameter '{key}' must be an integer"))),
    }
}

pub fn opt_u32(params: &Params, key: &str) -> Result<Option<u32>, CommandError> {
    match opt_i64(params, key)? {
        None => Ok(None),
        Some(n) => u32::try_from(n)
            .map(Some)
            .map_err(|_| CommandError::Invalid(format!("parameter '{key}' must be a non-negative integer"))),
    }
}

pub fn parse_point(value: &Value, context: &str) -> Result<Point2, CommandError> {
    let pair = value
        .as_array()
        .filter(|a| a.len() == 2)
        .ok_or_else(|| CommandError::Invalid(format!("{context} must be an [x, y] pair")))?;
    let x = pair[0]
        .as_f64()
        .ok_or_else(|| CommandError::Invalid(format!("{context} must contain numbers")))?;
    let y = pair[1]
        .as_f64()
        .ok_or_else(|| CommandError::Invalid(format!("{context} must contain numbers")))?;
    Ok(Point2::new(x, y))
}

/// Parses a `[[x, y]; 4]` corner list, order `[BL, BR, TR, TL]`.
pub fn require_quad(params: &Params, key: &str) -> Result<[Point2; 4], CommandError> {
    let items = params
        .get(key)
        .ok_or_else(|| CommandError::Invalid(format!("missing required parameter '{key}'")))?
        .as_array()
        .ok_or_else(|| CommandError::Invalid(format!("parameter '{key}' must be a list of 4 [x, y] points")))?;
    if items.len() != 4 {
        return Err(CommandError::Invalid(format!(
            "parameter '{key}' must contain exactly 4 points, got {}",
            items.len()
        )));
    }
    let mut quad = [Point2::default(); 4];
    for (out, item) in quad.iter_mut().zip(items.iter()) {
        *out = parse_point(item, &format!("each point in '{key}'"))?;
    }
    Ok(quad)
}

pub fn opt_vertices(params: &Params, key: &str) -> Result<Option<Vec<Point2>>, CommandError> {
    let Some(value) = params.get(key) else {
        return Ok(None);
    };
    if value.is_null() {
        return Ok(None);
    }
    let items = value
        .as_array()
        .ok_or_else(|| CommandError::Invalid(format!("parameter '{key}' must be a list of [x, y] points")))?;
    let mut vertices = Vec::with_capacity(items.len());
    for item in items {
        vertices.push(parse_point(item, &format!("each point in '{key}'"))?);
    }
    Ok(Some(vertices))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(value: Value) -> Params {
        value.as_object().expect("object").clone()
    }

    #[test]
    fn unknown_action_lists_available_commands() {
        let mut registry = CommandRegistry::new();
        registry.register("ping", |_, _| Ok(Value::Null));
        registry.register("clear_scene", |scene, _| {
            scene.clear();
            Ok(Value::Null)
        });
        let scene = Scene::new();
        let response = registry
            .execute("nope", &scene, &Params::new())
            .expect("no fatal");
        assert_eq!(response["status"], "error");
        let commands = response["available_commands"].as_array().expect("list");
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[0], "clear_scene");
    }

    #[test]
    fn missing_status_is_injected_as_success() {
        let mut registry = CommandRegistry::new();
        registry.register("count", |_, _| Ok(json!({ "count": 3 })));
        let scene = Scene::new();
        let response = registry
            .execute("count", &scene, &Params::new())
            .expect("no fatal");
        assert_eq!(response["status"], "success");
        assert_eq!(response["count"], 3);
    }

    #[test]
    fn invalid_and_not_found_become_error_responses() {
        let mut registry = CommandRegistry::new();
        registry.register("bad", |_, _| {
            Err(CommandError::Invalid("x must be a number".to_string()))
        });
        registry.register("gone", |_, _| {
            Err(CommandError::NotFound("rigid body 'r9' not found".to_string()))
        });
        let scene = Scene::new();
        let bad = registry.execute("bad", &scene, &Params::new()).expect("no fatal");
        assert_eq!(bad["status"], "error");
        assert_eq!(bad["message"], "x must be a number");
        let gone = registry.execute("gone", &scene, &Params::new()).expect("no fatal");
        assert_eq!(gone["status"], "error");
    }

    #[test]
    fn fatal_errors_escape_execute() {
        let mut registry = CommandRegistry::new();
        registry.register("boom", |_, _| {
            Err(CommandError::Fatal("invariant broken".to_string()))
        });
        let scene = Scene::new();
        let err = registry
            .execute("boom", &scene, &Params::new())
            .expect_err("fatal should escape");
        assert_eq!(err.action, "boom");
        assert_eq!(err.message, "invariant broken");
    }

    #[test]
    fn re_registration_overwrites() {
        let mut registry = CommandRegistry::new();
        registry.register("ping", |_, _| Ok(json!({ "version": 1 })));
        registry.register("ping", |_, _| Ok(json!({ "version": 2 })));
        let scene = Scene::new();
        let response = registry
            .execute("ping", &scene, &Params::new())
            .expect("no fatal");
        assert_eq!(response["version"], 2);
    }

    #[test]
    fn quad_parsing_enforces_shape() {
        let ok = params(json!({ "points": [[0, 0], [1, 0], [1, 1], [0, 1]] }));
        let quad = require_quad(&ok, "points").expect("quad");
        assert_eq!(quad[2], Point2::new(1.0, 1.0));

        let short = params(json!({ "points": [[0, 0], [1, 0]] }));
        assert!(require_quad(&short, "points").is_err());

        let bad = params(json!({ "points": [[0, 0], [1, 0], [1, 1], "x"] }));
        assert!(require_quad(&bad, "points").is_err());
    }

    #[test]
    fn optional_extractors_treat_null_as_absent() {
        let p = params(json!({ "a": null, "b": 2.5 }));
        assert_eq!(opt_f64(&p, "a").expect("null"), None);
        assert_eq!(opt_f64(&p, "b").expect("number"), Some(2.5));
        assert_eq!(opt_f64(&p, "c").expect("absent"), None);
        assert!(opt_bool(&p, "b").is_err());
    }
}
