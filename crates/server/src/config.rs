use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use display::{CalibrationError, Field, Point2, Rgba, SCREEN_FIELD};

pub const DEFAULT_SOCKET_HOST: &str = "0.0.0.0";
pub const DEFAULT_SOCKET_PORT: u16 = 9999;
pub const DEFAULT_UPDATE_RATE: u32 = 30;
pub const DEFAULT_HISTORY_CAPACITY: usize = 10_000;
pub const DEFAULT_MOCAP_POLL_RATE: u32 = 30;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_path_to_error::Error<serde_yaml::Error>,
    },
    #[error("invalid calibration in {path}")]
    InvalidCalibration {
        path: PathBuf,
        #[source]
        source: CalibrationError,
    },
}

/// Server YAML config. Every section and field is optional; omissions fall
/// back to the defaults above.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub display: DisplaySection,
    #[serde(default)]
    pub history: HistorySection,
    #[serde(default)]
    pub mocap: MocapSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub socket_host: String,
    #[serde(default = "default_port")]
    pub socket_port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            socket_host: default_host(),
            socket_port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DisplaySection {
    #[serde(default = "default_update_rate")]
    pub update_rate: u32,
    #[serde(default = "default_background")]
    pub background_color: [u8; 4],
}

impl DisplaySection {
    pub fn background(&self) -> Rgba {
        let [r, g, b, a] = self.background_color;
        Rgba::new(r, g, b, a)
    }
}

impl Default for DisplaySection {
    fn default() -> Self {
        Self {
            update_rate: default_update_rate(),
            background_color: default_background(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HistorySection {
    #[serde(default = "default_history_capacity")]
    pub capacity: usize,
}

impl Default for HistorySection {
    fn default() -> Self {
        Self {
            capacity: default_history_capacity(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MocapSection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_mocap_poll_rate")]
    pub poll_rate: u32,
}

impl Default for MocapSection {
    fn default() -> Self {
        Self {
            enabled: false,
            poll_rate: default_mocap_poll_rate(),
        }
    }
}

fn default_host() -> String {
    DEFAULT_SOCKET_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_SOCKET_PORT
}

fn default_update_rate() -> u32 {
    DEFAULT_UPDATE_RATE
}

fn default_background() -> [u8; 4] {
    [0, 0, 0, 255]
}

fn default_history_capacity() -> usize {
    DEFAULT_HISTORY_CAPACITY
}

fn default_mocap_poll_rate() -> u32 {
    DEFAULT_MOCAP_POLL_RATE
}

/// Projector calibration file: display resolution and the quad mapping the
/// physical surface onto screen pixels. Corner lists are
/// `[BL, BR, TR, TL]`, counter-clockwise from bottom-left.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CalibrationFile {
    pub resolution: Resolution,
    pub screen_field: ScreenFieldSection,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScreenFieldSection {
    pub world_points: [[f64; 2]; 4],
    pub local_points: [[f64; 2]; 4],
}

impl CalibrationFile {
    /// The validated `"screen"` field this calibration describes.
    pub fn screen_field(&self) -> Result<Field, CalibrationError> {
        Field::new(
            SCREEN_FIELD,
            quad(&self.screen_field.world_points),
            quad(&self.screen_field.local_points),
        )
    }
}

fn quad(points: &[[f64; 2]; 4]) -> [Point2; 4] {
    [
        Point2::new(points[0][0], points[0][1]),
        Point2::new(points[1][0], points[1][1]),
        Point2::new(points[2][0], points[2][1]),
        Point2::new(points[3][0], points[3][1]),
    ]
}

pub fn load_config(path: &Path) -> Result<ServerConfig, ConfigError> {
    parse_yaml(path)
}

pub fn load_calibration(path: &Path) -> Result<CalibrationFile, ConfigError> {
    let calibration: CalibrationFile = parse_yaml(path)?;
    calibration
        .screen_field()
        .map_err(|source| ConfigError::InvalidCalibration {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(calibration)
}

fn parse_yaml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let deserializer = serde_yaml::Deserializer::from_str(&text);
    serde_path_to_error::deserialize(deserializer).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_temp(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("temp file");
        file.write_all(content.as_bytes()).expect("write");
        file
    }

    #[test]
    fn empty_config_uses_defaults() {
        let file = write_temp("{}");
        let config = load_config(file.path()).expect("load");
        assert_eq!(config.server.socket_host, DEFAULT_SOCKET_HOST);
        assert_eq!(config.server.socket_port, DEFAULT_SOCKET_PORT);
        assert_eq!(config.display.update_rate, DEFAULT_UPDATE_RATE);
        assert_eq!(config.history.capacity, DEFAULT_HISTORY_CAPACITY);
        assert!(!config.mocap.enabled);
    }

    #[test]
    fn partial_config_overrides_only_named_fields() {
        let file = write_temp(
            "server:\n  socket_port: 7001\ndisplay:\n  update_rate: 60\n",
        );
        let config = load_config(file.path()).expect("load");
        assert_eq!(config.server.socket_port, 7001);
        assert_eq!(config.server.socket_host, DEFAULT_SOCKET_HOST);
        assert_eq!(config.display.update_rate, 60);
        assert_eq!(config.display.background_color, [0, 0, 0, 255]);
    }

    #[test]
    fn unknown_config_keys_are_parse_errors() {
        let file = write_temp("server:\n  socket_prot: 7001\n");
        let err = load_config(file.path()).expect_err("should reject");
        assert!(matches!(err, ConfigError::Parse { .. }));
        // The path of the offending key shows up in the message chain.
        let message = format!("{err}");
        assert!(message.contains(file.path().display().to_string().as_str()));
    }

    #[test]
    fn calibration_file_round_trips_into_a_screen_field() {
        let file = write_temp(
            "resolution:\n  width: 1920\n  height: 1080\n\
             screen_field:\n\
             \x20 world_points: [[-1.0, -1.0], [1.0, -1.0], [1.0, 1.0], [-1.0, 1.0]]\n\
             \x20 local_points: [[0.0, 1080.0], [1920.0, 1080.0], [1920.0, 0.0], [0.0, 0.0]]\n",
        );
        let calibration = load_calibration(file.path()).expect("load");
        assert_eq!(calibration.resolution.width, 1920);
        let field = calibration.screen_field().expect("field");
        assert_eq!(field.name, SCREEN_FIELD);
        assert_eq!(field.local_points[3], Point2::new(0.0, 0.0));
    }

    #[test]
    fn calibration_with_skewed_local_quad_is_rejected() {
        let file = write_temp(
            "resolution:\n  width: 1920\n  height: 1080\n\
             screen_field:\n\
             \x20 world_points: [[-1.0, -1.0], [1.0, -1.0], [1.0, 1.0], [-1.0, 1.0]]\n\
             \x20 local_points: [[0.0, 1080.0], [1920.0, 1000.0], [1920.0, 0.0], [0.0, 0.0]]\n",
        );
        let err = load_calibration(file.path()).expect_err("should reject");
        assert!(matches!(err, ConfigError::InvalidCalibration { .. }));
    }

    #[test]
    fn missing_file_reports_read_error() {
        let err = load_config(Path::new("/nonexistent/projdisp.yaml")).expect_err("missing");
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
