//! Projector scene server binary: loads config and calibration, owns the
//! scene, and runs the connection layer, the MoCap feed, and the render
//! loop until shutdown.

mod config;
mod mocap;
mod net;
mod render;

use std::env;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use display::{builtin_registry, Scene};

use config::{load_calibration, load_config, ServerConfig};
use mocap::NullSource;
use render::{HeadlessSink, RenderConfig};

const USAGE: &str = "\
projector scene server

USAGE:
    server [OPTIONS]

OPTIONS:
    --config <PATH>        server YAML config (default: built-in defaults,
                           or $PROJDISP_CONFIG)
    --calibration <PATH>   projector calibration YAML (or
                           $PROJDISP_CALIBRATION)
    --host <ADDR>          override the listen address
    --port <PORT>          override the listen port
    -h, --help             print this help
";

#[derive(Debug, Default)]
struct Options {
    config: Option<PathBuf>,
    calibration: Option<PathBuf>,
    host: Option<String>,
    port: Option<u16>,
}

fn parse_args(args: &[String]) -> Result<Option<Options>, String> {
    let mut options = Options {
        config: env::var_os("PROJDISP_CONFIG").map(PathBuf::from),
        calibration: env::var_os("PROJDISP_CALIBRATION").map(PathBuf::from),
        ..Options::default()
    };
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-h" | "--help" => return Ok(None),
            "--config" => {
                let value = iter.next().ok_or("--config requires a path")?;
                options.config = Some(PathBuf::from(value));
            }
            "--calibration" => {
                let value = iter.next().ok_or("--calibration requires a path")?;
                options.calibration = Some(PathBuf::from(value));
            }
            "--host" => {
                let value = iter.next().ok_or("--host requires an address")?;
                options.host = Some(value.clone());
            }
            "--port" => {
                let value = iter.next().ok_or("--port requires a number")?;
                let port: u16 = value
                    .parse()
                    .map_err(|_| format!("invalid port '{value}'"))?;
                options.port = Some(port);
            }
            other => return Err(format!("unknown argument '{other}'")),
        }
    }
    Ok(Some(options))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .compact()
        .init();
}

fn load_server_config(path: Option<&Path>) -> Result<ServerConfig, String> {
    match path {
        Some(path) => load_config(path).map_err(|err| format!("{err}")),
        None => {
            info!("no_config_given_using_defaults");
            Ok(ServerConfig::default())
        }
    }
}

fn run(options: Options) -> Result<ExitCode, String> {
    let config = load_server_config(options.config.as_deref())?;
    let host = options
        .host
        .unwrap_or_else(|| config.server.socket_host.clone());
    let port = options.port.unwrap_or(config.server.socket_port);

    let mut render_config = RenderConfig {
        update_rate: config.display.update_rate,
        ..RenderConfig::default()
    };

    let scene = Arc::new(Scene::with_history_capacity(config.history.capacity));
    match options.calibration.as_deref() {
        Some(path) => {
            let calibration = load_calibration(path).map_err(|err| format!("{err}"))?;
            render_config.width = calibration.resolution.width;
            render_config.height = calibration.resolution.height;
            let screen = calibration
                .screen_field()
                .map_err(|err| format!("{err}"))?;
            scene
                .create_field(&screen.name, screen.world_points, screen.local_points)
                .map_err(|err| format!("{err}"))?;
            info!(path = %path.display(), "calibration_loaded");
        }
        None => {
            warn!("no_calibration_loaded");
        }
    }

    let registry = Arc::new(builtin_registry());
    let shutdown = Arc::new(AtomicBool::new(false));

    let server = net::spawn(
        Arc::clone(&scene),
        registry,
        Arc::clone(&shutdown),
        &host,
        port,
    )
    .map_err(|err| format!("failed to bind {host}:{port}: {err}"))?;

    let mocap_handle = if config.mocap.enabled {
        Some(mocap::spawn_feed(
            Arc::clone(&scene),
            Box::new(NullSource),
            config.mocap.poll_rate,
            Arc::clone(&shutdown),
        ))
    } else {
        None
    };

    // The render loop owns the main thread until shutdown.
    let mut sink = HeadlessSink::new();
    render::run_render_loop(&scene, &mut sink, render_config, &shutdown);

    let had_fatal = server.had_fatal();
    server.join();
    if let Some(handle) = mocap_handle {
        let _ = handle.join();
    }

    if had_fatal {
        error!("server_stopped_after_fatal_command");
        Ok(ExitCode::from(1))
    } else {
        info!("server_stopped");
        Ok(ExitCode::SUCCESS)
    }
}

fn main() -> ExitCode {
    init_tracing();
    let args: Vec<String> = env::args().skip(1).collect();
    let options = match parse_args(&args) {
        Ok(Some(options)) => options,
        Ok(None) => {
            print!("{USAGE}");
            return ExitCode::SUCCESS;
        }
        Err(message) => {
            eprintln!("error: {message}");
            eprint!("{USAGE}");
            return ExitCode::from(2);
        }
    };
    match run(options) {
        Ok(code) => code,
        Err(message) => {
            error!(error = %message, "startup_failed");
            ExitCode::from(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_overrides() {
        let options = parse_args(&args(&["--host", "127.0.0.1", "--port", "7500"]))
            .expect("parse")
            .expect("not help");
        assert_eq!(options.host.as_deref(), Some("127.0.0.1"));
        assert_eq!(options.port, Some(7500));
    }

    #[test]
    fn help_short_circuits() {
        assert!(parse_args(&args(&["--help"])).expect("parse").is_none());
    }

    #[test]
    fn rejects_unknown_arguments_and_bad_ports() {
        assert!(parse_args(&args(&["--verbose"])).is_err());
        assert!(parse_args(&args(&["--port", "not-a-port"])).is_err());
        assert!(parse_args(&args(&["--config"])).is_err());
    }
}
