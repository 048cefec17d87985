use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use display::{
    epoch_seconds, FieldCalibrator, FrameItem, Point2, Scene, BASE_FIELD, SCREEN_FIELD,
};

#[derive(Debug, Clone, Copy)]
pub struct RenderConfig {
    pub update_rate: u32,
    pub width: u32,
    pub height: u32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            update_rate: crate::config::DEFAULT_UPDATE_RATE,
            width: 1920,
            height: 1080,
        }
    }
}

/// World-to-pixel mapping for one frame, built from the snapshot's
/// calibrator so it cannot change mid-frame.
pub struct Projection {
    calibrator: FieldCalibrator,
    width: u32,
    height: u32,
}

impl Projection {
    pub fn new(calibrator: FieldCalibrator, width: u32, height: u32) -> Self {
        Self {
            calibrator,
            width,
            height,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Pixel position of a world point. Before a screen field is
    /// calibrated everything lands on the display center, which keeps the
    /// output visibly wrong instead of invisibly misplaced.
    pub fn world_to_screen(&self, point: Point2) -> (i32, i32) {
        match self.calibrator.convert(point, BASE_FIELD, SCREEN_FIELD) {
            Ok(p) => (p.x.round() as i32, p.y.round() as i32),
            Err(_) => ((self.width / 2) as i32, (self.height / 2) as i32),
        }
    }

    /// Pixel length of a world distance at a world position.
    pub fn scale(&self, position: Point2, distance: f64) -> f64 {
        self.calibrator.distance_to_pixels(position, distance)
    }

    /// Screen-space angle of a world angle at a world position. Without a
    /// screen field the angle passes through unchanged.
    pub fn orientation_to_screen(&self, position: Point2, angle: f64) -> f64 {
        self.calibrator
            .transform_orientation(BASE_FIELD, SCREEN_FIELD, position, angle)
            .unwrap_or(angle)
    }
}

/// Output target of the render loop. The loop owns the pacing and the
/// snapshot; implementations only turn items into pixels (or logs).
pub trait FrameSink {
    fn begin_frame(&mut self, timestamp: f64);
    fn draw(&mut self, item: &FrameItem, projection: &Projection);
    fn present(&mut self);
}

/// Fixed-rate loop: one snapshot, one projection, one pass over the items
/// per tick. Runs until the shutdown flag flips.
pub fn run_render_loop(
    scene: &Scene,
    sink: &mut dyn FrameSink,
    config: RenderConfig,
    shutdown: &AtomicBool,
) {
    let rate = config.update_rate.max(1);
    let tick = Duration::from_secs_f64(1.0 / f64::from(rate));
    info!(update_rate = rate, "render_loop_started");

    while !shutdown.load(Ordering::SeqCst) {
        let started = Instant::now();
        render_frame(scene, sink, &config);
        let elapsed = started.elapsed();
        if let Some(remaining) = tick.checked_sub(elapsed) {
            std::thread::sleep(remaining);
        } else {
            warn!(elapsed_ms = elapsed.as_millis() as u64, "frame_overran_tick");
        }
    }
    info!("render_loop_stopped");
}

pub fn render_frame(scene: &Scene, sink: &mut dyn FrameSink, config: &RenderConfig) {
    let snapshot = scene.frame_snapshot();
    let projection = Projection::new(snapshot.calibrator.clone(), config.width, config.height);
    sink.begin_frame(snapshot.timestamp);
    for item in &snapshot.items {
        sink.draw(item, &projection);
    }
    sink.present();
}

/// Sink for deployments without a projector attached (and for soak tests):
/// renders nothing, logs a frame summary, keeps the loop timing honest.
#[derive(Debug, Default)]
pub struct HeadlessSink {
    frames: u64,
    bodies: usize,
    drawings: usize,
}

impl HeadlessSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }
}

impl FrameSink for HeadlessSink {
    fn begin_frame(&mut self, _timestamp: f64) {
        self.bodies = 0;
        self.drawings = 0;
    }

    fn draw(&mut self, item: &FrameItem, projection: &Projection) {
        match item {
            FrameItem::Body(body) => {
                self.bodies += 1;
                if let Some(position) = body.position {
                    let (x, y) = projection.world_to_screen(position);
                    let trajectory = body.trajectory_points(epoch_seconds()).len();
                    debug!(
                        body = %body.name,
                        x,
                        y,
                        trajectory_points = trajectory,
                        "headless_body"
                    );
                }
            }
            FrameItem::Drawing(drawing) => {
                self.drawings += 1;
                let (x, y) = projection.world_to_screen(drawing.position);
                debug!(drawing = %drawing.id, x, y, "headless_drawing");
            }
        }
    }

    fn present(&mut self) {
        self.frames += 1;
        debug!(
            frame = self.frames,
            bodies = self.bodies,
            drawings = self.drawings,
            "headless_frame"
        );
    }
}
