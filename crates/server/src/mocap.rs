use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

use display::{Scene, SceneError};

/// One streamed pose. `tracked == false` means the capture system lost the
/// markers this cycle; the pose fields are stale and must not be applied.
#[derive(Debug, Clone, PartialEq)]
pub struct MocapSample {
    pub name: String,
    pub x: f64,
    pub y: f64,
    pub yaw: f64,
    pub tracked: bool,
}

/// Source of motion-capture samples, polled at a fixed rate from a
/// dedicated thread. Implementations own their transport.
pub trait MocapSource: Send {
    /// The latest sample per tracked object. May be empty on cycles where
    /// nothing arrived.
    fn poll(&mut self) -> Vec<MocapSample>;
}

/// Stand-in source for deployments without a capture system attached.
#[derive(Debug, Default)]
pub struct NullSource;

impl MocapSource for NullSource {
    fn poll(&mut self) -> Vec<MocapSample> {
        Vec::new()
    }
}

/// Spawns the feed thread: poll the source, apply tracked samples to every
/// auto-tracked body bound to that stream name, flag the rest as lost.
pub fn spawn_feed(
    scene: Arc<Scene>,
    mut source: Box<dyn MocapSource>,
    poll_rate: u32,
    shutdown: Arc<AtomicBool>,
) -> JoinHandle<()> {
    let interval = Duration::from_secs_f64(1.0 / f64::from(poll_rate.max(1)));
    thread::spawn(move || {
        info!(poll_rate = poll_rate.max(1), "mocap_feed_started");
        while !shutdown.load(Ordering::SeqCst) {
            let samples = source.poll();
            apply_samples(&scene, &samples);
            thread::sleep(interval);
        }
        info!("mocap_feed_stopped");
    })
}

/// One feed cycle against the scene. Bodies with `auto_track` and a
/// `mocap_name` that matched no tracked sample are marked lost so the
/// renderer can show it; everything else is left alone.
pub fn apply_samples(scene: &Scene, samples: &[MocapSample]) {
    for (name, body) in scene.bodies_snapshot() {
        if !body.auto_track {
            continue;
        }
        let Some(mocap_name) = body.mocap_name.as_deref() else {
            continue;
        };
        let sample = samples
            .iter()
            .find(|s| s.name == mocap_name && s.tracked);
        let result = match sample {
            Some(sample) => {
                debug!(body = %name, stream = %mocap_name, "mocap_pose_applied");
                scene
                    .update_position(&name, sample.x, sample.y, Some(sample.yaw))
                    .and_then(|()| scene.set_tracking_lost(&name, false))
            }
            None => scene.set_tracking_lost(&name, true),
        };
        // A body removed between the snapshot and the write is not an
        // error; any other failure is worth a log line.
        match result {
            Ok(()) | Err(SceneError::BodyNotFound(_)) => {}
            Err(err) => warn!(body = %name, error = %err, "mocap_apply_failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use display::{BodyStyle, TrajectoryStyle};

    fn tracked_body(scene: &Scene, name: &str, stream: &str) {
        scene
            .create_rigidbody(
                name,
                BodyStyle::default(),
                TrajectoryStyle::default(),
                Some(stream.to_string()),
                true,
            )
            .expect("create body");
    }

    fn sample(name: &str, x: f64, y: f64, tracked: bool) -> MocapSample {
        MocapSample {
            name: name.to_string(),
            x,
            y,
            yaw: 0.25,
            tracked,
        }
    }

    #[test]
    fn tracked_sample_updates_bound_body() {
        let scene = Scene::new();
        tracked_body(&scene, "rover", "RB_7");
        apply_samples(&scene, &[sample("RB_7", 1.5, -0.5, true)]);
        let body = scene.body_snapshot("rover").expect("snapshot");
        assert_eq!(body.position.expect("position").x, 1.5);
        assert!((body.effective_orientation() - 0.25).abs() < 1e-12);
        assert!(!body.tracking_lost);
    }

    #[test]
    fn missing_stream_marks_body_lost_but_keeps_pose() {
        let scene = Scene::new();
        tracked_body(&scene, "rover", "RB_7");
        apply_samples(&scene, &[sample("RB_7", 1.0, 1.0, true)]);
        apply_samples(&scene, &[]);
        let body = scene.body_snapshot("rover").expect("snapshot");
        assert!(body.tracking_lost);
        assert_eq!(body.position.expect("position").x, 1.0);
    }

    #[test]
    fn untracked_sample_is_treated_as_lost() {
        let scene = Scene::new();
        tracked_body(&scene, "rover", "RB_7");
        apply_samples(&scene, &[sample("RB_7", 9.0, 9.0, false)]);
        let body = scene.body_snapshot("rover").expect("snapshot");
        assert!(body.tracking_lost);
        assert_eq!(body.position, None);
    }

    #[test]
    fn manual_bodies_are_untouched() {
        let scene = Scene::new();
        scene
            .create_rigidbody(
                "manual",
                BodyStyle::default(),
                TrajectoryStyle::default(),
                Some("RB_7".to_string()),
                false,
            )
            .expect("create body");
        apply_samples(&scene, &[sample("RB_7", 3.0, 3.0, true)]);
        let body = scene.body_snapshot("manual").expect("snapshot");
        assert_eq!(body.position, None);
        assert!(!body.tracking_lost);
    }

    #[test]
    fn feed_thread_applies_scripted_samples_and_stops() {
        struct Scripted {
            remaining: Vec<Vec<MocapSample>>,
        }
        impl MocapSource for Scripted {
            fn poll(&mut self) -> Vec<MocapSample> {
                if self.remaining.is_empty() {
                    Vec::new()
                } else {
                    self.remaining.remove(0)
                }
            }
        }

        let scene = Arc::new(Scene::new());
        tracked_body(&scene, "rover", "RB_7");
        let shutdown = Arc::new(AtomicBool::new(false));
        let source = Scripted {
            remaining: vec![vec![sample("RB_7", 2.0, 4.0, true)]],
        };
        let handle = spawn_feed(
            Arc::clone(&scene),
            Box::new(source),
            200,
            Arc::clone(&shutdown),
        );

        for _ in 0..100 {
            if scene
                .body_snapshot("rover")
                .and_then(|b| b.position)
                .is_some()
            {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        shutdown.store(true, Ordering::SeqCst);
        handle.join().expect("feed thread");
        let body = scene.body_snapshot("rover").expect("snapshot");
        assert_eq!(body.position.expect("position"), display::Point2::new(2.0, 4.0));
    }
}
