use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Stream server statistics and monitoring
#[derive(Debug, Default)]
pub struct StreamStats {
    pub active_connections: AtomicU32,
    pub total_connections: AtomicU64,
    pub frames_streamed: AtomicU64,
    pub bytes_streamed: AtomicU64,
    pub errors: AtomicU64,
}

impl StreamStats {
    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "active_connections": self.active_connections.load(Ordering::Relaxed),
            "total_connections": self.total_connections.load(Ordering::Relaxed),
            "frames_streamed": self.frames_streamed.load(Ordering::Relaxed),
            "bytes_streamed": self.bytes_streamed.load(Ordering::Relaxed),
            "errors": self.errors.load(Ordering::Relaxed),
        })
    }
}

/// Counts one open stream for as long as it lives
pub(crate) struct ConnectionGuard {
    stats: Arc<StreamStats>,
}

impl ConnectionGuard {
    pub(crate) fn new(stats: Arc<StreamStats>) -> Self {
        stats.active_connections.fetch_add(1, Ordering::Relaxed);
        stats.total_connections.fetch_add(1, Ordering::Relaxed);
        Self { stats }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.stats.active_connections.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Frames per second over roughly the last second
#[derive(Debug)]
pub(crate) struct FpsMeter {
    window_start: Instant,
    window_frames: u32,
    current: f64,
}

impl FpsMeter {
    pub(crate) fn new() -> Self {
        Self {
            window_start: Instant::now(),
            window_frames: 0,
            current: 0.0,
        }
    }

    pub(crate) fn tick(&mut self) -> f64 {
        self.window_frames += 1;
        let elapsed = self.window_start.elapsed().as_secs_f64();
        if elapsed >= 1.0 {
            self.current = self.window_frames as f64 / elapsed;
            self.window_frames = 0;
            self.window_start = Instant::now();
        }
        self.current
    }
}
