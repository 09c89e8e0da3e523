use crate::frame::{CameraId, FrameData};
use crossbeam::queue::ArrayQueue;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

/// Consumer classes served by the hub
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriberKind {
    /// Live view transport, latest frame only
    Stream,
    /// Motion detector, latest frame only
    Motion,
    /// Continuous recorder, bounded queue
    Recorder,
}

impl SubscriberKind {
    pub fn tolerates_drops(&self) -> bool {
        !matches!(self, SubscriberKind::Recorder)
    }
}

/// Per-camera fan-out of captured frames.
///
/// `publish` never waits on a consumer: drop-tolerant subscribers share a
/// single overwrite slot, recorders each get a bounded queue that discards
/// its oldest frame when full.
pub struct FrameHub {
    camera_id: CameraId,
    latest: watch::Sender<Option<FrameData>>,
    queues: RwLock<Vec<Arc<RecorderQueue>>>,
    queue_depth: usize,
    frames_published: AtomicU64,
    frames_dropped: AtomicU64,
}

/// Snapshot of hub counters
#[derive(Debug, Clone, Default)]
pub struct HubStats {
    pub frames_published: u64,
    pub recorder_frames_dropped: u64,
    pub recorder_subscribers: usize,
}

struct RecorderQueue {
    frames: ArrayQueue<FrameData>,
    notify: Notify,
    closed: AtomicBool,
}

impl FrameHub {
    pub fn new(camera_id: CameraId, queue_depth: usize) -> Self {
        let (latest, _) = watch::channel(None);
        debug!(
            "Created frame hub for camera {} (recorder queue depth {})",
            camera_id, queue_depth
        );

        Self {
            camera_id,
            latest,
            queues: RwLock::new(Vec::new()),
            queue_depth: queue_depth.max(1),
            frames_published: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
        }
    }

    pub fn camera_id(&self) -> &CameraId {
        &self.camera_id
    }

    /// Register a consumer of the given class
    pub fn subscribe(&self, kind: SubscriberKind) -> Subscription {
        match kind {
            SubscriberKind::Stream | SubscriberKind::Motion => {
                Subscription::Latest(LatestSubscription {
                    kind,
                    rx: self.latest.subscribe(),
                })
            }
            SubscriberKind::Recorder => {
                let queue = Arc::new(RecorderQueue {
                    frames: ArrayQueue::new(self.queue_depth),
                    notify: Notify::new(),
                    closed: AtomicBool::new(false),
                });
                self.queues.write().push(Arc::clone(&queue));
                Subscription::Queued(QueueSubscription {
                    camera_id: self.camera_id.clone(),
                    queue,
                    last_seq: None,
                    frames_missed: 0,
                })
            }
        }
    }

    /// Hand a frame to every subscriber. Frames are shared, not copied.
    pub fn publish(&self, frame: FrameData) {
        trace!("Publishing frame {} for camera {}", frame.seq, self.camera_id);

        let mut prune = false;
        for queue in self.queues.read().iter() {
            if queue.closed.load(Ordering::Relaxed) {
                prune = true;
                continue;
            }
            if queue.frames.force_push(frame.clone()).is_some() {
                self.frames_dropped.fetch_add(1, Ordering::Relaxed);
            }
            queue.notify.notify_one();
        }

        if prune {
            self.queues
                .write()
                .retain(|queue| !queue.closed.load(Ordering::Relaxed));
        }

        self.latest.send_replace(Some(frame));
        self.frames_published.fetch_add(1, Ordering::Relaxed);
    }

    /// Newest frame published, if any
    pub fn latest_frame(&self) -> Option<FrameData> {
        self.latest.borrow().clone()
    }

    pub fn stats(&self) -> HubStats {
        HubStats {
            frames_published: self.frames_published.load(Ordering::Relaxed),
            recorder_frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            recorder_subscribers: self.queues.read().len(),
        }
    }
}

/// Handle held by one consumer; the variant follows the consumer class
pub enum Subscription {
    Latest(LatestSubscription),
    Queued(QueueSubscription),
}

impl Subscription {
    pub fn kind(&self) -> SubscriberKind {
        match self {
            Subscription::Latest(sub) => sub.kind,
            Subscription::Queued(_) => SubscriberKind::Recorder,
        }
    }

    /// Next frame if one is ready, without waiting
    pub fn poll(&mut self) -> Option<FrameData> {
        match self {
            Subscription::Latest(sub) => sub.poll(),
            Subscription::Queued(sub) => sub.poll(),
        }
    }

    /// Wait up to `timeout` for the next frame
    pub async fn next_timeout(&mut self, timeout: Duration) -> Option<FrameData> {
        match self {
            Subscription::Latest(sub) => sub.next_timeout(timeout).await,
            Subscription::Queued(sub) => sub.next_timeout(timeout).await,
        }
    }

    pub fn into_queued(self) -> Option<QueueSubscription> {
        match self {
            Subscription::Queued(sub) => Some(sub),
            Subscription::Latest(_) => None,
        }
    }
}

/// Last-write-wins view of the newest frame
pub struct LatestSubscription {
    kind: SubscriberKind,
    rx: watch::Receiver<Option<FrameData>>,
}

impl LatestSubscription {
    /// Newest frame not yet seen by this subscriber
    pub fn poll(&mut self) -> Option<FrameData> {
        if self.rx.has_changed().unwrap_or(false) {
            self.rx.borrow_and_update().clone()
        } else {
            None
        }
    }

    pub async fn next_timeout(&mut self, timeout: Duration) -> Option<FrameData> {
        if let Some(frame) = self.poll() {
            return Some(frame);
        }

        match tokio::time::timeout(timeout, self.rx.changed()).await {
            Ok(Ok(())) => self.rx.borrow_and_update().clone(),
            Ok(Err(_)) | Err(_) => None,
        }
    }
}

/// Result of reading the recorder queue
#[derive(Debug)]
pub enum QueueRead {
    Frame(FrameData),
    /// Frames were discarded before this one
    Gap { missed: u64, frame: FrameData },
    Empty,
}

/// Ordered, bounded view used by the continuous recorder
pub struct QueueSubscription {
    camera_id: CameraId,
    queue: Arc<RecorderQueue>,
    last_seq: Option<u64>,
    frames_missed: u64,
}

impl QueueSubscription {
    pub fn read(&mut self) -> QueueRead {
        let Some(frame) = self.queue.frames.pop() else {
            return QueueRead::Empty;
        };

        let missed = match self.last_seq {
            Some(prev) if frame.seq > prev + 1 => frame.seq - prev - 1,
            _ => 0,
        };
        self.last_seq = Some(frame.seq);

        if missed > 0 {
            self.frames_missed += missed;
            QueueRead::Gap { missed, frame }
        } else {
            QueueRead::Frame(frame)
        }
    }

    pub fn poll(&mut self) -> Option<FrameData> {
        match self.read() {
            QueueRead::Frame(frame) => Some(frame),
            QueueRead::Gap { missed, frame } => {
                warn!(
                    "Recorder for camera {} fell behind: {} frame(s) dropped before frame {}",
                    self.camera_id, missed, frame.seq
                );
                Some(frame)
            }
            QueueRead::Empty => None,
        }
    }

    pub async fn next_timeout(&mut self, timeout: Duration) -> Option<FrameData> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(frame) = self.poll() {
                return Some(frame);
            }
            if tokio::time::timeout_at(deadline, self.queue.notify.notified())
                .await
                .is_err()
            {
                return self.poll();
            }
        }
    }

    /// Frames currently waiting
    pub fn backlog(&self) -> usize {
        self.queue.frames.len()
    }

    /// Total frames this subscriber lost to the drop-oldest policy
    pub fn frames_missed(&self) -> u64 {
        self.frames_missed
    }
}

impl Drop for QueueSubscription {
    fn drop(&mut self) {
        self.queue.closed.store(true, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameFormat;
    use std::time::SystemTime;

    fn frame(seq: u64) -> FrameData {
        FrameData::new(
            Arc::from("cam"),
            seq,
            SystemTime::now(),
            vec![0u8; 64 * 48],
            64,
            48,
            FrameFormat::Gray8,
        )
    }

    #[tokio::test]
    async fn test_latest_subscriber_sees_newest_only() {
        let hub = FrameHub::new(Arc::from("cam"), 8);
        let mut motion = hub.subscribe(SubscriberKind::Motion);
        assert_eq!(motion.kind(), SubscriberKind::Motion);
        assert!(motion.poll().is_none());

        for seq in 1..=5 {
            hub.publish(frame(seq));
        }

        assert_eq!(motion.poll().map(|f| f.seq), Some(5));
        // already seen
        assert!(motion.poll().is_none());
        assert_eq!(hub.latest_frame().map(|f| f.seq), Some(5));
    }

    #[tokio::test]
    async fn test_frames_are_shared_not_copied() {
        let hub = FrameHub::new(Arc::from("cam"), 8);
        let mut stream = hub.subscribe(SubscriberKind::Stream);
        let mut recorder = hub.subscribe(SubscriberKind::Recorder);

        let original = frame(1);
        hub.publish(original.clone());

        let a = stream.poll().unwrap();
        let b = recorder.poll().unwrap();
        assert!(Arc::ptr_eq(&a.data, &original.data));
        assert!(Arc::ptr_eq(&b.data, &original.data));
    }

    #[tokio::test]
    async fn test_recorder_queue_in_order() {
        let hub = FrameHub::new(Arc::from("cam"), 16);
        let mut recorder = hub.subscribe(SubscriberKind::Recorder);

        for seq in 0..10 {
            hub.publish(frame(seq));
        }

        let seqs: Vec<u64> = std::iter::from_fn(|| recorder.poll()).map(|f| f.seq).collect();
        assert_eq!(seqs, (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_recorder_queue_drops_oldest_and_reports_gap() {
        let hub = FrameHub::new(Arc::from("cam"), 4);
        let mut recorder = hub.subscribe(SubscriberKind::Recorder).into_queued().unwrap();

        hub.publish(frame(0));
        assert!(matches!(recorder.read(), QueueRead::Frame(f) if f.seq == 0));

        for seq in 1..=10 {
            hub.publish(frame(seq));
        }

        match recorder.read() {
            QueueRead::Gap { missed, frame } => {
                assert_eq!(frame.seq, 7);
                assert_eq!(missed, 6);
            }
            other => panic!("expected gap, got {:?}", other),
        }
        assert!(matches!(recorder.read(), QueueRead::Frame(f) if f.seq == 8));
        assert!(matches!(recorder.read(), QueueRead::Frame(f) if f.seq == 9));
        assert!(matches!(recorder.read(), QueueRead::Frame(f) if f.seq == 10));
        assert!(matches!(recorder.read(), QueueRead::Empty));

        assert_eq!(recorder.frames_missed(), 6);
        assert_eq!(hub.stats().recorder_frames_dropped, 6);
    }

    #[tokio::test]
    async fn test_slow_consumer_never_blocks_publish() {
        let hub = Arc::new(FrameHub::new(Arc::from("cam"), 4));
        let mut slow_stream = hub.subscribe(SubscriberKind::Stream);
        let _slow_recorder = hub.subscribe(SubscriberKind::Recorder);

        let mut worst = Duration::ZERO;
        for seq in 0..2_000 {
            let start = std::time::Instant::now();
            hub.publish(frame(seq));
            worst = worst.max(start.elapsed());
        }

        assert!(worst < Duration::from_millis(50), "publish took {:?}", worst);
        assert_eq!(slow_stream.poll().map(|f| f.seq), Some(1_999));
        assert_eq!(hub.stats().frames_published, 2_000);
    }

    #[tokio::test]
    async fn test_next_timeout_wakes_on_publish() {
        let hub = Arc::new(FrameHub::new(Arc::from("cam"), 4));
        let mut recorder = hub.subscribe(SubscriberKind::Recorder);
        let mut motion = hub.subscribe(SubscriberKind::Motion);

        assert!(recorder.next_timeout(Duration::from_millis(20)).await.is_none());
        assert!(motion.next_timeout(Duration::from_millis(20)).await.is_none());

        let publisher = Arc::clone(&hub);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            publisher.publish(frame(42));
        });

        let got = recorder.next_timeout(Duration::from_secs(2)).await;
        assert_eq!(got.map(|f| f.seq), Some(42));
        let got = motion.next_timeout(Duration::from_secs(2)).await;
        assert_eq!(got.map(|f| f.seq), Some(42));
    }

    #[tokio::test]
    async fn test_dropped_recorder_is_pruned() {
        let hub = FrameHub::new(Arc::from("cam"), 4);
        let recorder = hub.subscribe(SubscriberKind::Recorder);
        assert_eq!(hub.stats().recorder_subscribers, 1);

        drop(recorder);
        hub.publish(frame(1));
        assert_eq!(hub.stats().recorder_subscribers, 0);
    }
}
