use crate::config::MotionConfig;
use crate::frame::{CameraId, FrameData};
use crate::ring_buffer::PreCaptureRing;
use std::time::{Duration, SystemTime};
use tracing::{debug, info};
use uuid::Uuid;

/// Detector phase between frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorState {
    Idle,
    Candidate,
    Active,
    PostRoll,
}

/// Lifecycle of a single event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventState {
    Active,
    PostRoll,
    Closed,
}

/// A grouped span of motion with its pre- and post-roll frames
#[derive(Debug, Clone)]
pub struct MotionEvent {
    id: Uuid,
    camera_id: CameraId,
    state: EventState,
    started_at: SystemTime,
    last_motion: SystemTime,
    frames: Vec<FrameData>,
    pre_capture_frames: usize,
    merges: u32,
}

impl MotionEvent {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn camera_id(&self) -> &CameraId {
        &self.camera_id
    }

    pub fn state(&self) -> EventState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == EventState::Closed
    }

    /// Capture time of the first positive frame of the opening run
    pub fn started_at(&self) -> SystemTime {
        self.started_at
    }

    pub fn last_motion(&self) -> SystemTime {
        self.last_motion
    }

    /// Buffered frames in capture order
    pub fn frames(&self) -> &[FrameData] {
        &self.frames
    }

    pub fn into_frames(self) -> Vec<FrameData> {
        self.frames
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Frames taken from the pre-capture ring when the event opened
    pub fn pre_capture_frames(&self) -> usize {
        self.pre_capture_frames
    }

    /// Motion runs folded into this event after the first
    pub fn merges(&self) -> u32 {
        self.merges
    }

    /// Span covered by the buffered frames
    pub fn duration(&self) -> Duration {
        match (self.frames.first(), self.frames.last()) {
            (Some(first), Some(last)) => last.elapsed_since(first.timestamp),
            _ => Duration::ZERO,
        }
    }
}

/// Debounced motion event grouping for one camera.
///
/// Feed every frame with its motion verdict; a closed event is returned
/// from the call that closes it.
pub struct MotionStateMachine {
    camera_id: CameraId,
    minimum_motion_frames: usize,
    post_capture: u32,
    event_gap: Duration,
    ring: PreCaptureRing,
    state: DetectorState,
    run: Vec<FrameData>,
    event: Option<MotionEvent>,
    trailing: u32,
    /// Post-roll frames past the budget, kept until merge or close
    held: Vec<FrameData>,
    events_closed: u64,
}

impl MotionStateMachine {
    pub fn new(camera_id: CameraId, config: &MotionConfig) -> Self {
        Self {
            camera_id,
            minimum_motion_frames: config.minimum_motion_frames.max(1) as usize,
            post_capture: config.post_capture,
            event_gap: config.event_gap(),
            ring: PreCaptureRing::new(config.pre_capture as usize),
            state: DetectorState::Idle,
            run: Vec::new(),
            event: None,
            trailing: 0,
            held: Vec::new(),
            events_closed: 0,
        }
    }

    pub fn state(&self) -> DetectorState {
        self.state
    }

    /// Event currently being built, if any
    pub fn open_event(&self) -> Option<&MotionEvent> {
        self.event.as_ref()
    }

    pub fn events_closed(&self) -> u64 {
        self.events_closed
    }

    /// Advance with one analyzed frame
    pub fn process(&mut self, frame: FrameData, positive: bool) -> Option<MotionEvent> {
        match self.state {
            DetectorState::Idle | DetectorState::Candidate if positive => {
                self.run.push(frame);
                self.state = DetectorState::Candidate;
                if self.run.len() >= self.minimum_motion_frames {
                    self.open();
                }
                None
            }
            DetectorState::Idle => {
                self.ring.push(frame);
                None
            }
            DetectorState::Candidate => {
                debug!(
                    "Camera {}: motion run of {} frame(s) too short",
                    self.camera_id,
                    self.run.len()
                );
                for held in self.run.drain(..) {
                    self.ring.push(held);
                }
                self.ring.push(frame);
                self.state = DetectorState::Idle;
                None
            }
            DetectorState::Active if positive => {
                if let Some(event) = self.event.as_mut() {
                    event.last_motion = frame.timestamp;
                    event.frames.push(frame);
                }
                None
            }
            DetectorState::Active => {
                self.state = DetectorState::PostRoll;
                if let Some(event) = self.event.as_mut() {
                    event.state = EventState::PostRoll;
                }
                self.trailing = 0;
                self.post_roll(frame)
            }
            DetectorState::PostRoll if positive => {
                if self.gap_expired(&frame) {
                    // too late to merge: close, then start a new run
                    let closed = self.close();
                    self.process(frame, true);
                    return closed;
                }
                self.merge(frame);
                None
            }
            DetectorState::PostRoll => self.post_roll(frame),
        }
    }

    /// Close whatever is open, e.g. on shutdown. A candidate run is dropped.
    pub fn finish(&mut self) -> Option<MotionEvent> {
        match self.state {
            DetectorState::Active | DetectorState::PostRoll => self.close(),
            DetectorState::Candidate => {
                debug!(
                    "Camera {}: discarding unconfirmed motion run of {} frame(s)",
                    self.camera_id,
                    self.run.len()
                );
                self.run.clear();
                self.state = DetectorState::Idle;
                None
            }
            DetectorState::Idle => None,
        }
    }

    fn open(&mut self) {
        let pre = self.ring.drain();
        let pre_capture_frames = pre.len();
        let run = std::mem::take(&mut self.run);

        let (started_at, last_motion) = match (run.first(), run.last()) {
            (Some(first), Some(last)) => (first.timestamp, last.timestamp),
            _ => return,
        };

        let mut frames = pre;
        frames.extend(run);

        let event = MotionEvent {
            id: Uuid::new_v4(),
            camera_id: self.camera_id.clone(),
            state: EventState::Active,
            started_at,
            last_motion,
            frames,
            pre_capture_frames,
            merges: 0,
        };

        info!(
            "Camera {}: motion event {} opened with {} pre-capture frame(s)",
            self.camera_id, event.id, pre_capture_frames
        );

        self.event = Some(event);
        self.trailing = 0;
        self.state = DetectorState::Active;
    }

    fn post_roll(&mut self, frame: FrameData) -> Option<MotionEvent> {
        let last_motion = self.event.as_ref()?.last_motion;
        let quiet_for = frame.elapsed_since(last_motion);

        if self.trailing < self.post_capture {
            self.trailing += 1;
            if let Some(event) = self.event.as_mut() {
                event.frames.push(frame);
            }
        } else {
            self.held.push(frame);
        }

        if self.trailing >= self.post_capture && quiet_for >= self.event_gap {
            self.close()
        } else {
            None
        }
    }

    /// Post-capture budget used and `event_gap` passed since the last motion
    fn gap_expired(&self, frame: &FrameData) -> bool {
        self.event.as_ref().map_or(false, |event| {
            self.trailing >= self.post_capture
                && frame.elapsed_since(event.last_motion) >= self.event_gap
        })
    }

    fn merge(&mut self, frame: FrameData) {
        if let Some(event) = self.event.as_mut() {
            event.frames.append(&mut self.held);
            event.last_motion = frame.timestamp;
            event.frames.push(frame);
            event.merges += 1;
            event.state = EventState::Active;
            debug!(
                "Camera {}: motion resumed, merged into event {} ({} merge(s))",
                self.camera_id, event.id, event.merges
            );
        }
        self.trailing = 0;
        self.state = DetectorState::Active;
    }

    fn close(&mut self) -> Option<MotionEvent> {
        self.state = DetectorState::Idle;
        self.trailing = 0;
        // quiet frames after the event seed the next pre-capture
        for frame in self.held.drain(..) {
            self.ring.push(frame);
        }

        let mut event = self.event.take()?;
        event.state = EventState::Closed;
        self.events_closed += 1;

        info!(
            "Camera {}: motion event {} closed with {} frame(s) over {:?}",
            self.camera_id,
            event.id,
            event.frames.len(),
            event.duration()
        );
        Some(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameFormat;
    use std::sync::Arc;

    const FRAME_MS: u64 = 100;

    fn config(min: u32, pre: u32, post: u32, gap_secs: u64) -> MotionConfig {
        MotionConfig {
            enabled: true,
            minimum_motion_frames: min,
            pre_capture: pre,
            post_capture: post,
            event_gap: gap_secs,
            ..MotionConfig::default()
        }
    }

    fn frame_at(seq: u64, millis: u64) -> FrameData {
        FrameData::new(
            Arc::from("cam"),
            seq,
            SystemTime::UNIX_EPOCH + Duration::from_millis(millis),
            Vec::new(),
            0,
            0,
            FrameFormat::Mjpeg,
        )
    }

    /// Feed `pattern` ('+' positive, '-' negative) at 10fps starting at `first_seq`
    fn feed(machine: &mut MotionStateMachine, first_seq: u64, pattern: &str) -> Vec<MotionEvent> {
        pattern
            .chars()
            .enumerate()
            .filter_map(|(i, c)| {
                let seq = first_seq + i as u64;
                machine.process(frame_at(seq, seq * FRAME_MS), c == '+')
            })
            .collect()
    }

    fn seqs(event: &MotionEvent) -> Vec<u64> {
        event.frames().iter().map(|f| f.seq).collect()
    }

    fn machine(config: &MotionConfig) -> MotionStateMachine {
        MotionStateMachine::new(Arc::from("cam"), config)
    }

    #[test]
    fn test_short_runs_never_open() {
        let mut m = machine(&config(3, 5, 2, 1));

        assert!(feed(&mut m, 0, "++-++-+-++--").is_empty());
        assert_eq!(m.state(), DetectorState::Idle);
        assert!(m.open_event().is_none());
        assert!(m.finish().is_none());
    }

    #[test]
    fn test_event_opens_at_minimum_run() {
        let mut m = machine(&config(3, 2, 2, 1));

        feed(&mut m, 0, "---++");
        assert_eq!(m.state(), DetectorState::Candidate);

        feed(&mut m, 5, "+");
        assert_eq!(m.state(), DetectorState::Active);
        let event = m.open_event().unwrap();
        assert_eq!(seqs(event), vec![1, 2, 3, 4, 5]);
        assert_eq!(event.pre_capture_frames(), 2);
        assert_eq!(event.started_at(), SystemTime::UNIX_EPOCH + Duration::from_millis(300));
        assert_eq!(event.state(), EventState::Active);
    }

    #[test]
    fn test_closed_event_frame_set() {
        // event_gap is whole seconds; use a 1s gap at 10fps
        let mut m = machine(&config(3, 2, 3, 1));

        let events = feed(&mut m, 0, "-----+++-------------------");
        assert_eq!(events.len(), 1);

        let event = &events[0];
        // two pre-capture, the run, three post-capture
        assert_eq!(seqs(event), vec![3, 4, 5, 6, 7, 8, 9, 10]);
        assert!(event.is_closed());
        assert_eq!(event.merges(), 0);
        assert_eq!(event.last_motion(), SystemTime::UNIX_EPOCH + Duration::from_millis(700));
        assert_eq!(event.duration(), Duration::from_millis(700));
        assert_eq!(m.state(), DetectorState::Idle);
    }

    #[test]
    fn test_closes_once_budget_and_gap_both_expire() {
        let mut m = machine(&config(1, 0, 2, 1));

        // positive at seq 0; budget spent at seq 2; gap reached at seq 10
        let events = feed(&mut m, 0, "+--------");
        assert!(events.is_empty());
        assert_eq!(m.state(), DetectorState::PostRoll);

        let events = feed(&mut m, 9, "-");
        assert!(events.is_empty());
        let events = feed(&mut m, 10, "-");
        assert_eq!(events.len(), 1);
        assert_eq!(seqs(&events[0]), vec![0, 1, 2]);
    }

    #[test]
    fn test_renewed_motion_within_gap_merges() {
        let mut m = machine(&config(3, 2, 2, 1));

        let mut events = feed(&mut m, 0, "+++-----+++");
        assert!(events.is_empty());
        assert_eq!(m.state(), DetectorState::Active);

        events.extend(feed(&mut m, 11, "------------"));
        events.extend(m.finish());
        assert_eq!(events.len(), 1);

        let event = &events[0];
        assert_eq!(event.merges(), 1);
        // frames past the post-capture budget are folded back in on merge
        let expected: Vec<u64> = (0..=12).collect();
        assert_eq!(seqs(event), expected);
    }

    #[test]
    fn test_runs_beyond_gap_are_separate_events() {
        let mut m = machine(&config(3, 2, 2, 1));

        let events = feed(&mut m, 0, "+++------------+++------------");
        assert_eq!(events.len(), 2);

        assert_eq!(seqs(&events[0]), vec![0, 1, 2, 3, 4]);
        // second event's pre-capture comes from the frames after the first closed
        assert_eq!(seqs(&events[1]), vec![13, 14, 15, 16, 17, 18, 19]);
        assert_eq!(events[1].pre_capture_frames(), 2);
        assert_ne!(events[0].id(), events[1].id());
    }

    #[test]
    fn test_late_positive_after_expired_gap_starts_new_event() {
        let mut m = machine(&config(1, 0, 1, 1));

        assert!(m.process(frame_at(0, 0), true).is_none());
        assert!(m.process(frame_at(1, 100), false).is_none());
        assert_eq!(m.state(), DetectorState::PostRoll);

        // frames stalled for ten seconds, then motion again
        let closed = m.process(frame_at(2, 10_000), true).unwrap();
        assert_eq!(seqs(&closed), vec![0, 1]);
        assert_eq!(closed.merges(), 0);
        assert!(closed.is_closed());

        assert_eq!(m.state(), DetectorState::Active);
        let next = m.finish().unwrap();
        assert_eq!(seqs(&next), vec![2]);
        assert_eq!(next.merges(), 0);
        assert_eq!(m.events_closed(), 2);
    }

    #[test]
    fn test_gap_is_measured_in_capture_time() {
        let mut m = machine(&config(1, 0, 1, 2));

        assert!(m.process(frame_at(0, 0), true).is_none());
        // low frame rate: one post-capture frame, then a frame three seconds later
        assert!(m.process(frame_at(1, 500), false).is_none());
        let event = m.process(frame_at(2, 3_000), false).unwrap();
        assert_eq!(seqs(&event), vec![0, 1]);

        // high frame rate: many frames inside two seconds do not close it
        assert!(m.process(frame_at(3, 10_000), true).is_none());
        for seq in 4..40 {
            assert!(m.process(frame_at(seq, 10_000 + (seq - 3) * 50), false).is_none());
        }
        assert_eq!(m.state(), DetectorState::PostRoll);
    }

    #[test]
    fn test_interrupted_run_stays_in_pre_capture() {
        let mut m = machine(&config(3, 3, 0, 0));

        feed(&mut m, 0, "--++-+++");
        let event = m.open_event().unwrap();
        assert_eq!(seqs(event), vec![2, 3, 4, 5, 6, 7]);
        assert_eq!(event.started_at(), SystemTime::UNIX_EPOCH + Duration::from_millis(500));
    }

    #[test]
    fn test_zero_pre_and_post_capture() {
        let mut m = machine(&config(2, 0, 0, 0));

        let events = feed(&mut m, 0, "---++-");
        assert_eq!(events.len(), 1);
        assert_eq!(seqs(&events[0]), vec![3, 4]);
        assert_eq!(events[0].pre_capture_frames(), 0);
    }

    #[test]
    fn test_finish_closes_open_event_and_drops_candidate() {
        let mut m = machine(&config(2, 1, 5, 10));
        feed(&mut m, 0, "-+++--");
        assert_eq!(m.state(), DetectorState::PostRoll);

        let event = m.finish().unwrap();
        assert!(event.is_closed());
        assert_eq!(seqs(&event), vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(m.events_closed(), 1);

        let mut m = machine(&config(3, 1, 5, 10));
        feed(&mut m, 0, "-++");
        assert_eq!(m.state(), DetectorState::Candidate);
        assert!(m.finish().is_none());
        assert_eq!(m.state(), DetectorState::Idle);
    }

    #[test]
    fn test_every_pattern_opens_iff_minimum_run() {
        let length = 12;
        for bits in 0u32..(1 << length) {
            let pattern: String = (0..length)
                .map(|i| if bits & (1 << i) != 0 { '+' } else { '-' })
                .collect();

            let mut m = machine(&config(3, 2, 1, 0));
            let mut events = feed(&mut m, 0, &pattern);
            events.extend(m.finish());

            assert_eq!(
                !events.is_empty(),
                pattern.contains("+++"),
                "pattern {}",
                pattern
            );

            // strictly increasing within and across events
            let all: Vec<u64> = events.iter().flat_map(seqs).collect();
            assert!(all.windows(2).all(|w| w[0] < w[1]), "pattern {}", pattern);
        }
    }
}
