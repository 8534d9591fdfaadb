use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use live_scan_common::config::MotionConfig;
use live_scan_common::frame::{EncodedImage, Frame};
use live_scan_scanner::classify::{ClassifyError, Classifier, FoodAnalysis, FoodItem};
use live_scan_scanner::sampler::FrameSampling;
use live_scan_scanner::session::{ScanEvent, ScanSession, ScanStatus};
use tokio::sync::{broadcast, Notify};
use tokio::time::Instant;

/// Uniform gray frames whose consecutive differences follow a script, then
/// repeat the last frame forever.
struct ScriptedCamera {
    frames: Mutex<VecDeque<Frame>>,
    last: Mutex<Frame>,
}

impl ScriptedCamera {
    fn new(levels: &[u8]) -> Self {
        let mut gray = 0u8;
        let mut frames = VecDeque::from([Frame::solid(64, 48, gray)]);
        for &level in levels {
            gray = if gray as u16 + level as u16 <= 255 { gray + level } else { gray - level };
            frames.push_back(Frame::solid(64, 48, gray));
        }
        Self {
            frames: Mutex::new(frames),
            last: Mutex::new(Frame::solid(64, 48, gray)),
        }
    }

    fn still() -> Self {
        Self::new(&[])
    }

    fn shake(&self, level: u8) {
        let mut last = self.last.lock().unwrap();
        let gray = last.rgba[0];
        let next = if gray as u16 + level as u16 <= 255 { gray + level } else { gray - level };
        *last = Frame::solid(64, 48, next);
        self.frames.lock().unwrap().push_back(last.clone());
    }
}

impl FrameSampling for ScriptedCamera {
    fn sample_low_res(&self) -> Option<Frame> {
        let next = self.frames.lock().unwrap().pop_front();
        Some(next.unwrap_or_else(|| self.last.lock().unwrap().clone()))
    }

    fn sample_for_submission(&self) -> Option<EncodedImage> {
        Some(EncodedImage {
            bytes: vec![0xFF, 0xD8, 0xFF, 0xD9],
            width: 64,
            height: 48,
            captured_at_ms: 0,
        })
    }

    fn sample_frame(&self) -> Option<Frame> {
        Some(self.last.lock().unwrap().clone())
    }
}

fn apple() -> FoodAnalysis {
    FoodAnalysis {
        food_detected: true,
        items: vec![FoodItem {
            name: "apple".into(),
            portion: None,
            estimated_calories: 95.0,
        }],
        total_calories: 95.0,
        confidence_score: None,
        macros: None,
        disclaimer: None,
    }
}

#[derive(Clone, Copy)]
enum Reply {
    Apple,
    Fail,
}

/// Test classifier: counts calls, tracks overlap, optionally waits for a
/// release signal before answering.
struct MockClassifier {
    reply: Reply,
    latency: Duration,
    gate: Option<Arc<Notify>>,
    calls: Arc<AtomicUsize>,
    active: Arc<AtomicUsize>,
    max_active: Arc<AtomicUsize>,
    dispatched_at: Arc<Mutex<Vec<Instant>>>,
}

impl MockClassifier {
    fn new(reply: Reply) -> Self {
        Self {
            reply,
            latency: Duration::ZERO,
            gate: None,
            calls: Arc::default(),
            active: Arc::default(),
            max_active: Arc::default(),
            dispatched_at: Arc::default(),
        }
    }
}

#[async_trait]
impl Classifier for MockClassifier {
    type Output = FoodAnalysis;

    async fn classify(&self, _image: EncodedImage) -> Result<FoodAnalysis, ClassifyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.dispatched_at.lock().unwrap().push(Instant::now());
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        tokio::time::sleep(self.latency).await;

        self.active.fetch_sub(1, Ordering::SeqCst);
        match self.reply {
            Reply::Apple => Ok(apple()),
            Reply::Fail => Err(ClassifyError::Transport("connection refused".into())),
        }
    }
}

fn session(
    classifier: MockClassifier,
    camera: Arc<ScriptedCamera>,
    min_interval_ms: u64,
) -> ScanSession<MockClassifier, Arc<ScriptedCamera>> {
    ScanSession::new(
        classifier,
        camera,
        &MotionConfig::default(),
        Duration::from_millis(min_interval_ms),
    )
}

async fn next_event(events: &mut broadcast::Receiver<ScanEvent>) -> ScanEvent {
    tokio::time::timeout(Duration::from_secs(30), events.recv())
        .await
        .expect("timed out waiting for scan event")
        .expect("event channel closed")
}

#[tokio::test(start_paused = true)]
async fn settles_after_motion_and_locks_result() {
    let camera = Arc::new(ScriptedCamera::new(&[20, 20, 20, 5, 5, 5]));
    let classifier = MockClassifier::new(Reply::Apple);
    let calls = Arc::clone(&classifier.calls);
    let dispatched_at = Arc::clone(&classifier.dispatched_at);
    let session = session(classifier, camera, 2000);
    let mut snapshots = session.subscribe();
    let mut events = session.events();

    let t0 = Instant::now();
    session.start().await;
    assert_eq!(next_event(&mut events).await, ScanEvent::Started);
    assert_eq!(session.snapshot().status, ScanStatus::Waiting);

    let locked = snapshots
        .wait_for(|s| s.status == ScanStatus::Locked)
        .await
        .unwrap()
        .clone();
    assert_eq!(locked.result, Some(apple()));
    assert!(locked.running);

    // baseline at t0, three moving samples, three still: the sixth sample
    // (t0 + 1200ms) is the first that can dispatch
    let at = dispatched_at.lock().unwrap()[0];
    assert!(at - t0 >= Duration::from_millis(1200));

    assert_eq!(next_event(&mut events).await, ScanEvent::Dispatched { ticket: 1 });
    assert_eq!(next_event(&mut events).await, ScanEvent::Locked { ticket: 1 });

    // a still scene stays locked without further calls
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(session.snapshot().status, ScanStatus::Locked);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn never_more_than_one_call_in_flight() {
    let camera = Arc::new(ScriptedCamera::still());
    let mut classifier = MockClassifier::new(Reply::Fail);
    classifier.latency = Duration::from_millis(1500);
    let calls = Arc::clone(&classifier.calls);
    let max_active = Arc::clone(&classifier.max_active);
    let session = session(classifier, camera, 0);

    session.start().await;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        session.rescan().await;
    }
    session.stop().await;

    assert!(calls.load(Ordering::SeqCst) >= 2);
    assert_eq!(max_active.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_call_returns_to_waiting() {
    let camera = Arc::new(ScriptedCamera::still());
    let classifier = MockClassifier::new(Reply::Fail);
    let session = session(classifier, camera, 0);
    let mut events = session.events();

    session.start().await;
    assert_eq!(next_event(&mut events).await, ScanEvent::Started);
    assert_eq!(next_event(&mut events).await, ScanEvent::Dispatched { ticket: 1 });
    match next_event(&mut events).await {
        ScanEvent::Failed { ticket, reason } => {
            assert_eq!(ticket, 1);
            assert!(reason.contains("connection refused"));
        }
        other => panic!("expected failure, got {other:?}"),
    }
    let snapshot = session.snapshot();
    assert_eq!(snapshot.status, ScanStatus::Waiting);
    assert!(snapshot.result.is_none());
    assert!(!session.is_in_flight().await);
}

#[tokio::test(start_paused = true)]
async fn response_after_stop_is_discarded() {
    let camera = Arc::new(ScriptedCamera::still());
    let mut classifier = MockClassifier::new(Reply::Apple);
    let release = Arc::new(Notify::new());
    classifier.gate = Some(Arc::clone(&release));
    let session = session(classifier, camera, 0);
    let mut events = session.events();

    session.start().await;
    assert_eq!(next_event(&mut events).await, ScanEvent::Started);
    assert_eq!(next_event(&mut events).await, ScanEvent::Dispatched { ticket: 1 });

    session.stop().await;
    assert_eq!(next_event(&mut events).await, ScanEvent::Stopped);
    release.notify_one();
    assert_eq!(next_event(&mut events).await, ScanEvent::Discarded { ticket: 1 });

    let snapshot = session.snapshot();
    assert!(!snapshot.running);
    assert_eq!(snapshot.status, ScanStatus::Waiting);
    assert!(snapshot.result.is_none());
}

#[tokio::test(start_paused = true)]
async fn stop_is_idempotent() {
    let camera = Arc::new(ScriptedCamera::still());
    let session = session(MockClassifier::new(Reply::Apple), camera, 2000);

    session.stop().await;
    session.stop().await;
    session.start().await;
    session.stop().await;
    session.stop().await;

    let snapshot = session.snapshot();
    assert!(!snapshot.running);
    assert_eq!(snapshot.status, ScanStatus::Waiting);
    assert!(snapshot.result.is_none());
}

#[tokio::test(start_paused = true)]
async fn committed_result_ignores_motion_until_rescan() {
    let camera = Arc::new(ScriptedCamera::still());
    let classifier = MockClassifier::new(Reply::Apple);
    let calls = Arc::clone(&classifier.calls);
    let session = session(classifier, Arc::clone(&camera), 0);
    let mut snapshots = session.subscribe();

    session.start().await;
    snapshots
        .wait_for(|s| s.status == ScanStatus::Locked)
        .await
        .unwrap();
    assert_eq!(session.lock_result().await, Some(apple()));

    camera.shake(120);
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(session.snapshot().status, ScanStatus::Locked);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    assert!(session.rescan().await);
    snapshots
        .wait_for(|s| s.status == ScanStatus::Locked && s.result.is_some())
        .await
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn lock_during_call_keeps_the_late_reading() {
    let camera = Arc::new(ScriptedCamera::still());
    let mut classifier = MockClassifier::new(Reply::Apple);
    let release = Arc::new(Notify::new());
    classifier.gate = Some(Arc::clone(&release));
    let calls = Arc::clone(&classifier.calls);
    let session = session(classifier, Arc::clone(&camera), 0);
    let mut events = session.events();

    session.start().await;
    assert_eq!(next_event(&mut events).await, ScanEvent::Started);
    assert_eq!(next_event(&mut events).await, ScanEvent::Dispatched { ticket: 1 });

    assert_eq!(session.lock_result().await, None);
    assert_eq!(next_event(&mut events).await, ScanEvent::Committed);
    release.notify_one();
    assert_eq!(next_event(&mut events).await, ScanEvent::Locked { ticket: 1 });

    let snapshot = session.snapshot();
    assert!(snapshot.running);
    assert_eq!(snapshot.status, ScanStatus::Locked);
    assert_eq!(snapshot.result, Some(apple()));

    // still frozen: motion does not unlock or trigger another call
    camera.shake(120);
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(session.snapshot().status, ScanStatus::Locked);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(session.lock_result().await, Some(apple()));
}

#[tokio::test(start_paused = true)]
async fn rescan_ignored_when_stopped() {
    let camera = Arc::new(ScriptedCamera::still());
    let classifier = MockClassifier::new(Reply::Apple);
    let calls = Arc::clone(&classifier.calls);
    let session = session(classifier, camera, 0);

    assert!(!session.rescan().await);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(!session.snapshot().running);
}
