mod machine;

pub use machine::{
    Completion, Dispatch, Rescan, ScanMachine, ScanSnapshot, ScanStatus, Tick,
};

use std::sync::Arc;
use std::time::Duration;

use live_scan_common::config::{ClassifierConfig, MotionConfig};
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::classify::{Classifier, ClassifyError};
use crate::sampler::FrameSampling;

const EVENT_CAPACITY: usize = 64;

/// Notable session transitions, for listeners that react to edges rather
/// than to the current snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEvent {
    Started,
    Stopped,
    Dispatched { ticket: u64 },
    Locked { ticket: u64 },
    Failed { ticket: u64, reason: String },
    /// A response arrived after the session had moved on.
    Discarded { ticket: u64 },
    /// A large disturbance released a locked reading.
    Unlocked,
    /// The caller committed to the current reading.
    Committed,
}

/// A live scanning session for one classification domain.
///
/// Runs the motion check on a fixed interval while started, dispatches at
/// most one classification at a time, and publishes a [`ScanSnapshot`] after
/// every change. Dropping the session stops the timer; a call still in
/// flight finishes in the background and its response is discarded.
pub struct ScanSession<C: Classifier, S> {
    shared: Arc<Shared<C, S>>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

struct Shared<C: Classifier, S> {
    machine: Mutex<ScanMachine<C::Output>>,
    sampler: S,
    classifier: Arc<C>,
    check_interval: Duration,
    snapshots: watch::Sender<ScanSnapshot<C::Output>>,
    events: broadcast::Sender<ScanEvent>,
}

impl<C, S> ScanSession<C, S>
where
    C: Classifier,
    S: FrameSampling + 'static,
{
    pub fn new(
        classifier: C,
        sampler: S,
        motion: &MotionConfig,
        min_scan_interval: Duration,
    ) -> Self {
        let machine = ScanMachine::new(motion, min_scan_interval);
        let (snapshots, _) = watch::channel(machine.snapshot());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                machine: Mutex::new(machine),
                sampler,
                classifier: Arc::new(classifier),
                check_interval: motion.check_interval(),
                snapshots,
                events,
            }),
            ticker: Mutex::new(None),
        }
    }

    pub fn from_config(
        classifier: C,
        sampler: S,
        motion: &MotionConfig,
        classifier_config: &ClassifierConfig,
    ) -> Self {
        Self::new(classifier, sampler, motion, classifier_config.min_scan_interval())
    }

    pub fn subscribe(&self) -> watch::Receiver<ScanSnapshot<C::Output>> {
        self.shared.snapshots.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<ScanEvent> {
        self.shared.events.subscribe()
    }

    pub fn snapshot(&self) -> ScanSnapshot<C::Output> {
        self.shared.snapshots.borrow().clone()
    }

    pub fn classifier_name(&self) -> &str {
        self.shared.classifier.name()
    }

    pub async fn is_in_flight(&self) -> bool {
        self.shared.machine.lock().await.is_in_flight()
    }

    /// Start watching for a still scene. No-op if already running.
    pub async fn start(&self) {
        let mut machine = self.shared.machine.lock().await;
        if !machine.start() {
            return;
        }
        self.shared.publish(&machine);
        self.arm_ticker().await;
        drop(machine);
        self.shared.emit(ScanEvent::Started);
    }

    /// Stop the timer and clear all state. Safe to call repeatedly.
    pub async fn stop(&self) {
        let mut machine = self.shared.machine.lock().await;
        let was_running = machine.stop();
        self.shared.publish(&machine);
        self.disarm_ticker().await;
        drop(machine);
        if was_running {
            self.shared.emit(ScanEvent::Stopped);
        }
    }

    /// Freeze motion evaluation and commit to the current reading, if any.
    ///
    /// A classification already in flight still delivers its reading into
    /// the frozen lock.
    pub async fn lock_result(&self) -> Option<C::Output> {
        let mut machine = self.shared.machine.lock().await;
        let running = machine.is_running();
        let result = machine.lock_result();
        self.shared.publish(&machine);
        self.disarm_ticker().await;
        drop(machine);
        if running {
            self.shared.emit(ScanEvent::Committed);
        }
        result
    }

    /// Drop the current reading and scan again immediately.
    ///
    /// Returns `false` when ignored: the session is stopped or a call is
    /// still in flight. Re-arms the timer if [`lock_result`](Self::lock_result)
    /// had frozen it.
    pub async fn rescan(&self) -> bool {
        let mut machine = self.shared.machine.lock().await;
        let outcome = machine.rescan(&self.shared.sampler, Instant::now());
        self.shared.publish(&machine);
        if !matches!(outcome, Rescan::Ignored) {
            self.arm_ticker().await;
        }
        drop(machine);

        match outcome {
            Rescan::Ignored => false,
            Rescan::Armed => true,
            Rescan::Dispatched(dispatch) => {
                self.shared.launch(dispatch);
                true
            }
        }
    }

    /// Run one motion check now. The session timer calls this on every tick.
    pub async fn check_motion(&self) {
        self.shared.check_motion().await;
    }

    /// Callers hold the machine lock, so timer changes follow state changes
    /// in order.
    async fn arm_ticker(&self) {
        let mut slot = self.ticker.lock().await;
        if slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        let shared = Arc::clone(&self.shared);
        let period = shared.check_interval;
        debug!(period_ms = period.as_millis() as u64, "motion timer armed");
        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                shared.check_motion().await;
            }
        }));
    }

    async fn disarm_ticker(&self) {
        if let Some(handle) = self.ticker.lock().await.take() {
            handle.abort();
            debug!("motion timer cancelled");
        }
    }
}

impl<C: Classifier, S> Drop for ScanSession<C, S> {
    fn drop(&mut self) {
        if let Some(handle) = self.ticker.get_mut().take() {
            handle.abort();
        }
    }
}

impl<C, S> Shared<C, S>
where
    C: Classifier,
    S: FrameSampling + 'static,
{
    fn publish(&self, machine: &ScanMachine<C::Output>) {
        self.snapshots.send_replace(machine.snapshot());
    }

    fn emit(&self, event: ScanEvent) {
        // No listeners is fine.
        let _ = self.events.send(event);
    }

    async fn check_motion(self: &Arc<Self>) {
        let mut machine = self.machine.lock().await;
        let tick = machine.tick(&self.sampler, Instant::now());
        if tick.sample.is_none() && tick.dispatch.is_none() {
            return;
        }
        self.publish(&machine);
        drop(machine);

        if tick.unlocked {
            self.emit(ScanEvent::Unlocked);
        }
        if let Some(dispatch) = tick.dispatch {
            self.launch(dispatch);
        }
    }

    /// Run the classification for `dispatch` in the background and apply its
    /// outcome when it lands.
    fn launch(self: &Arc<Self>, dispatch: Dispatch) {
        let Dispatch {
            ticket,
            image,
            permit,
        } = dispatch;
        self.emit(ScanEvent::Dispatched { ticket });

        let shared = Arc::clone(self);
        tokio::spawn(async move {
            let classifier = Arc::clone(&shared.classifier);
            let name = classifier.name().to_string();
            // A panic in the classifier surfaces as a transport failure.
            let outcome = match tokio::spawn(async move { classifier.classify(image).await }).await {
                Ok(outcome) => outcome,
                Err(e) => Err(ClassifyError::Transport(format!("classifier task failed: {e}"))),
            };
            if let Err(e) = &outcome {
                warn!(classifier = %name, ticket, error = %e, "classification attempt failed");
            }

            let mut machine = shared.machine.lock().await;
            let completion = machine.complete(ticket, outcome);
            drop(permit);
            shared.publish(&machine);
            drop(machine);

            match completion {
                Completion::Locked => {
                    info!(classifier = %name, ticket, "reading locked");
                    shared.emit(ScanEvent::Locked { ticket });
                }
                Completion::Failed { reason } => {
                    shared.emit(ScanEvent::Failed { ticket, reason });
                }
                Completion::Stale => {
                    shared.emit(ScanEvent::Discarded { ticket });
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use live_scan_common::frame::{EncodedImage, Frame};

    struct Blind;

    impl FrameSampling for Blind {
        fn sample_low_res(&self) -> Option<Frame> {
            None
        }

        fn sample_for_submission(&self) -> Option<EncodedImage> {
            None
        }

        fn sample_frame(&self) -> Option<Frame> {
            None
        }
    }

    struct Unreachable;

    #[async_trait]
    impl Classifier for Unreachable {
        type Output = String;

        async fn classify(&self, _image: EncodedImage) -> Result<String, ClassifyError> {
            Err(ClassifyError::Transport("no network in tests".into()))
        }
    }

    fn session() -> ScanSession<Unreachable, Blind> {
        ScanSession::new(
            Unreachable,
            Blind,
            &MotionConfig::default(),
            Duration::from_millis(0),
        )
    }

    async fn timer_armed(session: &ScanSession<Unreachable, Blind>) -> bool {
        session
            .ticker
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    #[tokio::test(start_paused = true)]
    async fn racing_start_and_stop_leave_no_timer_on_a_stopped_session() {
        let session = session();
        for _ in 0..10 {
            tokio::join!(session.start(), session.stop());
            assert_eq!(session.snapshot().running, timer_armed(&session).await);

            tokio::join!(session.stop(), session.start());
            assert_eq!(session.snapshot().running, timer_armed(&session).await);
        }
        session.stop().await;
        assert!(!timer_armed(&session).await);
    }

    #[tokio::test(start_paused = true)]
    async fn commit_disarms_timer_and_rescan_rearms_it() {
        let session = session();
        session.start().await;
        assert!(timer_armed(&session).await);

        session.lock_result().await;
        assert!(!timer_armed(&session).await);

        assert!(session.rescan().await);
        assert!(timer_armed(&session).await);
    }
}
