use std::time::Duration;

use live_scan_common::config::MotionConfig;
use live_scan_common::frame::EncodedImage;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::classify::ClassifyError;
use crate::gate::{InFlightPermit, InferenceGate};
use crate::motion::{Motion, MotionSample, StabilityTracker};
use crate::sampler::FrameSampling;

/// Status as observed by the UI layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Waiting,
    Scanning,
    Locked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Not running. Observed as `waiting`.
    Stopped,
    /// Watching for a still scene.
    Waiting { stable_count: u32 },
    /// Classification call `ticket` is in flight; motion checks are paused.
    Scanning { ticket: u64 },
    /// A reading is held. Unfrozen locks still watch for a large disturbance;
    /// a frozen lock was committed by the caller and ignores motion.
    /// `pending` is a call that was in flight at commit time; its reading
    /// still lands here.
    Locked { frozen: bool, pending: Option<u64> },
}

/// Everything the UI layer can observe about a session.
#[derive(Debug, Clone, Serialize)]
pub struct ScanSnapshot<R> {
    pub status: ScanStatus,
    pub running: bool,
    pub motion_detected: bool,
    pub result: Option<R>,
}

/// A classification call the caller must now perform.
///
/// Hand the outcome back through [`ScanMachine::complete`] with the same
/// ticket, then drop the permit.
#[derive(Debug)]
pub struct Dispatch {
    pub ticket: u64,
    pub image: EncodedImage,
    pub permit: InFlightPermit,
}

/// What one motion check did.
#[derive(Debug, Default)]
pub struct Tick {
    pub sample: Option<MotionSample>,
    pub unlocked: bool,
    pub dispatch: Option<Dispatch>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    Locked,
    Failed { reason: String },
    /// The session moved on (stopped, restarted or rescanned) before the
    /// response arrived; it was discarded.
    Stale,
}

#[derive(Debug)]
pub enum Rescan {
    /// Stopped, or a call is still in flight.
    Ignored,
    /// Re-armed but nothing dispatched yet (throttled or no frame); the next
    /// still sample dispatches.
    Armed,
    Dispatched(Dispatch),
}

/// The scan state machine, free of timers and tasks.
///
/// Time is passed in and frames are pulled through [`FrameSampling`], so the
/// whole waiting → scanning → locked cycle can be driven step by step.
pub struct ScanMachine<R> {
    phase: Phase,
    tracker: StabilityTracker,
    gate: InferenceGate,
    result: Option<R>,
    motion_detected: bool,
    next_ticket: u64,
}

impl<R: Clone> ScanMachine<R> {
    pub fn new(motion: &MotionConfig, min_scan_interval: Duration) -> Self {
        Self {
            phase: Phase::Stopped,
            tracker: StabilityTracker::new(motion),
            gate: InferenceGate::new(min_scan_interval),
            result: None,
            motion_detected: false,
            next_ticket: 0,
        }
    }

    pub fn status(&self) -> ScanStatus {
        match self.phase {
            Phase::Stopped | Phase::Waiting { .. } => ScanStatus::Waiting,
            Phase::Scanning { .. } => ScanStatus::Scanning,
            Phase::Locked { .. } => ScanStatus::Locked,
        }
    }

    pub fn is_running(&self) -> bool {
        self.phase != Phase::Stopped
    }

    pub fn is_frozen(&self) -> bool {
        matches!(self.phase, Phase::Locked { frozen: true, .. })
    }

    pub fn is_in_flight(&self) -> bool {
        self.gate.is_in_flight()
    }

    pub fn stable_count(&self) -> Option<u32> {
        match self.phase {
            Phase::Waiting { stable_count } => Some(stable_count),
            _ => None,
        }
    }

    pub fn result(&self) -> Option<&R> {
        self.result.as_ref()
    }

    pub fn snapshot(&self) -> ScanSnapshot<R> {
        ScanSnapshot {
            status: self.status(),
            running: self.is_running(),
            motion_detected: self.motion_detected,
            result: self.result.clone(),
        }
    }

    /// Begin a fresh session. Returns `false` if one is already running.
    ///
    /// The throttle clock and any in-flight call survive a restart, so
    /// dispatch spacing and single-flight hold across stop/start.
    pub fn start(&mut self) -> bool {
        if self.is_running() {
            debug!("scan session already running");
            return false;
        }
        self.reset();
        self.phase = Phase::Waiting { stable_count: 0 };
        info!("scan session started, WAITING for a still scene");
        true
    }

    /// End the session and drop its state. Returns whether it was running.
    pub fn stop(&mut self) -> bool {
        let was_running = self.is_running();
        if let Phase::Scanning { ticket } = self.phase {
            debug!(ticket, "abandoning in-flight classification");
        }
        self.reset();
        self.phase = Phase::Stopped;
        if was_running {
            info!("scan session stopped");
        }
        was_running
    }

    fn reset(&mut self) {
        self.tracker.reset();
        self.result = None;
        self.motion_detected = false;
    }

    /// One periodic motion check.
    pub fn tick<S>(&mut self, sampler: &S, now: Instant) -> Tick
    where
        S: FrameSampling + ?Sized,
    {
        let mut tick = Tick::default();
        match self.phase {
            Phase::Waiting { .. } | Phase::Locked { frozen: false, .. } => {}
            Phase::Stopped | Phase::Scanning { .. } | Phase::Locked { frozen: true, .. } => {
                return tick;
            }
        }

        let Some(frame) = sampler.sample_low_res() else {
            return tick;
        };
        let Some(sample) = self.tracker.observe(frame) else {
            return tick;
        };
        tick.sample = Some(sample);

        let motion = self.tracker.assess(sample);
        self.motion_detected = motion != Motion::Still;

        match (self.phase, motion) {
            (Phase::Waiting { stable_count }, Motion::Still) => {
                let stable_count = stable_count.saturating_add(1);
                self.phase = Phase::Waiting { stable_count };
                debug!(
                    motion_level = format!("{:.2}", sample.level),
                    stable_count,
                    needed = self.tracker.stability_frames(),
                    "WAITING: still sample"
                );
                if self.tracker.is_stable(stable_count) {
                    tick.dispatch = self.attempt_scan(sampler, now);
                }
            }
            (Phase::Waiting { stable_count }, _) => {
                debug!(
                    motion_level = format!("{:.2}", sample.level),
                    threshold = self.tracker.threshold(),
                    dropped = stable_count,
                    "WAITING: motion, stability reset"
                );
                self.phase = Phase::Waiting { stable_count: 0 };
            }
            (Phase::Locked { .. }, Motion::Disturbance) => {
                info!(
                    motion_level = format!("{:.2}", sample.level),
                    "LOCKED→WAITING: large disturbance invalidates reading"
                );
                self.phase = Phase::Waiting { stable_count: 0 };
                tick.unlocked = true;
            }
            (Phase::Locked { .. }, _) => {}
            (Phase::Stopped | Phase::Scanning { .. }, _) => {}
        }
        tick
    }

    /// Dispatch a classification if the gate allows and a frame is available.
    /// Only a waiting session dispatches.
    pub fn attempt_scan<S>(&mut self, sampler: &S, now: Instant) -> Option<Dispatch>
    where
        S: FrameSampling + ?Sized,
    {
        if !matches!(self.phase, Phase::Waiting { .. }) {
            return None;
        }
        if let Err(rejection) = self.gate.check(now) {
            debug!(
                ?rejection,
                min_interval_ms = self.gate.min_interval().as_millis() as u64,
                since_last_ms = self
                    .gate
                    .last_dispatch()
                    .map(|at| now.saturating_duration_since(at).as_millis() as u64),
                "scan deferred by gate"
            );
            return None;
        }
        let Some(image) = sampler.sample_for_submission() else {
            debug!("no frame available for submission yet");
            return None;
        };
        let permit = match self.gate.try_admit(now) {
            Ok(permit) => permit,
            Err(rejection) => {
                debug!(?rejection, "scan deferred by gate");
                return None;
            }
        };

        self.next_ticket += 1;
        let ticket = self.next_ticket;
        self.phase = Phase::Scanning { ticket };
        self.motion_detected = false;
        info!(ticket, bytes = image.len(), "WAITING→SCANNING: dispatching classification");
        Some(Dispatch {
            ticket,
            image,
            permit,
        })
    }

    /// Apply the outcome of the call identified by `ticket`.
    pub fn complete(&mut self, ticket: u64, outcome: Result<R, ClassifyError>) -> Completion {
        match self.phase {
            Phase::Scanning { ticket: current } if current == ticket => {}
            Phase::Locked {
                frozen: true,
                pending: Some(pending),
            } if pending == ticket => return self.complete_committed(ticket, outcome),
            _ => {
                debug!(ticket, status = ?self.status(), "discarding stale classification response");
                return Completion::Stale;
            }
        }

        match outcome {
            Ok(result) => {
                self.result = Some(result);
                self.phase = Phase::Locked {
                    frozen: false,
                    pending: None,
                };
                info!(ticket, "SCANNING→LOCKED: classification received");
                Completion::Locked
            }
            Err(e) => {
                // A failed attempt spends this stability episode; the next
                // full run of still samples retries.
                warn!(error = %e, ticket, "SCANNING→WAITING: classification failed");
                self.phase = Phase::Waiting { stable_count: 0 };
                Completion::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// A response for a call that was in flight when the caller committed.
    /// Motion stays frozen either way.
    fn complete_committed(&mut self, ticket: u64, outcome: Result<R, ClassifyError>) -> Completion {
        self.phase = Phase::Locked {
            frozen: true,
            pending: None,
        };
        match outcome {
            Ok(result) => {
                self.result = Some(result);
                info!(ticket, "committed lock received its classification");
                Completion::Locked
            }
            Err(e) => {
                warn!(error = %e, ticket, "classification for committed lock failed");
                Completion::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Commit to whatever is held now and stop evaluating motion.
    ///
    /// A call still in flight keeps running and its reading lands in the
    /// frozen lock.
    pub fn lock_result(&mut self) -> Option<R> {
        let pending = match self.phase {
            Phase::Stopped => return None,
            Phase::Scanning { ticket } => {
                info!(ticket, "SCANNING→LOCKED: committed before response, awaiting it");
                Some(ticket)
            }
            Phase::Locked { pending, .. } => pending,
            Phase::Waiting { .. } => None,
        };
        if pending.is_none() {
            info!(status = ?self.status(), "result committed, motion evaluation frozen");
        }
        self.phase = Phase::Locked {
            frozen: true,
            pending,
        };
        self.motion_detected = false;
        self.result.clone()
    }

    /// Discard the current reading and scan again right away, as if a
    /// stability episode had just completed.
    pub fn rescan<S>(&mut self, sampler: &S, now: Instant) -> Rescan
    where
        S: FrameSampling + ?Sized,
    {
        if !self.is_running() {
            debug!("rescan ignored, session not running");
            return Rescan::Ignored;
        }
        if self.is_in_flight() {
            debug!("rescan ignored, classification in flight");
            return Rescan::Ignored;
        }

        self.result = None;
        self.phase = Phase::Waiting {
            stable_count: self.tracker.stability_frames(),
        };
        info!("rescan requested, WAITING");
        match self.attempt_scan(sampler, now) {
            Some(dispatch) => Rescan::Dispatched(dispatch),
            None => Rescan::Armed,
        }
    }
}
