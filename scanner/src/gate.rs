use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

/// Why a scan attempt was not let through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateRejection {
    /// A classification call is still awaiting its response.
    InFlight,
    /// The previous dispatch was too recent.
    Throttled { remaining: Duration },
}

/// Single-flight and minimum-interval guard around remote classification.
///
/// The throttle clock is only written when a call is admitted. The in-flight
/// flag is owned by the [`InFlightPermit`] handed out on admission and is
/// cleared when that permit is dropped, whatever happened to the call.
#[derive(Debug)]
pub struct InferenceGate {
    min_interval: Duration,
    last_dispatch: Option<Instant>,
    in_flight: Arc<AtomicBool>,
}

impl InferenceGate {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_dispatch: None,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn check(&self, now: Instant) -> Result<(), GateRejection> {
        if self.is_in_flight() {
            return Err(GateRejection::InFlight);
        }
        if let Some(last) = self.last_dispatch {
            let elapsed = now.saturating_duration_since(last);
            if elapsed < self.min_interval {
                return Err(GateRejection::Throttled {
                    remaining: self.min_interval - elapsed,
                });
            }
        }
        Ok(())
    }

    /// Mark a call as dispatched at `now`.
    pub fn try_admit(&mut self, now: Instant) -> Result<InFlightPermit, GateRejection> {
        self.check(now)?;
        if self.in_flight.swap(true, Ordering::AcqRel) {
            return Err(GateRejection::InFlight);
        }
        self.last_dispatch = Some(now);
        Ok(InFlightPermit {
            flag: Arc::clone(&self.in_flight),
        })
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn last_dispatch(&self) -> Option<Instant> {
        self.last_dispatch
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }
}

/// Proof that a classification call is in flight. Dropping it ends the flight.
#[derive(Debug)]
pub struct InFlightPermit {
    flag: Arc<AtomicBool>,
}

impl Drop for InFlightPermit {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_call_is_admitted() {
        let mut gate = InferenceGate::new(Duration::from_secs(2));
        let now = Instant::now();
        assert_eq!(gate.check(now), Ok(()));
        let _permit = gate.try_admit(now).unwrap();
        assert!(gate.is_in_flight());
        assert_eq!(gate.last_dispatch(), Some(now));
    }

    #[test]
    fn second_call_while_in_flight_is_rejected() {
        let mut gate = InferenceGate::new(Duration::ZERO);
        let now = Instant::now();
        let _permit = gate.try_admit(now).unwrap();
        assert_eq!(gate.check(now + Duration::from_secs(10)), Err(GateRejection::InFlight));
        assert!(gate.try_admit(now + Duration::from_secs(10)).is_err());
    }

    #[test]
    fn dropping_permit_ends_flight() {
        let mut gate = InferenceGate::new(Duration::ZERO);
        let permit = gate.try_admit(Instant::now()).unwrap();
        drop(permit);
        assert!(!gate.is_in_flight());
    }

    #[test]
    fn throttle_measured_from_dispatch() {
        let mut gate = InferenceGate::new(Duration::from_millis(2000));
        let t0 = Instant::now();
        drop(gate.try_admit(t0).unwrap());

        assert_eq!(
            gate.check(t0 + Duration::from_millis(1500)),
            Err(GateRejection::Throttled {
                remaining: Duration::from_millis(500)
            })
        );
        assert_eq!(gate.check(t0 + Duration::from_millis(2000)), Ok(()));
    }

    #[test]
    fn rejected_attempt_does_not_move_clock() {
        let mut gate = InferenceGate::new(Duration::from_millis(1500));
        let t0 = Instant::now();
        drop(gate.try_admit(t0).unwrap());
        assert!(gate.try_admit(t0 + Duration::from_millis(1000)).is_err());
        assert_eq!(gate.last_dispatch(), Some(t0));
    }
}
