//! Actuator scheduler - owns the LED level and its timed jobs
//!
//! At most one timed job (auto-off or blink) exists at a time. Every new
//! instruction bumps a generation counter and cancels the running job while
//! holding the state lock, so a superseded job can never touch the pin again.

use super::pin::OutputPin;
use homeasst_shared::{ControlDirective, Seconds};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Errors returned before any actuator state is touched
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ActuatorError {
    #[error("invalid {name}: {value}")]
    Parameter { name: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobKind {
    AutoOff,
    Blink,
}

struct Job {
    kind: JobKind,
    cancel: CancellationToken,
    _task: JoinHandle<()>,
}

struct ActuatorState {
    pin: Box<dyn OutputPin>,
    generation: u64,
    job: Option<Job>,
}

impl ActuatorState {
    /// Invalidate the running job, if any
    fn supersede(&mut self) {
        self.generation += 1;
        if let Some(job) = self.job.take() {
            job.cancel.cancel();
            debug!("[LED] Cancelled {:?} job", job.kind);
        }
    }
}

/// Handle to the single LED. Clones drive the same output.
#[derive(Clone)]
pub struct ActuatorScheduler {
    state: Arc<Mutex<ActuatorState>>,
}

fn check_positive(name: &'static str, value: Seconds) -> Result<Duration, ActuatorError> {
    let invalid = || ActuatorError::Parameter {
        name,
        value: value.to_string(),
    };
    if value.is_finite() && value > 0.0 {
        Duration::try_from_secs_f64(value).map_err(|_| invalid())
    } else {
        Err(invalid())
    }
}

/// Toggles a blink performs: `2 * times`, capped to the largest even count
/// that fits in `duration / delay` steps
pub fn planned_toggles(delay: Seconds, times: u32, duration: Seconds) -> u64 {
    let full = 2 * times as u64;
    let steps = (duration / delay + 1e-9).floor() as u64;
    full.min(steps - steps % 2)
}

impl ActuatorScheduler {
    /// Take ownership of the output pin
    pub fn new(pin: Box<dyn OutputPin>) -> Self {
        Self {
            state: Arc::new(Mutex::new(ActuatorState {
                pin,
                generation: 0,
                job: None,
            })),
        }
    }

    /// Current output level
    #[cfg(test)]
    pub async fn level(&self) -> bool {
        self.state.lock().await.pin.level()
    }

    /// Whether a timed job is pending
    #[cfg(test)]
    pub async fn is_busy(&self) -> bool {
        self.state.lock().await.job.is_some()
    }

    /// Execute a directive and return the confirmation shown to the peer
    pub async fn apply(&self, directive: ControlDirective) -> Result<String, ActuatorError> {
        match directive {
            ControlDirective::TurnOn { duration } => self.turn_on(duration).await,
            ControlDirective::TurnOff => Ok(self.turn_off().await),
            ControlDirective::Blink {
                delay,
                times,
                duration,
            } => self.blink(delay, times, duration).await,
        }
    }

    /// Switch on, optionally scheduling an automatic switch-off
    pub async fn turn_on(&self, duration: Option<Seconds>) -> Result<String, ActuatorError> {
        let off_after = duration
            .map(|secs| check_positive("duration", secs))
            .transpose()?;

        let mut state = self.state.lock().await;
        state.supersede();
        state.pin.set(true);

        let Some(off_after) = off_after else {
            info!("[LED] On");
            return Ok("LED turned on".into());
        };

        let generation = state.generation;
        let cancel = CancellationToken::new();
        let task = tokio::spawn(auto_off(
            self.state.clone(),
            generation,
            cancel.clone(),
            off_after,
        ));
        state.job = Some(Job {
            kind: JobKind::AutoOff,
            cancel,
            _task: task,
        });

        let secs = off_after.as_secs_f64();
        info!("[LED] On for {}s", secs);
        Ok(format!("LED turned on for {} seconds", secs))
    }

    /// Switch off and drop any pending job
    pub async fn turn_off(&self) -> String {
        let mut state = self.state.lock().await;
        state.supersede();
        state.pin.set(false);
        info!("[LED] Off");
        "LED turned off".into()
    }

    /// Start a blink sequence, replacing whatever job is running
    pub async fn blink(
        &self,
        delay: Seconds,
        times: u32,
        duration: Option<Seconds>,
    ) -> Result<String, ActuatorError> {
        let step = check_positive("delay", delay)?;
        if times == 0 {
            return Err(ActuatorError::Parameter {
                name: "times",
                value: times.to_string(),
            });
        }
        let duration = duration.unwrap_or(times as Seconds * delay * 2.0);
        let window = check_positive("duration", duration)?;
        let toggles = planned_toggles(delay, times, duration);

        let mut state = self.state.lock().await;
        state.supersede();

        let generation = state.generation;
        let cancel = CancellationToken::new();
        let task = tokio::spawn(blink_job(
            self.state.clone(),
            generation,
            cancel.clone(),
            step,
            toggles,
            // unrepresentable deadline: only the toggle count bounds the job
            Instant::now().checked_add(window),
        ));
        state.job = Some(Job {
            kind: JobKind::Blink,
            cancel,
            _task: task,
        });

        info!(
            "[LED] Blink: delay={}s times={} duration={}s toggles={}",
            delay, times, duration, toggles
        );
        Ok(format!(
            "LED blinking {} times every {} seconds (max {} seconds)",
            times, delay, duration
        ))
    }
}

async fn auto_off(
    state: Arc<Mutex<ActuatorState>>,
    generation: u64,
    cancel: CancellationToken,
    after: Duration,
) {
    tokio::select! {
        _ = cancel.cancelled() => return,
        _ = sleep(after) => {}
    }

    let mut state = state.lock().await;
    if state.generation != generation {
        return;
    }
    state.pin.set(false);
    state.job = None;
    info!("[LED] Auto-off");
}

async fn blink_job(
    state: Arc<Mutex<ActuatorState>>,
    generation: u64,
    cancel: CancellationToken,
    step: Duration,
    toggles: u64,
    deadline: Option<Instant>,
) {
    for n in 0..toggles {
        if n % 2 == 0 && deadline.is_some_and(|at| Instant::now() > at) {
            debug!("[LED] Blink deadline reached after {} toggles", n);
            break;
        }
        {
            let mut state = state.lock().await;
            if state.generation != generation {
                return;
            }
            state.pin.toggle();
        }
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = sleep(step) => {}
        }
    }

    let mut state = state.lock().await;
    if state.generation == generation {
        state.job = None;
        debug!("[LED] Blink finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::pin::MemoryPin;

    fn scheduler() -> (ActuatorScheduler, MemoryPin) {
        let probe = MemoryPin::new();
        (ActuatorScheduler::new(Box::new(probe.clone())), probe)
    }

    #[test]
    fn test_planned_toggles() {
        assert_eq!(planned_toggles(0.2, 5, 2.0), 10);
        assert_eq!(planned_toggles(0.1, 10, 0.55), 4);
        assert_eq!(planned_toggles(0.1, 10, 0.6), 6);
        assert_eq!(planned_toggles(1.0, 3, 100.0), 6);
        assert_eq!(planned_toggles(1.0, 3, 0.5), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_turn_on_and_off() {
        let (led, probe) = scheduler();

        assert_eq!(led.turn_on(None).await, Ok("LED turned on".into()));
        assert!(probe.is_on());
        assert!(!led.is_busy().await);

        assert_eq!(led.turn_off().await, "LED turned off");
        assert!(!probe.is_on());
    }

    #[tokio::test(start_paused = true)]
    async fn test_turn_on_with_auto_off() {
        let (led, probe) = scheduler();

        let msg = led.turn_on(Some(3.0)).await.expect("turn on");
        assert_eq!(msg, "LED turned on for 3 seconds");
        assert!(led.is_busy().await);

        sleep(Duration::from_millis(2900)).await;
        assert!(probe.is_on());

        sleep(Duration::from_millis(200)).await;
        assert!(!probe.is_on());
        assert!(!led.is_busy().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_instruction_cancels_auto_off() {
        let (led, probe) = scheduler();

        led.turn_on(Some(1.0)).await.expect("turn on");
        led.turn_on(None).await.expect("turn on");

        sleep(Duration::from_secs(2)).await;
        assert!(probe.is_on());
    }

    #[tokio::test(start_paused = true)]
    async fn test_blink_toggles_twice_per_blink() {
        let (led, probe) = scheduler();

        led.blink(0.1, 3, None).await.expect("blink");
        sleep(Duration::from_secs(1)).await;

        assert_eq!(probe.toggles(), 6);
        assert!(!probe.is_on());
        assert!(!led.is_busy().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_blink_stops_at_duration() {
        let (led, probe) = scheduler();

        led.blink(0.1, 10, Some(0.55)).await.expect("blink");
        sleep(Duration::from_secs(3)).await;

        assert_eq!(probe.toggles(), 4);
        assert!(!probe.is_on());
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_blink_replaces_pending_blink() {
        let (led, probe) = scheduler();

        led.blink(0.1, 10, None).await.expect("first blink");
        led.blink(0.1, 2, None).await.expect("second blink");
        sleep(Duration::from_secs(5)).await;

        assert_eq!(probe.toggles(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_blink_cancels_running_blink() {
        let (led, probe) = scheduler();

        led.blink(0.1, 10, None).await.expect("first blink");
        sleep(Duration::from_millis(250)).await;
        let before = probe.toggles();
        assert_eq!(before, 3);

        led.blink(0.1, 2, None).await.expect("second blink");
        sleep(Duration::from_secs(5)).await;

        assert_eq!(probe.toggles() - before, 4);
        assert!(!led.is_busy().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_turn_off_cancels_blink() {
        let (led, probe) = scheduler();

        led.blink(0.1, 10, None).await.expect("blink");
        sleep(Duration::from_millis(150)).await;
        led.turn_off().await;
        let toggles = probe.toggles();

        sleep(Duration::from_secs(3)).await;
        assert_eq!(probe.toggles(), toggles);
        assert!(!probe.is_on());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_parameters_leave_state_untouched() {
        let (led, probe) = scheduler();
        led.turn_on(Some(2.0)).await.expect("turn on");
        let sets = probe.sets();

        assert!(matches!(
            led.blink(0.0, 3, None).await,
            Err(ActuatorError::Parameter { name: "delay", .. })
        ));
        assert!(matches!(
            led.blink(-0.5, 3, None).await,
            Err(ActuatorError::Parameter { name: "delay", .. })
        ));
        assert!(matches!(
            led.blink(0.2, 0, None).await,
            Err(ActuatorError::Parameter { name: "times", .. })
        ));
        assert!(matches!(
            led.turn_on(Some(0.0)).await,
            Err(ActuatorError::Parameter { name: "duration", .. })
        ));

        assert_eq!(probe.sets(), sets);
        assert_eq!(probe.toggles(), 0);
        assert!(probe.is_on());
        assert!(led.is_busy().await);

        // the original auto-off still fires
        sleep(Duration::from_millis(2100)).await;
        assert!(!probe.is_on());
    }

    #[tokio::test(start_paused = true)]
    async fn test_out_of_range_durations_rejected() {
        let (led, pin) = scheduler();

        assert!(matches!(
            led.turn_on(Some(1e20)).await,
            Err(ActuatorError::Parameter { name: "duration", .. })
        ));
        assert!(matches!(
            led.blink(1e300, 1, None).await,
            Err(ActuatorError::Parameter { name: "delay", .. })
        ));
        assert!(matches!(
            led.blink(0.5, 1, Some(1e20)).await,
            Err(ActuatorError::Parameter { name: "duration", .. })
        ));
        // default window of times * delay * 2 exceeds any Duration
        assert!(matches!(
            led.blink(1e10, u32::MAX, None).await,
            Err(ActuatorError::Parameter { name: "duration", .. })
        ));

        assert_eq!(pin.sets(), 0);
        assert_eq!(pin.toggles(), 0);
        assert!(!led.is_busy().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_blink_with_far_deadline_runs_to_count() {
        let (led, pin) = scheduler();

        // representable as a Duration, too far for an Instant
        led.blink(0.1, 2, Some(1e19)).await.expect("blink");
        sleep(Duration::from_secs(2)).await;

        assert_eq!(pin.toggles(), 4);
        assert!(!pin.is_on());
        assert!(!led.is_busy().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_apply_routes_directives() {
        let (led, probe) = scheduler();

        led.apply(ControlDirective::TurnOn { duration: None })
            .await
            .expect("on");
        assert!(probe.is_on());

        led.apply(ControlDirective::blink(0.1, 1, None))
            .await
            .expect("blink");
        sleep(Duration::from_secs(1)).await;
        assert_eq!(probe.toggles(), 2);
        assert!(probe.is_on());

        led.apply(ControlDirective::TurnOff).await.expect("off");
        assert!(!probe.is_on());
    }
}
