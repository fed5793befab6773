//! Fixed-rate ticking.

use std::time::{Duration, Instant};

use imumocap_types::MocapError;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// How [`FixedRate::wait`] spaces ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimingMode {
    /// Sleep until the next deadline; time spent processing is subtracted.
    #[default]
    Compensated,
    /// Sleep one full period regardless of processing time.
    FixedSleep,
}

impl std::fmt::Display for TimingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimingMode::Compensated => write!(f, "compensated"),
            TimingMode::FixedSleep => write!(f, "fixed_sleep"),
        }
    }
}

impl std::str::FromStr for TimingMode {
    type Err = MocapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "compensated" => Ok(TimingMode::Compensated),
            "fixed_sleep" | "fixed-sleep" => Ok(TimingMode::FixedSleep),
            other => Err(MocapError::InvalidConfig(format!("unknown timing mode '{other}'"))),
        }
    }
}

/// Paces a loop at a fixed frequency.
///
/// In [`TimingMode::Compensated`] each tick has a deadline one period after
/// the previous one.  A tick that starts after its deadline counts as an
/// overrun and re-anchors the schedule at the current time instead of
/// bursting to catch up.
#[derive(Debug, Clone)]
pub struct FixedRate {
    period: Duration,
    mode: TimingMode,
    deadline: Option<Instant>,
    overruns: u64,
}

impl FixedRate {
    pub fn new(fps: u32, mode: TimingMode) -> Result<Self, MocapError> {
        if fps == 0 {
            return Err(MocapError::InvalidConfig("fps must be positive".into()));
        }
        Ok(Self {
            period: Duration::from_nanos(1_000_000_000 / u64::from(fps)),
            mode,
            deadline: None,
            overruns: 0,
        })
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn mode(&self) -> TimingMode {
        self.mode
    }

    /// Ticks that started late.
    pub fn overruns(&self) -> u64 {
        self.overruns
    }

    /// Forget the schedule; the next wait starts a fresh period.
    pub fn reset(&mut self) {
        self.deadline = None;
    }

    /// Block until the next tick is due.
    pub fn wait(&mut self) {
        let delay = self.delay_from(Instant::now());
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
    }

    /// Sleep needed at `now` and the schedule update that goes with it.
    fn delay_from(&mut self, now: Instant) -> Duration {
        match self.mode {
            TimingMode::FixedSleep => self.period,
            TimingMode::Compensated => {
                let deadline = match self.deadline {
                    Some(previous) => previous + self.period,
                    None => now + self.period,
                };
                if deadline < now {
                    self.overruns += 1;
                    if self.overruns.is_power_of_two() {
                        warn!(
                            overruns = self.overruns,
                            late_ms = (now - deadline).as_secs_f64() * 1e3,
                            "tick overran its period"
                        );
                    }
                    self.deadline = Some(now);
                    Duration::ZERO
                } else {
                    self.deadline = Some(deadline);
                    deadline - now
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn compensated_subtracts_processing_time() {
        let mut rate = FixedRate::new(10, TimingMode::Compensated).unwrap();
        assert_eq!(rate.period(), ms(100));
        let t0 = Instant::now();

        assert_eq!(rate.delay_from(t0), ms(100));
        // Tick ran 30 ms past the deadline at t0 + 100.
        assert_eq!(rate.delay_from(t0 + ms(130)), ms(70));
        assert_eq!(rate.overruns(), 0);
    }

    #[test]
    fn overrun_resynchronises_instead_of_bursting() {
        let mut rate = FixedRate::new(10, TimingMode::Compensated).unwrap();
        let t0 = Instant::now();
        rate.delay_from(t0);

        // Next deadline was t0 + 200; we are at t0 + 450.
        assert_eq!(rate.delay_from(t0 + ms(450)), Duration::ZERO);
        assert_eq!(rate.overruns(), 1);
        // Schedule restarts from t0 + 450.
        assert_eq!(rate.delay_from(t0 + ms(460)), ms(90));
    }

    #[test]
    fn fixed_sleep_ignores_processing_time() {
        let mut rate = FixedRate::new(20, TimingMode::FixedSleep).unwrap();
        let t0 = Instant::now();
        assert_eq!(rate.delay_from(t0), ms(50));
        assert_eq!(rate.delay_from(t0 + ms(500)), ms(50));
        assert_eq!(rate.overruns(), 0);
    }

    #[test]
    fn reset_starts_a_fresh_period() {
        let mut rate = FixedRate::new(10, TimingMode::Compensated).unwrap();
        let t0 = Instant::now();
        rate.delay_from(t0);
        rate.reset();
        assert_eq!(rate.delay_from(t0 + ms(2_000)), ms(100));
        assert_eq!(rate.overruns(), 0);
    }

    #[test]
    fn zero_fps_is_rejected() {
        assert!(matches!(
            FixedRate::new(0, TimingMode::Compensated),
            Err(MocapError::InvalidConfig(_))
        ));
        assert_eq!("fixed_sleep".parse::<TimingMode>().unwrap(), TimingMode::FixedSleep);
        assert!("sometimes".parse::<TimingMode>().is_err());
    }
}
