use chrono::{DateTime, Utc};

/// Clamp-release timer and auto-start signal (§4.3.6). One instance per
/// machine, fed one `clamp_detected`/`person_in_roi` pair per
/// `DetectionResult`.
#[derive(Debug, Default)]
pub struct AutoStartTimer {
    clamp_released_at: Option<DateTime<Utc>>,
    auto_start_triggered: bool,
    prev_clamp_detected: Option<bool>,
}

pub struct AutoStartOutcome {
    pub countdown_sec: Option<f32>,
    pub signal: bool,
}

impl AutoStartTimer {
    pub fn new() -> Self {
        AutoStartTimer::default()
    }

    pub fn evaluate(
        &mut self,
        clamp_detected: bool,
        person_in_roi: bool,
        delay_sec: f64,
        now: DateTime<Utc>,
    ) -> AutoStartOutcome {
        let prev = self.prev_clamp_detected.replace(clamp_detected);

        match prev {
            Some(true) if !clamp_detected && self.clamp_released_at.is_none() => {
                self.clamp_released_at = Some(now);
                self.auto_start_triggered = false;
            }
            Some(false) if clamp_detected && self.clamp_released_at.is_some() => {
                self.clamp_released_at = None;
                self.auto_start_triggered = false;
            }
            _ => {}
        }

        let Some(released_at) = self.clamp_released_at else {
            return AutoStartOutcome { countdown_sec: None, signal: false };
        };

        if self.auto_start_triggered {
            return AutoStartOutcome { countdown_sec: Some(0.0), signal: false };
        }

        let elapsed = (now - released_at).num_milliseconds() as f64 / 1000.0;
        let countdown = delay_sec - elapsed;

        if countdown > 0.0 {
            return AutoStartOutcome { countdown_sec: Some(countdown as f32), signal: false };
        }

        if !person_in_roi && !clamp_detected {
            self.auto_start_triggered = true;
            AutoStartOutcome { countdown_sec: Some(0.0), signal: true }
        } else {
            // Guard failed: keep waiting, restart the countdown.
            self.clamp_released_at = Some(now);
            AutoStartOutcome { countdown_sec: Some(delay_sec as f32), signal: false }
        }
    }
}
