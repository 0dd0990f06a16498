//! Debounced solenoid activation detection.
//!
//! A hysteresis counter moves up one step for every sample at or above the
//! activation value and down one step (never below zero) for every sample below it.
//! Reaching the threshold latches the activation for the current window and resets
//! the counter, so a second burst can latch again. Isolated dropouts erode progress
//! one step at a time instead of wiping it.

/// Hysteresis state machine feeding a per-window activation latch.
#[derive(Debug, Clone)]
pub struct ActivationDetector {
    threshold: u32,
    value_threshold: f64,
    counter: u32,
    latched: bool,
}

impl ActivationDetector {
    /// `threshold` net above-value samples latch an activation.
    pub fn new(threshold: u32, value_threshold: f64) -> Self {
        Self {
            threshold: threshold.max(1),
            value_threshold,
            counter: 0,
            latched: false,
        }
    }

    /// Feed one sample value. Returns true if this sample latched an activation.
    pub fn observe(&mut self, value: f64) -> bool {
        if value >= self.value_threshold {
            self.counter = (self.counter + 1).min(self.threshold);
        } else {
            self.counter = self.counter.saturating_sub(1);
        }

        if self.counter == self.threshold {
            self.latched = true;
            self.counter = 0;
            return true;
        }
        false
    }

    /// Whether an activation occurred in the current window.
    pub fn latched(&self) -> bool {
        self.latched
    }

    /// Current hysteresis counter, in `[0, threshold]`.
    pub fn counter(&self) -> u32 {
        self.counter
    }

    /// Clear counter and latch when a window is finalized.
    pub fn reset(&mut self) {
        self.counter = 0;
        self.latched = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(values: &[f64]) -> ActivationDetector {
        let mut detector = ActivationDetector::new(5, 0.250);
        for &v in values {
            detector.observe(v);
        }
        detector
    }

    #[test]
    fn five_high_samples_latch() {
        let detector = run(&[0.3, 0.3, 0.3, 0.3, 0.3]);
        assert!(detector.latched());
        assert_eq!(detector.counter(), 0);
    }

    #[test]
    fn four_high_samples_do_not_latch() {
        let detector = run(&[0.3, 0.3, 0.3, 0.3]);
        assert!(!detector.latched());
        assert_eq!(detector.counter(), 4);
    }

    #[test]
    fn threshold_value_is_inclusive() {
        assert!(run(&[0.250; 5]).latched());
    }

    #[test]
    fn dropouts_erode_instead_of_resetting() {
        let mut detector = ActivationDetector::new(5, 0.250);
        let values = [0.3, 0.1, 0.3, 0.1, 0.3, 0.1, 0.3, 0.1, 0.3];
        for v in values {
            detector.observe(v);
        }
        // Alternating high/low never nets above one
        assert!(!detector.latched());

        let mut detector = ActivationDetector::new(5, 0.250);
        let values = [0.3, 0.3, 0.1, 0.3, 0.3, 0.1, 0.3, 0.3, 0.3];
        let latched_at: Vec<bool> = values.iter().map(|&v| detector.observe(v)).collect();
        assert!(detector.latched());
        assert_eq!(latched_at.iter().filter(|&&l| l).count(), 1);
        assert!(latched_at[8]);
    }

    #[test]
    fn single_spike_then_quiet_does_not_latch() {
        let detector = run(&[0.3, 0.1, 0.1, 0.1, 0.1]);
        assert!(!detector.latched());
        assert_eq!(detector.counter(), 0);
    }

    #[test]
    fn counter_never_goes_negative() {
        let detector = run(&[0.0; 20]);
        assert_eq!(detector.counter(), 0);
    }

    #[test]
    fn latch_is_monotonic_and_can_retrigger() {
        let mut detector = ActivationDetector::new(5, 0.250);
        for _ in 0..5 {
            detector.observe(0.4);
        }
        assert!(detector.latched());
        for _ in 0..10 {
            detector.observe(0.0);
        }
        assert!(detector.latched());

        let fired: usize = (0..5).filter(|_| detector.observe(0.4)).count();
        assert_eq!(fired, 1);
        assert!(detector.latched());
    }

    #[test]
    fn reset_clears_latch_and_progress() {
        let mut detector = run(&[0.3, 0.3, 0.3, 0.3, 0.3, 0.3, 0.3]);
        assert!(detector.latched());
        assert_eq!(detector.counter(), 2);
        detector.reset();
        assert!(!detector.latched());
        assert_eq!(detector.counter(), 0);
    }
}
