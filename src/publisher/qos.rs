//! Adaptive bitrate control driven by transport queue depth
//!
//! The transport exposes how many bytes sit queued behind the socket.
//! A healthy link drains the queue between stats ticks; a congested one
//! lets it grow. Three consecutive samples are enough to tell the two
//! apart without reacting to single-tick noise.

use std::collections::VecDeque;

const WINDOW: usize = 3;

#[derive(Debug, Clone)]
pub struct QosConfig {
    /// Starting video bitrate, bits per second
    pub initial_bitrate: u32,
    pub min_bitrate: u32,
    pub max_bitrate: u32,
    /// Upward probe size
    pub step: u32,
}

impl Default for QosConfig {
    fn default() -> Self {
        Self {
            initial_bitrate: 1024 * 1024,
            min_bitrate: 512 * 1024,
            max_bitrate: 3 * 1024 * 1024,
            step: 512 * 1024,
        }
    }
}

/// Sliding-window queue depth judge.
///
/// Every sample older than the window is discarded, so one congested
/// burst only influences the verdict while it is still in view.
#[derive(Debug)]
pub struct QosController {
    config: QosConfig,
    bitrate: u32,
    samples: VecDeque<u64>,
}

impl QosController {
    pub fn new(config: QosConfig) -> Self {
        let bitrate = config
            .initial_bitrate
            .clamp(config.min_bitrate, config.max_bitrate);
        Self {
            config,
            bitrate,
            samples: VecDeque::with_capacity(WINDOW),
        }
    }

    pub fn bitrate(&self) -> u32 {
        self.bitrate
    }

    /// Feed one queue depth sample. Returns the new bitrate when the
    /// verdict changes it.
    ///
    /// Strictly increasing across the whole window means the link is
    /// not keeping up: halve. No increase anywhere means headroom:
    /// probe one step up. Anything mixed leaves the bitrate alone.
    pub fn on_queue_depth(&mut self, depth: u64) -> Option<u32> {
        self.samples.push_back(depth);
        if self.samples.len() < WINDOW {
            return None;
        }

        let increases = self
            .samples
            .iter()
            .zip(self.samples.iter().skip(1))
            .filter(|(a, b)| b > a)
            .count();
        let pairs = self.samples.len() - 1;
        self.samples.pop_front();

        let target = if increases == pairs {
            (self.bitrate / 2).max(self.config.min_bitrate)
        } else if increases == 0 {
            self.bitrate
                .saturating_add(self.config.step)
                .min(self.config.max_bitrate)
        } else {
            self.bitrate
        };

        if target != self.bitrate {
            tracing::info!(from = self.bitrate, to = target, "adjusting video bitrate");
            self.bitrate = target;
            Some(target)
        } else {
            None
        }
    }

    /// Manual override from the caller. Clamped to the configured
    /// bounds and adopted as the controller's current value; the sample
    /// window starts over so stale history cannot immediately undo it.
    pub fn set_bitrate(&mut self, bitrate: u32) -> u32 {
        let bitrate = bitrate.clamp(self.config.min_bitrate, self.config.max_bitrate);
        self.bitrate = bitrate;
        self.samples.clear();
        bitrate
    }

    /// Fresh window after a reconnect; the rate itself carries over
    pub fn reset_window(&mut self) {
        self.samples.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> QosController {
        QosController::new(QosConfig::default())
    }

    #[test]
    fn test_needs_full_window() {
        let mut qos = controller();
        assert_eq!(qos.on_queue_depth(100), None);
        assert_eq!(qos.on_queue_depth(200), None);
        // Third sample completes the window
        assert_eq!(qos.on_queue_depth(300), Some(512 * 1024));
    }

    #[test]
    fn test_all_increasing_halves() {
        let mut qos = controller();
        qos.on_queue_depth(100);
        qos.on_queue_depth(200);
        assert_eq!(qos.on_queue_depth(300), Some(512 * 1024));
        assert_eq!(qos.bitrate(), 512 * 1024);
    }

    #[test]
    fn test_halving_floors_at_min() {
        let mut qos = controller();
        for depth in [1u64, 2, 3, 4, 5, 6, 7] {
            qos.on_queue_depth(depth);
        }
        // Already at the floor, further congestion changes nothing
        assert_eq!(qos.bitrate(), 512 * 1024);
    }

    #[test]
    fn test_drained_queue_steps_up() {
        let mut qos = controller();
        qos.on_queue_depth(300);
        qos.on_queue_depth(200);
        assert_eq!(qos.on_queue_depth(200), Some(1024 * 1024 + 512 * 1024));
    }

    #[test]
    fn test_step_up_caps_at_max() {
        let mut qos = controller();
        // Flat queue forever: probe up to the cap and stay there
        let mut last = qos.bitrate();
        for _ in 0..10 {
            if let Some(rate) = qos.on_queue_depth(0) {
                last = rate;
            }
        }
        assert_eq!(last, 3 * 1024 * 1024);
        assert_eq!(qos.on_queue_depth(0), None);
    }

    #[test]
    fn test_mixed_window_holds() {
        let mut qos = controller();
        qos.on_queue_depth(100);
        qos.on_queue_depth(300);
        assert_eq!(qos.on_queue_depth(200), None);
        assert_eq!(qos.bitrate(), 1024 * 1024);
    }

    #[test]
    fn test_window_slides() {
        let mut qos = controller();
        qos.on_queue_depth(100);
        qos.on_queue_depth(300);
        qos.on_queue_depth(200); // mixed, holds
        // Oldest sample (100) is gone; 300, 200, 100 is non-increasing
        assert_eq!(qos.on_queue_depth(100), Some(1024 * 1024 + 512 * 1024));
    }

    #[test]
    fn test_set_bitrate_clamps_and_clears_window() {
        let mut qos = controller();
        qos.on_queue_depth(100);
        qos.on_queue_depth(200);

        assert_eq!(qos.set_bitrate(10 * 1024 * 1024), 3 * 1024 * 1024);
        assert_eq!(qos.bitrate(), 3 * 1024 * 1024);
        assert_eq!(qos.set_bitrate(1), 512 * 1024);

        // The window restarted, one more sample is not enough to judge
        assert_eq!(qos.on_queue_depth(300), None);
    }

    #[test]
    fn test_initial_bitrate_clamped() {
        let qos = QosController::new(QosConfig {
            initial_bitrate: 10 * 1024 * 1024,
            ..Default::default()
        });
        assert_eq!(qos.bitrate(), 3 * 1024 * 1024);
    }
}
