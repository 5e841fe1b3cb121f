//! Adaptive sizing of upload payloads
//!
//! The load doubles whenever the bytes already handed to the socket exceed a
//! lookahead threshold (`scaling_factor` × current load, capped at the
//! maximum message size), and a payload is only queued while the transport
//! buffers less than seven times the candidate load.

use crate::models::Config;

/// Multiple of the candidate load the transport may buffer before sending pauses
pub const BUFFERED_LOAD_MULTIPLE: usize = 7;

/// Tunables of the flow controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowConfig {
    pub min_message_size: usize,
    pub max_message_size: usize,
    pub scaling_factor: usize,
}

impl FlowConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            min_message_size: config.min_message_size,
            max_message_size: config.max_message_size,
            scaling_factor: config.scaling_factor,
        }
    }
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            min_message_size: crate::defaults::MIN_MESSAGE_SIZE,
            max_message_size: crate::defaults::MAX_MESSAGE_SIZE,
            scaling_factor: crate::defaults::SCALING_FACTOR,
        }
    }
}

/// Outcome of one flow-control iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowDecision {
    /// Queue a zero-filled payload of this many bytes
    Send(usize),
    /// The transport is too far behind; skip this iteration
    Backpressure { candidate: usize },
}

#[derive(Debug, Clone)]
pub struct FlowController {
    config: FlowConfig,
    current_load: usize,
    total_queued: u64,
}

impl FlowController {
    pub fn new(config: FlowConfig) -> Self {
        Self {
            current_load: config.min_message_size,
            config,
            total_queued: 0,
        }
    }

    /// Run one iteration against the transport's current buffered byte count.
    ///
    /// A `Send` decision is already accounted for in [`total_queued`]; the
    /// caller must queue exactly that many bytes.
    ///
    /// [`total_queued`]: FlowController::total_queued
    pub fn step(&mut self, buffered: usize) -> FlowDecision {
        let threshold = if self.current_load >= self.config.max_message_size {
            self.config.max_message_size
        } else {
            self.config.scaling_factor.saturating_mul(self.current_load)
        };

        let in_flight_done = self.total_queued.saturating_sub(buffered as u64);
        let candidate = if in_flight_done > threshold as u64 {
            self.current_load.saturating_mul(2)
        } else {
            self.current_load
        };
        let candidate = candidate.clamp(self.config.min_message_size, self.config.max_message_size);

        self.current_load = candidate;

        if buffered < BUFFERED_LOAD_MULTIPLE.saturating_mul(candidate) {
            self.total_queued += candidate as u64;
            FlowDecision::Send(candidate)
        } else {
            FlowDecision::Backpressure { candidate }
        }
    }

    /// Bytes that actually left the client, excluding those still buffered
    pub fn reported_bytes(&self, buffered: usize) -> u64 {
        self.total_queued.saturating_sub(buffered as u64)
    }

    pub fn total_queued(&self) -> u64 {
        self.total_queued
    }

    pub fn current_load(&self) -> usize {
        self.current_load
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn small_config() -> FlowConfig {
        FlowConfig {
            min_message_size: 1024,
            max_message_size: 8192,
            scaling_factor: 4,
        }
    }

    #[test]
    fn test_starts_at_minimum_load() {
        let mut flow = FlowController::new(small_config());
        assert_eq!(flow.current_load(), 1024);
        assert_eq!(flow.step(0), FlowDecision::Send(1024));
        assert_eq!(flow.total_queued(), 1024);
    }

    #[test]
    fn test_load_grows_by_doubling_and_clamps_at_maximum() {
        let mut flow = FlowController::new(small_config());
        let sizes: Vec<usize> = (0..60)
            .map(|_| match flow.step(0) {
                FlowDecision::Send(size) => size,
                FlowDecision::Backpressure { .. } => panic!("nothing is buffered"),
            })
            .collect();

        let mut distinct = sizes.clone();
        distinct.dedup();
        assert_eq!(distinct, vec![1024, 2048, 4096, 8192]);
        assert!(sizes.windows(2).all(|w| w[1] >= w[0]));
        assert!(sizes[40..].iter().all(|&size| size == 8192));
    }

    #[test]
    fn test_doubles_only_past_threshold() {
        let mut flow = FlowController::new(small_config());
        // 4 × 1024 must be exceeded before the first doubling
        for _ in 0..4 {
            assert_eq!(flow.step(0), FlowDecision::Send(1024));
        }
        assert_eq!(flow.step(0), FlowDecision::Send(1024));
        assert_eq!(flow.step(0), FlowDecision::Send(2048));
    }

    #[test]
    fn test_buffered_bytes_hold_back_growth_and_sending() {
        let mut flow = FlowController::new(small_config());
        for _ in 0..5 {
            flow.step(0);
        }
        assert_eq!(flow.total_queued(), 5120);

        // Everything still buffered: nothing acknowledged, no doubling,
        // and 5120 < 7 × 1024 so a payload is still allowed.
        assert_eq!(flow.step(5120), FlowDecision::Send(1024));

        // 7 × 1024 buffered: backpressure
        assert_eq!(flow.step(7168), FlowDecision::Backpressure { candidate: 1024 });
        assert_eq!(flow.total_queued(), 6144);
    }

    #[test]
    fn test_reported_bytes_exclude_buffered() {
        let mut flow = FlowController::new(FlowConfig::default());
        flow.step(0);
        flow.step(0);
        assert_eq!(flow.reported_bytes(4096), 2 * 8192 - 4096);
        assert_eq!(flow.reported_bytes(usize::MAX), 0);
    }

    #[test]
    fn test_maximum_load_uses_maximum_as_threshold() {
        let config = FlowConfig {
            min_message_size: 8192,
            max_message_size: 8192,
            scaling_factor: 16,
        };
        let mut flow = FlowController::new(config);
        for _ in 0..10 {
            assert_eq!(flow.step(0), FlowDecision::Send(8192));
        }
    }

    proptest! {
        #[test]
        fn prop_never_sends_when_buffer_is_full(buffered in proptest::collection::vec(0usize..200_000, 1..200)) {
            let mut flow = FlowController::new(small_config());
            for b in buffered {
                match flow.step(b) {
                    FlowDecision::Send(size) => {
                        prop_assert!(b < BUFFERED_LOAD_MULTIPLE * size);
                        prop_assert!((1024..=8192).contains(&size));
                    }
                    FlowDecision::Backpressure { candidate } => {
                        prop_assert!(b >= BUFFERED_LOAD_MULTIPLE * candidate);
                    }
                }
            }
        }
    }
}
