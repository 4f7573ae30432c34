//! Control-side view of the feature queue.

use super::analyzer::nearest_in_time;
use super::config::FEATURE_HISTORY;
use super::features::SpectralFeatures;
use crate::dsp::HistoryRing;
use crate::engine::channels::QueueConsumer;

/// Pulls analysis frames published by the audio thread and keeps the
/// latest one plus a short history. Polled at the reader's own cadence.
pub struct FeatureMonitor {
    rx: QueueConsumer<SpectralFeatures>,
    history: HistoryRing<SpectralFeatures, FEATURE_HISTORY>,
    received: u64,
}

impl FeatureMonitor {
    pub fn new(rx: QueueConsumer<SpectralFeatures>) -> Self {
        Self {
            rx,
            history: HistoryRing::new(),
            received: 0,
        }
    }

    /// Drains pending frames. Returns how many arrived.
    pub fn poll(&mut self) -> usize {
        let history = &mut self.history;
        let count = self.rx.drain(|frame| history.push(frame));
        self.received += count as u64;
        count
    }

    pub fn latest(&self) -> Option<SpectralFeatures> {
        self.history.latest().copied()
    }

    pub fn history(&self) -> &HistoryRing<SpectralFeatures, FEATURE_HISTORY> {
        &self.history
    }

    pub fn features_at_time(&self, seconds: f64) -> Option<SpectralFeatures> {
        nearest_in_time(self.history.iter_newest_first(), seconds)
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    /// Frames the audio thread could not queue because nobody polled.
    pub fn dropped(&self) -> u64 {
        self.rx.overflow_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::channels::realtime_queue;

    fn frame(n: u64) -> SpectralFeatures {
        SpectralFeatures {
            frame_number: n,
            timestamp: n as f64 * 0.01,
            is_valid: true,
            ..SpectralFeatures::default()
        }
    }

    #[test]
    fn test_poll_keeps_latest() {
        let (mut tx, rx) = realtime_queue(8).unwrap();
        let mut monitor = FeatureMonitor::new(rx);
        assert!(monitor.latest().is_none());
        for n in 1..=3 {
            tx.push_lossy(frame(n));
        }
        assert_eq!(monitor.poll(), 3);
        assert_eq!(monitor.latest().map(|f| f.frame_number), Some(3));
        assert_eq!(monitor.received(), 3);
        assert_eq!(monitor.features_at_time(0.011).map(|f| f.frame_number), Some(1));
    }

    #[test]
    fn test_history_is_bounded() {
        let (mut tx, rx) = realtime_queue(64).unwrap();
        let mut monitor = FeatureMonitor::new(rx);
        for n in 0..50 {
            tx.push_lossy(frame(n));
        }
        monitor.poll();
        assert_eq!(monitor.history().len(), FEATURE_HISTORY);
        assert_eq!(monitor.history().get(FEATURE_HISTORY - 1).map(|f| f.frame_number), Some(18));
    }

    #[test]
    fn test_counts_dropped_frames() {
        let (mut tx, rx) = realtime_queue(4).unwrap();
        let monitor = FeatureMonitor::new(rx);
        for n in 0..5 {
            tx.push_lossy(frame(n));
        }
        assert_eq!(monitor.dropped(), 2);
    }
}
