//! Audio tap for the inference collaborator.
//!
//! Collects a mono mixdown of the master signal into fixed-size snapshots
//! and keeps the latest result of each kind that comes back.

use crate::engine::channels::{QueueConsumer, QueueProducer};
use crate::engine::commands::{AsyncResult, AsyncResultKind, AudioSnapshot, SNAPSHOT_LEN};

pub struct AiTap {
    snapshot: AudioSnapshot,
    fill: usize,
    /// Stream position of the next sample fed in.
    position: u64,
    latest: [Option<AsyncResult>; AsyncResultKind::COUNT],
    received: u64,
    snapshots_sent: u64,
}

impl AiTap {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            snapshot: AudioSnapshot::silent(sample_rate),
            fill: 0,
            position: 0,
            latest: [None; AsyncResultKind::COUNT],
            received: 0,
            snapshots_sent: 0,
        }
    }

    pub fn reset(&mut self) {
        self.fill = 0;
        self.position = 0;
        self.latest = [None; AsyncResultKind::COUNT];
        self.received = 0;
        self.snapshots_sent = 0;
    }

    /// Appends mono samples. Every completed snapshot is handed to `sink`;
    /// returns how many were completed.
    ///
    /// REAL-TIME SAFE.
    pub fn feed<F: FnMut(&AudioSnapshot)>(&mut self, mono: &[f32], mut sink: F) -> usize {
        let mut completed = 0;
        let mut rest = mono;
        while !rest.is_empty() {
            if self.fill == 0 {
                self.snapshot.stream_position = self.position;
            }
            let take = (SNAPSHOT_LEN - self.fill).min(rest.len());
            self.snapshot.samples[self.fill..self.fill + take].copy_from_slice(&rest[..take]);
            self.fill += take;
            self.position += take as u64;
            rest = &rest[take..];

            if self.fill == SNAPSHOT_LEN {
                sink(&self.snapshot);
                self.fill = 0;
                self.snapshots_sent += 1;
                completed += 1;
            }
        }
        completed
    }

    /// Feeds samples and pushes completed snapshots, dropping them if the
    /// inference side is behind.
    pub fn feed_queue(&mut self, mono: &[f32], tx: &mut QueueProducer<AudioSnapshot>) -> usize {
        self.feed(mono, |snapshot| tx.push_lossy(*snapshot))
    }

    pub fn accept(&mut self, result: AsyncResult) {
        self.latest[result.kind.index()] = Some(result);
        self.received += 1;
    }

    /// Drains pending results. Returns how many arrived.
    pub fn drain_results(&mut self, rx: &mut QueueConsumer<AsyncResult>, limit: usize) -> usize {
        rx.drain_at_most(limit, |result| self.accept(result))
    }

    pub fn latest(&self, kind: AsyncResultKind) -> Option<&AsyncResult> {
        self.latest[kind.index()].as_ref()
    }

    pub fn results_received(&self) -> u64 {
        self.received
    }

    pub fn snapshots_sent(&self) -> u64 {
        self.snapshots_sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::channels::realtime_queue;

    #[test]
    fn test_snapshots_complete_across_blocks() {
        let mut tap = AiTap::new(48000.0);
        let block: Vec<f32> = (0..600).map(|i| i as f32).collect();
        let mut positions = Vec::new();
        let mut firsts = Vec::new();

        for _ in 0..4 {
            tap.feed(&block, |s| {
                positions.push(s.stream_position);
                firsts.push(s.samples[0]);
            });
        }
        assert_eq!(positions, vec![0, 1024], "2400 samples make two snapshots");
        assert_eq!(firsts, vec![0.0, 424.0], "second snapshot starts mid-block");
        assert_eq!(tap.snapshots_sent(), 2);
    }

    #[test]
    fn test_queue_is_lossy() {
        let (mut tx, mut rx) = realtime_queue::<AudioSnapshot>(2).unwrap();
        let mut tap = AiTap::new(48000.0);
        let samples = vec![0.1; SNAPSHOT_LEN * 3];
        assert_eq!(tap.feed_queue(&samples, &mut tx), 3);
        assert_eq!(tx.overflow_count(), 2, "one slot, three snapshots");
        assert!(rx.pop().is_some());
    }

    #[test]
    fn test_latest_result_per_kind() {
        let (mut tx, mut rx) = realtime_queue::<AsyncResult>(8).unwrap();
        let mut tap = AiTap::new(48000.0);
        for id in 0..3 {
            let mut r = AsyncResult::new(AsyncResultKind::BeatAnalysis, id);
            r.confidence = 0.5;
            tx.try_push(r).unwrap();
        }
        tx.try_push(AsyncResult::new(AsyncResultKind::ChordSuggestion, 9)).unwrap();

        assert_eq!(tap.drain_results(&mut rx, 64), 4);
        assert_eq!(tap.latest(AsyncResultKind::BeatAnalysis).map(|r| r.request_id), Some(2));
        assert_eq!(tap.latest(AsyncResultKind::ChordSuggestion).map(|r| r.request_id), Some(9));
        assert!(tap.latest(AsyncResultKind::GrooveExtraction).is_none());
        assert_eq!(tap.results_received(), 4);
    }
}
