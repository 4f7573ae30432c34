//! Engine channels.
//!
//! Lock-free SPSC queues between the control plane, the audio thread and the
//! inference collaborator, built on `rtrb` ring buffers. A push into a full
//! queue never waits: the message is handed back (or dropped by the lossy
//! variants) and counted in the queue's overflow counter.

use std::sync::Arc;

use rtrb::{Consumer, Producer, RingBuffer};
use serde::{Deserialize, Serialize};

use super::commands::{
    AsyncResult, AudioSnapshot, MeterUpdate, NoteEvent, ParameterChange, TransportCommand,
};
use super::error::{EngineError, EngineResult};
use crate::analysis::{FeatureMonitor, SpectralFeatures};
use crate::dsp::Counter;

/// Depth and overflow figures for one queue.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct QueueStats {
    pub depth: usize,
    /// Nominal slot count. One slot is always kept free, so at most
    /// `capacity - 1` messages are in flight.
    pub capacity: usize,
    pub utilization: f32,
    pub overflow: u64,
}

/// Creates a queue with `capacity` slots (a power of two, at least 2).
/// Exactly `capacity - 1` pushes succeed before the consumer drains it.
pub fn realtime_queue<T>(capacity: usize) -> EngineResult<(QueueProducer<T>, QueueConsumer<T>)> {
    if capacity < 2 || !capacity.is_power_of_two() {
        return Err(EngineError::InvalidQueueCapacity(capacity));
    }
    let (tx, rx) = RingBuffer::new(capacity - 1);
    let overflow = Arc::new(Counter::new());
    Ok((
        QueueProducer {
            inner: tx,
            overflow: Arc::clone(&overflow),
            capacity,
        },
        QueueConsumer {
            inner: rx,
            overflow,
            capacity,
        },
    ))
}

/// Producer end. Owned by exactly one thread.
pub struct QueueProducer<T> {
    inner: Producer<T>,
    overflow: Arc<Counter>,
    capacity: usize,
}

impl<T> QueueProducer<T> {
    /// Queues a message, or hands it back if the queue is full.
    ///
    /// REAL-TIME SAFE: never blocks or allocates.
    pub fn try_push(&mut self, msg: T) -> Result<(), T> {
        self.inner.push(msg).map_err(|rtrb::PushError::Full(msg)| {
            self.overflow.increment();
            msg
        })
    }

    /// Queues a message, dropping it if the queue is full.
    pub fn push_lossy(&mut self, msg: T) {
        let _ = self.try_push(msg);
    }

    pub fn len(&self) -> usize {
        self.capacity - 1 - self.inner.slots()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.inner.is_full()
    }

    pub fn free_slots(&self) -> usize {
        self.inner.slots()
    }

    pub fn overflow_count(&self) -> u64 {
        self.overflow.get()
    }

    pub fn stats(&self) -> QueueStats {
        stats(self.len(), self.capacity, self.overflow.get())
    }
}

/// Consumer end. Owned by exactly one thread.
pub struct QueueConsumer<T> {
    inner: Consumer<T>,
    overflow: Arc<Counter>,
    capacity: usize,
}

impl<T> QueueConsumer<T> {
    /// REAL-TIME SAFE: non-blocking.
    pub fn pop(&mut self) -> Option<T> {
        self.inner.pop().ok()
    }

    /// Hands every pending message to `handler` in FIFO order. Returns the
    /// number of messages consumed. Bounded by the queue capacity plus what
    /// the producer adds while draining, so callers on the audio thread
    /// should prefer [`QueueConsumer::drain_at_most`].
    pub fn drain<F: FnMut(T)>(&mut self, mut handler: F) -> usize {
        let mut count = 0;
        while let Some(msg) = self.pop() {
            handler(msg);
            count += 1;
        }
        count
    }

    /// Like [`QueueConsumer::drain`] but stops after `limit` messages.
    pub fn drain_at_most<F: FnMut(T)>(&mut self, limit: usize, mut handler: F) -> usize {
        let mut count = 0;
        while count < limit {
            match self.pop() {
                Some(msg) => {
                    handler(msg);
                    count += 1;
                }
                None => break,
            }
        }
        count
    }

    pub fn len(&self) -> usize {
        self.inner.slots()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn overflow_count(&self) -> u64 {
        self.overflow.get()
    }

    pub fn stats(&self) -> QueueStats {
        stats(self.len(), self.capacity, self.overflow.get())
    }
}

fn stats(depth: usize, capacity: usize, overflow: u64) -> QueueStats {
    QueueStats {
        depth,
        capacity,
        utilization: depth as f32 / (capacity - 1) as f32,
        overflow,
    }
}

/// Slot counts for every engine queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub parameters: usize,
    pub notes: usize,
    pub transport: usize,
    pub meters: usize,
    pub ai_results: usize,
    pub snapshots: usize,
    pub features: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            parameters: 512,
            notes: 512,
            transport: 64,
            meters: 1024,
            ai_results: 256,
            snapshots: 16,
            features: 64,
        }
    }
}

/// Builds every queue and splits the ends between the three threads.
pub struct EngineChannels;

impl EngineChannels {
    pub fn new(config: &QueueConfig) -> EngineResult<(ControlHandle, EngineHandle, InferenceHandle)> {
        let (param_tx, param_rx) = realtime_queue(config.parameters)?;
        let (note_tx, note_rx) = realtime_queue(config.notes)?;
        let (transport_tx, transport_rx) = realtime_queue(config.transport)?;
        let (meter_tx, meter_rx) = realtime_queue(config.meters)?;
        let (result_tx, result_rx) = realtime_queue(config.ai_results)?;
        let (snapshot_tx, snapshot_rx) = realtime_queue(config.snapshots)?;
        let (feature_tx, feature_rx) = realtime_queue(config.features)?;

        log::debug!("engine channels created: {:?}", config);

        Ok((
            ControlHandle {
                param_tx,
                note_tx,
                transport_tx,
                meter_rx,
                features: FeatureMonitor::new(feature_rx),
            },
            EngineHandle {
                param_rx,
                note_rx,
                transport_rx,
                meter_tx,
                result_rx,
                snapshot_tx,
                feature_tx,
            },
            InferenceHandle {
                snapshot_rx,
                result_tx,
            },
        ))
    }

    pub fn with_defaults() -> EngineResult<(ControlHandle, EngineHandle, InferenceHandle)> {
        Self::new(&QueueConfig::default())
    }
}

/// Control-plane side (UI, automation, MIDI input).
pub struct ControlHandle {
    param_tx: QueueProducer<ParameterChange>,
    note_tx: QueueProducer<NoteEvent>,
    transport_tx: QueueProducer<TransportCommand>,
    meter_rx: QueueConsumer<MeterUpdate>,
    features: FeatureMonitor,
}

impl ControlHandle {
    /// Returns the change if the parameter queue is full.
    pub fn set_parameter(&mut self, change: ParameterChange) -> Result<(), ParameterChange> {
        self.param_tx.try_push(change)
    }

    pub fn send_note(&mut self, event: NoteEvent) -> Result<(), NoteEvent> {
        self.note_tx.try_push(event)
    }

    pub fn send_transport(&mut self, cmd: TransportCommand) -> Result<(), TransportCommand> {
        self.transport_tx.try_push(cmd)
    }

    pub fn recv_meter(&mut self) -> Option<MeterUpdate> {
        self.meter_rx.pop()
    }

    pub fn drain_meters(&mut self) -> impl Iterator<Item = MeterUpdate> + '_ {
        std::iter::from_fn(|| self.recv_meter())
    }

    /// Latest analysis frames, pulled from the feature queue on demand.
    pub fn features(&mut self) -> &mut FeatureMonitor {
        &mut self.features
    }

    pub fn parameter_queue(&self) -> QueueStats {
        self.param_tx.stats()
    }

    pub fn note_queue(&self) -> QueueStats {
        self.note_tx.stats()
    }
}

/// Audio-thread side. Every method is real-time safe.
pub struct EngineHandle {
    pub(crate) param_rx: QueueConsumer<ParameterChange>,
    pub(crate) note_rx: QueueConsumer<NoteEvent>,
    pub(crate) transport_rx: QueueConsumer<TransportCommand>,
    pub(crate) meter_tx: QueueProducer<MeterUpdate>,
    pub(crate) result_rx: QueueConsumer<AsyncResult>,
    pub(crate) snapshot_tx: QueueProducer<AudioSnapshot>,
    pub(crate) feature_tx: QueueProducer<SpectralFeatures>,
}

impl EngineHandle {
    /// Overflow total across all queues this handle touches.
    pub fn overflow_total(&self) -> u64 {
        self.param_rx.overflow_count()
            + self.note_rx.overflow_count()
            + self.transport_rx.overflow_count()
            + self.meter_tx.overflow_count()
            + self.result_rx.overflow_count()
            + self.snapshot_tx.overflow_count()
            + self.feature_tx.overflow_count()
    }

    pub fn queue_stats(&self) -> EngineQueueStats {
        EngineQueueStats {
            parameters: self.param_rx.stats(),
            notes: self.note_rx.stats(),
            transport: self.transport_rx.stats(),
            meters: self.meter_tx.stats(),
            ai_results: self.result_rx.stats(),
            snapshots: self.snapshot_tx.stats(),
            features: self.feature_tx.stats(),
        }
    }
}

/// Snapshot of every queue, for monitoring.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct EngineQueueStats {
    pub parameters: QueueStats,
    pub notes: QueueStats,
    pub transport: QueueStats,
    pub meters: QueueStats,
    pub ai_results: QueueStats,
    pub snapshots: QueueStats,
    pub features: QueueStats,
}

/// Inference side: receives audio snapshots, returns results.
pub struct InferenceHandle {
    snapshot_rx: QueueConsumer<AudioSnapshot>,
    result_tx: QueueProducer<AsyncResult>,
}

impl InferenceHandle {
    pub fn recv_snapshot(&mut self) -> Option<AudioSnapshot> {
        self.snapshot_rx.pop()
    }

    pub fn send_result(&mut self, result: AsyncResult) -> Result<(), AsyncResult> {
        self.result_tx.try_push(result)
    }

    pub fn snapshot_queue(&self) -> QueueStats {
        self.snapshot_rx.stats()
    }
}
