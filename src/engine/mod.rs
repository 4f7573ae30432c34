//! Engine module
//!
//! Threading, messaging and memory plumbing shared by every processor:
//! lock-free queues between the control plane and the audio thread, the
//! real-time memory pool, engine configuration and errors. With the
//! `device` feature it also owns the cpal output stream and MIDI input.

#[cfg(feature = "device")]
pub mod audio_engine;
pub mod channels;
pub mod commands;
pub mod config;
pub mod context;
pub mod error;
pub mod memory_pool;
#[cfg(feature = "device")]
pub mod midi_engine;
pub mod renderer;

#[cfg(feature = "device")]
pub use audio_engine::{AudioEngine, DeviceInfo};
pub use channels::{
    realtime_queue, ControlHandle, EngineChannels, EngineHandle, InferenceHandle, QueueConfig,
    QueueConsumer, QueueProducer, QueueStats,
};
pub use commands::{
    AsyncResult, AsyncResultKind, AudioSnapshot, MeterUpdate, NoteEvent, NoteEventKind,
    ParamTarget, ParameterChange, TransportCommand, TransportKind,
};
pub use config::{EngineConfig, MAX_CHANNELS};
pub use context::EngineContext;
pub use error::{EngineError, EngineResult};
pub use memory_pool::{MemoryPool, PoolBlock, PoolStats};
#[cfg(feature = "device")]
pub use midi_engine::{MidiDeviceInfo, MidiEngine};
pub use renderer::InterleavedRenderer;
