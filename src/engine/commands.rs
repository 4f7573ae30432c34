//! Messages exchanged between the control plane and the audio thread.
//!
//! Every type here is `Copy`, fixed-size and free of pointers so it can be
//! moved through an SPSC queue without touching the allocator.

use crate::analysis::AnalysisParam;
use crate::eq::EqParam;
use crate::master::MasterParam;
use crate::synth::SynthParam;

/// Control-plane timestamp: microseconds or samples, at the sender's choice.
/// The engine only uses it for ordering diagnostics.
pub type Timestamp = u64;

/// Addresses one settable parameter anywhere in the engine.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ParamTarget {
    Synth(SynthParam),
    Eq(EqParam),
    Analysis(AnalysisParam),
    Master(MasterParam),
}

/// A parameter update, applied at the next block boundary.
///
/// Discrete parameters (waveforms, band types, models, flags) carry their
/// choice as the numeric index in `value`; flags treat `value >= 0.5` as on.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ParameterChange {
    pub target: ParamTarget,
    pub value: f32,
    pub timestamp: Timestamp,
}

impl ParameterChange {
    pub fn new(target: ParamTarget, value: f32) -> Self {
        Self {
            target,
            value,
            timestamp: 0,
        }
    }

    pub fn flag(target: ParamTarget, on: bool) -> Self {
        Self::new(target, if on { 1.0 } else { 0.0 })
    }

    pub fn at(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Interprets a parameter value as a boolean flag.
#[inline]
pub fn as_flag(value: f32) -> bool {
    value >= 0.5
}

/// Interprets a parameter value as a discrete choice index.
#[inline]
pub fn as_index(value: f32) -> usize {
    if value.is_finite() && value > 0.0 {
        value.round() as usize
    } else {
        0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportKind {
    Play,
    Stop,
    Pause,
    Record,
    SetPosition,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TransportCommand {
    pub kind: TransportKind,
    /// Target position, used by `SetPosition`.
    pub position_seconds: f64,
    pub timestamp: Timestamp,
}

impl TransportCommand {
    pub fn new(kind: TransportKind) -> Self {
        Self {
            kind,
            position_seconds: 0.0,
            timestamp: 0,
        }
    }

    pub fn locate(seconds: f64) -> Self {
        Self {
            kind: TransportKind::SetPosition,
            position_seconds: seconds,
            timestamp: 0,
        }
    }
}

/// Level meter reading for one channel, pushed once per block.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MeterUpdate {
    pub channel: u8,
    pub peak: f32,
    pub rms: f32,
    pub timestamp: Timestamp,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AsyncResultKind {
    ChordSuggestion,
    MelodyGeneration,
    BeatAnalysis,
    GrooveExtraction,
}

impl AsyncResultKind {
    pub const COUNT: usize = 4;

    pub fn index(self) -> usize {
        match self {
            AsyncResultKind::ChordSuggestion => 0,
            AsyncResultKind::MelodyGeneration => 1,
            AsyncResultKind::BeatAnalysis => 2,
            AsyncResultKind::GrooveExtraction => 3,
        }
    }
}

pub const ASYNC_RESULT_LEN: usize = 16;

/// Result delivered by the inference collaborator.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AsyncResult {
    pub kind: AsyncResultKind,
    pub request_id: u32,
    pub confidence: f32,
    pub data: [f32; ASYNC_RESULT_LEN],
}

impl AsyncResult {
    pub fn new(kind: AsyncResultKind, request_id: u32) -> Self {
        Self {
            kind,
            request_id,
            confidence: 0.0,
            data: [0.0; ASYNC_RESULT_LEN],
        }
    }
}

/// Number of mono samples in one audio snapshot for the inference side.
pub const SNAPSHOT_LEN: usize = 1024;

/// Read-only copy of recent master audio (mono mixdown).
#[derive(Clone, Copy, Debug)]
pub struct AudioSnapshot {
    pub samples: [f32; SNAPSHOT_LEN],
    pub sample_rate: f32,
    /// Stream position (in samples) of the first sample.
    pub stream_position: u64,
}

impl AudioSnapshot {
    pub fn silent(sample_rate: f32) -> Self {
        Self {
            samples: [0.0; SNAPSHOT_LEN],
            sample_rate,
            stream_position: 0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NoteEventKind {
    NoteOn { note: u8, velocity: u8 },
    NoteOff { note: u8 },
    AllNotesOff,
}

/// A note event positioned inside the current block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NoteEvent {
    /// Frame offset from the start of the block.
    pub sample_offset: u32,
    pub kind: NoteEventKind,
}

impl NoteEvent {
    pub fn note_on(sample_offset: u32, note: u8, velocity: u8) -> Self {
        Self {
            sample_offset,
            kind: NoteEventKind::NoteOn {
                note: note & 0x7F,
                velocity: velocity & 0x7F,
            },
        }
    }

    pub fn note_off(sample_offset: u32, note: u8) -> Self {
        Self {
            sample_offset,
            kind: NoteEventKind::NoteOff { note: note & 0x7F },
        }
    }

    pub fn all_notes_off(sample_offset: u32) -> Self {
        Self {
            sample_offset,
            kind: NoteEventKind::AllNotesOff,
        }
    }

    /// Parses a raw MIDI message. Note-on with velocity 0 is a note-off;
    /// CC 120/123 release everything. Anything else is ignored.
    pub fn from_midi(sample_offset: u32, data: &[u8]) -> Option<Self> {
        let (&status, rest) = data.split_first()?;
        match status & 0xF0 {
            0x90 if rest.len() >= 2 => {
                if rest[1] & 0x7F == 0 {
                    Some(Self::note_off(sample_offset, rest[0]))
                } else {
                    Some(Self::note_on(sample_offset, rest[0], rest[1]))
                }
            }
            0x80 if rest.len() >= 2 => Some(Self::note_off(sample_offset, rest[0])),
            0xB0 if rest.len() >= 2 && matches!(rest[0] & 0x7F, 120 | 123) => {
                Some(Self::all_notes_off(sample_offset))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_midi() {
        assert_eq!(
            NoteEvent::from_midi(3, &[0x90, 69, 100]),
            Some(NoteEvent::note_on(3, 69, 100))
        );
        assert_eq!(
            NoteEvent::from_midi(0, &[0x91, 60, 0]),
            Some(NoteEvent::note_off(0, 60)),
            "velocity zero note-on is a note-off"
        );
        assert_eq!(
            NoteEvent::from_midi(0, &[0x80, 60, 64]),
            Some(NoteEvent::note_off(0, 60))
        );
        assert_eq!(
            NoteEvent::from_midi(0, &[0xB0, 123, 0]),
            Some(NoteEvent::all_notes_off(0))
        );
        assert_eq!(NoteEvent::from_midi(0, &[0xB0, 7, 100]), None);
        assert_eq!(NoteEvent::from_midi(0, &[0x90, 60]), None, "truncated message");
        assert_eq!(NoteEvent::from_midi(0, &[]), None);
    }

    #[test]
    fn test_param_value_helpers() {
        assert!(as_flag(1.0));
        assert!(!as_flag(0.49));
        assert_eq!(as_index(2.2), 2);
        assert_eq!(as_index(-4.0), 0);
        assert_eq!(as_index(f32::NAN), 0);
    }

    #[test]
    fn test_messages_are_copy() {
        fn assert_copy<T: Copy + Send + 'static>() {}
        assert_copy::<ParameterChange>();
        assert_copy::<TransportCommand>();
        assert_copy::<MeterUpdate>();
        assert_copy::<AsyncResult>();
        assert_copy::<NoteEvent>();
        assert_copy::<AudioSnapshot>();
    }

    #[test]
    fn test_async_result_kind_index() {
        assert_eq!(AsyncResultKind::GrooveExtraction.index(), AsyncResultKind::COUNT - 1);
        let r = AsyncResult::new(AsyncResultKind::BeatAnalysis, 7);
        assert_eq!(r.request_id, 7);
        assert_eq!(r.data, [0.0; ASYNC_RESULT_LEN]);
    }
}
