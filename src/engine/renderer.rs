//! Adapts the block-based master to the interleaved, arbitrarily sized
//! buffers a device callback hands out.

use super::channels::QueueConsumer;
use super::commands::NoteEvent;
use crate::dsp::AudioBuffer;
use crate::master::MasterProcessor;

/// Note events taken from the MIDI queue per device callback.
const MAX_MIDI_EVENTS: usize = 256;

/// Owns the master on the audio thread. Everything is allocated up front.
pub struct InterleavedRenderer {
    master: MasterProcessor,
    midi: Option<QueueConsumer<NoteEvent>>,
    input: AudioBuffer,
    output: AudioBuffer,
    events: Vec<NoteEvent>,
}

impl InterleavedRenderer {
    pub fn new(master: MasterProcessor, midi: Option<QueueConsumer<NoteEvent>>) -> Self {
        let config = master.config();
        let channels = config.num_channels;
        let block = config.max_block_size;
        Self {
            master,
            midi,
            input: AudioBuffer::new(channels, block),
            output: AudioBuffer::new(channels, block),
            events: Vec::with_capacity(MAX_MIDI_EVENTS),
        }
    }

    pub fn master(&self) -> &MasterProcessor {
        &self.master
    }

    pub fn master_mut(&mut self) -> &mut MasterProcessor {
        &mut self.master
    }

    /// Fills `data` (interleaved, `num_channels` wide) by running as many
    /// master blocks as it takes. MIDI notes land at the start of the first
    /// block.
    ///
    /// REAL-TIME SAFE.
    pub fn render(&mut self, data: &mut [f32], num_channels: usize) {
        if num_channels == 0 {
            return;
        }
        self.events.clear();
        if let Some(midi) = self.midi.as_mut() {
            let events = &mut self.events;
            midi.drain_at_most(MAX_MIDI_EVENTS, |e| events.push(NoteEvent { sample_offset: 0, ..e }));
        }

        let block = self.input.capacity();
        let mut first = true;
        for chunk in data.chunks_mut(block * num_channels) {
            let frames = chunk.len() / num_channels;
            self.input.set_len(frames);
            self.input.clear();
            let events: &[NoteEvent] = if first { &self.events } else { &[] };
            first = false;
            self.master.process_block(&self.input, &mut self.output, events);
            self.output.write_interleaved(chunk, num_channels);
        }
    }
}
