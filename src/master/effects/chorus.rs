//! Modulated-delay chorus, one voice per channel with offset LFO phases.
//!
//! Parameters: rate (Hz), depth (0..1), delay (ms), feedback (0..0.9).

use std::f32::consts::TAU;

use crate::dsp::AudioBuffer;

use super::{read_interpolated, EffectParams};

const RATE: usize = 0;
const DEPTH: usize = 1;
const DELAY: usize = 2;
const FEEDBACK: usize = 3;

const MAX_BASE_DELAY_MS: f32 = 30.0;

struct ChorusVoice {
    line: Vec<f32>,
    write_pos: usize,
    phase: f32,
    initial_phase: f32,
}

impl ChorusVoice {
    fn new(len: usize, phase: f32) -> Self {
        Self {
            line: vec![0.0; len],
            write_pos: 0,
            phase,
            initial_phase: phase,
        }
    }

    #[inline]
    fn tick(&mut self, input: f32, phase_inc: f32, depth: f32, base: f32, feedback: f32) -> f32 {
        self.phase += phase_inc;
        if self.phase >= 1.0 {
            self.phase -= 1.0;
        }
        let lfo = (self.phase * TAU).sin();
        let max_delay = (self.line.len() - 2) as f32;
        let delay = (base + lfo * depth * base).clamp(1.0, max_delay);

        let delayed = read_interpolated(&self.line, self.write_pos, delay);
        self.line[self.write_pos] = input + delayed * feedback;
        self.write_pos = (self.write_pos + 1) % self.line.len();
        delayed
    }

    fn reset(&mut self) {
        self.line.fill(0.0);
        self.write_pos = 0;
        self.phase = self.initial_phase;
    }
}

pub struct Chorus {
    sample_rate: f32,
    voices: Vec<ChorusVoice>,
}

impl Chorus {
    pub const DEFAULTS: [f32; 4] = [0.8, 0.5, 12.0, 0.2];

    pub fn new(sample_rate: f32, num_channels: usize) -> Self {
        // Base delay plus full-depth modulation, with interpolation headroom.
        let len = (2.0 * MAX_BASE_DELAY_MS * 0.001 * sample_rate) as usize + 4;
        let voices = (0..num_channels)
            .map(|ch| ChorusVoice::new(len, ch as f32 / num_channels.max(1) as f32))
            .collect();
        Self {
            sample_rate,
            voices,
        }
    }

    pub fn reset(&mut self) {
        self.voices.iter_mut().for_each(ChorusVoice::reset);
    }

    pub fn process(&mut self, buffer: &mut AudioBuffer, params: &EffectParams, mix: f32) {
        let phase_inc = params[RATE].clamp(0.05, 5.0) / self.sample_rate;
        let depth = params[DEPTH].clamp(0.0, 1.0);
        let base = params[DELAY].clamp(1.0, MAX_BASE_DELAY_MS) * 0.001 * self.sample_rate;
        let feedback = params[FEEDBACK].clamp(0.0, 0.9);

        for (ch, voice) in buffer.channels_mut().zip(self.voices.iter_mut()) {
            for s in ch.iter_mut() {
                let wet = voice.tick(*s, phase_inc, depth, base, feedback);
                *s += mix * (wet - *s);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_impulse_is_delayed() {
        let mut chorus = Chorus::new(48000.0, 1);
        let mut params = [0.0; 8];
        params[..4].copy_from_slice(&[0.05, 0.0, 10.0, 0.0]);
        let mut buf = AudioBuffer::new(1, 1024);
        buf.channel_mut(0)[0] = 1.0;
        chorus.process(&mut buf, &params, 1.0);
        // 10 ms at 48 kHz with no depth.
        let (pos, _) = buf
            .channel(0)
            .iter()
            .enumerate()
            .fold((0, 0.0f32), |best, (i, &v)| if v.abs() > best.1 { (i, v.abs()) } else { best });
        assert_eq!(pos, 480, "wet impulse arrives after the base delay");
    }
}
