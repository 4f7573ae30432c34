//! Freeverb-style stereo reverb. Renders wet signal only; the rack blends
//! it with the dry copy.
//!
//! Parameters: size (0..1), decay (seconds to -60 dB), damping (0..1),
//! pre-delay (ms), width (0..1).

use crate::dsp::AudioBuffer;

use super::EffectParams;

const SIZE: usize = 0;
const DECAY: usize = 1;
const DAMPING: usize = 2;
const PREDELAY: usize = 3;
const WIDTH: usize = 4;

/// Delay tunings in samples at 44.1 kHz.
const COMB_TUNINGS: [usize; 8] = [1116, 1188, 1277, 1356, 1422, 1491, 1557, 1617];
const ALLPASS_TUNINGS: [usize; 4] = [556, 441, 341, 225];
const STEREO_SPREAD: usize = 23;

const MAX_PREDELAY_MS: f32 = 100.0;
const ALLPASS_FEEDBACK: f32 = 0.5;

struct CombFilter {
    line: Vec<f32>,
    /// Active length, at most `line.len()`. Set from the room size.
    len: usize,
    pos: usize,
    damp_state: f32,
}

impl CombFilter {
    fn new(max_len: usize) -> Self {
        Self {
            line: vec![0.0; max_len.max(1)],
            len: max_len.max(1),
            pos: 0,
            damp_state: 0.0,
        }
    }

    fn set_len(&mut self, len: usize) {
        self.len = len.clamp(1, self.line.len());
        if self.pos >= self.len {
            self.pos = 0;
        }
    }

    #[inline]
    fn process(&mut self, input: f32, feedback: f32, damping: f32) -> f32 {
        let out = self.line[self.pos];
        self.damp_state = out * (1.0 - damping) + self.damp_state * damping;
        self.line[self.pos] = input + self.damp_state * feedback;
        self.pos += 1;
        if self.pos >= self.len {
            self.pos = 0;
        }
        out
    }

    fn clear(&mut self) {
        self.line.fill(0.0);
        self.damp_state = 0.0;
        self.pos = 0;
    }
}

struct AllpassFilter {
    line: Vec<f32>,
    pos: usize,
}

impl AllpassFilter {
    fn new(len: usize) -> Self {
        Self {
            line: vec![0.0; len.max(1)],
            pos: 0,
        }
    }

    #[inline]
    fn process(&mut self, input: f32) -> f32 {
        let buffered = self.line[self.pos];
        self.line[self.pos] = input + buffered * ALLPASS_FEEDBACK;
        self.pos = (self.pos + 1) % self.line.len();
        buffered - input
    }

    fn clear(&mut self) {
        self.line.fill(0.0);
        self.pos = 0;
    }
}

struct Tank {
    combs: Vec<CombFilter>,
    allpasses: Vec<AllpassFilter>,
}

impl Tank {
    fn new(scale: f32, spread: usize) -> Self {
        Self {
            // Full size doubles the nominal tunings.
            combs: COMB_TUNINGS
                .iter()
                .map(|&t| CombFilter::new(((t + spread) as f32 * scale * 2.0) as usize))
                .collect(),
            allpasses: ALLPASS_TUNINGS
                .iter()
                .map(|&t| AllpassFilter::new(((t + spread) as f32 * scale) as usize))
                .collect(),
        }
    }

    fn set_room(&mut self, scale: f32, spread: usize, room: f32) {
        for (comb, &t) in self.combs.iter_mut().zip(&COMB_TUNINGS) {
            comb.set_len(((t + spread) as f32 * scale * room) as usize);
        }
    }

    #[inline]
    fn process(&mut self, input: f32, feedback: f32, damping: f32) -> f32 {
        let mut sum = 0.0;
        for comb in &mut self.combs {
            sum += comb.process(input, feedback, damping);
        }
        let mut out = sum * 0.125;
        for ap in &mut self.allpasses {
            out = ap.process(out);
        }
        out
    }

    fn clear(&mut self) {
        self.combs.iter_mut().for_each(CombFilter::clear);
        self.allpasses.iter_mut().for_each(AllpassFilter::clear);
    }
}

pub struct Reverb {
    sample_rate: f32,
    scale: f32,
    left: Tank,
    right: Tank,
    predelay: Vec<f32>,
    predelay_pos: usize,
}

impl Reverb {
    pub const DEFAULTS: [f32; 5] = [0.5, 2.0, 0.5, 10.0, 1.0];

    pub fn new(sample_rate: f32, _num_channels: usize) -> Self {
        let scale = sample_rate / 44100.0;
        Self {
            sample_rate,
            scale,
            left: Tank::new(scale, 0),
            right: Tank::new(scale, STEREO_SPREAD),
            predelay: vec![0.0; (MAX_PREDELAY_MS * 0.001 * sample_rate) as usize + 1],
            predelay_pos: 0,
        }
    }

    pub fn reset(&mut self) {
        self.left.clear();
        self.right.clear();
        self.predelay.fill(0.0);
        self.predelay_pos = 0;
    }

    /// Feedback giving -60 dB after `decay_seconds` for a loop of
    /// `delay_samples`.
    pub fn decay_to_feedback(decay_seconds: f32, delay_samples: f32, sample_rate: f32) -> f32 {
        let delay_seconds = delay_samples / sample_rate;
        if decay_seconds <= 0.0 || delay_seconds <= 0.0 {
            return 0.0;
        }
        (-3.0 * delay_seconds / decay_seconds).exp().clamp(0.0, 0.98)
    }

    /// Replaces every channel of `buffer` with the reverb tail of its mono
    /// sum. Channels past the first two get the mid signal.
    pub fn process(&mut self, buffer: &mut AudioBuffer, params: &EffectParams) {
        let room = 0.5 + params[SIZE].clamp(0.0, 1.0) * 0.5;
        let decay = params[DECAY].clamp(0.1, 30.0);
        let damping = params[DAMPING].clamp(0.0, 1.0);
        let predelay = ((params[PREDELAY].clamp(0.0, MAX_PREDELAY_MS) * 0.001 * self.sample_rate)
            as usize)
            .min(self.predelay.len() - 1);
        let width = params[WIDTH].clamp(0.0, 1.0);

        self.left.set_room(self.scale, 0, room);
        self.right.set_room(self.scale, STEREO_SPREAD, room);
        let avg_delay = COMB_TUNINGS.iter().sum::<usize>() as f32 / 8.0 * self.scale * room;
        let feedback = Self::decay_to_feedback(decay, avg_delay, self.sample_rate);

        let channels = buffer.num_channels();
        if channels == 0 {
            return;
        }
        let norm = 1.0 / channels as f32;
        let line_len = self.predelay.len();

        for i in 0..buffer.len() {
            let mut input = 0.0;
            for ch in 0..channels {
                input += buffer.channel(ch)[i];
            }
            input *= norm;

            self.predelay[self.predelay_pos] = input;
            let read = (self.predelay_pos + line_len - predelay) % line_len;
            let delayed = self.predelay[read];
            self.predelay_pos = (self.predelay_pos + 1) % line_len;

            let wet_l = self.left.process(delayed, feedback, damping);
            let wet_r = self.right.process(delayed, feedback, damping);
            let mid = (wet_l + wet_r) * 0.5;
            let side = (wet_l - wet_r) * 0.5 * width;

            for ch in 0..channels {
                buffer.channel_mut(ch)[i] = match ch {
                    0 if channels > 1 => mid + side,
                    1 => mid - side,
                    _ => mid,
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> EffectParams {
        let mut p = [0.0; 8];
        p[..5].copy_from_slice(&Reverb::DEFAULTS);
        p
    }

    #[test]
    fn test_decay_to_feedback() {
        let fb = Reverb::decay_to_feedback(2.0, 1500.0, 48000.0);
        assert!(fb > 0.9 && fb < 0.98, "got {}", fb);
        assert_eq!(Reverb::decay_to_feedback(0.0, 1500.0, 48000.0), 0.0);
        assert_eq!(Reverb::decay_to_feedback(1000.0, 1500.0, 48000.0), 0.98, "clamped");
    }

    #[test]
    fn test_impulse_produces_tail() {
        let mut reverb = Reverb::new(48000.0, 2);
        let mut buf = AudioBuffer::new(2, 4096);
        buf.channel_mut(0)[0] = 1.0;
        buf.channel_mut(1)[0] = 1.0;
        reverb.process(&mut buf, &params());
        assert!(buf.rms(0) > 1e-4, "tail present on the left");
        assert!(buf.rms(1) > 1e-4, "tail present on the right");
        assert_ne!(buf.channel(0), buf.channel(1), "stereo spread decorrelates");

        let mut silent = AudioBuffer::new(2, 48000 * 4);
        reverb.process(&mut silent, &params());
        let end = silent.len() - 4800;
        let late = crate::dsp::peak(&silent.channel(0)[end..]);
        assert!(late < 1e-3, "tail decays, got {}", late);
    }

    #[test]
    fn test_zero_width_is_mono() {
        let mut reverb = Reverb::new(44100.0, 2);
        let mut p = params();
        p[WIDTH] = 0.0;
        let mut buf = AudioBuffer::new(2, 4096);
        buf.channel_mut(0)[0] = 1.0;
        reverb.process(&mut buf, &p);
        assert_eq!(buf.channel(0), buf.channel(1));
    }
}
