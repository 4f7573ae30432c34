//! Multi-channel audio buffers.
//!
//! Buffers are allocated once with a fixed per-channel capacity. Each block
//! sets the active length with [`AudioBuffer::set_len`]; nothing here
//! allocates after construction.

/// Planar multi-channel sample buffer.
#[derive(Clone, Debug)]
pub struct AudioBuffer {
    channels: Vec<Vec<f32>>,
    len: usize,
}

impl AudioBuffer {
    /// Creates a zeroed buffer with `num_channels` channels of `capacity`
    /// samples. The active length starts at `capacity`.
    pub fn new(num_channels: usize, capacity: usize) -> Self {
        Self {
            channels: vec![vec![0.0; capacity]; num_channels],
            len: capacity,
        }
    }

    /// Builds a buffer from planar channel data. Every channel is truncated to
    /// the shortest one.
    pub fn from_channels(data: &[&[f32]]) -> Self {
        let len = data.iter().map(|c| c.len()).min().unwrap_or(0);
        Self {
            channels: data.iter().map(|c| c[..len].to_vec()).collect(),
            len,
        }
    }

    #[inline]
    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    /// Active number of samples per channel.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Maximum number of samples per channel.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.channels.first().map_or(0, |c| c.len())
    }

    /// Sets the active length, clamped to capacity. Returns the new length.
    #[inline]
    pub fn set_len(&mut self, len: usize) -> usize {
        self.len = len.min(self.capacity());
        self.len
    }

    #[inline]
    pub fn channel(&self, index: usize) -> &[f32] {
        &self.channels[index][..self.len]
    }

    #[inline]
    pub fn channel_mut(&mut self, index: usize) -> &mut [f32] {
        let len = self.len;
        &mut self.channels[index][..len]
    }

    /// Mutable access to two distinct channels at once.
    pub fn channel_pair_mut(&mut self, a: usize, b: usize) -> (&mut [f32], &mut [f32]) {
        debug_assert!(a < b);
        let len = self.len;
        let (lo, hi) = self.channels.split_at_mut(b);
        (&mut lo[a][..len], &mut hi[0][..len])
    }

    pub fn channels_mut(&mut self) -> impl Iterator<Item = &mut [f32]> + '_ {
        let len = self.len;
        self.channels.iter_mut().map(move |c| &mut c[..len])
    }

    /// Zeroes the active region of every channel.
    pub fn clear(&mut self) {
        for channel in self.channels_mut() {
            channel.fill(0.0);
        }
    }

    /// Copies `other` into this buffer, taking over its active length.
    /// Channels missing from `other` repeat its last channel.
    pub fn copy_from(&mut self, other: &AudioBuffer) {
        let len = self.set_len(other.len());
        if other.num_channels() == 0 {
            self.clear();
            return;
        }
        for (ch, dst) in self.channels.iter_mut().enumerate() {
            let src = other.channel(ch.min(other.num_channels() - 1));
            dst[..len].copy_from_slice(&src[..len]);
        }
    }

    /// Adds `other * gain` into the active region.
    pub fn add_from(&mut self, other: &AudioBuffer, gain: f32) {
        if other.num_channels() == 0 {
            return;
        }
        let len = self.len.min(other.len());
        for (ch, dst) in self.channels.iter_mut().enumerate() {
            let src = other.channel(ch.min(other.num_channels() - 1));
            for (d, s) in dst[..len].iter_mut().zip(&src[..len]) {
                *d += s * gain;
            }
        }
    }

    pub fn apply_gain(&mut self, gain: f32) {
        for channel in self.channels_mut() {
            for s in channel.iter_mut() {
                *s *= gain;
            }
        }
    }

    pub fn peak(&self, channel: usize) -> f32 {
        peak(self.channel(channel))
    }

    pub fn rms(&self, channel: usize) -> f32 {
        rms(self.channel(channel))
    }

    /// Writes the mono average of all channels into `out`. Returns the number
    /// of samples written.
    pub fn mix_to_mono(&self, out: &mut [f32]) -> usize {
        let n = self.len.min(out.len());
        let channels = self.num_channels();
        if channels == 0 {
            out[..n].fill(0.0);
            return n;
        }
        let scale = 1.0 / channels as f32;
        for (i, o) in out[..n].iter_mut().enumerate() {
            *o = self.channels.iter().map(|c| c[i]).sum::<f32>() * scale;
        }
        n
    }

    /// Fills the buffer from interleaved frames. Returns the frame count.
    pub fn read_interleaved(&mut self, data: &[f32], num_channels: usize) -> usize {
        if num_channels == 0 {
            return 0;
        }
        let frames = self.set_len(data.len() / num_channels);
        for (ch, dst) in self.channels.iter_mut().enumerate() {
            let src_ch = ch.min(num_channels - 1);
            for (i, d) in dst[..frames].iter_mut().enumerate() {
                *d = data[i * num_channels + src_ch];
            }
        }
        frames
    }

    /// Writes the active region into interleaved frames. Output channels
    /// beyond the buffer's channel count repeat its last channel.
    pub fn write_interleaved(&self, data: &mut [f32], num_channels: usize) {
        if num_channels == 0 || self.num_channels() == 0 {
            data.fill(0.0);
            return;
        }
        let frames = (data.len() / num_channels).min(self.len);
        for (i, frame) in data.chunks_mut(num_channels).take(frames).enumerate() {
            for (ch, sample) in frame.iter_mut().enumerate() {
                *sample = self.channels[ch.min(self.num_channels() - 1)][i];
            }
        }
        data[frames * num_channels..].fill(0.0);
    }
}

/// Peak absolute value of a slice.
#[inline]
pub fn peak(samples: &[f32]) -> f32 {
    samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()))
}

/// Root-mean-square of a slice, 0 when empty.
#[inline]
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt()
}

/// Converts decibels to a linear gain factor.
#[inline]
pub fn db_to_linear(db: f32) -> f32 {
    10.0f32.powf(db / 20.0)
}

/// Clamps `value` into `min..=max`. NaN and infinities map to `fallback`,
/// which callers pass already inside the range.
#[inline]
pub fn clamp_finite(value: f32, min: f32, max: f32, fallback: f32) -> f32 {
    if value.is_finite() {
        value.clamp(min, max)
    } else {
        fallback
    }
}

/// Converts a linear gain to decibels, floored at -120 dB.
#[inline]
pub fn linear_to_db(linear: f32) -> f32 {
    20.0 * linear.max(1e-6).log10()
}
