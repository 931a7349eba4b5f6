use std::collections::VecDeque;

/// Rolling window of mono samples normalized to `-1.0..=1.0`, reduced to one
/// peak amplitude per output column on demand.
#[derive(Debug, Clone)]
pub struct WaveformBuffer {
    capacity: usize,
    samples: VecDeque<f32>,
    carry: Option<u8>,
    peaks: Vec<f32>,
}

impl WaveformBuffer {
    /// `window_ms` of audio at `sample_rate` Hz.
    pub fn new(sample_rate: u32, window_ms: u32) -> Self {
        let capacity = (u64::from(sample_rate) * u64::from(window_ms) / 1000).max(1) as usize;
        Self {
            capacity,
            samples: VecDeque::with_capacity(capacity),
            carry: None,
            peaks: Vec::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Append signed 16-bit little-endian PCM. A dangling odd byte is held
    /// until the next call.
    pub fn push_pcm_s16le(&mut self, mut bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        if let Some(low) = self.carry.take() {
            self.push_sample(i16::from_le_bytes([low, bytes[0]]));
            bytes = &bytes[1..];
        }
        let mut pairs = bytes.chunks_exact(2);
        for pair in pairs.by_ref() {
            self.push_sample(i16::from_le_bytes([pair[0], pair[1]]));
        }
        if let [odd] = pairs.remainder() {
            self.carry = Some(*odd);
        }
    }

    fn push_sample(&mut self, sample: i16) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(f32::from(sample) / 32768.0);
    }

    /// One absolute peak per column over equal slices of the window.
    pub fn recompute_peaks(&mut self, columns: usize) -> &[f32] {
        self.peaks.clear();
        self.peaks.resize(columns, 0.0);
        let len = self.samples.len();
        if columns == 0 || len == 0 {
            return &self.peaks;
        }
        for (column, peak) in self.peaks.iter_mut().enumerate() {
            let start = column * len / columns;
            let end = ((column + 1) * len / columns).max(start + 1).min(len);
            *peak = self
                .samples
                .range(start..end)
                .fold(0.0_f32, |acc, sample| acc.max(sample.abs()));
        }
        &self.peaks
    }

    pub fn peaks(&self) -> &[f32] {
        &self.peaks
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.carry = None;
        self.peaks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcm(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn odd_bytes_are_carried() {
        let mut buffer = WaveformBuffer::new(1000, 1000);
        let bytes = pcm(&[16384, -16384]);
        buffer.push_pcm_s16le(&bytes[..3]);
        assert_eq!(buffer.len(), 1);
        buffer.push_pcm_s16le(&bytes[3..]);
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.recompute_peaks(2), &[0.5, 0.5]);
    }

    #[test]
    fn window_rolls() {
        let mut buffer = WaveformBuffer::new(4000, 1);
        assert_eq!(buffer.capacity(), 4);
        buffer.push_pcm_s16le(&pcm(&[32767, 0, 0, 0, 0, 0]));
        assert_eq!(buffer.len(), 4);
        assert_eq!(buffer.recompute_peaks(1), &[0.0]);
    }

    #[test]
    fn peaks_follow_columns() {
        let mut buffer = WaveformBuffer::new(8, 1000);
        buffer.push_pcm_s16le(&pcm(&[0, -8192, 0, 0, 16384, 0, 0, -32768]));
        let peaks = buffer.recompute_peaks(4).to_vec();
        assert_eq!(peaks, vec![0.25, 0.0, 0.5, 1.0]);
        assert!(WaveformBuffer::new(8, 1000).recompute_peaks(3).iter().all(|p| *p == 0.0));
    }
}
