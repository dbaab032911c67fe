//! PCM helpers for putting captured audio on the wire as G.711 mu-law.

use bytes::{BufMut, Bytes, BytesMut};

pub const PCMU_RATE: u32 = 8_000;

const BIAS: i32 = 0x84;
const CLIP: i32 = 32_635;

pub fn linear_to_ulaw(sample: i16) -> u8 {
    let mut pcm = sample as i32;
    let sign = if pcm < 0 {
        pcm = -pcm;
        0x80
    } else {
        0x00
    };
    if pcm > CLIP {
        pcm = CLIP;
    }
    pcm += BIAS;

    let mut exponent = 7;
    let mut mask = 0x4000;
    while exponent > 0 && pcm & mask == 0 {
        exponent -= 1;
        mask >>= 1;
    }
    let mantissa = (pcm >> (exponent + 3)) & 0x0F;
    !(sign | (exponent << 4) as i32 | mantissa) as u8
}

pub fn ulaw_to_linear(byte: u8) -> i16 {
    let byte = !byte;
    let sign = byte & 0x80;
    let exponent = ((byte >> 4) & 0x07) as i32;
    let mantissa = (byte & 0x0F) as i32;
    let magnitude = (((mantissa << 3) + BIAS) << exponent) - BIAS;
    if sign != 0 {
        -magnitude as i16
    } else {
        magnitude as i16
    }
}

/// Streaming PCM16 to 8 kHz mu-law encoder. Input frames that do not fill a
/// whole output window are held for the next chunk, so odd rates such as
/// 44.1 kHz lose nothing at chunk boundaries.
#[derive(Debug, Clone)]
pub struct PcmuEncoder {
    sample_rate: u32,
    channels: u16,
    ratio: f64,
    pending: Vec<i32>,
    /// Fractional start of the next window within `pending`
    offset: f64,
}

impl PcmuEncoder {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels: channels.max(1),
            ratio: (sample_rate as f64 / PCMU_RATE as f64).max(1.0),
            pending: Vec::new(),
            offset: 0.0,
        }
    }

    pub fn accepts(&self, sample_rate: u32, channels: u16) -> bool {
        self.sample_rate == sample_rate && self.channels == channels.max(1)
    }

    /// Downmix interleaved little-endian PCM16 to mono, average each window
    /// of input frames down to one 8 kHz sample, then compand.
    pub fn encode(&mut self, pcm: &[u8]) -> Bytes {
        let channels = self.channels as usize;
        let samples: Vec<i16> = pcm
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        self.pending.extend(
            samples
                .chunks_exact(channels)
                .map(|frame| frame.iter().map(|&s| s as i32).sum::<i32>() / channels as i32),
        );

        let mut out = BytesMut::with_capacity((self.pending.len() as f64 / self.ratio) as usize + 1);
        loop {
            let start = self.offset as usize;
            let end = ((self.offset + self.ratio) as usize).max(start + 1);
            if end > self.pending.len() {
                break;
            }
            let window = &self.pending[start..end];
            let avg = window.iter().sum::<i32>() / window.len() as i32;
            out.put_u8(linear_to_ulaw(avg as i16));
            self.offset += self.ratio;
        }

        let consumed = (self.offset as usize).min(self.pending.len());
        self.pending.drain(..consumed);
        self.offset -= consumed as f64;
        out.freeze()
    }
}

/// One-shot [`PcmuEncoder`]; trailing frames short of a window are dropped.
pub fn encode_pcmu(pcm: &[u8], sample_rate: u32, channels: u16) -> Bytes {
    PcmuEncoder::new(sample_rate, channels).encode(pcm)
}

/// Expand a mu-law payload back to 8 kHz mono PCM16.
pub fn decode_pcmu(payload: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(payload.len() * 2);
    for &b in payload {
        out.put_i16_le(ulaw_to_linear(b));
    }
    out.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_and_extremes() {
        assert_eq!(linear_to_ulaw(0), 0xFF);
        assert_eq!(ulaw_to_linear(0xFF), 0);
        assert_eq!(linear_to_ulaw(i16::MAX), 0x80);
        assert_eq!(linear_to_ulaw(i16::MIN), 0x00);
    }

    #[test]
    fn companding_stays_within_quantization_error() {
        for sample in [-30_000i16, -1_000, -100, 0, 50, 1_000, 12_345, 30_000] {
            let restored = ulaw_to_linear(linear_to_ulaw(sample)) as i32;
            let error = (restored - sample as i32).abs();
            // Step size grows with magnitude; 1/16 of the value plus the bias floor.
            assert!(error <= (sample as i32).abs() / 16 + 8, "{sample} -> {restored}");
        }
    }

    #[test]
    fn stereo_48k_becomes_8k_mono() {
        // 480 stereo frames at 48 kHz = 10 ms = 80 samples at 8 kHz
        let mut pcm = BytesMut::new();
        for _ in 0..480 {
            pcm.put_i16_le(1_000);
            pcm.put_i16_le(3_000);
        }
        let encoded = encode_pcmu(&pcm, 48_000, 2);
        assert_eq!(encoded.len(), 80);
        let decoded = decode_pcmu(&encoded);
        let first = i16::from_le_bytes([decoded[0], decoded[1]]) as i32;
        assert!((first - 2_000).abs() < 130);
    }

    #[test]
    fn odd_rates_carry_leftover_frames_between_chunks() {
        // 1024 frames of 44.1 kHz is 185.76 output samples
        let chunk = vec![0u8; 1024 * 2];
        let mut encoder = PcmuEncoder::new(44_100, 1);
        let total: usize = (0..10).map(|_| encoder.encode(&chunk).len()).sum();
        assert_eq!(total, 10 * 1024 * 8_000 / 44_100);
        assert!(encoder.accepts(44_100, 1));
        assert!(!encoder.accepts(48_000, 1));

        let one_shot: usize = (0..10).map(|_| encode_pcmu(&chunk, 44_100, 1).len()).sum();
        assert!(one_shot < total);
    }
}
