//! G.711 mu-law (PCMU) and sample-rate conversion.
//!
//! Calls carry 8 kHz PCMU, which every WebRTC endpoint supports and which
//! needs no external encoder.

pub const PCMU_CLOCK_RATE: u32 = 8000;

/// Samples per 20 ms PCMU packet.
pub const PCMU_FRAME_SAMPLES: usize = 160;

const BIAS: i32 = 0x84;
const CLIP: i32 = 32635;

pub fn encode_sample(pcm: i16) -> u8 {
    let mut magnitude = i32::from(pcm);
    let sign = if magnitude < 0 {
        magnitude = -magnitude;
        0x80
    } else {
        0x00
    };
    magnitude = magnitude.min(CLIP) + BIAS;

    // magnitude >> 7 is in 1..=255, so the exponent is its highest set bit.
    let exponent = 7 - ((magnitude >> 7) as u8).leading_zeros() as i32;
    let mantissa = (magnitude >> (exponent + 3)) & 0x0F;

    !((sign | (exponent << 4) | mantissa) as u8)
}

pub fn decode_sample(byte: u8) -> i16 {
    let byte = !byte;
    let exponent = i32::from((byte >> 4) & 0x07);
    let mantissa = i32::from(byte & 0x0F);
    let magnitude = (((mantissa << 3) + BIAS) << exponent) - BIAS;

    if byte & 0x80 != 0 {
        -magnitude as i16
    } else {
        magnitude as i16
    }
}

/// Encode float samples already at [`PCMU_CLOCK_RATE`].
pub fn encode_pcmu(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .map(|&s| encode_sample((s.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16))
        .collect()
}

pub fn decode_pcmu(payload: &[u8]) -> Vec<f32> {
    payload
        .iter()
        .map(|&b| f32::from(decode_sample(b)) / f32::from(i16::MAX))
        .collect()
}

/// Linear-interpolation resampler. Good enough for speech.
pub fn resample(input: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || input.is_empty() {
        return input.to_vec();
    }

    let out_len = (input.len() as u64 * u64::from(to_rate) / u64::from(from_rate)) as usize;
    let step = f64::from(from_rate) / f64::from(to_rate);
    let last = input.len() - 1;

    (0..out_len)
        .map(|i| {
            let pos = i as f64 * step;
            let idx = (pos as usize).min(last);
            let next = (idx + 1).min(last);
            let frac = (pos - idx as f64) as f32;
            input[idx] + (input[next] - input[idx]) * frac
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_encodes_to_0xff() {
        assert_eq!(encode_sample(0), 0xFF);
        assert_eq!(decode_sample(0xFF), 0);
    }

    #[test]
    fn quantization_error_is_bounded() {
        for pcm in [1000i16, -1000, 12000, -12000, 30000, i16::MIN] {
            let decoded = decode_sample(encode_sample(pcm));
            let error = (i32::from(decoded) - i32::from(pcm)).abs();
            let bound = i32::from(pcm).abs() / 16 + 8;
            assert!(error <= bound, "{pcm} decoded as {decoded}");
            assert_eq!(decoded.signum(), pcm.signum());
        }
    }

    #[test]
    fn float_frames_keep_their_length() {
        let frame = vec![0.25f32; PCMU_FRAME_SAMPLES];
        let encoded = encode_pcmu(&frame);
        assert_eq!(encoded.len(), PCMU_FRAME_SAMPLES);

        let decoded = decode_pcmu(&encoded);
        assert!(decoded.iter().all(|s| (s - 0.25).abs() < 0.02));
    }

    #[test]
    fn resample_20ms_frames() {
        let input = vec![0.5f32; 960];
        let down = resample(&input, 48_000, PCMU_CLOCK_RATE);
        assert_eq!(down.len(), PCMU_FRAME_SAMPLES);
        assert!(down.iter().all(|&s| (s - 0.5).abs() < f32::EPSILON));

        let up = resample(&down, PCMU_CLOCK_RATE, 44_100);
        assert_eq!(up.len(), 882);
    }
}
