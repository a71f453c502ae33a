//! PCM format normalizer
//!
//! Reconciles channel count and sample width between a producer and a
//! consumer that cannot adapt on their own. Supported conversions:
//!
//! | Kind      | From → To               | Method                                   |
//! |-----------|-------------------------|------------------------------------------|
//! | width     | 32-bit float → 16-bit   | clamp to [-1, 1], scale by 32767, truncate |
//! | width     | 16-bit → 32-bit float   | divide by 32768                          |
//! | channels  | mono → stereo           | duplicate each sample                    |
//! | channels  | stereo → mono           | average L/R (16-bit int, 32-bit float);  |
//! |           |                         | other widths keep the left channel bytes |
//!
//! Width is converted first, then channels. The sample rate is never touched.

use std::borrow::Cow;

use crate::error::FormatError;
use crate::protocol::AudioFormat;

/// Whether `src` and `dst` differ in channel count or sample width
pub fn needs_conversion(src: AudioFormat, dst: AudioFormat) -> bool {
    src.channels != dst.channels || src.bits_per_sample != dst.bits_per_sample
}

/// Convert interleaved PCM from `src` layout to `dst` layout.
///
/// The output always holds `data.len() / src.block_align()` frames of
/// `dst.block_align()` bytes. Input that is not a whole number of frames is
/// rejected instead of truncated.
pub fn convert(data: &[u8], src: AudioFormat, dst: AudioFormat) -> Result<Vec<u8>, FormatError> {
    if !src.is_valid() {
        return Err(FormatError::InvalidFormat(src));
    }
    if !dst.is_valid() {
        return Err(FormatError::InvalidFormat(dst));
    }

    let block_align = src.block_align();
    if data.len() % block_align != 0 {
        return Err(FormatError::InvalidFrameAlignment {
            len: data.len(),
            block_align,
        });
    }

    if !needs_conversion(src, dst) {
        return Ok(data.to_vec());
    }

    let width_supported = src.bits_per_sample == dst.bits_per_sample
        || matches!((src.bits_per_sample, dst.bits_per_sample), (32, 16) | (16, 32));
    let channels_supported =
        src.channels == dst.channels || matches!((src.channels, dst.channels), (1, 2) | (2, 1));
    if !width_supported || !channels_supported {
        return Err(FormatError::UnsupportedConversion { from: src, to: dst });
    }

    let resized = convert_width(data, src.bits_per_sample, dst.bits_per_sample);
    let intermediate = src.with_bits(dst.bits_per_sample);
    Ok(convert_channels(&resized, intermediate, dst.channels))
}

fn convert_width(data: &[u8], from_bits: u16, to_bits: u16) -> Cow<'_, [u8]> {
    match (from_bits, to_bits) {
        (32, 16) => {
            let mut out = Vec::with_capacity(data.len() / 2);
            for sample in data.chunks_exact(4) {
                let value = f32::from_le_bytes([sample[0], sample[1], sample[2], sample[3]]);
                out.extend_from_slice(&f32_to_i16(value).to_le_bytes());
            }
            Cow::Owned(out)
        }
        (16, 32) => {
            let mut out = Vec::with_capacity(data.len() * 2);
            for sample in data.chunks_exact(2) {
                let value = i16::from_le_bytes([sample[0], sample[1]]);
                out.extend_from_slice(&(value as f32 / 32768.0).to_le_bytes());
            }
            Cow::Owned(out)
        }
        _ => Cow::Borrowed(data),
    }
}

fn convert_channels(data: &[u8], src: AudioFormat, dst_channels: u16) -> Vec<u8> {
    let width = src.bytes_per_sample();

    match (src.channels, dst_channels) {
        (1, 2) => {
            let mut out = Vec::with_capacity(data.len() * 2);
            for sample in data.chunks_exact(width) {
                out.extend_from_slice(sample);
                out.extend_from_slice(sample);
            }
            out
        }
        (2, 1) => {
            let mut out = Vec::with_capacity(data.len() / 2);
            for frame in data.chunks_exact(width * 2) {
                let (left, right) = frame.split_at(width);
                match width {
                    2 => {
                        let l = i16::from_le_bytes([left[0], left[1]]) as i32;
                        let r = i16::from_le_bytes([right[0], right[1]]) as i32;
                        out.extend_from_slice(&(((l + r) / 2) as i16).to_le_bytes());
                    }
                    4 => {
                        let l = f32::from_le_bytes([left[0], left[1], left[2], left[3]]);
                        let r = f32::from_le_bytes([right[0], right[1], right[2], right[3]]);
                        out.extend_from_slice(&((l + r) * 0.5).to_le_bytes());
                    }
                    _ => out.extend_from_slice(left),
                }
            }
            out
        }
        _ => data.to_vec(),
    }
}

/// Float sample to 16-bit integer: clamp, scale by 32767, truncate
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * 32767.0) as i16
}
