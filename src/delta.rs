//! Reference + delta decompression shared by every compressed PMD stream.
//!
//! ```text
//! [C reference samples, ceil(R/8) bytes each, little-endian, R-bit two's complement]
//! repeated until exhausted:
//!   [delta_bit_width: 1][sample_count: 1]
//!   [sample_count × C deltas, delta_bit_width bits each, LSB-first, rounded up to whole bytes]
//! ```
//!
//! Each delta group is added channel-wise to the previous absolute sample.
//! The returned samples include the reference sample as the first entry and
//! are raw integers; callers apply the negotiated FACTOR.

use crate::error::DecodeError;

/// Sign-extend the low `bits` bits of `raw`.
pub(crate) fn sign_extend(raw: u32, bits: u32) -> i32 {
    if bits == 0 {
        return 0;
    }
    if bits >= 32 {
        return raw as i32;
    }
    let value = raw & ((1u32 << bits) - 1);
    if value & (1 << (bits - 1)) != 0 {
        (value | (u32::MAX << (bits - 1))) as i32
    } else {
        value as i32
    }
}

/// Read `count` signed `bit_width`-bit values, LSB first, starting at the
/// first bit of `data`.
fn unpack_signed(data: &[u8], bit_width: usize, count: usize) -> Vec<i32> {
    (0..count)
        .map(|i| {
            let mut raw = 0u32;
            for bit in 0..bit_width {
                let total = i * bit_width + bit;
                if (data[total / 8] >> (total % 8)) & 1 != 0 {
                    raw |= 1 << bit;
                }
            }
            sign_extend(raw, bit_width as u32)
        })
        .collect()
}

/// Decode the reference samples that open a delta frame.
pub fn reference_samples(
    data: &[u8],
    channels: usize,
    resolution: u8,
) -> Result<Vec<i32>, DecodeError> {
    if resolution == 0 || resolution > 32 {
        return Err(DecodeError::InvalidResolution(resolution));
    }
    let width = (resolution as usize).div_ceil(8);
    let needed = width * channels;
    if data.len() < needed {
        return Err(DecodeError::Truncated {
            needed,
            available: data.len(),
        });
    }
    Ok(data[..needed]
        .chunks_exact(width)
        .map(|chunk| {
            let raw = chunk
                .iter()
                .rev()
                .fold(0u32, |acc, &b| (acc << 8) | b as u32);
            sign_extend(raw, resolution as u32)
        })
        .collect())
}

/// Decode a whole delta frame into absolute samples, `channels` values each.
pub fn decode_delta_frame(
    data: &[u8],
    channels: usize,
    resolution: u8,
) -> Result<Vec<Vec<i32>>, DecodeError> {
    if channels == 0 {
        return Err(DecodeError::ChannelMismatch {
            channels,
            decoded: 0,
        });
    }
    let reference = reference_samples(data, channels, resolution)?;
    let mut offset = (resolution as usize).div_ceil(8) * channels;
    let mut samples = vec![reference];

    while offset < data.len() {
        if offset + 2 > data.len() {
            return Err(DecodeError::Truncated {
                needed: 2,
                available: data.len() - offset,
            });
        }
        let delta_bits = data[offset];
        let sample_count = data[offset + 1] as usize;
        offset += 2;
        if delta_bits > 32 {
            return Err(DecodeError::InvalidDeltaWidth(delta_bits));
        }

        let value_count = sample_count * channels;
        let block_len = (value_count * delta_bits as usize).div_ceil(8);
        let available = data.len() - offset;
        if block_len > available {
            // A short block cannot fill every channel of every group.
            let decoded = available * 8 / (delta_bits.max(1) as usize);
            return Err(DecodeError::ChannelMismatch {
                channels,
                decoded: decoded.min(value_count),
            });
        }

        let deltas = unpack_signed(
            &data[offset..offset + block_len],
            delta_bits as usize,
            value_count,
        );
        offset += block_len;

        for group in deltas.chunks(channels) {
            if group.len() != channels {
                return Err(DecodeError::ChannelMismatch {
                    channels,
                    decoded: group.len(),
                });
            }
            let previous = &samples[samples.len() - 1];
            let next = previous
                .iter()
                .zip(group)
                .map(|(p, d)| p.wrapping_add(*d))
                .collect();
            samples.push(next);
        }
    }
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_channel_reference_and_two_deltas() {
        // +5 = 0b0101 in the low nibble, −3 = 0b1101 in the high nibble.
        let frame = [0x64, 0x04, 0x02, 0xD5];
        let out = decode_delta_frame(&frame, 1, 8).unwrap();
        assert_eq!(out, vec![vec![100], vec![105], vec![102]]);
    }

    #[test]
    fn three_byte_reference_container() {
        let frame = [0x64, 0x00, 0x00, 0x04, 0x02, 0xD5];
        let out = decode_delta_frame(&frame, 1, 24).unwrap();
        assert_eq!(out, vec![vec![100], vec![105], vec![102]]);
    }

    #[test]
    fn reference_sign_extension() {
        assert_eq!(reference_samples(&[0xFF], 1, 8).unwrap(), vec![-1]);
        // 14-bit resolution inside a 2-byte container: 0x3FFF is −1.
        assert_eq!(reference_samples(&[0xFF, 0x3F], 1, 14).unwrap(), vec![-1]);
        assert_eq!(reference_samples(&[0xFF, 0x1F], 1, 14).unwrap(), vec![8191]);
    }

    #[test]
    fn three_channel_frame_spans_byte_boundaries() {
        // reference (16-bit): x=1000, y=−1000, z=0
        let mut frame = vec![0xE8, 0x03, 0x18, 0xFC, 0x00, 0x00];
        // one block, 3-bit deltas, 2 samples: (+1, −1, +3), (−4, 0, +2)
        // bits LSB-first: 001 111 011 100 000 010 → 18 bits → 3 bytes
        let values: [u32; 6] = [0b001, 0b111, 0b011, 0b100, 0b000, 0b010];
        let mut packed = 0u32;
        for (i, v) in values.iter().enumerate() {
            packed |= v << (i * 3);
        }
        frame.extend_from_slice(&[0x03, 0x02]);
        frame.extend_from_slice(&packed.to_le_bytes()[..3]);

        let out = decode_delta_frame(&frame, 3, 16).unwrap();
        assert_eq!(
            out,
            vec![vec![1000, -1000, 0], vec![1001, -1001, 3], vec![997, -1001, 5]]
        );
    }

    #[test]
    fn consecutive_blocks_continue_from_last_sample() {
        let frame = [0x0A, 0x02, 0x01, 0x01, 0x08, 0x01, 0xFE];
        let out = decode_delta_frame(&frame, 1, 8).unwrap();
        assert_eq!(out, vec![vec![10], vec![11], vec![9]]);
    }

    #[test]
    fn truncated_block_is_a_channel_mismatch() {
        // 8-bit deltas, 2 samples of 3 channels need 6 bytes; only 4 present.
        let frame = [0x00, 0x00, 0x00, 0x08, 0x02, 0x01, 0x02, 0x03, 0x04];
        assert_eq!(
            decode_delta_frame(&frame, 3, 8),
            Err(DecodeError::ChannelMismatch {
                channels: 3,
                decoded: 4
            })
        );
    }

    #[test]
    fn short_reference_is_truncated() {
        assert_eq!(
            decode_delta_frame(&[0x01, 0x02], 3, 8),
            Err(DecodeError::Truncated {
                needed: 3,
                available: 2
            })
        );
    }

    #[test]
    fn rejects_oversized_delta_width() {
        assert_eq!(
            decode_delta_frame(&[0x00, 0x40, 0x01, 0x00], 1, 8),
            Err(DecodeError::InvalidDeltaWidth(0x40))
        );
    }
}
