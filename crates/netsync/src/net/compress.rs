//! Zero-run-length coding for channel bodies.
//!
//! Non-zero bytes are copied as they are. A zero byte is followed by a varint
//! holding the number of further zeros in the run, so quantised fields that
//! did not change cost two bytes however long the run is.

use super::cursor::{BitReader, BitWriter, CursorError};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompressError {
    #[error("expands past {max} bytes")]
    TooLarge { max: usize },
    #[error("cursor: {0}")]
    Cursor(#[from] CursorError),
}

pub fn compress_zero_runs(data: &[u8]) -> Vec<u8> {
    let mut writer = BitWriter::with_capacity(data.len());
    let mut i = 0;
    while i < data.len() {
        let byte = data[i];
        if byte != 0 {
            writer.write_u8(byte);
            i += 1;
            continue;
        }
        let run = data[i..].iter().take_while(|&&b| b == 0).count();
        writer.write_u8(0);
        writer.write_varint((run - 1) as u64);
        i += run;
    }
    writer.finish()
}

/// Reverses [`compress_zero_runs`], refusing output longer than `max_len`.
pub fn decompress_zero_runs(data: &[u8], max_len: usize) -> Result<Vec<u8>, CompressError> {
    let mut reader = BitReader::new(data);
    let mut out = Vec::with_capacity(data.len().saturating_mul(2).min(max_len));
    while !reader.is_empty() {
        let byte = reader.read_u8()?;
        let run = if byte == 0 {
            reader.read_varint()?.saturating_add(1)
        } else {
            1
        };
        if run > (max_len - out.len()) as u64 {
            return Err(CompressError::TooLarge { max: max_len });
        }
        out.resize(out.len() + run as usize, byte);
    }
    Ok(out)
}

/// Packed size over original size; 1.0 means nothing was saved.
pub fn compression_ratio(original: usize, packed: usize) -> f32 {
    if original == 0 {
        1.0
    } else {
        packed as f32 / original as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_runs_collapse() {
        let mut data = vec![7u8, 0, 0, 0, 0, 0, 3];
        data.extend(std::iter::repeat_n(0, 300));
        data.push(9);

        let packed = compress_zero_runs(&data);
        // 7, (0, 4), 3, (0, 299 as two varint bytes), 9
        assert_eq!(packed, vec![7, 0, 4, 3, 0, 0xAB, 0x02, 9]);
        assert_eq!(decompress_zero_runs(&packed, 1024).unwrap(), data);
    }

    #[test]
    fn test_lone_zero_costs_a_byte() {
        let data = [1u8, 0, 2];
        let packed = compress_zero_runs(&data);
        assert_eq!(packed, vec![1, 0, 0, 2]);
    }

    #[test]
    fn test_expansion_limit() {
        let packed = compress_zero_runs(&[0u8; 500]);
        assert_eq!(packed.len(), 3);
        assert_eq!(
            decompress_zero_runs(&packed, 499),
            Err(CompressError::TooLarge { max: 499 })
        );

        // A forged run length cannot allocate past the limit either.
        let mut writer = BitWriter::new();
        writer.write_u8(0);
        writer.write_varint(u64::MAX);
        assert_eq!(
            decompress_zero_runs(writer.as_slice(), 16384),
            Err(CompressError::TooLarge { max: 16384 })
        );
    }

    #[test]
    fn test_truncated_run_rejected() {
        assert!(matches!(
            decompress_zero_runs(&[5, 0], 64),
            Err(CompressError::Cursor(_))
        ));
    }

    #[test]
    fn test_ratio() {
        assert_eq!(compression_ratio(0, 0), 1.0);
        assert_eq!(compression_ratio(200, 50), 0.25);
    }
}
