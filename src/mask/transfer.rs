//! Byte framing used between the annotation client and the core.
//!
//! Save/load buffers are `[254][H×W mask][H×W user-origin][254]`; the combined
//! consensus is served as `[254][H×W mask][254]`.

use thiserror::Error;

use super::{Mask, MaskShape, UserOriginMask};

/// Marker byte bracketing every transfer buffer.
pub const SENTINEL: u8 = 254;

/// Rejections of a malformed transfer buffer.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransferError {
    #[error("Mask buffer has length {found}, expected {expected}")]
    Length { expected: usize, found: usize },
    #[error("Mask buffer sentinels are {start}/{end}, expected 254/254")]
    Sentinel { start: u8, end: u8 },
}

/// Expected length of a save buffer for `shape`.
pub fn save_buffer_len(shape: MaskShape) -> usize {
    2 * shape.pixel_count() + 2
}

/// Validate and split a client save buffer into the mask and its provenance.
///
/// Length is checked first, then both sentinels; a buffer is rejected when
/// either sentinel differs from [`SENTINEL`].
pub fn decode_save_buffer(
    bytes: &[u8],
    shape: MaskShape,
) -> Result<(Mask, UserOriginMask), TransferError> {
    let expected = save_buffer_len(shape);
    if bytes.len() != expected {
        return Err(TransferError::Length {
            expected,
            found: bytes.len(),
        });
    }
    let (start, end) = (bytes[0], bytes[expected - 1]);
    if start != SENTINEL || end != SENTINEL {
        return Err(TransferError::Sentinel { start, end });
    }

    let pixels = shape.pixel_count();
    let payload = &bytes[1..expected - 1];
    let (mask_bytes, origin_bytes) = payload.split_at(pixels);
    // Lengths were validated above, so reshaping cannot fail.
    let mask = Mask::from_vec(shape, mask_bytes.to_vec()).map_err(|_| TransferError::Length {
        expected,
        found: bytes.len(),
    })?;
    let origin = UserOriginMask::from_bytes(shape, origin_bytes).map_err(|_| {
        TransferError::Length {
            expected,
            found: bytes.len(),
        }
    })?;
    Ok((mask, origin))
}

/// Frame a stored mask and its provenance for the client.
pub fn encode_load_buffer(mask: &Mask, origin: &UserOriginMask) -> Vec<u8> {
    let mask_bytes = mask.to_bytes();
    let origin_bytes = origin.to_bytes();
    let mut out = Vec::with_capacity(mask_bytes.len() + origin_bytes.len() + 2);
    out.push(SENTINEL);
    out.extend_from_slice(&mask_bytes);
    out.extend_from_slice(&origin_bytes);
    out.push(SENTINEL);
    out
}

/// Frame a single mask (the combined consensus) for the client.
pub fn encode_mask_buffer(mask: &Mask) -> Vec<u8> {
    let mask_bytes = mask.to_bytes();
    let mut out = Vec::with_capacity(mask_bytes.len() + 2);
    out.push(SENTINEL);
    out.extend_from_slice(&mask_bytes);
    out.push(SENTINEL);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHAPE: MaskShape = MaskShape {
        height: 2,
        width: 2,
    };

    fn well_formed() -> Vec<u8> {
        vec![254, 0, 1, 2, 1, 1, 0, 0, 1, 254]
    }

    #[test]
    fn decodes_well_formed_buffer() {
        let (mask, origin) = decode_save_buffer(&well_formed(), SHAPE).unwrap();
        assert_eq!(mask.to_bytes(), vec![0, 1, 2, 1]);
        assert_eq!(origin.to_bytes(), vec![1, 0, 0, 1]);
        assert_eq!(mask.shape(), SHAPE);
        assert_eq!(origin.shape(), SHAPE);
    }

    #[test]
    fn rejects_every_wrong_length() {
        let full = well_formed();
        for len in 0..full.len() + 3 {
            if len == full.len() {
                continue;
            }
            let mut bytes = full.clone();
            bytes.resize(len, SENTINEL);
            let err = decode_save_buffer(&bytes, SHAPE).unwrap_err();
            assert_eq!(
                err,
                TransferError::Length {
                    expected: 10,
                    found: len
                }
            );
        }
    }

    #[test]
    fn rejects_either_bad_sentinel() {
        let mut bad_start = well_formed();
        bad_start[0] = 0;
        assert!(matches!(
            decode_save_buffer(&bad_start, SHAPE),
            Err(TransferError::Sentinel { start: 0, end: 254 })
        ));

        let mut bad_end = well_formed();
        bad_end[9] = 253;
        assert!(matches!(
            decode_save_buffer(&bad_end, SHAPE),
            Err(TransferError::Sentinel { start: 254, end: 253 })
        ));

        let mut both = well_formed();
        both[0] = 1;
        both[9] = 1;
        assert!(decode_save_buffer(&both, SHAPE).is_err());
    }

    #[test]
    fn load_buffer_matches_save_layout() {
        let (mask, origin) = decode_save_buffer(&well_formed(), SHAPE).unwrap();
        assert_eq!(encode_load_buffer(&mask, &origin), well_formed());
    }

    #[test]
    fn mask_buffer_brackets_single_grid() {
        let (mask, _) = decode_save_buffer(&well_formed(), SHAPE).unwrap();
        assert_eq!(encode_mask_buffer(&mask), vec![254, 0, 1, 2, 1, 254]);
    }
}
