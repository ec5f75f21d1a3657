//! Integer source-over blending of premultiplied RGBA8 buffers.

use crate::foundation::error::{ReelError, ReelResult};

/// `dst = src over dst`, both premultiplied, pixel by pixel.
pub(crate) fn over_in_place(dst: &mut [u8], src: &[u8]) -> ReelResult<()> {
    if dst.len() != src.len() || !dst.len().is_multiple_of(4) {
        return Err(ReelError::render(
            "over_in_place expects equal-length rgba8 buffers",
        ));
    }
    for (d, s) in dst.chunks_exact_mut(4).zip(src.chunks_exact(4)) {
        match s[3] {
            0 => {}
            255 => d.copy_from_slice(s),
            sa => {
                let inv = 255 - u16::from(sa);
                for i in 0..4 {
                    d[i] = s[i].saturating_add(mul_div255(u16::from(d[i]), inv));
                }
            }
        }
    }
    Ok(())
}

fn mul_div255(x: u16, y: u16) -> u8 {
    ((u32::from(x) * u32::from(y) + 127) / 255) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transparent_source_keeps_destination() {
        let mut dst = vec![10, 20, 30, 255];
        over_in_place(&mut dst, &[0, 0, 0, 0]).unwrap();
        assert_eq!(dst, vec![10, 20, 30, 255]);
    }

    #[test]
    fn opaque_source_replaces_destination() {
        let mut dst = vec![10, 20, 30, 255];
        over_in_place(&mut dst, &[1, 2, 3, 255]).unwrap();
        assert_eq!(dst, vec![1, 2, 3, 255]);
    }

    #[test]
    fn half_covered_source_mixes() {
        let mut dst = vec![0, 0, 200, 255];
        over_in_place(&mut dst, &[128, 0, 0, 128]).unwrap();
        assert_eq!(dst, vec![128, 0, 100, 255]);
    }

    #[test]
    fn length_mismatch_is_an_error() {
        let mut dst = vec![0; 8];
        assert!(over_in_place(&mut dst, &[0; 4]).is_err());
    }
}
