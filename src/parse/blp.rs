//! BLP texture parser.
//!
//! BLP2 carries either palettized pixels, DXT-compressed blocks, or
//! plain ARGB. DXT payloads are passed through as compressed blocks for
//! direct GPU upload; palettized and ARGB images decode to RGBA8 here.

use super::cursor::Cursor;
use crate::error::ParseError;

/// Pixel payload of a parsed image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImagePixels {
    Rgba8(Vec<u8>),
    Dxt1(Vec<u8>),
    Dxt3(Vec<u8>),
    Dxt5(Vec<u8>),
}

impl ImagePixels {
    /// Approximate RGBA8 footprint once resident on the GPU, including
    /// a 1/3 mip overhead. Used for texture cache accounting.
    pub fn gpu_bytes(&self, width: u32, height: u32) -> u64 {
        let base = width as u64 * height as u64 * 4;
        base + base / 3
    }
}

#[derive(Debug, Clone)]
pub struct BlpImage {
    pub width: u32,
    pub height: u32,
    pub pixels: ImagePixels,
}

/// Parse a BLP2 texture. The full-resolution mip is decoded; the GPU
/// uploader regenerates the mip chain.
pub fn parse_image(bytes: &[u8]) -> Result<BlpImage, ParseError> {
    let mut c = Cursor::new(bytes);
    let magic = c.tag()?;
    if &magic != b"BLP2" {
        return Err(ParseError::BadMagic {
            expected: "BLP2".into(),
            found: String::from_utf8_lossy(&magic).into_owned(),
        });
    }
    c.skip(4)?; // type (always 1 for 3.3.5a content)
    let compression = c.u8()?;
    let alpha_depth = c.u8()?;
    let alpha_encoding = c.u8()?;
    c.skip(1)?; // hasMips
    let width = c.u32()?;
    let height = c.u32()?;
    if width == 0 || height == 0 || width > 4096 || height > 4096 {
        return Err(ParseError::Malformed {
            what: "BLP dimensions",
            detail: format!("{width}x{height}"),
        });
    }

    let mut mip_offsets = [0u32; 16];
    let mut mip_sizes = [0u32; 16];
    for ofs in mip_offsets.iter_mut() {
        *ofs = c.u32()?;
    }
    for size in mip_sizes.iter_mut() {
        *size = c.u32()?;
    }

    let mut palette = [[0u8; 4]; 256];
    if compression == 1 {
        for entry in palette.iter_mut() {
            let bgra = c.take(4)?;
            *entry = [bgra[2], bgra[1], bgra[0], bgra[3]];
        }
    }

    let offset = mip_offsets[0] as usize;
    let size = mip_sizes[0] as usize;
    let end = offset.checked_add(size).ok_or(ParseError::BadOffset {
        offset,
        len: bytes.len(),
    })?;
    if offset == 0 || size == 0 || end > bytes.len() {
        return Err(ParseError::BadOffset {
            offset: end,
            len: bytes.len(),
        });
    }
    let mip = &bytes[offset..end];
    let pixel_count = (width * height) as usize;

    let pixels = match compression {
        1 => {
            // Palettized: indices then optional packed alpha plane.
            if mip.len() < pixel_count {
                return Err(ParseError::Truncated {
                    offset: mip.len(),
                    wanted: pixel_count,
                });
            }
            let mut out = vec![0u8; pixel_count * 4];
            for (i, &index) in mip[..pixel_count].iter().enumerate() {
                out[i * 4..i * 4 + 4].copy_from_slice(&palette[index as usize]);
            }
            apply_palette_alpha(&mut out, &mip[pixel_count..], pixel_count, alpha_depth);
            ImagePixels::Rgba8(out)
        }
        2 => {
            let block_bytes = expected_dxt_bytes(width, height, alpha_depth, alpha_encoding);
            if mip.len() < block_bytes {
                return Err(ParseError::Truncated {
                    offset: mip.len(),
                    wanted: block_bytes,
                });
            }
            let blocks = mip[..block_bytes].to_vec();
            if alpha_depth == 0 || alpha_encoding == 0 {
                ImagePixels::Dxt1(blocks)
            } else if alpha_encoding == 1 {
                ImagePixels::Dxt3(blocks)
            } else {
                ImagePixels::Dxt5(blocks)
            }
        }
        3 => {
            if mip.len() < pixel_count * 4 {
                return Err(ParseError::Truncated {
                    offset: mip.len(),
                    wanted: pixel_count * 4,
                });
            }
            let mut out = vec![0u8; pixel_count * 4];
            for i in 0..pixel_count {
                let b = &mip[i * 4..i * 4 + 4];
                out[i * 4] = b[2];
                out[i * 4 + 1] = b[1];
                out[i * 4 + 2] = b[0];
                out[i * 4 + 3] = b[3];
            }
            ImagePixels::Rgba8(out)
        }
        other => {
            return Err(ParseError::Malformed {
                what: "BLP compression",
                detail: format!("type {other}"),
            })
        }
    };

    Ok(BlpImage {
        width,
        height,
        pixels,
    })
}

fn expected_dxt_bytes(width: u32, height: u32, alpha_depth: u8, alpha_encoding: u8) -> usize {
    let blocks = (width.div_ceil(4) * height.div_ceil(4)) as usize;
    if alpha_depth == 0 || alpha_encoding == 0 {
        blocks * 8
    } else {
        blocks * 16
    }
}

fn apply_palette_alpha(out: &mut [u8], alpha: &[u8], pixel_count: usize, depth: u8) {
    match depth {
        0 => {}
        1 => {
            for i in 0..pixel_count {
                let byte = i / 8;
                if byte < alpha.len() {
                    let bit = alpha[byte] >> (i % 8) & 1;
                    out[i * 4 + 3] = if bit != 0 { 255 } else { 0 };
                }
            }
        }
        4 => {
            for i in 0..pixel_count {
                let byte = i / 2;
                if byte < alpha.len() {
                    let nib = if i % 2 == 0 {
                        alpha[byte] & 0x0F
                    } else {
                        alpha[byte] >> 4
                    };
                    out[i * 4 + 3] = nib << 4 | nib;
                }
            }
        }
        _ => {
            for i in 0..pixel_count {
                if i < alpha.len() {
                    out[i * 4 + 3] = alpha[i];
                }
            }
        }
    }
}

#[cfg(test)]
pub mod test_util {
    /// Build a minimal valid palettized BLP2 with a solid palette color.
    pub fn solid_blp(width: u32, height: u32, rgba: [u8; 4]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"BLP2");
        out.extend_from_slice(&1u32.to_le_bytes());
        out.push(1); // palettized
        out.push(8); // alpha depth
        out.push(0); // alpha encoding
        out.push(0); // no mips
        out.extend_from_slice(&width.to_le_bytes());
        out.extend_from_slice(&height.to_le_bytes());
        let pixel_count = (width * height) as usize;
        let data_offset = out.len() + 16 * 4 + 16 * 4 + 256 * 4;
        let data_size = pixel_count * 2; // indices + alpha plane
        out.extend_from_slice(&(data_offset as u32).to_le_bytes());
        out.extend_from_slice(&[0u8; 15 * 4]);
        out.extend_from_slice(&(data_size as u32).to_le_bytes());
        out.extend_from_slice(&[0u8; 15 * 4]);
        // Palette entry 0 holds the color, BGRA on disk.
        out.extend_from_slice(&[rgba[2], rgba[1], rgba[0], rgba[3]]);
        out.extend_from_slice(&vec![0u8; 255 * 4]);
        out.extend_from_slice(&vec![0u8; pixel_count]); // all index 0
        out.extend_from_slice(&vec![rgba[3]; pixel_count]); // alpha plane
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_magic() {
        let err = parse_image(b"BLP0aaaaaaaaaaaaaaaaaaaa").unwrap_err();
        assert!(matches!(err, ParseError::BadMagic { .. }));
    }

    #[test]
    fn decodes_solid_palettized() {
        let bytes = test_util::solid_blp(4, 4, [10, 20, 30, 200]);
        let img = parse_image(&bytes).unwrap();
        assert_eq!((img.width, img.height), (4, 4));
        match img.pixels {
            ImagePixels::Rgba8(px) => {
                assert_eq!(&px[..4], &[10, 20, 30, 200]);
                assert_eq!(px.len(), 4 * 4 * 4);
            }
            other => panic!("expected RGBA8, got {other:?}"),
        }
    }

    #[test]
    fn truncated_mip_is_an_error() {
        let mut bytes = test_util::solid_blp(4, 4, [1, 2, 3, 4]);
        bytes.truncate(bytes.len() - 8);
        assert!(parse_image(&bytes).is_err());
    }
}
