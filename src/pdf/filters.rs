//! Stream filters for embedded images.
//!
//! We only undo the "transport" filters here. Filters that are really image
//! codecs (JPEG, JPEG 2000, fax and JBIG2) end the chain, and the encoded
//! bytes are handed back with a [`ImageFormatTag`] so the decoder can pick
//! them up.

use std::io::Read as _;

use flate2::read::ZlibDecoder;

use super::image::ImageFormatTag;
use crate::prelude::*;

/// One entry in a stream's `/Filter` chain, plus its predictor settings.
#[derive(Clone, Debug)]
pub struct FilterStep {
    /// The filter name, without the leading slash.
    pub name: Vec<u8>,
    /// Predictor settings from `/DecodeParms`, if any.
    pub predictor: Option<PredictorParams>,
}

/// Predictor settings for `FlateDecode`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PredictorParams {
    pub predictor: i64,
    pub colors: usize,
    pub bits_per_component: usize,
    pub columns: usize,
}

impl Default for PredictorParams {
    fn default() -> Self {
        Self {
            predictor: 1,
            colors: 1,
            bits_per_component: 8,
            columns: 1,
        }
    }
}

impl PredictorParams {
    /// Bytes in one row of samples, not counting any PNG tag byte.
    fn row_len(&self) -> usize {
        (self.colors * self.bits_per_component * self.columns).div_ceil(8)
    }

    /// Bytes per complete pixel, rounded up to at least one.
    fn bytes_per_pixel(&self) -> usize {
        (self.colors * self.bits_per_component).div_ceil(8).max(1)
    }
}

/// Run `content` through `steps`, stopping at the first codec filter.
pub fn apply_filters(
    content: &[u8],
    steps: &[FilterStep],
) -> Result<(Vec<u8>, ImageFormatTag)> {
    let mut data = content.to_vec();
    for step in steps {
        let codec = match step.name.as_slice() {
            b"FlateDecode" | b"Fl" => {
                data = inflate(&data)?;
                if let Some(params) = &step.predictor {
                    data = undo_predictor(data, params)?;
                }
                None
            }
            b"ASCIIHexDecode" | b"AHx" => {
                data = ascii_hex_decode(&data)?;
                None
            }
            b"ASCII85Decode" | b"A85" => {
                data = ascii85_decode(&data)?;
                None
            }
            b"RunLengthDecode" | b"RL" => {
                data = run_length_decode(&data);
                None
            }
            b"DCTDecode" | b"DCT" => Some(ImageFormatTag::Jpeg),
            b"JPXDecode" => Some(ImageFormatTag::Jpeg2000),
            b"CCITTFaxDecode" | b"CCF" => Some(ImageFormatTag::Ccitt),
            b"JBIG2Decode" => Some(ImageFormatTag::Jbig2),
            other => {
                return Err(anyhow!(
                    "unsupported stream filter {}",
                    String::from_utf8_lossy(other)
                ));
            }
        };
        if let Some(format) = codec {
            return Ok((data, format));
        }
    }
    Ok((data, ImageFormatTag::Raw))
}

/// Decompress zlib data.
fn inflate(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len() * 4);
    ZlibDecoder::new(data)
        .read_to_end(&mut out)
        .context("corrupt FlateDecode data")?;
    Ok(out)
}

fn undo_predictor(data: Vec<u8>, params: &PredictorParams) -> Result<Vec<u8>> {
    match params.predictor {
        1 => Ok(data),
        2 if params.bits_per_component == 8 => Ok(undo_tiff_predictor(data, params)),
        2 => Err(anyhow!(
            "TIFF predictor with {} bits per component is not supported",
            params.bits_per_component
        )),
        10..=15 => undo_png_predictor(&data, params),
        other => Err(anyhow!("unknown predictor {}", other)),
    }
}

/// TIFF predictor 2: each sample is stored as a difference from the sample
/// one pixel to its left.
fn undo_tiff_predictor(mut data: Vec<u8>, params: &PredictorParams) -> Vec<u8> {
    let row_len = params.row_len();
    let bpp = params.bytes_per_pixel();
    for row in data.chunks_mut(row_len) {
        for i in bpp..row.len() {
            row[i] = row[i].wrapping_add(row[i - bpp]);
        }
    }
    data
}

/// PNG predictors: every row starts with a tag byte naming its filter.
fn undo_png_predictor(data: &[u8], params: &PredictorParams) -> Result<Vec<u8>> {
    let row_len = params.row_len();
    let bpp = params.bytes_per_pixel();
    let mut out = Vec::with_capacity(data.len());
    let mut prev = vec![0u8; row_len];
    for chunk in data.chunks(row_len + 1) {
        // A short trailing row carries no complete samples.
        if chunk.len() != row_len + 1 {
            break;
        }
        let mut row = chunk[1..].to_vec();
        for i in 0..row_len {
            let left = if i >= bpp { row[i - bpp] } else { 0 };
            let up = prev[i];
            let up_left = if i >= bpp { prev[i - bpp] } else { 0 };
            row[i] = match chunk[0] {
                0 => row[i],
                1 => row[i].wrapping_add(left),
                2 => row[i].wrapping_add(up),
                3 => row[i].wrapping_add(((u16::from(left) + u16::from(up)) / 2) as u8),
                4 => row[i].wrapping_add(paeth(left, up, up_left)),
                other => return Err(anyhow!("unknown PNG row filter {}", other)),
            };
        }
        out.extend_from_slice(&row);
        prev = row;
    }
    Ok(out)
}

fn paeth(a: u8, b: u8, c: u8) -> u8 {
    let p = i16::from(a) + i16::from(b) - i16::from(c);
    let pa = (p - i16::from(a)).abs();
    let pb = (p - i16::from(b)).abs();
    let pc = (p - i16::from(c)).abs();
    if pa <= pb && pa <= pc {
        a
    } else if pb <= pc {
        b
    } else {
        c
    }
}

fn ascii_hex_decode(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len() / 2);
    let mut high: Option<u8> = None;
    for &byte in data {
        if byte == b'>' {
            break;
        }
        if byte.is_ascii_whitespace() {
            continue;
        }
        let nibble = (byte as char)
            .to_digit(16)
            .ok_or_else(|| anyhow!("invalid ASCIIHexDecode byte {:#04x}", byte))?
            as u8;
        match high.take() {
            Some(h) => out.push(h << 4 | nibble),
            None => high = Some(nibble),
        }
    }
    // An odd digit count implies a trailing zero.
    if let Some(h) = high {
        out.push(h << 4);
    }
    Ok(out)
}

fn ascii85_decode(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len() * 4 / 5);
    let mut group = [0u8; 5];
    let mut len = 0;
    for &byte in data {
        match byte {
            b'~' => break,
            b'z' if len == 0 => out.extend_from_slice(&[0; 4]),
            b'!'..=b'u' => {
                group[len] = byte - b'!';
                len += 1;
                if len == 5 {
                    out.extend_from_slice(&ascii85_group(&group)?);
                    len = 0;
                }
            }
            b if b.is_ascii_whitespace() => {}
            other => return Err(anyhow!("invalid ASCII85Decode byte {:#04x}", other)),
        }
    }
    if len > 0 {
        // Pad a partial group with 'u' and keep only the bytes it encodes.
        for digit in group.iter_mut().skip(len) {
            *digit = b'u' - b'!';
        }
        let bytes = ascii85_group(&group)?;
        out.extend_from_slice(&bytes[..len - 1]);
    }
    Ok(out)
}

fn ascii85_group(group: &[u8; 5]) -> Result<[u8; 4]> {
    let value = group
        .iter()
        .try_fold(0u32, |acc, &digit| {
            acc.checked_mul(85)?.checked_add(u32::from(digit))
        })
        .ok_or_else(|| anyhow!("ASCII85Decode group overflows"))?;
    Ok(value.to_be_bytes())
}

fn run_length_decode(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() * 2);
    let mut i = 0;
    while i < data.len() {
        let len = data[i];
        i += 1;
        match len {
            128 => break,
            0..=127 => {
                let end = (i + usize::from(len) + 1).min(data.len());
                out.extend_from_slice(&data[i..end]);
                i = end;
            }
            _ => {
                if let Some(&byte) = data.get(i) {
                    out.extend(std::iter::repeat_n(byte, 257 - usize::from(len)));
                }
                i += 1;
            }
        }
    }
    out
}
