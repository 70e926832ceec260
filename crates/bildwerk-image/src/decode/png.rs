// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// PNG decoder.
//
// Non-interlaced gray, RGB and palette images of up to 8 bits are passed
// through: the IDAT payload is already a zlib stream with PNG row filters,
// which the writer labels FlateDecode with predictor 15. Everything else
// (alpha, 16-bit samples, interlacing) is fully decoded by a
// `PngRasterStrategy`, reduced to 8 bits, and any alpha channel is turned
// into a colour key.

use std::collections::HashSet;
use std::io::Read;

use bildwerk_core::error::{BildwerkError, Result};
use bildwerk_core::types::{Compression, Predictor};
use flate2::Crc;
use flate2::read::ZlibDecoder;
use tracing::{debug, instrument, warn};

use super::{DecodeContext, attach_raster, scale_to_8bit};
use crate::colorspace::RawPalette;
use crate::input::InputFile;
use crate::slot::{Container, ImageSlot, PngInfo, PngPath, Transparency};
use crate::source::{BLOCK_SIZE, DataSource};

const SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// Alpha values below this count as fully transparent.
pub const ALPHA_THRESHOLD: u8 = 128;

const COLOR_GRAY: u8 = 0;
const COLOR_RGB: u8 = 2;
const COLOR_PALETTE: u8 = 3;
const COLOR_GRAY_ALPHA: u8 = 4;
const COLOR_RGBA: u8 = 6;

/// Contents of the IHDR chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PngHeader {
    pub width: u32,
    pub height: u32,
    pub bit_depth: u8,
    pub color_type: u8,
    pub interlaced: bool,
}

impl PngHeader {
    /// Samples per pixel as stored.
    pub fn channels(&self) -> usize {
        match self.color_type {
            COLOR_RGB => 3,
            COLOR_GRAY_ALPHA => 2,
            COLOR_RGBA => 4,
            _ => 1,
        }
    }

    fn fast_path(&self) -> bool {
        self.bit_depth <= 8
            && !self.interlaced
            && matches!(self.color_type, COLOR_GRAY | COLOR_RGB | COLOR_PALETTE)
    }
}

/// Chunks gathered on the walk through the file.
#[derive(Debug, Default)]
struct PngChunks {
    palette: Option<Vec<u8>>,
    transparency: Option<Vec<u8>>,
    density: Option<(f64, f64)>,
    /// (offset, length) of every IDAT payload, in file order.
    idat: Vec<(u64, u32)>,
}

// ---------------------------------------------------------------------------
// Decoding strategies
// ---------------------------------------------------------------------------

/// Input handed to a full-decode strategy.
pub struct PngInput<'a> {
    /// The complete PNG file.
    pub file: &'a [u8],
    pub header: PngHeader,
    /// IDAT payload ranges within `file`.
    pub idat: &'a [(u64, u32)],
    pub transparency: Option<&'a [u8]>,
}

/// Fully decoded raster with 8 bits per sample.
#[derive(Debug, Clone, PartialEq)]
pub struct PngRaster {
    pub samples: Vec<u8>,
    /// Samples per pixel, including a trailing alpha sample if present.
    pub channels: u8,
    pub has_alpha: bool,
    /// Samples are palette indices.
    pub indexed: bool,
}

/// Full decoder for PNGs the passthrough path cannot handle.
pub trait PngRasterStrategy {
    fn name(&self) -> &'static str;
    fn decode(&self, input: &PngInput<'_>) -> Result<PngRaster>;
}

/// Strategy used by the decoder.
pub fn default_strategy() -> &'static dyn PngRasterStrategy {
    #[cfg(feature = "image-codecs")]
    {
        &ImageCrateStrategy
    }
    #[cfg(not(feature = "image-codecs"))]
    {
        &InflateStrategy
    }
}

/// Decodes through the `image` crate. Palettes are expanded to RGB and
/// transparency chunks become an alpha channel.
#[cfg(feature = "image-codecs")]
pub struct ImageCrateStrategy;

#[cfg(feature = "image-codecs")]
impl PngRasterStrategy for ImageCrateStrategy {
    fn name(&self) -> &'static str {
        "image"
    }

    fn decode(&self, input: &PngInput<'_>) -> Result<PngRaster> {
        let decoded = ::image::load_from_memory_with_format(input.file, ::image::ImageFormat::Png)
            .map_err(|err| BildwerkError::CorruptFormat(format!("PNG decode failed: {err}")))?;
        let gray = matches!(input.header.color_type, COLOR_GRAY | COLOR_GRAY_ALPHA);
        let has_alpha = decoded.color().has_alpha();
        let (samples, channels) = match (gray, has_alpha) {
            (true, false) => (decoded.to_luma8().into_raw(), 1),
            (true, true) => (decoded.to_luma_alpha8().into_raw(), 2),
            (false, false) => (decoded.to_rgb8().into_raw(), 3),
            (false, true) => (decoded.to_rgba8().into_raw(), 4),
        };
        Ok(PngRaster {
            samples,
            channels,
            has_alpha,
            indexed: false,
        })
    }
}

/// Built-in decoder: zlib inflate, row unfiltering and Adam7 deinterlacing.
/// Palette images stay indexed; a gray or RGB transparency chunk becomes an
/// alpha channel.
pub struct InflateStrategy;

impl PngRasterStrategy for InflateStrategy {
    fn name(&self) -> &'static str {
        "inflate"
    }

    fn decode(&self, input: &PngInput<'_>) -> Result<PngRaster> {
        let header = input.header;
        let mut compressed = Vec::new();
        for &(offset, len) in input.idat {
            let start = offset as usize;
            let chunk = input
                .file
                .get(start..start + len as usize)
                .ok_or_else(|| BildwerkError::CorruptFormat("PNG IDAT out of bounds".into()))?;
            compressed.extend_from_slice(chunk);
        }

        let mut filtered = Vec::new();
        ZlibDecoder::new(compressed.as_slice())
            .read_to_end(&mut filtered)
            .map_err(|err| BildwerkError::CorruptFormat(format!("PNG image data: {err}")))?;

        let depth = header.bit_depth as usize;
        let channels = header.channels();
        let key = match (header.color_type, input.transparency) {
            (COLOR_GRAY, Some(t)) if t.len() >= 2 => Some(vec![u16::from_be_bytes([t[0], t[1]])]),
            (COLOR_RGB, Some(t)) if t.len() >= 6 => Some(
                t[..6]
                    .chunks_exact(2)
                    .map(|c| u16::from_be_bytes([c[0], c[1]]))
                    .collect(),
            ),
            _ => None,
        };
        let has_alpha = key.is_some() || matches!(header.color_type, COLOR_GRAY_ALPHA | COLOR_RGBA);
        let out_channels = channels + usize::from(key.is_some());
        let width = header.width as usize;
        let height = header.height as usize;
        let mut samples = crate::alloc_raster(&[width, height, out_channels], "PNG raster")?;

        let bytes_per_pixel = (channels * depth).div_ceil(8).max(1);
        let passes: &[(usize, usize, usize, usize)] = if header.interlaced {
            &ADAM7
        } else {
            &[(0, 0, 1, 1)]
        };

        let mut pos = 0usize;
        let mut values = vec![0u16; channels];
        for &(x0, y0, dx, dy) in passes {
            if width <= x0 || height <= y0 {
                continue;
            }
            let pass_w = (width - x0).div_ceil(dx);
            let pass_h = (height - y0).div_ceil(dy);
            let row_len = (pass_w * channels * depth).div_ceil(8);
            let mut prev = vec![0u8; row_len];
            for py in 0..pass_h {
                let end = pos + 1 + row_len;
                let row = filtered
                    .get_mut(pos..end)
                    .ok_or_else(|| BildwerkError::CorruptFormat("PNG image data too short".into()))?;
                let (filter, row) = row.split_at_mut(1);
                unfilter(filter[0], row, &prev, bytes_per_pixel)?;
                let y = y0 + py * dy;
                for px in 0..pass_w {
                    let x = x0 + px * dx;
                    for (c, value) in values.iter_mut().enumerate() {
                        *value = sample_at(row, px * channels + c, depth);
                    }
                    let out = &mut samples[(y * width + x) * out_channels..][..out_channels];
                    for (c, &value) in values.iter().enumerate() {
                        out[c] = match depth {
                            16 => (value >> 8) as u8,
                            8 => value as u8,
                            _ if header.color_type == COLOR_PALETTE => value as u8,
                            _ => scale_to_8bit(value as u8, depth as u8),
                        };
                    }
                    if let Some(key) = &key {
                        out[channels] = if values == *key { 0 } else { 255 };
                    }
                }
                prev.copy_from_slice(row);
                pos = end;
            }
        }

        Ok(PngRaster {
            samples,
            channels: out_channels as u8,
            has_alpha,
            indexed: header.color_type == COLOR_PALETTE,
        })
    }
}

/// Adam7 passes as (x start, y start, x step, y step).
const ADAM7: [(usize, usize, usize, usize); 7] = [
    (0, 0, 8, 8),
    (4, 0, 8, 8),
    (0, 4, 4, 8),
    (2, 0, 4, 4),
    (0, 2, 2, 4),
    (1, 0, 2, 2),
    (0, 1, 1, 2),
];

/// Sample `index` of a row at `depth` bits.
fn sample_at(row: &[u8], index: usize, depth: usize) -> u16 {
    match depth {
        16 => u16::from_be_bytes([row[index * 2], row[index * 2 + 1]]),
        8 => row[index] as u16,
        _ => {
            let bit = index * depth;
            let shift = 8 - depth - bit % 8;
            ((row[bit / 8] >> shift) & ((1u8 << depth) - 1)) as u16
        }
    }
}

/// Reverse one PNG row filter in place.
fn unfilter(filter: u8, row: &mut [u8], prev: &[u8], bpp: usize) -> Result<()> {
    match filter {
        0 => {}
        1 => {
            for i in bpp..row.len() {
                row[i] = row[i].wrapping_add(row[i - bpp]);
            }
        }
        2 => {
            for (cur, up) in row.iter_mut().zip(prev) {
                *cur = cur.wrapping_add(*up);
            }
        }
        3 => {
            for i in 0..row.len() {
                let left = if i >= bpp { row[i - bpp] as u16 } else { 0 };
                row[i] = row[i].wrapping_add(((left + prev[i] as u16) / 2) as u8);
            }
        }
        4 => {
            for i in 0..row.len() {
                let left = if i >= bpp { row[i - bpp] } else { 0 };
                let upper_left = if i >= bpp { prev[i - bpp] } else { 0 };
                row[i] = row[i].wrapping_add(paeth(left, prev[i], upper_left));
            }
        }
        other => {
            return Err(BildwerkError::CorruptFormat(format!(
                "PNG row filter type {other}"
            )));
        }
    }
    Ok(())
}

fn paeth(a: u8, b: u8, c: u8) -> u8 {
    let p = a as i16 + b as i16 - c as i16;
    let pa = (p - a as i16).abs();
    let pb = (p - b as i16).abs();
    let pc = (p - c as i16).abs();
    if pa <= pb && pa <= pc {
        a
    } else if pb <= pc {
        b
    } else {
        c
    }
}

// ---------------------------------------------------------------------------
// Decoder entry point
// ---------------------------------------------------------------------------

#[instrument(skip_all, fields(file = file.name()))]
pub fn decode(file: InputFile, ctx: &DecodeContext<'_>, slot: &mut ImageSlot) -> Result<()> {
    decode_with(file, ctx, slot, default_strategy())
}

/// Decode using an explicit full-decode strategy.
pub fn decode_with(
    mut file: InputFile,
    ctx: &DecodeContext<'_>,
    slot: &mut ImageSlot,
    strategy: &dyn PngRasterStrategy,
) -> Result<()> {
    let (header, chunks) = read_chunks(&mut file)?;
    debug!(?header, idat_chunks = chunks.idat.len(), "PNG header");

    slot.width = header.width;
    slot.height = header.height as i32;
    if let Some((x, y)) = chunks.density {
        slot.dpi_x = x;
        slot.dpi_y = y;
    }
    let palette = match (header.color_type, &chunks.palette) {
        (COLOR_PALETTE, Some(plte)) => Some(RawPalette::from_rgb8(plte, plte.len() / 3)),
        (COLOR_PALETTE, None) => {
            return Err(BildwerkError::CorruptFormat("PNG palette image without PLTE".into()));
        }
        _ => None,
    };

    if header.fast_path() {
        slot.container = Container::Png(PngInfo {
            color_type: header.color_type,
            bit_depth: header.bit_depth,
            interlaced: false,
            path: PngPath::Passthrough,
        });
        slot.bpc = header.bit_depth;
        slot.components = header.channels() as u8;
        slot.compression = Compression::Flate;
        slot.predictor = Predictor::Png;
        slot.use_raw = true;
        slot.palette = palette;
        if !ctx.options.ignore_mask {
            slot.transparency = chunks
                .transparency
                .as_deref()
                .and_then(|trns| color_key_from_trns(&header, trns));
        }
        slot.set_single_source(Box::new(PngIdatSource {
            file,
            chunks: chunks.idat,
            next: 0,
            remaining: 0,
            buf: Vec::new(),
        }));
        return Ok(());
    }

    let bytes = file.read_all()?;
    let input = PngInput {
        file: &bytes,
        header,
        idat: &chunks.idat,
        transparency: chunks.transparency.as_deref(),
    };
    let raster = strategy.decode(&input)?;
    debug!(strategy = strategy.name(), channels = raster.channels, "PNG fully decoded");

    let (samples, components, key) = flatten_alpha(raster.samples, raster.channels, raster.has_alpha)?;

    slot.container = Container::Png(PngInfo {
        color_type: header.color_type,
        bit_depth: header.bit_depth,
        interlaced: header.interlaced,
        path: PngPath::Decoded,
    });
    slot.bpc = 8;
    slot.components = components;
    slot.compression = Compression::None;
    slot.predictor = Predictor::None;
    slot.use_raw = false;
    if raster.indexed {
        slot.palette = palette;
    }
    if !ctx.options.ignore_mask {
        slot.transparency = match key {
            Some(key) => Some(Transparency::ColorKey(key)),
            None if raster.indexed => chunks
                .transparency
                .as_deref()
                .and_then(|trns| color_key_from_trns(&header, trns)),
            None => None,
        };
    }
    attach_raster(slot, samples);
    Ok(())
}

fn read_chunks(file: &mut InputFile) -> Result<(PngHeader, PngChunks)> {
    let signature = file.read_array::<8>()?;
    if signature != SIGNATURE {
        return Err(BildwerkError::CorruptFormat("missing PNG signature".into()));
    }

    let mut header: Option<PngHeader> = None;
    let mut chunks = PngChunks::default();
    loop {
        let len = file.read_u32_be()?;
        let kind = file.read_array::<4>()?;
        if header.is_none() && &kind != b"IHDR" {
            return Err(BildwerkError::CorruptFormat("PNG does not start with IHDR".into()));
        }
        if &kind == b"IDAT" {
            let offset = file.tell()?;
            chunks.idat.push((offset, len));
            file.skip(len as u64 + 4)?;
            continue;
        }

        let data = file.read_vec(len as usize)?;
        let stored_crc = file.read_u32_be()?;
        let mut crc = Crc::new();
        crc.update(&kind);
        crc.update(&data);
        if crc.sum() != stored_crc {
            return Err(BildwerkError::CorruptFormat(format!(
                "PNG chunk {} fails its checksum",
                String::from_utf8_lossy(&kind)
            )));
        }

        match &kind {
            b"IHDR" => header = Some(parse_header(&data)?),
            b"PLTE" => chunks.palette = Some(data),
            b"tRNS" => chunks.transparency = Some(data),
            b"pHYs" if data.len() >= 9 => {
                let x = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as f64;
                let y = u32::from_be_bytes([data[4], data[5], data[6], data[7]]) as f64;
                if x > 0.0 && y > 0.0 {
                    chunks.density = match data[8] {
                        1 => Some((x * 0.0254, y * 0.0254)),
                        _ => Some((-x, -y)),
                    };
                }
            }
            b"IEND" => break,
            other if other[0].is_ascii_uppercase() => {
                return Err(BildwerkError::UnsupportedEncoding(format!(
                    "unknown critical PNG chunk {}",
                    String::from_utf8_lossy(other)
                )));
            }
            _ => {}
        }
    }

    let header = header.ok_or_else(|| BildwerkError::CorruptFormat("PNG without IHDR".into()))?;
    if chunks.idat.is_empty() {
        return Err(BildwerkError::CorruptFormat("PNG without image data".into()));
    }
    Ok((header, chunks))
}

fn parse_header(data: &[u8]) -> Result<PngHeader> {
    if data.len() < 13 {
        return Err(BildwerkError::CorruptFormat("short PNG IHDR".into()));
    }
    let width = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
    let height = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
    let (bit_depth, color_type) = (data[8], data[9]);
    let (compression, filter, interlace) = (data[10], data[11], data[12]);

    if width == 0 || height == 0 || width > i32::MAX as u32 || height > i32::MAX as u32 {
        return Err(BildwerkError::CorruptFormat(format!("PNG size {width}x{height}")));
    }
    let depth_ok = match color_type {
        COLOR_GRAY => matches!(bit_depth, 1 | 2 | 4 | 8 | 16),
        COLOR_PALETTE => matches!(bit_depth, 1 | 2 | 4 | 8),
        COLOR_RGB | COLOR_GRAY_ALPHA | COLOR_RGBA => matches!(bit_depth, 8 | 16),
        _ => false,
    };
    if !depth_ok || compression != 0 || filter != 0 || interlace > 1 {
        return Err(BildwerkError::CorruptFormat(format!(
            "PNG colour type {color_type} depth {bit_depth} compression {compression} \
             filter {filter} interlace {interlace}"
        )));
    }
    Ok(PngHeader {
        width,
        height,
        bit_depth,
        color_type,
        interlaced: interlace == 1,
    })
}

/// Colour key from a tRNS chunk, for images without an alpha channel.
fn color_key_from_trns(header: &PngHeader, trns: &[u8]) -> Option<Transparency> {
    let mask = if header.bit_depth >= 16 {
        0xFFFF
    } else {
        (1u16 << header.bit_depth) - 1
    };
    let key = match header.color_type {
        COLOR_GRAY if trns.len() >= 2 => [u16::from_be_bytes([trns[0], trns[1]]) & mask, 0, 0, 0],
        COLOR_RGB if trns.len() >= 6 => [
            u16::from_be_bytes([trns[0], trns[1]]) & mask,
            u16::from_be_bytes([trns[2], trns[3]]) & mask,
            u16::from_be_bytes([trns[4], trns[5]]) & mask,
            0,
        ],
        COLOR_PALETTE => {
            let index = trns.iter().position(|&alpha| alpha < ALPHA_THRESHOLD)?;
            let extra = trns[index + 1..]
                .iter()
                .filter(|&&alpha| alpha < ALPHA_THRESHOLD)
                .count();
            if extra > 0 {
                warn!(index, extra, "PNG palette has several transparent entries, keying the first");
            }
            [index as u16, 0, 0, 0]
        }
        _ => return None,
    };
    Some(Transparency::ColorKey(key))
}

/// Drop the alpha channel. Pixels below [`ALPHA_THRESHOLD`] are repainted
/// with a colour no opaque pixel uses, which becomes the colour key.
fn flatten_alpha(
    samples: Vec<u8>,
    channels: u8,
    has_alpha: bool,
) -> Result<(Vec<u8>, u8, Option<[u16; 4]>)> {
    if !has_alpha {
        return Ok((samples, channels, None));
    }
    let channels = channels as usize;
    let color = channels - 1;
    let pixels = samples.len() / channels;

    let pack = |px: &[u8]| px[..color].iter().fold(0u32, |acc, &v| (acc << 8) | v as u32);
    let mut used = HashSet::new();
    let mut any_transparent = false;
    for px in samples.chunks_exact(channels) {
        if px[color] < ALPHA_THRESHOLD {
            any_transparent = true;
        } else {
            used.insert(pack(px));
        }
    }

    let key = if any_transparent {
        let space = 1u32 << (8 * color as u32);
        let free = (0..space).find(|candidate| !used.contains(candidate));
        if free.is_none() {
            warn!("every colour is in use, PNG transparency dropped");
        }
        free
    } else {
        None
    };

    let mut out = crate::alloc_raster(&[pixels, color], "PNG colour raster")?;
    for (px, dst) in samples.chunks_exact(channels).zip(out.chunks_exact_mut(color)) {
        match key {
            Some(key) if px[color] < ALPHA_THRESHOLD => {
                for (c, sample) in dst.iter_mut().enumerate() {
                    *sample = (key >> (8 * (color - 1 - c))) as u8;
                }
            }
            _ => dst.copy_from_slice(&px[..color]),
        }
    }

    let key = key.map(|key| {
        let mut values = [0u16; 4];
        for (c, value) in values.iter_mut().take(color).enumerate() {
            *value = ((key >> (8 * (color - 1 - c))) & 0xFF) as u16;
        }
        values
    });
    Ok((out, color as u8, key))
}

// ---------------------------------------------------------------------------
// IDAT passthrough source
// ---------------------------------------------------------------------------

/// Streams the IDAT payloads from the file, chunk after chunk.
struct PngIdatSource {
    file: InputFile,
    chunks: Vec<(u64, u32)>,
    next: usize,
    remaining: u32,
    buf: Vec<u8>,
}

impl DataSource for PngIdatSource {
    fn init(&mut self) -> Result<()> {
        self.next = 0;
        self.remaining = 0;
        self.buf = crate::alloc_zeroed(BLOCK_SIZE, "PNG IDAT buffer")?;
        Ok(())
    }

    fn fill(&mut self) -> Result<Option<&[u8]>> {
        while self.remaining == 0 {
            let Some(&(offset, len)) = self.chunks.get(self.next) else {
                return Ok(None);
            };
            self.file.seek(offset)?;
            self.remaining = len;
            self.next += 1;
        }
        let n = (self.remaining as usize).min(BLOCK_SIZE);
        self.file.read_exact(&mut self.buf[..n])?;
        self.remaining -= n as u32;
        Ok(Some(&self.buf[..n]))
    }

    fn terminate(&mut self) {
        self.buf = Vec::new();
    }
}
