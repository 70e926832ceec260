// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// TIFF decoder.
//
// Chunky, untiled strips whose compression has a PDF filter are passed
// through one data source per strip. Tiles, separate planes, extra samples,
// 16-bit samples and unusual predictor/compression pairs are decoded in
// full into a single 8-bit strip.

use std::collections::HashSet;
use std::io::Read;

use bildwerk_core::error::{BildwerkError, Result};
use bildwerk_core::types::{Compression, ContainerKind, Predictor};
use flate2::read::ZlibDecoder;
use tracing::{debug, instrument, warn};

use super::lzw::LzwDecoder;
use super::{ByteCursor, DecodeContext, attach_raster, reverse_bits, scale_to_8bit};
use crate::colorspace::RawPalette;
use crate::input::InputFile;
use crate::slot::{Container, ImageSlot, TiffInfo, row_bytes};
use crate::source::{DataSource, MemorySource};

const TAG_WIDTH: u16 = 256;
const TAG_HEIGHT: u16 = 257;
const TAG_BITS_PER_SAMPLE: u16 = 258;
const TAG_COMPRESSION: u16 = 259;
const TAG_PHOTOMETRIC: u16 = 262;
const TAG_FILL_ORDER: u16 = 266;
const TAG_STRIP_OFFSETS: u16 = 273;
const TAG_SAMPLES_PER_PIXEL: u16 = 277;
const TAG_ROWS_PER_STRIP: u16 = 278;
const TAG_STRIP_BYTE_COUNTS: u16 = 279;
const TAG_X_RESOLUTION: u16 = 282;
const TAG_Y_RESOLUTION: u16 = 283;
const TAG_PLANAR_CONFIG: u16 = 284;
const TAG_T4_OPTIONS: u16 = 292;
const TAG_T6_OPTIONS: u16 = 293;
const TAG_RESOLUTION_UNIT: u16 = 296;
const TAG_PREDICTOR: u16 = 317;
const TAG_COLOR_MAP: u16 = 320;
const TAG_TILE_WIDTH: u16 = 322;
const TAG_TILE_LENGTH: u16 = 323;
const TAG_TILE_OFFSETS: u16 = 324;
const TAG_TILE_BYTE_COUNTS: u16 = 325;
const TAG_EXTRA_SAMPLES: u16 = 338;
const TAG_SAMPLE_FORMAT: u16 = 339;

const PHOTOMETRIC_WHITE_IS_ZERO: u16 = 0;
const PHOTOMETRIC_BLACK_IS_ZERO: u16 = 1;
const PHOTOMETRIC_RGB: u16 = 2;
const PHOTOMETRIC_PALETTE: u16 = 3;
const PHOTOMETRIC_SEPARATED: u16 = 5;

/// Parsed image file directory, with TIFF defaults applied.
#[derive(Debug, Clone)]
struct Ifd {
    width: u32,
    height: u32,
    bits_per_sample: Vec<u32>,
    compression: u16,
    photometric: Option<u16>,
    fill_order: u16,
    samples_per_pixel: u16,
    rows_per_strip: u32,
    strip_offsets: Vec<u32>,
    strip_byte_counts: Vec<u32>,
    x_resolution: Option<f64>,
    y_resolution: Option<f64>,
    resolution_unit: u16,
    planar_config: u16,
    t4_options: u32,
    t6_options: u32,
    predictor: u16,
    color_map: Vec<u32>,
    tile_width: u32,
    tile_length: u32,
    tile_offsets: Vec<u32>,
    tile_byte_counts: Vec<u32>,
    extra_samples: usize,
    sample_format: u16,
}

impl Default for Ifd {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            bits_per_sample: vec![1],
            compression: 1,
            photometric: None,
            fill_order: 1,
            samples_per_pixel: 1,
            rows_per_strip: u32::MAX,
            strip_offsets: Vec::new(),
            strip_byte_counts: Vec::new(),
            x_resolution: None,
            y_resolution: None,
            resolution_unit: 2,
            planar_config: 1,
            t4_options: 0,
            t6_options: 0,
            predictor: 1,
            color_map: Vec::new(),
            tile_width: 0,
            tile_length: 0,
            tile_offsets: Vec::new(),
            tile_byte_counts: Vec::new(),
            extra_samples: 0,
            sample_format: 1,
        }
    }
}

impl Ifd {
    fn tiled(&self) -> bool {
        self.tile_width > 0 && self.tile_length > 0
    }
}

/// Validated interpretation of an IFD.
#[derive(Debug, Clone, Copy)]
struct Layout {
    bps: u8,
    /// Samples per pixel including extra samples.
    samples: usize,
    /// Colour components, without extra samples.
    components: u8,
    photometric: u16,
    compression: Compression,
    ccitt_k: i32,
    invert: bool,
}

/// Bounds-checked random access into the file image.
struct TiffReader<'a> {
    data: &'a [u8],
    big_endian: bool,
}

impl<'a> TiffReader<'a> {
    fn u16_at(&self, pos: usize) -> Result<u16> {
        ByteCursor::at(self.data, pos, self.big_endian).u16()
    }

    fn u32_at(&self, pos: usize) -> Result<u32> {
        ByteCursor::at(self.data, pos, self.big_endian).u32()
    }

    /// Integer values of a directory entry whose 4-byte value field starts
    /// at `field`.
    fn values(&self, kind: u16, count: u32, field: usize) -> Result<Vec<u32>> {
        let size = match kind {
            1 | 2 | 6 | 7 => 1,
            3 | 8 => 2,
            4 | 9 => 4,
            _ => {
                return Err(BildwerkError::CorruptFormat(format!(
                    "TIFF field type {kind} where an integer is expected"
                )));
            }
        };
        let total = size * count as usize;
        if total > self.data.len() {
            return Err(BildwerkError::CorruptFormat(format!(
                "TIFF field with {count} values"
            )));
        }
        let start = if total <= 4 {
            field
        } else {
            self.u32_at(field)? as usize
        };
        let mut cur = ByteCursor::at(self.data, start, self.big_endian);
        (0..count)
            .map(|_| match size {
                1 => cur.u8().map(u32::from),
                2 => cur.u16().map(u32::from),
                _ => cur.u32(),
            })
            .collect()
    }

    fn rational(&self, kind: u16, field: usize) -> Result<f64> {
        if kind != 5 {
            let value = self.values(kind, 1, field)?;
            return Ok(value.first().copied().unwrap_or(0) as f64);
        }
        let pos = self.u32_at(field)? as usize;
        let num = self.u32_at(pos)?;
        let den = self.u32_at(pos + 4)?;
        Ok(if den == 0 { 0.0 } else { num as f64 / den as f64 })
    }

    fn first(&self, kind: u16, count: u32, field: usize) -> Result<u32> {
        Ok(self.values(kind, count, field)?.first().copied().unwrap_or(0))
    }

    fn parse_ifd(&self, offset: usize) -> Result<Ifd> {
        let count = self.u16_at(offset)? as usize;
        let mut ifd = Ifd::default();
        for i in 0..count {
            let entry = offset + 2 + i * 12;
            let tag = self.u16_at(entry)?;
            let kind = self.u16_at(entry + 2)?;
            let n = self.u32_at(entry + 4)?;
            let field = entry + 8;
            match tag {
                TAG_WIDTH => ifd.width = self.first(kind, n, field)?,
                TAG_HEIGHT => ifd.height = self.first(kind, n, field)?,
                TAG_BITS_PER_SAMPLE => ifd.bits_per_sample = self.values(kind, n, field)?,
                TAG_COMPRESSION => ifd.compression = self.first(kind, n, field)? as u16,
                TAG_PHOTOMETRIC => ifd.photometric = Some(self.first(kind, n, field)? as u16),
                TAG_FILL_ORDER => ifd.fill_order = self.first(kind, n, field)? as u16,
                TAG_STRIP_OFFSETS => ifd.strip_offsets = self.values(kind, n, field)?,
                TAG_SAMPLES_PER_PIXEL => ifd.samples_per_pixel = self.first(kind, n, field)? as u16,
                TAG_ROWS_PER_STRIP => ifd.rows_per_strip = self.first(kind, n, field)?,
                TAG_STRIP_BYTE_COUNTS => ifd.strip_byte_counts = self.values(kind, n, field)?,
                TAG_X_RESOLUTION => ifd.x_resolution = Some(self.rational(kind, field)?),
                TAG_Y_RESOLUTION => ifd.y_resolution = Some(self.rational(kind, field)?),
                TAG_PLANAR_CONFIG => ifd.planar_config = self.first(kind, n, field)? as u16,
                TAG_T4_OPTIONS => ifd.t4_options = self.first(kind, n, field)?,
                TAG_T6_OPTIONS => ifd.t6_options = self.first(kind, n, field)?,
                TAG_RESOLUTION_UNIT => ifd.resolution_unit = self.first(kind, n, field)? as u16,
                TAG_PREDICTOR => ifd.predictor = self.first(kind, n, field)? as u16,
                TAG_COLOR_MAP => ifd.color_map = self.values(kind, n, field)?,
                TAG_TILE_WIDTH => ifd.tile_width = self.first(kind, n, field)?,
                TAG_TILE_LENGTH => ifd.tile_length = self.first(kind, n, field)?,
                TAG_TILE_OFFSETS => ifd.tile_offsets = self.values(kind, n, field)?,
                TAG_TILE_BYTE_COUNTS => ifd.tile_byte_counts = self.values(kind, n, field)?,
                TAG_EXTRA_SAMPLES => ifd.extra_samples = n as usize,
                TAG_SAMPLE_FORMAT => ifd.sample_format = self.first(kind, n, field)? as u16,
                _ => {}
            }
        }
        Ok(ifd)
    }

    /// Bytes of strip or tile `index`.
    fn chunk(&self, offsets: &[u32], counts: &[u32], index: usize) -> Result<&'a [u8]> {
        let (Some(&offset), Some(&count)) = (offsets.get(index), counts.get(index)) else {
            return Err(BildwerkError::CorruptFormat(format!(
                "TIFF strip/tile {index} has no offset or byte count"
            )));
        };
        let start = offset as usize;
        self.data
            .get(start..start + count as usize)
            .ok_or_else(|| {
                BildwerkError::CorruptFormat(format!("TIFF strip/tile {index} lies outside the file"))
            })
    }
}

#[instrument(skip_all, fields(file = file.name(), page = ctx.options.page))]
pub fn decode(mut file: InputFile, ctx: &DecodeContext<'_>, slot: &mut ImageSlot) -> Result<()> {
    let data = file.read_all()?;
    let big_endian = match data.get(..2) {
        Some(b"II") => false,
        Some(b"MM") => true,
        _ => return Err(BildwerkError::CorruptFormat("missing TIFF byte order mark".into())),
    };
    let reader = TiffReader {
        data: &data,
        big_endian,
    };
    match reader.u16_at(2)? {
        42 => {}
        43 => return Err(BildwerkError::UnsupportedEncoding("BigTIFF files".into())),
        other => {
            return Err(BildwerkError::CorruptFormat(format!("TIFF version {other}")));
        }
    }

    let wanted = ctx.options.page.max(1);
    let mut offset = reader.u32_at(4)? as usize;
    let mut seen = 0u32;
    let mut visited = HashSet::new();
    let ifd = loop {
        if offset == 0 {
            return Err(BildwerkError::page_not_found(ContainerKind::Tiff, wanted, seen));
        }
        if !visited.insert(offset) {
            return Err(BildwerkError::CorruptFormat("TIFF directory chain loops".into()));
        }
        seen += 1;
        if seen == wanted {
            break reader.parse_ifd(offset)?;
        }
        let entries = reader.u16_at(offset)? as usize;
        offset = reader.u32_at(offset + 2 + entries * 12)? as usize;
    };

    let layout = interpret(&ifd)?;
    debug!(
        width = ifd.width,
        height = ifd.height,
        bps = layout.bps,
        samples = layout.samples,
        compression = ifd.compression,
        photometric = layout.photometric,
        tiled = ifd.tiled(),
        "TIFF directory"
    );

    slot.width = ifd.width;
    slot.height = ifd.height as i32;
    slot.components = layout.components;
    slot.ccitt_k = layout.ccitt_k;
    if layout.invert {
        slot.invert = !slot.invert;
    }
    if let (Some(x), Some(y)) = (ifd.x_resolution, ifd.y_resolution) {
        if x > 0.0 && y > 0.0 {
            (slot.dpi_x, slot.dpi_y) = match ifd.resolution_unit {
                2 => (x, y),
                3 => (x * 2.54, y * 2.54),
                _ => (-x, -y),
            };
        }
    }
    if layout.photometric == PHOTOMETRIC_PALETTE {
        slot.palette = Some(read_color_map(&ifd, layout.bps)?);
    }

    let passthrough = can_pass_through(&ifd, &layout);
    slot.container = Container::Tiff(TiffInfo {
        page: wanted,
        compression_tag: ifd.compression,
        photometric: layout.photometric,
        tiled: ifd.tiled(),
        planar_config: ifd.planar_config,
        passthrough,
    });

    if passthrough {
        pass_through(&reader, &ifd, &layout, slot)
    } else {
        let (raster, bpc) = decode_full(&reader, &ifd, &layout)?;
        slot.bpc = bpc;
        slot.compression = Compression::None;
        slot.predictor = Predictor::None;
        slot.use_raw = false;
        attach_raster(slot, raster);
        Ok(())
    }
}

fn interpret(ifd: &Ifd) -> Result<Layout> {
    if ifd.width == 0 || ifd.height == 0 || ifd.height > i32::MAX as u32 {
        return Err(BildwerkError::CorruptFormat(format!(
            "TIFF size {}x{}",
            ifd.width, ifd.height
        )));
    }
    if ifd.sample_format != 1 {
        return Err(BildwerkError::UnsupportedEncoding(format!(
            "TIFF sample format {}",
            ifd.sample_format
        )));
    }
    let bps = ifd.bits_per_sample.first().copied().unwrap_or(1);
    if ifd.bits_per_sample.iter().any(|&b| b != bps) || !matches!(bps, 1 | 2 | 4 | 8 | 16) {
        return Err(BildwerkError::UnsupportedEncoding(format!(
            "TIFF bits per sample {:?}",
            ifd.bits_per_sample
        )));
    }

    let samples = ifd.samples_per_pixel.max(1) as usize;
    let color_samples = samples.saturating_sub(ifd.extra_samples).max(1);
    let photometric = match ifd.photometric {
        Some(p) => p,
        None => {
            let guess = if !ifd.color_map.is_empty() {
                PHOTOMETRIC_PALETTE
            } else if color_samples >= 3 {
                PHOTOMETRIC_RGB
            } else {
                PHOTOMETRIC_BLACK_IS_ZERO
            };
            warn!(guess, "TIFF without photometric interpretation");
            guess
        }
    };
    let components = match photometric {
        PHOTOMETRIC_WHITE_IS_ZERO | PHOTOMETRIC_BLACK_IS_ZERO | PHOTOMETRIC_PALETTE => 1,
        PHOTOMETRIC_RGB => 3,
        PHOTOMETRIC_SEPARATED => 4,
        other => {
            return Err(BildwerkError::UnsupportedEncoding(format!(
                "TIFF photometric interpretation {other}"
            )));
        }
    };
    if color_samples != components as usize {
        return Err(BildwerkError::CorruptFormat(format!(
            "TIFF photometric {photometric} with {color_samples} colour samples"
        )));
    }
    if photometric == PHOTOMETRIC_PALETTE && bps > 8 {
        return Err(BildwerkError::UnsupportedEncoding(format!(
            "{bps}-bit TIFF palette images"
        )));
    }

    let (compression, ccitt_k) = match ifd.compression {
        1 => (Compression::None, 0),
        5 => (Compression::Lzw, 0),
        32773 => (Compression::RunLength, 0),
        8 | 32946 => (Compression::Flate, 0),
        3 => {
            if ifd.t4_options & 0x06 != 0 {
                return Err(BildwerkError::UnsupportedEncoding(format!(
                    "TIFF T4 options 0x{:X}",
                    ifd.t4_options
                )));
            }
            (Compression::Ccitt, i32::from(ifd.t4_options & 0x01 != 0))
        }
        4 => {
            if ifd.t6_options & 0x02 != 0 {
                return Err(BildwerkError::UnsupportedEncoding(
                    "TIFF G4 with uncompressed mode".into(),
                ));
            }
            (Compression::Ccitt, -1)
        }
        other => {
            return Err(BildwerkError::UnsupportedEncoding(format!(
                "TIFF compression {other}"
            )));
        }
    };
    if compression == Compression::Ccitt && (bps != 1 || samples != 1) {
        return Err(BildwerkError::CorruptFormat(
            "CCITT-compressed TIFF must be 1-bit single-sample".into(),
        ));
    }

    // Decoded CCITT data uses 0 for black; every other compression keeps
    // the file's photometric sense.
    let invert = if compression == Compression::Ccitt {
        photometric == PHOTOMETRIC_BLACK_IS_ZERO
    } else {
        photometric == PHOTOMETRIC_WHITE_IS_ZERO
    };

    Ok(Layout {
        bps: bps as u8,
        samples,
        components,
        photometric,
        compression,
        ccitt_k,
        invert,
    })
}

fn can_pass_through(ifd: &Ifd, layout: &Layout) -> bool {
    let predictor_ok = match ifd.predictor {
        1 => true,
        2 => matches!(layout.compression, Compression::Lzw | Compression::Flate),
        _ => false,
    };
    !ifd.tiled()
        && (ifd.planar_config == 1 || layout.samples == 1)
        && ifd.extra_samples == 0
        && layout.bps <= 8
        && predictor_ok
        && (ifd.fill_order == 1 || layout.compression == Compression::Ccitt)
}

fn read_color_map(ifd: &Ifd, bps: u8) -> Result<RawPalette> {
    let n = 1usize << bps;
    if ifd.color_map.len() < 3 * n {
        return Err(BildwerkError::CorruptFormat(format!(
            "TIFF colour map has {} values, {} needed",
            ifd.color_map.len(),
            3 * n
        )));
    }
    let (red, rest) = ifd.color_map.split_at(n);
    let (green, blue) = rest.split_at(n);
    let entries = (0..n)
        .map(|i| [red[i] as u16, green[i] as u16, blue[i] as u16])
        .collect();
    Ok(RawPalette::for_depth(entries, 16, bps))
}

/// Strip count and byte counts, filling in absent byte counts for
/// uncompressed data.
fn strip_geometry(ifd: &Ifd, row: usize) -> Result<(usize, u32, Vec<u32>)> {
    let rows_per_strip = ifd.rows_per_strip.clamp(1, ifd.height);
    let strips = ifd.height.div_ceil(rows_per_strip) as usize;
    let counts = if ifd.strip_byte_counts.is_empty() && ifd.compression == 1 {
        (0..strips)
            .map(|i| {
                let rows = (ifd.height - i as u32 * rows_per_strip).min(rows_per_strip);
                (rows as usize * row) as u32
            })
            .collect()
    } else {
        ifd.strip_byte_counts.clone()
    };
    Ok((strips, rows_per_strip, counts))
}

fn pass_through(reader: &TiffReader<'_>, ifd: &Ifd, layout: &Layout, slot: &mut ImageSlot) -> Result<()> {
    let row = row_bytes(ifd.width, layout.bps, layout.samples as u8);
    let (strips, rows_per_strip, counts) = strip_geometry(ifd, row)?;
    if ifd.strip_offsets.len() < strips {
        return Err(BildwerkError::CorruptFormat(format!(
            "TIFF has {} strip offsets, {strips} needed",
            ifd.strip_offsets.len()
        )));
    }

    let mut sources: Vec<Box<dyn DataSource>> = Vec::with_capacity(strips);
    for index in 0..strips {
        let mut bytes = reader.chunk(&ifd.strip_offsets, &counts, index)?.to_vec();
        if layout.compression == Compression::None {
            let rows = (ifd.height - index as u32 * rows_per_strip).min(rows_per_strip);
            let expected = rows as usize * row;
            if bytes.len() < expected {
                return Err(BildwerkError::CorruptFormat(format!(
                    "TIFF strip {index} holds {} bytes, {expected} needed",
                    bytes.len()
                )));
            }
            bytes.truncate(expected);
        }
        if ifd.fill_order == 2 {
            reverse_bits(&mut bytes);
        }
        sources.push(Box::new(MemorySource::blocks(bytes)));
    }

    slot.bpc = layout.bps;
    slot.compression = layout.compression;
    slot.predictor = if ifd.predictor == 2 {
        Predictor::Tiff
    } else {
        Predictor::None
    };
    slot.use_raw = layout.compression != Compression::None;
    slot.strips = strips as u32;
    slot.rows_per_strip = rows_per_strip;
    slot.sources = sources;
    debug!(strips, rows_per_strip, compression = ?layout.compression, "TIFF strips passed through");
    Ok(())
}

fn decode_full(reader: &TiffReader<'_>, ifd: &Ifd, layout: &Layout) -> Result<(Vec<u8>, u8)> {
    if matches!(layout.compression, Compression::Ccitt) {
        return Err(BildwerkError::UnsupportedEncoding(
            "CCITT-compressed TIFF in tiles or with this fill order".into(),
        ));
    }
    let separate = ifd.planar_config == 2 && layout.samples > 1;
    let planes = if separate { layout.samples } else { 1 };
    let per_plane = if separate { 1 } else { layout.samples };
    let bps = layout.bps;
    let width = ifd.width as usize;
    let height = ifd.height as usize;
    let plane_row = row_bytes(ifd.width, bps, per_plane as u8);

    let mut plane_data = Vec::with_capacity(planes);
    for _ in 0..planes {
        plane_data.push(crate::alloc_raster(&[plane_row, height], "TIFF plane")?);
    }

    let prepare = |raw: &[u8], expected: usize, row_len: usize| -> Result<Vec<u8>> {
        let mut chunk = if ifd.fill_order == 2 {
            let mut copy = raw.to_vec();
            reverse_bits(&mut copy);
            decompress(layout.compression, &copy, expected)?
        } else {
            decompress(layout.compression, raw, expected)?
        };
        if ifd.predictor == 2 {
            undo_predictor(&mut chunk, row_len, per_plane, bps, reader.big_endian)?;
        }
        Ok(chunk)
    };

    if ifd.tiled() {
        let (tile_w, tile_h) = (ifd.tile_width as usize, ifd.tile_length as usize);
        let across = width.div_ceil(tile_w);
        let down = height.div_ceil(tile_h);
        let tile_row = row_bytes(ifd.tile_width, bps, per_plane as u8);
        for (plane, buf) in plane_data.iter_mut().enumerate() {
            for ty in 0..down {
                for tx in 0..across {
                    let index = plane * across * down + ty * across + tx;
                    let raw = reader.chunk(&ifd.tile_offsets, &ifd.tile_byte_counts, index)?;
                    let tile = prepare(raw, tile_row * tile_h, tile_row)?;
                    let x_byte = tx * tile_w * per_plane * bps as usize / 8;
                    let visible = (width - tx * tile_w).min(tile_w);
                    let copy = row_bytes(visible as u32, bps, per_plane as u8);
                    for r in 0..tile_h {
                        let y = ty * tile_h + r;
                        if y >= height {
                            break;
                        }
                        let dst = y * plane_row + x_byte;
                        buf[dst..dst + copy].copy_from_slice(&tile[r * tile_row..r * tile_row + copy]);
                    }
                }
            }
        }
    } else {
        let (strips, rows_per_strip, counts) = strip_geometry(ifd, plane_row)?;
        for (plane, buf) in plane_data.iter_mut().enumerate() {
            for s in 0..strips {
                let first_row = s * rows_per_strip as usize;
                let rows = (height - first_row).min(rows_per_strip as usize);
                let raw = reader.chunk(&ifd.strip_offsets, &counts, plane * strips + s)?;
                let strip = prepare(raw, rows * plane_row, plane_row)?;
                buf[first_row * plane_row..(first_row + rows) * plane_row].copy_from_slice(&strip);
            }
        }
    }

    if planes == 1 && layout.samples == 1 && bps <= 8 {
        let raster = plane_data.swap_remove(0);
        return Ok((raster, bps));
    }

    let components = layout.components as usize;
    if layout.samples > components {
        debug!(extra = layout.samples - components, "TIFF extra samples dropped");
    }
    let mut out = crate::alloc_raster(&[width, height, components], "TIFF raster")?;
    let mut pos = 0;
    for y in 0..height {
        for x in 0..width {
            for c in 0..components {
                let (buf, index) = if separate {
                    (&plane_data[c], x)
                } else {
                    (&plane_data[0], x * layout.samples + c)
                };
                let row = &buf[y * plane_row..(y + 1) * plane_row];
                let value = sample_at(row, index, bps, reader.big_endian);
                out[pos] = match bps {
                    16 => (value >> 8) as u8,
                    8 => value as u8,
                    _ => scale_to_8bit(value as u8, bps),
                };
                pos += 1;
            }
        }
    }
    Ok((out, 8))
}

fn sample_at(row: &[u8], index: usize, bps: u8, big_endian: bool) -> u16 {
    match bps {
        16 => {
            let bytes = [row[index * 2], row[index * 2 + 1]];
            if big_endian {
                u16::from_be_bytes(bytes)
            } else {
                u16::from_le_bytes(bytes)
            }
        }
        8 => row[index] as u16,
        _ => {
            let bits = bps as usize;
            let bit = index * bits;
            let shift = 8 - bits - bit % 8;
            ((row[bit / 8] >> shift) & ((1u8 << bits) - 1)) as u16
        }
    }
}

/// Decompress one strip or tile to exactly `expected` bytes.
fn decompress(compression: Compression, raw: &[u8], expected: usize) -> Result<Vec<u8>> {
    let mut out = match compression {
        Compression::None => raw.to_vec(),
        Compression::Lzw => LzwDecoder::tiff().decode(raw, expected)?,
        Compression::RunLength => unpack_bits(raw, expected),
        Compression::Flate => {
            let mut out = Vec::new();
            ZlibDecoder::new(raw)
                .take(expected as u64)
                .read_to_end(&mut out)
                .map_err(|err| BildwerkError::CorruptFormat(format!("TIFF deflate data: {err}")))?;
            out
        }
        Compression::Ccitt | Compression::Dct => {
            return Err(BildwerkError::UnsupportedEncoding(format!(
                "decoding {compression:?} TIFF data"
            )));
        }
    };
    if out.len() < expected {
        return Err(BildwerkError::CorruptFormat(format!(
            "TIFF strip data holds {} of {expected} bytes",
            out.len()
        )));
    }
    out.truncate(expected);
    Ok(out)
}

/// PackBits run-length decoding.
fn unpack_bits(raw: &[u8], limit: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(limit);
    let mut i = 0;
    while i < raw.len() && out.len() < limit {
        let n = raw[i] as i8;
        i += 1;
        match n {
            0..=127 => {
                let len = n as usize + 1;
                let end = (i + len).min(raw.len());
                out.extend_from_slice(&raw[i..end]);
                i = end;
            }
            -127..=-1 => {
                if let Some(&byte) = raw.get(i) {
                    out.extend(std::iter::repeat_n(byte, (1 - n as isize) as usize));
                }
                i += 1;
            }
            _ => {}
        }
    }
    out
}

/// Undo TIFF horizontal differencing row by row.
fn undo_predictor(chunk: &mut [u8], row_len: usize, samples: usize, bps: u8, big_endian: bool) -> Result<()> {
    match bps {
        8 => {
            for row in chunk.chunks_mut(row_len) {
                for i in samples..row.len() {
                    row[i] = row[i].wrapping_add(row[i - samples]);
                }
            }
        }
        16 => {
            let get = |row: &[u8], i: usize| {
                let bytes = [row[2 * i], row[2 * i + 1]];
                if big_endian {
                    u16::from_be_bytes(bytes)
                } else {
                    u16::from_le_bytes(bytes)
                }
            };
            for row in chunk.chunks_mut(row_len) {
                for i in samples..row.len() / 2 {
                    let value = get(row, i).wrapping_add(get(row, i - samples));
                    let bytes = if big_endian {
                        value.to_be_bytes()
                    } else {
                        value.to_le_bytes()
                    };
                    row[2 * i..2 * i + 2].copy_from_slice(&bytes);
                }
            }
        }
        other => {
            return Err(BildwerkError::UnsupportedEncoding(format!(
                "TIFF horizontal predictor with {other}-bit samples"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::source::drain;
    use bildwerk_core::config::{EngineConfig, ImageOptions};
    use std::io::Write;

    /// One image directory for [`build_tiff`]. Strip offsets and byte
    /// counts are filled in from `strips`; `tiles` switches to tile tags.
    pub(crate) struct TestPage {
        pub width: u32,
        pub height: u32,
        pub bps: u16,
        pub spp: u16,
        pub photometric: u16,
        pub compression: u16,
        pub rows_per_strip: u32,
        pub strips: Vec<Vec<u8>>,
        pub tiles: bool,
        pub extra: Vec<(u16, u16, Vec<u32>)>,
    }

    impl TestPage {
        pub(crate) fn gray8(width: u32, height: u32, strips: Vec<Vec<u8>>, rows_per_strip: u32) -> Self {
            Self {
                width,
                height,
                bps: 8,
                spp: 1,
                photometric: PHOTOMETRIC_BLACK_IS_ZERO,
                compression: 1,
                rows_per_strip,
                strips,
                tiles: false,
                extra: Vec::new(),
            }
        }
    }

    fn put16(out: &mut Vec<u8>, be: bool, v: u16) {
        out.extend_from_slice(&if be { v.to_be_bytes() } else { v.to_le_bytes() });
    }

    fn put32(out: &mut Vec<u8>, be: bool, v: u32) {
        out.extend_from_slice(&if be { v.to_be_bytes() } else { v.to_le_bytes() });
    }

    pub(crate) fn build_tiff(be: bool, pages: &[TestPage]) -> Vec<u8> {
        let mut out = if be { b"MM".to_vec() } else { b"II".to_vec() };
        put16(&mut out, be, 42);
        let mut link = out.len();
        put32(&mut out, be, 0);

        for page in pages {
            let mut offsets = Vec::new();
            for strip in &page.strips {
                offsets.push(out.len() as u32);
                out.extend_from_slice(strip);
            }
            let counts: Vec<u32> = page.strips.iter().map(|s| s.len() as u32).collect();
            let (offset_tag, count_tag) = if page.tiles {
                (TAG_TILE_OFFSETS, TAG_TILE_BYTE_COUNTS)
            } else {
                (TAG_STRIP_OFFSETS, TAG_STRIP_BYTE_COUNTS)
            };
            let mut entries = vec![
                (TAG_WIDTH, 4, vec![page.width]),
                (TAG_HEIGHT, 4, vec![page.height]),
                (TAG_BITS_PER_SAMPLE, 3, vec![page.bps as u32; page.spp as usize]),
                (TAG_COMPRESSION, 3, vec![page.compression as u32]),
                (TAG_PHOTOMETRIC, 3, vec![page.photometric as u32]),
                (TAG_SAMPLES_PER_PIXEL, 3, vec![page.spp as u32]),
                (offset_tag, 4, offsets),
                (count_tag, 4, counts),
            ];
            if !page.tiles {
                entries.push((TAG_ROWS_PER_STRIP, 4, vec![page.rows_per_strip]));
            }
            entries.extend(page.extra.iter().cloned());
            entries.sort_by_key(|e| e.0);

            if out.len() % 2 == 1 {
                out.push(0);
            }
            let ifd_start = out.len();
            let rewrite = if be {
                (ifd_start as u32).to_be_bytes()
            } else {
                (ifd_start as u32).to_le_bytes()
            };
            out[link..link + 4].copy_from_slice(&rewrite);

            let mut overflow_pos = ifd_start + 2 + entries.len() * 12 + 4;
            let mut overflow = Vec::new();
            put16(&mut out, be, entries.len() as u16);
            for (tag, kind, values) in &entries {
                let mut bytes = Vec::new();
                for &v in values {
                    match kind {
                        3 => put16(&mut bytes, be, v as u16),
                        _ => put32(&mut bytes, be, v),
                    }
                }
                let count = if *kind == 5 { values.len() / 2 } else { values.len() };
                put16(&mut out, be, *tag);
                put16(&mut out, be, *kind);
                put32(&mut out, be, count as u32);
                if bytes.len() <= 4 {
                    bytes.resize(4, 0);
                    out.extend_from_slice(&bytes);
                } else {
                    put32(&mut out, be, overflow_pos as u32);
                    overflow_pos += bytes.len();
                    overflow.extend_from_slice(&bytes);
                }
            }
            link = out.len();
            put32(&mut out, be, 0);
            out.extend_from_slice(&overflow);
        }
        out
    }

    fn load_page(bytes: Vec<u8>, page: u32) -> Result<ImageSlot> {
        let options = ImageOptions { page, ..ImageOptions::default() };
        let config = EngineConfig::default();
        let ctx = DecodeContext { options: &options, config: &config };
        let mut slot = ImageSlot::new(ContainerKind::Tiff, "test.tif", &options);
        decode(InputFile::from_bytes("test.tif", bytes), &ctx, &mut slot)?;
        Ok(slot)
    }

    fn load(bytes: Vec<u8>) -> Result<ImageSlot> {
        load_page(bytes, 1)
    }

    fn drain_all(slot: &mut ImageSlot) -> Vec<u8> {
        slot.sources
            .iter_mut()
            .flat_map(|s| drain(s.as_mut()).unwrap())
            .collect()
    }

    /// Concatenated strips reproduce the raster; the last strip is short.
    #[test]
    fn multi_strip_uncompressed() {
        let raster: Vec<u8> = (0..12).collect();
        let page = TestPage::gray8(4, 3, vec![raster[..8].to_vec(), raster[8..].to_vec()], 2);
        let mut slot = load(build_tiff(false, &[page])).unwrap();
        assert_eq!((slot.strips(), slot.rows_per_strip()), (2, 2));
        assert_eq!(slot.strip_rows(1), 1);
        assert!(!slot.use_raw);
        assert_eq!(drain_all(&mut slot), raster);
    }

    /// LZW strips are handed to the writer untouched, big-endian files too.
    #[test]
    fn lzw_passthrough_big_endian() {
        let mut page = TestPage::gray8(2, 2, vec![vec![0x80, 0x01, 0x02]], 2);
        page.compression = 5;
        page.extra.push((TAG_PREDICTOR, 3, vec![2]));
        let mut slot = load(build_tiff(true, &[page])).unwrap();
        assert_eq!(slot.compression, Compression::Lzw);
        assert_eq!(slot.predictor, Predictor::Tiff);
        assert!(slot.use_raw);
        assert_eq!(drain_all(&mut slot), vec![0x80, 0x01, 0x02]);
    }

    /// PackBits with a predictor has no PDF equivalent and is decoded here.
    #[test]
    fn packbits_with_predictor_decoded() {
        let mut page = TestPage::gray8(4, 1, vec![vec![3, 10, 1, 1, 1]], 1);
        page.compression = 32773;
        page.extra.push((TAG_PREDICTOR, 3, vec![2]));
        let mut slot = load(build_tiff(false, &[page])).unwrap();
        assert!(!slot.use_raw);
        assert_eq!(drain_all(&mut slot), vec![10, 11, 12, 13]);
    }

    /// Separate colour planes are interleaved into chunky RGB.
    #[test]
    fn planar_rgb_interleaved() {
        let page = TestPage {
            width: 2,
            height: 1,
            bps: 8,
            spp: 3,
            photometric: PHOTOMETRIC_RGB,
            compression: 1,
            rows_per_strip: 1,
            strips: vec![vec![1, 2], vec![3, 4], vec![5, 6]],
            tiles: false,
            extra: vec![(TAG_PLANAR_CONFIG, 3, vec![2])],
        };
        let mut slot = load(build_tiff(false, &[page])).unwrap();
        assert_eq!((slot.components, slot.bpc), (3, 8));
        assert_eq!(drain_all(&mut slot), vec![1, 3, 5, 2, 4, 6]);
    }

    /// An alpha extra sample is dropped.
    #[test]
    fn extra_sample_dropped() {
        let page = TestPage {
            width: 1,
            height: 1,
            bps: 8,
            spp: 4,
            photometric: PHOTOMETRIC_RGB,
            compression: 1,
            rows_per_strip: 1,
            strips: vec![vec![9, 8, 7, 0]],
            tiles: false,
            extra: vec![(TAG_EXTRA_SAMPLES, 3, vec![2])],
        };
        let mut slot = load(build_tiff(false, &[page])).unwrap();
        assert_eq!(slot.components, 3);
        assert_eq!(drain_all(&mut slot), vec![9, 8, 7]);
    }

    /// 16-bit samples keep their high byte in either byte order.
    #[test]
    fn sixteen_bit_reduced() {
        for be in [false, true] {
            let samples = if be {
                vec![0xAB, 0x01, 0x12, 0xFF]
            } else {
                vec![0x01, 0xAB, 0xFF, 0x12]
            };
            let mut page = TestPage::gray8(2, 1, vec![samples], 1);
            page.bps = 16;
            let mut slot = load(build_tiff(be, &[page])).unwrap();
            assert_eq!(slot.bpc, 8);
            assert_eq!(drain_all(&mut slot), vec![0xAB, 0x12]);
        }
    }

    /// Deflate tiles are assembled and clipped at the right edge.
    #[test]
    fn deflate_tiles_assembled() {
        let tile = |base: u8| {
            let raw: Vec<u8> = (0..256).map(|i| base.wrapping_add(i as u8)).collect();
            let mut enc = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
            enc.write_all(&raw).unwrap();
            enc.finish().unwrap()
        };
        let mut page = TestPage::gray8(20, 2, vec![tile(0), tile(100)], 0);
        page.compression = 8;
        page.tiles = true;
        page.extra.push((TAG_TILE_WIDTH, 4, vec![16]));
        page.extra.push((TAG_TILE_LENGTH, 4, vec![16]));
        let mut slot = load(build_tiff(false, &[page])).unwrap();
        let raster = drain_all(&mut slot);
        assert_eq!(raster.len(), 40);
        assert_eq!(&raster[..4], &[0, 1, 2, 3]);
        assert_eq!(&raster[16..20], &[100, 101, 102, 103]);
        assert_eq!(&raster[20..24], &[16, 17, 18, 19]);
    }

    /// Palette images carry their 16-bit colour map.
    #[test]
    fn palette_color_map() {
        let mut page = TestPage::gray8(2, 1, vec![vec![0b0100_0000]], 1);
        page.bps = 1;
        page.photometric = PHOTOMETRIC_PALETTE;
        page.extra.push((TAG_COLOR_MAP, 3, vec![0, 65535, 0, 32768, 0, 0]));
        let slot = load(build_tiff(false, &[page])).unwrap();
        let palette = slot.palette.as_ref().unwrap();
        assert_eq!(palette.precision, 16);
        assert_eq!(palette.entries, vec![[0, 0, 0], [65535, 32768, 0]]);
    }

    /// WhiteIsZero gray data is flagged inverted.
    #[test]
    fn white_is_zero_inverts() {
        let mut page = TestPage::gray8(1, 1, vec![vec![0]], 1);
        page.photometric = PHOTOMETRIC_WHITE_IS_ZERO;
        assert!(load(build_tiff(false, &[page])).unwrap().invert);
    }

    /// G4 data with reversed fill order is bit-flipped and passed through.
    #[test]
    fn g4_fill_order_reversed() {
        let mut page = TestPage::gray8(8, 1, vec![vec![0b0000_0001, 0b1000_0000]], 1);
        page.bps = 1;
        page.photometric = PHOTOMETRIC_WHITE_IS_ZERO;
        page.compression = 4;
        page.extra.push((TAG_FILL_ORDER, 3, vec![2]));
        let mut slot = load(build_tiff(false, &[page])).unwrap();
        assert_eq!(slot.compression, Compression::Ccitt);
        assert_eq!(slot.ccitt_k, -1);
        assert!(!slot.invert);
        assert_eq!(drain_all(&mut slot), vec![0b1000_0000, 0b0000_0001]);
    }

    /// Resolution in centimetres converts to inches.
    #[test]
    fn resolution_in_cm() {
        let mut page = TestPage::gray8(1, 1, vec![vec![0]], 1);
        page.extra.push((TAG_X_RESOLUTION, 5, vec![100, 1]));
        page.extra.push((TAG_Y_RESOLUTION, 5, vec![50, 1]));
        page.extra.push((TAG_RESOLUTION_UNIT, 3, vec![3]));
        let slot = load(build_tiff(false, &[page])).unwrap();
        assert_eq!(slot.dpi(), (254.0, 127.0));
    }

    /// Pages are selected by walking the directory chain.
    #[test]
    fn page_selection() {
        let pages = [
            TestPage::gray8(1, 1, vec![vec![1]], 1),
            TestPage::gray8(1, 1, vec![vec![2]], 1),
        ];
        let tiff = build_tiff(false, &pages);
        let mut second = load_page(tiff.clone(), 2).unwrap();
        assert_eq!(drain_all(&mut second), vec![2]);
        assert!(matches!(load_page(tiff, 3), Err(BildwerkError::UnsupportedEncoding(_))));
    }

    /// YCbCr and JPEG-in-TIFF are refused.
    #[test]
    fn unsupported_variants() {
        let mut ycbcr = TestPage::gray8(1, 1, vec![vec![0, 0, 0]], 1);
        ycbcr.spp = 3;
        ycbcr.photometric = 6;
        assert!(matches!(load(build_tiff(false, &[ycbcr])), Err(BildwerkError::UnsupportedEncoding(_))));

        let mut jpeg = TestPage::gray8(1, 1, vec![vec![0]], 1);
        jpeg.compression = 7;
        assert!(matches!(load(build_tiff(false, &[jpeg])), Err(BildwerkError::UnsupportedEncoding(_))));
    }

    /// Strip offsets past the end of the file are corrupt.
    #[test]
    fn strip_outside_file() {
        let mut page = TestPage::gray8(4, 1, vec![vec![0; 4]], 1);
        // Parsed after the generated byte counts, so this one wins.
        page.extra.push((TAG_STRIP_BYTE_COUNTS, 4, vec![4000]));
        assert!(matches!(
            load(build_tiff(false, &[page])),
            Err(BildwerkError::CorruptFormat(_))
        ));
    }

    /// PackBits literal and repeat runs.
    #[test]
    fn unpack_bits_runs() {
        assert_eq!(unpack_bits(&[2, 1, 2, 3, 0xFE, 9, 0x80], 100), vec![1, 2, 3, 9, 9, 9]);
    }

    /// Strip data that decodes to fewer bytes than the strip holds is
    /// corrupt rather than zero-filled.
    #[test]
    fn short_strip_data_is_corrupt() {
        assert!(matches!(
            decompress(Compression::RunLength, &[0x01, 7, 9], 8),
            Err(BildwerkError::CorruptFormat(_))
        ));
        assert_eq!(decompress(Compression::None, &[1, 2, 3, 4, 5], 4).unwrap(), vec![1, 2, 3, 4]);

        // The predictor forces a full decode of the PackBits strip.
        let mut page = TestPage::gray8(4, 2, vec![vec![1, 10, 11]], 2);
        page.compression = 32773;
        page.extra.push((TAG_PREDICTOR, 3, vec![2]));
        assert!(matches!(
            load(build_tiff(false, &[page])),
            Err(BildwerkError::CorruptFormat(_))
        ));
    }
}
