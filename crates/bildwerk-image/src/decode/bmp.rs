// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// BMP decoder — OS/2 core and Windows info headers, 1/4/8-bit palette
// images, 16/24/32-bit BGR images and RLE4/RLE8 compression.
//
// Uncompressed rows are streamed from the file in stored order; RLE data is
// expanded in memory first. Bottom-up files are reported with a negative
// height so the placement engine flips them instead of the decoder.

use bildwerk_core::error::{BildwerkError, Result};
use bildwerk_core::types::Compression;
use tracing::{debug, instrument};

use super::{ByteCursor, DecodeContext, attach_raster};
use crate::colorspace::RawPalette;
use crate::input::InputFile;
use crate::slot::{BmpCompression, BmpInfo, Container, ImageSlot, row_bytes};
use crate::source::DataSource;

const FILE_HEADER_SIZE: u32 = 14;
const CORE_HEADER_SIZE: u32 = 12;
const INFO_HEADER_SIZE: u32 = 40;

/// Fields common to both header layouts.
#[derive(Debug)]
struct BmpHeader {
    data_offset: u32,
    info_size: u32,
    width: i32,
    height: i32,
    bpp: u16,
    compression: BmpCompression,
    colors_used: u32,
    ppm_x: i32,
    ppm_y: i32,
}

#[instrument(skip_all, fields(file = file.name()))]
pub fn decode(mut file: InputFile, _ctx: &DecodeContext<'_>, slot: &mut ImageSlot) -> Result<()> {
    let header = read_header(&mut file)?;
    debug!(?header, "BMP header");

    if header.width <= 0 || header.height == 0 || header.height == i32::MIN {
        return Err(BildwerkError::CorruptFormat(format!(
            "BMP size {}x{}",
            header.width, header.height
        )));
    }
    let top_down = header.height < 0;
    if top_down && header.compression != BmpCompression::Uncompressed {
        return Err(BildwerkError::CorruptFormat(
            "top-down BMP cannot be RLE compressed".into(),
        ));
    }

    let width = header.width as u32;
    let rows = header.height.unsigned_abs();
    let palette_start = FILE_HEADER_SIZE + header.info_size;
    if header.data_offset < palette_start {
        return Err(BildwerkError::CorruptFormat(format!(
            "BMP pixel data offset {} inside headers",
            header.data_offset
        )));
    }

    if header.bpp <= 8 {
        slot.palette = Some(read_palette(&mut file, &header, palette_start)?);
    }

    slot.container = Container::Bmp(BmpInfo {
        info_header_size: header.info_size,
        bits_per_pixel: header.bpp,
        compression: header.compression,
        top_down,
    });
    slot.width = width;
    slot.height = if top_down { rows as i32 } else { -(rows as i32) };
    slot.compression = Compression::None;
    slot.use_raw = false;
    if header.ppm_x > 0 && header.ppm_y > 0 {
        slot.dpi_x = header.ppm_x as f64 * 0.0254;
        slot.dpi_y = header.ppm_y as f64 * 0.0254;
    }

    match header.compression {
        BmpCompression::Uncompressed => {
            let layout = RowLayout::for_depth(header.bpp)?;
            let (bpc, components) = layout.output();
            slot.bpc = bpc;
            slot.components = components;

            let row_in = (width as u64 * header.bpp as u64).div_ceil(32) * 4;
            let needed = header.data_offset as u64 + row_in * rows as u64;
            if needed > file.size() {
                return Err(BildwerkError::CorruptFormat(format!(
                    "BMP pixel data truncated: need {needed} bytes, file has {}",
                    file.size()
                )));
            }
            let row_in = usize::try_from(row_in)
                .map_err(|_| BildwerkError::exhausted("BMP row", usize::MAX))?;
            let row_out = row_bytes(width, bpc, components);
            slot.set_single_source(Box::new(BmpRowSource {
                file,
                start: header.data_offset as u64,
                rows,
                row_in,
                row_out,
                width,
                layout,
                inbuf: Vec::new(),
                outbuf: Vec::new(),
                done: 0,
            }));
        }
        BmpCompression::Rle8 | BmpCompression::Rle4 => {
            file.seek(header.data_offset as u64)?;
            let len = file.size().saturating_sub(header.data_offset as u64) as usize;
            let encoded = file.read_vec(len)?;
            let nibbles = header.compression == BmpCompression::Rle4;
            let pixels = decode_rle(&encoded, width as usize, rows as usize, nibbles)?;
            slot.bpc = 8;
            slot.components = 1;
            attach_raster(slot, pixels);
        }
    }
    Ok(())
}

fn read_header(file: &mut InputFile) -> Result<BmpHeader> {
    let magic = file.read_array::<2>()?;
    if &magic != b"BM" {
        return Err(BildwerkError::CorruptFormat("missing BMP signature".into()));
    }
    let _file_size = file.read_u32_le()?;
    let _reserved = file.read_u32_le()?;
    let data_offset = file.read_u32_le()?;
    let info_size = file.read_u32_le()?;

    let (width, height, planes, bpp, compression, colors_used, ppm_x, ppm_y) = match info_size {
        CORE_HEADER_SIZE => {
            let width = file.read_u16_le()? as i32;
            let height = file.read_u16_le()? as i16 as i32;
            let planes = file.read_u16_le()?;
            let bpp = file.read_u16_le()?;
            (width, height, planes, bpp, 0, 0, 0, 0)
        }
        size if size >= INFO_HEADER_SIZE => {
            let width = file.read_u32_le()? as i32;
            let height = file.read_u32_le()? as i32;
            let planes = file.read_u16_le()?;
            let bpp = file.read_u16_le()?;
            let compression = file.read_u32_le()?;
            let _image_size = file.read_u32_le()?;
            let ppm_x = file.read_u32_le()? as i32;
            let ppm_y = file.read_u32_le()? as i32;
            let colors_used = file.read_u32_le()?;
            (width, height, planes, bpp, compression, colors_used, ppm_x, ppm_y)
        }
        other => {
            return Err(BildwerkError::UnsupportedEncoding(format!(
                "BMP info header of {other} bytes"
            )));
        }
    };

    if planes != 1 {
        return Err(BildwerkError::CorruptFormat(format!("BMP with {planes} planes")));
    }
    let compression = match (compression, bpp) {
        (0, _) => BmpCompression::Uncompressed,
        (1, 8) => BmpCompression::Rle8,
        (2, 4) => BmpCompression::Rle4,
        (1 | 2, _) => {
            return Err(BildwerkError::CorruptFormat(format!(
                "BMP RLE compression {compression} with {bpp} bits per pixel"
            )));
        }
        (other, _) => {
            return Err(BildwerkError::UnsupportedEncoding(format!(
                "BMP compression type {other}"
            )));
        }
    };

    Ok(BmpHeader {
        data_offset,
        info_size,
        width,
        height,
        bpp,
        compression,
        colors_used,
        ppm_x,
        ppm_y,
    })
}

/// Read as many palette entries as fit before the pixel data. A table that
/// does not fit yields a short palette, which colour space resolution
/// rejects.
fn read_palette(file: &mut InputFile, header: &BmpHeader, start: u32) -> Result<RawPalette> {
    let full = 1usize << header.bpp;
    let declared = match header.colors_used as usize {
        0 => full,
        n => n.min(full),
    };
    let entry_size = if header.info_size == CORE_HEADER_SIZE { 3 } else { 4 };
    let room = (header.data_offset - start) as usize / entry_size;
    let count = declared.min(room);

    file.seek(start as u64)?;
    let raw = file.read_vec(count * entry_size)?;
    let entries = raw
        .chunks_exact(entry_size)
        .map(|bgr| [bgr[2] as u16, bgr[1] as u16, bgr[0] as u16])
        .collect();
    Ok(RawPalette::new(entries, 8, declared))
}

// ---------------------------------------------------------------------------
// Uncompressed row streaming
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowLayout {
    /// 1/4/8-bit palette indices, copied as stored.
    Indexed(u8),
    Rgb555,
    Bgr24,
    Bgrx32,
}

impl RowLayout {
    fn for_depth(bpp: u16) -> Result<Self> {
        match bpp {
            1 | 4 | 8 => Ok(Self::Indexed(bpp as u8)),
            16 => Ok(Self::Rgb555),
            24 => Ok(Self::Bgr24),
            32 => Ok(Self::Bgrx32),
            other => Err(BildwerkError::UnsupportedEncoding(format!(
                "BMP with {other} bits per pixel"
            ))),
        }
    }

    /// Bits per component and components of the converted rows.
    fn output(self) -> (u8, u8) {
        match self {
            Self::Indexed(bits) => (bits, 1),
            Self::Rgb555 | Self::Bgr24 | Self::Bgrx32 => (8, 3),
        }
    }

    fn convert(self, input: &[u8], output: &mut [u8], width: usize) {
        match self {
            Self::Indexed(_) => output.copy_from_slice(&input[..output.len()]),
            Self::Rgb555 => {
                for (px, rgb) in input.chunks_exact(2).take(width).zip(output.chunks_exact_mut(3)) {
                    let v = u16::from_le_bytes([px[0], px[1]]);
                    for (i, shift) in [10u16, 5, 0].into_iter().enumerate() {
                        let c = ((v >> shift) & 0x1F) as u8;
                        rgb[i] = (c << 3) | (c >> 2);
                    }
                }
            }
            Self::Bgr24 | Self::Bgrx32 => {
                let step = if self == Self::Bgr24 { 3 } else { 4 };
                for (px, rgb) in input.chunks_exact(step).take(width).zip(output.chunks_exact_mut(3)) {
                    rgb[0] = px[2];
                    rgb[1] = px[1];
                    rgb[2] = px[0];
                }
            }
        }
    }
}

/// Streams BMP rows straight from the file, converting BGR to RGB.
struct BmpRowSource {
    file: InputFile,
    start: u64,
    rows: u32,
    row_in: usize,
    row_out: usize,
    width: u32,
    layout: RowLayout,
    inbuf: Vec<u8>,
    outbuf: Vec<u8>,
    done: u32,
}

impl DataSource for BmpRowSource {
    fn init(&mut self) -> Result<()> {
        self.file.seek(self.start)?;
        self.inbuf = crate::alloc_zeroed(self.row_in, "BMP row")?;
        self.outbuf = crate::alloc_zeroed(self.row_out, "BMP row")?;
        self.done = 0;
        Ok(())
    }

    fn fill(&mut self) -> Result<Option<&[u8]>> {
        if self.done >= self.rows {
            return Ok(None);
        }
        self.file.read_exact(&mut self.inbuf)?;
        self.layout
            .convert(&self.inbuf, &mut self.outbuf, self.width as usize);
        self.done += 1;
        Ok(Some(&self.outbuf))
    }

    fn terminate(&mut self) {
        self.inbuf = Vec::new();
        self.outbuf = Vec::new();
    }
}

// ---------------------------------------------------------------------------
// RLE expansion
// ---------------------------------------------------------------------------

/// Expand RLE8/RLE4 data to one byte per pixel, rows in stored order.
/// Pixels skipped by deltas or early line ends stay 0.
fn decode_rle(data: &[u8], width: usize, height: usize, nibbles: bool) -> Result<Vec<u8>> {
    let mut out = crate::alloc_raster(&[width, height], "BMP RLE raster")?;
    let mut cur = ByteCursor::new(data, false);
    let (mut x, mut y) = (0usize, 0usize);

    let mut put = |x: usize, y: usize, value: u8| {
        if x < width && y < height {
            out[y * width + x] = value;
        }
    };

    while y < height {
        let count = cur.u8()?;
        let value = cur.u8()?;
        if count > 0 {
            for i in 0..count as usize {
                let v = if !nibbles {
                    value
                } else if i % 2 == 0 {
                    value >> 4
                } else {
                    value & 0x0F
                };
                put(x, y, v);
                x += 1;
            }
            continue;
        }
        match value {
            0 => {
                x = 0;
                y += 1;
            }
            1 => break,
            2 => {
                x += cur.u8()? as usize;
                y += cur.u8()? as usize;
            }
            n => {
                let n = n as usize;
                let stored = if nibbles { n.div_ceil(2) } else { n };
                let literal = cur.take(stored)?;
                for i in 0..n {
                    let v = if !nibbles {
                        literal[i]
                    } else if i % 2 == 0 {
                        literal[i / 2] >> 4
                    } else {
                        literal[i / 2] & 0x0F
                    };
                    put(x, y, v);
                    x += 1;
                }
                // Literal runs are padded to a 16-bit boundary.
                if stored % 2 == 1 {
                    cur.skip(1)?;
                }
            }
        }
    }
    Ok(out)
}
