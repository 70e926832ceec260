// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// GIF decoder — walk the block structure to the requested image, decode its
// LZW data into 8-bit palette indices and record any transparent index.

use bildwerk_core::error::{BildwerkError, Result};
use bildwerk_core::types::{Compression, ContainerKind};
use tracing::{debug, instrument};

use super::lzw::LzwDecoder;
use super::{ByteCursor, DecodeContext, attach_raster};
use crate::colorspace::RawPalette;
use crate::input::InputFile;
use crate::slot::{Container, GifInfo, ImageSlot, Transparency};

const EXTENSION: u8 = 0x21;
const IMAGE_DESCRIPTOR: u8 = 0x2C;
const TRAILER: u8 = 0x3B;
const GRAPHIC_CONTROL: u8 = 0xF9;

/// Transparent colour index set by a graphic control extension.
#[derive(Debug, Clone, Copy, Default)]
struct GraphicControl {
    transparent: Option<u8>,
}

#[instrument(skip_all, fields(file = file.name(), page = ctx.options.page))]
pub fn decode(mut file: InputFile, ctx: &DecodeContext<'_>, slot: &mut ImageSlot) -> Result<()> {
    let data = file.read_all()?;
    let mut cur = ByteCursor::new(&data, false);

    let signature = cur.take(6)?;
    if !matches!(signature, b"GIF87a" | b"GIF89a") {
        return Err(BildwerkError::CorruptFormat("missing GIF signature".into()));
    }

    // Logical screen descriptor.
    let _screen_width = cur.u16()?;
    let _screen_height = cur.u16()?;
    let packed = cur.u8()?;
    let _background = cur.u8()?;
    let aspect = cur.u8()?;
    let global_table = if packed & 0x80 != 0 {
        let size = 2usize << (packed & 0x07);
        Some((cur.take(size * 3)?, size))
    } else {
        None
    };

    if aspect != 0 {
        // Pixel aspect (width / height) is (aspect + 15) / 64. Negative
        // values carry only the ratio, never an absolute resolution.
        let ratio = (aspect as f64 + 15.0) / 64.0;
        slot.dpi_x = -1.0;
        slot.dpi_y = -ratio;
    }

    let wanted = ctx.options.page.max(1);
    let mut seen = 0u32;
    let mut control = GraphicControl::default();

    loop {
        let block = match cur.u8() {
            Ok(block) => block,
            Err(_) => return Err(BildwerkError::page_not_found(ContainerKind::Gif, wanted, seen)),
        };
        match block {
            EXTENSION => {
                let label = cur.u8()?;
                if label == GRAPHIC_CONTROL {
                    control = read_graphic_control(&mut cur)?;
                } else {
                    skip_sub_blocks(&mut cur)?;
                }
            }
            IMAGE_DESCRIPTOR => {
                seen += 1;
                if seen == wanted {
                    return decode_image(&mut cur, global_table, control, wanted, ctx, slot);
                }
                skip_image(&mut cur)?;
                control = GraphicControl::default();
            }
            TRAILER => {
                return Err(BildwerkError::page_not_found(ContainerKind::Gif, wanted, seen));
            }
            other => {
                return Err(BildwerkError::CorruptFormat(format!(
                    "unexpected GIF block 0x{other:02X}"
                )));
            }
        }
    }
}

fn read_graphic_control(cur: &mut ByteCursor<'_>) -> Result<GraphicControl> {
    let size = cur.u8()? as usize;
    let body = cur.take(size)?;
    let mut control = GraphicControl::default();
    if size >= 4 && body[0] & 0x01 != 0 {
        control.transparent = Some(body[3]);
    }
    skip_sub_blocks(cur)?;
    Ok(control)
}

fn skip_sub_blocks(cur: &mut ByteCursor<'_>) -> Result<()> {
    loop {
        let len = cur.u8()? as usize;
        if len == 0 {
            return Ok(());
        }
        cur.skip(len)?;
    }
}

fn read_sub_blocks(cur: &mut ByteCursor<'_>) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    loop {
        let len = cur.u8()? as usize;
        if len == 0 {
            return Ok(out);
        }
        out.extend_from_slice(cur.take(len)?);
    }
}

fn skip_image(cur: &mut ByteCursor<'_>) -> Result<()> {
    cur.skip(8)?;
    let packed = cur.u8()?;
    if packed & 0x80 != 0 {
        cur.skip((2usize << (packed & 0x07)) * 3)?;
    }
    let _min_code_size = cur.u8()?;
    skip_sub_blocks(cur)
}

fn decode_image(
    cur: &mut ByteCursor<'_>,
    global_table: Option<(&[u8], usize)>,
    control: GraphicControl,
    page: u32,
    ctx: &DecodeContext<'_>,
    slot: &mut ImageSlot,
) -> Result<()> {
    let _left = cur.u16()?;
    let _top = cur.u16()?;
    let width = cur.u16()?;
    let height = cur.u16()?;
    let packed = cur.u8()?;

    if width == 0 || height == 0 {
        return Err(BildwerkError::CorruptFormat(format!(
            "GIF image size {width}x{height}"
        )));
    }
    if packed & 0x40 != 0 {
        return Err(BildwerkError::UnsupportedEncoding(
            "interlaced GIF images".into(),
        ));
    }

    let local_table = if packed & 0x80 != 0 {
        let size = 2usize << (packed & 0x07);
        Some((cur.take(size * 3)?, size))
    } else {
        None
    };
    let Some((table, table_size)) = local_table.or(global_table) else {
        return Err(BildwerkError::CorruptFormat("GIF image without colour table".into()));
    };

    let min_code_size = cur.u8()?;
    let compressed = read_sub_blocks(cur)?;
    let pixels = width as usize * height as usize;
    let indices = LzwDecoder::gif(min_code_size)?.decode(&compressed, pixels)?;
    if indices.len() < pixels {
        return Err(BildwerkError::CorruptFormat(format!(
            "GIF image data holds {} of {pixels} pixels",
            indices.len()
        )));
    }

    slot.container = Container::Gif(GifInfo {
        page,
        min_code_size,
        color_table_size: table_size,
    });
    slot.width = width as u32;
    slot.height = height as i32;
    slot.bpc = 8;
    slot.components = 1;
    slot.compression = Compression::None;
    slot.use_raw = false;
    slot.palette = Some(RawPalette::from_rgb8(table, table_size));

    if !ctx.options.ignore_mask {
        slot.transparency = control
            .transparent
            .map(|index| Transparency::ColorKey([index as u16, 0, 0, 0]));
    }

    debug!(width, height, table_size, transparent = ?control.transparent, "GIF image located");
    attach_raster(slot, indices);
    Ok(())
}
