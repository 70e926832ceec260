// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Format decoders — read a container's header into an image slot and attach
// the data sources that will deliver its samples.
//
// Every decoder fills the same slot fields: geometry, bits per component,
// component count, compression and predictor, any palette or colour key,
// resolution, and one data source per strip.

pub mod bmp;
pub mod ccitt;
pub mod gif;
pub mod jpeg;
pub mod lzw;
pub mod png;
pub mod tiff;

use bildwerk_core::config::{EngineConfig, ImageOptions};
use bildwerk_core::error::{BildwerkError, Result};
use bildwerk_core::types::ContainerKind;
use tracing::{debug, instrument};

use crate::input::InputFile;
use crate::slot::ImageSlot;
use crate::source::MemorySource;

/// Everything a decoder may consult besides the file itself.
pub struct DecodeContext<'a> {
    pub options: &'a ImageOptions,
    pub config: &'a EngineConfig,
}

/// Decode `file` as `kind` into `slot`.
#[instrument(skip_all, fields(file = file.name(), %kind))]
pub fn decode(
    kind: ContainerKind,
    file: InputFile,
    ctx: &DecodeContext<'_>,
    slot: &mut ImageSlot,
) -> Result<()> {
    let page = ctx.options.page;
    if page > 1 && !matches!(kind, ContainerKind::Gif | ContainerKind::Tiff) {
        return Err(BildwerkError::page_not_found(kind, page, 1));
    }
    match kind {
        ContainerKind::Bmp => bmp::decode(file, ctx, slot)?,
        ContainerKind::Gif => gif::decode(file, ctx, slot)?,
        ContainerKind::Jpeg => jpeg::decode(file, ctx, slot)?,
        ContainerKind::Png => png::decode(file, ctx, slot)?,
        ContainerKind::Tiff => tiff::decode(file, ctx, slot)?,
        ContainerKind::Ccitt => ccitt::decode_ccitt(file, ctx, slot)?,
        ContainerKind::Raw => ccitt::decode_raw(file, ctx, slot)?,
    }
    debug!(
        width = slot.width,
        height = slot.height,
        bpc = slot.bpc,
        components = slot.components,
        compression = ?slot.compression,
        strips = slot.strips,
        "Decoded image header"
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Attach a fully decoded raster as a single strip, one chunk per row.
pub(crate) fn attach_raster(slot: &mut ImageSlot, raster: Vec<u8>) {
    let row = slot.row_bytes();
    slot.set_single_source(Box::new(MemorySource::rows(raster, row)));
}

/// Reverse the bit order of every byte in place.
pub(crate) fn reverse_bits(data: &mut [u8]) {
    for byte in data {
        *byte = byte.reverse_bits();
    }
}

/// Widen a 1/2/4-bit sample to 8 bits by bit replication.
pub(crate) fn scale_to_8bit(value: u8, bits: u8) -> u8 {
    match bits {
        1 => value * 0xFF,
        2 => value * 0x55,
        4 => value * 0x11,
        _ => value,
    }
}

/// Bounds-checked little/big-endian reader over a byte slice.
pub(crate) struct ByteCursor<'a> {
    data: &'a [u8],
    pos: usize,
    big_endian: bool,
}

impl<'a> ByteCursor<'a> {
    pub fn new(data: &'a [u8], big_endian: bool) -> Self {
        Self {
            data,
            pos: 0,
            big_endian,
        }
    }

    pub fn at(data: &'a [u8], pos: usize, big_endian: bool) -> Self {
        Self {
            data,
            pos,
            big_endian,
        }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    pub fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| BildwerkError::CorruptFormat("unexpected end of data".into()))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub fn skip(&mut self, len: usize) -> Result<()> {
        self.take(len).map(|_| ())
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        let bytes = [b[0], b[1]];
        Ok(if self.big_endian {
            u16::from_be_bytes(bytes)
        } else {
            u16::from_le_bytes(bytes)
        })
    }

    pub fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        let bytes = [b[0], b[1], b[2], b[3]];
        Ok(if self.big_endian {
            u32::from_be_bytes(bytes)
        } else {
            u32::from_le_bytes(bytes)
        })
    }
}
