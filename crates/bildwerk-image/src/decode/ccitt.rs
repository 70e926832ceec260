// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Headerless inputs: CCITT fax streams and raw samples. Geometry comes from
// the load options; the file is passed through as is, optionally with the
// bit order of every byte reversed.

use bildwerk_core::error::{BildwerkError, Result};
use bildwerk_core::types::{Compression, PdfVersion};
use tracing::{debug, instrument};

use super::{DecodeContext, reverse_bits};
use crate::input::InputFile;
use crate::slot::{CcittInfo, Container, ImageSlot, row_bytes};
use crate::source::{DataSource, FileBlockSource, MemorySource};

fn dimensions(ctx: &DecodeContext<'_>) -> Result<(u32, u32)> {
    let width = ctx.options.width.ok_or(BildwerkError::MissingOption("width"))?;
    let height = ctx.options.height.ok_or(BildwerkError::MissingOption("height"))?;
    if width == 0 || height == 0 || height > i32::MAX as u32 {
        return Err(BildwerkError::CorruptFormat(format!(
            "image size {width}x{height}"
        )));
    }
    Ok((width, height))
}

/// CCITT Group 3/4 data, embedded with the CCITTFaxDecode filter.
#[instrument(skip_all, fields(file = file.name()))]
pub fn decode_ccitt(mut file: InputFile, ctx: &DecodeContext<'_>, slot: &mut ImageSlot) -> Result<()> {
    let (width, height) = dimensions(ctx)?;
    let bit_reverse = ctx.options.bit_reverse;

    slot.container = Container::Ccitt(CcittInfo { bit_reverse });
    slot.width = width;
    slot.height = height as i32;
    slot.bpc = 1;
    slot.components = 1;
    slot.compression = Compression::Ccitt;
    slot.use_raw = true;
    slot.ccitt_k = ctx.options.k;

    let source: Box<dyn DataSource> = if bit_reverse {
        let mut data = file.read_all()?;
        reverse_bits(&mut data);
        Box::new(MemorySource::blocks(data))
    } else {
        Box::new(FileBlockSource::to_end(file, 0))
    };
    slot.set_single_source(source);
    debug!(width, height, k = slot.ccitt_k, bit_reverse, "CCITT stream");
    Ok(())
}

/// Uncompressed samples in row order, no padding between rows beyond the
/// final partial byte.
#[instrument(skip_all, fields(file = file.name()))]
pub fn decode_raw(mut file: InputFile, ctx: &DecodeContext<'_>, slot: &mut ImageSlot) -> Result<()> {
    let (width, height) = dimensions(ctx)?;
    let bpc = ctx.options.bpc.ok_or(BildwerkError::MissingOption("bpc"))?;
    let components = ctx
        .options
        .components
        .ok_or(BildwerkError::MissingOption("components"))?;

    match bpc {
        1 | 2 | 4 | 8 => {}
        16 if ctx.config.pdf_version >= PdfVersion::V1_5 => {}
        _ => {
            return Err(BildwerkError::UnsupportedEncoding(format!(
                "{bpc} bits per component for PDF {}",
                ctx.config.pdf_version.as_str()
            )));
        }
    }
    if !matches!(components, 1 | 3 | 4) {
        return Err(BildwerkError::UnsupportedEncoding(format!(
            "raw data with {components} components"
        )));
    }

    let expected = (row_bytes(width, bpc, components) as u64) * height as u64;
    if file.size() < expected {
        return Err(BildwerkError::CorruptFormat(format!(
            "raw data holds {} bytes, {expected} needed",
            file.size()
        )));
    }

    slot.container = Container::Raw;
    slot.width = width;
    slot.height = height as i32;
    slot.bpc = bpc;
    slot.components = components;
    slot.compression = Compression::None;
    slot.use_raw = false;

    let source: Box<dyn DataSource> = if ctx.options.bit_reverse {
        let len = usize::try_from(expected).map_err(|_| BildwerkError::exhausted("raw data", usize::MAX))?;
        let mut data = file.read_vec(len)?;
        reverse_bits(&mut data);
        Box::new(MemorySource::rows(data, row_bytes(width, bpc, components)))
    } else {
        Box::new(FileBlockSource::region(file, 0, expected))
    };
    slot.set_single_source(source);
    debug!(width, height, bpc, components, "raw samples");
    Ok(())
}
