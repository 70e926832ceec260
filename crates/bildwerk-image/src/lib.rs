// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// bildwerk-image — Image ingestion and PDF image object embedding.
//
// Detects the container format of a raster file, decodes or reframes its
// samples, resolves colour space and transparency, writes the result as PDF
// image XObjects through `lopdf`, and computes the transform that places the
// image on a page.

pub mod colorspace;
pub mod decode;
pub mod engine;
pub mod input;
pub mod mask;
pub mod pdf;
pub mod place;
pub mod slot;
pub mod sniff;
pub mod source;

use bildwerk_core::error::{BildwerkError, Result};

// Re-export the primary types so callers can use `bildwerk_image::ImageEngine` etc.
pub use colorspace::{Colorspace, ColorspaceDescriptor, ColorspaceRegistry, ColorspaceTable};
pub use engine::ImageEngine;
pub use input::InputFile;
pub use pdf::writer::{ObjectWriter, PdfObjectWriter};
pub use place::{Matrix, PlaceOp, Placement};
pub use slot::{ImageSlot, SlotTable, Transparency};
pub use source::DataSource;

/// Zero-filled buffer of `len` bytes, reporting allocation failure instead
/// of aborting.
pub(crate) fn alloc_zeroed(len: usize, what: &str) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|_| BildwerkError::exhausted(what, len))?;
    buf.resize(len, 0);
    Ok(buf)
}

/// Zero-filled raster whose size is the product of `dims`. A product that
/// does not fit in `usize` is reported like a failed allocation.
pub(crate) fn alloc_raster(dims: &[usize], what: &str) -> Result<Vec<u8>> {
    let len = dims
        .iter()
        .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
        .ok_or_else(|| BildwerkError::exhausted(what, usize::MAX))?;
    alloc_zeroed(len, what)
}
