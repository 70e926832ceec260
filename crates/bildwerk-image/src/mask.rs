// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Mask resolution — decide how an image acts as a mask and whether another
// image may be used as one.

use bildwerk_core::error::{BildwerkError, Result};
use bildwerk_core::types::{ImageHandle, PdfVersion};
use tracing::debug;

use crate::slot::{ImageSlot, MaskRole, SlotTable};

/// How a masked image refers to its mask in the image dictionary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskLink {
    /// `/Mask ref`: a 1-bit stencil.
    Stencil,
    /// `/SMask ref`: a multi-bit soft mask.
    Soft,
}

/// Role of an image loaded with the mask option.
///
/// One bit per sample gives a stencil. Deeper samples become a soft mask,
/// which needs PDF 1.4 and a single gray component.
pub fn resolve_mask_role(bpc: u8, components: u8, version: PdfVersion) -> Result<MaskRole> {
    if bpc == 1 {
        return Ok(MaskRole::Stencil);
    }
    if !version.supports_soft_mask() {
        return Err(BildwerkError::UnsupportedEncoding(format!(
            "{bpc}-bit mask needs a soft mask, not available in PDF {}",
            version.as_str()
        )));
    }
    if components != 1 {
        return Err(BildwerkError::IncompatibleMask(format!(
            "soft mask must have one component, found {components}"
        )));
    }
    Ok(MaskRole::Soft)
}

/// Check that `mask` may be attached to another image.
///
/// The mask must be a loaded single-strip image. Up to PDF 1.3 it must also
/// be a 1-bit stencil.
pub fn validate_mask_reference(
    slots: &SlotTable,
    mask: ImageHandle,
    version: PdfVersion,
) -> Result<&ImageSlot> {
    let slot = slots
        .get(mask)
        .map_err(|_| BildwerkError::IncompatibleMask(format!("{mask} is not a loaded image")))?;

    if slot.strips != 1 {
        return Err(BildwerkError::IncompatibleMask(format!(
            "{mask} has {} strips; masks must be single-strip",
            slot.strips
        )));
    }
    if !version.supports_soft_mask() && (slot.mask_role != MaskRole::Stencil || slot.bpc != 1) {
        return Err(BildwerkError::IncompatibleMask(format!(
            "{mask} is not a 1-bit image mask, required for PDF {}",
            version.as_str()
        )));
    }
    debug!(%mask, bpc = slot.bpc, "Mask reference accepted");
    Ok(slot)
}

/// Which dictionary key links an image to `mask`.
pub fn link_for(mask: &ImageSlot) -> MaskLink {
    if mask.bpc > 1 { MaskLink::Soft } else { MaskLink::Stencil }
}
