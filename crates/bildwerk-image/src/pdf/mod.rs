// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// PDF output — object writer primitives and image embedding.

pub mod embed;
pub mod writer;

pub use embed::{EmbedTarget, MaskObject, WrittenColorspaces, embed_image, inline_image};
pub use writer::{ObjectWriter, PdfObjectWriter};
