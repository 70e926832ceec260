// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Bildwerk.

use thiserror::Error;

use crate::types::ContainerKind;

/// Top-level error type for all Bildwerk operations.
#[derive(Debug, Error)]
pub enum BildwerkError {
    // -- Decode errors --
    #[error("unknown image format: {0}")]
    UnknownFormat(String),

    #[error("corrupt image data: {0}")]
    CorruptFormat(String),

    #[error("unsupported encoding: {0}")]
    UnsupportedEncoding(String),

    #[error("incompatible mask: {0}")]
    IncompatibleMask(String),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    // -- Option / handle errors --
    #[error("missing required option: {0}")]
    MissingOption(&'static str),

    #[error("invalid handle: {0}")]
    InvalidHandle(String),

    // -- Output --
    #[error("PDF object error: {0}")]
    PdfError(String),

    // -- Storage / persistence --
    #[error("file I/O error: {0}")]
    IoFailure(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BildwerkError {
    /// Error for a requested page ordinal that the container does not hold.
    ///
    /// A container with no image at all is corrupt; one that simply has
    /// fewer images than requested is reported as unsupported.
    pub fn page_not_found(kind: ContainerKind, page: u32, images_seen: u32) -> Self {
        if images_seen == 0 {
            Self::CorruptFormat(format!("{kind} file contains no image"))
        } else {
            Self::UnsupportedEncoding(format!(
                "page {page} not found in {kind} file ({images_seen} image(s) present)"
            ))
        }
    }

    /// Map an allocation failure onto `ResourceExhausted`.
    pub fn exhausted(what: &str, bytes: usize) -> Self {
        Self::ResourceExhausted(format!("{what}: cannot allocate {bytes} bytes"))
    }
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, BildwerkError>;
