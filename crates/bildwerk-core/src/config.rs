// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Engine configuration and the per-call option blocks for loading and
// placing images.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{
    ContainerKind, CsHandle, FitMethod, ImageHandle, Orientation, PdfVersion, ReferenceKind,
    RenderingIntent,
};

/// Session-wide settings for an image engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// PDF version the output targets.
    pub pdf_version: PdfVersion,
    /// Flate-compress sample data that is not passed through precompressed.
    pub compress: bool,
    /// +1.0 for bottom-up user space, -1.0 for top-down.
    pub y_direction: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pdf_version: PdfVersion::V1_7,
            compress: true,
            y_direction: 1.0,
        }
    }
}

impl EngineConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Options accepted by a load request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageOptions {
    /// Skip sniffing and decode as this container.
    pub format: Option<ContainerKind>,
    /// Geometry for headerless data (CCITT, raw) and referenced images.
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub bpc: Option<u8>,
    pub components: Option<u8>,
    /// Reverse the bit order of every byte before use (CCITT, raw).
    pub bit_reverse: bool,
    /// CCITT K parameter: 0 = G3 1-D, >0 = G3 2-D, <0 = G4.
    pub k: i32,
    /// Treat the loaded image as a mask for other images.
    pub mask: bool,
    /// Use a previously loaded image as this image's mask.
    pub masked: Option<ImageHandle>,
    /// Draw the samples through a registered colour space instead.
    pub colorize: Option<CsHandle>,
    /// Discard any transparency found in the file.
    pub ignore_mask: bool,
    /// Emit the image inline in the content stream.
    pub inline: bool,
    pub reference: ReferenceKind,
    pub interpolate: bool,
    /// Invert sample interpretation (CCITT BlackIs1, raw).
    pub invert: bool,
    /// 1-based image ordinal for multi-image containers.
    pub page: u32,
    pub rendering_intent: RenderingIntent,
    /// Object number and generation of an ICC-based colour space written by
    /// the caller; used verbatim as the image's `/ColorSpace`.
    pub icc_profile: Option<(u32, u16)>,
    /// Log load failures at error level instead of warning.
    pub verbose: bool,
}

impl Default for ImageOptions {
    fn default() -> Self {
        Self {
            format: None,
            width: None,
            height: None,
            bpc: None,
            components: None,
            bit_reverse: false,
            k: 0,
            mask: false,
            masked: None,
            colorize: None,
            ignore_mask: false,
            inline: false,
            reference: ReferenceKind::Direct,
            interpolate: false,
            invert: false,
            page: 1,
            rendering_intent: RenderingIntent::Auto,
            icc_profile: None,
            verbose: true,
        }
    }
}

impl ImageOptions {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// A value given either once for both axes or separately per axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AxisPair {
    Uniform(f64),
    Axes(f64, f64),
}

impl AxisPair {
    pub fn axes(self) -> (f64, f64) {
        match self {
            Self::Uniform(v) => (v, v),
            Self::Axes(x, y) => (x, y),
        }
    }
}

/// Where the resolution used for natural size comes from.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DpiPolicy {
    /// Use the resolution recorded in the file, if any.
    #[default]
    Internal,
    /// Ignore any resolution: one pixel is one unit.
    None,
    /// Use this resolution regardless of the file.
    Explicit(AxisPair),
}

/// Options accepted by a placement request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaceOptions {
    pub dpi: DpiPolicy,
    pub scale: AxisPair,
    pub orientate: Orientation,
    /// Fit box size; (0, 0) disables fitting.
    pub box_size: (f64, f64),
    /// Rotation about the reference point, degrees counter-clockwise.
    pub rotate: f64,
    /// Reference position inside the box, in percent per axis.
    pub position: AxisPair,
    pub fit_method: FitMethod,
    /// Smallest per-axis ratio, in percent, that `auto` accepts before
    /// falling back to a uniform fit.
    pub distortion_limit: f64,
    /// Compute the placement without emitting any drawing operations.
    pub blind: bool,
    /// Report a page size that encloses the placed element.
    pub adjust_page: bool,
}

impl Default for PlaceOptions {
    fn default() -> Self {
        Self {
            dpi: DpiPolicy::Internal,
            scale: AxisPair::Uniform(1.0),
            orientate: Orientation::North,
            box_size: (0.0, 0.0),
            rotate: 0.0,
            position: AxisPair::Uniform(0.0),
            fit_method: FitMethod::Nofit,
            distortion_limit: 75.0,
            blind: false,
            adjust_page: false,
        }
    }
}

impl PlaceOptions {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
