// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Bildwerk image engine.

use serde::{Deserialize, Serialize};

/// Raster container formats the engine can ingest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerKind {
    Bmp,
    Gif,
    Jpeg,
    Png,
    Tiff,
    /// Headerless CCITT fax data; never sniffed, only selected explicitly.
    Ccitt,
    /// Headerless uncompressed samples; never sniffed, only selected explicitly.
    Raw,
}

impl ContainerKind {
    /// Whether the format carries no header and needs explicit geometry.
    pub fn is_headerless(self) -> bool {
        matches!(self, Self::Ccitt | Self::Raw)
    }

    /// Formats that may be written as an inline image.
    pub fn allows_inline(self) -> bool {
        matches!(self, Self::Ccitt | Self::Jpeg | Self::Raw)
    }
}

impl std::fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Bmp => "BMP",
            Self::Gif => "GIF",
            Self::Jpeg => "JPEG",
            Self::Png => "PNG",
            Self::Tiff => "TIFF",
            Self::Ccitt => "CCITT",
            Self::Raw => "raw",
        };
        f.write_str(name)
    }
}

/// Compression of the sample data as it will be handed to the writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Compression {
    None,
    Lzw,
    RunLength,
    Ccitt,
    Dct,
    Flate,
}

impl Compression {
    /// Filter name in a stream dictionary.
    pub fn filter_name(self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::Lzw => Some("LZWDecode"),
            Self::RunLength => Some("RunLengthDecode"),
            Self::Ccitt => Some("CCITTFaxDecode"),
            Self::Dct => Some("DCTDecode"),
            Self::Flate => Some("FlateDecode"),
        }
    }

    /// Abbreviated filter name used inside inline images.
    pub fn inline_filter_name(self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::Lzw => Some("LZW"),
            Self::RunLength => Some("RL"),
            Self::Ccitt => Some("CCF"),
            Self::Dct => Some("DCT"),
            Self::Flate => Some("Fl"),
        }
    }
}

/// Row prediction applied before compression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Predictor {
    None,
    /// TIFF horizontal differencing (predictor 2).
    Tiff,
    /// PNG per-row filter byte (predictor 15, "optimum").
    Png,
}

impl Predictor {
    pub fn code(self) -> i64 {
        match self {
            Self::None => 1,
            Self::Tiff => 2,
            Self::Png => 15,
        }
    }
}

/// Device colour spaces understood without registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceColorspace {
    Gray,
    Rgb,
    Cmyk,
}

impl DeviceColorspace {
    pub fn components(self) -> u8 {
        match self {
            Self::Gray => 1,
            Self::Rgb => 3,
            Self::Cmyk => 4,
        }
    }

    pub fn from_components(components: u8) -> Option<Self> {
        match components {
            1 => Some(Self::Gray),
            3 => Some(Self::Rgb),
            4 => Some(Self::Cmyk),
            _ => None,
        }
    }

    pub fn pdf_name(self) -> &'static str {
        match self {
            Self::Gray => "DeviceGray",
            Self::Rgb => "DeviceRGB",
            Self::Cmyk => "DeviceCMYK",
        }
    }

    /// Abbreviated name used inside inline images.
    pub fn inline_name(self) -> &'static str {
        match self {
            Self::Gray => "G",
            Self::Rgb => "RGB",
            Self::Cmyk => "CMYK",
        }
    }
}

/// Target PDF version; gates soft masks and mask compatibility checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PdfVersion {
    #[serde(rename = "1.3")]
    V1_3,
    #[serde(rename = "1.4")]
    V1_4,
    #[serde(rename = "1.5")]
    V1_5,
    #[serde(rename = "1.6")]
    V1_6,
    #[serde(rename = "1.7")]
    V1_7,
}

impl PdfVersion {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::V1_3 => "1.3",
            Self::V1_4 => "1.4",
            Self::V1_5 => "1.5",
            Self::V1_6 => "1.6",
            Self::V1_7 => "1.7",
        }
    }

    /// Soft masks (`/SMask`) arrived with PDF 1.4.
    pub fn supports_soft_mask(self) -> bool {
        self >= Self::V1_4
    }
}

/// Rendering intent written to the image dictionary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RenderingIntent {
    /// No `/Intent` entry.
    #[default]
    Auto,
    AbsoluteColorimetric,
    RelativeColorimetric,
    Saturation,
    Perceptual,
}

impl RenderingIntent {
    pub fn pdf_name(self) -> Option<&'static str> {
        match self {
            Self::Auto => None,
            Self::AbsoluteColorimetric => Some("AbsoluteColorimetric"),
            Self::RelativeColorimetric => Some("RelativeColorimetric"),
            Self::Saturation => Some("Saturation"),
            Self::Perceptual => Some("Perceptual"),
        }
    }
}

/// Whether image data is embedded or referenced externally.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReferenceKind {
    #[default]
    Direct,
    /// Data stays in an external file named by the image's file name.
    File,
    /// Data is fetched from a URL by the consumer.
    Url(String),
}

/// How a placed element is fitted into its box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FitMethod {
    #[default]
    Nofit,
    Clip,
    Slice,
    Meet,
    Entire,
    Auto,
}

/// Quarter-turn pre-rotation applied before scaling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    #[default]
    North,
    West,
    South,
    East,
}

impl Orientation {
    pub fn degrees(self) -> f64 {
        match self {
            Self::North => 0.0,
            Self::West => 90.0,
            Self::South => 180.0,
            Self::East => 270.0,
        }
    }

    /// Number of counter-clockwise quarter turns.
    pub fn quarter_turns(self) -> usize {
        match self {
            Self::North => 0,
            Self::West => 1,
            Self::South => 2,
            Self::East => 3,
        }
    }
}

/// Generation-tagged reference to a loaded image slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageHandle {
    pub index: u32,
    pub generation: u32,
}

impl std::fmt::Display for ImageHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "image #{} (gen {})", self.index, self.generation)
    }
}

/// Reference to a colour space registered with the colour space table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CsHandle(pub u32);

impl std::fmt::Display for CsHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "colorspace #{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Soft masks are gated at 1.4 and version ordering follows release order.
    #[test]
    fn pdf_version_ordering() {
        assert!(PdfVersion::V1_3 < PdfVersion::V1_4);
        assert!(!PdfVersion::V1_3.supports_soft_mask());
        assert!(PdfVersion::V1_7.supports_soft_mask());
    }

    /// Full and inline filter names stay paired.
    #[test]
    fn filter_names() {
        assert_eq!(Compression::Ccitt.filter_name(), Some("CCITTFaxDecode"));
        assert_eq!(Compression::Ccitt.inline_filter_name(), Some("CCF"));
        assert_eq!(Compression::None.filter_name(), None);
    }

    /// Container kinds deserialize from lowercase keywords.
    #[test]
    fn container_kind_serde() {
        let kind: ContainerKind = serde_json::from_str("\"tiff\"").unwrap();
        assert_eq!(kind, ContainerKind::Tiff);
        assert!(ContainerKind::Raw.is_headerless());
        assert!(!ContainerKind::Png.allows_inline());
    }

    /// Orientation keywords map to counter-clockwise quarter turns.
    #[test]
    fn orientation_turns() {
        assert_eq!(Orientation::West.quarter_turns(), 1);
        assert_eq!(Orientation::East.degrees(), 270.0);
    }
}
