// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Image slots and the generation-tagged slot table.
//
// A handle stays valid only while the slot it names is in use with the same
// generation. Releasing a slot bumps its generation, so stale handles are
// rejected instead of aliasing whatever image reuses the index.

use bildwerk_core::config::ImageOptions;
use bildwerk_core::error::{BildwerkError, Result};
use bildwerk_core::types::{
    Compression, ContainerKind, ImageHandle, Predictor, ReferenceKind, RenderingIntent,
};
use lopdf::ObjectId;
use tracing::debug;

use crate::colorspace::{Colorspace, RawPalette};
use crate::source::DataSource;

// ---------------------------------------------------------------------------
// Per-format container state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BmpCompression {
    Uncompressed,
    Rle8,
    Rle4,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BmpInfo {
    pub info_header_size: u32,
    pub bits_per_pixel: u16,
    pub compression: BmpCompression,
    pub top_down: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GifInfo {
    pub page: u32,
    pub min_code_size: u8,
    pub color_table_size: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JpegInfo {
    /// Offset of the SOI marker inside the file.
    pub start: u64,
    pub adobe: bool,
    /// SOF marker code (0xC0 or 0xC1).
    pub frame_marker: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PngPath {
    /// IDAT data handed to the writer unchanged, with PNG predictors.
    Passthrough,
    /// Fully decoded and re-encoded as plain samples.
    Decoded,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PngInfo {
    pub color_type: u8,
    pub bit_depth: u8,
    pub interlaced: bool,
    pub path: PngPath,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TiffInfo {
    pub page: u32,
    pub compression_tag: u16,
    pub photometric: u16,
    pub tiled: bool,
    pub planar_config: u16,
    pub passthrough: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CcittInfo {
    pub bit_reverse: bool,
}

/// Container-specific state; exactly one payload per slot.
#[derive(Debug, Clone, PartialEq)]
pub enum Container {
    Bmp(BmpInfo),
    Gif(GifInfo),
    Jpeg(JpegInfo),
    Png(PngInfo),
    Tiff(TiffInfo),
    Ccitt(CcittInfo),
    Raw,
}

impl Container {
    pub fn kind(&self) -> ContainerKind {
        match self {
            Self::Bmp(_) => ContainerKind::Bmp,
            Self::Gif(_) => ContainerKind::Gif,
            Self::Jpeg(_) => ContainerKind::Jpeg,
            Self::Png(_) => ContainerKind::Png,
            Self::Tiff(_) => ContainerKind::Tiff,
            Self::Ccitt(_) => ContainerKind::Ccitt,
            Self::Raw => ContainerKind::Raw,
        }
    }
}

// ---------------------------------------------------------------------------
// Transparency and mask roles
// ---------------------------------------------------------------------------

/// How an image is made partially transparent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transparency {
    /// Sample values (one per colour component) that are not painted.
    ColorKey([u16; 4]),
    /// Another loaded image acts as the mask.
    Mask(ImageHandle),
}

/// Role an image plays when it is itself used as a mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MaskRole {
    #[default]
    None,
    /// 1-bit stencil written with `/ImageMask true`.
    Stencil,
    /// Multi-bit gray soft mask referenced through `/SMask`.
    Soft,
}

// ---------------------------------------------------------------------------
// Image slot
// ---------------------------------------------------------------------------

/// Everything known about one loaded image.
pub struct ImageSlot {
    pub(crate) container: Container,
    pub(crate) filename: String,
    pub(crate) width: u32,
    /// Negative when rows are stored bottom-up.
    pub(crate) height: i32,
    pub(crate) bpc: u8,
    pub(crate) components: u8,
    pub(crate) compression: Compression,
    pub(crate) predictor: Predictor,
    /// Data is already compressed with `compression` and must not be
    /// recompressed.
    pub(crate) use_raw: bool,
    pub(crate) ccitt_k: i32,
    pub(crate) colorspace: Colorspace,
    /// Palette read by the decoder, consumed by the colour space resolver.
    pub(crate) palette: Option<RawPalette>,
    pub(crate) transparency: Option<Transparency>,
    pub(crate) mask_role: MaskRole,
    pub(crate) invert: bool,
    pub(crate) interpolate: bool,
    pub(crate) intent: RenderingIntent,
    /// Caller-supplied ICC colour space object, written as `/ColorSpace`.
    pub(crate) icc_profile: Option<ObjectId>,
    pub(crate) reference: ReferenceKind,
    pub(crate) inline: bool,
    pub(crate) verbose: bool,
    /// Resolution in dots per inch; negative values carry only an aspect ratio.
    pub(crate) dpi_x: f64,
    pub(crate) dpi_y: f64,
    pub(crate) rows_per_strip: u32,
    pub(crate) strips: u32,
    pub(crate) sources: Vec<Box<dyn DataSource>>,
    /// One XObject per strip once the image has been written.
    pub(crate) xobjects: Vec<ObjectId>,
}

impl std::fmt::Debug for ImageSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageSlot")
            .field("container", &self.container)
            .field("filename", &self.filename)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bpc", &self.bpc)
            .field("components", &self.components)
            .field("compression", &self.compression)
            .field("colorspace", &self.colorspace)
            .field("transparency", &self.transparency)
            .field("mask_role", &self.mask_role)
            .field("strips", &self.strips)
            .field("pending_sources", &self.sources.len())
            .field("xobjects", &self.xobjects)
            .finish()
    }
}

impl ImageSlot {
    // -- Construction ---------------------------------------------------------

    /// Fresh slot carrying the option-derived attributes of a load request.
    pub(crate) fn new(kind: ContainerKind, filename: &str, options: &ImageOptions) -> Self {
        let container = match kind {
            ContainerKind::Bmp => Container::Bmp(BmpInfo {
                info_header_size: 0,
                bits_per_pixel: 0,
                compression: BmpCompression::Uncompressed,
                top_down: false,
            }),
            ContainerKind::Gif => Container::Gif(GifInfo {
                page: options.page,
                min_code_size: 0,
                color_table_size: 0,
            }),
            ContainerKind::Jpeg => Container::Jpeg(JpegInfo {
                start: 0,
                adobe: false,
                frame_marker: 0,
            }),
            ContainerKind::Png => Container::Png(PngInfo {
                color_type: 0,
                bit_depth: 0,
                interlaced: false,
                path: PngPath::Passthrough,
            }),
            ContainerKind::Tiff => Container::Tiff(TiffInfo {
                page: options.page,
                compression_tag: 1,
                photometric: 1,
                tiled: false,
                planar_config: 1,
                passthrough: false,
            }),
            ContainerKind::Ccitt => Container::Ccitt(CcittInfo {
                bit_reverse: options.bit_reverse,
            }),
            ContainerKind::Raw => Container::Raw,
        };

        Self {
            container,
            filename: filename.to_owned(),
            width: 0,
            height: 0,
            bpc: 8,
            components: 1,
            compression: Compression::None,
            predictor: Predictor::None,
            use_raw: false,
            ccitt_k: options.k,
            colorspace: Colorspace::default(),
            palette: None,
            transparency: None,
            mask_role: MaskRole::None,
            invert: options.invert,
            interpolate: options.interpolate,
            intent: options.rendering_intent,
            icc_profile: options.icc_profile,
            reference: options.reference.clone(),
            inline: options.inline,
            verbose: options.verbose,
            dpi_x: 0.0,
            dpi_y: 0.0,
            rows_per_strip: 0,
            strips: 1,
            sources: Vec::new(),
            xobjects: Vec::new(),
        }
    }

    // -- Accessors ------------------------------------------------------------

    pub fn container(&self) -> &Container {
        &self.container
    }

    pub fn kind(&self) -> ContainerKind {
        self.container.kind()
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    /// Signed height; negative for bottom-up row order.
    pub fn height(&self) -> i32 {
        self.height
    }

    pub fn bpc(&self) -> u8 {
        self.bpc
    }

    pub fn components(&self) -> u8 {
        self.components
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }

    pub fn predictor(&self) -> Predictor {
        self.predictor
    }

    pub fn use_raw(&self) -> bool {
        self.use_raw
    }

    pub fn colorspace(&self) -> Colorspace {
        self.colorspace
    }

    pub fn transparency(&self) -> Option<Transparency> {
        self.transparency
    }

    pub fn mask_role(&self) -> MaskRole {
        self.mask_role
    }

    pub fn is_inverted(&self) -> bool {
        self.invert
    }

    pub fn dpi(&self) -> (f64, f64) {
        (self.dpi_x, self.dpi_y)
    }

    pub fn strips(&self) -> u32 {
        self.strips
    }

    pub fn rows_per_strip(&self) -> u32 {
        self.rows_per_strip
    }

    pub fn is_inline(&self) -> bool {
        self.inline
    }

    /// XObjects written for this image, one per strip; empty until embedded.
    pub fn xobjects(&self) -> &[ObjectId] {
        &self.xobjects
    }

    pub fn is_embedded(&self) -> bool {
        !self.xobjects.is_empty()
    }

    /// Bytes in one row of samples.
    pub fn row_bytes(&self) -> usize {
        row_bytes(self.width, self.bpc, self.components)
    }

    /// Rows carried by strip `index`; the last strip may be short.
    pub fn strip_rows(&self, index: u32) -> u32 {
        let total = self.height.unsigned_abs();
        if self.strips <= 1 {
            return total;
        }
        let start = index.saturating_mul(self.rows_per_strip);
        total.saturating_sub(start).min(self.rows_per_strip)
    }

    // -- Decoder helpers ------------------------------------------------------

    /// Single strip covering the whole image.
    pub(crate) fn set_single_source(&mut self, source: Box<dyn DataSource>) {
        self.strips = 1;
        self.rows_per_strip = self.height.unsigned_abs();
        self.sources = vec![source];
    }

    /// Release sources and any pending palette; used when embedding finishes
    /// and when the slot is freed.
    pub(crate) fn release_resources(&mut self) {
        self.sources.clear();
        self.palette = None;
    }
}

/// Bytes in one row of `width` pixels.
pub fn row_bytes(width: u32, bpc: u8, components: u8) -> usize {
    (width as usize * bpc as usize * components as usize).div_ceil(8)
}

// ---------------------------------------------------------------------------
// Slot table
// ---------------------------------------------------------------------------

enum Entry {
    Free { generation: u32 },
    InUse { generation: u32, slot: Box<ImageSlot> },
}

/// Growable arena of image slots addressed by [`ImageHandle`].
#[derive(Default)]
pub struct SlotTable {
    entries: Vec<Entry>,
}

impl SlotTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `slot` in the first free entry, growing the table if needed.
    pub fn allocate(&mut self, slot: ImageSlot) -> ImageHandle {
        let free = self
            .entries
            .iter()
            .position(|entry| matches!(entry, Entry::Free { .. }));
        let index = match free {
            Some(index) => index,
            None => {
                self.entries.push(Entry::Free { generation: 0 });
                self.entries.len() - 1
            }
        };
        let generation = match self.entries[index] {
            Entry::Free { generation } | Entry::InUse { generation, .. } => generation,
        };
        self.entries[index] = Entry::InUse {
            generation,
            slot: Box::new(slot),
        };
        let handle = ImageHandle {
            index: index as u32,
            generation,
        };
        debug!(%handle, capacity = self.entries.len(), "Allocated image slot");
        handle
    }

    pub fn get(&self, handle: ImageHandle) -> Result<&ImageSlot> {
        match self.entries.get(handle.index as usize) {
            Some(Entry::InUse { generation, slot }) if *generation == handle.generation => {
                Ok(slot.as_ref())
            }
            _ => Err(stale(handle)),
        }
    }

    pub fn get_mut(&mut self, handle: ImageHandle) -> Result<&mut ImageSlot> {
        match self.entries.get_mut(handle.index as usize) {
            Some(Entry::InUse { generation, slot }) if *generation == handle.generation => {
                Ok(slot.as_mut())
            }
            _ => Err(stale(handle)),
        }
    }

    pub fn contains(&self, handle: ImageHandle) -> bool {
        self.get(handle).is_ok()
    }

    /// Free the slot, returning its contents. The generation is bumped so the
    /// released handle no longer resolves.
    pub fn release(&mut self, handle: ImageHandle) -> Result<ImageSlot> {
        self.get(handle)?;
        let index = handle.index as usize;
        let entry = std::mem::replace(
            &mut self.entries[index],
            Entry::Free {
                generation: handle.generation.wrapping_add(1),
            },
        );
        match entry {
            Entry::InUse { mut slot, .. } => {
                slot.release_resources();
                debug!(%handle, "Released image slot");
                Ok(*slot)
            }
            Entry::Free { .. } => Err(stale(handle)),
        }
    }

    /// Number of slots currently in use.
    pub fn in_use(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| matches!(entry, Entry::InUse { .. }))
            .count()
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Handles of all slots in use, in index order.
    pub fn handles(&self) -> Vec<ImageHandle> {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(index, entry)| match entry {
                Entry::InUse { generation, .. } => Some(ImageHandle {
                    index: index as u32,
                    generation: *generation,
                }),
                Entry::Free { .. } => None,
            })
            .collect()
    }
}

fn stale(handle: ImageHandle) -> BildwerkError {
    BildwerkError::InvalidHandle(format!("{handle} is not in use"))
}
