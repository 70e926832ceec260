// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Image engine — the session-level entry point tying sniffing, decoding,
// colour space and mask resolution, embedding and placement together.
//
// The engine owns the slot table and the colour space table. Images stay
// loaded until `close_image` (or until the engine is dropped); embedding
// keeps the slot so it can be placed any number of times.

use std::path::Path;

use bildwerk_core::config::{EngineConfig, ImageOptions, PlaceOptions};
use bildwerk_core::error::{BildwerkError, Result};
use bildwerk_core::types::{
    Compression, ContainerKind, CsHandle, DeviceColorspace, ImageHandle, ReferenceKind,
};
use lopdf::ObjectId;
use tracing::{debug, error, info, instrument, warn};

use crate::colorspace::{self, Colorspace, ColorspaceDescriptor, ColorspaceRegistry, ColorspaceTable};
use crate::decode::{self, DecodeContext};
use crate::input::InputFile;
use crate::mask;
use crate::pdf::embed::{EmbedTarget, MaskObject, WrittenColorspaces, embed_image, inline_image};
use crate::pdf::writer::ObjectWriter;
use crate::place::{self, PlaceGeometry, Placement};
use crate::slot::{ImageSlot, MaskRole, SlotTable, Transparency};
use crate::sniff;

/// Largest edge, in pixels, of an image usable as a page thumbnail.
pub const MAX_THUMBNAIL_SIZE: u32 = 106;

/// Loads images into slots and writes them into a PDF.
pub struct ImageEngine {
    config: EngineConfig,
    slots: SlotTable,
    colorspaces: ColorspaceRegistry,
    written: WrittenColorspaces,
}

impl ImageEngine {
    pub fn new(config: EngineConfig) -> Self {
        info!(pdf_version = config.pdf_version.as_str(), compress = config.compress, "Image engine created");
        Self {
            config,
            slots: SlotTable::new(),
            colorspaces: ColorspaceRegistry::new(),
            written: WrittenColorspaces::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn colorspaces(&self) -> &ColorspaceRegistry {
        &self.colorspaces
    }

    pub fn colorspaces_mut(&mut self) -> &mut ColorspaceRegistry {
        &mut self.colorspaces
    }

    /// Register a caller-defined colour space for use with `colorize`.
    pub fn register_colorspace(&mut self, descriptor: ColorspaceDescriptor) -> CsHandle {
        self.colorspaces.register(descriptor)
    }

    pub fn slot(&self, handle: ImageHandle) -> Result<&ImageSlot> {
        self.slots.get(handle)
    }

    /// Number of images currently loaded.
    pub fn images_in_use(&self) -> usize {
        self.slots.in_use()
    }

    // -- Loading --------------------------------------------------------------

    /// Load the image at `path`.
    #[instrument(skip(self, path, options), fields(path = %path.as_ref().display()))]
    pub fn load_image(&mut self, path: impl AsRef<Path>, options: &ImageOptions) -> Result<ImageHandle> {
        let path = path.as_ref();
        let name = path.display().to_string();
        let result = match referenced_kind(options) {
            Some(kind) => self.load_reference(kind, &name, options),
            None => InputFile::open(path).and_then(|file| self.load_decoded(file, options)),
        };
        report(&name, options.verbose, result)
    }

    /// Load an image from an already opened input.
    #[instrument(skip_all, fields(file = file.name()))]
    pub fn load_image_from(&mut self, file: InputFile, options: &ImageOptions) -> Result<ImageHandle> {
        let name = file.name().to_owned();
        let result = match referenced_kind(options) {
            Some(kind) => self.load_reference(kind, &name, options),
            None => self.load_decoded(file, options),
        };
        report(&name, options.verbose, result)
    }

    fn load_decoded(&mut self, mut file: InputFile, options: &ImageOptions) -> Result<ImageHandle> {
        let kind = sniff::detect(&mut file, options.format)?;
        self.check_references(options)?;

        let mut slot = ImageSlot::new(kind, file.name(), options);
        slot.reference = ReferenceKind::Direct;
        let handle = self.slots.allocate(slot);

        let ctx = DecodeContext {
            options,
            config: &self.config,
        };
        let loaded = self.slots.get_mut(handle).and_then(|slot| {
            decode::decode(kind, file, &ctx, slot)?;
            apply_options(slot, &mut self.colorspaces, options, &self.config)
        });
        match loaded {
            Ok(()) => {
                log_loaded(handle, self.slots.get(handle)?);
                Ok(handle)
            }
            Err(err) => {
                let _ = self.slots.release(handle);
                Err(err)
            }
        }
    }

    /// Referenced data is never read: its geometry comes from the options.
    fn load_reference(&mut self, kind: ContainerKind, name: &str, options: &ImageOptions) -> Result<ImageHandle> {
        self.check_references(options)?;
        let width = options.width.ok_or(BildwerkError::MissingOption("width"))?;
        let height = options.height.ok_or(BildwerkError::MissingOption("height"))?;
        if width == 0 || height == 0 || height > i32::MAX as u32 {
            return Err(BildwerkError::CorruptFormat(format!("image size {width}x{height}")));
        }

        let mut slot = ImageSlot::new(kind, name, options);
        let (bpc, components) = match kind {
            ContainerKind::Ccitt => (1, 1),
            ContainerKind::Jpeg => (options.bpc.unwrap_or(8), options.components.unwrap_or(3)),
            _ => (
                options.bpc.ok_or(BildwerkError::MissingOption("bpc"))?,
                options.components.ok_or(BildwerkError::MissingOption("components"))?,
            ),
        };
        let compression = match kind {
            ContainerKind::Ccitt => Compression::Ccitt,
            ContainerKind::Jpeg => Compression::Dct,
            _ => Compression::None,
        };
        slot.width = width;
        slot.height = height as i32;
        slot.bpc = bpc;
        slot.components = components;
        slot.compression = compression;
        slot.use_raw = compression != Compression::None;
        slot.strips = 1;
        slot.rows_per_strip = height;
        apply_options(&mut slot, &mut self.colorspaces, options, &self.config)?;

        let handle = self.slots.allocate(slot);
        log_loaded(handle, self.slots.get(handle)?);
        Ok(handle)
    }

    /// Mask and colorize handles are checked before any decoding happens.
    fn check_references(&self, options: &ImageOptions) -> Result<()> {
        if let Some(mask) = options.masked {
            mask::validate_mask_reference(&self.slots, mask, self.config.pdf_version)?;
        }
        if let Some(handle) = options.colorize {
            colorspace::descriptor(&self.colorspaces, handle)?;
        }
        Ok(())
    }

    // -- Output ---------------------------------------------------------------

    /// Write the image (and its mask, if any) as XObjects, one per strip.
    ///
    /// Embedding twice returns the objects written the first time.
    #[instrument(skip(self, writer))]
    pub fn embed(&mut self, handle: ImageHandle, writer: &mut dyn ObjectWriter) -> Result<Vec<ObjectId>> {
        let slot = self.slots.get(handle)?;
        if slot.is_embedded() {
            return Ok(slot.xobjects.clone());
        }
        if slot.inline {
            return Err(BildwerkError::UnsupportedEncoding(format!(
                "{handle} is an inline image"
            )));
        }

        let transparency = slot.transparency;
        let mask = match transparency {
            Some(Transparency::Mask(mask)) => Some(self.embed_mask(mask, writer)?),
            _ => None,
        };

        let slot = self.slots.get_mut(handle)?;
        let mut target = EmbedTarget {
            config: &self.config,
            colorspaces: &self.colorspaces,
            written: &mut self.written,
        };
        embed_image(slot, mask, &mut target, writer)
    }

    fn embed_mask(&mut self, mask: ImageHandle, writer: &mut dyn ObjectWriter) -> Result<MaskObject> {
        if !self.slots.contains(mask) {
            return Err(BildwerkError::IncompatibleMask(format!(
                "{mask} was closed before its image was embedded"
            )));
        }
        let ids = self.embed(mask, writer)?;
        let id = ids
            .first()
            .copied()
            .ok_or_else(|| BildwerkError::IncompatibleMask(format!("{mask} produced no object")))?;
        let link = mask::link_for(self.slots.get(mask)?);
        Ok(MaskObject { id, link })
    }

    /// Render an inline image as content-stream bytes and release its slot.
    #[instrument(skip(self))]
    pub fn write_inline(&mut self, handle: ImageHandle) -> Result<Vec<u8>> {
        let slot = self.slots.get_mut(handle)?;
        if !slot.inline {
            return Err(BildwerkError::UnsupportedEncoding(format!(
                "{handle} was not loaded as an inline image"
            )));
        }
        let result = inline_image(slot, &self.config);
        self.slots.release(handle)?;
        info!(%handle, "Inline image written and released");
        result
    }

    /// Compute where and how an embedded image is drawn.
    #[instrument(skip(self, options))]
    pub fn place(&self, handle: ImageHandle, x: f64, y: f64, options: &PlaceOptions) -> Result<Placement> {
        let slot = self.slots.get(handle)?;
        Ok(place::place(
            &PlaceGeometry::of(slot),
            (x, y),
            options,
            self.config.y_direction,
        ))
    }

    /// The XObject to use as a page thumbnail.
    ///
    /// Thumbnails must be embedded single-strip images of at most
    /// [`MAX_THUMBNAIL_SIZE`] pixels per edge, in gray, RGB or an indexed
    /// RGB palette.
    pub fn thumbnail_candidate(&self, handle: ImageHandle) -> Result<ObjectId> {
        let slot = self.slots.get(handle)?;
        if slot.strips != 1 {
            return Err(BildwerkError::UnsupportedEncoding(format!(
                "thumbnail from {handle} with {} strips",
                slot.strips
            )));
        }
        if slot.width > MAX_THUMBNAIL_SIZE || slot.height.unsigned_abs() > MAX_THUMBNAIL_SIZE {
            return Err(BildwerkError::UnsupportedEncoding(format!(
                "thumbnail of {}x{} exceeds {MAX_THUMBNAIL_SIZE}x{MAX_THUMBNAIL_SIZE}",
                slot.width,
                slot.height.unsigned_abs()
            )));
        }
        let usable = match slot.colorspace {
            Colorspace::Device(device) => device != DeviceColorspace::Cmyk,
            Colorspace::Registered(cs) => matches!(
                self.colorspaces.lookup(cs),
                Some(ColorspaceDescriptor::Indexed {
                    base: DeviceColorspace::Rgb,
                    ..
                })
            ),
        };
        if !usable || slot.mask_role == MaskRole::Stencil {
            return Err(BildwerkError::UnsupportedEncoding(format!(
                "thumbnail colour space of {handle}"
            )));
        }
        slot.xobjects.first().copied().ok_or_else(|| {
            BildwerkError::UnsupportedEncoding(format!("{handle} has not been embedded"))
        })
    }

    /// Release an image. Its handle is invalid afterwards.
    #[instrument(skip(self))]
    pub fn close_image(&mut self, handle: ImageHandle) -> Result<()> {
        let slot = self.slots.release(handle)?;
        info!(%handle, file = slot.filename(), "Image closed");
        Ok(())
    }
}

impl Default for ImageEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl Drop for ImageEngine {
    fn drop(&mut self) {
        let open = self.slots.handles();
        if !open.is_empty() {
            debug!(count = open.len(), "Releasing images left open");
        }
        for handle in open {
            let _ = self.slots.release(handle);
        }
    }
}

// ---------------------------------------------------------------------------
// Load helpers
// ---------------------------------------------------------------------------

/// Container kind to reference externally, or `None` to embed the data.
fn referenced_kind(options: &ImageOptions) -> Option<ContainerKind> {
    if options.reference == ReferenceKind::Direct {
        return None;
    }
    match options.format {
        Some(kind @ (ContainerKind::Ccitt | ContainerKind::Jpeg | ContainerKind::Raw)) => Some(kind),
        other => {
            warn!(requested = ?other, "External reference needs CCITT, JPEG or raw data; embedding directly");
            None
        }
    }
}

/// Resolve colour space, mask role and transparency once the header is known.
fn apply_options(
    slot: &mut ImageSlot,
    table: &mut dyn ColorspaceTable,
    options: &ImageOptions,
    config: &EngineConfig,
) -> Result<()> {
    if options.mask {
        slot.mask_role = mask::resolve_mask_role(slot.bpc, slot.components, config.pdf_version)?;
        if slot.palette.take().is_some() {
            warn!(file = slot.filename(), "Palette ignored for a mask image");
        }
        slot.colorspace = Colorspace::Device(DeviceColorspace::Gray);
        slot.transparency = None;
    } else if let Some(handle) = options.colorize {
        let colorized = Colorspace::Registered(handle);
        let components = colorspace::components_of(table, colorized)?;
        if components != slot.components {
            return Err(BildwerkError::UnsupportedEncoding(format!(
                "{handle} takes {components} components, image has {}",
                slot.components
            )));
        }
        slot.palette = None;
        slot.colorspace = colorized;
    } else {
        slot.colorspace = colorspace::resolve(table, slot.components, slot.bpc, slot.palette.take())?;
    }

    if options.ignore_mask && slot.transparency.take().is_some() {
        debug!(file = slot.filename(), "Transparency discarded");
    }
    if let Some(mask) = options.masked {
        match slot.transparency {
            Some(Transparency::ColorKey(_)) => {
                warn!(file = slot.filename(), %mask, "Image has a colour key; mask ignored");
            }
            _ => slot.transparency = Some(Transparency::Mask(mask)),
        }
    }

    if slot.inline {
        let reason = if !slot.kind().allows_inline() {
            Some("format")
        } else if slot.reference != ReferenceKind::Direct {
            Some("external reference")
        } else if !matches!(slot.colorspace, Colorspace::Device(_)) || slot.icc_profile.is_some() {
            Some("colour space")
        } else if slot.transparency.is_some() {
            Some("transparency")
        } else if slot.strips != 1 {
            Some("strips")
        } else {
            None
        };
        if let Some(reason) = reason {
            warn!(file = slot.filename(), reason, "Inline image not possible; writing an XObject");
            slot.inline = false;
        }
    }
    Ok(())
}

fn log_loaded(handle: ImageHandle, slot: &ImageSlot) {
    info!(
        %handle,
        file = slot.filename(),
        kind = %slot.kind(),
        width = slot.width,
        height = slot.height,
        bpc = slot.bpc,
        components = slot.components,
        passthrough = slot.use_raw,
        "Image loaded"
    );
}

fn report(name: &str, verbose: bool, result: Result<ImageHandle>) -> Result<ImageHandle> {
    if let Err(err) = &result {
        if verbose {
            error!(file = name, %err, "Image load failed");
        } else {
            warn!(file = name, %err, "Image load failed");
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::writer::PdfObjectWriter;
    use bildwerk_core::types::PdfVersion;
    use lopdf::{Document, Object, Stream};
    use std::io::Write;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    fn raw_options(width: u32, height: u32, bpc: u8, components: u8) -> ImageOptions {
        ImageOptions {
            format: Some(ContainerKind::Raw),
            width: Some(width),
            height: Some(height),
            bpc: Some(bpc),
            components: Some(components),
            ..ImageOptions::default()
        }
    }

    fn load_raw(engine: &mut ImageEngine, options: &ImageOptions, bytes: Vec<u8>) -> Result<ImageHandle> {
        engine.load_image_from(InputFile::from_bytes("pixels.raw", bytes), options)
    }

    fn stream(doc: &Document, id: ObjectId) -> &Stream {
        doc.get_object(id).unwrap().as_stream().unwrap()
    }

    /// Loading from disk, embedding and closing walk the full lifecycle.
    #[test]
    fn load_embed_close_from_path() {
        init_tracing();
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&[0x10; 12]).unwrap();
        tmp.flush().unwrap();

        let mut engine = ImageEngine::default();
        let handle = engine.load_image(tmp.path(), &raw_options(2, 2, 8, 3)).unwrap();
        assert_eq!(engine.images_in_use(), 1);

        let mut writer = PdfObjectWriter::new();
        let ids = engine.embed(handle, &mut writer).unwrap();
        assert_eq!(ids.len(), 1);
        assert_eq!(engine.embed(handle, &mut writer).unwrap(), ids);
        let doc = writer.into_document().unwrap();
        assert_eq!(stream(&doc, ids[0]).dict.get(b"Width").unwrap().as_i64().unwrap(), 2);

        engine.close_image(handle).unwrap();
        assert_eq!(engine.images_in_use(), 0);
        assert!(matches!(engine.slot(handle), Err(BildwerkError::InvalidHandle(_))));
    }

    /// A failed decode leaves no slot behind.
    #[test]
    fn failed_decode_releases_slot() {
        let mut engine = ImageEngine::default();
        let err = load_raw(&mut engine, &raw_options(4, 4, 8, 1), vec![0; 3]).unwrap_err();
        assert!(matches!(err, BildwerkError::CorruptFormat(_)));
        assert_eq!(engine.images_in_use(), 0);

        let options = ImageOptions {
            verbose: false,
            ..ImageOptions::default()
        };
        let err = engine
            .load_image_from(InputFile::from_bytes("noise.bin", b"not an image".to_vec()), &options)
            .unwrap_err();
        assert!(matches!(err, BildwerkError::UnknownFormat(_)));
        assert_eq!(engine.images_in_use(), 0);
    }

    /// A missing file surfaces as an I/O failure.
    #[test]
    fn missing_file_is_io_failure() {
        let mut engine = ImageEngine::default();
        let dir = tempfile::tempdir().unwrap();
        let err = engine
            .load_image(dir.path().join("absent.png"), &ImageOptions::default())
            .unwrap_err();
        assert!(matches!(err, BildwerkError::IoFailure(_)));
    }

    /// A stencil mask is written first and linked through `/Mask`.
    #[test]
    fn stencil_mask_linked() {
        let mut engine = ImageEngine::default();
        let mask_options = ImageOptions {
            mask: true,
            ..raw_options(8, 1, 1, 1)
        };
        let mask = load_raw(&mut engine, &mask_options, vec![0xF0]).unwrap();
        assert_eq!(engine.slot(mask).unwrap().mask_role(), MaskRole::Stencil);

        let image_options = ImageOptions {
            masked: Some(mask),
            ..raw_options(8, 1, 8, 1)
        };
        let image = load_raw(&mut engine, &image_options, vec![0x80; 8]).unwrap();
        assert_eq!(engine.slot(image).unwrap().transparency(), Some(Transparency::Mask(mask)));

        let mut writer = PdfObjectWriter::new();
        let ids = engine.embed(image, &mut writer).unwrap();
        let mask_id = engine.slot(mask).unwrap().xobjects()[0];
        let doc = writer.into_document().unwrap();
        assert_eq!(stream(&doc, ids[0]).dict.get(b"Mask").unwrap(), &Object::Reference(mask_id));
        assert_eq!(
            stream(&doc, mask_id).dict.get(b"ImageMask").unwrap(),
            &Object::Boolean(true)
        );
    }

    /// Masks spanning several strips are rejected before decoding.
    #[test]
    fn multi_strip_mask_incompatible() {
        let mut engine = ImageEngine::default();
        let mask_options = ImageOptions {
            mask: true,
            ..raw_options(8, 2, 1, 1)
        };
        let mask = load_raw(&mut engine, &mask_options, vec![0xFF, 0x00]).unwrap();
        engine.slots.get_mut(mask).unwrap().strips = 2;

        let image_options = ImageOptions {
            masked: Some(mask),
            ..raw_options(1, 1, 8, 1)
        };
        let err = load_raw(&mut engine, &image_options, vec![0]).unwrap_err();
        assert!(matches!(err, BildwerkError::IncompatibleMask(_)));
        assert_eq!(engine.images_in_use(), 1);
    }

    /// Soft masks need PDF 1.4.
    #[test]
    fn soft_mask_needs_pdf_14() {
        let mut engine = ImageEngine::new(EngineConfig {
            pdf_version: PdfVersion::V1_3,
            ..EngineConfig::default()
        });
        let options = ImageOptions {
            mask: true,
            ..raw_options(2, 1, 8, 1)
        };
        let err = load_raw(&mut engine, &options, vec![0, 255]).unwrap_err();
        assert!(matches!(err, BildwerkError::UnsupportedEncoding(_)));
        assert_eq!(engine.images_in_use(), 0);
    }

    /// Thumbnails must be small, embedded and in a suitable colour space.
    #[test]
    fn thumbnail_rules() {
        let mut engine = ImageEngine::default();
        let mut writer = PdfObjectWriter::new();

        let small = load_raw(&mut engine, &raw_options(8, 8, 8, 1), vec![0; 64]).unwrap();
        assert!(engine.thumbnail_candidate(small).is_err());
        let ids = engine.embed(small, &mut writer).unwrap();
        assert_eq!(engine.thumbnail_candidate(small).unwrap(), ids[0]);

        let wide = load_raw(&mut engine, &raw_options(200, 1, 8, 1), vec![0; 200]).unwrap();
        engine.embed(wide, &mut writer).unwrap();
        assert!(matches!(
            engine.thumbnail_candidate(wide),
            Err(BildwerkError::UnsupportedEncoding(_))
        ));

        let cmyk = load_raw(&mut engine, &raw_options(1, 1, 8, 4), vec![0; 4]).unwrap();
        engine.embed(cmyk, &mut writer).unwrap();
        assert!(engine.thumbnail_candidate(cmyk).is_err());
    }

    /// Inline CCITT data is written as content bytes and the slot released.
    #[test]
    fn inline_ccitt_released() {
        let mut engine = ImageEngine::default();
        let options = ImageOptions {
            format: Some(ContainerKind::Ccitt),
            width: Some(16),
            height: Some(2),
            k: -1,
            inline: true,
            ..ImageOptions::default()
        };
        let handle = engine
            .load_image_from(InputFile::from_bytes("fax.g4", vec![0x26, 0xA0, 0x00]), &options)
            .unwrap();
        assert!(engine.slot(handle).unwrap().is_inline());

        let mut writer = PdfObjectWriter::new();
        assert!(engine.embed(handle, &mut writer).is_err());

        let bytes = engine.write_inline(handle).unwrap();
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.contains("BI\n"));
        assert!(text.contains("/F /CCF"));
        assert_eq!(engine.images_in_use(), 0);
    }

    /// Referenced JPEG data is never opened; its geometry must be given.
    #[test]
    fn referenced_jpeg() {
        let mut engine = ImageEngine::default();
        let mut options = ImageOptions {
            format: Some(ContainerKind::Jpeg),
            reference: ReferenceKind::File,
            ..ImageOptions::default()
        };
        let err = engine.load_image("photos/remote.jpg", &options).unwrap_err();
        assert!(matches!(err, BildwerkError::MissingOption("width")));

        options.width = Some(640);
        options.height = Some(480);
        let handle = engine.load_image("photos/remote.jpg", &options).unwrap();
        let mut writer = PdfObjectWriter::new();
        let ids = engine.embed(handle, &mut writer).unwrap();
        let doc = writer.into_document().unwrap();
        let s = stream(&doc, ids[0]);
        assert!(s.content.is_empty());
        assert_eq!(s.dict.get(b"FFilter").unwrap(), &Object::Name(b"DCTDecode".to_vec()));
        assert_eq!(s.dict.get(b"ColorSpace").unwrap(), &Object::Name(b"DeviceRGB".to_vec()));
    }

    /// Colorize draws the samples through a registered colour space.
    #[test]
    fn colorize_registered_space() {
        let mut engine = ImageEngine::default();
        let separation = Object::Array(vec![Object::Name(b"Separation".to_vec())]);
        let cs = engine.register_colorspace(ColorspaceDescriptor::Opaque {
            object: separation.clone(),
            components: 1,
        });

        let options = ImageOptions {
            colorize: Some(cs),
            ..raw_options(2, 1, 8, 1)
        };
        let handle = load_raw(&mut engine, &options, vec![0, 255]).unwrap();
        let mut writer = PdfObjectWriter::new();
        let ids = engine.embed(handle, &mut writer).unwrap();
        let doc = writer.into_document().unwrap();
        assert_eq!(stream(&doc, ids[0]).dict.get(b"ColorSpace").unwrap(), &separation);

        let rgb = ImageOptions {
            colorize: Some(cs),
            ..raw_options(1, 1, 8, 3)
        };
        assert!(load_raw(&mut engine, &rgb, vec![0; 3]).is_err());
        assert!(load_raw(&mut engine, &ImageOptions { colorize: Some(CsHandle(9)), ..options }, vec![0, 0]).is_err());
    }

    /// A caller-written ICC colour space is referenced verbatim.
    #[test]
    fn icc_profile_passthrough() {
        let mut engine = ImageEngine::default();
        let options = ImageOptions {
            icc_profile: Some((42, 0)),
            ..raw_options(1, 1, 8, 3)
        };
        let handle = load_raw(&mut engine, &options, vec![1, 2, 3]).unwrap();
        let mut writer = PdfObjectWriter::new();
        let ids = engine.embed(handle, &mut writer).unwrap();
        let doc = writer.into_document().unwrap();
        assert_eq!(stream(&doc, ids[0]).dict.get(b"ColorSpace").unwrap(), &Object::Reference((42, 0)));
    }

    /// Placement through the engine uses the slot's geometry.
    #[test]
    fn place_loaded_image() {
        let mut engine = ImageEngine::default();
        let handle = load_raw(&mut engine, &raw_options(100, 50, 8, 1), vec![0; 5000]).unwrap();
        let placement = engine.place(handle, 0.0, 0.0, &PlaceOptions::default()).unwrap();
        assert_eq!(placement.matrix.to_array(), [100.0, 0.0, 0.0, 50.0, 0.0, 0.0]);
    }

    /// Options parsed from JSON drive a load like hand-built ones.
    #[test]
    fn load_with_json_options() {
        let mut engine = ImageEngine::default();
        let options =
            ImageOptions::from_json(r#"{"format":"raw","width":1,"height":1,"bpc":8,"components":1,"invert":true}"#)
                .unwrap();
        let handle = load_raw(&mut engine, &options, vec![7]).unwrap();
        assert!(engine.slot(handle).unwrap().is_inverted());
    }
}
