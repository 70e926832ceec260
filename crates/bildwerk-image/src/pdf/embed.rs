// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Image embedding — turn a decoded slot into image XObjects (one per strip)
// or an inline image, driving each strip's data source to completion.

use std::collections::HashMap;
use std::io::Write;

use bildwerk_core::config::EngineConfig;
use bildwerk_core::error::{BildwerkError, Result};
use bildwerk_core::types::{Compression, CsHandle, Predictor, ReferenceKind};
use flate2::write::ZlibEncoder;
use lopdf::{Dictionary, Object, ObjectId, Stream};
use tracing::{debug, info, instrument};

use super::writer::ObjectWriter;
use crate::colorspace::{self, Colorspace, ColorspaceDescriptor, ColorspaceTable};
use crate::mask::MaskLink;
use crate::slot::{ImageSlot, MaskRole, Transparency};
use crate::source::{BLOCK_SIZE, DataSource, drain, pump};

/// Page width in pixels CCITT decoders assume when `/Columns` is absent.
const CCITT_DEFAULT_COLUMNS: u32 = 1728;

/// Colour space objects already written, so palettes are emitted once and
/// shared by every strip and image using the same handle.
#[derive(Debug, Default)]
pub struct WrittenColorspaces {
    objects: HashMap<CsHandle, Object>,
}

impl WrittenColorspaces {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

/// Everything image embedding reads besides the slot.
pub struct EmbedTarget<'a> {
    pub config: &'a EngineConfig,
    pub colorspaces: &'a dyn ColorspaceTable,
    pub written: &'a mut WrittenColorspaces,
}

/// An already written mask and the key linking to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaskObject {
    pub id: ObjectId,
    pub link: MaskLink,
}

fn name(value: &str) -> Object {
    Object::Name(value.as_bytes().to_vec())
}

// ---------------------------------------------------------------------------
// XObjects
// ---------------------------------------------------------------------------

/// Write every strip of `slot` as an image XObject.
///
/// Strip 0 writes any palette; later strips (and later images drawn in the
/// same colour space) refer to the same object. The slot keeps the XObject
/// ids and drops its data sources.
#[instrument(skip_all, fields(file = slot.filename(), strips = slot.strips()))]
pub fn embed_image(
    slot: &mut ImageSlot,
    mask: Option<MaskObject>,
    target: &mut EmbedTarget<'_>,
    writer: &mut dyn ObjectWriter,
) -> Result<Vec<ObjectId>> {
    if slot.is_embedded() {
        return Ok(slot.xobjects.clone());
    }

    let stencil = slot.mask_role == MaskRole::Stencil;
    let (colorspace, components, indexed) = if stencil {
        (None, 1, false)
    } else {
        let object = match slot.icc_profile {
            Some(icc) => Object::Reference(icc),
            None => colorspace_object(slot.colorspace, target, writer)?,
        };
        (
            Some(object),
            colorspace::components_of(target.colorspaces, slot.colorspace)?,
            colorspace::is_indexed(target.colorspaces, slot.colorspace),
        )
    };

    let header = StripHeader {
        colorspace,
        components,
        indexed,
        mask,
    };
    let mut ids = Vec::with_capacity(slot.strips as usize);
    for strip in 0..slot.strips {
        match write_strip(slot, strip, &header, target.config, writer) {
            Ok(id) => ids.push(id),
            Err(err) => {
                writer.abort();
                return Err(err);
            }
        }
    }

    slot.xobjects = ids.clone();
    slot.release_resources();
    info!(objects = ids.len(), "Image embedded");
    Ok(ids)
}

/// Dictionary entries shared by all strips of one image.
struct StripHeader {
    colorspace: Option<Object>,
    components: u8,
    indexed: bool,
    mask: Option<MaskObject>,
}

fn write_strip(
    slot: &mut ImageSlot,
    strip: u32,
    header: &StripHeader,
    config: &EngineConfig,
    writer: &mut dyn ObjectWriter,
) -> Result<ObjectId> {
    let rows = slot.strip_rows(strip);
    writer.begin_dict()?;
    writer.put("Type", name("XObject"))?;
    writer.put("Subtype", name("Image"))?;
    writer.put("Width", Object::Integer(slot.width as i64))?;
    writer.put("Height", Object::Integer(rows as i64))?;
    writer.put("BitsPerComponent", Object::Integer(slot.bpc as i64))?;

    match &header.colorspace {
        None => writer.put("ImageMask", Object::Boolean(true))?,
        Some(colorspace) => writer.put("ColorSpace", colorspace.clone())?,
    }
    if slot.invert {
        writer.put("Decode", decode_array(header.components, header.indexed, slot.bpc))?;
    }
    if let (Some(Transparency::ColorKey(key)), Some(_)) = (slot.transparency, &header.colorspace) {
        let ranges = key
            .iter()
            .take(header.components as usize)
            .flat_map(|&v| [Object::Integer(v as i64), Object::Integer(v as i64)])
            .collect();
        writer.put("Mask", Object::Array(ranges))?;
    }
    if let Some(mask) = header.mask {
        let key = match mask.link {
            MaskLink::Stencil => "Mask",
            MaskLink::Soft => "SMask",
        };
        writer.put(key, Object::Reference(mask.id))?;
    }
    if let Some(intent) = slot.intent.pdf_name() {
        writer.put("Intent", name(intent))?;
    }
    if slot.interpolate {
        writer.put("Interpolate", Object::Boolean(true))?;
    }

    let compress_here = !slot.use_raw && config.compress;
    let filter = if slot.use_raw {
        slot.compression.filter_name()
    } else if compress_here {
        Some("FlateDecode")
    } else {
        None
    };
    let parms = decode_parms(slot, rows);

    let direct = match &slot.reference {
        ReferenceKind::Direct => {
            if let Some(filter) = filter {
                writer.put("Filter", name(filter))?;
            }
            if let Some(parms) = parms {
                writer.put("DecodeParms", Object::Dictionary(parms))?;
            }
            true
        }
        reference => {
            writer.put("F", file_spec(reference, &slot.filename))?;
            if let Some(filter) = slot.compression.filter_name().filter(|_| slot.use_raw) {
                writer.put("FFilter", name(filter))?;
            }
            if let Some(parms) = parms {
                writer.put("FDecodeParms", Object::Dictionary(parms))?;
            }
            false
        }
    };

    let length = writer.alloc_id();
    writer.begin_stream(length)?;
    if direct {
        let source = slot.sources.get_mut(strip as usize).ok_or_else(|| {
            BildwerkError::PdfError(format!("strip {strip} of {} has no data", slot.filename))
        })?;
        stream_data(source.as_mut(), compress_here, writer)?;
    }
    let (id, len) = writer.end_stream()?;
    writer.patch_length(length, len)?;
    debug!(strip, rows, bytes = len, ?filter, "Strip written");
    Ok(id)
}

/// Pull `source` into the open stream, Flate-compressing on the way when
/// `compress` is set.
fn stream_data(source: &mut dyn DataSource, compress: bool, writer: &mut dyn ObjectWriter) -> Result<()> {
    if !compress {
        pump(source, |chunk| writer.write(chunk))?;
        return Ok(());
    }
    let mut encoder = ZlibEncoder::new(Vec::new(), flate2::Compression::default());
    pump(source, |chunk| {
        encoder.write_all(chunk)?;
        let pending = encoder.get_mut();
        if pending.len() >= BLOCK_SIZE {
            writer.write(pending)?;
            pending.clear();
        }
        Ok(())
    })?;
    let rest = encoder.finish()?;
    writer.write(&rest)
}

/// Colour space entry for `colorspace`, writing registered spaces once.
fn colorspace_object(
    colorspace: Colorspace,
    target: &mut EmbedTarget<'_>,
    writer: &mut dyn ObjectWriter,
) -> Result<Object> {
    let handle = match colorspace {
        Colorspace::Device(device) => return Ok(name(device.pdf_name())),
        Colorspace::Registered(handle) => handle,
    };
    if let Some(object) = target.written.objects.get(&handle) {
        return Ok(object.clone());
    }

    let object = match colorspace::descriptor(target.colorspaces, handle)? {
        ColorspaceDescriptor::Device(device) => name(device.pdf_name()),
        ColorspaceDescriptor::Indexed { base, hival, lookup } => {
            let table = writer.add_object(Object::Stream(Stream::new(Dictionary::new(), lookup.clone())));
            let array = Object::Array(vec![
                name("Indexed"),
                name(base.pdf_name()),
                Object::Integer(*hival as i64),
                Object::Reference(table),
            ]);
            Object::Reference(writer.add_object(array))
        }
        ColorspaceDescriptor::Opaque { object, .. } => object.clone(),
    };
    debug!(%handle, "Colour space written");
    target.written.objects.insert(handle, object.clone());
    Ok(object)
}

fn decode_array(components: u8, indexed: bool, bpc: u8) -> Object {
    if indexed {
        let max = (1i64 << bpc.min(16)) - 1;
        return Object::Array(vec![Object::Integer(max), Object::Integer(0)]);
    }
    Object::Array(
        (0..components)
            .flat_map(|_| [Object::Integer(1), Object::Integer(0)])
            .collect(),
    )
}

/// `/DecodeParms` for passed-through data with a predictor or CCITT coding.
fn decode_parms(slot: &ImageSlot, rows: u32) -> Option<Dictionary> {
    if !slot.use_raw {
        return None;
    }
    let mut parms = Dictionary::new();
    if slot.compression == Compression::Ccitt {
        if slot.ccitt_k != 0 {
            parms.set("K", Object::Integer(slot.ccitt_k as i64));
        }
        if slot.width != CCITT_DEFAULT_COLUMNS {
            parms.set("Columns", Object::Integer(slot.width as i64));
        }
        parms.set("Rows", Object::Integer(rows as i64));
        return Some(parms);
    }
    if slot.predictor == Predictor::None {
        return None;
    }
    parms.set("Predictor", Object::Integer(slot.predictor.code()));
    parms.set("Columns", Object::Integer(slot.width as i64));
    if slot.bpc != 8 {
        parms.set("BitsPerComponent", Object::Integer(slot.bpc as i64));
    }
    if slot.components != 1 {
        parms.set("Colors", Object::Integer(slot.components as i64));
    }
    Some(parms)
}

fn file_spec(reference: &ReferenceKind, filename: &str) -> Object {
    match reference {
        ReferenceKind::Url(url) => {
            let mut spec = Dictionary::new();
            spec.set("FS", name("URL"));
            spec.set("F", Object::string_literal(url.as_str()));
            Object::Dictionary(spec)
        }
        _ => Object::string_literal(filename),
    }
}

// ---------------------------------------------------------------------------
// Inline images
// ---------------------------------------------------------------------------

/// Render a single-strip image as `q … cm BI … ID … EI Q` content bytes,
/// drawn at one unit per pixel.
#[instrument(skip_all, fields(file = slot.filename()))]
pub fn inline_image(slot: &mut ImageSlot, config: &EngineConfig) -> Result<Vec<u8>> {
    if slot.strips != 1 {
        return Err(BildwerkError::UnsupportedEncoding(
            "inline images must be a single strip".into(),
        ));
    }
    let stencil = slot.mask_role == MaskRole::Stencil;
    let device = match slot.colorspace {
        _ if stencil => None,
        Colorspace::Device(device) => Some(device),
        Colorspace::Registered(handle) => {
            return Err(BildwerkError::UnsupportedEncoding(format!(
                "inline image in {handle}"
            )));
        }
    };

    let width = slot.width;
    let rows = slot.strip_rows(0);
    let mut out = Vec::new();
    write!(out, "q {width} 0 0 {rows} 0 0 cm\nBI\n/W {width}\n/H {rows}\n/BPC {}\n", slot.bpc)?;
    match device {
        Some(device) => writeln!(out, "/CS /{}", device.inline_name())?,
        None => out.extend_from_slice(b"/IM true\n"),
    }

    let compress_here = !slot.use_raw && config.compress;
    let filter = if slot.use_raw {
        slot.compression.inline_filter_name()
    } else if compress_here {
        Compression::Flate.inline_filter_name()
    } else {
        None
    };
    if let Some(filter) = filter {
        writeln!(out, "/F /{filter}")?;
    }
    if let Some(parms) = decode_parms(slot, rows) {
        out.extend_from_slice(b"/DP ");
        write_object(&mut out, &Object::Dictionary(parms))?;
        out.push(b'\n');
    }
    if slot.invert {
        let components = device.map_or(1, |d| d.components());
        out.extend_from_slice(b"/D ");
        write_object(&mut out, &decode_array(components, false, slot.bpc))?;
        out.push(b'\n');
    }
    if slot.interpolate {
        out.extend_from_slice(b"/I true\n");
    }

    let source = slot
        .sources
        .first_mut()
        .ok_or_else(|| BildwerkError::PdfError(format!("{} has no data", slot.filename)))?;
    let data = if compress_here {
        let mut encoder = ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        pump(source.as_mut(), |chunk| Ok(encoder.write_all(chunk)?))?;
        encoder.finish()?
    } else {
        drain(source.as_mut())?
    };

    out.extend_from_slice(b"ID\n");
    out.extend_from_slice(&data);
    out.extend_from_slice(b"\nEI\nQ\n");
    slot.release_resources();
    debug!(bytes = data.len(), "Inline image written");
    Ok(out)
}

/// Serialise the small set of object kinds inline image headers use.
fn write_object(out: &mut Vec<u8>, object: &Object) -> Result<()> {
    match object {
        Object::Integer(v) => write!(out, "{v}")?,
        Object::Real(v) => write!(out, "{v}")?,
        Object::Boolean(v) => write!(out, "{v}")?,
        Object::Name(n) => {
            out.push(b'/');
            out.extend_from_slice(n);
        }
        Object::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b' ');
                }
                write_object(out, item)?;
            }
            out.push(b']');
        }
        Object::Dictionary(dict) => {
            out.extend_from_slice(b"<<");
            for (key, value) in dict.iter() {
                out.push(b'/');
                out.extend_from_slice(key);
                out.push(b' ');
                write_object(out, value)?;
                out.push(b' ');
            }
            out.extend_from_slice(b">>");
        }
        other => {
            return Err(BildwerkError::PdfError(format!(
                "cannot write {other:?} in an inline image header"
            )));
        }
    }
    Ok(())
}
