// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Colour space resolution — map decoded component counts and palettes onto
// device or registered colour spaces.

use bildwerk_core::error::{BildwerkError, Result};
use bildwerk_core::types::{CsHandle, DeviceColorspace};
use lopdf::Object;
use tracing::{debug, instrument};

/// Colour space an image is drawn in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Colorspace {
    Device(DeviceColorspace),
    /// Entry in the colour space table (palettes, caller-registered spaces).
    Registered(CsHandle),
}

impl Default for Colorspace {
    fn default() -> Self {
        Self::Device(DeviceColorspace::Gray)
    }
}

/// Palette as read from the file, before registration.
#[derive(Debug, Clone, PartialEq)]
pub struct RawPalette {
    /// RGB entries at `precision` bits per channel.
    pub entries: Vec<[u16; 3]>,
    /// 8 or 16.
    pub precision: u8,
    /// Entries the file header says the palette holds.
    pub required: usize,
}

impl RawPalette {
    pub fn new(entries: Vec<[u16; 3]>, precision: u8, required: usize) -> Self {
        Self {
            entries,
            precision,
            required,
        }
    }

    /// Palette that must cover every index a `bpc`-bit sample can hold.
    pub fn for_depth(entries: Vec<[u16; 3]>, precision: u8, bpc: u8) -> Self {
        Self::new(entries, precision, 1usize << bpc.min(8))
    }

    /// Build from packed 8-bit RGB triplets.
    pub fn from_rgb8(triplets: &[u8], required: usize) -> Self {
        let entries = triplets
            .chunks_exact(3)
            .map(|c| [c[0] as u16, c[1] as u16, c[2] as u16])
            .collect();
        Self::new(entries, 8, required)
    }
}

/// Colour space definitions held by the table.
#[derive(Debug, Clone, PartialEq)]
pub enum ColorspaceDescriptor {
    Device(DeviceColorspace),
    Indexed {
        base: DeviceColorspace,
        hival: u8,
        /// `(hival + 1) * base.components()` bytes.
        lookup: Vec<u8>,
    },
    /// A caller-built colour space object (ICC-based, separation, ...).
    Opaque { object: Object, components: u8 },
}

impl ColorspaceDescriptor {
    /// Components per sample of an image drawn in this space.
    pub fn components(&self) -> u8 {
        match self {
            Self::Device(device) => device.components(),
            Self::Indexed { .. } => 1,
            Self::Opaque { components, .. } => *components,
        }
    }
}

/// Storage for colour spaces shared across images.
pub trait ColorspaceTable {
    fn register(&mut self, descriptor: ColorspaceDescriptor) -> CsHandle;
    fn lookup(&self, handle: CsHandle) -> Option<&ColorspaceDescriptor>;
}

/// Vec-backed colour space table.
#[derive(Debug, Default)]
pub struct ColorspaceRegistry {
    entries: Vec<ColorspaceDescriptor>,
}

impl ColorspaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ColorspaceTable for ColorspaceRegistry {
    fn register(&mut self, descriptor: ColorspaceDescriptor) -> CsHandle {
        self.entries.push(descriptor);
        CsHandle((self.entries.len() - 1) as u32)
    }

    fn lookup(&self, handle: CsHandle) -> Option<&ColorspaceDescriptor> {
        self.entries.get(handle.0 as usize)
    }
}

/// Look up a registered handle or fail with `InvalidHandle`.
pub fn descriptor(table: &dyn ColorspaceTable, handle: CsHandle) -> Result<&ColorspaceDescriptor> {
    table
        .lookup(handle)
        .ok_or_else(|| BildwerkError::InvalidHandle(format!("{handle} is not registered")))
}

/// Components per sample for `colorspace`.
pub fn components_of(table: &dyn ColorspaceTable, colorspace: Colorspace) -> Result<u8> {
    match colorspace {
        Colorspace::Device(device) => Ok(device.components()),
        Colorspace::Registered(handle) => Ok(descriptor(table, handle)?.components()),
    }
}

pub fn is_indexed(table: &dyn ColorspaceTable, colorspace: Colorspace) -> bool {
    match colorspace {
        Colorspace::Device(_) => false,
        Colorspace::Registered(handle) => {
            matches!(table.lookup(handle), Some(ColorspaceDescriptor::Indexed { .. }))
        }
    }
}

/// Resolve the colour space of a decoded image.
///
/// With a palette the image becomes indexed over RGB and the palette is
/// registered with `table`; 16-bit palette channels are rescaled to 8 bits.
/// Without one, 1/3/4 components map to gray/RGB/CMYK.
#[instrument(skip(table, palette), fields(has_palette = palette.is_some()))]
pub fn resolve(
    table: &mut dyn ColorspaceTable,
    components: u8,
    bpc: u8,
    palette: Option<RawPalette>,
) -> Result<Colorspace> {
    let Some(palette) = palette else {
        return DeviceColorspace::from_components(components)
            .map(Colorspace::Device)
            .ok_or_else(|| {
                BildwerkError::UnsupportedEncoding(format!(
                    "{components} colour components per pixel"
                ))
            });
    };

    if components != 1 {
        return Err(BildwerkError::CorruptFormat(format!(
            "palette given for {components}-component samples"
        )));
    }
    if bpc > 8 {
        return Err(BildwerkError::UnsupportedEncoding(format!(
            "{bpc}-bit palette indices"
        )));
    }
    if palette.entries.is_empty() || palette.entries.len() < palette.required {
        return Err(BildwerkError::CorruptFormat(format!(
            "palette holds {} entries, {} required",
            palette.entries.len(),
            palette.required
        )));
    }

    let usable = palette.entries.len().min(1usize << bpc);
    let mut lookup = Vec::new();
    lookup
        .try_reserve_exact(usable * 3)
        .map_err(|_| BildwerkError::exhausted("palette", usable * 3))?;
    for entry in &palette.entries[..usable] {
        for channel in entry {
            lookup.push(scale_channel(*channel, palette.precision));
        }
    }

    let handle = table.register(ColorspaceDescriptor::Indexed {
        base: DeviceColorspace::Rgb,
        hival: (usable - 1) as u8,
        lookup,
    });
    debug!(%handle, entries = usable, "Registered indexed colour space");
    Ok(Colorspace::Registered(handle))
}

fn scale_channel(value: u16, precision: u8) -> u8 {
    if precision > 8 {
        ((value as u32 * 255 + 32767) / 65535) as u8
    } else {
        value.min(255) as u8
    }
}
