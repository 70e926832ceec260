// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// JPEG decoder — walk the marker segments up to the first scan, collect the
// frame geometry and resolution, then pass the compressed stream through
// untouched as DCTDecode data.

use bildwerk_core::error::{BildwerkError, Result};
use bildwerk_core::types::Compression;
use tracing::{debug, instrument};

use super::DecodeContext;
use crate::input::InputFile;
use crate::slot::{Container, ImageSlot, JpegInfo};
use crate::sniff::{JPEG_SEARCH_LIMIT, find_jpeg_start};
use crate::source::FileBlockSource;

const SOF0: u8 = 0xC0;
const SOF1: u8 = 0xC1;
const SOS: u8 = 0xDA;
const EOI: u8 = 0xD9;
const APP0: u8 = 0xE0;
const APP13: u8 = 0xED;
const APP14: u8 = 0xEE;

/// Photoshop image resource holding the resolution.
const RESOLUTION_INFO: u16 = 0x03ED;

#[derive(Debug, Clone, Copy)]
struct Frame {
    marker: u8,
    width: u16,
    height: u16,
    components: u8,
}

#[instrument(skip_all, fields(file = file.name()))]
pub fn decode(mut file: InputFile, _ctx: &DecodeContext<'_>, slot: &mut ImageSlot) -> Result<()> {
    let mut head = vec![0u8; JPEG_SEARCH_LIMIT.min(file.size() as usize)];
    file.seek(0)?;
    file.read_exact(&mut head)?;
    let start = find_jpeg_start(&head)
        .ok_or_else(|| BildwerkError::CorruptFormat("no JPEG start-of-image marker".into()))?
        as u64;
    file.seek(start + 2)?;

    let mut frame: Option<Frame> = None;
    let mut jfif_density: Option<(f64, f64)> = None;
    let mut photoshop_density: Option<(f64, f64)> = None;
    let mut adobe = false;

    loop {
        let marker = next_marker(&mut file)?;
        match marker {
            0x01 | 0xD0..=0xD8 => continue,
            EOI => {
                return Err(BildwerkError::CorruptFormat(
                    "JPEG ends before the first scan".into(),
                ));
            }
            _ => {}
        }

        let len = file.read_u16_be()?;
        if len < 2 {
            return Err(BildwerkError::CorruptFormat(format!(
                "JPEG segment 0x{marker:02X} length {len}"
            )));
        }
        let body = file.read_vec(len as usize - 2)?;

        match marker {
            APP0 => jfif_density = parse_jfif(&body).or(jfif_density),
            APP13 => photoshop_density = parse_photoshop(&body).or(photoshop_density),
            APP14 => adobe |= body.starts_with(b"Adobe"),
            SOF0 | SOF1 => frame = Some(parse_frame(marker, &body)?),
            0xC2 | 0xC3 | 0xC5..=0xC7 | 0xC9..=0xCB | 0xCD..=0xCF => {
                return Err(BildwerkError::UnsupportedEncoding(format!(
                    "JPEG {} frames",
                    process_name(marker)
                )));
            }
            SOS => {
                let frame = frame.ok_or_else(|| {
                    BildwerkError::CorruptFormat("JPEG scan before frame header".into())
                })?;
                let scan_components = body.first().copied().unwrap_or(0);
                if scan_components < frame.components {
                    return Err(BildwerkError::UnsupportedEncoding(format!(
                        "multi-scan JPEG ({scan_components} of {} components in first scan)",
                        frame.components
                    )));
                }
                return finish(file, slot, start, frame, adobe, jfif_density.or(photoshop_density));
            }
            _ => {}
        }
    }
}

fn finish(
    file: InputFile,
    slot: &mut ImageSlot,
    start: u64,
    frame: Frame,
    adobe: bool,
    density: Option<(f64, f64)>,
) -> Result<()> {
    slot.container = Container::Jpeg(JpegInfo {
        start,
        adobe,
        frame_marker: frame.marker,
    });
    slot.width = frame.width as u32;
    slot.height = frame.height as i32;
    slot.bpc = 8;
    slot.components = frame.components;
    slot.compression = Compression::Dct;
    slot.use_raw = true;
    // Adobe writes CMYK JPEGs with inverted samples.
    if adobe && frame.components == 4 {
        slot.invert = !slot.invert;
    }
    if let Some((x, y)) = density {
        slot.dpi_x = x;
        slot.dpi_y = y;
    }
    debug!(?frame, adobe, ?density, start, "JPEG frame parsed");
    slot.set_single_source(Box::new(FileBlockSource::to_end(file, start)));
    Ok(())
}

fn next_marker(file: &mut InputFile) -> Result<u8> {
    let mut byte = file.read_u8()?;
    if byte != 0xFF {
        return Err(BildwerkError::CorruptFormat(format!(
            "expected JPEG marker, found 0x{byte:02X}"
        )));
    }
    while byte == 0xFF {
        byte = file.read_u8()?;
    }
    Ok(byte)
}

fn parse_frame(marker: u8, body: &[u8]) -> Result<Frame> {
    if body.len() < 6 {
        return Err(BildwerkError::CorruptFormat("short JPEG frame header".into()));
    }
    let precision = body[0];
    let height = u16::from_be_bytes([body[1], body[2]]);
    let width = u16::from_be_bytes([body[3], body[4]]);
    let components = body[5];

    if precision != 8 {
        return Err(BildwerkError::UnsupportedEncoding(format!(
            "{precision}-bit JPEG samples"
        )));
    }
    if height == 0 {
        return Err(BildwerkError::UnsupportedEncoding(
            "JPEG height defined by DNL marker".into(),
        ));
    }
    if width == 0 {
        return Err(BildwerkError::CorruptFormat("JPEG width 0".into()));
    }
    if !matches!(components, 1 | 3 | 4) {
        return Err(BildwerkError::UnsupportedEncoding(format!(
            "JPEG with {components} components"
        )));
    }
    Ok(Frame {
        marker,
        width,
        height,
        components,
    })
}

/// JFIF APP0 density. Unit 0 only states the pixel aspect, which is kept as
/// negative values.
fn parse_jfif(body: &[u8]) -> Option<(f64, f64)> {
    if body.len() < 12 || !body.starts_with(b"JFIF\0") {
        return None;
    }
    let units = body[7];
    let x = u16::from_be_bytes([body[8], body[9]]) as f64;
    let y = u16::from_be_bytes([body[10], body[11]]) as f64;
    if x <= 0.0 || y <= 0.0 {
        return None;
    }
    match units {
        1 => Some((x, y)),
        2 => Some((x * 2.54, y * 2.54)),
        0 => Some((-x, -y)),
        _ => None,
    }
}

/// Resolution from a Photoshop APP13 image resource block.
fn parse_photoshop(body: &[u8]) -> Option<(f64, f64)> {
    let mut rest = body.strip_prefix(b"Photoshop 3.0\0")?;
    while rest.len() >= 12 && rest.starts_with(b"8BIM") {
        let id = u16::from_be_bytes([rest[4], rest[5]]);
        let name_len = rest[6] as usize;
        // Pascal name including its length byte, padded to even size.
        let name_total = (1 + name_len).next_multiple_of(2);
        let size_at = 6 + name_total;
        let size_bytes = rest.get(size_at..size_at + 4)?;
        let size = u32::from_be_bytes([size_bytes[0], size_bytes[1], size_bytes[2], size_bytes[3]])
            as usize;
        let data_at = size_at + 4;
        let data = rest.get(data_at..data_at + size)?;

        if id == RESOLUTION_INFO && data.len() >= 16 {
            let h = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as f64 / 65536.0;
            let h_unit = u16::from_be_bytes([data[4], data[5]]);
            let v = u32::from_be_bytes([data[8], data[9], data[10], data[11]]) as f64 / 65536.0;
            let v_unit = u16::from_be_bytes([data[12], data[13]]);
            if h <= 0.0 || v <= 0.0 {
                return None;
            }
            let h = if h_unit == 2 { h * 2.54 } else { h };
            let v = if v_unit == 2 { v * 2.54 } else { v };
            return Some((h, v));
        }
        rest = rest.get(data_at + size.next_multiple_of(2)..)?;
    }
    None
}

fn process_name(marker: u8) -> &'static str {
    match marker {
        0xC2 => "progressive",
        0xC3 => "lossless",
        0xC5..=0xC7 => "differential",
        0xC9..=0xCB | 0xCD..=0xCF => "arithmetic-coded",
        _ => "unknown",
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::source::drain;
    use bildwerk_core::config::{EngineConfig, ImageOptions};
    use bildwerk_core::types::ContainerKind;

    fn segment(marker: u8, body: &[u8]) -> Vec<u8> {
        let mut out = vec![0xFF, marker];
        out.extend_from_slice(&((body.len() + 2) as u16).to_be_bytes());
        out.extend_from_slice(body);
        out
    }

    /// A skeletal JPEG: SOI, optional extra segments, frame, scan, a few
    /// entropy-coded bytes and EOI.
    pub(crate) fn build_jpeg(
        sof: u8,
        width: u16,
        height: u16,
        components: u8,
        extra: &[Vec<u8>],
        scan_components: u8,
    ) -> Vec<u8> {
        let mut out = vec![0xFF, 0xD8];
        for seg in extra {
            out.extend_from_slice(seg);
        }
        let mut frame = vec![8];
        frame.extend_from_slice(&height.to_be_bytes());
        frame.extend_from_slice(&width.to_be_bytes());
        frame.push(components);
        for id in 1..=components {
            frame.extend_from_slice(&[id, 0x11, 0]);
        }
        out.extend(segment(sof, &frame));
        let mut scan = vec![scan_components];
        for id in 1..=scan_components {
            scan.extend_from_slice(&[id, 0]);
        }
        scan.extend_from_slice(&[0, 63, 0]);
        out.extend(segment(SOS, &scan));
        out.extend_from_slice(&[0x12, 0x34, 0xFF, 0x00, 0x56]);
        out.extend_from_slice(&[0xFF, EOI]);
        out
    }

    pub(crate) fn jfif(units: u8, x: u16, y: u16) -> Vec<u8> {
        let mut body = b"JFIF\0\x01\x02".to_vec();
        body.push(units);
        body.extend_from_slice(&x.to_be_bytes());
        body.extend_from_slice(&y.to_be_bytes());
        body.extend_from_slice(&[0, 0]);
        segment(APP0, &body)
    }

    fn load(bytes: Vec<u8>) -> Result<ImageSlot> {
        let options = ImageOptions::default();
        let config = EngineConfig::default();
        let ctx = DecodeContext { options: &options, config: &config };
        let mut slot = ImageSlot::new(ContainerKind::Jpeg, "test.jpg", &options);
        decode(InputFile::from_bytes("test.jpg", bytes), &ctx, &mut slot)?;
        Ok(slot)
    }

    /// Baseline frame geometry and JFIF density are picked up; the stream
    /// passes through byte for byte.
    #[test]
    fn baseline_passthrough() {
        let bytes = build_jpeg(SOF0, 640, 480, 3, &[jfif(1, 300, 150)], 3);
        let mut slot = load(bytes.clone()).unwrap();
        assert_eq!((slot.width, slot.height, slot.components), (640, 480, 3));
        assert_eq!(slot.compression, Compression::Dct);
        assert!(slot.use_raw);
        assert_eq!(slot.dpi(), (300.0, 150.0));
        assert_eq!(drain(slot.sources[0].as_mut()).unwrap(), bytes);
    }

    /// Density in dots per centimetre converts to inches.
    #[test]
    fn dpcm_density() {
        let slot = load(build_jpeg(SOF0, 8, 8, 1, &[jfif(2, 100, 100)], 1)).unwrap();
        assert!((slot.dpi_x - 254.0).abs() < 1e-9);
    }

    /// Aspect-only JFIF density is stored negative.
    #[test]
    fn aspect_only_density() {
        let slot = load(build_jpeg(SOF0, 8, 8, 1, &[jfif(0, 2, 1)], 1)).unwrap();
        assert_eq!(slot.dpi(), (-2.0, -1.0));
    }

    /// Photoshop resolution info is used when there is no JFIF header.
    #[test]
    fn photoshop_resolution() {
        let mut body = b"Photoshop 3.0\0".to_vec();
        body.extend_from_slice(b"8BIM");
        body.extend_from_slice(&RESOLUTION_INFO.to_be_bytes());
        body.extend_from_slice(&[0, 0]); // empty name, padded
        body.extend_from_slice(&16u32.to_be_bytes());
        body.extend_from_slice(&(72u32 << 16).to_be_bytes());
        body.extend_from_slice(&[0, 1, 0, 1]);
        body.extend_from_slice(&(144u32 << 16).to_be_bytes());
        body.extend_from_slice(&[0, 1, 0, 1]);
        let slot = load(build_jpeg(SOF1, 8, 8, 3, &[segment(APP13, &body)], 3)).unwrap();
        assert_eq!(slot.dpi(), (72.0, 144.0));
    }

    /// Progressive frames are refused.
    #[test]
    fn progressive_unsupported() {
        assert!(matches!(
            load(build_jpeg(0xC2, 8, 8, 3, &[], 3)),
            Err(BildwerkError::UnsupportedEncoding(_))
        ));
    }

    /// A first scan covering only some components means a multi-scan file.
    #[test]
    fn multi_scan_unsupported() {
        assert!(matches!(
            load(build_jpeg(SOF0, 8, 8, 3, &[], 1)),
            Err(BildwerkError::UnsupportedEncoding(_))
        ));
    }

    /// Adobe CMYK files are marked inverted.
    #[test]
    fn adobe_cmyk_inverts() {
        let adobe = segment(APP14, b"Adobe\0\x64\0\0\0\0\x02");
        let slot = load(build_jpeg(SOF0, 8, 8, 4, &[adobe], 4)).unwrap();
        assert!(slot.invert);
        assert!(matches!(slot.container, Container::Jpeg(JpegInfo { adobe: true, .. })));
    }

    /// Leading wrapper bytes are skipped and excluded from the passthrough.
    #[test]
    fn leading_garbage_skipped() {
        let jpeg = build_jpeg(SOF0, 4, 4, 1, &[], 1);
        let mut bytes = vec![0xAB; 128];
        bytes.extend_from_slice(&jpeg);
        let mut slot = load(bytes).unwrap();
        assert!(matches!(slot.container, Container::Jpeg(JpegInfo { start: 128, .. })));
        assert_eq!(drain(slot.sources[0].as_mut()).unwrap(), jpeg);
    }

    /// A file that ends before any scan is corrupt.
    #[test]
    fn truncated_header() {
        let bytes = vec![0xFF, 0xD8, 0xFF, APP0, 0x00];
        assert!(matches!(load(bytes), Err(BildwerkError::CorruptFormat(_))));
    }
}
