// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Format sniffer — identify a container from its leading bytes.

use bildwerk_core::error::{BildwerkError, Result};
use bildwerk_core::types::ContainerKind;
use tracing::{debug, instrument};

use crate::input::InputFile;

/// How far into a file a JPEG start-of-image marker may appear. Some
/// producers prepend wrapper bytes before the actual stream.
pub const JPEG_SEARCH_LIMIT: usize = 1024;

const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// Signature check order. JPEG comes last because its check scans instead of
/// matching a fixed prefix.
const SIGNATURES: [(ContainerKind, fn(&[u8]) -> bool); 5] = [
    (ContainerKind::Bmp, is_bmp),
    (ContainerKind::Gif, is_gif),
    (ContainerKind::Png, is_png),
    (ContainerKind::Tiff, is_tiff),
    (ContainerKind::Jpeg, is_jpeg),
];

/// Identify the container of `file`, leaving its position at the start.
///
/// Headerless formats (CCITT, raw) are never detected; they must be named
/// through the load options.
#[instrument(skip_all, fields(file = file.name()))]
pub fn sniff(file: &mut InputFile) -> Result<ContainerKind> {
    file.seek(0)?;
    let mut head = vec![0u8; JPEG_SEARCH_LIMIT];
    let mut filled = 0;
    while filled < head.len() {
        let n = file.read(&mut head[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    head.truncate(filled);
    file.seek(0)?;

    match SIGNATURES.iter().find(|(_, is_match)| is_match(&head)) {
        Some((kind, _)) => {
            debug!(%kind, "Sniffed container");
            Ok(*kind)
        }
        None => Err(BildwerkError::UnknownFormat(format!(
            "{}: no known signature",
            file.name()
        ))),
    }
}

/// Resolve the container kind: an explicit override wins, otherwise sniff.
pub fn detect(file: &mut InputFile, requested: Option<ContainerKind>) -> Result<ContainerKind> {
    match requested {
        Some(kind) => Ok(kind),
        None => sniff(file),
    }
}

pub fn is_png(head: &[u8]) -> bool {
    head.starts_with(&PNG_SIGNATURE)
}

pub fn is_gif(head: &[u8]) -> bool {
    head.starts_with(b"GIF87a") || head.starts_with(b"GIF89a")
}

pub fn is_tiff(head: &[u8]) -> bool {
    head.starts_with(b"II*\0") || head.starts_with(b"MM\0*")
}

pub fn is_bmp(head: &[u8]) -> bool {
    head.starts_with(b"BM")
}

pub fn is_jpeg(head: &[u8]) -> bool {
    find_jpeg_start(head).is_some()
}

/// Offset of the first SOI marker (`FF D8 FF`) within the search window.
pub fn find_jpeg_start(head: &[u8]) -> Option<usize> {
    let window = &head[..head.len().min(JPEG_SEARCH_LIMIT)];
    window
        .windows(3)
        .position(|w| w[0] == 0xFF && w[1] == 0xD8 && w[2] == 0xFF)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sniff_bytes(bytes: &[u8]) -> Result<ContainerKind> {
        sniff(&mut InputFile::from_bytes("input", bytes.to_vec()))
    }

    /// Every fixed signature maps to its container.
    #[test]
    fn recognises_signatures() {
        assert_eq!(sniff_bytes(&PNG_SIGNATURE).unwrap(), ContainerKind::Png);
        assert_eq!(sniff_bytes(b"GIF89a\x01\x00").unwrap(), ContainerKind::Gif);
        assert_eq!(sniff_bytes(b"II*\0\x08\0\0\0").unwrap(), ContainerKind::Tiff);
        assert_eq!(sniff_bytes(b"MM\0*\0\0\0\x08").unwrap(), ContainerKind::Tiff);
        assert_eq!(sniff_bytes(b"BM\0\0").unwrap(), ContainerKind::Bmp);
        assert_eq!(sniff_bytes(&[0xFF, 0xD8, 0xFF, 0xE0]).unwrap(), ContainerKind::Jpeg);
    }

    /// Signatures are tried BMP, GIF, PNG, TIFF, then the scanning JPEG check.
    #[test]
    fn signature_order() {
        let order: Vec<ContainerKind> = SIGNATURES.iter().map(|(kind, _)| *kind).collect();
        assert_eq!(
            order,
            vec![
                ContainerKind::Bmp,
                ContainerKind::Gif,
                ContainerKind::Png,
                ContainerKind::Tiff,
                ContainerKind::Jpeg,
            ]
        );
    }

    /// A JPEG stream behind a short wrapper is still found.
    #[test]
    fn finds_jpeg_after_leading_garbage() {
        let mut bytes = vec![0u8; 300];
        bytes.extend_from_slice(&[0xFF, 0xD8, 0xFF, 0xDB]);
        assert_eq!(sniff_bytes(&bytes).unwrap(), ContainerKind::Jpeg);
        assert_eq!(find_jpeg_start(&bytes), Some(300));
    }

    /// A marker beyond the search window does not count.
    #[test]
    fn jpeg_beyond_window_is_unknown() {
        let mut bytes = vec![0u8; JPEG_SEARCH_LIMIT + 10];
        bytes.extend_from_slice(&[0xFF, 0xD8, 0xFF, 0xDB]);
        assert!(matches!(sniff_bytes(&bytes), Err(BildwerkError::UnknownFormat(_))));
    }

    /// Empty and unrecognised input are both unknown.
    #[test]
    fn unknown_input() {
        assert!(matches!(sniff_bytes(b""), Err(BildwerkError::UnknownFormat(_))));
        assert!(matches!(sniff_bytes(b"%PDF-1.7"), Err(BildwerkError::UnknownFormat(_))));
    }

    /// Sniffing rewinds so the decoder starts at byte zero.
    #[test]
    fn sniff_rewinds() {
        let mut file = InputFile::from_bytes("input", b"GIF87a....".to_vec());
        sniff(&mut file).unwrap();
        assert_eq!(file.tell().unwrap(), 0);
    }

    /// An explicit format bypasses detection, which is how headerless data loads.
    #[test]
    fn override_wins() {
        let mut file = InputFile::from_bytes("fax.g4", vec![0x12, 0x34]);
        assert_eq!(detect(&mut file, Some(ContainerKind::Ccitt)).unwrap(), ContainerKind::Ccitt);
    }
}
