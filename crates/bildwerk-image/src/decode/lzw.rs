// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Variable-width LZW decoding for GIF (LSB-first codes) and TIFF (MSB-first
// codes with early change).

use bildwerk_core::error::{BildwerkError, Result};
use tracing::trace;

const MAX_CODE_BITS: u8 = 12;
const TABLE_SIZE: usize = 1 << MAX_CODE_BITS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitOrder {
    /// GIF packs codes starting at the least significant bit.
    Lsb,
    /// TIFF packs codes starting at the most significant bit.
    Msb,
}

/// LZW decoder configuration.
#[derive(Debug, Clone, Copy)]
pub struct LzwDecoder {
    order: BitOrder,
    min_code_size: u8,
    /// TIFF widens codes one entry early.
    early_change: bool,
}

impl LzwDecoder {
    /// GIF flavour for the given minimum code size (2..=8 in practice).
    pub fn gif(min_code_size: u8) -> Result<Self> {
        if !(1..=11).contains(&min_code_size) {
            return Err(BildwerkError::CorruptFormat(format!(
                "LZW minimum code size {min_code_size}"
            )));
        }
        Ok(Self {
            order: BitOrder::Lsb,
            min_code_size,
            early_change: false,
        })
    }

    /// TIFF flavour: 8-bit alphabet, MSB-first, early change.
    pub fn tiff() -> Self {
        Self {
            order: BitOrder::Msb,
            min_code_size: 8,
            early_change: true,
        }
    }

    /// Decode up to `limit` bytes. Decoding stops at the end code, at the
    /// limit, or when the input runs out.
    pub fn decode(&self, input: &[u8], limit: usize) -> Result<Vec<u8>> {
        let clear = 1u16 << self.min_code_size;
        let end = clear + 1;
        let first_free = end + 1;
        let initial_width = self.min_code_size + 1;
        let early = u16::from(self.early_change);

        let mut prefix = vec![0u16; TABLE_SIZE];
        let mut suffix = vec![0u8; TABLE_SIZE];
        let mut first = vec![0u8; TABLE_SIZE];
        let mut length = vec![0u16; TABLE_SIZE];
        for code in 0..clear as usize {
            suffix[code] = code as u8;
            first[code] = code as u8;
            length[code] = 1;
        }

        let mut out = Vec::new();
        out.try_reserve(limit.min(1 << 24))
            .map_err(|_| BildwerkError::exhausted("LZW output", limit))?;

        let mut bits = BitReader::new(input, self.order);
        let mut width = initial_width;
        let mut next = first_free;
        let mut prev: Option<u16> = None;

        while out.len() < limit {
            let Some(code) = bits.read(width) else {
                trace!("LZW input exhausted before end code");
                break;
            };
            if code == clear {
                width = initial_width;
                next = first_free;
                prev = None;
                continue;
            }
            if code == end {
                break;
            }

            let known = code < clear || (code > end && code < next);
            match prev {
                Some(p) if known => {
                    emit(&mut out, code, &prefix, &suffix, &length);
                    if (next as usize) < TABLE_SIZE {
                        let head = first[code as usize];
                        add(&mut prefix, &mut suffix, &mut first, &mut length, next, p, head);
                        next += 1;
                    }
                }
                Some(p) if code == next && (next as usize) < TABLE_SIZE => {
                    let head = first[p as usize];
                    add(&mut prefix, &mut suffix, &mut first, &mut length, next, p, head);
                    next += 1;
                    emit(&mut out, code, &prefix, &suffix, &length);
                }
                None if code < clear => out.push(code as u8),
                _ => {
                    return Err(BildwerkError::CorruptFormat(format!(
                        "invalid LZW code {code} (next free {next})"
                    )));
                }
            }
            prev = Some(code);

            if next + early >= (1 << width) && width < MAX_CODE_BITS {
                width += 1;
            }
        }

        out.truncate(limit);
        Ok(out)
    }
}

fn add(
    prefix: &mut [u16],
    suffix: &mut [u8],
    first: &mut [u8],
    length: &mut [u16],
    code: u16,
    parent: u16,
    last: u8,
) {
    let (c, p) = (code as usize, parent as usize);
    prefix[c] = parent;
    suffix[c] = last;
    first[c] = first[p];
    length[c] = length[p] + 1;
}

fn emit(out: &mut Vec<u8>, code: u16, prefix: &[u16], suffix: &[u8], length: &[u16]) {
    let len = length[code as usize] as usize;
    let start = out.len();
    out.resize(start + len, 0);
    let mut cur = code as usize;
    for slot in out[start..].iter_mut().rev() {
        *slot = suffix[cur];
        cur = prefix[cur] as usize;
    }
}

struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
    acc: u32,
    count: u8,
    order: BitOrder,
}

impl<'a> BitReader<'a> {
    fn new(data: &'a [u8], order: BitOrder) -> Self {
        Self {
            data,
            pos: 0,
            acc: 0,
            count: 0,
            order,
        }
    }

    fn read(&mut self, width: u8) -> Option<u16> {
        while self.count < width {
            let byte = *self.data.get(self.pos)? as u32;
            self.pos += 1;
            match self.order {
                BitOrder::Lsb => self.acc |= byte << self.count,
                BitOrder::Msb => self.acc = (self.acc << 8) | byte,
            }
            self.count += 8;
        }
        let mask = (1u32 << width) - 1;
        let code = match self.order {
            BitOrder::Lsb => {
                let code = self.acc & mask;
                self.acc >>= width;
                code
            }
            BitOrder::Msb => (self.acc >> (self.count - width)) & mask,
        };
        self.count -= width;
        if self.order == BitOrder::Msb {
            self.acc &= (1u32 << self.count) - 1;
        }
        Some(code as u16)
    }
}
