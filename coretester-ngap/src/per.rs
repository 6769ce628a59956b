//! Aligned PER (ITU-T X.691) subset
//!
//! Covers the constructs NGAP needs: constrained whole numbers, length
//! determinants without fragmentation, fixed and sized octet/bit strings,
//! enumerations and choices with extension markers, sequence preambles,
//! PrintableString and open types. Values are written MSB first into a
//! `bitvec` buffer; alignment pads with zero bits.

use bitvec::prelude::*;
use thiserror::Error;

/// Upper bound below which lengths are encoded without fragmentation.
const FRAGMENT_LIMIT: usize = 16384;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PerError {
    #[error("Unexpected end of data: needed {needed} bits, {remaining} remaining")]
    EndOfData { needed: usize, remaining: usize },

    #[error("Value {value} outside {lb}..={ub}")]
    ValueOutOfRange { value: u64, lb: u64, ub: u64 },

    #[error("Length {length} not allowed for {what}")]
    InvalidLength { what: &'static str, length: usize },

    #[error("Fragmented encoding not supported (length {0})")]
    Fragmented(usize),

    #[error("Extension present in {0}, not supported")]
    UnsupportedExtension(&'static str),

    #[error("Invalid {what}: {detail}")]
    Invalid { what: &'static str, detail: String },
}

pub type PerResult<T> = Result<T, PerError>;

/// Bits needed to encode values `0..range`.
fn bits_for_range(range: u64) -> usize {
    if range <= 1 {
        0
    } else {
        (64 - (range - 1).leading_zeros()) as usize
    }
}

/// Octets needed for `value` (at least one).
fn octets_for(value: u64) -> usize {
    (((64 - value.leading_zeros()) as usize).div_ceil(8)).max(1)
}

#[derive(Debug, Default, Clone)]
pub struct PerEncoder {
    bits: BitVec<u8, Msb0>,
}

impl PerEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bit_len(&self) -> usize {
        self.bits.len()
    }

    pub fn put_bit(&mut self, bit: bool) {
        self.bits.push(bit);
    }

    /// Writes the low `n` bits of `value`, most significant first.
    pub fn put_bits(&mut self, value: u64, n: usize) {
        for i in (0..n).rev() {
            self.bits.push((value >> i) & 1 == 1);
        }
    }

    pub fn align(&mut self) {
        let pad = (8 - self.bits.len() % 8) % 8;
        for _ in 0..pad {
            self.bits.push(false);
        }
    }

    pub fn put_octets(&mut self, octets: &[u8]) {
        self.bits.extend_from_bitslice(octets.view_bits::<Msb0>());
    }

    /// Constrained whole number `lb..=ub` (10.5.7).
    pub fn put_constrained(&mut self, value: u64, lb: u64, ub: u64) -> PerResult<()> {
        if value < lb || value > ub {
            return Err(PerError::ValueOutOfRange { value, lb, ub });
        }
        let range = ub - lb + 1;
        let offset = value - lb;
        match range {
            1 => {}
            2..=255 => self.put_bits(offset, bits_for_range(range)),
            256 => {
                self.align();
                self.put_bits(offset, 8);
            }
            257..=65536 => {
                self.align();
                self.put_bits(offset, 16);
            }
            _ => {
                let max_octets = octets_for(ub - lb);
                let n = octets_for(offset);
                self.put_bits((n - 1) as u64, bits_for_range(max_octets as u64));
                self.align();
                self.put_bits(offset, n * 8);
            }
        }
        Ok(())
    }

    /// Unconstrained length determinant (10.9.3.6 - 10.9.3.7).
    pub fn put_length(&mut self, length: usize) -> PerResult<()> {
        self.align();
        if length < 128 {
            self.put_bits(length as u64, 8);
        } else if length < FRAGMENT_LIMIT {
            self.put_bits(0x8000 | length as u64, 16);
        } else {
            return Err(PerError::Fragmented(length));
        }
        Ok(())
    }

    /// Length of a component constrained to `lb..=ub`.
    pub fn put_constrained_length(&mut self, length: usize, lb: usize, ub: usize) -> PerResult<()> {
        if ub < 65536 {
            self.put_constrained(length as u64, lb as u64, ub as u64)
        } else {
            self.put_length(length)
        }
    }

    /// Extension bit followed by the optional-component bitmap of a SEQUENCE.
    pub fn put_sequence_preamble(&mut self, extensible: bool, optionals: &[bool]) {
        if extensible {
            self.put_bit(false);
        }
        for &present in optionals {
            self.put_bit(present);
        }
    }

    /// CHOICE index among `count` root alternatives.
    pub fn put_choice(&mut self, index: usize, count: usize, extensible: bool) -> PerResult<()> {
        if extensible {
            self.put_bit(false);
        }
        self.put_constrained(index as u64, 0, count as u64 - 1)
    }

    /// ENUMERATED value; indices at or beyond `root` go to the extension.
    pub fn put_enumerated(&mut self, index: usize, root: usize, extensible: bool) -> PerResult<()> {
        if index < root {
            if extensible {
                self.put_bit(false);
            }
            return self.put_constrained(index as u64, 0, root as u64 - 1);
        }
        if !extensible {
            return Err(PerError::ValueOutOfRange {
                value: index as u64,
                lb: 0,
                ub: root as u64 - 1,
            });
        }
        self.put_bit(true);
        self.put_small_number((index - root) as u64)
    }

    /// Normally small non-negative whole number (10.6).
    pub fn put_small_number(&mut self, value: u64) -> PerResult<()> {
        if value < 64 {
            self.put_bit(false);
            self.put_bits(value, 6);
            Ok(())
        } else {
            self.put_bit(true);
            let n = octets_for(value);
            self.put_length(n)?;
            self.put_bits(value, n * 8);
            Ok(())
        }
    }

    /// INTEGER in `lb..=ub`, optionally with an extension marker.
    pub fn put_integer(&mut self, value: u64, lb: u64, ub: u64, extensible: bool) -> PerResult<()> {
        if extensible {
            self.put_bit(false);
        }
        self.put_constrained(value, lb, ub)
    }

    /// OCTET STRING with size `lb..=ub` (equal bounds mean fixed size).
    pub fn put_octet_string(&mut self, value: &[u8], lb: usize, ub: usize, extensible: bool) -> PerResult<()> {
        let len = value.len();
        if len < lb || len > ub {
            return Err(PerError::InvalidLength {
                what: "OCTET STRING",
                length: len,
            });
        }
        if extensible {
            self.put_bit(false);
        }
        if lb == ub {
            if len > 2 {
                self.align();
            }
        } else {
            self.put_constrained_length(len, lb, ub)?;
            if len > 0 {
                self.align();
            }
        }
        self.put_octets(value);
        Ok(())
    }

    /// Unconstrained OCTET STRING.
    pub fn put_unbounded_octet_string(&mut self, value: &[u8]) -> PerResult<()> {
        self.put_length(value.len())?;
        self.put_octets(value);
        Ok(())
    }

    /// BIT STRING of `len` bits with size `lb..=ub`; `value` holds the bits
    /// left-aligned in its octets.
    pub fn put_bit_string(&mut self, value: &[u8], len: usize, lb: usize, ub: usize, extensible: bool) -> PerResult<()> {
        if len < lb || len > ub || value.len() * 8 < len {
            return Err(PerError::InvalidLength {
                what: "BIT STRING",
                length: len,
            });
        }
        if extensible {
            self.put_bit(false);
        }
        if lb == ub {
            if len > 16 {
                self.align();
            }
        } else {
            self.put_constrained_length(len, lb, ub)?;
            if len > 0 {
                self.align();
            }
        }
        self.bits.extend_from_bitslice(&value.view_bits::<Msb0>()[..len]);
        Ok(())
    }

    /// BIT STRING holding the low `len` bits of `value`.
    pub fn put_bit_string_u64(&mut self, value: u64, len: usize, lb: usize, ub: usize, extensible: bool) -> PerResult<()> {
        if len > 64 {
            return Err(PerError::InvalidLength {
                what: "BIT STRING",
                length: len,
            });
        }
        let shifted = if len == 0 { 0 } else { value << (64 - len) };
        self.put_bit_string(&shifted.to_be_bytes(), len, lb, ub, extensible)
    }

    /// PrintableString with size `lb..=ub`; aligned PER uses 8 bits per character.
    pub fn put_printable_string(&mut self, value: &str, lb: usize, ub: usize, extensible: bool) -> PerResult<()> {
        if !value.bytes().all(is_printable) {
            return Err(PerError::Invalid {
                what: "PrintableString",
                detail: value.to_string(),
            });
        }
        let len = value.len();
        if len < lb || len > ub {
            return Err(PerError::InvalidLength {
                what: "PrintableString",
                length: len,
            });
        }
        if extensible {
            self.put_bit(false);
        }
        self.put_constrained_length(len, lb, ub)?;
        if ub * 8 > 16 {
            self.align();
        }
        self.put_octets(value.as_bytes());
        Ok(())
    }

    /// Open type: the complete encoding of an inner value as a length-prefixed octet string.
    pub fn put_open_type(&mut self, inner: &[u8]) -> PerResult<()> {
        self.put_unbounded_octet_string(inner)
    }

    /// Encodes a value with `f` and writes it as an open type.
    pub fn put_open_with<F>(&mut self, f: F) -> PerResult<()>
    where
        F: FnOnce(&mut PerEncoder) -> PerResult<()>,
    {
        let mut inner = PerEncoder::new();
        f(&mut inner)?;
        self.put_open_type(&inner.finish())
    }

    /// Completes the encoding; an empty value still takes one octet.
    pub fn finish(mut self) -> Vec<u8> {
        if self.bits.is_empty() {
            return vec![0];
        }
        self.align();
        self.bits.into_vec()
    }
}

fn is_printable(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b" '()+,-./:=?".contains(&b)
}

#[derive(Debug, Clone)]
pub struct PerDecoder<'a> {
    bits: &'a BitSlice<u8, Msb0>,
    pos: usize,
}

impl<'a> PerDecoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            bits: data.view_bits::<Msb0>(),
            pos: 0,
        }
    }

    pub fn remaining(&self) -> usize {
        self.bits.len() - self.pos
    }

    fn need(&self, n: usize) -> PerResult<()> {
        if self.remaining() < n {
            return Err(PerError::EndOfData {
                needed: n,
                remaining: self.remaining(),
            });
        }
        Ok(())
    }

    pub fn get_bit(&mut self) -> PerResult<bool> {
        self.need(1)?;
        let bit = self.bits[self.pos];
        self.pos += 1;
        Ok(bit)
    }

    pub fn get_bits(&mut self, n: usize) -> PerResult<u64> {
        if n > 64 {
            return Err(PerError::Invalid {
                what: "bit field",
                detail: format!("{n} bits"),
            });
        }
        self.need(n)?;
        let value = self.bits[self.pos..self.pos + n]
            .iter()
            .fold(0u64, |acc, b| (acc << 1) | u64::from(*b));
        self.pos += n;
        Ok(value)
    }

    pub fn align(&mut self) {
        let pad = (8 - self.pos % 8) % 8;
        self.pos = (self.pos + pad).min(self.bits.len());
    }

    pub fn get_octets(&mut self, n: usize) -> PerResult<Vec<u8>> {
        self.need(n * 8)?;
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            out.push(self.get_bits(8)? as u8);
        }
        Ok(out)
    }

    pub fn get_constrained(&mut self, lb: u64, ub: u64) -> PerResult<u64> {
        let range = ub - lb + 1;
        let offset = match range {
            1 => 0,
            2..=255 => self.get_bits(bits_for_range(range))?,
            256 => {
                self.align();
                self.get_bits(8)?
            }
            257..=65536 => {
                self.align();
                self.get_bits(16)?
            }
            _ => {
                let max_octets = octets_for(ub - lb);
                let n = self.get_bits(bits_for_range(max_octets as u64))? as usize + 1;
                self.align();
                self.get_bits(n * 8)?
            }
        };
        let value = lb + offset;
        if value > ub {
            return Err(PerError::ValueOutOfRange { value, lb, ub });
        }
        Ok(value)
    }

    pub fn get_length(&mut self) -> PerResult<usize> {
        self.align();
        let first = self.get_bits(8)? as usize;
        if first & 0x80 == 0 {
            Ok(first)
        } else if first & 0x40 == 0 {
            let second = self.get_bits(8)? as usize;
            Ok(((first & 0x3F) << 8) | second)
        } else {
            Err(PerError::Fragmented(first))
        }
    }

    pub fn get_constrained_length(&mut self, lb: usize, ub: usize) -> PerResult<usize> {
        if ub < 65536 {
            Ok(self.get_constrained(lb as u64, ub as u64)? as usize)
        } else {
            self.get_length()
        }
    }

    /// Reads the preamble, returning the optional-component bitmap.
    /// A set extension bit is rejected; NGAP peers do not send extension
    /// additions for the types modelled here.
    pub fn get_sequence_preamble(&mut self, extensible: bool, optionals: usize, what: &'static str) -> PerResult<Vec<bool>> {
        if extensible && self.get_bit()? {
            return Err(PerError::UnsupportedExtension(what));
        }
        (0..optionals).map(|_| self.get_bit()).collect()
    }

    pub fn get_choice(&mut self, count: usize, extensible: bool, what: &'static str) -> PerResult<usize> {
        if extensible && self.get_bit()? {
            return Err(PerError::UnsupportedExtension(what));
        }
        Ok(self.get_constrained(0, count as u64 - 1)? as usize)
    }

    /// ENUMERATED index; extension values come back as `root + n`.
    pub fn get_enumerated(&mut self, root: usize, extensible: bool) -> PerResult<usize> {
        if extensible && self.get_bit()? {
            return Ok(root + self.get_small_number()? as usize);
        }
        Ok(self.get_constrained(0, root as u64 - 1)? as usize)
    }

    pub fn get_small_number(&mut self) -> PerResult<u64> {
        if !self.get_bit()? {
            return self.get_bits(6);
        }
        let n = self.get_length()?;
        self.get_bits(n * 8)
    }

    pub fn get_integer(&mut self, lb: u64, ub: u64, extensible: bool, what: &'static str) -> PerResult<u64> {
        if extensible && self.get_bit()? {
            return Err(PerError::UnsupportedExtension(what));
        }
        self.get_constrained(lb, ub)
    }

    pub fn get_octet_string(&mut self, lb: usize, ub: usize, extensible: bool) -> PerResult<Vec<u8>> {
        if extensible && self.get_bit()? {
            let len = self.get_length()?;
            return self.get_octets(len);
        }
        let len = if lb == ub {
            if lb > 2 {
                self.align();
            }
            lb
        } else {
            let len = self.get_constrained_length(lb, ub)?;
            if len > 0 {
                self.align();
            }
            len
        };
        self.get_octets(len)
    }

    pub fn get_unbounded_octet_string(&mut self) -> PerResult<Vec<u8>> {
        let len = self.get_length()?;
        self.get_octets(len)
    }

    /// Returns the bits left-aligned in octets together with the bit length.
    pub fn get_bit_string(&mut self, lb: usize, ub: usize, extensible: bool) -> PerResult<(Vec<u8>, usize)> {
        let len = if extensible && self.get_bit()? {
            self.get_length()?
        } else if lb == ub {
            if lb > 16 {
                self.align();
            }
            lb
        } else {
            let len = self.get_constrained_length(lb, ub)?;
            if len > 0 {
                self.align();
            }
            len
        };
        self.need(len)?;
        let mut out: BitVec<u8, Msb0> = BitVec::with_capacity(len);
        out.extend_from_bitslice(&self.bits[self.pos..self.pos + len]);
        self.pos += len;
        Ok((out.into_vec(), len))
    }

    /// BIT STRING of at most 64 bits as an integer.
    pub fn get_bit_string_u64(&mut self, lb: usize, ub: usize, extensible: bool) -> PerResult<(u64, usize)> {
        let (octets, len) = self.get_bit_string(lb, ub, extensible)?;
        if len > 64 {
            return Err(PerError::InvalidLength {
                what: "BIT STRING",
                length: len,
            });
        }
        let mut padded = [0u8; 8];
        padded[..octets.len()].copy_from_slice(&octets);
        let value = if len == 0 { 0 } else { u64::from_be_bytes(padded) >> (64 - len) };
        Ok((value, len))
    }

    pub fn get_printable_string(&mut self, lb: usize, ub: usize, extensible: bool) -> PerResult<String> {
        let len = if extensible && self.get_bit()? {
            self.get_length()?
        } else {
            self.get_constrained_length(lb, ub)?
        };
        if ub * 8 > 16 {
            self.align();
        }
        let octets = self.get_octets(len)?;
        String::from_utf8(octets).map_err(|e| PerError::Invalid {
            what: "PrintableString",
            detail: e.to_string(),
        })
    }

    pub fn get_open_type(&mut self) -> PerResult<Vec<u8>> {
        self.get_unbounded_octet_string()
    }

    /// Reads an open type and decodes its contents with `f`.
    pub fn get_open_with<T, F>(&mut self, f: F) -> PerResult<T>
    where
        F: FnOnce(&mut PerDecoder<'_>) -> PerResult<T>,
    {
        let inner = self.get_open_type()?;
        f(&mut PerDecoder::new(&inner))
    }
}
