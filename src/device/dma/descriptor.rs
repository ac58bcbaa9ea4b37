//! Descriptor codec.
//!
//! Descriptors are little-endian 32-bit words in memory. Both layouts share
//! a four-word header; the 2D layout appends four more words.
//!
//! ```text
//! word  bits    field
//! ────  ──────  ─────────────────────────────────────────
//!  0    31:0    next descriptor pointer (0 ends the chain)
//!  1    31      done
//!       30      order
//!       29      source bypass
//!       28      destination bypass
//!       27      source DLBC
//!       26      destination DLBC
//!       25:24   type (0 = linear, 1 = 2D)
//!       23:0    length (linear only)
//!  2    31:0    source address
//!  3    31:0    destination address
//! ──── 2D only ───────────────────────────────────────────
//!  4    31:28   transform
//!       25:24   allocation
//!  5    15:0    ROI width         31:16  ROI height
//!  6    15:0    source stride     31:16  destination stride
//!  7    15:0    source offset     31:16  destination offset
//! ```
//!
//! Validation runs in hardware priority order: alignment, then DLBC
//! legality, then the 2D region-of-interest shape.

use byteorder::{ByteOrder, LittleEndian};
use smallvec::SmallVec;
use thiserror::Error;

use super::FaultReason;

/// Encoded size of a linear descriptor.
pub const LINEAR_SIZE: usize = 16;

/// Encoded size of a 2D descriptor.
pub const TWO_D_SIZE: usize = 32;

/// Required alignment of a linear descriptor.
pub const LINEAR_ALIGN: u64 = 16;

/// Required alignment of a 2D descriptor.
pub const TWO_D_ALIGN: u64 = 32;

/// DLBC works on whole 256-byte blocks.
pub const DLBC_BLOCK: u32 = 256;

pub const TYPE_LINEAR: u32 = 0;
pub const TYPE_2D: u32 = 1;

const DONE_SHIFT: u32 = 31;
const ORDER_SHIFT: u32 = 30;
const SRC_BYPASS_SHIFT: u32 = 29;
const DST_BYPASS_SHIFT: u32 = 28;
const SRC_DLBC_SHIFT: u32 = 27;
const DST_DLBC_SHIFT: u32 = 26;
const TYPE_SHIFT: u32 = 24;
const TYPE_MASK: u32 = 0x3;
const LENGTH_MASK: u32 = 0x00FF_FFFF;

const TRANSFORM_SHIFT: u32 = 28;
const TRANSFORM_MASK: u32 = 0xF;
const ALLOCATION_SHIFT: u32 = 24;
const ALLOCATION_MASK: u32 = 0x3;

const LOW_HALF_MASK: u32 = 0xFFFF;
const HIGH_HALF_SHIFT: u32 = 16;

#[inline]
fn flag(word: u32, shift: u32) -> bool {
    (word >> shift) & 1 != 0
}

#[inline]
fn low_half(word: u32) -> u16 {
    (word & LOW_HALF_MASK) as u16
}

#[inline]
fn high_half(word: u32) -> u16 {
    (word >> HIGH_HALF_SHIFT) as u16
}

#[inline]
fn halves(low: u16, high: u16) -> u32 {
    (low as u32) | ((high as u32) << HIGH_HALF_SHIFT)
}

/// Byte reordering applied to 2D transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Transform {
    #[default]
    None = 0,
    /// Each byte becomes the upper half of a 16-bit element
    ExpandUpper = 1,
    /// Each byte becomes the lower half of a 16-bit element
    ExpandLower = 2,
    /// Keep the upper byte of each 16-bit element
    CompressUpper = 3,
    /// Keep the lower byte of each 16-bit element
    CompressLower = 4,
    /// Swap the bytes of each 16-bit element
    Swap = 5,
}

impl Transform {
    /// Decode the transform field. Reserved codes (6-15) move data untouched.
    pub fn from_bits(bits: u32) -> Self {
        match bits {
            1 => Self::ExpandUpper,
            2 => Self::ExpandLower,
            3 => Self::CompressUpper,
            4 => Self::CompressLower,
            5 => Self::Swap,
            _ => Self::None,
        }
    }

    #[inline]
    pub fn bits(self) -> u32 {
        self as u32
    }

    /// Destination width over source width, as (numerator, denominator).
    pub fn scale(self) -> (u32, u32) {
        match self {
            Self::ExpandUpper | Self::ExpandLower => (2, 1),
            Self::CompressUpper | Self::CompressLower => (1, 2),
            Self::None | Self::Swap => (1, 1),
        }
    }

    /// Width of a destination line holding `width` source bytes.
    pub fn scaled(self, width: u32) -> u32 {
        let (num, den) = self.scale();
        width * num / den
    }

    /// Fixed (read, write) step for transforms that reinterpret elements.
    ///
    /// These move exactly one 16-bit element per step.
    pub fn fixed_chunk(self) -> Option<(u32, u32)> {
        match self {
            Self::None => None,
            Self::ExpandUpper | Self::ExpandLower => Some((1, 2)),
            Self::CompressUpper | Self::CompressLower => Some((2, 1)),
            Self::Swap => Some((2, 2)),
        }
    }

    /// Any non-identity transform counts as a padding descriptor.
    pub fn is_padding(self) -> bool {
        self != Self::None
    }

    /// Copy `src` into `dst` through this transform.
    ///
    /// `dst` must be sized with [`Transform::scaled`]; extra bytes on either
    /// side are left untouched, except that swap clears an unpaired last
    /// destination byte.
    pub fn apply(self, src: &[u8], dst: &mut [u8]) {
        match self {
            Self::None => {
                let n = src.len().min(dst.len());
                dst[..n].copy_from_slice(&src[..n]);
            }
            Self::ExpandUpper => {
                for (out, &byte) in dst.chunks_exact_mut(2).zip(src) {
                    out[0] = 0;
                    out[1] = byte;
                }
            }
            Self::ExpandLower => {
                for (out, &byte) in dst.chunks_exact_mut(2).zip(src) {
                    out[0] = byte;
                    out[1] = 0;
                }
            }
            Self::CompressUpper => {
                for (out, pair) in dst.iter_mut().zip(src.chunks_exact(2)) {
                    *out = pair[1];
                }
            }
            Self::CompressLower => {
                for (out, pair) in dst.iter_mut().zip(src.chunks_exact(2)) {
                    *out = pair[0];
                }
            }
            Self::Swap => {
                for (out, pair) in dst.chunks_exact_mut(2).zip(src.chunks_exact(2)) {
                    out[0] = pair[1];
                    out[1] = pair[0];
                }
                // The last byte of an odd line has no partner and lands as zero
                if dst.len() % 2 == 1 {
                    if let Some(last) = dst.last_mut() {
                        *last = 0;
                    }
                }
            }
        }
    }
}

/// Fields shared by both layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DescriptorHeader {
    pub next: u32,
    pub done: bool,
    pub order: bool,
    pub src_bypass: bool,
    pub dst_bypass: bool,
    pub src_dlbc: bool,
    pub dst_dlbc: bool,
    pub src: u32,
    pub dst: u32,
}

/// Region-of-interest parameters of a 2D descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Region2d {
    pub transform: Transform,
    pub allocation: u8,
    /// Bytes per source line
    pub width: u16,
    /// Lines left to write
    pub height: u16,
    pub src_stride: u16,
    pub dst_stride: u16,
    /// Progress within the current source line
    pub src_width_offset: u16,
    /// Progress within the current destination line
    pub dst_width_offset: u16,
}

impl Region2d {
    /// A plain copy of `height` lines of `width` bytes.
    pub fn new(width: u16, height: u16, src_stride: u16, dst_stride: u16) -> Self {
        Self { width, height, src_stride, dst_stride, ..Default::default() }
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_offsets(mut self, src_width_offset: u16, dst_width_offset: u16) -> Self {
        self.src_width_offset = src_width_offset;
        self.dst_width_offset = dst_width_offset;
        self
    }
}

/// Layout-specific part of a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorKind {
    /// Type 0: a contiguous run of `length` bytes
    Linear { length: u32 },
    /// Type 1: a strided region of interest
    TwoD(Region2d),
}

impl Default for DescriptorKind {
    fn default() -> Self {
        Self::Linear { length: 0 }
    }
}

/// A descriptor as stored in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Descriptor {
    pub header: DescriptorHeader,
    pub kind: DescriptorKind,
}

impl Descriptor {
    /// A linear copy of `length` bytes.
    pub fn linear(src: u32, dst: u32, length: u32) -> Self {
        Self {
            header: DescriptorHeader { src, dst, ..Default::default() },
            kind: DescriptorKind::Linear { length: length & LENGTH_MASK },
        }
    }

    /// A 2D copy described by `region`.
    pub fn two_d(src: u32, dst: u32, region: Region2d) -> Self {
        Self {
            header: DescriptorHeader { src, dst, ..Default::default() },
            kind: DescriptorKind::TwoD(region),
        }
    }

    pub fn with_next(mut self, next: u32) -> Self {
        self.header.next = next;
        self
    }

    pub fn with_bypass(mut self, src: bool, dst: bool) -> Self {
        self.header.src_bypass = src;
        self.header.dst_bypass = dst;
        self
    }

    pub fn with_dlbc(mut self, src: bool, dst: bool) -> Self {
        self.header.src_dlbc = src;
        self.header.dst_dlbc = dst;
        self
    }

    pub fn with_order(mut self, order: bool) -> Self {
        self.header.order = order;
        self
    }

    pub fn is_2d(&self) -> bool {
        matches!(self.kind, DescriptorKind::TwoD(_))
    }

    pub fn type_bits(&self) -> u32 {
        match self.kind {
            DescriptorKind::Linear { .. } => TYPE_LINEAR,
            DescriptorKind::TwoD(_) => TYPE_2D,
        }
    }

    /// Size in memory.
    pub fn encoded_len(&self) -> usize {
        if self.is_2d() {
            TWO_D_SIZE
        } else {
            LINEAR_SIZE
        }
    }

    pub fn required_alignment(&self) -> u64 {
        if self.is_2d() {
            TWO_D_ALIGN
        } else {
            LINEAR_ALIGN
        }
    }

    /// The 2D region, if any.
    pub fn region(&self) -> Option<&Region2d> {
        match &self.kind {
            DescriptorKind::TwoD(region) => Some(region),
            DescriptorKind::Linear { .. } => None,
        }
    }

    /// Encode into words. Linear descriptors produce four words.
    pub fn words(&self) -> SmallVec<[u32; 8]> {
        let h = &self.header;
        let length = match self.kind {
            DescriptorKind::Linear { length } => length & LENGTH_MASK,
            DescriptorKind::TwoD(_) => 0,
        };
        let control = ((h.done as u32) << DONE_SHIFT)
            | ((h.order as u32) << ORDER_SHIFT)
            | ((h.src_bypass as u32) << SRC_BYPASS_SHIFT)
            | ((h.dst_bypass as u32) << DST_BYPASS_SHIFT)
            | ((h.src_dlbc as u32) << SRC_DLBC_SHIFT)
            | ((h.dst_dlbc as u32) << DST_DLBC_SHIFT)
            | (self.type_bits() << TYPE_SHIFT)
            | length;

        let mut words: SmallVec<[u32; 8]> = SmallVec::new();
        words.extend_from_slice(&[h.next, control, h.src, h.dst]);

        if let DescriptorKind::TwoD(r) = &self.kind {
            words.push(
                (r.transform.bits() << TRANSFORM_SHIFT)
                    | (((r.allocation as u32) & ALLOCATION_MASK) << ALLOCATION_SHIFT),
            );
            words.push(halves(r.width, r.height));
            words.push(halves(r.src_stride, r.dst_stride));
            words.push(halves(r.src_width_offset, r.dst_width_offset));
        }
        words
    }

    /// Encode into bytes ready to be stored in memory.
    pub fn to_bytes(&self) -> Vec<u8> {
        let words = self.words();
        let mut bytes = vec![0u8; words.len() * 4];
        LittleEndian::write_u32_into(&words, &mut bytes);
        bytes
    }

    /// Parse words without validating the shape.
    ///
    /// Needs four words for a linear descriptor and eight for a 2D one.
    pub fn from_words(words: &[u32]) -> Result<Self, DescriptorError> {
        if words.len() < 4 {
            return Err(DescriptorError::Truncated { got: words.len() * 4, needed: LINEAR_SIZE });
        }
        let control = words[1];
        let header = DescriptorHeader {
            next: words[0],
            done: flag(control, DONE_SHIFT),
            order: flag(control, ORDER_SHIFT),
            src_bypass: flag(control, SRC_BYPASS_SHIFT),
            dst_bypass: flag(control, DST_BYPASS_SHIFT),
            src_dlbc: flag(control, SRC_DLBC_SHIFT),
            dst_dlbc: flag(control, DST_DLBC_SHIFT),
            src: words[2],
            dst: words[3],
        };

        let kind = match (control >> TYPE_SHIFT) & TYPE_MASK {
            TYPE_LINEAR => DescriptorKind::Linear { length: control & LENGTH_MASK },
            TYPE_2D => {
                if words.len() < 8 {
                    return Err(DescriptorError::Truncated { got: words.len() * 4, needed: TWO_D_SIZE });
                }
                let transform = Transform::from_bits((words[4] >> TRANSFORM_SHIFT) & TRANSFORM_MASK);
                DescriptorKind::TwoD(Region2d {
                    transform,
                    allocation: ((words[4] >> ALLOCATION_SHIFT) & ALLOCATION_MASK) as u8,
                    width: low_half(words[5]),
                    height: high_half(words[5]),
                    src_stride: low_half(words[6]),
                    dst_stride: high_half(words[6]),
                    src_width_offset: low_half(words[7]),
                    dst_width_offset: high_half(words[7]),
                })
            }
            other => return Err(DescriptorError::InvalidType(other)),
        };

        Ok(Self { header, kind })
    }
}

impl std::fmt::Display for Descriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let h = &self.header;
        match &self.kind {
            DescriptorKind::Linear { length } => write!(f, "linear length={}", length)?,
            DescriptorKind::TwoD(_) => write!(f, "2d")?,
        }
        write!(
            f,
            " next=0x{:08x} src=0x{:08x} dst=0x{:08x} done={} order={} bypass={}/{} dlbc={}/{}",
            h.next, h.src, h.dst, h.done as u8, h.order as u8,
            h.src_bypass as u8, h.dst_bypass as u8, h.src_dlbc as u8, h.dst_dlbc as u8,
        )?;
        if let DescriptorKind::TwoD(r) = &self.kind {
            write!(
                f,
                " transform={:?} alloc={} width={} height={} stride={}/{} offset={}/{}",
                r.transform, r.allocation, r.width, r.height,
                r.src_stride, r.dst_stride, r.src_width_offset, r.dst_width_offset,
            )?;
        }
        Ok(())
    }
}

/// Reasons a descriptor is rejected before any byte moves.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DescriptorError {
    #[error("descriptor at pa 0x{pa:x} is not {required}-byte aligned")]
    Alignment { pa: u64, required: u64 },
    #[error("descriptor type {0} is not supported")]
    InvalidType(u32),
    #[error("unsupported DLBC configuration: {0}")]
    Compression(&'static str),
    #[error("region of interest error: {0}")]
    Roi(&'static str),
    #[error("descriptor buffer holds {got} bytes, {needed} required")]
    Truncated { got: usize, needed: usize },
}

impl DescriptorError {
    /// Syndrome reported for this failure.
    pub fn fault_reason(&self) -> FaultReason {
        match self {
            Self::Alignment { .. } => FaultReason::InvalidAlignment,
            Self::InvalidType(_) => FaultReason::InvalidType,
            Self::Compression(_) => FaultReason::UnsupportedCompressionMode,
            Self::Roi(_) => FaultReason::RoiError,
            Self::Truncated { .. } => FaultReason::DataAbort,
        }
    }
}

/// Bytes to fetch for the descriptor whose first 16 bytes are `prefix`.
///
/// Unknown types report the linear size; [`decode`] rejects them.
pub fn encoded_len(prefix: &[u8]) -> usize {
    if prefix.len() < 8 {
        return LINEAR_SIZE;
    }
    let control = LittleEndian::read_u32(&prefix[4..8]);
    if (control >> TYPE_SHIFT) & TYPE_MASK == TYPE_2D {
        TWO_D_SIZE
    } else {
        LINEAR_SIZE
    }
}

fn read_words(buf: &[u8], count: usize) -> SmallVec<[u32; 8]> {
    let mut words: SmallVec<[u32; 8]> = SmallVec::from_elem(0, count);
    LittleEndian::read_u32_into(&buf[..count * 4], &mut words);
    words
}

fn check_alignment(pa: u64, required: u64) -> Result<(), DescriptorError> {
    if pa & (required - 1) != 0 {
        return Err(DescriptorError::Alignment { pa, required });
    }
    Ok(())
}

fn check_linear_dlbc(desc: &Descriptor, length: u32) -> Result<(), DescriptorError> {
    let h = &desc.header;
    let block = DLBC_BLOCK - 1;
    if h.src_dlbc
        && (!h.src_bypass || length & block != 0 || h.src & block != 0 || h.dst & block != 0)
    {
        return Err(DescriptorError::Compression(
            "source DLBC needs bypass with 256-byte aligned length and addresses",
        ));
    }
    if h.dst_dlbc && (!h.dst_bypass || (h.src & block) != (h.dst & block)) {
        return Err(DescriptorError::Compression(
            "destination DLBC needs bypass and matching 256-byte offsets",
        ));
    }
    Ok(())
}

fn check_roi(header: &DescriptorHeader, r: &Region2d) -> Result<(), DescriptorError> {
    match r.transform {
        Transform::ExpandUpper | Transform::ExpandLower => {
            if r.dst_stride & 1 != 0 {
                return Err(DescriptorError::Roi("expansion needs an even destination stride"));
            }
        }
        Transform::CompressUpper | Transform::CompressLower => {
            if r.src_stride & 1 != 0 {
                return Err(DescriptorError::Roi("compression needs an even source stride"));
            }
        }
        Transform::Swap => {
            if header.src & 1 != 0 || header.dst & 1 != 0 {
                return Err(DescriptorError::Roi("swap needs even addresses"));
            }
        }
        Transform::None => {}
    }

    if r.width > r.src_stride {
        return Err(DescriptorError::Roi("width exceeds source stride"));
    }
    if r.transform.scaled(r.width as u32) > r.dst_stride as u32 {
        return Err(DescriptorError::Roi("scaled width exceeds destination stride"));
    }
    Ok(())
}

/// Decode and validate the descriptor held in `buf`, fetched from `pa`.
///
/// `buf` must hold at least [`encoded_len`] bytes. DLBC rules only apply
/// when `dlbc_enabled` (DM2) is set.
pub fn decode(pa: u64, buf: &[u8], dlbc_enabled: bool) -> Result<Descriptor, DescriptorError> {
    if buf.len() < LINEAR_SIZE {
        return Err(DescriptorError::Truncated { got: buf.len(), needed: LINEAR_SIZE });
    }
    let control = LittleEndian::read_u32(&buf[4..8]);

    match (control >> TYPE_SHIFT) & TYPE_MASK {
        TYPE_LINEAR => {
            check_alignment(pa, LINEAR_ALIGN)?;
            let desc = Descriptor::from_words(&read_words(buf, 4))?;
            if dlbc_enabled {
                check_linear_dlbc(&desc, control & LENGTH_MASK)?;
            }
            Ok(desc)
        }
        TYPE_2D => {
            check_alignment(pa, TWO_D_ALIGN)?;
            if dlbc_enabled && (flag(control, SRC_DLBC_SHIFT) || flag(control, DST_DLBC_SHIFT)) {
                return Err(DescriptorError::Compression("2D descriptors cannot use DLBC"));
            }
            if buf.len() < TWO_D_SIZE {
                return Err(DescriptorError::Truncated { got: buf.len(), needed: TWO_D_SIZE });
            }
            let desc = Descriptor::from_words(&read_words(buf, 8))?;
            if let DescriptorKind::TwoD(region) = &desc.kind {
                check_roi(&desc.header, region)?;
            }
            Ok(desc)
        }
        other => Err(DescriptorError::InvalidType(other)),
    }
}

/// Words hardware rewrites in place, as (physical address, value) pairs.
///
/// The control word always goes back. Addresses only go back when the
/// descriptor stopped early (pause or exception); a finished descriptor
/// keeps its original addresses. 2D descriptors also get their transform,
/// ROI and offset words back.
pub fn encode_back(pa: u64, desc: &Descriptor, rewrite_addresses: bool) -> SmallVec<[(u64, u32); 6]> {
    let words = desc.words();
    let mut out: SmallVec<[(u64, u32); 6]> = SmallVec::new();
    out.push((pa + 4, words[1]));
    if rewrite_addresses {
        out.push((pa + 8, words[2]));
        out.push((pa + 12, words[3]));
    }
    if desc.is_2d() {
        out.push((pa + 16, words[4]));
        out.push((pa + 20, words[5]));
        out.push((pa + 28, words[7]));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(width: u16, height: u16, src_stride: u16, dst_stride: u16) -> Region2d {
        Region2d::new(width, height, src_stride, dst_stride)
    }

    #[test]
    fn test_linear_layout() {
        let desc = Descriptor::linear(0x1000, 0x2000, 64)
            .with_next(0x3000)
            .with_bypass(true, false)
            .with_order(true);
        let words = desc.words();
        assert_eq!(words.as_slice(), &[0x3000, 0x6000_0040, 0x1000, 0x2000]);

        let decoded = decode(0x4000, &desc.to_bytes(), true).unwrap();
        assert_eq!(decoded, desc);
        assert_eq!(decoded.encoded_len(), LINEAR_SIZE);
    }

    #[test]
    fn test_2d_layout() {
        let r = region(8, 4, 16, 32).with_transform(Transform::ExpandLower).with_offsets(2, 4);
        let desc = Descriptor::two_d(0x1000, 0x2000, r);
        let words = desc.words();
        assert_eq!(words.len(), 8);
        assert_eq!(words[1], 0x0100_0000);
        assert_eq!(words[4], 0x2000_0000);
        assert_eq!(words[5], 0x0004_0008);
        assert_eq!(words[6], 0x0020_0010);
        assert_eq!(words[7], 0x0004_0002);

        let bytes = desc.to_bytes();
        assert_eq!(encoded_len(&bytes[..16]), TWO_D_SIZE);
        assert_eq!(decode(0x8000, &bytes, true).unwrap(), desc);
    }

    #[test]
    fn test_linear_alignment() {
        let bytes = Descriptor::linear(0x1000, 0x2000, 16).to_bytes();
        for pa in [0x1004u64, 0x1008, 0x100C, 0x1001] {
            let err = decode(pa, &bytes, true).unwrap_err();
            assert_eq!(err, DescriptorError::Alignment { pa, required: 16 });
            assert_eq!(err.fault_reason(), FaultReason::InvalidAlignment);
        }
        assert!(decode(0x1010, &bytes, true).is_ok());
    }

    #[test]
    fn test_2d_alignment() {
        let bytes = Descriptor::two_d(0, 0x100, region(4, 1, 4, 4)).to_bytes();
        assert!(matches!(decode(0x1010, &bytes, true), Err(DescriptorError::Alignment { required: 32, .. })));
        assert!(decode(0x1020, &bytes, true).is_ok());
    }

    #[test]
    fn test_invalid_type() {
        let mut bytes = Descriptor::linear(0, 0, 4).to_bytes();
        bytes[7] |= 0x02;
        let err = decode(0x1000, &bytes, true).unwrap_err();
        assert_eq!(err, DescriptorError::InvalidType(2));
        assert_eq!(err.fault_reason(), FaultReason::InvalidType);
    }

    #[test]
    fn test_alignment_checked_before_dlbc() {
        let bytes = Descriptor::linear(0x1000, 0x2000, 10).with_dlbc(true, false).to_bytes();
        assert!(matches!(decode(0x1008, &bytes, true), Err(DescriptorError::Alignment { .. })));
        assert!(matches!(decode(0x1000, &bytes, true), Err(DescriptorError::Compression(_))));
    }

    #[test]
    fn test_linear_dlbc_rules() {
        // Source DLBC without bypass
        let desc = Descriptor::linear(0x1000, 0x2000, 256).with_dlbc(true, false);
        assert!(matches!(decode(0, &desc.to_bytes(), true), Err(DescriptorError::Compression(_))));

        // Legal: bypass, whole blocks, aligned addresses
        let desc = desc.with_bypass(true, false);
        assert!(decode(0, &desc.to_bytes(), true).is_ok());

        // Partial block
        let partial = Descriptor::linear(0x1000, 0x2000, 200).with_dlbc(true, false).with_bypass(true, false);
        assert!(decode(0, &partial.to_bytes(), true).is_err());

        // Destination DLBC with mismatched offsets
        let dst = Descriptor::linear(0x1010, 0x2020, 64).with_dlbc(false, true).with_bypass(false, true);
        assert!(decode(0, &dst.to_bytes(), true).is_err());
        let dst = Descriptor::linear(0x1010, 0x2010, 64).with_dlbc(false, true).with_bypass(false, true);
        assert!(decode(0, &dst.to_bytes(), true).is_ok());

        // DLBC disabled in DM2: flags are ignored
        let desc = Descriptor::linear(0x1001, 0x2000, 3).with_dlbc(true, true);
        assert!(decode(0, &desc.to_bytes(), false).is_ok());
    }

    #[test]
    fn test_2d_rejects_dlbc() {
        let desc = Descriptor::two_d(0, 0x100, region(4, 1, 4, 4)).with_dlbc(false, true);
        let err = decode(0, &desc.to_bytes(), true).unwrap_err();
        assert_eq!(err.fault_reason(), FaultReason::UnsupportedCompressionMode);
        assert!(decode(0, &desc.to_bytes(), false).is_ok());
    }

    #[test]
    fn test_roi_width_exceeds_stride() {
        let desc = Descriptor::two_d(0x1000, 0x2000, region(10, 1, 8, 16));
        let err = decode(0, &desc.to_bytes(), true).unwrap_err();
        assert_eq!(err, DescriptorError::Roi("width exceeds source stride"));
        assert_eq!(err.fault_reason(), FaultReason::RoiError);
    }

    #[test]
    fn test_roi_transform_rules() {
        let roi = |src: u32, r: Region2d| decode(0, &Descriptor::two_d(src, 0x100, r).to_bytes(), true);

        let odd_dst = region(4, 1, 4, 9).with_transform(Transform::ExpandUpper);
        assert_eq!(roi(0, odd_dst), Err(DescriptorError::Roi("expansion needs an even destination stride")));

        // Expansion doubles the destination line
        let narrow = region(4, 1, 4, 6).with_transform(Transform::ExpandUpper);
        assert_eq!(roi(0, narrow), Err(DescriptorError::Roi("scaled width exceeds destination stride")));
        let exact = region(4, 1, 4, 8).with_transform(Transform::ExpandUpper);
        assert!(roi(0, exact).is_ok());

        let odd_src = region(4, 1, 5, 4).with_transform(Transform::CompressLower);
        assert_eq!(roi(0, odd_src), Err(DescriptorError::Roi("compression needs an even source stride")));

        let swap = region(4, 1, 4, 4).with_transform(Transform::Swap);
        assert_eq!(roi(0x1001, swap), Err(DescriptorError::Roi("swap needs even addresses")));
        assert!(roi(0x1000, swap).is_ok());
    }

    #[test]
    fn test_roi_boundaries() {
        let roi = |r: Region2d| decode(0, &Descriptor::two_d(0x1000, 0x2000, r).to_bytes(), true);

        // width == src_stride
        assert!(roi(region(8, 2, 8, 16)).is_ok());
        // scaled(width) == dst_stride
        assert!(roi(region(8, 2, 8, 8)).is_ok());
        assert!(roi(region(6, 1, 8, 3).with_transform(Transform::CompressUpper)).is_ok());
        assert_eq!(
            roi(region(6, 1, 8, 2).with_transform(Transform::CompressUpper)),
            Err(DescriptorError::Roi("scaled width exceeds destination stride"))
        );
    }

    #[test]
    fn test_roi_odd_width_accepted() {
        for transform in [Transform::CompressLower, Transform::CompressUpper, Transform::Swap] {
            let desc = Descriptor::two_d(0x1000, 0x2000, region(3, 1, 4, 4).with_transform(transform));
            assert!(decode(0, &desc.to_bytes(), true).is_ok(), "{:?}", transform);
        }
    }

    #[test]
    fn test_reserved_transform_is_plain_copy() {
        let mut bytes = Descriptor::two_d(0, 0x100, region(4, 1, 4, 4)).to_bytes();
        bytes[19] = 0x70;
        let desc = decode(0, &bytes, true).unwrap();
        assert_eq!(desc.region().unwrap().transform, Transform::None);
        assert_eq!(Transform::from_bits(15), Transform::None);
    }

    #[test]
    fn test_truncated_2d() {
        let bytes = Descriptor::two_d(0, 0x100, region(4, 1, 4, 4)).to_bytes();
        assert_eq!(
            decode(0, &bytes[..16], true),
            Err(DescriptorError::Truncated { got: 16, needed: 32 })
        );
    }

    #[test]
    fn test_transforms() {
        let src = [0x11, 0x22, 0x33, 0x44];

        let mut out = [0xFFu8; 8];
        Transform::ExpandUpper.apply(&src, &mut out);
        assert_eq!(out, [0x00, 0x11, 0x00, 0x22, 0x00, 0x33, 0x00, 0x44]);

        Transform::ExpandLower.apply(&src, &mut out);
        assert_eq!(out, [0x11, 0x00, 0x22, 0x00, 0x33, 0x00, 0x44, 0x00]);

        let mut half = [0u8; 2];
        Transform::CompressUpper.apply(&src, &mut half);
        assert_eq!(half, [0x22, 0x44]);
        Transform::CompressLower.apply(&src, &mut half);
        assert_eq!(half, [0x11, 0x33]);

        let mut same = [0u8; 4];
        Transform::Swap.apply(&src, &mut same);
        assert_eq!(same, [0x22, 0x11, 0x44, 0x33]);

        let mut tail = [0xFFu8; 3];
        Transform::Swap.apply(&src[..3], &mut tail);
        assert_eq!(tail, [0x22, 0x11, 0x00]);
        Transform::None.apply(&src, &mut same);
        assert_eq!(same, src);
    }

    #[test]
    fn test_transform_scale() {
        assert_eq!(Transform::ExpandUpper.scaled(6), 12);
        assert_eq!(Transform::CompressUpper.scaled(6), 3);
        assert_eq!(Transform::Swap.scaled(6), 6);
        assert_eq!(Transform::Swap.fixed_chunk(), Some((2, 2)));
        assert_eq!(Transform::None.fixed_chunk(), None);
        assert!(!Transform::None.is_padding());
    }

    #[test]
    fn test_encode_back_linear() {
        let mut desc = Descriptor::linear(0x1000, 0x2000, 0);
        desc.header.done = true;

        let done = encode_back(0x4000, &desc, false);
        assert_eq!(done.as_slice(), &[(0x4004, 0x8000_0000)]);

        let paused = encode_back(0x4000, &desc, true);
        assert_eq!(paused.len(), 3);
        assert_eq!(paused[1], (0x4008, 0x1000));
        assert_eq!(paused[2], (0x400C, 0x2000));
    }

    #[test]
    fn test_encode_back_2d() {
        let desc = Descriptor::two_d(0x1000, 0x2000, region(4, 2, 8, 8).with_offsets(1, 2));
        let words = encode_back(0x4000, &desc, false);
        let addrs: Vec<u64> = words.iter().map(|(pa, _)| *pa).collect();
        assert_eq!(addrs, vec![0x4004, 0x4010, 0x4014, 0x401C]);
        assert_eq!(words[3].1, 0x0002_0001);
    }

    #[test]
    fn test_display() {
        let text = Descriptor::two_d(0x1000, 0x2000, region(4, 2, 8, 8)).with_next(0x40).to_string();
        assert!(text.starts_with("2d next=0x00000040"));
        assert!(text.contains("width=4 height=2"));

        let text = Descriptor::linear(0x10, 0x20, 96).to_string();
        assert!(text.starts_with("linear length=96"));
    }
}
