//! Bounds-checked field access over untrusted frame bytes.
//!
//! Every read checks the requested range against what was actually delivered
//! and reports `TooShort` instead of slicing past the end.

use crate::comms::events::DecodeError;

pub(crate) struct FieldReader<'a> {
    bytes: &'a [u8],
}

impl<'a> FieldReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    /// Fail early when the whole layout cannot fit.
    pub fn require(&self, needed: usize) -> Result<(), DecodeError> {
        if self.bytes.len() < needed {
            return Err(DecodeError::TooShort { needed, actual: self.bytes.len() });
        }
        Ok(())
    }

    fn field<const N: usize>(&self, offset: usize) -> Result<[u8; N], DecodeError> {
        let end = offset.saturating_add(N);
        self.bytes
            .get(offset..end)
            .and_then(|s| s.try_into().ok())
            .ok_or(DecodeError::TooShort { needed: end, actual: self.bytes.len() })
    }

    pub fn u32_at(&self, offset: usize) -> Result<u32, DecodeError> {
        self.field::<4>(offset).map(u32::from_ne_bytes)
    }

    pub fn i32_at(&self, offset: usize) -> Result<i32, DecodeError> {
        self.field::<4>(offset).map(i32::from_ne_bytes)
    }

    pub fn u64_at(&self, offset: usize) -> Result<u64, DecodeError> {
        self.field::<8>(offset).map(u64::from_ne_bytes)
    }

    /// NUL-terminated UTF-16 text of at most `cch` code units. Without a
    /// terminator the field's full width is the value.
    pub fn wide_str_at(&self, offset: usize, cch: usize) -> Result<String, DecodeError> {
        let end = offset.saturating_add(cch * 2);
        let raw = self
            .bytes
            .get(offset..end)
            .ok_or(DecodeError::TooShort { needed: end, actual: self.bytes.len() })?;
        let units: Vec<u16> = raw
            .chunks_exact(2)
            .map(|pair| u16::from_ne_bytes([pair[0], pair[1]]))
            .take_while(|&unit| unit != 0)
            .collect();
        Ok(String::from_utf16_lossy(&units))
    }
}

/// Writer counterpart used to produce frames (in-memory driver, tests).
pub(crate) fn put_wide_str(out: &mut [u8], offset: usize, cch: usize, text: &str) {
    let field = &mut out[offset..offset + cch * 2];
    field.fill(0);
    for (slot, unit) in field.chunks_exact_mut(2).zip(text.encode_utf16()) {
        slot.copy_from_slice(&unit.to_ne_bytes());
    }
}
