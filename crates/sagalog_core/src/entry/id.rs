//! Entry identifier.

use super::CodecError;
use std::fmt;
use std::str::FromStr;

/// Identifier of an entry within one saga log.
///
/// Entry ids are 64-bit counters that are:
/// - Unique among the stored entries of a log, across restarts
/// - Assigned in append order when the log generates them
/// - Immutable once assigned
///
/// The canonical text form is the decimal value and the canonical binary form
/// is the 8-byte big-endian value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryId(u64);

impl EntryId {
    /// Creates an entry id from its raw value.
    #[inline]
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw id value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the id that follows this one, or `None` at `u64::MAX`.
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self.0.checked_add(1) {
            Some(value) => Some(Self(value)),
            None => None,
        }
    }

    /// Returns the 8-byte big-endian form.
    #[inline]
    #[must_use]
    pub const fn to_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    /// Creates an entry id from its 8-byte big-endian form.
    #[inline]
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 8]) -> Self {
        Self(u64::from_be_bytes(bytes))
    }

    /// Creates an entry id from a slice.
    ///
    /// Returns `None` if the slice is not exactly 8 bytes.
    #[must_use]
    pub fn from_slice(slice: &[u8]) -> Option<Self> {
        let bytes: [u8; 8] = slice.try_into().ok()?;
        Some(Self::from_bytes(bytes))
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EntryId {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // u64::from_str accepts a leading '+', which has no canonical form.
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(CodecError::InvalidEntryId(s.to_string()));
        }
        s.parse::<u64>()
            .map(Self)
            .map_err(|_| CodecError::InvalidEntryId(s.to_string()))
    }
}

impl From<u64> for EntryId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl From<EntryId> for u64 {
    fn from(id: EntryId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn text_form_is_decimal() {
        assert_eq!(EntryId::new(0).to_string(), "0");
        assert_eq!(EntryId::new(1234).to_string(), "1234");
        assert_eq!(EntryId::new(u64::MAX).to_string(), "18446744073709551615");
    }

    #[test]
    fn binary_form_is_big_endian() {
        assert_eq!(EntryId::new(1).to_bytes(), [0, 0, 0, 0, 0, 0, 0, 1]);
        assert_eq!(
            EntryId::new(0x0102_0304_0506_0708).to_bytes(),
            [1, 2, 3, 4, 5, 6, 7, 8]
        );
    }

    #[test]
    fn parse_rejects_non_canonical_text() {
        for bad in ["", "-1", "+1", "1.0", "abc", " 1", "18446744073709551616"] {
            assert!(bad.parse::<EntryId>().is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn from_slice_requires_eight_bytes() {
        assert_eq!(EntryId::from_slice(&[0; 8]), Some(EntryId::new(0)));
        assert_eq!(EntryId::from_slice(&[0; 7]), None);
        assert_eq!(EntryId::from_slice(&[0; 9]), None);
    }

    #[test]
    fn ordering_follows_value() {
        assert!(EntryId::new(1) < EntryId::new(2));
        assert_eq!(EntryId::new(7).next(), Some(EntryId::new(8)));
    }

    #[test]
    fn last_id_has_no_successor() {
        assert_eq!(EntryId::new(u64::MAX - 1).next(), Some(EntryId::new(u64::MAX)));
        assert_eq!(EntryId::new(u64::MAX).next(), None);
    }

    proptest! {
        #[test]
        fn text_form_round_trips(raw in any::<u64>()) {
            let id = EntryId::new(raw);
            prop_assert_eq!(id.to_string().parse::<EntryId>().unwrap(), id);
        }

        #[test]
        fn binary_form_round_trips(raw in any::<u64>()) {
            let id = EntryId::new(raw);
            prop_assert_eq!(EntryId::from_bytes(id.to_bytes()), id);
        }
    }
}
