//! Packing of two 32-bit identifiers into a single 64-bit key.
//!
//! The data key always occupies the high half and the unique visitor key the low half:
//!
//! ```text
//!  63                32 31                 0
//! +--------------------+--------------------+
//! |      data key      | unique visitor key |
//! +--------------------+--------------------+
//! ```

use std::fmt;

/// A 64-bit key composed of a data key and a unique visitor key.
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct CompositeKey(u64);

impl CompositeKey {
    /// Composes a key from a data key and a unique visitor key.
    pub fn new(data_key: u32, uniq_key: u32) -> Self {
        Self(u64encode(data_key, uniq_key))
    }

    /// Wraps an already packed value.
    pub fn from_packed(packed: u64) -> Self {
        Self(packed)
    }

    /// Returns the packed representation.
    pub fn packed(self) -> u64 {
        self.0
    }

    /// Returns the data key stored in the high half.
    pub fn data_key(self) -> u32 {
        u64decode(self.0).0
    }

    /// Returns the unique visitor key stored in the low half.
    pub fn uniq_key(self) -> u32 {
        u64decode(self.0).1
    }
}

impl fmt::Debug for CompositeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CompositeKey({}&{})", self.data_key(), self.uniq_key())
    }
}

impl From<CompositeKey> for u64 {
    fn from(key: CompositeKey) -> Self {
        key.0
    }
}

/// Packs `x` into the high and `y` into the low 32 bits.
///
/// # Example
///
/// ```
/// use tally_storage::{u64decode, u64encode};
///
/// let packed = u64encode(1, 4);
/// assert_eq!(packed, 0x0000_0001_0000_0004);
/// assert_eq!(u64decode(packed), (1, 4));
/// ```
pub fn u64encode(x: u32, y: u32) -> u64 {
    (u64::from(x) << 32) | u64::from(y)
}

/// Splits a packed value into its high and low 32 bits.
pub fn u64decode(packed: u64) -> (u32, u32) {
    ((packed >> 32) as u32, packed as u32)
}
