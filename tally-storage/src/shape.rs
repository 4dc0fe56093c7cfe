//! The closed set of hash map shapes backing every metric.

use std::fmt;
use std::mem;
use std::sync::Arc;

use hashbrown::HashMap;

use crate::metric::ValueOwnership;
use crate::partition::Partition;

/// Identifies the key and value types of a [`MetricMap`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum MapShape {
    /// `u32` keys, `u32` values.
    II32,
    /// `u32` keys, string values.
    IS32,
    /// `u32` keys, `u64` values.
    IU64,
    /// String keys, `u32` values.
    SI32,
    /// String keys, string values.
    SS32,
    /// `u32` keys, lists of `u32` values.
    IGSL,
    /// String keys, `u64` values.
    SU64,
    /// `u32` keys, nested storage values.
    IGKH,
    /// `u64` keys, `u8` values.
    U648,
}

impl MapShape {
    /// Returns the lowercase name of the shape.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::II32 => "ii32",
            Self::IS32 => "is32",
            Self::IU64 => "iu64",
            Self::SI32 => "si32",
            Self::SS32 => "ss32",
            Self::IGSL => "igsl",
            Self::SU64 => "su64",
            Self::IGKH => "igkh",
            Self::U648 => "u648",
        }
    }
}

impl fmt::Display for MapShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A key addressing an entry of a [`MetricMap`] through dynamic dispatch.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MapKey<'a> {
    /// Key of the `ii32`, `is32`, `iu64` and `igsl` shapes.
    Int(u32),
    /// Key of the `u648` shape.
    Wide(u64),
    /// Key of the `si32`, `ss32` and `su64` shapes.
    Str(&'a str),
}

/// An owned copy of a value stored in a [`MetricMap`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum MapValue {
    /// Value of the `ii32` and `si32` shapes.
    Int(u32),
    /// Value of the `iu64` and `su64` shapes.
    Wide(u64),
    /// Value of the `u648` shape.
    Byte(u8),
    /// Value of the `is32` and `ss32` shapes.
    Str(Arc<str>),
    /// Value of the `igsl` shape.
    List(Vec<u32>),
}

/// Returned by dynamic operations when the operands do not fit the shape of the map.
#[derive(Debug)]
pub(crate) struct Mismatch;

/// A hash map of one of the supported [shapes](MapShape).
///
/// Strings are reference counted, so a map can share keys or values with another map without
/// copying them. Partitions stored in an `igkh` map are owned exclusively.
#[derive(Debug)]
pub enum MetricMap {
    /// See [`MapShape::II32`].
    II32(HashMap<u32, u32>),
    /// See [`MapShape::IS32`].
    IS32(HashMap<u32, Arc<str>>),
    /// See [`MapShape::IU64`].
    IU64(HashMap<u32, u64>),
    /// See [`MapShape::SI32`].
    SI32(HashMap<Arc<str>, u32>),
    /// See [`MapShape::SS32`].
    SS32(HashMap<Arc<str>, Arc<str>>),
    /// See [`MapShape::IGSL`].
    IGSL(HashMap<u32, Vec<u32>>),
    /// See [`MapShape::SU64`].
    SU64(HashMap<Arc<str>, u64>),
    /// See [`MapShape::IGKH`].
    IGKH(HashMap<u32, Box<Partition>>),
    /// See [`MapShape::U648`].
    U648(HashMap<u64, u8>),
}

impl MetricMap {
    /// Creates an empty map of the given shape.
    pub fn empty(shape: MapShape) -> Self {
        match shape {
            MapShape::II32 => Self::II32(HashMap::new()),
            MapShape::IS32 => Self::IS32(HashMap::new()),
            MapShape::IU64 => Self::IU64(HashMap::new()),
            MapShape::SI32 => Self::SI32(HashMap::new()),
            MapShape::SS32 => Self::SS32(HashMap::new()),
            MapShape::IGSL => Self::IGSL(HashMap::new()),
            MapShape::SU64 => Self::SU64(HashMap::new()),
            MapShape::IGKH => Self::IGKH(HashMap::new()),
            MapShape::U648 => Self::U648(HashMap::new()),
        }
    }

    /// Returns the shape tag of this map.
    pub fn shape(&self) -> MapShape {
        match self {
            Self::II32(_) => MapShape::II32,
            Self::IS32(_) => MapShape::IS32,
            Self::IU64(_) => MapShape::IU64,
            Self::SI32(_) => MapShape::SI32,
            Self::SS32(_) => MapShape::SS32,
            Self::IGSL(_) => MapShape::IGSL,
            Self::SU64(_) => MapShape::SU64,
            Self::IGKH(_) => MapShape::IGKH,
            Self::U648(_) => MapShape::U648,
        }
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        match self {
            Self::II32(map) => map.len(),
            Self::IS32(map) => map.len(),
            Self::IU64(map) => map.len(),
            Self::SI32(map) => map.len(),
            Self::SS32(map) => map.len(),
            Self::IGSL(map) => map.len(),
            Self::SU64(map) => map.len(),
            Self::IGKH(map) => map.len(),
            Self::U648(map) => map.len(),
        }
    }

    /// Returns `true` if the map contains no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn get(&self, key: MapKey<'_>) -> Result<Option<MapValue>, Mismatch> {
        Ok(match (self, key) {
            (Self::II32(map), MapKey::Int(k)) => map.get(&k).copied().map(MapValue::Int),
            (Self::IS32(map), MapKey::Int(k)) => map.get(&k).cloned().map(MapValue::Str),
            (Self::IU64(map), MapKey::Int(k)) => map.get(&k).copied().map(MapValue::Wide),
            (Self::SI32(map), MapKey::Str(k)) => map.get(k).copied().map(MapValue::Int),
            (Self::SS32(map), MapKey::Str(k)) => map.get(k).cloned().map(MapValue::Str),
            (Self::IGSL(map), MapKey::Int(k)) => map.get(&k).cloned().map(MapValue::List),
            (Self::SU64(map), MapKey::Str(k)) => map.get(k).copied().map(MapValue::Wide),
            (Self::U648(map), MapKey::Wide(k)) => map.get(&k).copied().map(MapValue::Byte),
            _ => return Err(Mismatch),
        })
    }

    pub(crate) fn insert(&mut self, key: MapKey<'_>, value: MapValue) -> Result<(), Mismatch> {
        match (self, key, value) {
            (Self::II32(map), MapKey::Int(k), MapValue::Int(v)) => {
                map.insert(k, v);
            }
            (Self::IS32(map), MapKey::Int(k), MapValue::Str(v)) => {
                map.insert(k, v);
            }
            (Self::IU64(map), MapKey::Int(k), MapValue::Wide(v)) => {
                map.insert(k, v);
            }
            (Self::SI32(map), MapKey::Str(k), MapValue::Int(v)) => {
                map.insert(Arc::from(k), v);
            }
            (Self::SS32(map), MapKey::Str(k), MapValue::Str(v)) => {
                map.insert(Arc::from(k), v);
            }
            (Self::IGSL(map), MapKey::Int(k), MapValue::List(v)) => {
                map.insert(k, v);
            }
            (Self::SU64(map), MapKey::Str(k), MapValue::Wide(v)) => {
                map.insert(Arc::from(k), v);
            }
            (Self::U648(map), MapKey::Wide(k), MapValue::Byte(v)) => {
                map.insert(k, v);
            }
            _ => return Err(Mismatch),
        }

        Ok(())
    }

    pub(crate) fn remove(&mut self, key: MapKey<'_>) -> Result<Option<MapValue>, Mismatch> {
        Ok(match (self, key) {
            (Self::II32(map), MapKey::Int(k)) => map.remove(&k).map(MapValue::Int),
            (Self::IS32(map), MapKey::Int(k)) => map.remove(&k).map(MapValue::Str),
            (Self::IU64(map), MapKey::Int(k)) => map.remove(&k).map(MapValue::Wide),
            (Self::SI32(map), MapKey::Str(k)) => map.remove(k).map(MapValue::Int),
            (Self::SS32(map), MapKey::Str(k)) => map.remove(k).map(MapValue::Str),
            (Self::IGSL(map), MapKey::Int(k)) => map.remove(&k).map(MapValue::List),
            (Self::SU64(map), MapKey::Str(k)) => map.remove(k).map(MapValue::Wide),
            (Self::U648(map), MapKey::Wide(k)) => map.remove(&k).map(MapValue::Byte),
            _ => return Err(Mismatch),
        })
    }

    /// Estimates the number of bytes held by this map.
    ///
    /// Heap data of entries, such as strings and lists, is only counted if the map owns its
    /// values. Maps that share strings with another map would otherwise count them twice. A
    /// borrowed string is still counted once no other map holds it, for instance after the owning
    /// partition was invalidated. Note that this does not necessarily match the exact memory
    /// footprint.
    pub fn cost(&self, values: ValueOwnership) -> usize {
        let table = match self {
            Self::II32(map) => slots_cost(map),
            Self::IS32(map) => slots_cost(map),
            Self::IU64(map) => slots_cost(map),
            Self::SI32(map) => slots_cost(map),
            Self::SS32(map) => slots_cost(map),
            Self::IGSL(map) => slots_cost(map),
            Self::SU64(map) => slots_cost(map),
            Self::IGKH(map) => slots_cost(map),
            Self::U648(map) => slots_cost(map),
        };

        let heap = match (values, self) {
            (ValueOwnership::Borrowed, Self::IS32(map)) => map.values().map(orphaned_len).sum(),
            (ValueOwnership::Borrowed, Self::SI32(map)) => map.keys().map(orphaned_len).sum(),
            (ValueOwnership::Borrowed, Self::SS32(map)) => map
                .iter()
                .map(|(k, v)| orphaned_len(k) + orphaned_len(v))
                .sum(),
            (ValueOwnership::Borrowed, Self::SU64(map)) => map.keys().map(orphaned_len).sum(),
            (ValueOwnership::Borrowed, _) => 0,
            (_, Self::IS32(map)) => map.values().map(|v| v.len()).sum(),
            (_, Self::SI32(map)) => map.keys().map(|k| k.len()).sum(),
            (_, Self::SS32(map)) => map.iter().map(|(k, v)| k.len() + v.len()).sum(),
            (_, Self::IGSL(map)) => map
                .values()
                .map(|list| list.capacity() * mem::size_of::<u32>())
                .sum(),
            (_, Self::SU64(map)) => map.keys().map(|k| k.len()).sum(),
            (_, Self::IGKH(map)) => map.values().map(|partition| partition.cost()).sum(),
            _ => 0,
        };

        mem::size_of::<Self>() + table + heap
    }
}

/// Length of a borrowed string that no other map holds anymore.
fn orphaned_len(text: &Arc<str>) -> usize {
    match Arc::strong_count(text) {
        1 => text.len(),
        _ => 0,
    }
}

fn slots_cost<K, V>(map: &HashMap<K, V>) -> usize {
    map.capacity() * (mem::size_of::<K>() + mem::size_of::<V>())
}

/// Aborts on an access that contradicts the fixed descriptor tables.
#[cold]
#[track_caller]
pub(crate) fn shape_violation(name: &str, expected: MapShape) -> ! {
    panic!("metric {name} is not backed by an {expected} map")
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    const SHAPES: [MapShape; 9] = [
        MapShape::II32,
        MapShape::IS32,
        MapShape::IU64,
        MapShape::SI32,
        MapShape::SS32,
        MapShape::IGSL,
        MapShape::SU64,
        MapShape::IGKH,
        MapShape::U648,
    ];

    #[test]
    fn test_empty_has_requested_shape() {
        for shape in SHAPES {
            let map = MetricMap::empty(shape);
            assert_eq!(map.shape(), shape);
            assert!(map.is_empty());
        }
    }

    #[test]
    fn test_dynamic_string_keys() {
        let mut map = MetricMap::empty(MapShape::SI32);
        map.insert(MapKey::Str("/index.php"), MapValue::Int(1)).unwrap();
        map.insert(MapKey::Str("/index.php"), MapValue::Int(2)).unwrap();

        assert_eq!(map.len(), 1);
        assert_eq!(
            map.get(MapKey::Str("/index.php")).unwrap(),
            Some(MapValue::Int(2))
        );
        assert_eq!(map.get(MapKey::Str("/about")).unwrap(), None);
        assert_eq!(
            map.remove(MapKey::Str("/index.php")).unwrap(),
            Some(MapValue::Int(2))
        );
        assert!(map.is_empty());
    }

    #[test]
    fn test_dynamic_mismatch() {
        let mut map = MetricMap::empty(MapShape::U648);
        assert!(map.get(MapKey::Int(1)).is_err());
        assert!(map.insert(MapKey::Wide(1), MapValue::Int(1)).is_err());
        assert!(map.insert(MapKey::Wide(1), MapValue::Byte(1)).is_ok());
        assert!(MetricMap::empty(MapShape::IGKH).get(MapKey::Int(1)).is_err());
    }

    #[test]
    fn test_cost_skips_borrowed_strings() {
        let owner: Arc<str> = Arc::from("x".repeat(100));
        let mut map = MetricMap::empty(MapShape::IS32);
        map.insert(MapKey::Int(1), MapValue::Str(Arc::clone(&owner)))
            .unwrap();

        let owned = map.cost(ValueOwnership::Owned);
        let borrowed = map.cost(ValueOwnership::Borrowed);
        assert_eq!(owned - borrowed, 100);

        drop(owner);
        assert_eq!(map.cost(ValueOwnership::Borrowed), owned);
    }
}
