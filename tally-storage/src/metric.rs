//! Descriptor tables of all metrics and the shapes backing them.
//!
//! Every storage scope allocates exactly one map per metric of its table when it is created, so
//! the shape of a metric's map never changes during its lifetime.

use std::fmt;

use crate::shape::{MapKey, MapShape, MapValue, MetricMap, Mismatch};

/// Whether a map owns the heap data of its entries or shares it with another map.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ValueOwnership {
    /// Strings and lists are owned by this map.
    Owned,
    /// Strings are shared with the map of a date partition, which owns them.
    Borrowed,
}

/// The storage a metric table belongs to.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Scope {
    /// Tables of a single date partition.
    Partition,
    /// Tables merging all date partitions.
    Cache,
    /// Process-wide tables that are not date partitioned.
    Process,
}

impl Scope {
    /// Returns the name of the scope for diagnostics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Partition => "partition",
            Self::Cache => "cache",
            Self::Process => "process",
        }
    }
}

/// Lifecycle operations for the map backing one metric.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MetricDescriptor {
    /// The shape of the map.
    pub shape: MapShape,
    /// Ownership of heap data in the map's entries.
    pub values: ValueOwnership,
}

impl MetricDescriptor {
    /// Creates a descriptor for a map owning its entries.
    pub const fn owned(shape: MapShape) -> Self {
        Self {
            shape,
            values: ValueOwnership::Owned,
        }
    }

    /// Creates a descriptor for a map sharing its strings with another map.
    pub const fn borrowed(shape: MapShape) -> Self {
        Self {
            shape,
            values: ValueOwnership::Borrowed,
        }
    }

    /// Creates an empty map ready for use.
    pub fn alloc(&self) -> MetricMap {
        MetricMap::empty(self.shape)
    }

    /// Releases the map and returns the estimated number of bytes freed.
    ///
    /// Shared strings stay alive as long as the owning map holds them.
    pub fn destroy(&self, map: MetricMap) -> usize {
        let cost = map.cost(self.values);
        drop(map);
        cost
    }

    /// Removes a single entry from the map.
    pub(crate) fn delete_entry(
        &self,
        map: &mut MetricMap,
        key: MapKey<'_>,
    ) -> Result<Option<MapValue>, Mismatch> {
        map.remove(key)
    }
}

/// The descriptor of the index holding all date partitions.
pub(crate) const DATE_INDEX: MetricDescriptor = MetricDescriptor::owned(MapShape::IGKH);

/// A closed set of metrics stored together in one table.
pub trait MetricKind: Copy + fmt::Debug + Eq + 'static {
    /// All metrics of the table in declaration order.
    const ALL: &'static [Self];

    /// Returns the position of the metric in [`Self::ALL`].
    fn index(self) -> usize;

    /// Returns the name of the metric for diagnostics.
    fn name(self) -> &'static str;

    /// Returns the descriptor of the metric's map within the given scope.
    fn descriptor(self, scope: Scope) -> MetricDescriptor;

    /// Returns `true` if tables of the given scope hold a map for the metric.
    fn in_scope(self, _scope: Scope) -> bool {
        true
    }
}

/// Metrics stored per module.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ModuleMetric {
    /// Maps interned strings to their key.
    ///
    /// ```text
    /// HEAD|/index.php -> 1
    /// Windows XP      -> 3
    /// Windows         -> 8
    /// ```
    KeyMap,
    /// Maps root keys to their display string, e.g. `8 -> Windows`.
    RootMap,
    /// Maps data keys to their display string, e.g. `1 -> /index.php`.
    DataMap,
    /// Holds the composite of data key and unique visitor key for every visitor seen.
    UniqMap,
    /// Maps data keys to their root key, e.g. `3 -> 8`.
    Root,
    /// Maps data keys to the number of hits.
    Hits,
    /// Maps data keys to the number of distinct visitors.
    Visitors,
    /// Maps data keys to bandwidth in bytes.
    Bw,
    /// Maps data keys to the cumulative time served.
    CumTs,
    /// Maps data keys to the maximum time served.
    MaxTs,
    /// Maps data keys to the request method, e.g. `1 -> GET`.
    Methods,
    /// Maps data keys to the request protocol, e.g. `1 -> HTTP/1.1`.
    Protocols,
    /// Maps data keys to the list of user agent keys seen with them.
    Agents,
    /// Maps named counters, such as the sum of hits, to their value.
    MetaData,
}

impl MetricKind for ModuleMetric {
    const ALL: &'static [Self] = &[
        Self::KeyMap,
        Self::RootMap,
        Self::DataMap,
        Self::UniqMap,
        Self::Root,
        Self::Hits,
        Self::Visitors,
        Self::Bw,
        Self::CumTs,
        Self::MaxTs,
        Self::Methods,
        Self::Protocols,
        Self::Agents,
        Self::MetaData,
    ];

    fn index(self) -> usize {
        self as usize
    }

    fn name(self) -> &'static str {
        match self {
            Self::KeyMap => "keymap",
            Self::RootMap => "rootmap",
            Self::DataMap => "datamap",
            Self::UniqMap => "uniqmap",
            Self::Root => "root",
            Self::Hits => "hits",
            Self::Visitors => "visitors",
            Self::Bw => "bw",
            Self::CumTs => "cumts",
            Self::MaxTs => "maxts",
            Self::Methods => "methods",
            Self::Protocols => "protocols",
            Self::Agents => "agents",
            Self::MetaData => "metadata",
        }
    }

    fn descriptor(self, scope: Scope) -> MetricDescriptor {
        let shape = match self {
            Self::KeyMap => MapShape::SI32,
            Self::RootMap | Self::DataMap | Self::Methods | Self::Protocols => MapShape::IS32,
            Self::UniqMap => MapShape::U648,
            Self::Root | Self::Hits | Self::Visitors => MapShape::II32,
            Self::Bw | Self::CumTs | Self::MaxTs => MapShape::IU64,
            Self::Agents => MapShape::IGSL,
            Self::MetaData => MapShape::SU64,
        };

        // The cache reuses the strings interned by the partitions.
        match (scope, shape) {
            (Scope::Cache, MapShape::SI32 | MapShape::IS32 | MapShape::SU64) => {
                MetricDescriptor::borrowed(shape)
            }
            _ => MetricDescriptor::owned(shape),
        }
    }
}

/// Metrics stored once per date partition, independent of modules.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum GlobalMetric {
    /// Maps `IP|DATE|UA` strings to a unique visitor key.
    UniqueKeys,
    /// Maps user agent strings to their key.
    AgentKeys,
    /// Maps user agent keys to the user agent string.
    AgentVals,
    /// Number of valid requests, stored under a single key.
    CntValid,
    /// Bandwidth of all valid requests, stored under a single key.
    CntBw,
}

impl MetricKind for GlobalMetric {
    const ALL: &'static [Self] = &[
        Self::UniqueKeys,
        Self::AgentKeys,
        Self::AgentVals,
        Self::CntValid,
        Self::CntBw,
    ];

    fn index(self) -> usize {
        self as usize
    }

    fn name(self) -> &'static str {
        match self {
            Self::UniqueKeys => "unique_keys",
            Self::AgentKeys => "agent_keys",
            Self::AgentVals => "agent_vals",
            Self::CntValid => "cnt_valid",
            Self::CntBw => "cnt_bw",
        }
    }

    fn descriptor(self, scope: Scope) -> MetricDescriptor {
        let shape = match self {
            Self::UniqueKeys | Self::AgentKeys => MapShape::SI32,
            Self::AgentVals => MapShape::IS32,
            Self::CntValid => MapShape::II32,
            Self::CntBw => MapShape::IU64,
        };

        match (scope, shape) {
            (Scope::Cache, MapShape::SI32 | MapShape::IS32) => MetricDescriptor::borrowed(shape),
            _ => MetricDescriptor::owned(shape),
        }
    }

    /// Unique keys and request counters only exist per date and are summed on demand.
    fn in_scope(self, scope: Scope) -> bool {
        match self {
            Self::UniqueKeys | Self::CntValid | Self::CntBw => scope != Scope::Cache,
            Self::AgentKeys | Self::AgentVals => true,
        }
    }
}

/// Process-wide metrics that are neither module nor date scoped.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ProcessMetric {
    /// Maps IP literals to resolved host names.
    Hostnames,
    /// Named autoincrement sequences.
    Sequences,
    /// Named overall counters, see [`OverallCounter`].
    Overall,
    /// Maps a log's inode to the last line parsed from it.
    LastParse,
}

impl MetricKind for ProcessMetric {
    const ALL: &'static [Self] = &[
        Self::Hostnames,
        Self::Sequences,
        Self::Overall,
        Self::LastParse,
    ];

    fn index(self) -> usize {
        self as usize
    }

    fn name(self) -> &'static str {
        match self {
            Self::Hostnames => "hostnames",
            Self::Sequences => "sequences",
            Self::Overall => "overall",
            Self::LastParse => "last_parse",
        }
    }

    fn descriptor(self, _scope: Scope) -> MetricDescriptor {
        MetricDescriptor::owned(match self {
            Self::Hostnames => MapShape::SS32,
            Self::Sequences => MapShape::SU64,
            Self::Overall => MapShape::SI32,
            Self::LastParse => MapShape::II32,
        })
    }
}

/// Process-wide counters maintained by the log reader.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum OverallCounter {
    /// Lines read from the log.
    Processed,
    /// Lines that failed to parse.
    Invalid,
    /// Seconds spent processing.
    ProcessingTime,
    /// Lines skipped because of an excluded IP.
    ExcludedIp,
}

impl OverallCounter {
    /// Returns the key of the counter in the overall map.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Processed => "processed",
            Self::Invalid => "invalid",
            Self::ProcessingTime => "processing_time",
            Self::ExcludedIp => "excluded_ip",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_indices<M: MetricKind>() {
        for (position, metric) in M::ALL.iter().enumerate() {
            assert_eq!(metric.index(), position, "{metric:?}");
        }
    }

    #[test]
    fn test_indices_match_tables() {
        assert_indices::<ModuleMetric>();
        assert_indices::<GlobalMetric>();
        assert_indices::<ProcessMetric>();
    }

    #[test]
    fn test_cache_borrows_strings() {
        let keymap = ModuleMetric::KeyMap;
        assert_eq!(
            keymap.descriptor(Scope::Partition).values,
            ValueOwnership::Owned
        );
        assert_eq!(
            keymap.descriptor(Scope::Cache).values,
            ValueOwnership::Borrowed
        );
        // Agent lists of the cache hold cache keys, not shared data.
        assert_eq!(
            ModuleMetric::Agents.descriptor(Scope::Cache).values,
            ValueOwnership::Owned
        );
    }

    #[test]
    fn test_alloc_matches_shape() {
        for metric in ModuleMetric::ALL {
            let descriptor = metric.descriptor(Scope::Partition);
            assert_eq!(descriptor.alloc().shape(), descriptor.shape);
        }
    }

    #[test]
    fn test_delete_entry() {
        let descriptor = ModuleMetric::Hits.descriptor(Scope::Partition);
        let mut map = descriptor.alloc();
        map.insert(MapKey::Int(1), MapValue::Int(10)).unwrap();

        assert_eq!(
            descriptor.delete_entry(&mut map, MapKey::Int(1)).unwrap(),
            Some(MapValue::Int(10))
        );
        assert_eq!(descriptor.delete_entry(&mut map, MapKey::Int(1)).unwrap(), None);
        assert!(descriptor.delete_entry(&mut map, MapKey::Str("1")).is_err());
    }
}
