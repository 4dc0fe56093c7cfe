//! Tables holding one map per metric of a [`MetricKind`].

use std::marker::PhantomData;
use std::sync::Arc;

use hashbrown::HashMap;

use crate::codec::CompositeKey;
use crate::error::StorageError;
use crate::metric::{GlobalMetric, MetricKind, ModuleMetric, ProcessMetric, Scope};
use crate::shape::{MapKey, MapShape, MapValue, MetricMap, shape_violation};

/// Key under which the per-date counters of the global table are stored.
const COUNTER_KEY: u32 = 1;

/// Tables of all metrics of a module within one scope.
pub type ModuleStorage = MetricTable<ModuleMetric>;

/// Tables of the module independent metrics within one scope.
pub type GlobalStorage = MetricTable<GlobalMetric>;

/// Tables of process-wide metrics.
pub(crate) type ProcessStorage = MetricTable<ProcessMetric>;

/// A string interned into a `si32` map.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct InternedKey {
    /// The string as stored in the map, shareable with other maps.
    pub text: Arc<str>,
    /// The integer key assigned to the string.
    pub id: u32,
    /// `true` if the string was not present before.
    pub is_new: bool,
}

/// One map per metric of `M`, allocated from the metric's descriptor.
#[derive(Debug)]
pub struct MetricTable<M> {
    scope: Scope,
    maps: Box<[Option<MetricMap>]>,
    last_ids: Box<[u32]>,
    _kind: PhantomData<M>,
}

macro_rules! typed_maps {
    ($($shape:ident => $get:ident, $get_mut:ident: $ty:ty;)*) => {
        $(
            #[track_caller]
            pub(crate) fn $get(&self, metric: M) -> &$ty {
                match &self.maps[metric.index()] {
                    Some(MetricMap::$shape(map)) => map,
                    _ => shape_violation(metric.name(), MapShape::$shape),
                }
            }

            #[track_caller]
            pub(crate) fn $get_mut(&mut self, metric: M) -> &mut $ty {
                match &mut self.maps[metric.index()] {
                    Some(MetricMap::$shape(map)) => map,
                    _ => shape_violation(metric.name(), MapShape::$shape),
                }
            }
        )*
    };
}

impl<M: MetricKind> MetricTable<M> {
    /// Allocates an empty map for every metric of `M` stored in `scope`.
    pub fn new(scope: Scope) -> Self {
        let maps = M::ALL
            .iter()
            .map(|metric| {
                metric
                    .in_scope(scope)
                    .then(|| metric.descriptor(scope).alloc())
            })
            .collect();

        Self {
            scope,
            maps,
            last_ids: vec![0; M::ALL.len()].into_boxed_slice(),
            _kind: PhantomData,
        }
    }

    /// Returns the scope this table was allocated for.
    pub fn scope(&self) -> Scope {
        self.scope
    }

    /// Returns the map backing a metric, or `None` if the scope holds no map for it.
    pub fn map(&self, metric: M) -> Option<&MetricMap> {
        self.maps[metric.index()].as_ref()
    }

    /// Returns the number of entries stored for a metric.
    pub fn len(&self, metric: M) -> usize {
        self.map(metric).map_or(0, MetricMap::len)
    }

    /// Looks up a key in the metric's map.
    pub fn get(&self, metric: M, key: MapKey<'_>) -> Result<Option<MapValue>, StorageError> {
        let map = self.map(metric).ok_or_else(|| self.not_in_scope(metric))?;
        map.get(key).map_err(|_| Self::mismatch(metric, map))
    }

    /// Inserts a value into the metric's map, replacing any previous value.
    ///
    /// Inserting an id into a `si32` map reserves it, so later interned strings are numbered
    /// above it.
    pub fn insert(
        &mut self,
        metric: M,
        key: MapKey<'_>,
        value: MapValue,
    ) -> Result<(), StorageError> {
        let not_in_scope = self.not_in_scope(metric);
        let map = self.maps[metric.index()].as_mut().ok_or(not_in_scope)?;

        let reserved = match (&*map, &value) {
            (MetricMap::SI32(_), MapValue::Int(id)) => Some(*id),
            _ => None,
        };

        map.insert(key, value)
            .map_err(|_| Self::mismatch(metric, map))?;

        if let Some(id) = reserved {
            let last = &mut self.last_ids[metric.index()];
            *last = (*last).max(id);
        }

        Ok(())
    }

    /// Removes a key from the metric's map and returns its value.
    pub fn delete(&mut self, metric: M, key: MapKey<'_>) -> Result<MapValue, StorageError> {
        let descriptor = metric.descriptor(self.scope);
        let not_in_scope = self.not_in_scope(metric);
        let map = self.maps[metric.index()].as_mut().ok_or(not_in_scope)?;

        match descriptor.delete_entry(map, key) {
            Ok(Some(value)) => Ok(value),
            Ok(None) => Err(StorageError::KeyNotFound {
                metric: metric.name(),
            }),
            Err(_) => Err(StorageError::ShapeMismatch {
                metric: metric.name(),
                shape: descriptor.shape,
            }),
        }
    }

    /// Estimates the number of bytes held by all maps of this table.
    pub fn cost(&self) -> usize {
        M::ALL
            .iter()
            .filter_map(|metric| {
                let map = self.map(*metric)?;
                Some(map.cost(metric.descriptor(self.scope).values))
            })
            .sum()
    }

    /// Releases all maps and returns the estimated number of bytes freed.
    pub fn destroy(self) -> usize {
        let scope = self.scope;
        M::ALL
            .iter()
            .zip(self.maps.into_vec())
            .filter_map(|(metric, map)| Some(metric.descriptor(scope).destroy(map?)))
            .sum()
    }

    fn not_in_scope(&self, metric: M) -> StorageError {
        StorageError::NotInScope {
            metric: metric.name(),
            scope: self.scope,
        }
    }

    fn mismatch(metric: M, map: &MetricMap) -> StorageError {
        StorageError::ShapeMismatch {
            metric: metric.name(),
            shape: map.shape(),
        }
    }

    typed_maps! {
        II32 => ii32, ii32_mut: HashMap<u32, u32>;
        IS32 => is32, is32_mut: HashMap<u32, Arc<str>>;
        IU64 => iu64, iu64_mut: HashMap<u32, u64>;
        SI32 => si32, si32_mut: HashMap<Arc<str>, u32>;
        SS32 => ss32, ss32_mut: HashMap<Arc<str>, Arc<str>>;
        IGSL => igsl, igsl_mut: HashMap<u32, Vec<u32>>;
        SU64 => su64, su64_mut: HashMap<Arc<str>, u64>;
        U648 => u648, u648_mut: HashMap<u64, u8>;
    }

    /// Interns a string, numbering new strings from the table's own autoincrement.
    pub(crate) fn intern(&mut self, metric: M, text: &str) -> InternedKey {
        if let Some(found) = self.lookup(metric, text) {
            return found;
        }

        let id = self.next_id(metric);
        self.store(metric, Arc::from(text), id)
    }

    /// Interns a string shared with another map.
    pub(crate) fn intern_shared(&mut self, metric: M, text: &Arc<str>) -> InternedKey {
        if let Some(found) = self.lookup(metric, text) {
            return found;
        }

        let id = self.next_id(metric);
        self.store(metric, Arc::clone(text), id)
    }

    /// Interns a string, numbering new strings with `next`.
    pub(crate) fn intern_numbered(
        &mut self,
        metric: M,
        text: &str,
        next: impl FnOnce() -> u32,
    ) -> InternedKey {
        if let Some(found) = self.lookup(metric, text) {
            return found;
        }

        self.store(metric, Arc::from(text), next())
    }

    fn lookup(&self, metric: M, text: &str) -> Option<InternedKey> {
        let (key, id) = self.si32(metric).get_key_value(text)?;
        Some(InternedKey {
            text: Arc::clone(key),
            id: *id,
            is_new: false,
        })
    }

    fn next_id(&mut self, metric: M) -> u32 {
        let last = &mut self.last_ids[metric.index()];
        *last = last.saturating_add(1);
        *last
    }

    fn store(&mut self, metric: M, text: Arc<str>, id: u32) -> InternedKey {
        self.si32_mut(metric).insert(Arc::clone(&text), id);

        // Keys numbered externally must not be handed out again by the autoincrement.
        let last = &mut self.last_ids[metric.index()];
        *last = (*last).max(id);

        InternedKey {
            text,
            id,
            is_new: true,
        }
    }

    /// Adds `inc` to a `u32` value, starting from zero.
    pub(crate) fn inc_u32(&mut self, metric: M, key: u32, inc: u32) -> u32 {
        let value = self.ii32_mut(metric).entry(key).or_insert(0);
        *value = value.saturating_add(inc);
        *value
    }

    /// Adds `inc` to a `u64` value, starting from zero.
    pub(crate) fn inc_u64(&mut self, metric: M, key: u32, inc: u64) -> u64 {
        let value = self.iu64_mut(metric).entry(key).or_insert(0);
        *value = value.saturating_add(inc);
        *value
    }

    /// Keeps the larger of the stored and the given value.
    pub(crate) fn max_u64(&mut self, metric: M, key: u32, value: u64) -> u64 {
        let stored = self.iu64_mut(metric).entry(key).or_insert(value);
        *stored = (*stored).max(value);
        *stored
    }

    pub(crate) fn set_u32(&mut self, metric: M, key: u32, value: u32) {
        self.ii32_mut(metric).insert(key, value);
    }

    pub(crate) fn set_str(&mut self, metric: M, key: u32, value: Arc<str>) {
        self.is32_mut(metric).insert(key, value);
    }

    /// Appends `value` to a list unless it is already contained.
    pub(crate) fn push_unique(&mut self, metric: M, key: u32, value: u32) -> bool {
        let list = self.igsl_mut(metric).entry(key).or_default();
        if list.contains(&value) {
            return false;
        }

        list.push(value);
        true
    }

    /// Adds `inc` to a named `u64` value and returns the stored name with the new total.
    pub(crate) fn add_named(&mut self, metric: M, name: &str, inc: u64) -> (Arc<str>, u64) {
        let map = self.su64_mut(metric);
        if let Some((key, value)) = map.get_key_value_mut(name) {
            *value = value.saturating_add(inc);
            return (Arc::clone(key), *value);
        }

        let key: Arc<str> = Arc::from(name);
        map.insert(Arc::clone(&key), inc);
        (key, inc)
    }

    /// Adds `inc` to a named `u64` value, sharing the name with another map.
    pub(crate) fn add_named_shared(&mut self, metric: M, name: &Arc<str>, inc: u64) -> u64 {
        let map = self.su64_mut(metric);
        match map.get_mut(name.as_ref()) {
            Some(value) => {
                *value = value.saturating_add(inc);
                *value
            }
            None => {
                map.insert(Arc::clone(name), inc);
                inc
            }
        }
    }

    /// Adds `inc` to a named `u32` value, starting from zero.
    pub(crate) fn add_named_u32(&mut self, metric: M, name: &str, inc: u32) -> u32 {
        let map = self.si32_mut(metric);
        match map.get_mut(name) {
            Some(value) => {
                *value = value.saturating_add(inc);
                *value
            }
            None => {
                map.insert(Arc::from(name), inc);
                inc
            }
        }
    }
}

impl ModuleStorage {
    /// Returns the key of an interned string.
    pub fn keymap(&self, text: &str) -> Option<u32> {
        self.si32(ModuleMetric::KeyMap).get(text).copied()
    }

    /// Returns the display string of a root key.
    pub fn root_label(&self, key: u32) -> Option<&str> {
        self.is32(ModuleMetric::RootMap).get(&key).map(AsRef::as_ref)
    }

    /// Returns the display string of a data key.
    pub fn data_label(&self, key: u32) -> Option<&str> {
        self.is32(ModuleMetric::DataMap).get(&key).map(AsRef::as_ref)
    }

    /// Returns the root key a data key is grouped under.
    pub fn root(&self, key: u32) -> Option<u32> {
        self.ii32(ModuleMetric::Root).get(&key).copied()
    }

    /// Returns the number of hits of a data key.
    pub fn hits(&self, key: u32) -> Option<u32> {
        self.ii32(ModuleMetric::Hits).get(&key).copied()
    }

    /// Returns the number of distinct visitors of a data key.
    pub fn visitors(&self, key: u32) -> Option<u32> {
        self.ii32(ModuleMetric::Visitors).get(&key).copied()
    }

    /// Returns the bandwidth of a data key in bytes.
    pub fn bw(&self, key: u32) -> Option<u64> {
        self.iu64(ModuleMetric::Bw).get(&key).copied()
    }

    /// Returns the cumulative time served for a data key.
    pub fn cumts(&self, key: u32) -> Option<u64> {
        self.iu64(ModuleMetric::CumTs).get(&key).copied()
    }

    /// Returns the maximum time served for a data key.
    pub fn maxts(&self, key: u32) -> Option<u64> {
        self.iu64(ModuleMetric::MaxTs).get(&key).copied()
    }

    /// Returns the request method of a data key.
    pub fn method(&self, key: u32) -> Option<&str> {
        self.is32(ModuleMetric::Methods).get(&key).map(AsRef::as_ref)
    }

    /// Returns the request protocol of a data key.
    pub fn protocol(&self, key: u32) -> Option<&str> {
        self.is32(ModuleMetric::Protocols).get(&key).map(AsRef::as_ref)
    }

    /// Returns the user agent keys seen with a data key, in order of first appearance.
    pub fn agents(&self, key: u32) -> Option<&[u32]> {
        self.igsl(ModuleMetric::Agents).get(&key).map(Vec::as_slice)
    }

    /// Returns a named counter of the module.
    pub fn meta_data(&self, name: &str) -> Option<u64> {
        self.su64(ModuleMetric::MetaData).get(name).copied()
    }

    /// Returns `true` if the visitor has been counted for the data key.
    pub fn has_visitor(&self, key: CompositeKey) -> bool {
        self.u648(ModuleMetric::UniqMap).contains_key(&key.packed())
    }

    /// Records a visitor for a data key and returns `true` if it was not seen before.
    pub(crate) fn insert_uniqmap(&mut self, key: CompositeKey) -> bool {
        match self.u648_mut(ModuleMetric::UniqMap).entry(key.packed()) {
            hashbrown::hash_map::Entry::Occupied(_) => false,
            hashbrown::hash_map::Entry::Vacant(entry) => {
                entry.insert(1);
                true
            }
        }
    }
}

impl GlobalStorage {
    /// Returns the unique visitor key of an `IP|DATE|UA` string.
    ///
    /// Unique keys are only stored in partitions, so the cache never finds one.
    pub fn unique_key(&self, text: &str) -> Option<u32> {
        if !GlobalMetric::UniqueKeys.in_scope(self.scope) {
            return None;
        }
        self.si32(GlobalMetric::UniqueKeys).get(text).copied()
    }

    /// Returns the key of a user agent string.
    pub fn agent_key(&self, agent: &str) -> Option<u32> {
        self.si32(GlobalMetric::AgentKeys).get(agent).copied()
    }

    /// Returns the user agent string of a key.
    pub fn agent_value(&self, key: u32) -> Option<&str> {
        self.is32(GlobalMetric::AgentVals).get(&key).map(AsRef::as_ref)
    }

    /// Returns the number of valid requests, which is zero in the cache.
    pub fn cnt_valid(&self) -> u32 {
        if !GlobalMetric::CntValid.in_scope(self.scope) {
            return 0;
        }
        self.ii32(GlobalMetric::CntValid)
            .get(&COUNTER_KEY)
            .copied()
            .unwrap_or(0)
    }

    /// Returns the bandwidth of all valid requests, which is zero in the cache.
    pub fn cnt_bw(&self) -> u64 {
        if !GlobalMetric::CntBw.in_scope(self.scope) {
            return 0;
        }
        self.iu64(GlobalMetric::CntBw)
            .get(&COUNTER_KEY)
            .copied()
            .unwrap_or(0)
    }

    pub(crate) fn inc_cnt_valid(&mut self, inc: u32) -> u32 {
        self.inc_u32(GlobalMetric::CntValid, COUNTER_KEY, inc)
    }

    pub(crate) fn inc_cnt_bw(&mut self, inc: u64) -> u64 {
        self.inc_u64(GlobalMetric::CntBw, COUNTER_KEY, inc)
    }
}

impl ProcessStorage {
    pub(crate) fn hostname(&self, ip: &str) -> Option<&str> {
        self.ss32(ProcessMetric::Hostnames)
            .get(ip)
            .map(AsRef::as_ref)
    }

    pub(crate) fn set_hostname(&mut self, ip: &str, host: &str) {
        self.ss32_mut(ProcessMetric::Hostnames)
            .insert(Arc::from(ip), Arc::from(host));
    }

    pub(crate) fn sequence(&self, name: &str) -> u64 {
        self.su64(ProcessMetric::Sequences)
            .get(name)
            .copied()
            .unwrap_or(0)
    }

    /// Advances a named sequence and returns its new value.
    pub(crate) fn next_sequence(&mut self, name: &str) -> u64 {
        self.add_named(ProcessMetric::Sequences, name, 1).1
    }

    pub(crate) fn overall(&self, name: &str) -> u32 {
        self.si32(ProcessMetric::Overall)
            .get(name)
            .copied()
            .unwrap_or(0)
    }

    pub(crate) fn last_parse(&self, inode: u32) -> Option<u32> {
        self.ii32(ProcessMetric::LastParse).get(&inode).copied()
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn test_intern_numbers_from_one() {
        let mut table = ModuleStorage::new(Scope::Partition);

        let first = table.intern(ModuleMetric::KeyMap, "/index.php");
        let second = table.intern(ModuleMetric::KeyMap, "/about");
        let again = table.intern(ModuleMetric::KeyMap, "/index.php");

        assert_eq!((first.id, first.is_new), (1, true));
        assert_eq!((second.id, second.is_new), (2, true));
        assert_eq!((again.id, again.is_new), (1, false));
        assert!(Arc::ptr_eq(&first.text, &again.text));
    }

    #[test]
    fn test_intern_shared_reuses_string() {
        let mut dated = ModuleStorage::new(Scope::Partition);
        let mut cache = ModuleStorage::new(Scope::Cache);

        let interned = dated.intern(ModuleMetric::KeyMap, "Windows");
        let cached = cache.intern_shared(ModuleMetric::KeyMap, &interned.text);

        assert_eq!(cached.id, 1);
        assert!(Arc::ptr_eq(&interned.text, &cached.text));
    }

    #[test]
    fn test_intern_numbered_advances_autoincrement() {
        let mut table = GlobalStorage::new(Scope::Partition);

        let numbered = table.intern_numbered(GlobalMetric::AgentKeys, "curl", || 7);
        assert_eq!(numbered.id, 7);

        let next = table.intern(GlobalMetric::AgentKeys, "wget");
        assert_eq!(next.id, 8);
    }

    #[test]
    fn test_aggregation_helpers() {
        let mut table = ModuleStorage::new(Scope::Partition);

        assert_eq!(table.inc_u32(ModuleMetric::Hits, 1, 3), 3);
        assert_eq!(table.inc_u32(ModuleMetric::Hits, 1, 2), 5);
        assert_eq!(table.inc_u32(ModuleMetric::Hits, 1, u32::MAX), u32::MAX);

        assert_eq!(table.max_u64(ModuleMetric::MaxTs, 1, 20), 20);
        assert_eq!(table.max_u64(ModuleMetric::MaxTs, 1, 10), 20);
        assert_eq!(table.max_u64(ModuleMetric::MaxTs, 1, 30), 30);

        assert!(table.push_unique(ModuleMetric::Agents, 1, 4));
        assert!(!table.push_unique(ModuleMetric::Agents, 1, 4));
        assert!(table.push_unique(ModuleMetric::Agents, 1, 2));
        assert_eq!(table.agents(1), Some(&[4, 2][..]));
    }

    #[test]
    fn test_named_counters() {
        let mut table = ModuleStorage::new(Scope::Partition);
        let (name, total) = table.add_named(ModuleMetric::MetaData, "hits", 2);
        assert_eq!(total, 2);

        let mut cache = ModuleStorage::new(Scope::Cache);
        assert_eq!(cache.add_named_shared(ModuleMetric::MetaData, &name, 2), 2);
        assert_eq!(cache.add_named_shared(ModuleMetric::MetaData, &name, 3), 5);
        assert_eq!(table.add_named(ModuleMetric::MetaData, "hits", 1).1, 3);
    }

    #[test]
    fn test_uniqmap_dedup() {
        let mut table = ModuleStorage::new(Scope::Partition);
        let key = CompositeKey::new(1, 4);

        assert!(!table.has_visitor(key));
        assert!(table.insert_uniqmap(key));
        assert!(!table.insert_uniqmap(key));
        assert!(table.has_visitor(key));
        assert!(!table.has_visitor(CompositeKey::new(4, 1)));
    }

    #[test]
    fn test_dynamic_access() {
        let mut table = ModuleStorage::new(Scope::Partition);

        table
            .insert(ModuleMetric::Bw, MapKey::Int(1), MapValue::Wide(512))
            .unwrap();
        assert_eq!(table.bw(1), Some(512));
        assert_eq!(
            table.get(ModuleMetric::Bw, MapKey::Int(1)),
            Ok(Some(MapValue::Wide(512)))
        );

        assert_eq!(
            table.delete(ModuleMetric::Bw, MapKey::Int(1)),
            Ok(MapValue::Wide(512))
        );
        assert_eq!(
            table.delete(ModuleMetric::Bw, MapKey::Int(1)),
            Err(StorageError::KeyNotFound { metric: "bw" })
        );
    }

    #[test]
    fn test_dynamic_insert_reserves_interned_id() {
        let mut table = ModuleStorage::new(Scope::Partition);

        table
            .insert(ModuleMetric::KeyMap, MapKey::Str("/x"), MapValue::Int(1))
            .unwrap();
        let next = table.intern(ModuleMetric::KeyMap, "/y");

        assert_eq!((next.id, next.is_new), (2, true));
        assert_eq!(table.keymap("/x"), Some(1));
        assert_eq!(table.keymap("/y"), Some(2));
    }

    #[test]
    fn test_cache_skips_dated_globals() {
        let mut cache = GlobalStorage::new(Scope::Cache);

        assert!(cache.map(GlobalMetric::UniqueKeys).is_none());
        assert!(cache.map(GlobalMetric::AgentKeys).is_some());
        assert_eq!((cache.cnt_valid(), cache.cnt_bw()), (0, 0));
        assert_eq!(cache.unique_key("1.2.3.4|20200427|curl"), None);

        let err = cache
            .insert(GlobalMetric::CntValid, MapKey::Int(1), MapValue::Int(1))
            .unwrap_err();
        insta::assert_snapshot!(err, @"metric cnt_valid is not stored in the cache scope");
        assert_eq!(cache.len(GlobalMetric::CntValid), 0);
    }

    #[test]
    fn test_dynamic_shape_mismatch() {
        let mut table = ModuleStorage::new(Scope::Partition);

        let err = table
            .insert(ModuleMetric::KeyMap, MapKey::Int(1), MapValue::Int(1))
            .unwrap_err();
        insta::assert_snapshot!(err, @"operand does not fit metric keymap of shape si32");

        assert_eq!(
            table.get(ModuleMetric::Hits, MapKey::Str("/")),
            Err(StorageError::ShapeMismatch {
                metric: "hits",
                shape: MapShape::II32,
            })
        );
    }

    #[test]
    #[should_panic(expected = "metric hits is not backed by an iu64 map")]
    fn test_typed_access_fails_fast() {
        let table = ModuleStorage::new(Scope::Partition);
        table.iu64(ModuleMetric::Hits);
    }

    #[test]
    fn test_destroy_reports_cost() {
        let mut table = ModuleStorage::new(Scope::Partition);
        table.intern(ModuleMetric::KeyMap, "/index.php");
        table.inc_u32(ModuleMetric::Hits, 1, 1);

        let cost = table.cost();
        assert!(cost > 0);
        assert_eq!(table.destroy(), cost);
    }
}
