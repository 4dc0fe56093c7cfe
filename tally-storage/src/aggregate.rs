//! Aggregation of numeric metrics and reads from the cross-date cache.
//!
//! Writes address a data key within a date partition and the corresponding cache key returned by
//! [`Storage::insert_keymap`]. Both are updated with the same semantics:
//!
//!  - `hits`, `bw` and `cumts` add the increment to the stored value, starting at zero.
//!  - `maxts` keeps the maximum of all values.
//!  - `visitors` counts distinct unique visitor keys.
//!
//! Totals saturate at the maximum of their integer type.

use itertools::{Itertools, MinMaxResult};
use tally_common::NumDate;

use crate::codec::CompositeKey;
use crate::metric::ModuleMetric;
use crate::module::Module;
use crate::storage::Storage;
use crate::table::ModuleStorage;

impl Storage {
    /// Adds `inc` to the hits of a data key and returns the new total within the partition.
    pub fn insert_hits(
        &mut self,
        module: Module,
        date: NumDate,
        key: u32,
        inc: u32,
        ckey: u32,
    ) -> u32 {
        self.cache
            .module_mut(module)
            .inc_u32(ModuleMetric::Hits, ckey, inc);
        self.dated_mut(module, date)
            .inc_u32(ModuleMetric::Hits, key, inc)
    }

    /// Adds `inc` bytes to the bandwidth of a data key and returns the new total.
    pub fn insert_bw(
        &mut self,
        module: Module,
        date: NumDate,
        key: u32,
        inc: u64,
        ckey: u32,
    ) -> u64 {
        self.cache
            .module_mut(module)
            .inc_u64(ModuleMetric::Bw, ckey, inc);
        self.dated_mut(module, date).inc_u64(ModuleMetric::Bw, key, inc)
    }

    /// Adds `inc` to the cumulative time served for a data key and returns the new total.
    pub fn insert_cumts(
        &mut self,
        module: Module,
        date: NumDate,
        key: u32,
        inc: u64,
        ckey: u32,
    ) -> u64 {
        self.cache
            .module_mut(module)
            .inc_u64(ModuleMetric::CumTs, ckey, inc);
        self.dated_mut(module, date)
            .inc_u64(ModuleMetric::CumTs, key, inc)
    }

    /// Raises the maximum time served for a data key to `value` and returns the new maximum.
    pub fn insert_maxts(
        &mut self,
        module: Module,
        date: NumDate,
        key: u32,
        value: u64,
        ckey: u32,
    ) -> u64 {
        self.cache
            .module_mut(module)
            .max_u64(ModuleMetric::MaxTs, ckey, value);
        self.dated_mut(module, date)
            .max_u64(ModuleMetric::MaxTs, key, value)
    }

    /// Records that a visitor requested a data key.
    ///
    /// Returns `true` if the pair has not been recorded in the partition before.
    pub fn insert_uniqmap(
        &mut self,
        module: Module,
        date: NumDate,
        key: u32,
        uniq_key: u32,
    ) -> bool {
        self.dated_mut(module, date)
            .insert_uniqmap(CompositeKey::new(key, uniq_key))
    }

    /// Counts a visitor of a data key once per partition.
    ///
    /// The first time `uniq_key` is seen with `key` in the partition, `inc` is added to the
    /// visitors of the data key and of its cache key. Repeated calls leave the counts unchanged.
    /// Returns the number of visitors of the data key within the partition.
    pub fn insert_visitor(
        &mut self,
        module: Module,
        date: NumDate,
        key: u32,
        uniq_key: u32,
        inc: u32,
        ckey: u32,
    ) -> u32 {
        let dated = self.dated_mut(module, date);
        if !dated.insert_uniqmap(CompositeKey::new(key, uniq_key)) {
            return dated.visitors(key).unwrap_or(0);
        }

        let total = dated.inc_u32(ModuleMetric::Visitors, key, inc);
        self.cache
            .module_mut(module)
            .inc_u32(ModuleMetric::Visitors, ckey, inc);
        total
    }

    /// Groups a data key under a root key.
    ///
    /// `key` and `value` are the data and root key within the partition, `dkey` and `rkey` the
    /// corresponding cache keys.
    pub fn insert_root(
        &mut self,
        module: Module,
        date: NumDate,
        key: u32,
        value: u32,
        dkey: u32,
        rkey: u32,
    ) {
        self.dated_mut(module, date)
            .set_u32(ModuleMetric::Root, key, value);
        self.cache
            .module_mut(module)
            .set_u32(ModuleMetric::Root, dkey, rkey);
    }

    /// Adds `inc` to the valid requests of a date and returns the new total for that date.
    pub fn inc_cnt_valid(&mut self, date: NumDate, inc: u32) -> u32 {
        self.dates
            .get_or_create(date)
            .tables_mut()
            .global_mut()
            .inc_cnt_valid(inc)
    }

    /// Adds `inc` to the bandwidth of all valid requests of a date.
    pub fn inc_cnt_bw(&mut self, date: NumDate, inc: u64) -> u64 {
        self.dates
            .get_or_create(date)
            .tables_mut()
            .global_mut()
            .inc_cnt_bw(inc)
    }

    /// Returns the number of valid requests across all partitions.
    pub fn sum_valid(&self) -> u64 {
        self.partitions()
            .map(|partition| u64::from(partition.global().cnt_valid()))
            .sum()
    }

    /// Returns the bandwidth of all valid requests across all partitions.
    pub fn sum_bw(&self) -> u64 {
        self.partitions()
            .fold(0, |sum: u64, partition| {
                sum.saturating_add(partition.global().cnt_bw())
            })
    }

    fn dated_mut(&mut self, module: Module, date: NumDate) -> &mut ModuleStorage {
        self.dates
            .get_or_create(date)
            .tables_mut()
            .module_mut(module)
    }

    /// Returns the cache key of an interned string.
    pub fn get_keymap(&self, module: Module, text: &str) -> Option<u32> {
        self.cache(module).keymap(text)
    }

    /// Returns the keys of an interned string in every partition, in ascending date order.
    pub fn get_keymap_list_from_key(&self, module: Module, text: &str) -> Vec<u32> {
        self.partitions()
            .filter_map(|partition| partition.module(module).keymap(text))
            .collect()
    }

    /// Returns the display string of a cache key.
    pub fn get_datamap(&self, module: Module, ckey: u32) -> Option<&str> {
        self.cache(module).data_label(ckey)
    }

    /// Returns the display string of the root a cache key is grouped under.
    pub fn get_root(&self, module: Module, ckey: u32) -> Option<&str> {
        let cache = self.cache(module);
        cache.root_label(cache.root(ckey)?)
    }

    /// Returns the hits of a cache key across all partitions.
    pub fn get_hits(&self, module: Module, ckey: u32) -> Option<u32> {
        self.cache(module).hits(ckey)
    }

    /// Returns the visitors of a cache key across all partitions.
    pub fn get_visitors(&self, module: Module, ckey: u32) -> Option<u32> {
        self.cache(module).visitors(ckey)
    }

    /// Returns the bandwidth of a cache key across all partitions.
    pub fn get_bw(&self, module: Module, ckey: u32) -> Option<u64> {
        self.cache(module).bw(ckey)
    }

    /// Returns the cumulative time served of a cache key across all partitions.
    pub fn get_cumts(&self, module: Module, ckey: u32) -> Option<u64> {
        self.cache(module).cumts(ckey)
    }

    /// Returns the maximum time served of a cache key across all partitions.
    pub fn get_maxts(&self, module: Module, ckey: u32) -> Option<u64> {
        self.cache(module).maxts(ckey)
    }

    /// Returns the request method of a cache key.
    pub fn get_method(&self, module: Module, ckey: u32) -> Option<&str> {
        self.cache(module).method(ckey)
    }

    /// Returns the request protocol of a cache key.
    pub fn get_protocol(&self, module: Module, ckey: u32) -> Option<&str> {
        self.cache(module).protocol(ckey)
    }

    /// Returns a named counter of the module across all partitions.
    pub fn get_meta_data(&self, module: Module, name: &str) -> Option<u64> {
        self.cache(module).meta_data(name)
    }

    /// Returns the cache agent keys seen with a cache key.
    pub fn get_host_agent_list(&self, module: Module, ckey: u32) -> Option<&[u32]> {
        self.cache(module).agents(ckey)
    }

    /// Returns the user agent string of a cache agent key.
    pub fn get_host_agent_val(&self, agent_key: u32) -> Option<&str> {
        self.cache_global().agent_value(agent_key)
    }

    /// Returns the number of distinct data strings of a module across all partitions.
    pub fn size_datamap(&self, module: Module) -> usize {
        self.cache(module).len(ModuleMetric::DataMap)
    }

    /// Returns the number of visitor records of a module summed over all partitions.
    pub fn size_uniqmap(&self, module: Module) -> usize {
        self.partitions()
            .map(|partition| partition.module(module).len(ModuleMetric::UniqMap))
            .sum()
    }

    /// Returns the smallest and largest hits of a module, or `None` if there are none.
    pub fn get_hits_min_max(&self, module: Module) -> Option<(u32, u32)> {
        min_max(self.cache(module).ii32(ModuleMetric::Hits).values().copied())
    }

    /// Returns the smallest and largest visitors of a module.
    pub fn get_visitors_min_max(&self, module: Module) -> Option<(u32, u32)> {
        min_max(self.cache(module).ii32(ModuleMetric::Visitors).values().copied())
    }

    /// Returns the smallest and largest bandwidth of a module.
    pub fn get_bw_min_max(&self, module: Module) -> Option<(u64, u64)> {
        min_max(self.cache(module).iu64(ModuleMetric::Bw).values().copied())
    }

    /// Returns the smallest and largest cumulative time served of a module.
    pub fn get_cumts_min_max(&self, module: Module) -> Option<(u64, u64)> {
        min_max(self.cache(module).iu64(ModuleMetric::CumTs).values().copied())
    }

    /// Returns the smallest and largest maximum time served of a module.
    pub fn get_maxts_min_max(&self, module: Module) -> Option<(u64, u64)> {
        min_max(self.cache(module).iu64(ModuleMetric::MaxTs).values().copied())
    }
}

fn min_max<T: PartialOrd + Copy>(values: impl Iterator<Item = T>) -> Option<(T, T)> {
    match values.minmax() {
        MinMaxResult::NoElements => None,
        MinMaxResult::OneElement(value) => Some((value, value)),
        MinMaxResult::MinMax(min, max) => Some((min, max)),
    }
}
