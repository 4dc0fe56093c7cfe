use std::time::Instant;

use tally_common::NumDate;

use crate::config::StorageConfig;
use crate::error::StorageError;
use crate::metric::{OverallCounter, ProcessMetric, Scope};
use crate::module::Module;
use crate::partition::{DateIndex, Partition, Tables};
use crate::table::{GlobalStorage, ModuleStorage, ProcessStorage};

/// Name of the sequence numbering unique visitor keys across all partitions.
pub(crate) const UNIQUE_KEYS_SEQ: &str = "ht_unique_keys";

/// Name of the sequence numbering user agent keys across all partitions.
pub(crate) const AGENT_KEYS_SEQ: &str = "ht_agent_keys";

/// The in-memory storage of all aggregated log data.
///
/// Log data is partitioned by the date of the request. Every partition holds one
/// [`ModuleStorage`] per [`Module`] and a single [`GlobalStorage`]. On top of the partitions, the
/// storage maintains a cache that merges all partitions, from which reports are read.
///
/// The storage is not synchronized. Wrap it in a [`SharedStorage`](crate::SharedStorage) when
/// multiple workers ingest concurrently.
#[derive(Debug)]
pub struct Storage {
    pub(crate) config: StorageConfig,
    pub(crate) dates: DateIndex,
    pub(crate) cache: Tables,
    pub(crate) process: ProcessStorage,
}

impl Storage {
    /// Creates an empty storage.
    pub fn new(config: StorageConfig) -> Self {
        Self {
            config,
            dates: DateIndex::new(),
            cache: Tables::new(Scope::Cache),
            process: ProcessStorage::new(Scope::Process),
        }
    }

    /// Returns the configuration of this storage.
    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Creates the partition for `date` and returns `true` if it did not exist before.
    ///
    /// Inserting data for a date creates its partition implicitly, so calling this is optional.
    pub fn insert_date(&mut self, date: NumDate) -> bool {
        self.dates.insert(date)
    }

    /// Removes the partition of `date` and all data stored in it.
    ///
    /// The cross-date cache still contains the data of the removed partition until
    /// [`rebuild_rawdata_cache`](Self::rebuild_rawdata_cache) is called.
    pub fn invalidate_date(&mut self, date: NumDate) -> Result<(), StorageError> {
        let Some(partition) = self.dates.remove(date) else {
            tally_log::debug!(%date, "cannot invalidate missing date partition");
            return Err(StorageError::DateNotFound(date));
        };

        let freed = partition.destroy();
        tally_log::debug!(%date, freed, "invalidated date partition");
        Ok(())
    }

    /// Returns the dates of all partitions in ascending order.
    pub fn sorted_dates(&self) -> Vec<NumDate> {
        self.dates.sorted_dates()
    }

    /// Returns the number of date partitions.
    pub fn size_dates(&self) -> usize {
        self.dates.len()
    }

    /// Returns the partition of `date`.
    pub fn partition(&self, date: NumDate) -> Option<&Partition> {
        self.dates.get(date)
    }

    /// Returns the partition of `date` for direct mutation.
    pub fn partition_mut(&mut self, date: NumDate) -> Option<&mut Partition> {
        self.dates.get_mut(date)
    }

    /// Iterates all partitions in ascending date order.
    pub fn partitions(&self) -> impl Iterator<Item = &Partition> {
        self.dates.iter_sorted()
    }

    /// Returns the cross-date cache of a module.
    pub fn cache(&self, module: Module) -> &ModuleStorage {
        self.cache.module(module)
    }

    /// Returns the cross-date cache of the global metrics.
    pub fn cache_global(&self) -> &GlobalStorage {
        self.cache.global()
    }

    /// Removes all partitions along with all process-wide data.
    pub fn free_storage(&mut self) {
        let cache = std::mem::replace(&mut self.cache, Tables::new(Scope::Cache));
        let process = std::mem::replace(&mut self.process, ProcessStorage::new(Scope::Process));

        let freed = self.dates.clear() + cache.destroy() + process.destroy();
        tally_log::debug!(freed, "freed storage");
    }

    /// Invalidates the oldest partitions exceeding [`StorageConfig::keep_last`].
    ///
    /// Returns the dates of the evicted partitions in ascending order.
    pub fn evict_expired(&mut self) -> Vec<NumDate> {
        let Some(keep_last) = self.config.keep_last else {
            return Vec::new();
        };

        let dates = self.dates.sorted_dates();
        let expired = dates.len().saturating_sub(keep_last);
        if expired == 0 {
            return Vec::new();
        }

        let start = Instant::now();
        let evicted = dates[..expired].to_vec();

        let freed: usize = evicted
            .iter()
            .filter_map(|date| self.dates.remove(*date))
            .map(Partition::destroy)
            .sum();

        if self.config.rebuild_on_evict {
            self.rebuild_rawdata_cache();
        }

        tally_log::info!(
            evicted = evicted.len(),
            freed,
            duration = ?start.elapsed(),
            "evicted expired partitions"
        );

        evicted
    }

    /// Estimates the number of bytes held by the storage.
    ///
    /// Strings shared between partitions and the cache are counted once.
    pub fn cost(&self) -> usize {
        self.dates.cost() + self.cache.cost() + self.process.cost()
    }

    /// Caches the resolved host name of an IP address.
    pub fn insert_hostname(&mut self, ip: &str, host: &str) {
        self.process.set_hostname(ip, host);
    }

    /// Returns the cached host name of an IP address.
    pub fn get_hostname(&self, ip: &str) -> Option<&str> {
        self.process.hostname(ip)
    }

    /// Advances the named sequence and returns its new value, starting at `1`.
    pub fn insert_unique_seq(&mut self, name: &str) -> u64 {
        self.process.next_sequence(name)
    }

    /// Returns the current value of a named sequence.
    pub fn get_unique_seq(&self, name: &str) -> u64 {
        self.process.sequence(name)
    }

    /// Adds `inc` to an overall counter and returns the new total.
    pub fn inc_cnt_overall(&mut self, counter: OverallCounter, inc: u32) -> u32 {
        self.process
            .add_named_u32(ProcessMetric::Overall, counter.as_str(), inc)
    }

    /// Returns the number of processed lines.
    pub fn processed(&self) -> u32 {
        self.process.overall(OverallCounter::Processed.as_str())
    }

    /// Returns the number of lines that failed to parse.
    pub fn invalid(&self) -> u32 {
        self.process.overall(OverallCounter::Invalid.as_str())
    }

    /// Returns the number of seconds spent processing.
    pub fn processing_time(&self) -> u32 {
        self.process.overall(OverallCounter::ProcessingTime.as_str())
    }

    /// Returns the number of lines skipped due to an excluded IP.
    pub fn excluded_ips(&self) -> u32 {
        self.process.overall(OverallCounter::ExcludedIp.as_str())
    }

    /// Remembers the last line parsed from the log with the given inode.
    pub fn insert_last_parse(&mut self, inode: u32, line: u32) {
        self.process.set_u32(ProcessMetric::LastParse, inode, line);
    }

    /// Returns the last line parsed from the log with the given inode.
    pub fn last_parse(&self, inode: u32) -> Option<u32> {
        self.process.last_parse(inode)
    }

    /// Advances a sequence for numbering keys, saturating at the largest key.
    ///
    /// Once saturated, all new strings of the sequence share the largest key.
    pub(crate) fn next_key(process: &mut ProcessStorage, sequence: &str) -> u32 {
        let next = process.next_sequence(sequence);
        u32::try_from(next).unwrap_or_else(|_| {
            if next == u64::from(u32::MAX) + 1 {
                tally_log::warn!(sequence, "key sequence exhausted, reusing the largest key");
            }
            u32::MAX
        })
    }
}

impl Default for Storage {
    fn default() -> Self {
        Self::new(StorageConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    fn date(value: u32) -> NumDate {
        NumDate::new(value).unwrap()
    }

    #[test]
    fn test_invalidate_missing_date() {
        tally_test::setup();
        let mut storage = Storage::default();

        assert!(storage.insert_date(date(20200427)));
        assert!(!storage.insert_date(date(20200427)));
        assert_eq!(storage.invalidate_date(date(20200427)), Ok(()));

        let err = storage.invalidate_date(date(20200427)).unwrap_err();
        insta::assert_snapshot!(err, @"no partition for date 20200427");
        assert_eq!(storage.size_dates(), 0);
    }

    #[test]
    fn test_evict_expired_keeps_latest() {
        tally_test::setup();
        let mut storage = Storage::new(StorageConfig {
            keep_last: Some(2),
            ..Default::default()
        });

        for value in [20200428, 20200426, 20200427, 20200429] {
            storage.insert_date(date(value));
        }

        assert_eq!(
            storage.evict_expired(),
            vec![date(20200426), date(20200427)]
        );
        assert_eq!(storage.sorted_dates(), vec![date(20200428), date(20200429)]);
        assert!(storage.evict_expired().is_empty());
    }

    #[test]
    fn test_evict_unbounded() {
        let mut storage = Storage::default();
        storage.insert_date(date(20200427));
        assert!(storage.evict_expired().is_empty());
        assert_eq!(storage.size_dates(), 1);
    }

    #[test]
    fn test_hostname_cache() {
        let mut storage = Storage::default();
        assert_eq!(storage.get_hostname("127.0.0.1"), None);

        storage.insert_hostname("127.0.0.1", "localhost");
        assert_eq!(storage.get_hostname("127.0.0.1"), Some("localhost"));
    }

    #[test]
    fn test_overall_counters() {
        let mut storage = Storage::default();
        storage.inc_cnt_overall(OverallCounter::Processed, 3);
        storage.inc_cnt_overall(OverallCounter::Processed, 2);
        storage.inc_cnt_overall(OverallCounter::Invalid, 1);
        storage.inc_cnt_overall(OverallCounter::ExcludedIp, 4);

        assert_eq!(storage.processed(), 5);
        assert_eq!(storage.invalid(), 1);
        assert_eq!(storage.excluded_ips(), 4);
        assert_eq!(storage.processing_time(), 0);
    }

    #[test]
    fn test_sequences_and_last_parse() {
        let mut storage = Storage::default();
        assert_eq!(storage.insert_unique_seq("ht_unique_keys"), 1);
        assert_eq!(storage.insert_unique_seq("ht_unique_keys"), 2);
        assert_eq!(storage.get_unique_seq("ht_unique_keys"), 2);
        assert_eq!(storage.get_unique_seq("ht_agent_keys"), 0);

        storage.insert_last_parse(42, 1000);
        storage.insert_last_parse(42, 1200);
        assert_eq!(storage.last_parse(42), Some(1200));
        assert_eq!(storage.last_parse(7), None);
    }

    #[test]
    fn test_key_sequence_saturates() {
        tally_test::setup();
        let mut storage = Storage::default();
        let day = date(20200427);

        storage
            .process
            .su64_mut(ProcessMetric::Sequences)
            .insert(UNIQUE_KEYS_SEQ.into(), u64::from(u32::MAX) - 1);

        assert_eq!(storage.insert_unique_key(day, "1.2.3.4|20200427|curl"), u32::MAX);
        assert_eq!(storage.insert_unique_key(day, "5.6.7.8|20200427|curl"), u32::MAX);
        assert_eq!(storage.insert_unique_key(day, "9.9.9.9|20200427|curl"), u32::MAX);
        assert_eq!(
            storage.get_unique_seq(UNIQUE_KEYS_SEQ),
            u64::from(u32::MAX) + 2
        );
    }

    #[test]
    fn test_free_storage() {
        let mut storage = Storage::default();
        storage.insert_date(date(20200427));
        storage.insert_hostname("127.0.0.1", "localhost");

        storage.free_storage();
        assert_eq!(storage.size_dates(), 0);
        assert_eq!(storage.get_hostname("127.0.0.1"), None);
    }
}
