//! Date partitions and the index holding them.

use hashbrown::HashMap;
use itertools::Itertools;
use tally_common::NumDate;

use crate::metric::{DATE_INDEX, Scope};
use crate::module::Module;
use crate::shape::{MapShape, MetricMap, shape_violation};
use crate::table::{GlobalStorage, ModuleStorage};

/// The module tables and the global table of one scope.
#[derive(Debug)]
pub(crate) struct Tables {
    modules: Box<[ModuleStorage]>,
    global: GlobalStorage,
}

impl Tables {
    pub fn new(scope: Scope) -> Self {
        Self {
            modules: Module::ALL
                .iter()
                .map(|_| ModuleStorage::new(scope))
                .collect(),
            global: GlobalStorage::new(scope),
        }
    }

    pub fn module(&self, module: Module) -> &ModuleStorage {
        &self.modules[module.index()]
    }

    pub fn module_mut(&mut self, module: Module) -> &mut ModuleStorage {
        &mut self.modules[module.index()]
    }

    pub fn global(&self) -> &GlobalStorage {
        &self.global
    }

    pub fn global_mut(&mut self) -> &mut GlobalStorage {
        &mut self.global
    }

    pub fn cost(&self) -> usize {
        self.modules.iter().map(ModuleStorage::cost).sum::<usize>() + self.global.cost()
    }

    pub fn destroy(self) -> usize {
        let modules: usize = self
            .modules
            .into_vec()
            .into_iter()
            .map(ModuleStorage::destroy)
            .sum();

        modules + self.global.destroy()
    }
}

/// All maps scoped to one calendar date; the unit of invalidation.
#[derive(Debug)]
pub struct Partition {
    date: NumDate,
    tables: Tables,
}

impl Partition {
    pub(crate) fn new(date: NumDate) -> Self {
        Self {
            date,
            tables: Tables::new(Scope::Partition),
        }
    }

    /// Returns the date of this partition.
    pub fn date(&self) -> NumDate {
        self.date
    }

    /// Returns the tables of a module within this partition.
    pub fn module(&self, module: Module) -> &ModuleStorage {
        self.tables.module(module)
    }

    /// Returns the tables of a module for direct mutation.
    ///
    /// Writes through this bypass the cross-date cache, which has to be rebuilt afterwards.
    pub fn module_mut(&mut self, module: Module) -> &mut ModuleStorage {
        self.tables.module_mut(module)
    }

    /// Returns the global table of this partition.
    pub fn global(&self) -> &GlobalStorage {
        self.tables.global()
    }

    pub(crate) fn tables_mut(&mut self) -> &mut Tables {
        &mut self.tables
    }

    /// Estimates the number of bytes held by this partition.
    pub fn cost(&self) -> usize {
        std::mem::size_of::<Self>() + self.tables.cost()
    }

    /// Releases all maps and returns the estimated number of bytes freed.
    pub(crate) fn destroy(self) -> usize {
        std::mem::size_of::<Self>() + self.tables.destroy()
    }
}

/// Maps dates to their partition.
#[derive(Debug)]
pub(crate) struct DateIndex {
    map: MetricMap,
}

impl DateIndex {
    pub fn new() -> Self {
        Self {
            map: DATE_INDEX.alloc(),
        }
    }

    fn partitions(&self) -> &HashMap<u32, Box<Partition>> {
        match &self.map {
            MetricMap::IGKH(map) => map,
            _ => shape_violation("dates", MapShape::IGKH),
        }
    }

    fn partitions_mut(&mut self) -> &mut HashMap<u32, Box<Partition>> {
        match &mut self.map {
            MetricMap::IGKH(map) => map,
            _ => shape_violation("dates", MapShape::IGKH),
        }
    }

    /// Creates the partition for `date` unless it exists and returns `true` if it was created.
    pub fn insert(&mut self, date: NumDate) -> bool {
        match self.partitions_mut().entry(date.as_u32()) {
            hashbrown::hash_map::Entry::Occupied(_) => false,
            hashbrown::hash_map::Entry::Vacant(entry) => {
                entry.insert(Box::new(Partition::new(date)));
                tally_log::debug!(%date, "created date partition");
                true
            }
        }
    }

    pub fn get(&self, date: NumDate) -> Option<&Partition> {
        self.partitions()
            .get(&date.as_u32())
            .map(|partition| &**partition)
    }

    pub fn get_mut(&mut self, date: NumDate) -> Option<&mut Partition> {
        self.partitions_mut()
            .get_mut(&date.as_u32())
            .map(|partition| &mut **partition)
    }

    pub fn get_or_create(&mut self, date: NumDate) -> &mut Partition {
        self.partitions_mut()
            .entry(date.as_u32())
            .or_insert_with(|| {
                tally_log::debug!(%date, "created date partition");
                Box::new(Partition::new(date))
            })
    }

    pub fn remove(&mut self, date: NumDate) -> Option<Partition> {
        self.partitions_mut()
            .remove(&date.as_u32())
            .map(|partition| *partition)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn sorted_dates(&self) -> Vec<NumDate> {
        self.iter_sorted().map(Partition::date).collect()
    }

    /// Iterates partitions in ascending date order.
    pub fn iter_sorted(&self) -> impl Iterator<Item = &Partition> {
        self.partitions()
            .values()
            .map(|partition| &**partition)
            .sorted_by_key(|partition| partition.date())
    }

    /// Removes all partitions and returns the estimated number of bytes freed.
    pub fn clear(&mut self) -> usize {
        self.partitions_mut()
            .drain()
            .map(|(_, partition)| partition.destroy())
            .sum()
    }

    pub fn cost(&self) -> usize {
        self.map.cost(DATE_INDEX.values)
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
    fn test_insert_is_idempotent() {
        let mut index = DateIndex::new();
        assert!(index.insert(date(20200427)));
        assert!(!index.insert(date(20200427)));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_sorted_dates() {
        let mut index = DateIndex::new();
        for value in [20200501, 20191231, 20200427] {
            index.get_or_create(date(value));
        }

        insta::assert_debug_snapshot!(index.sorted_dates(), @r###"
        [
            NumDate(20191231),
            NumDate(20200427),
            NumDate(20200501),
        ]
        "###);
    }

    #[test]
    fn test_remove_and_clear() {
        let mut index = DateIndex::new();
        index.get_or_create(date(20200427));
        index.get_or_create(date(20200428));

        assert!(index.remove(date(20200427)).is_some());
        assert!(index.remove(date(20200427)).is_none());
        assert!(index.get(date(20200428)).is_some());

        assert!(index.clear() > 0);
        assert_eq!(index.len(), 0);
    }

    #[test]
    fn test_partition_cost_includes_tables() {
        let mut partition = Partition::new(date(20200427));
        let empty = partition.cost();

        partition
            .module_mut(Module::Requests)
            .intern(crate::metric::ModuleMetric::KeyMap, "/index.php");
        assert!(partition.cost() > empty);
    }
}
