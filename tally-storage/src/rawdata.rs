//! Reconstruction of report data from the cross-date cache.

use std::cmp::Reverse;
use std::sync::Arc;
use std::time::Instant;

use hashbrown::HashMap;
use itertools::Itertools;
use serde::Serialize;

use crate::metric::{GlobalMetric, ModuleMetric, Scope};
use crate::module::Module;
use crate::partition::{Partition, Tables};
use crate::storage::Storage;
use crate::table::ModuleStorage;

/// How the items of a [`RawData`] are ordered.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RawDataKind {
    /// Ordered by hits, highest first.
    Numeric,
    /// Ordered by the data label, last first.
    Text,
}

/// The aggregated metrics of one data key across all partitions.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RawDataItem {
    /// The cache key of the item.
    pub key: u32,
    /// The display string of the root the item is grouped under.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<Arc<str>>,
    /// The display string of the item.
    pub data: Arc<str>,
    /// Number of requests.
    pub hits: u32,
    /// Number of distinct visitors, counted once per date.
    pub visitors: u32,
    /// Bandwidth in bytes.
    pub bw: u64,
    /// Cumulative time served.
    pub cumts: u64,
    /// Maximum time served.
    pub maxts: u64,
    /// Request method, if recorded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<Arc<str>>,
    /// Request protocol, if recorded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<Arc<str>>,
}

/// All items of a module in report order.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RawData {
    /// The module the items belong to.
    pub module: Module,
    /// The order of [`items`](Self::items).
    pub kind: RawDataKind,
    /// One item per distinct data string.
    pub items: Vec<RawDataItem>,
}

impl RawData {
    /// Returns the number of items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` if the module holds no data.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl Storage {
    /// Joins the metrics of a module with their labels.
    ///
    /// Reads the cross-date cache, so the result reflects all live partitions only after
    /// [`rebuild_rawdata_cache`](Self::rebuild_rawdata_cache) has been called following an
    /// invalidation.
    pub fn parse_raw_data(&self, module: Module) -> RawData {
        let cache = self.cache(module);
        let kind = match module {
            Module::Visitors => RawDataKind::Text,
            _ => RawDataKind::Numeric,
        };

        let items = cache
            .is32(ModuleMetric::DataMap)
            .iter()
            .map(|(&key, data)| raw_data_item(cache, key, data));

        let items = match kind {
            RawDataKind::Text => items
                .sorted_by(|a, b| b.data.cmp(&a.data).then(a.key.cmp(&b.key)))
                .collect(),
            RawDataKind::Numeric => items
                .sorted_by_key(|item| (Reverse(item.hits), item.key))
                .collect(),
        };

        RawData {
            module,
            kind,
            items,
        }
    }

    /// Discards the cross-date cache and folds it again from all live partitions.
    ///
    /// Partitions are folded in ascending date order and strings in the order they were interned
    /// into their partition. If logs were ingested in date order, the rebuilt cache therefore
    /// assigns the same cache keys as live ingestion. Only data keys present in the keymap of their
    /// partition are carried over.
    pub fn rebuild_rawdata_cache(&mut self) {
        let start = Instant::now();
        let mut cache = Tables::new(Scope::Cache);

        for partition in self.dates.iter_sorted() {
            let agent_keys = fold_agents(partition, &mut cache);
            for module in Module::ALL {
                fold_module(partition.module(*module), cache.module_mut(*module), &agent_keys);
            }
        }

        let previous = std::mem::replace(&mut self.cache, cache);
        let freed = previous.destroy();

        tally_log::debug!(
            partitions = self.dates.len(),
            cost = self.cache.cost(),
            freed,
            duration = ?start.elapsed(),
            "rebuilt raw data cache"
        );
    }
}

fn raw_data_item(cache: &ModuleStorage, key: u32, data: &Arc<str>) -> RawDataItem {
    let root = cache
        .root(key)
        .and_then(|root| cache.is32(ModuleMetric::RootMap).get(&root))
        .cloned();

    RawDataItem {
        key,
        root,
        data: Arc::clone(data),
        hits: cache.hits(key).unwrap_or(0),
        visitors: cache.visitors(key).unwrap_or(0),
        bw: cache.bw(key).unwrap_or(0),
        cumts: cache.cumts(key).unwrap_or(0),
        maxts: cache.maxts(key).unwrap_or(0),
        method: cache.is32(ModuleMetric::Methods).get(&key).cloned(),
        protocol: cache.is32(ModuleMetric::Protocols).get(&key).cloned(),
    }
}

/// Interns the user agents of a partition into the cache and maps dated to cache agent keys.
fn fold_agents(partition: &Partition, cache: &mut Tables) -> HashMap<u32, u32> {
    let agents = partition.global().is32(GlobalMetric::AgentVals);
    let global = cache.global_mut();

    agents
        .iter()
        .sorted_by_key(|(key, _)| **key)
        .map(|(&key, agent)| {
            let cached = global.intern_shared(GlobalMetric::AgentKeys, agent);
            if cached.is_new {
                global.set_str(GlobalMetric::AgentVals, cached.id, cached.text);
            }
            (key, cached.id)
        })
        .collect()
}

fn fold_module(dated: &ModuleStorage, cache: &mut ModuleStorage, agent_keys: &HashMap<u32, u32>) {
    let ckeys: HashMap<u32, u32> = dated
        .si32(ModuleMetric::KeyMap)
        .iter()
        .sorted_by_key(|(_, key)| **key)
        .map(|(text, &key)| (key, cache.intern_shared(ModuleMetric::KeyMap, text).id))
        .collect();

    for metric in [
        ModuleMetric::RootMap,
        ModuleMetric::DataMap,
        ModuleMetric::Methods,
        ModuleMetric::Protocols,
    ] {
        for (key, value) in dated.is32(metric) {
            if let Some(&ckey) = ckeys.get(key) {
                cache.set_str(metric, ckey, Arc::clone(value));
            }
        }
    }

    for (key, root) in dated.ii32(ModuleMetric::Root) {
        if let (Some(&dkey), Some(&rkey)) = (ckeys.get(key), ckeys.get(root)) {
            cache.set_u32(ModuleMetric::Root, dkey, rkey);
        }
    }

    for metric in [ModuleMetric::Hits, ModuleMetric::Visitors] {
        for (key, &value) in dated.ii32(metric) {
            if let Some(&ckey) = ckeys.get(key) {
                cache.inc_u32(metric, ckey, value);
            }
        }
    }

    for metric in [ModuleMetric::Bw, ModuleMetric::CumTs] {
        for (key, &value) in dated.iu64(metric) {
            if let Some(&ckey) = ckeys.get(key) {
                cache.inc_u64(metric, ckey, value);
            }
        }
    }

    for (key, &value) in dated.iu64(ModuleMetric::MaxTs) {
        if let Some(&ckey) = ckeys.get(key) {
            cache.max_u64(ModuleMetric::MaxTs, ckey, value);
        }
    }

    for (key, agents) in dated.igsl(ModuleMetric::Agents) {
        let Some(&ckey) = ckeys.get(key) else {
            continue;
        };

        for agent in agents {
            if let Some(&cached) = agent_keys.get(agent) {
                cache.push_unique(ModuleMetric::Agents, ckey, cached);
            }
        }
    }

    for (name, &value) in dated.su64(ModuleMetric::MetaData) {
        cache.add_named_shared(ModuleMetric::MetaData, name, value);
    }
}
