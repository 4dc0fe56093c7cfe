//! Date-partitioned in-memory storage for web log analytics.
//!
//! The storage ingests facts parsed from log lines and maintains, per calendar date and per
//! [`Module`], a fixed set of hash maps. Strings are interned into dense integer keys, numeric
//! metrics are aggregated by these keys, and reports are reconstructed through
//! [`Storage::parse_raw_data`].
//!
//! # Structure
//!
//! ```text
//! Storage
//! ├── dates: 20200427 -> Partition
//! │                      ├── modules: Requests -> ModuleStorage (keymap, datamap, hits, ...)
//! │                      │            Os       -> ModuleStorage
//! │                      │            ...
//! │                      └── global:  GlobalStorage (unique keys, agents, counters)
//! ├── cache: one ModuleStorage per module merging all partitions
//! └── process: host names, sequences, overall counters
//! ```
//!
//! Every map is backed by one of the nine [shapes](MapShape), selected by the
//! [`MetricDescriptor`] of its metric. Maps of the cache share their strings with the maps of the
//! partitions.
//!
//! # Ingestion
//!
//! ```
//! use tally_common::NumDate;
//! use tally_storage::{Module, Storage};
//!
//! let mut storage = Storage::default();
//! let date = NumDate::new(20200427).unwrap();
//!
//! let key = storage.insert_keymap(Module::Requests, date, "/index.php");
//! storage.insert_datamap(Module::Requests, date, key.key, "/index.php", key.ckey);
//! storage.insert_hits(Module::Requests, date, key.key, 1, key.ckey);
//! storage.insert_bw(Module::Requests, date, key.key, 512, key.ckey);
//!
//! let raw = storage.parse_raw_data(Module::Requests);
//! assert_eq!(raw.items[0].hits, 1);
//! assert_eq!(raw.items[0].bw, 512);
//! ```
#![warn(missing_docs)]

mod aggregate;
mod codec;
mod config;
mod error;
mod intern;
mod metric;
mod module;
mod partition;
mod rawdata;
mod shape;
mod shared;
mod storage;
mod table;

pub use self::codec::*;
pub use self::config::*;
pub use self::error::*;
pub use self::intern::*;
pub use self::metric::*;
pub use self::module::*;
pub use self::partition::Partition;
pub use self::rawdata::*;
pub use self::shape::{MapKey, MapShape, MapValue, MetricMap};
pub use self::shared::*;
pub use self::storage::*;
pub use self::table::{GlobalStorage, MetricTable, ModuleStorage};
