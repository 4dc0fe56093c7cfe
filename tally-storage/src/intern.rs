//! Interning of strings into dense integer keys.
//!
//! Every module numbers its strings per date partition, starting at `1`. The same string is
//! interned into the cross-date cache as well, which numbers strings independently of the
//! partitions:
//!
//! ```text
//!              keymap              cache keymap
//! 20200427     /index.php -> 1     /index.php -> 1
//! 20200428     /about     -> 1     /about     -> 2
//!              /index.php -> 2
//! ```

use std::sync::Arc;

use tally_common::NumDate;

use crate::metric::{GlobalMetric, ModuleMetric};
use crate::module::Module;
use crate::storage::{AGENT_KEYS_SEQ, Storage, UNIQUE_KEYS_SEQ};

/// The keys assigned to an interned string.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Interned {
    /// The key of the string within its date partition.
    pub key: u32,
    /// The key of the string within the cross-date cache.
    pub ckey: u32,
    /// `true` if the string was not present in the date partition before.
    pub is_new: bool,
}

impl Storage {
    /// Interns `text` into the keymap of a module.
    ///
    /// Returns the existing keys if the string has been interned before. New strings receive the
    /// next key of the partition and of the cache.
    ///
    /// # Example
    ///
    /// ```
    /// use tally_common::NumDate;
    /// use tally_storage::{Module, Storage};
    ///
    /// let mut storage = Storage::default();
    /// let date = NumDate::new(20200427).unwrap();
    ///
    /// let first = storage.insert_keymap(Module::Requests, date, "/index.php");
    /// let again = storage.insert_keymap(Module::Requests, date, "/index.php");
    ///
    /// assert_eq!((first.key, first.is_new), (1, true));
    /// assert_eq!((again.key, again.is_new), (1, false));
    /// ```
    pub fn insert_keymap(&mut self, module: Module, date: NumDate, text: &str) -> Interned {
        let dated = self
            .dates
            .get_or_create(date)
            .tables_mut()
            .module_mut(module)
            .intern(ModuleMetric::KeyMap, text);

        let cached = self
            .cache
            .module_mut(module)
            .intern_shared(ModuleMetric::KeyMap, &dated.text);

        Interned {
            key: dated.id,
            ckey: cached.id,
            is_new: dated.is_new,
        }
    }

    /// Stores the display string of a root key.
    pub fn insert_rootmap(
        &mut self,
        module: Module,
        date: NumDate,
        key: u32,
        value: &str,
        ckey: u32,
    ) {
        self.insert_label(ModuleMetric::RootMap, module, date, key, value, ckey);
    }

    /// Stores the display string of a data key.
    pub fn insert_datamap(
        &mut self,
        module: Module,
        date: NumDate,
        key: u32,
        value: &str,
        ckey: u32,
    ) {
        self.insert_label(ModuleMetric::DataMap, module, date, key, value, ckey);
    }

    /// Stores the request method of a data key.
    pub fn insert_method(
        &mut self,
        module: Module,
        date: NumDate,
        key: u32,
        value: &str,
        ckey: u32,
    ) {
        self.insert_label(ModuleMetric::Methods, module, date, key, value, ckey);
    }

    /// Stores the request protocol of a data key.
    pub fn insert_protocol(
        &mut self,
        module: Module,
        date: NumDate,
        key: u32,
        value: &str,
        ckey: u32,
    ) {
        self.insert_label(ModuleMetric::Protocols, module, date, key, value, ckey);
    }

    fn insert_label(
        &mut self,
        metric: ModuleMetric,
        module: Module,
        date: NumDate,
        key: u32,
        value: &str,
        ckey: u32,
    ) {
        let value: Arc<str> = Arc::from(value);

        self.dates
            .get_or_create(date)
            .tables_mut()
            .module_mut(module)
            .set_str(metric, key, Arc::clone(&value));

        self.cache.module_mut(module).set_str(metric, ckey, value);
    }

    /// Interns an `IP|DATE|UA` string and returns its unique visitor key.
    ///
    /// Keys are drawn from a process-wide sequence, so they are unique across all partitions.
    pub fn insert_unique_key(&mut self, date: NumDate, text: &str) -> u32 {
        let process = &mut self.process;
        self.dates
            .get_or_create(date)
            .tables_mut()
            .global_mut()
            .intern_numbered(GlobalMetric::UniqueKeys, text, || {
                Self::next_key(process, UNIQUE_KEYS_SEQ)
            })
            .id
    }

    /// Interns a user agent string and returns its key.
    ///
    /// Keys are drawn from a process-wide sequence, so they are unique across all partitions.
    /// A new key is stored together with its agent string, as with
    /// [`insert_agent_value`](Self::insert_agent_value).
    pub fn insert_agent_key(&mut self, date: NumDate, agent: &str) -> u32 {
        let process = &mut self.process;
        let interned = self
            .dates
            .get_or_create(date)
            .tables_mut()
            .global_mut()
            .intern_numbered(GlobalMetric::AgentKeys, agent, || {
                Self::next_key(process, AGENT_KEYS_SEQ)
            });

        if interned.is_new {
            self.store_agent_value(date, interned.id, interned.text);
        }

        interned.id
    }

    /// Stores the user agent string of a key returned by [`Self::insert_agent_key`].
    ///
    /// The agent is also interned into the cache, where it receives a cache agent key.
    pub fn insert_agent_value(&mut self, date: NumDate, key: u32, agent: &str) {
        self.store_agent_value(date, key, Arc::from(agent));
    }

    fn store_agent_value(&mut self, date: NumDate, key: u32, agent: Arc<str>) {
        self.dates
            .get_or_create(date)
            .tables_mut()
            .global_mut()
            .set_str(GlobalMetric::AgentVals, key, Arc::clone(&agent));

        let global = self.cache.global_mut();
        let cached = global.intern_shared(GlobalMetric::AgentKeys, &agent);
        if cached.is_new {
            global.set_str(GlobalMetric::AgentVals, cached.id, agent);
        }
    }

    /// Associates a user agent with a data key, such as a host.
    ///
    /// The cache list holds the cache agent key, resolved through the agent string stored for
    /// `agent_key` in the partition. Keys returned by [`insert_agent_key`](Self::insert_agent_key)
    /// always resolve. For other keys the value must be stored with
    /// [`insert_agent_value`](Self::insert_agent_value) first, otherwise only the partition
    /// records the association. Returns `true` if the agent was not yet associated with the key
    /// in the partition.
    pub fn insert_agent(
        &mut self,
        module: Module,
        date: NumDate,
        key: u32,
        agent_key: u32,
        ckey: u32,
    ) -> bool {
        let tables = self.dates.get_or_create(date).tables_mut();
        let agent = tables
            .global()
            .is32(GlobalMetric::AgentVals)
            .get(&agent_key)
            .cloned();

        let inserted = tables
            .module_mut(module)
            .push_unique(ModuleMetric::Agents, key, agent_key);

        if let Some(agent) = agent {
            let cached = self
                .cache
                .global_mut()
                .intern_shared(GlobalMetric::AgentKeys, &agent);
            if cached.is_new {
                self.cache
                    .global_mut()
                    .set_str(GlobalMetric::AgentVals, cached.id, cached.text);
            }

            self.cache
                .module_mut(module)
                .push_unique(ModuleMetric::Agents, ckey, cached.id);
        }

        inserted
    }

    /// Adds `value` to a named counter of the module, such as the sum of all hits.
    ///
    /// Returns the new total within the partition.
    pub fn insert_meta_data(
        &mut self,
        module: Module,
        date: NumDate,
        name: &str,
        value: u64,
    ) -> u64 {
        let (name, total) = self
            .dates
            .get_or_create(date)
            .tables_mut()
            .module_mut(module)
            .add_named(ModuleMetric::MetaData, name, value);

        self.cache
            .module_mut(module)
            .add_named_shared(ModuleMetric::MetaData, &name, value);

        total
    }
}
