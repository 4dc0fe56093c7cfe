use serde::{Deserialize, Serialize};

/// Parameters used by the [`Storage`](crate::Storage).
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// The number of most recent date partitions kept when tailing a log.
    ///
    /// [`Storage::evict_expired`](crate::Storage::evict_expired) invalidates all older partitions.
    /// Defaults to `None`, i.e. all partitions are kept.
    pub keep_last: Option<usize>,

    /// Rebuilds the cross-date cache after expired partitions have been evicted.
    ///
    /// Without a rebuild, the cache keeps the totals of evicted dates until
    /// [`Storage::rebuild_rawdata_cache`](crate::Storage::rebuild_rawdata_cache) is called.
    ///
    /// Defaults to `true`.
    pub rebuild_on_evict: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            keep_last: None,
            rebuild_on_evict: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: StorageConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, StorageConfig::default());
        assert!(config.rebuild_on_evict);
    }

    #[test]
    fn test_roundtrip() {
        let config = StorageConfig {
            keep_last: Some(7),
            rebuild_on_evict: false,
        };

        let json = serde_json::to_string(&config).unwrap();
        insta::assert_snapshot!(json, @r###"{"keep_last":7,"rebuild_on_evict":false}"###);
        assert_eq!(serde_json::from_str::<StorageConfig>(&json).unwrap(), config);
    }
}
