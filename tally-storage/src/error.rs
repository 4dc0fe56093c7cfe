use tally_common::NumDate;

use crate::metric::Scope;
use crate::shape::MapShape;

/// Any error that may occur when addressing the storage.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum StorageError {
    /// There is no partition for the requested date.
    #[error("no partition for date {0}")]
    DateNotFound(NumDate),
    /// The key to delete does not exist in the metric.
    #[error("key not found in metric {metric}")]
    KeyNotFound {
        /// Name of the addressed metric.
        metric: &'static str,
    },
    /// A key or value does not fit the shape of the metric's map.
    #[error("operand does not fit metric {metric} of shape {shape}")]
    ShapeMismatch {
        /// Name of the addressed metric.
        metric: &'static str,
        /// The shape backing the metric.
        shape: MapShape,
    },
    /// The metric has no map in the addressed table.
    #[error("metric {metric} is not stored in the {} scope", .scope.as_str())]
    NotInScope {
        /// Name of the addressed metric.
        metric: &'static str,
        /// The scope of the addressed table.
        scope: Scope,
    },
}
