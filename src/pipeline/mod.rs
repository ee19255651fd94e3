//! Aggregation pipeline.
//!
//! Every dashboard number is produced here: a filtered group-by sum over
//! one dataset, optionally re-shaped by `top`, `pivot` or `ratio_of_sums`.
//! Two backends execute requests and must agree on every result.

pub mod aggregate;
mod backend;
mod sql;

pub use aggregate::{pivot, ratio_of_sums, top};
pub use backend::{metrics_agree, results_agree, MemoryBackend, QueryBackend};
pub use sql::{render_sql, SqliteBackend};
