//! meterline-fetch — the metric fetcher.
//!
//! Runs a batch of independent queries against a metrics backend
//! concurrently and hands back one outcome per query, in order. A failed
//! query never aborts the batch: its slot holds a `FetchError` and the
//! rest of the batch is still usable.
//!
//! # Architecture
//!
//! ```text
//! Fetcher
//!   ├── fetch_all(&[QuerySpec]) → Vec<QueryOutcome>   (join_all, one slot per query)
//!   │   └── fetch_one()
//!   │       ├── per-query timeout (instant / range)
//!   │       ├── one retry with retry_timeout on QueryTimeout or 5xx
//!   │       └── FetchStats counters
//!   └── Arc<dyn MetricsBackend>
//!       └── PrometheusBackend (hyper client, /api/v1/query[_range])
//!
//! check_stack(&StackConfig) → StackHealth   (observability component health)
//! ```
//!
//! Dropping the future returned by `fetch_all` cancels every in-flight
//! query; nothing is spawned that could outlive the caller.

pub mod backend;
pub mod error;
pub mod fetcher;
pub mod prometheus;
pub mod stack_health;
pub mod stats;

pub use backend::{BoxFuture, MetricsBackend, PrometheusBackend};
pub use error::{FetchError, FetchResult};
pub use fetcher::{FetchPolicy, Fetcher, QueryOutcome};
pub use stack_health::{check_stack, ComponentHealth, ComponentStatus, StackHealth};
pub use stats::FetchStats;
