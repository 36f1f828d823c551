pub mod builder;
pub mod constants;
pub mod dataset;
pub mod equation;
pub mod filter;
pub mod granularity;
pub mod indexer;
pub mod plan;
pub mod ranking;

pub use builder::MetricsQueryBuilder;
pub use dataset::{Dataset, DatasetConfig, ProfileFunctionsMetricsDatasetConfig, SpansMetricsDatasetConfig};
pub use indexer::{CachingIndexer, InMemoryIndexer, MetricIndexer};
pub use plan::QueryPlan;
pub use ranking::TopEvents;
