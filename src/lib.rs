pub mod db;
pub mod errors;
pub mod models;
pub mod query;
pub mod settings;
pub mod telemetry;

use crate::errors::AppResult;
use crate::models::QueryRequest;
use crate::query::{CachingIndexer, Dataset, MetricIndexer, MetricsQueryBuilder, QueryPlan, TopEvents};
use crate::settings::QuerySettings;
use std::sync::Arc;

pub use crate::errors::AppError;

/// Which builder variant a request is planned with.
#[derive(Debug, Clone, Default)]
pub enum PlanMode {
    #[default]
    Aggregate,
    Timeseries,
    Top(TopEvents),
}

/// Plans `request` against `dataset`, memoizing indexer lookups for the
/// lifetime of this call.
pub fn plan_query<I>(
    dataset: Dataset,
    mode: PlanMode,
    indexer: I,
    request: QueryRequest,
    settings: QuerySettings,
) -> AppResult<QueryPlan>
where
    I: MetricIndexer + 'static,
{
    let indexer: Arc<dyn MetricIndexer> = Arc::new(CachingIndexer::new(indexer));
    let mut builder = match (dataset, mode) {
        (Dataset::SpansMetrics, PlanMode::Aggregate) => MetricsQueryBuilder::spans_metrics(indexer, request, settings),
        (Dataset::SpansMetrics, PlanMode::Timeseries) => {
            MetricsQueryBuilder::timeseries_spans_metrics(indexer, request, settings)
        }
        (Dataset::SpansMetrics, PlanMode::Top(top)) => {
            MetricsQueryBuilder::top_spans_metrics(indexer, request, settings, top)
        }
        (Dataset::ProfileFunctionsMetrics, PlanMode::Aggregate) => {
            MetricsQueryBuilder::profile_functions_metrics(indexer, request, settings)
        }
        (Dataset::ProfileFunctionsMetrics, PlanMode::Timeseries) => {
            MetricsQueryBuilder::timeseries_profile_functions_metrics(indexer, request, settings)
        }
        (Dataset::ProfileFunctionsMetrics, PlanMode::Top(top)) => {
            MetricsQueryBuilder::top_profile_functions_metrics(indexer, request, settings, top)
        }
    };
    builder.build()
}
