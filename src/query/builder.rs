//! Metrics query builder.
//!
//! A builder is assembled from a [`DatasetConfig`], an injected
//! [`MetricIndexer`], a [`GranularityStrategy`] and a [`RankingStrategy`].
//! Resolution runs in two phases: [`MetricsQueryBuilder::scan_dimensions`]
//! first records which dimensions the request touches (selected columns and
//! filter keys), and only then are metric indices resolved. Dimension driven
//! choices such as the light self time metric therefore do not depend on the
//! order in which columns and conditions are resolved.

use crate::errors::{AppError, AppResult};
use crate::models::{FieldType, Granularity, QueryRequest, TimeWindow};
use crate::settings::QuerySettings;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use super::constants::TRANSACTION_DIMENSION;
use super::dataset::{
    unit_field_type, DatasetConfig, ParsedConfig, ProfileFunctionsMetricsDatasetConfig, ResultType,
    SpansMetricsDatasetConfig,
};
use super::equation::{parse_equation, strip_equation_prefix, Expr};
use super::filter::{parse_search_query, wildcard_to_like, SearchFilter, SearchTerm, SearchValue};
use super::granularity::{
    day_aligned_inner, edges, granularity_for_interval, granularity_for_window, GranularityStrategy,
    PreserveGranularity, SplitByDay,
};
use super::indexer::MetricIndexer;
use super::plan::{
    Aggregate, Column, Condition, ConditionValue, Direction, Operator, OrderBy, PlanExpr, QueryPlan, SelectItem,
};
use super::ranking::{RankedField, RankingStrategy, TopEvents, Unranked};

static FUNCTION_CALL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<name>[a-z_][a-z0-9_]*)\((?P<args>[^()]*)\)$").expect("valid regex")
});

const PROJECT_FIELDS: [&str; 3] = ["project", "project.id", "project_id"];
const FREE_TEXT_FIELD: &str = "message";

pub struct MetricsQueryBuilder {
    config: Box<dyn DatasetConfig>,
    parsed: ParsedConfig,
    indexer: Arc<dyn MetricIndexer>,
    granularity_strategy: Box<dyn GranularityStrategy>,
    ranking: Box<dyn RankingStrategy>,
    settings: QuerySettings,
    request: QueryRequest,
    timeseries: bool,
    search_terms: Option<Vec<SearchTerm>>,
    dimensions: BTreeSet<String>,
    has_transaction: bool,
    meta_resolver_map: HashMap<String, FieldType>,
}

impl MetricsQueryBuilder {
    pub fn new(
        config: Box<dyn DatasetConfig>,
        indexer: Arc<dyn MetricIndexer>,
        request: QueryRequest,
        settings: QuerySettings,
    ) -> Self {
        let parsed = Self::load_config(config.as_ref());
        Self {
            config,
            parsed,
            indexer,
            granularity_strategy: Box::new(SplitByDay),
            ranking: Box::new(Unranked),
            settings,
            request,
            timeseries: false,
            search_terms: None,
            dimensions: BTreeSet::new(),
            has_transaction: false,
            meta_resolver_map: HashMap::new(),
        }
    }

    pub fn spans_metrics(indexer: Arc<dyn MetricIndexer>, request: QueryRequest, settings: QuerySettings) -> Self {
        Self::new(Box::new(SpansMetricsDatasetConfig), indexer, request, settings)
    }

    pub fn timeseries_spans_metrics(
        indexer: Arc<dyn MetricIndexer>,
        request: QueryRequest,
        settings: QuerySettings,
    ) -> Self {
        Self::spans_metrics(indexer, request, settings).into_timeseries()
    }

    pub fn top_spans_metrics(
        indexer: Arc<dyn MetricIndexer>,
        request: QueryRequest,
        settings: QuerySettings,
        top_events: TopEvents,
    ) -> Self {
        Self::timeseries_spans_metrics(indexer, request, settings).with_ranking(Box::new(top_events))
    }

    pub fn profile_functions_metrics(
        indexer: Arc<dyn MetricIndexer>,
        request: QueryRequest,
        settings: QuerySettings,
    ) -> Self {
        Self::new(Box::new(ProfileFunctionsMetricsDatasetConfig), indexer, request, settings)
    }

    pub fn timeseries_profile_functions_metrics(
        indexer: Arc<dyn MetricIndexer>,
        request: QueryRequest,
        settings: QuerySettings,
    ) -> Self {
        Self::profile_functions_metrics(indexer, request, settings).into_timeseries()
    }

    pub fn top_profile_functions_metrics(
        indexer: Arc<dyn MetricIndexer>,
        request: QueryRequest,
        settings: QuerySettings,
        top_events: TopEvents,
    ) -> Self {
        Self::timeseries_profile_functions_metrics(indexer, request, settings).with_ranking(Box::new(top_events))
    }

    /// Bucketed output at the request interval, never split.
    pub fn into_timeseries(mut self) -> Self {
        self.timeseries = true;
        self.with_granularity_strategy(Box::new(PreserveGranularity))
    }

    pub fn with_granularity_strategy(mut self, strategy: Box<dyn GranularityStrategy>) -> Self {
        self.granularity_strategy = strategy;
        self
    }

    pub fn with_ranking(mut self, ranking: Box<dyn RankingStrategy>) -> Self {
        self.ranking = ranking;
        self
    }

    /// Parses a dataset configuration into the builder's internal representation.
    pub fn load_config(config: &dyn DatasetConfig) -> ParsedConfig {
        ParsedConfig::parse(config)
    }

    pub fn has_transaction(&self) -> bool {
        self.has_transaction
    }

    pub fn get_field_type(&self, field: &str) -> Option<FieldType> {
        if let Some(field_type) = self.meta_resolver_map.get(field) {
            return Some(*field_type);
        }
        self.config.fallback_field_type(field)
    }

    /// First phase: records every dimension the request references.
    pub fn scan_dimensions(&mut self) -> AppResult<()> {
        let terms = parse_search_query(&self.request.query)?;

        let mut dimensions = BTreeSet::new();
        for column in &self.request.selected_columns {
            if strip_equation_prefix(column).is_none() && !FUNCTION_CALL.is_match(column) {
                dimensions.insert(self.parsed.remap(column).to_string());
            }
        }
        for term in &terms {
            match term {
                SearchTerm::Filter(filter) => {
                    dimensions.insert(self.parsed.remap(&filter.key).to_string());
                }
                SearchTerm::FreeText(_) => {
                    dimensions.insert(self.parsed.remap(FREE_TEXT_FIELD).to_string());
                }
            }
        }

        self.has_transaction = dimensions.contains(TRANSACTION_DIMENSION);
        self.dimensions = dimensions;
        self.search_terms = Some(terms);
        tracing::debug!(
            dataset = self.parsed.dataset.as_str(),
            has_transaction = self.has_transaction,
            dimensions = self.dimensions.len(),
            "scanned query dimensions"
        );
        Ok(())
    }

    fn ensure_scanned(&mut self) -> AppResult<()> {
        if self.search_terms.is_none() {
            self.scan_dimensions()?;
        }
        Ok(())
    }

    /// MRI to query for `value` once dataset substitutions are applied.
    fn effective_metric<'a>(&'a self, value: &'a str) -> &'a str {
        for substitution in &self.parsed.substitutions {
            if value == substitution.from && !self.dimensions.contains(substitution.unless_dimension) {
                tracing::debug!(from = substitution.from, to = substitution.to, "substituting metric");
                return substitution.to;
            }
        }
        value
    }

    pub fn resolve_metric_index(&mut self, value: &str) -> AppResult<Option<u64>> {
        self.ensure_scanned()?;
        if value == TRANSACTION_DIMENSION {
            self.dimensions.insert(TRANSACTION_DIMENSION.to_string());
            self.has_transaction = true;
        }
        let effective = self.effective_metric(value).to_string();
        self.indexer.resolve(self.request.organization_id, &effective)
    }

    pub fn resolve_select(&mut self) -> AppResult<(Vec<SelectItem>, Vec<RankedField>)> {
        self.ensure_scanned()?;
        let columns = self.request.selected_columns.clone();

        let mut select = Vec::new();
        let mut dimensions = Vec::new();
        let mut seen = BTreeSet::new();
        for column in &columns {
            if strip_equation_prefix(column).is_some() || !seen.insert(column.clone()) {
                continue;
            }
            if FUNCTION_CALL.is_match(column) {
                select.push(SelectItem::Aggregate(self.resolve_function(column)?));
                continue;
            }

            let resolved = self.resolve_dimension(column)?;
            let field_type = if resolved.column == Column::ProjectId {
                FieldType::Integer
            } else {
                FieldType::String
            };
            self.meta_resolver_map.insert(column.clone(), field_type);
            select.push(SelectItem::Dimension {
                alias: column.clone(),
                column: resolved.column.clone(),
            });
            dimensions.push(resolved);
        }

        select.extend(self.resolve_equations()?);
        if select.is_empty() {
            return Err(AppError::InvalidSearchQuery("no columns selected".to_string()));
        }
        Ok((select, dimensions))
    }

    pub fn resolve_equations(&mut self) -> AppResult<Vec<SelectItem>> {
        let equations: Vec<String> = self
            .request
            .selected_columns
            .iter()
            .filter(|column| strip_equation_prefix(column).is_some())
            .cloned()
            .chain(self.request.equations.iter().map(|equation| {
                if strip_equation_prefix(equation).is_some() {
                    equation.clone()
                } else {
                    format!("equation|{equation}")
                }
            }))
            .collect();

        let mut items = Vec::with_capacity(equations.len());
        for alias in equations {
            let source = strip_equation_prefix(&alias).unwrap_or(&alias).to_string();
            let expression = self.resolve_expression(&parse_equation(&source)?)?;
            self.meta_resolver_map.insert(alias.clone(), FieldType::Number);
            items.push(SelectItem::Equation { alias, expression });
        }
        Ok(items)
    }

    fn resolve_expression(&mut self, expr: &Expr) -> AppResult<PlanExpr> {
        Ok(match expr {
            Expr::Number(value) => PlanExpr::Number(*value),
            Expr::Function(call) => PlanExpr::Aggregate(self.resolve_function(call)?),
            Expr::Binary { op, lhs, rhs } => PlanExpr::Binary {
                op: *op,
                lhs: Box::new(self.resolve_expression(lhs)?),
                rhs: Box::new(self.resolve_expression(rhs)?),
            },
        })
    }

    fn resolve_function(&mut self, call: &str) -> AppResult<Aggregate> {
        let captures = FUNCTION_CALL
            .captures(call)
            .ok_or_else(|| AppError::InvalidSearchQuery(format!("'{call}' is not a function call")))?;
        let name = captures["name"].to_string();
        let args = captures["args"].trim().to_string();

        let function = self
            .parsed
            .functions
            .get(&name)
            .cloned()
            .ok_or_else(|| AppError::InvalidSearchQuery(format!("unknown function '{name}'")))?;
        let argument = if args.is_empty() {
            function
                .default_argument
                .ok_or_else(|| AppError::InvalidSearchQuery(format!("{name} requires an argument")))?
                .to_string()
        } else {
            self.parsed.remap(&args).to_string()
        };

        let mri = self
            .parsed
            .metric_fields
            .get(&argument)
            .cloned()
            .ok_or_else(|| AppError::InvalidSearchQuery(format!("{argument} is not a metric field for {name}")))?;
        let metric_type = mri.chars().next().unwrap_or_default();
        if !function.op.supports_metric_type(metric_type) {
            return Err(AppError::IncompatibleQuery(format!("{name} cannot be applied to {argument}")));
        }

        let effective = self.effective_metric(&mri).to_string();
        let metric_id = self
            .resolve_metric_index(&mri)?
            .ok_or_else(|| AppError::IncompatibleQuery(format!("metric {effective} has not been indexed")))?;

        let result_type = match function.result_type {
            ResultType::Fixed(field_type) => field_type,
            ResultType::FromArgument => self
                .config
                .fallback_field_type(&argument)
                .unwrap_or_else(|| unit_field_type(&mri)),
        };
        self.meta_resolver_map.insert(call.to_string(), result_type);

        Ok(Aggregate {
            alias: call.to_string(),
            function: name,
            op: function.op,
            metric_mri: effective,
            metric_id,
            result_type,
        })
    }

    fn resolve_dimension(&mut self, field: &str) -> AppResult<RankedField> {
        let remapped = self.parsed.remap(field).to_string();
        if PROJECT_FIELDS.contains(&remapped.as_str()) {
            return Ok(RankedField {
                name: field.to_string(),
                column: Column::ProjectId,
            });
        }
        if self.parsed.metric_fields.contains_key(&remapped) {
            return Err(AppError::InvalidSearchQuery(format!(
                "{remapped} is a metric and must be aggregated"
            )));
        }
        if !self.parsed.tag_keys.contains(&remapped) && !self.parsed.use_default_tags {
            return Err(AppError::InvalidSearchQuery(format!(
                "{remapped} is not a known field for {}",
                self.parsed.dataset.as_str()
            )));
        }

        let index = self
            .resolve_metric_index(&remapped)?
            .ok_or_else(|| AppError::IncompatibleQuery(format!("tag {remapped} has not been indexed")))?;
        Ok(RankedField {
            name: field.to_string(),
            column: Column::Tag { key: remapped, index },
        })
    }

    pub fn resolve_conditions(&mut self) -> AppResult<Vec<Condition>> {
        self.ensure_scanned()?;
        let window = self.window()?;

        let mut conditions = Vec::new();
        if self.parsed.requires_organization_condition {
            if self.request.organization_id == 0 {
                return Err(AppError::InvalidSearchQuery("an organization is required".to_string()));
            }
            if self.request.project_ids.is_empty() {
                return Err(AppError::InvalidSearchQuery("at least one project is required".to_string()));
            }
            conditions.push(Condition::compare(
                Column::OrganizationId,
                Operator::Eq,
                ConditionValue::Int(self.request.organization_id),
            ));
            conditions.push(Condition::compare(
                Column::ProjectId,
                Operator::In,
                ConditionValue::IntList(self.request.project_ids.clone()),
            ));
        }
        conditions.extend(Condition::time_range(&window));

        let terms = self.search_terms.clone().unwrap_or_default();
        for term in &terms {
            let condition = match term {
                SearchTerm::Filter(filter) => self.resolve_filter(filter)?,
                SearchTerm::FreeText(text) => {
                    let field = self.resolve_dimension(FREE_TEXT_FIELD)?;
                    Condition::compare(
                        field.column,
                        Operator::Like,
                        ConditionValue::Str(format!("%{}%", wildcard_to_like(text))),
                    )
                }
            };
            conditions.push(condition);
        }
        Ok(conditions)
    }

    fn resolve_filter(&mut self, filter: &SearchFilter) -> AppResult<Condition> {
        let field = self.resolve_dimension(&filter.key)?;
        let (op, value) = match (&field.column, &filter.value) {
            (Column::ProjectId, SearchValue::Exact(raw)) => (Operator::Eq, ConditionValue::Int(parse_id(raw)?)),
            (Column::ProjectId, SearchValue::List(items)) => (
                Operator::In,
                ConditionValue::IntList(items.iter().map(|item| parse_id(item)).collect::<AppResult<_>>()?),
            ),
            (Column::ProjectId, SearchValue::Wildcard(_)) => {
                return Err(AppError::InvalidSearchQuery("wildcards are not supported for projects".to_string()))
            }
            (_, SearchValue::Exact(raw)) => (Operator::Eq, ConditionValue::Str(raw.clone())),
            (_, SearchValue::Wildcard(raw)) => (Operator::Like, ConditionValue::Str(wildcard_to_like(raw))),
            (_, SearchValue::List(items)) => (Operator::In, ConditionValue::StrList(items.clone())),
        };
        let op = if filter.negated { op.negate() } else { op };
        Ok(Condition::compare(field.column, op, value))
    }

    pub fn resolve_granularity(&self) -> AppResult<Granularity> {
        if self.timeseries {
            granularity_for_interval(self.interval_seconds())
        } else {
            Ok(granularity_for_window(&self.window()?))
        }
    }

    pub fn resolve_split_granularity(&self) -> AppResult<(Vec<Condition>, Option<Granularity>)> {
        let window = self.window()?;
        let configured = self.resolve_granularity()?;
        Ok(self.granularity_strategy.split(&window, configured))
    }

    pub fn resolve_orderby(&self, select: &[SelectItem]) -> AppResult<Vec<OrderBy>> {
        let mut orderby = Vec::with_capacity(self.request.orderby.len());
        for raw in &self.request.orderby {
            let (direction, alias) = match raw.strip_prefix('-') {
                Some(alias) => (Direction::Desc, alias),
                None => (Direction::Asc, raw.as_str()),
            };
            if !select.iter().any(|item| item.alias() == alias) {
                return Err(AppError::InvalidSearchQuery(format!(
                    "cannot order by {alias}, it is not in the selected columns"
                )));
            }
            orderby.push(OrderBy {
                alias: alias.to_string(),
                direction,
            });
        }
        Ok(orderby)
    }

    pub fn resolve_limit(&self) -> AppResult<u32> {
        let limit = self.request.limit.unwrap_or(self.settings.default_limit);
        if limit == 0 || limit > self.settings.max_limit {
            return Err(AppError::InvalidSearchQuery(format!(
                "limit must be between 1 and {}, got {limit}",
                self.settings.max_limit
            )));
        }
        Ok(limit)
    }

    pub fn build(&mut self) -> AppResult<QueryPlan> {
        self.scan_dimensions()?;
        let window = self.window()?;

        let mut where_clause = self.resolve_conditions()?;
        let (select, dimensions) = self.resolve_select()?;
        let orderby = self.resolve_orderby(&select)?;
        let limit = self.resolve_limit()?;

        let configured = self.resolve_granularity()?;
        let (split_conditions, split_granularity) = self.resolve_split_granularity()?;
        let granularity = split_granularity.unwrap_or(configured);
        let edges = if split_conditions.is_empty() {
            Vec::new()
        } else {
            day_aligned_inner(&window)
                .map(|inner| edges(&window, &inner))
                .unwrap_or_default()
        };
        where_clause.extend(split_conditions);
        where_clause.extend(self.ranking.conditions(&dimensions)?);

        let plan = QueryPlan {
            dataset: self.parsed.dataset,
            select,
            where_clause,
            groupby: dimensions.into_iter().map(|field| field.column).collect(),
            orderby,
            limit,
            granularity,
            interval_seconds: self.timeseries.then(|| self.interval_seconds()),
            edges,
            has_transaction: self.has_transaction,
        };
        tracing::debug!(
            dataset = plan.dataset.as_str(),
            columns = plan.select.len(),
            conditions = plan.where_clause.len(),
            granularity = ?plan.granularity,
            "built metrics query plan"
        );
        Ok(plan)
    }

    fn window(&self) -> AppResult<TimeWindow> {
        let window = self
            .request
            .window()
            .ok_or_else(|| AppError::InvalidSearchQuery("start and end are required".to_string()))?;
        if window.start >= window.end {
            return Err(AppError::InvalidSearchQuery("start must be before end".to_string()));
        }
        Ok(window)
    }

    fn interval_seconds(&self) -> i64 {
        self.request
            .interval_seconds
            .unwrap_or(self.settings.default_interval_seconds)
    }
}

fn parse_id(raw: &str) -> AppResult<u64> {
    raw.parse::<u64>()
        .map_err(|_| AppError::InvalidSearchQuery(format!("'{raw}' is not a valid project id")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::constants::{span_mri, SELF_TIME_LIGHT};
    use crate::query::indexer::{CachingIndexer, InMemoryIndexer};
    use chrono::{TimeZone, Utc};

    const SELF_TIME: &str = "d:spans/exclusive_time@millisecond";

    fn indexer() -> Arc<CachingIndexer<InMemoryIndexer>> {
        Arc::new(CachingIndexer::new(InMemoryIndexer::with_entries([
            (SELF_TIME, 100u64),
            (SELF_TIME_LIGHT, 101),
            ("d:spans/duration@millisecond", 102),
            ("s:spans/user@none", 103),
            ("d:spans/http.response_content_length@byte", 104),
            ("transaction", 1),
            ("span.op", 2),
            ("span.description", 3),
            ("span.group", 4),
        ])))
    }

    fn request(columns: &[&str], query: &str) -> QueryRequest {
        QueryRequest {
            organization_id: 1,
            project_ids: vec![11, 12],
            start: Some(Utc.with_ymd_and_hms(2024, 5, 1, 5, 0, 0).unwrap()),
            end: Some(Utc.with_ymd_and_hms(2024, 5, 4, 7, 0, 0).unwrap()),
            selected_columns: columns.iter().map(ToString::to_string).collect(),
            query: query.to_string(),
            ..QueryRequest::default()
        }
    }

    fn builder(columns: &[&str], query: &str) -> MetricsQueryBuilder {
        MetricsQueryBuilder::spans_metrics(indexer(), request(columns, query), QuerySettings::default())
    }

    fn aggregate<'a>(plan: &'a QueryPlan, alias: &str) -> &'a Aggregate {
        plan.select
            .iter()
            .find_map(|item| match item {
                SelectItem::Aggregate(aggregate) if aggregate.alias == alias => Some(aggregate),
                _ => None,
            })
            .expect("aggregate in plan")
    }

    #[test]
    fn field_type_falls_back_to_duration_for_span_times() {
        let builder = builder(&["count()"], "");
        assert_eq!(builder.get_field_type("span.duration"), Some(FieldType::Duration));
        assert_eq!(builder.get_field_type("span.self_time"), Some(FieldType::Duration));
        assert_eq!(builder.get_field_type("span.op"), None);
        assert_eq!(builder.get_field_type("nonsense"), None);
    }

    #[test]
    fn field_type_prefers_resolved_functions() {
        let mut builder = builder(&["count()", "avg(http.response_content_length)", "span.op"], "");
        builder.build().expect("plan");
        assert_eq!(builder.get_field_type("count()"), Some(FieldType::Integer));
        assert_eq!(builder.get_field_type("avg(http.response_content_length)"), Some(FieldType::Size));
        assert_eq!(builder.get_field_type("span.op"), Some(FieldType::String));
    }

    #[test]
    fn light_self_time_without_transaction() {
        let mut builder = builder(&["span.op", "p95(span.self_time)"], "");
        let plan = builder.build().expect("plan");
        assert!(!plan.has_transaction);
        let p95 = aggregate(&plan, "p95(span.self_time)");
        assert_eq!(p95.metric_mri, SELF_TIME_LIGHT);
        assert_eq!(p95.metric_id, 101);
        assert_eq!(p95.result_type, FieldType::Duration);
    }

    #[test]
    fn selecting_transaction_keeps_full_self_time() {
        let mut builder = builder(&["transaction", "count()"], "");
        let plan = builder.build().expect("plan");
        assert!(plan.has_transaction);
        assert_eq!(aggregate(&plan, "count()").metric_id, 100);
    }

    #[test]
    fn filtering_on_transaction_keeps_full_self_time() {
        let mut builder = builder(&["span.op", "sum(span.self_time)"], "transaction:/api/checkout");
        let plan = builder.build().expect("plan");
        assert!(plan.has_transaction);
        assert_eq!(aggregate(&plan, "sum(span.self_time)").metric_mri, SELF_TIME);
    }

    #[test]
    fn metric_index_resolution_is_order_independent() {
        let self_time = span_mri("span.self_time").expect("self time mri");

        let mut first = builder(&["transaction", "count()"], "");
        assert_eq!(first.resolve_metric_index(self_time).expect("resolve"), Some(100));

        let mut second = builder(&["span.op", "count()"], "");
        assert_eq!(second.resolve_metric_index(self_time).expect("resolve"), Some(101));

        let mut third = builder(&["span.op", "count()"], "");
        third.resolve_metric_index("transaction").expect("resolve transaction");
        assert!(third.has_transaction());
        assert_eq!(third.resolve_metric_index(self_time).expect("resolve"), Some(100));
    }

    #[test]
    fn other_metrics_are_never_substituted() {
        let mut builder = builder(&["span.op"], "");
        assert_eq!(
            builder.resolve_metric_index("d:spans/duration@millisecond").expect("resolve"),
            Some(102)
        );
    }

    #[test]
    fn indexer_is_hit_once_per_value() {
        let shared = indexer();
        let mut builder = MetricsQueryBuilder::spans_metrics(
            shared.clone(),
            request(&["span.op", "count()", "p50()", "p95()", "equation|count() / 2"], "span.op:db"),
            QuerySettings::default(),
        );
        builder.build().expect("plan");
        assert_eq!(shared.inner().lookups(), 2);
        assert!(shared.hits() > 0);
    }

    #[test]
    fn free_text_searches_span_description() {
        let mut builder = builder(&["count()"], "select users");
        let conditions = builder.resolve_conditions().expect("conditions");
        assert!(conditions.contains(&Condition::compare(
            Column::Tag {
                key: "span.description".to_string(),
                index: 3
            },
            Operator::Like,
            ConditionValue::Str("%select users%".to_string()),
        )));
    }

    #[test]
    fn conditions_include_org_projects_time_and_filters() {
        let mut builder = builder(&["count()"], "!span.op:[db, cache] project.id:11");
        let conditions = builder.resolve_conditions().expect("conditions");
        assert_eq!(
            conditions[0],
            Condition::compare(Column::OrganizationId, Operator::Eq, ConditionValue::Int(1))
        );
        assert!(conditions.contains(&Condition::compare(
            Column::Tag {
                key: "span.op".to_string(),
                index: 2
            },
            Operator::NotIn,
            ConditionValue::StrList(vec!["db".to_string(), "cache".to_string()]),
        )));
        assert!(conditions.contains(&Condition::compare(Column::ProjectId, Operator::Eq, ConditionValue::Int(11))));
    }

    #[test]
    fn unknown_fields_are_rejected_without_default_tags() {
        let mut filtered = builder(&["count()"], "browser.name:chrome");
        assert!(matches!(filtered.resolve_conditions(), Err(AppError::InvalidSearchQuery(_))));

        let mut selected = builder(&["browser.name", "count()"], "");
        assert!(matches!(selected.build(), Err(AppError::InvalidSearchQuery(_))));
    }

    #[test]
    fn unindexed_metric_is_incompatible() {
        let mut builder = builder(&["p95(span.duration)", "count_unique(user)", "avg(cache.item_size)"], "");
        assert!(matches!(builder.build(), Err(AppError::IncompatibleQuery(_))));
    }

    #[test]
    fn set_metrics_only_support_count_unique() {
        let mut builder = builder(&["p95(user)"], "");
        assert!(matches!(builder.build(), Err(AppError::IncompatibleQuery(_))));
    }

    #[test]
    fn non_timeseries_splits_long_unaligned_windows() {
        let mut builder = builder(&["span.op", "count()"], "");
        let plan = builder.build().expect("plan");
        assert_eq!(plan.granularity, Granularity::Day);
        assert_eq!(plan.edges.len(), 2);
        assert_eq!(plan.interval_seconds, None);
    }

    #[test]
    fn load_config_parses_dataset_remapping() {
        let parsed = MetricsQueryBuilder::load_config(&SpansMetricsDatasetConfig);
        assert_eq!(parsed.remap("message"), "span.description");
        let parsed = MetricsQueryBuilder::load_config(&ProfileFunctionsMetricsDatasetConfig);
        assert_eq!(parsed.remap("message"), "name");
    }

    #[test]
    fn granularity_strategy_can_be_swapped() {
        let mut builder =
            builder(&["span.op", "count()"], "").with_granularity_strategy(Box::new(PreserveGranularity));
        let plan = builder.build().expect("plan");
        assert_eq!(plan.granularity, Granularity::Hour);
        assert!(plan.edges.is_empty());
    }

    #[test]
    fn timeseries_never_splits_granularity() {
        let mut request = request(&["count()"], "");
        request.interval_seconds = Some(3_600);
        let builder =
            MetricsQueryBuilder::timeseries_spans_metrics(indexer(), request, QuerySettings::default());
        let (conditions, granularity) = builder.resolve_split_granularity().expect("split");
        assert!(conditions.is_empty());
        assert_eq!(granularity, Some(Granularity::Hour));
    }

    #[test]
    fn timeseries_plan_keeps_interval_granularity() {
        let mut request = request(&["epm()"], "");
        request.interval_seconds = Some(300);
        let mut builder =
            MetricsQueryBuilder::timeseries_spans_metrics(indexer(), request, QuerySettings::default());
        let plan = builder.build().expect("plan");
        assert_eq!(plan.granularity, Granularity::Minute);
        assert_eq!(plan.interval_seconds, Some(300));
        assert!(plan.edges.is_empty());
    }

    #[test]
    fn top_events_restrict_the_timeseries() {
        let mut request = request(&["span.op", "count()"], "");
        request.interval_seconds = Some(3_600);
        let top = TopEvents::new(
            vec![std::collections::BTreeMap::from([("span.op".to_string(), "db".to_string())])],
            false,
        );
        let mut builder =
            MetricsQueryBuilder::top_spans_metrics(indexer(), request, QuerySettings::default(), top);
        let plan = builder.build().expect("plan");
        assert!(plan.where_clause.contains(&Condition::compare(
            Column::Tag {
                key: "span.op".to_string(),
                index: 2
            },
            Operator::Eq,
            ConditionValue::Str("db".to_string()),
        )));
        assert_eq!(plan.granularity, Granularity::Hour);
    }

    #[test]
    fn orderby_must_reference_selected_columns() {
        let mut request = request(&["span.op", "count()"], "");
        request.orderby = vec!["-count()".to_string()];
        let mut builder = MetricsQueryBuilder::spans_metrics(indexer(), request, QuerySettings::default());
        let plan = builder.build().expect("plan");
        assert_eq!(
            plan.orderby,
            vec![OrderBy {
                alias: "count()".to_string(),
                direction: Direction::Desc
            }]
        );

        let mut request = self::request(&["span.op", "count()"], "");
        request.orderby = vec!["p95()".to_string()];
        let mut builder = MetricsQueryBuilder::spans_metrics(indexer(), request, QuerySettings::default());
        assert!(builder.build().is_err());
    }

    #[test]
    fn limit_respects_settings() {
        let mut request = request(&["count()"], "");
        request.limit = Some(20_000);
        let mut builder = MetricsQueryBuilder::spans_metrics(indexer(), request, QuerySettings::default());
        assert!(matches!(builder.build(), Err(AppError::InvalidSearchQuery(_))));
    }

    #[test]
    fn equations_resolve_their_aggregates() {
        let mut builder = builder(&["count()", "equation|count() / 2"], "");
        let plan = builder.build().expect("plan");
        let Some(SelectItem::Equation { expression, .. }) = plan.select.last() else {
            panic!("expected equation last, got {:?}", plan.select);
        };
        assert!(matches!(expression, PlanExpr::Binary { .. }));
        assert_eq!(builder.get_field_type("equation|count() / 2"), Some(FieldType::Number));
    }

    #[test]
    fn requires_projects() {
        let mut request = request(&["count()"], "");
        request.project_ids.clear();
        let mut builder = MetricsQueryBuilder::spans_metrics(indexer(), request, QuerySettings::default());
        assert!(builder.build().is_err());
    }

    #[test]
    fn profile_functions_remap_message_to_name_without_substitution() {
        let indexer = Arc::new(InMemoryIndexer::with_entries([
            ("d:profiles/function.duration@millisecond", 7u64),
            ("name", 8),
        ]));
        let mut builder = MetricsQueryBuilder::profile_functions_metrics(
            indexer,
            request(&["p95()"], "parse_json"),
            QuerySettings::default(),
        );
        let plan = builder.build().expect("plan");
        assert_eq!(aggregate(&plan, "p95()").metric_id, 7);
        assert!(plan.where_clause.contains(&Condition::compare(
            Column::Tag {
                key: "name".to_string(),
                index: 8
            },
            Operator::Like,
            ConditionValue::Str("%parse\\_json%".to_string()),
        )));
        assert_eq!(builder.get_field_type("span.self_time"), None);
    }
}
