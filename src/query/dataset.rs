//! Dataset configurations describe how abstract field names resolve against
//! one metrics backed data source.

use crate::models::FieldType;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::constants::{PROFILE_METRICS_MAP, SELF_TIME_LIGHT, SPAN_METRICS_MAP, TRANSACTION_DIMENSION};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Dataset {
    SpansMetrics,
    ProfileFunctionsMetrics,
}

impl Dataset {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SpansMetrics => "spansMetrics",
            Self::ProfileFunctionsMetrics => "profileFunctionsMetrics",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateOp {
    Count,
    CountUnique,
    Sum,
    Avg,
    Min,
    Max,
    Quantile(f64),
    /// Events per `per_seconds`.
    Rate { per_seconds: i64 },
}

impl AggregateOp {
    /// Whether the op can be computed from a metric of the given MRI type
    /// prefix (`d` distribution, `s` set, `g` gauge, `c` counter).
    pub fn supports_metric_type(self, metric_type: char) -> bool {
        match self {
            Self::CountUnique => metric_type == 's',
            Self::Quantile(_) => metric_type == 'd',
            Self::Count | Self::Rate { .. } => matches!(metric_type, 'd' | 'c'),
            Self::Sum | Self::Avg | Self::Min | Self::Max => matches!(metric_type, 'd' | 'g' | 'c'),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultType {
    Fixed(FieldType),
    /// Follows the unit of the metric argument.
    FromArgument,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub name: &'static str,
    pub default_argument: Option<&'static str>,
    pub op: AggregateOp,
    pub result_type: ResultType,
}

impl FunctionDef {
    pub fn new(name: &'static str, default_argument: Option<&'static str>, op: AggregateOp, result_type: ResultType) -> Self {
        Self {
            name,
            default_argument,
            op,
            result_type,
        }
    }
}

/// Swap `from` for `to` unless the query carries `unless_dimension`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricSubstitution {
    pub from: &'static str,
    pub to: &'static str,
    pub unless_dimension: &'static str,
}

pub trait DatasetConfig: Send + Sync {
    fn dataset(&self) -> Dataset;

    /// Field aliases applied before anything else, e.g. free text `message`.
    fn column_remapping(&self) -> Vec<(&'static str, &'static str)>;

    fn tag_keys(&self) -> &'static [&'static str];

    fn metric_fields(&self) -> &'static BTreeMap<&'static str, &'static str>;

    fn functions(&self) -> Vec<FunctionDef>;

    fn fallback_field_type(&self, _field: &str) -> Option<FieldType> {
        None
    }

    fn metric_substitutions(&self) -> Vec<MetricSubstitution> {
        Vec::new()
    }

    fn use_default_tags(&self) -> bool {
        false
    }

    fn requires_organization_condition(&self) -> bool {
        true
    }
}

/// The builder's internal view of a [`DatasetConfig`].
#[derive(Debug, Clone)]
pub struct ParsedConfig {
    pub dataset: Dataset,
    pub column_remapping: HashMap<String, String>,
    pub tag_keys: BTreeSet<String>,
    pub metric_fields: BTreeMap<String, String>,
    pub functions: BTreeMap<String, FunctionDef>,
    pub substitutions: Vec<MetricSubstitution>,
    pub use_default_tags: bool,
    pub requires_organization_condition: bool,
}

impl ParsedConfig {
    pub fn parse(config: &dyn DatasetConfig) -> Self {
        Self {
            dataset: config.dataset(),
            column_remapping: config
                .column_remapping()
                .into_iter()
                .map(|(from, to)| (from.to_string(), to.to_string()))
                .collect(),
            tag_keys: config.tag_keys().iter().map(ToString::to_string).collect(),
            metric_fields: config
                .metric_fields()
                .iter()
                .map(|(field, mri)| (field.to_string(), mri.to_string()))
                .collect(),
            functions: config
                .functions()
                .into_iter()
                .map(|function| (function.name.to_string(), function))
                .collect(),
            substitutions: config.metric_substitutions(),
            use_default_tags: config.use_default_tags(),
            requires_organization_condition: config.requires_organization_condition(),
        }
    }

    pub fn remap<'a>(&'a self, field: &'a str) -> &'a str {
        self.column_remapping.get(field).map(String::as_str).unwrap_or(field)
    }
}

/// Field type implied by the unit suffix of an MRI such as `d:spans/duration@millisecond`.
pub fn unit_field_type(mri: &str) -> FieldType {
    match mri.rsplit_once('@').map(|(_, unit)| unit) {
        Some("nanosecond" | "microsecond" | "millisecond" | "second" | "minute" | "hour" | "day" | "week") => {
            FieldType::Duration
        }
        Some("bit" | "byte" | "kilobyte" | "kibibyte" | "megabyte" | "mebibyte" | "gigabyte") => FieldType::Size,
        Some("ratio" | "percent") => FieldType::Percentage,
        _ => FieldType::Number,
    }
}

fn percentile_functions(default_argument: &'static str) -> Vec<FunctionDef> {
    [("p50", 0.5), ("p75", 0.75), ("p90", 0.9), ("p95", 0.95), ("p99", 0.99)]
        .into_iter()
        .map(|(name, quantile)| {
            FunctionDef::new(name, Some(default_argument), AggregateOp::Quantile(quantile), ResultType::FromArgument)
        })
        .collect()
}

fn value_functions(default_argument: &'static str) -> Vec<FunctionDef> {
    [
        ("sum", AggregateOp::Sum),
        ("avg", AggregateOp::Avg),
        ("min", AggregateOp::Min),
        ("max", AggregateOp::Max),
    ]
    .into_iter()
    .map(|(name, op)| FunctionDef::new(name, Some(default_argument), op, ResultType::FromArgument))
    .collect()
}

static SPAN_TAG_KEYS: &[&str] = &[
    "transaction",
    "transaction.op",
    "transaction.method",
    "span.op",
    "span.group",
    "span.description",
    "span.module",
    "span.action",
    "span.domain",
    "span.category",
    "span.status_code",
    "span.system",
    "environment",
    "release",
    "device.class",
    "resource.render_blocking_status",
];

#[derive(Debug, Clone, Default)]
pub struct SpansMetricsDatasetConfig;

impl DatasetConfig for SpansMetricsDatasetConfig {
    fn dataset(&self) -> Dataset {
        Dataset::SpansMetrics
    }

    fn column_remapping(&self) -> Vec<(&'static str, &'static str)> {
        // Free text search goes against the span description.
        vec![("message", "span.description")]
    }

    fn tag_keys(&self) -> &'static [&'static str] {
        SPAN_TAG_KEYS
    }

    fn metric_fields(&self) -> &'static BTreeMap<&'static str, &'static str> {
        &SPAN_METRICS_MAP
    }

    fn functions(&self) -> Vec<FunctionDef> {
        let mut functions = vec![
            FunctionDef::new("count", Some("span.self_time"), AggregateOp::Count, ResultType::Fixed(FieldType::Integer)),
            FunctionDef::new("count_unique", Some("user"), AggregateOp::CountUnique, ResultType::Fixed(FieldType::Integer)),
            FunctionDef::new("epm", Some("span.self_time"), AggregateOp::Rate { per_seconds: 60 }, ResultType::Fixed(FieldType::Rate)),
            FunctionDef::new("eps", Some("span.self_time"), AggregateOp::Rate { per_seconds: 1 }, ResultType::Fixed(FieldType::Rate)),
        ];
        functions.extend(value_functions("span.self_time"));
        functions.extend(percentile_functions("span.self_time"));
        functions
    }

    fn fallback_field_type(&self, field: &str) -> Option<FieldType> {
        match field {
            "span.duration" | "span.self_time" => Some(FieldType::Duration),
            _ => None,
        }
    }

    fn metric_substitutions(&self) -> Vec<MetricSubstitution> {
        // Queries without a transaction breakdown read the lighter self time metric.
        SPAN_METRICS_MAP
            .get("span.self_time")
            .copied()
            .map(|self_time| MetricSubstitution {
                from: self_time,
                to: SELF_TIME_LIGHT,
                unless_dimension: TRANSACTION_DIMENSION,
            })
            .into_iter()
            .collect()
    }
}

static PROFILE_FUNCTION_TAG_KEYS: &[&str] = &[
    "transaction",
    "fingerprint",
    "function",
    "name",
    "package",
    "is_application",
    "platform",
    "os.name",
    "os.version",
    "environment",
    "release",
];

#[derive(Debug, Clone, Default)]
pub struct ProfileFunctionsMetricsDatasetConfig;

impl DatasetConfig for ProfileFunctionsMetricsDatasetConfig {
    fn dataset(&self) -> Dataset {
        Dataset::ProfileFunctionsMetrics
    }

    fn column_remapping(&self) -> Vec<(&'static str, &'static str)> {
        vec![("message", "name")]
    }

    fn tag_keys(&self) -> &'static [&'static str] {
        PROFILE_FUNCTION_TAG_KEYS
    }

    fn metric_fields(&self) -> &'static BTreeMap<&'static str, &'static str> {
        &PROFILE_METRICS_MAP
    }

    fn functions(&self) -> Vec<FunctionDef> {
        let mut functions = vec![
            FunctionDef::new("count", Some("function.duration"), AggregateOp::Count, ResultType::Fixed(FieldType::Integer)),
            FunctionDef::new("cpm", Some("function.duration"), AggregateOp::Rate { per_seconds: 60 }, ResultType::Fixed(FieldType::Rate)),
        ];
        functions.extend(value_functions("function.duration"));
        functions.extend(percentile_functions("function.duration"));
        functions
    }
}
