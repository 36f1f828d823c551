use crate::models::{FieldType, Granularity, TimeWindow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::dataset::{AggregateOp, Dataset};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Column {
    Timestamp,
    OrganizationId,
    ProjectId,
    Tag { key: String, index: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Eq,
    Neq,
    In,
    NotIn,
    Like,
    NotLike,
    Gte,
    Lt,
}

impl Operator {
    pub fn negate(self) -> Self {
        match self {
            Self::Eq => Self::Neq,
            Self::Neq => Self::Eq,
            Self::In => Self::NotIn,
            Self::NotIn => Self::In,
            Self::Like => Self::NotLike,
            Self::NotLike => Self::Like,
            Self::Gte => Self::Lt,
            Self::Lt => Self::Gte,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionValue {
    Int(u64),
    IntList(Vec<u64>),
    Time(DateTime<Utc>),
    Str(String),
    StrList(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    Compare {
        column: Column,
        op: Operator,
        value: ConditionValue,
    },
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Not(Box<Condition>),
}

impl Condition {
    pub fn compare(column: Column, op: Operator, value: ConditionValue) -> Self {
        Self::Compare { column, op, value }
    }

    pub fn time_range(window: &TimeWindow) -> Vec<Condition> {
        vec![
            Self::compare(Column::Timestamp, Operator::Gte, ConditionValue::Time(window.start)),
            Self::compare(Column::Timestamp, Operator::Lt, ConditionValue::Time(window.end)),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Aggregate {
    pub alias: String,
    pub function: String,
    pub op: AggregateOp,
    /// MRI actually queried, after any dataset substitution.
    pub metric_mri: String,
    pub metric_id: u64,
    pub result_type: FieldType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanExpr {
    Number(f64),
    Aggregate(Aggregate),
    Binary {
        op: ArithOp,
        lhs: Box<PlanExpr>,
        rhs: Box<PlanExpr>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum SelectItem {
    Aggregate(Aggregate),
    Dimension { alias: String, column: Column },
    Equation { alias: String, expression: PlanExpr },
}

impl SelectItem {
    pub fn alias(&self) -> &str {
        match self {
            Self::Aggregate(aggregate) => &aggregate.alias,
            Self::Dimension { alias, .. } | Self::Equation { alias, .. } => alias,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderBy {
    pub alias: String,
    pub direction: Direction,
}

/// Fully resolved query, ready to hand to the metrics backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryPlan {
    pub dataset: Dataset,
    pub select: Vec<SelectItem>,
    #[serde(rename = "where")]
    pub where_clause: Vec<Condition>,
    pub groupby: Vec<Column>,
    pub orderby: Vec<OrderBy>,
    pub limit: u32,
    pub granularity: Granularity,
    pub interval_seconds: Option<i64>,
    /// Unaligned fringes of a split query, queried separately at the base granularity.
    pub edges: Vec<TimeWindow>,
    pub has_transaction: bool,
}
