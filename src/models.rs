use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Integer,
    Number,
    Duration,
    Percentage,
    Rate,
    Size,
    String,
}

/// Time bucket size the metrics backend stores rollups at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Minute,
    Hour,
    Day,
}

impl Granularity {
    /// Largest first.
    pub const ALL: [Granularity; 3] = [Granularity::Day, Granularity::Hour, Granularity::Minute];

    pub fn seconds(self) -> i64 {
        match self {
            Self::Minute => 60,
            Self::Hour => 3_600,
            Self::Day => 86_400,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn duration_seconds(&self) -> i64 {
        self.end.signed_duration_since(self.start).num_seconds()
    }

    pub fn is_aligned_to(&self, granularity: Granularity) -> bool {
        let step = granularity.seconds();
        self.start.timestamp().rem_euclid(step) == 0 && self.end.timestamp().rem_euclid(step) == 0
    }
}

/// A metrics query as received from the caller, before any resolution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryRequest {
    pub organization_id: u64,
    pub project_ids: Vec<u64>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub selected_columns: Vec<String>,
    pub equations: Vec<String>,
    pub query: String,
    pub orderby: Vec<String>,
    pub limit: Option<u32>,
    pub interval_seconds: Option<i64>,
}

impl QueryRequest {
    pub fn window(&self) -> Option<TimeWindow> {
        match (self.start, self.end) {
            (Some(start), Some(end)) => Some(TimeWindow::new(start, end)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationMember {
    pub id: i64,
    pub organization_id: i64,
    pub user_id: Option<i64>,
    pub role: String,
    pub date_added: DateTime<Utc>,
}

/// A saved issue search pinned at an ordinal position for one organization member.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IssueUserView {
    pub id: i64,
    pub date_updated: DateTime<Utc>,
    pub date_added: Option<DateTime<Utc>>,
    pub name: String,
    pub query: String,
    pub query_sort: Option<String>,
    pub position: u16,
    pub org_member_id: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewIssueUserView {
    pub org_member_id: Option<i64>,
    pub name: String,
    pub query: String,
    pub query_sort: Option<String>,
    pub position: u16,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueUserViewPatch {
    pub name: Option<String>,
    pub query: Option<String>,
    pub query_sort: Option<String>,
}
