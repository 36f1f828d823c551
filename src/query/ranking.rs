use crate::errors::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::plan::{Column, Condition, ConditionValue, Operator};

/// A dimension the query groups by, with the column it resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankedField {
    pub name: String,
    pub column: Column,
}

/// Extra filtering applied once the select list is resolved.
pub trait RankingStrategy: fmt::Debug + Send + Sync {
    fn conditions(&self, fields: &[RankedField]) -> AppResult<Vec<Condition>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Unranked;

impl RankingStrategy for Unranked {
    fn conditions(&self, _fields: &[RankedField]) -> AppResult<Vec<Condition>> {
        Ok(Vec::new())
    }
}

/// Restricts a timeseries to a previously computed set of top events, or to
/// everything except them when `other` is set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TopEvents {
    pub events: Vec<BTreeMap<String, String>>,
    pub other: bool,
}

impl TopEvents {
    pub fn new(events: Vec<BTreeMap<String, String>>, other: bool) -> Self {
        Self { events, other }
    }
}

impl RankingStrategy for TopEvents {
    fn conditions(&self, fields: &[RankedField]) -> AppResult<Vec<Condition>> {
        if self.events.is_empty() || fields.is_empty() {
            return Ok(Vec::new());
        }

        let mut per_event = Vec::with_capacity(self.events.len());
        for event in &self.events {
            let mut matches = Vec::with_capacity(fields.len());
            for field in fields {
                let raw = event.get(&field.name).ok_or_else(|| {
                    AppError::InvalidSearchQuery(format!("top event is missing a value for '{}'", field.name))
                })?;
                matches.push(Condition::compare(field.column.clone(), Operator::Eq, typed_value(&field.column, raw)?));
            }
            per_event.push(if matches.len() == 1 {
                matches.remove(0)
            } else {
                Condition::And(matches)
            });
        }

        let any_top = if per_event.len() == 1 {
            per_event.remove(0)
        } else {
            Condition::Or(per_event)
        };
        Ok(vec![if self.other {
            Condition::Not(Box::new(any_top))
        } else {
            any_top
        }])
    }
}

fn typed_value(column: &Column, raw: &str) -> AppResult<ConditionValue> {
    match column {
        Column::ProjectId | Column::OrganizationId => raw
            .parse::<u64>()
            .map(ConditionValue::Int)
            .map_err(|_| AppError::InvalidSearchQuery(format!("'{raw}' is not a valid id"))),
        _ => Ok(ConditionValue::Str(raw.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(name: &str, index: u64) -> RankedField {
        RankedField {
            name: name.to_string(),
            column: Column::Tag {
                key: name.to_string(),
                index,
            },
        }
    }

    fn event(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn top_events_builds_or_of_ands() {
        let top = TopEvents::new(
            vec![
                event(&[("transaction", "/a"), ("span.op", "db")]),
                event(&[("transaction", "/b"), ("span.op", "http")]),
            ],
            false,
        );
        let conditions = top
            .conditions(&[tag("transaction", 1), tag("span.op", 2)])
            .expect("conditions");
        assert_eq!(conditions.len(), 1);
        let Condition::Or(branches) = &conditions[0] else {
            panic!("expected OR, got {:?}", conditions[0]);
        };
        assert_eq!(branches.len(), 2);
        assert!(matches!(&branches[0], Condition::And(parts) if parts.len() == 2));
    }

    #[test]
    fn other_negates_the_top_set() {
        let top = TopEvents::new(vec![event(&[("span.op", "db")])], true);
        let conditions = top.conditions(&[tag("span.op", 2)]).expect("conditions");
        assert_eq!(
            conditions,
            vec![Condition::Not(Box::new(Condition::compare(
                Column::Tag {
                    key: "span.op".to_string(),
                    index: 2
                },
                Operator::Eq,
                ConditionValue::Str("db".to_string()),
            )))]
        );
    }

    #[test]
    fn missing_field_in_event_is_an_error() {
        let top = TopEvents::new(vec![event(&[("span.op", "db")])], false);
        assert!(top.conditions(&[tag("transaction", 1)]).is_err());
    }

    #[test]
    fn project_values_must_be_numeric() {
        let top = TopEvents::new(vec![event(&[("project.id", "abc")])], false);
        let field = RankedField {
            name: "project.id".to_string(),
            column: Column::ProjectId,
        };
        assert!(top.conditions(&[field]).is_err());
    }

    #[test]
    fn unranked_adds_nothing() {
        assert!(Unranked.conditions(&[tag("span.op", 2)]).expect("conditions").is_empty());
    }
}
