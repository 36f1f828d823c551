//! Declarative schema migrations.
//!
//! Each [`Migration`] describes the tables and constraints it introduces; the
//! SQLite DDL is rendered from that description rather than written by hand.
//! [`MigrationRunner`] orders migrations by their declared dependencies and
//! records what has been applied in `schema_migrations`.

use crate::errors::{AppError, AppResult};
use chrono::Utc;
use rusqlite::{params, Connection};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

pub const APP_LABEL: &str = "sentry";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    BigAutoField,
    BigInteger,
    DateTime { default_now: bool },
    Text { max_length: Option<u32> },
    Char { max_length: u32 },
    PositiveSmallInteger,
    /// References `to_table(id)`; deleting the target deletes the row.
    ForeignKey { to_table: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    pub name: &'static str,
    pub kind: FieldKind,
    pub null: bool,
    pub default: Option<&'static str>,
}

impl FieldDef {
    pub fn new(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            null: false,
            default: None,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.null = true;
        self
    }

    pub fn with_default(mut self, value: &'static str) -> Self {
        self.default = Some(value);
        self
    }

    fn render(&self) -> String {
        let name = self.name;
        let mut sql = match &self.kind {
            FieldKind::BigAutoField => return format!("{name} INTEGER PRIMARY KEY AUTOINCREMENT"),
            FieldKind::BigInteger => format!("{name} INTEGER"),
            FieldKind::DateTime { .. } => format!("{name} TEXT"),
            FieldKind::Text { .. } | FieldKind::Char { .. } => format!("{name} TEXT"),
            FieldKind::PositiveSmallInteger => format!("{name} INTEGER"),
            FieldKind::ForeignKey { to_table } => {
                format!("{name} INTEGER REFERENCES {to_table}(id) ON DELETE CASCADE")
            }
        };

        if !self.null {
            sql.push_str(" NOT NULL");
        }
        if let FieldKind::DateTime { default_now: true } = self.kind {
            sql.push_str(" DEFAULT (strftime('%Y-%m-%dT%H:%M:%f+00:00', 'now'))");
        } else if let Some(value) = self.default {
            sql.push_str(&format!(" DEFAULT '{}'", value.replace('\'', "''")));
        }

        match self.kind {
            FieldKind::Text { max_length: Some(max) } | FieldKind::Char { max_length: max } => {
                sql.push_str(&format!(" CHECK (length({name}) <= {max})"));
            }
            FieldKind::PositiveSmallInteger => {
                sql.push_str(&format!(" CHECK ({name} >= 0 AND {name} <= 32767)"));
            }
            _ => {}
        }
        sql
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniqueConstraint {
    pub name: &'static str,
    pub fields: Vec<&'static str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    CreateModel {
        name: &'static str,
        table: &'static str,
        fields: Vec<FieldDef>,
    },
    AddConstraint {
        table: &'static str,
        constraint: UniqueConstraint,
    },
}

impl Operation {
    pub fn to_sql(&self) -> String {
        match self {
            Self::CreateModel { table, fields, .. } => {
                let columns = fields
                    .iter()
                    .map(|field| format!("  {}", field.render()))
                    .collect::<Vec<_>>()
                    .join(",\n");
                format!("CREATE TABLE {table} (\n{columns}\n);")
            }
            Self::AddConstraint { table, constraint } => format!(
                "CREATE UNIQUE INDEX {} ON {table} ({});",
                constraint.name,
                constraint.fields.join(", ")
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Migration {
    pub app: &'static str,
    pub name: &'static str,
    /// Post-deployment migrations are safe to run after code ships and are
    /// skipped by the runner unless explicitly requested.
    pub is_post_deployment: bool,
    pub dependencies: Vec<(&'static str, &'static str)>,
    pub operations: Vec<Operation>,
}

impl Migration {
    pub fn key(&self) -> (&'static str, &'static str) {
        (self.app, self.name)
    }

    pub fn to_sql(&self) -> String {
        self.operations
            .iter()
            .map(Operation::to_sql)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub fn create_organization_member_table() -> Migration {
    Migration {
        app: APP_LABEL,
        name: "0723_create_sentry_organizationmember_table",
        is_post_deployment: false,
        dependencies: Vec::new(),
        operations: vec![Operation::CreateModel {
            name: "OrganizationMember",
            table: "sentry_organizationmember",
            fields: vec![
                FieldDef::new("id", FieldKind::BigAutoField),
                FieldDef::new("organization_id", FieldKind::BigInteger),
                FieldDef::new("user_id", FieldKind::BigInteger).nullable(),
                FieldDef::new("role", FieldKind::Char { max_length: 32 }).with_default("member"),
                FieldDef::new("date_added", FieldKind::DateTime { default_now: true }),
            ],
        }],
    }
}

/// Schema-neutral step that 0725 declares as its direct predecessor.
pub fn discover_saved_query_dataset() -> Migration {
    Migration {
        app: APP_LABEL,
        name: "0724_discover_saved_query_dataset",
        is_post_deployment: false,
        dependencies: vec![(APP_LABEL, "0723_create_sentry_organizationmember_table")],
        operations: Vec::new(),
    }
}

pub fn create_issue_user_views_table() -> Migration {
    Migration {
        app: APP_LABEL,
        name: "0725_create_sentry_issueuserviews_table",
        is_post_deployment: false,
        dependencies: vec![(APP_LABEL, "0724_discover_saved_query_dataset")],
        operations: vec![
            Operation::CreateModel {
                name: "IssueUserViews",
                table: "sentry_issueuserviews",
                fields: vec![
                    FieldDef::new("id", FieldKind::BigAutoField),
                    FieldDef::new("date_updated", FieldKind::DateTime { default_now: true }),
                    FieldDef::new("date_added", FieldKind::DateTime { default_now: true }).nullable(),
                    FieldDef::new("name", FieldKind::Text { max_length: Some(128) }),
                    FieldDef::new("query", FieldKind::Text { max_length: None }),
                    FieldDef::new("query_sort", FieldKind::Char { max_length: 16 })
                        .nullable()
                        .with_default("date"),
                    FieldDef::new("position", FieldKind::PositiveSmallInteger),
                    FieldDef::new(
                        "org_member_id",
                        FieldKind::ForeignKey {
                            to_table: "sentry_organizationmember",
                        },
                    )
                    .nullable(),
                ],
            },
            Operation::AddConstraint {
                table: "sentry_issueuserviews",
                constraint: UniqueConstraint {
                    name: "sentry_issueuserviews_unique_view_position_per_member",
                    fields: vec!["org_member_id", "position"],
                },
            },
        ],
    }
}

pub fn all_migrations() -> Vec<Migration> {
    vec![
        create_organization_member_table(),
        discover_saved_query_dataset(),
        create_issue_user_views_table(),
    ]
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ApplyReport {
    pub applied: Vec<String>,
    pub skipped: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct MigrationRunner {
    migrations: Vec<Migration>,
}

impl MigrationRunner {
    pub fn new(migrations: Vec<Migration>) -> Self {
        Self { migrations }
    }

    /// Unapplied migrations in an order that satisfies every dependency.
    pub fn plan(&self, applied: &BTreeSet<(String, String)>) -> AppResult<Vec<&Migration>> {
        let mut by_key: BTreeMap<(&str, &str), &Migration> = BTreeMap::new();
        for migration in &self.migrations {
            if by_key.insert(migration.key(), migration).is_some() {
                return Err(AppError::Migration(format!(
                    "duplicate migration {}.{}",
                    migration.app, migration.name
                )));
            }
        }

        let is_applied =
            |key: (&str, &str)| applied.contains(&(key.0.to_string(), key.1.to_string()));

        for migration in &self.migrations {
            for dependency in &migration.dependencies {
                if !by_key.contains_key(dependency) && !is_applied(*dependency) {
                    return Err(AppError::Migration(format!(
                        "{}.{} depends on unknown migration {}.{}",
                        migration.app, migration.name, dependency.0, dependency.1
                    )));
                }
            }
        }

        let mut ordered: Vec<&Migration> = Vec::new();
        let mut done: BTreeSet<(&str, &str)> = BTreeSet::new();
        let mut pending: Vec<&Migration> = self
            .migrations
            .iter()
            .filter(|migration| !is_applied(migration.key()))
            .collect();

        while !pending.is_empty() {
            let before = pending.len();
            pending.retain(|migration| {
                let ready = migration
                    .dependencies
                    .iter()
                    .all(|dependency| is_applied(*dependency) || done.contains(dependency));
                if ready {
                    done.insert(migration.key());
                    ordered.push(*migration);
                }
                !ready
            });
            if pending.len() == before {
                let names = pending
                    .iter()
                    .map(|migration| format!("{}.{}", migration.app, migration.name))
                    .collect::<Vec<_>>()
                    .join(", ");
                return Err(AppError::Migration(format!("dependency cycle among {names}")));
            }
        }

        Ok(ordered)
    }

    pub fn apply(&self, conn: &mut Connection, run_post_deployment: bool) -> AppResult<ApplyReport> {
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             CREATE TABLE IF NOT EXISTS schema_migrations (
               app TEXT NOT NULL,
               name TEXT NOT NULL,
               applied_at TEXT NOT NULL,
               PRIMARY KEY(app, name)
             );",
        )?;

        let applied = applied_migrations(conn)?;
        let mut report = ApplyReport::default();
        let mut held_back: BTreeSet<(&str, &str)> = BTreeSet::new();
        for migration in self.plan(&applied)? {
            let label = format!("{}.{}", migration.app, migration.name);
            if migration.is_post_deployment && !run_post_deployment {
                tracing::info!(migration = %label, "skipping post-deployment migration");
                held_back.insert(migration.key());
                report.skipped.push(label);
                continue;
            }
            if let Some(dependency) = migration
                .dependencies
                .iter()
                .find(|dependency| held_back.contains(*dependency))
            {
                tracing::info!(
                    migration = %label,
                    dependency = %format!("{}.{}", dependency.0, dependency.1),
                    "skipping migration whose dependency was not applied"
                );
                held_back.insert(migration.key());
                report.skipped.push(label);
                continue;
            }

            let tx = conn.transaction()?;
            tx.execute_batch(&migration.to_sql())?;
            tx.execute(
                "INSERT INTO schema_migrations (app, name, applied_at) VALUES (?1, ?2, ?3)",
                params![migration.app, migration.name, Utc::now().to_rfc3339()],
            )?;
            tx.commit()?;
            tracing::info!(migration = %label, "applied migration");
            report.applied.push(label);
        }
        Ok(report)
    }
}

pub fn applied_migrations(conn: &Connection) -> AppResult<BTreeSet<(String, String)>> {
    let mut stmt = conn.prepare("SELECT app, name FROM schema_migrations")?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;
    let mut applied = BTreeSet::new();
    for row in rows {
        applied.insert(row?);
    }
    Ok(applied)
}
