pub mod migrations;

use crate::errors::{AppError, AppResult};
use crate::models::{IssueUserView, IssueUserViewPatch, NewIssueUserView, OrganizationMember};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use self::migrations::{all_migrations, applied_migrations, ApplyReport, MigrationRunner};

const MAX_VIEW_NAME_CHARS: usize = 128;
const MAX_QUERY_SORT_CHARS: usize = 16;
const MAX_POSITION: u16 = 32_767;
const DEFAULT_QUERY_SORT: &str = "date";

const ISSUE_VIEW_COLUMNS: &str =
    "id, date_updated, date_added, name, query, query_sort, position, org_member_id";

#[derive(Debug)]
pub struct Database {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl Database {
    pub fn new(path: &Path) -> AppResult<Self> {
        Self::new_with_options(path, false)
    }

    pub fn new_with_options(path: &Path, run_post_deployment: bool) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut conn = Connection::open(path)?;
        let report = MigrationRunner::new(all_migrations()).apply(&mut conn, run_post_deployment)?;
        tracing::debug!(
            path = %path.display(),
            applied = report.applied.len(),
            skipped = report.skipped.len(),
            "database ready"
        );

        Ok(Self {
            conn: Mutex::new(conn),
            db_path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Re-runs the migration runner; a no-op once everything is applied.
    pub fn migrate(&self, run_post_deployment: bool) -> AppResult<ApplyReport> {
        let mut conn = self.lock()?;
        MigrationRunner::new(all_migrations()).apply(&mut conn, run_post_deployment)
    }

    /// `app.name` labels of every applied migration, in name order.
    pub fn applied_migrations(&self) -> AppResult<Vec<String>> {
        let conn = self.lock()?;
        Ok(applied_migrations(&conn)?
            .into_iter()
            .map(|(app, name)| format!("{app}.{name}"))
            .collect())
    }

    pub fn insert_organization_member(
        &self,
        organization_id: i64,
        user_id: Option<i64>,
        role: &str,
    ) -> AppResult<OrganizationMember> {
        let now = Utc::now();
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO sentry_organizationmember (organization_id, user_id, role, date_added)
             VALUES (?1, ?2, ?3, ?4)",
            params![organization_id, user_id, role, now.to_rfc3339()],
        )?;
        Ok(OrganizationMember {
            id: conn.last_insert_rowid(),
            organization_id,
            user_id,
            role: role.to_string(),
            date_added: now,
        })
    }

    pub fn delete_organization_member(&self, member_id: i64) -> AppResult<bool> {
        let conn = self.lock()?;
        let changed = conn.execute("DELETE FROM sentry_organizationmember WHERE id = ?1", [member_id])?;
        Ok(changed > 0)
    }

    pub fn create_issue_view(&self, payload: &NewIssueUserView) -> AppResult<IssueUserView> {
        validate_view_name(&payload.name)?;
        let query_sort = payload
            .query_sort
            .clone()
            .unwrap_or_else(|| DEFAULT_QUERY_SORT.to_string());
        validate_query_sort(&query_sort)?;
        validate_position(payload.position)?;

        let now = Utc::now();
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO sentry_issueuserviews
               (date_updated, date_added, name, query, query_sort, position, org_member_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                now.to_rfc3339(),
                now.to_rfc3339(),
                payload.name,
                payload.query,
                query_sort,
                payload.position,
                payload.org_member_id,
            ],
        )
        .map_err(|err| match AppError::from(err) {
            AppError::Conflict(_) => AppError::Conflict(format!(
                "position {} is already taken for member {:?}",
                payload.position, payload.org_member_id
            )),
            other => other,
        })?;

        Ok(IssueUserView {
            id: conn.last_insert_rowid(),
            date_updated: now,
            date_added: Some(now),
            name: payload.name.clone(),
            query: payload.query.clone(),
            query_sort: Some(query_sort),
            position: payload.position,
            org_member_id: payload.org_member_id,
        })
    }

    pub fn get_issue_view(&self, view_id: i64) -> AppResult<Option<IssueUserView>> {
        let conn = self.lock()?;
        let sql = format!("SELECT {ISSUE_VIEW_COLUMNS} FROM sentry_issueuserviews WHERE id = ?1");
        conn.query_row(&sql, [view_id], parse_issue_view_row)
            .optional()
            .map_err(AppError::from)
    }

    pub fn list_issue_views_for_member(&self, member_id: i64) -> AppResult<Vec<IssueUserView>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {ISSUE_VIEW_COLUMNS} FROM sentry_issueuserviews
             WHERE org_member_id = ?1
             ORDER BY position ASC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([member_id], parse_issue_view_row)?;
        let mut views = Vec::new();
        for row in rows {
            views.push(row?);
        }
        Ok(views)
    }

    pub fn update_issue_view(&self, view_id: i64, patch: &IssueUserViewPatch) -> AppResult<Option<IssueUserView>> {
        if let Some(name) = &patch.name {
            validate_view_name(name)?;
        }
        if let Some(query_sort) = &patch.query_sort {
            validate_query_sort(query_sort)?;
        }

        {
            let conn = self.lock()?;
            let changed = conn.execute(
                "UPDATE sentry_issueuserviews
                 SET name = COALESCE(?2, name),
                     query = COALESCE(?3, query),
                     query_sort = COALESCE(?4, query_sort),
                     date_updated = ?5
                 WHERE id = ?1",
                params![view_id, patch.name, patch.query, patch.query_sort, Utc::now().to_rfc3339()],
            )?;
            if changed == 0 {
                return Ok(None);
            }
        }
        self.get_issue_view(view_id)
    }

    pub fn delete_issue_view(&self, view_id: i64) -> AppResult<bool> {
        let conn = self.lock()?;
        let changed = conn.execute("DELETE FROM sentry_issueuserviews WHERE id = ?1", [view_id])?;
        Ok(changed > 0)
    }

    /// Assigns positions `0..n` to `view_ids` in order. Every view the member
    /// owns must be listed exactly once.
    pub fn reorder_issue_views(&self, member_id: i64, view_ids: &[i64]) -> AppResult<Vec<IssueUserView>> {
        {
            let mut conn = self.lock()?;
            let tx = conn.transaction()?;

            let owned: Vec<i64> = {
                let mut stmt = tx.prepare("SELECT id FROM sentry_issueuserviews WHERE org_member_id = ?1")?;
                let ids = stmt
                    .query_map([member_id], |row| row.get(0))?
                    .collect::<rusqlite::Result<Vec<i64>>>()?;
                ids
            };
            let mut requested = view_ids.to_vec();
            requested.sort_unstable();
            requested.dedup();
            let mut expected = owned.clone();
            expected.sort_unstable();
            if requested.len() != view_ids.len() || requested != expected {
                return Err(AppError::InvalidInput(format!(
                    "reorder for member {member_id} must list each of its {} views exactly once",
                    owned.len()
                )));
            }
            if view_ids.len() > usize::from(MAX_POSITION) + 1 {
                return Err(AppError::InvalidInput(format!(
                    "a member can order at most {} views",
                    usize::from(MAX_POSITION) + 1
                )));
            }

            // Detached rows have a NULL member and never collide on position.
            tx.execute(
                "UPDATE sentry_issueuserviews SET org_member_id = NULL WHERE org_member_id = ?1",
                [member_id],
            )?;
            let now = Utc::now().to_rfc3339();
            for (position, view_id) in view_ids.iter().enumerate() {
                tx.execute(
                    "UPDATE sentry_issueuserviews
                     SET position = ?1, org_member_id = ?2, date_updated = ?3
                     WHERE id = ?4",
                    params![position as i64, member_id, now, view_id],
                )?;
            }
            tx.commit()?;
        }
        self.list_issue_views_for_member(member_id)
    }

    fn lock(&self) -> AppResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::Internal("database mutex poisoned".to_string()))
    }
}

fn validate_view_name(name: &str) -> AppResult<()> {
    if name.trim().is_empty() {
        return Err(AppError::InvalidInput("view name cannot be empty".to_string()));
    }
    if name.chars().count() > MAX_VIEW_NAME_CHARS {
        return Err(AppError::InvalidInput(format!(
            "view name exceeds {MAX_VIEW_NAME_CHARS} characters"
        )));
    }
    Ok(())
}

fn validate_query_sort(query_sort: &str) -> AppResult<()> {
    if query_sort.chars().count() > MAX_QUERY_SORT_CHARS {
        return Err(AppError::InvalidInput(format!(
            "query sort exceeds {MAX_QUERY_SORT_CHARS} characters"
        )));
    }
    Ok(())
}

fn validate_position(position: u16) -> AppResult<()> {
    if position > MAX_POSITION {
        return Err(AppError::InvalidInput(format!(
            "position {position} is outside 0..={MAX_POSITION}"
        )));
    }
    Ok(())
}

fn parse_issue_view_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<IssueUserView> {
    Ok(IssueUserView {
        id: row.get(0)?,
        date_updated: parse_time(&row.get::<_, String>(1)?)?,
        date_added: row
            .get::<_, Option<String>>(2)?
            .map(|raw| parse_time(&raw))
            .transpose()?,
        name: row.get(3)?,
        query: row.get(4)?,
        query_sort: row.get(5)?,
        position: row.get(6)?,
        org_member_id: row.get(7)?,
    })
}

fn parse_time(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|error| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, error.to_string())),
            )
        })
}
