//! Search filter parsing for the `query` string of a metrics request.
//!
//! Supported terms, separated by whitespace:
//! `key:value`, `!key:value`, `key:"quoted value"`, `key:[a, b]`, values with
//! `*` wildcards, and bare free text.

use crate::errors::{AppError, AppResult};
use once_cell::sync::Lazy;
use regex::Regex;

static FILTER_TERM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<negated>!)?(?P<key>[A-Za-z_][A-Za-z0-9_.\-]*):(?P<value>.*)$").expect("valid regex")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchValue {
    Exact(String),
    Wildcard(String),
    List(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchFilter {
    pub key: String,
    pub negated: bool,
    pub value: SearchValue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchTerm {
    Filter(SearchFilter),
    FreeText(String),
}

pub fn parse_search_query(query: &str) -> AppResult<Vec<SearchTerm>> {
    let mut terms = Vec::new();
    let mut free_text: Vec<String> = Vec::new();

    for token in tokenize(query)? {
        if matches!(token.as_str(), "AND" | "OR") {
            return Err(AppError::InvalidSearchQuery(
                "boolean operators are not supported in metrics queries".to_string(),
            ));
        }

        let Some(captures) = FILTER_TERM.captures(&token) else {
            free_text.push(unquote(&token).to_string());
            continue;
        };

        let key = captures["key"].to_string();
        let raw_value = &captures["value"];
        if raw_value.is_empty() {
            return Err(AppError::InvalidSearchQuery(format!("missing value for '{key}'")));
        }

        terms.push(SearchTerm::Filter(SearchFilter {
            key,
            negated: captures.name("negated").is_some(),
            value: parse_value(raw_value)?,
        }));
    }

    if !free_text.is_empty() {
        terms.push(SearchTerm::FreeText(free_text.join(" ")));
    }
    Ok(terms)
}

/// Splits on whitespace outside of quotes and brackets.
fn tokenize(query: &str) -> AppResult<Vec<String>> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut bracket_depth = 0usize;

    for ch in query.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                current.push(ch);
            }
            '[' if !in_quotes => {
                bracket_depth += 1;
                current.push(ch);
            }
            ']' if !in_quotes => {
                bracket_depth = bracket_depth.checked_sub(1).ok_or_else(|| {
                    AppError::InvalidSearchQuery("unbalanced ']' in search query".to_string())
                })?;
                current.push(ch);
            }
            c if c.is_whitespace() && !in_quotes && bracket_depth == 0 => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(ch),
        }
    }

    if in_quotes {
        return Err(AppError::InvalidSearchQuery("unterminated quote in search query".to_string()));
    }
    if bracket_depth != 0 {
        return Err(AppError::InvalidSearchQuery("unterminated '[' in search query".to_string()));
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    Ok(tokens)
}

fn parse_value(raw: &str) -> AppResult<SearchValue> {
    if let Some(inner) = raw.strip_prefix('[').and_then(|rest| rest.strip_suffix(']')) {
        let items: Vec<String> = inner
            .split(',')
            .map(|item| unquote(item.trim()).to_string())
            .filter(|item| !item.is_empty())
            .collect();
        if items.is_empty() {
            return Err(AppError::InvalidSearchQuery("empty list in search query".to_string()));
        }
        return Ok(SearchValue::List(items));
    }

    let value = unquote(raw);
    if value.contains('*') {
        Ok(SearchValue::Wildcard(value.to_string()))
    } else {
        Ok(SearchValue::Exact(value.to_string()))
    }
}

fn unquote(raw: &str) -> &str {
    raw.strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .unwrap_or(raw)
}

/// Translates a `*` wildcard into a SQL `LIKE` pattern, escaping literal `%` and `_`.
pub fn wildcard_to_like(value: &str) -> String {
    let mut pattern = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '*' => pattern.push('%'),
            '%' | '_' | '\\' => {
                pattern.push('\\');
                pattern.push(ch);
            }
            _ => pattern.push(ch),
        }
    }
    pattern
}
