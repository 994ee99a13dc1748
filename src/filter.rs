// Query predicate builder
// Optional filters compose as named conditions with bound values,
// never as interpolated SQL text.

use chrono::NaiveDate;
use rusqlite::types::ToSql;

use crate::normalizer::Category;

// ============================================================================
// PREDICATE
// ============================================================================

/// A composed WHERE clause: parallel lists of conditions and bound values.
#[derive(Default)]
pub struct QueryPredicate {
    conditions: Vec<String>,
    values: Vec<Box<dyn ToSql>>,
}

impl QueryPredicate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a condition with one `?` placeholder and its bound value.
    pub fn push<V: ToSql + 'static>(&mut self, condition: &str, value: V) {
        self.conditions.push(condition.to_string());
        self.values.push(Box::new(value));
    }

    /// Render `" WHERE a AND b"`, or an empty string when unconditional.
    pub fn where_sql(&self) -> String {
        if self.conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.conditions.join(" AND "))
        }
    }

    /// Bound values in condition order, ready for `Statement::query_map`.
    pub fn params(&self) -> Vec<&dyn ToSql> {
        self.values.iter().map(|v| v.as_ref()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }
}

// ============================================================================
// RECORD FILTER
// ============================================================================

/// Filter over the recetas table: inclusive date range, optional branch,
/// optional category (raw-prefix match on the stored number).
#[derive(Debug, Clone, Default)]
pub struct RecetaFilter {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub branch: Option<i64>,
    pub category: Option<Category>,
}

impl RecetaFilter {
    pub fn date_range(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            start_date: Some(start),
            end_date: Some(end),
            ..Self::default()
        }
    }

    pub fn with_branch(mut self, branch: Option<i64>) -> Self {
        self.branch = branch;
        self
    }

    pub fn with_category(mut self, category: Option<Category>) -> Self {
        self.category = category;
        self
    }

    /// Compile to a predicate. Dates are ISO-8601 text, so range conditions
    /// compare lexicographically; branches are bound as canonical integer
    /// text to match the stored column.
    pub fn predicate(&self) -> QueryPredicate {
        let mut pred = QueryPredicate::new();

        if let Some(start) = self.start_date {
            pred.push("fechacreacion >= ?", start.to_string());
        }
        if let Some(end) = self.end_date {
            pred.push("fechacreacion <= ?", end.to_string());
        }
        if let Some(branch) = self.branch {
            pred.push("sucursal = ?", branch.to_string());
        }
        if let Some(category) = self.category {
            pred.push("numero LIKE ?", category.raw_prefix_pattern());
        }

        pred
    }
}
