//! Structured builder for the `role_attribute_path` admin expression.
//!
//! Clauses are collected as typed values and rendered in one pass at the
//! end, so the quoting rules (and the resulting
//! [`MappingError::InvalidGroupName`]) are enforced in exactly one place.
//!
//! The rendered expression has the shape
//!
//! ```text
//! contains(groups[*], 'a') && 'GrafanaAdmin' || contains(groups[*], 'b') && 'GrafanaAdmin' || 'None'
//! ```
//!
//! which Grafana evaluates as JMESPath with left-to-right short-circuit: the
//! first clause whose group membership matches yields `GrafanaAdmin`, and the
//! trailing `'None'` literal is the fall-through for users in none of the
//! listed groups.

use crate::errors::MappingError;

/// One `contains(groups[*], '<name>') && 'GrafanaAdmin'` clause.
#[derive(Debug, Clone, PartialEq, Eq)]
struct AdminClause {
    group: String,
}

/// Builder collecting admin-group clauses, rendered with [`render`](Self::render).
#[derive(Debug, Clone, Default)]
pub struct AdminExpression {
    clauses: Vec<AdminClause>,
}

impl AdminExpression {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a clause for `group`.
    ///
    /// Group names are inserted verbatim into single-quoted literals, so a
    /// name containing a single quote would produce an unparseable
    /// expression; such names are rejected here rather than emitted.
    pub fn push_group(&mut self, group: &str) -> Result<(), MappingError> {
        if group.contains('\'') {
            return Err(MappingError::InvalidGroupName(group.to_string()));
        }
        self.clauses.push(AdminClause {
            group: group.to_string(),
        });
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Render the expression, or `None` when no clause was added.
    pub fn render(&self) -> Option<String> {
        if self.clauses.is_empty() {
            return None;
        }

        let mut parts: Vec<String> = self
            .clauses
            .iter()
            .map(|c| format!("contains(groups[*], '{}') && 'GrafanaAdmin'", c.group))
            .collect();
        parts.push("'None'".to_string());

        Some(parts.join(" || "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_renders_none() {
        let expr = AdminExpression::new();
        assert!(expr.is_empty());
        assert_eq!(expr.render(), None);
    }

    #[test]
    fn test_single_clause() {
        let mut expr = AdminExpression::new();
        expr.push_group("platform").unwrap();
        assert_eq!(
            expr.render().as_deref(),
            Some("contains(groups[*], 'platform') && 'GrafanaAdmin' || 'None'")
        );
    }

    #[test]
    fn test_clause_order_is_insertion_order() {
        let mut expr = AdminExpression::new();
        expr.push_group("a").unwrap();
        expr.push_group("b").unwrap();
        assert_eq!(
            expr.render().as_deref(),
            Some(
                "contains(groups[*], 'a') && 'GrafanaAdmin' || \
                 contains(groups[*], 'b') && 'GrafanaAdmin' || 'None'"
            )
        );
    }

    #[test]
    fn test_single_quote_rejected() {
        let mut expr = AdminExpression::new();
        let err = expr.push_group("o'brien").unwrap_err();
        assert!(matches!(err, MappingError::InvalidGroupName(ref name) if name == "o'brien"));
        // The rejected clause must not have been recorded.
        assert!(expr.is_empty());
    }
}
