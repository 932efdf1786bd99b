//! Row filters understood by every store backend

use crate::error::{AgencyError, Result};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    /// Case-insensitive substring match
    Ilike,
    In,
}

impl FilterOp {
    /// PostgREST operator name
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOp::Eq => "eq",
            FilterOp::Neq => "neq",
            FilterOp::Gt => "gt",
            FilterOp::Gte => "gte",
            FilterOp::Lt => "lt",
            FilterOp::Ilike => "ilike",
            FilterOp::In => "in",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: String,
    pub op: FilterOp,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

/// Builder mirroring the PostgREST query string
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filters: Vec<Filter>,
    pub order: Option<Order>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    fn filter(mut self, column: &str, op: FilterOp, value: Value) -> Self {
        self.filters.push(Filter {
            column: column.to_string(),
            op,
            value,
        });
        self
    }

    pub fn eq(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(column, FilterOp::Eq, value.into())
    }

    pub fn neq(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(column, FilterOp::Neq, value.into())
    }

    pub fn gt(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(column, FilterOp::Gt, value.into())
    }

    pub fn gte(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(column, FilterOp::Gte, value.into())
    }

    pub fn lt(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(column, FilterOp::Lt, value.into())
    }

    pub fn ilike(self, column: &str, needle: &str) -> Self {
        self.filter(column, FilterOp::Ilike, Value::String(needle.to_string()))
    }

    pub fn is_in<I, V>(self, column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.filter(column, FilterOp::In, Value::Array(values))
    }

    pub fn order_by(mut self, column: &str, ascending: bool) -> Self {
        self.order = Some(Order {
            column: column.to_string(),
            ascending,
        });
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Reject column names that are not plain identifiers
    pub fn validate(&self) -> Result<()> {
        for filter in &self.filters {
            validate_column(&filter.column)?;
            if filter.op == FilterOp::In && !filter.value.is_array() {
                return Err(AgencyError::Validation(format!(
                    "'in' filter on {} needs a list",
                    filter.column
                )));
            }
        }
        if let Some(order) = &self.order {
            validate_column(&order.column)?;
        }
        Ok(())
    }
}

pub fn validate_column(column: &str) -> Result<()> {
    let mut chars = column.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(AgencyError::Validation(format!(
            "invalid column name '{}'",
            column
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builder_collects_filters() {
        let query = Query::new()
            .eq("agency_id", "a1")
            .gte("score", 40)
            .order_by("created_at", false)
            .limit(10);
        assert_eq!(query.filters.len(), 2);
        assert_eq!(query.filters[1].value, json!(40));
        assert_eq!(query.limit, Some(10));
        assert!(query.validate().is_ok());
    }

    #[test]
    fn test_rejects_injected_column() {
        let query = Query::new().eq("id') OR 1=1 --", "x");
        assert!(matches!(query.validate(), Err(AgencyError::Validation(_))));
        assert!(validate_column("1abc").is_err());
        assert!(validate_column("").is_err());
        assert!(validate_column("user_id").is_ok());
    }
}
