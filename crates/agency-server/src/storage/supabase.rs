//! Hosted Postgres store reached through the Supabase REST (PostgREST) API

use agency_core::ports::{FilterOp, Query};
use agency_core::{AgencyError, Result, Store};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::Value;

pub struct SupabaseStore {
    client: Client,
    base_url: String,
    service_key: String,
}

impl SupabaseStore {
    pub fn new(base_url: impl Into<String>, service_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            service_key: service_key.into(),
        }
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.service_key)
            .header("Authorization", format!("Bearer {}", self.service_key))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let res = self
            .authorized(request)
            .send()
            .await
            .map_err(|e| AgencyError::Storage(format!("Request failed: {}", e)))?;

        if res.status().is_success() {
            return Ok(res);
        }

        let status = res.status();
        let message = res.text().await.unwrap_or_default();
        tracing::warn!("Supabase returned {}: {}", status, message);
        Err(match status {
            StatusCode::CONFLICT => AgencyError::Conflict(message),
            _ => AgencyError::Upstream {
                status: status.as_u16(),
                message,
            },
        })
    }

    async fn rows(res: Response) -> Result<Vec<Value>> {
        let body = res
            .text()
            .await
            .map_err(|e| AgencyError::Storage(format!("Failed to read response: {}", e)))?;
        if body.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&body)?)
    }
}

fn scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn quoted(value: &Value) -> String {
    match value {
        Value::String(s) => format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\"")),
        other => other.to_string(),
    }
}

/// PostgREST query-string pairs for a [`Query`]
fn encode_query(query: &Query) -> Result<Vec<(String, String)>> {
    query.validate()?;

    let mut params = Vec::new();
    for filter in &query.filters {
        let expr = match (filter.op, &filter.value) {
            (FilterOp::Eq, Value::Null) => "is.null".to_string(),
            (FilterOp::Neq, Value::Null) => "not.is.null".to_string(),
            (FilterOp::Ilike, value) => format!("ilike.*{}*", scalar(value)),
            (FilterOp::In, Value::Array(items)) => format!(
                "in.({})",
                items.iter().map(quoted).collect::<Vec<_>>().join(",")
            ),
            (op, value) => format!("{}.{}", op.as_str(), scalar(value)),
        };
        params.push((filter.column.clone(), expr));
    }
    if let Some(order) = &query.order {
        let direction = if order.ascending { "asc" } else { "desc" };
        params.push(("order".to_string(), format!("{}.{}", order.column, direction)));
    }
    if let Some(limit) = query.limit {
        params.push(("limit".to_string(), limit.to_string()));
    }
    if let Some(offset) = query.offset {
        params.push(("offset".to_string(), offset.to_string()));
    }
    Ok(params)
}

/// Total from a `Content-Range` header such as `0-24/3573` or `*/0`
fn parse_content_range(header: &str) -> Option<u64> {
    header.rsplit('/').next()?.trim().parse().ok()
}

fn id_filter(id: &str) -> [(&'static str, String); 1] {
    [("id", format!("eq.{}", id))]
}

#[async_trait]
impl Store for SupabaseStore {
    async fn insert(&self, table: &str, mut row: Value) -> Result<Value> {
        let Value::Object(fields) = &mut row else {
            return Err(AgencyError::Validation(format!(
                "rows inserted into {} must be objects",
                table
            )));
        };
        // Ids are chosen here so a compensating delete can always target the row
        if fields.get("id").map(Value::is_null).unwrap_or(true) {
            fields.insert(
                "id".to_string(),
                Value::String(uuid::Uuid::new_v4().to_string()),
            );
        }

        let request = self
            .client
            .post(self.table_url(table))
            .header("Prefer", "return=representation")
            .json(&row);
        let mut rows = Self::rows(self.send(request).await?).await?;

        rows.pop()
            .ok_or_else(|| AgencyError::Storage(format!("No row returned from insert into {}", table)))
    }

    async fn get(&self, table: &str, id: &str) -> Result<Option<Value>> {
        let request = self
            .client
            .get(self.table_url(table))
            .query(&id_filter(id))
            .query(&[("limit", "1")]);
        let rows = Self::rows(self.send(request).await?).await?;
        Ok(rows.into_iter().next())
    }

    async fn select(&self, table: &str, query: &Query) -> Result<Vec<Value>> {
        let params = encode_query(query)?;
        let request = self
            .client
            .get(self.table_url(table))
            .query(&[("select", "*")])
            .query(&params);
        Self::rows(self.send(request).await?).await
    }

    async fn count(&self, table: &str, query: &Query) -> Result<u64> {
        let mut unpaged = query.clone();
        unpaged.limit = None;
        unpaged.offset = None;
        let params = encode_query(&unpaged)?;

        let request = self
            .client
            .head(self.table_url(table))
            .header("Prefer", "count=exact")
            .query(&params);
        let res = self.send(request).await?;

        res.headers()
            .get("content-range")
            .and_then(|h| h.to_str().ok())
            .and_then(parse_content_range)
            .ok_or_else(|| AgencyError::Storage(format!("No count returned for {}", table)))
    }

    async fn update(&self, table: &str, id: &str, patch: Value) -> Result<Option<Value>> {
        let Value::Object(mut fields) = patch else {
            return Err(AgencyError::Validation("update patch must be an object".to_string()));
        };
        fields.remove("id");

        let request = self
            .client
            .patch(self.table_url(table))
            .query(&id_filter(id))
            .header("Prefer", "return=representation")
            .json(&fields);
        let rows = Self::rows(self.send(request).await?).await?;
        Ok(rows.into_iter().next())
    }

    async fn delete(&self, table: &str, id: &str) -> Result<bool> {
        let request = self
            .client
            .delete(self.table_url(table))
            .query(&id_filter(id))
            .header("Prefer", "return=representation");
        let rows = Self::rows(self.send(request).await?).await?;
        Ok(!rows.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn lookup<'a>(params: &'a [(String, String)], key: &str) -> Option<&'a str> {
        params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn test_encode_filters() {
        let query = Query::new()
            .eq("agency_id", "a1")
            .gte("score", 70)
            .eq("lead_id", Value::Null)
            .ilike("name", "ann")
            .is_in("status", ["new", "lost"])
            .order_by("created_at", false)
            .limit(20)
            .offset(40);
        let params = encode_query(&query).unwrap();

        assert_eq!(lookup(&params, "agency_id"), Some("eq.a1"));
        assert_eq!(lookup(&params, "score"), Some("gte.70"));
        assert_eq!(lookup(&params, "lead_id"), Some("is.null"));
        assert_eq!(lookup(&params, "name"), Some("ilike.*ann*"));
        assert_eq!(lookup(&params, "status"), Some("in.(\"new\",\"lost\")"));
        assert_eq!(lookup(&params, "order"), Some("created_at.desc"));
        assert_eq!(lookup(&params, "limit"), Some("20"));
        assert_eq!(lookup(&params, "offset"), Some("40"));
    }

    #[test]
    fn test_encode_booleans() {
        let params = encode_query(&Query::new().eq("completed", json!(true))).unwrap();
        assert_eq!(lookup(&params, "completed"), Some("eq.true"));
    }

    #[test]
    fn test_parse_content_range() {
        assert_eq!(parse_content_range("0-24/3573"), Some(3573));
        assert_eq!(parse_content_range("*/0"), Some(0));
        assert_eq!(parse_content_range("0-24/*"), None);
    }
}
