use serde_json::{Map, Value};

use super::{ApiError, ListPayload, ListQuery, RawRecord};

const TOTAL_FIELDS: &[&str] = &["total", "totalItems", "total_items", "count"];
const PAGE_FIELDS: &[&str] = &["page", "currentPage", "current_page", "current"];
const LIMIT_FIELDS: &[&str] = &["limit", "pageSize", "page_size", "perPage", "per_page"];
const META_CONTAINERS: &[&str] = &["pagination", "meta"];

/// Normalizes the list response shapes seen in the wild into one payload:
///
/// - `{ items, total, page, limit }`
/// - the same object nested under `data`
/// - `{ data: [...], pagination | meta: { ... } }`
/// - a bare array, paginated by the request itself
///
/// Missing metadata falls back to the request's page and limit and the item count.
pub fn decode_list_response(body: Value, query: &ListQuery) -> Result<ListPayload, ApiError> {
    match body {
        Value::Array(items) => {
            let items = decode_items(items)?;
            Ok(ListPayload {
                total: items.len() as u64,
                items,
                page: query.page,
                limit: query.limit,
            })
        }
        Value::Object(mut root) => {
            if let Some(items) = root.remove("items") {
                return from_envelope(items, &root, query);
            }
            match root.remove("data") {
                Some(Value::Object(inner)) => decode_list_response(Value::Object(inner), query),
                Some(items @ Value::Array(_)) => from_envelope(items, &root, query),
                Some(other) => Err(ApiError::Malformed(format!(
                    "expected list under `data`, found {}",
                    describe(&other)
                ))),
                None => Err(ApiError::Malformed(
                    "response carries neither `items` nor `data`".into(),
                )),
            }
        }
        other => Err(ApiError::Malformed(format!(
            "expected object or array, found {}",
            describe(&other)
        ))),
    }
}

fn from_envelope(
    items: Value,
    envelope: &Map<String, Value>,
    query: &ListQuery,
) -> Result<ListPayload, ApiError> {
    let Value::Array(items) = items else {
        return Err(ApiError::Malformed(format!(
            "expected `items` to be an array, found {}",
            describe(&items)
        )));
    };
    let items = decode_items(items)?;
    let total = read_meta(envelope, TOTAL_FIELDS).unwrap_or(items.len() as u64);
    let page = read_meta(envelope, PAGE_FIELDS)
        .and_then(|page| u32::try_from(page).ok())
        .unwrap_or(query.page);
    let limit = read_meta(envelope, LIMIT_FIELDS)
        .and_then(|limit| u32::try_from(limit).ok())
        .unwrap_or(query.limit);
    Ok(ListPayload {
        items,
        total,
        page,
        limit,
    })
}

fn decode_items(items: Vec<Value>) -> Result<Vec<RawRecord>, ApiError> {
    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            serde_json::from_value(item)
                .map_err(|err| ApiError::Malformed(format!("record {index}: {err}")))
        })
        .collect()
}

/// Looks for a numeric field on the envelope itself, then inside `pagination` / `meta`.
fn read_meta(envelope: &Map<String, Value>, fields: &[&str]) -> Option<u64> {
    let containers = std::iter::once(Some(envelope)).chain(
        META_CONTAINERS
            .iter()
            .map(|name| envelope.get(*name).and_then(Value::as_object)),
    );
    for container in containers.flatten() {
        for field in fields {
            if let Some(value) = container.get(*field).and_then(as_count) {
                return Some(value);
            }
        }
    }
    None
}

fn as_count(value: &Value) -> Option<u64> {
    match value {
        Value::Number(number) => number.as_u64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

fn describe(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
