//! Read request assembly and the paginated read loop.
//!
//! # Design
//! `build_read_request` is pure: it resolves defaults (return fields, page
//! size, sort direction) and normalizes filters. `paginate` drives repeated
//! page fetches through a caller-supplied closure, so the loop can be tested
//! without any transport. Pages are fetched strictly one after another; the
//! server-reported total is only meaningful across sequential calls.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{ApiError, Result};
use crate::filter::{normalize, FilterGroup, Filters};
use crate::types::{json_type_name, Entity};

/// Page size used when the configuration does not override it.
pub const DEFAULT_RECORDS_PER_PAGE: u32 = 500;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

/// One `{field_name, direction}` entry of a read's sort list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Sort {
    pub field_name: String,
    pub direction: Direction,
}

impl Sort {
    pub fn asc(field_name: impl Into<String>) -> Self {
        Self {
            field_name: field_name.into(),
            direction: Direction::Asc,
        }
    }

    pub fn desc(field_name: impl Into<String>) -> Self {
        Self {
            field_name: field_name.into(),
            direction: Direction::Desc,
        }
    }

    /// Parse `{field_name|column, direction?}`. The old `column` key wins
    /// when both are present; a missing direction means ascending.
    pub fn from_json(value: &Value) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| ApiError::Validation(format!("sort must be an object, got {}", json_type_name(value))))?;
        let field_name = obj
            .get("column")
            .or_else(|| obj.get("field_name"))
            .and_then(Value::as_str)
            .ok_or_else(|| ApiError::Validation(format!("sort is missing 'field_name': {value}")))?;
        let direction = match obj.get("direction").and_then(Value::as_str) {
            None | Some("asc") => Direction::Asc,
            Some("desc") => Direction::Desc,
            Some(other) => return Err(ApiError::Validation(format!("unknown sort direction '{other}'"))),
        };
        Ok(Self {
            field_name: field_name.to_string(),
            direction,
        })
    }
}

/// Optional knobs of `find`. `Default` gives the plain "ids of every active
/// entity" query.
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    pub fields: Vec<String>,
    pub order: Vec<Sort>,
    pub filter_operator: Option<String>,
    /// Maximum number of entities to return; 0 means unlimited.
    pub limit: usize,
    pub retired_only: bool,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn order(mut self, order: Vec<Sort>) -> Self {
        self.order = order;
        self
    }

    pub fn filter_operator(mut self, op: impl Into<String>) -> Self {
        self.filter_operator = Some(op.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn retired_only(mut self, retired_only: bool) -> Self {
        self.retired_only = retired_only;
        self
    }

    /// Requested fields with the `["id"]` default applied.
    pub fn return_fields(&self) -> Vec<String> {
        if self.fields.is_empty() {
            vec!["id".to_string()]
        } else {
            self.fields.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReturnOnly {
    Active,
    Retired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Paging {
    pub entities_per_page: u32,
    pub current_page: u32,
}

/// Arguments of the `read` call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReadRequest {
    #[serde(rename = "type")]
    pub entity_type: String,
    pub return_fields: Vec<String>,
    pub filters: FilterGroup,
    pub return_only: ReturnOnly,
    pub paging: Paging,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sorts: Vec<Sort>,
}

/// Build the first-page read request for a `find`.
pub fn build_read_request(
    entity_type: &str,
    filters: &Filters,
    options: &FindOptions,
    records_per_page: u32,
) -> Result<ReadRequest> {
    let filters = normalize(filters, options.filter_operator.as_deref())?;
    let entities_per_page = match u32::try_from(options.limit) {
        Ok(limit) if limit > 0 && limit < records_per_page => limit,
        _ => records_per_page,
    };
    Ok(ReadRequest {
        entity_type: entity_type.to_string(),
        return_fields: options.return_fields(),
        filters,
        return_only: if options.retired_only {
            ReturnOnly::Retired
        } else {
            ReturnOnly::Active
        },
        paging: Paging {
            entities_per_page,
            current_page: 1,
        },
        sorts: options.order.clone(),
    })
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PagingInfo {
    #[serde(default)]
    pub entity_count: Option<u64>,
}

/// One page of `read` results.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReadPage {
    #[serde(default)]
    pub entities: Vec<Entity>,
    #[serde(default)]
    pub paging_info: PagingInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageStep {
    Continue,
    Done,
}

/// Bookkeeping for one paginated read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageCursor {
    pub page_size: u32,
    pub current_page: u32,
    pub entities_seen: usize,
    pub total: Option<u64>,
    limit: usize,
}

impl PageCursor {
    pub fn new(page_size: u32, limit: usize) -> Self {
        Self {
            page_size,
            current_page: 1,
            entities_seen: 0,
            total: None,
            limit,
        }
    }

    /// Account for a page of `page_len` entities and decide whether to go on.
    ///
    /// Done when the limit is reached, when the reported total is reached,
    /// or when a page comes back empty.
    pub fn record(&mut self, page_len: usize, reported_total: Option<u64>) -> PageStep {
        if reported_total.is_some() {
            self.total = reported_total;
        }
        if page_len == 0 {
            if let Some(total) = self.total {
                if (self.entities_seen as u64) < total {
                    warn!(
                        seen = self.entities_seen,
                        total,
                        page = self.current_page,
                        "empty page before the reported entity count was reached"
                    );
                }
            }
            return PageStep::Done;
        }
        self.entities_seen += page_len;
        if self.limit > 0 && self.entities_seen >= self.limit {
            return PageStep::Done;
        }
        if self.total.is_some_and(|total| self.entities_seen as u64 >= total) {
            return PageStep::Done;
        }
        self.current_page += 1;
        PageStep::Continue
    }
}

/// Run `fetch` page by page until the cursor says stop, then apply the limit.
pub fn paginate<F>(mut request: ReadRequest, limit: usize, mut fetch: F) -> Result<Vec<Entity>>
where
    F: FnMut(&ReadRequest) -> Result<ReadPage>,
{
    let mut cursor = PageCursor::new(request.paging.entities_per_page, limit);
    let mut records = Vec::new();
    loop {
        request.paging.current_page = cursor.current_page;
        let page = fetch(&request)?;
        let page_len = page.entities.len();
        records.extend(page.entities);
        let step = cursor.record(page_len, page.paging_info.entity_count);
        debug!(
            entity_type = %request.entity_type,
            page = request.paging.current_page,
            page_len,
            seen = records.len(),
            "read page"
        );
        if step == PageStep::Done {
            break;
        }
    }
    if limit > 0 {
        records.truncate(limit);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::Condition;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use serde_json::json;

    fn entity(id: usize) -> Entity {
        let mut e = Entity::new();
        e.insert("type".into(), json!("Asset"));
        e.insert("id".into(), json!(id));
        e
    }

    /// Serve `total` entities in pages of the requested size.
    fn serve(total: usize) -> impl FnMut(&ReadRequest) -> Result<ReadPage> {
        move |req| {
            let size = req.paging.entities_per_page as usize;
            let start = (req.paging.current_page as usize - 1) * size;
            let end = (start + size).min(total);
            Ok(ReadPage {
                entities: (start.min(total)..end).map(|i| entity(i + 1)).collect(),
                paging_info: PagingInfo {
                    entity_count: Some(total as u64),
                },
            })
        }
    }

    fn request(page_size: u32) -> ReadRequest {
        let options = FindOptions::new();
        build_read_request("Asset", &Filters::none(), &options, page_size).unwrap()
    }

    #[test]
    fn read_request_wire_shape() {
        let filters = Filters::Structured(FilterGroup::all(vec![Condition::is("code", "A1")]));
        let options = FindOptions::new()
            .fields(["id", "code"])
            .order(vec![Sort::asc("code"), Sort::desc("id")]);
        let req = build_read_request("Asset", &filters, &options, 500).unwrap();
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            json!({
                "type": "Asset",
                "return_fields": ["id", "code"],
                "filters": {
                    "logical_operator": "and",
                    "conditions": [{"path": "code", "relation": "is", "values": ["A1"]}]
                },
                "return_only": "active",
                "paging": {"entities_per_page": 500, "current_page": 1},
                "sorts": [
                    {"field_name": "code", "direction": "asc"},
                    {"field_name": "id", "direction": "desc"}
                ]
            })
        );
    }

    #[test]
    fn defaults_to_id_field_and_omits_sorts() {
        let req = build_read_request("Asset", &Filters::none(), &FindOptions::new(), 500).unwrap();
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["return_fields"], json!(["id"]));
        assert!(v.get("sorts").is_none());
    }

    #[test]
    fn small_limit_shrinks_page_size() {
        let req = build_read_request("Asset", &Filters::none(), &FindOptions::new().limit(3), 500).unwrap();
        assert_eq!(req.paging.entities_per_page, 3);

        let req = build_read_request("Asset", &Filters::none(), &FindOptions::new().limit(900), 500).unwrap();
        assert_eq!(req.paging.entities_per_page, 500);
    }

    #[test]
    fn retired_only_selects_retired() {
        let req = build_read_request("Asset", &Filters::none(), &FindOptions::new().retired_only(true), 500).unwrap();
        assert_eq!(req.return_only, ReturnOnly::Retired);
    }

    #[test]
    fn column_sort_translates_to_field_name() {
        let sort = Sort::from_json(&json!({"column": "name"})).unwrap();
        assert_eq!(
            serde_json::to_value(&sort).unwrap(),
            json!({"field_name": "name", "direction": "asc"})
        );
    }

    #[test]
    fn sort_without_field_is_rejected() {
        assert!(Sort::from_json(&json!({"direction": "desc"})).is_err());
        assert!(Sort::from_json(&json!({"field_name": "id", "direction": "up"})).is_err());
    }

    #[test]
    fn seven_entities_in_pages_of_five_takes_two_requests() {
        let mut calls = Vec::new();
        let mut inner = serve(7);
        let records = paginate(request(5), 0, |req| {
            calls.push(req.paging.current_page);
            inner(req)
        })
        .unwrap();
        assert_eq!(calls, vec![1, 2]);
        assert_eq!(records.len(), 7);
    }

    #[test]
    fn limit_truncates_exactly() {
        let records = paginate(request(5), 6, serve(20)).unwrap();
        let ids: Vec<u64> = records.iter().map(|e| e["id"].as_u64().unwrap()).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn empty_page_stops_even_when_total_disagrees() {
        let mut calls = 0;
        let records = paginate(request(5), 0, |req| {
            calls += 1;
            let entities = if req.paging.current_page == 1 {
                (1..=5).map(entity).collect()
            } else {
                Vec::new()
            };
            Ok(ReadPage {
                entities,
                paging_info: PagingInfo { entity_count: Some(12) },
            })
        })
        .unwrap();
        assert_eq!(calls, 2);
        assert_eq!(records.len(), 5);
    }

    #[test]
    fn fetch_errors_propagate() {
        let err = paginate(request(5), 0, |_| Err(ApiError::Protocol("boom".into()))).unwrap_err();
        assert!(matches!(err, ApiError::Protocol(_)));
    }

    #[test]
    fn cursor_advances_one_page_at_a_time() {
        let mut cursor = PageCursor::new(2, 0);
        assert_eq!(cursor.record(2, Some(5)), PageStep::Continue);
        assert_eq!(cursor.current_page, 2);
        assert_eq!(cursor.record(2, Some(5)), PageStep::Continue);
        assert_eq!(cursor.current_page, 3);
        assert_eq!(cursor.record(1, Some(5)), PageStep::Done);
        assert_eq!(cursor.entities_seen, 5);
    }

    proptest! {
        #[test]
        fn find_returns_min_of_limit_and_total(total in 0usize..60, page_size in 1u32..12, limit in 0usize..70) {
            let options = FindOptions::new().limit(limit);
            let req = build_read_request("Asset", &Filters::none(), &options, page_size).unwrap();
            let records = paginate(req, limit, serve(total)).unwrap();
            let expected = if limit > 0 { limit.min(total) } else { total };
            prop_assert_eq!(records.len(), expected);
            let ids: Vec<u64> = records.iter().map(|e| e["id"].as_u64().unwrap()).collect();
            let in_order: Vec<u64> = (1..=expected as u64).collect();
            prop_assert_eq!(ids, in_order);
        }
    }
}
