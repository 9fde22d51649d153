//! Read and count request composition.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::{ConsoleError, Result};
use crate::resources::{resolve, ActiveView, ResourceKind};
use crate::search::sanitize;

/// Column used when no sort has been picked.
pub const DEFAULT_SORT_KEY: &str = "created_at";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn is_ascending(&self) -> bool {
        matches!(self, SortDirection::Asc)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    }
}

/// Rows per page. Only the sizes offered by the table footer are valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct PageSize(u32);

impl PageSize {
    pub const ALLOWED: [u32; 5] = [5, 10, 20, 50, 100];

    pub fn get(&self) -> u32 {
        self.0
    }
}

impl Default for PageSize {
    fn default() -> Self {
        PageSize(10)
    }
}

impl TryFrom<u32> for PageSize {
    type Error = ConsoleError;

    fn try_from(value: u32) -> Result<Self> {
        if Self::ALLOWED.contains(&value) {
            Ok(PageSize(value))
        } else {
            Err(ConsoleError::validation(format!(
                "page size must be one of 5, 10, 20, 50, 100 (got {})",
                value
            )))
        }
    }
}

impl From<PageSize> for u32 {
    fn from(size: PageSize) -> Self {
        size.0
    }
}

/// Sort column plus direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub key: String,
    pub direction: SortDirection,
}

impl SortSpec {
    pub fn new(key: &str, direction: SortDirection) -> Result<Self> {
        let key = key.trim();
        let is_identifier =
            !key.is_empty() && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !is_identifier {
            return Err(ConsoleError::validation(format!(
                "invalid sort key '{}'",
                key
            )));
        }
        Ok(Self {
            key: key.to_string(),
            direction,
        })
    }

    /// Header-click semantics: the current key while ascending flips to
    /// descending; anything else sorts ascending by `key`.
    pub fn toggled(&self, key: &str) -> Result<Self> {
        let direction = if self.key == key && self.direction == SortDirection::Asc {
            SortDirection::Desc
        } else {
            SortDirection::Asc
        };
        SortSpec::new(key, direction)
    }
}

impl Default for SortSpec {
    fn default() -> Self {
        Self {
            key: DEFAULT_SORT_KEY.to_string(),
            direction: SortDirection::Desc,
        }
    }
}

/// Everything that determines which rows are displayed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    pub view: ActiveView,
    /// Raw search text as typed; sanitized when the request is built.
    pub search_term: String,
    pub sort: SortSpec,
    pub page: u32,
    pub page_size: PageSize,
}

impl Query {
    pub fn new(view: ActiveView) -> Self {
        Self {
            view,
            search_term: String::new(),
            sort: SortSpec::default(),
            page: 1,
            page_size: PageSize::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.page == 0 {
            return Err(ConsoleError::validation("page must be at least 1"));
        }
        Ok(())
    }

    /// Zero-based inclusive row window for the current page.
    pub fn range(&self) -> RangeExpr {
        let size = u64::from(self.page_size.get());
        let from = u64::from(self.page.max(1) - 1) * size;
        RangeExpr {
            from,
            to: from + size - 1,
        }
    }
}

/// Row filter understood by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterExpr {
    /// Case-insensitive substring match on any of the fields.
    AnyILike {
        fields: Vec<&'static str>,
        term: String,
    },
    /// Exact match on one column.
    Eq { field: &'static str, value: String },
}

impl fmt::Display for FilterExpr {
    /// PostgREST logical-tree syntax, e.g. `name.ilike.%x%,city.ilike.%x%`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterExpr::AnyILike { fields, term } => {
                let clauses: Vec<String> = fields
                    .iter()
                    .map(|field| format!("{}.ilike.%{}%", field, term))
                    .collect();
                f.write_str(&clauses.join(","))
            }
            FilterExpr::Eq { field, value } => write!(f, "{}.eq.{}", field, value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderExpr {
    pub key: String,
    pub ascending: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeExpr {
    pub from: u64,
    pub to: u64,
}

/// Fully specified page read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadRequest {
    pub collection: &'static str,
    pub filter: Option<FilterExpr>,
    pub order: Option<OrderExpr>,
    pub range: Option<RangeExpr>,
}

impl ReadRequest {
    /// Single-row lookup by primary key.
    pub fn by_id(collection: &'static str, id: &str) -> Self {
        Self {
            collection,
            filter: Some(FilterExpr::Eq {
                field: "id",
                value: id.to_string(),
            }),
            order: None,
            range: None,
        }
    }
}

/// Exact count of the rows matching a filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountRequest {
    pub collection: &'static str,
    pub filter: Option<FilterExpr>,
}

/// Outcome of planning a read for the active view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadPlan {
    /// The view has no backing collection; nothing is fetched.
    Skip,
    Fetch { read: ReadRequest, count: CountRequest },
}

fn search_filter(kind: ResourceKind, raw_term: &str) -> Result<Option<FilterExpr>> {
    let term = sanitize(raw_term);
    if term.is_empty() {
        return Ok(None);
    }
    let entry = resolve(kind)?;
    Ok(Some(FilterExpr::AnyILike {
        fields: entry.search_fields.to_vec(),
        term,
    }))
}

/// Build the page read for a query. The dashboard yields `None`.
pub fn build_read(query: &Query) -> Result<Option<ReadRequest>> {
    query.validate()?;
    let Some(kind) = query.view.resource() else {
        return Ok(None);
    };
    let entry = resolve(kind)?;
    Ok(Some(ReadRequest {
        collection: entry.collection,
        filter: search_filter(kind, &query.search_term)?,
        order: Some(OrderExpr {
            key: query.sort.key.clone(),
            ascending: query.sort.direction.is_ascending(),
        }),
        range: Some(query.range()),
    }))
}

/// Build the matching count request; ordering and range do not apply.
pub fn build_count(query: &Query) -> Result<Option<CountRequest>> {
    let Some(kind) = query.view.resource() else {
        return Ok(None);
    };
    let entry = resolve(kind)?;
    Ok(Some(CountRequest {
        collection: entry.collection,
        filter: search_filter(kind, &query.search_term)?,
    }))
}

/// Build both requests, or `Skip` for the dashboard.
pub fn plan(query: &Query) -> Result<ReadPlan> {
    match (build_read(query)?, build_count(query)?) {
        (Some(read), Some(count)) => Ok(ReadPlan::Fetch { read, count }),
        _ => Ok(ReadPlan::Skip),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parking_query() -> Query {
        Query::new(ActiveView::Resource(ResourceKind::ParkingSpot))
    }

    #[test]
    fn defaults_sort_by_created_at_desc() {
        let read = build_read(&parking_query()).unwrap().unwrap();
        assert_eq!(read.collection, "parkingSpots");
        assert_eq!(read.filter, None);
        assert_eq!(
            read.order,
            Some(OrderExpr {
                key: "created_at".to_string(),
                ascending: false
            })
        );
        assert_eq!(read.range, Some(RangeExpr { from: 0, to: 9 }));
    }

    #[test]
    fn range_follows_page_window() {
        let mut query = parking_query();
        query.page = 3;
        query.page_size = PageSize::try_from(20).unwrap();
        assert_eq!(query.range(), RangeExpr { from: 40, to: 59 });
    }

    #[test]
    fn search_ors_registry_fields() {
        let mut query = Query::new(ActiveView::Resource(ResourceKind::User));
        query.search_term = "kovacs".to_string();
        let read = build_read(&query).unwrap().unwrap();
        let filter = read.filter.unwrap();
        assert_eq!(
            filter.to_string(),
            "username.ilike.%kovacs%,full_name.ilike.%kovacs%,email.ilike.%kovacs%"
        );
    }

    #[test]
    fn search_term_is_sanitized() {
        let mut query = parking_query();
        query.search_term = "100%_off".to_string();
        let count = build_count(&query).unwrap().unwrap();
        assert_eq!(
            count.filter.unwrap().to_string(),
            "name.ilike.%100\\%\\_off%,city.ilike.%100\\%\\_off%"
        );
    }

    #[test]
    fn blank_search_means_no_filter() {
        let mut query = parking_query();
        query.search_term = " ,() ".to_string();
        assert_eq!(build_count(&query).unwrap().unwrap().filter, None);
    }

    #[test]
    fn dashboard_is_skipped() {
        let query = Query::new(ActiveView::Dashboard);
        assert_eq!(build_read(&query).unwrap(), None);
        assert_eq!(build_count(&query).unwrap(), None);
        assert_eq!(plan(&query).unwrap(), ReadPlan::Skip);
    }

    #[test]
    fn page_zero_is_rejected() {
        let mut query = parking_query();
        query.page = 0;
        assert!(matches!(
            build_read(&query),
            Err(ConsoleError::Validation(_))
        ));
    }

    #[test]
    fn page_size_is_restricted() {
        assert!(PageSize::try_from(25).is_err());
        for size in PageSize::ALLOWED {
            assert_eq!(PageSize::try_from(size).unwrap().get(), size);
        }
        assert!(serde_json::from_str::<PageSize>("7").is_err());
    }

    #[test]
    fn sort_toggle_semantics() {
        let sort = SortSpec::new("name", SortDirection::Asc).unwrap();
        assert_eq!(sort.toggled("name").unwrap().direction, SortDirection::Desc);
        let desc = SortSpec::new("name", SortDirection::Desc).unwrap();
        assert_eq!(desc.toggled("name").unwrap().direction, SortDirection::Asc);
        assert_eq!(sort.toggled("city").unwrap().direction, SortDirection::Asc);
        assert!(SortSpec::new("name;drop", SortDirection::Asc).is_err());
        assert!(SortSpec::new("", SortDirection::Asc).is_err());
    }

    #[test]
    fn by_id_filter() {
        let read = ReadRequest::by_id("parking_image_submissions", "abc");
        assert_eq!(read.filter.unwrap().to_string(), "id.eq.abc");
    }
}
