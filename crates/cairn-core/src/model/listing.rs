//! Listing arguments, cursors, and pages shared by every store adapter.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{StoreError, StoreResult};

const CURSOR_PREFIX: &str = "offset:";

/// Sort direction applied to `order_by`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderMode {
    /// Ascending order.
    #[default]
    Asc,
    /// Descending order.
    Desc,
}

impl OrderMode {
    /// Render as the lowercase keyword used by stores.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }
}

/// Attribute equality filter; a record matches when its value equals any listed value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    /// Attribute name.
    pub key: String,
    /// Accepted values, compared against the attribute's text form.
    pub values: Vec<String>,
}

impl Filter {
    /// Build a filter accepting the provided values.
    #[must_use]
    pub fn new<I, S>(key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            key: key.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether the attribute value satisfies the filter.
    #[must_use]
    pub fn matches(&self, value: Option<&Value>) -> bool {
        value
            .and_then(attribute_text)
            .is_some_and(|text| self.values.iter().any(|candidate| *candidate == text))
    }
}

/// Free-form listing options: pagination, ordering, search, and filters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListArgs {
    /// Maximum number of items in the page.
    pub first: Option<usize>,
    /// Cursor returned as `end_cursor` by the previous page.
    pub after: Option<Cursor>,
    /// Attribute to sort by; insertion order when absent.
    pub order_by: Option<String>,
    /// Sort direction for `order_by`.
    #[serde(default)]
    pub order_mode: OrderMode,
    /// Case-insensitive substring matched against indexed attributes.
    pub search: Option<String>,
    /// Filters combined with AND.
    #[serde(default)]
    pub filters: Vec<Filter>,
}

impl ListArgs {
    /// Limit the page size.
    #[must_use]
    pub const fn with_first(mut self, first: usize) -> Self {
        self.first = Some(first);
        self
    }

    /// Continue after the given cursor.
    #[must_use]
    pub fn with_after(mut self, cursor: Cursor) -> Self {
        self.after = Some(cursor);
        self
    }

    /// Sort by an attribute.
    #[must_use]
    pub fn with_order(mut self, field: impl Into<String>, mode: OrderMode) -> Self {
        self.order_by = Some(field.into());
        self.order_mode = mode;
        self
    }

    /// Restrict to records whose indexed attributes contain `term`.
    #[must_use]
    pub fn with_search(mut self, term: impl Into<String>) -> Self {
        self.search = Some(term.into());
        self
    }

    /// Add an attribute filter.
    #[must_use]
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Offset encoded in `after`, or zero.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidCursor`] when the cursor cannot be decoded.
    pub fn offset(&self) -> StoreResult<usize> {
        self.after.as_ref().map_or(Ok(0), Cursor::offset)
    }
}

/// Opaque pagination cursor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(String);

impl Cursor {
    /// Cursor pointing at the given absolute offset.
    #[must_use]
    pub fn from_offset(offset: usize) -> Self {
        Self(URL_SAFE_NO_PAD.encode(format!("{CURSOR_PREFIX}{offset}")))
    }

    /// Wrap a cursor string received from a caller.
    #[must_use]
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Borrow the encoded form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Decode the absolute offset.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidCursor`] for cursors this crate did not produce.
    pub fn offset(&self) -> StoreResult<usize> {
        let invalid = || StoreError::InvalidCursor {
            cursor: self.0.clone(),
        };
        let bytes = URL_SAFE_NO_PAD.decode(&self.0).map_err(|_| invalid())?;
        let text = String::from_utf8(bytes).map_err(|_| invalid())?;
        text.strip_prefix(CURSOR_PREFIX)
            .and_then(|digits| digits.parse().ok())
            .ok_or_else(invalid)
    }
}

/// Pagination metadata returned alongside a page of items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageInfo {
    /// Cursor to pass as `after` to fetch the next page.
    pub end_cursor: Option<Cursor>,
    /// Whether more items follow this page.
    pub has_next_page: bool,
    /// Total number of matching items across all pages.
    pub global_count: u64,
}

/// A single page of listing results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    /// Items in the page, in listing order.
    pub items: Vec<T>,
    /// Pagination metadata.
    pub page_info: PageInfo,
}

impl<T> Page<T> {
    /// Assemble a page from a window starting at `offset` within `global_count` matches.
    #[must_use]
    pub fn from_window(items: Vec<T>, offset: usize, global_count: u64) -> Self {
        let end = offset + items.len();
        let has_next_page = u64::try_from(end).is_ok_and(|end| end < global_count);
        let end_cursor = (!items.is_empty()).then(|| Cursor::from_offset(end));
        Self {
            items,
            page_info: PageInfo {
                end_cursor,
                has_next_page,
                global_count,
            },
        }
    }

    /// Convert every item, keeping the pagination metadata.
    ///
    /// # Errors
    ///
    /// Returns the first conversion error.
    pub fn try_map<U, E, F>(self, convert: F) -> Result<Page<U>, E>
    where
        F: FnMut(T) -> Result<U, E>,
    {
        let items = self
            .items
            .into_iter()
            .map(convert)
            .collect::<Result<Vec<_>, E>>()?;
        Ok(Page {
            items,
            page_info: self.page_info,
        })
    }
}

/// Text form of a scalar attribute, as used by filters, search, and sorting.
#[must_use]
pub fn attribute_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn cursor_encodes_offsets() {
        let cursor = Cursor::from_offset(25);
        assert_eq!(cursor.offset().ok(), Some(25));
        assert!(matches!(
            Cursor::from_raw("not-a-cursor").offset(),
            Err(StoreError::InvalidCursor { .. })
        ));
        assert_eq!(ListArgs::default().offset().ok(), Some(0));
    }

    #[test]
    fn page_window_reports_next_page() {
        let page = Page::from_window(vec![1, 2], 0, 3);
        assert!(page.page_info.has_next_page);
        let next = page.page_info.end_cursor.clone().map(|cursor| cursor.offset().ok());
        assert_eq!(next, Some(Some(2)));

        let last = Page::from_window(vec![3], 2, 3);
        assert!(!last.page_info.has_next_page);

        let empty: Page<i32> = Page::from_window(Vec::new(), 3, 3);
        assert!(empty.page_info.end_cursor.is_none());
    }

    #[test]
    fn filter_matches_scalar_text() {
        let filter = Filter::new("x_order", ["1", "2"]);
        assert!(filter.matches(Some(&json!(2))));
        assert!(!filter.matches(Some(&json!(3))));
        assert!(!filter.matches(None));
        assert!(!filter.matches(Some(&json!(["1"]))));
    }
}
