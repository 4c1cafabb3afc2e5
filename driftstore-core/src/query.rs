//! Query, filter, sort, and cursor-pagination types.
//!
//! A [`Query`] bundles filters, sort keys, a limit/offset, and an optional
//! cursor anchor. Two queries are equal iff all fields compare equal; a
//! [`QueryFingerprint`] is a stable hash over the normalized form used to key
//! the reactive subscription registry's per-query streams.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use smol_str::SmolStr;

use crate::accessor::FieldValue;

/// Comparison operator for a [`Filter`].
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum Operator {
    /// `field == operand`
    Eq,
    /// `field != operand`
    Ne,
    /// `field < operand`
    Lt,
    /// `field <= operand`
    Le,
    /// `field > operand`
    Gt,
    /// `field >= operand`
    Ge,
    /// `field` is one of a set of operands.
    In,
    /// `field` is none of a set of operands.
    NotIn,
    /// `field` is absent/null.
    IsNull,
    /// `field` is present/non-null.
    IsNotNull,
    /// string `field` starts with operand.
    StartsWith,
    /// string `field` contains operand.
    Contains,
}

/// A single `(field, operator, operand)` filter predicate.
///
/// `IsNull`/`IsNotNull` ignore `operand`; `In`/`NotIn` use `operands` instead
/// of `operand`.
#[derive(Debug, Clone)]
pub struct Filter {
    /// Field name, evaluated through a [`crate::accessor::FieldAccessor`].
    pub field: SmolStr,
    /// The comparison operator.
    pub operator: Operator,
    /// The single comparison value, for scalar operators.
    pub operand: Option<FieldValue>,
    /// The comparison set, for `In`/`NotIn`.
    pub operands: Vec<FieldValue>,
}

impl Filter {
    /// Builds a scalar filter (`Eq`, `Ne`, `Lt`, `Le`, `Gt`, `Ge`,
    /// `StartsWith`, `Contains`).
    pub fn new(field: impl Into<SmolStr>, operator: Operator, operand: FieldValue) -> Self {
        Self {
            field: field.into(),
            operator,
            operand: Some(operand),
            operands: Vec::new(),
        }
    }

    /// Builds an `In`/`NotIn` filter over a set of operands.
    pub fn in_set(field: impl Into<SmolStr>, operator: Operator, operands: Vec<FieldValue>) -> Self {
        debug_assert!(matches!(operator, Operator::In | Operator::NotIn));
        Self {
            field: field.into(),
            operator,
            operand: None,
            operands,
        }
    }

    /// Builds an `IsNull`/`IsNotNull` filter.
    pub fn null_check(field: impl Into<SmolStr>, operator: Operator) -> Self {
        debug_assert!(matches!(operator, Operator::IsNull | Operator::IsNotNull));
        Self {
            field: field.into(),
            operator,
            operand: None,
            operands: Vec::new(),
        }
    }

    /// Evaluates this filter against an entity via its field accessor.
    pub fn evaluate<T>(&self, item: &T, accessor: &dyn crate::accessor::FieldAccessor<T>) -> bool {
        let Some(value) = accessor.get(item, self.field.as_str()) else {
            return matches!(self.operator, Operator::IsNull);
        };
        match self.operator {
            Operator::In | Operator::NotIn => value.matches_in(self.operator, &self.operands),
            _ => value.matches(self.operator, self.operand.as_ref()),
        }
    }

    fn fingerprint_into(&self, s: &mut String) {
        s.push_str(self.field.as_str());
        s.push(':');
        s.push_str(operator_tag(self.operator));
        s.push(':');
        if let Some(operand) = &self.operand {
            fieldvalue_into(operand, s);
        }
        for o in &self.operands {
            fieldvalue_into(o, s);
            s.push(',');
        }
        s.push(';');
    }
}

fn operator_tag(op: Operator) -> &'static str {
    match op {
        Operator::Eq => "eq",
        Operator::Ne => "ne",
        Operator::Lt => "lt",
        Operator::Le => "le",
        Operator::Gt => "gt",
        Operator::Ge => "ge",
        Operator::In => "in",
        Operator::NotIn => "notin",
        Operator::IsNull => "isnull",
        Operator::IsNotNull => "isnotnull",
        Operator::StartsWith => "startswith",
        Operator::Contains => "contains",
    }
}

fn fieldvalue_into(value: &FieldValue, s: &mut String) {
    use std::fmt::Write;
    match value {
        FieldValue::Bool(b) => {
            let _ = write!(s, "b{b}");
        }
        FieldValue::Int(i) => {
            let _ = write!(s, "i{i}");
        }
        FieldValue::Float(f) => {
            let _ = write!(s, "f{f}");
        }
        FieldValue::Str(v) => {
            let _ = write!(s, "s{v}");
        }
        FieldValue::Null => s.push('n'),
    }
}

/// A single `(field, ascending)` sort key.
#[derive(Debug, Clone)]
pub struct SortKey {
    /// Field name, evaluated through a [`crate::accessor::FieldAccessor`].
    pub field: SmolStr,
    /// Ascending if true, descending if false.
    pub ascending: bool,
}

impl SortKey {
    /// Builds an ascending sort key.
    pub fn asc(field: impl Into<SmolStr>) -> Self {
        Self {
            field: field.into(),
            ascending: true,
        }
    }

    /// Builds a descending sort key.
    pub fn desc(field: impl Into<SmolStr>) -> Self {
        Self {
            field: field.into(),
            ascending: false,
        }
    }
}

/// An opaque position marker in an ordered query result.
///
/// Cursor stability is only guaranteed across a single query sort
/// specification; changing the sort invalidates prior cursors.
#[derive(Debug, Clone, PartialEq)]
pub enum Cursor {
    /// Simple integer offset, for backends with no natural key-set.
    Index(u64),
    /// One comparable value per sort key, for backends that can seek by key.
    KeySet(Vec<FieldValue>),
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cursor::Index(i) => write!(f, "idx:{i}"),
            Cursor::KeySet(values) => {
                write!(f, "ks:")?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    let mut buf = String::new();
                    fieldvalue_into(v, &mut buf);
                    write!(f, "{buf}")?;
                }
                Ok(())
            }
        }
    }
}

/// Direction of a page request relative to the result set.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum PageDirection {
    Forward,
    Backward,
}

/// An immutable query bundling filters, sort order, a limit/offset, and an
/// optional cursor anchor.
#[derive(Clone)]
pub struct Query {
    inner: Arc<QueryInner>,
}

struct QueryInner {
    filters: Vec<Filter>,
    sort: Vec<SortKey>,
    limit: Option<usize>,
    offset: usize,
    cursor: Option<Cursor>,
    direction: PageDirection,
}

impl Default for Query {
    fn default() -> Self {
        Self::new()
    }
}

impl Query {
    /// An unfiltered, unsorted query with no pagination.
    pub fn new() -> Self {
        Query {
            inner: Arc::new(QueryInner {
                filters: Vec::new(),
                sort: Vec::new(),
                limit: None,
                offset: 0,
                cursor: None,
                direction: PageDirection::Forward,
            }),
        }
    }

    fn with_inner(&self, f: impl FnOnce(&mut QueryInner)) -> Query {
        let mut inner = QueryInner {
            filters: self.inner.filters.clone(),
            sort: self.inner.sort.clone(),
            limit: self.inner.limit,
            offset: self.inner.offset,
            cursor: self.inner.cursor.clone(),
            direction: self.inner.direction,
        };
        f(&mut inner);
        Query {
            inner: Arc::new(inner),
        }
    }

    /// Appends a filter predicate.
    pub fn filter(&self, filter: Filter) -> Query {
        self.with_inner(|inner| inner.filters.push(filter))
    }

    /// Appends a sort key (given order is preserved).
    pub fn sort_by(&self, key: SortKey) -> Query {
        self.with_inner(|inner| inner.sort.push(key))
    }

    /// Sets an absolute offset.
    pub fn offset(&self, offset: usize) -> Query {
        self.with_inner(|inner| inner.offset = offset)
    }

    /// Forward pagination: take the first `n` items after `cursor` (or from
    /// the start, if no cursor was set with [`Query::after`]).
    pub fn first(&self, n: usize) -> Query {
        self.with_inner(|inner| {
            inner.limit = Some(n);
            inner.direction = PageDirection::Forward;
        })
    }

    /// Sets the forward cursor anchor.
    pub fn after(&self, cursor: Cursor) -> Query {
        self.with_inner(|inner| {
            inner.cursor = Some(cursor);
            inner.direction = PageDirection::Forward;
        })
    }

    /// Backward pagination: take the last `n` items before `cursor`.
    pub fn last(&self, n: usize) -> Query {
        self.with_inner(|inner| {
            inner.limit = Some(n);
            inner.direction = PageDirection::Backward;
        })
    }

    /// Sets the backward cursor anchor.
    pub fn before(&self, cursor: Cursor) -> Query {
        self.with_inner(|inner| {
            inner.cursor = Some(cursor);
            inner.direction = PageDirection::Backward;
        })
    }

    /// The filter predicates, in the order they were added.
    pub fn filters(&self) -> &[Filter] {
        &self.inner.filters
    }

    /// The sort keys, in the order they were added.
    pub fn sort_keys(&self) -> &[SortKey] {
        &self.inner.sort
    }

    /// The requested page size, if any.
    pub fn limit(&self) -> Option<usize> {
        self.inner.limit
    }

    /// The absolute offset.
    pub fn offset_value(&self) -> usize {
        self.inner.offset
    }

    /// The cursor anchor, if any.
    pub fn cursor(&self) -> Option<&Cursor> {
        self.inner.cursor.as_ref()
    }

    /// True if this query paginates backward (`last`/`before`).
    pub fn is_backward(&self) -> bool {
        self.inner.direction == PageDirection::Backward
    }

    /// Evaluates every filter against `item` (conjunction/AND semantics).
    pub fn matches<T>(&self, item: &T, accessor: &dyn crate::accessor::FieldAccessor<T>) -> bool {
        self.inner
            .filters
            .iter()
            .all(|f| f.evaluate(item, accessor))
    }

    /// A stable hash over the normalized query form (filters and sort keys
    /// compared by content, not allocation identity).
    pub fn fingerprint(&self) -> QueryFingerprint {
        let mut canon = String::new();
        // Filters compare by content (field, then operator, then operand),
        // not construction order, so two queries built with the same
        // predicates added in different order collapse to one fingerprint.
        let mut filter_fragments: Vec<String> = self
            .inner
            .filters
            .iter()
            .map(|filter| {
                let mut fragment = String::new();
                filter.fingerprint_into(&mut fragment);
                fragment
            })
            .collect();
        filter_fragments.sort_unstable();
        for fragment in &filter_fragments {
            canon.push_str(fragment);
        }
        canon.push('|');
        for key in &self.inner.sort {
            canon.push_str(key.field.as_str());
            canon.push(if key.ascending { '+' } else { '-' });
        }
        canon.push('|');
        if let Some(limit) = self.inner.limit {
            canon.push_str(&limit.to_string());
        }
        canon.push(',');
        canon.push_str(&self.inner.offset.to_string());
        canon.push(',');
        if let Some(cursor) = &self.inner.cursor {
            canon.push_str(&cursor.to_string());
        }
        canon.push(if self.inner.direction == PageDirection::Backward {
            'b'
        } else {
            'f'
        });

        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        canon.hash(&mut hasher);
        QueryFingerprint(hasher.finish())
    }
}

/// A stable hash over a [`Query`]'s normalized form, used as the reactive
/// subscription layer's per-query registry key.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct QueryFingerprint(u64);

impl fmt::Display for QueryFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// `(has_next_page, has_previous_page, start_cursor, end_cursor, total_count)`
/// describing the position of a [`PagedResult`] within the full result set.
#[derive(Debug, Clone, Default)]
pub struct PageInfo {
    /// True if a `first`/`after` page request would return more items.
    pub has_next_page: bool,
    /// True if a `last`/`before` page request would return more items.
    pub has_previous_page: bool,
    /// Cursor of the first item in this page.
    pub start_cursor: Option<Cursor>,
    /// Cursor of the last item in this page.
    pub end_cursor: Option<Cursor>,
    /// Total count of items across all pages, if cheaply knowable.
    pub total_count: Option<u64>,
}

/// A page of items plus its position metadata.
#[derive(Debug, Clone)]
pub struct PagedResult<T> {
    /// The items in this page.
    pub items: Vec<T>,
    /// Pagination metadata for this page.
    pub page_info: PageInfo,
}

impl<T> PagedResult<T> {
    /// Wraps a full, unpaginated item list with an empty `PageInfo`
    /// (`has_next_page = false`), the default for backends without
    /// pagination support.
    pub fn unpaged(items: Vec<T>) -> Self {
        let total_count = Some(items.len() as u64);
        PagedResult {
            items,
            page_info: PageInfo {
                has_next_page: false,
                has_previous_page: false,
                start_cursor: None,
                end_cursor: None,
                total_count,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_queries_fingerprint_equal() {
        let a = Query::new()
            .filter(Filter::new("name", Operator::Eq, FieldValue::Str("bob".into())))
            .sort_by(SortKey::asc("id"));
        let b = Query::new()
            .filter(Filter::new("name", Operator::Eq, FieldValue::Str("bob".into())))
            .sort_by(SortKey::asc("id"));
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn filters_in_different_insertion_order_fingerprint_equal() {
        let a = Query::new()
            .filter(Filter::new("age", Operator::Ge, FieldValue::Int(30)))
            .filter(Filter::new("name", Operator::Eq, FieldValue::Str("bob".into())));
        let b = Query::new()
            .filter(Filter::new("name", Operator::Eq, FieldValue::Str("bob".into())))
            .filter(Filter::new("age", Operator::Ge, FieldValue::Int(30)));
        assert_eq!(
            a.fingerprint(),
            b.fingerprint(),
            "logically identical filter sets must fingerprint the same regardless of construction order"
        );
    }

    #[test]
    fn different_filters_fingerprint_differently() {
        let a = Query::new().filter(Filter::new("name", Operator::Eq, FieldValue::Str("bob".into())));
        let b = Query::new().filter(Filter::new("name", Operator::Eq, FieldValue::Str("alice".into())));
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn unpaged_has_no_next_page() {
        let page = PagedResult::unpaged(vec![1, 2, 3]);
        assert!(!page.page_info.has_next_page);
        assert_eq!(page.page_info.total_count, Some(3));
    }
}
