use serde_json::Value;

use crate::error::DataError;

/// The value side of one `where` entry.
///
/// Equality, membership and null-ness are the only predicates the
/// declarative model expresses; anything richer goes through `raw`.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// `field = value`
    Eq(Value),
    /// `field IN (values...)`
    In(Vec<Value>),
    /// `field IS NULL`
    Null,
}

impl FieldValue {
    /// Map a dynamic JSON value: `null` means IS NULL, an array means IN,
    /// anything else means equality.
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Null => FieldValue::Null,
            Value::Array(items) => FieldValue::In(items),
            other => FieldValue::Eq(other),
        }
    }
}

/// An ordered set of `field -> FieldValue` entries, ANDed together.
///
/// Iteration follows insertion order, so the predicates produced from a
/// filter are deterministic. Setting a field twice replaces the first value
/// in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    entries: Vec<(String, FieldValue)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a filter from a JSON object, applying [`FieldValue::from_json`]
    /// to each value. Non-object values yield a validation error.
    pub fn from_json(value: Value) -> Result<Self, DataError> {
        match value {
            Value::Object(map) => {
                let mut filter = Filter::new();
                for (field, v) in map {
                    filter.set(&field, FieldValue::from_json(v));
                }
                Ok(filter)
            }
            other => Err(DataError::validation(format!(
                "filter must be a JSON object, got {other}"
            ))),
        }
    }

    pub fn set(&mut self, field: &str, value: FieldValue) {
        match self.entries.iter_mut().find(|(f, _)| f == field) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((field.to_string(), value)),
        }
    }

    pub fn where_eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.set(field, FieldValue::Eq(value.into()));
        self
    }

    pub fn where_in<V: Into<Value>>(mut self, field: &str, values: impl IntoIterator<Item = V>) -> Self {
        self.set(field, FieldValue::In(values.into_iter().map(Into::into).collect()));
        self
    }

    pub fn where_null(mut self, field: &str) -> Self {
        self.set(field, FieldValue::Null);
        self
    }

    /// Merge `other` into `self`; entries of `other` win on conflict.
    pub fn merge(mut self, other: &Filter) -> Self {
        for (field, value) in &other.entries {
            self.set(field, value.clone());
        }
        self
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.entries.iter().find(|(f, _)| f == field).map(|(_, v)| v)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.entries.iter().map(|(f, v)| (f.as_str(), v))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub field: String,
    pub direction: SortDirection,
}

/// Declarative description of a read.
///
/// # Example
///
/// ```ignore
/// let options = FindOptions::new()
///     .where_eq("status", "active")
///     .where_in("role", ["admin", "owner"])
///     .order_by("created_at", SortDirection::Desc)
///     .limit(10);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    pub select: Option<Vec<String>>,
    pub filter: Filter,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filter(filter: Filter) -> Self {
        Self {
            filter,
            ..Self::default()
        }
    }

    pub fn select<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.select = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn where_eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.filter.set(field, FieldValue::Eq(value.into()));
        self
    }

    pub fn where_in<V: Into<Value>>(mut self, field: &str, values: impl IntoIterator<Item = V>) -> Self {
        self.filter = self.filter.where_in(field, values);
        self
    }

    pub fn where_null(mut self, field: &str) -> Self {
        self.filter.set(field, FieldValue::Null);
        self
    }

    pub fn order_by(mut self, field: &str, direction: SortDirection) -> Self {
        self.order_by.push(OrderBy {
            field: field.to_string(),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreateOptions {
    /// Columns to return for the created row; `None` returns all columns.
    pub returning: Option<Vec<String>>,
}

/// Options for an update. The filter is mandatory: an empty filter is
/// rejected before any request is sent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateOptions {
    pub filter: Filter,
    pub returning: Option<Vec<String>>,
}

impl UpdateOptions {
    pub fn new(filter: Filter) -> Self {
        Self {
            filter,
            returning: None,
        }
    }

    /// Columns to return for the updated rows.
    pub fn returning<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.returning = Some(columns.into_iter().map(Into::into).collect());
        self
    }
}

/// Options for a delete. The filter is mandatory; `soft` defaults to `true`.
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteOptions {
    pub filter: Filter,
    pub returning: Option<Vec<String>>,
    pub soft: bool,
}

impl DeleteOptions {
    pub fn new(filter: Filter) -> Self {
        Self {
            filter,
            returning: None,
            soft: true,
        }
    }

    pub fn hard(mut self) -> Self {
        self.soft = false;
        self
    }
}

/// Reject a mutation whose filter would match the whole table.
pub fn require_filter(filter: &Filter, operation: &str) -> Result<(), DataError> {
    if filter.is_empty() {
        return Err(DataError::validation(format!(
            "{operation} requires a non-empty filter"
        )));
    }
    Ok(())
}

/// One translated `where` predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Eq(String, Value),
    In(String, Vec<Value>),
    IsNull(String),
}

/// Row window requested from the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    All,
    Limit(u64),
    /// Inclusive `[from, to]` row range.
    Range { from: u64, to: u64 },
}

/// Backend-independent description of a read, built once from
/// [`FindOptions`] and then handed to a provider's translation step.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryDescriptor {
    pub table: String,
    pub columns: String,
    pub predicates: Vec<Predicate>,
    pub order: Vec<(String, SortDirection)>,
    pub window: Window,
}

impl QueryDescriptor {
    /// Build a descriptor.
    ///
    /// Pagination: a lone `limit` is applied as-is; when `offset` is given the
    /// window is the inclusive range `[offset, offset + page - 1]` where
    /// `page` is `limit`, or `default_page_size` when no limit is set.
    pub fn build(
        table: &str,
        options: &FindOptions,
        default_page_size: u64,
    ) -> Result<Self, DataError> {
        check_identifier(table, "table")?;

        let columns = match &options.select {
            Some(cols) if !cols.is_empty() => cols.join(","),
            _ => "*".to_string(),
        };

        let predicates = predicates(&options.filter)?;

        let mut order = Vec::with_capacity(options.order_by.len());
        for o in &options.order_by {
            check_identifier(&o.field, "column")?;
            order.push((o.field.clone(), o.direction));
        }

        let window = match (options.limit, options.offset) {
            (None, None) => Window::All,
            (Some(limit), None) => Window::Limit(limit),
            (limit, Some(offset)) => {
                let size = limit.unwrap_or(default_page_size);
                if size == 0 {
                    return Err(DataError::validation(
                        "page size must be positive when an offset is given",
                    ));
                }
                let to = offset.checked_add(size - 1).ok_or_else(|| {
                    DataError::validation(format!(
                        "row range starting at {offset} with {size} rows is out of bounds"
                    ))
                })?;
                Window::Range { from: offset, to }
            }
        };

        Ok(Self {
            table: table.to_string(),
            columns,
            predicates,
            order,
            window,
        })
    }
}

/// Translate a filter into predicates, in filter iteration order.
pub fn predicates(filter: &Filter) -> Result<Vec<Predicate>, DataError> {
    let mut out = Vec::with_capacity(filter.len());
    for (field, value) in filter.iter() {
        check_identifier(field, "column")?;
        out.push(match value {
            FieldValue::Eq(v) => Predicate::Eq(field.to_string(), v.clone()),
            FieldValue::In(vs) => Predicate::In(field.to_string(), vs.clone()),
            FieldValue::Null => Predicate::IsNull(field.to_string()),
        });
    }
    Ok(out)
}

/// Validate a table or column name (`[A-Za-z_][A-Za-z0-9_]*`, dot-separated).
pub fn check_identifier(ident: &str, kind: &str) -> Result<(), DataError> {
    if is_valid_identifier(ident) {
        Ok(())
    } else {
        Err(DataError::validation(format!("invalid {kind} identifier: {ident}")))
    }
}

fn is_valid_identifier(ident: &str) -> bool {
    !ident.is_empty() && ident.split('.').all(is_valid_segment)
}

fn is_valid_segment(segment: &str) -> bool {
    let mut chars = segment.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_json_three_way_split() {
        assert_eq!(FieldValue::from_json(Value::Null), FieldValue::Null);
        assert_eq!(
            FieldValue::from_json(json!(["a", "b"])),
            FieldValue::In(vec![json!("a"), json!("b")])
        );
        assert_eq!(FieldValue::from_json(json!(3)), FieldValue::Eq(json!(3)));
    }

    #[test]
    fn test_filter_keeps_insertion_order_and_replaces() {
        let filter = Filter::new()
            .where_eq("b", 1)
            .where_null("a")
            .where_eq("b", 2);
        let fields: Vec<_> = filter.iter().map(|(f, _)| f).collect();
        assert_eq!(fields, vec!["b", "a"]);
        assert_eq!(filter.get("b"), Some(&FieldValue::Eq(json!(2))));
    }

    #[test]
    fn test_filter_from_json_rejects_non_object() {
        let err = Filter::from_json(json!([1, 2])).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_merge_overrides() {
        let merged = Filter::new()
            .where_eq("deleted_at", "x")
            .merge(&Filter::new().where_null("deleted_at"));
        assert_eq!(merged.get("deleted_at"), Some(&FieldValue::Null));
    }

    #[test]
    fn test_descriptor_limit_only() {
        let d = QueryDescriptor::build("items", &FindOptions::new().limit(5), 10).unwrap();
        assert_eq!(d.window, Window::Limit(5));
        assert_eq!(d.columns, "*");
    }

    #[test]
    fn test_descriptor_offset_range_is_inclusive() {
        let d = QueryDescriptor::build("items", &FindOptions::new().limit(10).offset(20), 50).unwrap();
        assert_eq!(d.window, Window::Range { from: 20, to: 29 });
    }

    #[test]
    fn test_descriptor_offset_uses_default_page_size() {
        let d = QueryDescriptor::build("items", &FindOptions::new().offset(5), 10).unwrap();
        assert_eq!(d.window, Window::Range { from: 5, to: 14 });
    }

    #[test]
    fn test_descriptor_offset_overflow_rejected() {
        let err = QueryDescriptor::build("items", &FindOptions::new().offset(u64::MAX), 10).unwrap_err();
        assert!(err.is_validation());
        let err = QueryDescriptor::build("items", &FindOptions::new().limit(u64::MAX).offset(2), 10)
            .unwrap_err();
        assert!(err.is_validation());
        let d = QueryDescriptor::build("items", &FindOptions::new().limit(1).offset(u64::MAX), 10).unwrap();
        assert_eq!(d.window, Window::Range { from: u64::MAX, to: u64::MAX });
    }

    #[test]
    fn test_descriptor_zero_page_with_offset_rejected() {
        let err = QueryDescriptor::build("items", &FindOptions::new().limit(0).offset(3), 10).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_descriptor_predicates_follow_filter() {
        let options = FindOptions::new()
            .where_eq("status", "active")
            .where_in("role", ["admin", "owner"])
            .where_null("deleted_at")
            .order_by("created_at", SortDirection::Desc)
            .select(["id", "name"]);
        let d = QueryDescriptor::build("users", &options, 10).unwrap();
        assert_eq!(d.columns, "id,name");
        assert_eq!(
            d.predicates,
            vec![
                Predicate::Eq("status".into(), json!("active")),
                Predicate::In("role".into(), vec![json!("admin"), json!("owner")]),
                Predicate::IsNull("deleted_at".into()),
            ]
        );
        assert_eq!(d.order, vec![("created_at".to_string(), SortDirection::Desc)]);
    }

    #[test]
    fn test_descriptor_rejects_bad_identifiers() {
        assert!(QueryDescriptor::build("users;drop", &FindOptions::new(), 10).is_err());
        let options = FindOptions::new().where_eq("name = 1 or", "x");
        assert!(QueryDescriptor::build("users", &options, 10).is_err());
    }

    #[test]
    fn test_require_filter() {
        assert!(require_filter(&Filter::new(), "update").is_err());
        assert!(require_filter(&Filter::new().where_eq("id", "1"), "update").is_ok());
    }
}
