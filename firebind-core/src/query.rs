//! Query descriptions passed through to the backend
//!
//! The query language is deliberately small: field filters, ordering and a
//! limit. Backends are free to translate it into their own representation;
//! [`Query::matches`] and [`Query::compare`] give the reference semantics
//! used by the in-memory backend.

use crate::reference::CollectionRef;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// Comparison operator of a field filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOp {
    /// `==`
    #[serde(rename = "==")]
    Eq,
    /// `!=`
    #[serde(rename = "!=")]
    NotEq,
    /// `<`
    #[serde(rename = "<")]
    Lt,
    /// `<=`
    #[serde(rename = "<=")]
    Le,
    /// `>`
    #[serde(rename = ">")]
    Gt,
    /// `>=`
    #[serde(rename = ">=")]
    Ge,
    /// Array field contains the value
    #[serde(rename = "array-contains")]
    ArrayContains,
    /// Field equals one of the values of an array
    #[serde(rename = "in")]
    In,
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Ascending
    #[default]
    Asc,
    /// Descending
    Desc,
}

/// A single field filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    /// Dotted field path
    pub field: String,
    /// Operator
    pub op: FilterOp,
    /// Operand
    pub value: Value,
}

/// A single ordering clause
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBy {
    /// Dotted field path
    pub field: String,
    /// Direction
    #[serde(default)]
    pub direction: Direction,
}

/// A query over one collection
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    collection: CollectionRef,
    filters: Vec<Filter>,
    order: Vec<OrderBy>,
    limit: Option<usize>,
}

impl Query {
    /// Query over every document of `collection`
    pub fn new(collection: CollectionRef) -> Self {
        Self {
            collection,
            filters: Vec::new(),
            order: Vec::new(),
            limit: None,
        }
    }

    /// Add a field filter
    pub fn where_field(mut self, field: impl Into<String>, op: FilterOp, value: Value) -> Self {
        self.filters.push(Filter {
            field: field.into(),
            op,
            value,
        });
        self
    }

    /// Add an ordering clause
    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order.push(OrderBy {
            field: field.into(),
            direction,
        });
        self
    }

    /// Limit the number of results
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Collection queried
    pub fn collection(&self) -> &CollectionRef {
        &self.collection
    }

    /// Field filters, all of which must hold
    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    /// Ordering clauses
    pub fn ordering(&self) -> &[OrderBy] {
        &self.order
    }

    /// Result limit
    pub fn max_results(&self) -> Option<usize> {
        self.limit
    }

    /// Whether a document passes every filter
    pub fn matches(&self, data: &Map<String, Value>) -> bool {
        self.filters.iter().all(|filter| {
            let Some(field) = field_value(data, &filter.field) else {
                return false;
            };
            match filter.op {
                FilterOp::Eq => value_order(field, &filter.value) == Ordering::Equal,
                FilterOp::NotEq => value_order(field, &filter.value) != Ordering::Equal,
                FilterOp::Lt => same_kind(field, &filter.value)
                    && value_order(field, &filter.value) == Ordering::Less,
                FilterOp::Le => same_kind(field, &filter.value)
                    && value_order(field, &filter.value) != Ordering::Greater,
                FilterOp::Gt => same_kind(field, &filter.value)
                    && value_order(field, &filter.value) == Ordering::Greater,
                FilterOp::Ge => same_kind(field, &filter.value)
                    && value_order(field, &filter.value) != Ordering::Less,
                FilterOp::ArrayContains => field
                    .as_array()
                    .is_some_and(|items| items.iter().any(|item| item == &filter.value)),
                FilterOp::In => filter
                    .value
                    .as_array()
                    .is_some_and(|options| options.iter().any(|option| option == field)),
            }
        })
    }

    /// Order two documents by the ordering clauses, ties broken by id
    pub fn compare(
        &self,
        (a_id, a): (&str, &Map<String, Value>),
        (b_id, b): (&str, &Map<String, Value>),
    ) -> Ordering {
        for clause in &self.order {
            let ordering = match (field_value(a, &clause.field), field_value(b, &clause.field)) {
                (Some(x), Some(y)) => value_order(x, y),
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            };
            let ordering = match clause.direction {
                Direction::Asc => ordering,
                Direction::Desc => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        a_id.cmp(b_id)
    }
}

/// What a collection listens to: a whole collection or a query over one
#[derive(Debug, Clone, PartialEq)]
pub enum QueryTarget {
    /// Every document of a collection
    Collection(CollectionRef),
    /// A filtered query
    Query(Query),
}

impl QueryTarget {
    /// Collection the target reads from
    pub fn collection(&self) -> &CollectionRef {
        match self {
            QueryTarget::Collection(collection) => collection,
            QueryTarget::Query(query) => query.collection(),
        }
    }
}

impl fmt::Display for QueryTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryTarget::Collection(collection) => write!(f, "{collection}"),
            QueryTarget::Query(query) => {
                write!(f, "{}", query.collection)?;
                for filter in &query.filters {
                    write!(f, " [{} {:?} {}]", filter.field, filter.op, filter.value)?;
                }
                Ok(())
            }
        }
    }
}

/// How a collection derives its query from its reference
#[derive(Clone, Default)]
pub enum QuerySpec {
    /// No filter: listen to the whole collection
    #[default]
    Unfiltered,
    /// Force an empty result without contacting the backend
    Empty,
    /// A prebuilt query, used regardless of the collection reference
    Literal(Query),
    /// Built from the current reference; `None` forces an empty result
    Build(Arc<dyn Fn(&CollectionRef) -> Option<Query> + Send + Sync>),
}

impl QuerySpec {
    /// Query spec computed from the collection reference
    pub fn build<F>(f: F) -> Self
    where
        F: Fn(&CollectionRef) -> Option<Query> + Send + Sync + 'static,
    {
        QuerySpec::Build(Arc::new(f))
    }

    /// Resolve the listen target for the given reference
    pub fn resolve(&self, reference: Option<&CollectionRef>) -> Option<QueryTarget> {
        match self {
            QuerySpec::Unfiltered => reference.cloned().map(QueryTarget::Collection),
            QuerySpec::Empty => None,
            QuerySpec::Literal(query) => Some(QueryTarget::Query(query.clone())),
            QuerySpec::Build(build) => reference.and_then(|r| build(r)).map(QueryTarget::Query),
        }
    }
}

impl fmt::Debug for QuerySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuerySpec::Unfiltered => f.write_str("QuerySpec::Unfiltered"),
            QuerySpec::Empty => f.write_str("QuerySpec::Empty"),
            QuerySpec::Literal(query) => f.debug_tuple("QuerySpec::Literal").field(query).finish(),
            QuerySpec::Build(_) => f.write_str("QuerySpec::Build(..)"),
        }
    }
}

impl From<Query> for QuerySpec {
    fn from(query: Query) -> Self {
        QuerySpec::Literal(query)
    }
}

impl From<Option<Query>> for QuerySpec {
    fn from(query: Option<Query>) -> Self {
        match query {
            Some(query) => QuerySpec::Literal(query),
            None => QuerySpec::Empty,
        }
    }
}

/// Look up a dotted field path
pub fn field_value<'a>(data: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = data.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn kind_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

fn same_kind(a: &Value, b: &Value) -> bool {
    kind_rank(a) == kind_rank(b)
}

/// Total order over JSON values: null < bool < number < string < array < object
pub fn value_order(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (left, right) in x.iter().zip(y.iter()) {
                let ordering = value_order(left, right);
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(x), Value::Object(y)) => {
            let mut left: Vec<_> = x.iter().collect();
            let mut right: Vec<_> = y.iter().collect();
            left.sort_by(|a, b| a.0.cmp(b.0));
            right.sort_by(|a, b| a.0.cmp(b.0));
            for ((lk, lv), (rk, rv)) in left.iter().zip(right.iter()) {
                let ordering = lk.cmp(rk).then_with(|| value_order(lv, rv));
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            left.len().cmp(&right.len())
        }
        _ => kind_rank(a).cmp(&kind_rank(b)),
    }
}
