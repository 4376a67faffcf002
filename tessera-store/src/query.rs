//! Collection queries: filters, ordering, limits and cursors.
//!
//! Results are ordered by the `order_by` clauses and then by document path,
//! so every query has a total order and cursors are unambiguous. A cursor is
//! the snapshot of a document; its position is read from the snapshot's own
//! data, so a cursor document need not still exist.

use crate::snapshot::DocumentSnapshot;
use serde_json::Value;
use std::cmp::Ordering;
use tessera_core::{CollectionPath, DocPath};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    NotEq,
    Lt,
    Lte,
    Gt,
    Gte,
    ArrayContains,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

impl Filter {
    fn accepts(&self, doc: &DocumentSnapshot) -> bool {
        let actual = doc.field(&self.field);
        match self.op {
            FilterOp::Eq => compare_values(&actual, &self.value) == Ordering::Equal,
            FilterOp::NotEq => compare_values(&actual, &self.value) != Ordering::Equal,
            FilterOp::Lt => comparable(&actual, &self.value, |o| o == Ordering::Less),
            FilterOp::Lte => comparable(&actual, &self.value, |o| o != Ordering::Greater),
            FilterOp::Gt => comparable(&actual, &self.value, |o| o == Ordering::Greater),
            FilterOp::Gte => comparable(&actual, &self.value, |o| o != Ordering::Less),
            FilterOp::ArrayContains => match actual {
                Value::Array(items) => items
                    .iter()
                    .any(|item| compare_values(item, &self.value) == Ordering::Equal),
                _ => false,
            },
        }
    }
}

/// Range filters only match values of the same kind.
fn comparable(actual: &Value, expected: &Value, test: impl Fn(Ordering) -> bool) -> bool {
    type_rank(actual) == type_rank(expected) && test(compare_values(actual, expected))
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Cursor {
    pub doc: DocumentSnapshot,
    pub inclusive: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    collection: CollectionPath,
    filters: Vec<Filter>,
    order: Vec<OrderBy>,
    limit: Option<usize>,
    start: Option<Cursor>,
    end: Option<Cursor>,
}

impl Query {
    pub fn collection(path: impl Into<CollectionPath>) -> Self {
        Self {
            collection: path.into(),
            filters: Vec::new(),
            order: Vec::new(),
            limit: None,
            start: None,
            end: None,
        }
    }

    pub fn filter(mut self, field: &str, op: FilterOp, value: Value) -> Self {
        self.filters.push(Filter {
            field: field.to_string(),
            op,
            value,
        });
        self
    }

    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        self.order.push(OrderBy {
            field: field.to_string(),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn start_at(mut self, doc: DocumentSnapshot) -> Self {
        self.start = Some(Cursor {
            doc,
            inclusive: true,
        });
        self
    }

    pub fn start_after(mut self, doc: DocumentSnapshot) -> Self {
        self.start = Some(Cursor {
            doc,
            inclusive: false,
        });
        self
    }

    pub fn end_at(mut self, doc: DocumentSnapshot) -> Self {
        self.end = Some(Cursor {
            doc,
            inclusive: true,
        });
        self
    }

    pub fn end_before(mut self, doc: DocumentSnapshot) -> Self {
        self.end = Some(Cursor {
            doc,
            inclusive: false,
        });
        self
    }

    pub fn collection_path(&self) -> &CollectionPath {
        &self.collection
    }

    pub fn limit_value(&self) -> Option<usize> {
        self.limit
    }

    pub fn ordering(&self) -> &[OrderBy] {
        &self.order
    }

    pub fn start_cursor(&self) -> Option<&Cursor> {
        self.start.as_ref()
    }

    pub fn end_cursor(&self) -> Option<&Cursor> {
        self.end.as_ref()
    }

    /// Membership test ignoring cursors and limit.
    pub fn matches(&self, doc: &DocumentSnapshot) -> bool {
        doc.exists()
            && self.collection.contains(doc.path())
            && self.filters.iter().all(|f| f.accepts(doc))
    }

    /// Total order of the query.
    pub fn compare(&self, a: &DocumentSnapshot, b: &DocumentSnapshot) -> Ordering {
        for clause in &self.order {
            let ordering = compare_values(&a.field(&clause.field), &b.field(&clause.field));
            let ordering = match clause.direction {
                Direction::Ascending => ordering,
                Direction::Descending => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        compare_paths(a.path(), b.path())
    }

    fn after_start(&self, doc: &DocumentSnapshot) -> bool {
        match &self.start {
            None => true,
            Some(cursor) => match self.compare(doc, &cursor.doc) {
                Ordering::Greater => true,
                Ordering::Equal => cursor.inclusive,
                Ordering::Less => false,
            },
        }
    }

    fn before_end(&self, doc: &DocumentSnapshot) -> bool {
        match &self.end {
            None => true,
            Some(cursor) => match self.compare(doc, &cursor.doc) {
                Ordering::Less => true,
                Ordering::Equal => cursor.inclusive,
                Ordering::Greater => false,
            },
        }
    }

    /// Evaluates the query over a set of candidate documents.
    pub fn evaluate<'a, I>(&self, candidates: I) -> Vec<DocumentSnapshot>
    where
        I: IntoIterator<Item = &'a DocumentSnapshot>,
    {
        let mut docs: Vec<DocumentSnapshot> = candidates
            .into_iter()
            .filter(|doc| self.matches(doc))
            .filter(|doc| self.after_start(doc) && self.before_end(doc))
            .cloned()
            .collect();
        docs.sort_by(|a, b| self.compare(a, b));
        if let Some(limit) = self.limit {
            docs.truncate(limit);
        }
        docs
    }
}

fn compare_paths(a: &DocPath, b: &DocPath) -> Ordering {
    a.as_str().cmp(b.as_str())
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Orders values by kind first, then by value within a kind.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (left, right) in x.iter().zip(y.iter()) {
                let ordering = compare_values(left, right);
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(x), Value::Object(y)) => {
            for ((lk, lv), (rk, rv)) in x.iter().zip(y.iter()) {
                let ordering = lk.cmp(rk).then_with(|| compare_values(lv, rv));
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}
