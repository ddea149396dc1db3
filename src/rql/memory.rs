//! In-memory evaluation of compiled queries, used by `MemoryStore`.

use super::{Compiled, Condition, Group, GroupCount, Operator, Order, Page, Pagination, Value};
use std::{cmp::Ordering, collections::BTreeMap};

/// A record that exposes its RQL fields by name.
pub trait RqlRecord {
    /// Returns [`Value::None`] for names the record does not know.
    fn rql_value(&self, field: &str) -> Value;
}

/// Filters, searches, groups, sorts and paginates `records`.
#[must_use]
pub fn apply<T: RqlRecord + Clone>(records: Vec<T>, query: &Compiled) -> Page<T> {
    let mut matched: Vec<T> = records
        .into_iter()
        .filter(|record| query.conditions.iter().all(|cond| matches(record, cond)))
        .filter(|record| searched(record, query))
        .collect();

    let group = query.group_by.map(|field| {
        let mut counts: BTreeMap<String, u64> = BTreeMap::new();
        for record in &matched {
            *counts.entry(text(&record.rql_value(field.name))).or_default() += 1;
        }
        Group {
            name: field.name.to_string(),
            data: counts
                .into_iter()
                .map(|(name, count)| GroupCount { name, count })
                .collect(),
        }
    });

    matched.sort_by(|a, b| {
        query
            .order
            .iter()
            .map(|(field, order)| {
                let ordering = compare(&a.rql_value(field.name), &b.rql_value(field.name));
                match order {
                    Order::Asc => ordering,
                    Order::Desc => ordering.reverse(),
                }
            })
            .find(|ordering| ordering.is_ne())
            .unwrap_or(Ordering::Equal)
    });

    let total_count = matched.len() as u64;
    let items = matched
        .into_iter()
        .skip(query.offset as usize)
        .take(query.limit as usize)
        .collect();

    Page {
        items,
        pagination: Pagination {
            offset: query.offset,
            limit: query.limit,
            total_count,
        },
        group,
    }
}

fn matches<T: RqlRecord>(record: &T, condition: &Condition) -> bool {
    let actual = record.rql_value(condition.field.name);
    match condition.operator {
        Operator::Empty => is_empty(&actual),
        Operator::NotEmpty => !is_empty(&actual),
        Operator::In | Operator::NotIn => {
            let found = match &condition.value {
                Value::List(items) => items.contains(&text(&actual)),
                _ => false,
            };
            (condition.operator == Operator::In) == found
        }
        Operator::Like | Operator::NotLike => {
            let found = like(&text(&actual), &text(&condition.value));
            (condition.operator == Operator::Like) == found
        }
        Operator::Eq => compare(&actual, &condition.value).is_eq(),
        Operator::Neq => compare(&actual, &condition.value).is_ne(),
        Operator::Gt => compare(&actual, &condition.value).is_gt(),
        Operator::Gte => compare(&actual, &condition.value).is_ge(),
        Operator::Lt => compare(&actual, &condition.value).is_lt(),
        Operator::Lte => compare(&actual, &condition.value).is_le(),
    }
}

fn searched<T: RqlRecord>(record: &T, query: &Compiled) -> bool {
    let Some(term) = &query.search else {
        return true;
    };
    let term = term.to_lowercase();
    query
        .schema
        .search_fields()
        .any(|field| text(&record.rql_value(field.name)).to_lowercase().contains(&term))
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::None => true,
        Value::String(raw) => raw.is_empty(),
        Value::List(items) => items.is_empty(),
        _ => false,
    }
}

/// String form used for search, `in`, `like` and group names.
fn text(value: &Value) -> String {
    match value {
        Value::String(raw) => raw.clone(),
        Value::Number(number) => number.to_string(),
        Value::Bool(flag) => flag.to_string(),
        Value::Datetime(at) => at.to_rfc3339(),
        Value::List(items) => items.join(","),
        Value::None => String::new(),
    }
}

/// Missing values sort first; mismatched kinds compare as text.
fn compare(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::None, Value::None) => Ordering::Equal,
        (Value::None, _) => Ordering::Less,
        (_, Value::None) => Ordering::Greater,
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (Value::Number(a), Value::Number(b)) => a.total_cmp(b),
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        (Value::Datetime(a), Value::Datetime(b)) => a.cmp(b),
        (a, b) => text(a).cmp(&text(b)),
    }
}

/// Case-insensitive SQL `LIKE`: `%` matches any run, `_` one character.
fn like(value: &str, pattern: &str) -> bool {
    let value: Vec<char> = value.to_lowercase().chars().collect();
    let pattern: Vec<char> = pattern.to_lowercase().chars().collect();

    let (mut v, mut p) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;
    while v < value.len() {
        match pattern.get(p) {
            Some('%') => {
                backtrack = Some((p, v));
                p += 1;
            }
            Some('_') => {
                v += 1;
                p += 1;
            }
            Some(ch) if *ch == value[v] => {
                v += 1;
                p += 1;
            }
            _ => match backtrack {
                Some((star, matched)) => {
                    p = star + 1;
                    v = matched + 1;
                    backtrack = Some((star, matched + 1));
                }
                None => return false,
            },
        }
    }
    pattern[p..].iter().all(|ch| *ch == '%')
}
