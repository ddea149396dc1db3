//! SQL generation for compiled queries.
//!
//! Column and table names come from the static schema; every operand is bound.

use super::{Compiled, Condition, Operator, Order, Value};
use sqlx::{Postgres, QueryBuilder};

/// `SELECT {columns} FROM {table} WHERE … ORDER BY … LIMIT … OFFSET …`
#[must_use]
pub fn select<'args>(columns: &str, query: &Compiled) -> QueryBuilder<'args, Postgres> {
    let mut builder = QueryBuilder::new(format!("SELECT {columns} FROM {}", query.schema.table));
    push_where(&mut builder, query);
    push_order(&mut builder, query);
    builder.push(" LIMIT ");
    builder.push_bind(i64::from(query.limit));
    builder.push(" OFFSET ");
    builder.push_bind(i64::from(query.offset));
    builder
}

/// `SELECT COUNT(*) FROM {table} WHERE …`, ignoring pagination.
#[must_use]
pub fn count<'args>(query: &Compiled) -> QueryBuilder<'args, Postgres> {
    let mut builder = QueryBuilder::new(format!("SELECT COUNT(*) FROM {}", query.schema.table));
    push_where(&mut builder, query);
    builder
}

/// Per-value counts of the group-by column, or `None` when not grouping.
#[must_use]
pub fn group_counts<'args>(query: &Compiled) -> Option<QueryBuilder<'args, Postgres>> {
    let field = query.group_by?;
    let mut builder = QueryBuilder::new(format!(
        "SELECT COALESCE({column}::text, '') AS name, COUNT(*) AS count FROM {table}",
        column = field.name,
        table = query.schema.table,
    ));
    push_where(&mut builder, query);
    builder.push(" GROUP BY 1 ORDER BY 1");
    Some(builder)
}

fn push_where(builder: &mut QueryBuilder<'_, Postgres>, query: &Compiled) {
    builder.push(" WHERE TRUE");
    for condition in &query.conditions {
        builder.push(" AND ");
        push_condition(builder, condition);
    }

    if let Some(term) = &query.search {
        let pattern = format!("%{}%", escape_like(term));
        let mut fields = query.schema.search_fields().peekable();
        if fields.peek().is_none() {
            return;
        }
        builder.push(" AND (");
        for (index, field) in fields.enumerate() {
            if index > 0 {
                builder.push(" OR ");
            }
            builder.push(format!("{}::text ILIKE ", field.name));
            builder.push_bind(pattern.clone());
        }
        builder.push(")");
    }
}

fn push_condition(builder: &mut QueryBuilder<'_, Postgres>, condition: &Condition) {
    let column = condition.field.name;
    match (condition.operator, &condition.value) {
        (Operator::Empty, _) => {
            builder.push(format!("({column} IS NULL OR {column}::text = '')"));
        }
        (Operator::NotEmpty, _) => {
            builder.push(format!("({column} IS NOT NULL AND {column}::text <> '')"));
        }
        (Operator::In, Value::List(items)) => {
            builder.push(format!("{column}::text = ANY("));
            builder.push_bind(items.clone());
            builder.push(")");
        }
        (Operator::NotIn, Value::List(items)) => {
            builder.push(format!("NOT ({column}::text = ANY("));
            builder.push_bind(items.clone());
            builder.push("))");
        }
        (operator, Value::String(raw)) => {
            builder.push(format!("{column}::text {} ", operator.sql()));
            builder.push_bind(raw.clone());
        }
        (operator, Value::Number(number)) => {
            builder.push(format!("{column} {} ", operator.sql()));
            builder.push_bind(*number);
        }
        (operator, Value::Bool(flag)) => {
            builder.push(format!("{column} {} ", operator.sql()));
            builder.push_bind(*flag);
        }
        (operator, Value::Datetime(at)) => {
            builder.push(format!("{column} {} ", operator.sql()));
            builder.push_bind(*at);
        }
        // compile never pairs a list with a scalar operator or a scalar with `in`
        (_, Value::List(_) | Value::None) => {
            builder.push("FALSE");
        }
    }
}

/// Every searchable table has these; they make pages stable when the caller
/// orders by a non-unique column or not at all.
const TIE_BREAKERS: [&str; 2] = ["created_at", "id"];

fn push_order(builder: &mut QueryBuilder<'_, Postgres>, query: &Compiled) {
    builder.push(" ORDER BY ");
    let mut separated = builder.separated(", ");
    for (field, order) in &query.order {
        let direction = match order {
            Order::Asc => "ASC",
            Order::Desc => "DESC",
        };
        separated.push(format!("{} {direction}", field.name));
    }
    for column in TIE_BREAKERS {
        if !query.order.iter().any(|(field, _)| field.name == column) {
            separated.push(format!("{column} ASC"));
        }
    }
}

fn escape_like(term: &str) -> String {
    term.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rql::{RqlFilter, RqlQuery, RqlSort, tests::TEST_SCHEMA};
    use serde_json::json;

    fn compile(query: RqlQuery) -> Compiled {
        query.compile(&TEST_SCHEMA).unwrap()
    }

    #[test]
    fn select_binds_every_operand() {
        let query = compile(RqlQuery {
            filters: vec![
                RqlFilter {
                    name: "state".to_string(),
                    operator: "in".to_string(),
                    value: json!("enabled,disabled"),
                },
                RqlFilter {
                    name: "size".to_string(),
                    operator: "gt".to_string(),
                    value: json!(3),
                },
            ],
            search: "acme".to_string(),
            sort: vec![RqlSort {
                name: "created_at".to_string(),
                order: "desc".to_string(),
            }],
            ..RqlQuery::default()
        });
        let builder = select("*", &query);
        assert_eq!(
            builder.sql(),
            "SELECT * FROM things WHERE TRUE AND state::text = ANY($1) AND size > $2 \
             AND (name::text ILIKE $3) ORDER BY created_at DESC, id ASC LIMIT $4 OFFSET $5"
        );
    }

    #[test]
    fn unsorted_pages_have_a_stable_order() {
        let query = compile(RqlQuery {
            offset: 50,
            ..RqlQuery::default()
        });
        assert_eq!(
            select("*", &query).sql(),
            "SELECT * FROM things WHERE TRUE ORDER BY created_at ASC, id ASC LIMIT $1 OFFSET $2"
        );
    }

    #[test]
    fn group_by_sorts_before_tie_breakers() {
        let query = compile(RqlQuery {
            group_by: vec!["state".to_string()],
            sort: vec![RqlSort {
                name: "size".to_string(),
                order: "desc".to_string(),
            }],
            ..RqlQuery::default()
        });
        assert_eq!(
            select("*", &query).sql(),
            "SELECT * FROM things WHERE TRUE \
             ORDER BY state ASC, size DESC, created_at ASC, id ASC LIMIT $1 OFFSET $2"
        );
    }

    #[test]
    fn empty_and_like_operators() {
        let query = compile(RqlQuery {
            filters: vec![
                RqlFilter {
                    name: "state".to_string(),
                    operator: "empty".to_string(),
                    value: json!(null),
                },
                RqlFilter {
                    name: "name".to_string(),
                    operator: "notlike".to_string(),
                    value: json!("test%"),
                },
            ],
            ..RqlQuery::default()
        });
        assert_eq!(
            count(&query).sql(),
            "SELECT COUNT(*) FROM things WHERE TRUE AND (state IS NULL OR state::text = '') \
             AND name::text NOT ILIKE $1"
        );
    }

    #[test]
    fn group_counts_only_when_grouping() {
        assert!(group_counts(&compile(RqlQuery::default())).is_none());
        let query = compile(RqlQuery {
            group_by: vec!["state".to_string()],
            ..RqlQuery::default()
        });
        let builder = group_counts(&query).unwrap();
        assert_eq!(
            builder.sql(),
            "SELECT COALESCE(state::text, '') AS name, COUNT(*) AS count FROM things \
             WHERE TRUE GROUP BY 1 ORDER BY 1"
        );
    }

    #[test]
    fn search_terms_are_escaped() {
        assert_eq!(escape_like("50%_off"), "50\\%\\_off");
    }
}
