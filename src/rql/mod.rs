//! RQL: the filter, search, sort, group-by and pagination convention shared by
//! list endpoints.
//!
//! A request arrives as an [`RqlQuery`] and is compiled against the static
//! [`RqlSchema`] of the entity being listed. Compilation rejects unknown
//! fields, operators that do not fit the field's datatype, and values of the
//! wrong type, so both backends (`sql` for Postgres, `memory` for the
//! in-memory store) only ever see a validated [`Compiled`] query.

pub mod memory;
pub mod sql;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use thiserror::Error;
use utoipa::ToSchema;

pub const DEFAULT_LIMIT: u32 = 50;
pub const MAX_LIMIT: u32 = 1000;
pub const DEFAULT_OFFSET: u32 = 0;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RqlError {
    #[error("{0} is not supported in filters")]
    UnsupportedFilter(String),
    #[error("operator {operator} is not supported for {field}")]
    UnsupportedOperator { field: String, operator: String },
    #[error("invalid value for {field}: expected {expected}")]
    InvalidValue { field: String, expected: DataType },
    #[error("{0} is not supported in sort")]
    UnsupportedSort(String),
    #[error("{0} is not supported in group by")]
    UnsupportedGroupBy(String),
    #[error("only one group by column is supported")]
    TooManyGroupBy,
}

/// Wire form of an RQL request.
#[derive(Debug, Clone, Default, Deserialize, Serialize, ToSchema)]
#[serde(default)]
pub struct RqlQuery {
    pub filters: Vec<RqlFilter>,
    pub group_by: Vec<String>,
    pub offset: u32,
    pub limit: u32,
    pub search: String,
    pub sort: Vec<RqlSort>,
}

#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct RqlFilter {
    pub name: String,
    pub operator: String,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub value: JsonValue,
}

#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct RqlSort {
    pub name: String,
    #[serde(default)]
    pub order: String,
}

impl RqlQuery {
    /// A query with only pagination set, used by plain `GET` list endpoints.
    #[must_use]
    pub fn paged(limit: Option<u32>, offset: Option<u32>, search: Option<String>) -> Self {
        Self {
            limit: limit.unwrap_or_default(),
            offset: offset.unwrap_or_default(),
            search: search.unwrap_or_default(),
            ..Self::default()
        }
    }

    /// Appends an equality filter on a string field.
    #[must_use]
    pub fn with_eq(mut self, name: &str, value: impl Into<String>) -> Self {
        self.filters.push(RqlFilter {
            name: name.to_string(),
            operator: "eq".to_string(),
            value: JsonValue::String(value.into()),
        });
        self
    }

    /// Validates the query against `schema`.
    ///
    /// # Errors
    /// Returns an [`RqlError`] for unknown fields, unsupported operators, values
    /// of the wrong type, or more than one group-by column.
    pub fn compile(&self, schema: &'static RqlSchema) -> Result<Compiled, RqlError> {
        let mut conditions = Vec::with_capacity(self.filters.len());
        for filter in &self.filters {
            let field = schema
                .field(&filter.name)
                .filter(|field| field.filter)
                .ok_or_else(|| RqlError::UnsupportedFilter(filter.name.clone()))?;
            let operator = Operator::parse(&filter.operator)
                .filter(|op| op.supports(field.datatype))
                .ok_or_else(|| RqlError::UnsupportedOperator {
                    field: filter.name.clone(),
                    operator: filter.operator.clone(),
                })?;
            let value = Value::from_json(field, operator, &filter.value)?;
            conditions.push(Condition {
                field,
                operator,
                value,
            });
        }

        let mut order = Vec::new();
        let group_by = match self.group_by.as_slice() {
            [] => None,
            [name] => {
                let field = schema
                    .field(name)
                    .filter(|field| field.group)
                    .ok_or_else(|| RqlError::UnsupportedGroupBy(name.clone()))?;
                // group-by column sorts first, ascending
                order.push((field, Order::Asc));
                Some(field)
            }
            _ => return Err(RqlError::TooManyGroupBy),
        };

        for item in &self.sort {
            let field = schema
                .field(&item.name)
                .filter(|field| field.sort)
                .ok_or_else(|| RqlError::UnsupportedSort(item.name.clone()))?;
            order.push((field, Order::parse(&item.order)));
        }

        let search = self.search.trim();
        let limit = match self.limit {
            0 => DEFAULT_LIMIT,
            limit => limit.min(MAX_LIMIT),
        };

        Ok(Compiled {
            schema,
            conditions,
            search: (!search.is_empty()).then(|| search.to_string()),
            order,
            group_by,
            limit,
            offset: self.offset,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    String,
    Number,
    Bool,
    Datetime,
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Bool => "bool",
            Self::Datetime => "datetime",
        };
        f.write_str(name)
    }
}

/// A column an entity exposes to RQL. Field names double as SQL column names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub name: &'static str,
    pub datatype: DataType,
    pub filter: bool,
    pub search: bool,
    pub sort: bool,
    pub group: bool,
}

impl Field {
    /// Filterable and sortable by default; search and group-by are opt-in.
    #[must_use]
    pub const fn new(name: &'static str, datatype: DataType) -> Self {
        Self {
            name,
            datatype,
            filter: true,
            search: false,
            sort: true,
            group: false,
        }
    }

    #[must_use]
    pub const fn searchable(mut self) -> Self {
        self.search = true;
        self
    }

    #[must_use]
    pub const fn groupable(mut self) -> Self {
        self.group = true;
        self
    }
}

#[derive(Debug)]
pub struct RqlSchema {
    pub table: &'static str,
    pub fields: &'static [Field],
}

impl RqlSchema {
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&'static Field> {
        // `fields` is 'static, so the borrow outlives `self`
        let fields: &'static [Field] = self.fields;
        fields.iter().find(|field| field.name == name)
    }

    pub fn search_fields(&self) -> impl Iterator<Item = &'static Field> {
        let fields: &'static [Field] = self.fields;
        fields.iter().filter(|field| field.search)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    NotLike,
    In,
    NotIn,
    Empty,
    NotEmpty,
}

impl Operator {
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let operator = match value.trim().to_lowercase().as_str() {
            "eq" => Self::Eq,
            "neq" => Self::Neq,
            "gt" => Self::Gt,
            "gte" => Self::Gte,
            "lt" => Self::Lt,
            "lte" => Self::Lte,
            "like" => Self::Like,
            "notlike" => Self::NotLike,
            "in" => Self::In,
            "notin" => Self::NotIn,
            "empty" => Self::Empty,
            "notempty" => Self::NotEmpty,
            _ => return None,
        };
        Some(operator)
    }

    #[must_use]
    pub fn supports(self, datatype: DataType) -> bool {
        match datatype {
            DataType::String => matches!(
                self,
                Self::Eq
                    | Self::Neq
                    | Self::Like
                    | Self::NotLike
                    | Self::In
                    | Self::NotIn
                    | Self::Empty
                    | Self::NotEmpty
            ),
            DataType::Number | DataType::Datetime => matches!(
                self,
                Self::Eq | Self::Neq | Self::Gt | Self::Gte | Self::Lt | Self::Lte
            ),
            DataType::Bool => matches!(self, Self::Eq | Self::Neq),
        }
    }

    /// SQL comparison token for the scalar operators.
    #[must_use]
    pub fn sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Neq => "<>",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Like => "ILIKE",
            Self::NotLike => "NOT ILIKE",
            Self::In | Self::NotIn | Self::Empty | Self::NotEmpty => "",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

impl Order {
    /// Anything other than `desc` sorts ascending.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("desc") {
            Self::Desc
        } else {
            Self::Asc
        }
    }
}

/// A typed filter operand, or the value of a record field.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Number(f64),
    Bool(bool),
    Datetime(DateTime<Utc>),
    List(Vec<String>),
    None,
}

impl Value {
    fn from_json(field: &Field, operator: Operator, value: &JsonValue) -> Result<Self, RqlError> {
        let invalid = || RqlError::InvalidValue {
            field: field.name.to_string(),
            expected: field.datatype,
        };
        if matches!(operator, Operator::Empty | Operator::NotEmpty) {
            return Ok(Self::None);
        }
        match field.datatype {
            DataType::String => {
                let raw = value.as_str().ok_or_else(invalid)?;
                if matches!(operator, Operator::In | Operator::NotIn) {
                    Ok(Self::List(
                        raw.split(',').map(|item| item.trim().to_string()).collect(),
                    ))
                } else {
                    Ok(Self::String(raw.to_string()))
                }
            }
            DataType::Number => value.as_f64().map(Self::Number).ok_or_else(invalid),
            DataType::Bool => value.as_bool().map(Self::Bool).ok_or_else(invalid),
            DataType::Datetime => value
                .as_str()
                .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                .map(|parsed| Self::Datetime(parsed.with_timezone(&Utc)))
                .ok_or_else(invalid),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Condition {
    pub field: &'static Field,
    pub operator: Operator,
    pub value: Value,
}

/// A query validated against its schema, ready for either backend.
#[derive(Debug, Clone)]
pub struct Compiled {
    pub schema: &'static RqlSchema,
    pub conditions: Vec<Condition>,
    pub search: Option<String>,
    pub order: Vec<(&'static Field, Order)>,
    pub group_by: Option<&'static Field>,
    pub limit: u32,
    pub offset: u32,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Pagination {
    pub offset: u32,
    pub limit: u32,
    pub total_count: u64,
}

#[derive(Debug, Clone, Serialize, ToSchema, PartialEq, Eq)]
pub struct GroupCount {
    pub name: String,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Group {
    pub name: String,
    pub data: Vec<GroupCount>,
}

/// One page of RQL results.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub pagination: Pagination,
    pub group: Option<Group>,
}

impl<T> Page<T> {
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            pagination: self.pagination,
            group: self.group,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    pub(crate) static TEST_SCHEMA: RqlSchema = RqlSchema {
        table: "things",
        fields: &[
            Field::new("name", DataType::String).searchable().groupable(),
            Field::new("state", DataType::String).groupable(),
            Field::new("size", DataType::Number),
            Field::new("active", DataType::Bool),
            Field::new("created_at", DataType::Datetime),
        ],
    };

    fn filter(name: &str, operator: &str, value: JsonValue) -> RqlFilter {
        RqlFilter {
            name: name.to_string(),
            operator: operator.to_string(),
            value,
        }
    }

    #[test]
    fn defaults_apply_to_empty_query() {
        let compiled = RqlQuery::default().compile(&TEST_SCHEMA).unwrap();
        assert_eq!(compiled.limit, DEFAULT_LIMIT);
        assert_eq!(compiled.offset, DEFAULT_OFFSET);
        assert!(compiled.search.is_none());
        assert!(compiled.conditions.is_empty());
    }

    #[test]
    fn limit_is_capped() {
        let query = RqlQuery {
            limit: 50_000,
            ..RqlQuery::default()
        };
        assert_eq!(query.compile(&TEST_SCHEMA).unwrap().limit, MAX_LIMIT);
    }

    #[test]
    fn unknown_filter_is_rejected() {
        let query = RqlQuery {
            filters: vec![filter("password", "eq", json!("x"))],
            ..RqlQuery::default()
        };
        let err = query.compile(&TEST_SCHEMA).unwrap_err();
        assert_eq!(err.to_string(), "password is not supported in filters");
    }

    #[test]
    fn operator_must_fit_datatype() {
        let query = RqlQuery {
            filters: vec![filter("active", "like", json!("tr%"))],
            ..RqlQuery::default()
        };
        assert!(matches!(
            query.compile(&TEST_SCHEMA),
            Err(RqlError::UnsupportedOperator { .. })
        ));
    }

    #[test]
    fn value_must_fit_datatype() {
        let query = RqlQuery {
            filters: vec![filter("size", "gt", json!("ten"))],
            ..RqlQuery::default()
        };
        assert_eq!(
            query.compile(&TEST_SCHEMA).unwrap_err(),
            RqlError::InvalidValue {
                field: "size".to_string(),
                expected: DataType::Number
            }
        );
    }

    #[test]
    fn in_operator_splits_values() {
        let query = RqlQuery {
            filters: vec![filter("state", "in", json!("enabled, disabled"))],
            ..RqlQuery::default()
        };
        let compiled = query.compile(&TEST_SCHEMA).unwrap();
        assert_eq!(
            compiled.conditions[0].value,
            Value::List(vec!["enabled".to_string(), "disabled".to_string()])
        );
    }

    #[test]
    fn datetime_values_parse_rfc3339() {
        let query = RqlQuery {
            filters: vec![filter("created_at", "gte", json!("2024-01-01T00:00:00Z"))],
            ..RqlQuery::default()
        };
        let compiled = query.compile(&TEST_SCHEMA).unwrap();
        assert!(matches!(compiled.conditions[0].value, Value::Datetime(_)));
    }

    #[test]
    fn group_by_sorts_first_and_allows_one_column() {
        let query = RqlQuery {
            group_by: vec!["state".to_string()],
            sort: vec![RqlSort {
                name: "name".to_string(),
                order: "desc".to_string(),
            }],
            ..RqlQuery::default()
        };
        let compiled = query.compile(&TEST_SCHEMA).unwrap();
        assert_eq!(compiled.order[0].0.name, "state");
        assert_eq!(compiled.order[1], (TEST_SCHEMA.field("name").unwrap(), Order::Desc));

        let query = RqlQuery {
            group_by: vec!["state".to_string(), "name".to_string()],
            ..RqlQuery::default()
        };
        assert_eq!(query.compile(&TEST_SCHEMA).unwrap_err(), RqlError::TooManyGroupBy);
    }

    #[test]
    fn unknown_sort_order_is_ascending() {
        assert_eq!(Order::parse("sideways"), Order::Asc);
        assert_eq!(Order::parse("DESC"), Order::Desc);
    }
}
