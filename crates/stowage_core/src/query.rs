//! Query builder compiling predicates, ordering and paging into SQLite SQL.
//!
//! # Responsibility
//! - Combine predicates with OR (`or`) and AND (`and`).
//! - Parse sort keys, where a leading `-` means descending.
//! - Page as `offset * limit` rows skipped and `limit` rows taken.
//!
//! # Invariants
//! - Every field name is checked against the entity schema before any SQL
//!   is produced; values are always bound, never inlined.
//! - Paging without explicit ordering sorts by `id` descending.
//! - A query without predicates matches every row.

use crate::error::{StoreError, StoreResult};
use crate::model::field::uuid_value;
use crate::model::{Entity, EntityId, EntityRef, Include, ID_COLUMN};
use rusqlite::types::Value;
use std::fmt;
use std::marker::PhantomData;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Comparison {
    fn sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

/// Filter expression over mapped fields of one entity type.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Always,
    Compare {
        field: String,
        op: Comparison,
        value: Value,
    },
    /// SQL `LIKE` with `%`/`_` wildcards, case-insensitive for ASCII.
    Like {
        field: String,
        pattern: String,
    },
    /// Equality under SQLite's ASCII case folding.
    EqIgnoreCase {
        field: String,
        value: String,
    },
    IsNull(String),
    IsNotNull(String),
    In {
        field: String,
        values: Vec<Value>,
    },
    Not(Box<Predicate>),
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
}

impl Predicate {
    pub fn compare(field: impl Into<String>, op: Comparison, value: impl Into<Value>) -> Self {
        Self::Compare {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, Comparison::Eq, value)
    }

    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, Comparison::Ne, value)
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, Comparison::Lt, value)
    }

    pub fn le(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, Comparison::Le, value)
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, Comparison::Gt, value)
    }

    pub fn ge(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, Comparison::Ge, value)
    }

    pub fn like(field: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::Like {
            field: field.into(),
            pattern: pattern.into(),
        }
    }

    pub fn eq_ignore_case(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::EqIgnoreCase {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn is_null(field: impl Into<String>) -> Self {
        Self::IsNull(field.into())
    }

    pub fn is_not_null(field: impl Into<String>) -> Self {
        Self::IsNotNull(field.into())
    }

    pub fn is_in(field: impl Into<String>, values: impl IntoIterator<Item = Value>) -> Self {
        Self::In {
            field: field.into(),
            values: values.into_iter().collect(),
        }
    }

    pub fn id_eq(id: EntityId) -> Self {
        Self::eq(ID_COLUMN, uuid_value(id))
    }

    pub fn and(self, other: Predicate) -> Self {
        Self::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Predicate) -> Self {
        Self::Or(Box::new(self), Box::new(other))
    }

    pub fn negate(self) -> Self {
        Self::Not(Box::new(self))
    }

    fn write_sql<T: Entity>(&self, sql: &mut String, binds: &mut Vec<Value>) -> StoreResult<()> {
        match self {
            Self::Always => sql.push_str("1 = 1"),
            Self::Compare {
                field,
                op,
                value: Value::Null,
            } if matches!(op, Comparison::Eq | Comparison::Ne) => {
                sql.push_str(column::<T>(field)?);
                sql.push_str(if *op == Comparison::Eq {
                    " IS NULL"
                } else {
                    " IS NOT NULL"
                });
            }
            Self::Compare { field, op, value } => {
                sql.push_str(column::<T>(field)?);
                sql.push(' ');
                sql.push_str(op.sql());
                sql.push_str(" ?");
                binds.push(value.clone());
            }
            Self::Like { field, pattern } => {
                sql.push_str(column::<T>(field)?);
                sql.push_str(" LIKE ?");
                binds.push(Value::Text(pattern.clone()));
            }
            Self::EqIgnoreCase { field, value } => {
                sql.push_str(column::<T>(field)?);
                sql.push_str(" = ? COLLATE NOCASE");
                binds.push(Value::Text(value.clone()));
            }
            Self::IsNull(field) => {
                sql.push_str(column::<T>(field)?);
                sql.push_str(" IS NULL");
            }
            Self::IsNotNull(field) => {
                sql.push_str(column::<T>(field)?);
                sql.push_str(" IS NOT NULL");
            }
            Self::In { field, values } => {
                let name = column::<T>(field)?;
                if values.is_empty() {
                    sql.push_str("0 = 1");
                } else {
                    sql.push_str(name);
                    sql.push_str(" IN (");
                    sql.push_str(&vec!["?"; values.len()].join(", "));
                    sql.push(')');
                    binds.extend(values.iter().cloned());
                }
            }
            Self::Not(inner) => {
                sql.push_str("NOT (");
                inner.write_sql::<T>(sql, binds)?;
                sql.push(')');
            }
            Self::And(left, right) | Self::Or(left, right) => {
                let joiner = if matches!(self, Self::And(..)) {
                    " AND "
                } else {
                    " OR "
                };
                sql.push('(');
                left.write_sql::<T>(sql, binds)?;
                sql.push_str(joiner);
                right.write_sql::<T>(sql, binds)?;
                sql.push(')');
            }
        }
        Ok(())
    }
}

/// One ordering key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub field: String,
    pub descending: bool,
}

impl SortKey {
    /// Parses `name` (ascending) or `-name` (descending).
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        match trimmed.strip_prefix('-') {
            Some(field) => Self {
                field: field.trim().to_string(),
                descending: true,
            },
            None => Self {
                field: trimmed.to_string(),
                descending: false,
            },
        }
    }
}

/// SQL plus bound parameters, ready for `params_from_iter`.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub sql: String,
    pub params: Vec<Value>,
}

pub struct Query<T: Entity> {
    predicate: Option<Predicate>,
    order: Vec<SortKey>,
    offset: i64,
    limit: i64,
    includes: Vec<Include<T>>,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> Query<T> {
    pub fn new() -> Self {
        Self {
            predicate: None,
            order: Vec::new(),
            offset: 0,
            limit: 0,
            includes: Vec::new(),
            _entity: PhantomData,
        }
    }

    /// ORs `predicate` into the filter; the first call just sets it.
    pub fn or(mut self, predicate: Predicate) -> Self {
        self.predicate = Some(match self.predicate.take() {
            Some(existing) => existing.or(predicate),
            None => predicate,
        });
        self
    }

    /// ANDs `predicate` into the filter; the first call just sets it.
    pub fn and(mut self, predicate: Predicate) -> Self {
        self.predicate = Some(match self.predicate.take() {
            Some(existing) => existing.and(predicate),
            None => predicate,
        });
        self
    }

    /// Appends comma-separated sort keys such as `"last_name,-date_of_birth"`.
    pub fn order_by(mut self, keys: &str) -> Self {
        self.order.extend(
            keys.split(',')
                .filter(|part| !part.trim().is_empty())
                .map(SortKey::parse),
        );
        self
    }

    pub fn sort(mut self, field: impl Into<String>, descending: bool) -> Self {
        self.order.push(SortKey {
            field: field.into(),
            descending,
        });
        self
    }

    /// Page `offset` (zero-based page index) of `limit` rows.
    pub fn page(mut self, offset: i64, limit: i64) -> Self {
        self.offset = offset;
        self.limit = limit;
        self
    }

    pub fn include(mut self, include: Include<T>) -> Self {
        if !self.includes.contains(&include) {
            self.includes.push(include);
        }
        self
    }

    pub fn predicate(&self) -> Option<&Predicate> {
        self.predicate.as_ref()
    }

    pub fn order(&self) -> &[SortKey] {
        &self.order
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    pub fn limit(&self) -> i64 {
        self.limit
    }

    pub fn includes(&self) -> &[Include<T>] {
        &self.includes
    }

    /// Row-selecting SQL with ordering and paging applied.
    pub fn compile(&self) -> StoreResult<CompiledQuery> {
        let mut sql = select_sql::<T>();
        let mut params = Vec::new();
        self.push_where(&mut sql, &mut params)?;

        let keys: Vec<SortKey> = if !self.order.is_empty() {
            self.order.clone()
        } else if self.offset > 0 || self.limit > 0 {
            vec![SortKey {
                field: ID_COLUMN.to_string(),
                descending: true,
            }]
        } else {
            Vec::new()
        };
        if !keys.is_empty() {
            let mut terms = Vec::with_capacity(keys.len());
            for key in &keys {
                let direction = if key.descending { "DESC" } else { "ASC" };
                terms.push(format!("{} {direction}", column::<T>(&key.field)?));
            }
            sql.push_str(" ORDER BY ");
            sql.push_str(&terms.join(", "));
        }

        if self.limit > 0 {
            sql.push_str(" LIMIT ?");
            params.push(Value::Integer(self.limit));
            let skip = self.offset.max(0).saturating_mul(self.limit);
            if skip > 0 {
                sql.push_str(" OFFSET ?");
                params.push(Value::Integer(skip));
            }
        }

        Ok(CompiledQuery { sql, params })
    }

    /// `COUNT(*)` over the filter, ignoring ordering and paging.
    pub fn compile_count(&self) -> StoreResult<CompiledQuery> {
        let mut sql = format!("SELECT COUNT(*) FROM {}", T::TABLE);
        let mut params = Vec::new();
        self.push_where(&mut sql, &mut params)?;
        Ok(CompiledQuery { sql, params })
    }

    fn push_where(&self, sql: &mut String, params: &mut Vec<Value>) -> StoreResult<()> {
        if let Some(predicate) = &self.predicate {
            sql.push_str(" WHERE ");
            predicate.write_sql::<T>(sql, params)?;
        }
        Ok(())
    }
}

impl<T: Entity> Default for Query<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Entity> Clone for Query<T> {
    fn clone(&self) -> Self {
        Self {
            predicate: self.predicate.clone(),
            order: self.order.clone(),
            offset: self.offset,
            limit: self.limit,
            includes: self.includes.clone(),
            _entity: PhantomData,
        }
    }
}

impl<T: Entity> fmt::Debug for Query<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("entity", &T::ENTITY_NAME)
            .field("predicate", &self.predicate)
            .field("order", &self.order)
            .field("offset", &self.offset)
            .field("limit", &self.limit)
            .field("includes", &self.includes)
            .finish()
    }
}

/// One page of results plus the total number of matching rows.
#[derive(Debug, Clone)]
pub struct Paged<T: Entity> {
    pub items: Vec<EntityRef<T>>,
    pub total_results: u64,
}

/// `SELECT id, <fields> FROM <table>`.
pub(crate) fn select_sql<T: Entity>() -> String {
    let mut columns = vec![ID_COLUMN];
    columns.extend(T::FIELDS.iter().map(|field| field.name));
    format!("SELECT {} FROM {}", columns.join(", "), T::TABLE)
}

fn column<'a, T: Entity>(field: &'a str) -> StoreResult<&'a str> {
    if field == ID_COLUMN || T::field(field).is_some() {
        Ok(field)
    } else {
        Err(StoreError::UnknownField {
            entity: T::ENTITY_NAME,
            field: field.to_string(),
        })
    }
}
