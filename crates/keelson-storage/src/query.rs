// SPDX-FileCopyrightText: 2026 Keelson Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Composable `SELECT` statements over entity metadata.
//!
//! ```ignore
//! let stmt = Select::entity::<User>()
//!     .join::<Address>()
//!     .filter(column::<User>("name").eq("sandy"))
//!     .filter(column::<Address>("email_address").eq("sandy@sqlalchemy.org"));
//! ```

use std::ops::Not;

use keelson_core::{KeelsonError, KeelsonResult, Value};

use crate::model::{Entity, EntityMeta};
use crate::params::Params;
use crate::statement::{Compiled, Executable, quote_ident};

/// A column of a mapped table.
#[derive(Debug, Clone, Copy)]
pub struct Column {
    meta: &'static EntityMeta,
    name: &'static str,
}

/// Column `name` of entity `E`. Checked against metadata when compiled.
pub fn column<E: Entity>(name: &'static str) -> Column {
    Column {
        meta: E::meta(),
        name,
    }
}

impl Column {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn table(&self) -> &'static str {
        self.meta.table
    }

    fn compare(self, op: CompareOp, value: impl Into<Value>) -> Expr {
        Expr::Compare {
            column: self,
            op,
            value: value.into(),
        }
    }

    pub fn eq(self, value: impl Into<Value>) -> Expr {
        self.compare(CompareOp::Eq, value)
    }

    pub fn ne(self, value: impl Into<Value>) -> Expr {
        self.compare(CompareOp::Ne, value)
    }

    pub fn gt(self, value: impl Into<Value>) -> Expr {
        self.compare(CompareOp::Gt, value)
    }

    pub fn ge(self, value: impl Into<Value>) -> Expr {
        self.compare(CompareOp::Ge, value)
    }

    pub fn lt(self, value: impl Into<Value>) -> Expr {
        self.compare(CompareOp::Lt, value)
    }

    pub fn le(self, value: impl Into<Value>) -> Expr {
        self.compare(CompareOp::Le, value)
    }

    pub fn like(self, pattern: impl Into<String>) -> Expr {
        Expr::Like {
            column: self,
            pattern: pattern.into(),
        }
    }

    pub fn in_<V: Into<Value>>(self, values: impl IntoIterator<Item = V>) -> Expr {
        Expr::In {
            column: self,
            values: values.into_iter().map(Into::into).collect(),
            negated: false,
        }
    }

    pub fn not_in<V: Into<Value>>(self, values: impl IntoIterator<Item = V>) -> Expr {
        Expr::In {
            column: self,
            values: values.into_iter().map(Into::into).collect(),
            negated: true,
        }
    }

    pub fn is_null(self) -> Expr {
        Expr::Null {
            column: self,
            negated: false,
        }
    }

    pub fn is_not_null(self) -> Expr {
        Expr::Null {
            column: self,
            negated: true,
        }
    }

    pub fn asc(self) -> Order {
        Order {
            column: self,
            descending: false,
        }
    }

    pub fn desc(self) -> Order {
        Order {
            column: self,
            descending: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl CompareOp {
    fn as_sql(self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "!=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
        }
    }
}

/// A boolean filter expression.
#[derive(Debug, Clone)]
pub enum Expr {
    Compare {
        column: Column,
        op: CompareOp,
        value: Value,
    },
    Like {
        column: Column,
        pattern: String,
    },
    In {
        column: Column,
        values: Vec<Value>,
        negated: bool,
    },
    Null {
        column: Column,
        negated: bool,
    },
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
}

impl Expr {
    pub fn and(self, other: Expr) -> Expr {
        match self {
            Expr::And(mut parts) => {
                parts.push(other);
                Expr::And(parts)
            }
            first => Expr::And(vec![first, other]),
        }
    }

    pub fn or(self, other: Expr) -> Expr {
        match self {
            Expr::Or(mut parts) => {
                parts.push(other);
                Expr::Or(parts)
            }
            first => Expr::Or(vec![first, other]),
        }
    }
}

impl Not for Expr {
    type Output = Expr;

    fn not(self) -> Expr {
        Expr::Not(Box::new(self))
    }
}

/// Every expression must hold.
pub fn and_(exprs: impl IntoIterator<Item = Expr>) -> Expr {
    Expr::And(exprs.into_iter().collect())
}

/// At least one expression must hold.
pub fn or_(exprs: impl IntoIterator<Item = Expr>) -> Expr {
    Expr::Or(exprs.into_iter().collect())
}

#[derive(Debug, Clone, Copy)]
pub struct Order {
    column: Column,
    descending: bool,
}

impl From<Column> for Order {
    fn from(column: Column) -> Self {
        column.asc()
    }
}

#[derive(Debug, Clone)]
enum Projection {
    Entity(&'static EntityMeta),
    Columns(Vec<Column>),
}

/// A `SELECT` over one entity type or a list of columns.
#[derive(Debug, Clone)]
pub struct Select {
    projection: Projection,
    joins: Vec<&'static EntityMeta>,
    filters: Vec<Expr>,
    order_by: Vec<Order>,
    limit: Option<u64>,
    offset: Option<u64>,
}

impl Select {
    /// Select whole rows of `E`, for `Session::scalars`.
    pub fn entity<E: Entity>() -> Self {
        Self::with_projection(Projection::Entity(E::meta()))
    }

    pub fn columns(columns: impl IntoIterator<Item = Column>) -> Self {
        Self::with_projection(Projection::Columns(columns.into_iter().collect()))
    }

    fn with_projection(projection: Projection) -> Self {
        Self {
            projection,
            joins: Vec::new(),
            filters: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    /// Join `E` along the foreign key linking it to a table already selected.
    pub fn join<E: Entity>(mut self) -> Self {
        self.joins.push(E::meta());
        self
    }

    /// Add a `WHERE` condition. Repeated filters are combined with `AND`.
    pub fn filter(mut self, expr: Expr) -> Self {
        self.filters.push(expr);
        self
    }

    /// Equality filter on a column of the primary entity.
    pub fn filter_by(self, name: &'static str, value: impl Into<Value>) -> Self {
        match self.primary() {
            Some(meta) => {
                let expr = Column { meta, name }.eq(value);
                self.filter(expr)
            }
            None => self,
        }
    }

    pub fn order_by(mut self, order: impl Into<Order>) -> Self {
        self.order_by.push(order.into());
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

    /// Entity selected by [`Select::entity`], if any.
    pub fn entity_meta(&self) -> Option<&'static EntityMeta> {
        match self.projection {
            Projection::Entity(meta) => Some(meta),
            Projection::Columns(_) => None,
        }
    }

    fn primary(&self) -> Option<&'static EntityMeta> {
        match &self.projection {
            Projection::Entity(meta) => Some(meta),
            Projection::Columns(columns) => columns.first().map(|c| c.meta),
        }
    }
}

impl Executable for Select {
    fn compile(&self) -> KeelsonResult<Compiled> {
        let primary = self.primary().ok_or_else(|| {
            KeelsonError::InvalidArgument("a select needs at least one column".to_string())
        })?;
        let mut compiler = Compiler {
            from: vec![primary],
            sql: String::from("SELECT "),
            params: Params::new(),
        };

        let mut join_clauses = Vec::with_capacity(self.joins.len());
        for target in &self.joins {
            join_clauses.push(compiler.join_clause(target)?);
        }

        match &self.projection {
            Projection::Entity(meta) => {
                let list: Vec<String> = meta
                    .column_names()
                    .into_iter()
                    .map(|name| qualified(meta.table, name))
                    .collect();
                compiler.sql.push_str(&list.join(", "));
            }
            Projection::Columns(columns) => {
                for (i, column) in columns.iter().enumerate() {
                    let rendered = compiler.column(column)?;
                    if i > 0 {
                        compiler.sql.push_str(", ");
                    }
                    compiler.sql.push_str(&rendered);
                }
            }
        }

        compiler.sql.push_str(" FROM ");
        compiler.sql.push_str(&quote_ident(primary.table));
        for clause in join_clauses {
            compiler.sql.push_str(&clause);
        }

        if !self.filters.is_empty() {
            let mut parts = Vec::with_capacity(self.filters.len());
            for expr in &self.filters {
                parts.push(compiler.expr(expr)?);
            }
            compiler.sql.push_str(" WHERE ");
            compiler.sql.push_str(&parts.join(" AND "));
        }

        if !self.order_by.is_empty() {
            let mut parts = Vec::with_capacity(self.order_by.len());
            for order in &self.order_by {
                let column = compiler.column(&order.column)?;
                parts.push(if order.descending {
                    format!("{column} DESC")
                } else {
                    column
                });
            }
            compiler.sql.push_str(" ORDER BY ");
            compiler.sql.push_str(&parts.join(", "));
        }

        let paging = match (self.limit, self.offset) {
            (Some(limit), Some(offset)) => format!(" LIMIT {limit} OFFSET {offset}"),
            (Some(limit), None) => format!(" LIMIT {limit}"),
            (None, Some(offset)) => format!(" LIMIT -1 OFFSET {offset}"),
            (None, None) => String::new(),
        };
        compiler.sql.push_str(&paging);

        Ok(Compiled {
            sql: compiler.sql,
            params: compiler.params,
        })
    }
}

fn join_condition(joined: &EntityMeta, target: &EntityMeta) -> Option<String> {
    let references = |from: &EntityMeta, to: &EntityMeta| {
        from.columns
            .iter()
            .find(|c| c.references.is_some_and(|fk| fk.table == to.table))
    };
    if let Some(fk) = references(target, joined) {
        return Some(format!(
            "{} = {}",
            qualified(target.table, fk.name),
            qualified(joined.table, joined.primary_key)
        ));
    }
    references(joined, target).map(|fk| {
        format!(
            "{} = {}",
            qualified(target.table, target.primary_key),
            qualified(joined.table, fk.name)
        )
    })
}

fn qualified(table: &str, column: &str) -> String {
    format!("{}.{}", quote_ident(table), quote_ident(column))
}

struct Compiler {
    from: Vec<&'static EntityMeta>,
    sql: String,
    params: Params,
}

impl Compiler {
    fn bind(&mut self, value: &Value) -> String {
        let name = format!("p{}", self.params.len() + 1);
        self.params.insert(name.clone(), value.clone());
        format!(":{name}")
    }

    fn column(&self, column: &Column) -> KeelsonResult<String> {
        if !column.meta.has_column(column.name) {
            return Err(KeelsonError::InvalidArgument(format!(
                "{} has no column `{}`",
                column.meta.name, column.name
            )));
        }
        if !self.from.iter().any(|meta| meta.is(column.meta)) {
            return Err(KeelsonError::InvalidArgument(format!(
                "column {}.{} is not part of the FROM clause, join {} first",
                column.meta.table, column.name, column.meta.name
            )));
        }
        Ok(qualified(column.meta.table, column.name))
    }

    /// `JOIN` clause linking `target` to a table already in the FROM list.
    fn join_clause(&mut self, target: &'static EntityMeta) -> KeelsonResult<String> {
        let on = self
            .from
            .iter()
            .find_map(|joined| join_condition(joined, target))
            .ok_or_else(|| {
                KeelsonError::InvalidArgument(format!(
                    "no foreign key links {} to the selected tables",
                    target.name
                ))
            })?;
        self.from.push(target);
        Ok(format!(" JOIN {} ON {on}", quote_ident(target.table)))
    }

    fn expr(&mut self, expr: &Expr) -> KeelsonResult<String> {
        Ok(match expr {
            Expr::Compare { column, op, value } => {
                let col = self.column(column)?;
                match (op, value) {
                    (CompareOp::Eq, Value::Null) => format!("{col} IS NULL"),
                    (CompareOp::Ne, Value::Null) => format!("{col} IS NOT NULL"),
                    _ => {
                        let placeholder = self.bind(value);
                        format!("{col} {} {placeholder}", op.as_sql())
                    }
                }
            }
            Expr::Like { column, pattern } => {
                let col = self.column(column)?;
                let placeholder = self.bind(&Value::Text(pattern.clone()));
                format!("{col} LIKE {placeholder}")
            }
            Expr::In {
                column,
                values,
                negated,
            } => {
                let col = self.column(column)?;
                if values.is_empty() {
                    return Ok(if *negated { "1 = 1" } else { "1 != 1" }.to_string());
                }
                let placeholders: Vec<String> = values.iter().map(|v| self.bind(v)).collect();
                let keyword = if *negated { "NOT IN" } else { "IN" };
                format!("{col} {keyword} ({})", placeholders.join(", "))
            }
            Expr::Null { column, negated } => {
                let col = self.column(column)?;
                if *negated {
                    format!("{col} IS NOT NULL")
                } else {
                    format!("{col} IS NULL")
                }
            }
            Expr::And(parts) => self.group(parts, " AND ", "1 = 1")?,
            Expr::Or(parts) => self.group(parts, " OR ", "1 != 1")?,
            Expr::Not(inner) => format!("NOT ({})", self.expr(inner)?),
        })
    }

    fn group(&mut self, parts: &[Expr], joiner: &str, empty: &str) -> KeelsonResult<String> {
        if parts.is_empty() {
            return Ok(empty.to_string());
        }
        let mut rendered = Vec::with_capacity(parts.len());
        for part in parts {
            rendered.push(self.expr(part)?);
        }
        Ok(format!("({})", rendered.join(joiner)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::{Child, Parent};

    #[test]
    fn entity_select_lists_every_column() {
        let compiled = Select::entity::<Parent>().compile().unwrap();
        assert_eq!(
            compiled.sql,
            r#"SELECT "parent"."id", "parent"."name" FROM "parent""#
        );
        assert!(compiled.params.is_empty());
    }

    #[test]
    fn filters_bind_numbered_parameters() {
        let compiled = Select::entity::<Parent>()
            .filter(column::<Parent>("name").in_(["a", "b"]))
            .filter_by("id", 3)
            .compile()
            .unwrap();
        assert!(compiled.sql.ends_with(
            r#"WHERE "parent"."name" IN (:p1, :p2) AND "parent"."id" = :p3"#
        ));
        assert_eq!(compiled.params.get("p3"), Some(&Value::Integer(3)));
    }

    #[test]
    fn join_follows_the_foreign_key_both_ways() {
        let down = Select::entity::<Parent>().join::<Child>().compile().unwrap();
        assert!(down.sql.contains(r#"JOIN "child" ON "child"."parent_id" = "parent"."id""#));

        let up = Select::entity::<Child>().join::<Parent>().compile().unwrap();
        assert!(up.sql.contains(r#"JOIN "parent" ON "parent"."id" = "child"."parent_id""#));
    }

    #[test]
    fn unknown_or_unjoined_columns_are_rejected() {
        let err = Select::entity::<Parent>()
            .filter(column::<Parent>("email").eq(1))
            .compile()
            .unwrap_err();
        assert!(matches!(err, KeelsonError::InvalidArgument(ref m) if m.contains("email")));

        let err = Select::entity::<Parent>()
            .filter(column::<Child>("label").eq("x"))
            .compile()
            .unwrap_err();
        assert!(matches!(err, KeelsonError::InvalidArgument(ref m) if m.contains("FROM")));
    }

    #[test]
    fn boolean_composition_and_null_comparisons() {
        let name = column::<Parent>("name");
        let expr = name.eq("a").or(name.like("b%")).and(!column::<Parent>("id").eq(Value::Null));
        let compiled = Select::entity::<Parent>().filter(expr).compile().unwrap();
        assert!(compiled.sql.contains(
            r#"(("parent"."name" = :p1 OR "parent"."name" LIKE :p2) AND NOT ("parent"."id" IS NULL))"#
        ));
    }

    #[test]
    fn empty_in_list_matches_nothing() {
        let compiled = Select::entity::<Parent>()
            .filter(column::<Parent>("id").in_(Vec::<i64>::new()))
            .compile()
            .unwrap();
        assert!(compiled.sql.ends_with("WHERE 1 != 1"));
    }

    #[test]
    fn column_projection_with_order_and_paging() {
        let compiled = Select::columns([column::<Parent>("name")])
            .order_by(column::<Parent>("id").desc())
            .limit(2)
            .offset(1)
            .compile()
            .unwrap();
        assert_eq!(
            compiled.sql,
            r#"SELECT "parent"."name" FROM "parent" ORDER BY "parent"."id" DESC LIMIT 2 OFFSET 1"#
        );
        assert!(Select::columns([]).compile().is_err());
    }
}
