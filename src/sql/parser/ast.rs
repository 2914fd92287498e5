use std::{collections::BTreeMap, fmt::Display};

use crate::sql::{
    schema::{TriggerEvent, TriggerTiming},
    types::{DataType, Value},
};

/// Abstract Syntax Tree (AST) node definitions for SQL statements
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// CREATE TABLE statement
    CreateTable {
        name: String,
        if_not_exists: bool,
        columns: Vec<Column>,
    },
    /// CREATE TABLE ... AS SELECT
    CreateTableAs {
        name: String,
        if_not_exists: bool,
        query: Query,
    },
    DropTable {
        name: String,
        if_exists: bool,
    },
    AlterTable {
        name: String,
        operation: AlterTableOperation,
    },
    /// CREATE TRIGGER; the WHEN clause and body are kept as SQL text
    CreateTrigger {
        name: String,
        if_not_exists: bool,
        timing: TriggerTiming,
        event: TriggerEvent,
        table_name: String,
        when: Option<String>,
        body: Vec<String>,
    },
    DropTrigger {
        name: String,
        if_exists: bool,
    },
    /// INSERT statement
    Insert {
        table_name: String,
        columns: Option<Vec<String>>,
        source: InsertSource,
        conflict: OnConflict,
    },
    /// UPDATE statement
    Update {
        table_name: String,
        columns: BTreeMap<String, Expression>,
        where_clause: Option<Expression>,
    },
    /// DELETE statement
    Delete {
        table_name: String,
        where_clause: Option<Expression>,
    },
    /// SELECT statement (possibly compound, possibly with CTEs)
    Select(Query),
    /// WITH clause in front of a data-modifying statement
    With {
        ctes: Vec<Cte>,
        statement: Box<Statement>,
    },
}

impl Statement {
    /// Whether executing the statement can never modify the catalog
    pub fn is_read_only(&self) -> bool {
        matches!(self, Statement::Select(_))
    }
}

/// ALTER TABLE operations
#[derive(Debug, Clone, PartialEq)]
pub enum AlterTableOperation {
    AddColumn(Column),
    RenameColumn { from: String, to: String },
    DropColumn(String),
    RenameTable(String),
}

/// Row source of an INSERT
#[derive(Debug, Clone, PartialEq)]
pub enum InsertSource {
    Values(Vec<Vec<Expression>>),
    Query(Box<Query>),
}

/// Primary key conflict policy of an INSERT
#[derive(Debug, Clone, PartialEq, Default)]
pub enum OnConflict {
    #[default]
    Abort,
    Ignore,
    Replace,
    /// ON CONFLICT DO UPDATE SET ... [WHERE ...]
    Update {
        columns: BTreeMap<String, Expression>,
        where_clause: Option<Expression>,
    },
}

/// A full query: optional CTEs, a (compound) body, ordering and limits
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub ctes: Vec<Cte>,
    pub body: SetExpr,
    pub order_by: Vec<(Expression, OrderDirection)>,
    pub limit: Option<Expression>,
    pub offset: Option<Expression>,
}

impl Query {
    /// Whether any FROM clause or subquery in the query reads `table`
    pub fn references(&self, table: &str) -> bool {
        self.ctes.iter().any(|c| c.query.references(table))
            || self.body.references(table)
            || self.order_by.iter().any(|(e, _)| e.references(table))
    }
}

/// Common table expression: `name [(columns)] AS (query)`
#[derive(Debug, Clone, PartialEq)]
pub struct Cte {
    pub name: String,
    pub columns: Vec<String>,
    pub query: Query,
}

/// Body of a query: a single SELECT or a set operation over two bodies
#[derive(Debug, Clone, PartialEq)]
pub enum SetExpr {
    Select(Box<Select>),
    SetOperation {
        op: SetOperator,
        all: bool,
        left: Box<SetExpr>,
        right: Box<SetExpr>,
    },
}

impl SetExpr {
    pub fn references(&self, table: &str) -> bool {
        match self {
            SetExpr::Select(select) => select.references(table),
            SetExpr::SetOperation { left, right, .. } => {
                left.references(table) || right.references(table)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SetOperator {
    Union,
    Intersect,
    Except,
}

/// SELECT core (without ORDER BY / LIMIT)
#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    pub distinct: bool,
    pub projection: Vec<SelectItem>,
    pub from: Option<FromItem>,
    pub where_clause: Option<Expression>,
    pub group_by: Vec<Expression>,
    pub having: Option<Expression>,
}

impl Select {
    fn references(&self, table: &str) -> bool {
        let exprs = self
            .projection
            .iter()
            .filter_map(|item| match item {
                SelectItem::Expr(e, _) => Some(e),
                _ => None,
            })
            .chain(self.where_clause.iter())
            .chain(self.group_by.iter())
            .chain(self.having.iter());
        self.from.as_ref().is_some_and(|f| f.references(table))
            || exprs.into_iter().any(|e| e.references(table))
    }
}

/// SELECT list item
#[derive(Debug, Clone, PartialEq)]
pub enum SelectItem {
    /// `*`
    Wildcard,
    /// `t.*`
    QualifiedWildcard(String),
    /// Expression with optional alias (e.g., COUNT(*) AS cnt)
    Expr(Expression, Option<String>),
}

/// FROM clause item - represents a table or join expression
#[derive(Debug, Clone, PartialEq)]
pub enum FromItem {
    /// Single table reference
    Table { name: String, alias: Option<String> },
    /// Derived table `(SELECT ...) AS alias`
    Subquery { query: Box<Query>, alias: String },
    /// Join expression (two items joined together)
    Join {
        left: Box<FromItem>,
        right: Box<FromItem>,
        join_type: JoinType,
        /// Join ON condition (None for CROSS JOIN)
        predicate: Option<Expression>,
    },
}

impl FromItem {
    fn references(&self, table: &str) -> bool {
        match self {
            FromItem::Table { name, .. } => name == table,
            FromItem::Subquery { query, .. } => query.references(table),
            FromItem::Join {
                left,
                right,
                predicate,
                ..
            } => {
                left.references(table)
                    || right.references(table)
                    || predicate.as_ref().is_some_and(|p| p.references(table))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum JoinType {
    Cross,
    Inner,
    Left,
    Right,
}

/// Sort direction (ascending or descending)
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OrderDirection {
    Asc,
    Desc,
}

/// Column definition for CREATE TABLE / ADD COLUMN
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub datatype: DataType,
    pub nullable: Option<bool>,
    pub default: Option<Expression>,
    pub primary_key: bool,
}

/// Expression types (column refs, constants, operations, function calls, subqueries)
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// Column reference, optionally qualified by a table or alias
    Field(Option<String>, String),
    /// Constant value
    Consts(Consts),
    /// Unary and binary operations
    Operation(Operation),
    /// Function call; `COUNT(*)` has no arguments
    Function {
        name: String,
        args: Vec<Expression>,
        distinct: bool,
    },
    /// Scalar subquery
    Subquery(Box<Query>),
    Exists {
        query: Box<Query>,
        negated: bool,
    },
    InList {
        expr: Box<Expression>,
        list: Vec<Expression>,
        negated: bool,
    },
    InSubquery {
        expr: Box<Expression>,
        query: Box<Query>,
        negated: bool,
    },
    Between {
        expr: Box<Expression>,
        low: Box<Expression>,
        high: Box<Expression>,
        negated: bool,
    },
    Case {
        operand: Option<Box<Expression>>,
        branches: Vec<(Expression, Expression)>,
        else_result: Option<Box<Expression>>,
    },
    Cast {
        expr: Box<Expression>,
        datatype: DataType,
    },
}

impl Expression {
    /// Visits the expression tree depth-first, stopping early when the
    /// visitor returns false. Subquery bodies are not descended into.
    pub fn walk(&self, visitor: &mut impl FnMut(&Expression) -> bool) -> bool {
        if !visitor(self) {
            return false;
        }
        match self {
            Expression::Field(..) | Expression::Consts(_) => true,
            Expression::Subquery(_) | Expression::Exists { .. } => true,
            Expression::Operation(op) => op.operands().into_iter().all(|e| e.walk(visitor)),
            Expression::Function { args, .. } => args.iter().all(|e| e.walk(visitor)),
            Expression::InList { expr, list, .. } => {
                expr.walk(visitor) && list.iter().all(|e| e.walk(visitor))
            }
            Expression::InSubquery { expr, .. } => expr.walk(visitor),
            Expression::Between {
                expr, low, high, ..
            } => expr.walk(visitor) && low.walk(visitor) && high.walk(visitor),
            Expression::Case {
                operand,
                branches,
                else_result,
            } => {
                operand.as_ref().is_none_or(|e| e.walk(visitor))
                    && branches
                        .iter()
                        .all(|(w, t)| w.walk(visitor) && t.walk(visitor))
                    && else_result.as_ref().is_none_or(|e| e.walk(visitor))
            }
            Expression::Cast { expr, .. } => expr.walk(visitor),
        }
    }

    /// Rebuilds the expression bottom-up, letting `f` replace any node.
    /// Subquery bodies are left untouched.
    pub fn transform(self, f: &mut impl FnMut(Expression) -> Expression) -> Expression {
        let node = match self {
            Expression::Operation(op) => Expression::Operation(op.map(&mut |e| e.transform(f))),
            Expression::Function {
                name,
                args,
                distinct,
            } => Expression::Function {
                name,
                args: args.into_iter().map(|e| e.transform(f)).collect(),
                distinct,
            },
            Expression::InList {
                expr,
                list,
                negated,
            } => Expression::InList {
                expr: Box::new(expr.transform(f)),
                list: list.into_iter().map(|e| e.transform(f)).collect(),
                negated,
            },
            Expression::InSubquery {
                expr,
                query,
                negated,
            } => Expression::InSubquery {
                expr: Box::new(expr.transform(f)),
                query,
                negated,
            },
            Expression::Between {
                expr,
                low,
                high,
                negated,
            } => Expression::Between {
                expr: Box::new(expr.transform(f)),
                low: Box::new(low.transform(f)),
                high: Box::new(high.transform(f)),
                negated,
            },
            Expression::Case {
                operand,
                branches,
                else_result,
            } => Expression::Case {
                operand: operand.map(|e| Box::new(e.transform(f))),
                branches: branches
                    .into_iter()
                    .map(|(w, t)| (w.transform(f), t.transform(f)))
                    .collect(),
                else_result: else_result.map(|e| Box::new(e.transform(f))),
            },
            Expression::Cast { expr, datatype } => Expression::Cast {
                expr: Box::new(expr.transform(f)),
                datatype,
            },
            e => e,
        };
        f(node)
    }

    /// Whether a subquery anywhere in the expression reads `table`
    fn references(&self, table: &str) -> bool {
        let mut found = false;
        self.walk(&mut |e| {
            found = match e {
                Expression::Subquery(q)
                | Expression::Exists { query: q, .. }
                | Expression::InSubquery { query: q, .. } => q.references(table),
                _ => false,
            };
            !found
        });
        found
    }
}

/// Implements From trait to convert Consts into Expression
impl From<Consts> for Expression {
    fn from(value: Consts) -> Self {
        Self::Consts(value)
    }
}

impl From<Operation> for Expression {
    fn from(value: Operation) -> Self {
        Self::Operation(value)
    }
}

/// Constant values in SQL expressions
#[derive(Debug, PartialEq, Clone)]
pub enum Consts {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl From<Value> for Consts {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Consts::Null,
            Value::Boolean(b) => Consts::Boolean(b),
            Value::Integer(i) => Consts::Integer(i),
            Value::Float(f) => Consts::Float(f),
            Value::String(s) => Consts::String(s),
        }
    }
}

/// Unary and binary operations
#[derive(Debug, PartialEq, Clone)]
pub enum Operation {
    And(Box<Expression>, Box<Expression>),
    Or(Box<Expression>, Box<Expression>),
    Not(Box<Expression>),
    Equal(Box<Expression>, Box<Expression>),
    NotEqual(Box<Expression>, Box<Expression>),
    GreaterThan(Box<Expression>, Box<Expression>),
    GreaterThanOrEqual(Box<Expression>, Box<Expression>),
    LessThan(Box<Expression>, Box<Expression>),
    LessThanOrEqual(Box<Expression>, Box<Expression>),
    /// `a IS b` / `a IS NOT b`: NULL-aware equality
    Is(Box<Expression>, Box<Expression>, bool),
    /// `a IS NULL` / `a IS NOT NULL`
    IsNull(Box<Expression>, bool),
    /// `a LIKE b` / `a NOT LIKE b`
    Like(Box<Expression>, Box<Expression>, bool),
    Add(Box<Expression>, Box<Expression>),
    Subtract(Box<Expression>, Box<Expression>),
    Multiply(Box<Expression>, Box<Expression>),
    Divide(Box<Expression>, Box<Expression>),
    Modulo(Box<Expression>, Box<Expression>),
    Concat(Box<Expression>, Box<Expression>),
    Negate(Box<Expression>),
}

impl Operation {
    fn operands(&self) -> Vec<&Expression> {
        match self {
            Operation::Not(e) | Operation::Negate(e) | Operation::IsNull(e, _) => vec![&**e],
            Operation::And(l, r)
            | Operation::Or(l, r)
            | Operation::Equal(l, r)
            | Operation::NotEqual(l, r)
            | Operation::GreaterThan(l, r)
            | Operation::GreaterThanOrEqual(l, r)
            | Operation::LessThan(l, r)
            | Operation::LessThanOrEqual(l, r)
            | Operation::Is(l, r, _)
            | Operation::Like(l, r, _)
            | Operation::Add(l, r)
            | Operation::Subtract(l, r)
            | Operation::Multiply(l, r)
            | Operation::Divide(l, r)
            | Operation::Modulo(l, r)
            | Operation::Concat(l, r) => vec![&**l, &**r],
        }
    }

    fn map(self, f: &mut impl FnMut(Expression) -> Expression) -> Operation {
        let mut b = |e: Box<Expression>| Box::new(f(*e));
        match self {
            Operation::And(l, r) => Operation::And(b(l), b(r)),
            Operation::Or(l, r) => Operation::Or(b(l), b(r)),
            Operation::Not(e) => Operation::Not(b(e)),
            Operation::Equal(l, r) => Operation::Equal(b(l), b(r)),
            Operation::NotEqual(l, r) => Operation::NotEqual(b(l), b(r)),
            Operation::GreaterThan(l, r) => Operation::GreaterThan(b(l), b(r)),
            Operation::GreaterThanOrEqual(l, r) => Operation::GreaterThanOrEqual(b(l), b(r)),
            Operation::LessThan(l, r) => Operation::LessThan(b(l), b(r)),
            Operation::LessThanOrEqual(l, r) => Operation::LessThanOrEqual(b(l), b(r)),
            Operation::Is(l, r, n) => Operation::Is(b(l), b(r), n),
            Operation::IsNull(e, n) => Operation::IsNull(b(e), n),
            Operation::Like(l, r, n) => Operation::Like(b(l), b(r), n),
            Operation::Add(l, r) => Operation::Add(b(l), b(r)),
            Operation::Subtract(l, r) => Operation::Subtract(b(l), b(r)),
            Operation::Multiply(l, r) => Operation::Multiply(b(l), b(r)),
            Operation::Divide(l, r) => Operation::Divide(b(l), b(r)),
            Operation::Modulo(l, r) => Operation::Modulo(b(l), b(r)),
            Operation::Concat(l, r) => Operation::Concat(b(l), b(r)),
            Operation::Negate(e) => Operation::Negate(b(e)),
        }
    }
}

/// SQL rendering, used to name unaliased projection columns
impl Display for Expression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Expression::Field(Some(table), name) => write!(f, "{}.{}", table, name),
            Expression::Field(None, name) => f.write_str(name),
            Expression::Consts(Consts::String(s)) => write!(f, "'{}'", s.replace('\'', "''")),
            Expression::Consts(c) => write!(f, "{}", Value::from(c.clone())),
            Expression::Operation(op) => write!(f, "{}", op),
            Expression::Function {
                name,
                args,
                distinct,
            } => {
                write!(f, "{}(", name)?;
                if *distinct {
                    f.write_str("DISTINCT ")?;
                }
                if args.is_empty() {
                    f.write_str("*")?;
                }
                write_list(f, args)?;
                f.write_str(")")
            }
            Expression::Subquery(_) => f.write_str("(subquery)"),
            Expression::Exists { negated, .. } => {
                write!(f, "{}EXISTS (subquery)", if *negated { "NOT " } else { "" })
            }
            Expression::InList {
                expr,
                list,
                negated,
            } => {
                write!(f, "{} {}IN (", expr, if *negated { "NOT " } else { "" })?;
                write_list(f, list)?;
                f.write_str(")")
            }
            Expression::InSubquery { expr, negated, .. } => {
                write!(f, "{} {}IN (subquery)", expr, if *negated { "NOT " } else { "" })
            }
            Expression::Between {
                expr,
                low,
                high,
                negated,
            } => write!(
                f,
                "{} {}BETWEEN {} AND {}",
                expr,
                if *negated { "NOT " } else { "" },
                low,
                high
            ),
            Expression::Case {
                operand,
                branches,
                else_result,
            } => {
                f.write_str("CASE")?;
                if let Some(operand) = operand {
                    write!(f, " {}", operand)?;
                }
                for (when, then) in branches {
                    write!(f, " WHEN {} THEN {}", when, then)?;
                }
                if let Some(e) = else_result {
                    write!(f, " ELSE {}", e)?;
                }
                f.write_str(" END")
            }
            Expression::Cast { expr, datatype } => write!(f, "CAST({} AS {})", expr, datatype),
        }
    }
}

impl Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (l, op, r) = match self {
            Operation::Not(e) => return write!(f, "NOT {}", e),
            Operation::Negate(e) => return write!(f, "-{}", e),
            Operation::IsNull(e, negated) => {
                return write!(f, "{} IS {}NULL", e, if *negated { "NOT " } else { "" });
            }
            Operation::Is(l, r, negated) => (l, if *negated { "IS NOT" } else { "IS" }, r),
            Operation::Like(l, r, negated) => (l, if *negated { "NOT LIKE" } else { "LIKE" }, r),
            Operation::And(l, r) => (l, "AND", r),
            Operation::Or(l, r) => (l, "OR", r),
            Operation::Equal(l, r) => (l, "=", r),
            Operation::NotEqual(l, r) => (l, "!=", r),
            Operation::GreaterThan(l, r) => (l, ">", r),
            Operation::GreaterThanOrEqual(l, r) => (l, ">=", r),
            Operation::LessThan(l, r) => (l, "<", r),
            Operation::LessThanOrEqual(l, r) => (l, "<=", r),
            Operation::Add(l, r) => (l, "+", r),
            Operation::Subtract(l, r) => (l, "-", r),
            Operation::Multiply(l, r) => (l, "*", r),
            Operation::Divide(l, r) => (l, "/", r),
            Operation::Modulo(l, r) => (l, "%", r),
            Operation::Concat(l, r) => (l, "||", r),
        };
        write!(f, "{} {} {}", l, op, r)
    }
}

fn write_list(f: &mut std::fmt::Formatter<'_>, list: &[Expression]) -> std::fmt::Result {
    for (i, e) in list.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{}", e)?;
    }
    Ok(())
}
