use crate::{
    error::Result,
    sql::{
        engine::Transaction,
        executor::{Executor, ResultSet, expression::Scope},
        parser::ast::{self, Expression, JoinType, OrderDirection, SetOperator},
        schema::{self, Table, Trigger},
    },
};

mod planner;

pub use planner::Planner;

/// Execution plan node
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    CreateTable {
        schema: Table,
        if_not_exists: bool,
    },
    CreateTableAs {
        table_name: String,
        if_not_exists: bool,
        source: Box<Node>,
    },
    DropTable {
        table_name: String,
        if_exists: bool,
    },
    AlterTable {
        table_name: String,
        operation: AlterOperation,
    },
    CreateTrigger {
        trigger: Trigger,
        if_not_exists: bool,
    },
    DropTrigger {
        name: String,
        if_exists: bool,
    },
    Insert {
        table_name: String,
        columns: Option<Vec<String>>,
        source: Box<Node>,
        conflict: ConflictPolicy,
    },
    Update {
        table_name: String,
        columns: Vec<(String, Expression)>,
        predicate: Option<Expression>,
    },
    Delete {
        table_name: String,
        predicate: Option<Expression>,
    },
    /// Literal rows of `INSERT ... VALUES`
    Values {
        rows: Vec<Vec<Expression>>,
    },
    /// A single empty row, the source of a SELECT without FROM
    Nothing,
    /// Reads a table or a common table expression
    Scan {
        table_name: String,
        alias: Option<String>,
    },
    /// Derived table; requalifies the source columns with the alias
    SubqueryScan {
        source: Box<Node>,
        alias: String,
    },
    NestedLoopJoin {
        left: Box<Node>,
        right: Box<Node>,
        predicate: Option<Expression>,
        join_type: JoinType,
    },
    Filter {
        source: Box<Node>,
        predicate: Expression,
    },
    /// Appends one column per aggregate call (named `#aggN`) to the first
    /// row of each group
    Aggregate {
        source: Box<Node>,
        group_by: Vec<Expression>,
        aggregates: Vec<Expression>,
    },
    /// Evaluates the output columns, appending one hidden column per
    /// ORDER BY key
    Projection {
        source: Box<Node>,
        items: Vec<ProjectionItem>,
        order_by: Vec<Expression>,
    },
    /// Sorts on the hidden key columns, then drops them
    Order {
        source: Box<Node>,
        directions: Vec<OrderDirection>,
    },
    Distinct {
        source: Box<Node>,
    },
    Offset {
        source: Box<Node>,
        offset: Expression,
    },
    Limit {
        source: Box<Node>,
        limit: Expression,
    },
    SetOperation {
        op: SetOperator,
        all: bool,
        left: Box<Node>,
        right: Box<Node>,
    },
    /// Binds common table expressions for the duration of the source
    With {
        ctes: Vec<CtePlan>,
        source: Box<Node>,
    },
}

/// Output column of a projection
#[derive(Debug, Clone, PartialEq)]
pub enum ProjectionItem {
    Wildcard,
    QualifiedWildcard(String),
    Expr(Expression, String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum AlterOperation {
    AddColumn(schema::Column),
    RenameColumn { from: String, to: String },
    DropColumn(String),
    RenameTable(String),
}

/// Primary key conflict handling of an insert
#[derive(Debug, Clone, PartialEq)]
pub enum ConflictPolicy {
    Abort,
    Ignore,
    Replace,
    Update {
        columns: Vec<(String, Expression)>,
        predicate: Option<Expression>,
    },
}

/// A planned common table expression
#[derive(Debug, Clone, PartialEq)]
pub struct CtePlan {
    pub name: String,
    pub columns: Vec<String>,
    pub source: Box<Node>,
    /// Recursive member, re-run against the previous iteration's rows,
    /// and whether it was joined with UNION ALL
    pub recursive: Option<(Box<Node>, bool)>,
}

/// Execution plan
#[derive(Debug, PartialEq)]
pub struct Plan(pub Node);

impl Plan {
    pub fn build(stmt: ast::Statement) -> Result<Self> {
        Planner::new().build(stmt)
    }

    /// Plans a query appearing inside an expression
    pub fn build_query(query: ast::Query) -> Result<Self> {
        Ok(Plan(Planner::new().build_query(query)?))
    }

    /// Executes the plan with executors built from the plan tree
    pub fn execute<T: Transaction + 'static>(self, txn: &mut T) -> Result<ResultSet> {
        <dyn Executor<T>>::build(self.0).execute(txn, None)
    }

    /// Executes the plan with an enclosing row in scope (correlated
    /// subqueries and trigger bodies)
    pub fn execute_in<T: Transaction + 'static>(
        self,
        txn: &mut T,
        outer: Option<&Scope<'_>>,
    ) -> Result<ResultSet> {
        <dyn Executor<T>>::build(self.0).execute(txn, outer)
    }
}
