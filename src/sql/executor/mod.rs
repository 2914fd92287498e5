use crate::{
    error::Result,
    sql::{
        engine::Transaction,
        executor::{
            agg::Aggregate,
            cte::With,
            expression::Scope,
            join::NestedLoopJoin,
            mutation::{Delete, Insert, Update},
            query::{
                Distinct, Filter, Limit, Nothing, Offset, Order, Projection, Scan, SubqueryScan,
                Values,
            },
            schema::{AlterTable, CreateTable, CreateTableAs, CreateTrigger, DropTable, DropTrigger},
            set::SetOperation,
        },
        plan::Node,
        types::{ColumnRef, Row},
    },
};

pub mod agg;
mod cte;
pub mod expression;
pub mod function;
mod join;
mod mutation;
mod query;
mod schema;
mod set;
mod trigger;

/// SQL executor trait
pub trait Executor<T: Transaction> {
    /// Runs the executor; `outer` is the enclosing row of a correlated
    /// subquery or the OLD/NEW pseudo-rows of a trigger body
    fn execute(self: Box<Self>, txn: &mut T, outer: Option<&Scope<'_>>) -> Result<ResultSet>;
}

/// Builds an executor from a plan node
///
/// The `'static` bound is required for trait object usage in recursive executor building.
impl<T: Transaction + 'static> dyn Executor<T> {
    pub fn build(node: Node) -> Box<dyn Executor<T>> {
        match node {
            Node::CreateTable {
                schema,
                if_not_exists,
            } => CreateTable::new(schema, if_not_exists),
            Node::CreateTableAs {
                table_name,
                if_not_exists,
                source,
            } => CreateTableAs::new(table_name, if_not_exists, *source),
            Node::DropTable {
                table_name,
                if_exists,
            } => DropTable::new(table_name, if_exists),
            Node::AlterTable {
                table_name,
                operation,
            } => AlterTable::new(table_name, operation),
            Node::CreateTrigger {
                trigger,
                if_not_exists,
            } => CreateTrigger::new(trigger, if_not_exists),
            Node::DropTrigger { name, if_exists } => DropTrigger::new(name, if_exists),
            Node::Insert {
                table_name,
                columns,
                source,
                conflict,
            } => Insert::new(table_name, columns, Self::build(*source), conflict),
            Node::Update {
                table_name,
                columns,
                predicate,
            } => Update::new(table_name, columns, predicate),
            Node::Delete {
                table_name,
                predicate,
            } => Delete::new(table_name, predicate),
            Node::Values { rows } => Values::new(rows),
            Node::Nothing => Nothing::new(),
            Node::Scan { table_name, alias } => Scan::new(table_name, alias),
            Node::SubqueryScan { source, alias } => SubqueryScan::new(Self::build(*source), alias),
            Node::NestedLoopJoin {
                left,
                right,
                predicate,
                join_type,
            } => NestedLoopJoin::new(Self::build(*left), Self::build(*right), predicate, join_type),
            Node::Filter { source, predicate } => Filter::new(Self::build(*source), predicate),
            Node::Aggregate {
                source,
                group_by,
                aggregates,
            } => Aggregate::new(Self::build(*source), group_by, aggregates),
            Node::Projection {
                source,
                items,
                order_by,
            } => Projection::new(Self::build(*source), items, order_by),
            Node::Order { source, directions } => Order::new(Self::build(*source), directions),
            Node::Distinct { source } => Distinct::new(Self::build(*source)),
            Node::Offset { source, offset } => Offset::new(Self::build(*source), offset),
            Node::Limit { source, limit } => Limit::new(Self::build(*source), limit),
            Node::SetOperation {
                op,
                all,
                left,
                right,
            } => SetOperation::new(op, all, Self::build(*left), Self::build(*right)),
            Node::With { ctes, source } => With::new(ctes, *source),
        }
    }
}

/// Execution result set
#[derive(Debug, PartialEq)]
pub enum ResultSet {
    CreateTable { table_name: String },
    DropTable { table_name: String },
    AlterTable { table_name: String },
    CreateTrigger { name: String },
    DropTrigger { name: String },
    Insert { count: u64 },
    Update { count: u64 },
    Delete { count: u64 },
    Scan { columns: Vec<ColumnRef>, rows: Vec<Row> },
}

impl ResultSet {
    /// Rows written by a data-modifying statement
    pub fn changes(&self) -> u64 {
        match self {
            ResultSet::Insert { count }
            | ResultSet::Update { count }
            | ResultSet::Delete { count } => *count,
            _ => 0,
        }
    }
}

/// Display names of result columns: the bare name, qualified as
/// `table.column` only where the bare name is ambiguous
pub fn output_names(columns: &[ColumnRef]) -> Vec<String> {
    columns
        .iter()
        .map(|column| {
            let ambiguous = column.table.is_some()
                && columns
                    .iter()
                    .filter(|c| c.table.is_some() && c.name == column.name)
                    .count()
                    > 1;
            if ambiguous {
                column.to_string()
            } else {
                column.name.clone()
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::output_names;
    use crate::sql::types::ColumnRef;

    #[test]
    fn test_output_names_qualify_ambiguous_columns() {
        let columns = vec![
            ColumnRef::new(Some("u".to_string()), "id"),
            ColumnRef::new(Some("u".to_string()), "name"),
            ColumnRef::new(Some("o".to_string()), "id"),
            ColumnRef::bare("total"),
        ];
        assert_eq!(output_names(&columns), vec!["u.id", "name", "o.id", "total"]);
    }
}
