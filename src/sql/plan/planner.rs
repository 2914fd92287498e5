use crate::{
    error::{Error, Result},
    sql::{
        executor::{agg::is_aggregate, function},
        parser::ast::{self, Expression, InsertSource, OnConflict, SelectItem, SetExpr, SetOperator},
        plan::{AlterOperation, ConflictPolicy, CtePlan, Node, Plan, ProjectionItem},
        schema::{self, Table, Trigger},
        types::Value,
    },
};

/// Query planner - converts AST into execution plan nodes
pub struct Planner;

impl Planner {
    pub fn new() -> Self {
        Self {}
    }

    /// Builds an execution plan from an AST statement
    pub fn build(&mut self, stmt: ast::Statement) -> Result<Plan> {
        Ok(Plan(self.build_statement(stmt)?))
    }

    pub fn build_statement(&self, stmt: ast::Statement) -> Result<Node> {
        Ok(match stmt {
            ast::Statement::CreateTable {
                name,
                if_not_exists,
                columns,
            } => Node::CreateTable {
                schema: Table {
                    columns: columns
                        .into_iter()
                        .map(|c| self.build_column(c))
                        .collect::<Result<_>>()?,
                    name,
                    triggers: Vec::new(),
                },
                if_not_exists,
            },
            ast::Statement::CreateTableAs {
                name,
                if_not_exists,
                query,
            } => Node::CreateTableAs {
                table_name: name,
                if_not_exists,
                source: Box::new(self.build_query(query)?),
            },
            ast::Statement::DropTable { name, if_exists } => Node::DropTable {
                table_name: name,
                if_exists,
            },
            ast::Statement::AlterTable { name, operation } => Node::AlterTable {
                table_name: name,
                operation: match operation {
                    ast::AlterTableOperation::AddColumn(c) => {
                        AlterOperation::AddColumn(self.build_column(c)?)
                    }
                    ast::AlterTableOperation::RenameColumn { from, to } => {
                        AlterOperation::RenameColumn { from, to }
                    }
                    ast::AlterTableOperation::DropColumn(c) => AlterOperation::DropColumn(c),
                    ast::AlterTableOperation::RenameTable(t) => AlterOperation::RenameTable(t),
                },
            },
            ast::Statement::CreateTrigger {
                name,
                if_not_exists,
                timing,
                event,
                table_name,
                when,
                body,
            } => Node::CreateTrigger {
                trigger: Trigger {
                    name,
                    table_name,
                    timing,
                    event,
                    when,
                    body,
                },
                if_not_exists,
            },
            ast::Statement::DropTrigger { name, if_exists } => {
                Node::DropTrigger { name, if_exists }
            }
            ast::Statement::Insert {
                table_name,
                columns,
                source,
                conflict,
            } => {
                let source = match source {
                    InsertSource::Values(rows) => {
                        for expr in rows.iter().flatten() {
                            self.check_expression(expr)?;
                        }
                        Node::Values { rows }
                    }
                    InsertSource::Query(query) => self.build_query(*query)?,
                };
                let conflict = match conflict {
                    OnConflict::Abort => ConflictPolicy::Abort,
                    OnConflict::Ignore => ConflictPolicy::Ignore,
                    OnConflict::Replace => ConflictPolicy::Replace,
                    OnConflict::Update {
                        columns,
                        where_clause,
                    } => {
                        for expr in columns.values().chain(where_clause.iter()) {
                            self.check_expression(expr)?;
                        }
                        ConflictPolicy::Update {
                            columns: columns.into_iter().collect(),
                            predicate: where_clause,
                        }
                    }
                };
                Node::Insert {
                    table_name,
                    columns,
                    source: Box::new(source),
                    conflict,
                }
            }
            ast::Statement::Update {
                table_name,
                columns,
                where_clause,
            } => {
                for expr in columns.values().chain(where_clause.iter()) {
                    self.check_expression(expr)?;
                }
                Node::Update {
                    table_name,
                    columns: columns.into_iter().collect(),
                    predicate: where_clause,
                }
            }
            ast::Statement::Delete {
                table_name,
                where_clause,
            } => {
                if let Some(expr) = &where_clause {
                    self.check_expression(expr)?;
                }
                Node::Delete {
                    table_name,
                    predicate: where_clause,
                }
            }
            ast::Statement::Select(query) => self.build_query(query)?,
            ast::Statement::With { ctes, statement } => Node::With {
                ctes: self.build_ctes(ctes)?,
                source: Box::new(self.build_statement(*statement)?),
            },
        })
    }

    fn build_column(&self, c: ast::Column) -> Result<schema::Column> {
        // A primary key is always NOT NULL
        let nullable = !c.primary_key && c.nullable.unwrap_or(true);
        let default = match c.default {
            Some(expr) => Some(Value::from_expression(expr)?),
            None => None,
        };
        Ok(schema::Column {
            name: c.name,
            datatype: c.datatype,
            nullable,
            default,
            primary_key: c.primary_key,
        })
    }

    /// Plans a query: body, then ORDER BY, OFFSET and LIMIT, wrapped in
    /// its common table expressions
    pub fn build_query(&self, query: ast::Query) -> Result<Node> {
        let ast::Query {
            ctes,
            body,
            order_by,
            limit,
            offset,
        } = query;
        let (keys, directions): (Vec<_>, Vec<_>) = order_by.into_iter().unzip();
        for key in &keys {
            self.check_expression(key)?;
        }

        let mut node = match body {
            SetExpr::Select(select) => self.build_select(*select, keys, directions)?,
            body => {
                let mut node = self.build_set_expr(body)?;
                if !keys.is_empty() {
                    node = Node::Order {
                        source: Box::new(Node::Projection {
                            source: Box::new(node),
                            items: vec![ProjectionItem::Wildcard],
                            order_by: keys,
                        }),
                        directions,
                    };
                }
                node
            }
        };

        // OFFSET - must be processed before LIMIT when both are present
        if let Some(offset) = offset {
            self.check_expression(&offset)?;
            node = Node::Offset {
                source: Box::new(node),
                offset,
            };
        }
        if let Some(limit) = limit {
            self.check_expression(&limit)?;
            node = Node::Limit {
                source: Box::new(node),
                limit,
            };
        }

        if !ctes.is_empty() {
            node = Node::With {
                ctes: self.build_ctes(ctes)?,
                source: Box::new(node),
            };
        }
        Ok(node)
    }

    fn build_set_expr(&self, body: SetExpr) -> Result<Node> {
        match body {
            SetExpr::Select(select) => self.build_select(*select, Vec::new(), Vec::new()),
            SetExpr::SetOperation {
                op,
                all,
                left,
                right,
            } => Ok(Node::SetOperation {
                op,
                all,
                left: Box::new(self.build_set_expr(*left)?),
                right: Box::new(self.build_set_expr(*right)?),
            }),
        }
    }

    /// A CTE of the form `anchor UNION [ALL] recursive`, where the recursive
    /// member reads the CTE itself, is evaluated as a fixpoint
    fn build_ctes(&self, ctes: Vec<ast::Cte>) -> Result<Vec<CtePlan>> {
        ctes.into_iter()
            .map(|ast::Cte { name, columns, query }| {
                Ok(match query {
                    ast::Query {
                        ctes,
                        body:
                            SetExpr::SetOperation {
                                op: SetOperator::Union,
                                all,
                                left,
                                right,
                            },
                        order_by,
                        limit: None,
                        offset: None,
                    } if ctes.is_empty() && order_by.is_empty() && right.references(&name) => {
                        CtePlan {
                            source: Box::new(self.build_set_expr(*left)?),
                            recursive: Some((Box::new(self.build_set_expr(*right)?), all)),
                            name,
                            columns,
                        }
                    }
                    query => CtePlan {
                        source: Box::new(self.build_query(query)?),
                        recursive: None,
                        name,
                        columns,
                    },
                })
            })
            .collect()
    }

    fn build_select(
        &self,
        select: ast::Select,
        mut keys: Vec<Expression>,
        directions: Vec<ast::OrderDirection>,
    ) -> Result<Node> {
        let ast::Select {
            distinct,
            projection,
            from,
            where_clause,
            group_by,
            mut having,
        } = select;

        let mut node = match from {
            Some(from) => self.build_from_item(from)?,
            None => Node::Nothing,
        };

        if let Some(predicate) = where_clause {
            self.check_expression(&predicate)?;
            node = Node::Filter {
                source: Box::new(node),
                predicate,
            };
        }

        // Output names are taken before aggregate calls are rewritten
        let mut items = Vec::with_capacity(projection.len());
        let mut qualifiers = Vec::with_capacity(projection.len());
        for item in projection {
            qualifiers.push(match &item {
                SelectItem::Expr(Expression::Field(Some(table), _), None) => Some(table.clone()),
                _ => None,
            });
            items.push(match item {
                SelectItem::Wildcard => ProjectionItem::Wildcard,
                SelectItem::QualifiedWildcard(table) => ProjectionItem::QualifiedWildcard(table),
                SelectItem::Expr(expr, alias) => {
                    self.check_expression(&expr)?;
                    let name = alias.unwrap_or_else(|| output_name(&expr));
                    ProjectionItem::Expr(expr, name)
                }
            });
        }
        qualify_repeated_names(&mut items, &qualifiers);
        for expr in group_by.iter().chain(having.iter()) {
            self.check_expression(expr)?;
        }

        let aggregated = !group_by.is_empty()
            || having.as_ref().is_some_and(contains_aggregate)
            || keys.iter().any(contains_aggregate)
            || items.iter().any(|item| match item {
                ProjectionItem::Expr(expr, _) => contains_aggregate(expr),
                _ => false,
            });

        if aggregated {
            let mut aggregates = Vec::new();
            items = items
                .into_iter()
                .map(|item| match item {
                    ProjectionItem::Expr(expr, name) => {
                        ProjectionItem::Expr(extract_aggregates(expr, &mut aggregates), name)
                    }
                    item => item,
                })
                .collect();
            having = having.map(|expr| extract_aggregates(expr, &mut aggregates));
            keys = keys
                .into_iter()
                .map(|expr| extract_aggregates(expr, &mut aggregates))
                .collect();

            node = Node::Aggregate {
                source: Box::new(node),
                group_by,
                aggregates,
            };
        }

        if let Some(predicate) = having {
            if !aggregated {
                return Err(Error::Resolution(
                    "HAVING clause on a non-aggregate query".to_string(),
                ));
            }
            node = Node::Filter {
                source: Box::new(node),
                predicate,
            };
        }

        node = Node::Projection {
            source: Box::new(node),
            items,
            order_by: keys,
        };
        if !directions.is_empty() {
            node = Node::Order {
                source: Box::new(node),
                directions,
            };
        }
        if distinct {
            node = Node::Distinct {
                source: Box::new(node),
            };
        }
        Ok(node)
    }

    fn build_from_item(&self, item: ast::FromItem) -> Result<Node> {
        Ok(match item {
            ast::FromItem::Table { name, alias } => Node::Scan {
                table_name: name,
                alias,
            },
            ast::FromItem::Subquery { query, alias } => Node::SubqueryScan {
                source: Box::new(self.build_query(*query)?),
                alias,
            },
            ast::FromItem::Join {
                left,
                right,
                join_type,
                predicate,
            } => {
                if let Some(expr) = &predicate {
                    self.check_expression(expr)?;
                }
                Node::NestedLoopJoin {
                    // Recursively build join nodes (base case: single table)
                    left: Box::new(self.build_from_item(*left)?),
                    right: Box::new(self.build_from_item(*right)?),
                    predicate,
                    join_type,
                }
            }
        })
    }

    /// Rejects unknown functions and bad argument counts, including those
    /// inside subqueries
    fn check_expression(&self, expr: &Expression) -> Result<()> {
        let mut result = Ok(());
        expr.walk(&mut |e| {
            result = match e {
                Expression::Function { name, args, .. } => check_function(name, args.len()),
                Expression::Subquery(query)
                | Expression::Exists { query, .. }
                | Expression::InSubquery { query, .. } => {
                    self.build_query((**query).clone()).map(|_| ())
                }
                _ => Ok(()),
            };
            result.is_ok()
        });
        result
    }
}

fn check_function(name: &str, args: usize) -> Result<()> {
    let valid = match name {
        "COUNT" => args <= 1,
        "SUM" | "AVG" | "TOTAL" => args == 1,
        "MIN" | "MAX" => args >= 1,
        "GROUP_CONCAT" => (1..=2).contains(&args),
        _ => match function::arity(name) {
            Some((min, max)) => args >= min && max.is_none_or(|max| args <= max),
            None => return Err(Error::UnknownFunction(format!("{}()", name))),
        },
    };
    if !valid {
        return Err(Error::UnknownFunction(format!(
            "wrong number of arguments to function {}()",
            name
        )));
    }
    Ok(())
}

fn contains_aggregate(expr: &Expression) -> bool {
    !expr.walk(&mut |e| match e {
        Expression::Function { name, args, .. } => !is_aggregate(name, args.len()),
        _ => true,
    })
}

/// Replaces aggregate calls with references to the columns the aggregate
/// node appends, sharing one column between identical calls
fn extract_aggregates(expr: Expression, aggregates: &mut Vec<Expression>) -> Expression {
    expr.transform(&mut |e| {
        let aggregate = matches!(&e, Expression::Function { name, args, .. } if is_aggregate(name, args.len()));
        if !aggregate {
            return e;
        }
        let index = match aggregates.iter().position(|a| *a == e) {
            Some(index) => index,
            None => {
                aggregates.push(e);
                aggregates.len() - 1
            }
        };
        Expression::Field(None, format!("#agg{}", index))
    })
}

/// Name of an unaliased output column
fn output_name(expr: &Expression) -> String {
    match expr {
        Expression::Field(_, name) => name.clone(),
        expr => expr.to_string(),
    }
}

/// Names unaliased `t.c` outputs `t.c` where the bare name `c` is used by
/// more than one output column
fn qualify_repeated_names(items: &mut [ProjectionItem], qualifiers: &[Option<String>]) {
    let names: Vec<String> = items
        .iter()
        .filter_map(|item| match item {
            ProjectionItem::Expr(_, name) => Some(name.clone()),
            _ => None,
        })
        .collect();
    for (item, qualifier) in items.iter_mut().zip(qualifiers) {
        if let (ProjectionItem::Expr(_, name), Some(table)) = (item, qualifier) {
            if names.iter().filter(|n| n.as_str() == name.as_str()).count() > 1 {
                *name = format!("{}.{}", table, name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        error::{Error, Result},
        sql::{
            parser::{ast::Expression, parse_sql},
            plan::{Node, Plan, ProjectionItem},
        },
    };

    fn plan(sql: &str) -> Result<Node> {
        Ok(Plan::build(parse_sql(sql, &[])?)?.0)
    }

    #[test]
    fn test_aggregate_calls_are_shared() -> Result<()> {
        let node = plan("SELECT dept, COUNT(*) AS n FROM emp GROUP BY dept HAVING COUNT(*) > 1")?;
        let Node::Projection { source, items, .. } = node else {
            panic!("expected projection");
        };
        assert_eq!(
            items[1],
            ProjectionItem::Expr(Expression::Field(None, "#agg0".to_string()), "n".to_string())
        );
        let Node::Filter { source, .. } = *source else {
            panic!("expected having filter");
        };
        let Node::Aggregate { aggregates, .. } = *source else {
            panic!("expected aggregate");
        };
        assert_eq!(aggregates.len(), 1);
        Ok(())
    }

    #[test]
    fn test_output_names() -> Result<()> {
        let Node::Projection { items, .. } = plan("SELECT u.name, COUNT(*), 1 + 2 FROM u")? else {
            panic!("expected projection");
        };
        let names: Vec<_> = items
            .iter()
            .filter_map(|i| match i {
                ProjectionItem::Expr(_, name) => Some(name.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(names, vec!["name", "COUNT(*)", "1 + 2"]);

        let Node::Projection { items, .. } =
            plan("SELECT a.id, b.id, a.name, b.id AS other FROM u a JOIN u b ON a.id = b.id")?
        else {
            panic!("expected projection");
        };
        let names: Vec<_> = items
            .iter()
            .filter_map(|i| match i {
                ProjectionItem::Expr(_, name) => Some(name.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(names, vec!["a.id", "b.id", "name", "other"]);
        Ok(())
    }

    #[test]
    fn test_unknown_function() -> Result<()> {
        assert!(matches!(
            plan("SELECT FOO(1)"),
            Err(Error::UnknownFunction(_))
        ));
        assert!(matches!(
            plan("SELECT 1 WHERE EXISTS (SELECT NOPE(x) FROM t)"),
            Err(Error::UnknownFunction(_))
        ));
        assert!(matches!(
            plan("SELECT LOWER(1, 2)"),
            Err(Error::UnknownFunction(_))
        ));
        // MIN with two arguments is the scalar form
        plan("SELECT MIN(1, 2)")?;
        plan("SELECT MIN(x), MAX(x) FROM t")?;
        Ok(())
    }

    #[test]
    fn test_recursive_cte_detection() -> Result<()> {
        let node = plan(
            "WITH RECURSIVE cnt(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM cnt WHERE x < 5) \
             SELECT x FROM cnt",
        )?;
        let Node::With { ctes, .. } = node else {
            panic!("expected with");
        };
        assert!(matches!(ctes[0].recursive, Some((_, true))));

        let node = plan("WITH a AS (SELECT 1 UNION SELECT 2) SELECT * FROM a")?;
        let Node::With { ctes, .. } = node else {
            panic!("expected with");
        };
        assert!(ctes[0].recursive.is_none());
        Ok(())
    }
}
