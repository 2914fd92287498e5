use std::collections::BTreeMap;
use std::iter::Peekable;

use ast::{
    AlterTableOperation, Column, Consts, Cte, Expression, FromItem, InsertSource, JoinType,
    OnConflict, Operation, OrderDirection, Query, Select, SelectItem, SetExpr, SetOperator,
    Statement,
};
use lexer::{Keyword, Lexer, Spanned, Token};

use super::schema::{TriggerEvent, TriggerTiming};
use super::types::{DataType, Value};
use crate::error::{Error, Result};

pub mod ast;
mod lexer;

/// Parses a single SQL statement, substituting `?` placeholders left to right
pub fn parse_sql(sql: &str, params: &[Value]) -> Result<Statement> {
    Parser::new(sql).with_params(params).parse()
}

/// Parses a `;` separated script. Parameters are consumed across all statements.
pub fn parse_script(sql: &str, params: &[Value]) -> Result<Vec<Statement>> {
    Parser::new(sql).with_params(params).parse_script()
}

/// Parses a standalone boolean expression, e.g. a trigger WHEN clause
pub fn parse_where_expression(sql: &str) -> Result<Expression> {
    Parser::new(sql).parse_standalone_expression()
}

/// Maximum nesting of parenthesized expressions, operators and subqueries
pub const MAX_DEPTH: usize = 64;

/// SQL Parser - Converts tokens into Abstract Syntax Tree (AST)
pub struct Parser<'a> {
    input: &'a str,
    lexer: Peekable<Lexer<'a>>,
    params: &'a [Value],
    next_param: usize,
    /// Set while parsing a trigger body, where placeholders are rejected
    in_trigger: bool,
    /// Byte span of the most recently consumed token
    last: (usize, usize),
    /// Current nesting of expressions and queries
    depth: usize,
}

impl<'a> Parser<'a> {
    /// Creates a new parser for the given SQL input
    pub fn new(input: &'a str) -> Self {
        Parser {
            input,
            lexer: Lexer::new(input).peekable(),
            params: &[],
            next_param: 0,
            in_trigger: false,
            last: (0, 0),
            depth: 0,
        }
    }

    /// Supplies the values bound to `?` placeholders
    pub fn with_params(mut self, params: &'a [Value]) -> Self {
        self.params = params;
        self
    }

    /// Parses the input as exactly one statement with an optional trailing semicolon
    pub fn parse(&mut self) -> Result<Statement> {
        let stmt = self.parse_statement()?;
        self.next_if_token(Token::Semicolon);
        self.expect_end()?;
        self.check_params()?;
        Ok(stmt)
    }

    /// Parses the input as a sequence of statements
    pub fn parse_script(&mut self) -> Result<Vec<Statement>> {
        let mut statements = Vec::new();
        loop {
            while self.next_if_token(Token::Semicolon).is_some() {}
            if self.peek()?.is_none() {
                break;
            }
            statements.push(self.parse_statement()?);
            if self.next_if_token(Token::Semicolon).is_none() {
                self.expect_end()?;
            }
        }
        self.check_params()?;
        Ok(statements)
    }

    fn parse_standalone_expression(&mut self) -> Result<Expression> {
        let expr = self.parse_expression()?;
        self.next_if_token(Token::Semicolon);
        self.expect_end()?;
        self.check_params()?;
        Ok(expr)
    }

    fn check_params(&self) -> Result<()> {
        if self.next_param != self.params.len() {
            return Err(Error::Bind(format!(
                "statement has {} parameters but {} values were supplied",
                self.next_param,
                self.params.len()
            )));
        }
        Ok(())
    }

    fn expect_end(&mut self) -> Result<()> {
        match self.peek()? {
            Some(token) => Err(Error::syntax(
                self.peek_position(),
                format!("unexpected token {}", token),
            )),
            None => Ok(()),
        }
    }

    /// Parses a statement based on the first token
    fn parse_statement(&mut self) -> Result<Statement> {
        match self.peek()? {
            Some(Token::Keyword(Keyword::Create)) => self.parse_ddl_create(),
            Some(Token::Keyword(Keyword::Drop)) => self.parse_ddl_drop(),
            Some(Token::Keyword(Keyword::Alter)) => self.parse_ddl_alter(),
            Some(Token::Keyword(Keyword::Select)) | Some(Token::OpenParen) => {
                Ok(Statement::Select(self.parse_query()?))
            }
            Some(Token::Keyword(Keyword::With)) => self.parse_with_statement(),
            Some(Token::Keyword(Keyword::Insert)) | Some(Token::Keyword(Keyword::Replace)) => {
                self.parse_insert()
            }
            Some(Token::Keyword(Keyword::Update)) => self.parse_update(),
            Some(Token::Keyword(Keyword::Delete)) => self.parse_delete(),
            Some(t) => Err(Error::syntax(
                self.peek_position(),
                format!("unexpected token {}", t),
            )),
            None => Err(Error::syntax(self.input.len(), "unexpected end of input")),
        }
    }

    /// Parses CREATE TABLE and CREATE TRIGGER
    fn parse_ddl_create(&mut self) -> Result<Statement> {
        self.next_expect(Token::Keyword(Keyword::Create))?;
        match self.next()? {
            Token::Keyword(Keyword::Table) => self.parse_ddl_create_table(),
            Token::Keyword(Keyword::Trigger) => self.parse_ddl_create_trigger(),
            token => Err(self.unexpected(token)),
        }
    }

    fn parse_if_not_exists(&mut self) -> Result<bool> {
        if self.next_if_keyword(Keyword::If) {
            self.next_expect(Token::Keyword(Keyword::Not))?;
            self.next_expect(Token::Keyword(Keyword::Exists))?;
            return Ok(true);
        }
        Ok(false)
    }

    fn parse_if_exists(&mut self) -> Result<bool> {
        if self.next_if_keyword(Keyword::If) {
            self.next_expect(Token::Keyword(Keyword::Exists))?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Parses CREATE TABLE statement
    fn parse_ddl_create_table(&mut self) -> Result<Statement> {
        let if_not_exists = self.parse_if_not_exists()?;
        let name = self.next_ident()?;

        if self.next_if_keyword(Keyword::As) {
            return Ok(Statement::CreateTableAs {
                name,
                if_not_exists,
                query: self.parse_query()?,
            });
        }

        self.next_expect(Token::OpenParen)?;
        let mut columns = Vec::new();
        let mut table_key = None;
        loop {
            if self.next_if_keyword(Keyword::Primary) {
                // Table constraint: PRIMARY KEY (col)
                self.next_expect(Token::Keyword(Keyword::Key))?;
                self.next_expect(Token::OpenParen)?;
                let position = self.peek_position();
                table_key = Some((position, self.next_ident()?));
                self.next_expect(Token::CloseParen)?;
            } else {
                columns.push(self.parse_ddl_column()?);
            }
            if self.next_if_token(Token::Comma).is_none() {
                break;
            }
        }
        self.next_expect(Token::CloseParen)?;

        if let Some((position, key)) = table_key {
            match columns.iter_mut().find(|c| c.name == key) {
                Some(column) => column.primary_key = true,
                None => {
                    return Err(Error::syntax(
                        position,
                        format!("primary key column {} is not defined", key),
                    ));
                }
            }
        }
        Ok(Statement::CreateTable {
            name,
            if_not_exists,
            columns,
        })
    }

    /// Parses a declared type name such as `INTEGER` or `VARCHAR(20)`
    fn parse_type_name(&mut self) -> Result<Option<DataType>> {
        let Some(Token::Ident(name)) = self.next_if(|t| matches!(t, Token::Ident(_))) else {
            return Ok(None);
        };
        if self.next_if_token(Token::OpenParen).is_some() {
            loop {
                match self.next()? {
                    Token::Number(_) | Token::Comma => {}
                    Token::CloseParen => break,
                    token => return Err(self.unexpected(token)),
                }
            }
        }
        Ok(Some(DataType::from_name(&name)))
    }

    /// Parses column definition in CREATE TABLE / ADD COLUMN
    fn parse_ddl_column(&mut self) -> Result<Column> {
        let mut column = Column {
            name: self.next_ident()?,
            datatype: self.parse_type_name()?.unwrap_or(DataType::Any),
            nullable: None,
            default: None,
            primary_key: false,
        };

        // Column constraints, in any order
        while let Some(Token::Keyword(keyword)) = self.next_if(|t| {
            matches!(
                t,
                Token::Keyword(Keyword::Null | Keyword::Not | Keyword::Default | Keyword::Primary)
            )
        }) {
            match keyword {
                Keyword::Null => column.nullable = Some(true),
                Keyword::Not => {
                    self.next_expect(Token::Keyword(Keyword::Null))?;
                    column.nullable = Some(false);
                }
                Keyword::Default => column.default = Some(self.parse_expression()?),
                _ => {
                    self.next_expect(Token::Keyword(Keyword::Key))?;
                    if !self.next_if_keyword(Keyword::Asc) {
                        self.next_if_keyword(Keyword::Desc);
                    }
                    self.next_if_keyword(Keyword::Autoincrement);
                    column.primary_key = true;
                }
            }
        }

        Ok(column)
    }

    /// Parses `CREATE TRIGGER`; the body is validated and kept as source text
    fn parse_ddl_create_trigger(&mut self) -> Result<Statement> {
        let if_not_exists = self.parse_if_not_exists()?;
        let name = self.next_ident()?;
        let timing = match self.peek()? {
            Some(Token::Keyword(Keyword::Before)) => {
                self.next()?;
                TriggerTiming::Before
            }
            Some(Token::Keyword(Keyword::After)) => {
                self.next()?;
                TriggerTiming::After
            }
            _ => TriggerTiming::Before,
        };
        let event = match self.next()? {
            Token::Keyword(Keyword::Insert) => TriggerEvent::Insert,
            Token::Keyword(Keyword::Update) => TriggerEvent::Update,
            Token::Keyword(Keyword::Delete) => TriggerEvent::Delete,
            token => return Err(self.unexpected(token)),
        };
        self.next_expect(Token::Keyword(Keyword::On))?;
        let table_name = self.next_ident()?;
        if self.next_if_keyword(Keyword::For) {
            self.next_expect(Token::Keyword(Keyword::Each))?;
            self.next_expect(Token::Keyword(Keyword::Row))?;
        }

        let was_in_trigger = std::mem::replace(&mut self.in_trigger, true);
        let parsed = self.parse_trigger_parts();
        self.in_trigger = was_in_trigger;
        let (when, body) = parsed?;

        Ok(Statement::CreateTrigger {
            name,
            if_not_exists,
            timing,
            event,
            table_name,
            when,
            body,
        })
    }

    fn parse_trigger_parts(&mut self) -> Result<(Option<String>, Vec<String>)> {
        let when = if self.next_if_keyword(Keyword::When) {
            let start = self.peek_position();
            self.parse_expression()?;
            Some(self.input[start..self.last.1].to_string())
        } else {
            None
        };

        self.next_expect(Token::Keyword(Keyword::Begin))?;
        let mut body = Vec::new();
        loop {
            while self.next_if_token(Token::Semicolon).is_some() {}
            if self.next_if_keyword(Keyword::End) {
                break;
            }
            let start = self.peek_position();
            self.parse_statement()?;
            body.push(self.input[start..self.last.1].to_string());
            if self.next_if_token(Token::Semicolon).is_none() {
                self.next_expect(Token::Keyword(Keyword::End))?;
                break;
            }
        }
        if body.is_empty() {
            return Err(Error::syntax(self.last.0, "trigger body is empty"));
        }
        Ok((when, body))
    }

    /// Parses DROP TABLE and DROP TRIGGER
    fn parse_ddl_drop(&mut self) -> Result<Statement> {
        self.next_expect(Token::Keyword(Keyword::Drop))?;
        match self.next()? {
            Token::Keyword(Keyword::Table) => {
                let if_exists = self.parse_if_exists()?;
                Ok(Statement::DropTable {
                    name: self.next_ident()?,
                    if_exists,
                })
            }
            Token::Keyword(Keyword::Trigger) => {
                let if_exists = self.parse_if_exists()?;
                Ok(Statement::DropTrigger {
                    name: self.next_ident()?,
                    if_exists,
                })
            }
            token => Err(self.unexpected(token)),
        }
    }

    /// Parses ALTER TABLE
    fn parse_ddl_alter(&mut self) -> Result<Statement> {
        self.next_expect(Token::Keyword(Keyword::Alter))?;
        self.next_expect(Token::Keyword(Keyword::Table))?;
        let name = self.next_ident()?;
        let operation = match self.next()? {
            Token::Keyword(Keyword::Add) => {
                self.skip_column_keyword();
                AlterTableOperation::AddColumn(self.parse_ddl_column()?)
            }
            Token::Keyword(Keyword::Rename) => {
                if self.next_if_keyword(Keyword::To) {
                    AlterTableOperation::RenameTable(self.next_ident()?)
                } else {
                    self.skip_column_keyword();
                    let from = self.next_ident()?;
                    self.next_expect(Token::Keyword(Keyword::To))?;
                    AlterTableOperation::RenameColumn {
                        from,
                        to: self.next_ident()?,
                    }
                }
            }
            Token::Keyword(Keyword::Drop) => {
                self.skip_column_keyword();
                AlterTableOperation::DropColumn(self.next_ident()?)
            }
            token => return Err(self.unexpected(token)),
        };
        Ok(Statement::AlterTable { name, operation })
    }

    /// Consumes an optional COLUMN keyword unless it is itself the column name
    fn skip_column_keyword(&mut self) {
        if self.peek().ok().flatten() == Some(Token::Keyword(Keyword::Column))
            && self.peek_nth(1).is_some_and(|t| is_ident_token(&t))
        {
            self.lexer.next();
        }
    }

    /// Parses `WITH ... (SELECT | INSERT | UPDATE | DELETE)`
    fn parse_with_statement(&mut self) -> Result<Statement> {
        let ctes = self.parse_ctes()?;
        match self.peek()? {
            Some(Token::Keyword(Keyword::Select)) | Some(Token::OpenParen) => {
                let mut query = self.parse_query()?;
                query.ctes = ctes;
                Ok(Statement::Select(query))
            }
            Some(Token::Keyword(Keyword::Insert | Keyword::Replace)) => Ok(Statement::With {
                ctes,
                statement: Box::new(self.parse_insert()?),
            }),
            Some(Token::Keyword(Keyword::Update)) => Ok(Statement::With {
                ctes,
                statement: Box::new(self.parse_update()?),
            }),
            Some(Token::Keyword(Keyword::Delete)) => Ok(Statement::With {
                ctes,
                statement: Box::new(self.parse_delete()?),
            }),
            Some(t) => Err(Error::syntax(
                self.peek_position(),
                format!("unexpected token {}", t),
            )),
            None => Err(Error::syntax(self.input.len(), "unexpected end of input")),
        }
    }

    /// Parses `WITH [RECURSIVE] name [(cols)] AS (query), ...`
    fn parse_ctes(&mut self) -> Result<Vec<Cte>> {
        self.next_expect(Token::Keyword(Keyword::With))?;
        self.next_if_keyword(Keyword::Recursive);
        let mut ctes = Vec::new();
        loop {
            let name = self.next_ident()?;
            let columns = if self.next_if_token(Token::OpenParen).is_some() {
                self.parse_ident_list()?
            } else {
                Vec::new()
            };
            self.next_expect(Token::Keyword(Keyword::As))?;
            self.next_expect(Token::OpenParen)?;
            let query = self.parse_query()?;
            self.next_expect(Token::CloseParen)?;
            ctes.push(Cte {
                name,
                columns,
                query,
            });
            if self.next_if_token(Token::Comma).is_none() {
                break;
            }
        }
        Ok(ctes)
    }

    /// Parses identifiers up to and including the closing parenthesis
    fn parse_ident_list(&mut self) -> Result<Vec<String>> {
        let mut idents = Vec::new();
        loop {
            idents.push(self.next_ident()?);
            match self.next()? {
                Token::CloseParen => break,
                Token::Comma => {}
                token => return Err(self.unexpected(token)),
            }
        }
        Ok(idents)
    }

    /// Parses INSERT / REPLACE statement
    fn parse_insert(&mut self) -> Result<Statement> {
        let mut conflict = match self.next()? {
            Token::Keyword(Keyword::Replace) => OnConflict::Replace,
            Token::Keyword(Keyword::Insert) => {
                if self.next_if_keyword(Keyword::Or) {
                    match self.next()? {
                        Token::Keyword(Keyword::Abort) => OnConflict::Abort,
                        Token::Keyword(Keyword::Ignore) => OnConflict::Ignore,
                        Token::Keyword(Keyword::Replace) => OnConflict::Replace,
                        token => return Err(self.unexpected(token)),
                    }
                } else {
                    OnConflict::Abort
                }
            }
            token => return Err(self.unexpected(token)),
        };
        self.next_expect(Token::Keyword(Keyword::Into))?;
        let table_name = self.next_ident()?;

        // Check if specific columns are specified
        let columns = if self.peek()? == Some(Token::OpenParen)
            && !self
                .peek_nth(1)
                .is_some_and(|t| matches!(t, Token::Keyword(Keyword::Select | Keyword::With)))
        {
            self.next()?;
            Some(self.parse_ident_list()?)
        } else {
            None
        };

        let source = if self.next_if_keyword(Keyword::Values) {
            // Parse multiple value rows: INSERT INTO tbl VALUES (1,2),(3,4);
            let mut values = Vec::new();
            loop {
                self.next_expect(Token::OpenParen)?;
                values.push(self.parse_expression_list(Token::CloseParen)?);
                if self.next_if_token(Token::Comma).is_none() {
                    break;
                }
            }
            InsertSource::Values(values)
        } else {
            InsertSource::Query(Box::new(self.parse_query()?))
        };

        if self.next_if_keyword(Keyword::On) {
            self.next_expect(Token::Keyword(Keyword::Conflict))?;
            if self.next_if_token(Token::OpenParen).is_some() {
                self.parse_ident_list()?;
            }
            self.next_expect(Token::Keyword(Keyword::Do))?;
            conflict = match self.next()? {
                Token::Keyword(Keyword::Nothing) => OnConflict::Ignore,
                Token::Keyword(Keyword::Update) => {
                    self.next_expect(Token::Keyword(Keyword::Set))?;
                    OnConflict::Update {
                        columns: self.parse_assignments()?,
                        where_clause: self.parse_where_clause()?,
                    }
                }
                token => return Err(self.unexpected(token)),
            };
        }

        Ok(Statement::Insert {
            table_name,
            columns,
            source,
            conflict,
        })
    }

    /// Parses expressions up to and including the given closing token
    fn parse_expression_list(&mut self, close: Token) -> Result<Vec<Expression>> {
        let mut exprs = Vec::new();
        if self.next_if_token(close.clone()).is_some() {
            return Ok(exprs);
        }
        loop {
            exprs.push(self.parse_expression()?);
            let token = self.next()?;
            if token == close {
                break;
            }
            if token != Token::Comma {
                return Err(self.unexpected(token));
            }
        }
        Ok(exprs)
    }

    /// Parses `col = expr, ...`
    fn parse_assignments(&mut self) -> Result<BTreeMap<String, Expression>> {
        let mut columns = BTreeMap::new();
        loop {
            let position = self.peek_position();
            let col = self.next_ident()?;
            self.next_expect(Token::Equal)?;
            let value = self.parse_expression()?;
            // The same column must not be assigned twice
            if columns.contains_key(&col) {
                return Err(Error::syntax(
                    position,
                    format!("duplicate column {} in assignment", col),
                ));
            }
            columns.insert(col, value);
            if self.next_if_token(Token::Comma).is_none() {
                break;
            }
        }
        Ok(columns)
    }

    /// Parses UPDATE statement
    fn parse_update(&mut self) -> Result<Statement> {
        self.next_expect(Token::Keyword(Keyword::Update))?;
        let table_name = self.next_ident()?;
        self.next_expect(Token::Keyword(Keyword::Set))?;
        Ok(Statement::Update {
            table_name,
            columns: self.parse_assignments()?,
            where_clause: self.parse_where_clause()?,
        })
    }

    /// Parses DELETE statement
    fn parse_delete(&mut self) -> Result<Statement> {
        self.next_expect(Token::Keyword(Keyword::Delete))?;
        self.next_expect(Token::Keyword(Keyword::From))?;
        Ok(Statement::Delete {
            table_name: self.next_ident()?,
            where_clause: self.parse_where_clause()?,
        })
    }

    fn parse_where_clause(&mut self) -> Result<Option<Expression>> {
        if !self.next_if_keyword(Keyword::Where) {
            return Ok(None);
        }
        Ok(Some(self.parse_expression()?))
    }

    /// Parses a full query: `[WITH ...] body [ORDER BY ...] [LIMIT ...]`
    fn parse_query(&mut self) -> Result<Query> {
        self.nested(Self::parse_query_body)
    }

    fn parse_query_body(&mut self) -> Result<Query> {
        let ctes = if self.peek()? == Some(Token::Keyword(Keyword::With)) {
            self.parse_ctes()?
        } else {
            Vec::new()
        };
        let body = self.parse_set_expr()?;

        let mut order_by = Vec::new();
        if self.next_if_keyword(Keyword::Order) {
            self.next_expect(Token::Keyword(Keyword::By))?;
            loop {
                let expr = self.parse_expression()?;
                let direction = if self.next_if_keyword(Keyword::Desc) {
                    OrderDirection::Desc
                } else {
                    self.next_if_keyword(Keyword::Asc);
                    OrderDirection::Asc
                };
                order_by.push((expr, direction));
                if self.next_if_token(Token::Comma).is_none() {
                    break;
                }
            }
        }

        let (mut limit, mut offset) = (None, None);
        if self.next_if_keyword(Keyword::Limit) {
            let first = self.parse_expression()?;
            if self.next_if_token(Token::Comma).is_some() {
                // LIMIT offset, count
                offset = Some(first);
                limit = Some(self.parse_expression()?);
            } else {
                limit = Some(first);
                if self.next_if_keyword(Keyword::Offset) {
                    offset = Some(self.parse_expression()?);
                }
            }
        }

        Ok(Query {
            ctes,
            body,
            order_by,
            limit,
            offset,
        })
    }

    /// Parses SELECT cores joined by UNION / INTERSECT / EXCEPT (left-associative)
    fn parse_set_expr(&mut self) -> Result<SetExpr> {
        let mut left = self.parse_set_operand()?;
        loop {
            let op = match self.peek()? {
                Some(Token::Keyword(Keyword::Union)) => SetOperator::Union,
                Some(Token::Keyword(Keyword::Intersect)) => SetOperator::Intersect,
                Some(Token::Keyword(Keyword::Except)) => SetOperator::Except,
                _ => break,
            };
            self.next()?;
            let all = self.next_if_keyword(Keyword::All);
            let right = self.parse_set_operand()?;
            left = SetExpr::SetOperation {
                op,
                all,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_set_operand(&mut self) -> Result<SetExpr> {
        if self.next_if_token(Token::OpenParen).is_some() {
            let inner = self.parse_set_expr()?;
            self.next_expect(Token::CloseParen)?;
            return Ok(inner);
        }
        Ok(SetExpr::Select(Box::new(self.parse_select()?)))
    }

    /// Parses a SELECT core
    fn parse_select(&mut self) -> Result<Select> {
        self.next_expect(Token::Keyword(Keyword::Select))?;
        let distinct = if self.next_if_keyword(Keyword::Distinct) {
            true
        } else {
            self.next_if_keyword(Keyword::All);
            false
        };

        let mut projection = Vec::new();
        loop {
            projection.push(self.parse_select_item()?);
            if self.next_if_token(Token::Comma).is_none() {
                break;
            }
        }

        let from = if self.next_if_keyword(Keyword::From) {
            Some(self.parse_from_clause()?)
        } else {
            None
        };
        let where_clause = self.parse_where_clause()?;

        let mut group_by = Vec::new();
        if self.next_if_keyword(Keyword::Group) {
            self.next_expect(Token::Keyword(Keyword::By))?;
            loop {
                group_by.push(self.parse_expression()?);
                if self.next_if_token(Token::Comma).is_none() {
                    break;
                }
            }
        }
        let having = if self.next_if_keyword(Keyword::Having) {
            Some(self.parse_expression()?)
        } else {
            None
        };

        Ok(Select {
            distinct,
            projection,
            from,
            where_clause,
            group_by,
            having,
        })
    }

    fn parse_select_item(&mut self) -> Result<SelectItem> {
        if self.next_if_token(Token::Asterisk).is_some() {
            return Ok(SelectItem::Wildcard);
        }
        let qualified_wildcard = self.peek()?.is_some_and(|t| is_ident_token(&t))
            && self.peek_nth(1) == Some(Token::Period)
            && self.peek_nth(2) == Some(Token::Asterisk);
        if qualified_wildcard {
            let table = self.next_ident()?;
            self.next()?;
            self.next()?;
            return Ok(SelectItem::QualifiedWildcard(table));
        }
        let expr = self.parse_expression()?;
        Ok(SelectItem::Expr(expr, self.parse_alias()?))
    }

    /// Parses `[AS] alias`; a bare alias must be a plain identifier
    fn parse_alias(&mut self) -> Result<Option<String>> {
        if self.next_if_keyword(Keyword::As) {
            return Ok(Some(self.next_ident()?));
        }
        Ok(match self.next_if(|t| matches!(t, Token::Ident(_))) {
            Some(Token::Ident(alias)) => Some(alias),
            _ => None,
        })
    }

    /// Parses FROM items joined by commas or JOIN clauses
    fn parse_from_clause(&mut self) -> Result<FromItem> {
        let mut left = self.parse_table_factor()?;
        loop {
            let join_type = if self.next_if_token(Token::Comma).is_some() {
                JoinType::Cross
            } else if self.next_if_keyword(Keyword::Cross) {
                self.next_expect(Token::Keyword(Keyword::Join))?;
                JoinType::Cross
            } else if self.next_if_keyword(Keyword::Join) {
                JoinType::Inner
            } else if self.next_if_keyword(Keyword::Inner) {
                self.next_expect(Token::Keyword(Keyword::Join))?;
                JoinType::Inner
            } else if self.next_if_keyword(Keyword::Left) {
                self.next_if_keyword(Keyword::Outer);
                self.next_expect(Token::Keyword(Keyword::Join))?;
                JoinType::Left
            } else if self.next_if_keyword(Keyword::Right) {
                self.next_if_keyword(Keyword::Outer);
                self.next_expect(Token::Keyword(Keyword::Join))?;
                JoinType::Right
            } else {
                break;
            };

            let right = self.parse_table_factor()?;
            let predicate = match join_type {
                JoinType::Cross => None,
                JoinType::Inner => {
                    if self.next_if_keyword(Keyword::On) {
                        Some(self.parse_expression()?)
                    } else {
                        None
                    }
                }
                JoinType::Left | JoinType::Right => {
                    self.next_expect(Token::Keyword(Keyword::On))?;
                    Some(self.parse_expression()?)
                }
            };
            left = FromItem::Join {
                left: Box::new(left),
                right: Box::new(right),
                join_type,
                predicate,
            };
        }
        Ok(left)
    }

    /// Parses a table reference or derived table
    fn parse_table_factor(&mut self) -> Result<FromItem> {
        if self.next_if_token(Token::OpenParen).is_some() {
            let query = self.parse_query()?;
            self.next_expect(Token::CloseParen)?;
            let alias = self.parse_alias()?.unwrap_or_else(|| "subquery".to_string());
            return Ok(FromItem::Subquery {
                query: Box::new(query),
                alias,
            });
        }
        Ok(FromItem::Table {
            name: self.next_ident()?,
            alias: self.parse_alias()?,
        })
    }

    /// Parses an expression (lowest precedence: OR)
    fn parse_expression(&mut self) -> Result<Expression> {
        self.nested(Self::parse_or)
    }

    fn parse_or(&mut self) -> Result<Expression> {
        let mut left = self.parse_and()?;
        while self.next_if_keyword(Keyword::Or) {
            let right = self.parse_and()?;
            left = Operation::Or(Box::new(left), Box::new(right)).into();
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expression> {
        let mut left = self.parse_not()?;
        while self.next_if_keyword(Keyword::And) {
            let right = self.parse_not()?;
            left = Operation::And(Box::new(left), Box::new(right)).into();
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expression> {
        if self.next_if_keyword(Keyword::Not) {
            return Ok(Operation::Not(Box::new(self.nested(Self::parse_not)?)).into());
        }
        self.parse_comparison()
    }

    /// Comparisons and postfix predicates: IS, IN, BETWEEN, LIKE
    fn parse_comparison(&mut self) -> Result<Expression> {
        let mut left = self.parse_additive()?;
        loop {
            let negated = self.peek()? == Some(Token::Keyword(Keyword::Not))
                && matches!(
                    self.peek_nth(1),
                    Some(Token::Keyword(Keyword::In | Keyword::Between | Keyword::Like))
                );
            if negated {
                self.next()?;
            }
            let token = match self.peek()? {
                Some(
                    token @ (Token::Equal
                    | Token::NotEqual
                    | Token::LessThan
                    | Token::LessThanOrEqual
                    | Token::GreaterThan
                    | Token::GreaterThanOrEqual
                    | Token::Keyword(Keyword::Is | Keyword::Like | Keyword::Between | Keyword::In)),
                ) => token,
                _ => break,
            };
            self.next()?;
            let l = Box::new(left);
            left = match token {
                Token::Equal => Operation::Equal(l, Box::new(self.parse_additive()?)).into(),
                Token::NotEqual => Operation::NotEqual(l, Box::new(self.parse_additive()?)).into(),
                Token::LessThan => Operation::LessThan(l, Box::new(self.parse_additive()?)).into(),
                Token::LessThanOrEqual => {
                    Operation::LessThanOrEqual(l, Box::new(self.parse_additive()?)).into()
                }
                Token::GreaterThan => {
                    Operation::GreaterThan(l, Box::new(self.parse_additive()?)).into()
                }
                Token::GreaterThanOrEqual => {
                    Operation::GreaterThanOrEqual(l, Box::new(self.parse_additive()?)).into()
                }
                Token::Keyword(Keyword::Is) => {
                    let not = self.next_if_keyword(Keyword::Not);
                    if self.next_if_keyword(Keyword::Null) {
                        Operation::IsNull(l, not).into()
                    } else {
                        Operation::Is(l, Box::new(self.parse_additive()?), not).into()
                    }
                }
                Token::Keyword(Keyword::Like) => {
                    Operation::Like(l, Box::new(self.parse_additive()?), negated).into()
                }
                Token::Keyword(Keyword::Between) => {
                    let low = self.parse_additive()?;
                    self.next_expect(Token::Keyword(Keyword::And))?;
                    let high = self.parse_additive()?;
                    Expression::Between {
                        expr: l,
                        low: Box::new(low),
                        high: Box::new(high),
                        negated,
                    }
                }
                // IN
                _ => self.parse_in(l, negated)?,
            };
        }
        Ok(left)
    }

    /// Parses the parenthesized part of `x [NOT] IN (...)`
    fn parse_in(&mut self, expr: Box<Expression>, negated: bool) -> Result<Expression> {
        self.next_expect(Token::OpenParen)?;
        if matches!(
            self.peek()?,
            Some(Token::Keyword(Keyword::Select | Keyword::With))
        ) {
            let query = self.parse_query()?;
            self.next_expect(Token::CloseParen)?;
            return Ok(Expression::InSubquery {
                expr,
                query: Box::new(query),
                negated,
            });
        }
        Ok(Expression::InList {
            expr,
            list: self.parse_expression_list(Token::CloseParen)?,
            negated,
        })
    }

    fn parse_additive(&mut self) -> Result<Expression> {
        let mut left = self.parse_multiplicative()?;
        loop {
            left = if self.next_if_token(Token::Plus).is_some() {
                Operation::Add(Box::new(left), Box::new(self.parse_multiplicative()?)).into()
            } else if self.next_if_token(Token::Minus).is_some() {
                Operation::Subtract(Box::new(left), Box::new(self.parse_multiplicative()?))
                    .into()
            } else {
                return Ok(left);
            };
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expression> {
        let mut left = self.parse_concat()?;
        loop {
            left = if self.next_if_token(Token::Asterisk).is_some() {
                Operation::Multiply(Box::new(left), Box::new(self.parse_concat()?)).into()
            } else if self.next_if_token(Token::Slash).is_some() {
                Operation::Divide(Box::new(left), Box::new(self.parse_concat()?)).into()
            } else if self.next_if_token(Token::Percent).is_some() {
                Operation::Modulo(Box::new(left), Box::new(self.parse_concat()?)).into()
            } else {
                return Ok(left);
            };
        }
    }

    fn parse_concat(&mut self) -> Result<Expression> {
        let mut left = self.parse_unary()?;
        while self.next_if_token(Token::Concat).is_some() {
            left = Operation::Concat(Box::new(left), Box::new(self.parse_unary()?)).into();
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expression> {
        if self.next_if_token(Token::Minus).is_some() {
            return Ok(Operation::Negate(Box::new(self.nested(Self::parse_unary)?)).into());
        }
        if self.next_if_token(Token::Plus).is_some() {
            return self.nested(Self::parse_unary);
        }
        self.parse_atom()
    }

    /// Parses literals, placeholders, column references, calls and parenthesized forms
    fn parse_atom(&mut self) -> Result<Expression> {
        Ok(match self.next()? {
            Token::Number(n) => {
                // Lexer scans both 123 and 123.45 as Token::Number(String)
                if n.chars().all(|c| c.is_ascii_digit()) {
                    match n.parse::<i64>() {
                        Ok(i) => Consts::Integer(i).into(),
                        Err(_) => Consts::Float(n.parse()?).into(),
                    }
                } else {
                    Consts::Float(n.parse()?).into()
                }
            }
            Token::String(s) => Consts::String(s).into(),
            Token::Keyword(Keyword::True) => Consts::Boolean(true).into(),
            Token::Keyword(Keyword::False) => Consts::Boolean(false).into(),
            Token::Keyword(Keyword::Null) => Consts::Null.into(),
            Token::Parameter => self.next_param()?,
            Token::OpenParen => {
                if matches!(
                    self.peek()?,
                    Some(Token::Keyword(Keyword::Select | Keyword::With))
                ) {
                    let query = self.parse_query()?;
                    self.next_expect(Token::CloseParen)?;
                    Expression::Subquery(Box::new(query))
                } else {
                    let expr = self.parse_expression()?;
                    self.next_expect(Token::CloseParen)?;
                    expr
                }
            }
            Token::Keyword(Keyword::Exists) => {
                self.next_expect(Token::OpenParen)?;
                let query = self.parse_query()?;
                self.next_expect(Token::CloseParen)?;
                Expression::Exists {
                    query: Box::new(query),
                    negated: false,
                }
            }
            Token::Keyword(Keyword::Case) => self.parse_case()?,
            Token::Keyword(Keyword::Cast) => {
                self.next_expect(Token::OpenParen)?;
                let expr = self.parse_expression()?;
                self.next_expect(Token::Keyword(Keyword::As))?;
                let position = self.peek_position();
                let datatype = self
                    .parse_type_name()?
                    .ok_or_else(|| Error::syntax(position, "expected type name"))?;
                self.next_expect(Token::CloseParen)?;
                Expression::Cast {
                    expr: Box::new(expr),
                    datatype,
                }
            }
            token => {
                let name = match token {
                    Token::Ident(ident) => ident,
                    Token::Keyword(k) if !k.is_reserved() => k.to_str().to_lowercase(),
                    token => return Err(self.unexpected(token)),
                };
                if self.next_if_token(Token::OpenParen).is_some() {
                    self.parse_function(name)?
                } else if self.next_if_token(Token::Period).is_some() {
                    let column = self.next_ident()?;
                    Expression::Field(Some(canonical_qualifier(name)), column)
                } else {
                    Expression::Field(None, name)
                }
            }
        })
    }

    /// Parses the argument list of a function call after the opening parenthesis
    fn parse_function(&mut self, name: String) -> Result<Expression> {
        let name = name.to_uppercase();
        if self.next_if_token(Token::Asterisk).is_some() {
            self.next_expect(Token::CloseParen)?;
            return Ok(Expression::Function {
                name,
                args: Vec::new(),
                distinct: false,
            });
        }
        let distinct = self.next_if_keyword(Keyword::Distinct);
        Ok(Expression::Function {
            name,
            args: self.parse_expression_list(Token::CloseParen)?,
            distinct,
        })
    }

    fn parse_case(&mut self) -> Result<Expression> {
        let operand = if self.peek()? == Some(Token::Keyword(Keyword::When)) {
            None
        } else {
            Some(Box::new(self.parse_expression()?))
        };
        let mut branches = Vec::new();
        while self.next_if_keyword(Keyword::When) {
            let when = self.parse_expression()?;
            self.next_expect(Token::Keyword(Keyword::Then))?;
            branches.push((when, self.parse_expression()?));
        }
        if branches.is_empty() {
            return Err(Error::syntax(self.peek_position(), "CASE requires WHEN"));
        }
        let else_result = if self.next_if_keyword(Keyword::Else) {
            Some(Box::new(self.parse_expression()?))
        } else {
            None
        };
        self.next_expect(Token::Keyword(Keyword::End))?;
        Ok(Expression::Case {
            operand,
            branches,
            else_result,
        })
    }

    /// Replaces a `?` placeholder with the next supplied value
    fn next_param(&mut self) -> Result<Expression> {
        if self.in_trigger {
            return Err(Error::Bind(
                "parameters are not allowed in trigger bodies".to_string(),
            ));
        }
        let value = self.params.get(self.next_param).ok_or_else(|| {
            Error::Bind(format!(
                "missing value for parameter {}, {} supplied",
                self.next_param + 1,
                self.params.len()
            ))
        })?;
        self.next_param += 1;
        Ok(Consts::from(value.clone()).into())
    }

    /// Peeks at the next token
    fn peek(&mut self) -> Result<Option<Token>> {
        self.lexer
            .peek()
            .cloned()
            .transpose()
            .map(|t| t.map(|s| s.token))
    }

    /// Looks `n` tokens past the next one without consuming anything
    fn peek_nth(&mut self, n: usize) -> Option<Token> {
        match self.lexer.clone().nth(n) {
            Some(Ok(spanned)) => Some(spanned.token),
            _ => None,
        }
    }

    /// Byte offset of the next token, or the input length at the end
    fn peek_position(&mut self) -> usize {
        match self.lexer.peek() {
            Some(Ok(spanned)) => spanned.start,
            _ => self.input.len(),
        }
    }

    /// Runs a recursive production, failing once nesting exceeds
    /// `MAX_DEPTH`
    fn nested<R>(&mut self, parse: impl FnOnce(&mut Self) -> Result<R>) -> Result<R> {
        if self.depth >= MAX_DEPTH {
            return Err(Error::syntax(
                self.peek_position(),
                format!("expression nested deeper than {} levels", MAX_DEPTH),
            ));
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    /// Consumes and returns the next token
    fn next(&mut self) -> Result<Token> {
        let end = self.input.len();
        let Spanned { token, start, end } = self
            .lexer
            .next()
            .unwrap_or_else(|| Err(Error::syntax(end, "unexpected end of input")))?;
        self.last = (start, end);
        Ok(token)
    }

    /// Error for a token that has just been consumed
    fn unexpected(&self, token: Token) -> Error {
        Error::syntax(self.last.0, format!("unexpected token {}", token))
    }

    /// Expects and consumes an identifier
    fn next_ident(&mut self) -> Result<String> {
        match self.next()? {
            Token::Ident(ident) => Ok(ident),
            Token::Keyword(k) if !k.is_reserved() => Ok(k.to_str().to_lowercase()),
            token => Err(Error::syntax(
                self.last.0,
                format!("expected identifier, got {}", token),
            )),
        }
    }

    /// Expects a specific token, returns error if different
    fn next_expect(&mut self, expect: Token) -> Result<()> {
        let token = self.next()?;
        if token != expect {
            return Err(Error::syntax(
                self.last.0,
                format!("expected {}, got {}", expect, token),
            ));
        }
        Ok(())
    }

    /// Consumes next token if it satisfies the predicate
    fn next_if<F: Fn(&Token) -> bool>(&mut self, predicate: F) -> Option<Token> {
        self.peek().unwrap_or(None).filter(|t| predicate(t))?;
        self.next().ok()
    }

    /// Consumes the next token if it is the given keyword
    fn next_if_keyword(&mut self, keyword: Keyword) -> bool {
        self.next_if_token(Token::Keyword(keyword)).is_some()
    }

    /// Consumes next token if it matches the given token
    fn next_if_token(&mut self, token: Token) -> Option<Token> {
        self.next_if(|t| t == &token)
    }
}

fn is_ident_token(token: &Token) -> bool {
    match token {
        Token::Ident(_) => true,
        Token::Keyword(k) => !k.is_reserved(),
        _ => false,
    }
}

/// Trigger pseudo-row qualifiers are matched case-insensitively
fn canonical_qualifier(name: String) -> String {
    if name.eq_ignore_ascii_case("old") {
        "OLD".to_string()
    } else if name.eq_ignore_ascii_case("new") {
        "NEW".to_string()
    } else if name.eq_ignore_ascii_case("excluded") {
        "excluded".to_string()
    } else {
        name
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::{parse_script, parse_sql, parse_where_expression};
    use crate::{
        error::{Error, Result},
        sql::{
            parser::ast::{
                AlterTableOperation, Consts, Expression, FromItem, InsertSource, JoinType,
                OnConflict, Operation, OrderDirection, SelectItem, SetExpr, SetOperator,
                Statement,
            },
            schema::{TriggerEvent, TriggerTiming},
            types::{DataType, Value},
        },
    };

    fn field(name: &str) -> Expression {
        Expression::Field(None, name.to_string())
    }

    fn int(i: i64) -> Expression {
        Consts::Integer(i).into()
    }

    #[test]
    fn test_parser_create_table() -> Result<()> {
        let sql1 = "
            create table tbl1 (
                a int default 100,
                b float not null,
                c varchar(20) null,
                d bool default true
            );
        ";
        let stmt1 = parse_sql(sql1, &[])?;

        let sql2 = "
        create            table tbl1 (
            a int default     100,
            b float not null     ,
            c varchar  (20)    null,
            d       bool default        true
        )
        ";
        let stmt2 = parse_sql(sql2, &[])?;
        assert_eq!(stmt1, stmt2);

        let Statement::CreateTable { columns, .. } = stmt1 else {
            panic!("expected create table");
        };
        assert_eq!(columns[0].datatype, DataType::Integer);
        assert_eq!(columns[0].default, Some(int(100)));
        assert_eq!(columns[1].nullable, Some(false));
        assert_eq!(columns[2].datatype, DataType::String);
        assert_eq!(columns[3].datatype, DataType::Boolean);

        let stmt3 = parse_sql("create table tbl1 (a int,", &[]);
        assert!(matches!(stmt3, Err(Error::Syntax { .. })));
        Ok(())
    }

    #[test]
    fn test_parser_create_table_keys() -> Result<()> {
        let stmt = parse_sql(
            "CREATE TABLE IF NOT EXISTS t (id INTEGER PRIMARY KEY AUTOINCREMENT, note, key TEXT)",
            &[],
        )?;
        let Statement::CreateTable {
            if_not_exists,
            columns,
            ..
        } = stmt
        else {
            panic!("expected create table");
        };
        assert!(if_not_exists);
        assert!(columns[0].primary_key);
        assert_eq!(columns[1].datatype, DataType::Any);
        assert_eq!(columns[2].name, "key");

        let stmt = parse_sql("CREATE TABLE t (a TEXT, b INT, PRIMARY KEY (b))", &[])?;
        let Statement::CreateTable { columns, .. } = stmt else {
            panic!("expected create table");
        };
        assert!(!columns[0].primary_key);
        assert!(columns[1].primary_key);

        assert!(matches!(
            parse_sql("CREATE TABLE t (a TEXT, PRIMARY KEY (z))", &[]),
            Err(Error::Syntax { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_parser_insert() -> Result<()> {
        let stmt1 = parse_sql("insert into tbl1 values (1, 2, 3, 'a', true);", &[])?;
        assert_eq!(
            stmt1,
            Statement::Insert {
                table_name: "tbl1".to_string(),
                columns: None,
                source: InsertSource::Values(vec![vec![
                    int(1),
                    int(2),
                    int(3),
                    Consts::String("a".to_string()).into(),
                    Consts::Boolean(true).into(),
                ]]),
                conflict: OnConflict::Abort,
            }
        );

        let stmt2 = parse_sql(
            "insert into tbl2 (c1, c2, c3) values (3, 'a', true),(4, 'b', false);",
            &[],
        )?;
        let Statement::Insert {
            columns, source, ..
        } = stmt2
        else {
            panic!("expected insert");
        };
        assert_eq!(
            columns,
            Some(vec!["c1".to_string(), "c2".to_string(), "c3".to_string()])
        );
        assert!(matches!(source, InsertSource::Values(rows) if rows.len() == 2));
        Ok(())
    }

    #[test]
    fn test_parser_insert_conflict_policies() -> Result<()> {
        let conflict = |sql: &str| -> Result<OnConflict> {
            match parse_sql(sql, &[])? {
                Statement::Insert { conflict, .. } => Ok(conflict),
                _ => panic!("expected insert"),
            }
        };
        assert_eq!(conflict("INSERT OR IGNORE INTO t VALUES (1)")?, OnConflict::Ignore);
        assert_eq!(conflict("INSERT OR REPLACE INTO t VALUES (1)")?, OnConflict::Replace);
        assert_eq!(conflict("REPLACE INTO t VALUES (1)")?, OnConflict::Replace);
        assert_eq!(conflict("INSERT OR ABORT INTO t VALUES (1)")?, OnConflict::Abort);
        assert_eq!(
            conflict("INSERT INTO t VALUES (1) ON CONFLICT (id) DO NOTHING")?,
            OnConflict::Ignore
        );
        assert_eq!(
            conflict("INSERT INTO t VALUES (1, 2) ON CONFLICT DO UPDATE SET n = excluded.n")?,
            OnConflict::Update {
                columns: BTreeMap::from([(
                    "n".to_string(),
                    Expression::Field(Some("excluded".to_string()), "n".to_string())
                )]),
                where_clause: None,
            }
        );

        let stmt = parse_sql("INSERT INTO t (a) SELECT x FROM u", &[])?;
        assert!(matches!(
            stmt,
            Statement::Insert {
                source: InsertSource::Query(_),
                ..
            }
        ));
        Ok(())
    }

    #[test]
    fn test_parser_update_delete() -> Result<()> {
        let stmt = parse_sql("UPDATE t SET a = a + 1, b = 'x' WHERE id = 3", &[])?;
        let Statement::Update {
            table_name,
            columns,
            where_clause,
        } = stmt
        else {
            panic!("expected update");
        };
        assert_eq!(table_name, "t");
        assert_eq!(columns.len(), 2);
        assert_eq!(
            where_clause,
            Some(Operation::Equal(Box::new(field("id")), Box::new(int(3))).into())
        );

        assert!(matches!(
            parse_sql("UPDATE t SET a = 1, a = 2", &[]),
            Err(Error::Syntax { .. })
        ));

        assert_eq!(
            parse_sql("DELETE FROM t", &[])?,
            Statement::Delete {
                table_name: "t".to_string(),
                where_clause: None
            }
        );
        Ok(())
    }

    #[test]
    fn test_parser_params() -> Result<()> {
        let stmt = parse_sql(
            "INSERT INTO t VALUES (?, ?)",
            &[Value::Integer(7), Value::from("it's")],
        )?;
        let Statement::Insert { source, .. } = stmt else {
            panic!("expected insert");
        };
        assert_eq!(
            source,
            InsertSource::Values(vec![vec![
                int(7),
                Consts::String("it's".to_string()).into()
            ]])
        );

        assert!(matches!(
            parse_sql("SELECT ?", &[]),
            Err(Error::Bind(_))
        ));
        assert!(matches!(
            parse_sql("SELECT 1", &[Value::Integer(1)]),
            Err(Error::Bind(_))
        ));
        // Parameters are consumed across a whole script
        let stmts = parse_script(
            "INSERT INTO t VALUES (?); INSERT INTO t VALUES (?);",
            &[Value::Integer(1), Value::Integer(2)],
        )?;
        assert_eq!(stmts.len(), 2);
        Ok(())
    }

    #[test]
    fn test_parser_select() -> Result<()> {
        let stmt = parse_sql(
            "SELECT DISTINCT u.name AS n, COUNT(*) total, o.* \
             FROM users u LEFT JOIN orders AS o ON u.id = o.user_id \
             WHERE u.age >= 18 GROUP BY u.name HAVING COUNT(*) > 1 \
             ORDER BY 2 DESC, n LIMIT 10 OFFSET 5",
            &[],
        )?;
        let Statement::Select(query) = stmt else {
            panic!("expected select");
        };
        let SetExpr::Select(select) = query.body else {
            panic!("expected simple select");
        };
        assert!(select.distinct);
        assert_eq!(
            select.projection,
            vec![
                SelectItem::Expr(
                    Expression::Field(Some("u".to_string()), "name".to_string()),
                    Some("n".to_string())
                ),
                SelectItem::Expr(
                    Expression::Function {
                        name: "COUNT".to_string(),
                        args: vec![],
                        distinct: false
                    },
                    Some("total".to_string())
                ),
                SelectItem::QualifiedWildcard("o".to_string()),
            ]
        );
        assert!(matches!(
            select.from,
            Some(FromItem::Join {
                join_type: JoinType::Left,
                predicate: Some(_),
                ..
            })
        ));
        assert_eq!(select.group_by.len(), 1);
        assert!(select.having.is_some());
        assert_eq!(query.order_by[0], (int(2), OrderDirection::Desc));
        assert_eq!(query.order_by[1], (field("n"), OrderDirection::Asc));
        assert_eq!(query.limit, Some(int(10)));
        assert_eq!(query.offset, Some(int(5)));
        Ok(())
    }

    #[test]
    fn test_parser_set_operations_and_ctes() -> Result<()> {
        let stmt = parse_sql(
            "WITH RECURSIVE cnt(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM cnt WHERE x < 5) \
             SELECT x FROM cnt EXCEPT SELECT 3",
            &[],
        )?;
        let Statement::Select(query) = stmt else {
            panic!("expected select");
        };
        assert_eq!(query.ctes.len(), 1);
        assert_eq!(query.ctes[0].columns, vec!["x".to_string()]);
        assert!(matches!(
            query.ctes[0].query.body,
            SetExpr::SetOperation {
                op: SetOperator::Union,
                all: true,
                ..
            }
        ));
        assert!(matches!(
            query.body,
            SetExpr::SetOperation {
                op: SetOperator::Except,
                all: false,
                ..
            }
        ));

        let stmt = parse_sql("WITH x AS (SELECT 1) DELETE FROM t WHERE id IN (SELECT * FROM x)", &[])?;
        assert!(matches!(stmt, Statement::With { ref statement, .. } if matches!(**statement, Statement::Delete { .. })));
        Ok(())
    }

    #[test]
    fn test_parser_expression_precedence() -> Result<()> {
        // 1 + 2 * 3 = 7 OR NOT a
        let expr = parse_where_expression("1 + 2 * 3 = 7 OR NOT a")?;
        assert_eq!(
            expr,
            Operation::Or(
                Box::new(
                    Operation::Equal(
                        Box::new(
                            Operation::Add(
                                Box::new(int(1)),
                                Box::new(
                                    Operation::Multiply(Box::new(int(2)), Box::new(int(3))).into()
                                )
                            )
                            .into()
                        ),
                        Box::new(int(7))
                    )
                    .into()
                ),
                Box::new(Operation::Not(Box::new(field("a"))).into())
            )
            .into()
        );

        let expr = parse_where_expression("a NOT BETWEEN 1 AND 5 AND b IS NOT NULL")?;
        assert!(matches!(
            expr,
            Expression::Operation(Operation::And(ref l, ref r))
                if matches!(**l, Expression::Between { negated: true, .. })
                && matches!(**r, Expression::Operation(Operation::IsNull(_, true)))
        ));

        let expr = parse_where_expression("name NOT LIKE 'a%' AND id NOT IN (1, 2)")?;
        assert_eq!(expr.to_string(), "name NOT LIKE 'a%' AND id NOT IN (1, 2)");

        let expr = parse_where_expression("CASE WHEN x > 0 THEN 'pos' ELSE CAST(x AS TEXT) END")?;
        assert!(matches!(expr, Expression::Case { operand: None, .. }));
        Ok(())
    }

    #[test]
    fn test_parser_qualifiers_and_keywords_as_idents() -> Result<()> {
        let expr = parse_where_expression("new.row = Old.key AND replace(a, 'x', 'y') = 'z'")?;
        assert_eq!(
            expr.to_string(),
            "NEW.row = OLD.key AND REPLACE(a, 'x', 'y') = 'z'"
        );
        let expr = parse_where_expression("\"Select\" = `order`")?;
        assert_eq!(
            expr,
            Operation::Equal(Box::new(field("Select")), Box::new(field("order"))).into()
        );
        Ok(())
    }

    #[test]
    fn test_parser_alter_table() -> Result<()> {
        let op = |sql: &str| -> Result<AlterTableOperation> {
            match parse_sql(sql, &[])? {
                Statement::AlterTable { operation, .. } => Ok(operation),
                _ => panic!("expected alter table"),
            }
        };
        assert!(matches!(
            op("ALTER TABLE t ADD COLUMN c INTEGER DEFAULT 0")?,
            AlterTableOperation::AddColumn(c) if c.name == "c"
        ));
        assert_eq!(
            op("ALTER TABLE t RENAME COLUMN a TO b")?,
            AlterTableOperation::RenameColumn {
                from: "a".to_string(),
                to: "b".to_string()
            }
        );
        assert_eq!(
            op("ALTER TABLE t DROP c")?,
            AlterTableOperation::DropColumn("c".to_string())
        );
        assert_eq!(
            op("ALTER TABLE t RENAME TO u")?,
            AlterTableOperation::RenameTable("u".to_string())
        );
        Ok(())
    }

    #[test]
    fn test_parser_create_trigger() -> Result<()> {
        let stmt = parse_sql(
            "CREATE TRIGGER log_insert AFTER INSERT ON users FOR EACH ROW \
             WHEN NEW.age > 18 \
             BEGIN \
               INSERT INTO audit (user_id) VALUES (NEW.id); \
               UPDATE stats SET n = n + 1; \
             END;",
            &[],
        )?;
        assert_eq!(
            stmt,
            Statement::CreateTrigger {
                name: "log_insert".to_string(),
                if_not_exists: false,
                timing: TriggerTiming::After,
                event: TriggerEvent::Insert,
                table_name: "users".to_string(),
                when: Some("NEW.age > 18".to_string()),
                body: vec![
                    "INSERT INTO audit (user_id) VALUES (NEW.id)".to_string(),
                    "UPDATE stats SET n = n + 1".to_string(),
                ],
            }
        );

        assert!(matches!(
            parse_sql(
                "CREATE TRIGGER t1 BEFORE DELETE ON t BEGIN DELETE FROM u WHERE id = ?; END",
                &[Value::Integer(1)]
            ),
            Err(Error::Bind(_))
        ));
        Ok(())
    }

    #[test]
    fn test_parser_syntax_error_position() -> Result<()> {
        assert_eq!(
            parse_sql("SELECT * FROM", &[]),
            Err(Error::Syntax {
                position: 13,
                message: "unexpected end of input".to_string()
            })
        );
        assert!(matches!(
            parse_sql("SELECT 1 2", &[]),
            Err(Error::Syntax { position: 9, .. })
        ));
        assert!(matches!(
            parse_sql("SELECT 1; SELECT 2", &[]),
            Err(Error::Syntax { position: 10, .. })
        ));
        assert!(parse_script("", &[])?.is_empty());
        Ok(())
    }

    #[test]
    fn test_parser_nesting_limit() -> Result<()> {
        let nested = |n: usize| format!("SELECT {}1{}", "(".repeat(n), ")".repeat(n));
        assert!(parse_sql(&nested(40), &[]).is_ok());
        assert!(matches!(
            parse_sql(&nested(20_000), &[]),
            Err(Error::Syntax { .. })
        ));
        assert!(matches!(
            parse_sql(&format!("SELECT {}1", "-".repeat(20_000)), &[]),
            Err(Error::Syntax { .. })
        ));
        assert!(matches!(
            parse_sql(&format!("SELECT {}TRUE", "NOT ".repeat(20_000)), &[]),
            Err(Error::Syntax { .. })
        ));

        let subqueries = format!(
            "SELECT * FROM {}t{}",
            "(SELECT * FROM ".repeat(1_000),
            ") AS s".repeat(1_000)
        );
        assert!(matches!(parse_sql(&subqueries, &[]), Err(Error::Syntax { .. })));
        Ok(())
    }
}
