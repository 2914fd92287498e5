//! SQL Lexer - Tokenizes SQL input text into a stream of tokens
//!
//! Quoting: `'text'` is a string literal (`''` escapes a quote), `"name"`
//! and `` `name` `` are quoted identifiers (the doubled quote character
//! escapes it). Quoted identifiers are never keywords and keep their case.

use std::{fmt::Display, iter::Peekable, str::CharIndices};

use crate::error::{Error, Result};

/// Represents a single lexical token in the SQL input
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// SQL reserved keyword
    Keyword(Keyword),
    /// Identifier such as table name or column name
    Ident(String),
    /// String literal
    String(String),
    /// Numeric literal (integer or floating-point)
    Number(String),
    /// Positional parameter `?`
    Parameter,
    /// Operators and punctuation
    OpenParen,
    CloseParen,
    Comma,
    Semicolon,
    Period,
    Asterisk,
    Plus,
    Minus,
    Slash,
    Percent,
    Concat,
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
}

impl Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Token::Keyword(keyword) => keyword.to_str(),
            Token::Ident(ident) => ident,
            Token::String(v) => v,
            Token::Number(n) => n,
            Token::Parameter => "?",
            Token::OpenParen => "(",
            Token::CloseParen => ")",
            Token::Comma => ",",
            Token::Semicolon => ";",
            Token::Period => ".",
            Token::Asterisk => "*",
            Token::Plus => "+",
            Token::Minus => "-",
            Token::Slash => "/",
            Token::Percent => "%",
            Token::Concat => "||",
            Token::Equal => "=",
            Token::NotEqual => "!=",
            Token::LessThan => "<",
            Token::LessThanOrEqual => "<=",
            Token::GreaterThan => ">",
            Token::GreaterThanOrEqual => ">=",
        })
    }
}

/// A token together with its byte span in the input
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub start: usize,
    pub end: usize,
}

/// SQL keywords
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Abort,
    Add,
    After,
    All,
    Alter,
    And,
    As,
    Asc,
    Autoincrement,
    Before,
    Begin,
    Between,
    By,
    Case,
    Cast,
    Column,
    Conflict,
    Create,
    Cross,
    Default,
    Delete,
    Desc,
    Distinct,
    Do,
    Drop,
    Each,
    Else,
    End,
    Except,
    Exists,
    False,
    For,
    From,
    Group,
    Having,
    If,
    Ignore,
    In,
    Inner,
    Insert,
    Intersect,
    Into,
    Is,
    Join,
    Key,
    Left,
    Like,
    Limit,
    Not,
    Nothing,
    Null,
    Offset,
    On,
    Or,
    Order,
    Outer,
    Primary,
    Recursive,
    Rename,
    Replace,
    Right,
    Row,
    Select,
    Set,
    Table,
    Then,
    To,
    Trigger,
    True,
    Union,
    Update,
    Values,
    When,
    Where,
    With,
}

impl Keyword {
    /// Attempts to parse a string as a keyword (case-insensitive)
    pub fn from_str(ident: &str) -> Option<Keyword> {
        Some(match ident.to_uppercase().as_ref() {
            "ABORT" => Keyword::Abort,
            "ADD" => Keyword::Add,
            "AFTER" => Keyword::After,
            "ALL" => Keyword::All,
            "ALTER" => Keyword::Alter,
            "AND" => Keyword::And,
            "AS" => Keyword::As,
            "ASC" => Keyword::Asc,
            "AUTOINCREMENT" => Keyword::Autoincrement,
            "BEFORE" => Keyword::Before,
            "BEGIN" => Keyword::Begin,
            "BETWEEN" => Keyword::Between,
            "BY" => Keyword::By,
            "CASE" => Keyword::Case,
            "CAST" => Keyword::Cast,
            "COLUMN" => Keyword::Column,
            "CONFLICT" => Keyword::Conflict,
            "CREATE" => Keyword::Create,
            "CROSS" => Keyword::Cross,
            "DEFAULT" => Keyword::Default,
            "DELETE" => Keyword::Delete,
            "DESC" => Keyword::Desc,
            "DISTINCT" => Keyword::Distinct,
            "DO" => Keyword::Do,
            "DROP" => Keyword::Drop,
            "EACH" => Keyword::Each,
            "ELSE" => Keyword::Else,
            "END" => Keyword::End,
            "EXCEPT" => Keyword::Except,
            "EXISTS" => Keyword::Exists,
            "FALSE" => Keyword::False,
            "FOR" => Keyword::For,
            "FROM" => Keyword::From,
            "GROUP" => Keyword::Group,
            "HAVING" => Keyword::Having,
            "IF" => Keyword::If,
            "IGNORE" => Keyword::Ignore,
            "IN" => Keyword::In,
            "INNER" => Keyword::Inner,
            "INSERT" => Keyword::Insert,
            "INTERSECT" => Keyword::Intersect,
            "INTO" => Keyword::Into,
            "IS" => Keyword::Is,
            "JOIN" => Keyword::Join,
            "KEY" => Keyword::Key,
            "LEFT" => Keyword::Left,
            "LIKE" => Keyword::Like,
            "LIMIT" => Keyword::Limit,
            "NOT" => Keyword::Not,
            "NOTHING" => Keyword::Nothing,
            "NULL" => Keyword::Null,
            "OFFSET" => Keyword::Offset,
            "ON" => Keyword::On,
            "OR" => Keyword::Or,
            "ORDER" => Keyword::Order,
            "OUTER" => Keyword::Outer,
            "PRIMARY" => Keyword::Primary,
            "RECURSIVE" => Keyword::Recursive,
            "RENAME" => Keyword::Rename,
            "REPLACE" => Keyword::Replace,
            "RIGHT" => Keyword::Right,
            "ROW" => Keyword::Row,
            "SELECT" => Keyword::Select,
            "SET" => Keyword::Set,
            "TABLE" => Keyword::Table,
            "THEN" => Keyword::Then,
            "TO" => Keyword::To,
            "TRIGGER" => Keyword::Trigger,
            "TRUE" => Keyword::True,
            "UNION" => Keyword::Union,
            "UPDATE" => Keyword::Update,
            "VALUES" => Keyword::Values,
            "WHEN" => Keyword::When,
            "WHERE" => Keyword::Where,
            "WITH" => Keyword::With,
            _ => return None,
        })
    }

    /// Returns the uppercase string representation of the keyword
    pub fn to_str(&self) -> &'static str {
        match self {
            Keyword::Abort => "ABORT",
            Keyword::Add => "ADD",
            Keyword::After => "AFTER",
            Keyword::All => "ALL",
            Keyword::Alter => "ALTER",
            Keyword::And => "AND",
            Keyword::As => "AS",
            Keyword::Asc => "ASC",
            Keyword::Autoincrement => "AUTOINCREMENT",
            Keyword::Before => "BEFORE",
            Keyword::Begin => "BEGIN",
            Keyword::Between => "BETWEEN",
            Keyword::By => "BY",
            Keyword::Case => "CASE",
            Keyword::Cast => "CAST",
            Keyword::Column => "COLUMN",
            Keyword::Conflict => "CONFLICT",
            Keyword::Create => "CREATE",
            Keyword::Cross => "CROSS",
            Keyword::Default => "DEFAULT",
            Keyword::Delete => "DELETE",
            Keyword::Desc => "DESC",
            Keyword::Distinct => "DISTINCT",
            Keyword::Do => "DO",
            Keyword::Drop => "DROP",
            Keyword::Each => "EACH",
            Keyword::Else => "ELSE",
            Keyword::End => "END",
            Keyword::Except => "EXCEPT",
            Keyword::Exists => "EXISTS",
            Keyword::False => "FALSE",
            Keyword::For => "FOR",
            Keyword::From => "FROM",
            Keyword::Group => "GROUP",
            Keyword::Having => "HAVING",
            Keyword::If => "IF",
            Keyword::Ignore => "IGNORE",
            Keyword::In => "IN",
            Keyword::Inner => "INNER",
            Keyword::Insert => "INSERT",
            Keyword::Intersect => "INTERSECT",
            Keyword::Into => "INTO",
            Keyword::Is => "IS",
            Keyword::Join => "JOIN",
            Keyword::Key => "KEY",
            Keyword::Left => "LEFT",
            Keyword::Like => "LIKE",
            Keyword::Limit => "LIMIT",
            Keyword::Not => "NOT",
            Keyword::Nothing => "NOTHING",
            Keyword::Null => "NULL",
            Keyword::Offset => "OFFSET",
            Keyword::On => "ON",
            Keyword::Or => "OR",
            Keyword::Order => "ORDER",
            Keyword::Outer => "OUTER",
            Keyword::Primary => "PRIMARY",
            Keyword::Recursive => "RECURSIVE",
            Keyword::Rename => "RENAME",
            Keyword::Replace => "REPLACE",
            Keyword::Right => "RIGHT",
            Keyword::Row => "ROW",
            Keyword::Select => "SELECT",
            Keyword::Set => "SET",
            Keyword::Table => "TABLE",
            Keyword::Then => "THEN",
            Keyword::To => "TO",
            Keyword::Trigger => "TRIGGER",
            Keyword::True => "TRUE",
            Keyword::Union => "UNION",
            Keyword::Update => "UPDATE",
            Keyword::Values => "VALUES",
            Keyword::When => "WHEN",
            Keyword::Where => "WHERE",
            Keyword::With => "WITH",
        }
    }

    /// Keywords that may still be used as bare identifiers (lowercased)
    pub fn is_reserved(&self) -> bool {
        !matches!(
            self,
            Keyword::Abort
                | Keyword::Add
                | Keyword::After
                | Keyword::Asc
                | Keyword::Autoincrement
                | Keyword::Before
                | Keyword::Begin
                | Keyword::Column
                | Keyword::Conflict
                | Keyword::Desc
                | Keyword::Do
                | Keyword::Each
                | Keyword::If
                | Keyword::Ignore
                | Keyword::Key
                | Keyword::Nothing
                | Keyword::Recursive
                | Keyword::Rename
                | Keyword::Replace
                | Keyword::Row
                | Keyword::Trigger
        )
    }
}

impl Display for Keyword {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.to_str())
    }
}

/// SQL lexical analyzer (lexer/tokenizer)
#[derive(Clone)]
pub struct Lexer<'a> {
    iter: Peekable<CharIndices<'a>>,
    len: usize,
}

impl<'a> Iterator for Lexer<'a> {
    type Item = Result<Spanned>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Err(err) = self.erase_whitespace() {
            return Some(Err(err));
        }
        let start = self.pos();
        match self.scan() {
            Ok(Some(token)) => Some(Ok(Spanned {
                token,
                start,
                end: self.pos(),
            })),
            Ok(None) => self.iter.peek().map(|(i, c)| {
                Err(Error::syntax(*i, format!("unexpected character {}", c)))
            }),
            Err(err) => Some(Err(err)),
        }
    }
}

impl<'a> Lexer<'a> {
    /// Creates a new lexer for the given SQL text
    pub fn new(sql_text: &'a str) -> Self {
        Self {
            iter: sql_text.char_indices().peekable(),
            len: sql_text.len(),
        }
    }

    /// Byte offset of the next unread character
    fn pos(&mut self) -> usize {
        self.iter.peek().map_or(self.len, |(i, _)| *i)
    }

    fn peek_char(&mut self) -> Option<char> {
        self.iter.peek().map(|(_, c)| *c)
    }

    /// Looks one character past the next one
    fn peek_second(&self) -> Option<char> {
        let mut iter = self.iter.clone();
        iter.next();
        iter.next().map(|(_, c)| c)
    }

    /// Consumes the next character if it satisfies the predicate
    fn next_if<F: Fn(char) -> bool>(&mut self, predicate: F) -> Option<char> {
        self.iter.next_if(|(_, c)| predicate(*c)).map(|(_, c)| c)
    }

    /// Consumes consecutive characters while they satisfy the predicate
    fn next_while<F: Fn(char) -> bool>(&mut self, predicate: F) -> Option<String> {
        let mut value = String::new();
        while let Some(c) = self.next_if(&predicate) {
            value.push(c);
        }
        Some(value).filter(|v| !v.is_empty())
    }

    /// Removes whitespace and comments from the input stream
    fn erase_whitespace(&mut self) -> Result<()> {
        loop {
            self.next_while(|c| c.is_whitespace());
            match (self.peek_char(), self.peek_second()) {
                (Some('-'), Some('-')) => {
                    self.next_while(|c| c != '\n');
                }
                (Some('/'), Some('*')) => {
                    let start = self.pos();
                    self.iter.next();
                    self.iter.next();
                    loop {
                        match self.iter.next() {
                            Some((_, '*')) if self.next_if(|c| c == '/').is_some() => break,
                            Some(_) => {}
                            None => return Err(Error::syntax(start, "unterminated comment")),
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    /// Scans and returns the next token
    fn scan(&mut self) -> Result<Option<Token>> {
        match self.peek_char() {
            Some('\'') => self.scan_string(),
            Some('"') => self.scan_quoted_ident('"'),
            Some('`') => self.scan_quoted_ident('`'),
            Some(c) if c.is_ascii_digit() => Ok(self.scan_number()),
            Some('.') if self.peek_second().is_some_and(|c| c.is_ascii_digit()) => {
                Ok(self.scan_number())
            }
            Some(c) if c.is_alphabetic() || c == '_' => Ok(self.scan_ident()),
            Some(_) => Ok(self.scan_symbol()),
            None => Ok(None),
        }
    }

    /// Scans a string literal (enclosed in single quotes)
    fn scan_string(&mut self) -> Result<Option<Token>> {
        let start = self.pos();
        self.iter.next();
        let mut val = String::new();
        loop {
            match self.iter.next() {
                Some((_, '\'')) if self.next_if(|c| c == '\'').is_some() => val.push('\''),
                Some((_, '\'')) => break,
                Some((_, c)) => val.push(c),
                None => return Err(Error::syntax(start, "unexpected end of string")),
            }
        }
        Ok(Some(Token::String(val)))
    }

    /// Scans a quoted identifier
    fn scan_quoted_ident(&mut self, quote: char) -> Result<Option<Token>> {
        let start = self.pos();
        self.iter.next();
        let mut val = String::new();
        loop {
            match self.iter.next() {
                Some((_, c)) if c == quote && self.next_if(|n| n == quote).is_some() => {
                    val.push(quote)
                }
                Some((_, c)) if c == quote => break,
                Some((_, c)) => val.push(c),
                None => return Err(Error::syntax(start, "unexpected end of quoted identifier")),
            }
        }
        if val.is_empty() {
            return Err(Error::syntax(start, "empty quoted identifier"));
        }
        Ok(Some(Token::Ident(val)))
    }

    /// Scans a numeric literal (integer, decimal or exponent form)
    fn scan_number(&mut self) -> Option<Token> {
        let mut val = self.next_while(|c| c.is_ascii_digit()).unwrap_or_default();
        if let Some(sep) = self.next_if(|c| c == '.') {
            val.push(sep);
            while let Some(c) = self.next_if(|c| c.is_ascii_digit()) {
                val.push(c);
            }
        }
        let exponent = matches!(self.peek_char(), Some('e' | 'E'))
            && match self.peek_second() {
                Some(c) if c.is_ascii_digit() => true,
                Some('+' | '-') => {
                    let mut iter = self.iter.clone();
                    iter.next();
                    iter.next();
                    iter.next().is_some_and(|(_, c)| c.is_ascii_digit())
                }
                _ => false,
            };
        if exponent {
            val.extend(self.iter.next().map(|(_, c)| c));
            if let Some(sign) = self.next_if(|c| c == '+' || c == '-') {
                val.push(sign);
            }
            while let Some(c) = self.next_if(|c| c.is_ascii_digit()) {
                val.push(c);
            }
        }
        Some(Token::Number(val))
    }

    /// Scans an identifier or keyword
    fn scan_ident(&mut self) -> Option<Token> {
        let mut val = self.next_if(|c| c.is_alphabetic() || c == '_')?.to_string();
        while let Some(c) = self.next_if(|c| c.is_alphanumeric() || c == '_' || c == '$') {
            val.push(c);
        }
        // Returns Keyword if matched, otherwise returns as a regular Ident
        Some(Keyword::from_str(&val).map_or(Token::Ident(val), Token::Keyword))
    }

    /// Scans an operator or punctuation token
    fn scan_symbol(&mut self) -> Option<Token> {
        let c = self.peek_char()?;
        let token = match c {
            '*' => Token::Asterisk,
            '(' => Token::OpenParen,
            ')' => Token::CloseParen,
            ',' => Token::Comma,
            ';' => Token::Semicolon,
            '.' => Token::Period,
            '+' => Token::Plus,
            '-' => Token::Minus,
            '/' => Token::Slash,
            '%' => Token::Percent,
            '?' => Token::Parameter,
            '=' => Token::Equal,
            '<' => match self.peek_second() {
                Some('=') => Token::LessThanOrEqual,
                Some('>') => Token::NotEqual,
                _ => Token::LessThan,
            },
            '>' => match self.peek_second() {
                Some('=') => Token::GreaterThanOrEqual,
                _ => Token::GreaterThan,
            },
            '!' if self.peek_second() == Some('=') => Token::NotEqual,
            '|' if self.peek_second() == Some('|') => Token::Concat,
            _ => return None,
        };
        self.iter.next();
        let two_chars = matches!(
            token,
            Token::LessThanOrEqual | Token::GreaterThanOrEqual | Token::Concat
        ) || (token == Token::NotEqual)
            || (token == Token::Equal && self.peek_char() == Some('='));
        if two_chars {
            self.iter.next();
        }
        Some(token)
    }
}

#[cfg(test)]
mod tests {
    use super::{Keyword, Lexer, Token};
    use crate::error::{Error, Result};

    fn tokens(sql: &str) -> Result<Vec<Token>> {
        Lexer::new(sql)
            .map(|t| t.map(|s| s.token))
            .collect::<Result<Vec<_>>>()
    }

    #[test]
    fn test_lexer_create_table() -> Result<()> {
        let tokens1 = tokens(
            "CREATE table tbl
                (
                    id1 int primary key,
                    id2 integer
                );
                ",
        )?;

        assert_eq!(
            tokens1,
            vec![
                Token::Keyword(Keyword::Create),
                Token::Keyword(Keyword::Table),
                Token::Ident("tbl".to_string()),
                Token::OpenParen,
                Token::Ident("id1".to_string()),
                Token::Ident("int".to_string()),
                Token::Keyword(Keyword::Primary),
                Token::Keyword(Keyword::Key),
                Token::Comma,
                Token::Ident("id2".to_string()),
                Token::Ident("integer".to_string()),
                Token::CloseParen,
                Token::Semicolon
            ]
        );
        Ok(())
    }

    #[test]
    fn test_lexer_insert_into() -> Result<()> {
        let tokens1 = tokens("insert into tbl values (1, ?, '3', true, 4.55, 1e3);")?;

        assert_eq!(
            tokens1,
            vec![
                Token::Keyword(Keyword::Insert),
                Token::Keyword(Keyword::Into),
                Token::Ident("tbl".to_string()),
                Token::Keyword(Keyword::Values),
                Token::OpenParen,
                Token::Number("1".to_string()),
                Token::Comma,
                Token::Parameter,
                Token::Comma,
                Token::String("3".to_string()),
                Token::Comma,
                Token::Keyword(Keyword::True),
                Token::Comma,
                Token::Number("4.55".to_string()),
                Token::Comma,
                Token::Number("1e3".to_string()),
                Token::CloseParen,
                Token::Semicolon,
            ]
        );
        Ok(())
    }

    #[test]
    fn test_lexer_quoting() -> Result<()> {
        assert_eq!(
            tokens(r#"'it''s' "Select" `a``b` Users"#)?,
            vec![
                Token::String("it's".to_string()),
                Token::Ident("Select".to_string()),
                Token::Ident("a`b".to_string()),
                Token::Ident("Users".to_string()),
            ]
        );
        assert!(matches!(tokens("'open"), Err(Error::Syntax { position: 0, .. })));
        assert!(matches!(tokens("a \"b"), Err(Error::Syntax { position: 2, .. })));
        Ok(())
    }

    #[test]
    fn test_lexer_operators_and_comments() -> Result<()> {
        assert_eq!(
            tokens("a<>b -- trailing\n != c <= d >= e == f || g /* block */ < h")?,
            vec![
                Token::Ident("a".to_string()),
                Token::NotEqual,
                Token::Ident("b".to_string()),
                Token::NotEqual,
                Token::Ident("c".to_string()),
                Token::LessThanOrEqual,
                Token::Ident("d".to_string()),
                Token::GreaterThanOrEqual,
                Token::Ident("e".to_string()),
                Token::Equal,
                Token::Ident("f".to_string()),
                Token::Concat,
                Token::Ident("g".to_string()),
                Token::LessThan,
                Token::Ident("h".to_string()),
            ]
        );
        assert!(matches!(tokens("a # b"), Err(Error::Syntax { position: 2, .. })));
        Ok(())
    }

    #[test]
    fn test_lexer_spans() -> Result<()> {
        let spans = Lexer::new("select  name").collect::<Result<Vec<_>>>()?;
        assert_eq!((spans[0].start, spans[0].end), (0, 6));
        assert_eq!((spans[1].start, spans[1].end), (8, 12));
        Ok(())
    }
}
