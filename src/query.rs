//! The query language understood by the server:
//!
//! ```text
//! SELECT <col[,col...]|*> FROM <table> [WHERE <col> <op> <value>]
//! ```
//!
//! Keywords are case-insensitive. At most one condition is allowed, compared with one of `=`,
//! `<`, `>`, `<=`, `>=` or `!=`. The value is either a run of non-whitespace characters or a
//! quoted literal (`'New York'`, `"New York"`).

use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString, IntoStaticStr};
use thiserror::Error as ThisError;

const KEYWORDS: [&str; 3] = ["SELECT", "FROM", "WHERE"];

/// A parsed `SELECT`. Built once per incoming query string and never mutated afterwards; it is
/// also what the result cache is keyed on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Query {
    pub columns: Columns,
    pub table: String,
    pub filter: Option<Condition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Columns {
    /// `*`, every column of the table.
    Wildcard,
    /// Explicit column names, in the order they were requested. Never empty.
    Named(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Condition {
    pub column: String,
    pub operator: Operator,
    pub value: String,
}

// Two character operators are declared first: operator matching walks the variants in order and
// must prefer `<=` over `<`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, EnumIter, EnumString, IntoStaticStr,
)]
pub enum Operator {
    #[strum(serialize = "<=")]
    LessOrEqual,
    #[strum(serialize = ">=")]
    GreaterOrEqual,
    #[strum(serialize = "!=")]
    NotEqual,
    #[strum(serialize = "=")]
    Equal,
    #[strum(serialize = "<")]
    Less,
    #[strum(serialize = ">")]
    Greater,
}

impl Operator {
    pub fn symbol(self) -> &'static str {
        self.into()
    }

    pub fn compare<T: PartialOrd + ?Sized>(self, lhs: &T, rhs: &T) -> bool {
        match self {
            Operator::Equal => lhs == rhs,
            Operator::NotEqual => lhs != rhs,
            Operator::Less => lhs < rhs,
            Operator::Greater => lhs > rhs,
            Operator::LessOrEqual => lhs <= rhs,
            Operator::GreaterOrEqual => lhs >= rhs,
        }
    }
}

impl Condition {
    /// Evaluates the condition against a row's field. When both sides parse as numbers they are
    /// compared as `f64`, otherwise as strings. A row without the column never matches.
    pub fn matches(&self, field: Option<&str>) -> bool {
        let Some(field) = field else {
            return false;
        };

        match (field.trim().parse::<f64>(), self.value.trim().parse::<f64>()) {
            (Ok(lhs), Ok(rhs)) => self.operator.compare(&lhs, &rhs),
            _ => self.operator.compare(field, self.value.as_str()),
        }
    }
}

impl Query {
    pub fn parse(text: &str) -> Result<Query, ParseError> {
        let mut parser = Parser { src: text, pos: 0 };

        parser.skip_whitespace();
        parser.keyword("SELECT")?;
        let columns = parser.columns()?;

        if !parser.skip_whitespace() {
            return Err(ParseError::ExpectedKeyword("FROM"));
        }
        parser.keyword("FROM")?;
        let table = parser
            .identifier()
            .ok_or(ParseError::ExpectedIdentifier("table name"))?
            .to_string();

        let separated = parser.skip_whitespace();
        let filter = if parser.is_eof() {
            None
        } else if separated && parser.peek_keyword("WHERE") {
            parser.keyword("WHERE")?;
            Some(parser.condition()?)
        } else {
            return Err(ParseError::TrailingInput(parser.rest().to_string()));
        };

        parser.skip_whitespace();
        if !parser.is_eof() {
            return Err(ParseError::TrailingInput(parser.rest().to_string()));
        }

        Ok(Query {
            columns,
            table,
            filter,
        })
    }
}

impl FromStr for Query {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Query::parse(s)
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.columns {
            Columns::Wildcard => write!(f, "SELECT * FROM {}", self.table)?,
            Columns::Named(names) => write!(f, "SELECT {} FROM {}", names.join(","), self.table)?,
        }

        if let Some(Condition {
            column,
            operator,
            value,
        }) = &self.filter
        {
            write!(f, " WHERE {} {} '{}'", column, operator, value)?;
        }

        Ok(())
    }
}

#[derive(Debug, ThisError, PartialEq)]
pub enum ParseError {
    #[error("malformed query; expected keyword {0}")]
    ExpectedKeyword(&'static str),
    #[error("malformed query; expected a column list or *")]
    MissingColumns,
    #[error("malformed query; * cannot be combined with named columns")]
    MixedWildcard,
    #[error("malformed query; expected {0}")]
    ExpectedIdentifier(&'static str),
    #[error("malformed query; expected a comparison operator, got {0:?}")]
    UnknownOperator(String),
    #[error("malformed query; expected a value after the operator")]
    MissingValue,
    #[error("malformed query; unterminated quoted value")]
    UnterminatedLiteral,
    #[error("malformed query; unexpected input {0:?}")]
    TrailingInput(String),
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn is_eof(&self) -> bool {
        self.pos == self.src.len()
    }

    /// Returns whether any whitespace was consumed.
    fn skip_whitespace(&mut self) -> bool {
        let rest = self.rest();
        let skipped = rest.len() - rest.trim_start().len();
        self.pos += skipped;
        skipped > 0
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        let rest = self.rest();
        let matches_word = rest
            .get(..keyword.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(keyword));

        matches_word
            && rest[keyword.len()..]
                .chars()
                .next()
                .map_or(true, char::is_whitespace)
    }

    /// Consumes `keyword` and the whitespace following it.
    fn keyword(&mut self, keyword: &'static str) -> Result<(), ParseError> {
        if !self.peek_keyword(keyword) {
            return Err(ParseError::ExpectedKeyword(keyword));
        }
        self.pos += keyword.len();
        self.skip_whitespace();
        Ok(())
    }

    fn identifier(&mut self) -> Option<&'a str> {
        let rest = self.rest();
        let len = rest
            .char_indices()
            .find(|(_, c)| !is_word_char(*c))
            .map_or(rest.len(), |(i, _)| i);

        if len == 0 {
            return None;
        }
        self.pos += len;
        Some(&rest[..len])
    }

    fn columns(&mut self) -> Result<Columns, ParseError> {
        if self.rest().starts_with('*') {
            self.pos += 1;
            let end = self.pos;
            self.skip_whitespace();
            if self.rest().starts_with(',') {
                return Err(ParseError::MixedWildcard);
            }
            self.pos = end;
            return Ok(Columns::Wildcard);
        }

        let mut names = Vec::new();
        loop {
            if self.rest().starts_with('*') {
                return Err(ParseError::MixedWildcard);
            }

            let start = self.pos;
            match self.identifier() {
                Some(name) if !is_keyword(name) => names.push(name.to_string()),
                _ if names.is_empty() => return Err(ParseError::MissingColumns),
                _ => {
                    self.pos = start;
                    return Err(ParseError::ExpectedIdentifier("column name"));
                }
            }

            let end = self.pos;
            self.skip_whitespace();
            if self.rest().starts_with(',') {
                self.pos += 1;
                self.skip_whitespace();
            } else {
                self.pos = end;
                return Ok(Columns::Named(names));
            }
        }
    }

    fn condition(&mut self) -> Result<Condition, ParseError> {
        let column = self
            .identifier()
            .ok_or(ParseError::ExpectedIdentifier("column name after WHERE"))?
            .to_string();
        self.skip_whitespace();

        let operator = Operator::iter()
            .find(|op| self.rest().starts_with(op.symbol()))
            .ok_or_else(|| {
                let token = self.rest().split_whitespace().next().unwrap_or_default();
                ParseError::UnknownOperator(token.to_string())
            })?;
        self.pos += operator.symbol().len();
        self.skip_whitespace();

        let value = self.value()?;

        Ok(Condition {
            column,
            operator,
            value,
        })
    }

    fn value(&mut self) -> Result<String, ParseError> {
        let rest = self.rest();

        if let Some(quote) = rest.chars().next().filter(|c| *c == '\'' || *c == '"') {
            let body = &rest[1..];
            let close = body.find(quote).ok_or(ParseError::UnterminatedLiteral)?;
            self.pos += close + 2;
            return Ok(body[..close].to_string());
        }

        let len = rest.find(char::is_whitespace).unwrap_or(rest.len());
        if len == 0 {
            return Err(ParseError::MissingValue);
        }
        self.pos += len;
        Ok(rest[..len].to_string())
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn is_keyword(word: &str) -> bool {
    KEYWORDS.iter().any(|kw| kw.eq_ignore_ascii_case(word))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn condition(column: &str, operator: Operator, value: &str) -> Option<Condition> {
        Some(Condition {
            column: column.to_string(),
            operator,
            value: value.to_string(),
        })
    }

    #[test]
    fn select_wildcard() {
        let query = Query::parse("SELECT * FROM t").unwrap();

        assert_eq!(
            query,
            Query {
                columns: Columns::Wildcard,
                table: String::from("t"),
                filter: None,
            }
        );
    }

    #[test]
    fn select_columns_with_filter() {
        let query = Query::parse("SELECT a,b FROM t WHERE age>30").unwrap();

        assert_eq!(
            query,
            Query {
                columns: Columns::Named(vec![String::from("a"), String::from("b")]),
                table: String::from("t"),
                filter: condition("age", Operator::Greater, "30"),
            }
        );
    }

    #[test]
    fn keywords_are_case_insensitive() {
        let query = Query::parse("select id , name from users where name = Bob").unwrap();

        assert_eq!(
            query,
            Query {
                columns: Columns::Named(vec![String::from("id"), String::from("name")]),
                table: String::from("users"),
                filter: condition("name", Operator::Equal, "Bob"),
            }
        );
    }

    #[test]
    fn surrounding_whitespace() {
        let query = Query::parse("  SELECT *   FROM\tusers  \n").unwrap();

        assert_eq!(query.columns, Columns::Wildcard);
        assert_eq!(query.table, "users");
        assert_eq!(query.filter, None);
    }

    #[test]
    fn every_operator() {
        let cases = [
            ("=", Operator::Equal),
            ("<", Operator::Less),
            (">", Operator::Greater),
            ("<=", Operator::LessOrEqual),
            (">=", Operator::GreaterOrEqual),
            ("!=", Operator::NotEqual),
        ];

        for (token, operator) in cases {
            let tight = Query::parse(&format!("SELECT * FROM t WHERE age{token}30")).unwrap();
            let spaced = Query::parse(&format!("SELECT * FROM t WHERE age {token} 30")).unwrap();

            assert_eq!(tight.filter, condition("age", operator, "30"), "{token}");
            assert_eq!(spaced.filter, condition("age", operator, "30"), "{token}");
        }
    }

    #[test]
    fn quoted_value() {
        let query = Query::parse("SELECT * FROM cities WHERE name = 'New York'").unwrap();
        assert_eq!(query.filter, condition("name", Operator::Equal, "New York"));

        let query = Query::parse("SELECT * FROM cities WHERE name=\"\"").unwrap();
        assert_eq!(query.filter, condition("name", Operator::Equal, ""));
    }

    #[test]
    fn quote_inside_bare_value_is_literal() {
        let query = Query::parse("SELECT * FROM t WHERE name = O'Brien").unwrap();
        assert_eq!(query.filter, condition("name", Operator::Equal, "O'Brien"));

        let query = Query::parse("SELECT * FROM t WHERE name = Bob'").unwrap();
        assert_eq!(query.filter, condition("name", Operator::Equal, "Bob'"));
    }

    #[test]
    fn missing_columns() {
        assert_eq!(
            Query::parse("SELECT FROM t"),
            Err(ParseError::MissingColumns)
        );
        assert_eq!(Query::parse("SELECT"), Err(ParseError::MissingColumns));
    }

    #[test]
    fn wildcard_mixed_with_names() {
        assert_eq!(
            Query::parse("SELECT *, a FROM t"),
            Err(ParseError::MixedWildcard)
        );
        assert_eq!(
            Query::parse("SELECT a, * FROM t"),
            Err(ParseError::MixedWildcard)
        );
    }

    #[test]
    fn missing_keywords() {
        assert_eq!(
            Query::parse("DELETE FROM t"),
            Err(ParseError::ExpectedKeyword("SELECT"))
        );
        assert_eq!(
            Query::parse("SELECT a t"),
            Err(ParseError::ExpectedKeyword("FROM"))
        );
        assert_eq!(
            Query::parse("SELECTa FROM t"),
            Err(ParseError::ExpectedKeyword("SELECT"))
        );
    }

    #[test]
    fn bad_column_list() {
        assert_eq!(
            Query::parse("SELECT a,,b FROM t"),
            Err(ParseError::ExpectedIdentifier("column name"))
        );
        assert_eq!(
            Query::parse("SELECT a, FROM t"),
            Err(ParseError::ExpectedIdentifier("column name"))
        );
    }

    #[test]
    fn missing_table() {
        assert_eq!(
            Query::parse("SELECT * FROM"),
            Err(ParseError::ExpectedIdentifier("table name"))
        );
        assert_eq!(
            Query::parse("SELECT * FROM ../etc"),
            Err(ParseError::ExpectedIdentifier("table name"))
        );
    }

    #[test]
    fn unknown_operator() {
        assert_eq!(
            Query::parse("SELECT * FROM t WHERE age ~ 30"),
            Err(ParseError::UnknownOperator(String::from("~")))
        );
        assert_eq!(
            Query::parse("SELECT * FROM t WHERE age"),
            Err(ParseError::UnknownOperator(String::new()))
        );
    }

    #[test]
    fn missing_value() {
        assert_eq!(
            Query::parse("SELECT * FROM t WHERE age >"),
            Err(ParseError::MissingValue)
        );
        assert_eq!(
            Query::parse("SELECT * FROM t WHERE name = 'Bob"),
            Err(ParseError::UnterminatedLiteral)
        );
    }

    #[test]
    fn single_condition_only() {
        assert_eq!(
            Query::parse("SELECT * FROM t WHERE a = 1 AND b = 2"),
            Err(ParseError::TrailingInput(String::from("AND b = 2")))
        );
        assert_eq!(
            Query::parse("SELECT * FROM t LIMIT 1"),
            Err(ParseError::TrailingInput(String::from("LIMIT 1")))
        );
    }

    #[test]
    fn numeric_comparison() {
        let filter = Condition {
            column: String::from("age"),
            operator: Operator::Greater,
            value: String::from("30"),
        };

        assert!(filter.matches(Some("35")));
        assert!(!filter.matches(Some("25")));
        // "100" < "30" as text, but not as numbers.
        assert!(filter.matches(Some("100")));
        assert!(filter.matches(Some(" 31 ")));
        assert!(!filter.matches(None));
    }

    #[test]
    fn numeric_equality_ignores_formatting() {
        let filter = Condition {
            column: String::from("price"),
            operator: Operator::Equal,
            value: String::from("2"),
        };

        assert!(filter.matches(Some("2.0")));
        assert!(filter.matches(Some("2e0")));
    }

    #[test]
    fn text_comparison_fallback() {
        let filter = Condition {
            column: String::from("name"),
            operator: Operator::Less,
            value: String::from("Bob"),
        };

        assert!(filter.matches(Some("Alice")));
        assert!(!filter.matches(Some("Carol")));
        // Mixed kinds fall back to text as well.
        assert!(filter.matches(Some("42")));
    }

    #[test]
    fn nan_never_compares_equal() {
        let filter = Condition {
            column: String::from("x"),
            operator: Operator::Equal,
            value: String::from("NaN"),
        };

        assert!(!filter.matches(Some("NaN")));

        let filter = Condition {
            operator: Operator::NotEqual,
            ..filter
        };
        assert!(filter.matches(Some("NaN")));
    }

    #[test]
    fn display_is_canonical() {
        let query = Query::parse("select a , b from t where x>=1").unwrap();

        assert_eq!(query.to_string(), "SELECT a,b FROM t WHERE x >= '1'");
    }

    #[test]
    fn operator_round_trips_through_text() {
        for operator in Operator::iter() {
            assert_eq!(operator.to_string().parse::<Operator>(), Ok(operator));
        }
    }
}
