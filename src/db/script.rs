//! SQL script handling.
//!
//! Uses [sqlparser](https://docs.rs/sqlparser/) with the target's dialect to
//! split multi-statement text and to tell row-returning statements apart from
//! writes, so raw SQL can be routed to `fetch_all` or `execute`.

use crate::error::{DbError, DbResult};
use crate::models::DatabaseType;
use sqlparser::ast::Statement;
use sqlparser::dialect::{Dialect, MySqlDialect, PostgreSqlDialect, SQLiteDialect};
use sqlparser::keywords::Keyword;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::{Token, Tokenizer};

/// Leading keywords of statements that produce a result set.
const ROW_KEYWORDS: &[&str] = &["SELECT", "WITH", "SHOW", "PRAGMA", "EXPLAIN", "VALUES", "DESCRIBE"];

/// Get the appropriate SQL dialect for the given database type.
fn get_dialect(db_type: DatabaseType) -> Box<dyn Dialect> {
    match db_type {
        DatabaseType::PostgreSQL => Box::new(PostgreSqlDialect {}),
        DatabaseType::MySQL => Box::new(MySqlDialect {}),
        DatabaseType::SQLite => Box::new(SQLiteDialect {}),
    }
}

/// Split `sql` into individual statements, in order.
///
/// Blank input yields no statements. Text the parser rejects fails with a
/// query error and nothing is executed.
pub fn split_statements(sql: &str, db_type: DatabaseType) -> DbResult<Vec<String>> {
    let dialect = get_dialect(db_type);
    let statements = Parser::parse_sql(dialect.as_ref(), sql)
        .map_err(|e| DbError::query(format!("Failed to parse SQL script. Error: {}", e)))?;
    Ok(statements.iter().map(ToString::to_string).collect())
}

/// Whether `sql` produces a result set.
///
/// Falls back to the leading keyword when the parser does not understand the
/// statement (vendor extensions).
pub fn returns_rows(sql: &str, db_type: DatabaseType) -> bool {
    let dialect = get_dialect(db_type);
    match Parser::parse_sql(dialect.as_ref(), sql) {
        Ok(statements) => match statements.last() {
            Some(stmt) => statement_returns_rows(stmt, sql, dialect.as_ref()),
            None => false,
        },
        Err(_) => leading_keyword_returns_rows(sql),
    }
}

fn statement_returns_rows(stmt: &Statement, sql: &str, dialect: &dyn Dialect) -> bool {
    match stmt {
        Statement::Query(_)
        | Statement::Explain { .. }
        | Statement::ExplainTable { .. }
        | Statement::Pragma { .. }
        | Statement::ShowTables { .. }
        | Statement::ShowColumns { .. }
        | Statement::ShowDatabases { .. }
        | Statement::ShowSchemas { .. }
        | Statement::ShowCreate { .. }
        | Statement::ShowFunctions { .. }
        | Statement::ShowVariable { .. }
        | Statement::ShowVariables { .. }
        | Statement::ShowStatus { .. }
        | Statement::ShowCollation { .. } => true,
        Statement::Insert(_) | Statement::Update { .. } | Statement::Delete(_) => {
            has_returning_clause(sql, dialect)
        }
        _ => false,
    }
}

fn has_returning_clause(sql: &str, dialect: &dyn Dialect) -> bool {
    Tokenizer::new(dialect, sql)
        .tokenize()
        .map(|tokens| {
            tokens
                .iter()
                .any(|t| matches!(t, Token::Word(w) if w.keyword == Keyword::RETURNING))
        })
        .unwrap_or(false)
}

fn leading_keyword_returns_rows(sql: &str) -> bool {
    let first = sql
        .trim_start_matches(|c: char| c.is_whitespace() || c == '(')
        .split(|c: char| !c.is_ascii_alphabetic())
        .next()
        .unwrap_or("")
        .to_ascii_uppercase();
    ROW_KEYWORDS.contains(&first.as_str())
}
