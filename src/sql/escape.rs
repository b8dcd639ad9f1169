//! SQL Server identifier and literal escaping.
//!
//! Object names coming from callers are never trusted: anything interpolated
//! into statement text goes through one of these functions first.
//!
//! # Examples
//!
//! ```
//! use rust_sqlops::sql::{escape_name_str, escape_quoted_literal};
//!
//! assert_eq!(escape_name_str("Sales"), "[Sales]");
//! assert_eq!(escape_name_str("Sales]; DROP TABLE x; --"), "[Sales]]; DROP TABLE x; --]");
//! assert_eq!(escape_quoted_literal("O'Brien"), "'O''Brien'");
//! ```

/// Wraps a name in brackets so it can be used as a SQL Server identifier.
///
/// Every `]` inside the name is doubled, which is how SQL Server itself lets
/// a closing bracket appear inside a delimited identifier. No other character
/// is touched. `None` and the empty string both produce `[]`.
///
/// # Examples
///
/// ```
/// use rust_sqlops::sql::escape_name;
///
/// assert_eq!(escape_name(None), "[]");
/// assert_eq!(escape_name(Some("hello]")), "[hello]]]");
/// assert_eq!(escape_name(Some("[hello]")), "[[hello]]]");
/// ```
pub fn escape_name(name: Option<&str>) -> String {
    let name = name.unwrap_or("");
    let extra = name.bytes().filter(|&b| b == b']').count();
    let mut escaped = String::with_capacity(name.len() + extra + 2);

    escaped.push('[');
    let mut rest = name;
    while let Some(pos) = rest.find(']') {
        // Copy up to and including the bracket, then emit the doubling one.
        escaped.push_str(&rest[..=pos]);
        escaped.push(']');
        rest = &rest[pos + 1..];
    }
    escaped.push_str(rest);
    escaped.push(']');

    escaped
}

/// [`escape_name`] for a name that is always present.
pub fn escape_name_str(name: &str) -> String {
    escape_name(Some(name))
}

/// Renders a value as a single-quoted T-SQL string literal.
///
/// Used where a name has to appear as a string argument, e.g. `db_id('...')`.
pub fn escape_quoted_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Removes every `[` and `]` from a name.
///
/// # Examples
///
/// ```
/// use rust_sqlops::sql::strip_brackets;
///
/// assert_eq!(strip_brackets("[My]Db"), "MyDb");
/// ```
pub fn strip_brackets(name: &str) -> String {
    name.chars().filter(|&c| c != '[' && c != ']').collect()
}
