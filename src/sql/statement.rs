//! Parameterized statement builder.
//!
//! A [`Statement`] owns its text and its bound values together. Placeholders
//! are allocated by [`Statement::push_param`] in binding order (`@P1`, `@P2`,
//! ...), which is the convention of the TDS driver, so a placeholder can never
//! drift away from the value it stands for.

use std::fmt;
use std::sync::LazyLock;

use regex::{Captures, Regex};

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@P(\d+)").expect("Invalid placeholder regex"));

/// A value bound to a statement placeholder
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlParam {
    Text(String),
    Int(i32),
}

impl From<&str> for SqlParam {
    fn from(value: &str) -> Self {
        SqlParam::Text(value.to_string())
    }
}

impl From<String> for SqlParam {
    fn from(value: String) -> Self {
        SqlParam::Text(value)
    }
}

impl From<&String> for SqlParam {
    fn from(value: &String) -> Self {
        SqlParam::Text(value.clone())
    }
}

impl From<i32> for SqlParam {
    fn from(value: i32) -> Self {
        SqlParam::Int(value)
    }
}

impl fmt::Display for SqlParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlParam::Text(s) => write!(f, "N'{}'", s.replace('\'', "''")),
            SqlParam::Int(i) => write!(f, "{}", i),
        }
    }
}

/// T-SQL text together with its bound parameters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Statement {
    sql: String,
    params: Vec<SqlParam>,
}

impl Statement {
    /// Start a statement from literal text.
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Append literal text. Callers escape any names they interpolate.
    pub fn push_sql(&mut self, sql: &str) -> &mut Self {
        self.sql.push_str(sql);
        self
    }

    /// Bind a value and append its placeholder to the text.
    pub fn push_param(&mut self, value: impl Into<SqlParam>) -> &mut Self {
        self.params.push(value.into());
        let placeholder = format!("@P{}", self.params.len());
        self.sql.push_str(&placeholder);
        self
    }

    /// Builder-style [`Statement::push_param`].
    pub fn param(mut self, value: impl Into<SqlParam>) -> Self {
        self.push_param(value);
        self
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[SqlParam] {
        &self.params
    }

    pub fn has_params(&self) -> bool {
        !self.params.is_empty()
    }

    /// The statement text with every placeholder replaced by its literal
    /// value. Only meant for log output and dry runs.
    ///
    /// The text is scanned once, so a value that itself contains `@P1` is
    /// left alone. Tokens without a bound value stay as written.
    pub fn to_display_sql(&self) -> String {
        PLACEHOLDER_RE
            .replace_all(&self.sql, |caps: &Captures<'_>| {
                caps[1]
                    .parse::<usize>()
                    .ok()
                    .and_then(|n| n.checked_sub(1))
                    .and_then(|idx| self.params.get(idx))
                    .map_or_else(|| caps[0].to_string(), ToString::to_string)
            })
            .into_owned()
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)
    }
}
