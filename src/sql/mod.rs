//! T-SQL text helpers: identifier escaping, statement building and script batching

pub mod escape;
pub mod script;
pub mod statement;

pub use escape::{escape_name, escape_name_str, escape_quoted_literal, strip_brackets};
pub use script::{read_script_file, split_batches, Batch};
pub use statement::{SqlParam, Statement};
