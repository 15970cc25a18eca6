//! SQL text preprocessing applied before a statement is sent to the worker.
//!
//! - [`strip_comments`] - drop `--` and `/* */` comments
//! - [`format`] - substitute `:name` parameters with literals

mod comments;
mod params;

use std::path::Path;

pub use comments::strip_comments;
pub use params::{format, literal};

use crate::error::{Error, Result};
use crate::protocol::Params;

/// Check whether `sql` names a `.sql` file rather than holding a statement.
pub fn is_file_reference(sql: &str) -> bool {
    let sql = sql.trim();
    !sql.contains('\n')
        && sql.len() > 4
        && sql
            .get(sql.len() - 4..)
            .is_some_and(|ext| ext.eq_ignore_ascii_case(".sql"))
}

/// Resolve a file reference, strip comments and bind parameters.
pub async fn prepare(sql: &str, params: &Params) -> Result<String> {
    let text = if is_file_reference(sql) {
        let path = Path::new(sql.trim());
        tokio::fs::read_to_string(path)
            .await
            .map_err(|source| Error::SqlFile {
                path: path.to_path_buf(),
                source,
            })?
    } else {
        sql.to_string()
    };

    Ok(format(&strip_comments(&text), params))
}
