//! Splitting script text into individual statements.

use crate::error::Error;

/// How statements are delimited in a script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delimiter {
    pub token: String,
    /// When set, a statement ends only at a line consisting of nothing but the token.
    /// Otherwise it ends at any line ending with the token.
    pub full_line: bool,
}

impl Default for Delimiter {
    fn default() -> Self {
        Self {
            token: ";".to_string(),
            full_line: false,
        }
    }
}

/// Split `script` into statements. Comment-only lines (`--` or `//`) and blank lines between
/// statements are dropped. Text left over after the last delimiter is an error.
pub fn split_statements(script: &str, delimiter: &Delimiter) -> Result<Vec<String>, Error> {
    let mut statements = Vec::new();
    let mut command = String::new();

    for line in script.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with("--") || trimmed.starts_with("//") {
            continue;
        }
        let body = if delimiter.full_line {
            (trimmed == delimiter.token).then_some("")
        } else {
            trailing_delimiter(trimmed, &delimiter.token)
        };
        if let Some(body) = body {
            command.push_str(body);
            let statement = command.trim().to_string();
            if !statement.is_empty() {
                statements.push(statement);
            }
            command.clear();
        } else {
            command.push_str(line);
            command.push('\n');
        }
    }

    let leftover = command.trim();
    if !leftover.is_empty() {
        return Err(Error::Generic(format!(
            "Line missing end-of-line terminator ({}) => {}",
            delimiter.token, leftover
        )));
    }
    Ok(statements)
}

/// The text before the last `token` on `line` that is followed only by whitespace or a
/// `--`/`//` comment.
fn trailing_delimiter<'a>(line: &'a str, token: &str) -> Option<&'a str> {
    line.rmatch_indices(token).find_map(|(at, _)| {
        let rest = line[at + token.len()..].trim();
        (rest.is_empty() || rest.starts_with("--") || rest.starts_with("//")).then(|| &line[..at])
    })
}
