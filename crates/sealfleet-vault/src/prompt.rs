// SPDX-FileCopyrightText: 2026 Sealfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Secret value acquisition: dotenv-style files, `NAME=VALUE` arguments, and
//! no-echo TTY prompts. Values never pass through an editor temp file.

use std::io::{BufRead, IsTerminal};
use std::path::Path;

use sealfleet_core::SealError;
use zeroize::Zeroizing;

use crate::bundle::{validate_secret_name, SecretValue};

/// Parse a `NAME=VALUE` assignment from the command line.
pub fn parse_assignment(arg: &str) -> Result<(String, SecretValue), SealError> {
    let (name, value) = arg
        .split_once('=')
        .ok_or_else(|| SealError::Config("expected NAME=VALUE".to_string()))?;
    let name = name.trim();
    validate_secret_name(name)?;
    Ok((name.to_string(), SecretValue::new(value)))
}

/// Parse dotenv-style text: `NAME=VALUE` per line, `#` comments, optional
/// `export ` prefix, and matching single or double quotes stripped.
///
/// Duplicate names are returned as-is so bundle creation can reject them.
pub fn parse_dotenv(text: &str) -> Result<Vec<(String, SecretValue)>, SealError> {
    let mut entries = Vec::new();
    for (number, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        let (name, value) = line.split_once('=').ok_or_else(|| {
            SealError::MalformedPayload(format!("line {}: expected NAME=VALUE", number + 1))
        })?;
        let name = name.trim();
        validate_secret_name(name)?;
        entries.push((name.to_string(), SecretValue::new(unquote(value.trim()))));
    }
    Ok(entries)
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

/// Read and parse a dotenv-style secrets file.
pub fn read_dotenv_file(path: &Path) -> Result<Vec<(String, SecretValue)>, SealError> {
    let text = Zeroizing::new(std::fs::read_to_string(path).map_err(|e| {
        SealError::Config(format!("failed to read secrets file {}: {e}", path.display()))
    })?);
    parse_dotenv(&text)
}

/// Read one secret value.
///
/// On a terminal the value is prompted for without echo; otherwise a single
/// line is read from stdin, so values can be piped in from a password manager.
pub fn read_secret_value(name: &str) -> Result<SecretValue, SealError> {
    validate_secret_name(name)?;

    let value = if std::io::stdin().is_terminal() {
        Zeroizing::new(
            rpassword::prompt_password(format!("{name}: "))
                .map_err(|e| SealError::Config(format!("failed to read value for {name}: {e}")))?,
        )
    } else {
        let mut line = Zeroizing::new(String::new());
        std::io::stdin()
            .lock()
            .read_line(&mut line)
            .map_err(|e| SealError::Config(format!("failed to read value for {name}: {e}")))?;
        let trimmed = line.trim_end_matches(['\r', '\n']).len();
        line.truncate(trimmed);
        line
    };

    if value.is_empty() {
        return Err(SealError::Config(format!("empty value for {name} not allowed")));
    }
    Ok(SecretValue::new(value.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn assignment_splits_on_first_equals() {
        let (name, value) = parse_assignment("DSN=postgres://u:p@h/db?x=1").unwrap();
        assert_eq!(name, "DSN");
        assert_eq!(value.expose(), "postgres://u:p@h/db?x=1");
    }

    #[test]
    fn assignment_error_does_not_echo_value() {
        let err = parse_assignment("no-equals-hunter2").unwrap_err();
        assert!(matches!(err, SealError::Config(_)));
        assert!(!err.to_string().contains("hunter2"));
        let err = parse_assignment("bad-name=hunter2").unwrap_err();
        assert!(!err.to_string().contains("hunter2"));
    }

    #[test]
    fn dotenv_handles_comments_export_and_quotes() {
        let text = "# service creds\nexport API_TOKEN=\"abc def\"\n\nvault_db_password='p@ss'\nPLAIN=x=y\n";
        let entries = parse_dotenv(text).unwrap();
        let flat: Vec<_> = entries
            .iter()
            .map(|(k, v)| (k.as_str(), v.expose()))
            .collect();
        assert_eq!(
            flat,
            vec![
                ("API_TOKEN", "abc def"),
                ("vault_db_password", "p@ss"),
                ("PLAIN", "x=y"),
            ]
        );
    }

    #[test]
    fn dotenv_reports_line_numbers() {
        let err = parse_dotenv("A=1\nnot an assignment\n").unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn dotenv_file_is_read() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "TOKEN=abc").unwrap();
        let entries = read_dotenv_file(file.path()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].1.expose(), "abc");
    }
}
