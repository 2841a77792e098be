//! Templated statement builder
//!
//! Plain textual `%s` substitution. Nothing is quoted or escaped: callers
//! put identifier quotes in the template itself (`DROP EXTENSION "%s"`).
//! Never pass untrusted input as an argument; this is not a parameterized
//! query mechanism and offers no protection against SQL injection.
//!
//! Supported placeholders:
//! - `%s`, `%d`: next positional argument
//! - `%2$s`: the second argument, without advancing the positional cursor
//! - `%%`: a literal `%`
//!
//! Extra arguments are ignored.

use crate::error::TemplateError;
use std::fmt::{self, Write};

/// Substitute `args` into `template`
///
/// # Errors
/// Fails when a placeholder has no matching argument or uses an
/// unsupported conversion.
pub fn build(template: &str, args: &[&dyn fmt::Display]) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    let mut cursor = 0;

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }

        // Optional explicit position: digits followed by '$'
        let mut digits = String::new();
        while let Some(d) = chars.peek().copied().filter(char::is_ascii_digit) {
            digits.push(d);
            chars.next();
        }
        let explicit = if digits.is_empty() {
            None
        } else if chars.next_if_eq(&'$').is_some() {
            match digits.parse::<usize>() {
                Ok(n) if n > 0 => Some(n - 1),
                _ => return Err(TemplateError::MissingArgument { index: 0 }),
            }
        } else {
            // "%12s"-style widths are not supported
            return Err(TemplateError::UnsupportedConversion(
                digits.chars().next().unwrap_or('%'),
            ));
        };

        match chars.next() {
            None => return Err(TemplateError::UnterminatedPlaceholder),
            Some('%') if explicit.is_none() => out.push('%'),
            Some('s') | Some('d') => {
                let index = explicit.unwrap_or_else(|| {
                    cursor += 1;
                    cursor - 1
                });
                let arg = args
                    .get(index)
                    .ok_or(TemplateError::MissingArgument { index })?;
                // Writing to a String cannot fail
                let _ = write!(out, "{}", arg);
            }
            Some(other) => return Err(TemplateError::UnsupportedConversion(other)),
        }
    }

    Ok(out)
}
