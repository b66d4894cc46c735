//! External command invocations
//!
//! A command template carries positional placeholders (`%b`, `%s`, `%d`)
//! that are replaced by shell-escaped values before the command is handed
//! to the shell.

use bytes::Bytes;

/// Placeholder for the batch-list path (or `-` for piped input).
pub const BATCH_PLACEHOLDER: &str = "%b";
/// Placeholder for the source path.
pub const SOURCE_PLACEHOLDER: &str = "%s";
/// Placeholder for the destination path.
pub const DEST_PLACEHOLDER: &str = "%d";

/// A fully specified external command run.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    template: String,
    substitutions: Vec<(&'static str, String)>,
    input: Option<Bytes>,
}

impl Invocation {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            substitutions: Vec::new(),
            input: None,
        }
    }

    /// Substitute `placeholder` with `value` when rendering.
    pub fn arg(mut self, placeholder: &'static str, value: impl Into<String>) -> Self {
        self.substitutions.push((placeholder, value.into()));
        self
    }

    /// Feed `input` to the command's standard input. Empty input is ignored.
    pub fn input(mut self, input: impl Into<Bytes>) -> Self {
        let input = input.into();
        self.input = if input.is_empty() { None } else { Some(input) };
        self
    }

    pub fn stdin(&self) -> Option<&Bytes> {
        self.input.as_ref()
    }

    pub fn input_len(&self) -> usize {
        self.input.as_ref().map_or(0, |i| i.len())
    }

    /// Render the shell command line.
    ///
    /// Placeholders are replaced in a single left-to-right pass so a value
    /// containing another placeholder is never expanded twice.
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(self.template.len());
        let mut rest = self.template.as_str();

        'scan: while let Some(pos) = rest.find('%') {
            out.push_str(&rest[..pos]);
            let tail = &rest[pos..];
            for (placeholder, value) in &self.substitutions {
                if tail.starts_with(placeholder) {
                    out.push_str(&shell_quote(value));
                    rest = &tail[placeholder.len()..];
                    continue 'scan;
                }
            }
            out.push('%');
            rest = &tail[1..];
        }
        out.push_str(rest);
        out
    }
}

/// Quote a value for POSIX `sh`.
///
/// Values made only of characters that are never special to the shell are
/// left untouched so rendered commands stay readable in logs.
pub fn shell_quote(value: &str) -> String {
    let plain = !value.is_empty()
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"-_./:@,+=%".contains(&b));
    if plain {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}
