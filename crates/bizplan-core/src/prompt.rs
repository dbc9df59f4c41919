//! Prompt construction: turns a [`BusinessRecord`] into the text sent to the
//! model. Pure logic, no I/O.

use std::path::Path;

use anyhow::{Context, Result};

use crate::record::BusinessRecord;

/// The eight-section business plan prompt used when no custom template is
/// configured.
pub const DEFAULT_TEMPLATE: &str = "\
Write a detailed business plan for a company called '{name}'.
1. Executive Summary
2. Problem Statement: {problem}
3. Solution: {solution}
4. Business Model
5. Market Analysis
6. Marketing Strategy
7. Financial Plan
8. Conclusion

Include a reference to the company's landing page: {landing_page}.";

/// A prompt template with `{name}`, `{problem}`, `{solution}` and
/// `{landing_page}` placeholders.
///
/// Placeholders are optional. Any other `{...}` text is passed through
/// untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    template: String,
}

impl PromptTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    /// Read a template from a file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let template = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read prompt template {}", path.display()))?;
        if template.trim().is_empty() {
            anyhow::bail!("prompt template {} is empty", path.display());
        }
        Ok(Self::new(template))
    }

    /// Render the prompt for one record.
    ///
    /// Substitution is single-pass, so field values that themselves contain
    /// `{name}`-style text are not expanded again.
    pub fn render(&self, record: &BusinessRecord) -> String {
        let mut out = String::with_capacity(self.template.len() + 256);
        let mut rest = self.template.as_str();

        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open..];
            match placeholder(after, record) {
                Some((value, consumed)) => {
                    out.push_str(value);
                    rest = &after[consumed..];
                }
                None => {
                    out.push('{');
                    rest = &after[1..];
                }
            }
        }
        out.push_str(rest);
        out
    }
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self::new(DEFAULT_TEMPLATE)
    }
}

/// If `s` starts with a known placeholder, return its value and length.
fn placeholder<'a>(s: &str, record: &'a BusinessRecord) -> Option<(&'a str, usize)> {
    let fields: [(&str, &'a str); 4] = [
        ("{name}", record.name.as_str()),
        ("{problem}", record.problem.as_str()),
        ("{solution}", record.solution.as_str()),
        ("{landing_page}", record.landing_page.as_str()),
    ];
    fields
        .into_iter()
        .find(|(key, _)| s.starts_with(key))
        .map(|(key, value)| (value, key.len()))
}
