//! Include/ignore filters applied to file names before ingest.
//!
//! Patterns are globs (`*`, `?`, `[...]`, `[!...]`) matched against the whole
//! file name, or `re:/<regex>/` matched anywhere in it.

use regex::Regex;

use crate::{Result, SyncError};

#[derive(Debug, Clone)]
struct Pattern {
    source: String,
    regex: Regex,
}

impl Pattern {
    fn compile(source: &str) -> Result<Self> {
        let expression = match source
            .strip_prefix("re:/")
            .and_then(|rest| rest.strip_suffix('/'))
        {
            Some(raw) => raw.to_string(),
            None => glob_to_regex(source),
        };

        let regex = Regex::new(&expression).map_err(|e| {
            SyncError::Config(format!("Invalid scan pattern '{}': {}", source, e))
        })?;

        Ok(Self {
            source: source.to_string(),
            regex,
        })
    }

    fn matches(&self, file_name: &str) -> bool {
        self.regex.is_match(file_name)
    }
}

fn glob_to_regex(glob: &str) -> String {
    let chars: Vec<char> = glob.chars().collect();
    let mut out = String::from("^");
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '[' => {
                let mut j = i + 1;
                let negated = matches!(chars.get(j), Some('!') | Some('^'));
                if negated {
                    j += 1;
                }
                // A leading ']' is part of the class
                if chars.get(j) == Some(&']') {
                    j += 1;
                }
                while j < chars.len() && chars[j] != ']' {
                    j += 1;
                }

                if j >= chars.len() {
                    out.push_str(r"\[");
                } else {
                    let start = if negated { i + 2 } else { i + 1 };
                    out.push('[');
                    if negated {
                        out.push('^');
                    }
                    for &c in &chars[start..j] {
                        if matches!(c, '\\' | '[' | '&' | '~') {
                            out.push('\\');
                        }
                        out.push(c);
                    }
                    out.push(']');
                    i = j;
                }
            }
            c => out.push_str(&regex::escape(c.encode_utf8(&mut [0u8; 4]))),
        }
        i += 1;
    }

    out.push('$');
    out
}

/// Compiled `scan_include` / `scan_ignore` lists
#[derive(Debug, Clone, Default)]
pub struct ScanFilter {
    include: Vec<Pattern>,
    ignore: Vec<Pattern>,
}

impl ScanFilter {
    /// # Errors
    ///
    /// `SyncError::Config` if any pattern does not compile.
    pub fn new(include: &[String], ignore: &[String]) -> Result<Self> {
        Ok(Self {
            include: include
                .iter()
                .map(|p| Pattern::compile(p))
                .collect::<Result<_>>()?,
            ignore: ignore
                .iter()
                .map(|p| Pattern::compile(p))
                .collect::<Result<_>>()?,
        })
    }

    /// Accept or reject a file name. Includes are checked first.
    ///
    /// # Errors
    ///
    /// `SyncError::Filtered` naming the reason for rejection.
    pub fn check(&self, file_name: &str) -> Result<()> {
        if !self.include.is_empty() && !self.include.iter().any(|p| p.matches(file_name)) {
            return Err(SyncError::Filtered {
                file_name: file_name.to_string(),
                reason: "matches no include pattern".to_string(),
            });
        }

        if let Some(pattern) = self.ignore.iter().find(|p| p.matches(file_name)) {
            return Err(SyncError::Filtered {
                file_name: file_name.to_string(),
                reason: format!("matches ignore pattern '{}'", pattern.source),
            });
        }

        Ok(())
    }
}
