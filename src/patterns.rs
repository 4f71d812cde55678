//! Null-token matchers for delimited text.
//!
//! A null token only counts when it fills a whole field, so every pattern is
//! anchored on separators or line boundaries:
//!
//! | context              | pattern                 | rewritten as          |
//! |----------------------|-------------------------|-----------------------|
//! | between separators   | `SEP tok SEP`           | `SEP \N SEP`          |
//! | start of block       | `^tok SEP`              | `\N SEP`              |
//! | end of final line    | `SEP tok \r? \z`        | `SEP \N \r?`          |
//! | after a line break   | `(\r?\n) tok SEP`       | `$1 \N SEP`           |
//! | before a line break  | `SEP tok (\r?\n)`       | `SEP \N $1`           |
//!
//! The between-separators pattern runs twice: non-overlapping matching
//! consumes the trailing separator of one empty field, hiding the leading
//! separator of the next. Blocks handed to [`NullPatterns::apply`] must
//! begin at a line start.

use std::borrow::Cow;

use itertools::Itertools;
use log::debug;
use regex::bytes::Regex;

use crate::error::PipelineError;

/// The marker every recognized missing value is rewritten to.
pub const CANONICAL_NULL: &str = "\\N";

/// Tokens treated as missing when none are configured.
pub fn default_null_tokens() -> Vec<String> {
    ["", CANONICAL_NULL, ".", "na"]
        .iter()
        .map(|token| token.to_string())
        .collect()
}

/// A user-supplied rewrite applied after null substitution.
#[derive(Debug, Clone)]
pub struct ExtraSubstitution {
    pattern: Regex,
    replacement: String,
}

impl ExtraSubstitution {
    pub fn new(pattern: &str, replacement: &str) -> Result<Self, PipelineError> {
        let compiled = Regex::new(pattern).map_err(|err| {
            PipelineError::InvalidPattern(format!("extra substitution '{pattern}': {err}"))
        })?;
        Ok(Self {
            pattern: compiled,
            replacement: replacement.to_string(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct NullPatterns {
    between: Option<Regex>,
    line_start: Option<Regex>,
    line_end: Option<Regex>,
    after_newline: Option<Regex>,
    before_newline: Option<Regex>,
    between_out: Vec<u8>,
    line_start_out: Vec<u8>,
    line_end_out: Vec<u8>,
    after_newline_out: Vec<u8>,
    before_newline_out: Vec<u8>,
    extras: Vec<ExtraSubstitution>,
}

impl NullPatterns {
    /// Compiles the matchers for `separator` and `null_tokens`.
    ///
    /// Returns `Ok(None)` when there is nothing to substitute: no tokens left
    /// once the canonical marker is removed and no extra substitutions. That
    /// is the identity transform.
    pub fn build(
        separator: u8,
        null_tokens: &[String],
        extras: Vec<ExtraSubstitution>,
    ) -> Result<Option<Self>, PipelineError> {
        validate_separator(separator)?;
        let sep_char = separator as char;
        let tokens: Vec<String> = null_tokens
            .iter()
            .filter(|token| token.as_str() != CANONICAL_NULL)
            .unique()
            .cloned()
            .collect();
        for token in &tokens {
            if token.contains(sep_char) || token.contains(['\n', '\r']) {
                return Err(PipelineError::InvalidPattern(format!(
                    "null token {token:?} contains the separator or a line break"
                )));
            }
        }

        if tokens.is_empty() && extras.is_empty() {
            debug!("No null tokens to substitute; normalization is a plain copy");
            return Ok(None);
        }

        let sep = regex::escape(&sep_char.to_string());
        let marker = escape_replacement(CANONICAL_NULL);
        let sep_out = escape_replacement(&sep_char.to_string());

        let (between, line_start, line_end, after_newline, before_newline) = if tokens.is_empty()
        {
            (None, None, None, None, None)
        } else {
            let alternation = tokens.iter().map(|token| regex::escape(token)).join("|");
            let group = format!("(?:{alternation})");
            (
                Some(compile(&format!("{sep}{group}{sep}"))?),
                Some(compile(&format!(r"\A{group}{sep}"))?),
                Some(compile(&format!(r"{sep}{group}(\r?)\z"))?),
                Some(compile(&format!(r"(\r?\n){group}{sep}"))?),
                Some(compile(&format!(r"{sep}{group}(\r?\n)"))?),
            )
        };

        debug!(
            "Compiled null patterns for separator {:?} and tokens {:?}",
            sep_char, tokens
        );

        Ok(Some(Self {
            between,
            line_start,
            line_end,
            after_newline,
            before_newline,
            between_out: format!("{sep_out}{marker}{sep_out}").into_bytes(),
            line_start_out: format!("{marker}{sep_out}").into_bytes(),
            line_end_out: format!("{sep_out}{marker}${{1}}").into_bytes(),
            after_newline_out: format!("${{1}}{marker}{sep_out}").into_bytes(),
            before_newline_out: format!("{sep_out}{marker}${{1}}").into_bytes(),
            extras,
        }))
    }

    /// Rewrites every null token in `block`. The block must start at a line
    /// start; it may end with or without a trailing line break.
    pub fn apply<'a>(&self, block: &'a [u8]) -> Cow<'a, [u8]> {
        let mut current = Cow::Borrowed(block);
        if let Some(re) = &self.between {
            current = replace(current, re, &self.between_out);
            current = replace(current, re, &self.between_out);
        }
        if let Some(re) = &self.line_start {
            current = replace(current, re, &self.line_start_out);
        }
        if let Some(re) = &self.line_end {
            current = replace(current, re, &self.line_end_out);
        }
        if let Some(re) = &self.after_newline {
            current = replace(current, re, &self.after_newline_out);
        }
        if let Some(re) = &self.before_newline {
            current = replace(current, re, &self.before_newline_out);
        }
        for extra in &self.extras {
            current = replace(current, &extra.pattern, extra.replacement.as_bytes());
        }
        current
    }
}

fn replace<'a>(input: Cow<'a, [u8]>, re: &Regex, replacement: &[u8]) -> Cow<'a, [u8]> {
    match input {
        Cow::Borrowed(bytes) => re.replace_all(bytes, replacement),
        Cow::Owned(bytes) => match re.replace_all(&bytes, replacement) {
            Cow::Borrowed(_) => Cow::Owned(bytes),
            Cow::Owned(rewritten) => Cow::Owned(rewritten),
        },
    }
}

fn compile(pattern: &str) -> Result<Regex, PipelineError> {
    Regex::new(pattern)
        .map_err(|err| PipelineError::InvalidPattern(format!("pattern '{pattern}': {err}")))
}

fn validate_separator(separator: u8) -> Result<(), PipelineError> {
    if !separator.is_ascii() {
        return Err(PipelineError::InvalidPattern(format!(
            "separator byte 0x{separator:02x} is not ASCII"
        )));
    }
    if matches!(separator, b'\n' | b'\r') {
        return Err(PipelineError::InvalidPattern(
            "separator cannot be a line break".to_string(),
        ));
    }
    if CANONICAL_NULL.as_bytes().contains(&separator) {
        return Err(PipelineError::InvalidPattern(format!(
            "separator '{}' occurs in the null marker {CANONICAL_NULL}",
            separator as char
        )));
    }
    Ok(())
}

/// Escapes `$` so the text is inserted literally by `replace_all`.
fn escape_replacement(text: &str) -> String {
    text.replace('$', "$$")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn apply(sep: u8, values: &[&str], input: &[u8]) -> Vec<u8> {
        let patterns = NullPatterns::build(sep, &tokens(values), Vec::new())
            .expect("build")
            .expect("non-identity");
        patterns.apply(input).into_owned()
    }

    #[test]
    fn rewrites_every_structural_position() {
        let out = apply(b',', &["", "NS", "\\N"], b",,NS,\\N,,\n");
        assert_eq!(out, b"\\N,\\N,\\N,\\N,\\N,\\N\n".to_vec());
    }

    #[test]
    fn handles_multiple_lines_and_mixed_tokens() {
        let out = apply(b',', &["X", "", "NA", "\\N"], b"X,,X,\\N,N,\n,N,NA,NA,,");
        assert_eq!(
            out,
            b"\\N,\\N,\\N,\\N,N,\\N\n\\N,N,\\N,\\N,\\N,\\N".to_vec()
        );
    }

    #[test]
    fn preserves_carriage_returns() {
        let out = apply(b'\t', &["na"], b"na\tx\tna\r\nna\tna\r\n");
        assert_eq!(out, b"\\N\tx\t\\N\r\n\\N\t\\N\r\n".to_vec());
    }

    #[test]
    fn does_not_touch_partial_fields() {
        let input = b"nan\tna1\txna\n".to_vec();
        assert_eq!(apply(b'\t', &["na"], &input), input);
    }

    #[test]
    fn escapes_regex_metacharacters() {
        let out = apply(b'|', &[".", "*", "$", "^"], b".|a|*|$\n^|b|c\n");
        assert_eq!(out, b"\\N|a|\\N|\\N\n\\N|b|c\n".to_vec());
    }

    #[test]
    fn dollar_separator_is_literal_in_replacements() {
        let out = apply(b'$', &[""], b"a$$b\n");
        assert_eq!(out, b"a$\\N$b\n".to_vec());
    }

    #[test]
    fn identity_when_only_canonical_marker_configured() {
        let built = NullPatterns::build(b'\t', &tokens(&["\\N"]), Vec::new()).expect("build");
        assert!(built.is_none());
        let built = NullPatterns::build(b'\t', &[], Vec::new()).expect("build");
        assert!(built.is_none());
    }

    #[test]
    fn single_column_lines_are_left_alone() {
        let out = apply(b'\t', &["", "na"], b"na\n\nvalue\n");
        assert_eq!(out, b"na\n\nvalue\n".to_vec());
    }

    #[test]
    fn rejects_line_break_separator() {
        let err = NullPatterns::build(b'\n', &tokens(&["na"]), Vec::new()).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidPattern(_)));
    }

    #[test]
    fn rejects_separator_found_in_null_marker() {
        for separator in [b'\\', b'N'] {
            let err = NullPatterns::build(separator, &tokens(&["", "x"]), Vec::new()).unwrap_err();
            assert!(matches!(err, PipelineError::InvalidPattern(_)));
        }
        assert!(NullPatterns::build(b'n', &tokens(&[""]), Vec::new()).is_ok());
    }

    #[test]
    fn rejects_token_containing_separator() {
        let err = NullPatterns::build(b',', &tokens(&["a,b"]), Vec::new()).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidPattern(_)));
    }

    #[test]
    fn extra_substitutions_run_after_nulls() {
        let extra = ExtraSubstitution::new("inf", "1e308").expect("extra");
        let patterns = NullPatterns::build(b'\t', &tokens(&["na"]), vec![extra])
            .expect("build")
            .expect("non-identity");
        assert_eq!(
            patterns.apply(b"na\tinf\n").into_owned(),
            b"\\N\t1e308\n".to_vec()
        );
    }

    #[test]
    fn invalid_extra_substitution_is_reported() {
        let err = ExtraSubstitution::new("(", "x").unwrap_err();
        assert!(matches!(err, PipelineError::InvalidPattern(_)));
    }
}
