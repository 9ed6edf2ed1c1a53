//! Utilities for deriving and checking URL-safe slugs.
//!
//! The helpers here bridge ASCII slugification (`slug` crate) with Chinese
//! transliteration (`pinyin` crate) so a tag like “基线对齐” maps to the
//! path segment `ji-xian-dui-qi`. Post slugs are authored, so they are only
//! checked, never rewritten.

use pinyin::{Pinyin, ToPinyin};
use slug::slugify;
use thiserror::Error;

/// Longest slug accepted; record keys on the remote store share this limit.
pub const MAX_SLUG_LEN: usize = 512;

/// Errors that can occur while deriving or checking a slug.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SlugError {
    #[error("slug source text is empty")]
    EmptyInput,
    #[error("failed to derive slug from `{input}`")]
    Unrepresentable { input: String },
    #[error("`{input}` is not a canonical slug (expected `{expected}`)")]
    NotCanonical { input: String, expected: String },
    #[error("slug `{input}` exceeds {MAX_SLUG_LEN} characters")]
    TooLong { input: String },
}

/// Derive a slug from the provided human-readable text.
pub fn derive_slug(input: &str) -> Result<String, SlugError> {
    if input.trim().is_empty() {
        return Err(SlugError::EmptyInput);
    }

    let transliterated = transliterate_to_ascii(input);
    let candidate = slugify(&transliterated);

    if candidate.is_empty() {
        return Err(SlugError::Unrepresentable {
            input: input.to_string(),
        });
    }
    if candidate.len() > MAX_SLUG_LEN {
        return Err(SlugError::TooLong { input: candidate });
    }

    Ok(candidate)
}

/// Check that an authored slug is already in canonical form.
///
/// Canonical slugs are lowercase ASCII words joined by single dashes, which
/// keeps them valid both as path segments and as remote record keys.
pub fn ensure_canonical(input: &str) -> Result<(), SlugError> {
    if input.is_empty() {
        return Err(SlugError::EmptyInput);
    }
    if input.len() > MAX_SLUG_LEN {
        return Err(SlugError::TooLong {
            input: input.to_string(),
        });
    }

    let expected = slugify(input);
    if expected != input {
        return Err(SlugError::NotCanonical {
            input: input.to_string(),
            expected,
        });
    }

    Ok(())
}

/// Path segment used for a tag's listing route.
pub fn tag_segment(tag: &str) -> Result<String, SlugError> {
    derive_slug(tag)
}

fn transliterate_to_ascii(input: &str) -> String {
    let mut output = String::with_capacity(input.len());

    for ch in input.chars() {
        if ch.is_ascii() {
            output.push(ch);
            continue;
        }

        match ch.to_pinyin() {
            Some(py) => append_pinyin(&mut output, py),
            None if ch.is_whitespace() => output.push(' '),
            None => {
                // Preserve unhandled characters so slugify can decide how to filter them.
                output.push(ch);
            }
        }
    }

    output
}

fn append_pinyin(buffer: &mut String, pinyin: Pinyin) {
    if !buffer.is_empty() && !buffer.ends_with(' ') {
        buffer.push(' ');
    }
    buffer.push_str(pinyin.plain());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_slug_transliterates_chinese() {
        let slug = derive_slug("Rust 基础教程").expect("slug");
        assert_eq!(slug, "rust-ji-chu-jiao-cheng");
    }

    #[test]
    fn tag_segment_folds_case_and_spacing() {
        assert_eq!(tag_segment("Static Sites").expect("segment"), "static-sites");
        assert_eq!(tag_segment("static-sites").expect("segment"), "static-sites");
    }

    #[test]
    fn derive_slug_rejects_blank_input() {
        assert_eq!(derive_slug("   "), Err(SlugError::EmptyInput));
    }

    #[test]
    fn ensure_canonical_accepts_dashed_lowercase() {
        assert!(ensure_canonical("hello-world-2").is_ok());
    }

    #[test]
    fn ensure_canonical_reports_expected_form() {
        let err = ensure_canonical("Hello World").expect_err("not canonical");
        assert_eq!(
            err,
            SlugError::NotCanonical {
                input: "Hello World".to_string(),
                expected: "hello-world".to_string(),
            }
        );
    }

    #[test]
    fn ensure_canonical_rejects_empty() {
        assert_eq!(ensure_canonical(""), Err(SlugError::EmptyInput));
    }
}
