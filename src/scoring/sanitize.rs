//! Presentation cleanup for generated code
//!
//! Generators tend to wrap code in markdown fences. Only one opening fence at
//! the very start and one closing fence at the very end are removed; fences in
//! the middle of the text are left alone.

use regex::Regex;
use std::sync::OnceLock;

pub trait CodeSanitizer: Send + Sync {
    fn sanitize(&self, code: &str) -> String;
}

/// Default sanitizer: strips one leading and one trailing markdown fence.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkdownSanitizer;

fn leading_fence() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\A```[A-Za-z]*\r?\n").expect("valid fence regex"))
}

fn trailing_fence() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\r?\n```\z").expect("valid fence regex"))
}

impl CodeSanitizer for MarkdownSanitizer {
    fn sanitize(&self, code: &str) -> String {
        let trimmed = code.trim();
        if trimmed.is_empty() {
            return String::new();
        }
        let without_open = leading_fence().replace(trimmed, "");
        let without_close = trailing_fence().replace(&without_open, "");
        without_close.trim().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sanitize(code: &str) -> String {
        MarkdownSanitizer.sanitize(code)
    }

    #[test]
    fn test_strips_language_fence() {
        assert_eq!(sanitize("```python\nprint('hi')\n```"), "print('hi')");
    }

    #[test]
    fn test_strips_bare_fence() {
        assert_eq!(sanitize("```\nx = 1\n```"), "x = 1");
    }

    #[test]
    fn test_empty_and_whitespace() {
        assert_eq!(sanitize(""), "");
        assert_eq!(sanitize("   \n\t "), "");
    }

    #[test]
    fn test_plain_code_is_only_trimmed() {
        assert_eq!(sanitize("  def add(a,b): return a+b \n"), "def add(a,b): return a+b");
    }

    #[test]
    fn test_mid_document_fence_untouched() {
        let code = "a = 1\n```python\nb = 2\n```\nc = 3";
        assert_eq!(sanitize(code), code);
    }

    #[test]
    fn test_strips_exactly_one_fence_each_side() {
        let code = "```python\n```python\nx = 1\n```\n```";
        assert_eq!(sanitize(code), "```python\nx = 1\n```");
    }

    #[test]
    fn test_surrounding_whitespace_before_fence() {
        assert_eq!(sanitize("\n\n```py\nx = 1\n```\n\n"), "x = 1");
    }

    #[test]
    fn test_idempotent() {
        let inputs = [
            "",
            "print(1)",
            "```python\nprint(1)\n```",
            "```\n\n  import os\n\n```",
            "a\n```\nb",
            "```python\n```",
            "```",
        ];
        for input in inputs {
            let once = sanitize(input);
            assert_eq!(sanitize(&once), once, "input: {:?}", input);
        }
    }
}
