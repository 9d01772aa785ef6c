//! Markdown code fence stripping for command arguments

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Codeblock {
    /// `None` when the argument was not fenced, empty when the fence named no language
    pub language: Option<String>,
    pub content: String,
}

/// Strip a surrounding code fence from `argument`
///
/// A triple fence may name a language on its opening line; that line is
/// dropped from the content. Single and double backticks carry no language.
pub fn parse(argument: &str) -> Codeblock {
    let ticks = argument.chars().take_while(|&c| c == '`').count();
    if ticks == 0 {
        return Codeblock {
            language: None,
            content: argument.to_string(),
        };
    }

    let fence = "`".repeat(ticks);
    let inner = &argument[ticks..];
    let inner = inner.strip_suffix(fence.as_str()).unwrap_or(inner);

    if ticks < 3 {
        return Codeblock {
            language: Some(String::new()),
            content: inner.to_string(),
        };
    }

    // The language tag is a single word directly after the opening fence
    match inner.split_once('\n') {
        Some((first, rest)) if !first.contains(char::is_whitespace) => Codeblock {
            language: Some(first.to_string()),
            content: rest.to_string(),
        },
        Some((first, rest)) if first.trim().is_empty() => Codeblock {
            language: Some(String::new()),
            content: rest.to_string(),
        },
        _ => Codeblock {
            language: Some(String::new()),
            content: inner.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(language: Option<&str>, content: &str) -> Codeblock {
        Codeblock {
            language: language.map(str::to_string),
            content: content.to_string(),
        }
    }

    #[test]
    fn test_fence_with_language() {
        assert_eq!(parse("```py\n1 + 1\n```"), block(Some("py"), "1 + 1\n"));
    }

    #[test]
    fn test_fence_without_language() {
        assert_eq!(parse("```\nx = 1\nx\n```"), block(Some(""), "x = 1\nx\n"));
    }

    #[test]
    fn test_single_line_fence() {
        assert_eq!(parse("```3 + 4```"), block(Some(""), "3 + 4"));
    }

    #[test]
    fn test_inline_backticks() {
        assert_eq!(parse("`len([1, 2])`"), block(Some(""), "len([1, 2])"));
    }

    #[test]
    fn test_first_line_with_code_is_not_a_language() {
        assert_eq!(
            parse("```x = 1\nyield x```"),
            block(Some(""), "x = 1\nyield x")
        );
    }

    #[test]
    fn test_unfenced_is_untouched() {
        assert_eq!(parse("print 'a`b'"), block(None, "print 'a`b'"));
        assert_eq!(parse(""), block(None, ""));
    }

    #[test]
    fn test_unterminated_fence() {
        assert_eq!(parse("```sh\nls -la"), block(Some("sh"), "ls -la"));
    }
}
