//! Textual normalization of C declarations.
//!
//! The extractor never resolves types; it compares declaration text. These
//! helpers bring that text into one canonical spelling so that formatting,
//! comments and attribute noise do not register as ABI changes.

use std::sync::LazyLock;

use regex::Regex;

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static STAR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s*\*\s*").unwrap());
static STAR_BEFORE_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*([A-Za-z_])").unwrap());
static PUNCT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s*([()\[\],:])\s*").unwrap());
static CALLING_CONVENTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:__cdecl|__stdcall|__fastcall|__vectorcall|__thiscall)\b").unwrap()
});
static ATTRIBUTE_CALL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:__attribute__|__declspec)\b").unwrap());
static BOOL_KEYWORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b_Bool\b").unwrap());
static LEADING_EXTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s*extern\s+").unwrap());
static QUALIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:const|volatile|struct|enum)\b").unwrap());

/// Collapses every whitespace run to a single space and trims the ends.
pub fn collapse_ws(value: &str) -> String {
    WHITESPACE.replace_all(value, " ").trim().to_string()
}

/// Replaces `/* */` and `//` comments with whitespace.
///
/// Newlines inside block comments are preserved so that line-oriented
/// passes (preprocessor removal) still see the original line structure.
/// String and character literals are skipped.
pub fn strip_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for inner in chars.by_ref() {
                    if inner == '\n' {
                        out.push('\n');
                    }
                    if prev == '*' && inner == '/' {
                        break;
                    }
                    prev = inner;
                }
                out.push(' ');
            }
            '/' if chars.peek() == Some(&'/') => {
                for inner in chars.by_ref() {
                    if inner == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            '"' | '\'' => {
                out.push(ch);
                let mut escaped = false;
                for inner in chars.by_ref() {
                    out.push(inner);
                    if escaped {
                        escaped = false;
                    } else if inner == '\\' {
                        escaped = true;
                    } else if inner == ch || inner == '\n' {
                        break;
                    }
                }
            }
            _ => out.push(ch),
        }
    }

    out
}

/// Joins backslash-continued lines.
pub fn join_continuations(text: &str) -> String {
    text.replace("\\\r\n", " ").replace("\\\n", " ")
}

/// Blanks out preprocessor directives, keeping line numbering intact.
pub fn strip_preprocessor_lines(text: &str) -> String {
    text.lines()
        .map(|line| if line.trim_start().starts_with('#') { "" } else { line })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Removes `__attribute__((...))`, `__declspec(...)` and calling-convention
/// keywords from a declaration.
pub fn strip_attributes(decl: &str) -> String {
    let mut text = decl.to_string();

    while let Some(found) = ATTRIBUTE_CALL.find(&text) {
        let (start, end) = (found.start(), found.end());
        let rest = &text[end..];
        let open = rest.find(|c: char| !c.is_whitespace());
        let removal_end = match open {
            Some(offset) if rest[offset..].starts_with('(') => {
                match matching_close(&text, end + offset, '(', ')') {
                    Some(close) => close + 1,
                    None => end,
                }
            }
            _ => end,
        };
        text.replace_range(start..removal_end, " ");
    }

    let text = CALLING_CONVENTION.replace_all(&text, " ");
    collapse_ws(&text)
}

/// Canonical stored spelling of a type or declaration fragment.
pub fn normalize_type(text: &str) -> String {
    let text = strip_attributes(text);
    let text = LEADING_EXTERN.replace(&text, "");
    let text = BOOL_KEYWORD.replace_all(&text, "bool");
    let text = collapse_ws(&text);
    let text = STAR.replace_all(&text, "*");
    let text = STAR_BEFORE_WORD.replace_all(&text, "* $1");
    let text = PUNCT.replace_all(&text, "$1");
    text.replace(',', ", ").trim().to_string()
}

/// Comparison key of a type: the normalized spelling without `const`,
/// `volatile`, `struct` and `enum` qualifiers.
pub fn type_key(text: &str) -> String {
    let normalized = normalize_type(text);
    let stripped = QUALIFIER.replace_all(&normalized, " ");
    normalize_type(&stripped)
}

/// Index of the bracket closing the one opened at `open_idx`.
pub(crate) fn matching_close(text: &str, open_idx: usize, open: char, close: char) -> Option<usize> {
    let mut depth = 0usize;
    for (idx, ch) in text[open_idx..].char_indices() {
        if ch == open {
            depth += 1;
        } else if ch == close {
            depth = depth.checked_sub(1)?;
            if depth == 0 {
                return Some(open_idx + idx);
            }
        }
    }
    None
}

/// Splits `text` at `separator` occurrences that are not nested inside
/// parentheses, brackets or braces. Empty pieces are dropped.
pub(crate) fn split_top_level(text: &str, separator: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut current = String::new();

    for ch in text.chars() {
        match ch {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            _ => {}
        }
        if ch == separator && depth == 0 {
            let piece = collapse_ws(&current);
            if !piece.is_empty() {
                parts.push(piece);
            }
            current.clear();
        } else {
            current.push(ch);
        }
    }

    let piece = collapse_ws(&current);
    if !piece.is_empty() {
        parts.push(piece);
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pointer_spacing_is_canonical() {
        assert_eq!(normalize_type("const char *"), "const char*");
        assert_eq!(normalize_type("const   char*"), "const char*");
        assert_eq!(normalize_type("char * * argv"), "char** argv");
        assert_eq!(normalize_type("char * const"), "char* const");
    }

    #[test]
    fn function_pointer_spelling_is_canonical() {
        assert_eq!(
            normalize_type("void ( * ) ( void * user_data , int )"),
            "void(*)(void* user_data, int)"
        );
    }

    #[test]
    fn attributes_and_conventions_are_stripped() {
        assert_eq!(
            normalize_type("__attribute__((visibility(\"default\"))) int __cdecl"),
            "int"
        );
        assert_eq!(normalize_type("__declspec(dllexport) _Bool"), "bool");
        assert_eq!(normalize_type("extern void*"), "void*");
    }

    #[test]
    fn type_key_drops_qualifiers() {
        assert_eq!(type_key("const struct lrtc_config_t *"), "lrtc_config_t*");
        assert_eq!(type_key("enum lrtc_result_t"), "lrtc_result_t");
        assert_eq!(type_key("char * const"), "char*");
        assert_ne!(type_key("int"), type_key("long"));
    }

    #[test]
    fn comments_are_removed_but_lines_survive() {
        let text = "int a; /* one\ntwo */ int b; // tail\nint c;";
        let stripped = strip_comments(text);
        assert_eq!(stripped.lines().count(), 3);
        assert!(!stripped.contains("one"));
        assert!(!stripped.contains("tail"));
        assert!(stripped.contains("int c;"));
    }

    #[test]
    fn string_literals_keep_comment_markers() {
        let stripped = strip_comments(r#"#define URL "http://example" // c"#);
        assert!(stripped.contains("\"http://example\""));
    }

    #[test]
    fn top_level_split_respects_nesting() {
        let parts = split_top_level("int a, void (*cb)(int, int), char b[2]", ',');
        assert_eq!(parts, vec!["int a", "void (*cb)(int, int)", "char b[2]"]);
    }
}
