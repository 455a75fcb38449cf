//! String and character literal blanking.
//!
//! Scanners in this crate work on a "blanked" copy of each line in which the
//! contents of quoted spans are replaced by placeholder bytes of the same
//! length. Offsets found in the blanked copy are therefore valid offsets in
//! the real line, and bracket or comment tokens inside literals are never
//! matched.

const PLACEHOLDER: char = '_';

/// Replace the contents of every `"..."` and `'...'` span with placeholders.
///
/// Quote characters themselves are kept. Escaped characters inside a literal
/// are blanked together with their backslash. An unterminated literal is
/// blanked up to the end of the line.
pub fn blank_literals(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for ch in line.chars() {
        match quote {
            Some(q) => {
                if escaped {
                    escaped = false;
                    push_placeholder(&mut out, ch);
                } else if ch == '\\' {
                    escaped = true;
                    push_placeholder(&mut out, ch);
                } else if ch == q {
                    quote = None;
                    out.push(ch);
                } else {
                    push_placeholder(&mut out, ch);
                }
            }
            None => {
                if ch == '"' || ch == '\'' {
                    quote = Some(ch);
                }
                out.push(ch);
            }
        }
    }

    out
}

/// Keeps byte offsets aligned for multi-byte characters.
fn push_placeholder(out: &mut String, ch: char) {
    for _ in 0..ch.len_utf8() {
        out.push(PLACEHOLDER);
    }
}

/// Byte offset of the first `//` outside any literal, if any.
pub fn find_inline_comment(line: &str) -> Option<usize> {
    blank_literals(line).find("//")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blanks_string_contents() {
        let line = r#"String s = "{ // }";"#;
        let blanked = blank_literals(line);
        assert_eq!(blanked.len(), line.len());
        assert_eq!(blanked, r#"String s = "______";"#);
    }

    #[test]
    fn test_blanks_char_literals_and_escapes() {
        let blanked = blank_literals(r#"char c = '\''; char d = '{';"#);
        assert_eq!(blanked, r#"char c = '__'; char d = '_';"#);
    }

    #[test]
    fn test_preserves_offsets_for_multibyte_text() {
        let line = "s = \"ção\"; // comment";
        let blanked = blank_literals(line);
        assert_eq!(blanked.len(), line.len());
        assert_eq!(find_inline_comment(line), line.find("//"));
    }

    #[test]
    fn test_unterminated_literal_blanks_to_end() {
        let blanked = blank_literals("x = \"open { ");
        assert!(!blanked.contains('{'));
    }

    #[test]
    fn test_comment_marker_inside_string_is_ignored() {
        assert_eq!(find_inline_comment(r#"url = "http://host";"#), None);
        assert_eq!(find_inline_comment(r#"url = "http://host"; // note"#), Some(21));
    }
}
