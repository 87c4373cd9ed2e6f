//! Multi-statement splitting.
//!
//! A single pass over the input tracks whether the cursor is inside a
//! quoted string, a quoted identifier or a comment. Semicolons only end a
//! statement outside all of those.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Normal,
    SingleQuote,
    DoubleQuote,
    Backtick,
    LineComment,
    BlockComment,
}

/// Splits SQL text into statements.
///
/// Doubling a quote inside its own quoting state is an escape. Comments are
/// kept in the statement text they appear in. Segments that are empty or
/// whitespace-only are dropped, and every returned statement is trimmed.
///
/// # Example
/// ```rust
/// use dbdesk_core::sql::split_statements;
///
/// assert_eq!(
///     split_statements("SELECT 'a;b'; SELECT 1"),
///     vec!["SELECT 'a;b'", "SELECT 1"]
/// );
/// ```
pub fn split_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut state = State::Normal;
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        match state {
            State::Normal => match c {
                ';' => {
                    push_statement(&mut statements, &current);
                    current.clear();
                    continue;
                }
                '\'' => state = State::SingleQuote,
                '"' => state = State::DoubleQuote,
                '`' => state = State::Backtick,
                '-' if chars.peek() == Some(&'-') => {
                    current.push(c);
                    current.extend(chars.next());
                    state = State::LineComment;
                    continue;
                }
                '/' if chars.peek() == Some(&'*') => {
                    current.push(c);
                    current.extend(chars.next());
                    state = State::BlockComment;
                    continue;
                }
                _ => {}
            },
            State::SingleQuote | State::DoubleQuote | State::Backtick => {
                let quote = match state {
                    State::SingleQuote => '\'',
                    State::DoubleQuote => '"',
                    _ => '`',
                };
                if c == quote {
                    if chars.peek() == Some(&quote) {
                        // Doubled quote stays inside the literal
                        current.push(c);
                        current.extend(chars.next());
                        continue;
                    }
                    state = State::Normal;
                }
            }
            State::LineComment => {
                if c == '\n' {
                    state = State::Normal;
                }
            }
            State::BlockComment => {
                if c == '*' && chars.peek() == Some(&'/') {
                    current.push(c);
                    current.extend(chars.next());
                    state = State::Normal;
                    continue;
                }
            }
        }
        current.push(c);
    }

    push_statement(&mut statements, &current);
    statements
}

fn push_statement(statements: &mut Vec<String>, segment: &str) {
    let trimmed = segment.trim();
    if !trimmed.is_empty() {
        statements.push(trimmed.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_split() {
        assert_eq!(
            split_statements("SELECT 1; SELECT 2;"),
            vec!["SELECT 1", "SELECT 2"]
        );
    }

    #[test]
    fn test_semicolon_in_single_quotes() {
        assert_eq!(
            split_statements("SELECT 'a;b'; SELECT 1"),
            vec!["SELECT 'a;b'", "SELECT 1"]
        );
    }

    #[test]
    fn test_semicolon_in_identifiers() {
        assert_eq!(
            split_statements("SELECT \"a;b\" FROM t; SELECT `c;d` FROM u"),
            vec!["SELECT \"a;b\" FROM t", "SELECT `c;d` FROM u"]
        );
    }

    #[test]
    fn test_doubled_quote_is_escape() {
        assert_eq!(
            split_statements("INSERT INTO t VALUES ('it''s; fine'); SELECT 2"),
            vec!["INSERT INTO t VALUES ('it''s; fine')", "SELECT 2"]
        );
        assert_eq!(
            split_statements("SELECT \"x\"\";\"\"y\" FROM t"),
            vec!["SELECT \"x\"\";\"\"y\" FROM t"]
        );
    }

    #[test]
    fn test_semicolons_in_comments_are_inert() {
        let sql = "SELECT 1 -- trailing; comment\n; /* block; comment */ SELECT 2";
        assert_eq!(
            split_statements(sql),
            vec!["SELECT 1 -- trailing; comment", "/* block; comment */ SELECT 2"]
        );
    }

    #[test]
    fn test_line_comment_ends_at_newline() {
        assert_eq!(
            split_statements("-- first\nSELECT 1; SELECT 2"),
            vec!["-- first\nSELECT 1", "SELECT 2"]
        );
    }

    #[test]
    fn test_empty_segments_dropped() {
        assert_eq!(split_statements(" ;; \n ; "), Vec::<String>::new());
        assert_eq!(split_statements(""), Vec::<String>::new());
        assert_eq!(split_statements("SELECT 1;;;"), vec!["SELECT 1"]);
    }

    #[test]
    fn test_unterminated_quote_keeps_remainder() {
        assert_eq!(split_statements("SELECT 'abc; def"), vec!["SELECT 'abc; def"]);
    }

    #[test]
    fn test_resplit_is_stable() {
        let inputs = [
            "SELECT 'a;b'; SELECT 1",
            "CREATE TABLE \"x;y\" (id INT); INSERT INTO `t` VALUES ('q''uote;'); -- c;\nSELECT 3",
            "/* ; */ SELECT 1; SELECT \"\"\"\" ; ",
        ];
        for input in inputs {
            let first = split_statements(input);
            let rejoined = first.join(";\n");
            assert_eq!(split_statements(&rejoined), first, "input: {input}");
        }
    }
}
