//! Per-line lexical scanning.
//!
//! The scanner walks one physical line with the lexical state left by the
//! previous line and reports which characters are code, which identifier
//! words appear outside literals, and whether a literal or comment is still
//! open at the end of the line.

use crate::delimiter::Delimiter;
use crate::dialect::Dialect;

/// Quoting construct that can span lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Quote {
    /// `'...'`, optionally with backslash escapes.
    Single { escapes: bool },
    /// `"..."`.
    Double,
    /// `` `...` ``.
    Backtick,
    /// `[...]`.
    Bracket,
    /// `$tag$ ... $tag$`, holding the full tag.
    Dollar(String),
    /// Oracle `q'x ... x'`, holding the closing character.
    Alternative(char),
}

/// Literal/comment state carried from one line to the next.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(crate) struct LexState {
    pub quote: Option<Quote>,
    pub comment_depth: u32,
}

impl LexState {
    /// Whether a literal or comment is open.
    pub fn is_open(&self) -> bool {
        self.quote.is_some() || self.comment_depth > 0
    }

    /// Name of the open construct, for error messages.
    pub fn open_construct(&self) -> Option<&'static str> {
        match (&self.quote, self.comment_depth) {
            (Some(Quote::Dollar(_)), _) => Some("dollar-quoted string"),
            (Some(Quote::Double | Quote::Backtick | Quote::Bracket), _) => Some("quoted identifier"),
            (Some(_), _) => Some("string literal"),
            (None, 0) => None,
            (None, _) => Some("comment"),
        }
    }
}

/// Result of scanning one line.
#[derive(Debug, Clone)]
pub(crate) struct LineScan {
    /// State at the end of the line.
    pub state: LexState,
    /// Characters outside comments with their byte offsets.
    pub code: Vec<(usize, char)>,
    /// Upper-cased words outside literals and comments.
    pub words: Vec<String>,
    /// Opening minus closing parentheses outside literals and comments.
    pub paren_delta: i32,
    /// Byte offset just past the comment the line started in, once closed.
    pub comment_end: Option<usize>,
}

impl LineScan {
    /// Code with whitespace collapsed, trimmed and ASCII upper-cased.
    pub fn normalized(&self) -> String {
        let mut out = String::with_capacity(self.code.len());
        let mut pending_space = false;
        for &(_, ch) in &self.code {
            if ch.is_whitespace() {
                pending_space = !out.is_empty();
                continue;
            }
            if pending_space {
                out.push(' ');
                pending_space = false;
            }
            out.push(ch.to_ascii_uppercase());
        }
        out
    }

    /// Byte offset where a trailing delimiter of `text` begins.
    pub fn delimiter_offset(&self, text: &str) -> Option<usize> {
        let len = text.chars().count();
        let trimmed = self
            .code
            .iter()
            .rposition(|(_, ch)| !ch.is_whitespace())
            .map(|idx| idx + 1)?;
        let start = trimmed.checked_sub(len)?;
        Some(self.code[start].0)
    }
}

/// Scan `line` starting from `start`.
pub(crate) fn scan_line(
    line: &str,
    start: &LexState,
    dialect: &Dialect,
    delimiter: Option<&Delimiter>,
) -> LineScan {
    let mut state = start.clone();
    let started_in_comment = state.comment_depth > 0;
    let mut code: Vec<(usize, char)> = Vec::new();
    let mut bare = String::with_capacity(line.len());
    let mut comment_end = None;
    let mut i = 0;

    while i < line.len() {
        let rest = &line[i..];
        let Some(ch) = rest.chars().next() else {
            break;
        };
        let width = ch.len_utf8();

        if state.comment_depth > 0 {
            if rest.starts_with("*/") {
                state.comment_depth -= 1;
                i += 2;
                if state.comment_depth == 0 {
                    bare.push(' ');
                    if started_in_comment && comment_end.is_none() {
                        comment_end = Some(i);
                    }
                }
            } else if dialect.nested_comments && rest.starts_with("/*") {
                state.comment_depth += 1;
                i += 2;
            } else {
                i += width;
            }
            continue;
        }

        if let Some(quote) = state.quote.take() {
            let next = rest[width..].chars().next();
            code.push((i, ch));
            i += width;
            let still_open = match &quote {
                Quote::Single { escapes } => {
                    if *escapes && ch == '\\' {
                        if let Some(escaped) = next {
                            code.push((i, escaped));
                            i += escaped.len_utf8();
                        }
                        true
                    } else if ch == '\'' {
                        take_doubled(line, &mut i, &mut code, '\'')
                    } else {
                        true
                    }
                }
                Quote::Double => ch != '"' || take_doubled(line, &mut i, &mut code, '"'),
                Quote::Backtick => ch != '`' || take_doubled(line, &mut i, &mut code, '`'),
                Quote::Bracket => ch != ']' || take_doubled(line, &mut i, &mut code, ']'),
                Quote::Dollar(tag) => {
                    if rest.starts_with(tag.as_str()) {
                        for (offset, c) in rest[width..tag.len()].char_indices() {
                            code.push((i + offset, c));
                        }
                        i += tag.len() - width;
                        false
                    } else {
                        true
                    }
                }
                Quote::Alternative(close) => {
                    if ch == *close && next == Some('\'') {
                        code.push((i, '\''));
                        i += 1;
                        false
                    } else {
                        true
                    }
                }
            };
            if still_open {
                state.quote = Some(quote);
            } else {
                bare.push(' ');
            }
            continue;
        }

        if dialect.line_comment_at(rest, delimiter) {
            break;
        }
        if rest.starts_with("/*") {
            state.comment_depth = 1;
            i += 2;
            bare.push(' ');
            continue;
        }

        let prev = code.last().map(|&(_, c)| c);
        let opened = match ch {
            '\'' => {
                let escape_prefix = dialect.escape_strings
                    && matches!(prev, Some('E' | 'e'))
                    && !code
                        .len()
                        .checked_sub(2)
                        .and_then(|idx| code.get(idx))
                        .is_some_and(|&(_, c)| is_ident_char(c));
                Some(Quote::Single {
                    escapes: dialect.backslash_escapes || escape_prefix,
                })
            }
            '"' => Some(Quote::Double),
            '`' if dialect.backtick_quotes => Some(Quote::Backtick),
            '[' if dialect.bracket_quotes => Some(Quote::Bracket),
            '$' if dialect.dollar_quotes && !prev.is_some_and(is_ident_char) => {
                if let Some(tag) = dollar_tag(rest) {
                    for (offset, c) in tag.char_indices() {
                        code.push((i + offset, c));
                    }
                    i += tag.len();
                    state.quote = Some(Quote::Dollar(tag.to_string()));
                    bare.push(' ');
                    continue;
                }
                None
            }
            'q' | 'Q' if dialect.alternative_quotes && !prev.is_some_and(|c| is_ident_char(c) && c != 'N' && c != 'n') => {
                let mut chars = rest[width..].chars();
                if let (Some('\''), Some(open)) = (chars.next(), chars.next()) {
                    code.push((i, ch));
                    code.push((i + 1, '\''));
                    code.push((i + 2, open));
                    i += 2 + open.len_utf8();
                    state.quote = Some(Quote::Alternative(closing_char(open)));
                    bare.push(' ');
                    continue;
                }
                None
            }
            _ => None,
        };

        code.push((i, ch));
        i += width;
        if let Some(quote) = opened {
            state.quote = Some(quote);
            bare.push(' ');
        } else {
            bare.push(ch);
        }
    }

    let words = bare
        .split(|c: char| !is_ident_char(c))
        .filter(|w| !w.is_empty())
        .map(|w| w.to_ascii_uppercase())
        .collect();
    let paren_delta = bare.chars().fold(0, |depth, c| match c {
        '(' => depth + 1,
        ')' => depth - 1,
        _ => depth,
    });

    LineScan {
        state,
        code,
        words,
        paren_delta,
        comment_end,
    }
}

/// After a closing quote at `i - 1`, consume a doubled quote if present.
/// Returns whether the literal is still open.
fn take_doubled(line: &str, i: &mut usize, code: &mut Vec<(usize, char)>, quote: char) -> bool {
    if line[*i..].starts_with(quote) {
        code.push((*i, quote));
        *i += quote.len_utf8();
        true
    } else {
        false
    }
}

fn dollar_tag(rest: &str) -> Option<&str> {
    let body = rest.strip_prefix('$')?;
    let end = body.find('$')?;
    let tag = &body[..end];
    let valid = tag.chars().enumerate().all(|(idx, c)| {
        c == '_' || c.is_ascii_alphabetic() || (idx > 0 && c.is_ascii_digit())
    });
    valid.then(|| &rest[..end + 2])
}

fn closing_char(open: char) -> char {
    match open {
        '[' => ']',
        '(' => ')',
        '{' => '}',
        '<' => '>',
        other => other,
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$' || c == '#'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(line: &str, dialect: &Dialect) -> LineScan {
        scan_line(line, &LexState::default(), dialect, Some(&Delimiter::SEMICOLON))
    }

    #[test]
    fn test_plain_code() {
        let s = scan("select  1 ;", &Dialect::generic());
        assert_eq!(s.normalized(), "SELECT 1 ;");
        assert!(!s.state.is_open());
        assert_eq!(s.words, vec!["SELECT", "1"]);
    }

    #[test]
    fn test_line_comment_is_dropped() {
        let s = scan("SELECT 1; -- trailing", &Dialect::generic());
        assert_eq!(s.normalized(), "SELECT 1;");
    }

    #[test]
    fn test_block_comment_spanning_lines() {
        let dialect = Dialect::generic();
        let first = scan("SELECT /* open", &dialect);
        assert_eq!(first.state.comment_depth, 1);

        let second = scan_line("still */ 1;", &first.state, &dialect, None);
        assert!(!second.state.is_open());
        assert_eq!(second.normalized(), "1;");
        assert_eq!(second.comment_end, Some(8));
    }

    #[test]
    fn test_nested_comments() {
        let pg = Dialect::postgresql();
        let s = scan("/* a /* b */ still comment */ SELECT 1;", &pg);
        assert_eq!(s.normalized(), "SELECT 1;");

        let generic = scan("/* a /* b */ x */", &Dialect::generic());
        assert_eq!(generic.normalized(), "X */");
    }

    #[test]
    fn test_literal_keeps_delimiter_inside() {
        let s = scan("INSERT INTO t VALUES ('a;b');", &Dialect::generic());
        assert!(!s.state.is_open());
        assert!(s.normalized().ends_with("('A;B');"));
        assert!(!s.words.contains(&"B".to_string()));
    }

    #[test]
    fn test_open_literal() {
        let s = scan("INSERT INTO t VALUES ('multi", &Dialect::generic());
        assert_eq!(s.state.open_construct(), Some("string literal"));
    }

    #[test]
    fn test_doubled_quote() {
        let s = scan("SELECT 'it''s';", &Dialect::generic());
        assert!(!s.state.is_open());
    }

    #[test]
    fn test_backslash_escape_mysql() {
        let s = scan(r"SELECT 'it\'s';", &Dialect::mysql());
        assert!(!s.state.is_open());
        let generic = scan(r"SELECT 'it\'s';", &Dialect::generic());
        assert!(generic.state.is_open());
    }

    #[test]
    fn test_postgres_escape_string() {
        let s = scan(r"SELECT E'it\'s';", &Dialect::postgresql());
        assert!(!s.state.is_open());
    }

    #[test]
    fn test_dollar_quote() {
        let pg = Dialect::postgresql();
        let s = scan("CREATE FUNCTION f() RETURNS int AS $body$", &pg);
        assert_eq!(s.state.quote, Some(Quote::Dollar("$body$".into())));

        let inner = scan_line("SELECT 1;", &s.state, &pg, None);
        assert!(inner.state.is_open());

        let close = scan_line("$body$ LANGUAGE sql;", &inner.state, &pg, None);
        assert!(!close.state.is_open());
        assert!(close.normalized().ends_with("LANGUAGE SQL;"));
    }

    #[test]
    fn test_positional_parameter_is_not_dollar_quote() {
        let s = scan("SELECT $1 + $2;", &Dialect::postgresql());
        assert!(!s.state.is_open());
    }

    #[test]
    fn test_oracle_alternative_quote() {
        let s = scan("SELECT q'[it's]' FROM dual;", &Dialect::oracle());
        assert!(!s.state.is_open());
        assert!(s.normalized().ends_with("FROM DUAL;"));
    }

    #[test]
    fn test_charset_cast_prefix() {
        let s = scan("SELECT _utf8'abc', X'0A', N'x';", &Dialect::mysql());
        assert!(!s.state.is_open());
    }

    #[test]
    fn test_mysql_hash_comment() {
        let s = scan("SELECT 1; # note", &Dialect::mysql());
        assert_eq!(s.normalized(), "SELECT 1;");
    }

    #[test]
    fn test_delimiter_offset() {
        let s = scan("SELECT 'Straßenpaß';  ", &Dialect::generic());
        let offset = s.delimiter_offset(";").unwrap();
        assert_eq!(&"SELECT 'Straßenpaß';  "[..offset], "SELECT 'Straßenpaß'");
    }
}
