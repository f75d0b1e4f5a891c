use num_bigint::BigInt;

use crate::diagnostic::Diagnostic;
use crate::syntax::lexeme::Lexeme;
use crate::syntax::span::{Span, Spanned};

pub struct Lexer<'src> {
    source: &'src [u8],
    file_id: u16,
    pos: usize,
    diagnostics: Vec<Diagnostic>,
}

impl<'src> Lexer<'src> {
    pub fn new(source: &'src str, file_id: u16) -> Self {
        Self {
            source: source.as_bytes(),
            file_id,
            pos: 0,
            diagnostics: Vec::new(),
        }
    }

    pub fn tokenize(mut self) -> (Vec<Spanned<Lexeme>>, Vec<Diagnostic>) {
        let mut tokens = Vec::new();
        loop {
            let tok = self.next_token();
            let is_eof = tok.node == Lexeme::Eof;
            tokens.push(tok);
            if is_eof {
                break;
            }
        }
        (tokens, self.diagnostics)
    }

    fn next_token(&mut self) -> Spanned<Lexeme> {
        loop {
            self.skip_whitespace_and_comments();

            if self.pos >= self.source.len() {
                return self.make_token(Lexeme::Eof, self.pos, self.pos);
            }

            let start = self.pos;
            let ch = self.source[self.pos];

            if is_ident_start(ch) {
                return self.scan_ident_or_keyword();
            }

            if ch.is_ascii_digit() {
                return self.scan_number();
            }

            if let Some(tok) = self.scan_symbol(start) {
                return tok;
            }
            // scan_symbol returned None → error was recorded, try again
        }
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            while self.pos < self.source.len() && self.source[self.pos].is_ascii_whitespace() {
                self.pos += 1;
            }

            // Line comments
            if self.pos + 1 < self.source.len()
                && self.source[self.pos] == b'/'
                && self.source[self.pos + 1] == b'/'
            {
                while self.pos < self.source.len() && self.source[self.pos] != b'\n' {
                    self.pos += 1;
                }
                continue;
            }

            // Block comments (non-nesting)
            if self.pos + 1 < self.source.len()
                && self.source[self.pos] == b'/'
                && self.source[self.pos + 1] == b'*'
            {
                let start = self.pos;
                self.pos += 2;
                loop {
                    if self.pos + 1 >= self.source.len() {
                        self.pos = self.source.len();
                        self.diagnostics.push(Diagnostic::error(
                            "unterminated block comment".to_string(),
                            Span::new(self.file_id, start as u32, self.pos as u32),
                        ));
                        break;
                    }
                    if self.source[self.pos] == b'*' && self.source[self.pos + 1] == b'/' {
                        self.pos += 2;
                        break;
                    }
                    self.pos += 1;
                }
                continue;
            }

            break;
        }
    }

    fn scan_ident_or_keyword(&mut self) -> Spanned<Lexeme> {
        let start = self.pos;
        while self.pos < self.source.len() && is_ident_continue(self.source[self.pos]) {
            self.pos += 1;
        }
        let text = std::str::from_utf8(&self.source[start..self.pos]).unwrap();
        let lexeme = Lexeme::from_keyword(text).unwrap_or_else(|| Lexeme::Ident(text.to_string()));
        self.make_token(lexeme, start, self.pos)
    }

    fn scan_number(&mut self) -> Spanned<Lexeme> {
        let start = self.pos;
        while self.pos < self.source.len() && self.source[self.pos].is_ascii_digit() {
            self.pos += 1;
        }
        let text = std::str::from_utf8(&self.source[start..self.pos]).unwrap();
        // Only ASCII digits by construction, so this cannot fail
        let value: BigInt = text.parse().unwrap();
        self.make_token(Lexeme::Integer(value), start, self.pos)
    }

    fn scan_symbol(&mut self, start: usize) -> Option<Spanned<Lexeme>> {
        let ch = self.source[self.pos];
        let next = self.source.get(self.pos + 1).copied();
        let next2 = self.source.get(self.pos + 2).copied();
        let next3 = self.source.get(self.pos + 3).copied();

        let (lexeme, len) = match ch {
            b'(' => (Lexeme::LParen, 1),
            b')' => (Lexeme::RParen, 1),
            b'{' => (Lexeme::LBrace, 1),
            b'}' => (Lexeme::RBrace, 1),
            b'[' => (Lexeme::LBracket, 1),
            b']' => (Lexeme::RBracket, 1),
            b',' => (Lexeme::Comma, 1),
            b';' => (Lexeme::Semicolon, 1),
            b'+' => (Lexeme::Plus, 1),
            b'-' => (Lexeme::Minus, 1),
            b'*' => (Lexeme::Star, 1),
            b':' => match next {
                Some(b'=') => (Lexeme::Assign, 2),
                Some(b':') => (Lexeme::ColonColon, 2),
                _ => (Lexeme::Colon, 1),
            },
            b'<' => match (next, next2, next3) {
                (Some(b'='), Some(b'='), Some(b'>')) => (Lexeme::Iff, 4),
                (Some(b'='), Some(b'='), _) => (Lexeme::Explies, 3),
                (Some(b'='), _, _) => (Lexeme::Le, 2),
                _ => (Lexeme::Lt, 1),
            },
            b'>' => match next {
                Some(b'=') => (Lexeme::Ge, 2),
                _ => (Lexeme::Gt, 1),
            },
            b'=' => match (next, next2) {
                (Some(b'='), Some(b'>')) => (Lexeme::Implies, 3),
                (Some(b'='), _) => (Lexeme::EqEq, 2),
                _ => {
                    self.error_at(start, 1, "unexpected `=`", Some("use `==` for equality or `:=` for assignment"));
                    return None;
                }
            },
            b'!' => match next {
                Some(b'=') => (Lexeme::Neq, 2),
                _ => (Lexeme::Not, 1),
            },
            b'&' => match next {
                Some(b'&') => (Lexeme::AndAnd, 2),
                _ => {
                    self.error_at(start, 1, "unexpected `&`", Some("use `&&` for conjunction"));
                    return None;
                }
            },
            b'|' => match next {
                Some(b'|') => (Lexeme::OrOr, 2),
                _ => {
                    self.error_at(start, 1, "unexpected `|`", Some("use `||` for disjunction"));
                    return None;
                }
            },
            _ => {
                self.error_at(start, 1, &format!("unexpected character `{}`", ch as char), None);
                return None;
            }
        };

        self.pos += len;
        Some(self.make_token(lexeme, start, self.pos))
    }

    fn error_at(&mut self, start: usize, len: usize, message: &str, help: Option<&str>) {
        self.pos += len;
        let mut diag = Diagnostic::error(
            message.to_string(),
            Span::new(self.file_id, start as u32, (start + len) as u32),
        );
        if let Some(h) = help {
            diag = diag.with_help(h.to_string());
        }
        self.diagnostics.push(diag);
    }

    fn make_token(&self, lexeme: Lexeme, start: usize, end: usize) -> Spanned<Lexeme> {
        Spanned::new(lexeme, Span::new(self.file_id, start as u32, end as u32))
    }
}

fn is_ident_start(ch: u8) -> bool {
    ch.is_ascii_alphabetic() || ch == b'_' || ch == b'$' || ch == b'\''
}

fn is_ident_continue(ch: u8) -> bool {
    ch.is_ascii_alphanumeric() || ch == b'_' || ch == b'$' || ch == b'\'' || ch == b'.'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(source: &str) -> Vec<Lexeme> {
        let (tokens, diags) = Lexer::new(source, 0).tokenize();
        assert!(diags.is_empty(), "unexpected diagnostics: {:?}", diags);
        tokens.into_iter().map(|t| t.node).collect()
    }

    #[test]
    fn keywords_and_idents() {
        let toks = lex("procedure p1 returns havoc old$x");
        assert_eq!(
            toks,
            vec![
                Lexeme::Procedure,
                Lexeme::Ident("p1".to_string()),
                Lexeme::Returns,
                Lexeme::Havoc,
                Lexeme::Ident("old$x".to_string()),
                Lexeme::Eof,
            ]
        );
    }

    #[test]
    fn operators_longest_match() {
        let toks = lex("<==> <== <= < ==> == != := :: :");
        assert_eq!(
            toks,
            vec![
                Lexeme::Iff,
                Lexeme::Explies,
                Lexeme::Le,
                Lexeme::Lt,
                Lexeme::Implies,
                Lexeme::EqEq,
                Lexeme::Neq,
                Lexeme::Assign,
                Lexeme::ColonColon,
                Lexeme::Colon,
                Lexeme::Eof,
            ]
        );
    }

    #[test]
    fn big_integer_literal() {
        let toks = lex("123456789012345678901234567890");
        match &toks[0] {
            Lexeme::Integer(n) => {
                assert_eq!(n.to_string(), "123456789012345678901234567890");
            }
            other => panic!("expected integer, got {:?}", other),
        }
    }

    #[test]
    fn comments_skipped() {
        let toks = lex("assert /* block\ncomment */ true; // trailing\n");
        assert_eq!(
            toks,
            vec![Lexeme::Assert, Lexeme::True, Lexeme::Semicolon, Lexeme::Eof]
        );
    }

    #[test]
    fn single_eq_is_an_error() {
        let (tokens, diags) = Lexer::new("x = 1", 0).tokenize();
        assert_eq!(diags.len(), 1);
        // Recovery continues past the bad character
        assert!(tokens.iter().any(|t| matches!(t.node, Lexeme::Integer(_))));
    }
}
