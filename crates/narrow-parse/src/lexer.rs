use crate::token::{Tok, TokKind};
use narrow_ast::span::Span;

pub struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self {
            src: src.as_bytes(),
            pos: 0,
        }
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.src.get(self.pos).copied()?;
        self.pos += 1;
        Some(b)
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }
    fn peek2(&self) -> Option<u8> {
        self.src.get(self.pos + 1).copied()
    }

    fn span(&self, start: usize) -> Span {
        Span {
            start: start as u32,
            end: self.pos as u32,
        }
    }

    fn tok(&self, kind: TokKind, start: usize) -> Tok {
        Tok {
            kind,
            span: self.span(start),
        }
    }

    fn skip_ws_and_comments(&mut self) {
        loop {
            while matches!(self.peek(), Some(b) if b.is_ascii_whitespace()) {
                self.bump();
            }
            // line comment: //
            if self.peek() == Some(b'/') && self.peek2() == Some(b'/') {
                while let Some(b) = self.peek() {
                    if b == b'\n' {
                        break;
                    }
                    self.bump();
                }
                continue;
            }
            break;
        }
    }

    pub fn next_tok(&mut self) -> Tok {
        self.skip_ws_and_comments();
        let start = self.pos;
        let Some(b) = self.bump() else {
            return self.tok(TokKind::Eof, start);
        };
        let c = b as char;

        // 2-char operators first
        let double = match (c, self.peek().map(|p| p as char)) {
            ('&', Some('&')) => Some(TokKind::AndAnd),
            ('|', Some('|')) => Some(TokKind::OrOr),
            ('=', Some('=')) => Some(TokKind::EqEq),
            ('!', Some('=')) => Some(TokKind::BangEq),
            ('<', Some('=')) => Some(TokKind::Le),
            ('>', Some('=')) => Some(TokKind::Ge),
            ('-', Some('>')) => Some(TokKind::Arrow),
            (':', Some(':')) => Some(TokKind::ColonColon),
            _ => None,
        };
        if let Some(k) = double {
            self.bump();
            return self.tok(k, start);
        }

        // 1-char punctuation/operators
        let single = match c {
            '(' => Some(TokKind::LParen),
            ')' => Some(TokKind::RParen),
            '{' => Some(TokKind::LBrace),
            '}' => Some(TokKind::RBrace),
            ',' => Some(TokKind::Comma),
            ':' => Some(TokKind::Colon),
            ';' => Some(TokKind::Semicolon),
            '.' => Some(TokKind::Dot),
            '+' => Some(TokKind::Plus),
            '-' => Some(TokKind::Minus),
            '*' => Some(TokKind::Star),
            '/' => Some(TokKind::Slash),
            '=' => Some(TokKind::Eq),
            '<' => Some(TokKind::Lt),
            '>' => Some(TokKind::Gt),
            '!' => Some(TokKind::Bang),
            _ => None,
        };
        if let Some(k) = single {
            return self.tok(k, start);
        }

        if c == '"' {
            return self.lex_string(start);
        }

        if c.is_ascii_digit() {
            let mut s = String::from(c);
            while let Some(p) = self.peek().filter(u8::is_ascii_digit) {
                s.push(p as char);
                self.bump();
            }
            let kind = match s.parse() {
                Ok(v) => TokKind::Int(v),
                Err(_) => TokKind::Error(format!("integer literal out of range: {}", s)),
            };
            return self.tok(kind, start);
        }

        // ident / keywords
        if c.is_ascii_alphabetic() || c == '_' {
            let mut s = String::from(c);
            while let Some(p) = self.peek() {
                let ch = p as char;
                if ch.is_ascii_alphanumeric() || ch == '_' {
                    s.push(ch);
                    self.bump();
                } else {
                    break;
                }
            }
            let kind = match s.as_str() {
                "let" => TokKind::KwLet,
                "fn" => TokKind::KwFn,
                "true" => TokKind::KwTrue,
                "false" => TokKind::KwFalse,
                "if" => TokKind::KwIf,
                "else" => TokKind::KwElse,
                "return" => TokKind::KwReturn,
                "union" => TokKind::KwUnion,
                "type" => TokKind::KwType,
                "visitor" => TokKind::KwVisitor,
                "for" => TokKind::KwFor,
                "switch" => TokKind::KwSwitch,
                "case" => TokKind::KwCase,
                "default" => TokKind::KwDefault,
                "is" => TokKind::KwIs,
                // `as` is only meaningful as the unchecked `as!`
                "as" if self.peek() == Some(b'!') && self.peek2() != Some(b'=') => {
                    self.bump();
                    TokKind::KwAsBang
                }
                _ => TokKind::Ident(s),
            };
            return self.tok(kind, start);
        }

        self.tok(
            TokKind::Error(format!("unexpected character '{}'", c)),
            start,
        )
    }

    fn lex_string(&mut self, start: usize) -> Tok {
        let mut bytes = Vec::new();
        loop {
            let Some(b) = self.bump() else {
                return self.tok(TokKind::Error("unterminated string literal".into()), start);
            };
            match b {
                b'"' => break,
                b'\\' => {
                    let Some(esc) = self.bump() else {
                        return self
                            .tok(TokKind::Error("unterminated string literal".into()), start);
                    };
                    bytes.push(match esc {
                        b'n' => b'\n',
                        b't' => b'\t',
                        other => other,
                    });
                }
                other => bytes.push(other),
            }
        }
        let s = String::from_utf8_lossy(&bytes).into_owned();
        self.tok(TokKind::Str(s), start)
    }
}
