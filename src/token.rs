//! Tokenizer
//!
//! Lexes one pre-read, NUL-free source buffer into an explicit `Vec<Token>`
//! (not an intrusive linked list) terminated by a single EOF token.

use crate::diagnostics::{CResult, CompileError};

/// Reserved words that an identifier-shaped token is reclassified into
/// during a post-lex pass.
const KEYWORDS: &[&str] = &[
    "return", "if", "else", "while", "do", "for", "switch", "case", "default", "break",
    "continue", "goto", "sizeof", "void", "bool", "char", "short", "int", "long", "struct",
    "union", "enum", "typedef", "static", "extern",
];

/// Punctuators, longest match first so e.g. `<<=` is never split into
/// `<<` followed by `=`.
const PUNCTUATORS: &[&str] = &[
    "...", "<<=", ">>=", "==", "!=", "<=", ">=", "<<", ">>", "&&", "||", "->", "++", "--", "+=",
    "-=", "*=", "/=", "%=", "&=", "|=", "^=", "+", "-", "*", "/", "%", "(", ")", "{", "}", "[",
    "]", ";", ",", ".", "&", "|", "^", "~", "!", "<", ">", "=", "?", ":",
];

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Ident,
    Keyword,
    Punct,
    /// Decoded byte contents of a string literal (NUL-terminated already
    /// included). The token's type is `array of char [bytes.len()]`.
    Str(Vec<u8>),
    /// A parsed integer literal, or the ASCII value of a character
    /// literal (both are `int`-typed per C semantics).
    Num(i64),
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// Raw source text, used to compare punctuators/keywords/idents.
    pub text: String,
    /// 1-indexed line number, for diagnostics and `.loc` directives.
    pub line: usize,
    /// 0-indexed column, for caret diagnostics.
    pub column: usize,
}

impl Token {
    pub fn is(&self, text: &str) -> bool {
        matches!(self.kind, TokenKind::Punct | TokenKind::Keyword) && self.text == text
    }

    pub fn is_ident(&self) -> bool {
        matches!(self.kind, TokenKind::Ident)
    }

    pub fn is_eof(&self) -> bool {
        matches!(self.kind, TokenKind::Eof)
    }

    fn err(&self, message: impl Into<String>) -> CompileError {
        CompileError::at(message, self.line, self.column)
    }
}

struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
    line: usize,
    line_start: usize,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a [u8]) -> Self {
        Lexer { src, pos: 0, line: 1, line_start: 0 }
    }

    fn column(&self) -> usize {
        self.pos - self.line_start
    }

    fn peek(&self) -> u8 {
        self.src.get(self.pos).copied().unwrap_or(0)
    }

    fn peek_at(&self, offset: usize) -> u8 {
        self.src.get(self.pos + offset).copied().unwrap_or(0)
    }

    fn starts_with(&self, s: &str) -> bool {
        self.src[self.pos..].starts_with(s.as_bytes())
    }

    fn advance(&mut self) -> u8 {
        let c = self.peek();
        self.pos += 1;
        if c == b'\n' {
            self.line += 1;
            self.line_start = self.pos;
        }
        c
    }

    fn skip_trivia(&mut self) -> CResult<()> {
        loop {
            match self.peek() {
                b' ' | b'\t' | b'\r' | b'\n' => {
                    self.advance();
                }
                b'/' if self.peek_at(1) == b'/' => {
                    while self.peek() != b'\n' && self.peek() != 0 {
                        self.advance();
                    }
                }
                b'/' if self.peek_at(1) == b'*' => {
                    let (start_line, start_col) = (self.line, self.column());
                    self.advance();
                    self.advance();
                    loop {
                        if self.peek() == 0 {
                            return Err(CompileError::at(
                                "unterminated comment",
                                start_line,
                                start_col,
                            ));
                        }
                        if self.peek() == b'*' && self.peek_at(1) == b'/' {
                            self.advance();
                            self.advance();
                            break;
                        }
                        self.advance();
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn tokenize(mut self) -> CResult<Vec<Token>> {
        let mut tokens = Vec::new();
        loop {
            self.skip_trivia()?;
            let line = self.line;
            let column = self.column();
            let c = self.peek();
            if c == 0 {
                tokens.push(Token { kind: TokenKind::Eof, text: String::new(), line, column });
                break;
            }
            if c == b'"' {
                tokens.push(self.read_string(line, column)?);
                continue;
            }
            if c == b'\'' {
                tokens.push(self.read_char_literal(line, column)?);
                continue;
            }
            if c.is_ascii_digit() {
                tokens.push(self.read_number(line, column));
                continue;
            }
            if c == b'_' || c.is_ascii_alphabetic() {
                tokens.push(self.read_ident(line, column));
                continue;
            }
            if let Some(p) = PUNCTUATORS.iter().find(|p| self.starts_with(p)) {
                for _ in 0..p.len() {
                    self.advance();
                }
                tokens.push(Token {
                    kind: TokenKind::Punct,
                    text: (*p).to_string(),
                    line,
                    column,
                });
                continue;
            }
            return Err(CompileError::at(
                format!("invalid character '{}'", c as char),
                line,
                column,
            ));
        }
        Ok(tokens)
    }

    fn read_ident(&mut self, line: usize, column: usize) -> Token {
        let start = self.pos;
        while self.peek() == b'_' || self.peek().is_ascii_alphanumeric() {
            self.advance();
        }
        let text = String::from_utf8_lossy(&self.src[start..self.pos]).into_owned();
        let kind = if KEYWORDS.contains(&text.as_str()) { TokenKind::Keyword } else { TokenKind::Ident };
        Token { kind, text, line, column }
    }

    fn read_number(&mut self, line: usize, column: usize) -> Token {
        let start = self.pos;
        let value = if self.peek() == b'0' && (self.peek_at(1) == b'x' || self.peek_at(1) == b'X')
        {
            self.advance();
            self.advance();
            let digit_start = self.pos;
            while self.peek().is_ascii_hexdigit() {
                self.advance();
            }
            let digits = std::str::from_utf8(&self.src[digit_start..self.pos]).unwrap_or("0");
            i64::from_str_radix(digits, 16).unwrap_or(0)
        } else if self.peek() == b'0' && self.peek_at(1).is_ascii_digit() {
            self.advance();
            let digit_start = self.pos;
            while (b'0'..=b'7').contains(&self.peek()) {
                self.advance();
            }
            let digits = std::str::from_utf8(&self.src[digit_start..self.pos]).unwrap_or("0");
            i64::from_str_radix(digits, 8).unwrap_or(0)
        } else {
            while self.peek().is_ascii_digit() {
                self.advance();
            }
            std::str::from_utf8(&self.src[start..self.pos]).unwrap_or("0").parse().unwrap_or(0)
        };
        let text = String::from_utf8_lossy(&self.src[start..self.pos]).into_owned();
        Token { kind: TokenKind::Num(value), text, line, column }
    }

    /// Reads the body of `\ooo` / `\xhh...` / single-char escapes,
    /// matching the reference `read_escaped_char`: octal takes up to
    /// three digits, hex takes as many hex digits as follow.
    fn read_escaped_byte(&mut self) -> u8 {
        let c = self.peek();
        if (b'0'..=b'7').contains(&c) {
            let mut value = (self.advance() - b'0') as i32;
            for _ in 0..2 {
                if (b'0'..=b'7').contains(&self.peek()) {
                    value = (value << 3) + (self.advance() - b'0') as i32;
                } else {
                    break;
                }
            }
            return value as u8;
        }
        if c == b'x' {
            self.advance();
            let mut value: i32 = 0;
            while self.peek().is_ascii_hexdigit() {
                let d = self.advance();
                let digit = match d {
                    b'0'..=b'9' => d - b'0',
                    b'a'..=b'f' => d - b'a' + 10,
                    b'A'..=b'F' => d - b'A' + 10,
                    _ => 0,
                };
                value = (value << 4) + digit as i32;
            }
            return value as u8;
        }
        let escaped = self.advance();
        match escaped {
            b'a' => 7,
            b'b' => 8,
            b't' => 9,
            b'n' => 10,
            b'v' => 11,
            b'f' => 12,
            b'r' => 13,
            b'e' => 27,
            b'\\' => b'\\',
            b'\'' => b'\'',
            b'"' => b'"',
            b'?' => b'?',
            other => other,
        }
    }

    fn read_string(&mut self, line: usize, column: usize) -> CResult<Token> {
        self.advance(); // opening quote
        let mut bytes = Vec::new();
        loop {
            match self.peek() {
                0 | b'\n' => {
                    return Err(CompileError::at("unclosed string literal", line, column));
                }
                b'"' => {
                    self.advance();
                    break;
                }
                b'\\' => {
                    self.advance();
                    bytes.push(self.read_escaped_byte());
                }
                _ => bytes.push(self.advance()),
            }
        }
        bytes.push(0);
        Ok(Token { kind: TokenKind::Str(bytes), text: String::new(), line, column })
    }

    fn read_char_literal(&mut self, line: usize, column: usize) -> CResult<Token> {
        self.advance(); // opening quote
        if self.peek() == 0 {
            return Err(CompileError::at("unclosed character literal", line, column));
        }
        let value = if self.peek() == b'\\' {
            self.advance();
            self.read_escaped_byte() as i64
        } else {
            self.advance() as i64
        };
        if self.peek() != b'\'' {
            return Err(CompileError::at("unclosed character literal", line, column));
        }
        self.advance();
        Ok(Token { kind: TokenKind::Num(value), text: String::new(), line, column })
    }
}

/// Tokenize `source`, appending a trailing newline first if the caller
/// hasn't already.
pub fn tokenize(source: &str) -> CResult<Vec<Token>> {
    let mut owned;
    let source = if source.ends_with('\n') {
        source
    } else {
        owned = source.to_string();
        owned.push('\n');
        &owned
    };
    Lexer::new(source.as_bytes()).tokenize()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        tokenize(src).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn tokenizes_simple_return() {
        let toks = tokenize("int main() { return 42; }\n").unwrap();
        let texts: Vec<_> = toks.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(
            texts,
            vec!["int", "main", "(", ")", "{", "return", "42", ";", "}", ""]
        );
        assert!(matches!(toks.last().unwrap().kind, TokenKind::Eof));
    }

    #[test]
    fn longest_match_wins_for_multichar_punctuators() {
        let toks = tokenize("a <<= b;\n").unwrap();
        assert_eq!(toks[1].text, "<<=");
    }

    #[test]
    fn skips_line_and_block_comments() {
        let toks = tokenize("1 // foo\n+ /* bar\nbaz */ 2;\n").unwrap();
        let texts: Vec<_> = toks.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["1", "+", "2", ";", ""]);
    }

    #[test]
    fn decodes_string_escapes() {
        let toks = tokenize("\"a\\nb\\x41\\101\"\n").unwrap();
        match &toks[0].kind {
            TokenKind::Str(bytes) => assert_eq!(bytes, &vec![b'a', b'\n', b'b', 0x41, 0o101, 0]),
            other => panic!("expected string token, got {other:?}"),
        }
    }

    #[test]
    fn char_literal_decodes_to_numeric_token() {
        let toks = tokenize("'\\n';\n").unwrap();
        assert_eq!(toks[0].kind, TokenKind::Num(10));
    }

    #[test]
    fn hex_and_octal_numeric_literals() {
        assert_eq!(kinds("0x1F;\n")[0], TokenKind::Num(31));
        assert_eq!(kinds("017;\n")[0], TokenKind::Num(15));
        assert_eq!(kinds("42;\n")[0], TokenKind::Num(42));
    }

    #[test]
    fn keyword_reclassification() {
        let toks = tokenize("return while x;\n").unwrap();
        assert_eq!(toks[0].kind, TokenKind::Keyword);
        assert_eq!(toks[1].kind, TokenKind::Keyword);
        assert_eq!(toks[2].kind, TokenKind::Ident);
    }

    #[test]
    fn unclosed_string_is_an_error() {
        let err = tokenize("\"abc\n").unwrap_err();
        assert!(err.message.contains("unclosed string"));
    }

    #[test]
    fn appends_missing_trailing_newline() {
        let toks = tokenize("1;").unwrap();
        assert_eq!(toks.len(), 3); // `1`, `;`, EOF
    }

    #[test]
    fn retokenizing_joined_token_text_is_equivalent() {
        let src = "int main(){ int a=3; return a+1; }\n";
        let toks = tokenize(src).unwrap();
        let rejoined: Vec<_> = toks.iter().filter(|t| t.text != "").map(|t| t.text.as_str()).collect();
        let pretty = format!("{}\n", rejoined.join(" "));
        let reparsed = kinds(&pretty);
        let original: Vec<_> = toks.iter().map(|t| t.kind.clone()).collect();
        assert_eq!(reparsed, original);
    }
}
