use crate::error::{ErrorKind, SandboxError};

/// A piece of a double-quoted string literal. Interpolation bodies are kept
/// as raw source and re-lexed by the parser with their original position.
#[derive(Debug, Clone, PartialEq)]
pub enum StrPiece {
    Text(String),
    Interp { src: String, line: u32, column: u32 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Int(i64),
    Float(f64),
    Str(Vec<StrPiece>),
    Atom(String),
    /// Lowercase identifier (variable or local call head).
    Ident(String),
    /// Capitalized identifier (module alias segment).
    UpIdent(String),
    /// `name:` keyword key (map shorthand, `do:` shorthand).
    KwIdent(String),
    /// `@name`.
    AttrName(String),
    Sigil {
        letter: char,
        body: String,
        modifiers: String,
    },

    // Keywords
    Defmodule,
    Def,
    Defp,
    Do,
    End,
    Case,
    Cond,
    Fn,
    When,
    With,
    Else,
    True,
    False,
    NilKw,
    Alias,
    Import,
    Require,
    Use,

    // Delimiters
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    /// `%{`.
    PercentBrace,
    /// `<<`.
    LtLt,
    /// `>>`.
    GtGt,

    Comma,
    Semicolon,
    Newline,
    /// `->`.
    Arrow,
    /// `<-`.
    LeftArrow,
    /// `=>`.
    FatArrow,
    /// `|`.
    Pipe,
    /// `|>`.
    PipeGt,
    /// `&`.
    Capture,
    /// `.`.
    Dot,
    /// Any other operator token, including word operators `and or not in`.
    Op(String),

    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpannedToken {
    pub token: Token,
    pub line: u32,
    pub column: u32,
}

/// Tokenize a whole source text starting at line 1.
pub fn lex(source: &str) -> Result<Vec<SpannedToken>, SandboxError> {
    lex_from(source, 1, 1)
}

/// Tokenize an embedded snippet (string interpolation) keeping positions
/// relative to the enclosing source.
pub fn lex_from(source: &str, line: u32, column: u32) -> Result<Vec<SpannedToken>, SandboxError> {
    let mut lexer = Lexer::new(source, line, column);
    lexer.tokenize()?;
    Ok(lexer.tokens)
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: u32,
    column: u32,
    tokens: Vec<SpannedToken>,
}

impl Lexer {
    fn new(source: &str, line: u32, column: u32) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line,
            column,
            tokens: Vec::new(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.get(self.pos).copied()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn push(&mut self, token: Token, line: u32, column: u32) {
        self.tokens.push(SpannedToken {
            token,
            line,
            column,
        });
    }

    fn err(&self, message: impl Into<String>) -> SandboxError {
        SandboxError::at_line(ErrorKind::Parse, message, self.line)
    }

    fn tokenize(&mut self) -> Result<(), SandboxError> {
        while let Some(c) = self.peek() {
            let (line, column) = (self.line, self.column);
            match c {
                ' ' | '\t' | '\r' => {
                    self.bump();
                }
                '#' => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                '\n' => {
                    while matches!(self.peek(), Some('\n') | Some(' ') | Some('\t') | Some('\r')) {
                        // Only whole blank lines collapse; stop at content.
                        if self.peek() != Some('\n') {
                            let mut ahead = 0;
                            let blank = loop {
                                match self.peek_at(ahead) {
                                    Some(' ') | Some('\t') | Some('\r') => ahead += 1,
                                    Some('\n') => break true,
                                    _ => break false,
                                }
                            };
                            if !blank {
                                break;
                            }
                        }
                        self.bump();
                    }
                    self.push(Token::Newline, line, column);
                }
                ';' => {
                    self.bump();
                    self.push(Token::Semicolon, line, column);
                }
                '(' => {
                    self.bump();
                    self.push(Token::LParen, line, column);
                }
                ')' => {
                    self.bump();
                    self.push(Token::RParen, line, column);
                }
                '[' => {
                    self.bump();
                    self.push(Token::LBracket, line, column);
                }
                ']' => {
                    self.bump();
                    self.push(Token::RBracket, line, column);
                }
                '{' => {
                    self.bump();
                    self.push(Token::LBrace, line, column);
                }
                '}' => {
                    self.bump();
                    self.push(Token::RBrace, line, column);
                }
                ',' => {
                    self.bump();
                    self.push(Token::Comma, line, column);
                }
                '%' => {
                    self.bump();
                    if self.peek() == Some('{') {
                        self.bump();
                        self.push(Token::PercentBrace, line, column);
                    } else {
                        self.push(Token::Op("%".into()), line, column);
                    }
                }
                '"' => {
                    self.bump();
                    let pieces = self.lex_string()?;
                    self.push(Token::Str(pieces), line, column);
                }
                '\'' => {
                    return Err(self.err("charlist literals are not supported"));
                }
                ':' => {
                    self.bump();
                    match self.peek() {
                        Some(':') => {
                            self.bump();
                            self.push(Token::Op("::".into()), line, column);
                        }
                        Some(c2) if c2.is_ascii_alphabetic() || c2 == '_' => {
                            let name = self.lex_word();
                            self.push(Token::Atom(name), line, column);
                        }
                        Some('"') => {
                            self.bump();
                            let pieces = self.lex_string()?;
                            let mut name = String::new();
                            for piece in pieces {
                                match piece {
                                    StrPiece::Text(t) => name.push_str(&t),
                                    StrPiece::Interp { .. } => {
                                        return Err(
                                            self.err("interpolation is not allowed in atoms")
                                        );
                                    }
                                }
                            }
                            self.push(Token::Atom(name), line, column);
                        }
                        _ => return Err(self.err("unexpected token ':'")),
                    }
                }
                '@' => {
                    self.bump();
                    match self.peek() {
                        Some(c2) if c2.is_ascii_lowercase() || c2 == '_' => {
                            let name = self.lex_word();
                            self.push(Token::AttrName(name), line, column);
                        }
                        _ => return Err(self.err("unexpected token '@'")),
                    }
                }
                '~' => {
                    self.bump();
                    match self.peek() {
                        Some(c2) if c2.is_ascii_alphabetic() => {
                            self.bump();
                            let token = self.lex_sigil(c2)?;
                            self.push(token, line, column);
                        }
                        Some('~') => {
                            self.bump();
                            if self.peek() == Some('~') {
                                self.bump();
                                self.push(Token::Op("~~~".into()), line, column);
                            } else {
                                return Err(self.err("unexpected token '~~'"));
                            }
                        }
                        _ => return Err(self.err("unexpected token '~'")),
                    }
                }
                c if c.is_ascii_digit() => {
                    let token = self.lex_number()?;
                    self.push(token, line, column);
                }
                c if c.is_ascii_lowercase() || c == '_' => {
                    let word = self.lex_word();
                    let token = self.word_token(word);
                    self.push(token, line, column);
                }
                c if c.is_ascii_uppercase() => {
                    let word = self.lex_word();
                    self.push(Token::UpIdent(word), line, column);
                }
                _ => {
                    if let Some(op) = self.lex_operator() {
                        self.push(op, line, column);
                    } else {
                        return Err(self.err(format!("unexpected character '{c}'")));
                    }
                }
            }
        }
        let (line, column) = (self.line, self.column);
        self.push(Token::Eof, line, column);
        Ok(())
    }

    fn lex_word(&mut self) -> String {
        let mut word = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                word.push(c);
                self.bump();
            } else {
                break;
            }
        }
        if matches!(self.peek(), Some('?') | Some('!')) {
            word.push(self.bump().unwrap_or('?'));
        }
        word
    }

    fn word_token(&mut self, word: String) -> Token {
        // `name:` — keyword key, checked before keyword mapping so `do:` works.
        if self.peek() == Some(':') && self.peek_at(1) != Some(':') {
            let next_ok = matches!(self.peek_at(1), Some(' ') | Some('\t') | Some('\n') | None);
            if next_ok {
                self.bump();
                return Token::KwIdent(word);
            }
        }
        match word.as_str() {
            "defmodule" => Token::Defmodule,
            "def" => Token::Def,
            "defp" => Token::Defp,
            "do" => Token::Do,
            "end" => Token::End,
            "case" => Token::Case,
            "cond" => Token::Cond,
            "fn" => Token::Fn,
            "when" => Token::When,
            "with" => Token::With,
            "else" => Token::Else,
            "true" => Token::True,
            "false" => Token::False,
            "nil" => Token::NilKw,
            "alias" => Token::Alias,
            "import" => Token::Import,
            "require" => Token::Require,
            "use" => Token::Use,
            "and" | "or" | "not" | "in" => Token::Op(word),
            _ => Token::Ident(word),
        }
    }

    fn lex_number(&mut self) -> Result<Token, SandboxError> {
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() || c == '_' {
                if c != '_' {
                    text.push(c);
                }
                self.bump();
            } else {
                break;
            }
        }
        let mut is_float = false;
        if self.peek() == Some('.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            is_float = true;
            text.push('.');
            self.bump();
            while let Some(c) = self.peek() {
                if c.is_ascii_digit() || c == '_' {
                    if c != '_' {
                        text.push(c);
                    }
                    self.bump();
                } else {
                    break;
                }
            }
        }
        if matches!(self.peek(), Some('e') | Some('E'))
            && self
                .peek_at(1)
                .is_some_and(|c| c.is_ascii_digit() || c == '+' || c == '-')
        {
            is_float = true;
            text.push('e');
            self.bump();
            if matches!(self.peek(), Some('+') | Some('-')) {
                text.push(self.bump().unwrap_or('+'));
            }
            while let Some(c) = self.peek() {
                if c.is_ascii_digit() {
                    text.push(c);
                    self.bump();
                } else {
                    break;
                }
            }
        }
        if is_float {
            text.parse::<f64>()
                .map(Token::Float)
                .map_err(|_| self.err(format!("invalid number '{text}'")))
        } else {
            text.parse::<i64>()
                .map(Token::Int)
                .map_err(|_| self.err(format!("invalid number '{text}'")))
        }
    }

    fn lex_string(&mut self) -> Result<Vec<StrPiece>, SandboxError> {
        let mut pieces = Vec::new();
        let mut text = String::new();
        loop {
            let c = self.bump().ok_or_else(|| self.err("unterminated string"))?;
            match c {
                '"' => break,
                '\\' => {
                    let esc = self.bump().ok_or_else(|| self.err("unterminated string"))?;
                    text.push(match esc {
                        'n' => '\n',
                        't' => '\t',
                        'r' => '\r',
                        's' => ' ',
                        '0' => '\0',
                        other => other,
                    });
                }
                '#' if self.peek() == Some('{') => {
                    if !text.is_empty() {
                        pieces.push(StrPiece::Text(std::mem::take(&mut text)));
                    }
                    self.bump();
                    let (line, column) = (self.line, self.column);
                    let src = self.lex_interp_body()?;
                    pieces.push(StrPiece::Interp { src, line, column });
                }
                other => text.push(other),
            }
        }
        if !text.is_empty() || pieces.is_empty() {
            pieces.push(StrPiece::Text(text));
        }
        Ok(pieces)
    }

    /// Collect the raw source of a `#{…}` body, balancing braces and
    /// skipping over nested string literals.
    fn lex_interp_body(&mut self) -> Result<String, SandboxError> {
        let mut src = String::new();
        let mut depth = 1usize;
        loop {
            let c = self
                .bump()
                .ok_or_else(|| self.err("unterminated interpolation"))?;
            match c {
                '{' => {
                    depth += 1;
                    src.push(c);
                }
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(src);
                    }
                    src.push(c);
                }
                '"' => {
                    src.push(c);
                    loop {
                        let sc = self
                            .bump()
                            .ok_or_else(|| self.err("unterminated interpolation"))?;
                        src.push(sc);
                        match sc {
                            '\\' => {
                                let esc = self
                                    .bump()
                                    .ok_or_else(|| self.err("unterminated interpolation"))?;
                                src.push(esc);
                            }
                            '"' => break,
                            _ => {}
                        }
                    }
                }
                other => src.push(other),
            }
        }
    }

    fn lex_sigil(&mut self, letter: char) -> Result<Token, SandboxError> {
        let open = self
            .bump()
            .ok_or_else(|| self.err("unterminated sigil"))?;
        let close = match open {
            '(' => ')',
            '[' => ']',
            '{' => '}',
            '<' => '>',
            '"' | '/' | '|' => open,
            other => return Err(self.err(format!("invalid sigil delimiter '{other}'"))),
        };
        let mut body = String::new();
        let mut depth = 1usize;
        loop {
            let c = self.bump().ok_or_else(|| self.err("unterminated sigil"))?;
            if c == '\\' && self.peek() == Some(close) {
                body.push(close);
                self.bump();
                continue;
            }
            if open != close && c == open {
                depth += 1;
                body.push(c);
                continue;
            }
            if c == close {
                depth -= 1;
                if depth == 0 {
                    break;
                }
                body.push(c);
                continue;
            }
            body.push(c);
        }
        let mut modifiers = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() {
                modifiers.push(c);
                self.bump();
            } else {
                break;
            }
        }
        Ok(Token::Sigil {
            letter,
            body,
            modifiers,
        })
    }

    fn lex_operator(&mut self) -> Option<Token> {
        const THREE: [&str; 8] = ["===", "!==", "<<<", ">>>", "&&&", "|||", "^^^", "~~~"];
        const TWO: [&str; 16] = [
            "==", "!=", "<=", ">=", "&&", "||", "++", "--", "<>", "|>", "->", "<-", "=>", "::",
            "..", "=~",
        ];
        const ONE: [char; 12] = ['+', '-', '*', '/', '=', '<', '>', '!', '|', '&', '^', '.'];

        let take = |lexer: &mut Self, n: usize| {
            for _ in 0..n {
                lexer.bump();
            }
        };

        let mut text = String::new();
        for offset in 0..3 {
            match self.peek_at(offset) {
                Some(c) if c.is_ascii() => text.push(c),
                _ => break,
            }
        }

        if text.len() >= 3 && THREE.contains(&&text[..3]) {
            let op = text[..3].to_string();
            take(self, 3);
            return Some(Token::Op(op));
        }
        if text.len() >= 2 {
            let two = &text[..2];
            if two == "<<" {
                take(self, 2);
                return Some(Token::LtLt);
            }
            if two == ">>" {
                take(self, 2);
                return Some(Token::GtGt);
            }
            if TWO.contains(&two) {
                let token = match two {
                    "->" => Token::Arrow,
                    "<-" => Token::LeftArrow,
                    "=>" => Token::FatArrow,
                    "|>" => Token::PipeGt,
                    other => Token::Op(other.to_string()),
                };
                take(self, 2);
                return Some(token);
            }
        }
        let first = text.chars().next()?;
        if ONE.contains(&first) {
            take(self, 1);
            return Some(match first {
                '|' => Token::Pipe,
                '&' => Token::Capture,
                '.' => Token::Dot,
                other => Token::Op(other.to_string()),
            });
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        lex(source)
            .unwrap()
            .into_iter()
            .map(|t| t.token)
            .collect()
    }

    #[test]
    fn lexes_module_skeleton() {
        let tokens = kinds("defmodule Calculator do\nend");
        assert_eq!(
            tokens,
            vec![
                Token::Defmodule,
                Token::UpIdent("Calculator".into()),
                Token::Do,
                Token::Newline,
                Token::End,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn lexes_operators_max_munch() {
        let tokens = kinds("a === b |> c <> d");
        assert_eq!(
            tokens,
            vec![
                Token::Ident("a".into()),
                Token::Op("===".into()),
                Token::Ident("b".into()),
                Token::PipeGt,
                Token::Ident("c".into()),
                Token::Op("<>".into()),
                Token::Ident("d".into()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn keyword_key_beats_keyword() {
        let tokens = kinds("def add(a), do: a");
        assert!(tokens.contains(&Token::KwIdent("do".into())));
    }

    #[test]
    fn lexes_string_interpolation() {
        let tokens = kinds(r#""total: #{price * 2}""#);
        match &tokens[0] {
            Token::Str(pieces) => {
                assert_eq!(pieces[0], StrPiece::Text("total: ".into()));
                match &pieces[1] {
                    StrPiece::Interp { src, line, .. } => {
                        assert_eq!(src, "price * 2");
                        assert_eq!(*line, 1);
                    }
                    other => panic!("expected interpolation, got {other:?}"),
                }
            }
            other => panic!("expected string, got {other:?}"),
        }
    }

    #[test]
    fn lexes_sigils_with_modifiers() {
        let tokens = kinds(r#"~r/ab+c/i"#);
        assert_eq!(
            tokens[0],
            Token::Sigil {
                letter: 'r',
                body: "ab+c".into(),
                modifiers: "i".into()
            }
        );
        let tokens = kinds("~D[2024-01-31]");
        assert_eq!(
            tokens[0],
            Token::Sigil {
                letter: 'D',
                body: "2024-01-31".into(),
                modifiers: String::new()
            }
        );
    }

    #[test]
    fn lexes_atoms_and_numbers() {
        let tokens = kinds(":ok 1_000 2.5 1.0e3");
        assert_eq!(
            tokens,
            vec![
                Token::Atom("ok".into()),
                Token::Int(1000),
                Token::Float(2.5),
                Token::Float(1000.0),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn tracks_lines() {
        let tokens = lex("a\nb\n\nc").unwrap();
        let lines: Vec<(String, u32)> = tokens
            .iter()
            .filter_map(|t| match &t.token {
                Token::Ident(name) => Some((name.clone(), t.line)),
                _ => None,
            })
            .collect();
        assert_eq!(
            lines,
            vec![("a".into(), 1), ("b".into(), 2), ("c".into(), 4)]
        );
    }

    #[test]
    fn rejects_unterminated_string() {
        let err = lex("\"abc").unwrap_err();
        assert!(err.message.contains("unterminated string"));
    }
}
