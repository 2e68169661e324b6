//! Recursive-descent parser producing the tagged AST.
//!
//! Precedence climbing with one function per level. The grammar is wider
//! than the whitelist on purpose: directives and non-whitelisted operators
//! parse cleanly so the shape and whitelist validators can name them in
//! line-tagged errors.

use crate::ast::*;
use crate::error::{ErrorKind, SandboxError};
use crate::lexer::{self, SpannedToken, StrPiece, Token};

/// Parse a full source text. Returns a single node; multiple top-level
/// statements collapse into a `Block`.
pub fn parse(source: &str) -> Result<Node, SandboxError> {
    let tokens = lexer::lex(source)?;
    let mut parser = Parser::new(tokens);
    parser.parse_program()
}

struct Parser {
    tokens: Vec<SpannedToken>,
    pos: usize,
    /// Set while parsing a header expression (`case` subject, `with`
    /// entries, no-paren call args) so a trailing `do` belongs to the
    /// enclosing construct, not to a nested no-paren call.
    no_do: bool,
}

impl Parser {
    fn new(tokens: Vec<SpannedToken>) -> Self {
        Self {
            tokens,
            pos: 0,
            no_do: false,
        }
    }

    fn with_no_do<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, SandboxError>,
    ) -> Result<T, SandboxError> {
        let saved = self.no_do;
        self.no_do = true;
        let result = f(self);
        self.no_do = saved;
        result
    }

    // ── Cursor helpers ─────────────────────────────────────────────

    fn peek(&self) -> &Token {
        self.tokens.get(self.pos).map_or(&Token::Eof, |t| &t.token)
    }

    fn peek_at(&self, offset: usize) -> &Token {
        self.tokens
            .get(self.pos + offset)
            .map_or(&Token::Eof, |t| &t.token)
    }

    fn meta(&self) -> Meta {
        self.tokens
            .get(self.pos)
            .map_or(Meta::default(), |t| Meta::new(t.line, t.column))
    }

    fn line(&self) -> u32 {
        self.meta().line
    }

    fn advance(&mut self) -> SpannedToken {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .unwrap_or(SpannedToken {
                token: Token::Eof,
                line: 0,
                column: 0,
            });
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn check(&self, token: &Token) -> bool {
        self.peek() == token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.check(token) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token, what: &str) -> Result<(), SandboxError> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.unexpected(what))
        }
    }

    fn unexpected(&self, what: &str) -> SandboxError {
        SandboxError::at_line(
            ErrorKind::Parse,
            format!("expected {what}, got '{}'", token_name(self.peek())),
            self.line(),
        )
    }

    fn err_here(&self, message: impl Into<String>) -> SandboxError {
        SandboxError::at_line(ErrorKind::Parse, message, self.line())
    }

    fn skip_newlines(&mut self) {
        while matches!(self.peek(), Token::Newline) {
            self.advance();
        }
    }

    fn skip_terminators(&mut self) {
        while matches!(self.peek(), Token::Newline | Token::Semicolon) {
            self.advance();
        }
    }

    // ── Program / statements ───────────────────────────────────────

    fn parse_program(&mut self) -> Result<Node, SandboxError> {
        self.skip_terminators();
        let mut stmts = Vec::new();
        while !self.check(&Token::Eof) {
            stmts.push(self.parse_stmt(true)?);
            self.skip_terminators();
        }
        match stmts.len() {
            0 => Err(SandboxError::new(ErrorKind::Parse, "empty source")),
            1 => Ok(stmts.into_iter().next().unwrap_or_else(|| {
                Node::new(Form::Block(Vec::new()), Meta::default())
            })),
            _ => {
                let meta = stmts[0].meta;
                Ok(Node::new(Form::Block(stmts), meta))
            }
        }
    }

    /// One statement of a module body or `do … end` body. `in_module`
    /// switches `@name expr` between declaration and attribute read.
    fn parse_stmt(&mut self, in_module: bool) -> Result<Node, SandboxError> {
        let meta = self.meta();
        match self.peek() {
            Token::Defmodule => self.parse_defmodule(),
            Token::Def | Token::Defp => self.parse_def(),
            Token::Alias => self.parse_directive(DirectiveKind::Alias),
            Token::Import => self.parse_directive(DirectiveKind::Import),
            Token::Require => self.parse_directive(DirectiveKind::Require),
            Token::Use => self.parse_directive(DirectiveKind::Use),
            Token::AttrName(name) if in_module => {
                let name = name.clone();
                let decl_line = self.line();
                self.advance();
                if starts_expr(self.peek()) && self.line() == decl_line {
                    let value = self.parse_expr()?;
                    Ok(Node::new(
                        Form::Attribute {
                            name,
                            value: Box::new(value),
                        },
                        meta,
                    ))
                } else {
                    Ok(Node::new(Form::AttrRef(name), meta))
                }
            }
            _ => self.parse_expr(),
        }
    }

    fn parse_defmodule(&mut self) -> Result<Node, SandboxError> {
        let meta = self.meta();
        self.advance();
        let name = self.parse_module_path()?;
        let body = self.parse_do_body(true)?;
        Ok(Node::new(Form::Defmodule { name, body }, meta))
    }

    fn parse_module_path(&mut self) -> Result<Vec<String>, SandboxError> {
        let mut parts = Vec::new();
        match self.peek() {
            Token::UpIdent(first) => {
                parts.push(first.clone());
                self.advance();
            }
            _ => return Err(self.unexpected("a module name")),
        }
        while self.check(&Token::Dot) {
            if let Token::UpIdent(next) = self.peek_at(1) {
                let next = next.clone();
                self.advance();
                self.advance();
                parts.push(next);
            } else {
                break;
            }
        }
        Ok(parts)
    }

    fn parse_def(&mut self) -> Result<Node, SandboxError> {
        let meta = self.meta();
        let kind = if matches!(self.peek(), Token::Defp) {
            DefKind::Defp
        } else {
            DefKind::Def
        };
        self.advance();
        let name = match self.peek() {
            Token::Ident(name) => {
                let name = name.clone();
                self.advance();
                name
            }
            _ => return Err(self.unexpected("a function name")),
        };
        let mut params = Vec::new();
        if self.eat(&Token::LParen) {
            self.skip_newlines();
            if !self.check(&Token::RParen) {
                loop {
                    params.push(self.parse_head_expr()?);
                    self.skip_newlines();
                    if !self.eat(&Token::Comma) {
                        break;
                    }
                    self.skip_newlines();
                }
            }
            self.expect(&Token::RParen, "')'")?;
        }
        let guard = if self.eat(&Token::When) {
            self.skip_newlines();
            Some(self.parse_head_expr()?)
        } else {
            None
        };
        let body = if self.eat(&Token::Comma) {
            self.skip_newlines();
            match self.peek() {
                Token::KwIdent(kw) if kw == "do" => {
                    self.advance();
                    self.skip_newlines();
                    vec![self.parse_expr()?]
                }
                _ => return Err(self.unexpected("'do:'")),
            }
        } else {
            self.parse_do_body(false)?
        };
        Ok(Node::new(
            Form::Def(Box::new(FunDef {
                kind,
                name,
                params,
                guard,
                body,
                meta,
            })),
            meta,
        ))
    }

    /// Consume a directive and skim its arguments to end of line. The
    /// content is irrelevant: the shape validator rejects the form itself.
    fn parse_directive(&mut self, kind: DirectiveKind) -> Result<Node, SandboxError> {
        let meta = self.meta();
        self.advance();
        let mut depth = 0usize;
        loop {
            match self.peek() {
                Token::Eof => break,
                Token::Newline | Token::Semicolon if depth == 0 => break,
                Token::LParen | Token::LBracket | Token::LBrace | Token::PercentBrace
                | Token::LtLt => {
                    depth += 1;
                    self.advance();
                }
                Token::RParen | Token::RBracket | Token::RBrace | Token::GtGt => {
                    depth = depth.saturating_sub(1);
                    self.advance();
                }
                _ => {
                    self.advance();
                }
            }
        }
        Ok(Node::new(Form::Directive { kind }, meta))
    }

    /// `do … end` body. `in_module` propagates the statement context.
    /// Stray `else` sections (from non-whitelisted macros like `if`) are
    /// folded into the same statement list; the validator rejects the call.
    fn parse_do_body(&mut self, in_module: bool) -> Result<Vec<Node>, SandboxError> {
        self.expect(&Token::Do, "'do'")?;
        let mut stmts = Vec::new();
        loop {
            self.skip_terminators();
            match self.peek() {
                Token::End => {
                    self.advance();
                    break;
                }
                Token::Else => {
                    self.advance();
                }
                Token::Eof => return Err(self.err_here("missing 'end'")),
                _ => stmts.push(self.parse_stmt(in_module)?),
            }
        }
        Ok(stmts)
    }

    // ── Expressions: precedence climbing ───────────────────────────

    fn parse_expr(&mut self) -> Result<Node, SandboxError> {
        self.parse_match()
    }

    /// Clause-head expression: everything below `=` so that match and
    /// arrow tokens stay with the clause machinery.
    fn parse_head_expr(&mut self) -> Result<Node, SandboxError> {
        self.parse_or()
    }

    fn parse_match(&mut self) -> Result<Node, SandboxError> {
        let left = self.parse_or()?;
        if matches!(self.peek(), Token::Op(op) if op == "=") {
            let meta = left.meta;
            self.advance();
            self.skip_newlines();
            let right = self.parse_match()?;
            return Ok(Node::new(
                Form::Match {
                    pattern: Box::new(left),
                    value: Box::new(right),
                },
                meta,
            ));
        }
        Ok(left)
    }

    fn binary_level(
        &mut self,
        ops: &[&str],
        next: fn(&mut Self) -> Result<Node, SandboxError>,
    ) -> Result<Node, SandboxError> {
        let mut left = next(self)?;
        loop {
            let op = match self.peek() {
                Token::Op(op) if ops.contains(&op.as_str()) => op.clone(),
                _ => break,
            };
            let meta = self.meta();
            self.advance();
            self.skip_newlines();
            let right = next(self)?;
            left = Node::new(
                Form::BinaryOp {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                meta,
            );
        }
        Ok(left)
    }

    fn parse_or(&mut self) -> Result<Node, SandboxError> {
        self.binary_level(&["or", "||"], Self::parse_and)
    }

    fn parse_and(&mut self) -> Result<Node, SandboxError> {
        self.binary_level(&["and", "&&"], Self::parse_compare)
    }

    fn parse_compare(&mut self) -> Result<Node, SandboxError> {
        self.binary_level(&["==", "!=", "===", "!==", "=~"], Self::parse_relational)
    }

    fn parse_relational(&mut self) -> Result<Node, SandboxError> {
        self.binary_level(&["<", ">", "<=", ">="], Self::parse_pipe)
    }

    fn parse_pipe(&mut self) -> Result<Node, SandboxError> {
        let mut left = self.parse_in()?;
        loop {
            match self.peek() {
                Token::PipeGt => {
                    let meta = self.meta();
                    self.advance();
                    self.skip_newlines();
                    let right = self.parse_in()?;
                    left = Node::new(
                        Form::Pipe {
                            left: Box::new(left),
                            right: Box::new(right),
                        },
                        meta,
                    );
                }
                Token::Op(op) if op == "<<<" || op == ">>>" => {
                    let op = op.clone();
                    let meta = self.meta();
                    self.advance();
                    self.skip_newlines();
                    let right = self.parse_in()?;
                    left = Node::new(
                        Form::BinaryOp {
                            op,
                            left: Box::new(left),
                            right: Box::new(right),
                        },
                        meta,
                    );
                }
                _ => break,
            }
        }
        Ok(left)
    }

    fn parse_in(&mut self) -> Result<Node, SandboxError> {
        self.binary_level(&["in"], Self::parse_concat)
    }

    fn parse_concat(&mut self) -> Result<Node, SandboxError> {
        // Right-associative family.
        let left = self.parse_additive()?;
        if let Token::Op(op) = self.peek() {
            if matches!(op.as_str(), "++" | "--" | "<>" | "..") {
                let op = op.clone();
                let meta = self.meta();
                self.advance();
                self.skip_newlines();
                let right = self.parse_concat()?;
                return Ok(Node::new(
                    Form::BinaryOp {
                        op,
                        left: Box::new(left),
                        right: Box::new(right),
                    },
                    meta,
                ));
            }
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Node, SandboxError> {
        self.binary_level(&["+", "-"], Self::parse_multiplicative)
    }

    fn parse_multiplicative(&mut self) -> Result<Node, SandboxError> {
        self.binary_level(&["*", "/", "&&&", "|||", "^^^"], Self::parse_unary)
    }

    fn parse_unary(&mut self) -> Result<Node, SandboxError> {
        match self.peek() {
            Token::Op(op) if matches!(op.as_str(), "-" | "+" | "!" | "not" | "^" | "~~~") => {
                let op = op.clone();
                let meta = self.meta();
                self.advance();
                let operand = self.parse_unary()?;
                // Constant-fold negative literals so patterns stay simple.
                if op == "-" {
                    match &operand.form {
                        Form::Int(n) => return Ok(Node::new(Form::Int(-n), meta)),
                        Form::Float(f) => return Ok(Node::new(Form::Float(-f), meta)),
                        _ => {}
                    }
                }
                Ok(Node::new(
                    Form::UnaryOp {
                        op,
                        operand: Box::new(operand),
                    },
                    meta,
                ))
            }
            Token::Capture => self.parse_capture(),
            _ => self.parse_postfix(),
        }
    }

    fn parse_capture(&mut self) -> Result<Node, SandboxError> {
        let meta = self.meta();
        self.advance();
        match self.peek() {
            Token::Ident(name) => {
                let name = name.clone();
                self.advance();
                self.expect_slash()?;
                let arity = self.expect_arity()?;
                Ok(Node::new(Form::CaptureLocal { name, arity }, meta))
            }
            Token::UpIdent(_) => {
                let module = self.parse_module_path()?;
                self.expect(&Token::Dot, "'.'")?;
                let name = match self.peek() {
                    Token::Ident(name) => {
                        let name = name.clone();
                        self.advance();
                        name
                    }
                    _ => return Err(self.unexpected("a function name")),
                };
                self.expect_slash()?;
                let arity = self.expect_arity()?;
                Ok(Node::new(
                    Form::CaptureRemote {
                        module,
                        name,
                        arity,
                    },
                    meta,
                ))
            }
            _ => Err(self.err_here("unsupported capture syntax")),
        }
    }

    fn expect_slash(&mut self) -> Result<(), SandboxError> {
        match self.peek() {
            Token::Op(op) if op == "/" => {
                self.advance();
                Ok(())
            }
            _ => Err(self.unexpected("'/'")),
        }
    }

    fn expect_arity(&mut self) -> Result<usize, SandboxError> {
        match self.peek() {
            Token::Int(n) if *n >= 0 => {
                let arity = *n as usize;
                self.advance();
                Ok(arity)
            }
            _ => Err(self.unexpected("an arity")),
        }
    }

    fn parse_postfix(&mut self) -> Result<Node, SandboxError> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek() {
                Token::Dot => {
                    let meta = self.meta();
                    match self.peek_at(1) {
                        Token::LParen => {
                            self.advance();
                            let args = self.parse_paren_args()?;
                            expr = Node::new(
                                Form::AnonCall {
                                    target: Box::new(expr),
                                    args,
                                },
                                meta,
                            );
                        }
                        Token::Ident(name) => {
                            let name = name.clone();
                            self.advance();
                            self.advance();
                            if let Form::ModuleRef(module) = expr.form {
                                let args = if self.check(&Token::LParen) {
                                    self.parse_paren_args()?
                                } else {
                                    Vec::new()
                                };
                                expr = Node::new(Form::RemoteCall { module, name, args }, meta);
                            } else {
                                if self.check(&Token::LParen) {
                                    return Err(self.err_here(
                                        "anonymous calls use the f.(args) syntax",
                                    ));
                                }
                                expr = Node::new(
                                    Form::FieldAccess {
                                        target: Box::new(expr),
                                        field: name,
                                    },
                                    meta,
                                );
                            }
                        }
                        _ => return Err(self.unexpected("a function or field name")),
                    }
                }
                Token::LBracket => {
                    let meta = self.meta();
                    self.advance();
                    self.skip_newlines();
                    let index = self.parse_expr()?;
                    self.skip_newlines();
                    self.expect(&Token::RBracket, "']'")?;
                    expr = Node::new(
                        Form::IndexAccess {
                            target: Box::new(expr),
                            index: Box::new(index),
                        },
                        meta,
                    );
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Node, SandboxError> {
        let meta = self.meta();
        match self.peek().clone() {
            Token::Int(n) => {
                self.advance();
                Ok(Node::new(Form::Int(n), meta))
            }
            Token::Float(f) => {
                self.advance();
                Ok(Node::new(Form::Float(f), meta))
            }
            Token::True => {
                self.advance();
                Ok(Node::new(Form::Bool(true), meta))
            }
            Token::False => {
                self.advance();
                Ok(Node::new(Form::Bool(false), meta))
            }
            Token::NilKw => {
                self.advance();
                Ok(Node::new(Form::Nil, meta))
            }
            Token::Atom(name) => {
                self.advance();
                Ok(Node::new(Form::Atom(name), meta))
            }
            Token::Str(pieces) => {
                self.advance();
                let parts = self.convert_string(pieces)?;
                Ok(Node::new(Form::Str(parts), meta))
            }
            Token::Sigil {
                letter,
                body,
                modifiers,
            } => {
                self.advance();
                Ok(Node::new(
                    Form::Sigil {
                        letter,
                        body,
                        modifiers,
                    },
                    meta,
                ))
            }
            Token::AttrName(name) => {
                self.advance();
                Ok(Node::new(Form::AttrRef(name), meta))
            }
            Token::Ident(name) => {
                self.advance();
                if self.check(&Token::LParen) {
                    let args = self.parse_paren_args()?;
                    return Ok(Node::new(Form::LocalCall { name, args }, meta));
                }
                let same_line = self.line() == meta.line;
                // `a[...]` with no space is bracket access, handled by the
                // postfix loop; with a space it is a no-paren list argument.
                let adjacent_bracket = self.check(&Token::LBracket)
                    && same_line
                    && self.meta().column == meta.column + name.len() as u32;
                let takes_do = self.check(&Token::Do) && !self.no_do;
                if same_line
                    && !adjacent_bracket
                    && (starts_expr(self.peek()) || takes_do)
                {
                    return self.parse_noparen_call(name, meta);
                }
                Ok(Node::new(Form::Var(name), meta))
            }
            Token::UpIdent(_) => {
                let parts = self.parse_module_path()?;
                Ok(Node::new(Form::ModuleRef(parts), meta))
            }
            Token::LParen => {
                self.advance();
                self.skip_terminators();
                let inner = self.parse_expr()?;
                self.skip_terminators();
                self.expect(&Token::RParen, "')'")?;
                Ok(inner)
            }
            Token::LBracket => self.parse_list(meta),
            Token::LBrace => self.parse_tuple(meta),
            Token::PercentBrace => self.parse_map(meta),
            Token::LtLt => self.parse_bitstring(meta),
            Token::Case => self.parse_case(meta),
            Token::Cond => self.parse_cond(meta),
            Token::Fn => self.parse_fn(meta),
            Token::With => self.parse_with(meta),
            other => Err(SandboxError::at_line(
                ErrorKind::Parse,
                format!("unexpected token '{}'", token_name(&other)),
                meta.line,
            )),
        }
    }

    fn convert_string(&mut self, pieces: Vec<StrPiece>) -> Result<Vec<StrPart>, SandboxError> {
        let mut parts = Vec::new();
        for piece in pieces {
            match piece {
                StrPiece::Text(text) => parts.push(StrPart::Lit(text)),
                StrPiece::Interp { src, line, column } => {
                    let node = parse_snippet(&src, line, column)?;
                    parts.push(StrPart::Interp(Box::new(node)));
                }
            }
        }
        Ok(parts)
    }

    fn parse_noparen_call(&mut self, name: String, meta: Meta) -> Result<Node, SandboxError> {
        let outer_no_do = self.no_do;
        let mut args = Vec::new();
        if !self.check(&Token::Do) {
            self.with_no_do(|p| {
                args.push(p.parse_expr()?);
                while p.eat(&Token::Comma) {
                    p.skip_newlines();
                    if p.check(&Token::Do) {
                        break;
                    }
                    args.push(p.parse_expr()?);
                }
                Ok(())
            })?;
        }
        if !outer_no_do && self.check(&Token::Do) {
            let body_meta = self.meta();
            let body = self.parse_do_body(false)?;
            args.push(Node::new(Form::Block(body), body_meta));
        }
        Ok(Node::new(Form::LocalCall { name, args }, meta))
    }

    fn parse_paren_args(&mut self) -> Result<Vec<Node>, SandboxError> {
        self.expect(&Token::LParen, "'('")?;
        self.skip_newlines();
        let mut args = Vec::new();
        if self.eat(&Token::RParen) {
            return Ok(args);
        }
        loop {
            if matches!(self.peek(), Token::KwIdent(_)) {
                args.push(self.parse_keyword_list()?);
                self.skip_newlines();
                break;
            }
            args.push(self.parse_expr()?);
            self.skip_newlines();
            if !self.eat(&Token::Comma) {
                break;
            }
            self.skip_newlines();
        }
        self.expect(&Token::RParen, "')'")?;
        Ok(args)
    }

    /// Trailing keyword arguments desugar to a list of `{atom, value}`.
    fn parse_keyword_list(&mut self) -> Result<Node, SandboxError> {
        let meta = self.meta();
        let mut pairs = Vec::new();
        loop {
            let key = match self.peek() {
                Token::KwIdent(name) => {
                    let name = name.clone();
                    let key_meta = self.meta();
                    self.advance();
                    Node::new(Form::Atom(name), key_meta)
                }
                _ => return Err(self.unexpected("a keyword key")),
            };
            self.skip_newlines();
            let value = self.parse_expr()?;
            let pair_meta = key.meta;
            pairs.push(Node::new(Form::Tuple(vec![key, value]), pair_meta));
            self.skip_newlines();
            if !self.eat(&Token::Comma) {
                break;
            }
            self.skip_newlines();
        }
        Ok(Node::new(Form::List(pairs), meta))
    }

    fn parse_list(&mut self, meta: Meta) -> Result<Node, SandboxError> {
        self.advance();
        self.skip_newlines();
        if self.eat(&Token::RBracket) {
            return Ok(Node::new(Form::List(Vec::new()), meta));
        }
        if matches!(self.peek(), Token::KwIdent(_)) {
            let kw = self.parse_keyword_pairs_inner()?;
            self.skip_newlines();
            self.expect(&Token::RBracket, "']'")?;
            return Ok(Node::new(Form::List(kw), meta));
        }
        let mut items = Vec::new();
        loop {
            items.push(self.parse_expr()?);
            self.skip_newlines();
            if self.eat(&Token::Comma) {
                self.skip_newlines();
                continue;
            }
            break;
        }
        if self.eat(&Token::Pipe) {
            self.skip_newlines();
            let tail = self.parse_expr()?;
            self.skip_newlines();
            self.expect(&Token::RBracket, "']'")?;
            return Ok(Node::new(
                Form::Cons {
                    head: items,
                    tail: Box::new(tail),
                },
                meta,
            ));
        }
        self.expect(&Token::RBracket, "']'")?;
        Ok(Node::new(Form::List(items), meta))
    }

    fn parse_keyword_pairs_inner(&mut self) -> Result<Vec<Node>, SandboxError> {
        let mut pairs = Vec::new();
        loop {
            let key = match self.peek() {
                Token::KwIdent(name) => {
                    let name = name.clone();
                    let key_meta = self.meta();
                    self.advance();
                    Node::new(Form::Atom(name), key_meta)
                }
                _ => return Err(self.unexpected("a keyword key")),
            };
            self.skip_newlines();
            let value = self.parse_expr()?;
            let pair_meta = key.meta;
            pairs.push(Node::new(Form::Tuple(vec![key, value]), pair_meta));
            self.skip_newlines();
            if !self.eat(&Token::Comma) {
                break;
            }
            self.skip_newlines();
        }
        Ok(pairs)
    }

    fn parse_tuple(&mut self, meta: Meta) -> Result<Node, SandboxError> {
        self.advance();
        self.skip_newlines();
        let mut items = Vec::new();
        if !self.check(&Token::RBrace) {
            loop {
                items.push(self.parse_expr()?);
                self.skip_newlines();
                if !self.eat(&Token::Comma) {
                    break;
                }
                self.skip_newlines();
            }
        }
        self.expect(&Token::RBrace, "'}'")?;
        Ok(Node::new(Form::Tuple(items), meta))
    }

    fn parse_map(&mut self, meta: Meta) -> Result<Node, SandboxError> {
        self.advance();
        self.skip_newlines();
        if self.eat(&Token::RBrace) {
            return Ok(Node::new(Form::MapLit(Vec::new()), meta));
        }
        // `%{base | k: v}` update form.
        if !matches!(self.peek(), Token::KwIdent(_)) {
            let first = self.parse_expr()?;
            self.skip_newlines();
            if self.eat(&Token::Pipe) {
                self.skip_newlines();
                let entries = self.parse_map_entries()?;
                self.expect(&Token::RBrace, "'}'")?;
                return Ok(Node::new(
                    Form::MapUpdate {
                        base: Box::new(first),
                        entries,
                    },
                    meta,
                ));
            }
            self.expect(&Token::FatArrow, "'=>'")?;
            self.skip_newlines();
            let value = self.parse_expr()?;
            let mut entries = vec![(first, value)];
            self.skip_newlines();
            if self.eat(&Token::Comma) {
                self.skip_newlines();
                entries.extend(self.parse_map_entries()?);
            }
            self.expect(&Token::RBrace, "'}'")?;
            return Ok(Node::new(Form::MapLit(entries), meta));
        }
        let entries = self.parse_map_entries()?;
        self.expect(&Token::RBrace, "'}'")?;
        Ok(Node::new(Form::MapLit(entries), meta))
    }

    fn parse_map_entries(&mut self) -> Result<Vec<(Node, Node)>, SandboxError> {
        let mut entries = Vec::new();
        loop {
            self.skip_newlines();
            if self.check(&Token::RBrace) {
                break;
            }
            match self.peek() {
                Token::KwIdent(name) => {
                    let key = Node::new(Form::Atom(name.clone()), self.meta());
                    self.advance();
                    self.skip_newlines();
                    let value = self.parse_expr()?;
                    entries.push((key, value));
                }
                _ => {
                    let key = self.parse_expr()?;
                    self.skip_newlines();
                    self.expect(&Token::FatArrow, "'=>'")?;
                    self.skip_newlines();
                    let value = self.parse_expr()?;
                    entries.push((key, value));
                }
            }
            self.skip_newlines();
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        Ok(entries)
    }

    fn parse_bitstring(&mut self, meta: Meta) -> Result<Node, SandboxError> {
        self.advance();
        self.skip_newlines();
        let mut segments = Vec::new();
        if !self.check(&Token::GtGt) {
            loop {
                let value = self.parse_head_expr()?;
                let spec = if matches!(self.peek(), Token::Op(op) if op == "::") {
                    self.advance();
                    Some(self.parse_bit_spec()?)
                } else {
                    None
                };
                segments.push(BitSegment { value, spec });
                self.skip_newlines();
                if !self.eat(&Token::Comma) {
                    break;
                }
                self.skip_newlines();
            }
        }
        self.expect(&Token::GtGt, "'>>'")?;
        Ok(Node::new(Form::Bitstring(segments), meta))
    }

    /// Collect a `::` segment spec as raw text (`integer-size(8)`).
    fn parse_bit_spec(&mut self) -> Result<String, SandboxError> {
        let mut spec = String::new();
        loop {
            match self.peek() {
                Token::Ident(name) => {
                    spec.push_str(name);
                    self.advance();
                }
                Token::Int(n) => {
                    spec.push_str(&n.to_string());
                    self.advance();
                }
                Token::Op(op) if op == "-" || op == "*" => {
                    spec.push_str(op);
                    self.advance();
                }
                Token::LParen => {
                    spec.push('(');
                    self.advance();
                }
                Token::RParen => {
                    spec.push(')');
                    self.advance();
                }
                _ => break,
            }
        }
        if spec.is_empty() {
            return Err(self.unexpected("a bitstring type spec"));
        }
        Ok(spec)
    }

    fn parse_case(&mut self, meta: Meta) -> Result<Node, SandboxError> {
        self.advance();
        let subject = self.with_no_do(Self::parse_expr)?;
        self.expect(&Token::Do, "'do'")?;
        let clauses = self.parse_clause_section(false)?;
        self.expect(&Token::End, "'end'")?;
        Ok(Node::new(
            Form::Case {
                subject: Box::new(subject),
                clauses,
            },
            meta,
        ))
    }

    fn parse_cond(&mut self, meta: Meta) -> Result<Node, SandboxError> {
        self.advance();
        self.expect(&Token::Do, "'do'")?;
        let clauses = self.parse_clause_section(true)?;
        self.expect(&Token::End, "'end'")?;
        Ok(Node::new(Form::Cond { clauses }, meta))
    }

    fn parse_fn(&mut self, meta: Meta) -> Result<Node, SandboxError> {
        self.advance();
        let clauses = self.parse_clause_section(false)?;
        self.expect(&Token::End, "'end'")?;
        Ok(Node::new(Form::Fn { clauses }, meta))
    }

    fn parse_with(&mut self, meta: Meta) -> Result<Node, SandboxError> {
        self.advance();
        self.skip_newlines();
        let mut entries = Vec::new();
        self.with_no_do(|p| {
            loop {
                let entry_meta = p.meta();
                let first = p.parse_head_expr()?;
                if p.eat(&Token::LeftArrow) {
                    p.skip_newlines();
                    let value = p.parse_expr()?;
                    entries.push(Node::new(
                        Form::WithBind {
                            pattern: Box::new(first),
                            value: Box::new(value),
                        },
                        entry_meta,
                    ));
                } else {
                    entries.push(first);
                }
                p.skip_newlines();
                if !p.eat(&Token::Comma) {
                    break;
                }
                p.skip_newlines();
            }
            Ok(())
        })?;
        self.expect(&Token::Do, "'do'")?;
        let mut body = Vec::new();
        let mut else_clauses = Vec::new();
        loop {
            self.skip_terminators();
            match self.peek() {
                Token::End => {
                    self.advance();
                    break;
                }
                Token::Else => {
                    self.advance();
                    else_clauses = self.parse_clause_section(false)?;
                    self.expect(&Token::End, "'end'")?;
                    break;
                }
                Token::Eof => return Err(self.err_here("missing 'end'")),
                _ => body.push(self.parse_stmt(false)?),
            }
        }
        Ok(Node::new(
            Form::With {
                entries,
                body,
                else_clauses,
            },
            meta,
        ))
    }

    /// Parse `pattern [when guard] -> body` clauses until `end`/`else`.
    /// Body statements run until the token stream looks like the next
    /// clause head (speculative parse, position restored).
    fn parse_clause_section(&mut self, cond_style: bool) -> Result<Vec<Clause>, SandboxError> {
        let mut clauses = Vec::new();
        loop {
            self.skip_terminators();
            if matches!(self.peek(), Token::End | Token::Else | Token::Eof) {
                break;
            }
            let meta = self.meta();
            let mut patterns = vec![self.parse_head_expr()?];
            if !cond_style {
                while self.eat(&Token::Comma) {
                    self.skip_newlines();
                    patterns.push(self.parse_head_expr()?);
                }
            }
            let guard = if !cond_style && self.eat(&Token::When) {
                self.skip_newlines();
                Some(self.parse_head_expr()?)
            } else {
                None
            };
            self.expect(&Token::Arrow, "'->'")?;
            self.skip_newlines();
            let mut body = Vec::new();
            loop {
                self.skip_terminators();
                if matches!(self.peek(), Token::End | Token::Else | Token::Eof) {
                    break;
                }
                if !body.is_empty() && self.looks_like_clause_head(cond_style) {
                    break;
                }
                body.push(self.parse_stmt(false)?);
            }
            if body.is_empty() {
                return Err(self.err_here("empty clause body"));
            }
            clauses.push(Clause {
                patterns,
                guard,
                body,
                meta,
            });
        }
        if clauses.is_empty() {
            return Err(self.err_here("expected at least one clause"));
        }
        Ok(clauses)
    }

    fn looks_like_clause_head(&mut self, cond_style: bool) -> bool {
        let saved = self.pos;
        let ok = self.try_clause_head(cond_style).is_ok();
        self.pos = saved;
        ok
    }

    fn try_clause_head(&mut self, cond_style: bool) -> Result<(), SandboxError> {
        let _ = self.parse_head_expr()?;
        if !cond_style {
            while self.eat(&Token::Comma) {
                self.skip_newlines();
                let _ = self.parse_head_expr()?;
            }
            if self.eat(&Token::When) {
                self.skip_newlines();
                let _ = self.parse_head_expr()?;
            }
        }
        if self.check(&Token::Arrow) {
            Ok(())
        } else {
            Err(self.unexpected("'->'"))
        }
    }
}

/// Parse an interpolation snippet at its original source position.
fn parse_snippet(src: &str, line: u32, column: u32) -> Result<Node, SandboxError> {
    let tokens = lexer::lex_from(src, line, column)?;
    let mut parser = Parser::new(tokens);
    parser.skip_terminators();
    let node = parser.parse_expr()?;
    parser.skip_terminators();
    if !parser.check(&Token::Eof) {
        return Err(parser.err_here("unexpected token in interpolation"));
    }
    Ok(node)
}

fn starts_expr(token: &Token) -> bool {
    matches!(
        token,
        Token::Int(_)
            | Token::Float(_)
            | Token::Str(_)
            | Token::Atom(_)
            | Token::Ident(_)
            | Token::UpIdent(_)
            | Token::AttrName(_)
            | Token::Sigil { .. }
            | Token::True
            | Token::False
            | Token::NilKw
            | Token::LParen
            | Token::LBracket
            | Token::LBrace
            | Token::PercentBrace
            | Token::LtLt
            | Token::Fn
            | Token::Case
            | Token::Cond
            | Token::With
            | Token::Capture
    )
}

fn token_name(token: &Token) -> String {
    match token {
        Token::Int(n) => n.to_string(),
        Token::Float(f) => f.to_string(),
        Token::Str(_) => "string".into(),
        Token::Atom(a) => format!(":{a}"),
        Token::Ident(name) | Token::UpIdent(name) => name.clone(),
        Token::KwIdent(name) => format!("{name}:"),
        Token::AttrName(name) => format!("@{name}"),
        Token::Sigil { letter, .. } => format!("~{letter}"),
        Token::Defmodule => "defmodule".into(),
        Token::Def => "def".into(),
        Token::Defp => "defp".into(),
        Token::Do => "do".into(),
        Token::End => "end".into(),
        Token::Case => "case".into(),
        Token::Cond => "cond".into(),
        Token::Fn => "fn".into(),
        Token::When => "when".into(),
        Token::With => "with".into(),
        Token::Else => "else".into(),
        Token::True => "true".into(),
        Token::False => "false".into(),
        Token::NilKw => "nil".into(),
        Token::Alias => "alias".into(),
        Token::Import => "import".into(),
        Token::Require => "require".into(),
        Token::Use => "use".into(),
        Token::LParen => "(".into(),
        Token::RParen => ")".into(),
        Token::LBracket => "[".into(),
        Token::RBracket => "]".into(),
        Token::LBrace => "{".into(),
        Token::RBrace => "}".into(),
        Token::PercentBrace => "%{".into(),
        Token::LtLt => "<<".into(),
        Token::GtGt => ">>".into(),
        Token::Comma => ",".into(),
        Token::Semicolon => ";".into(),
        Token::Newline => "newline".into(),
        Token::Arrow => "->".into(),
        Token::LeftArrow => "<-".into(),
        Token::FatArrow => "=>".into(),
        Token::Pipe => "|".into(),
        Token::PipeGt => "|>".into(),
        Token::Capture => "&".into(),
        Token::Dot => ".".into(),
        Token::Op(op) => op.clone(),
        Token::Eof => "end of input".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_module(source: &str) -> Node {
        parse(source).expect("parse")
    }

    fn module_body(node: &Node) -> &[Node] {
        match &node.form {
            Form::Defmodule { body, .. } => body,
            other => panic!("expected defmodule, got {other:?}"),
        }
    }

    #[test]
    fn parses_module_with_def() {
        let node = parse_module("defmodule Calculator do\n  def add(a, b) do\n    a + b\n  end\nend");
        let body = module_body(&node);
        assert_eq!(body.len(), 1);
        match &body[0].form {
            Form::Def(fun) => {
                assert_eq!(fun.name, "add");
                assert_eq!(fun.arity(), 2);
                assert_eq!(fun.body.len(), 1);
            }
            other => panic!("expected def, got {other:?}"),
        }
    }

    #[test]
    fn parses_do_shorthand() {
        let node = parse_module("defmodule M do\n  def double(x), do: x * 2\nend");
        match &module_body(&node)[0].form {
            Form::Def(fun) => assert_eq!(fun.body.len(), 1),
            other => panic!("expected def, got {other:?}"),
        }
    }

    #[test]
    fn precedence_mul_over_add() {
        let node = parse_module("defmodule M do\n  def f(a, b, c), do: a + b * c\nend");
        match &module_body(&node)[0].form {
            Form::Def(fun) => match &fun.body[0].form {
                Form::BinaryOp { op, right, .. } => {
                    assert_eq!(op, "+");
                    assert!(matches!(&right.form, Form::BinaryOp { op, .. } if op == "*"));
                }
                other => panic!("expected binary op, got {other:?}"),
            },
            other => panic!("expected def, got {other:?}"),
        }
    }

    #[test]
    fn parses_case_with_clauses() {
        let source = "defmodule M do
  def f(n) do
    case n do
      0 -> 0
      1 -> 1
      _ -> f(n - 1) + f(n - 2)
    end
  end
end";
        let node = parse_module(source);
        match &module_body(&node)[0].form {
            Form::Def(fun) => match &fun.body[0].form {
                Form::Case { clauses, .. } => assert_eq!(clauses.len(), 3),
                other => panic!("expected case, got {other:?}"),
            },
            other => panic!("expected def, got {other:?}"),
        }
    }

    #[test]
    fn parses_multi_statement_clause_bodies() {
        let source = "defmodule M do
  def f(n) do
    case n do
      0 ->
        x = 1
        x + 1
      _ -> n
    end
  end
end";
        let node = parse_module(source);
        match &module_body(&node)[0].form {
            Form::Def(fun) => match &fun.body[0].form {
                Form::Case { clauses, .. } => {
                    assert_eq!(clauses.len(), 2);
                    assert_eq!(clauses[0].body.len(), 2);
                }
                other => panic!("expected case, got {other:?}"),
            },
            other => panic!("expected def, got {other:?}"),
        }
    }

    #[test]
    fn parses_map_literal_and_update() {
        let node = parse_module("defmodule M do\n  def f(m, p), do: %{m | price: p}\nend");
        match &module_body(&node)[0].form {
            Form::Def(fun) => {
                assert!(matches!(&fun.body[0].form, Form::MapUpdate { .. }));
            }
            other => panic!("expected def, got {other:?}"),
        }
        let node = parse_module("defmodule M do\n  def f(p), do: %{price: p, \"k\" => 1}\nend");
        match &module_body(&node)[0].form {
            Form::Def(fun) => match &fun.body[0].form {
                Form::MapLit(entries) => assert_eq!(entries.len(), 2),
                other => panic!("expected map, got {other:?}"),
            },
            other => panic!("expected def, got {other:?}"),
        }
    }

    #[test]
    fn parses_pipe_chain() {
        let node = parse_module(
            "defmodule M do\n  def f(s), do: s |> String.trim() |> String.upcase()\nend",
        );
        match &module_body(&node)[0].form {
            Form::Def(fun) => {
                assert!(matches!(&fun.body[0].form, Form::Pipe { .. }));
            }
            other => panic!("expected def, got {other:?}"),
        }
    }

    #[test]
    fn parses_captures() {
        let node = parse_module(
            "defmodule M do\n  def f(l), do: Enum.map(l, &String.upcase/1)\nend",
        );
        match &module_body(&node)[0].form {
            Form::Def(fun) => match &fun.body[0].form {
                Form::RemoteCall { args, .. } => {
                    assert!(matches!(
                        &args[1].form,
                        Form::CaptureRemote { arity: 1, .. }
                    ));
                }
                other => panic!("expected remote call, got {other:?}"),
            },
            other => panic!("expected def, got {other:?}"),
        }
    }

    #[test]
    fn parses_directives_as_named_forms() {
        let node = parse_module("defmodule M do\n  import File\n  def f(x), do: x\nend");
        assert!(matches!(
            &module_body(&node)[0].form,
            Form::Directive {
                kind: DirectiveKind::Import
            }
        ));
    }

    #[test]
    fn parses_attribute_declarations() {
        let node = parse_module("defmodule M do\n  @rate 0.2\n  def f(p), do: p * @rate\nend");
        let body = module_body(&node);
        assert!(matches!(&body[0].form, Form::Attribute { name, .. } if name == "rate"));
        match &body[1].form {
            Form::Def(fun) => match &fun.body[0].form {
                Form::BinaryOp { right, .. } => {
                    assert!(matches!(&right.form, Form::AttrRef(name) if name == "rate"));
                }
                other => panic!("expected binary op, got {other:?}"),
            },
            other => panic!("expected def, got {other:?}"),
        }
    }

    #[test]
    fn parses_if_as_plain_call() {
        let node = parse_module("defmodule M do\n  def f(x) do\n    if x do\n      1\n    end\n  end\nend");
        match &module_body(&node)[0].form {
            Form::Def(fun) => match &fun.body[0].form {
                Form::LocalCall { name, args } => {
                    assert_eq!(name, "if");
                    assert_eq!(args.len(), 2);
                }
                other => panic!("expected local call, got {other:?}"),
            },
            other => panic!("expected def, got {other:?}"),
        }
    }

    #[test]
    fn parses_with_expression() {
        let source = "defmodule M do
  def f(m) do
    with {:ok, v} <- Map.fetch(m, :k) do
      v
    else
      _ -> nil
    end
  end
end";
        let node = parse_module(source);
        match &module_body(&node)[0].form {
            Form::Def(fun) => match &fun.body[0].form {
                Form::With {
                    entries,
                    else_clauses,
                    ..
                } => {
                    assert_eq!(entries.len(), 1);
                    assert!(matches!(&entries[0].form, Form::WithBind { .. }));
                    assert_eq!(else_clauses.len(), 1);
                }
                other => panic!("expected with, got {other:?}"),
            },
            other => panic!("expected def, got {other:?}"),
        }
    }

    #[test]
    fn adjacent_bracket_is_access_not_call() {
        let node = parse_module("defmodule M do\n  def f(m), do: m[:k]\nend");
        match &module_body(&node)[0].form {
            Form::Def(fun) => {
                assert!(matches!(&fun.body[0].form, Form::IndexAccess { .. }));
            }
            other => panic!("expected def, got {other:?}"),
        }
    }

    #[test]
    fn parse_error_carries_line() {
        let err = parse("defmodule M do\n  def f(x) do\n    x +\n  end\nend").unwrap_err();
        assert!(err.line.is_some());
        assert!(err.to_string().starts_with("Line "));
    }

    #[test]
    fn parses_string_interpolation_to_ast() {
        let node = parse_module("defmodule M do\n  def f(n), do: \"n = #{n + 1}\"\nend");
        match &module_body(&node)[0].form {
            Form::Def(fun) => match &fun.body[0].form {
                Form::Str(parts) => {
                    assert!(matches!(&parts[0], StrPart::Lit(t) if t == "n = "));
                    assert!(matches!(&parts[1], StrPart::Interp(_)));
                }
                other => panic!("expected string, got {other:?}"),
            },
            other => panic!("expected def, got {other:?}"),
        }
    }
}
