use crate::ast::{
    AxisExpression, BinaryOp, CalculatedMemberDef, Expr, Flag, Function, NamedSetDef, Path,
    Property, SelectStatement, UnaryOp, WithClause,
};
use crate::error::{MdxError, MdxResult};
use std::ops::Range;

/// Deepest nesting of braces, parentheses, calls and operators a query may use.
pub(crate) const MAX_NESTING_DEPTH: usize = 128;

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Identifier(String),
    BracketIdentifier(String),
    Number(f64),
    /// `"..."` literal.
    String(String),
    /// `'...'` expression text (the legacy quoted form of `WITH` definitions). `escapes` holds
    /// the offsets in `text` where a doubled `''` was collapsed.
    Quoted { text: String, escapes: Vec<usize> },
    Dot,
    Comma,
    Semicolon,
    LParen,
    RParen,
    LBrace,
    RBrace,
    Plus,
    Minus,
    Star,
    Slash,
    Equals,
    Eof,
}

#[derive(Clone, Debug)]
struct Spanned {
    token: Token,
    /// Position reported in errors and paths, relative to the whole query.
    start: usize,
    /// Byte range within the lexer's own input.
    span: Range<usize>,
}

fn parse_error(position: usize, token: impl Into<String>, message: impl Into<String>) -> MdxError {
    MdxError::Parse {
        position,
        token: token.into(),
        message: message.into(),
    }
}

struct Lexer<'a> {
    input: &'a str,
    pos: usize,
    /// Added to every reported position (non-zero for quoted sub-expressions).
    base: usize,
    /// Offsets in `input` where the query text had a doubled quote.
    escapes: Vec<usize>,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str, base: usize, escapes: Vec<usize>) -> Self {
        Self {
            input,
            pos: 0,
            base,
            escapes,
        }
    }

    /// Map an offset in `input` back to a position in the query text.
    fn position(&self, offset: usize) -> usize {
        self.base + offset + self.escapes.partition_point(|&e| e < offset)
    }

    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn peek_second(&self) -> Option<char> {
        let mut chars = self.input[self.pos..].chars();
        chars.next();
        chars.next()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn consume_while<F>(&mut self, mut predicate: F) -> &'a str
    where
        F: FnMut(char) -> bool,
    {
        let input = self.input;
        let start = self.pos;
        while let Some(ch) = self.peek() {
            if !predicate(ch) {
                break;
            }
            self.bump();
        }
        &input[start..self.pos]
    }

    fn error(&self, start: usize, message: &str) -> MdxError {
        let token: String = self.input[start..].chars().take(16).collect();
        parse_error(self.position(start), token, message)
    }

    fn skip_trivia(&mut self) -> MdxResult<()> {
        loop {
            self.consume_while(char::is_whitespace);
            match (self.peek(), self.peek_second()) {
                (Some('-'), Some('-')) | (Some('/'), Some('/')) => {
                    self.consume_while(|c| c != '\n');
                }
                (Some('/'), Some('*')) => {
                    let start = self.pos;
                    self.bump();
                    self.bump();
                    match self.input[self.pos..].find("*/") {
                        Some(end) => self.pos += end + 2,
                        None => return Err(self.error(start, "unterminated block comment")),
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    /// Read a delimited literal; a doubled closing delimiter stands for itself.
    fn delimited(&mut self, close: char, what: &str) -> MdxResult<String> {
        self.delimited_with_escapes(close, what).map(|(text, _)| text)
    }

    /// Like [`Lexer::delimited`], also returning the offsets in the literal where a doubled
    /// delimiter was collapsed.
    fn delimited_with_escapes(
        &mut self,
        close: char,
        what: &str,
    ) -> MdxResult<(String, Vec<usize>)> {
        let start = self.pos;
        self.bump();
        let mut out = String::new();
        let mut escapes = Vec::new();
        loop {
            match self.bump() {
                None => return Err(self.error(start, &format!("unterminated {what}"))),
                Some(c) if c == close => {
                    if self.peek() == Some(close) {
                        self.bump();
                        escapes.push(out.len());
                        out.push(close);
                        continue;
                    }
                    return Ok((out, escapes));
                }
                Some(c) => out.push(c),
            }
        }
    }

    fn next_token(&mut self) -> MdxResult<Spanned> {
        self.skip_trivia()?;
        let start = self.pos;
        let Some(ch) = self.peek() else {
            return Ok(self.spanned(Token::Eof, start));
        };

        let token = match ch {
            '.' => self.single(Token::Dot),
            ',' => self.single(Token::Comma),
            ';' => self.single(Token::Semicolon),
            '(' => self.single(Token::LParen),
            ')' => self.single(Token::RParen),
            '{' => self.single(Token::LBrace),
            '}' => self.single(Token::RBrace),
            '+' => self.single(Token::Plus),
            '-' => self.single(Token::Minus),
            '*' => self.single(Token::Star),
            '/' => self.single(Token::Slash),
            '=' => self.single(Token::Equals),
            '[' => Token::BracketIdentifier(self.delimited(']', "bracketed identifier")?),
            '"' => Token::String(self.delimited('"', "string")?),
            '\'' => {
                let (text, escapes) = self.delimited_with_escapes('\'', "quoted expression")?;
                Token::Quoted { text, escapes }
            }
            c if c.is_ascii_digit() => {
                let mut text = self.consume_while(|c| c.is_ascii_digit()).to_string();
                let fraction = self.peek_second().is_some_and(|c| c.is_ascii_digit());
                if self.peek() == Some('.') && fraction {
                    self.bump();
                    text.push('.');
                    text.push_str(self.consume_while(|c| c.is_ascii_digit()));
                }
                if matches!(self.peek(), Some('e' | 'E')) {
                    let mark = self.pos;
                    self.bump();
                    let mut exponent = String::from("e");
                    if let Some(sign @ ('+' | '-')) = self.peek() {
                        self.bump();
                        exponent.push(sign);
                    }
                    let digits = self.consume_while(|c| c.is_ascii_digit());
                    if digits.is_empty() {
                        return Err(self.error(mark, "expected exponent digits"));
                    }
                    text.push_str(&exponent);
                    text.push_str(digits);
                }
                let value = text
                    .parse::<f64>()
                    .ok()
                    .filter(|v| v.is_finite())
                    .ok_or_else(|| self.error(start, "invalid number"))?;
                Token::Number(value)
            }
            c if is_ident_start(c) => {
                Token::Identifier(self.consume_while(is_ident_part).to_string())
            }
            _ => return Err(self.error(start, "unexpected character")),
        };
        Ok(self.spanned(token, start))
    }

    fn single(&mut self, token: Token) -> Token {
        self.bump();
        token
    }

    fn spanned(&self, token: Token, start: usize) -> Spanned {
        Spanned {
            token,
            start: self.position(start),
            span: start..self.pos,
        }
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_ident_part(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

struct Parser<'a> {
    input: &'a str,
    lexer: Lexer<'a>,
    lookahead: Spanned,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str, base: usize, escapes: Vec<usize>) -> MdxResult<Self> {
        let mut lexer = Lexer::new(input, base, escapes);
        let lookahead = lexer.next_token()?;
        Ok(Self {
            input,
            lexer,
            lookahead,
            depth: 0,
        })
    }

    fn bump(&mut self) -> MdxResult<Spanned> {
        let next = self.lexer.next_token()?;
        Ok(std::mem::replace(&mut self.lookahead, next))
    }

    fn token_text(&self, spanned: &Spanned) -> String {
        if spanned.token == Token::Eof {
            return "end of input".to_string();
        }
        self.input
            .get(spanned.span.clone())
            .unwrap_or_default()
            .to_string()
    }

    fn error(&self, message: impl Into<String>) -> MdxError {
        parse_error(
            self.lookahead.start,
            self.token_text(&self.lookahead),
            message,
        )
    }

    fn expect(&mut self, token: Token, what: &str) -> MdxResult<Spanned> {
        if self.lookahead.token == token {
            self.bump()
        } else {
            Err(self.error(format!("expected {what}")))
        }
    }

    fn at_keyword(&self, keyword: &str) -> bool {
        matches!(&self.lookahead.token, Token::Identifier(name) if name.eq_ignore_ascii_case(keyword))
    }

    fn expect_keyword(&mut self, keyword: &str) -> MdxResult<()> {
        if self.at_keyword(keyword) {
            self.bump()?;
            Ok(())
        } else {
            Err(self.error(format!("expected {keyword}")))
        }
    }

    fn parse_statement(&mut self) -> MdxResult<SelectStatement> {
        let mut with = Vec::new();
        if self.at_keyword("WITH") {
            self.bump()?;
            while self.at_keyword("MEMBER") || self.at_keyword("SET") {
                with.push(self.parse_with_clause()?);
            }
            if with.is_empty() {
                return Err(self.error("expected MEMBER or SET after WITH"));
            }
        }

        self.expect_keyword("SELECT")?;
        let mut axes = Vec::new();
        let mut axis_positions = Vec::new();
        if !self.at_keyword("FROM") {
            loop {
                axis_positions.push(self.lookahead.start);
                axes.push(self.parse_axis()?);
                if self.lookahead.token == Token::Comma {
                    self.bump()?;
                    continue;
                }
                break;
            }
        }

        self.expect_keyword("FROM")?;
        let cube_position = self.lookahead.start;
        let cube_path = self.parse_path()?;
        let [cube] = <[String; 1]>::try_from(cube_path.segments).map_err(|_| {
            parse_error(cube_position, "FROM", "cube name must be a single identifier")
        })?;

        let slicer = if self.at_keyword("WHERE") {
            self.bump()?;
            Some(self.parse_expr(0)?)
        } else {
            None
        };

        let mut cell_properties = Vec::new();
        if self.at_keyword("CELL") {
            self.bump()?;
            self.expect_keyword("PROPERTIES")?;
            loop {
                match self.bump()?.token {
                    Token::Identifier(name) | Token::BracketIdentifier(name) => {
                        cell_properties.push(name)
                    }
                    _ => return Err(self.error("expected cell property name")),
                }
                if self.lookahead.token != Token::Comma {
                    break;
                }
                self.bump()?;
            }
        }

        if self.lookahead.token == Token::Semicolon {
            self.bump()?;
        }
        if self.lookahead.token != Token::Eof {
            return Err(self.error("unexpected token after statement"));
        }

        validate_axes(&mut axes, &axis_positions)?;
        Ok(SelectStatement {
            with,
            axes,
            cube,
            slicer,
            cell_properties,
        })
    }

    fn parse_with_clause(&mut self) -> MdxResult<WithClause> {
        let is_member = self.at_keyword("MEMBER");
        self.bump()?;
        let path = self.parse_path()?;
        self.expect_keyword("AS")?;
        let expr = self.parse_definition_expr()?;
        if !is_member {
            return Ok(WithClause::Set(NamedSetDef { path, expr }));
        }

        let mut def = CalculatedMemberDef {
            path,
            expr,
            format_string: None,
            solve_order: 0,
        };
        while self.lookahead.token == Token::Comma {
            self.bump()?;
            if self.at_keyword("FORMAT_STRING") {
                self.bump()?;
                self.expect(Token::Equals, "'='")?;
                match self.bump()?.token {
                    Token::String(s) | Token::Quoted { text: s, .. } => {
                        def.format_string = Some(s)
                    }
                    _ => return Err(self.error("expected format string literal")),
                }
            } else if self.at_keyword("SOLVE_ORDER") {
                self.bump()?;
                self.expect(Token::Equals, "'='")?;
                let negative = self.lookahead.token == Token::Minus;
                if negative {
                    self.bump()?;
                }
                match self.lookahead.token {
                    Token::Number(n) if n.fract() == 0.0 && n.abs() <= i32::MAX as f64 => {
                        self.bump()?;
                        def.solve_order = if negative { -(n as i32) } else { n as i32 };
                    }
                    _ => return Err(self.error("expected integer solve order")),
                }
            } else {
                return Err(self.error("unsupported calculated member property"));
            }
        }
        Ok(WithClause::Member(def))
    }

    /// A definition body: either an inline expression or the legacy `'...'` quoted form.
    fn parse_definition_expr(&mut self) -> MdxResult<Expr> {
        if let Token::Quoted { text, escapes } = &self.lookahead.token {
            let (text, escapes) = (text.clone(), escapes.clone());
            let base = self.lookahead.start + 1;
            self.bump()?;
            let mut inner = Parser::new(&text, base, escapes)?;
            let expr = inner.parse_expr(0)?;
            if inner.lookahead.token != Token::Eof {
                return Err(inner.error("unexpected token in quoted expression"));
            }
            return Ok(expr);
        }
        self.parse_expr(0)
    }

    fn parse_axis(&mut self) -> MdxResult<AxisExpression> {
        let non_empty = if self.at_keyword("NON") {
            self.bump()?;
            self.expect_keyword("EMPTY")?;
            true
        } else {
            false
        };
        let set = self.parse_expr(0)?;

        let mut dimension_properties = Vec::new();
        if self.at_keyword("DIMENSION") {
            self.bump()?;
            self.expect_keyword("PROPERTIES")?;
            loop {
                let path = self.parse_path()?;
                dimension_properties.push(match path.segments.as_slice() {
                    [single] => single.clone(),
                    _ => path.to_string(),
                });
                if self.lookahead.token != Token::Comma {
                    break;
                }
                self.bump()?;
            }
        }

        self.expect_keyword("ON")?;
        let axis = self.parse_axis_name()?;
        Ok(AxisExpression {
            axis,
            non_empty,
            set,
            dimension_properties,
        })
    }

    fn parse_axis_name(&mut self) -> MdxResult<usize> {
        let axis = match &self.lookahead.token {
            Token::Number(n) => axis_number(*n).ok_or_else(|| self.error("invalid axis number"))?,
            Token::Identifier(name) => match name.to_ascii_uppercase().as_str() {
                "COLUMNS" => 0,
                "ROWS" => 1,
                "PAGES" => 2,
                "SECTIONS" => 3,
                "CHAPTERS" => 4,
                "AXIS" => {
                    self.bump()?;
                    self.expect(Token::LParen, "'('")?;
                    let axis = match self.lookahead.token {
                        Token::Number(n) => {
                            axis_number(n).ok_or_else(|| self.error("invalid axis number"))?
                        }
                        _ => return Err(self.error("expected axis number")),
                    };
                    self.bump()?;
                    self.expect(Token::RParen, "')'")?;
                    return Ok(axis);
                }
                _ => return Err(self.error("unknown axis name")),
            },
            _ => return Err(self.error("expected axis name")),
        };
        self.bump()?;
        Ok(axis)
    }

    fn parse_path(&mut self) -> MdxResult<Path> {
        let position = self.lookahead.start;
        let mut segments = Vec::new();
        loop {
            if !matches!(
                self.lookahead.token,
                Token::Identifier(_) | Token::BracketIdentifier(_)
            ) {
                return Err(self.error("expected name"));
            }
            if let Token::Identifier(name) | Token::BracketIdentifier(name) = self.bump()?.token {
                segments.push(name);
            }
            if self.lookahead.token != Token::Dot {
                break;
            }
            self.bump()?;
        }
        Ok(Path { segments, position })
    }

    fn parse_expr(&mut self, min_prec: u8) -> MdxResult<Expr> {
        if self.depth >= MAX_NESTING_DEPTH {
            return Err(self.error(format!(
                "expression nests deeper than {MAX_NESTING_DEPTH} levels"
            )));
        }
        self.depth += 1;
        let expr = self.parse_operators(min_prec);
        self.depth -= 1;
        expr
    }

    fn parse_operators(&mut self, min_prec: u8) -> MdxResult<Expr> {
        let mut left = self.parse_prefix()?;
        loop {
            let (op, prec) = match self.lookahead.token {
                Token::Plus => (BinaryOp::Add, 1),
                Token::Minus => (BinaryOp::Subtract, 1),
                Token::Star => (BinaryOp::Multiply, 2),
                Token::Slash => (BinaryOp::Divide, 2),
                _ => break,
            };
            if prec < min_prec {
                break;
            }
            self.bump()?;
            let right = self.parse_expr(prec + 1)?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_prefix(&mut self) -> MdxResult<Expr> {
        match &self.lookahead.token {
            Token::Minus => {
                self.bump()?;
                let expr = self.parse_expr(3)?;
                Ok(Expr::Unary {
                    op: UnaryOp::Negate,
                    expr: Box::new(expr),
                })
            }
            Token::Number(n) => {
                let n = *n;
                self.bump()?;
                Ok(Expr::Number(n))
            }
            Token::String(s) => {
                let s = s.clone();
                self.bump()?;
                Ok(Expr::String(s))
            }
            Token::LBrace => {
                self.bump()?;
                let items = self.parse_list(Token::RBrace)?;
                self.expect(Token::RBrace, "'}'")?;
                Ok(Expr::Set(items))
            }
            Token::LParen => {
                self.bump()?;
                if self.lookahead.token == Token::RParen {
                    return Err(self.error("empty tuple"));
                }
                let mut items = self.parse_list(Token::RParen)?;
                self.expect(Token::RParen, "')'")?;
                if items.len() == 1 {
                    Ok(items.remove(0))
                } else {
                    Ok(Expr::Tuple(items))
                }
            }
            Token::Identifier(_) | Token::BracketIdentifier(_) => self.parse_name(),
            _ => Err(self.error("unexpected token in expression")),
        }
    }

    fn parse_list(&mut self, close: Token) -> MdxResult<Vec<Expr>> {
        let mut items = Vec::new();
        if self.lookahead.token == close {
            return Ok(items);
        }
        loop {
            items.push(self.parse_expr(0)?);
            if self.lookahead.token != Token::Comma {
                return Ok(items);
            }
            self.bump()?;
        }
    }

    /// A path, a property suffix, a function call or a flag.
    fn parse_name(&mut self) -> MdxResult<Expr> {
        let first = self.bump()?;
        let position = first.start;
        let (bare, name) = match first.token {
            Token::Identifier(name) => (true, name),
            Token::BracketIdentifier(name) => (false, name),
            _ => return Err(self.error("expected name")),
        };

        if bare && self.lookahead.token == Token::LParen {
            return self.parse_call(&name, position);
        }
        if bare && self.lookahead.token != Token::Dot {
            if let Some(flag) = Flag::from_name(&name) {
                return Ok(Expr::Flag(flag));
            }
        }

        let mut path = Path {
            segments: vec![name],
            position,
        };
        while self.lookahead.token == Token::Dot {
            self.bump()?;
            match self.bump()?.token {
                Token::BracketIdentifier(segment) => path.segments.push(segment),
                Token::Identifier(segment) => {
                    if self.lookahead.token != Token::Dot {
                        if let Some(property) = Property::from_name(&segment) {
                            return Ok(Expr::Property { path, property });
                        }
                    }
                    path.segments.push(segment);
                }
                _ => return Err(self.error("expected name after '.'")),
            }
        }
        Ok(Expr::Path(path))
    }

    fn parse_call(&mut self, name: &str, position: usize) -> MdxResult<Expr> {
        let function = Function::from_name(name)
            .ok_or_else(|| parse_error(position, name, "unsupported function"))?;
        self.expect(Token::LParen, "'('")?;
        let args = self.parse_list(Token::RParen)?;
        self.expect(Token::RParen, "')'")?;

        let (min, max) = function.arity();
        if args.len() < min || max.is_some_and(|max| args.len() > max) {
            let expected = match max {
                Some(max) if max == min => format!("{min}"),
                Some(max) => format!("{min} to {max}"),
                None => format!("at least {min}"),
            };
            return Err(parse_error(
                position,
                name,
                format!(
                    "{} expects {expected} arguments, got {}",
                    function.name(),
                    args.len()
                ),
            ));
        }
        Ok(Expr::Call { function, args })
    }
}

fn axis_number(n: f64) -> Option<usize> {
    (n >= 0.0 && n.fract() == 0.0 && n < 128.0).then_some(n as usize)
}

/// Order axes by index and require indices `0..n` without repeats.
fn validate_axes(axes: &mut [AxisExpression], positions: &[usize]) -> MdxResult<()> {
    let mut seen = vec![false; axes.len()];
    for (axis, position) in axes.iter().zip(positions) {
        match seen.get_mut(axis.axis) {
            Some(slot) if !*slot => *slot = true,
            Some(_) => {
                return Err(parse_error(
                    *position,
                    crate::ast::axis_name(axis.axis),
                    "axis specified more than once",
                ))
            }
            None => {
                return Err(parse_error(
                    *position,
                    crate::ast::axis_name(axis.axis),
                    "axes must be numbered contiguously from 0",
                ))
            }
        }
    }
    axes.sort_by_key(|axis| axis.axis);
    Ok(())
}

/// Parse a complete `SELECT` statement.
pub fn parse(input: &str) -> MdxResult<SelectStatement> {
    Parser::new(input, 0, Vec::new())?.parse_statement()
}

/// Parse a standalone set or scalar expression.
pub fn parse_expression(input: &str) -> MdxResult<Expr> {
    let mut parser = Parser::new(input, 0, Vec::new())?;
    let expr = parser.parse_expr(0)?;
    if parser.lookahead.token != Token::Eof {
        return Err(parser.error("unexpected token after expression"));
    }
    Ok(expr)
}
