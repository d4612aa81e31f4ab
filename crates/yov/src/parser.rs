//! A cursor over a token range, usable on demand per declaration part.
//!
//! This is not a whole-file AST pass: the Location Scanner records byte
//! ranges for each declaration's parts, and the IR Builder asks the parser
//! to re-tokenise and parse exactly the slice it currently needs.

use crate::ast::{Expr, ObjectInit, Stmt, StringPart, TypeExpr, UnaryOp};
use crate::diagnostics::{Location, Reporter};
use crate::lexer::{self, BinaryOperator, Keyword, Token, TokenKind};
use crate::script::ScriptId;

/// Parses `text` (re-tokenising it at `discard_trivia = true`) as a
/// sequence of statements, e.g. a function body.
#[must_use]
pub fn parse_block_text(text: &str, start_offset: u32, script: ScriptId, reporter: &Reporter) -> Vec<Stmt> {
    let tokens = match lexer::tokenize(text, start_offset, true) {
        Ok(tokens) => tokens,
        Err(err) => {
            reporter.error(Location::new(script, err.span.start), err.message);
            return Vec::new();
        }
    };
    let mut parser = Parser::new(&tokens, script, reporter);
    let mut stmts = Vec::new();
    while !parser.at_eof() {
        if let Some(stmt) = parser.parse_statement() {
            stmts.push(stmt);
        } else {
            parser.recover_to_statement_boundary();
        }
    }
    stmts
}

/// Parses `text` as a single expression (used for enum-value expressions
/// and the default-value expressions of script arguments).
#[must_use]
pub fn parse_expr_text(text: &str, start_offset: u32, script: ScriptId, reporter: &Reporter) -> Option<Expr> {
    let tokens = lexer::tokenize(text, start_offset, true).ok()?;
    let mut parser = Parser::new(&tokens, script, reporter);
    parser.parse_expr()
}

/// Parses a parameter or named-return list: a comma-separated sequence of
/// `name: Type` pairs. `text` excludes the surrounding parentheses (the
/// Location Scanner's `fetch_balanced` already stripped them).
#[must_use]
pub fn parse_param_list_text(text: &str, start_offset: u32, script: ScriptId, reporter: &Reporter) -> Vec<(String, TypeExpr)> {
    let tokens = match lexer::tokenize(text, start_offset, true) {
        Ok(tokens) => tokens,
        Err(err) => {
            reporter.error(Location::new(script, err.span.start), err.message);
            return Vec::new();
        }
    };
    let mut parser = Parser::new(&tokens, script, reporter);
    let mut out = Vec::new();
    while !parser.at_eof() {
        let Some(name) = parser.expect_identifier() else { break };
        if !parser.expect(&TokenKind::Colon, "':'") {
            break;
        }
        let Some(ty) = parser.parse_type() else { break };
        out.push((name, ty));
        if matches!(parser.peek().kind, TokenKind::Comma) {
            parser.advance();
        } else {
            break;
        }
    }
    out
}

/// Parses a function's return clause: either `(name: Type, ...)` — reusing
/// the parameter-list grammar once the parentheses are stripped — or a
/// single bare `Type`, which yields one unnamed return.
#[must_use]
pub fn parse_return_list_text(text: &str, start_offset: u32, script: ScriptId, reporter: &Reporter) -> Vec<(String, TypeExpr)> {
    let tokens = match lexer::tokenize(text, start_offset, true) {
        Ok(tokens) => tokens,
        Err(err) => {
            reporter.error(Location::new(script, err.span.start), err.message);
            return Vec::new();
        }
    };
    let mut parser = Parser::new(&tokens, script, reporter);
    if matches!(parser.peek().kind, TokenKind::LParen) {
        parser.advance();
        let inner_start = parser.peek().span.start as usize;
        let mut depth = 1i32;
        let mut inner_end = inner_start;
        while !parser.at_eof() {
            match parser.peek().kind {
                TokenKind::LParen => depth += 1,
                TokenKind::RParen => {
                    depth -= 1;
                    if depth == 0 {
                        inner_end = parser.peek().span.start as usize;
                        break;
                    }
                }
                _ => {}
            }
            parser.advance();
        }
        let inner_text = &text[inner_start.saturating_sub(start_offset as usize)..inner_end.saturating_sub(start_offset as usize)];
        return parse_param_list_text(inner_text, inner_start as u32, script, reporter);
    }
    let Some(ty) = parser.parse_type() else { return Vec::new() };
    vec![(String::new(), ty)]
}

/// Parses an enum body: a comma-separated list of `Name [= expr]` variants.
#[must_use]
pub fn parse_enum_variants_text(text: &str, start_offset: u32, script: ScriptId, reporter: &Reporter) -> Vec<(String, Option<Expr>)> {
    let tokens = match lexer::tokenize(text, start_offset, true) {
        Ok(tokens) => tokens,
        Err(err) => {
            reporter.error(Location::new(script, err.span.start), err.message);
            return Vec::new();
        }
    };
    let mut parser = Parser::new(&tokens, script, reporter);
    let mut out = Vec::new();
    while !parser.at_eof() {
        let Some(name) = parser.expect_identifier() else { break };
        let value = if matches!(parser.peek().kind, TokenKind::Assign) {
            parser.advance();
            parser.parse_expr()
        } else {
            None
        };
        out.push((name, value));
        if matches!(parser.peek().kind, TokenKind::Comma) {
            parser.advance();
        } else {
            break;
        }
    }
    out
}

/// Parses an `arg` declaration's properties body: a sequence of
/// `key = expr;` pairs (`name`, `description`, `required`, `default`).
#[must_use]
pub fn parse_arg_properties_text(text: &str, start_offset: u32, script: ScriptId, reporter: &Reporter) -> Vec<(String, Expr)> {
    let tokens = match lexer::tokenize(text, start_offset, true) {
        Ok(tokens) => tokens,
        Err(err) => {
            reporter.error(Location::new(script, err.span.start), err.message);
            return Vec::new();
        }
    };
    let mut parser = Parser::new(&tokens, script, reporter);
    let mut out = Vec::new();
    while !parser.at_eof() {
        let Some(key) = parser.expect_identifier() else { break };
        if !parser.expect(&TokenKind::Assign, "'='") {
            break;
        }
        let Some(value) = parser.parse_expr() else { break };
        out.push((key, value));
        if !parser.expect(&TokenKind::Semicolon, "';'") {
            break;
        }
    }
    out
}

/// Parses a top-level mutable global's body: `Type [= expr]`, the text
/// between the declaration's `:` and its terminating `;` (both already
/// stripped by the Location Scanner).
#[must_use]
pub fn parse_global_def_text(text: &str, start_offset: u32, script: ScriptId, reporter: &Reporter) -> (Option<TypeExpr>, Option<Expr>) {
    let tokens = match lexer::tokenize(text, start_offset, true) {
        Ok(tokens) => tokens,
        Err(err) => {
            reporter.error(Location::new(script, err.span.start), err.message);
            return (None, None);
        }
    };
    let mut parser = Parser::new(&tokens, script, reporter);
    let ty = if matches!(parser.peek().kind, TokenKind::Assign) { None } else { parser.parse_type() };
    let init = if matches!(parser.peek().kind, TokenKind::Assign) {
        parser.advance();
        parser.parse_expr()
    } else {
        None
    };
    (ty, init)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    script: ScriptId,
    reporter: &'a Reporter,
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Token], script: ScriptId, reporter: &'a Reporter) -> Self {
        Self { tokens, pos: 0, script, reporter }
    }

    fn peek_at(&self, offset: usize) -> &Token {
        self.tokens.get(self.pos + offset).unwrap_or_else(|| self.tokens.last().expect("token stream always has Eof"))
    }

    fn peek(&self) -> &Token {
        self.peek_at(0)
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek().kind, TokenKind::Eof)
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if !self.at_eof() {
            self.pos += 1;
        }
        token
    }

    fn location(&self) -> Location {
        Location::new(self.script, self.peek().span.start)
    }

    fn error(&self, message: impl Into<String>) {
        self.reporter.error(self.location(), message);
    }

    fn recover_to_statement_boundary(&mut self) {
        while !self.at_eof() && !matches!(self.peek().kind, TokenKind::Semicolon | TokenKind::RBrace) {
            self.pos += 1;
        }
        if matches!(self.peek().kind, TokenKind::Semicolon) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, kind: &TokenKind, what: &str) -> bool {
        if std::mem::discriminant(&self.peek().kind) == std::mem::discriminant(kind) {
            self.advance();
            true
        } else {
            self.error(format!("expected {what}, found {{line}}"));
            false
        }
    }

    fn expect_identifier(&mut self) -> Option<String> {
        if matches!(self.peek().kind, TokenKind::Identifier) {
            Some(self.advance().text)
        } else {
            self.error("expected an identifier, found {line}");
            None
        }
    }

    // ---- types ----

    fn parse_type(&mut self) -> Option<TypeExpr> {
        if matches!(self.peek().kind, TokenKind::Amp) {
            self.advance();
            return Some(TypeExpr::Reference(Box::new(self.parse_type()?)));
        }
        let name = self.expect_identifier()?;
        let mut ty = TypeExpr::Named(name);
        while matches!(self.peek().kind, TokenKind::LBracket) && matches!(self.peek_at(1).kind, TokenKind::RBracket) {
            self.advance();
            self.advance();
            ty = TypeExpr::Array(Box::new(ty));
        }
        Some(ty)
    }

    // ---- expressions ----
    // Precedence, loosest to tightest: logical -> compare/is -> additive ->
    // multiplicative -> sign/reference -> postfix (call/member/index) -> atom.

    fn parse_expr(&mut self) -> Option<Expr> {
        self.parse_logical()
    }

    fn parse_logical(&mut self) -> Option<Expr> {
        let mut lhs = self.parse_compare()?;
        while let TokenKind::BinaryOp(op @ (BinaryOperator::And | BinaryOperator::Or)) = self.peek().kind {
            let location = self.location();
            self.advance();
            let rhs = self.parse_compare()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs), location };
        }
        Some(lhs)
    }

    fn parse_compare(&mut self) -> Option<Expr> {
        let mut lhs = self.parse_additive()?;
        if matches!(self.peek().kind, TokenKind::Keyword(Keyword::Is)) {
            let location = self.location();
            self.advance();
            let ty = self.parse_type()?;
            lhs = Expr::Is { expr: Box::new(lhs), ty, location };
        }
        while let TokenKind::BinaryOp(
            op @ (BinaryOperator::Eq | BinaryOperator::NotEq | BinaryOperator::Lt | BinaryOperator::Gt | BinaryOperator::Le | BinaryOperator::Ge),
        ) = self.peek().kind
        {
            let location = self.location();
            self.advance();
            let rhs = self.parse_additive()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs), location };
        }
        Some(lhs)
    }

    fn parse_additive(&mut self) -> Option<Expr> {
        let mut lhs = self.parse_multiplicative()?;
        while let TokenKind::BinaryOp(op @ (BinaryOperator::Add | BinaryOperator::Sub)) = self.peek().kind {
            let location = self.location();
            self.advance();
            let rhs = self.parse_multiplicative()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs), location };
        }
        Some(lhs)
    }

    fn parse_multiplicative(&mut self) -> Option<Expr> {
        let mut lhs = self.parse_sign()?;
        while let TokenKind::BinaryOp(op @ (BinaryOperator::Mul | BinaryOperator::Div | BinaryOperator::Mod)) = self.peek().kind {
            let location = self.location();
            self.advance();
            let rhs = self.parse_sign()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs), location };
        }
        Some(lhs)
    }

    fn parse_sign(&mut self) -> Option<Expr> {
        let location = self.location();
        match self.peek().kind {
            TokenKind::BinaryOp(BinaryOperator::Sub) => {
                self.advance();
                Some(Expr::Unary { op: UnaryOp::Neg, expr: Box::new(self.parse_sign()?), location })
            }
            TokenKind::Bang => {
                self.advance();
                Some(Expr::Unary { op: UnaryOp::Not, expr: Box::new(self.parse_sign()?), location })
            }
            TokenKind::Amp => {
                self.advance();
                Some(Expr::Reference { expr: Box::new(self.parse_sign()?), location })
            }
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> Option<Expr> {
        let mut expr = self.parse_atom()?;
        loop {
            match self.peek().kind {
                TokenKind::LParen => {
                    let location = self.location();
                    self.advance();
                    let mut args = Vec::new();
                    if !matches!(self.peek().kind, TokenKind::RParen) {
                        loop {
                            args.push(self.parse_expr()?);
                            if matches!(self.peek().kind, TokenKind::Comma) {
                                self.advance();
                            } else {
                                break;
                            }
                        }
                    }
                    if !self.expect(&TokenKind::RParen, "')'") {
                        return None;
                    }
                    expr = Expr::Call { callee: Box::new(expr), args, location };
                }
                TokenKind::Dot => {
                    let location = self.location();
                    self.advance();
                    let name = self.expect_identifier()?;
                    expr = Expr::Member { base: Box::new(expr), name, location };
                }
                TokenKind::LBracket => {
                    let location = self.location();
                    self.advance();
                    let index = self.parse_expr()?;
                    if !self.expect(&TokenKind::RBracket, "']'") {
                        return None;
                    }
                    expr = Expr::Index { base: Box::new(expr), index: Box::new(index), location };
                }
                _ => break,
            }
        }
        Some(expr)
    }

    fn parse_atom(&mut self) -> Option<Expr> {
        let location = self.location();
        match self.peek().kind {
            TokenKind::IntLiteral => {
                let text = self.advance().text;
                let value = text.parse::<i64>().ok().or_else(|| {
                    self.error(format!("invalid integer literal '{text}'"));
                    None
                })?;
                Some(Expr::IntLiteral(value, location))
            }
            TokenKind::Keyword(Keyword::True) => {
                self.advance();
                Some(Expr::BoolLiteral(true, location))
            }
            TokenKind::Keyword(Keyword::False) => {
                self.advance();
                Some(Expr::BoolLiteral(false, location))
            }
            TokenKind::Keyword(Keyword::Null) => {
                self.advance();
                Some(Expr::NullLiteral(location))
            }
            TokenKind::StringLiteral => {
                let raw = self.advance().text;
                Some(Expr::StringLiteral(parse_string_parts(&raw, location.offset, self.script, self.reporter), location))
            }
            TokenKind::CodepointLiteral => {
                let raw = self.advance().text;
                let ch = unescape(&raw).chars().next().unwrap_or('\0');
                Some(Expr::CodepointLiteral(ch, location))
            }
            TokenKind::Identifier => {
                let name = self.advance().text;
                Some(Expr::Identifier(name, location))
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect(&TokenKind::RParen, "')'");
                Some(inner)
            }
            TokenKind::LBrace => {
                self.advance();
                let mut elements = Vec::new();
                if !matches!(self.peek().kind, TokenKind::RBrace) {
                    loop {
                        elements.push(self.parse_expr()?);
                        if matches!(self.peek().kind, TokenKind::Comma) {
                            self.advance();
                        } else {
                            break;
                        }
                    }
                }
                self.expect(&TokenKind::RBrace, "'}'");
                Some(Expr::ArrayLiteral { elements, location })
            }
            _ => {
                self.error("expected an expression, found {line}");
                None
            }
        }
    }

    // ---- statements ----

    fn parse_statement(&mut self) -> Option<Stmt> {
        let location = self.location();
        match self.peek().kind {
            TokenKind::Keyword(Keyword::If) => self.parse_if(),
            TokenKind::Keyword(Keyword::While) => self.parse_while(),
            TokenKind::Keyword(Keyword::For) => self.parse_for(),
            TokenKind::Keyword(Keyword::Return) => self.parse_return(),
            TokenKind::Keyword(Keyword::Break) => {
                self.advance();
                self.expect(&TokenKind::Semicolon, "';'");
                Some(Stmt::Break(location))
            }
            TokenKind::Keyword(Keyword::Continue) => {
                self.advance();
                self.expect(&TokenKind::Semicolon, "';'");
                Some(Stmt::Continue(location))
            }
            TokenKind::Keyword(Keyword::Import) => self.parse_import(),
            TokenKind::LBrace => self.parse_block().map(Stmt::Block),
            _ if self.looks_like_object_def() => self.parse_object_def(),
            _ => self.parse_assign_or_expr_stmt(),
        }
    }

    fn parse_block(&mut self) -> Option<Vec<Stmt>> {
        self.expect(&TokenKind::LBrace, "'{'");
        let mut stmts = Vec::new();
        while !self.at_eof() && !matches!(self.peek().kind, TokenKind::RBrace) {
            if let Some(stmt) = self.parse_statement() {
                stmts.push(stmt);
            } else {
                self.recover_to_statement_boundary();
            }
        }
        self.expect(&TokenKind::RBrace, "'}'");
        Some(stmts)
    }

    fn parse_if(&mut self) -> Option<Stmt> {
        let location = self.location();
        self.advance();
        self.expect(&TokenKind::LParen, "'('");
        let cond = self.parse_expr()?;
        self.expect(&TokenKind::RParen, "')'");
        let then_branch = Box::new(self.parse_statement()?);
        let else_branch = if matches!(self.peek().kind, TokenKind::Keyword(Keyword::Else)) {
            self.advance();
            Some(Box::new(self.parse_statement()?))
        } else {
            None
        };
        Some(Stmt::If { cond, then_branch, else_branch, location })
    }

    fn parse_while(&mut self) -> Option<Stmt> {
        let location = self.location();
        self.advance();
        self.expect(&TokenKind::LParen, "'('");
        let cond = self.parse_expr()?;
        self.expect(&TokenKind::RParen, "')'");
        let body = Box::new(self.parse_statement()?);
        Some(Stmt::While { cond, body, location })
    }

    fn parse_for(&mut self) -> Option<Stmt> {
        let location = self.location();
        self.advance();
        self.expect(&TokenKind::LParen, "'('");

        // Distinguish `for (elem[, idx] : expr)` from `for (init; cond; update)`
        // by scanning ahead for a top-level ':' before any ';'.
        let mut depth = 0i32;
        let mut is_foreach = false;
        let mut lookahead = 0usize;
        loop {
            let tok = self.peek_at(lookahead);
            match tok.kind {
                TokenKind::LParen | TokenKind::LBracket | TokenKind::LBrace => depth += 1,
                TokenKind::RParen if depth == 0 => break,
                TokenKind::RParen | TokenKind::RBracket | TokenKind::RBrace => depth -= 1,
                TokenKind::Colon if depth == 0 => {
                    is_foreach = true;
                    break;
                }
                TokenKind::Semicolon if depth == 0 => break,
                TokenKind::Eof => break,
                _ => {}
            }
            lookahead += 1;
        }

        if is_foreach {
            let elem = self.expect_identifier()?;
            let index = if matches!(self.peek().kind, TokenKind::Comma) {
                self.advance();
                Some(self.expect_identifier()?)
            } else {
                None
            };
            self.expect(&TokenKind::Colon, "':'");
            let iter = self.parse_expr()?;
            self.expect(&TokenKind::RParen, "')'");
            let body = Box::new(self.parse_statement()?);
            Some(Stmt::ForEach { elem, index, iter, body, location })
        } else {
            let init = if matches!(self.peek().kind, TokenKind::Semicolon) { None } else { Some(Box::new(self.parse_statement()?)) };
            if init.is_none() {
                self.advance();
            }
            let cond = if matches!(self.peek().kind, TokenKind::Semicolon) { None } else { Some(self.parse_expr()?) };
            self.expect(&TokenKind::Semicolon, "';'");
            let update = if matches!(self.peek().kind, TokenKind::RParen) { None } else { Some(Box::new(self.parse_assign_or_expr_stmt_no_semicolon()?)) };
            self.expect(&TokenKind::RParen, "')'");
            let body = Box::new(self.parse_statement()?);
            Some(Stmt::ForClassic { init, cond, update, body, location })
        }
    }

    fn parse_return(&mut self) -> Option<Stmt> {
        let location = self.location();
        self.advance();
        let mut values = Vec::new();
        if !matches!(self.peek().kind, TokenKind::Semicolon) {
            loop {
                values.push(self.parse_expr()?);
                if matches!(self.peek().kind, TokenKind::Comma) {
                    self.advance();
                } else {
                    break;
                }
            }
        }
        self.expect(&TokenKind::Semicolon, "';'");
        Some(Stmt::Return { values, location })
    }

    fn parse_import(&mut self) -> Option<Stmt> {
        let location = self.location();
        self.advance();
        if !matches!(self.peek().kind, TokenKind::StringLiteral) {
            self.error("expected a string literal path after 'import'");
            return None;
        }
        let path = self.advance().text;
        self.expect(&TokenKind::Semicolon, "';'");
        Some(Stmt::Import { path, location })
    }

    fn looks_like_object_def(&self) -> bool {
        if !matches!(self.peek().kind, TokenKind::Identifier) {
            return false;
        }
        let mut offset = 1;
        loop {
            match self.peek_at(offset).kind {
                TokenKind::Comma => {
                    offset += 1;
                    if !matches!(self.peek_at(offset).kind, TokenKind::Identifier) {
                        return false;
                    }
                    offset += 1;
                }
                TokenKind::Colon | TokenKind::ColonColon => return true,
                _ => return false,
            }
        }
    }

    fn parse_object_def(&mut self) -> Option<Stmt> {
        let location = self.location();
        let mut names = vec![self.expect_identifier()?];
        while matches!(self.peek().kind, TokenKind::Comma) {
            self.advance();
            names.push(self.expect_identifier()?);
        }
        if matches!(self.peek().kind, TokenKind::ColonColon) {
            self.advance();
            let expr = self.parse_expr()?;
            self.expect(&TokenKind::Semicolon, "';'");
            return Some(Stmt::ObjectDef { names, ty: None, init: Some(ObjectInit::Constant(expr)), location });
        }
        self.expect(&TokenKind::Colon, "':'");
        let ty = if matches!(self.peek().kind, TokenKind::Assign) { None } else { Some(self.parse_type()?) };
        let init = if matches!(self.peek().kind, TokenKind::Assign) {
            self.advance();
            Some(ObjectInit::Value(self.parse_expr()?))
        } else {
            None
        };
        self.expect(&TokenKind::Semicolon, "';'");
        Some(Stmt::ObjectDef { names, ty, init, location })
    }

    fn parse_assign_or_expr_stmt(&mut self) -> Option<Stmt> {
        let stmt = self.parse_assign_or_expr_stmt_no_semicolon()?;
        self.expect(&TokenKind::Semicolon, "';'");
        Some(stmt)
    }

    fn parse_assign_or_expr_stmt_no_semicolon(&mut self) -> Option<Stmt> {
        let location = self.location();
        let first = self.parse_expr()?;
        if matches!(self.peek().kind, TokenKind::Comma) && matches!(first, Expr::Identifier(..)) {
            let mut targets = vec![first];
            while matches!(self.peek().kind, TokenKind::Comma) {
                self.advance();
                targets.push(self.parse_postfix()?);
            }
            self.expect(&TokenKind::Assign, "'='");
            let value = self.parse_expr()?;
            let declares = vec![false; targets.len()];
            return Some(Stmt::MultiAssign { targets, declares, value, location });
        }
        match self.peek().kind {
            TokenKind::Assign => {
                self.advance();
                let value = self.parse_expr()?;
                Some(Stmt::Assign { target: first, op: None, value, location })
            }
            TokenKind::CompoundAssign(op) => {
                self.advance();
                let value = self.parse_expr()?;
                Some(Stmt::Assign { target: first, op: Some(op), value, location })
            }
            _ => Some(Stmt::ExprStmt(first)),
        }
    }
}

/// Unescapes `\n \t \\ \" \' \{ \}` and leaves other sequences verbatim.
fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('r') => out.push('\r'),
                Some(other) => out.push(other),
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Splits a raw string literal payload into literal text and `{expr}`
/// interpolation parts, per the same escaping rules as the outer literal.
fn parse_string_parts(raw: &str, base_offset: u32, script: ScriptId, reporter: &Reporter) -> Vec<StringPart> {
    let mut parts = Vec::new();
    let mut text = String::new();
    let mut chars = raw.char_indices().peekable();
    while let Some((index, c)) = chars.next() {
        if c == '\\' {
            if let Some(&(_, next)) = chars.peek() {
                chars.next();
                match next {
                    'n' => text.push('\n'),
                    't' => text.push('\t'),
                    'r' => text.push('\r'),
                    other => text.push(other),
                }
            }
            continue;
        }
        if c == '{' {
            let mut depth = 1;
            let start = index + c.len_utf8();
            let mut end = start;
            for (inner_index, inner_c) in chars.by_ref() {
                match inner_c {
                    '{' => depth += 1,
                    '}' => {
                        depth -= 1;
                        if depth == 0 {
                            end = inner_index;
                            break;
                        }
                    }
                    _ => {}
                }
            }
            if !text.is_empty() {
                parts.push(StringPart::Text(std::mem::take(&mut text)));
            }
            let inner_text = &raw[start..end];
            if let Some(expr) = parse_expr_text(inner_text, base_offset + u32::try_from(start).unwrap_or(0) + 1, script, reporter) {
                parts.push(StringPart::Interp(expr));
            }
            continue;
        }
        text.push(c);
    }
    if !text.is_empty() || parts.is_empty() {
        parts.push(StringPart::Text(text));
    }
    parts
}
