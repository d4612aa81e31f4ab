//! Walks a script's tokens once, recording the source ranges of every
//! top-level declaration without parsing their bodies, and collects the
//! script's top-level `import` paths.

use crate::diagnostics::{Location, Reporter};
use crate::lexer::{self, Keyword, Token, TokenKind};
use crate::script::{Script, ScriptId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclKind {
    Function,
    Struct,
    Enum,
    Arg,
    Global,
}

/// A byte-offset range (start inclusive, end exclusive) into a script's text.
#[derive(Debug, Clone, Copy)]
pub struct ByteRange {
    pub start: u32,
    pub end: u32,
}

/// A top-level declaration found by the scanner; its body is not parsed
/// until the IR Builder asks for it.
#[derive(Debug, Clone)]
pub struct CodeDefinition {
    pub kind: DeclKind,
    pub identifier: String,
    pub script: ScriptId,
    pub location: Location,
    pub params: Option<ByteRange>,
    pub returns: Option<ByteRange>,
    pub body: Option<ByteRange>,
    pub whole: ByteRange,
    /// For `DeclKind::Global` only: `true` for a `name :: expr;` constant
    /// binding (body is a bare expression), `false` for a `name: Type [=
    /// expr];` mutable global (body is `Type [= expr]`).
    pub is_constant: bool,
}

/// Result of scanning one script.
#[derive(Debug, Default)]
pub struct ScanResult {
    pub imports: Vec<String>,
    pub definitions: Vec<CodeDefinition>,
}

/// Walks `script`'s tokens, reporting bracket-mismatched declarations to
/// `reporter` and skipping past them so scanning continues.
#[must_use]
pub fn scan(script: &Script, reporter: &Reporter) -> ScanResult {
    let mut result = ScanResult::default();
    let tokens = match lexer::tokenize(&script.text, 0, true) {
        Ok(tokens) => tokens,
        Err(err) => {
            reporter.error(Location::new(script.id, err.span.start), err.message);
            return result;
        }
    };
    let mut cursor = Cursor { tokens: &tokens, pos: 0 };

    while !cursor.at_eof() {
        if matches!(cursor.peek().kind, TokenKind::Keyword(Keyword::Import)) {
            cursor.advance();
            if matches!(cursor.peek().kind, TokenKind::StringLiteral) {
                result.imports.push(cursor.advance().text);
            }
            cursor.skip_one(&TokenKind::Semicolon);
            continue;
        }

        if matches!(cursor.peek().kind, TokenKind::Identifier) && matches!(cursor.peek_at(1).kind, TokenKind::ColonColon) {
            let identifier_token = cursor.advance();
            cursor.advance(); // `::`
            let identifier = identifier_token.text;
            let location = Location::new(script.id, identifier_token.span.start);

            match scan_declaration(&mut cursor, script.id, &identifier, location, reporter) {
                Some(definition) => result.definitions.push(definition),
                None => {
                    reporter.error(location, format!("malformed declaration for '{identifier}'"));
                    cursor.skip_to_top_level_boundary();
                }
            }
            continue;
        }

        if matches!(cursor.peek().kind, TokenKind::Identifier) {
            // Top-level mutable object definition: `name: Type [= expr];`.
            let identifier_token = cursor.advance();
            if !cursor.skip_one(&TokenKind::Colon) {
                reporter.error(Location::new(script.id, identifier_token.span.start), "expected ':' or '::' after top-level name");
                cursor.skip_to_top_level_boundary();
                continue;
            }
            let start = cursor.peek().span.start;
            if !cursor.skip_until_top_level(&TokenKind::Semicolon) {
                reporter.error(Location::new(script.id, identifier_token.span.start), "unterminated top-level definition");
                continue;
            }
            let end = cursor.peek().span.start;
            cursor.advance(); // `;`
            result.definitions.push(CodeDefinition {
                kind: DeclKind::Global,
                identifier: identifier_token.text,
                script: script.id,
                location: Location::new(script.id, identifier_token.span.start),
                params: None,
                returns: None,
                body: Some(ByteRange { start, end }),
                whole: ByteRange { start: identifier_token.span.start, end },
                is_constant: false,
            });
            continue;
        }

        cursor.advance();
    }

    result
}

fn scan_declaration(
    cursor: &mut Cursor<'_>,
    script: ScriptId,
    identifier: &str,
    location: Location,
    reporter: &Reporter,
) -> Option<CodeDefinition> {
    match cursor.peek().kind {
        TokenKind::Keyword(Keyword::Func) => {
            cursor.advance();
            if !matches!(cursor.peek().kind, TokenKind::LParen) {
                return None;
            }
            let params = cursor.fetch_balanced(TokenKind::LParen, TokenKind::RParen)?;
            let returns = if matches!(cursor.peek().kind, TokenKind::Arrow) {
                cursor.advance();
                let start = cursor.peek().span.start;
                cursor.skip_until_top_level(&TokenKind::LBrace);
                let end = cursor.peek().span.start;
                Some(ByteRange { start, end })
            } else {
                None
            };
            if !matches!(cursor.peek().kind, TokenKind::LBrace) {
                return None;
            }
            let whole_start = params.start;
            let body = cursor.fetch_balanced(TokenKind::LBrace, TokenKind::RBrace)?;
            Some(CodeDefinition {
                kind: DeclKind::Function,
                identifier: identifier.to_string(),
                script,
                location,
                params: Some(params),
                returns,
                body: Some(body),
                whole: ByteRange { start: whole_start, end: body.end },
                is_constant: false,
            })
        }
        TokenKind::Keyword(Keyword::Struct) => {
            cursor.advance();
            if !matches!(cursor.peek().kind, TokenKind::LBrace) {
                return None;
            }
            let body = cursor.fetch_balanced(TokenKind::LBrace, TokenKind::RBrace)?;
            Some(CodeDefinition {
                kind: DeclKind::Struct,
                identifier: identifier.to_string(),
                script,
                location,
                params: None,
                returns: None,
                body: Some(body),
                whole: body,
                is_constant: false,
            })
        }
        TokenKind::Keyword(Keyword::Enum) => {
            cursor.advance();
            if !matches!(cursor.peek().kind, TokenKind::LBrace) {
                return None;
            }
            let body = cursor.fetch_balanced(TokenKind::LBrace, TokenKind::RBrace)?;
            Some(CodeDefinition {
                kind: DeclKind::Enum,
                identifier: identifier.to_string(),
                script,
                location,
                params: None,
                returns: None,
                body: Some(body),
                whole: body,
                is_constant: false,
            })
        }
        TokenKind::Keyword(Keyword::Arg) => {
            cursor.advance();
            let returns = if matches!(cursor.peek().kind, TokenKind::Arrow) {
                cursor.advance();
                let start = cursor.peek().span.start;
                cursor.skip_until_top_level(&TokenKind::LBrace);
                let end = cursor.peek().span.start;
                Some(ByteRange { start, end })
            } else {
                None
            };
            if !matches!(cursor.peek().kind, TokenKind::LBrace) {
                return None;
            }
            let whole_start = returns.map_or_else(|| cursor.peek().span.start, |r| r.start);
            let body = cursor.fetch_balanced(TokenKind::LBrace, TokenKind::RBrace)?;
            Some(CodeDefinition {
                kind: DeclKind::Arg,
                identifier: identifier.to_string(),
                script,
                location,
                params: None,
                returns,
                body: Some(body),
                whole: ByteRange { start: whole_start, end: body.end },
                is_constant: false,
            })
        }
        _ => {
            // `name :: expr;` — a constant global.
            let start = cursor.peek().span.start;
            if !cursor.skip_until_top_level(&TokenKind::Semicolon) {
                let _ = reporter;
                return None;
            }
            let end = cursor.peek().span.start;
            cursor.advance();
            Some(CodeDefinition {
                kind: DeclKind::Global,
                identifier: identifier.to_string(),
                script,
                location,
                params: None,
                returns: None,
                body: Some(ByteRange { start, end }),
                whole: ByteRange { start, end },
                is_constant: true,
            })
        }
    }
}

struct Cursor<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn peek(&self) -> &Token {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> &Token {
        self.tokens.get(self.pos + offset).unwrap_or_else(|| self.tokens.last().expect("token stream always has Eof"))
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

    fn skip_one(&mut self, kind: &TokenKind) -> bool {
        if std::mem::discriminant(&self.peek().kind) == std::mem::discriminant(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Advances past `open` through its matching `close`, returning the
    /// byte range of the *inner* content (excluding both brackets).
    fn fetch_balanced(&mut self, open: TokenKind, close: TokenKind) -> Option<ByteRange> {
        if std::mem::discriminant(&self.peek().kind) != std::mem::discriminant(&open) {
            return None;
        }
        self.advance();
        let start = self.peek().span.start;
        let mut depth = 1i32;
        loop {
            if self.at_eof() {
                return None;
            }
            if std::mem::discriminant(&self.peek().kind) == std::mem::discriminant(&open) {
                depth += 1;
            } else if std::mem::discriminant(&self.peek().kind) == std::mem::discriminant(&close) {
                depth -= 1;
                if depth == 0 {
                    let end = self.peek().span.start;
                    self.advance();
                    return Some(ByteRange { start, end });
                }
            }
            self.advance();
        }
    }

    /// Advances, tracking bracket depth, until `sentinel` is found at depth
    /// zero (without consuming it). Returns `false` if EOF was hit first.
    fn skip_until_top_level(&mut self, sentinel: &TokenKind) -> bool {
        let mut depth = 0i32;
        loop {
            if self.at_eof() {
                return false;
            }
            if std::mem::discriminant(&self.peek().kind) == std::mem::discriminant(sentinel) && depth == 0 {
                return true;
            }
            match self.peek().kind {
                TokenKind::LParen | TokenKind::LBracket | TokenKind::LBrace => depth += 1,
                TokenKind::RParen | TokenKind::RBracket | TokenKind::RBrace => depth -= 1,
                _ => {}
            }
            self.advance();
        }
    }

    /// Error recovery: skip tokens until a semicolon or a brace-balanced
    /// point is reached, so a malformed declaration does not desynchronise
    /// scanning of the rest of the file.
    fn skip_to_top_level_boundary(&mut self) {
        let mut depth = 0i32;
        loop {
            if self.at_eof() {
                return;
            }
            match self.peek().kind {
                TokenKind::LBrace => depth += 1,
                TokenKind::RBrace => {
                    depth -= 1;
                    if depth <= 0 {
                        self.advance();
                        return;
                    }
                }
                TokenKind::Semicolon if depth == 0 => {
                    self.advance();
                    return;
                }
                _ => {}
            }
            self.advance();
        }
    }
}
