// Lexer for swpc .swp loop-IR source files.
//
// Uses the `logos` crate for DFA-based lexing. Whitespace (including
// newlines) and `#` line comments are skipped; statements are terminated by
// `;` or delimited by braces.
//
// Preconditions: input is valid UTF-8.
// Postconditions: returns all tokens with byte-offset spans, plus any lex errors.
// Failure modes: unrecognized characters produce `LexError`; lexing continues.
// Side effects: none.

use logos::Logos;
use std::fmt;

/// Byte-offset span in source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// A lexer error with location.
#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub span: Span,
    pub message: String,
}

/// Result of lexing: tokens plus any errors (non-fatal).
#[derive(Debug)]
pub struct LexResult {
    pub tokens: Vec<(Token, Span)>,
    pub errors: Vec<LexError>,
}

/// swpc token types.
///
/// Identifiers carry no value; use the span to retrieve the text from the
/// source. Element types (`i32`, `f32`, ...) lex as identifiers and are
/// checked by the parser.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+|#[^\n]*")]
pub enum Token {
    // ── Keywords ──
    #[token("buffer")]
    Buffer,
    #[token("alloc")]
    Alloc,
    #[token("for")]
    For,
    #[token("in")]
    In,
    #[token("block")]
    Block,
    #[token("init")]
    Init,
    #[token("update")]
    Update,
    #[token("reduction")]
    Reduction,
    #[token("if")]
    If,

    // ── Symbols ──
    #[token("..")]
    DotDot,
    #[token(":")]
    Colon,
    #[token(";")]
    Semi,
    #[token(",")]
    Comma,
    #[token("=")]
    Equals,
    #[token("@")]
    At,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,

    // ── Literals ──
    /// Unsigned integer literal. Negation is a parser-level unary minus.
    #[regex(r"[0-9]+", parse_int)]
    Int(i64),

    /// String literal with `\"` and `\\` escapes (annotation values).
    #[regex(r#""([^"\\]|\\.)*""#, parse_string)]
    StringLit(String),

    // ── Identifier ──
    /// Identifier: `[a-zA-Z_][a-zA-Z0-9_]*`
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*")]
    Ident,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Buffer => write!(f, "buffer"),
            Token::Alloc => write!(f, "alloc"),
            Token::For => write!(f, "for"),
            Token::In => write!(f, "in"),
            Token::Block => write!(f, "block"),
            Token::Init => write!(f, "init"),
            Token::Update => write!(f, "update"),
            Token::Reduction => write!(f, "reduction"),
            Token::If => write!(f, "if"),
            Token::DotDot => write!(f, ".."),
            Token::Colon => write!(f, ":"),
            Token::Semi => write!(f, ";"),
            Token::Comma => write!(f, ","),
            Token::Equals => write!(f, "="),
            Token::At => write!(f, "@"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::LBrace => write!(f, "{{"),
            Token::RBrace => write!(f, "}}"),
            Token::LBracket => write!(f, "["),
            Token::RBracket => write!(f, "]"),
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::Star => write!(f, "*"),
            Token::Int(v) => write!(f, "{v}"),
            Token::StringLit(s) => write!(f, "\"{s}\""),
            Token::Ident => write!(f, "<ident>"),
        }
    }
}

// ── Callbacks ──

fn parse_int(lex: &mut logos::Lexer<'_, Token>) -> Option<i64> {
    lex.slice().parse().ok()
}

fn parse_string(lex: &mut logos::Lexer<'_, Token>) -> Option<String> {
    let slice = lex.slice();
    let inner = &slice[1..slice.len() - 1]; // strip quotes
    let mut result = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next()? {
                '"' => result.push('"'),
                '\\' => result.push('\\'),
                _ => return None,
            }
        } else {
            result.push(c);
        }
    }
    Some(result)
}

// ── Public API ──

/// Lex a swpc source string into tokens.
///
/// Lexing is non-fatal: errors are collected and the lexer continues past
/// bad characters.
pub fn lex(source: &str) -> LexResult {
    let lexer = Token::lexer(source);
    let mut tokens = Vec::new();
    let mut errors = Vec::new();

    for (result, range) in lexer.spanned() {
        let span = Span {
            start: range.start,
            end: range.end,
        };
        match result {
            Ok(token) => tokens.push((token, span)),
            Err(()) => errors.push(LexError {
                span,
                message: format!("unexpected character: {:?}", &source[span.start..span.end]),
            }),
        }
    }

    LexResult { tokens, errors }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn lex_ok(source: &str) -> Vec<Token> {
        let result = lex(source);
        assert!(
            result.errors.is_empty(),
            "unexpected lex errors: {:?}",
            result.errors
        );
        result.tokens.into_iter().map(|(t, _)| t).collect()
    }

    #[test]
    fn keywords() {
        let tokens = lex_ok("buffer alloc for in block init update reduction if");
        assert_eq!(
            tokens,
            vec![
                Token::Buffer,
                Token::Alloc,
                Token::For,
                Token::In,
                Token::Block,
                Token::Init,
                Token::Update,
                Token::Reduction,
                Token::If,
            ]
        );
    }

    #[test]
    fn keyword_prefix_is_ident() {
        let tokens = lex_ok("block blocks initial");
        assert_eq!(tokens, vec![Token::Block, Token::Ident, Token::Ident]);
    }

    #[test]
    fn range_splits_around_dotdot() {
        let tokens = lex_ok("0..16");
        assert_eq!(tokens, vec![Token::Int(0), Token::DotDot, Token::Int(16)]);
    }

    #[test]
    fn minus_is_separate_from_literal() {
        let tokens = lex_ok("i-1");
        assert_eq!(tokens, vec![Token::Ident, Token::Minus, Token::Int(1)]);
    }

    #[test]
    fn annotation_tokens() {
        let tokens = lex_ok("@software_pipeline_stage = [0, 1]");
        assert_eq!(
            tokens,
            vec![
                Token::At,
                Token::Ident,
                Token::Equals,
                Token::LBracket,
                Token::Int(0),
                Token::Comma,
                Token::Int(1),
                Token::RBracket,
            ]
        );
    }

    #[test]
    fn comments_and_newlines_skipped() {
        let tokens = lex_ok("# header\nbuffer # trailing\n;");
        assert_eq!(tokens, vec![Token::Buffer, Token::Semi]);
    }

    #[test]
    fn string_literal_escapes() {
        let tokens = lex_ok(r#""a\"b""#);
        assert_eq!(tokens, vec![Token::StringLit("a\"b".to_string())]);
    }

    #[test]
    fn unknown_character_reported_and_skipped() {
        let result = lex("buffer $ ;");
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].span, Span { start: 7, end: 8 });
        let tokens: Vec<Token> = result.tokens.into_iter().map(|(t, _)| t).collect();
        assert_eq!(tokens, vec![Token::Buffer, Token::Semi]);
    }
}
