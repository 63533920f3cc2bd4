//! Lexer for entity and registry artifacts using logos.

use crate::span::Span;
use logos::Logos;

/// Token types shared by entity and registry artifacts.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
#[logos(skip r"//[^\n]*")]
pub enum Token {
    // Declaration keywords
    #[token("namespace")]
    Namespace,
    #[token("use")]
    Use,
    #[token("model")]
    Model,
    #[token("registry")]
    Registry,
    #[token("set")]
    Set,
    #[token("configure")]
    Configure,
    #[token("finalize")]
    Finalize,
    #[token("Collection")]
    Collection,

    // Identifier
    #[regex(r"[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),

    // Punctuation
    #[token(".")]
    Dot,
    #[token(",")]
    Comma,
    #[token(":")]
    Colon,
    #[token(";")]
    Semicolon,
    #[token("?")]
    Question,
    #[token("=")]
    Assign,
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
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,
}

impl Token {
    /// Human-readable description used in parse errors.
    pub fn describe(&self) -> String {
        match self {
            Token::Namespace => "'namespace'".into(),
            Token::Use => "'use'".into(),
            Token::Model => "'model'".into(),
            Token::Registry => "'registry'".into(),
            Token::Set => "'set'".into(),
            Token::Configure => "'configure'".into(),
            Token::Finalize => "'finalize'".into(),
            Token::Collection => "'Collection'".into(),
            Token::Ident(name) => format!("identifier '{}'", name),
            Token::Dot => "'.'".into(),
            Token::Comma => "','".into(),
            Token::Colon => "':'".into(),
            Token::Semicolon => "';'".into(),
            Token::Question => "'?'".into(),
            Token::Assign => "'='".into(),
            Token::At => "'@'".into(),
            Token::LParen => "'('".into(),
            Token::RParen => "')'".into(),
            Token::LBrace => "'{'".into(),
            Token::RBrace => "'}'".into(),
            Token::LBracket => "'['".into(),
            Token::RBracket => "']'".into(),
            Token::Lt => "'<'".into(),
            Token::Gt => "'>'".into(),
        }
    }
}

/// A token with its span in the source.
#[derive(Debug, Clone, PartialEq)]
pub struct SpannedToken {
    pub token: Token,
    pub span: Span,
}

/// Lexer that produces spanned tokens.
///
/// Lexing stops at the first unrecognized character; the offending span is
/// kept in [`Lexer::error`] so the parser can report it instead of a generic
/// end-of-input message.
pub struct Lexer<'source> {
    inner: logos::Lexer<'source, Token>,
    peeked: Option<Option<SpannedToken>>,
    error: Option<Span>,
}

impl<'source> Lexer<'source> {
    /// Create a new lexer for the given source.
    pub fn new(source: &'source str) -> Self {
        Self {
            inner: Token::lexer(source),
            peeked: None,
            error: None,
        }
    }

    /// Peek at the next token without consuming it.
    pub fn peek(&mut self) -> Option<&SpannedToken> {
        if self.peeked.is_none() {
            self.peeked = Some(self.next_inner());
        }
        self.peeked.as_ref().and_then(|o| o.as_ref())
    }

    /// Get the next token.
    pub fn next_token(&mut self) -> Option<SpannedToken> {
        if let Some(peeked) = self.peeked.take() {
            peeked
        } else {
            self.next_inner()
        }
    }

    fn next_inner(&mut self) -> Option<SpannedToken> {
        if self.error.is_some() {
            return None;
        }
        match self.inner.next() {
            Some(Ok(token)) => Some(SpannedToken {
                token,
                span: self.inner.span().into(),
            }),
            Some(Err(())) => {
                self.error = Some(self.inner.span().into());
                None
            }
            None => None,
        }
    }

    /// Span of the first unrecognized input, if lexing stopped early.
    pub fn error(&self) -> Option<Span> {
        self.error
    }

    /// Byte length of the source.
    pub fn source_len(&self) -> usize {
        self.inner.source().len()
    }
}

impl Iterator for Lexer<'_> {
    type Item = SpannedToken;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_token()
    }
}

/// Tokenize a source string into a vector of spanned tokens.
pub fn tokenize(source: &str) -> Vec<SpannedToken> {
    Lexer::new(source).collect()
}
