// Lexer for textual dataflow IR (.dfir) files.
//
// Tokenizes region source: `set` directives, `func` definitions and the node
// forms understood by `parser`. Uses the `logos` crate for DFA-based lexing.
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

/// A `memref<...>` or `tensor<...>` type literal, split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapedLit {
    pub memref: bool,
    pub dims: Vec<Option<u64>>,
    pub elem: String,
}

/// IR token types.
///
/// Keywords and symbols are matched as fixed strings. Value names (`%x`) and
/// symbols (`@f`) carry their text without the sigil. Plain identifiers carry
/// no value; use the span to retrieve the text from the source.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r]+|#[^\n]*")]
pub enum Token {
    // ── Keywords ──
    #[token("func")]
    Func,
    #[token("set")]
    Set,
    #[token("attributes")]
    Attributes,
    #[token("for")]
    For,
    #[token("to")]
    To,
    #[token("alloc")]
    Alloc,
    #[token("alloca")]
    Alloca,
    #[token("constant")]
    Constant,
    #[token("op")]
    Op,
    #[token("load")]
    Load,
    #[token("store")]
    Store,
    #[token("copy")]
    Copy,
    #[token("return")]
    Return,
    #[token("to_tensor")]
    ToTensor,
    #[token("to_memref")]
    ToMemref,
    #[token("true")]
    True,
    #[token("false")]
    False,

    // ── Symbols ──
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token(",")]
    Comma,
    #[token("=")]
    Equals,
    #[token(":")]
    Colon,

    // ── Literals ──
    /// Shaped type literal (e.g. `memref<4x?xf32>`). Must win over the
    /// `memref` identifier prefix, which logos guarantees by longest match.
    #[regex(r"(memref|tensor)<([0-9]+x|\?x)*[a-zA-Z_][a-zA-Z0-9_]*>", parse_shaped)]
    ShapedType(ShapedLit),

    #[regex(r"-?[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    Int(i64),

    /// String literal with `\"` and `\\` escapes.
    #[regex(r#""([^"\\]|\\.)*""#, parse_string)]
    StringLit(String),

    /// SSA value name, e.g. `%buf` → `buf`.
    #[regex(r"%[a-zA-Z0-9_]+", |lex| lex.slice()[1..].to_string())]
    ValueName(String),

    /// Function symbol, e.g. `@kernel` → `kernel`.
    #[regex(r"@[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice()[1..].to_string())]
    Symbol(String),

    // ── Identifier ──
    /// Identifier: `[a-zA-Z_][a-zA-Z0-9_]*` (scalar types, attribute keys, set names).
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*")]
    Ident,

    // ── Structure ──
    /// One or more newlines (significant: statement terminator).
    #[regex(r"\n+")]
    Newline,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Func => write!(f, "func"),
            Token::Set => write!(f, "set"),
            Token::Attributes => write!(f, "attributes"),
            Token::For => write!(f, "for"),
            Token::To => write!(f, "to"),
            Token::Alloc => write!(f, "alloc"),
            Token::Alloca => write!(f, "alloca"),
            Token::Constant => write!(f, "constant"),
            Token::Op => write!(f, "op"),
            Token::Load => write!(f, "load"),
            Token::Store => write!(f, "store"),
            Token::Copy => write!(f, "copy"),
            Token::Return => write!(f, "return"),
            Token::ToTensor => write!(f, "to_tensor"),
            Token::ToMemref => write!(f, "to_memref"),
            Token::True => write!(f, "true"),
            Token::False => write!(f, "false"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::LBrace => write!(f, "{{"),
            Token::RBrace => write!(f, "}}"),
            Token::Comma => write!(f, ","),
            Token::Equals => write!(f, "="),
            Token::Colon => write!(f, ":"),
            Token::ShapedType(lit) => {
                write!(f, "{}<", if lit.memref { "memref" } else { "tensor" })?;
                for d in &lit.dims {
                    match d {
                        Some(n) => write!(f, "{n}x")?,
                        None => write!(f, "?x")?,
                    }
                }
                write!(f, "{}>", lit.elem)
            }
            Token::Int(v) => write!(f, "{v}"),
            Token::StringLit(s) => write!(f, "\"{s}\""),
            Token::ValueName(n) => write!(f, "%{n}"),
            Token::Symbol(n) => write!(f, "@{n}"),
            Token::Ident => write!(f, "<ident>"),
            Token::Newline => write!(f, "<newline>"),
        }
    }
}

// ── Callbacks ──

fn parse_shaped(lex: &mut logos::Lexer<'_, Token>) -> Option<ShapedLit> {
    let slice = lex.slice();
    let open = slice.find('<')?;
    let memref = &slice[..open] == "memref";
    let inner = &slice[open + 1..slice.len() - 1];
    let mut parts: Vec<&str> = inner.split('x').collect();
    // The element type never contains a digit-only or `?` part, but it may
    // itself contain an `x` (e.g. `index`), so re-join everything after the
    // last dimension.
    let mut dims = Vec::new();
    let mut consumed = 0;
    for part in &parts {
        if *part == "?" {
            dims.push(None);
        } else if !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit()) {
            dims.push(Some(part.parse().ok()?));
        } else {
            break;
        }
        consumed += 1;
    }
    let elem = parts.split_off(consumed).join("x");
    if elem.is_empty() {
        return None;
    }
    Some(ShapedLit { memref, dims, elem })
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

/// Lex an IR source string into tokens.
///
/// Returns all successfully parsed tokens together with any errors for
/// unrecognised characters. Lexing is non-fatal: errors are collected and
/// the lexer continues past bad characters.
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

    /// Helper: lex and assert no errors, return token list.
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
        let tokens = lex_ok("func set attributes for to alloc alloca constant op load store copy return");
        assert_eq!(
            tokens,
            vec![
                Token::Func,
                Token::Set,
                Token::Attributes,
                Token::For,
                Token::To,
                Token::Alloc,
                Token::Alloca,
                Token::Constant,
                Token::Op,
                Token::Load,
                Token::Store,
                Token::Copy,
                Token::Return,
            ]
        );
    }

    #[test]
    fn keyword_prefixes_are_identifiers() {
        // `total` is an identifier, `to_tensor` a keyword, not `to` + rest
        let tokens = lex_ok("total to_tensor format");
        assert_eq!(tokens, vec![Token::Ident, Token::ToTensor, Token::Ident]);
    }

    #[test]
    fn value_names_and_symbols() {
        let tokens = lex_ok("%0 %buf @kernel");
        assert_eq!(
            tokens,
            vec![
                Token::ValueName("0".into()),
                Token::ValueName("buf".into()),
                Token::Symbol("kernel".into()),
            ]
        );
    }

    #[test]
    fn shaped_types() {
        let tokens = lex_ok("memref<16x?xf32> tensor<i8> memref<4xindex>");
        assert_eq!(
            tokens,
            vec![
                Token::ShapedType(ShapedLit {
                    memref: true,
                    dims: vec![Some(16), None],
                    elem: "f32".into(),
                }),
                Token::ShapedType(ShapedLit {
                    memref: false,
                    dims: vec![],
                    elem: "i8".into(),
                }),
                Token::ShapedType(ShapedLit {
                    memref: true,
                    dims: vec![Some(4)],
                    elem: "index".into(),
                }),
            ]
        );
    }

    #[test]
    fn literals() {
        let tokens = lex_ok("-3 42 \"conv\\\"2d\" true false");
        assert_eq!(
            tokens,
            vec![
                Token::Int(-3),
                Token::Int(42),
                Token::StringLit("conv\"2d".into()),
                Token::True,
                Token::False,
            ]
        );
    }

    #[test]
    fn comments_and_newlines() {
        let tokens = lex_ok("set a = 1 # trailing\n\n\nfunc");
        assert_eq!(
            tokens,
            vec![
                Token::Set,
                Token::Ident,
                Token::Equals,
                Token::Int(1),
                Token::Newline,
                Token::Func,
            ]
        );
    }

    #[test]
    fn unknown_character_is_reported() {
        let result = lex("op $");
        assert_eq!(result.tokens.len(), 1);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].span, Span { start: 3, end: 4 });
    }
}
