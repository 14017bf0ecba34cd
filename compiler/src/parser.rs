// Parser for textual dataflow IR (.dfir) files.
//
// Parses a token stream (from the lexer) into an AST. Uses chumsky
// combinators; loop bodies nest through a recursive statement parser.
//
// Preconditions: input is a valid token stream from `lexer::lex()`.
// Postconditions: returns an AST plus any parse errors (non-fatal).
// Failure modes: syntax errors produce `Rich` diagnostics; parsing continues.
// Side effects: none.

use chumsky::input::{Stream, ValueInput};
use chumsky::prelude::*;
use chumsky::span::SimpleSpan;

use crate::ast::*;
use crate::ir::Conversion;
use crate::lexer::Token;

/// Result of parsing: AST plus any errors.
#[derive(Debug)]
pub struct ParseResult {
    pub program: Option<Program>,
    pub errors: Vec<Rich<'static, Token, SimpleSpan>>,
}

/// Parse an IR source string. Lexes then parses.
///
/// Returns an AST (if parsing succeeded) plus any errors.
pub fn parse(source: &str) -> ParseResult {
    let lex_result = crate::lexer::lex(source);
    let len = source.len();

    // Convert lexer output to chumsky stream.
    let token_iter = lex_result.tokens.into_iter().map(|(tok, span)| {
        let cspan: SimpleSpan = (span.start..span.end).into();
        (tok, cspan)
    });
    let eoi: SimpleSpan = (len..len).into();
    let stream = Stream::from_iter(token_iter).map(eoi, |(t, s): (_, _)| (t, s));

    let parser = program_parser(source);
    let (program, parse_errors) = parser.parse(stream).into_output_errors();

    // Merge lex errors + parse errors.
    let mut all_errors: Vec<Rich<'static, Token, SimpleSpan>> = lex_result
        .errors
        .into_iter()
        .map(|e| {
            let span: SimpleSpan = (e.span.start..e.span.end).into();
            Rich::custom(span, e.message)
        })
        .collect();
    all_errors.extend(parse_errors.into_iter().map(|e| e.into_owned()));

    ParseResult {
        program,
        errors: all_errors,
    }
}

// ── Main parser builder ──
//
// All grammar rules are built inside `program_parser` so that the `source`
// reference is captured once and shared by all combinators.

fn program_parser<'tokens, 'src: 'tokens, I>(
    source: &'src str,
) -> impl Parser<'tokens, I, Program, extra::Err<Rich<'tokens, Token, SimpleSpan>>> + 'src
where
    'tokens: 'src,
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    // ── Newlines ──

    let nl = just(Token::Newline).repeated().ignored();

    // ── Leaves ──

    let ident = just(Token::Ident).map_with(move |_, e| {
        let span: SimpleSpan = e.span();
        Ident {
            name: source[span.start()..span.end()].to_string(),
            span,
        }
    });

    let value_ref = select! {
        Token::ValueName(name) = e => ValueRef { name, span: e.span() },
    };

    let int = select! {
        Token::Int(n) => n,
    };

    let ty = select! {
        Token::ShapedType(lit) = e => TypeExpr::Shaped { lit, span: e.span() },
    }
    .or(ident.clone().map(TypeExpr::Named));

    // ── Attribute dictionary: '{' (IDENT '=' attr_value),* '}' ──

    let attr_value = select! {
        Token::Int(n) => AttrValue::Int(n),
        Token::True => AttrValue::Bool(true),
        Token::False => AttrValue::Bool(false),
        Token::StringLit(s) => AttrValue::Str(s),
    };

    let attr_dict = ident
        .clone()
        .then_ignore(just(Token::Equals))
        .then(attr_value)
        .map_with(|(key, value), e| AttrEntry {
            key,
            value,
            span: e.span(),
        })
        .separated_by(just(Token::Comma))
        .collect::<Vec<_>>()
        .delimited_by(just(Token::LBrace), just(Token::RBrace));

    let operands = value_ref
        .clone()
        .separated_by(just(Token::Comma))
        .collect::<Vec<_>>();

    let results = value_ref
        .clone()
        .separated_by(just(Token::Comma))
        .at_least(1)
        .collect::<Vec<_>>()
        .then_ignore(just(Token::Equals));

    // ── Statements (recursive through loop bodies) ──

    let stmt = recursive(|stmt| {
        let block = nl
            .clone()
            .ignore_then(
                stmt.separated_by(just(Token::Newline).repeated().at_least(1))
                    .allow_trailing()
                    .collect::<Vec<_>>(),
            )
            .then_ignore(nl.clone())
            .delimited_by(just(Token::LBrace), just(Token::RBrace));

        let alloc = just(Token::Alloc)
            .to(false)
            .or(just(Token::Alloca).to(true))
            .then_ignore(just(Token::Colon))
            .then(ty.clone())
            .map(|(stack, ty)| OpExpr::Alloc { stack, ty });

        let constant = just(Token::Constant)
            .ignore_then(int)
            .then_ignore(just(Token::Colon))
            .then(ty.clone())
            .map(|(value, ty)| OpExpr::Constant { value, ty });

        let convert = just(Token::ToTensor)
            .to(Conversion::ToTensor)
            .or(just(Token::ToMemref).to(Conversion::ToMemref))
            .then(value_ref.clone())
            .then_ignore(just(Token::Colon))
            .then(ty.clone())
            .map(|((conversion, operand), ty)| OpExpr::Convert {
                conversion,
                operand,
                ty,
            });

        let ret = just(Token::Return)
            .ignore_then(operands.clone())
            .map(|operands| OpExpr::Return { operands });

        let op_name = select! {
            Token::StringLit(s) => s,
        };

        let compute = just(Token::Op)
            .ignore_then(op_name)
            .then(
                operands
                    .clone()
                    .delimited_by(just(Token::LParen), just(Token::RParen)),
            )
            .then(
                just(Token::Colon)
                    .ignore_then(
                        ty.clone()
                            .separated_by(just(Token::Comma))
                            .at_least(1)
                            .collect::<Vec<_>>(),
                    )
                    .or_not(),
            )
            .map(|((name, operands), types)| OpExpr::Compute {
                name,
                operands,
                types: types.unwrap_or_default(),
            });

        let load = just(Token::Load)
            .ignore_then(value_ref.clone())
            .then_ignore(just(Token::Colon))
            .then(ty.clone())
            .map(|(memref, ty)| OpExpr::Load { memref, ty });

        let store = just(Token::Store)
            .ignore_then(value_ref.clone())
            .then_ignore(just(Token::Comma))
            .then(value_ref.clone())
            .map(|(value, memref)| OpExpr::Store { value, memref });

        let copy = just(Token::Copy)
            .ignore_then(
                value_ref
                    .clone()
                    .separated_by(just(Token::Comma))
                    .at_least(1)
                    .at_most(2)
                    .collect::<Vec<_>>(),
            )
            .then(just(Token::Colon).ignore_then(ty.clone()).or_not())
            .map(|(operands, ty)| OpExpr::Copy { operands, ty });

        let for_loop = just(Token::For)
            .ignore_then(value_ref.clone())
            .then_ignore(just(Token::Equals))
            .then(int)
            .then_ignore(just(Token::To))
            .then(int)
            .then(block)
            .map(|(((iv, lower), upper), body)| OpExpr::Loop {
                iv,
                lower,
                upper,
                body,
            });

        results
            .clone()
            .or_not()
            .then(choice((
                alloc, constant, convert, ret, compute, load, store, copy, for_loop,
            )))
            .then(attr_dict.clone().or_not())
            .map_with(|((results, op), attrs), e| Stmt {
                results: results.unwrap_or_default(),
                op,
                attrs: attrs.unwrap_or_default(),
                span: e.span(),
            })
    });

    // ── Function definition ──

    let arg_decl = value_ref
        .clone()
        .then_ignore(just(Token::Colon))
        .then(ty.clone())
        .map(|(value, ty)| ArgDecl { value, ty });

    let symbol = select! {
        Token::Symbol(name) = e => Ident { name, span: e.span() },
    };

    let func_body = nl
        .clone()
        .ignore_then(
            stmt.separated_by(just(Token::Newline).repeated().at_least(1))
                .allow_trailing()
                .collect::<Vec<_>>(),
        )
        .then_ignore(nl.clone())
        .delimited_by(just(Token::LBrace), just(Token::RBrace));

    let func = just(Token::Func)
        .ignore_then(symbol)
        .then(
            arg_decl
                .separated_by(just(Token::Comma))
                .collect::<Vec<_>>()
                .delimited_by(just(Token::LParen), just(Token::RParen)),
        )
        .then(just(Token::Attributes).ignore_then(attr_dict).or_not())
        .then(func_body)
        .map_with(|(((name, args), attrs), body), e| {
            Item::Func(FuncDef {
                name,
                args,
                attrs: attrs.unwrap_or_default(),
                body,
                span: e.span(),
            })
        });

    // ── Set directive ──

    let set_value = select! {
        Token::Int(n) = e => SetValue::Int(n, e.span()),
        Token::True = e => SetValue::Bool(true, e.span()),
        Token::False = e => SetValue::Bool(false, e.span()),
        Token::StringLit(s) = e => SetValue::Str(s, e.span()),
    }
    .or(ident.clone().map(SetValue::Ident));

    let set_stmt = just(Token::Set)
        .ignore_then(ident)
        .then_ignore(just(Token::Equals))
        .then(set_value)
        .map_with(|(name, value), e| {
            Item::Set(SetStmt {
                name,
                value,
                span: e.span(),
            })
        });

    // ── Program ──

    nl.clone()
        .ignore_then(
            choice((set_stmt, func))
                .separated_by(just(Token::Newline).repeated().at_least(1))
                .allow_trailing()
                .collect::<Vec<_>>(),
        )
        .then_ignore(nl)
        .map_with(|items, e| Program {
            items,
            span: e.span(),
        })
}

// ── Tests ──
