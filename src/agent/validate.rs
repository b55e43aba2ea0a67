//! Static check of conditions and watch expressions before they reach an execution engine.
//!
//! The check is lexical: an expression is split into tokens of the target (JavaScript-like)
//! dialect, brackets must be balanced and no token may introduce a side effect
//! (assignments, increments, `delete`, function or class definitions, statements).
//! Expressions that pass are still evaluated by the engine in side-effect free mode.

use chumsky::error::Rich;
use chumsky::prelude::{any, choice, end, just, recursive};
use chumsky::{extra, IterParser, Parser};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ExpressionError {
    #[error("syntax error: {0}")]
    Compile(String),
    #[error("`{0}` is not allowed in expressions")]
    Disallowed(String),
}

#[derive(Debug, Clone, PartialEq)]
enum Token<'a> {
    Ident(&'a str),
    Number,
    Str,
    Punct(&'a str),
}

pub(crate) type Err<'a> = extra::Err<Rich<'a, char>>;

/// Single char punctuators, brackets are parsed as groups.
const SINGLE_PUNCTUATORS: &str = "<>+-*/%&|^!~?:=.,;";

/// Punctuators which mutate state or introduce new code.
const DISALLOWED_PUNCTUATORS: &[&str] = &[
    "=", "+=", "-=", "*=", "/=", "%=", "**=", "<<=", ">>=", ">>>=", "&=", "|=", "^=", "&&=",
    "||=", "??=", "++", "--", "=>", ";",
];

const DISALLOWED_KEYWORDS: &[&str] = &[
    "delete", "new", "function", "class", "yield", "await", "async", "import", "export", "var",
    "let", "const", "throw", "debugger", "with", "for", "while", "do", "if", "else", "return",
    "try", "catch", "finally", "switch", "case", "break", "continue", "super",
];

/// Operators that can't start an expression.
const BINARY_ONLY: &[&str] = &[
    "*", "/", "%", "**", "==", "!=", "===", "!==", "<", ">", "<=", ">=", "&&", "||", "??", "&",
    "|", "^", "<<", ">>", ">>>", "?", ":", ".", "?.", ",",
];

/// Operators that can't end an expression.
const DANGLING: &[&str] = &[
    "+", "-", "*", "/", "%", "**", "==", "!=", "===", "!==", "<", ">", "<=", ">=", "&&", "||",
    "??", "&", "|", "^", "<<", ">>", ">>>", "?", ":", ".", "?.", ",", "!", "~", "...",
];

/// Check an expression for syntax errors and side effects.
pub fn validate_expression(source: &str) -> Result<(), ExpressionError> {
    let tokens = tokens()
        .padded()
        .then_ignore(end())
        .parse(source)
        .into_result()
        .map_err(|errors| {
            ExpressionError::Compile(errors.first().map(ToString::to_string).unwrap_or_default())
        })?;

    let (first, last) = match (tokens.first(), tokens.last()) {
        (Some(first), Some(last)) => (first, last),
        _ => return Err(ExpressionError::Compile("empty expression".to_string())),
    };

    for token in &tokens {
        match token {
            Token::Punct(p) if DISALLOWED_PUNCTUATORS.contains(p) => {
                return Err(ExpressionError::Disallowed(p.to_string()));
            }
            Token::Ident(ident) if DISALLOWED_KEYWORDS.contains(ident) => {
                return Err(ExpressionError::Disallowed(ident.to_string()));
            }
            _ => {}
        }
    }

    if let Token::Punct(p) = first {
        if BINARY_ONLY.contains(p) {
            return Err(ExpressionError::Compile(format!("unexpected token `{p}`")));
        }
    }
    if let Token::Punct(p) = last {
        if DANGLING.contains(p) {
            return Err(ExpressionError::Compile("unexpected end of input".to_string()));
        }
    }

    Ok(())
}

fn is_ident_start(c: char) -> bool {
    c == '_' || c == '$' || c.is_alphabetic()
}

fn is_ident_part(c: char) -> bool {
    is_ident_start(c) || c.is_alphanumeric()
}

/// JavaScript identifier (`$` and `_` are allowed).
pub(crate) fn identifier<'a>() -> impl Parser<'a, &'a str, &'a str, Err<'a>> + Clone {
    any()
        .filter(|c: &char| is_ident_start(*c))
        .then(any().filter(|c: &char| is_ident_part(*c)).repeated())
        .to_slice()
        .labelled("identifier")
}

fn escape<'a>() -> impl Parser<'a, &'a str, (), Err<'a>> + Clone {
    just('\\').then(any()).ignored()
}

/// Single line string literal, return text between quotes (escapes are kept as is).
pub(crate) fn quoted<'a>(quote: char) -> impl Parser<'a, &'a str, &'a str, Err<'a>> + Clone {
    let plain = any()
        .filter(move |c: &char| *c != quote && *c != '\\' && *c != '\n')
        .ignored();
    choice((escape(), plain))
        .repeated()
        .to_slice()
        .delimited_by(just(quote), just(quote))
        .labelled("string literal")
}

fn number<'a>() -> impl Parser<'a, &'a str, Token<'a>, Err<'a>> + Clone {
    let digit = || any().filter(|c: &char| c.is_ascii_digit());
    choice((digit().ignored(), just('.').then(digit()).ignored()))
        .then(
            any()
                .filter(|c: &char| c.is_ascii_alphanumeric() || *c == '.' || *c == '_')
                .repeated(),
        )
        .to(Token::Number)
        .labelled("number")
}

fn punctuator<'a>() -> impl Parser<'a, &'a str, &'a str, Err<'a>> + Clone {
    let long = choice((
        just(">>>="),
        just("..."),
        just("==="),
        just("!=="),
        just("**="),
        just("<<="),
        just(">>="),
        just(">>>"),
        just("&&="),
        just("||="),
        just("??="),
    ));
    let double = choice((
        just("=>"),
        just("=="),
        just("!="),
        just("<="),
        just(">="),
        just("&&"),
        just("||"),
        just("??"),
        just("?."),
        just("++"),
        just("--"),
        just("+="),
        just("-="),
        just("*="),
        just("/="),
        just("%="),
        just("&="),
        just("|="),
        just("^="),
        just("**"),
        just("<<"),
        just(">>"),
    ));
    let single = any().filter(|c: &char| SINGLE_PUNCTUATORS.contains(*c));

    choice((long.ignored(), double.ignored(), single.ignored()))
        .to_slice()
        .labelled("punctuator")
}

/// Token stream of an expression. Brackets must be balanced, template literal
/// substitutions are tokenized as nested expressions.
fn tokens<'a>() -> impl Parser<'a, &'a str, Vec<Token<'a>>, Err<'a>> + Clone {
    recursive(|tokens| {
        let group = |open: char, close: char| {
            just(open)
                .to_slice()
                .then(tokens.clone().padded())
                .then(just(close).to_slice())
                .map(|((open, inner), close): ((&'a str, Vec<Token<'a>>), &'a str)| {
                    let mut group = Vec::with_capacity(inner.len() + 2);
                    group.push(Token::Punct(open));
                    group.extend(inner);
                    group.push(Token::Punct(close));
                    group
                })
        };

        let substitution = tokens
            .clone()
            .padded()
            .delimited_by(just("${"), just('}'))
            .map(Some);
        let text = choice((
            escape(),
            any().filter(|c: &char| *c != '`' && *c != '\\').ignored(),
        ))
        .to(None);
        let template = choice((substitution, text))
            .repeated()
            .collect::<Vec<Option<Vec<Token<'a>>>>>()
            .delimited_by(just('`'), just('`'))
            .map(|parts| {
                let mut template = vec![Token::Str];
                template.extend(parts.into_iter().flatten().flatten());
                template.push(Token::Str);
                template
            })
            .labelled("template literal");

        let single = choice((
            quoted('"').to(Token::Str),
            quoted('\'').to(Token::Str),
            number(),
            identifier().map(Token::Ident),
            punctuator().map(Token::Punct),
        ))
        .map(|token| vec![token]);

        choice((group('(', ')'), group('[', ']'), group('{', '}'), template, single))
            .padded()
            .repeated()
            .collect::<Vec<Vec<Token<'a>>>>()
            .map(|parts| parts.into_iter().flatten().collect::<Vec<_>>())
    })
}
