use nom::{
    IResult,
    branch::alt,
    bytes::complete::{tag, take_while},
    character::complete::{alpha1, alphanumeric1, char, multispace1},
    combinator::{map, opt, recognize, value},
    multi::many0,
    sequence::{pair, preceded},
};

use crate::bail_lex;
use crate::error::{CompilerError, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Keywords
    Namespace,
    Struct,
    Vertex,
    Fragment,
    Pipeline,
    Uniform,
    Texture,
    Instanced,
    Return,

    // Identifiers and literals
    Identifier(String),
    StringLiteral(String),
    IntLiteral(u64),
    FloatLiteral(f64),
    BoolLiteral(bool),

    // Two-character operators
    ColonColon,
    EqEq,
    NotEq,
    LessEq,
    GreaterEq,
    PlusEq,
    MinusEq,
    StarEq,
    SlashEq,
    Arrow,

    // Single-character operators and delimiters
    Colon,
    Semicolon,
    Dot,
    Comma,
    Assign,
    Less,
    Greater,
    Plus,
    Minus,
    Star,
    Slash,
    LeftParen,
    RightParen,
    LeftBrace,
    RightBrace,
}

/// Negative powers of ten used to combine a fractional digit run into a
/// float in one multiply, instead of compounding rounding error with
/// repeated 0.1 multiplications. Indices 0..31; a longer fraction is a
/// fatal lexical error.
const NEG_POW10: [f64; 32] = {
    let mut table = [1.0f64; 32];
    let mut i = 1;
    while i < 32 {
        table[i] = table[i - 1] / 10.0;
        i += 1;
    }
    table
};

fn parse_line_comment(input: &str) -> IResult<&str, &str> {
    preceded(tag("//"), take_while(|c| c != '\n'))(input)
}

fn parse_string_literal(input: &str) -> IResult<&str, Token> {
    // No escape processing; an unterminated string consumes to end of buffer.
    let (rest, _) = char('"')(input)?;
    let (rest, content) = take_while(|c| c != '"')(rest)?;
    let (rest, _) = opt(char('"'))(rest)?;
    Ok((rest, Token::StringLiteral(content.to_string())))
}

fn parse_word(input: &str) -> IResult<&str, Token> {
    map(
        recognize(pair(
            alt((alpha1, tag("_"))),
            many0(alt((alphanumeric1, tag("_")))),
        )),
        |s: &str| match s {
            "namespace" => Token::Namespace,
            "struct" => Token::Struct,
            "vertex" => Token::Vertex,
            "fragment" => Token::Fragment,
            "pipeline" => Token::Pipeline,
            "uniform" => Token::Uniform,
            "texture" => Token::Texture,
            "instanced" => Token::Instanced,
            "return" => Token::Return,
            "true" => Token::BoolLiteral(true),
            "false" => Token::BoolLiteral(false),
            _ => Token::Identifier(s.to_string()),
        },
    )(input)
}

fn parse_operator(input: &str) -> IResult<&str, Token> {
    alt((
        // Two-character operators first; they share prefixes with the
        // single-character fallbacks below.
        alt((
            value(Token::ColonColon, tag("::")),
            value(Token::EqEq, tag("==")),
            value(Token::NotEq, tag("!=")),
            value(Token::LessEq, tag("<=")),
            value(Token::GreaterEq, tag(">=")),
            value(Token::PlusEq, tag("+=")),
            value(Token::MinusEq, tag("-=")),
            value(Token::StarEq, tag("*=")),
            value(Token::SlashEq, tag("/=")),
            value(Token::Arrow, tag("->")),
        )),
        alt((
            value(Token::Colon, char(':')),
            value(Token::Semicolon, char(';')),
            value(Token::Dot, char('.')),
            value(Token::Comma, char(',')),
            value(Token::Assign, char('=')),
            value(Token::Less, char('<')),
            value(Token::Greater, char('>')),
            value(Token::Plus, char('+')),
            value(Token::Minus, char('-')),
            value(Token::Star, char('*')),
            value(Token::Slash, char('/')),
            value(Token::LeftParen, char('(')),
            value(Token::RightParen, char(')')),
            value(Token::LeftBrace, char('{')),
            value(Token::RightBrace, char('}')),
        )),
    ))(input)
}

fn parse_token(input: &str) -> IResult<&str, Token> {
    alt((parse_string_literal, parse_word, parse_operator))(input)
}

/// Numeric literals are lexed by hand rather than through nom so the
/// fractional digit run can be combined through `NEG_POW10` and so an
/// over-long fraction surfaces as a proper lexical error.
fn lex_number(input: &str) -> Result<(Token, &str)> {
    let int_end = input
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(input.len());
    let int_part = &input[..int_end];
    let rest = &input[int_end..];

    if let Some(after_dot) = rest.strip_prefix('.') {
        if after_dot.starts_with(|c: char| c.is_ascii_digit()) {
            let frac_end = after_dot
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(after_dot.len());
            let frac_part = &after_dot[..frac_end];
            if frac_part.len() >= NEG_POW10.len() {
                bail_lex!(
                    "float literal '{}.{}' has {} fractional digits (limit {})",
                    int_part,
                    frac_part,
                    frac_part.len(),
                    NEG_POW10.len() - 1
                );
            }
            let whole: f64 = int_part
                .parse()
                .map_err(|_| CompilerError::LexError(format!("malformed float literal '{}'", int_part)))?;
            let frac: f64 = frac_part
                .parse()
                .map_err(|_| CompilerError::LexError(format!("malformed float literal '.{}'", frac_part)))?;
            let value = whole + frac * NEG_POW10[frac_part.len()];
            if !value.is_finite() {
                bail_lex!("float literal '{}.{}' overflows", int_part, frac_part);
            }
            return Ok((Token::FloatLiteral(value), &after_dot[frac_end..]));
        }
    }

    let value: u64 = int_part
        .parse()
        .map_err(|_| CompilerError::LexError(format!("integer literal '{}' out of range", int_part)))?;
    Ok((Token::IntLiteral(value), rest))
}

pub fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut remaining = input;
    let mut tokens = Vec::new();

    while !remaining.is_empty() {
        if let Ok((rest, _)) = multispace1::<&str, nom::error::Error<&str>>(remaining) {
            remaining = rest;
            continue;
        }
        if let Ok((rest, _)) = parse_line_comment(remaining) {
            remaining = rest;
            continue;
        }
        if remaining.starts_with(|c: char| c.is_ascii_digit()) {
            let (token, rest) = lex_number(remaining)?;
            tokens.push(token);
            remaining = rest;
            continue;
        }
        match parse_token(remaining) {
            Ok((rest, token)) => {
                tokens.push(token);
                remaining = rest;
            }
            Err(_) => {
                let offending = remaining.chars().next().unwrap_or(' ');
                bail_lex!("unrecognized character '{}'", offending);
            }
        }
    }

    Ok(tokens)
}
