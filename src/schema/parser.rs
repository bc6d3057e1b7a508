//! Field list and key expression parsers

use nom::{
    branch::alt,
    bytes::complete::{tag_no_case, take_while},
    character::complete::{char, digit1, multispace0, multispace1, one_of, satisfy},
    combinator::{all_consuming, map, map_res, opt, recognize, value},
    multi::separated_list1,
    sequence::{delimited, pair, preceded, terminated, tuple},
    IResult,
};
use serde::{Deserialize, Serialize};

use crate::schema::error::{SchemaError, SchemaResult};
use crate::storage::{FieldDescriptor, FieldType};

/// Default width of a memo column when none is given
const DEFAULT_MEMO_WIDTH: u8 = 10;

/// One component of an index key expression
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyPart {
    /// Upper-cased field name
    Field(String),
    /// Quoted text, contributed verbatim
    Literal(String),
}

/// Parse a comma separated field list into validated descriptors
pub fn parse_field_list(input: &str) -> SchemaResult<Vec<FieldDescriptor>> {
    if input.trim().is_empty() {
        return Err(SchemaError::Empty("field list"));
    }

    let raw = match all_consuming(field_list)(input) {
        Ok((_, defs)) => defs,
        Err(e) => return Err(parse_error(input, e)),
    };

    raw.into_iter()
        .map(|(name, field_type, size)| build_field(name, field_type, size))
        .collect()
}

/// Parse `FIELD+FIELD+"literal"` (or a comma separated field list)
pub fn parse_key_expr(input: &str) -> SchemaResult<Vec<KeyPart>> {
    if input.trim().is_empty() {
        return Err(SchemaError::Empty("key expression"));
    }

    let parts = match all_consuming(key_expr)(input) {
        Ok((_, parts)) => parts,
        Err(e) => return Err(parse_error(input, e)),
    };

    // Whitespace-only literals carry no ordering information
    let parts: Vec<KeyPart> = parts
        .into_iter()
        .filter(|p| !matches!(p, KeyPart::Literal(text) if text.trim().is_empty()))
        .collect();

    if !parts.iter().any(|p| matches!(p, KeyPart::Field(_))) {
        return Err(SchemaError::Invalid(format!(
            "key expression '{}' names no fields",
            input.trim()
        )));
    }
    Ok(parts)
}

fn parse_error(input: &str, err: nom::Err<nom::error::Error<&str>>) -> SchemaError {
    match err {
        nom::Err::Error(e) | nom::Err::Failure(e) => {
            let offset = input.len() - e.input.len();
            SchemaError::Parse(format!(
                "unexpected input at column {}: '{}'",
                offset + 1,
                e.input.trim()
            ))
        }
        nom::Err::Incomplete(_) => SchemaError::Parse("incomplete input".into()),
    }
}

type RawField<'a> = (&'a str, FieldType, Option<(u8, Option<u8>)>);

fn build_field(name: &str, field_type: FieldType, size: Option<(u8, Option<u8>)>) -> SchemaResult<FieldDescriptor> {
    let (length, decimals) = match (field_type, size) {
        (FieldType::Character | FieldType::Numeric, Some((len, dec))) => (len, dec.unwrap_or(0)),
        (FieldType::Character | FieldType::Numeric, None) => {
            return Err(SchemaError::Invalid(format!(
                "field {} needs a length",
                name
            )))
        }
        (FieldType::Date, Some((len, _))) => (len, 0),
        (FieldType::Date, None) => (8, 0),
        (FieldType::Logical, Some((len, _))) => (len, 0),
        (FieldType::Logical, None) => (1, 0),
        (FieldType::Memo, size) => (size.map_or(DEFAULT_MEMO_WIDTH, |(len, _)| len), 0),
    };

    FieldDescriptor::new(name, field_type, length, decimals)
        .map_err(|e| SchemaError::Invalid(e.to_string()))
}

// ==================== Field list ====================

fn field_list(input: &str) -> IResult<&str, Vec<RawField<'_>>> {
    terminated(
        separated_list1(char(','), field_def),
        multispace0,
    )(input)
}

fn field_def(input: &str) -> IResult<&str, RawField<'_>> {
    let (input, (_, name, _, field_type, size, _)) = tuple((
        multispace0,
        identifier,
        multispace1,
        field_type,
        opt(alt((paren_size, spaced_size))),
        multispace0,
    ))(input)?;

    Ok((input, (name, field_type, size)))
}

fn identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        satisfy(|c| c.is_ascii_alphabetic() || c == '_'),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_'),
    ))(input)
}

fn field_type(input: &str) -> IResult<&str, FieldType> {
    alt((
        value(FieldType::Character, alt((tag_no_case("CHARACTER"), tag_no_case("CHAR")))),
        value(FieldType::Numeric, tag_no_case("NUMERIC")),
        value(FieldType::Date, tag_no_case("DATE")),
        value(FieldType::Logical, tag_no_case("LOGICAL")),
        value(FieldType::Memo, tag_no_case("MEMO")),
        map(one_of("CcNnFfDdLlMm"), |c| {
            FieldType::from_code(c as u8).unwrap_or(FieldType::Character)
        }),
    ))(input)
}

fn small_number(input: &str) -> IResult<&str, u8> {
    map_res(digit1, str::parse::<u8>)(input)
}

/// `(10)` or `(9,2)`
fn paren_size(input: &str) -> IResult<&str, (u8, Option<u8>)> {
    preceded(
        pair(multispace0, char('(')),
        terminated(
            pair(
                delimited(multispace0, small_number, multispace0),
                opt(delimited(
                    pair(char(','), multispace0),
                    small_number,
                    multispace0,
                )),
            ),
            char(')'),
        ),
    )(input)
}

/// ` 10` or ` 9 2`
fn spaced_size(input: &str) -> IResult<&str, (u8, Option<u8>)> {
    pair(
        preceded(multispace1, small_number),
        opt(preceded(multispace1, small_number)),
    )(input)
}

// ==================== Key expression ====================

fn key_expr(input: &str) -> IResult<&str, Vec<KeyPart>> {
    delimited(
        multispace0,
        separated_list1(
            delimited(multispace0, one_of("+,"), multispace0),
            key_part,
        ),
        multispace0,
    )(input)
}

fn key_part(input: &str) -> IResult<&str, KeyPart> {
    alt((
        map(quoted, |text: &str| KeyPart::Literal(text.to_string())),
        map(identifier, |name: &str| KeyPart::Field(name.to_ascii_uppercase())),
    ))(input)
}

fn quoted(input: &str) -> IResult<&str, &str> {
    alt((
        delimited(char('"'), take_while(|c| c != '"'), char('"')),
        delimited(char('\''), take_while(|c| c != '\''), char('\'')),
    ))(input)
}
