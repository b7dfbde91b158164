use nom::{
    branch::alt,
    bytes::complete::take_while1,
    character::complete::{char, multispace0},
    error::{ErrorKind, ParseError},
    multi::separated_list1,
    sequence::delimited,
    IResult,
};
use thiserror::Error;

use super::{
    EqualityOperator, LogicalOperator, RangeOperator, StrictRangeOperator, VersionSpec,
};
use crate::{version::StrictVersion, ParseStrictness, ParseVersionError, Version};

/// An error that occurred while parsing a version specification.
#[allow(missing_docs)]
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum ParseVersionSpecError {
    #[error(transparent)]
    InvalidVersion(#[from] ParseVersionError),

    #[error("invalid operator '{0}'")]
    InvalidOperator(String),

    #[error("'*' is incompatible with the '{0}' operator")]
    GlobVersionIncompatibleWithOperator(String),

    #[error("regex constraints are not supported")]
    RegexConstraintsNotSupported,

    #[error("unterminated unsupported regular expression")]
    UnterminatedRegex,

    #[error("invalid version constraint '{0}'")]
    InvalidConstraint(String),

    #[error("expected a version constraint")]
    ExpectedConstraint,

    #[error("encountered more characters but expected none")]
    ExpectedEof,

    #[error("{0:?}")]
    Nom(ErrorKind),
}

impl<'i> ParseError<&'i str> for ParseVersionSpecError {
    fn from_error_kind(_: &'i str, kind: ErrorKind) -> Self {
        ParseVersionSpecError::Nom(kind)
    }

    fn append(_: &'i str, _: ErrorKind, other: Self) -> Self {
        other
    }
}

/// Returns true if the specified character is the first character of a
/// version constraint.
pub(crate) fn is_start_of_version_constraint(c: char) -> bool {
    matches!(c, '>' | '<' | '=' | '!' | '~')
}

/// The recursive descent parser for version spec expressions. The grammar is
/// `or_group := and_group ('|' and_group)*`,
/// `and_group := atom (',' atom)*`,
/// `atom := '(' or_group ')' | constraint`.
struct SpecParser {
    strictness: ParseStrictness,
}

impl SpecParser {
    fn or_group<'i>(&self, input: &'i str) -> IResult<&'i str, VersionSpec, ParseVersionSpecError> {
        let (rest, mut groups) =
            separated_list1(ws_char('|'), |input| self.and_group(input))(input)?;
        if groups.len() == 1 {
            Ok((rest, groups.pop().expect("one element")))
        } else {
            Ok((rest, VersionSpec::Group(LogicalOperator::Or, groups)))
        }
    }

    fn and_group<'i>(
        &self,
        input: &'i str,
    ) -> IResult<&'i str, VersionSpec, ParseVersionSpecError> {
        let (rest, mut atoms) = separated_list1(ws_char(','), |input| self.atom(input))(input)?;
        if atoms.len() == 1 {
            Ok((rest, atoms.pop().expect("one element")))
        } else {
            Ok((rest, VersionSpec::Group(LogicalOperator::And, atoms)))
        }
    }

    fn atom<'i>(&self, input: &'i str) -> IResult<&'i str, VersionSpec, ParseVersionSpecError> {
        let (input, _) = multispace0(input)?;
        let (rest, spec) = alt((
            delimited(ws_char('('), |input| self.or_group(input), ws_char(')')),
            |input| self.constraint(input),
        ))(input)?;
        let (rest, _) = multispace0(rest)?;
        Ok((rest, spec))
    }

    fn constraint<'i>(
        &self,
        input: &'i str,
    ) -> IResult<&'i str, VersionSpec, ParseVersionSpecError> {
        let (rest, token) = take_while1::<_, _, ParseVersionSpecError>(|c: char| {
            !matches!(c, ',' | '|' | '(' | ')') && !c.is_whitespace()
        })(input)
        .map_err(|_: nom::Err<ParseVersionSpecError>| {
            nom::Err::Error(ParseVersionSpecError::ExpectedConstraint)
        })?;

        match self.parse_constraint(token) {
            Ok(spec) => Ok((rest, spec)),
            Err(e) => Err(nom::Err::Failure(e)),
        }
    }

    /// Parses a single constraint token like `>=1.2.3` or `1.2.*`.
    fn parse_constraint(&self, token: &str) -> Result<VersionSpec, ParseVersionSpecError> {
        let lenient = self.strictness == ParseStrictness::Lenient;

        // Regular expressions were supported by a very old conda version.
        // Recognize them to give a better error than "invalid version".
        if let Some(regex) = token.strip_prefix('^') {
            return Err(if regex.ends_with('$') {
                ParseVersionSpecError::RegexConstraintsNotSupported
            } else {
                ParseVersionSpecError::UnterminatedRegex
            });
        }
        if token.ends_with('$') {
            return Err(ParseVersionSpecError::RegexConstraintsNotSupported);
        }

        // Split off the operator.
        let op_len = token
            .chars()
            .take_while(|c| matches!(c, '=' | '!' | '<' | '>' | '~'))
            .count();
        let (op_str, rest) = token.split_at(op_len);
        let op = match op_str {
            "" => None,
            "==" => Some(Operator::Equals),
            "!=" => Some(Operator::NotEquals),
            "<=" => Some(Operator::LessEquals),
            ">=" => Some(Operator::GreaterEquals),
            "<" => Some(Operator::Less),
            ">" => Some(Operator::Greater),
            "=" => Some(Operator::StartsWith),
            "~=" => Some(Operator::Compatible),
            _ => return Err(ParseVersionSpecError::InvalidOperator(op_str.to_string())),
        };

        // The all-matching constraint: `*` or `*.*`, optionally behind an
        // operator that means the same thing.
        if rest == "*" || rest == "*.*" {
            return match op {
                None => Ok(VersionSpec::Any),
                Some(
                    Operator::GreaterEquals
                    | Operator::LessEquals
                    | Operator::Equals
                    | Operator::StartsWith
                    | Operator::Compatible,
                ) if lenient => {
                    tracing::warn!(
                        "using both a glob and the `{op_str}` operator is superfluous, \
                         interpreting `{token}` as `*`"
                    );
                    Ok(VersionSpec::Any)
                }
                Some(_) => Err(ParseVersionSpecError::GlobVersionIncompatibleWithOperator(
                    op_str.to_string(),
                )),
            };
        }

        // Strip glob suffixes. A single trailing `.*` (or `*`) makes the
        // constraint a prefix match; anything more is only tolerated in
        // lenient mode.
        let mut version_str = rest;
        let trailing_dot = match version_str.strip_suffix('.') {
            Some(stripped) if stripped.ends_with('*') => {
                version_str = stripped;
                true
            }
            _ => false,
        };
        let mut glob_count = 0usize;
        while let Some(stripped) = version_str.strip_suffix(".*") {
            version_str = stripped;
            glob_count += 1;
        }
        if glob_count == 0 {
            if let Some(stripped) = version_str.strip_suffix('*') {
                version_str = stripped;
                glob_count = 1;
            }
        }

        if (trailing_dot || glob_count > 1) && !lenient {
            return Err(ParseVersionSpecError::InvalidConstraint(token.to_string()));
        }
        if version_str.contains('*') {
            // A wildcard in the middle of the version is a leftover of the
            // old regex syntax.
            return Err(ParseVersionSpecError::RegexConstraintsNotSupported);
        }

        let version: Version = version_str
            .parse()
            .map_err(ParseVersionSpecError::InvalidVersion)?;

        let spec = if glob_count > 0 {
            match op {
                // The canonical glob forms.
                None | Some(Operator::StartsWith) => VersionSpec::StrictRange(
                    StrictRangeOperator::StartsWith,
                    StrictVersion(version),
                ),
                Some(Operator::NotEquals) => VersionSpec::StrictRange(
                    StrictRangeOperator::NotStartsWith,
                    StrictVersion(version),
                ),
                // Everything else is deprecated glob usage that only the
                // lenient parser accepts.
                Some(op) if lenient => {
                    tracing::warn!(
                        "using a glob with the relational operator `{op_str}` is deprecated, \
                         interpreting `{token}` accordingly"
                    );
                    match op {
                        Operator::Greater | Operator::GreaterEquals => {
                            VersionSpec::Range(RangeOperator::GreaterEquals, version)
                        }
                        Operator::Less => VersionSpec::Range(RangeOperator::Less, version),
                        Operator::LessEquals => {
                            VersionSpec::Range(RangeOperator::LessEquals, version)
                        }
                        Operator::Equals => VersionSpec::StrictRange(
                            StrictRangeOperator::StartsWith,
                            StrictVersion(version),
                        ),
                        Operator::Compatible => VersionSpec::StrictRange(
                            StrictRangeOperator::Compatible,
                            StrictVersion(version),
                        ),
                        Operator::NotEquals | Operator::StartsWith => unreachable!(),
                    }
                }
                Some(_) => {
                    return Err(ParseVersionSpecError::GlobVersionIncompatibleWithOperator(
                        op_str.to_string(),
                    ))
                }
            }
        } else {
            match op {
                // A bare version is the fuzzy prefix constraint, `=X`.
                None | Some(Operator::StartsWith) => VersionSpec::StrictRange(
                    StrictRangeOperator::StartsWith,
                    StrictVersion(version),
                ),
                Some(Operator::Equals) => VersionSpec::Exact(EqualityOperator::Equals, version),
                Some(Operator::NotEquals) => {
                    VersionSpec::Exact(EqualityOperator::NotEquals, version)
                }
                Some(Operator::Greater) => VersionSpec::Range(RangeOperator::Greater, version),
                Some(Operator::GreaterEquals) => {
                    VersionSpec::Range(RangeOperator::GreaterEquals, version)
                }
                Some(Operator::Less) => VersionSpec::Range(RangeOperator::Less, version),
                Some(Operator::LessEquals) => {
                    VersionSpec::Range(RangeOperator::LessEquals, version)
                }
                Some(Operator::Compatible) => VersionSpec::StrictRange(
                    StrictRangeOperator::Compatible,
                    StrictVersion(version),
                ),
            }
        };

        Ok(spec)
    }
}

/// The operators that can prefix a single version constraint.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Operator {
    Equals,
    NotEquals,
    Greater,
    GreaterEquals,
    Less,
    LessEquals,
    StartsWith,
    Compatible,
}

fn ws_char<'i>(
    c: char,
) -> impl FnMut(&'i str) -> IResult<&'i str, char, ParseVersionSpecError> {
    delimited(multispace0, char(c), multispace0)
}

impl VersionSpec {
    /// Parse a [`VersionSpec`] from a string with the given strictness.
    pub fn from_str(
        source: &str,
        strictness: ParseStrictness,
    ) -> Result<Self, ParseVersionSpecError> {
        let parser = SpecParser { strictness };
        match parser.or_group(source.trim()) {
            Ok(("", spec)) => Ok(spec),
            Ok(_) => Err(ParseVersionSpecError::ExpectedEof),
            Err(nom::Err::Failure(e) | nom::Err::Error(e)) => Err(e),
            Err(_) => unreachable!("not streaming, so no other error possible"),
        }
    }
}
