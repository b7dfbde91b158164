use std::{
    error::Error,
    fmt::{Display, Formatter},
    num::ParseIntError,
    str::FromStr,
};

use nom::{
    bytes::complete::take_while1,
    character::complete::{char, digit1},
    combinator::opt,
    error::{ErrorKind, FromExternalError, ParseError},
    sequence::terminated,
    IResult,
};
use smallvec::smallvec;
use thiserror::Error;

use super::{Component, Segment, StrictVersion, Version};

/// An error that occurred during parsing of a string to a version.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ParseVersionError {
    /// The original string that was the input of the parser
    pub version: String,

    /// The type of parse error that occurred
    pub kind: ParseVersionErrorKind,
}

impl Display for ParseVersionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "malformed version string '{}': {}",
            &self.version, &self.kind
        )
    }
}

impl Error for ParseVersionError {}

impl ParseVersionError {
    /// Create a new parse error
    pub fn new(text: impl Into<String>, kind: ParseVersionErrorKind) -> Self {
        Self {
            version: text.into(),
            kind,
        }
    }
}

/// The type of parse error that occurred when parsing a version string.
#[derive(Debug, Eq, PartialEq, Clone, Error)]
pub enum ParseVersionErrorKind {
    /// The string was empty
    #[error("empty string")]
    Empty,
    /// The epoch was not an integer value
    #[error("epoch is not a number")]
    EpochMustBeInteger(ParseIntError),
    /// The string contained an invalid numeral
    #[error("invalid number")]
    InvalidNumeral(ParseIntError),
    /// Expected a version component
    #[error("expected a version component e.g. `2` or `rc`")]
    ExpectedComponent,
    /// Cannot mix and match dashes and underscores
    #[error("cannot use both underscores and dashes as version segment separators")]
    CannotMixAndMatchDashesAndUnderscores,
    /// The local version segment (behind the `+`) was empty
    #[error("expected a local version after the `+`")]
    EmptyLocalVersion,
    /// Expected the end of the string
    #[error("encountered more characters but expected none")]
    ExpectedEof,
    /// Nom error
    #[error("{0:?}")]
    Nom(ErrorKind),
}

impl<'i> ParseError<&'i str> for ParseVersionErrorKind {
    fn from_error_kind(_: &'i str, kind: ErrorKind) -> Self {
        ParseVersionErrorKind::Nom(kind)
    }

    fn append(_: &'i str, _: ErrorKind, other: Self) -> Self {
        other
    }
}

impl<'i> FromExternalError<&'i str, ParseVersionErrorKind> for ParseVersionErrorKind {
    fn from_external_error(_: &'i str, _: ErrorKind, e: ParseVersionErrorKind) -> Self {
        e
    }
}

/// Parses the epoch part of a version: a number followed by `'!'` at the start
/// of the version string.
fn epoch_parser(input: &str) -> IResult<&str, u64, ParseVersionErrorKind> {
    let (rest, digits) = terminated(digit1, char('!'))(input)?;
    let epoch = digits
        .parse()
        .map_err(ParseVersionErrorKind::EpochMustBeInteger)
        .map_err(nom::Err::Failure)?;
    Ok((rest, epoch))
}

/// Parses a numeral from the input, fails if the parsed digits cannot be
/// represented by an `u64`.
fn numeral_parser(input: &str) -> IResult<&str, u64, ParseVersionErrorKind> {
    let (rest, digits) = digit1(input)?;
    match u64::from_str(digits) {
        Ok(numeral) => Ok((rest, numeral)),
        Err(e) => Err(nom::Err::Failure(ParseVersionErrorKind::InvalidNumeral(e))),
    }
}

/// Parses a single version [`Component`]: either a run of digits or a run of
/// letters. The complete letter run is matched against the special `post` and
/// `dev` tags so that e.g. `posted` remains a plain identifier.
fn component_parser(input: &str) -> IResult<&str, Component, ParseVersionErrorKind> {
    match numeral_parser(input) {
        Ok((rest, numeral)) => return Ok((rest, Component::Numeral(numeral))),
        // Numeral overflow is a failure, not a fall-through to identifiers.
        Err(e @ nom::Err::Failure(_)) => return Err(e),
        Err(_) => {}
    }

    let (rest, alpha) = take_while1::<_, _, ParseVersionErrorKind>(|c: char| {
        c.is_ascii_alphabetic()
    })(input)
    .map_err(|_| nom::Err::Error(ParseVersionErrorKind::ExpectedComponent))?;

    let component = match alpha {
        "post" => Component::Post,
        "dev" => Component::Dev,
        iden => Component::Iden(iden.into()),
    };
    Ok((rest, component))
}

/// Parses a version segment: one or more components up to the next separator.
/// Segments must start with a numeral; an implicit 0 is inserted when the
/// first parsed component is a string.
fn segment_parser(input: &str) -> IResult<&str, Segment, ParseVersionErrorKind> {
    let (mut rest, first) = component_parser(input)?;

    let mut segment: Segment = if first.is_numeric() {
        smallvec![first]
    } else {
        smallvec![Component::default(), first]
    };

    while let (remaining, Some(component)) = opt(component_parser)(rest)? {
        segment.push(component);
        rest = remaining;
    }

    Ok((rest, segment))
}

/// Keeps track of whether dashes or underscores have been used as separators
/// so far. The two styles must not be mixed within a single version string.
fn check_separator_style(
    separator: char,
    style: &mut Option<char>,
) -> Result<(), nom::Err<ParseVersionErrorKind>> {
    match (separator, *style) {
        ('-' | '_', None) => *style = Some(separator),
        ('-', Some('_')) | ('_', Some('-')) => {
            return Err(nom::Err::Failure(
                ParseVersionErrorKind::CannotMixAndMatchDashesAndUnderscores,
            ))
        }
        _ => {}
    }
    Ok(())
}

/// Parses a dot/dash/underscore separated list of segments. This is used both
/// for the common part of the version and for the local part behind the `+`.
fn version_part_parser<'i>(
    input: &'i str,
    separator_style: &mut Option<char>,
) -> IResult<&'i str, Vec<Segment>, ParseVersionErrorKind> {
    let (mut rest, first) = segment_parser(input)?;
    let mut segments = vec![first];

    loop {
        let Some(separator) = rest.chars().next().filter(|c| matches!(c, '.' | '-' | '_')) else {
            break;
        };
        check_separator_style(separator, separator_style)?;
        let after = &rest[1..];

        match segment_parser(after) {
            Ok((remaining, segment)) => {
                segments.push(segment);
                rest = remaining;
            }
            Err(nom::Err::Error(_)) if separator != '.' => {
                // A dash or underscore that is not followed by a component is
                // a version modifier of its own: `1.0.1_` sorts between `dev`
                // and any letter.
                segments
                    .last_mut()
                    .expect("at least one segment was parsed")
                    .push(Component::Iden(separator.to_string().into_boxed_str()));
                rest = after;
            }
            Err(nom::Err::Error(_)) => {
                return Err(nom::Err::Error(ParseVersionErrorKind::ExpectedComponent))
            }
            Err(e) => return Err(e),
        }
    }

    Ok((rest, segments))
}

/// Parses a [`Version`] from the beginning of the input and returns the
/// remaining input. The input is expected to already be normalized (trimmed
/// and lower case).
pub(crate) fn version_parser(input: &str) -> IResult<&str, Version, ParseVersionErrorKind> {
    if input.is_empty() {
        return Err(nom::Err::Error(ParseVersionErrorKind::Empty));
    }

    let (after_epoch, epoch) = opt(epoch_parser)(input)?;

    let mut separator_style = None;
    let (rest, segments) = version_part_parser(after_epoch, &mut separator_style)?;

    let (rest, local) = if let Some(local_part) = rest.strip_prefix('+') {
        match version_part_parser(local_part, &mut separator_style) {
            Ok(result) => result,
            Err(nom::Err::Error(_)) => {
                return Err(nom::Err::Failure(ParseVersionErrorKind::EmptyLocalVersion))
            }
            Err(e) => return Err(e),
        }
    } else {
        (rest, Vec::new())
    };

    let consumed = &input[..input.len() - rest.len()];
    Ok((
        rest,
        Version::new(consumed.into(), epoch, segments, local),
    ))
}

/// Normalizes a version string before parsing: surrounding whitespace is
/// stripped, everything is lowered and dashes are replaced with underscores
/// when the string does not already contain underscores (conda's lenient
/// handling of `1.0-1` style versions).
fn normalize(input: &str) -> String {
    let trimmed = input.trim().to_ascii_lowercase();
    if trimmed.contains('-') && !trimmed.contains('_') {
        trimmed.replace('-', "_")
    } else {
        trimmed
    }
}

impl FromStr for Version {
    type Err = ParseVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = normalize(s);
        match version_parser(&normalized) {
            Ok(("", version)) => Ok(version),
            Ok(_) => Err(ParseVersionError::new(s, ParseVersionErrorKind::ExpectedEof)),
            Err(nom::Err::Failure(e) | nom::Err::Error(e)) => Err(ParseVersionError::new(s, e)),
            Err(_) => unreachable!("not streaming, so no other error possible"),
        }
    }
}

impl FromStr for StrictVersion {
    type Err = ParseVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(StrictVersion(Version::from_str(s)?))
    }
}
