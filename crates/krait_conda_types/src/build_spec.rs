//! This module contains code to work with "build number specs". It
//! represents the `build_number` key of [`crate::MatchSpec`], e.g.: `>=3`.

use std::{
    fmt::{Display, Formatter},
    num::ParseIntError,
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Named type for the build number of a package instead of a bare `u64`
/// floating about the project.
pub type BuildNumber = u64;

/// An operator to compare two build numbers.
#[allow(missing_docs)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub enum OrdOperator {
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
    Ne,
}

/// A build number constraint, e.g. `>=3` or a plain `4` (which means `==4`).
#[derive(Debug, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct BuildNumberSpec {
    op: OrdOperator,
    rhs: BuildNumber,
}

impl BuildNumberSpec {
    /// Constructs a new spec from an operator and a build number.
    pub fn new(op: OrdOperator, rhs: BuildNumber) -> Self {
        Self { op, rhs }
    }

    /// Returns whether the build number matches the specification.
    pub fn matches(&self, build_number: &BuildNumber) -> bool {
        match self.op {
            OrdOperator::Gt => build_number.gt(&self.rhs),
            OrdOperator::Ge => build_number.ge(&self.rhs),
            OrdOperator::Lt => build_number.lt(&self.rhs),
            OrdOperator::Le => build_number.le(&self.rhs),
            OrdOperator::Eq => build_number.eq(&self.rhs),
            OrdOperator::Ne => build_number.ne(&self.rhs),
        }
    }
}

impl Display for OrdOperator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Gt => write!(f, ">"),
            Self::Ge => write!(f, ">="),
            Self::Lt => write!(f, "<"),
            Self::Le => write!(f, "<="),
            Self::Eq => write!(f, "=="),
            Self::Ne => write!(f, "!="),
        }
    }
}

impl Display for BuildNumberSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.op == OrdOperator::Eq {
            write!(f, "{}", self.rhs)
        } else {
            write!(f, "{}{}", self.op, self.rhs)
        }
    }
}

/// An error that occurred while parsing a [`BuildNumberSpec`].
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum ParseBuildNumberSpecError {
    /// The operator was not recognized.
    #[error("invalid build number operator '{0}'")]
    InvalidOperator(String),

    /// The build number was not a valid integer.
    #[error("invalid build number: {0}")]
    InvalidBuildNumber(#[source] ParseIntError),
}

impl FromStr for BuildNumberSpec {
    type Err = ParseBuildNumberSpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let op_len = s
            .chars()
            .take_while(|c| matches!(c, '>' | '<' | '=' | '!'))
            .count();
        let (op_str, number_str) = s.split_at(op_len);
        let op = match op_str {
            ">" => OrdOperator::Gt,
            ">=" => OrdOperator::Ge,
            "<" => OrdOperator::Lt,
            "<=" => OrdOperator::Le,
            // A bare number pins the build number exactly.
            "" | "=" | "==" => OrdOperator::Eq,
            "!=" => OrdOperator::Ne,
            op => return Err(ParseBuildNumberSpecError::InvalidOperator(op.to_string())),
        };
        let rhs = number_str
            .trim()
            .parse()
            .map_err(ParseBuildNumberSpecError::InvalidBuildNumber)?;
        Ok(Self::new(op, rhs))
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::{BuildNumberSpec, OrdOperator, ParseBuildNumberSpecError};

    #[test]
    fn test_matches() {
        let test_cases = vec![
            (BuildNumberSpec::new(OrdOperator::Gt, 3), 5, true),
            (BuildNumberSpec::new(OrdOperator::Ge, 3), 5, true),
            (BuildNumberSpec::new(OrdOperator::Lt, 3), 5, false),
            (BuildNumberSpec::new(OrdOperator::Le, 3), 7, false),
            (BuildNumberSpec::new(OrdOperator::Eq, 3), 7, false),
            (BuildNumberSpec::new(OrdOperator::Ne, 3), 7, true),
        ];
        for (spec, test_val, is_match) in test_cases {
            assert_eq!(spec.matches(&test_val), is_match);
        }
    }

    #[test]
    fn test_parse() {
        assert_eq!(
            BuildNumberSpec::from_str(">=3"),
            Ok(BuildNumberSpec::new(OrdOperator::Ge, 3))
        );
        assert_eq!(
            BuildNumberSpec::from_str("4"),
            Ok(BuildNumberSpec::new(OrdOperator::Eq, 4))
        );
        assert!(matches!(
            BuildNumberSpec::from_str(">=>3"),
            Err(ParseBuildNumberSpecError::InvalidOperator(_))
        ));
        assert!(matches!(
            BuildNumberSpec::from_str(">=abc"),
            Err(ParseBuildNumberSpecError::InvalidBuildNumber(_))
        ));
    }

    #[test]
    fn display_roundtrip() {
        for spec in [">=3", "4", "!=0", "<10"] {
            let parsed = BuildNumberSpec::from_str(spec).unwrap();
            assert_eq!(
                BuildNumberSpec::from_str(&parsed.to_string()).unwrap(),
                parsed
            );
        }
    }
}
