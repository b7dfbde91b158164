use std::{
    cmp::Ordering,
    fmt,
    fmt::{Debug, Display, Formatter},
    hash::{Hash, Hasher},
};

use itertools::{EitherOrBoth, Itertools};
use serde::{Serialize, Serializer};
use smallvec::SmallVec;

pub use parse::{ParseVersionError, ParseVersionErrorKind};

mod parse;

/// This class implements an order relation between version strings. Version
/// strings can contain the usual alphanumeric characters (A-Za-z0-9),
/// separated into segments by dots, dashes and underscores. Empty segments
/// (i.e. two consecutive dots) are not permitted. An optional epoch number -
/// an integer followed by `!` - can precede the actual version string (this
/// is useful to indicate a change in the versioning scheme itself). Version
/// comparison is case-insensitive.
///
/// Supported version strings are:
///
/// * Release versions that contain only integers, e.g. `1.0`, `2.3.5`.
/// * Pre-release versions that use additional letters such as `a` or `rc`,
///   for example `1.0a1`, `1.2.beta3`, `2.3.5rc3`.
/// * Development versions indicated by the string `dev`, e.g. `1.0dev42`.
/// * Post-release versions indicated by the string `post`, e.g. `1.0post1`.
/// * Tagged versions with an arbitrary suffix, e.g. `1.1.parallel`. Tags sort
///   like strings in pre-release versions.
/// * An optional local version string separated by `+`. It is only considered
///   when the main versions are equal, but otherwise handled in exactly the
///   same manner.
///
/// Before comparison, version strings are parsed as follows:
///
/// * They are first split into epoch, version number, and local version
///   number at `!` and `+` respectively. If there is no `!`, the epoch is set
///   to 0. If there is no `+`, the local version is empty.
/// * The version part is then split into segments at `.`, `-` and `_`.
/// * Each segment is split again into runs of numerals and non-numerals.
/// * Numeral runs are converted to integers, everything else is converted to
///   lower case, with special treatment for `dev` and `post`.
/// * When a segment starts with a letter, the fill value 0 is inserted to
///   keep numbers and strings in phase, so that `1.1.a1 == 1.1.0a1`.
///
/// The resulting lists of components are compared lexicographically, where
///
/// * integers are compared numerically,
/// * strings are compared lexicographically and are smaller than integers,
/// * `dev` is smaller than all other components,
/// * `post` is greater than all other components, and
/// * a missing component counts as integer 0, so that `1.1 == 1.1.0`.
///
/// Some packages (most notably openssl) interpret letters as version counters
/// rather than pre-release identifiers. Appending an underscore restores the
/// expected ordering for such schemes: `1.0.1_ < 1.0.1a` holds because a lone
/// underscore sorts after `dev` but before any letter.
#[derive(Clone, Eq)]
pub struct Version {
    /// A normed copy of the original version string, trimmed and converted to
    /// lower case.
    norm: Box<str>,

    /// The epoch, or `None` if the version string did not specify one.
    epoch: Option<u64>,

    /// The segments of the common part of the version, i.e. everything before
    /// the `+`.
    segments: Vec<Segment>,

    /// The segments of the local part of the version (behind the `+`), empty
    /// when there is no local version.
    local: Vec<Segment>,
}

/// A single version segment: the components between two separators. Segments
/// always start with a numeral; parsing inserts an implicit 0 in front of
/// segments that start with a letter.
pub(crate) type Segment = SmallVec<[Component; 2]>;

impl Version {
    pub(crate) fn new(
        norm: Box<str>,
        epoch: Option<u64>,
        segments: Vec<Segment>,
        local: Vec<Segment>,
    ) -> Self {
        Self {
            norm,
            epoch,
            segments,
            local,
        }
    }

    /// Returns true if this version has an epoch.
    pub fn has_epoch(&self) -> bool {
        self.epoch.is_some()
    }

    /// Returns the epoch part of the version. If the version did not specify
    /// an epoch `0` is returned.
    pub fn epoch(&self) -> u64 {
        self.epoch.unwrap_or(0)
    }

    /// Returns the epoch part of the version or `None` if the version did not
    /// specify one.
    pub fn epoch_opt(&self) -> Option<u64> {
        self.epoch
    }

    /// Returns true if this version has a local version defined.
    pub fn has_local(&self) -> bool {
        !self.local.is_empty()
    }

    /// Returns the individual segments of the common part of the version.
    pub(crate) fn segments(
        &self,
    ) -> impl DoubleEndedIterator<Item = &'_ [Component]> + ExactSizeIterator + '_ {
        self.segments.iter().map(SmallVec::as_slice)
    }

    /// Returns the segments that belong to the local part of the version (the
    /// part behind the optional `+`).
    pub(crate) fn local_segments(
        &self,
    ) -> impl DoubleEndedIterator<Item = &'_ [Component]> + ExactSizeIterator + '_ {
        self.local.iter().map(SmallVec::as_slice)
    }

    /// Returns a new version where the last numeral of this version has been
    /// bumped. Used to compute the exclusive upper bound of a fuzzy
    /// constraint: `1.2` bumps to `1.3`.
    pub fn bump(&self) -> Self {
        let mut bumped = self.clone();

        let last_numeral = bumped
            .segments
            .iter_mut()
            .flat_map(|segment| segment.iter_mut())
            .rev()
            .find_map(|component| match component {
                Component::Numeral(num) => Some(num),
                _ => None,
            });

        match last_numeral {
            Some(num) => *num += 1,
            None => {
                // A version without any numeral can only bump its epoch.
                bumped.epoch = Some(bumped.epoch() + 1);
            }
        }

        bumped.norm = bumped.canonical().into_boxed_str();
        bumped
    }

    /// Tries to extract the major and minor versions. Returns `None` if this
    /// instance does not start with two plain numeral segments.
    pub fn as_major_minor(&self) -> Option<(u64, u64)> {
        let mut segments = self.segments();
        let major = segments.next()?;
        let minor = segments.next()?;

        if major.len() == 1 && minor.len() == 1 {
            Some((major[0].as_number()?, minor[0].as_number()?))
        } else {
            None
        }
    }

    /// Returns true if any component of this version is the special `dev` tag.
    pub fn is_dev(&self) -> bool {
        self.segments()
            .flatten()
            .any(|component| matches!(component, Component::Dev))
    }

    /// Checks if this version starts with the segments of `other`. This is
    /// the predicate behind `=1.2`/`1.2.*` style specs.
    pub fn starts_with(&self, other: &Self) -> bool {
        self.epoch() == other.epoch()
            && segments_starts_with(self.segments(), other.segments())
            && segments_starts_with(self.local_segments(), other.local_segments())
    }

    /// Returns true if this version is compatible with `other` in the
    /// `~=other` sense: at least `other` and within the release line obtained
    /// by dropping its last segment.
    pub fn compatible_with(&self, other: &Self) -> bool {
        self.ge(other)
            && self.epoch() == other.epoch()
            && segments_starts_with(self.segments(), other.segments().rev().skip(1).rev())
            && segments_starts_with(self.local_segments(), other.local_segments())
    }

    /// Returns the canonical string representation of the version: all
    /// segments joined by dots, with the epoch and local version attached.
    pub fn canonical(&self) -> String {
        fn format_components(components: &[Component]) -> impl Display + '_ {
            // Hide the implicit leading zero of segments that start with a
            // non-numeral so that the parse of `rc` formats as `rc` again.
            let components = if components.len() > 1
                && components[0] == Component::default()
                && components[1].as_number().is_none()
            {
                &components[1..]
            } else {
                components
            };
            components.iter().join("")
        }

        fn format_segments<'i, I: Iterator<Item = &'i [Component]> + 'i>(
            segments: I,
        ) -> impl Display + 'i {
            segments.format_with(".", |components, f| f(&format_components(components)))
        }

        let mut result = String::new();
        if let Some(epoch) = self.epoch {
            result.push_str(&format!("{epoch}!"));
        }
        result.push_str(&format!("{}", format_segments(self.segments())));
        if self.has_local() {
            result.push_str(&format!("+{}", format_segments(self.local_segments())));
        }
        result
    }
}

/// Returns true if the first sequence of segments starts with the second one,
/// comparing component by component and treating the longer side as the
/// continuation.
fn segments_starts_with<
    'a,
    'b,
    A: Iterator<Item = &'a [Component]>,
    B: Iterator<Item = &'b [Component]>,
>(
    a: A,
    b: B,
) -> bool {
    let default = Component::default();
    for segments in a.zip_longest(b) {
        let (left, right) = match segments {
            EitherOrBoth::Both(left, right) => (left, right),
            // The version has segments beyond the prefix.
            EitherOrBoth::Left(_) => return true,
            // The prefix has segments the version lacks; they only match the
            // implicit zero padding (`2.38` starts with `2.38.0`).
            EitherOrBoth::Right(right) => {
                if right.iter().any(|component| *component != default) {
                    return false;
                }
                continue;
            }
        };
        for components in left.iter().zip_longest(right.iter()) {
            match components {
                EitherOrBoth::Both(a, b) if a == b => {}
                EitherOrBoth::Both(_, _) => return false,
                // Extra components on the version side do not disturb the
                // prefix; later segments still have to line up.
                EitherOrBoth::Left(_) => break,
                EitherOrBoth::Right(component) => {
                    if *component != default {
                        return false;
                    }
                }
            }
        }
    }
    true
}

fn cmp_segments<'i, I: Iterator<Item = &'i [Component]>>(a: I, b: I) -> Ordering {
    for segments in a.zip_longest(b) {
        let (a_segment, b_segment) = segments.or_default();
        for components in a_segment.iter().zip_longest(b_segment.iter()) {
            let default = Component::default();
            let (a_component, b_component) = match components {
                EitherOrBoth::Left(l) => (l, &default),
                EitherOrBoth::Right(r) => (&default, r),
                EitherOrBoth::Both(l, r) => (l, r),
            };
            match a_component.cmp(b_component) {
                Ordering::Equal => {}
                ordering => return ordering,
            }
        }
    }
    Ordering::Equal
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.epoch() == other.epoch()
            && cmp_segments(self.segments(), other.segments()) == Ordering::Equal
            && cmp_segments(self.local_segments(), other.local_segments()) == Ordering::Equal
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.epoch()
            .cmp(&other.epoch())
            .then_with(|| cmp_segments(self.segments(), other.segments()))
            .then_with(|| cmp_segments(self.local_segments(), other.local_segments()))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        fn hash_segments<'i, I: Iterator<Item = &'i [Component]>, H: Hasher>(
            state: &mut H,
            segments: I,
        ) {
            let default = Component::default();
            // `1.0` and `1` are equal because missing components count as
            // zero; skip trailing defaults so equal versions hash equally.
            for segment in segments {
                segment
                    .iter()
                    .rev()
                    .skip_while(|c| **c == default)
                    .for_each(|c| c.hash(state));
            }
        }

        self.epoch().hash(state);
        hash_segments(state, self.segments());
        hash_segments(state, self.local_segments());
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.norm.as_ref())
    }
}

impl Debug for Version {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Version")
            .field("norm", &self.norm)
            .field("epoch", &self.epoch)
            .field("segments", &self.segments)
            .field("local", &self.local)
            .finish()
    }
}

impl Serialize for Version {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.norm)
    }
}

impl<'de> serde::Deserialize<'de> for Version {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let str = std::borrow::Cow::<'de, str>::deserialize(deserializer)?;
        str.parse().map_err(serde::de::Error::custom)
    }
}

/// A wrapper around [`Version`] that uses a strict comparison: two versions
/// are only considered equal when their segment structure is identical, so
/// `1.0` and `1.0.0` differ. This is the comparison behind `startswith`
/// specs, where the written form matters.
#[derive(Debug, Clone, Eq, Serialize)]
pub struct StrictVersion(pub Version);

impl StrictVersion {
    /// Returns the version this instance wraps.
    pub fn version(&self) -> &Version {
        &self.0
    }
}

impl PartialEq for StrictVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Hash for StrictVersion {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Version's hash already skips trailing zero components; unequal
        // strict versions may collide but equal ones hash equally.
        self.0.hash(state);
    }
}

impl PartialOrd for StrictVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for StrictVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .cmp(&other.0)
            .then_with(|| self.0.segments.len().cmp(&other.0.segments.len()))
            .then_with(|| self.0.local.len().cmp(&other.0.local.len()))
    }
}

impl Display for StrictVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// A single component of a version segment: either a number, one of the
/// special ordering tags, or a literal string.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub(crate) enum Component {
    /// A numeric component.
    Numeral(u64),

    /// The `post` tag. Ordered greater than anything else.
    Post,

    /// The `dev` tag. Ordered less than anything else.
    Dev,

    /// A generic lower-case string identifier. Identifiers are compared
    /// lexicographically and are always ordered less than numbers. A lone
    /// `_` is an identifier too, which makes it sort before any letter.
    Iden(Box<str>),
}

impl Component {
    pub fn as_number(&self) -> Option<u64> {
        match self {
            Component::Numeral(value) => Some(*value),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Component::Numeral(_))
    }
}

impl Default for Component {
    fn default() -> Self {
        Component::Numeral(0)
    }
}

impl From<u64> for Component {
    fn from(num: u64) -> Self {
        Component::Numeral(num)
    }
}

impl Ord for Component {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            // Numbers are always ordered higher than strings.
            (Component::Numeral(_), Component::Iden(_)) => Ordering::Greater,
            (Component::Iden(_), Component::Numeral(_)) => Ordering::Less,

            (Component::Numeral(a), Component::Numeral(b)) => a.cmp(b),
            (Component::Iden(a), Component::Iden(b)) => a.cmp(b),
            (Component::Post, Component::Post) => Ordering::Equal,
            (Component::Dev, Component::Dev) => Ordering::Equal,

            // Post is always compared greater than anything else.
            (Component::Post, _) => Ordering::Greater,
            (_, Component::Post) => Ordering::Less,

            // Dev is always compared less than anything else.
            (Component::Dev, _) => Ordering::Less,
            (_, Component::Dev) => Ordering::Greater,
        }
    }
}

impl PartialOrd for Component {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Display for Component {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Component::Numeral(n) => write!(f, "{n}"),
            Component::Iden(s) => write!(f, "{s}"),
            Component::Post => write!(f, "post"),
            Component::Dev => write!(f, "dev"),
        }
    }
}

#[cfg(test)]
mod test {
    use std::{
        cmp::Ordering,
        collections::hash_map::DefaultHasher,
        hash::{Hash, Hasher},
        str::FromStr,
    };

    use rand::seq::SliceRandom;

    use super::{StrictVersion, Version};

    // Ordering cases taken from the conda test suite.
    #[test]
    fn valid_versions() {
        let versions = [
            "   0.4",
            "== 0.4.0",
            " < 0.4.1.rc",
            "== 0.4.1.RC", // case-insensitive comparison
            " < 0.4.1",
            " < 0.5a1",
            " < 0.5b3",
            " < 0.5C1", // case-insensitive comparison
            " < 0.5",
            " < 0.9.6",
            " < 0.960923",
            " < 1.0",
            " < 1.1dev1", // special case 'dev'
            " < 1.1a1",
            " < 1.1.0dev1", // special case 'dev'
            "== 1.1.dev1",  // 0 is inserted before string
            " < 1.1.a1",
            " < 1.1.0rc1",
            " < 1.1.0",
            "== 1.1",
            " < 1.1.0post1", // special case 'post'
            "== 1.1.post1",  // 0 is inserted before string
            " < 1.1post1",   // special case 'post'
            " < 1996.07.12",
            " < 1!0.4.1", // epoch increased
            " < 1!3.1.1.6",
            " < 2!0.4.1", // epoch increased again
        ];

        let mut previous: Option<Version> = None;
        for case in versions {
            let (op, version_str) = case
                .trim()
                .split_once(' ')
                .map_or(("", case.trim()), |(op, v)| (op, v.trim()));
            let version: Version = version_str.parse().unwrap();
            let comparison = previous.as_ref().map(|previous| previous.cmp(&version));
            match op {
                "<" => assert_eq!(
                    comparison,
                    Some(Ordering::Less),
                    "{} is not less than {}",
                    previous.as_ref().unwrap(),
                    version
                ),
                "==" => assert_eq!(
                    comparison,
                    Some(Ordering::Equal),
                    "{} is not equal to {}",
                    previous.as_ref().unwrap(),
                    version
                ),
                _ => {}
            }
            previous = Some(version);
        }
    }

    #[test]
    fn openssl_convention() {
        let version_strs = [
            "1.0.1dev",
            "1.0.1_", // <- this
            "1.0.1a",
            "1.0.1b",
            "1.0.1c",
            "1.0.1d",
            "1.0.1r",
            "1.0.1rc",
            "1.0.1rc1",
            "1.0.1rc2",
            "1.0.1s",
            "1.0.1", // <- compared to this
            "1.0.1post.a",
            "1.0.1post.b",
            "1.0.1post.z",
            "1.0.1post.za",
            "1.0.2",
        ];
        let parsed_versions: Vec<Version> =
            version_strs.iter().map(|v| v.parse().unwrap()).collect();
        let mut random_versions = parsed_versions.clone();
        random_versions.shuffle(&mut rand::thread_rng());
        random_versions.sort();
        assert_eq!(random_versions, parsed_versions);
    }

    #[test]
    fn total_order_is_antisymmetric() {
        let versions: Vec<Version> = [
            "0.4", "0.4.0", "0.4.1", "0.5a1", "0.5", "1.0", "1.1dev1", "1.1_", "1.1a1", "1.1",
            "1.1.post1", "1!0.4.1",
        ]
        .iter()
        .map(|v| v.parse().unwrap())
        .collect();

        for a in &versions {
            for b in &versions {
                let forward = a.cmp(b);
                let backward = b.cmp(a);
                assert_eq!(forward, backward.reverse(), "{a} vs {b}");
                assert_eq!(forward == Ordering::Equal, a == b, "{a} vs {b}");
            }
        }
    }

    #[test]
    fn bump() {
        assert_eq!(
            Version::from_str("1.1").unwrap().bump(),
            Version::from_str("1.2").unwrap()
        );
        assert_eq!(
            Version::from_str("1.1l").unwrap().bump(),
            Version::from_str("1.2l").unwrap()
        );
    }

    #[test]
    fn starts_with() {
        assert!(Version::from_str("1.2.3")
            .unwrap()
            .starts_with(&Version::from_str("1.2").unwrap()));
        assert!(!Version::from_str("1.3.0")
            .unwrap()
            .starts_with(&Version::from_str("1.2").unwrap()));
        assert!(Version::from_str("2.38")
            .unwrap()
            .starts_with(&Version::from_str("2.38.0").unwrap()));
        assert!(!Version::from_str("2.38")
            .unwrap()
            .starts_with(&Version::from_str("2.38.0.1").unwrap()));
    }

    #[test]
    fn compatible_with() {
        let spec = Version::from_str("2.4").unwrap();
        assert!(Version::from_str("2.4").unwrap().compatible_with(&spec));
        assert!(Version::from_str("2.5").unwrap().compatible_with(&spec));
        assert!(!Version::from_str("2.1").unwrap().compatible_with(&spec));
        assert!(!Version::from_str("3.1").unwrap().compatible_with(&spec));
    }

    fn get_hash(version: &Version) -> u64 {
        let mut s = DefaultHasher::new();
        version.hash(&mut s);
        s.finish()
    }

    #[test]
    fn hash_consistent_with_eq() {
        let v1 = Version::from_str("1.2.0").unwrap();

        let v2 = Version::from_str("1.2.0").unwrap();
        assert_eq!(get_hash(&v1), get_hash(&v2));
        let v2 = Version::from_str("1.2.0.0.0").unwrap();
        assert_eq!(get_hash(&v1), get_hash(&v2));
        let v2 = Version::from_str("1!1.2.0").unwrap();
        assert_ne!(get_hash(&v1), get_hash(&v2));

        let v2 = Version::from_str("1.2.0+post1").unwrap();
        assert_ne!(get_hash(&v1), get_hash(&v2));

        let v1 = Version::from_str("1.2+post1").unwrap();
        assert_eq!(get_hash(&v1), get_hash(&v2));
    }

    #[test]
    fn strict_version_distinguishes_trailing_zero() {
        let lenient_a = Version::from_str("1.0").unwrap();
        let lenient_b = Version::from_str("1.0.0").unwrap();
        assert_eq!(lenient_a, lenient_b);

        let strict_a = StrictVersion::from_str("1.0").unwrap();
        let strict_b = StrictVersion::from_str("1.0.0").unwrap();
        assert_ne!(strict_a, strict_b);
    }

    #[test]
    fn as_major_minor() {
        assert_eq!(
            Version::from_str("1.2.3").unwrap().as_major_minor(),
            Some((1, 2))
        );
        assert_eq!(
            Version::from_str("5!1.2.3").unwrap().as_major_minor(),
            Some((1, 2))
        );
        assert_eq!(Version::from_str("1").unwrap().as_major_minor(), None);
        assert_eq!(Version::from_str("1a.2").unwrap().as_major_minor(), None);
        assert_eq!(
            Version::from_str("1.2.3a").unwrap().as_major_minor(),
            Some((1, 2))
        );
    }

    #[test]
    fn canonical() {
        assert_eq!(Version::from_str("1.2.3").unwrap().canonical(), "1.2.3");
        assert_eq!(Version::from_str("1!1.2.3").unwrap().canonical(), "1!1.2.3");
        assert_eq!(
            Version::from_str("1.2.3-alpha.2").unwrap().canonical(),
            "1.2.3.alpha.2"
        );
        assert_eq!(
            Version::from_str("1!1.2.3-alpha.2+3beta5rc")
                .unwrap()
                .canonical(),
            "1!1.2.3.alpha.2+3beta5rc"
        );
    }

    #[test]
    fn roundtrip_through_display() {
        for version in ["1.2.3", "1!1.0a1", "1.0.1_", "1.2+abc123", "2023.07"] {
            let parsed = Version::from_str(version).unwrap();
            let reparsed = Version::from_str(&parsed.to_string()).unwrap();
            assert_eq!(parsed, reparsed);
        }
    }
}
