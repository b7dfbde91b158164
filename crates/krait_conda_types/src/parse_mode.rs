/// Defines how strict a parser should behave when parsing user input.
///
/// Over the years conda has accepted a lot of slightly malformed input, e.g.
/// `>=2.10*`. The lenient mode accepts those forms (usually with a warning),
/// the strict mode rejects them. Data that is parsed from repodata uses the
/// lenient mode, user input is parsed strictly by the front-end.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ParseStrictness {
    /// Allow deprecated and sloppy forms of the input.
    Lenient,

    /// Only allow the canonical form of the input.
    Strict,
}
