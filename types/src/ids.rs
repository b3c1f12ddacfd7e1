use std::fmt;

/// Identifier of an accepted lemma.
///
/// Ids are handed out in acceptance order starting at [`LemmaId::FIRST`], so
/// comparing two ids compares their acceptance order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct LemmaId(u64);

impl LemmaId {
    pub const FIRST: LemmaId = LemmaId(1);

    #[must_use]
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    #[must_use]
    pub fn value(self) -> u64 {
        self.0
    }

    /// The id after this one, or `None` once the id space is used up.
    #[must_use]
    pub fn next(self) -> Option<Self> {
        self.0.checked_add(1).map(Self)
    }
}

impl fmt::Display for LemmaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
