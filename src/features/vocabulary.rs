//! Stable categorical encoding for driver and team identifiers.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Code assigned to identifiers outside the vocabulary.
pub const UNKNOWN_CODE: u32 = 0;

/// Append-only identifier → index arena, persisted with the model.
///
/// Entry `i` encodes as `i + 1`; code 0 is reserved for unknown identifiers.
/// Once assigned, a code never changes: later vocabularies are derived with
/// [`Vocabulary::extended`], which only appends.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct Vocabulary {
    entries: Vec<String>,
    index: HashMap<String, u32>,
}

impl Vocabulary {
    /// Fresh vocabulary; initial entries are assigned in sorted order.
    pub fn from_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::default().extended(ids)
    }

    /// Copy of this vocabulary with unseen ids appended, in sorted order.
    pub fn extended<I, S>(&self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fresh: BTreeSet<String> = ids
            .into_iter()
            .map(Into::into)
            .filter(|id| !self.index.contains_key(id))
            .collect();

        let mut vocab = self.clone();
        for id in fresh {
            vocab.push(id);
        }
        vocab
    }

    /// Encode an identifier; unknown identifiers map to [`UNKNOWN_CODE`].
    pub fn encode(&self, id: &str) -> u32 {
        self.index.get(id).copied().unwrap_or(UNKNOWN_CODE)
    }

    pub fn decode(&self, code: u32) -> Option<&str> {
        if code == UNKNOWN_CODE {
            return None;
        }
        self.entries.get(code as usize - 1).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn push(&mut self, id: String) {
        if self.index.contains_key(&id) {
            return;
        }
        self.entries.push(id.clone());
        self.index.insert(id, self.entries.len() as u32);
    }
}

/// Stored order is the code order; it is kept as is.
impl From<Vec<String>> for Vocabulary {
    fn from(entries: Vec<String>) -> Self {
        let mut vocab = Self::default();
        for id in entries {
            vocab.push(id);
        }
        vocab
    }
}

impl From<Vocabulary> for Vec<String> {
    fn from(vocab: Vocabulary) -> Self {
        vocab.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoding_is_order_independent() {
        let a = Vocabulary::from_ids(["ver", "ham", "lec"]);
        let b = Vocabulary::from_ids(["lec", "ver", "ham", "ham"]);
        assert_eq!(a, b);
        assert_eq!(a.len(), 3);
        assert_eq!(a.encode("ham"), 1);
        assert_eq!(a.encode("lec"), 2);
        assert_eq!(a.encode("ver"), 3);
    }

    #[test]
    fn test_unknown_identifier() {
        let vocab = Vocabulary::from_ids(["ver"]);
        assert_eq!(vocab.encode("pia"), UNKNOWN_CODE);
        assert_eq!(vocab.decode(UNKNOWN_CODE), None);
        assert_eq!(vocab.decode(1), Some("ver"));
        assert_eq!(vocab.decode(2), None);
    }

    #[test]
    fn test_json_round_trip_keeps_codes() {
        let vocab = Vocabulary::from_ids(["sainz", "alonso", "norris"]);
        let json = serde_json::to_string(&vocab).unwrap();
        assert_eq!(json, r#"["alonso","norris","sainz"]"#);

        let back: Vocabulary = serde_json::from_str(&json).unwrap();
        assert_eq!(back.encode("norris"), vocab.encode("norris"));
    }

    #[test]
    fn test_extension_keeps_existing_codes() {
        let base = Vocabulary::from_ids(["ham", "ver", "zho"]);
        let grown = base.extended(["alb", "ver", "sar"]);

        assert_eq!(grown.len(), 5);
        for id in ["ham", "ver", "zho"] {
            assert_eq!(grown.encode(id), base.encode(id));
        }
        // Newcomers take the next free codes
        assert_eq!(grown.encode("alb"), 4);
        assert_eq!(grown.encode("sar"), 5);
        assert_eq!(base.encode("alb"), UNKNOWN_CODE);
    }

    #[test]
    fn test_extended_order_survives_json() {
        let grown = Vocabulary::from_ids(["ver"]).extended(["alb"]);
        let json = serde_json::to_string(&grown).unwrap();
        assert_eq!(json, r#"["ver","alb"]"#);

        let back: Vocabulary = serde_json::from_str(&json).unwrap();
        assert_eq!(back, grown);
        assert_eq!(back.encode("alb"), 2);
    }
}
