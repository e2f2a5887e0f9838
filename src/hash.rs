use std::hash::Hasher;

use siphasher::sip::SipHasher24;

/// Derives the 64-bit address of a datapoint source from its identifier.
///
/// SipHash-2-4 with an all-zero key over the identifier's UTF-8 bytes, so
/// addresses are stable across processes and hosts.
#[must_use]
pub fn hash_identifier(id: &str) -> u64 {
    let mut hasher = SipHasher24::new_with_keys(0, 0);
    hasher.write(id.as_bytes());

    hasher.finish()
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use proptest::prelude::*;

    use super::*;

    #[test]
    fn hash_empty_identifier() {
        assert_eq!(hash_identifier(""), hash_identifier(""));
    }

    #[test]
    fn hash_distinct_corpus() {
        let corpus = [
            "",
            " ",
            "a",
            "b",
            "ab",
            "ba",
            "foo",
            "bar",
            "hostname:web-01",
            "hostname:web-02",
            "hostname:web-01 ",
            "metric=cpu,host=web-01",
            "metric=cpu,host=web-02",
            "ABCDEF",
            "abcdef",
            "\u{0}",
            "\u{0}\u{0}",
            "ünïcødé",
        ];

        let addresses: HashSet<u64> = corpus.iter().map(|id| hash_identifier(id)).collect();

        assert_eq!(addresses.len(), corpus.len());
    }

    proptest! {
        #[test]
        fn hash_is_deterministic(id: String) {
            prop_assert_eq!(hash_identifier(&id), hash_identifier(&id.clone()));
        }
    }
}
