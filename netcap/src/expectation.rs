//! Expected vs. observed occurrence counts, keyed by matcher or event key.
//!
//! Observations are counted for every key, registered or not. Registering an
//! expectation after matching traffic was captured therefore starts from the
//! traffic already seen, and replacing an expectation keeps its count.

use netcap_common::{ExpectationStatus, UnmetExpectations};
use std::collections::BTreeMap;
use std::fmt::Display;
use std::time::Duration;

#[derive(Debug)]
pub(crate) struct ExpectationSet<K> {
    expected: BTreeMap<K, usize>,
    observed: BTreeMap<K, usize>,
}

impl<K> Default for ExpectationSet<K> {
    fn default() -> Self {
        Self {
            expected: BTreeMap::new(),
            observed: BTreeMap::new(),
        }
    }
}

impl<K: Ord + Clone + Display> ExpectationSet<K> {
    /// Register or replace the expected count for `key`.
    pub(crate) fn set(&mut self, key: K, expected: usize) {
        self.expected.insert(key, expected);
    }

    pub(crate) fn observe(&mut self, key: &K) {
        match self.observed.get_mut(key) {
            Some(count) => *count += 1,
            None => {
                self.observed.insert(key.clone(), 1);
            }
        }
    }

    pub(crate) fn observed(&self, key: &K) -> usize {
        self.observed.get(key).copied().unwrap_or(0)
    }

    pub(crate) fn is_expected(&self, key: &K) -> bool {
        self.expected.contains_key(key)
    }

    pub(crate) fn is_satisfied(&self) -> bool {
        self.expected
            .iter()
            .all(|(key, expected)| self.observed(key) >= *expected)
    }

    /// One status per registered expectation, ordered by key.
    pub(crate) fn report(&self) -> Vec<ExpectationStatus> {
        self.expected
            .iter()
            .map(|(key, expected)| status(key, *expected, self.observed(key)))
            .collect()
    }

    /// Keys observed with no expectation, or more often than expected.
    pub(crate) fn unexpected(&self) -> Vec<ExpectationStatus> {
        self.observed
            .iter()
            .filter_map(|(key, observed)| {
                let expected = self.expected.get(key).copied().unwrap_or(0);
                (*observed > expected).then(|| status(key, expected, *observed))
            })
            .collect()
    }

    /// Build the verification error, if any.
    pub(crate) fn verify(
        &self,
        subject: &str,
        waited: Duration,
        ignore_unexpected: bool,
    ) -> Result<(), UnmetExpectations> {
        let failure = UnmetExpectations {
            subject: subject.to_string(),
            waited,
            unmet: self
                .report()
                .into_iter()
                .filter(|status| !status.is_satisfied())
                .collect(),
            unexpected: if ignore_unexpected {
                Vec::new()
            } else {
                self.unexpected()
            },
        };
        if failure.is_empty() {
            Ok(())
        } else {
            Err(failure)
        }
    }
}

fn status(key: &impl Display, expected: usize, observed: usize) -> ExpectationStatus {
    ExpectationStatus {
        key: key.to_string(),
        expected,
        observed,
    }
}
