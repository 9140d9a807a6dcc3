//! Stateful property testing for the query cache.
//!
//! Uses proptest-state-machine to drive reads, prefix invalidations and
//! removals against a reference model. The model tracks:
//!
//! - Which keys are cached and with what value
//! - Which keys are stale
//! - How many times a fetcher actually ran
//! - How many keys each invalidation matched

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use proptest::prelude::*;
use proptest_state_machine::{ReferenceStateMachine, StateMachineTest, prop_state_machine};
use tokio::runtime::Runtime;

use momentum_store::{CacheConfig, KeyPart, QueryCache, QueryKey, StoreError, query_key};

const FAMILIES: &[&str] = &["tasks", "circle-messages", "daily-summaries"];
const OWNERS: &[&str] = &["u1", "u2"];

fn key_of(parts: &[String]) -> QueryKey {
    QueryKey::new(parts.iter().map(|p| KeyPart::from(p.as_str())).collect())
}

fn key_strategy() -> impl Strategy<Value = Vec<String>> {
    (0..FAMILIES.len(), 0..OWNERS.len())
        .prop_map(|(f, o)| vec![FAMILIES[f].to_string(), OWNERS[o].to_string()])
}

fn prefix_strategy() -> impl Strategy<Value = Vec<String>> {
    prop_oneof![
        1 => Just(Vec::new()),
        3 => (0..FAMILIES.len()).prop_map(|f| vec![FAMILIES[f].to_string()]),
        2 => key_strategy(),
    ]
}

/// Operations that can be performed on the cache.
#[derive(Debug, Clone)]
pub enum CacheOperation {
    /// Read a key; the fetcher, if it runs, yields `value`.
    Fetch { key: Vec<String>, value: u32 },
    /// Invalidate every key under a prefix.
    Invalidate { prefix: Vec<String> },
    /// Drop a key's cached data.
    Remove { key: Vec<String> },
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EntryModel {
    pub value: u32,
    pub stale: bool,
}

/// Reference model for the cache.
#[derive(Clone, Debug, Default)]
pub struct CacheModel {
    pub entries: BTreeMap<Vec<String>, EntryModel>,
    pub fetcher_calls: usize,
    pub last_read: Option<u32>,
    pub last_invalidated: Option<usize>,
}

impl ReferenceStateMachine for CacheModel {
    type State = Self;
    type Transition = CacheOperation;

    fn init_state() -> BoxedStrategy<Self::State> {
        Just(Self::default()).boxed()
    }

    fn transitions(_state: &Self::State) -> BoxedStrategy<Self::Transition> {
        prop_oneof![
            4 => (key_strategy(), 0u32..1000).prop_map(|(key, value)| CacheOperation::Fetch { key, value }),
            2 => prefix_strategy().prop_map(|prefix| CacheOperation::Invalidate { prefix }),
            1 => key_strategy().prop_map(|key| CacheOperation::Remove { key }),
        ]
        .boxed()
    }

    fn apply(mut state: Self::State, transition: &Self::Transition) -> Self::State {
        state.last_read = None;
        state.last_invalidated = None;

        match transition {
            CacheOperation::Fetch { key, value } => match state.entries.get_mut(key) {
                Some(entry) if !entry.stale => {
                    state.last_read = Some(entry.value);
                }
                _ => {
                    state.fetcher_calls += 1;
                    state.entries.insert(
                        key.clone(),
                        EntryModel {
                            value: *value,
                            stale: false,
                        },
                    );
                    state.last_read = Some(*value);
                }
            },
            CacheOperation::Invalidate { prefix } => {
                let mut matched = 0;
                for (key, entry) in state.entries.iter_mut() {
                    if key.starts_with(prefix) {
                        entry.stale = true;
                        matched += 1;
                    }
                }
                state.last_invalidated = Some(matched);
            }
            CacheOperation::Remove { key } => {
                state.entries.remove(key);
            }
        }
        state
    }
}

/// Test harness that wraps the real QueryCache with a tokio runtime.
pub struct CacheTestHarness {
    runtime: Runtime,
    cache: Arc<QueryCache>,
    fetcher_calls: Arc<AtomicUsize>,
    last_read: Option<u32>,
    last_invalidated: Option<usize>,
}

impl CacheTestHarness {
    fn new() -> Self {
        let runtime = Runtime::new().expect("Failed to create tokio runtime");
        Self {
            runtime,
            cache: QueryCache::new(CacheConfig::default()),
            fetcher_calls: Arc::new(AtomicUsize::new(0)),
            last_read: None,
            last_invalidated: None,
        }
    }

    fn apply_operation(&mut self, op: &CacheOperation) {
        self.last_read = None;
        self.last_invalidated = None;

        match op {
            CacheOperation::Fetch { key, value } => {
                let calls = Arc::clone(&self.fetcher_calls);
                let value = *value;
                let result = self.runtime.block_on(self.cache.fetch(key_of(key), move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, StoreError>(value)
                }));
                self.last_read = Some(*result.expect("fetch should succeed"));
            }
            CacheOperation::Invalidate { prefix } => {
                self.last_invalidated = Some(self.cache.invalidate(&key_of(prefix)));
            }
            CacheOperation::Remove { key } => {
                self.cache.remove(&key_of(key));
            }
        }
    }

    fn verify_invariants(&self, model: &CacheModel) {
        // Invariant 1: reads return what the model predicts
        assert_eq!(self.last_read, model.last_read, "read mismatch");

        // Invariant 2: fetchers run only on miss or stale
        assert_eq!(
            self.fetcher_calls.load(Ordering::SeqCst),
            model.fetcher_calls,
            "fetcher call count mismatch"
        );

        // Invariant 3: invalidation matches exactly the prefixed keys
        assert_eq!(
            self.last_invalidated, model.last_invalidated,
            "invalidation count mismatch"
        );

        // Invariant 4: per-key value and staleness agree
        for family in FAMILIES {
            for owner in OWNERS {
                let parts = vec![family.to_string(), owner.to_string()];
                let key = key_of(&parts);
                let expected = model.entries.get(&parts);
                assert_eq!(
                    self.cache.is_stale(&key),
                    expected.map(|e| e.stale),
                    "staleness mismatch for {}",
                    key
                );
                assert_eq!(
                    self.cache.get::<u32>(&key).map(|v| *v),
                    expected.map(|e| e.value),
                    "value mismatch for {}",
                    key
                );
            }
        }
        assert_eq!(self.cache.len(), model.entries.len());
    }
}

impl StateMachineTest for CacheTestHarness {
    type SystemUnderTest = Self;
    type Reference = CacheModel;

    fn init_test(
        _ref_state: &<Self::Reference as ReferenceStateMachine>::State,
    ) -> Self::SystemUnderTest {
        Self::new()
    }

    fn apply(
        mut state: Self::SystemUnderTest,
        ref_state: &<Self::Reference as ReferenceStateMachine>::State,
        transition: <Self::Reference as ReferenceStateMachine>::Transition,
    ) -> Self::SystemUnderTest {
        state.apply_operation(&transition);
        state.verify_invariants(ref_state);
        state
    }

    fn check_invariants(
        state: &Self::SystemUnderTest,
        ref_state: &<Self::Reference as ReferenceStateMachine>::State,
    ) {
        state.verify_invariants(ref_state);
    }
}

prop_state_machine! {
    #![proptest_config(ProptestConfig {
        cases: 100,
        max_shrink_iters: 10000,
        ..ProptestConfig::default()
    })]

    #[test]
    fn cache_state_machine_test(sequential 1..50 => CacheTestHarness);
}

// Additional targeted tests

#[test]
fn test_empty_prefix_matches_everything() {
    let rt = Runtime::new().unwrap();
    let cache = QueryCache::new(CacheConfig::default());
    rt.block_on(async {
        for owner in OWNERS {
            cache
                .fetch(query_key!["tasks", *owner], || async { Ok::<_, StoreError>(1u32) })
                .await
                .unwrap();
        }
    });
    assert_eq!(cache.invalidate(&QueryKey::default()), OWNERS.len());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    #[test]
    fn prefix_matches_iff_leading_parts_equal(
        key in prop::collection::vec(0i64..3, 0..5),
        prefix in prop::collection::vec(0i64..3, 0..5),
    ) {
        let k = QueryKey::new(key.iter().copied().map(KeyPart::from).collect());
        let p = QueryKey::new(prefix.iter().copied().map(KeyPart::from).collect());
        let expected = prefix.len() <= key.len() && key[..prefix.len()] == prefix[..];
        prop_assert_eq!(k.starts_with(&p), expected);
    }
}
