//! Property tests for capability merging and dependency-closure folding:
//! provenance only widens, readers only narrow, trust never reappears.

use std::collections::BTreeSet;

use proptest::prelude::*;

use capscript::runtime::{
    Capability, DataSource, ReaderSet, TaggedValue, Value, ValueArena,
};

fn arb_source() -> impl Strategy<Value = DataSource> {
    prop_oneof![
        Just(DataSource::user()),
        Just(DataSource::tool("get_file")),
        Just(DataSource::tool("get_contacts")),
        Just(DataSource::tool_with_inner("send_email", "email_participants")),
        Just(DataSource::quarantine("extract_data")),
        Just(DataSource::derived()),
    ]
}

fn arb_readers() -> impl Strategy<Value = ReaderSet> {
    let principals = prop::collection::btree_set(
        prop_oneof![
            Just("alice".to_string()),
            Just("bob".to_string()),
            Just("carol".to_string()),
            Just("dave".to_string()),
        ],
        0..4,
    );
    prop_oneof![
        Just(ReaderSet::Public),
        principals.prop_map(ReaderSet::Principals),
    ]
}

fn arb_capability() -> impl Strategy<Value = Capability> {
    (
        prop::collection::btree_set(arb_source(), 0..4),
        arb_readers(),
    )
        .prop_map(|(sources, readers)| Capability { sources, readers })
}

fn reader_names(readers: &ReaderSet) -> Option<BTreeSet<String>> {
    match readers {
        ReaderSet::Public => None,
        ReaderSet::Principals(names) => Some(names.clone()),
    }
}

proptest! {
    #[test]
    fn merge_only_widens_sources(a in arb_capability(), b in arb_capability()) {
        let merged = a.merge(&b);
        prop_assert!(merged.sources.is_superset(&a.sources));
        prop_assert!(merged.sources.is_superset(&b.sources));
    }

    #[test]
    fn merge_only_narrows_readers(a in arb_capability(), b in arb_capability()) {
        let merged = a.merge(&b);
        match (reader_names(&a.readers), reader_names(&b.readers)) {
            (None, None) => prop_assert_eq!(merged.readers, ReaderSet::Public),
            (Some(names), None) | (None, Some(names)) => {
                prop_assert_eq!(merged.readers, ReaderSet::Principals(names));
            }
            (Some(a_names), Some(b_names)) => {
                let merged_names = reader_names(&merged.readers).expect("principals stay principals");
                prop_assert!(merged_names.is_subset(&a_names));
                prop_assert!(merged_names.is_subset(&b_names));
            }
        }
    }

    #[test]
    fn merge_is_commutative_on_identity(a in arb_capability(), b in arb_capability()) {
        let ab = a.merge(&b);
        let ba = b.merge(&a);
        prop_assert_eq!(ab.sources, ba.sources);
        prop_assert_eq!(ab.readers, ba.readers);
    }

    #[test]
    fn merged_capability_covers_every_dependency(caps in prop::collection::vec(arb_capability(), 1..6)) {
        let mut arena = ValueArena::new();
        let leaves: Vec<_> = caps
            .iter()
            .map(|capability| {
                arena.insert(TaggedValue {
                    raw: Value::Int(0),
                    capability: capability.clone(),
                    deps: Vec::new(),
                })
            })
            .collect();

        // Chain the leaves so only the first is a direct dependency: the
        // closure has to walk the whole chain transitively.
        for window in leaves.windows(2) {
            arena.add_dependency(window[0], window[1]);
        }
        let top = arena.derived(Value::Int(1), vec![leaves[0]]);
        let merged = arena.merged_capability(top);

        for capability in &caps {
            prop_assert!(merged.sources.is_superset(&capability.sources));
            if let Some(names) = reader_names(&capability.readers) {
                let merged_names = reader_names(&merged.readers)
                    .expect("a principal-restricted input keeps the result restricted");
                prop_assert!(merged_names.is_subset(&names));
            }
        }
    }

    #[test]
    fn one_tainted_dependency_breaks_trust(caps in prop::collection::vec(arb_capability(), 1..6)) {
        let mut arena = ValueArena::new();
        let deps: Vec<_> = caps
            .iter()
            .map(|capability| {
                arena.insert(TaggedValue {
                    raw: Value::Int(0),
                    capability: capability.clone(),
                    deps: Vec::new(),
                })
            })
            .collect();
        let top = arena.insert(TaggedValue {
            raw: Value::Int(1),
            capability: Capability::user_literal(),
            deps,
        });

        let any_tainted = caps.iter().any(|c| !c.is_trusted());
        prop_assert_eq!(arena.is_trusted(top), !any_tainted);
    }
}
