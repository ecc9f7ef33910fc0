//! Property tests across the core and storage crates.

use proptest::prelude::*;
use typedidb_core::{StoreCompatibility, TransactionMode};
use typedidb_testkit::prelude::*;

fn cases(n: u32) -> ProptestConfig {
    ProptestConfig {
        cases: n,
        ..ProptestConfig::default()
    }
}

proptest! {
    #![proptest_config(cases(48))]

    /// Reopening at a higher version with the same schema changes nothing,
    /// under either compatibility rule.
    #[test]
    fn reconcile_is_idempotent(schema in schema_strategy(), exact in any::<bool>()) {
        let rule = if exact {
            StoreCompatibility::Exact
        } else {
            StoreCompatibility::KeyPathOrAutoIncrement
        };
        let env = TestEnv::with_config(
            schema.clone(),
            typedidb_core::Config::new().store_compatibility(rule),
        );
        let name = unique_db_name("idempotent");
        let first = open_with(&env, schema.clone(), &name, 1);
        prop_assert!(first.actions.iter().all(|a| a.is_change()));

        let second = open_with(&env, schema.clone(), &name, 2);
        prop_assert!(second.is_noop(), "{:?}", second);

        let description = env.engine.describe(&name).unwrap();
        prop_assert_eq!(description.stores.len(), schema.stores.len());
    }

    /// The factory orders keys the same way the codec does.
    #[test]
    fn factory_cmp_matches_key_order(a in key_strategy(), b in key_strategy()) {
        let env = TestEnv::new();
        prop_assert_eq!(env.factory.cmp(&a, &b), a.cmp(&b));
        prop_assert_eq!(env.factory.cmp(&b, &a), a.cmp(&b).reverse());
    }

    /// Any valid key round-trips through an out-of-line store.
    #[test]
    fn out_of_line_keys_round_trip(key in key_strategy(), title in "[a-z]{1,12}") {
        with_test_db(|env, db| {
            let scope = db.transaction(&[OUT_OF_LINE_STORE], TransactionMode::ReadWrite).unwrap();
            let store = scope.store::<Note>(OUT_OF_LINE_STORE).unwrap();
            let reader = store.clone();
            let note = Note::new(title.clone());
            let read = store
                .put_with_key(&note, key.clone())
                .unwrap()
                .and_then(move |stored| {
                    assert_eq!(stored, key);
                    reader.get(stored)
                });
            let read = env.run(scope.after_commit(read)).unwrap();
            assert_eq!(read, Some(note));
        });
    }
}

proptest! {
    #![proptest_config(cases(16))]

    /// However long the chain, every link runs in the one transaction and
    /// it commits.
    #[test]
    fn chains_of_any_length_commit(length in 1usize..400) {
        with_test_db(|env, db| {
            typedidb_testkit::integration::chaining::long_chain_stays_live(env, db, length);
        });
    }
}
