//! Property-based tests for the heap, the results containers and the query
//! parameter resolver.

use std::collections::HashMap;

use proptest::prelude::*;
use tierann::heap::UpdatableMaxHeap;
use tierann::results::{DefaultResults, QueryResult, ResultsContainer, UniqueResults};
use tierann::{resolve_params, ParamError, QueryConfig, QueryKind, QueryReply, RawParam, SearchMode};

fn resolve(pairs: &[(String, String)], kind: QueryKind) -> Result<QueryConfig, ParamError> {
    let params: Vec<RawParam<'_>> = pairs
        .iter()
        .map(|(n, v)| RawParam::new(n.as_str(), v.as_str()))
        .collect();
    let mut cfg = QueryConfig::default();
    resolve_params(&params, Some(&mut cfg), kind)?;
    Ok(cfg)
}

mod heap_props {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn size_counts_distinct_values(ops in prop::collection::vec((0u32..40, -100i64..100), 0..200)) {
            let mut heap = UpdatableMaxHeap::<i64, u32>::new();
            let mut model: HashMap<u32, i64> = HashMap::new();
            for (value, priority) in ops {
                let before = heap.size();
                let present = model.contains_key(&value);
                heap.emplace(priority, value);
                model.insert(value, priority);
                prop_assert_eq!(heap.size(), model.len());
                if present {
                    prop_assert_eq!(heap.size(), before);
                }
            }
            for (value, priority) in &model {
                prop_assert_eq!(heap.priority_of(value), Some(*priority));
            }
        }

        #[test]
        fn pop_order_is_non_increasing(ops in prop::collection::vec((0u32..30, 0i64..10), 1..150)) {
            let mut heap = UpdatableMaxHeap::<i64, u32>::new();
            for (value, priority) in ops {
                heap.emplace(priority, value);
            }
            let mut last: Option<(i64, u32)> = None;
            while let Some((p, v)) = heap.pop() {
                if let Some((lp, lv)) = last {
                    prop_assert!(p < lp || (p == lp && v < lv),
                        "({}, {}) popped after ({}, {})", p, v, lp, lv);
                }
                last = Some((p, v));
            }
            prop_assert!(heap.is_empty());
        }

        #[test]
        fn float_priorities_total_order(values in prop::collection::vec(-1e6f64..1e6, 1..100)) {
            let mut heap = UpdatableMaxHeap::<f64, usize>::new();
            for (i, p) in values.iter().enumerate() {
                heap.emplace(*p, i);
            }
            let sorted = heap.into_sorted_vec();
            prop_assert_eq!(sorted.len(), values.len());
            prop_assert!(sorted.windows(2).all(|w| w[0].0 <= w[1].0));
        }
    }
}

mod container_props {
    use super::*;

    fn arb_results() -> impl Strategy<Value = Vec<QueryResult>> {
        prop::collection::vec((0u32..50, 0u64..20, 0.0f64..100.0), 0..100).prop_map(|v| {
            v.into_iter()
                .map(|(id, label, score)| QueryResult { id, label, score })
                .collect()
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn default_keeps_everything(input in arb_results()) {
            let mut c = DefaultResults::with_capacity(input.len());
            for r in &input {
                c.emplace(*r);
            }
            prop_assert_eq!(c.len(), input.len());
            prop_assert_eq!(c.into_results(), input);
        }

        #[test]
        fn unique_keeps_last_per_label(input in arb_results()) {
            let mut c = UniqueResults::with_capacity(input.len());
            let mut last: HashMap<u64, QueryResult> = HashMap::new();
            for r in &input {
                c.emplace(*r);
                last.insert(r.label, *r);
            }
            let out = c.into_results();
            prop_assert_eq!(out.len(), last.len());
            for r in out {
                prop_assert_eq!(Some(&r), last.get(&r.label));
            }
        }

        #[test]
        fn iterator_outlives_reply_and_resets(input in arb_results()) {
            let reply = QueryReply::new(input.clone());
            let mut it = reply.iter();
            drop(reply);
            let first: Vec<QueryResult> = it.by_ref().collect();
            prop_assert_eq!(&first, &input);
            prop_assert!(!it.has_next());
            it.reset();
            prop_assert_eq!(it.position(), 0);
            let second: Vec<QueryResult> = it.collect();
            prop_assert_eq!(second, input);
        }
    }
}

mod resolver_props {
    use super::*;

    fn case_variants(name: &'static str) -> impl Strategy<Value = String> {
        prop::collection::vec(any::<bool>(), name.len()).prop_map(move |upper| {
            name.chars()
                .zip(upper)
                .map(|(c, u)| if u { c.to_ascii_uppercase() } else { c })
                .collect()
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(300))]

        #[test]
        fn batched_pairs_succeed(
            batch in 1i64..=i64::MAX,
            name in case_variants("batch_size"),
            policy in prop_oneof![Just("batches"), Just("BATCHES"), Just("batched")],
            with_policy in any::<bool>(),
        ) {
            let mut pairs = vec![(name, batch.to_string())];
            if with_policy {
                pairs.push(("hybrid_policy".to_string(), policy.to_string()));
            }
            let cfg = resolve(&pairs, QueryKind::Hybrid).unwrap();
            prop_assert_eq!(cfg.batch_size as i64, batch);
            let mode = if with_policy { SearchMode::Batched } else { SearchMode::Empty };
            prop_assert_eq!(cfg.search_mode, mode);
        }

        #[test]
        fn adhoc_with_batch_size_always_fails(
            batch in "[0-9a-z+-]{0,8}",
            policy in prop_oneof![Just("adhoc_bf"), Just("ADHOC_BF"), Just("adhoc")],
            policy_first in any::<bool>(),
        ) {
            let b = ("batch_size".to_string(), batch);
            let p = ("hybrid_policy".to_string(), policy.to_string());
            let pairs = if policy_first { vec![p, b] } else { vec![b, p] };
            prop_assert_eq!(
                resolve(&pairs, QueryKind::Hybrid),
                Err(ParamError::AdHocWithBatchSize)
            );
        }

        #[test]
        fn duplicate_names_fail(
            a in "[0-9]{1,4}",
            b in "[0-9]{1,4}",
            name in prop_oneof![Just("batch_size"), Just("hybrid_policy"), Just("ef_runtime")],
            upper in any::<bool>(),
        ) {
            let second = if upper { name.to_ascii_uppercase() } else { name.to_string() };
            let pairs = vec![(name.to_string(), a), (second, b)];
            prop_assert_eq!(resolve(&pairs, QueryKind::Hybrid), Err(ParamError::AlreadySet));
        }

        #[test]
        fn non_canonical_numbers_are_bad(
            text in prop_oneof![
                "0[0-9]{0,5}",
                "[+-][1-9][0-9]{0,5}",
                " [1-9][0-9]{0,3}",
                "[1-9][0-9]{0,3} ",
                "[1-9][0-9]{0,3}[a-z.]",
                "9223372036854775808",
                "[1-9][0-9]{19,25}",
            ],
        ) {
            let pairs = vec![("batch_size".to_string(), text)];
            prop_assert_eq!(resolve(&pairs, QueryKind::Hybrid), Err(ParamError::BadValue));
        }

        #[test]
        fn hybrid_only_names_need_hybrid_kind(
            kind in prop_oneof![Just(QueryKind::None), Just(QueryKind::Knn), Just(QueryKind::Range)],
            use_batch in any::<bool>(),
        ) {
            let pair = if use_batch {
                ("batch_size".to_string(), "10".to_string())
            } else {
                ("hybrid_policy".to_string(), "batches".to_string())
            };
            prop_assert_eq!(resolve(&[pair], kind), Err(ParamError::NotHybrid));
        }
    }
}
