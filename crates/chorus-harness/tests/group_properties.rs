//! Property-based tests for multi-member groups
//!
//! Any interleaving of senders, delivered to every receiver in any order,
//! decrypts to exactly what was sent and leaves no skipped keys behind.

use chorus_harness::{GroupCluster, evm_identities};
use proptest::prelude::*;

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(future)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_any_interleaving_decrypts_everywhere(
        seed in any::<u64>(),
        senders in prop::collection::vec(0usize..3, 1..20),
        order in any::<u64>(),
    ) {
        block_on(async {
            let cluster = GroupCluster::new(seed, evm_identities(3)).unwrap();
            let group_id = cluster.form_group("interleaved").await.unwrap();

            let mut sent = Vec::new();
            for (n, &from) in senders.iter().enumerate() {
                let plaintext = format!("{n}").into_bytes();
                let envelope = cluster.member(from).send_message(&group_id, &plaintext).await.unwrap();
                sent.push((from, envelope, plaintext));
            }

            let mut state = order;
            for i in (1..sent.len()).rev() {
                state = state.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
                let j = (state % (i as u64 + 1)) as usize;
                sent.swap(i, j);
            }

            for (from, envelope, plaintext) in &sent {
                for result in cluster.deliver(*from, envelope).await {
                    prop_assert_eq!(&result.unwrap(), plaintext);
                }
            }

            for member in cluster.members() {
                let session = member.get_session(&group_id).await.unwrap().unwrap();
                for (_, entry) in session.member_sender_keys() {
                    prop_assert_eq!(entry.state.cached_key_count(), 0);
                }
            }
            Ok(())
        })?;
    }
}
