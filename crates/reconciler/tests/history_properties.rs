//! Property tests for the bounded histories.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use proptest::prelude::*;
use warden_core::{DeviceId, Severity};
use warden_reconciler::memory::InMemoryDeviceRepository;
use warden_reconciler::{
    Failure, FailureType, GovernanceStore, InMemoryGovernanceStore, NewOperation,
    OperationJournal, OperationType, DEVICE_ENTITY, FAILURE_HISTORY_CAP,
};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #[test]
    fn journal_keeps_only_the_newest(cap in 1usize..20, recorded in 0usize..50) {
        let rt = runtime();
        let history = rt.block_on(async {
            let journal = OperationJournal::with_settings(
                Arc::new(InMemoryDeviceRepository::new()),
                true,
                cap,
            );
            for n in 0..recorded {
                let op = NewOperation::new(
                    OperationType::Update,
                    DEVICE_ENTITY,
                    format!("device-{n}"),
                    "test",
                );
                journal.record(op).await;
            }
            journal.history(None).await
        });

        prop_assert_eq!(history.len(), recorded.min(cap));
        let first_kept = recorded.saturating_sub(cap);
        for (offset, op) in history.iter().enumerate() {
            prop_assert_eq!(&op.entity_id, &format!("device-{}", first_kept + offset));
        }
    }

    #[test]
    fn failure_history_is_capped_per_device(per_device in proptest::collection::vec(0usize..25, 1..4)) {
        let rt = runtime();
        let store = InMemoryGovernanceStore::new();
        rt.block_on(async {
            for (index, count) in per_device.iter().enumerate() {
                for _ in 0..*count {
                    let failure = Failure::new(
                        DeviceId::new(format!("device-{index}")),
                        FailureType::HeartbeatTimeout,
                        Severity::High,
                        "timeout",
                    );
                    store.record_failure(failure).await;
                }
            }
        });

        for (index, count) in per_device.iter().enumerate() {
            let device_id = DeviceId::new(format!("device-{index}"));
            let kept = rt.block_on(store.failure_history(Some(&device_id))).len();
            prop_assert_eq!(kept, (*count).min(FAILURE_HISTORY_CAP));
        }
        let total: usize = per_device.iter().map(|c| (*c).min(FAILURE_HISTORY_CAP)).sum();
        prop_assert_eq!(rt.block_on(store.failure_history(None)).len(), total);
    }
}
