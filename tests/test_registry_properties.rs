//! Property tests for the session registry
//!
//! Random sequences of registry operations must never leave a device in both
//! maps, and the status projection must always agree with map membership.

use devfleet::config::{ConnectionMethod, DeviceDescriptor};
use devfleet::fleet::{DeviceStatus, Release, Session, SessionRegistry};
use devfleet::transport::SessionOptions;
use proptest::prelude::*;
use std::sync::Arc;

const DEVICES: [&str; 3] = ["D1", "D2", "D3"];

#[derive(Debug, Clone)]
enum Op {
    Enqueue(usize),
    PromoteQueued(usize),
    ParkQueued(usize),
    ConfirmConnected(usize),
    MarkDisconnected(usize),
    Release(usize, bool),
    ReleaseFresh(usize),
    TakeForReconnect(usize),
    RecordDisabled(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    let id = 0..DEVICES.len();
    prop_oneof![
        id.clone().prop_map(Op::Enqueue),
        id.clone().prop_map(Op::PromoteQueued),
        id.clone().prop_map(Op::ParkQueued),
        id.clone().prop_map(Op::ConfirmConnected),
        id.clone().prop_map(Op::MarkDisconnected),
        (id.clone(), any::<bool>()).prop_map(|(i, manual)| Op::Release(i, manual)),
        id.clone().prop_map(Op::ReleaseFresh),
        id.clone().prop_map(Op::TakeForReconnect),
        id.prop_map(Op::RecordDisabled),
    ]
}

fn new_session(dev_id: &str) -> Arc<Session> {
    Session::new(
        Arc::new(DeviceDescriptor::new(
            dev_id,
            "localhost",
            1883,
            ConnectionMethod::Basic,
        )),
        ConnectionMethod::Basic,
        SessionOptions::new(dev_id, "localhost", 1883),
    )
}

async fn apply(registry: &SessionRegistry, current: &mut [Arc<Session>], op: &Op) {
    match *op {
        Op::Enqueue(i) => {
            let session = new_session(DEVICES[i]);
            if registry.enqueue(&session).await {
                current[i] = session;
            }
        }
        Op::PromoteQueued(i) => {
            registry.promote_queued(&current[i]).await;
        }
        Op::ParkQueued(i) => {
            registry.park_queued(&current[i]).await;
        }
        Op::ConfirmConnected(i) => {
            registry.confirm_connected(&current[i]).await;
        }
        Op::MarkDisconnected(i) => {
            registry.mark_disconnected(&current[i]).await;
        }
        Op::Release(i, manual) => {
            let release = registry.release(&current[i], manual).await;
            if release != Release::Stale {
                // A late connect for a released session must not revive it
                assert!(!registry.confirm_connected(&current[i]).await);
                assert!(!registry.membership(DEVICES[i]).await.connected);
            }
        }
        Op::ReleaseFresh(i) => {
            let before = registry.membership(DEVICES[i]).await;
            if before.connected {
                let release = registry.release(&new_session(DEVICES[i]), false).await;
                assert_eq!(release, Release::Stale);
                assert_eq!(registry.membership(DEVICES[i]).await, before);
            }
        }
        Op::TakeForReconnect(i) => {
            let session = new_session(DEVICES[i]);
            if registry.take_for_reconnect(&session).await {
                current[i] = session;
            }
        }
        Op::RecordDisabled(i) => {
            registry.record_disabled(DEVICES[i]).await;
        }
    }
}

async fn check_invariants(registry: &SessionRegistry) -> Result<(), String> {
    for dev_id in DEVICES {
        let m = registry.membership(dev_id).await;
        if m.connected && m.disconnected {
            return Err(format!("{dev_id} is in both maps: {m:?}"));
        }
        if m.connected && m.queued {
            return Err(format!("{dev_id} is connected and queued: {m:?}"));
        }
        if m.connected != (m.status == Some(DeviceStatus::Connected)) {
            return Err(format!("{dev_id} status disagrees with connected map: {m:?}"));
        }
        if (m.disconnected || m.queued) && m.status != Some(DeviceStatus::Disconnected) {
            return Err(format!("{dev_id} is waiting but not DISCONNECTED: {m:?}"));
        }
    }
    Ok(())
}

proptest! {
    #[test]
    fn registry_invariants_hold(ops in prop::collection::vec(op_strategy(), 1..64)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();

        let result = runtime.block_on(async {
            let registry = SessionRegistry::new();
            let mut current: Vec<Arc<Session>> = DEVICES.iter().map(|d| new_session(d)).collect();

            for op in &ops {
                apply(&registry, &mut current, op).await;
                check_invariants(&registry).await.map_err(|e| format!("after {op:?}: {e}"))?;
            }
            Ok::<(), String>(())
        });

        prop_assert!(result.is_ok(), "{}", result.unwrap_err());
    }

    #[test]
    fn snapshot_matches_membership(ops in prop::collection::vec(op_strategy(), 1..32)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();

        runtime.block_on(async {
            let registry = SessionRegistry::new();
            let mut current: Vec<Arc<Session>> = DEVICES.iter().map(|d| new_session(d)).collect();
            for op in &ops {
                apply(&registry, &mut current, op).await;
            }

            let snapshot = registry.status_snapshot().await;
            for dev_id in DEVICES {
                let m = registry.membership(dev_id).await;
                assert_eq!(snapshot.get(dev_id).copied(), m.status);
            }
        });
    }
}
