//! Cluster convergence tests using deterministic simulation.
//!
//! Random lifecycle sequences run against a cluster on a paused clock. After
//! every step the instantaneous manifest invariants must hold; once the
//! sequence ends every survivor must hold the same manifest.

use std::time::Duration;

use fedline_core::FederationConfig;
use fedline_harness::{InvariantRegistry, TestCluster};
use fedline_proto::{Category, Message, ResignAction};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Step {
    Join(usize),
    Resign(usize),
    Send(usize),
    Disconnect(usize),
    Crash(usize),
}

fn step_strategy(size: usize) -> impl Strategy<Value = Step> {
    prop_oneof![
        4 => (0..size).prop_map(Step::Join),
        2 => (0..size).prop_map(Step::Resign),
        2 => (0..size).prop_map(Step::Send),
        1 => (0..size).prop_map(Step::Disconnect),
        1 => (0..size).prop_map(Step::Crash),
    ]
}

fn config() -> FederationConfig {
    FederationConfig::default()
        .with_discovery_timeout(Duration::from_millis(50))
        .with_response_timeout(Duration::from_millis(200))
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
        .expect("runtime")
}

/// Apply `step`, ignoring precondition failures. Departures never take the
/// last live process.
async fn apply(cluster: &mut TestCluster, step: &Step) {
    let live = cluster.live();
    match *step {
        Step::Join(index) if live.contains(&index) => {
            let _ = cluster.join(index, &format!("federate-{index}")).await;
        },
        Step::Resign(index) if live.contains(&index) => {
            let _ = cluster.resign(index, ResignAction::NoAction).await;
        },
        Step::Send(index) if live.contains(&index) => {
            let message = Message::receive_order(0, Category::Interaction, &b"tick"[..]);
            let _ = cluster.send(index, message).await;
        },
        Step::Disconnect(index) if live.contains(&index) && live.len() > 1 => {
            cluster.disconnect(index).await;
        },
        Step::Crash(index) if live.contains(&index) && live.len() > 1 => {
            cluster.crash(index).await;
        },
        _ => {},
    }
}

async fn run_sequence(seed: u64, size: usize, steps: &[Step]) -> Result<(), String> {
    let mut cluster = TestCluster::new(seed, size, "convergence", &config())
        .map_err(|e| format!("cluster: {e}"))?;
    cluster.connect_all().await.map_err(|e| format!("connect: {e}"))?;
    cluster.create(0, b"fom").await.map_err(|e| format!("create: {e}"))?;

    let standard = InvariantRegistry::standard();
    for step in steps {
        apply(&mut cluster, step).await;
        standard.check_all(&cluster.snapshot()).map_err(|violations| {
            let messages: Vec<_> = violations.iter().map(ToString::to_string).collect();
            format!("after {step:?}:\n  {}", messages.join("\n  "))
        })?;
    }

    InvariantRegistry::quiescent().check_all(&cluster.snapshot()).map_err(|violations| {
        let messages: Vec<_> = violations.iter().map(ToString::to_string).collect();
        format!("at quiescence:\n  {}", messages.join("\n  "))
    })?;

    if cluster.coordinators().len() != 1 {
        return Err(format!("coordinators: {:?}", cluster.coordinators()));
    }

    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Whatever the lifecycle sequence, survivors converge on one manifest
    /// with exactly one coordinator.
    #[test]
    fn prop_lifecycle_sequences_converge(
        seed in 1u64..10000,
        (size, steps) in (2usize..5).prop_flat_map(|size| {
            (Just(size), prop::collection::vec(step_strategy(size), 0..20))
        }),
    ) {
        let result = runtime().block_on(run_sequence(seed, size, &steps));
        prop_assert!(result.is_ok(), "{}", result.unwrap_err());
    }

    /// A crashed federate is resigned on every survivor exactly once.
    #[test]
    fn prop_crash_resigns_once(seed in 1u64..10000, size in 2usize..5, victim_offset in 0usize..4) {
        let victim = victim_offset % size;
        let notices = runtime().block_on(async {
            let mut cluster = TestCluster::new(seed, size, "crash", &config()).expect("cluster");
            cluster.connect_all().await.expect("connect");
            cluster.create(0, b"fom").await.expect("create");
            for index in 0..size {
                cluster.join(index, &format!("federate-{index}")).await.expect("join");
            }

            cluster.crash(victim).await;

            cluster
                .live()
                .into_iter()
                .map(|index| cluster.process(index).handler.resignations())
                .collect::<Vec<_>>()
        });

        prop_assert_eq!(notices.len(), size - 1);
        for received in notices {
            prop_assert_eq!(received.len(), 1);
            prop_assert!(received[0].synthesized);
            prop_assert_eq!(&received[0].federate_name, &format!("federate-{victim}"));
        }
    }
}

#[test]
fn test_same_seed_same_identities() {
    let ids = |seed| {
        let cluster = TestCluster::new(seed, 3, "ids", &config()).expect("cluster");
        (0..3).map(|index| cluster.process(index).id()).collect::<Vec<_>>()
    };

    assert_eq!(ids(9), ids(9));
    assert_ne!(ids(9), ids(10));
}
