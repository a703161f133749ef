// End-to-end billing over localhost TCP: one edge, ten cores, pairwise
// seed exchange through gossip, data submission, encrypted billing, and
// bill retrieval over the wire.

use privbill_core::{Bill, Data, Vector};
use privbill_network::{framing, run, Envelope, Message, Payload};
use privbill_node::{CoreServer, EdgeServer};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::{watch, Mutex};

const CYCLE_LENGTH: usize = 8;
const CYCLE_ID: u64 = 1;

struct Harness {
    edge: SocketAddr,
    cores: Vec<(SocketAddr, Arc<Mutex<CoreServer>>)>,
    // keeps every server loop alive until the harness drops
    shutdown: Vec<watch::Sender<bool>>,
}

impl Harness {
    async fn start(core_count: usize) -> Self {
        let mut shutdown = Vec::new();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let edge = listener.local_addr().unwrap();
        let server = Arc::new(Mutex::new(EdgeServer::new(edge, CYCLE_LENGTH)));
        let (tx, rx) = watch::channel(false);
        shutdown.push(tx);
        tokio::spawn(run(server, listener, rx));

        let mut cores = Vec::new();
        for _ in 0..core_count {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let server = Arc::new(Mutex::new(CoreServer::new(addr)));
            let (tx, rx) = watch::channel(false);
            shutdown.push(tx);
            tokio::spawn(run(Arc::clone(&server), listener, rx));
            server.lock().await.join(edge).await.unwrap();
            cores.push((addr, server));
        }

        Harness {
            edge,
            cores,
            shutdown,
        }
    }

    /// Block until every core has its hiding context and a completed
    /// seed exchange with every other core.
    async fn await_mesh(&self, deadline: Duration) {
        let expected_seeds = self.cores.len() - 1;
        let start = Instant::now();
        loop {
            let mut settled = 0;
            for (_, core) in &self.cores {
                let guard = core.lock().await;
                if guard.ready_to_submit() && guard.exchanged_seed_count() == expected_seeds {
                    settled += 1;
                }
            }
            if settled == self.cores.len() {
                return;
            }
            assert!(
                start.elapsed() < deadline,
                "mesh did not settle: {settled}/{} cores ready",
                self.cores.len()
            );
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }

    fn stop(self) {
        for tx in &self.shutdown {
            let _ = tx.send(true);
        }
    }
}

/// Operator-style plain injection, as `privbill send-context` and
/// friends would do it.
async fn inject(target: SocketAddr, body: Payload) -> Option<Message> {
    let message = Message {
        reply_address: "0.0.0.0:0".parse().unwrap(),
        body,
    };
    match framing::request(target, &Envelope::Plain(message))
        .await
        .unwrap()
    {
        None => None,
        Some(Envelope::Plain(message)) => Some(message),
        Some(Envelope::Signed(signed)) => Some(signed.decode().unwrap()),
    }
}

async fn get_bill(core: SocketAddr, cycle_id: u64) -> Option<Bill> {
    match inject(core, Payload::GetBill { cycle_id }).await {
        Some(Message {
            body: Payload::Bill { bill },
            ..
        }) => bill,
        _ => None,
    }
}

async fn await_bill(core: SocketAddr, cycle_id: u64, deadline: Duration) -> Bill {
    let start = Instant::now();
    loop {
        if let Some(bill) = get_bill(core, cycle_id).await {
            return bill;
        }
        assert!(
            start.elapsed() < deadline,
            "no bill from {core} within {deadline:?}"
        );
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_ten_party_cycle_bills_every_participant() {
    let harness = Harness::start(10).await;
    harness.await_mesh(Duration::from_secs(120)).await;

    // no bill exists before the cycle runs
    assert!(get_bill(harness.cores[0].0, CYCLE_ID).await.is_none());

    inject(
        harness.edge,
        Payload::CycleContext(privbill_core::CycleContext::flat(
            CYCLE_ID,
            CYCLE_LENGTH,
            0.21,
            0.05,
            0.11,
        )),
    )
    .await;

    // even parties promise and consume i, odd parties promise and
    // supply i; nobody deviates, so the totals balance out
    for (i, (addr, _)) in harness.cores.iter().enumerate() {
        let utilization = if i % 2 == 0 { i as f64 } else { -(i as f64) };
        let data = Data::new(
            0,
            CYCLE_ID,
            Vector::new(CYCLE_LENGTH, utilization),
            Vector::new(CYCLE_LENGTH, utilization),
        );
        inject(*addr, Payload::Data(data)).await;
    }

    for (i, (addr, _)) in harness.cores.iter().enumerate() {
        let bill = await_bill(*addr, CYCLE_ID, Duration::from_secs(300)).await;
        assert_eq!(bill.cycle_id, CYCLE_ID);

        let (expected_bill, expected_reward) = if i % 2 == 0 {
            (i as f64 * 0.11, 0.0)
        } else {
            (0.0, i as f64 * 0.11)
        };
        for slot in 0..CYCLE_LENGTH {
            assert!(
                (bill.bill[slot] - expected_bill).abs() < 1e-4,
                "core {i} slot {slot}: bill {} want {expected_bill}",
                bill.bill[slot]
            );
            assert!(
                (bill.reward[slot] - expected_reward).abs() < 1e-4,
                "core {i} slot {slot}: reward {} want {expected_reward}",
                bill.reward[slot]
            );
        }
    }

    harness.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_rejected_and_deviating_parties_settle_correctly() {
    let harness = Harness::start(3).await;
    harness.await_mesh(Duration::from_secs(60)).await;

    inject(
        harness.edge,
        Payload::CycleContext(privbill_core::CycleContext::flat(
            CYCLE_ID,
            CYCLE_LENGTH,
            0.21,
            0.05,
            0.11,
        )),
    )
    .await;

    // party 0: rejected consumer (no promise, consumes 1)
    // party 1: accepted consumer, over-consuming by 1
    // party 2: accepted producer, delivering as promised
    let profiles = [(0.0, 1.0), (1.0, 2.0), (-1.0, -1.0)];
    for ((addr, _), (promise, utilization)) in harness.cores.iter().zip(profiles) {
        let data = Data::new(
            0,
            CYCLE_ID,
            Vector::new(CYCLE_LENGTH, promise),
            Vector::new(CYCLE_LENGTH, utilization),
        );
        inject(*addr, Payload::Data(data)).await;
    }

    let rejected = await_bill(harness.cores[0].0, CYCLE_ID, Duration::from_secs(180)).await;
    let deviator = await_bill(harness.cores[1].0, CYCLE_ID, Duration::from_secs(180)).await;
    let producer = await_bill(harness.cores[2].0, CYCLE_ID, Duration::from_secs(180)).await;

    // total deviation is -1 (the deviating consumer), one p2p consumer
    let expected_deviator = 2.0 * 0.11 + (-1.0) * (0.21 - 0.11);
    for slot in 0..CYCLE_LENGTH {
        assert!((rejected.bill[slot] - 0.21).abs() < 1e-4);
        assert!(rejected.reward[slot].abs() < 1e-4);

        assert!(
            (deviator.bill[slot] - expected_deviator).abs() < 1e-4,
            "slot {slot}: {} want {expected_deviator}",
            deviator.bill[slot]
        );

        assert!((producer.reward[slot] - 0.11).abs() < 1e-4);
        assert!(producer.bill[slot].abs() < 1e-4);
    }

    harness.stop();
}
