//! LegWorker behaviour under a real supervisor and an in-memory ledger

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use swapguard_htlc::{ChainError, PosixMs, Secret, SecretHash, SwapError, SwapState};
use swapguard_node::{
    ChainClient, LegContext, LegRole, LegWatch, LegWorker, MemoryChain, MemoryWallet,
    SecretSource, SignedTx, TxHash, Utxo, UtxoRef,
};
use swapguard_retry::RetryPolicy;
use swapguard_supervisor::{
    RestartBudget, Supervisor, SupervisorConfig, SupervisorError, SupervisorEvent,
};
use swapguard_test_utils::{rules, secret, terms, ManualClock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;

const START: PosixMs = 1_000_000;
const DEADLINE: PosixMs = 5_000_000;
const AMOUNT: u64 = 5_000_000;
const TICK: Duration = Duration::from_millis(10);

struct Ledger {
    clock: ManualClock,
    chain: Arc<MemoryChain>,
    utxo: Utxo,
}

fn ledger() -> Ledger {
    let clock = ManualClock::new(START);
    let chain = Arc::new(MemoryChain::new("ledger", clock.clone(), rules()));
    chain.fund("alice", 10_000_000);
    let utxo = chain.lock(terms(AMOUNT, DEADLINE)).unwrap();
    Ledger { clock, chain, utxo }
}

/// Ledger whose first `drops` accepted submissions answer with a timeout
struct LostReplies {
    inner: Arc<MemoryChain>,
    drops: AtomicU32,
}

#[async_trait]
impl ChainClient for LostReplies {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn fetch_utxo(&self, reference: &UtxoRef) -> Result<Option<Utxo>, ChainError> {
        self.inner.fetch_utxo(reference).await
    }

    async fn settled_state(&self, reference: &UtxoRef) -> Result<Option<SwapState>, ChainError> {
        self.inner.settled_state(reference).await
    }

    async fn submit(&self, tx: &SignedTx) -> Result<TxHash, ChainError> {
        let hash = self.inner.submit(tx).await?;
        let dropped = self
            .drops
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if dropped {
            return Err(ChainError::Timeout);
        }
        Ok(hash)
    }

    async fn now_ms(&self) -> Result<PosixMs, ChainError> {
        self.inner.now_ms().await
    }

    async fn revealed_secret(&self, hash: &SecretHash) -> Result<Option<Secret>, ChainError> {
        self.inner.revealed_secret(hash).await
    }
}

fn lossy(chain: &Arc<MemoryChain>, party: &str, drops: u32) -> LegContext {
    LegContext {
        chain: Arc::new(LostReplies {
            inner: Arc::clone(chain),
            drops: AtomicU32::new(drops),
        }),
        wallet: Arc::new(MemoryWallet::new(party)),
        rules: rules(),
        retry: RetryPolicy::new(3, 1_000, 30_000),
        poll_interval: TICK,
    }
}

fn strict() -> SupervisorConfig {
    SupervisorConfig::new("legs").with_tree_budget(RestartBudget::new(0, 60_000, 0))
}

fn context(chain: &Arc<MemoryChain>, party: &str, retry: RetryPolicy) -> LegContext {
    LegContext {
        chain: Arc::clone(chain) as Arc<dyn ChainClient>,
        wallet: Arc::new(MemoryWallet::new(party)),
        rules: rules(),
        retry,
        poll_interval: TICK,
    }
}

fn supervisor(ledger: &Ledger, config: SupervisorConfig) -> Supervisor {
    Supervisor::with_clock(config, Arc::new(ledger.clock.clone()))
}

fn add(
    sup: &mut Supervisor,
    ledger: &Ledger,
    name: &str,
    role: LegRole,
    party: &str,
    retry: RetryPolicy,
    budget: RestartBudget,
) -> LegWatch {
    let worker = LegWorker::new(
        role,
        ledger.utxo.reference.clone(),
        ledger.utxo.leg.clone(),
        context(&ledger.chain, party, retry),
        sup.reporter(name),
    );
    let watch = worker.watch();
    sup.register(name, budget, worker).unwrap();
    watch
}

/// Drain events; `stop` fires once `until` matches an event
fn collect(
    mut events: mpsc::Receiver<SupervisorEvent>,
    until: fn(&SupervisorEvent) -> bool,
) -> (JoinHandle<Vec<SupervisorEvent>>, mpsc::Receiver<()>) {
    let (tx, rx) = mpsc::channel(1);
    let task = tokio::spawn(async move {
        let mut seen = Vec::new();
        while let Some(event) = events.recv().await {
            if until(&event) {
                let _ = tx.try_send(());
            }
            seen.push(event);
        }
        seen
    });
    (task, rx)
}

async fn until_finished(watches: &[LegWatch]) {
    while !watches.iter().all(LegWatch::is_finished) {
        sleep(TICK).await;
    }
}

#[tokio::test(start_paused = true)]
async fn claim_retries_through_network_faults() {
    let ledger = ledger();
    ledger.chain.fail_next(2, ChainError::Network("connection reset".into()));
    let mut sup = supervisor(&ledger, SupervisorConfig::new("legs"));
    let watch = add(
        &mut sup,
        &ledger,
        "claim",
        LegRole::Claim(SecretSource::Known(secret())),
        "bob",
        RetryPolicy::new(3, 1_000, 30_000),
        RestartBudget::default(),
    );

    sup.start().await.unwrap();
    sup.run_until(until_finished(&[watch.clone()])).await.unwrap();

    let progress = watch.snapshot();
    assert_eq!(progress.leg.state, SwapState::Completed);
    assert!(progress.last_tx.is_some());
    assert_eq!(progress.failure, None);
    assert_eq!(ledger.chain.balance(&"bob".into()), AMOUNT);
    assert_eq!(
        ledger.chain.leg_state(&ledger.utxo.reference),
        Some(SwapState::Completed)
    );
}

#[tokio::test(start_paused = true)]
async fn deadline_rechecked_after_backoff() {
    let ledger = ledger();
    ledger.chain.fail_next(1, ChainError::Timeout);
    ledger.clock.set(DEADLINE - 1);

    let mut sup = supervisor(&ledger, SupervisorConfig::new("legs"));
    let watch = add(
        &mut sup,
        &ledger,
        "claim",
        LegRole::Claim(SecretSource::Known(secret())),
        "bob",
        RetryPolicy::new(3, 1_000, 30_000),
        RestartBudget::default(),
    );
    let (collector, mut abandoned) = collect(sup.subscribe(), |e| {
        matches!(e, SupervisorEvent::RestartAbandoned { .. })
    });

    let clock = ledger.clock.clone();
    tokio::spawn(async move {
        sleep(Duration::from_millis(500)).await;
        clock.advance(10);
    });

    sup.start().await.unwrap();
    sup.run_until(async {
        abandoned.recv().await;
    })
    .await
    .unwrap();
    drop(sup);
    let events = collector.await.unwrap();

    assert!(events.contains(&SupervisorEvent::ProcessCrashed {
        process: "claim".into(),
        code: 30,
        message: SwapError::Expired {
            deadline: DEADLINE,
            now: DEADLINE + 9,
        }
        .to_string(),
    }));
    assert!(events.contains(&SupervisorEvent::RestartAbandoned {
        process: "claim".into(),
        deadline: DEADLINE,
    }));
    assert_eq!(
        ledger.chain.leg_state(&ledger.utxo.reference),
        Some(SwapState::Locked)
    );
    assert_eq!(watch.state(), SwapState::Locked);
}

#[tokio::test(start_paused = true)]
async fn refund_waits_out_the_dead_zone() {
    let ledger = ledger();
    let mut sup = supervisor(&ledger, SupervisorConfig::new("legs"));
    let watch = add(
        &mut sup,
        &ledger,
        "refund",
        LegRole::Refund,
        "alice",
        RetryPolicy::default(),
        RestartBudget::default(),
    );
    sup.start().await.unwrap();

    let refund_at = DEADLINE + rules().grace_period_ms;
    let chain = Arc::clone(&ledger.chain);
    let reference = ledger.utxo.reference.clone();
    let clock = ledger.clock.clone();
    let observed = watch.clone();
    sup.run_until(async move {
        clock.set(DEADLINE);
        sleep(TICK * 5).await;
        assert_eq!(chain.leg_state(&reference), Some(SwapState::Locked));
        clock.set(refund_at - 1);
        sleep(TICK * 5).await;
        assert_eq!(chain.leg_state(&reference), Some(SwapState::Locked));
        clock.set(refund_at);
        until_finished(&[observed]).await;
    })
    .await
    .unwrap();

    assert_eq!(watch.state(), SwapState::Refunded);
    assert_eq!(ledger.chain.balance(&"alice".into()), 10_000_000);
    assert_eq!(
        ledger.chain.leg_state(&ledger.utxo.reference),
        Some(SwapState::Refunded)
    );
}

#[tokio::test(start_paused = true)]
async fn refund_stands_down_after_claim() {
    let ledger = ledger();
    let mut sup = supervisor(&ledger, SupervisorConfig::new("legs"));
    let refund = add(
        &mut sup,
        &ledger,
        "refund",
        LegRole::Refund,
        "alice",
        RetryPolicy::default(),
        RestartBudget::default(),
    );
    let claim = add(
        &mut sup,
        &ledger,
        "claim",
        LegRole::Claim(SecretSource::Known(secret())),
        "bob",
        RetryPolicy::default(),
        RestartBudget::default(),
    );

    sup.start().await.unwrap();
    sup.run_until(until_finished(&[refund.clone(), claim.clone()]))
        .await
        .unwrap();

    assert_eq!(claim.state(), SwapState::Completed);
    assert_eq!(refund.state(), SwapState::Completed);
    assert_eq!(refund.snapshot().last_tx, None);
    assert_eq!(ledger.chain.balance(&"alice".into()), 5_000_000);
}

#[tokio::test(start_paused = true)]
async fn watcher_claims_once_secret_is_revealed_elsewhere() {
    let ledger = ledger();
    let other = Arc::new(MemoryChain::new("other", ledger.clock.clone(), rules()));
    other.fund("alice", AMOUNT);
    let other_utxo = other.lock(terms(AMOUNT, DEADLINE)).unwrap();

    let mut sup = supervisor(&ledger, SupervisorConfig::new("legs"));
    let watched = Arc::clone(&other) as Arc<dyn ChainClient>;
    let claim = add(
        &mut sup,
        &ledger,
        "watch",
        LegRole::Claim(SecretSource::Watch(watched)),
        "bob",
        RetryPolicy::default(),
        RestartBudget::default(),
    );
    sup.start().await.unwrap();

    let other_chain = Arc::clone(&other);
    let observed = claim.clone();
    sup.run_until(async move {
        sleep(TICK * 10).await;
        assert_eq!(observed.state(), SwapState::Locked);

        let mut reveal = LegWorker::new(
            LegRole::Claim(SecretSource::Known(secret())),
            other_utxo.reference.clone(),
            other_utxo.leg.clone(),
            context(&other_chain, "bob", RetryPolicy::default()),
            Supervisor::new(SupervisorConfig::new("scratch")).reporter("reveal"),
        );
        swapguard_supervisor::Worker::start(&mut reveal).await.unwrap();
        until_finished(&[reveal.watch(), observed]).await;
    })
    .await
    .unwrap();

    assert_eq!(claim.state(), SwapState::Completed);
    assert_eq!(ledger.chain.balance(&"bob".into()), AMOUNT);
}

#[tokio::test(start_paused = true)]
async fn cancel_by_depositor_returns_funds() {
    let ledger = ledger();
    let mut sup = supervisor(&ledger, SupervisorConfig::new("legs"));
    let cancel = add(
        &mut sup,
        &ledger,
        "cancel",
        LegRole::Cancel,
        "alice",
        RetryPolicy::default(),
        RestartBudget::default(),
    );
    sup.start().await.unwrap();
    sup.run_until(until_finished(&[cancel.clone()])).await.unwrap();

    assert_eq!(cancel.state(), SwapState::Refunded);
    assert_eq!(ledger.chain.balance(&"alice".into()), 10_000_000);
}

#[tokio::test(start_paused = true)]
async fn unauthorized_cancel_escalates() {
    let ledger = ledger();
    let mut sup = supervisor(&ledger, strict());
    add(
        &mut sup,
        &ledger,
        "cancel",
        LegRole::Cancel,
        "mallory",
        RetryPolicy::default(),
        RestartBudget::new(0, 60_000, 0),
    );
    let (collector, _failed) = collect(sup.subscribe(), |e| {
        matches!(e, SupervisorEvent::SupervisorFailed { .. })
    });

    sup.start().await.unwrap();
    let err = sup.run_until(std::future::pending()).await.unwrap_err();
    drop(sup);
    let events = collector.await.unwrap();

    assert!(matches!(err, SupervisorError::Escalated { ref source, .. } if source.code == 21));
    assert!(events
        .iter()
        .any(|e| matches!(e, SupervisorEvent::ProcessCrashed { code: 21, .. })));
    assert!(matches!(
        events.last(),
        Some(SupervisorEvent::SupervisorFailed { .. })
    ));
    assert_eq!(
        ledger.chain.leg_state(&ledger.utxo.reference),
        Some(SwapState::Locked)
    );
}

#[tokio::test(start_paused = true)]
async fn claim_survives_lost_submission_reply() {
    let ledger = ledger();
    let mut sup = supervisor(&ledger, strict());
    let claim = LegWorker::new(
        LegRole::Claim(SecretSource::Known(secret())),
        ledger.utxo.reference.clone(),
        ledger.utxo.leg.clone(),
        lossy(&ledger.chain, "bob", 1),
        sup.reporter("claim"),
    );
    let claim_watch = claim.watch();
    sup.register("claim", RestartBudget::new(0, 60_000, 0), claim).unwrap();
    let refund = add(
        &mut sup,
        &ledger,
        "refund",
        LegRole::Refund,
        "alice",
        RetryPolicy::default(),
        RestartBudget::new(0, 60_000, 0),
    );

    sup.start().await.unwrap();
    sup.run_until(until_finished(&[claim_watch.clone(), refund.clone()]))
        .await
        .unwrap();

    let progress = claim_watch.snapshot();
    assert_eq!(progress.leg.state, SwapState::Completed);
    assert_eq!(progress.failure, None);
    assert_eq!(progress.last_tx, None);
    assert_eq!(refund.state(), SwapState::Completed);
    assert_eq!(ledger.chain.balance(&"bob".into()), AMOUNT);
    assert_eq!(
        ledger.chain.leg_state(&ledger.utxo.reference),
        Some(SwapState::Completed)
    );
}

#[tokio::test(start_paused = true)]
async fn cancel_survives_lost_submission_reply() {
    let ledger = ledger();
    let mut sup = supervisor(&ledger, strict());
    let cancel = LegWorker::new(
        LegRole::Cancel,
        ledger.utxo.reference.clone(),
        ledger.utxo.leg.clone(),
        lossy(&ledger.chain, "alice", 1),
        sup.reporter("cancel"),
    );
    let watch = cancel.watch();
    sup.register("cancel", RestartBudget::new(0, 60_000, 0), cancel).unwrap();

    sup.start().await.unwrap();
    sup.run_until(until_finished(&[watch.clone()])).await.unwrap();

    assert_eq!(watch.state(), SwapState::Refunded);
    assert_eq!(watch.snapshot().failure, None);
    assert_eq!(ledger.chain.balance(&"alice".into()), 10_000_000);
}

#[tokio::test(start_paused = true)]
async fn refund_reports_cancel_by_depositor() {
    let ledger = ledger();
    let mut sup = supervisor(&ledger, SupervisorConfig::new("legs"));
    let refund = add(
        &mut sup,
        &ledger,
        "refund",
        LegRole::Refund,
        "alice",
        RetryPolicy::default(),
        RestartBudget::default(),
    );
    sup.start().await.unwrap();

    let chain = Arc::clone(&ledger.chain);
    let utxo = ledger.utxo.clone();
    let running = refund.clone();
    sup.run_until(async move {
        sleep(TICK * 5).await;
        assert_eq!(running.state(), SwapState::Locked);

        let mut cancel = LegWorker::new(
            LegRole::Cancel,
            utxo.reference.clone(),
            utxo.leg.clone(),
            context(&chain, "alice", RetryPolicy::default()),
            Supervisor::new(SupervisorConfig::new("scratch")).reporter("cancel"),
        );
        swapguard_supervisor::Worker::start(&mut cancel).await.unwrap();
        until_finished(&[cancel.watch(), running]).await;
    })
    .await
    .unwrap();

    assert_eq!(refund.state(), SwapState::Refunded);
    assert_eq!(refund.snapshot().last_tx, None);
    assert_eq!(ledger.chain.balance(&"alice".into()), 10_000_000);
}

#[tokio::test(start_paused = true)]
async fn watcher_stands_down_when_leg_is_cancelled() {
    let ledger = ledger();
    let silent = Arc::new(MemoryChain::new("silent", ledger.clock.clone(), rules()));
    let mut sup = supervisor(&ledger, strict());
    let claim = add(
        &mut sup,
        &ledger,
        "watch",
        LegRole::Claim(SecretSource::Watch(silent as Arc<dyn ChainClient>)),
        "bob",
        RetryPolicy::default(),
        RestartBudget::new(0, 60_000, 0),
    );
    let cancel = add(
        &mut sup,
        &ledger,
        "cancel",
        LegRole::Cancel,
        "alice",
        RetryPolicy::default(),
        RestartBudget::new(0, 60_000, 0),
    );

    sup.start().await.unwrap();
    sup.run_until(until_finished(&[claim.clone(), cancel.clone()]))
        .await
        .unwrap();

    assert_eq!(cancel.state(), SwapState::Refunded);
    assert_eq!(claim.state(), SwapState::Refunded);
    assert_eq!(claim.snapshot().failure, None);
    assert_eq!(ledger.chain.balance(&"bob".into()), 0);
}
