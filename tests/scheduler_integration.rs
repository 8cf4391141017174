use assert_approx_eq::assert_approx_eq;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use vault_janitor::error::{RetryPolicy, RpcError};
use vault_janitor::janitor::{
    BreakerPolicy, BreakerState, ChainCollaborators, ChainRunner, ExecutionStatus, Outcome, SchedulerSettings,
    Target,
};
use vault_janitor::ledger::MemoryLedger;
use vault_janitor::rpc::{ChainRpc, FailoverRpc};
use vault_janitor::testing::{
    sample_chain, sample_target, ChainEvent, MockRpc, MockSigner, ReceiptPlan, StaticMarketData,
};

fn settings() -> SchedulerSettings {
    SchedulerSettings {
        poll_interval: Duration::from_millis(10),
        max_concurrent_evaluations: 4,
        min_net_usd: 0.0,
        dry_run: false,
        summary_every_cycles: 10,
        inclusion_timeout: Duration::from_millis(60),
        receipt_poll_interval: Duration::from_millis(5),
        signing_retry: RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(5)),
    }
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, 4, 9, 30, 0).unwrap()
}

struct Harness {
    runner: ChainRunner,
    market: Arc<StaticMarketData>,
    signer: Arc<MockSigner>,
    ledger: Arc<MemoryLedger>,
}

fn harness(targets: Vec<Target>, rpc: Arc<dyn ChainRpc>) -> Harness {
    let market = Arc::new(StaticMarketData::new(50_000.0));
    market.set_gas_units(100_000);
    let signer = Arc::new(MockSigner::new());
    let ledger = Arc::new(MemoryLedger::new());
    let runner = ChainRunner::new(
        sample_chain("base"),
        targets,
        ChainCollaborators {
            rpc,
            market: market.clone(),
            signer: Some(signer.clone()),
        },
        ledger.clone(),
        settings(),
        BreakerPolicy::default(),
    );
    Harness {
        runner,
        market,
        signer,
        ledger,
    }
}

#[tokio::test]
async fn profitable_harvest_is_executed_and_accounted() {
    let rpc = Arc::new(MockRpc::new("node"));
    let mut h = harness(vec![sample_target("vault")], rpc.clone());
    h.market.set_reward_usd("vault", 20.0);

    let report = h.runner.run_cycle(t0()).await;
    assert_eq!(report.count(Outcome::Executed), 1);

    let executions = h.ledger.executions();
    assert_eq!(executions.len(), 1);
    let exec = &executions[0];
    assert_eq!(exec.status, ExecutionStatus::Confirmed);
    assert_eq!(exec.nonce, Some(0));
    // receipt: 100k gas at 1 gwei with ETH at $50k
    assert_approx_eq!(exec.gas_cost_usd, 5.0);
    assert_approx_eq!(exec.net_profit_usd, 15.0);

    let decision = &h.ledger.decisions()[0];
    assert_eq!(exec.decision_id, Some(decision.id));
    assert_approx_eq!(decision.estimated_gas_cost_usd, 10.0);
}

#[tokio::test]
async fn cooldown_blocks_until_exactly_elapsed() {
    let rpc = Arc::new(MockRpc::new("node"));
    let mut h = harness(vec![sample_target("vault")], rpc.clone());
    h.market.set_reward_usd("vault", 20.0);

    assert_eq!(h.runner.run_cycle(t0()).await.count(Outcome::Executed), 1);

    let early = h.runner.run_cycle(t0() + ChronoDuration::seconds(299)).await;
    assert_eq!(early.count(Outcome::SkipCooldown), 1);
    assert_eq!(rpc.sent_nonces(), vec![0]);

    let on_time = h.runner.run_cycle(t0() + ChronoDuration::seconds(300)).await;
    assert_eq!(on_time.count(Outcome::Executed), 1);
    assert_eq!(rpc.sent_nonces(), vec![0, 1]);
}

#[tokio::test]
async fn breaker_opens_after_three_failures_and_closes_after_trial() {
    let rpc = Arc::new(MockRpc::new("node"));
    let target = sample_target("flaky");
    rpc.set_receipt_plan(&target.address, ReceiptPlan::Revert);
    let mut h = harness(vec![target.clone()], rpc.clone());
    h.market.set_reward_usd("flaky", 20.0);

    // reverts start the 300s cooldown, so space the attempts out
    for i in 0..3 {
        let report = h.runner.run_cycle(t0() + ChronoDuration::minutes(5 * i)).await;
        assert_eq!(report.count(Outcome::Failed), 1);
        assert_eq!(report.executions[0].status, ExecutionStatus::Reverted);
    }
    let opened_at = t0() + ChronoDuration::minutes(10);
    assert_eq!(h.runner.state("flaky").unwrap().breaker.state(), BreakerState::Open);

    let blocked = h.runner.run_cycle(opened_at + ChronoDuration::minutes(59)).await;
    assert_eq!(blocked.count(Outcome::SkipBreakerOpen), 1);
    assert_eq!(rpc.sent_nonces().len(), 3);

    rpc.set_receipt_plan(&target.address, ReceiptPlan::Success);
    let trial = h.runner.run_cycle(opened_at + ChronoDuration::minutes(60)).await;
    assert_eq!(trial.count(Outcome::Executed), 1);

    let state = h.runner.state("flaky").unwrap();
    assert_eq!(state.breaker.state(), BreakerState::Closed);
    assert_eq!(state.breaker.consecutive_failures(), 0);
}

#[tokio::test]
async fn failed_trial_reopens_with_longer_backoff() {
    let rpc = Arc::new(MockRpc::new("node"));
    let target = sample_target("flaky");
    rpc.set_receipt_plan(&target.address, ReceiptPlan::Revert);
    let mut h = harness(vec![target], rpc.clone());
    h.market.set_reward_usd("flaky", 20.0);

    for i in 0..3 {
        h.runner.run_cycle(t0() + ChronoDuration::minutes(5 * i)).await;
    }
    let opened_at = t0() + ChronoDuration::minutes(10);
    let trial_at = opened_at + ChronoDuration::minutes(60);
    assert_eq!(h.runner.run_cycle(trial_at).await.count(Outcome::Failed), 1);

    let state = h.runner.state("flaky").unwrap();
    assert_eq!(state.breaker.state(), BreakerState::Open);
    assert_eq!(state.breaker.current_backoff(), ChronoDuration::minutes(120));

    let still_open = h.runner.run_cycle(trial_at + ChronoDuration::minutes(90)).await;
    assert_eq!(still_open.count(Outcome::SkipBreakerOpen), 1);
}

#[tokio::test]
async fn same_wallet_targets_submit_one_at_a_time() {
    let rpc = Arc::new(MockRpc::new("node"));
    // real round trips give the second submit a chance to overtake the first
    rpc.set_latency(Duration::from_millis(2));
    let mut h = harness(vec![sample_target("alpha"), sample_target("beta")], rpc.clone());
    h.market.set_reward_usd("alpha", 30.0);
    h.market.set_reward_usd("beta", 25.0);

    let report = h.runner.run_cycle(t0()).await;
    assert_eq!(report.count(Outcome::Executed), 2);

    let mut nonces = rpc.sent_nonces();
    nonces.sort_unstable();
    assert_eq!(nonces, vec![0, 1]);

    // each transaction is mined before the next one is broadcast
    let events = rpc.events();
    assert_eq!(events.len(), 4);
    for pair in events.chunks(2) {
        match (&pair[0], &pair[1]) {
            (ChainEvent::Sent { tx_hash: sent, .. }, ChainEvent::Mined { tx_hash: mined, success }) => {
                assert_eq!(sent, mined);
                assert!(*success);
            }
            other => panic!("unexpected ordering: {:?}", other),
        }
    }
}

#[tokio::test]
async fn submit_queued_behind_a_funds_halt_is_refused() {
    let rpc = Arc::new(MockRpc::new("node"));
    rpc.set_latency(Duration::from_millis(2));
    rpc.fail_next(
        "send_raw_transaction",
        1,
        RpcError::InsufficientFunds("insufficient funds for gas * price + value".into()),
    );
    let mut h = harness(vec![sample_target("alpha"), sample_target("beta")], rpc.clone());
    h.market.set_reward_usd("alpha", 30.0);
    h.market.set_reward_usd("beta", 25.0);

    let report = h.runner.run_cycle(t0()).await;
    let mut statuses: Vec<ExecutionStatus> = report.executions.iter().map(|e| e.status).collect();
    statuses.sort_by_key(|s| format!("{:?}", s));
    assert_eq!(statuses, vec![ExecutionStatus::Refused, ExecutionStatus::RpcError]);
    assert_eq!(h.signer.signed_count(), 1);
    assert_eq!(rpc.call_count("send_raw_transaction"), 1);
    assert!(h.runner.wallet().unwrap().is_halted());
}

#[tokio::test]
async fn topped_up_wallet_leaves_report_mode() {
    let rpc = Arc::new(MockRpc::new("node"));
    rpc.set_balance(1_000);
    let mut h = harness(vec![sample_target("vault")], rpc.clone());
    h.market.set_reward_usd("vault", 20.0);

    let first = h.runner.run_cycle(t0()).await;
    assert_eq!(first.executions[0].status, ExecutionStatus::Refused);
    assert!(h.runner.wallet().unwrap().is_halted());

    rpc.set_balance(10u128.pow(18));
    let second = h.runner.run_cycle(t0() + ChronoDuration::seconds(5)).await;
    assert_eq!(second.count(Outcome::Executed), 1);
    assert!(!h.runner.wallet().unwrap().is_halted());
    assert_eq!(rpc.sent_nonces(), vec![0]);
}

#[tokio::test]
async fn timed_out_transaction_keeps_its_nonce() {
    let rpc = Arc::new(MockRpc::new("node"));
    let stuck = sample_target("stuck");
    rpc.set_receipt_plan(&stuck.address, ReceiptPlan::Never);
    let mut h = harness(vec![stuck], rpc.clone());
    h.market.set_reward_usd("stuck", 20.0);

    let first = h.runner.run_cycle(t0()).await;
    assert_eq!(first.executions[0].status, ExecutionStatus::TimedOut);
    assert_eq!(h.runner.state("stuck").unwrap().breaker.consecutive_failures(), 1);
    // no cooldown after a timeout
    assert!(h.runner.state("stuck").unwrap().last_executed_at.is_none());

    h.runner.run_cycle(t0() + ChronoDuration::seconds(5)).await;
    assert_eq!(rpc.sent_nonces(), vec![0, 1]);
    let pending = h.runner.wallet().unwrap().pending().await;
    assert_eq!(pending.len(), 2);
}

#[tokio::test]
async fn low_balance_halts_wallet_into_report_mode() {
    let rpc = Arc::new(MockRpc::new("node"));
    rpc.set_balance(1_000);
    let mut h = harness(vec![sample_target("vault")], rpc.clone());
    h.market.set_reward_usd("vault", 20.0);

    let first = h.runner.run_cycle(t0()).await;
    assert_eq!(first.executions[0].status, ExecutionStatus::Refused);
    assert!(h.runner.wallet().unwrap().is_halted());
    // refusals are not breaker failures
    assert_eq!(h.runner.state("vault").unwrap().breaker.consecutive_failures(), 0);

    let second = h.runner.run_cycle(t0() + ChronoDuration::seconds(5)).await;
    assert_eq!(second.count(Outcome::SkipWalletHalted), 1);
    assert_eq!(rpc.call_count("send_raw_transaction"), 0);
}

#[tokio::test]
async fn failover_carries_the_cycle_through_a_dead_primary() {
    let primary = Arc::new(MockRpc::new("primary"));
    let secondary = Arc::new(MockRpc::new("secondary"));
    primary.set_down(true);
    let rpc = Arc::new(FailoverRpc::new(
        vec![primary.clone(), secondary.clone()],
        RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(5)),
        1,
    ));
    let mut h = harness(vec![sample_target("vault")], rpc.clone());
    h.market.set_reward_usd("vault", 20.0);

    let report = h.runner.run_cycle(t0()).await;
    assert_eq!(report.count(Outcome::Executed), 1);
    assert_eq!(rpc.current_index(), 1);
    assert_eq!(primary.call_count("send_raw_transaction"), 0);
    assert_eq!(secondary.sent_nonces(), vec![0]);
}

#[tokio::test]
async fn unchanged_inputs_give_unchanged_decisions() {
    let rpc = Arc::new(MockRpc::new("node"));
    let mut h = harness(vec![sample_target("vault")], rpc.clone());
    h.market.set_reward_usd("vault", 14.0);

    let first = h.runner.run_cycle(t0()).await;
    let second = h.runner.run_cycle(t0()).await;
    assert_eq!(first.outcomes, second.outcomes);
    assert_eq!(first.count(Outcome::SkipInsufficientReward), 1);

    let decisions = h.ledger.decisions();
    assert_eq!(decisions.len(), 2);
    assert_eq!(decisions[0].pending_reward_usd, decisions[1].pending_reward_usd);
    assert_eq!(decisions[0].estimated_gas_cost_usd, decisions[1].estimated_gas_cost_usd);
    assert_ne!(decisions[0].id, decisions[1].id);
}
