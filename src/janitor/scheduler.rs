//! Poll loop and decision pipeline.
//!
//! One `ChainRunner` per chain. Each cycle evaluates the enabled targets
//! concurrently (bounded), then hands approved ones to the execution
//! serializer and applies the terminal status to cooldown and breaker state.
//! Pipeline order: Breaker -> Cooldown -> Fee -> Profit gate -> Execute -> Record.

use crate::config::{ChainSettings, Config};
use crate::error::{Result, RetryPolicy};
use crate::janitor::circuit_breaker::{BreakerPolicy, CircuitBreaker};
use crate::janitor::cooldown;
use crate::janitor::fee_estimator::FeeData;
use crate::janitor::profit_gate::{GateDecision, ProfitGate};
use crate::janitor::records::{DecisionRecord, ExecutionRecord, ExecutionStatus, Outcome};
use crate::janitor::serializer::{ExecutionRequest, ExecutionSerializer};
use crate::janitor::target::{Target, TargetSnapshot, TargetState};
use crate::janitor::wallet::WalletContext;
use crate::ledger::Ledger;
use crate::rpc::{ChainRpc, MarketData, TransactionSigner};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub poll_interval: Duration,
    pub max_concurrent_evaluations: usize,
    pub min_net_usd: f64,
    pub dry_run: bool,
    pub summary_every_cycles: u64,
    pub inclusion_timeout: Duration,
    pub receipt_poll_interval: Duration,
    /// Retries for transient signer failures
    pub signing_retry: RetryPolicy,
}

impl SchedulerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            max_concurrent_evaluations: config.max_concurrent_evaluations.max(1),
            min_net_usd: config.min_net_usd,
            dry_run: config.dry_run,
            summary_every_cycles: config.summary_every_cycles.max(1),
            inclusion_timeout: config.inclusion_timeout(),
            receipt_poll_interval: Duration::from_millis(config.receipt_poll_interval_ms),
            signing_retry: config.retry_policy(),
        }
    }
}

/// External collaborators for one chain.
pub struct ChainCollaborators {
    pub rpc: Arc<dyn ChainRpc>,
    pub market: Arc<dyn MarketData>,
    /// `None` runs the chain in report mode
    pub signer: Option<Arc<dyn TransactionSigner>>,
}

/// Result of the read-only part of the pipeline for one target.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub index: usize,
    pub decision: DecisionRecord,
    /// Present only when the gate approved and the wallet may submit
    pub request: Option<ExecutionRequest>,
}

#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub outcomes: HashMap<Outcome, usize>,
    pub executions: Vec<ExecutionRecord>,
}

impl CycleReport {
    pub fn count(&self, outcome: Outcome) -> usize {
        self.outcomes.get(&outcome).copied().unwrap_or(0)
    }

    pub fn net_profit_usd(&self) -> f64 {
        self.executions.iter().map(|e| e.net_profit_usd).sum()
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunTotals {
    pub cycles: u64,
    pub outcomes: HashMap<Outcome, u64>,
    pub confirmed: u64,
    pub failed_executions: u64,
    pub net_profit_usd: f64,
}

impl RunTotals {
    fn absorb(&mut self, report: &CycleReport) {
        self.cycles += 1;
        for (outcome, count) in &report.outcomes {
            *self.outcomes.entry(*outcome).or_insert(0) += *count as u64;
        }
        for execution in &report.executions {
            if execution.succeeded() {
                self.confirmed += 1;
            } else {
                self.failed_executions += 1;
            }
        }
        self.net_profit_usd += report.net_profit_usd();
    }
}

#[derive(Debug, Clone)]
pub struct ChainSummary {
    pub chain: String,
    pub totals: RunTotals,
    pub wallet_halted: bool,
}

pub struct ChainRunner {
    chain: ChainSettings,
    targets: Vec<Target>,
    states: Vec<TargetState>,
    rpc: Arc<dyn ChainRpc>,
    market: Arc<dyn MarketData>,
    wallet: Option<Arc<WalletContext>>,
    serializer: Option<ExecutionSerializer>,
    ledger: Arc<dyn Ledger>,
    settings: SchedulerSettings,
    totals: RunTotals,
}

impl ChainRunner {
    pub fn new(
        chain: ChainSettings,
        targets: Vec<Target>,
        collaborators: ChainCollaborators,
        ledger: Arc<dyn Ledger>,
        settings: SchedulerSettings,
        breaker_policy: BreakerPolicy,
    ) -> Self {
        let states = targets
            .iter()
            .map(|t| {
                TargetState::new(CircuitBreaker::new(
                    format!("{}/{}", chain.name, t.name),
                    breaker_policy.clone(),
                ))
            })
            .collect();

        let (wallet, serializer) = match (&chain.from_address, collaborators.signer) {
            (Some(from), Some(signer)) => (
                Some(Arc::new(WalletContext::new(&chain.name, from, chain.min_native_balance_wei))),
                Some(ExecutionSerializer::new(
                    &chain.name,
                    chain.chain_id,
                    collaborators.rpc.clone(),
                    signer,
                    settings.signing_retry.clone(),
                    settings.inclusion_timeout,
                    settings.receipt_poll_interval,
                )),
            ),
            _ => (None, None),
        };

        Self {
            chain,
            targets,
            states,
            rpc: collaborators.rpc,
            market: collaborators.market,
            wallet,
            serializer,
            ledger,
            settings,
            totals: RunTotals::default(),
        }
    }

    pub fn chain_name(&self) -> &str {
        &self.chain.name
    }

    pub fn wallet(&self) -> Option<&Arc<WalletContext>> {
        self.wallet.as_ref()
    }

    pub fn state(&self, target: &str) -> Option<&TargetState> {
        self.targets
            .iter()
            .position(|t| t.name == target)
            .map(|i| &self.states[i])
    }

    pub fn snapshots(&self) -> Vec<TargetSnapshot> {
        self.targets
            .iter()
            .zip(&self.states)
            .map(|(target, state)| state.snapshot(target))
            .collect()
    }

    /// Startup balance check; a shortfall halts the wallet into report mode.
    pub async fn check_wallet(&self) -> Result<()> {
        match &self.wallet {
            Some(wallet) if !self.settings.dry_run => {
                wallet.ensure_balance(self.rpc.as_ref(), 0).await?;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// A halted wallet resumes once a top-up covers the shortfall.
    async fn recover_wallet(&self) {
        let wallet = match &self.wallet {
            Some(wallet) if wallet.is_halted() && !self.settings.dry_run => wallet,
            _ => return,
        };
        if let Err(e) = wallet.try_resume(self.rpc.as_ref()).await {
            debug!("[{}] balance check for halted wallet failed: {}", self.chain.name, e);
        }
    }

    fn decision(&self, target: &Target, now: DateTime<Utc>, reward: f64, gas: f64, outcome: Outcome) -> DecisionRecord {
        DecisionRecord::new(&target.name, &self.chain.name, now, reward, gas, target.profit_multiplier, outcome)
    }

    fn skip(&self, index: usize, decision: DecisionRecord) -> Evaluation {
        Evaluation {
            index,
            decision,
            request: None,
        }
    }

    /// Read-only pipeline for one target. Identical inputs yield identical
    /// outcomes; no runtime state is touched.
    pub async fn evaluate_target(&self, index: usize, fee_data: Option<FeeData>, now: DateTime<Utc>) -> Evaluation {
        let target = &self.targets[index];
        let state = &self.states[index];

        if !state.breaker.permits(now) {
            let reason = format!(
                "breaker {} after {} failures",
                state.breaker.effective_state(now).as_str(),
                state.breaker.consecutive_failures()
            );
            return self.skip(index, self.decision(target, now, 0.0, 0.0, Outcome::SkipBreakerOpen).with_reason(reason));
        }

        if let Some(left) = cooldown::remaining(target, state, now) {
            let reason = format!("{}s of cooldown remaining", left.num_seconds());
            return self.skip(index, self.decision(target, now, 0.0, 0.0, Outcome::SkipCooldown).with_reason(reason));
        }

        let Some(fee_data) = fee_data else {
            return self.skip(
                index,
                self.decision(target, now, 0.0, 0.0, Outcome::SkipDataUnavailable)
                    .with_reason("fee data unavailable"),
            );
        };

        let fee = match self.chain.fees.estimate(fee_data) {
            Ok(fee) => fee,
            Err(e) => {
                return self.skip(
                    index,
                    self.decision(target, now, 0.0, 0.0, Outcome::SkipGasTooHigh).with_reason(e.to_string()),
                )
            }
        };

        let quote = match self.market.reward_quote(target).await {
            Ok(quote) => quote,
            Err(e) => {
                return self.skip(
                    index,
                    self.decision(target, now, 0.0, 0.0, Outcome::SkipDataUnavailable).with_reason(e.to_string()),
                )
            }
        };

        let gas_units = self.market.gas_units(target).await;
        let native_price_usd = self.market.native_price_usd();
        let reward_usd = quote.usd();
        let gas_usd = fee.gas_cost_usd(gas_units, native_price_usd);
        let threshold_usd = target.min_pending_reward_usd(quote.token_price_usd);

        let gate = ProfitGate::new(target.profit_multiplier, threshold_usd).with_min_net_usd(self.settings.min_net_usd);
        if gate.evaluate(reward_usd, gas_usd) == GateDecision::Skip {
            let reason = format!(
                "reward ${:.4} vs {}x gas ${:.4}, threshold ${:.4}",
                reward_usd, target.profit_multiplier, gas_usd, threshold_usd
            );
            return self.skip(
                index,
                self.decision(target, now, reward_usd, gas_usd, Outcome::SkipInsufficientReward).with_reason(reason),
            );
        }

        if self.settings.dry_run {
            let reason = format!(
                "would execute: reward ${:.4}, gas ${:.4}, caller fee ${:.4}",
                reward_usd,
                gas_usd,
                target.expected_call_fee_usd(reward_usd)
            );
            return self.skip(
                index,
                self.decision(target, now, reward_usd, gas_usd, Outcome::DryRun).with_reason(reason),
            );
        }

        let can_submit = self.wallet.as_ref().map(|w| !w.is_halted()).unwrap_or(false);
        if !can_submit {
            return self.skip(
                index,
                self.decision(target, now, reward_usd, gas_usd, Outcome::SkipWalletHalted)
                    .with_reason("wallet halted or not configured"),
            );
        }

        let decision = self.decision(target, now, reward_usd, gas_usd, Outcome::Executed);
        let request = ExecutionRequest {
            decision_id: decision.id,
            calldata: target.calldata(),
            fee,
            gas_units,
            gross_reward_usd: reward_usd,
            native_price_usd,
        };
        Evaluation {
            index,
            decision,
            request: Some(request),
        }
    }

    /// Evaluates every enabled target, executes the approved ones and records
    /// everything. Time is taken from `now` so cooldown and breaker windows are
    /// deterministic.
    pub async fn run_cycle(&mut self, now: DateTime<Utc>) -> CycleReport {
        self.recover_wallet().await;
        let fee_data = match self.rpc.get_fee_data().await {
            Ok(fee_data) => Some(fee_data),
            Err(e) => {
                warn!("[{}] fee data unavailable this cycle: {}", self.chain.name, e);
                None
            }
        };

        let enabled: Vec<usize> = (0..self.targets.len()).filter(|i| self.targets[*i].enabled).collect();
        let evaluations: Vec<Evaluation> = {
            let this = &*self;
            stream::iter(enabled)
                .map(|index| this.evaluate_target(index, fee_data, now))
                .buffer_unordered(this.settings.max_concurrent_evaluations)
                .collect()
                .await
        };

        let mut report = CycleReport::default();
        let mut approved = Vec::new();
        for evaluation in evaluations {
            let state = &mut self.states[evaluation.index];
            state.last_evaluated_at = Some(now);
            match evaluation.request {
                Some(request) if state.breaker.begin_attempt(now) => {
                    approved.push((evaluation.index, evaluation.decision, request));
                }
                Some(_) => {
                    let mut decision = evaluation.decision;
                    decision.outcome = Outcome::SkipBreakerOpen;
                    self.finish_skip(decision, &mut report).await;
                }
                None => self.finish_skip(evaluation.decision, &mut report).await,
            }
        }

        if approved.is_empty() {
            return report;
        }

        if self.wallet.is_none() || self.serializer.is_none() {
            error!("[{}] approved targets without a wallet; skipping", self.chain.name);
            for (index, mut decision, _) in approved {
                self.states[index].breaker.cancel_attempt();
                decision.outcome = Outcome::SkipWalletHalted;
                self.finish_skip(decision, &mut report).await;
            }
            return report;
        }

        // Submissions are issued together; the wallet lock serializes them.
        let results: Vec<ExecutionRecord> = match (&self.wallet, &self.serializer) {
            (Some(wallet), Some(serializer)) => {
                let targets = &self.targets;
                join_all(
                    approved
                        .iter()
                        .map(|(index, _, request)| serializer.submit(wallet, &targets[*index], request.clone())),
                )
                .await
            }
            _ => Vec::new(),
        };

        for ((index, mut decision, _), execution) in approved.into_iter().zip(results) {
            self.apply_execution(index, &execution, now);
            decision.outcome = if execution.succeeded() {
                Outcome::Executed
            } else {
                Outcome::Failed
            };
            decision.reason = execution.error.clone();
            *report.outcomes.entry(decision.outcome).or_insert(0) += 1;
            self.record_decision(&decision).await;
            if let Err(e) = self.ledger.append_execution(&execution).await {
                error!("[{}] failed to record execution: {}", self.chain.name, e);
            }
            report.executions.push(execution);
        }

        report
    }

    fn apply_execution(&mut self, index: usize, execution: &ExecutionRecord, now: DateTime<Utc>) {
        let state = &mut self.states[index];
        let status = execution.status;
        if status.is_breaker_failure() {
            state.breaker.record_failure(now);
        } else if status == ExecutionStatus::Confirmed {
            state.breaker.record_success();
        } else {
            state.breaker.cancel_attempt();
        }
        if status.starts_cooldown() {
            cooldown::mark_executed(state, now);
        }
        match status {
            ExecutionStatus::Confirmed => info!(
                "[{}] {} executed: net ${:.4}",
                self.chain.name, execution.target, execution.net_profit_usd
            ),
            other => warn!(
                "[{}] {} execution {}: {}",
                self.chain.name,
                execution.target,
                other.as_str(),
                execution.error.as_deref().unwrap_or("-")
            ),
        }
    }

    async fn finish_skip(&self, decision: DecisionRecord, report: &mut CycleReport) {
        debug!(
            "[{}] {} -> {} {}",
            self.chain.name,
            decision.target,
            decision.outcome.as_str(),
            decision.reason.as_deref().unwrap_or("")
        );
        *report.outcomes.entry(decision.outcome).or_insert(0) += 1;
        self.record_decision(&decision).await;
    }

    async fn record_decision(&self, decision: &DecisionRecord) {
        if let Err(e) = self.ledger.append_decision(decision).await {
            error!("[{}] failed to record decision for {}: {}", self.chain.name, decision.target, e);
        }
    }

    fn log_summary(&self) {
        let t = &self.totals;
        let mut outcomes: Vec<String> = t
            .outcomes
            .iter()
            .map(|(outcome, count)| format!("{}={}", outcome.as_str(), count))
            .collect();
        outcomes.sort();
        info!(
            "[{}] {} cycles | {} | confirmed {} failed {} | net ${:.4}",
            self.chain.name,
            t.cycles,
            outcomes.join(" "),
            t.confirmed,
            t.failed_executions,
            t.net_profit_usd
        );
        for snapshot in self.snapshots() {
            if snapshot.breaker_state != "closed" {
                warn!(
                    "[{}] {} breaker {} ({} failures)",
                    self.chain.name, snapshot.name, snapshot.breaker_state, snapshot.consecutive_failures
                );
            }
        }
    }

    /// Polls until shutdown is signalled (or once). A cycle in progress,
    /// including any submission awaiting inclusion, always completes.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>, once: bool) -> ChainSummary {
        info!(
            "[{}] starting loop: {} targets, poll every {:?}{}",
            self.chain.name,
            self.targets.iter().filter(|t| t.enabled).count(),
            self.settings.poll_interval,
            if self.settings.dry_run { " (dry run)" } else { "" }
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            let report = self.run_cycle(Utc::now()).await;
            self.totals.absorb(&report);
            if self.totals.cycles % self.settings.summary_every_cycles == 0 {
                self.log_summary();
            }
            if once {
                break;
            }
            tokio::select! {
                _ = sleep(self.settings.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        self.log_summary();
        info!("[{}] loop stopped", self.chain.name);
        ChainSummary {
            chain: self.chain.name.clone(),
            totals: self.totals.clone(),
            wallet_halted: self.wallet.as_ref().map(|w| w.is_halted()).unwrap_or(false),
        }
    }
}

/// Runs one independent loop per chain.
pub struct Scheduler {
    runners: Vec<ChainRunner>,
}

impl Scheduler {
    pub fn new(runners: Vec<ChainRunner>) -> Self {
        Self { runners }
    }

    pub async fn check_wallets(&self) {
        for runner in &self.runners {
            if let Err(e) = runner.check_wallet().await {
                error!("[{}] startup wallet check failed: {}", runner.chain_name(), e);
            }
        }
    }

    pub async fn run(self, shutdown: watch::Receiver<bool>, once: bool) -> Vec<ChainSummary> {
        let handles: Vec<_> = self
            .runners
            .into_iter()
            .map(|runner| tokio::spawn(runner.run(shutdown.clone(), once)))
            .collect();

        let mut summaries = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(summary) => summaries.push(summary),
                Err(e) => error!("chain loop task failed: {}", e),
            }
        }
        summaries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::janitor::circuit_breaker::BreakerState;
    use crate::ledger::MemoryLedger;
    use crate::testing::{sample_chain, sample_target, MockRpc, MockSigner, StaticMarketData};
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn settings() -> SchedulerSettings {
        SchedulerSettings {
            poll_interval: Duration::from_millis(10),
            max_concurrent_evaluations: 4,
            min_net_usd: 0.0,
            dry_run: false,
            summary_every_cycles: 100,
            inclusion_timeout: Duration::from_millis(100),
            receipt_poll_interval: Duration::from_millis(5),
            signing_retry: RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(5)),
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn runner(
        targets: Vec<Target>,
        settings: SchedulerSettings,
    ) -> (ChainRunner, Arc<MockRpc>, Arc<StaticMarketData>, Arc<MemoryLedger>) {
        let rpc = Arc::new(MockRpc::new("node"));
        let market = Arc::new(StaticMarketData::new(50_000.0));
        market.set_gas_units(100_000);
        let ledger = Arc::new(MemoryLedger::new());
        let runner = ChainRunner::new(
            sample_chain("base"),
            targets,
            ChainCollaborators {
                rpc: rpc.clone(),
                market: market.clone(),
                signer: Some(Arc::new(MockSigner::new())),
            },
            ledger.clone(),
            settings,
            BreakerPolicy::default(),
        );
        (runner, rpc, market, ledger)
    }

    #[tokio::test]
    async fn twenty_vs_ten_executes_and_fourteen_skips() {
        let (mut runner, _rpc, market, ledger) =
            runner(vec![sample_target("rich"), sample_target("poor")], settings());
        market.set_reward_usd("rich", 20.0);
        market.set_reward_usd("poor", 14.0);

        let report = runner.run_cycle(t0()).await;
        assert_eq!(report.count(Outcome::Executed), 1);
        assert_eq!(report.count(Outcome::SkipInsufficientReward), 1);

        let decisions = ledger.decisions();
        let poor = decisions.iter().find(|d| d.target == "poor").unwrap();
        assert_eq!(poor.outcome, Outcome::SkipInsufficientReward);
        assert!((poor.estimated_gas_cost_usd - 10.0).abs() < 1e-9);
        assert_eq!(ledger.executions().len(), 1);
    }

    #[tokio::test]
    async fn gas_above_ceiling_skips_without_breaker_penalty() {
        let (mut runner, rpc, market, _ledger) = runner(vec![sample_target("vault")], settings());
        market.set_reward_usd("vault", 1_000.0);
        rpc.set_fee_data(6_000_000_000, 0); // 12 gwei max fee > 10 gwei ceiling

        for minute in 0..5 {
            let report = runner.run_cycle(t0() + chrono::Duration::minutes(minute)).await;
            assert_eq!(report.count(Outcome::SkipGasTooHigh), 1);
        }
        let state = runner.state("vault").unwrap();
        assert_eq!(state.breaker.state(), BreakerState::Closed);
        assert_eq!(state.breaker.consecutive_failures(), 0);
        assert_eq!(market.quote_calls(), 0);
    }

    #[tokio::test]
    async fn evaluation_is_idempotent() {
        let (runner, _rpc, market, _ledger) = runner(vec![sample_target("vault")], settings());
        market.set_reward_usd("vault", 14.0);
        let fee = FeeData {
            base_fee_per_gas: 1_000_000_000,
            suggested_priority_fee: 0,
        };

        let first = runner.evaluate_target(0, Some(fee), t0()).await;
        let second = runner.evaluate_target(0, Some(fee), t0()).await;
        assert_eq!(first.decision.outcome, second.decision.outcome);
        assert_eq!(first.decision.pending_reward_usd, second.decision.pending_reward_usd);
        assert!(runner.state("vault").unwrap().last_evaluated_at.is_none());
    }

    #[tokio::test]
    async fn dry_run_never_submits() {
        let mut s = settings();
        s.dry_run = true;
        let (mut runner, rpc, market, _ledger) = runner(vec![sample_target("vault")], s);
        market.set_reward_usd("vault", 100.0);

        let report = runner.run_cycle(t0()).await;
        assert_eq!(report.count(Outcome::DryRun), 1);
        assert_eq!(rpc.call_count("send_raw_transaction"), 0);
        assert!(runner.state("vault").unwrap().last_executed_at.is_none());
    }

    #[tokio::test]
    async fn missing_fee_data_skips_as_unavailable() {
        let (mut runner, rpc, market, _ledger) = runner(vec![sample_target("vault")], settings());
        market.set_reward_usd("vault", 100.0);
        rpc.fail_next("get_fee_data", 1, crate::error::RpcError::Transient("reset".into()));

        let report = runner.run_cycle(t0()).await;
        assert_eq!(report.count(Outcome::SkipDataUnavailable), 1);
    }

    #[tokio::test]
    async fn disabled_targets_are_not_evaluated() {
        let mut disabled = sample_target("off");
        disabled.enabled = false;
        let (mut runner, _rpc, market, ledger) = runner(vec![disabled], settings());
        market.set_reward_usd("off", 100.0);

        let report = runner.run_cycle(t0()).await;
        assert!(report.outcomes.is_empty());
        assert!(ledger.decisions().is_empty());
    }

    #[tokio::test]
    async fn run_once_stops_after_one_cycle() {
        let (runner, _rpc, market, ledger) = runner(vec![sample_target("vault")], settings());
        market.set_reward_usd("vault", 1.0);
        let (_tx, rx) = watch::channel(false);

        let summary = runner.run(rx, true).await;
        assert_eq!(summary.totals.cycles, 1);
        assert!(!summary.wallet_halted);
        assert_eq!(ledger.decisions().len(), 1);
    }

    #[tokio::test]
    async fn shutdown_signal_stops_the_loop() {
        let (runner, _rpc, market, _ledger) = runner(vec![sample_target("vault")], settings());
        market.set_reward_usd("vault", 1.0);
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(runner.run(rx, false));
        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(true).unwrap();
        let summary = handle.await.unwrap();
        assert!(summary.totals.cycles >= 1);
    }
}
