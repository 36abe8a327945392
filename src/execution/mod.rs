//! Route execution: progress events, aggregation and the terminal outcome
//!
//! The quote service reports every step/process change as an `ExecutionEvent`.
//! `ExecutionReducer` folds those events into the ordered set of transaction
//! identifiers and derives the source/destination transaction summary.

use crate::chain::ChainId;
use crate::quote::{ProcessType, QuoteService, Route, StepExecution};

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Progress reported while a route executes
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionEvent {
    /// Latest execution state of one step
    StepUpdated {
        step_index: usize,
        execution: StepExecution,
    },
}

/// Transaction identifier observed during execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TxRef {
    pub tx_hash: String,
    /// Chain of the process that produced it, when reported
    pub chain_id: Option<ChainId>,
    pub step_index: usize,
    pub process_type: ProcessType,
}

impl TxRef {
    fn is_allowance(&self) -> bool {
        self.process_type == ProcessType::TokenAllowance
    }
}

/// Source/destination transaction summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub source_tx_id: Option<String>,
    pub dest_tx_id: Option<String>,
    pub source_chain_id: ChainId,
    pub dest_chain_id: ChainId,
}

/// Terminal outcome of one execution attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Succeeded(ExecutionResult),
    Failed {
        reason: String,
        /// Identifiers collected before the failure
        partial: ExecutionResult,
    },
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Succeeded(_))
    }

    pub fn result(&self) -> &ExecutionResult {
        match self {
            ExecutionOutcome::Succeeded(result) => result,
            ExecutionOutcome::Failed { partial, .. } => partial,
        }
    }
}

/// Pure fold of execution events into collected transaction identifiers
#[derive(Debug, Clone)]
pub struct ExecutionReducer {
    source_chain: ChainId,
    dest_chain: ChainId,
    steps: BTreeMap<usize, StepExecution>,
    seen: Vec<TxRef>,
}

impl ExecutionReducer {
    /// Chain ids are the ones captured when the user confirmed
    pub fn new(source_chain: ChainId, dest_chain: ChainId) -> Self {
        Self {
            source_chain,
            dest_chain,
            steps: BTreeMap::new(),
            seen: Vec::new(),
        }
    }

    pub fn apply(&mut self, event: ExecutionEvent) {
        match event {
            ExecutionEvent::StepUpdated {
                step_index,
                execution,
            } => {
                if execution.status.is_terminal() {
                    debug!("Step {} finished as {:?}", step_index, execution.status);
                }
                self.steps.insert(step_index, execution);
                self.rescan();
            }
        }
    }

    /// Fold the final execution state carried by a completed route
    pub fn observe_route(&mut self, route: &Route) {
        for (step_index, step) in route.steps.iter().enumerate() {
            if let Some(execution) = &step.execution {
                self.apply(ExecutionEvent::StepUpdated {
                    step_index,
                    execution: execution.clone(),
                });
            }
        }
    }

    /// Scan all steps and processes in declared order, keeping first-seen order
    fn rescan(&mut self) {
        for (step_index, execution) in &self.steps {
            for process in &execution.process {
                let Some(tx_hash) = process.tx_hash.as_deref().filter(|h| !h.is_empty()) else {
                    continue;
                };
                if self.seen.iter().any(|t| t.tx_hash == tx_hash) {
                    continue;
                }
                self.seen.push(TxRef {
                    tx_hash: tx_hash.to_string(),
                    chain_id: process.chain_id,
                    step_index: *step_index,
                    process_type: process.process_type,
                });
            }
        }
    }

    /// Transaction identifiers in first-seen order
    pub fn transactions(&self) -> &[TxRef] {
        &self.seen
    }

    fn source_tx(&self) -> Option<&TxRef> {
        let tagged = |t: &&TxRef| t.chain_id == Some(self.source_chain);
        let untagged = |t: &&TxRef| t.chain_id.is_none();

        self.seen
            .iter()
            .filter(tagged)
            .find(|t| !t.is_allowance())
            .or_else(|| self.seen.iter().find(tagged))
            .or_else(|| self.seen.iter().filter(untagged).find(|t| !t.is_allowance()))
            .or_else(|| self.seen.iter().find(untagged))
    }

    fn dest_tx(&self, source: Option<&TxRef>) -> Option<&TxRef> {
        let distinct = |t: &&TxRef| source.map_or(true, |s| s.tx_hash != t.tx_hash);

        let tagged = if self.dest_chain != self.source_chain {
            self.seen
                .iter()
                .filter(distinct)
                .find(|t| t.chain_id == Some(self.dest_chain))
        } else {
            None
        };

        tagged.or_else(|| {
            self.seen
                .iter()
                .filter(distinct)
                .find(|t| t.chain_id.is_none() && !t.is_allowance())
        })
    }

    /// Classify the collected identifiers into source and destination
    pub fn result(&self) -> ExecutionResult {
        let source = self.source_tx();
        let dest = self.dest_tx(source);

        ExecutionResult {
            source_tx_id: source.map(|t| t.tx_hash.clone()),
            dest_tx_id: dest.map(|t| t.tx_hash.clone()),
            source_chain_id: self.source_chain,
            dest_chain_id: self.dest_chain,
        }
    }
}

/// Drive a route to completion and reduce its progress into a terminal outcome
pub async fn run_execution(
    service: Arc<dyn QuoteService>,
    route: Route,
    source_chain: ChainId,
    dest_chain: ChainId,
) -> ExecutionOutcome {
    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
    let mut reducer = ExecutionReducer::new(source_chain, dest_chain);

    info!(
        "Starting execution of route {} ({} -> {})",
        route.id, source_chain, dest_chain
    );

    let execution = service.execute_route(route, progress_tx);
    tokio::pin!(execution);

    let result = loop {
        tokio::select! {
            biased;
            Some(event) = progress_rx.recv() => reducer.apply(event),
            result = &mut execution => break result,
        }
    };

    while let Ok(event) = progress_rx.try_recv() {
        reducer.apply(event);
    }

    match result {
        Ok(route) => {
            reducer.observe_route(&route);
            let result = reducer.result();
            debug!("Route {} collected {} transactions", route.id, reducer.transactions().len());
            ExecutionOutcome::Succeeded(result)
        }
        Err(e) => {
            warn!("Route execution failed: {}", e);
            ExecutionOutcome::Failed {
                reason: e.to_string(),
                partial: reducer.result(),
            }
        }
    }
}
