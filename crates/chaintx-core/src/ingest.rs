//! The ingestion loop: polls the node, advances the cursor, extracts
//! transactions and publishes them in chain order.
//!
//! # States
//! ```text
//! Idle → Polling → Processing → Idle …
//!          │            │
//!          └─→ Backoff ←┘   (transient node failure, retried until success)
//!
//! any state → Stopped       (cancellation, fatal error, consumer gone)
//! ```
//!
//! # Per tick
//!   - Fetch the latest header (backoff on transient failure)
//!   - Advance the cursor (gap fill / reorg resolution)
//!   - On reorg: publish invalidations for records of dropped blocks
//!   - For each new block: list transactions, extract, publish, save the
//!     cursor through that block
//!   - A block the node cannot list yet ends the tick; the cursor is put
//!     back after the last completed block and the next tick retries it

use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::time::Duration;

use alloy_primitives::B256;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::backoff::Backoff;
use crate::checkpoint::{CheckpointManager, CursorStore};
use crate::client::ChainClient;
use crate::config::IngestConfig;
use crate::cursor::{Advance, BlockCursor};
use crate::error::IngestError;
use crate::extractor::TransactionExtractor;
use crate::output::{OutputChannel, PublishError, Publisher, Subscription};
use crate::reorg::ReorgInfo;
use crate::types::{Header, Invalidation, StreamItem};

/// Runtime state of the ingestion loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Waiting for the next tick.
    Idle,
    /// Fetching the head and advancing the cursor.
    Polling,
    /// Extracting and publishing blocks.
    Processing,
    /// Waiting out a transient node failure.
    Backoff,
    /// Terminated.
    Stopped,
}

impl std::fmt::Display for LoopState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Polling => write!(f, "polling"),
            Self::Processing => write!(f, "processing"),
            Self::Backoff => write!(f, "backoff"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Whether the loop keeps going after a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// How processing a single block ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockOutcome {
    /// Every transaction was published or skipped.
    Done,
    /// The node did not list the block's transactions.
    Unlisted,
    /// Cancelled or the consumer went away.
    Stop,
}

/// Counters reported when the loop stops.
#[derive(Debug, Clone, Copy, Default)]
struct LoopStats {
    polls: u64,
    blocks: u64,
    records: u64,
    invalidations: u64,
    reorgs: u64,
    skipped: u64,
}

/// The ingestion loop. Construct with [`IngestionLoop::new`], then either
/// `run().await` it or [`spawn`](IngestionLoop::spawn) it as a background task.
pub struct IngestionLoop<C: ChainClient> {
    config: IngestConfig,
    client: C,
    cursor: BlockCursor,
    checkpoint: CheckpointManager,
    publisher: Publisher,
    backoff: Backoff,
    cancel: CancellationToken,
    state: watch::Sender<LoopState>,
    /// Block number → (hash, transactions published for it), for the window
    /// a reorg can reach.
    emitted: BTreeMap<u64, (B256, Vec<B256>)>,
    /// Invalidated transactions not yet seen again on the canonical chain.
    reorged: HashSet<B256>,
    stats: LoopStats,
}

impl<C: ChainClient> IngestionLoop<C> {
    /// Build a loop and the subscription its output is delivered to.
    ///
    /// Fails with [`IngestError::ConfigInvalid`] before anything runs if the
    /// configuration is unusable.
    pub fn new(
        config: IngestConfig,
        client: C,
        store: Box<dyn CursorStore>,
    ) -> Result<(Self, Subscription), IngestError> {
        config.validate()?;
        let (publisher, subscription) = OutputChannel::bounded(config.channel_capacity)?;
        let checkpoint = CheckpointManager::new(store, &config.chain, &config.stream_id);
        let (state, _) = watch::channel(LoopState::Idle);
        let this = Self {
            cursor: BlockCursor::new(config.cursor_limits()),
            backoff: Backoff::new(config.backoff()),
            client,
            checkpoint,
            publisher,
            cancel: CancellationToken::new(),
            state,
            emitted: BTreeMap::new(),
            reorged: HashSet::new(),
            stats: LoopStats::default(),
            config,
        };
        Ok((this, subscription))
    }

    /// Use an externally owned cancellation token.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// The token that stops this loop.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Watch the loop's state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<LoopState> {
        self.state.subscribe()
    }

    /// Run as a single owned Tokio task.
    pub fn spawn(self) -> IngestionHandle
    where
        C: 'static,
    {
        let cancel = self.cancel.clone();
        let state = self.state.subscribe();
        let task = tokio::spawn(self.run());
        IngestionHandle {
            cancel,
            state,
            task,
        }
    }

    /// Run until cancelled, the consumer goes away, or a fatal error occurs.
    ///
    /// Cancellation and a dropped subscription end with `Ok(())`; fatal
    /// errors are returned.
    pub async fn run(mut self) -> Result<(), IngestError> {
        tracing::info!(
            chain = %self.config.chain,
            stream = %self.config.stream_id,
            endpoint = %self.client.endpoint(),
            poll_interval_s = self.config.poll_interval_seconds,
            "Starting ingestion"
        );

        let result = self.run_inner().await;
        self.set_state(LoopState::Stopped);

        let LoopStats {
            polls,
            blocks,
            records,
            invalidations,
            reorgs,
            skipped,
        } = self.stats;
        match &result {
            Ok(()) => tracing::info!(
                polls,
                blocks,
                records,
                invalidations,
                reorgs,
                skipped,
                "Ingestion stopped"
            ),
            Err(e) => tracing::error!(
                error = %e,
                polls,
                blocks,
                records,
                "Ingestion stopped on fatal error"
            ),
        }
        // Dropping `self` here releases the client and closes the output.
        result
    }

    async fn run_inner(&mut self) -> Result<(), IngestError> {
        if let Some(state) = self.checkpoint.load_cursor().await? {
            tracing::info!(
                block = state.last_number,
                hash = %state.last_hash,
                "Resuming from checkpoint"
            );
            self.cursor = BlockCursor::restore(state, self.config.cursor_limits());
        }

        let poll_interval = self.config.poll_interval();
        let mut first = true;
        loop {
            if self.cancel.is_cancelled() {
                return Ok(());
            }
            if !first {
                self.set_state(LoopState::Idle);
                if !sleep_or_cancel(poll_interval, &self.cancel).await {
                    return Ok(());
                }
            }
            first = false;

            if self.tick().await? == Flow::Stop {
                return Ok(());
            }
        }
    }

    /// One poll cycle.
    async fn tick(&mut self) -> Result<Flow, IngestError> {
        self.set_state(LoopState::Polling);
        self.stats.polls += 1;

        let committed = self.cursor.clone();
        let advance = loop {
            let head = match with_backoff(
                &mut self.backoff,
                &self.cancel,
                &self.state,
                LoopState::Polling,
                "latest header",
                || self.client.latest_header(),
            )
            .await
            {
                Ok(Some(head)) => head,
                Ok(None) => return Ok(Flow::Stop),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::warn!(error = %e, "Could not read the chain head; waiting for the next tick");
                    return Ok(Flow::Continue);
                }
            };

            let polled = head.number;
            match self.cursor.advance(&self.client, head).await {
                Ok(advance) => {
                    self.backoff.reset();
                    break advance;
                }
                Err(e) if e.is_transient() => {
                    self.set_state(LoopState::Backoff);
                    let delay = self.backoff.next_delay();
                    tracing::warn!(
                        attempt = self.backoff.attempt(),
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Node unavailable while advancing; backing off"
                    );
                    if !sleep_or_cancel(delay, &self.cancel).await {
                        return Ok(Flow::Stop);
                    }
                    self.set_state(LoopState::Polling);
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        head = polled,
                        error = %e,
                        "Chain changed during walk-back; retrying on the next tick"
                    );
                    return Ok(Flow::Continue);
                }
            }
        };

        if advance.is_empty() {
            return Ok(Flow::Continue);
        }
        self.process(advance, committed).await
    }

    /// Publish an advance block by block. `committed` is the cursor before
    /// the advance; it follows the completed blocks and is saved after each.
    async fn process(
        &mut self,
        advance: Advance,
        mut committed: BlockCursor,
    ) -> Result<Flow, IngestError> {
        self.set_state(LoopState::Processing);

        if let Some(reorg) = &advance.reorg {
            self.stats.reorgs += 1;
            if self.invalidate(reorg).await == Flow::Stop {
                return Ok(Flow::Stop);
            }
            committed.rewind_to(reorg.common_ancestor.number);
        }

        for header in &advance.headers {
            match self.process_block(header).await? {
                BlockOutcome::Done => {
                    committed.record(header.clone())?;
                    self.save(&committed).await?;
                }
                BlockOutcome::Stop => return Ok(Flow::Stop),
                BlockOutcome::Unlisted => {
                    tracing::info!(
                        block = header.number,
                        resume_after = ?committed.last_number(),
                        "Rewinding cursor to the last completed block"
                    );
                    self.save(&committed).await?;
                    self.cursor = committed;
                    self.prune_emitted();
                    return Ok(Flow::Continue);
                }
            }
        }

        self.reorged.clear();
        self.prune_emitted();
        Ok(Flow::Continue)
    }

    async fn save(&self, cursor: &BlockCursor) -> Result<(), IngestError> {
        if let Some(state) = cursor.state() {
            self.checkpoint.save_cursor(state).await?;
        }
        Ok(())
    }

    /// Publish invalidations for every record emitted in a dropped block.
    async fn invalidate(&mut self, reorg: &ReorgInfo) -> Flow {
        let ancestor = reorg.common_ancestor.number;
        let mut known = self.emitted.split_off(&ancestor.saturating_add(1));

        for header in &reorg.diverged {
            let tx_ids = match known.remove(&header.number) {
                Some((hash, ids)) if hash == header.hash => ids,
                // Not seen by this process (e.g. after a restart): fall back
                // to the recorded listing.
                _ => header.transaction_ids.clone(),
            };
            for tx_hash in tx_ids {
                let notice = StreamItem::Invalidated(Invalidation {
                    tx_hash,
                    block_number: header.number,
                    block_hash: header.hash,
                });
                if self.publish(notice).await == Flow::Stop {
                    return Flow::Stop;
                }
                self.reorged.insert(tx_hash);
                self.stats.invalidations += 1;
            }
        }
        Flow::Continue
    }

    async fn process_block(&mut self, header: &Header) -> Result<BlockOutcome, IngestError> {
        let tx_ids = match with_backoff(
            &mut self.backoff,
            &self.cancel,
            &self.state,
            LoopState::Processing,
            "block transactions",
            || self.client.block_transaction_ids(header.hash),
        )
        .await
        {
            Ok(Some(ids)) => ids,
            Ok(None) => return Ok(BlockOutcome::Stop),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                tracing::warn!(
                    block = header.number,
                    hash = %header.hash,
                    error = %e,
                    "Node could not list the block's transactions; retrying on the next tick"
                );
                return Ok(BlockOutcome::Unlisted);
            }
        };

        let extractor = TransactionExtractor::new(&self.client);
        let mut published = Vec::with_capacity(tx_ids.len());
        for tx_id in tx_ids {
            let record = match with_backoff(
                &mut self.backoff,
                &self.cancel,
                &self.state,
                LoopState::Processing,
                "transaction detail",
                || extractor.extract(header, tx_id),
            )
            .await
            {
                Ok(Some(Some(record))) => record,
                Ok(Some(None)) => {
                    self.stats.skipped += 1;
                    continue;
                }
                Ok(None) => return Ok(BlockOutcome::Stop),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        tx = %tx_id,
                        block = header.number,
                        error = %e,
                        "Failed to extract transaction; skipping"
                    );
                    self.stats.skipped += 1;
                    continue;
                }
            };

            let mut record = record;
            record.reorged = self.reorged.contains(&tx_id);
            match self.publisher.publish(StreamItem::Transaction(record), &self.cancel).await {
                Ok(()) => {}
                Err(e) => {
                    log_publish_stop(&e);
                    return Ok(BlockOutcome::Stop);
                }
            }
            published.push(tx_id);
            self.stats.records += 1;
        }

        tracing::debug!(
            block = header.number,
            hash = %header.hash,
            records = published.len(),
            "Block processed"
        );
        self.emitted.insert(header.number, (header.hash, published));
        self.stats.blocks += 1;
        Ok(BlockOutcome::Done)
    }

    async fn publish(&self, item: StreamItem) -> Flow {
        match self.publisher.publish(item, &self.cancel).await {
            Ok(()) => Flow::Continue,
            Err(e) => {
                log_publish_stop(&e);
                Flow::Stop
            }
        }
    }

    /// Forget emissions a reorg can no longer reach.
    fn prune_emitted(&mut self) {
        if let Some(last) = self.cursor.last_number() {
            let floor = last.saturating_sub(self.config.max_reorg_depth);
            self.emitted = self.emitted.split_off(&floor);
        }
    }

    fn set_state(&self, state: LoopState) {
        self.state.send_replace(state);
    }
}

/// Handle to a spawned ingestion loop.
#[derive(Debug)]
pub struct IngestionHandle {
    cancel: CancellationToken,
    state: watch::Receiver<LoopState>,
    task: JoinHandle<Result<(), IngestError>>,
}

impl IngestionHandle {
    /// Ask the loop to stop. Returns immediately.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// The loop's current state.
    pub fn state(&self) -> LoopState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn state_changes(&self) -> watch::Receiver<LoopState> {
        self.state.clone()
    }

    /// Wait for the loop to finish and return its outcome.
    pub async fn join(self) -> Result<(), IngestError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(IngestError::Other(format!("ingestion task failed: {e}"))),
        }
    }

    /// Cancel and wait for the loop to finish.
    pub async fn shutdown(self) -> Result<(), IngestError> {
        self.cancel();
        self.join().await
    }
}

/// Sleep for `delay`; returns `false` if cancelled first.
async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

/// Run `op`, retrying transient failures with backoff until it succeeds, a
/// non-transient error occurs, or `cancel` fires (`Ok(None)`).
async fn with_backoff<T, F, Fut>(
    backoff: &mut Backoff,
    cancel: &CancellationToken,
    state: &watch::Sender<LoopState>,
    resume: LoopState,
    what: &str,
    mut op: F,
) -> Result<Option<T>, IngestError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, IngestError>>,
{
    loop {
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(None),
            outcome = op() => outcome,
        };
        match outcome {
            Ok(value) => {
                if backoff.attempt() > 0 {
                    tracing::info!(attempts = backoff.attempt(), what, "Node reachable again");
                    backoff.reset();
                    state.send_replace(resume);
                }
                return Ok(Some(value));
            }
            Err(e) if e.is_transient() => {
                state.send_replace(LoopState::Backoff);
                let delay = backoff.next_delay();
                tracing::warn!(
                    attempt = backoff.attempt(),
                    delay_ms = delay.as_millis() as u64,
                    what,
                    error = %e,
                    "Node unavailable; backing off"
                );
                if !sleep_or_cancel(delay, cancel).await {
                    return Ok(None);
                }
            }
            Err(e) => return Err(e),
        }
    }
}

fn log_publish_stop(e: &PublishError) {
    match e {
        PublishError::Cancelled => tracing::debug!("Publish abandoned on cancellation"),
        PublishError::Closed => tracing::info!("Consumer dropped the subscription"),
    }
}
