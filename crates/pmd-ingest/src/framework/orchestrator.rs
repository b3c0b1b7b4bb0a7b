//! Indexer orchestrator
//!
//! Drives one source adapter for one resource:
//!
//! 1. Load the checkpoint and open the shard writer
//! 2. Ask the adapter for a plan from the resume position
//! 3. Fetch units with bounded concurrency
//! 4. Hand completed units to the writer in dispatch order
//! 5. Advance the checkpoint only to positions whose records are all in
//!    committed shards
//!
//! A run ends `Done` when the upstream is drained (or the block range is
//! covered) and `Stopped` when the context's cancellation token fires.

use futures::stream::{FuturesUnordered, StreamExt};
use std::time::Duration;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::queue::{ReorderBuffer, WorkQueue};
use super::retry;
use super::source::SourceAdapter;
use super::storage::ShardWriter;
use super::types::{FetchOutcome, Plan, Position, RunReport, RunState, Schedule};
use crate::context::IngestContext;
use crate::error::{IngestError, IngestResult, SourceError};

/// How one pass over a plan ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PassEnd {
    /// Upstream signalled end of stream
    EndOfStream,
    /// Every planned unit was committed
    Drained,
    Cancelled,
}

/// Why a pass gave up
#[derive(Debug)]
enum Failure {
    Exhausted {
        unit: String,
        requeues: u32,
        source: SourceError,
    },
    Rejected {
        unit: String,
        source: SourceError,
    },
    Ingest(IngestError),
}

/// Positions tracked during a run
#[derive(Debug)]
struct Progress {
    /// Position after the last unit handed to the writer
    appended: Position,
    /// Position last written to the checkpoint store
    saved: Option<Position>,
}

impl Progress {
    fn last_checkpoint(&self) -> String {
        self.saved
            .as_ref()
            .map(|p| p.to_string())
            .unwrap_or_else(|| "none".to_string())
    }
}

/// Per-resource control loop
pub struct Orchestrator<S: SourceAdapter> {
    resource: String,
    source: S,
    ctx: IngestContext,
}

impl<S: SourceAdapter> Orchestrator<S> {
    pub fn new(resource: impl Into<String>, source: S, ctx: &IngestContext) -> Self {
        Self {
            resource: resource.into(),
            source,
            ctx: ctx.clone(),
        }
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Run the resource until done, stopped, or failed
    pub async fn run(&self) -> IngestResult<RunReport> {
        let span = info_span!("ingest", resource = %self.resource, source = self.source.name());
        self.run_inner().instrument(span).await
    }

    async fn run_inner(&self) -> IngestResult<RunReport> {
        let config = self.ctx.config();
        let mut report = RunReport::new(&self.resource);

        let stored = self.ctx.checkpoints().load(&self.resource).await?;
        if let Some(position) = &stored {
            self.check_kind(position)?;
        }
        report.checkpoint = stored.clone();

        if let Some(position) = &stored {
            if position.is_exhausted() && !config.refresh_exhausted {
                info!(checkpoint = %position, "Upstream already drained, nothing to fetch");
                report.state = RunState::Done;
                return Ok(report);
            }
        }

        let mut progress = Progress {
            appended: stored
                .clone()
                .unwrap_or_else(|| self.source.start_position()),
            saved: stored,
        };

        let mut writer =
            ShardWriter::<S::Record>::open(&config.data_dir, &self.resource, config.shard_size)
                .await
                .map_err(|e| e.at_checkpoint(progress.last_checkpoint()))?;

        info!(from = %progress.appended, "Starting ingestion run");

        loop {
            if self.ctx.is_stopping() {
                report.state = RunState::Stopped;
                break;
            }

            report.state = RunState::Fetching;
            let plan = match self.source.plan(&progress.appended).await {
                Ok(plan) => plan,
                Err(e) if self.follows() && e.is_requeueable() => {
                    warn!(error = %e, "Planning failed, retrying after poll interval");
                    if self.pause(config.poll_interval()).await {
                        continue;
                    }
                    report.state = RunState::Stopped;
                    break;
                }
                Err(e) => {
                    error!(error = %e, "Planning failed");
                    return Err(IngestError::Source {
                        resource: self.resource.clone(),
                        last_checkpoint: progress.last_checkpoint(),
                        source: e,
                    });
                }
            };

            if plan == Plan::Finished {
                info!(at = %progress.appended, "Configured range fully covered");
                report.state = RunState::Done;
                break;
            }

            let pass = self
                .drive(plan, &mut writer, &mut progress, &mut report)
                .await;
            let finalized = self.finalize(&mut writer, &mut progress, &mut report).await;

            match pass {
                Err(failure) => {
                    if let Err(e) = finalized {
                        error!(error = %e, "Final flush after failure did not complete");
                    }
                    let err = self.failure_error(failure, &progress);
                    error!(error = %err, "Ingestion run failed");
                    return Err(err);
                }
                Ok(PassEnd::Cancelled) => {
                    finalized.map_err(|e| e.at_checkpoint(progress.last_checkpoint()))?;
                    report.state = RunState::Stopped;
                    break;
                }
                Ok(PassEnd::EndOfStream) => {
                    finalized.map_err(|e| e.at_checkpoint(progress.last_checkpoint()))?;
                    report.state = RunState::Done;
                    break;
                }
                Ok(PassEnd::Drained) => {
                    finalized.map_err(|e| e.at_checkpoint(progress.last_checkpoint()))?;
                    if self.follows() {
                        debug!(at = %progress.appended, "Caught up with head, waiting");
                        if self.pause(config.poll_interval()).await {
                            continue;
                        }
                        report.state = RunState::Stopped;
                    } else {
                        report.state = RunState::Done;
                    }
                    break;
                }
            }
        }

        report.checkpoint = progress.saved.clone();
        info!(
            state = report.state.as_str(),
            units = report.units_fetched,
            fetched = report.records_fetched,
            appended = report.records_appended,
            duplicates = report.duplicates,
            malformed = report.malformed,
            shards = report.shards_written,
            checkpoint = %progress.last_checkpoint(),
            "Ingestion run finished"
        );
        Ok(report)
    }

    /// A stored position must match the shape of the source's schedule
    fn check_kind(&self, position: &Position) -> IngestResult<()> {
        let fits = match self.source.schedule() {
            Schedule::Blocks => matches!(position, Position::Block { .. }),
            Schedule::Chained | Schedule::Offsets => matches!(position, Position::Page { .. }),
        };
        if fits {
            return Ok(());
        }
        Err(IngestError::CheckpointCorrupt {
            resource: self.resource.clone(),
            reason: format!(
                "position {} does not fit a {:?} source",
                position,
                self.source.schedule()
            ),
        })
    }

    fn follows(&self) -> bool {
        self.ctx.config().follow && self.source.schedule() == Schedule::Blocks
    }

    /// Sleep unless stopped first; returns false when stopped
    async fn pause(&self, interval: Duration) -> bool {
        retry::wait(interval, self.ctx.cancel_token()).await
    }

    /// Fetch every unit of a plan and commit results in dispatch order
    async fn drive(
        &self,
        plan: Plan,
        writer: &mut ShardWriter<S::Record>,
        progress: &mut Progress,
        report: &mut RunReport,
    ) -> Result<PassEnd, Failure> {
        let config = self.ctx.config();
        let cancel = self.ctx.cancel_token();
        let width = match self.source.schedule() {
            Schedule::Chained => 1,
            Schedule::Offsets | Schedule::Blocks => config.concurrency.max(1),
        };

        let mut queue = WorkQueue::new(plan);
        let mut reorder: ReorderBuffer<FetchOutcome<S::Record>> = ReorderBuffer::new();
        let mut in_flight = FuturesUnordered::new();
        let mut failure: Option<Failure> = None;
        let mut cancelled = false;
        let mut ended = false;
        let source = &self.source;

        loop {
            while failure.is_none() && !cancelled && in_flight.len() < width {
                if cancel.is_cancelled() {
                    info!(in_flight = in_flight.len(), "Stop signal observed, draining in-flight units");
                    cancelled = true;
                    queue.close();
                    break;
                }
                let Some((seq, unit)) = queue.next() else {
                    break;
                };
                let delay = match queue.requeues(seq) {
                    0 => Duration::ZERO,
                    n => config.retry.delay_for(n, None),
                };
                debug!(seq, unit = %unit, ?delay, "Dispatching fetch unit");
                in_flight.push(async move {
                    if !retry::wait(delay, cancel).await {
                        return (seq, unit, Err(SourceError::Transient("stopped before retry".into())));
                    }
                    let result = source.fetch(&unit).await;
                    (seq, unit, result)
                });
            }

            let Some((seq, unit, result)) = in_flight.next().await else {
                break;
            };

            if failure.is_some() || queue.end_seq().is_some_and(|end| seq > end) {
                continue;
            }

            match result {
                Ok(outcome) => {
                    report.units_fetched += 1;
                    if outcome.end_of_stream {
                        queue.end_at(seq);
                    } else if let Some(next) = &outcome.follow_on {
                        if !cancelled {
                            queue.reveal(next.clone());
                        }
                    }
                    reorder.insert(seq, outcome);

                    while let Some((ready_seq, outcome)) = reorder.pop_ready() {
                        if queue.end_seq().is_some_and(|end| ready_seq > end) {
                            continue;
                        }
                        let end_of_stream = outcome.end_of_stream;
                        if let Err(e) = self.commit(ready_seq, outcome, writer, progress, report).await {
                            failure = Some(Failure::Ingest(e));
                            break;
                        }
                        if end_of_stream {
                            ended = true;
                        }
                    }
                }
                Err(e) if cancelled || cancel.is_cancelled() => {
                    debug!(seq, unit = %unit, error = %e, "Dropping failed unit after stop signal");
                }
                Err(e) if e.is_requeueable() => {
                    let requeues = queue.requeues(seq);
                    if requeues >= config.max_unit_requeues {
                        error!(seq, unit = %unit, requeues, error = %e, "Fetch unit exhausted requeues");
                        failure = Some(Failure::Exhausted {
                            unit: unit.to_string(),
                            requeues,
                            source: e,
                        });
                    } else {
                        let requeues = queue.requeue(seq, unit.clone());
                        warn!(
                            seq,
                            unit = %unit,
                            requeues,
                            max = config.max_unit_requeues,
                            error = %e,
                            "Fetch unit failed, requeued"
                        );
                    }
                }
                Err(e) => {
                    error!(seq, unit = %unit, error = %e, "Fetch unit failed permanently");
                    failure = Some(Failure::Rejected {
                        unit: unit.to_string(),
                        source: e,
                    });
                }
            }
        }

        if reorder.waiting() > 0 {
            debug!(waiting = reorder.waiting(), "Completed units left behind an unfinished unit");
        }

        match failure {
            Some(failure) => Err(failure),
            None if cancelled => Ok(PassEnd::Cancelled),
            None if ended => Ok(PassEnd::EndOfStream),
            None => Ok(PassEnd::Drained),
        }
    }

    /// Append one unit's records and advance the checkpoint where allowed
    async fn commit(
        &self,
        seq: u64,
        outcome: FetchOutcome<S::Record>,
        writer: &mut ShardWriter<S::Record>,
        progress: &mut Progress,
        report: &mut RunReport,
    ) -> IngestResult<()> {
        report.state = RunState::DedupingAndBuffering;
        let fetched = outcome.records.len();
        report.records_fetched += fetched;
        report.malformed += outcome.malformed;

        let stats = writer.append_batch(outcome.records).await?;
        report.records_appended += stats.appended;
        report.duplicates += stats.duplicates;
        report.shards_written += stats.shards.len();

        let previous = std::mem::replace(&mut progress.appended, outcome.position);
        debug!(
            seq,
            fetched,
            appended = stats.appended,
            duplicates = stats.duplicates,
            malformed = outcome.malformed,
            position = %progress.appended,
            "Unit handed to storage"
        );

        if writer.buffered() == 0 {
            let position = progress.appended.clone();
            self.advance(position, progress, report).await?;
        } else if !stats.shards.is_empty() {
            // the flush covered every unit before this one
            self.advance(previous, progress, report).await?;
        }
        Ok(())
    }

    /// Flush the partial shard and checkpoint everything appended
    async fn finalize(
        &self,
        writer: &mut ShardWriter<S::Record>,
        progress: &mut Progress,
        report: &mut RunReport,
    ) -> IngestResult<()> {
        report.state = RunState::Flushing;
        if writer.flush().await?.is_some() {
            report.shards_written += 1;
        }
        let position = progress.appended.clone();
        self.advance(position, progress, report).await
    }

    async fn advance(
        &self,
        position: Position,
        progress: &mut Progress,
        report: &mut RunReport,
    ) -> IngestResult<()> {
        if progress.saved.as_ref() == Some(&position) {
            return Ok(());
        }
        report.state = RunState::AdvancingCheckpoint;
        self.ctx.checkpoints().save(&self.resource, &position).await?;
        report.checkpoint = Some(position.clone());
        progress.saved = Some(position);
        Ok(())
    }

    fn failure_error(&self, failure: Failure, progress: &Progress) -> IngestError {
        match failure {
            Failure::Exhausted {
                unit,
                requeues,
                source,
            } => IngestError::RetriesExhausted {
                resource: self.resource.clone(),
                unit,
                requeues,
                last_checkpoint: progress.last_checkpoint(),
                source,
            },
            Failure::Rejected { unit, source } => {
                debug!(unit = %unit, "Unit rejected by upstream");
                IngestError::Source {
                    resource: self.resource.clone(),
                    last_checkpoint: progress.last_checkpoint(),
                    source,
                }
            }
            Failure::Ingest(e) => e.at_checkpoint(progress.last_checkpoint()),
        }
    }
}
