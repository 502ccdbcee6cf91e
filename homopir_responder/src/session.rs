use crate::{
    aggregator::{BarrierStatus, ColumnAggregator},
    evaluator::ColumnContribution,
};
use homopir_common::{branch_opt_util, error::HomoPIRError, paillier::Ciphertext, query::QueryVector, response::ResponseVector};
use log::{debug, info, warn};
use std::collections::BTreeMap;
use tokio::{
    sync::{broadcast, mpsc, watch},
    task::JoinHandle,
};

/// Default capacity of the producer → aggregator and aggregator → consumer channels.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// What the consumer side of an aggregation session receives, in order, for every epoch.
#[derive(Clone, Debug, PartialEq)]
pub enum ColumnMessage {
    Column { epoch: u64, column: u64, ciphertext: Ciphertext },
    EndOfColumns { epoch: u64 },
    EpochAborted { epoch: u64 },
}

/// Notifications broadcast to every producer.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    /// All columns of this epoch were handed over to the consumer. Producers may start contributing to the next epoch.
    EpochCompleted { epoch: u64 },
    /// This epoch's partial aggregates were discarded. Producers must start over in the next epoch.
    Aborted { epoch: u64, reason: Option<HomoPIRError> },
}

/// Producer commands carry the epoch the producer believes is current. Commands of an already ended epoch are dropped.
enum Command {
    Contribute { producer: usize, epoch: u64, contribution: ColumnContribution },
    Flush { producer: usize, epoch: u64 },
    Abort,
    Shutdown,
}

/// A running column aggregation engine: a single tokio task owning a [`ColumnAggregator`], fed by producers over a channel.
///
/// Every contribution and flush signal is applied in arrival order. Once the last producer flushes, the task streams all
/// aggregated columns to the consumer, terminates the list with [`ColumnMessage::EndOfColumns`] and then acknowledges the
/// end of the epoch to all producers. A producer must not contribute to the next epoch before receiving that acknowledgement,
/// [`ProducerHandle::flush_and_wait_ack`] does exactly that. Contributions and flushes of a producer which has not yet
/// observed the end of an aborted epoch are dropped, so that they never leak into the next one.
pub struct AggregationSession {
    aggregator: ColumnAggregator,
    commands: mpsc::Receiver<Command>,
    columns: mpsc::Sender<ColumnMessage>,
    events: broadcast::Sender<SessionEvent>,
    status: watch::Sender<BarrierStatus>,
}

impl AggregationSession {
    /// Spawns the aggregation task on the current tokio runtime, for `total_producers` producers answering `query`.
    ///
    /// Returns the handle for controlling the session and creating producer handles, along with the consumer's collector.
    pub fn spawn(query: &QueryVector, total_producers: usize) -> Result<(SessionHandle, ResponseCollector), HomoPIRError> {
        Self::spawn_with_capacity(query, total_producers, DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn spawn_with_capacity(query: &QueryVector, total_producers: usize, capacity: usize) -> Result<(SessionHandle, ResponseCollector), HomoPIRError> {
        let aggregator = ColumnAggregator::new(query, total_producers)?;
        let capacity = capacity.max(1);

        let (command_tx, command_rx) = mpsc::channel(capacity);
        let (column_tx, column_rx) = mpsc::channel(capacity);
        let (event_tx, _) = broadcast::channel(capacity.max(total_producers));
        let (status_tx, status_rx) = watch::channel(aggregator.status());

        let session = AggregationSession {
            aggregator,
            commands: command_rx,
            columns: column_tx,
            events: event_tx.clone(),
            status: status_tx,
        };
        let task = tokio::spawn(session.run());

        info!("Spawned aggregation session for query {} with {} producers", query.query_info().query_id(), total_producers);

        let handle = SessionHandle {
            commands: command_tx,
            events: event_tx,
            status: status_rx,
            total_producers,
            task,
        };
        let collector = ResponseCollector {
            query_id: query.query_info().query_id(),
            columns: column_rx,
        };

        Ok((handle, collector))
    }

    async fn run(mut self) {
        while let Some(command) = self.commands.recv().await {
            let epoch = self.aggregator.epoch();
            let outcome = match command {
                Command::Contribute {
                    producer,
                    epoch: producer_epoch,
                    contribution,
                } => {
                    if branch_opt_util::unlikely(producer_epoch != epoch) {
                        debug!("Dropping contribution of producer #{} to ended epoch {}", producer, producer_epoch);
                        continue;
                    }
                    self.aggregator.contribute(producer, contribution).map(|_| None).map_err(Some)
                }
                Command::Flush { producer, epoch: producer_epoch } => {
                    if branch_opt_util::unlikely(producer_epoch != epoch) {
                        debug!("Dropping flush signal of producer #{} for ended epoch {}", producer, producer_epoch);
                        continue;
                    }
                    self.aggregator.flush(producer).map_err(Some)
                }
                Command::Abort => {
                    self.aggregator.abort();
                    Err(None)
                }
                Command::Shutdown => break,
            };

            // An acknowledged producer must never observe a stale barrier status.
            self.status.send_replace(self.aggregator.status());

            match outcome {
                Ok(Some(response)) => self.emit(epoch, response).await,
                Ok(None) => {}
                Err(reason) => self.announce_abort(epoch, reason).await,
            }
        }

        debug!("Aggregation session stopped at epoch {}", self.aggregator.epoch());
    }

    async fn emit(&mut self, epoch: u64, response: ResponseVector) {
        for (column, ciphertext) in response.into_columns() {
            self.send_to_consumer(ColumnMessage::Column { epoch, column, ciphertext }).await;
        }
        self.send_to_consumer(ColumnMessage::EndOfColumns { epoch }).await;

        // No subscribed producer is not an error.
        let _ = self.events.send(SessionEvent::EpochCompleted { epoch });
    }

    async fn announce_abort(&mut self, epoch: u64, reason: Option<HomoPIRError>) {
        match &reason {
            Some(e) => warn!("Epoch {} aborted: {}", epoch, e),
            None => warn!("Epoch {} aborted on request", epoch),
        }

        self.send_to_consumer(ColumnMessage::EpochAborted { epoch }).await;
        let _ = self.events.send(SessionEvent::Aborted { epoch, reason });
    }

    async fn send_to_consumer(&mut self, message: ColumnMessage) {
        if branch_opt_util::unlikely(self.columns.send(message).await.is_err()) {
            debug!("Response collector is gone, dropping column message");
        }
    }
}

/// Controls a running [`AggregationSession`].
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<SessionEvent>,
    status: watch::Receiver<BarrierStatus>,
    total_producers: usize,
    task: JoinHandle<()>,
}

impl SessionHandle {
    /// Creates the handle through which producer `producer` talks to the session.
    pub fn producer(&self, producer: usize) -> Result<ProducerHandle, HomoPIRError> {
        if branch_opt_util::unlikely(producer >= self.total_producers) {
            return Err(HomoPIRError::UnknownProducer {
                producer,
                total_producers: self.total_producers,
            });
        }

        Ok(self.new_producer_handle(producer))
    }

    /// One handle per producer, in producer order.
    pub fn producers(&self) -> Vec<ProducerHandle> {
        (0..self.total_producers).map(|producer| self.new_producer_handle(producer)).collect()
    }

    /// Handles start out in the epoch the session is in right now.
    fn new_producer_handle(&self, producer: usize) -> ProducerHandle {
        ProducerHandle {
            producer,
            epoch: self.status.borrow().epoch,
            commands: self.commands.clone(),
            events: self.events.subscribe(),
        }
    }

    pub const fn total_producers(&self) -> usize {
        self.total_producers
    }

    /// Barrier status as of the last command the session processed.
    pub fn status(&self) -> BarrierStatus {
        *self.status.borrow()
    }

    /// Waits until the session has processed commands up to the point where `predicate` holds for its barrier status.
    pub async fn wait_for_status(&mut self, predicate: impl FnMut(&BarrierStatus) -> bool) -> Result<BarrierStatus, HomoPIRError> {
        self.status
            .wait_for(predicate)
            .await
            .map(|status| *status)
            .map_err(|_| HomoPIRError::AggregationSessionClosed)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Discards the current epoch's partial aggregates, notifying both the consumer and every producer.
    pub async fn abort_epoch(&self) -> Result<(), HomoPIRError> {
        self.commands.send(Command::Abort).await.map_err(|_| HomoPIRError::AggregationSessionClosed)
    }

    /// Stops the session once every command sent before this one was processed.
    pub async fn shutdown(self) -> Result<(), HomoPIRError> {
        self.commands.send(Command::Shutdown).await.map_err(|_| HomoPIRError::AggregationSessionClosed)?;
        self.task.await.map_err(|_| HomoPIRError::AggregationSessionClosed)
    }
}

/// A single producer's end of an [`AggregationSession`].
pub struct ProducerHandle {
    producer: usize,
    epoch: u64,
    commands: mpsc::Sender<Command>,
    events: broadcast::Receiver<SessionEvent>,
}

impl ProducerHandle {
    pub const fn producer(&self) -> usize {
        self.producer
    }

    /// Epoch this producer contributes to, until it observes that epoch's end.
    pub const fn epoch(&self) -> u64 {
        self.epoch
    }

    pub async fn contribute(&self, contribution: ColumnContribution) -> Result<(), HomoPIRError> {
        self.send(Command::Contribute {
            producer: self.producer,
            epoch: self.epoch,
            contribution,
        })
        .await
    }

    pub async fn contribute_all(&self, contributions: impl IntoIterator<Item = ColumnContribution>) -> Result<(), HomoPIRError> {
        for contribution in contributions {
            self.contribute(contribution).await?;
        }

        Ok(())
    }

    /// Signals this producer is done contributing to the current epoch, without waiting for the epoch to end.
    pub async fn flush(&self) -> Result<(), HomoPIRError> {
        self.send(Command::Flush {
            producer: self.producer,
            epoch: self.epoch,
        })
        .await
    }

    /// Signals this producer is done contributing to the current epoch, then waits for the session-end acknowledgement.
    ///
    /// Returns the completed epoch, or fails with [`HomoPIRError::EpochAborted`] if the epoch was aborted in the meantime.
    /// An abort already pending for this producer's epoch is reported without sending the flush signal.
    pub async fn flush_and_wait_ack(&mut self) -> Result<u64, HomoPIRError> {
        if let Some(outcome) = self.pending_epoch_end() {
            return outcome;
        }

        self.flush().await?;
        self.wait_for_epoch_end().await
    }

    /// Waits for the end of this producer's current epoch, then moves the producer on to the next one.
    pub async fn wait_for_epoch_end(&mut self) -> Result<u64, HomoPIRError> {
        loop {
            match self.events.recv().await {
                Ok(event) => {
                    if let Some(outcome) = self.observe(event) {
                        return outcome;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Producer #{} missed {} session events", self.producer, skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return Err(HomoPIRError::AggregationSessionClosed),
            }
        }
    }

    /// Consumes already queued events, up to the end of this producer's current epoch, if that was announced.
    fn pending_epoch_end(&mut self) -> Option<Result<u64, HomoPIRError>> {
        loop {
            match self.events.try_recv() {
                Ok(event) => {
                    if let Some(outcome) = self.observe(event) {
                        return Some(outcome);
                    }
                }
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!("Producer #{} missed {} session events", self.producer, skipped);
                }
                Err(_) => return None,
            }
        }
    }

    /// Ends of epochs older than the producer's current one are skipped.
    fn observe(&mut self, event: SessionEvent) -> Option<Result<u64, HomoPIRError>> {
        let (epoch, outcome) = match event {
            SessionEvent::EpochCompleted { epoch } => (epoch, Ok(epoch)),
            SessionEvent::Aborted { epoch, .. } => (epoch, Err(HomoPIRError::EpochAborted(epoch))),
        };

        if epoch < self.epoch {
            debug!("Producer #{} skipping end of epoch {}", self.producer, epoch);
            return None;
        }

        self.epoch = epoch + 1;
        Some(outcome)
    }

    async fn send(&self, command: Command) -> Result<(), HomoPIRError> {
        self.commands.send(command).await.map_err(|_| HomoPIRError::AggregationSessionClosed)
    }
}

/// Consumer end of an [`AggregationSession`], receiving the column stream.
pub struct ResponseCollector {
    query_id: u64,
    columns: mpsc::Receiver<ColumnMessage>,
}

impl ResponseCollector {
    /// Raw column stream. Returns `None` once the session has stopped and every message was received.
    pub async fn recv(&mut self) -> Option<ColumnMessage> {
        self.columns.recv().await
    }

    /// Collects the columns of the next epoch, up to its end of columns marker, into a response vector.
    ///
    /// Fails with [`HomoPIRError::EpochAborted`] if the epoch was aborted, after discarding whatever was collected for it.
    pub async fn next_response(&mut self) -> Result<ResponseVector, HomoPIRError> {
        let mut columns = BTreeMap::new();

        loop {
            match self.columns.recv().await {
                Some(ColumnMessage::Column { column, ciphertext, .. }) => {
                    columns.insert(column, ciphertext);
                }
                Some(ColumnMessage::EndOfColumns { epoch }) => {
                    info!("Collected {} columns of epoch {}", columns.len(), epoch);
                    return Ok(ResponseVector::from_columns(self.query_id, columns));
                }
                Some(ColumnMessage::EpochAborted { epoch }) => return Err(HomoPIRError::EpochAborted(epoch)),
                None => return Err(HomoPIRError::AggregationSessionClosed),
            }
        }
    }
}
