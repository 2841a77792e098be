//! Query executor
//!
//! Each live link is owned by a single worker task that takes statements
//! from a FIFO channel and runs them one at a time, so at most one
//! statement is ever in flight on a link. A statement enters the history
//! when it is submitted; the worker completes the record, emits events
//! and classifies failures before replying.

use crate::db::link::Link;
use crate::db::types::QueryResults;
use crate::db::version::ServerVersion;
use crate::error::{SessionError, SessionResult};
use crate::history::{QueryHistory, RecordId};
use crate::session::events::{EventSink, SessionEvent};
use crate::session::loss;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

type Reply = oneshot::Sender<SessionResult<QueryResults>>;

/// A statement already recorded as running in the history
pub(crate) struct Submission {
    sql: String,
    record: RecordId,
    submitted: Instant,
}

impl Submission {
    fn begin(history: &Mutex<QueryHistory>, sql: String) -> Self {
        let record = history.lock().begin(&sql);
        Self {
            sql,
            record,
            submitted: Instant::now(),
        }
    }
}

struct Job {
    submission: Submission,
    reply: Reply,
}

/// Cheap handle for submitting statements to the current link
#[derive(Clone)]
pub struct LinkTicket {
    jobs: mpsc::UnboundedSender<Job>,
    history: Arc<Mutex<QueryHistory>>,
    native_version: Option<ServerVersion>,
}

impl LinkTicket {
    /// Queue a recorded statement behind everything already submitted
    /// to this link
    pub(crate) fn submit(&self, submission: Submission, reply: Reply) {
        if let Err(mpsc::error::SendError(job)) = self.jobs.send(Job { submission, reply }) {
            // Link is shutting down
            let Submission {
                record, submitted, ..
            } = job.submission;
            let error = SessionError::Closed;
            self.history
                .lock()
                .fail(record, submitted.elapsed(), &error.to_string());
            let _ = job.reply.send(Err(error));
        }
    }

    /// Record, submit and wait for the outcome
    pub(crate) async fn run(&self, sql: &str) -> SessionResult<QueryResults> {
        let (tx, rx) = oneshot::channel();
        self.submit(Submission::begin(&self.history, sql.to_string()), tx);
        rx.await.map_err(|_| SessionError::Closed)?
    }

    pub(crate) fn native_version(&self) -> Option<ServerVersion> {
        self.native_version.clone()
    }
}

/// A running link worker
pub(crate) struct LinkHandle {
    ticket: LinkTicket,
    shutdown: oneshot::Sender<()>,
    worker: JoinHandle<()>,
}

impl LinkHandle {
    pub(crate) fn ticket(&self) -> LinkTicket {
        self.ticket.clone()
    }

    /// Stop accepting statements, finish the queued ones, then end the link
    pub(crate) async fn shutdown(self) {
        let LinkHandle {
            ticket,
            shutdown,
            worker,
        } = self;
        drop(ticket);
        let _ = shutdown.send(());
        if let Err(e) = worker.await {
            tracing::warn!(error = %e, "Link worker did not finish cleanly");
        }
    }
}

/// State shared between a session and its link workers
#[derive(Clone)]
pub(crate) struct Executor {
    session_id: Uuid,
    history: Arc<Mutex<QueryHistory>>,
    events: EventSink,
    logging: Arc<AtomicBool>,
}

impl Executor {
    pub(crate) fn new(session_id: Uuid, events: EventSink) -> Self {
        Self {
            session_id,
            history: Arc::new(Mutex::new(QueryHistory::new())),
            events,
            logging: Arc::new(AtomicBool::new(true)),
        }
    }

    pub(crate) fn history(&self) -> &Mutex<QueryHistory> {
        &self.history
    }

    /// Append a running history record for `sql`
    pub(crate) fn record(&self, sql: String) -> Submission {
        Submission::begin(&self.history, sql)
    }

    pub(crate) fn set_logging(&self, enabled: bool) {
        self.logging.store(enabled, Ordering::Relaxed);
    }

    pub(crate) fn logging(&self) -> bool {
        self.logging.load(Ordering::Relaxed)
    }

    /// Hand `link` to a new worker task
    pub(crate) fn start(&self, link: Box<dyn Link>) -> LinkHandle {
        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let native_version = link.native_version();
        let worker = tokio::spawn(self.clone().work(link, jobs_rx, shutdown_rx));
        LinkHandle {
            ticket: LinkTicket {
                jobs: jobs_tx,
                history: self.history.clone(),
                native_version,
            },
            shutdown: shutdown_tx,
            worker,
        }
    }

    async fn work(
        self,
        link: Box<dyn Link>,
        mut jobs: mpsc::UnboundedReceiver<Job>,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        let mut closing = false;
        loop {
            tokio::select! {
                job = jobs.recv() => match job {
                    Some(job) => {
                        let outcome = self.run_query(link.as_ref(), job.submission).await;
                        // Caller may have stopped waiting; the statement still ran
                        let _ = job.reply.send(outcome);
                    }
                    None => break,
                },
                // Fires on an explicit shutdown or when the handle is dropped
                _ = &mut shutdown, if !closing => {
                    closing = true;
                    jobs.close();
                }
            }
        }
        link.end().await;
        tracing::debug!(session_id = %self.session_id, "Link ended");
    }

    async fn run_query(
        &self,
        link: &dyn Link,
        submission: Submission,
    ) -> SessionResult<QueryResults> {
        let Submission {
            sql,
            record,
            submitted,
        } = submission;
        let sql = sql.as_str();
        let logging = self.logging();
        if logging {
            tracing::info!(session_id = %self.session_id, sql, "SQL");
        }
        self.events.emit(SessionEvent::QueryStarted {
            sql: sql.to_string(),
        });

        let start = Instant::now();
        let outcome = link.query(sql).await;
        let elapsed = start.elapsed();

        match outcome {
            Ok(mut results) => {
                results.execution_time = elapsed;
                self.history.lock().succeed(record, submitted.elapsed());
                if logging {
                    tracing::info!(
                        session_id = %self.session_id,
                        elapsed_ms = elapsed.as_secs_f64() * 1000.0,
                        rows = results.row_count,
                        "SQL done"
                    );
                }
                self.events.emit(SessionEvent::QuerySucceeded {
                    sql: sql.to_string(),
                    elapsed,
                });
                Ok(results)
            }
            Err(e) => {
                self.history
                    .lock()
                    .fail(record, submitted.elapsed(), &e.message);
                tracing::warn!(session_id = %self.session_id, sql, error = %e, "SQL failed");
                self.events.emit(SessionEvent::QueryFailed {
                    sql: sql.to_string(),
                    message: e.message.clone(),
                });
                if loss::is_connection_lost(&e.message) {
                    tracing::warn!(session_id = %self.session_id, "Connection to server lost");
                    self.events.emit(SessionEvent::ConnectionLost {
                        message: e.message.clone(),
                    });
                    Err(SessionError::ConnectionLost {
                        sql: sql.to_string(),
                        message: e.message,
                    })
                } else {
                    Err(SessionError::QueryFailed {
                        sql: sql.to_string(),
                        message: e.message,
                    })
                }
            }
        }
    }
}
