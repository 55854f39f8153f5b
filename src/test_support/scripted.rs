use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::transport::{
    ChunkFlow, PendingRequest, ResponseConsumer, ResponseHead, Transport, TransportError,
};

const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(2);

/// How a scripted request ends.
#[derive(Debug, Clone)]
pub enum ScriptEnd {
    Complete(u16),
    Fail(&'static str),
    /// Park until cancellation is requested, then report it.
    AwaitCancel,
}

/// Callbacks replayed for every request issued against a [`ScriptedTransport`].
#[derive(Debug, Clone)]
pub struct Script {
    pub head: Option<ResponseHead>,
    pub chunks: Vec<Vec<u8>>,
    pub end: ScriptEnd,
}

impl Script {
    pub fn ok(content_length: Option<u64>, chunks: &[&[u8]]) -> Self {
        Self {
            head: Some(ResponseHead {
                status: 200,
                content_length,
            }),
            chunks: chunks.iter().map(|chunk| chunk.to_vec()).collect(),
            end: ScriptEnd::Complete(200),
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            head: Some(ResponseHead {
                status,
                content_length: None,
            }),
            chunks: Vec::new(),
            end: ScriptEnd::Complete(status),
        }
    }

    pub fn with_end(mut self, end: ScriptEnd) -> Self {
        self.end = end;
        self
    }
}

/// What the scripted transport observed after delivery finished.
#[derive(Debug, Default, Clone)]
pub struct DeliveryReport {
    /// Chunks accepted by the consumer before it aborted (if it did).
    pub chunks_delivered: usize,
    pub aborted: bool,
}

/// Deterministic transport delivering a [`Script`] from a separate thread.
pub struct ScriptedTransport {
    script: Script,
    executions: AtomicUsize,
    workers: Mutex<Vec<JoinHandle<DeliveryReport>>>,
}

impl ScriptedTransport {
    pub fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            executions: AtomicUsize::new(0),
            workers: Mutex::new(Vec::new()),
        })
    }

    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }

    /// Waits for every delivery thread and returns their reports.
    pub fn join(&self) -> Vec<DeliveryReport> {
        let workers: Vec<_> = self
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        workers
            .into_iter()
            .filter_map(|worker| worker.join().ok())
            .collect()
    }
}

impl Transport for ScriptedTransport {
    fn execute(&self, url: &str, consumer: Box<dyn ResponseConsumer>) -> PendingRequest {
        self.executions.fetch_add(1, Ordering::SeqCst);
        let token = CancellationToken::new();
        let pending = PendingRequest::new(token.clone());
        let script = self.script.clone();
        let url = url.to_string();
        let worker = std::thread::spawn(move || deliver(script, &url, consumer, &token));
        self.workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(worker);
        pending
    }
}

fn deliver(
    script: Script,
    url: &str,
    mut consumer: Box<dyn ResponseConsumer>,
    token: &CancellationToken,
) -> DeliveryReport {
    let mut report = DeliveryReport::default();
    if token.is_cancelled() {
        consumer.on_cancelled();
        return report;
    }
    if let Some(head) = script.head {
        consumer.on_response(&head);
    }
    for chunk in &script.chunks {
        if token.is_cancelled() {
            consumer.on_cancelled();
            return report;
        }
        if consumer.on_chunk(chunk) == ChunkFlow::Abort {
            report.aborted = true;
            consumer.on_cancelled();
            return report;
        }
        report.chunks_delivered += 1;
    }
    match script.end {
        ScriptEnd::Complete(status) => consumer.on_completed(status),
        ScriptEnd::Fail(reason) => consumer.on_failed(TransportError::interrupted(url, reason)),
        ScriptEnd::AwaitCancel => {
            while !token.is_cancelled() {
                std::thread::sleep(CANCEL_POLL_INTERVAL);
            }
            consumer.on_cancelled();
        }
    }
    report
}
