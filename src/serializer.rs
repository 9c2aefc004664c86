//! Single-slot access to the generation engine.
//!
//! The engine lives on one worker thread and only that thread ever touches it.
//! Callers hand over jobs through a FIFO channel and await the result on a oneshot,
//! so at most one generation is in flight no matter how many callers are waiting.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::engine::TokenGenerator;
use crate::errors::ServiceError;
use crate::extraction::{ExtractionPolicy, GenerationResult};
use crate::metrics::ServiceMetrics;
use crate::prompting::{GenerationRequest, PromptBuilder};

type Reply = oneshot::Sender<Result<GenerationResult, ServiceError>>;

struct Job {
    request: GenerationRequest,
    reply: Reply,
    enqueued_at: Instant,
}

/// Prompt Builder -> engine -> extraction, executed while holding the engine.
pub struct Pipeline<G> {
    engine: G,
    prompts: PromptBuilder,
    policy: Box<dyn ExtractionPolicy>,
}

impl<G: TokenGenerator> Pipeline<G> {
    pub fn new(engine: G, prompts: PromptBuilder, policy: Box<dyn ExtractionPolicy>) -> Self {
        Self {
            engine,
            prompts,
            policy,
        }
    }

    pub fn execute(&mut self, request: &GenerationRequest) -> Result<GenerationResult, ServiceError> {
        let prompt = self
            .prompts
            .build(request)
            .map_err(|e| ServiceError::internal("prompt rendering failed", e))?;

        let prompt_tokens = self.engine.encode(&prompt)?;
        let output_tokens = self.engine.run(&prompt_tokens, &request.params)?;
        let raw_text = self.engine.decode(&output_tokens)?;

        let extraction = self.policy.extract(request, &prompt, &raw_text);
        debug!(
            mode = request.mode.as_str(),
            prompt_tokens = prompt_tokens.len(),
            new_tokens = output_tokens.len().saturating_sub(prompt_tokens.len()),
            truncated = extraction.truncated,
            "generation finished"
        );

        Ok(GenerationResult {
            raw_text,
            extracted_code: extraction.code,
            truncated: extraction.truncated,
        })
    }
}

pub struct RequestSerializer {
    sender: Mutex<Option<Sender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    pending: Arc<AtomicUsize>,
    depth_limit: Option<usize>,
    engine_description: String,
    metrics: Arc<ServiceMetrics>,
}

impl RequestSerializer {
    /// Moves the pipeline onto its worker thread. `depth_limit` bounds the jobs
    /// waiting behind the running one; `None` queues without limit.
    pub fn start<G: TokenGenerator>(
        pipeline: Pipeline<G>,
        depth_limit: Option<usize>,
        metrics: Arc<ServiceMetrics>,
    ) -> Result<Self, ServiceError> {
        let (tx_job, rx_job) = mpsc::channel::<Job>();
        let pending = Arc::new(AtomicUsize::new(0));
        let engine_description = pipeline.engine.describe();

        let worker_pending = Arc::clone(&pending);
        let worker_metrics = Arc::clone(&metrics);
        let worker = thread::Builder::new()
            .name("code_synth_engine".to_string())
            .spawn(move || run_worker(pipeline, rx_job, worker_pending, worker_metrics))
            .map_err(|e| ServiceError::internal("failed to spawn generation worker", e))?;

        info!(
            engine = %engine_description,
            queue_depth = ?depth_limit,
            "request serializer started"
        );

        Ok(Self {
            sender: Mutex::new(Some(tx_job)),
            worker: Mutex::new(Some(worker)),
            pending,
            depth_limit,
            engine_description,
            metrics,
        })
    }

    pub async fn submit(&self, request: GenerationRequest) -> Result<GenerationResult, ServiceError> {
        self.admit()?;

        let (reply, response) = oneshot::channel();
        let job = Job {
            request,
            reply,
            enqueued_at: Instant::now(),
        };

        let sent = {
            let guard = self.sender.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            match guard.as_ref() {
                Some(tx) => tx.send(job).is_ok(),
                None => false,
            }
        };
        if !sent {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(ServiceError::internal(
                "generation unavailable",
                "service is shutting down",
            ));
        }

        response.await.unwrap_or_else(|_| {
            Err(ServiceError::internal(
                "generation unavailable",
                "generation worker stopped before replying",
            ))
        })
    }

    fn admit(&self) -> Result<(), ServiceError> {
        let limit = self.depth_limit;
        self.pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |waiting| match limit {
                Some(max) if waiting >= max => None,
                _ => Some(waiting + 1),
            })
            .map(|_| ())
            .map_err(|waiting| {
                self.metrics.record_rejected();
                warn!(pending = waiting, "queue full, rejecting request");
                ServiceError::ServiceBusy { pending: waiting }
            })
    }

    /// Requests accepted but not yet picked up by the worker.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn depth_limit(&self) -> Option<usize> {
        self.depth_limit
    }

    pub fn engine_description(&self) -> &str {
        &self.engine_description
    }

    /// Stops accepting work, lets queued jobs drain, then joins the worker.
    pub fn shutdown(&self) {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        drop(sender);

        let worker = self
            .worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(worker) = worker {
            if worker.join().is_err() {
                error!("generation worker panicked");
            }
        }
    }
}

impl Drop for RequestSerializer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker<G: TokenGenerator>(
    mut pipeline: Pipeline<G>,
    rx_job: Receiver<Job>,
    pending: Arc<AtomicUsize>,
    metrics: Arc<ServiceMetrics>,
) {
    while let Ok(job) = rx_job.recv() {
        pending.fetch_sub(1, Ordering::SeqCst);

        if job.reply.is_closed() {
            debug!(mode = job.request.mode.as_str(), "caller left before generation started");
            continue;
        }

        let waited_ms = job.enqueued_at.elapsed().as_millis() as u64;
        let started = Instant::now();
        let result = pipeline.execute(&job.request);
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match &result {
            Ok(output) => {
                metrics.record_generation();
                info!(
                    mode = job.request.mode.as_str(),
                    waited_ms,
                    elapsed_ms,
                    truncated = output.truncated,
                    empty = output.extracted_code.is_empty(),
                    "request served"
                );
            }
            Err(e) => {
                metrics.record_engine_failure();
                error!(mode = job.request.mode.as_str(), waited_ms, elapsed_ms, error = %e, "generation failed");
            }
        }

        if job.reply.send(result).is_err() {
            debug!("caller went away, result discarded");
        }
    }

    pipeline.engine.shutdown();
    info!("generation worker stopped");
}
