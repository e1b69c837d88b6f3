//! Bounded Tool Executor - Runs model-requested tools on a fixed worker pool.
//!
//! Calls are validated up front, queued, and awaited with a deadline. A timed
//! out call is reported as such but keeps running on its worker until the
//! tool returns; the result is then discarded. Every outcome, success or
//! failure, is returned as a [`ToolCallResult`] rather than raised.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chatrelay_traits::{Message, Tool, ToolCall, ToolContext, ToolError, ToolRegistry, ToolSchema};
use futures::FutureExt;
use parking_lot::Mutex as SyncMutex;
use serde_json::{Value, json};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Executor configuration.
#[derive(Clone, Debug)]
pub struct ToolExecutorConfig {
    /// Number of workers.
    pub pool_size: usize,
    /// Deadline for one call, measured from submission.
    pub timeout: Duration,
}

impl Default for ToolExecutorConfig {
    fn default() -> Self {
        Self {
            pool_size: num_cpus::get(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Outcome of one tool call, tagged with the call it answers.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallResult {
    pub call_id: String,
    pub identity_key: String,
    pub tool_name: String,
    pub outcome: Result<Value, ToolError>,
}

impl ToolCallResult {
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }

    /// JSON payload handed back to the model.
    pub fn payload(&self) -> Value {
        match &self.outcome {
            Ok(value) => value.clone(),
            Err(err) => json!({ "error": err.to_string(), "kind": err.kind() }),
        }
    }

    /// Tool-role message answering the originating call.
    pub fn into_message(self) -> Message {
        let content = match self.payload() {
            Value::String(text) => text,
            other => other.to_string(),
        };
        Message::tool(content, self.call_id)
    }
}

struct ToolJob {
    tool: Arc<dyn Tool>,
    arguments: Value,
    ctx: ToolContext,
    reply: oneshot::Sender<Result<Value, ToolError>>,
}

/// Fixed-size pool executing registered tools.
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    queue: mpsc::UnboundedSender<ToolJob>,
    config: ToolExecutorConfig,
    shutdown: CancellationToken,
    workers: SyncMutex<Vec<JoinHandle<()>>>,
}

impl ToolExecutor {
    /// Spawn the worker pool. Must be called inside a Tokio runtime.
    pub fn start(registry: Arc<ToolRegistry>, config: ToolExecutorConfig) -> Arc<Self> {
        let (queue, rx) = mpsc::unbounded_channel();
        let rx = Arc::new(Mutex::new(rx));
        let shutdown = CancellationToken::new();
        let pool_size = config.pool_size.max(1);

        info!(count = pool_size, tools = registry.len(), "Starting tool executor");
        let workers = (0..pool_size)
            .map(|worker_id| {
                let rx = rx.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(Self::worker_loop(worker_id, rx, shutdown))
            })
            .collect();

        Arc::new(Self {
            registry,
            queue,
            config,
            shutdown,
            workers: SyncMutex::new(workers),
        })
    }

    pub fn config(&self) -> &ToolExecutorConfig {
        &self.config
    }

    /// Schemas of every registered tool, for the model request.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.registry.schemas()
    }

    /// Run one tool call and wait for it up to the configured deadline.
    pub async fn execute(
        &self,
        tool_name: &str,
        arguments: Value,
        call_id: &str,
        identity_key: &str,
    ) -> ToolCallResult {
        let outcome = self
            .run(tool_name, arguments, call_id, identity_key)
            .await;

        if let Err(err) = &outcome {
            warn!(
                tool = %tool_name,
                call_id = %call_id,
                identity_key = %identity_key,
                kind = err.kind(),
                error = %err,
                "Tool call failed"
            );
        }

        ToolCallResult {
            call_id: call_id.to_string(),
            identity_key: identity_key.to_string(),
            tool_name: tool_name.to_string(),
            outcome,
        }
    }

    /// Convenience wrapper for a call requested by the model.
    pub async fn execute_call(&self, call: &ToolCall, identity_key: &str) -> ToolCallResult {
        self.execute(&call.name, call.arguments.clone(), &call.id, identity_key)
            .await
    }

    /// Stop the workers. Queued calls that have not started are dropped and
    /// their callers see a runtime error.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        for worker in self.workers.lock().drain(..) {
            worker.abort();
        }
    }

    async fn run(
        &self,
        tool_name: &str,
        arguments: Value,
        call_id: &str,
        identity_key: &str,
    ) -> Result<Value, ToolError> {
        let tool = self
            .registry
            .get(tool_name)
            .ok_or_else(|| ToolError::NotRegistered(tool_name.to_string()))?;

        if let Some(missing) = first_missing_parameter(tool.as_ref(), &arguments) {
            return Err(ToolError::MissingParameter(missing));
        }

        let (reply, response) = oneshot::channel();
        let job = ToolJob {
            tool,
            arguments,
            ctx: ToolContext::new(identity_key, call_id),
            reply,
        };
        self.queue
            .send(job)
            .map_err(|_| ToolError::Runtime("tool executor is shut down".to_string()))?;

        match tokio::time::timeout(self.config.timeout, response).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(ToolError::Runtime(
                "tool worker stopped before replying".to_string(),
            )),
            Err(_) => Err(ToolError::TimedOut(self.config.timeout)),
        }
    }

    async fn worker_loop(
        worker_id: usize,
        rx: Arc<Mutex<mpsc::UnboundedReceiver<ToolJob>>>,
        shutdown: CancellationToken,
    ) {
        debug!(worker_id, "Tool worker started");
        loop {
            let job = tokio::select! {
                _ = shutdown.cancelled() => break,
                job = async { rx.lock().await.recv().await } => job,
            };
            let Some(job) = job else {
                break;
            };
            Self::process_one(worker_id, job).await;
        }
        debug!(worker_id, "Tool worker stopped");
    }

    async fn process_one(worker_id: usize, job: ToolJob) {
        // The caller already gave up on this call.
        if job.reply.is_closed() {
            debug!(worker_id, call_id = %job.ctx.call_id, "Skipping abandoned tool call");
            return;
        }

        let started = Instant::now();
        let tool_name = job.tool.name().to_string();
        let run = job.tool.execute(job.arguments, &job.ctx);
        let outcome = match std::panic::AssertUnwindSafe(run).catch_unwind().await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(ToolError::Runtime(format!("{e:#}"))),
            Err(panic) => Err(ToolError::Runtime(panic_message(panic.as_ref()))),
        };

        debug!(
            worker_id,
            tool = %tool_name,
            call_id = %job.ctx.call_id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            ok = outcome.is_ok(),
            "Tool call finished"
        );

        if job.reply.send(outcome).is_err() {
            debug!(worker_id, call_id = %job.ctx.call_id, "Tool result discarded after timeout");
        }
    }
}

impl Drop for ToolExecutor {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn first_missing_parameter(tool: &dyn Tool, arguments: &Value) -> Option<String> {
    tool.required_parameters()
        .into_iter()
        .find(|name| arguments.get(name).is_none_or(Value::is_null))
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        format!("tool panicked: {msg}")
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        format!("tool panicked: {msg}")
    } else {
        "tool panicked".to_string()
    }
}
