//! Concurrent fan-out of RPC calls.

use std::future::Future;

use futures::future::join_all;
use tracing::{error, info};

/// Result of one call in a batch.
#[derive(Debug)]
pub struct CallOutcome<T, E> {
    /// Position of the call in the batch
    pub index: usize,
    pub result: Result<T, E>,
}

/// Outcomes of every call in a batch, in submission order.
#[derive(Debug)]
pub struct BatchReport<T, E> {
    pub outcomes: Vec<CallOutcome<T, E>>,
}

impl<T, E> BatchReport<T, E> {
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.len() - self.succeeded()
    }

    pub fn successes(&self) -> impl Iterator<Item = &T> {
        self.outcomes.iter().filter_map(|o| o.result.as_ref().ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = (usize, &E)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (o.index, e)))
    }
}

/// Run one task per input concurrently and wait for all of them.
///
/// Each call is spawned onto the runtime, so calls proceed in parallel. A
/// failing or panicking call is reported in its own slot and never aborts the
/// rest of the batch.
pub async fn run_batch<I, F, Fut, T, E>(inputs: I, call: F) -> BatchReport<T, String>
where
    I: IntoIterator,
    F: Fn(usize, I::Item) -> Fut,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let handles: Vec<_> = inputs
        .into_iter()
        .enumerate()
        .map(|(index, input)| tokio::spawn(call(index, input)))
        .collect();

    info!(calls = handles.len(), "batch_started");

    let outcomes: Vec<CallOutcome<T, String>> = join_all(handles)
        .await
        .into_iter()
        .enumerate()
        .map(|(index, joined)| {
            let result = match joined {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(e.to_string()),
                Err(join_err) => Err(format!("call task failed: {}", join_err)),
            };
            if let Err(reason) = &result {
                error!(index = index, error = %reason, "batch_call_failed");
            }
            CallOutcome { index, result }
        })
        .collect();

    let report = BatchReport { outcomes };
    info!(
        calls = report.len(),
        succeeded = report.succeeded(),
        failed = report.failed(),
        "batch_complete"
    );
    report
}
