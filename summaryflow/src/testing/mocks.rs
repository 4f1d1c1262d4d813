//! Deterministic text generators for tests and benchmarks.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::errors::{GenerationError, GenerationErrorKind};
use crate::generation::{GenerationRequest, TextGenerator};

/// Returns the prompt, optionally uppercased, and records every request.
#[derive(Debug, Default)]
pub struct EchoGenerator {
    uppercase: bool,
    delay: Option<Duration>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl EchoGenerator {
    /// Creates a generator that echoes prompts unchanged.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a generator that echoes prompts in upper case.
    #[must_use]
    pub fn uppercase() -> Self {
        Self {
            uppercase: true,
            ..Self::default()
        }
    }

    /// Sleeps before every response.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Returns the number of calls made.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Returns every prompt received, in order.
    #[must_use]
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

#[async_trait]
impl TextGenerator for EchoGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().push(request.prompt.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(if self.uppercase {
            request.prompt.to_uppercase()
        } else {
            request.prompt.clone()
        })
    }
}

/// Replays a fixed script of responses.
///
/// Once the script runs out the last entry repeats. An empty script fails
/// every call with an unknown error.
#[derive(Debug, Default)]
pub struct ScriptedGenerator {
    script: Mutex<VecDeque<Result<String, GenerationError>>>,
    last: Mutex<Option<Result<String, GenerationError>>>,
    calls: AtomicUsize,
}

impl ScriptedGenerator {
    /// Creates a generator that replays successful responses.
    #[must_use]
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_results(responses.into_iter().map(|r| Ok(r.into())))
    }

    /// Creates a generator that replays responses and errors.
    #[must_use]
    pub fn from_results(results: impl IntoIterator<Item = Result<String, GenerationError>>) -> Self {
        Self {
            script: Mutex::new(results.into_iter().collect()),
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    /// Returns the number of calls made.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, _request: &GenerationRequest) -> Result<String, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().pop_front();
        let mut last = self.last.lock();
        if let Some(next) = next {
            *last = Some(next);
        }
        last.clone()
            .unwrap_or_else(|| Err(GenerationError::unknown("script is empty")))
    }
}

/// Fails every call with the same error kind.
#[derive(Debug)]
pub struct FailingGenerator {
    kind: GenerationErrorKind,
    calls: AtomicUsize,
}

impl FailingGenerator {
    /// Creates a generator that always fails with `kind`.
    #[must_use]
    pub fn new(kind: GenerationErrorKind) -> Self {
        Self {
            kind,
            calls: AtomicUsize::new(0),
        }
    }

    /// Returns the number of calls made.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextGenerator for FailingGenerator {
    async fn generate(&self, _request: &GenerationRequest) -> Result<String, GenerationError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Err(GenerationError::new(self.kind, format!("scripted failure #{n}")))
    }
}

/// A refine step that appends a numbered marker to whatever it is given.
///
/// Responds with a refinement record whose text is the prompt plus
/// ` [refined N]`, asking for another pass until `converge_after` calls.
#[derive(Debug, Default)]
pub struct MarkerRefiner {
    converge_after: Option<usize>,
    calls: AtomicUsize,
}

impl MarkerRefiner {
    /// Creates a refiner that always asks for another pass.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports convergence on the `n`th call.
    #[must_use]
    pub fn converging_after(n: usize) -> Self {
        Self {
            converge_after: Some(n),
            calls: AtomicUsize::new(0),
        }
    }

    /// Returns the number of calls made.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// The marker appended on the `n`th call.
    #[must_use]
    pub fn marker(n: usize) -> String {
        format!("[refined {n}]")
    }
}

#[async_trait]
impl TextGenerator for MarkerRefiner {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let needs_refinement = self.converge_after.map_or(true, |limit| n < limit);
        let record = serde_json::json!({
            "refined_summary": format!("{} {}", request.prompt, Self::marker(n)),
            "needs_refinement": needs_refinement,
        });
        Ok(record.to_string())
    }
}

/// Delegates every call to a closure.
pub struct FnGenerator<F>
where
    F: Fn(&GenerationRequest) -> Result<String, GenerationError> + Send + Sync,
{
    func: F,
    calls: AtomicUsize,
}

impl<F> FnGenerator<F>
where
    F: Fn(&GenerationRequest) -> Result<String, GenerationError> + Send + Sync,
{
    /// Wraps a closure.
    pub fn new(func: F) -> Self {
        Self {
            func,
            calls: AtomicUsize::new(0),
        }
    }

    /// Returns the number of calls made.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl<F> std::fmt::Debug for FnGenerator<F>
where
    F: Fn(&GenerationRequest) -> Result<String, GenerationError> + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnGenerator")
            .field("calls", &self.call_count())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<F> TextGenerator for FnGenerator<F>
where
    F: Fn(&GenerationRequest) -> Result<String, GenerationError> + Send + Sync,
{
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.func)(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RefinementRecord;

    #[tokio::test]
    async fn test_echo_records_prompts() {
        let generator = EchoGenerator::uppercase();
        let out = generator.generate(&GenerationRequest::new("abc")).await.unwrap();
        assert_eq!(out, "ABC");
        assert_eq!(generator.prompts(), vec!["abc".to_string()]);
    }

    #[tokio::test]
    async fn test_scripted_repeats_last() {
        let generator = ScriptedGenerator::new(["one", "two"]);
        let request = GenerationRequest::new("x");
        assert_eq!(generator.generate(&request).await.unwrap(), "one");
        assert_eq!(generator.generate(&request).await.unwrap(), "two");
        assert_eq!(generator.generate(&request).await.unwrap(), "two");
        assert_eq!(generator.call_count(), 3);
    }

    #[tokio::test]
    async fn test_marker_refiner_record() {
        let generator = MarkerRefiner::converging_after(2);
        let request = GenerationRequest::new("draft");

        let first = RefinementRecord::parse(&generator.generate(&request).await.unwrap()).unwrap();
        assert_eq!(first.refined_summary.as_deref(), Some("draft [refined 1]"));
        assert!(first.should_continue());

        let second = RefinementRecord::parse(&generator.generate(&request).await.unwrap()).unwrap();
        assert!(!second.should_continue());
    }
}
