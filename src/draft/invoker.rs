//! Draft invoker: one generation call with bounded retry and timeout.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{InvocationFailure, LlmError};
use crate::llm::provider::{CompletionRequest, LlmProvider};

use super::prompt::GenerationRequest;

/// Retry and timeout policy for the drafting call.
#[derive(Debug, Clone)]
pub struct InvokerConfig {
    /// Attempts including the first one.
    pub max_attempts: u32,
    /// Upper bound on a single attempt.
    pub attempt_timeout: Duration,
    /// Pause between attempts. A provider's retry-after hint wins when given.
    pub retry_delay: Duration,
    /// LLM temperature for drafting.
    pub temperature: f32,
    /// Max tokens for the LLM response.
    pub max_tokens: u32,
}

impl Default for InvokerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            attempt_timeout: Duration::from_secs(30),
            retry_delay: Duration::from_secs(2),
            temperature: 0.3,
            max_tokens: 1024,
        }
    }
}

impl InvokerConfig {
    /// Worst-case wall-clock time for one `invoke`, retries and delays included.
    pub fn total_budget(&self) -> Duration {
        self.attempt_timeout.saturating_mul(self.max_attempts.max(1))
    }
}

/// Raw model output, not yet validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftCandidate {
    pub raw_text: String,
    /// 1-based attempt that produced this text.
    pub attempt: u32,
}

/// Calls the drafting model for a sanitized request.
pub struct DraftInvoker {
    llm: Arc<dyn LlmProvider>,
    config: InvokerConfig,
}

impl DraftInvoker {
    pub fn new(llm: Arc<dyn LlmProvider>, config: InvokerConfig) -> Self {
        Self { llm, config }
    }

    pub fn config(&self) -> &InvokerConfig {
        &self.config
    }

    /// Produce a draft candidate or fail after the attempt budget is spent.
    ///
    /// Only transient provider errors are retried. A timed-out attempt is
    /// dropped, which cancels the in-flight call.
    pub async fn invoke(
        &self,
        request: &GenerationRequest,
    ) -> Result<DraftCandidate, InvocationFailure> {
        let defect = if self.config.attempt_timeout.is_zero() {
            Some("attempt timeout is zero")
        } else {
            request.structural_defect()
        };
        if let Some(reason) = defect {
            return Err(InvocationFailure {
                last_error: LlmError::InvalidRequest {
                    reason: reason.to_string(),
                },
                attempts_made: 0,
            });
        }

        let completion = CompletionRequest::new(request.to_messages())
            .with_temperature(self.config.temperature)
            .with_max_tokens(self.config.max_tokens);

        let max_attempts = self.config.max_attempts.max(1);
        let deadline = Instant::now() + self.config.total_budget();
        let mut attempt = 0;
        let mut last_error: Option<LlmError> = None;

        loop {
            let timeout = self
                .config
                .attempt_timeout
                .min(deadline.saturating_duration_since(Instant::now()));
            if timeout.is_zero()
                && let Some(error) = last_error.take()
            {
                warn!(attempt, error = %error, "Draft budget exhausted");
                return Err(InvocationFailure {
                    last_error: error,
                    attempts_made: attempt,
                });
            }
            attempt += 1;

            debug!(attempt, max_attempts, timeout_ms = timeout.as_millis() as u64, "Requesting draft");

            let result = match tokio::time::timeout(timeout, self.llm.complete(completion.clone()))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(LlmError::Timeout {
                    provider: self.llm.model_name().to_string(),
                    timeout,
                }),
            };

            let error = match result {
                Ok(response) => {
                    info!(
                        attempt,
                        input_tokens = response.input_tokens,
                        output_tokens = response.output_tokens,
                        "Draft generated"
                    );
                    return Ok(DraftCandidate {
                        raw_text: response.content,
                        attempt,
                    });
                }
                Err(e) => e,
            };

            let remaining = deadline.saturating_duration_since(Instant::now());
            if !error.is_transient() || attempt >= max_attempts || remaining.is_zero() {
                warn!(attempt, error = %error, "Draft generation failed");
                return Err(InvocationFailure {
                    last_error: error,
                    attempts_made: attempt,
                });
            }

            // Every attempt still to come keeps its full timeout; the pause
            // only gets what is left over.
            let reserve = self
                .config
                .attempt_timeout
                .saturating_mul(max_attempts - attempt);
            let delay = match &error {
                LlmError::RateLimited {
                    retry_after: Some(hint),
                    ..
                } => *hint,
                _ => self.config.retry_delay,
            }
            .min(remaining.saturating_sub(reserve));

            warn!(
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Retrying draft after transient failure"
            );
            tokio::time::sleep(delay).await;
            last_error = Some(error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::draft::context::ThreadRole;
    use crate::llm::provider::{CompletionResponse, FinishReason};

    /// Plays back a scripted list of outcomes, then succeeds.
    struct ScriptedLlm {
        script: Mutex<Vec<Outcome>>,
        calls: AtomicU32,
    }

    enum Outcome {
        Fail(LlmError),
        Hang,
    }

    impl ScriptedLlm {
        fn new(script: Vec<Outcome>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script),
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait::async_trait]
    impl LlmProvider for ScriptedLlm {
        fn model_name(&self) -> &str {
            "scripted"
        }

        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let next = {
                let mut script = self.script.lock().unwrap();
                (!script.is_empty()).then(|| script.remove(0))
            };
            match next {
                Some(Outcome::Fail(e)) => Err(e),
                Some(Outcome::Hang) => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    unreachable!()
                }
                None => Ok(CompletionResponse {
                    content: format!("draft from call {}", n + 1),
                    input_tokens: 10,
                    output_tokens: 5,
                    finish_reason: FinishReason::Stop,
                    response_id: None,
                }),
            }
        }
    }

    fn request() -> GenerationRequest {
        GenerationRequest {
            system_instructions: "Draft a reply.".into(),
            thread_context: String::new(),
            masked_body: "Can you send the report?".into(),
            role: ThreadRole::Reply,
            redaction_notice: None,
        }
    }

    fn fast_config() -> InvokerConfig {
        InvokerConfig {
            attempt_timeout: Duration::from_millis(100),
            retry_delay: Duration::ZERO,
            ..InvokerConfig::default()
        }
    }

    fn server_error() -> LlmError {
        LlmError::ServerError {
            provider: "scripted".into(),
            status: 503,
        }
    }

    // ── Success paths ───────────────────────────────────────────────

    #[tokio::test]
    async fn first_attempt_success() {
        let llm = ScriptedLlm::new(vec![]);
        let invoker = DraftInvoker::new(llm.clone(), fast_config());
        let candidate = invoker.invoke(&request()).await.unwrap();
        assert_eq!(candidate.attempt, 1);
        assert_eq!(candidate.raw_text, "draft from call 1");
        assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transient_errors_are_retried() {
        let llm = ScriptedLlm::new(vec![Outcome::Fail(server_error()), Outcome::Hang]);
        let invoker = DraftInvoker::new(llm.clone(), fast_config());
        let candidate = invoker.invoke(&request()).await.unwrap();
        assert_eq!(candidate.attempt, 3);
        assert_eq!(llm.calls.load(Ordering::SeqCst), 3);
    }

    // ── Failure paths ───────────────────────────────────────────────

    #[tokio::test]
    async fn always_timing_out_makes_exactly_three_attempts() {
        let llm = ScriptedLlm::new(vec![Outcome::Hang, Outcome::Hang, Outcome::Hang]);
        let invoker = DraftInvoker::new(llm.clone(), fast_config());
        let started = std::time::Instant::now();
        let failure = invoker.invoke(&request()).await.unwrap_err();

        assert_eq!(failure.attempts_made, 3);
        assert!(matches!(failure.last_error, LlmError::Timeout { .. }));
        assert_eq!(llm.calls.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn permanent_error_is_not_retried() {
        let llm = ScriptedLlm::new(vec![Outcome::Fail(LlmError::AuthFailed {
            provider: "scripted".into(),
        })]);
        let invoker = DraftInvoker::new(llm.clone(), fast_config());
        let failure = invoker.invoke(&request()).await.unwrap_err();
        assert_eq!(failure.attempts_made, 1);
        assert!(matches!(failure.last_error, LlmError::AuthFailed { .. }));
        assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhaustion_keeps_last_error() {
        let llm = ScriptedLlm::new(vec![
            Outcome::Hang,
            Outcome::Fail(server_error()),
            Outcome::Fail(LlmError::RateLimited {
                provider: "scripted".into(),
                retry_after: None,
            }),
        ]);
        let invoker = DraftInvoker::new(llm, fast_config());
        let failure = invoker.invoke(&request()).await.unwrap_err();
        assert_eq!(failure.attempts_made, 3);
        assert!(matches!(failure.last_error, LlmError::RateLimited { .. }));
    }

    #[tokio::test]
    async fn invalid_request_fails_without_calling() {
        let llm = ScriptedLlm::new(vec![]);
        let invoker = DraftInvoker::new(llm.clone(), fast_config());
        let mut req = request();
        req.system_instructions = "   ".into();
        let failure = invoker.invoke(&req).await.unwrap_err();
        assert_eq!(failure.attempts_made, 0);
        assert!(matches!(failure.last_error, LlmError::InvalidRequest { .. }));
        assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
    }

    // ── Budget ──────────────────────────────────────────────────────

    #[test]
    fn default_budget_is_three_timeouts() {
        let config = InvokerConfig::default();
        assert_eq!(config.total_budget(), Duration::from_secs(90));
    }

    #[tokio::test]
    async fn retry_delay_is_clipped_to_budget() {
        let llm = ScriptedLlm::new(vec![Outcome::Hang, Outcome::Hang, Outcome::Hang]);
        let config = InvokerConfig {
            attempt_timeout: Duration::from_millis(50),
            retry_delay: Duration::from_secs(600),
            ..InvokerConfig::default()
        };
        let invoker = DraftInvoker::new(llm.clone(), config);
        let started = std::time::Instant::now();
        let failure = invoker.invoke(&request()).await.unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(matches!(failure.last_error, LlmError::Timeout { .. }));
        assert_eq!(failure.attempts_made, 3);
        assert_eq!(llm.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn delay_longer_than_timeout_keeps_every_attempt_whole() {
        let llm = ScriptedLlm::new(vec![Outcome::Hang, Outcome::Hang, Outcome::Hang]);
        let config = InvokerConfig {
            attempt_timeout: Duration::from_millis(100),
            retry_delay: Duration::from_millis(150),
            ..InvokerConfig::default()
        };
        let invoker = DraftInvoker::new(llm.clone(), config);
        let failure = invoker.invoke(&request()).await.unwrap_err();

        assert_eq!(failure.attempts_made, 3);
        assert_eq!(llm.calls.load(Ordering::SeqCst), 3);
        // The last attempt still gets most of its own timeout.
        let LlmError::Timeout { timeout, .. } = failure.last_error else {
            panic!("expected timeout, got {:?}", failure.last_error);
        };
        assert!(timeout >= Duration::from_millis(80), "last attempt cut to {timeout:?}");
    }

    #[tokio::test]
    async fn zero_timeout_fails_without_calling() {
        let llm = ScriptedLlm::new(vec![]);
        let config = InvokerConfig {
            attempt_timeout: Duration::ZERO,
            ..fast_config()
        };
        let failure = DraftInvoker::new(llm.clone(), config)
            .invoke(&request())
            .await
            .unwrap_err();
        assert_eq!(failure.attempts_made, 0);
        assert!(matches!(failure.last_error, LlmError::InvalidRequest { .. }));
        assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
    }
}
