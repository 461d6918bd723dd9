//! Tool-orchestration loop.
//!
//! One run drives a bounded conversation between a model provider and the
//! tool registry:
//!
//! ```text
//! Start ─▶ Step(n) ─┬─ tool calls ─▶ plan waves ─▶ execute ─▶ Step(n+1)
//!                   └─ no calls ──▶ Done
//! ```
//!
//! The run ends at `Done`, when `max_steps` is used up (returning the last
//! text produced), or on a provider error. A primary provider error switches
//! the whole run to the fallback provider, restarting from the prepared
//! history; a fallback error is returned to the caller.
//!
//! # Waves
//!
//! Tool calls from one assistant turn are split into waves by their
//! [`ResourceClaim`]s. A call joins the wave right after the latest wave
//! holding a conflicting claim, so a read of a file always observes an
//! earlier write of it. Waves run in order; calls inside a wave run
//! concurrently. Every call gets exactly one tool-role message, errors
//! included.

use anyhow::bail;
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, info_span, instrument, warn, Instrument};

use crate::config::{Config, OrchestratorConfig};
use crate::conversation::{Message, Role, ToolCall, ToolResult};
use crate::observer::{ChunkSink, RunObserver, TracingObserver};
use crate::providers::{
    create_provider, CompletionRequest, ModelProvider, ProviderError, ProviderResult, ToolSpec,
};
use crate::traits::{DispatchError, ResourceClaim, ToolContext, ToolRegistry};

/// Input of one run.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub messages: Vec<Message>,
    /// Overrides the configured step budget.
    pub max_steps: Option<usize>,
    /// Overrides the configured per-step output token budget.
    pub max_output_tokens: Option<u32>,
}

impl RunRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    /// A single user message.
    pub fn prompt(text: impl Into<String>) -> Self {
        Self::new(vec![Message::user(text)])
    }

    pub fn with_max_steps(mut self, steps: usize) -> Self {
        self.max_steps = Some(steps);
        self
    }
}

/// Result of a finished run.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub text: String,
    pub provider: String,
    pub model: String,
    pub used_fallback: bool,
    pub steps: usize,
    pub history: Vec<Message>,
}

pub struct Orchestrator {
    primary: Arc<dyn ModelProvider>,
    fallback: Option<Arc<dyn ModelProvider>>,
    tools: Arc<ToolRegistry>,
    ctx: ToolContext,
    settings: OrchestratorConfig,
    observer: Arc<dyn RunObserver>,
}

struct Drive {
    text: String,
    steps: usize,
    history: Vec<Message>,
}

impl Orchestrator {
    pub fn new(primary: Arc<dyn ModelProvider>, tools: Arc<ToolRegistry>, ctx: ToolContext) -> Self {
        Self {
            primary,
            fallback: None,
            tools,
            ctx,
            settings: OrchestratorConfig::default(),
            observer: Arc::new(TracingObserver),
        }
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn ModelProvider>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn with_settings(mut self, settings: OrchestratorConfig) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Providers and budgets from `config`. Fails when no primary provider
    /// is configured.
    pub fn from_config(
        config: &Config,
        tools: Arc<ToolRegistry>,
        ctx: ToolContext,
    ) -> anyhow::Result<Self> {
        let Some(primary_cfg) = &config.providers.primary else {
            bail!("no primary provider configured; add a [providers.primary] section");
        };
        let mut orch = Self::new(create_provider(primary_cfg)?, tools, ctx)
            .with_settings(config.orchestrator.clone());
        if let Some(fallback_cfg) = &config.providers.fallback {
            orch = orch.with_fallback(create_provider(fallback_cfg)?);
        }
        Ok(orch)
    }

    pub async fn run(&self, request: RunRequest) -> ProviderResult<RunOutcome> {
        self.run_inner(request, None).await
    }

    /// Like [`run`](Orchestrator::run), feeding assistant text to `sink` as
    /// it is generated. The sink is reset before the primary attempt and
    /// again before a fallback attempt, so it only ever holds text from the
    /// attempt that is still running.
    pub async fn run_streaming(
        &self,
        request: RunRequest,
        sink: &dyn ChunkSink,
    ) -> ProviderResult<RunOutcome> {
        self.run_inner(request, Some(sink)).await
    }

    async fn run_inner(
        &self,
        request: RunRequest,
        sink: Option<&dyn ChunkSink>,
    ) -> ProviderResult<RunOutcome> {
        let max_steps = request.max_steps.unwrap_or(self.settings.max_steps).max(1);
        let max_tokens = request
            .max_output_tokens
            .unwrap_or(self.settings.max_output_tokens)
            .max(1);
        let history = self.prepare(request.messages);

        let primary = self.primary.as_ref();
        reset(sink).await?;
        let err = match self
            .drive(primary, history.clone(), max_steps, max_tokens, sink)
            .await
        {
            Ok(done) => return Ok(outcome(primary, false, done)),
            Err(e) => e,
        };

        let fallback = match &self.fallback {
            Some(f) if err.allows_fallback() => f.as_ref(),
            _ => return Err(err),
        };
        warn!(
            primary = primary.name(),
            fallback = fallback.name(),
            error = %err,
            "primary provider failed, switching to fallback"
        );
        reset(sink).await?;
        let done = self
            .drive(fallback, history, max_steps, max_tokens, sink)
            .await?;
        Ok(outcome(fallback, true, done))
    }

    /// Prepend the configured system prompt unless the caller sent one.
    fn prepare(&self, mut messages: Vec<Message>) -> Vec<Message> {
        let has_system = messages.iter().any(|m| m.role == Role::System);
        if !has_system && !self.settings.system_prompt.trim().is_empty() {
            messages.insert(0, Message::system(self.settings.system_prompt.clone()));
        }
        messages
    }

    #[instrument(skip_all, fields(provider = provider.name(), model = provider.model()))]
    async fn drive(
        &self,
        provider: &dyn ModelProvider,
        mut history: Vec<Message>,
        max_steps: usize,
        max_output_tokens: u32,
        sink: Option<&dyn ChunkSink>,
    ) -> ProviderResult<Drive> {
        let specs = ToolSpec::from_registry(&self.tools);
        let mut text = String::new();
        let mut steps = 0;

        for step in 1..=max_steps {
            steps = step;
            let span = info_span!("step", step);
            self.observer.on_step_start(step, provider.name());

            let request = CompletionRequest {
                messages: history.clone(),
                tools: specs.clone(),
                max_output_tokens,
            };
            let turn = match sink {
                Some(sink) => {
                    provider
                        .complete_streaming(&request, sink)
                        .instrument(span.clone())
                        .await?
                }
                None => provider.complete(&request).instrument(span.clone()).await?,
            };

            if !turn.text.is_empty() {
                text = turn.text.clone();
                self.observer.on_text(step, &turn.text);
            }
            history.push(Message::assistant(turn.text, turn.tool_calls.clone()));

            if turn.tool_calls.is_empty() {
                self.observer
                    .on_step_finish(step, turn.finish_reason.as_deref());
                return Ok(Drive { text, steps, history });
            }

            for call in &turn.tool_calls {
                self.observer.on_tool_call(step, call);
            }
            let results = self
                .execute_calls(step, &turn.tool_calls)
                .instrument(span)
                .await;
            for result in &results {
                self.observer.on_tool_result(step, result);
                history.push(Message::tool(result));
            }
            self.observer
                .on_step_finish(step, turn.finish_reason.as_deref());
        }

        info!(max_steps, "step budget exhausted");
        Ok(Drive { text, steps, history })
    }

    /// Execute one turn's calls wave by wave. Results come back in wave
    /// order, call order within a wave.
    async fn execute_calls(&self, step: usize, calls: &[ToolCall]) -> Vec<ToolResult> {
        let claims: Vec<Option<ResourceClaim>> = calls
            .iter()
            .map(|call| {
                let args = call.arguments().ok()?;
                self.tools.claim_for(call.name(), &args)
            })
            .collect();
        let waves = plan_waves(&claims);
        debug!(step, calls = calls.len(), waves = waves.len(), "planned tool waves");

        let mut results = Vec::with_capacity(calls.len());
        for (wave, members) in waves.iter().enumerate() {
            let outs = join_all(members.iter().map(|&i| self.execute_one(&calls[i])))
                .instrument(info_span!("wave", wave))
                .await;
            results.extend(outs);
        }
        results
    }

    async fn execute_one(&self, call: &ToolCall) -> ToolResult {
        let args = match call.arguments() {
            Ok(args) => args,
            Err(e) => {
                return ToolResult::error(
                    call,
                    format!("Error executing tool '{}': {:#}", call.name(), e),
                )
            }
        };
        match self.tools.dispatch(call.name(), args, &self.ctx).await {
            Ok(out) => ToolResult::ok(call, out),
            Err(e @ DispatchError::UnknownTool { .. }) => {
                warn!(tool = call.name(), call_id = call.id(), "unknown tool");
                ToolResult::error(call, format!("Error: {}", e))
            }
            Err(e) => {
                warn!(tool = call.name(), call_id = call.id(), error = %e, "tool failed");
                ToolResult::error(call, format!("Error executing tool '{}': {}", call.name(), e))
            }
        }
    }
}

async fn reset(sink: Option<&dyn ChunkSink>) -> ProviderResult<()> {
    match sink {
        Some(sink) => sink
            .on_reset()
            .await
            .map_err(|e| ProviderError::Cancelled(format!("{:#}", e))),
        None => Ok(()),
    }
}

fn outcome(provider: &dyn ModelProvider, used_fallback: bool, done: Drive) -> RunOutcome {
    RunOutcome {
        text: done.text,
        provider: provider.name().to_string(),
        model: provider.model().to_string(),
        used_fallback,
        steps: done.steps,
        history: done.history,
    }
}

/// Partition calls into ordered waves of call indices.
///
/// A call with a claim goes one wave past the latest earlier call whose
/// claim conflicts with it. Unclaimed calls go to the first wave.
pub fn plan_waves(claims: &[Option<ResourceClaim>]) -> Vec<Vec<usize>> {
    let mut waves: Vec<Vec<usize>> = Vec::new();
    let mut assigned: Vec<usize> = Vec::with_capacity(claims.len());

    for (i, claim) in claims.iter().enumerate() {
        let wave = match claim {
            None => 0,
            Some(claim) => (0..i)
                .filter(|&j| claims[j].as_ref().is_some_and(|c| c.conflicts_with(claim)))
                .map(|j| assigned[j] + 1)
                .max()
                .unwrap_or(0),
        };
        assigned.push(wave);
        if waves.len() <= wave {
            waves.resize_with(wave + 1, Vec::new);
        }
        waves[wave].push(i);
    }
    waves
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_waves_order_write_then_read() {
        let claims = vec![
            Some(ResourceClaim::write("src/a.ts")),
            Some(ResourceClaim::read("src/b.ts")),
            Some(ResourceClaim::read("src/a.ts")),
            None,
        ];
        assert_eq!(plan_waves(&claims), vec![vec![0, 1, 3], vec![2]]);
    }

    #[test]
    fn test_reads_share_a_wave() {
        let claims = vec![
            Some(ResourceClaim::read("src/a.ts")),
            Some(ResourceClaim::read("src/a.ts")),
            Some(ResourceClaim::project()),
        ];
        assert_eq!(plan_waves(&claims), vec![vec![0, 1, 2]]);
    }

    #[test]
    fn test_directory_delete_orders_nested_write() {
        let claims = vec![
            Some(ResourceClaim::write("src/old")),
            Some(ResourceClaim::write("src/old/x.ts")),
            Some(ResourceClaim::project()),
            Some(ResourceClaim::read("docs/readme.md")),
        ];
        // the project-wide read must wait for both writes
        assert_eq!(plan_waves(&claims), vec![vec![0, 3], vec![1], vec![2]]);
    }

    #[test]
    fn test_empty_plan() {
        assert!(plan_waves(&[]).is_empty());
    }
}
