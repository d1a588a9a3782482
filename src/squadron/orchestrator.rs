//! Agent orchestration: the top-level request path.
//!
//! One [`execute`](Orchestrator::execute) call resolves the agent, rebuilds
//! its system prompt, loads and trims rolling history, then drives a bounded
//! multi-turn tool loop through the fallback executor:
//!
//! ```text
//! START -> RESOLVE_AGENT -> BUILD_CONTEXT -> DISPATCH --> RESPONSE
//!                                            |  |          |
//!                                            |  |          +- tool_calls? -> EXECUTE_TOOLS -> DISPATCH
//!                                            |  |          +- no tool_calls -> FINAL
//!                                            |  +-- ChainExhausted -> ERROR
//!                                            +-- Cancelled -> ERROR
//! FINAL -> PERSIST -> DONE
//! ```
//!
//! The loop is capped at ten turns; tool results are appended in the order
//! the LLM emitted the calls; only the user task and the final assistant
//! message are persisted (tool messages are not).  Cancellation mid-flight
//! discards partial work and skips the conversation append entirely.

use log::debug;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::squadron::agent::AgentLoader;
use crate::squadron::client_wrapper::{ChatRequest, Message, Role};
use crate::squadron::conversation::ConversationStore;
use crate::squadron::error::SquadronError;
use crate::squadron::event::{EventHandler, SquadronEvent};
use crate::squadron::fallback::FallbackExecutor;
use crate::squadron::prompt::{render_system_prompt, PromptOptions};
use crate::squadron::tool_protocol::{
    ToolCallRecord, ToolError, ToolRegistry, ToolRunSession, DEFAULT_MAX_CALLS_PER_RUN,
};

/// Safety posture for one orchestrator call.  `Yolo` bypasses the quality
/// validator; the path sandbox and every rate limit remain enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Normal,
    Yolo,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Normal => "normal",
            Mode::Yolo => "yolo",
        }
    }
}

impl FromStr for Mode {
    type Err = SquadronError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(Mode::Normal),
            "yolo" => Ok(Mode::Yolo),
            other => Err(SquadronError::Config(format!("unknown mode '{}'", other))),
        }
    }
}

/// Tunable bounds for a single orchestrator call.
#[derive(Debug, Clone)]
pub struct OrchestratorLimits {
    /// Hard cap on LLM turns per call.
    pub max_turns: u32,
    /// Character budget (a ~4-chars-per-token proxy) for the assembled
    /// context; history is trimmed from the front to fit.
    pub context_char_budget: usize,
    /// Overall default deadline when the caller does not supply one.
    pub overall_timeout: Duration,
    /// Cap on tool calls per run.
    pub max_tool_calls: usize,
}

impl Default for OrchestratorLimits {
    fn default() -> Self {
        Self {
            max_turns: 10,
            context_char_budget: 200_000,
            overall_timeout: Duration::from_secs(120),
            max_tool_calls: DEFAULT_MAX_CALLS_PER_RUN,
        }
    }
}

/// Outcome of a successful orchestrator call.
#[derive(Debug)]
pub struct OrchestratorResult {
    /// Final assistant message.
    pub content: String,
    /// Provider that produced the final response.
    pub provider: String,
    /// Model echoed by that provider.
    pub model: String,
    /// Wall-clock duration of the whole call.
    pub latency_ms: u64,
    /// Token usage aggregated across every turn.
    pub tokens_input: usize,
    pub tokens_output: usize,
    /// True when any turn was served by a non-primary chain link.
    pub fallback_used: bool,
    /// Every tool call executed (or refused), in order.
    pub tool_calls: Vec<ToolCallRecord>,
    /// LLM turns consumed.
    pub turns: u32,
    /// True when the turn cap or the tool cap ended the loop early.
    pub loop_truncated: bool,
    /// The mode flag, passed through.
    pub mode: Mode,
}

pub struct Orchestrator {
    loader: Arc<AgentLoader>,
    conversations: Arc<ConversationStore>,
    executor: Arc<FallbackExecutor>,
    registry: Arc<ToolRegistry>,
    prompt_options: PromptOptions,
    limits: OrchestratorLimits,
    events: Option<Arc<dyn EventHandler>>,
}

impl Orchestrator {
    pub fn new(
        loader: Arc<AgentLoader>,
        conversations: Arc<ConversationStore>,
        executor: Arc<FallbackExecutor>,
        registry: Arc<ToolRegistry>,
    ) -> Self {
        Self {
            loader,
            conversations,
            executor,
            registry,
            prompt_options: PromptOptions::default(),
            limits: OrchestratorLimits::default(),
            events: None,
        }
    }

    pub fn with_prompt_options(mut self, options: PromptOptions) -> Self {
        self.prompt_options = options;
        self
    }

    pub fn with_limits(mut self, limits: OrchestratorLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.events = Some(handler);
        self
    }

    async fn emit(&self, event: SquadronEvent) {
        if let Some(handler) = &self.events {
            handler.on_event(&event).await;
        }
    }

    /// Run one agent task with the default overall deadline.
    pub async fn execute(
        &self,
        user_id: &str,
        agent_id: &str,
        task: &str,
        mode: Mode,
    ) -> Result<OrchestratorResult, SquadronError> {
        let deadline = Instant::now() + self.limits.overall_timeout;
        self.execute_with_deadline(user_id, agent_id, task, mode, deadline)
            .await
    }

    /// Run one agent task against a caller-provided deadline.
    pub async fn execute_with_deadline(
        &self,
        user_id: &str,
        agent_id: &str,
        task: &str,
        mode: Mode,
        deadline: Instant,
    ) -> Result<OrchestratorResult, SquadronError> {
        self.emit(SquadronEvent::RequestStarted {
            user_id: user_id.to_string(),
            agent_id: agent_id.to_string(),
            mode: mode.as_str().to_string(),
        })
        .await;

        let result = self.run(user_id, agent_id, task, mode, deadline).await;
        match &result {
            Ok(outcome) => {
                self.emit(SquadronEvent::RequestCompleted {
                    provider: outcome.provider.clone(),
                    turns: outcome.turns,
                    latency_ms: outcome.latency_ms,
                })
                .await;
            }
            Err(error) => {
                self.emit(SquadronEvent::RequestFailed {
                    code: error.code().to_string(),
                })
                .await;
            }
        }
        result
    }

    async fn run(
        &self,
        user_id: &str,
        agent_id: &str,
        task: &str,
        mode: Mode,
        deadline: Instant,
    ) -> Result<OrchestratorResult, SquadronError> {
        let started = Instant::now();

        let definition = match self.loader.get(agent_id).await {
            Some(definition) => definition,
            None => {
                return Err(SquadronError::AgentNotFound {
                    agent_id: agent_id.to_string(),
                    available: self.loader.ids().await,
                })
            }
        };

        let history = self.conversations.history(user_id, agent_id).await?;
        let system_prompt = render_system_prompt(&definition, &self.prompt_options);

        let task_message = Message::user(task);
        let mut messages = assemble_context(
            Message::system(&system_prompt),
            history,
            task_message.clone(),
            self.limits.context_char_budget,
        );

        let schemas = self.registry.definitions();
        let mut tools = ToolRunSession::new(self.registry.clone(), self.limits.max_tool_calls);

        let mut turns: u32 = 0;
        let mut loop_truncated = false;
        let mut fallback_used = false;
        let mut provider = String::new();
        let mut model = String::new();
        let mut tokens_input = 0usize;
        let mut tokens_output = 0usize;
        let mut final_content = String::new();

        loop {
            if turns >= self.limits.max_turns {
                debug!("turn cap reached for '{}'", agent_id);
                loop_truncated = true;
                break;
            }
            turns += 1;

            let request = ChatRequest::from_messages(messages.clone()).with_tools(schemas.clone());
            let outcome = self
                .executor
                .dispatch(agent_id, &request, mode == Mode::Normal, deadline)
                .await?;

            provider = outcome.provider;
            model = outcome.response.model.clone();
            fallback_used |= outcome.fallback_used;
            tokens_input += outcome.response.tokens_input;
            tokens_output += outcome.response.tokens_output;

            if outcome.response.tool_calls.is_empty() {
                final_content = outcome.response.content;
                break;
            }

            // Tool turn: echo the assistant message (with its calls), then
            // feed each requested call to the executor in emitted order.
            final_content = outcome.response.content.clone();
            messages.push(Message {
                role: Role::Assistant,
                content: Arc::from(outcome.response.content.as_str()),
                tool_calls: outcome.response.tool_calls.clone(),
            });

            let mut cap_hit = false;
            for call in &outcome.response.tool_calls {
                let result = tools.execute(call).await;
                if matches!(result, Err(ToolError::LimitExceeded)) {
                    cap_hit = true;
                    break;
                }
                let (text, success) = match &result {
                    Ok(output) => (output.clone(), true),
                    Err(error) => (format!("error: {}", error.code()), false),
                };
                let elapsed_ms = tools.records().last().map(|r| r.elapsed_ms).unwrap_or(0);
                self.emit(SquadronEvent::ToolInvoked {
                    name: call.name.clone(),
                    success,
                    elapsed_ms,
                })
                .await;
                messages.push(Message::tool(call.id.clone(), &text));
            }
            if cap_hit {
                debug!("tool call cap reached for '{}'", agent_id);
                loop_truncated = true;
                break;
            }
        }

        // Persist the exchange: user task and final assistant content only.
        self.conversations
            .append(user_id, agent_id, &task_message)
            .await?;
        self.conversations
            .append(user_id, agent_id, &Message::assistant(&final_content))
            .await?;

        Ok(OrchestratorResult {
            content: final_content,
            provider,
            model,
            latency_ms: started.elapsed().as_millis() as u64,
            tokens_input,
            tokens_output,
            fallback_used,
            tool_calls: tools.into_records(),
            turns,
            loop_truncated,
            mode,
        })
    }

}

/// Assemble `[system] + history + [task]`, trimming history from the front
/// until the character total fits the budget.  The system prompt and the
/// task (the most recent user message) are always retained.
fn assemble_context(
    system: Message,
    mut history: Vec<Message>,
    task: Message,
    budget_chars: usize,
) -> Vec<Message> {
    let fixed = system.content.len() + task.content.len();
    let mut total: usize = history.iter().map(|m| m.content.len()).sum();
    while total + fixed > budget_chars && !history.is_empty() {
        let removed = history.remove(0);
        total -= removed.content.len();
    }

    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(system);
    messages.extend(history);
    messages.push(task);
    messages
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_parses_and_prints() {
        assert_eq!(Mode::from_str("normal").unwrap(), Mode::Normal);
        assert_eq!(Mode::from_str("yolo").unwrap(), Mode::Yolo);
        assert!(Mode::from_str("fast").is_err());
        assert_eq!(Mode::Yolo.as_str(), "yolo");
    }

    #[test]
    fn context_trims_oldest_history_first() {
        let system = Message::system("S".repeat(10));
        let task = Message::user("T".repeat(10));
        let history = vec![
            Message::user("a".repeat(40)),
            Message::assistant("b".repeat(40)),
            Message::user("c".repeat(40)),
        ];

        let messages = assemble_context(system, history, task, 100);
        // 20 fixed chars leave room for two 40-char history entries.
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[1].content.as_ref(), "b".repeat(40));
        assert_eq!(messages[2].content.as_ref(), "c".repeat(40));
        assert_eq!(messages[3].role, Role::User);
    }

    #[test]
    fn task_is_retained_even_when_budget_is_tiny() {
        let messages = assemble_context(
            Message::system("system prompt"),
            vec![Message::user("old history")],
            Message::user("the latest task"),
            1,
        );
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].content.as_ref(), "the latest task");
    }
}
