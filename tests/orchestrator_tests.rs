use std::sync::Arc;
use std::time::Duration;

use squadron::agent::AgentLoader;
use squadron::client_wrapper::{ProviderClient, Role};
use squadron::clients::stub::{StubClient, StubResponse};
use squadron::clock::SystemClock;
use squadron::config::{ProviderConfig, RateLimitConfig, Tier};
use squadron::conversation::ConversationStore;
use squadron::error::{FailureKind, SquadronError};
use squadron::event::{MemoryEventLog, SquadronEvent};
use squadron::fallback::FallbackExecutor;
use squadron::kv::MemoryKvStore;
use squadron::orchestrator::{Mode, Orchestrator, OrchestratorLimits};
use squadron::rate::RateGate;
use squadron::retry::RetryPolicy;
use squadron::tools::{default_registry, PathSandbox};
use tempfile::TempDir;

const ANALYST_YAML: &str = r#"
id: analyst
name: Mary
title: Business Analyst
persona:
  role: Strategic analyst
  identity: Data-driven
  communication_style: Concise
menu:
  - command: research
    description: Run a research workflow
communication_language: English
"#;

struct Fixture {
    _dir: TempDir,
    orchestrator: Orchestrator,
    conversations: Arc<ConversationStore>,
    events: Arc<MemoryEventLog>,
}

fn provider_config(name: &str) -> ProviderConfig {
    ProviderConfig {
        name: name.to_string(),
        enabled: true,
        model: "stub-model".to_string(),
        base_url: None,
        api_key_env: "UNUSED".to_string(),
        timeout_secs: 30,
        rate: RateLimitConfig {
            rpm: 600,
            burst: 600,
            tokens_per_minute: 100_000,
        },
        tier: Tier::Worker,
    }
}

async fn fixture_with(stubs: &[Arc<StubClient>], limits: OrchestratorLimits) -> Fixture {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = TempDir::new().unwrap();
    let agent_dir = dir.path().join(".bmad/agents");
    tokio::fs::create_dir_all(&agent_dir).await.unwrap();
    tokio::fs::create_dir_all(dir.path().join("docs")).await.unwrap();
    tokio::fs::write(agent_dir.join("analyst.yaml"), ANALYST_YAML)
        .await
        .unwrap();
    tokio::fs::write(agent_dir.join("analyst.md"), "# Analyst persona notes")
        .await
        .unwrap();

    let kv = Arc::new(MemoryKvStore::new());
    let clock = Arc::new(SystemClock);
    let events = Arc::new(MemoryEventLog::new());

    let loader = Arc::new(AgentLoader::new(&agent_dir, kv.clone()));
    loader.load_all().await.unwrap();

    let rate_gate = Arc::new(RateGate::new(kv.clone(), clock.clone(), 12));
    let mut executor = FallbackExecutor::new(rate_gate)
        .with_retry_policy(
            RetryPolicy::new()
                .with_max_attempts(3)
                .with_base_delay(Duration::from_millis(2))
                .with_jitter_factor(0.0),
        )
        .with_event_handler(events.clone());
    let mut chain = Vec::new();
    for stub in stubs {
        let name = stub.provider_name().to_string();
        executor = executor.with_provider(stub.clone(), provider_config(&name));
        chain.push(name);
    }
    let executor = Arc::new(executor.with_chain("analyst", chain));

    let conversations = Arc::new(ConversationStore::new(kv));
    let registry = Arc::new(default_registry(PathSandbox::new(dir.path()), clock));

    let orchestrator = Orchestrator::new(
        loader,
        conversations.clone(),
        executor,
        registry,
    )
    .with_limits(limits)
    .with_event_handler(events.clone());

    Fixture {
        _dir: dir,
        orchestrator,
        conversations,
        events,
    }
}

async fn fixture(stubs: &[Arc<StubClient>]) -> Fixture {
    fixture_with(stubs, OrchestratorLimits::default()).await
}

#[tokio::test]
async fn happy_path_single_turn() {
    let stub = Arc::new(StubClient::new("stub_a"));
    stub.push_response_with(StubResponse {
        content: "OK".to_string(),
        tokens_input: 10,
        tokens_output: 2,
        finish_reason: "stop".to_string(),
        tool_calls: vec![],
    })
    .await;
    let fx = fixture(&[stub]).await;

    let result = fx
        .orchestrator
        .execute("u1", "analyst", "hi", Mode::Normal)
        .await
        .unwrap();

    assert_eq!(result.content, "OK");
    assert_eq!(result.provider, "stub_a");
    assert_eq!(result.model, "stub-model");
    assert_eq!(result.tokens_input, 10);
    assert_eq!(result.tokens_output, 2);
    assert_eq!(result.turns, 1);
    assert!(result.tool_calls.is_empty());
    assert!(!result.fallback_used);
    assert!(!result.loop_truncated);
    assert_eq!(result.mode, Mode::Normal);

    let history = fx.conversations.history("u1", "analyst").await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].role, Role::User);
    assert_eq!(history[0].content.as_ref(), "hi");
    assert_eq!(history[1].role, Role::Assistant);
    assert_eq!(history[1].content.as_ref(), "OK");
}

#[tokio::test]
async fn tool_loop_reads_a_file_and_finishes() {
    let stub = Arc::new(StubClient::new("stub_a"));
    stub.push_response_with(StubResponse::tool_call(
        "c1",
        "load_file",
        serde_json::json!({"path": ".bmad/agents/analyst.md"}),
    ))
    .await;
    stub.push_response("done").await;
    let fx = fixture(&[stub.clone()]).await;

    let result = fx
        .orchestrator
        .execute("u1", "analyst", "read your notes", Mode::Normal)
        .await
        .unwrap();

    assert_eq!(result.content, "done");
    assert_eq!(result.turns, 2);
    assert_eq!(result.tool_calls.len(), 1);
    assert_eq!(result.tool_calls[0].name, "load_file");
    assert_eq!(
        result.tool_calls[0].outcome,
        Ok("# Analyst persona notes".to_string())
    );

    // The second dispatch saw the tool result message.
    let calls = stub.calls().await;
    assert_eq!(calls.len(), 2);
    let tool_msg = calls[1]
        .messages
        .iter()
        .find(|m| matches!(m.role, Role::Tool { .. }))
        .expect("tool message present");
    assert_eq!(tool_msg.content.as_ref(), "# Analyst persona notes");
    assert!(matches!(&tool_msg.role, Role::Tool { call_id } if call_id == "c1"));
}

#[tokio::test]
async fn sandbox_rejection_feeds_an_error_back_to_the_llm() {
    let stub = Arc::new(StubClient::new("stub_a"));
    stub.push_response_with(StubResponse::tool_call(
        "c1",
        "load_file",
        serde_json::json!({"path": "../etc/passwd"}),
    ))
    .await;
    stub.push_response("apology").await;
    let fx = fixture(&[stub.clone()]).await;

    let result = fx
        .orchestrator
        .execute("u1", "analyst", "read the password file", Mode::Normal)
        .await
        .unwrap();

    assert_eq!(result.content, "apology");
    assert_eq!(result.tool_calls.len(), 1);
    assert_eq!(result.tool_calls[0].outcome, Err("path_rejected".to_string()));

    let calls = stub.calls().await;
    let tool_msg = calls[1]
        .messages
        .iter()
        .find(|m| matches!(m.role, Role::Tool { .. }))
        .unwrap();
    assert_eq!(tool_msg.content.as_ref(), "error: path_rejected");
}

#[tokio::test]
async fn chain_exhaustion_appends_nothing() {
    let stub_a = Arc::new(StubClient::new("stub_a"));
    stub_a
        .fail_always(FailureKind::RateLimited { retry_after: Some(Duration::ZERO) })
        .await;
    let stub_b = Arc::new(StubClient::new("stub_b"));
    stub_b
        .fail_always(FailureKind::RateLimited { retry_after: Some(Duration::ZERO) })
        .await;
    let fx = fixture(&[stub_a, stub_b]).await;

    let error = fx
        .orchestrator
        .execute("u1", "analyst", "hi", Mode::Normal)
        .await
        .unwrap_err();

    match error {
        SquadronError::ChainExhausted { attempts } => {
            assert_eq!(attempts.len(), 2);
            assert_eq!(attempts[0].provider, "stub_a");
            assert_eq!(attempts[0].failure.code(), "rate_limited");
            assert_eq!(attempts[1].provider, "stub_b");
        }
        other => panic!("expected ChainExhausted, got {:?}", other),
    }
    assert!(fx.conversations.history("u1", "analyst").await.unwrap().is_empty());
}

#[tokio::test]
async fn unknown_agent_reports_the_available_ids() {
    let stub = Arc::new(StubClient::new("stub_a"));
    let fx = fixture(&[stub]).await;

    let error = fx
        .orchestrator
        .execute("u1", "ghost", "hi", Mode::Normal)
        .await
        .unwrap_err();
    match error {
        SquadronError::AgentNotFound {
            agent_id,
            available,
        } => {
            assert_eq!(agent_id, "ghost");
            assert_eq!(available, vec!["analyst"]);
        }
        other => panic!("expected AgentNotFound, got {:?}", other),
    }
}

#[tokio::test]
async fn turn_cap_truncates_a_runaway_tool_loop() {
    let stub = Arc::new(StubClient::new("stub_a"));
    for i in 0..12 {
        stub.push_response_with(StubResponse::tool_call(
            format!("c{}", i),
            "list_directory",
            serde_json::json!({"path": "docs"}),
        ))
        .await;
    }
    let fx = fixture(&[stub.clone()]).await;

    let result = fx
        .orchestrator
        .execute("u1", "analyst", "loop forever", Mode::Normal)
        .await
        .unwrap();

    assert_eq!(result.turns, 10);
    assert!(result.loop_truncated);
    assert_eq!(stub.call_count().await, 10);
}

#[tokio::test]
async fn tool_call_cap_ends_the_loop_with_truncation() {
    let stub = Arc::new(StubClient::new("stub_a"));
    stub.push_response_with(StubResponse {
        content: String::new(),
        tokens_input: 5,
        tokens_output: 1,
        finish_reason: "tool_calls".to_string(),
        tool_calls: (0..3)
            .map(|i| squadron::client_wrapper::ToolCallRequest {
                id: format!("c{}", i),
                name: "list_directory".to_string(),
                arguments: serde_json::json!({"path": "docs"}),
            })
            .collect(),
    })
    .await;
    let mut limits = OrchestratorLimits::default();
    limits.max_tool_calls = 2;
    let fx = fixture_with(&[stub], limits).await;

    let result = fx
        .orchestrator
        .execute("u1", "analyst", "fan out", Mode::Normal)
        .await
        .unwrap();

    assert!(result.loop_truncated);
    assert_eq!(result.tool_calls.len(), 2);
}

#[tokio::test]
async fn context_overflow_keeps_the_latest_user_message() {
    let stub = Arc::new(StubClient::new("stub_a"));
    stub.set_default_response("noted").await;
    let mut limits = OrchestratorLimits::default();
    limits.context_char_budget = 1;
    let fx = fixture_with(&[stub.clone()], limits).await;

    for i in 0..6 {
        fx.conversations
            .append(
                "u1",
                "analyst",
                &squadron::client_wrapper::Message::user(format!("old message {}", i)),
            )
            .await
            .unwrap();
    }

    fx.orchestrator
        .execute("u1", "analyst", "the newest task", Mode::Normal)
        .await
        .unwrap();

    let sent = &stub.calls().await[0].messages;
    // All history trimmed; system prompt and the task survive.
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].role, Role::System);
    assert_eq!(sent[1].content.as_ref(), "the newest task");
}

#[tokio::test]
async fn events_cover_the_request_lifecycle() {
    let stub = Arc::new(StubClient::new("stub_a"));
    stub.push_response_with(StubResponse::tool_call(
        "c1",
        "list_directory",
        serde_json::json!({"path": "docs"}),
    ))
    .await;
    stub.push_response("done").await;
    let fx = fixture(&[stub]).await;

    fx.orchestrator
        .execute("u1", "analyst", "hi", Mode::Yolo)
        .await
        .unwrap();

    let events = fx.events.events().await;
    assert!(events.iter().any(|e| matches!(
        e,
        SquadronEvent::RequestStarted { mode, .. } if mode == "yolo"
    )));
    assert!(events.iter().any(|e| matches!(
        e,
        SquadronEvent::ProviderAttempted { provider, outcome, .. }
            if provider == "stub_a" && outcome == "ok"
    )));
    assert!(events.iter().any(|e| matches!(
        e,
        SquadronEvent::ToolInvoked { name, success: true, .. } if name == "list_directory"
    )));
    assert!(events.iter().any(|e| matches!(
        e,
        SquadronEvent::RequestCompleted { turns: 2, .. }
    )));
}

#[tokio::test]
async fn yolo_accepts_responses_normal_mode_would_flag() {
    let stub = Arc::new(StubClient::new("stub_a"));
    stub.set_default_response("ok").await;
    let fx = fixture(&[stub]).await;

    // Short response, single worker provider: both modes return it, yolo
    // without ever consulting the validator.
    let result = fx
        .orchestrator
        .execute("u1", "analyst", "hi", Mode::Yolo)
        .await
        .unwrap();
    assert_eq!(result.content, "ok");
    assert_eq!(result.mode, Mode::Yolo);
}
