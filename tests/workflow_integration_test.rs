//! 工作流集成测试：整图运行、熔断隔离、步数上限、截止时间与并发请求

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clinic_flow::config::AppConfig;
use clinic_flow::llm::{CompletionRequest, LlmClient, LlmError, ScriptedLlmClient};
use clinic_flow::memory::{InMemoryMemoryStore, MemoryStore, Role};
use clinic_flow::observability::{MemoryAuditLog, MetricsCollector};
use clinic_flow::resilience::{CircuitState, LLM_DEPENDENCY};
use clinic_flow::tools::Schedule;
use clinic_flow::workflow::{Route, RunRequest, WorkflowEngine, WorkflowError};
use clinic_flow::AgentBuilder;

const BOOKING_REPLY: &str = "Your dentist appointment is booked.";

struct Harness {
    engine: Arc<WorkflowEngine>,
    audit: Arc<MemoryAuditLog>,
    memory: Arc<InMemoryMemoryStore>,
    metrics: Arc<MetricsCollector>,
}

fn harness(llm: Arc<dyn LlmClient>, configure: impl FnOnce(&mut AppConfig)) -> Harness {
    let mut config = AppConfig::default();
    config.workflow.request_timeout_secs = 0;
    configure(&mut config);

    let audit = Arc::new(MemoryAuditLog::new(1_000));
    let memory = Arc::new(InMemoryMemoryStore::new(15));
    let metrics = Arc::new(MetricsCollector::default());
    let engine = AgentBuilder::new(config)
        .with_llm(llm)
        .with_memory_store(memory.clone())
        .with_schedule(Schedule::with_roster(
            &["2026-08-05"],
            &[("kevin anderson", "dentist")],
        ))
        .with_audit(audit.clone())
        .with_metrics(metrics.clone())
        .build()
        .unwrap();

    Harness {
        engine: Arc::new(engine),
        audit,
        memory,
        metrics,
    }
}

/// 监督节点先路由到预约再结束；能力节点直接回复
fn booking_once_llm() -> Arc<ScriptedLlmClient> {
    let supervisor_calls = AtomicUsize::new(0);
    Arc::new(ScriptedLlmClient::new().with_responder(move |req: &CompletionRequest| {
        if req.response_schema.is_some() {
            let n = supervisor_calls.fetch_add(1, Ordering::SeqCst);
            return Ok(if n == 0 {
                r#"{"next": "booking", "reasoning": "The patient wants to book."}"#
            } else {
                r#"{"next": "terminate", "reasoning": "Booking confirmed."}"#
            }
            .to_string());
        }
        Ok(BOOKING_REPLY.to_string())
    }))
}

#[tokio::test]
async fn test_booking_scenario_passes_through_extraction() {
    let h = harness(booking_once_llm(), |_| {});

    let outcome = h
        .engine
        .run(RunRequest::new("1000000", "book a dentist appointment"))
        .await
        .unwrap();

    // 初始 1 条 + 身份说明 + 预约回复
    assert_eq!(outcome.state.messages.len(), 3);
    assert_eq!(outcome.state.messages[1].role, Role::User);
    assert_eq!(
        outcome.state.messages[1].content,
        "user's identification number is 1000000"
    );
    let reply = &outcome.state.messages[2];
    assert_eq!(reply.name.as_deref(), Some("booking_node"));
    assert_eq!(outcome.final_message, BOOKING_REPLY);

    assert_eq!(outcome.last_route, Some(Route::Booking));
    assert_eq!(outcome.state.route, Some(Route::Terminate));
    assert_eq!(outcome.last_reasoning.as_deref(), Some("Booking confirmed."));
    assert_eq!(outcome.state.query.as_deref(), Some("book a dentist appointment"));
    // retrieval, supervisor, booking, supervisor, extraction -> done
    assert_eq!(outcome.steps, 5);

    // 记忆抽取只保存患者消息，不含身份说明
    assert_eq!(h.memory.len("1000000", "default"), 1);
    let recalled = h.memory.recall("1000000", "", "default").await.unwrap();
    assert_eq!(recalled[0].text, "book a dentist appointment");

    let routing = h.audit.events_of("routing_decision");
    assert_eq!(routing.len(), 2);
    assert_eq!(routing[0].details["input_summary"], "book a dentist appointment");
    assert_eq!(routing[1].details["input_summary"], "(continuation)");
    assert_eq!(routing[1].details["selected_route"], "terminate");

    let summary = h.metrics.summary();
    assert_eq!(summary["supervisor"].total_calls, 2);
    assert_eq!(summary["booking_node"].total_calls, 1);
}

#[tokio::test]
async fn test_memory_context_injected_on_next_request() {
    let h = harness(booking_once_llm(), |_| {});
    h.engine
        .run(RunRequest::new("1000000", "book a dentist appointment"))
        .await
        .unwrap();

    let llm = booking_once_llm();
    let h2 = Harness {
        engine: Arc::new(
            AgentBuilder::new(AppConfig::default())
                .with_llm(llm.clone())
                .with_memory_store(h.memory.clone())
                .build()
                .unwrap(),
        ),
        ..h
    };
    h2.engine
        .run(RunRequest::new("1000000", "another dentist appointment please"))
        .await
        .unwrap();

    let first = &llm.requests()[0];
    assert!(first.messages[0]
        .content
        .contains("=== PATIENT MEMORY CONTEXT (User: 1000000) ==="));
}

#[tokio::test]
async fn test_failing_capability_is_contained() {
    // 阈值 1：能力节点失败后熔断器打开，监督节点下一轮被拒绝并强制结束
    let supervisor_calls = AtomicUsize::new(0);
    let llm = Arc::new(ScriptedLlmClient::new().with_responder(move |req: &CompletionRequest| {
        if req.response_schema.is_some() {
            supervisor_calls.fetch_add(1, Ordering::SeqCst);
            return Ok(r#"{"next": "booking", "reasoning": "book"}"#.to_string());
        }
        Err(LlmError::ApiError("upstream 503".into()))
    }));
    let h = harness(llm.clone(), |c| c.resilience.failure_threshold = 1);

    let outcome = h
        .engine
        .run(RunRequest::new("1000000", "book a dentist appointment"))
        .await
        .unwrap();

    assert_eq!(
        outcome.final_message,
        "I encountered an error processing your request. Please try again."
    );
    assert_eq!(outcome.last_route, Some(Route::Booking));
    assert_eq!(outcome.state.route, Some(Route::Terminate));
    assert!(outcome
        .last_reasoning
        .unwrap()
        .starts_with("Circuit breaker: Circuit breaker 'llm_api' is OPEN"));
    // 监督节点第二次调用未发出
    assert_eq!(llm.call_count(), 2);

    let status = h.engine.breaker_status(LLM_DEPENDENCY);
    assert_eq!(status.state, CircuitState::Open);
    assert!(status.time_until_recovery > Duration::ZERO);
    assert!(!h.audit.events_of("circuit_breaker_transition").is_empty());

    let reset = h.engine.reset_breaker(LLM_DEPENDENCY);
    assert_eq!(reset.state, CircuitState::Closed);
    assert_eq!(reset.failure_count, 0);
    assert_eq!(h.audit.events_of("circuit_breaker_manual_reset").len(), 1);
}

#[tokio::test]
async fn test_open_breaker_still_completes_request() {
    let llm = Arc::new(ScriptedLlmClient::new());
    let h = harness(llm.clone(), |c| c.resilience.failure_threshold = 2);
    let breaker = h.engine.breakers().get(LLM_DEPENDENCY);
    for _ in 0..2 {
        let _ = breaker
            .call(|| async { Err::<(), _>(LlmError::Timeout) })
            .await;
    }

    let outcome = h
        .engine
        .run(RunRequest::new("1000000", "what slots does kevin anderson have?"))
        .await
        .unwrap();
    assert_eq!(llm.call_count(), 0);
    assert_eq!(outcome.state.route, Some(Route::Terminate));
    assert!(outcome.last_reasoning.unwrap().contains("is OPEN"));
    assert_eq!(outcome.steps, 3);
}

#[tokio::test]
async fn test_supervisor_garbage_output_terminates() {
    let llm = Arc::new(ScriptedLlmClient::new().with_responder(|_: &CompletionRequest| {
        Ok("I would route this to the billing department".to_string())
    }));
    let h = harness(llm, |_| {});

    let outcome = h
        .engine
        .run(RunRequest::new("1000000", "how much do I owe?"))
        .await
        .unwrap();
    assert_eq!(outcome.state.route, Some(Route::Terminate));
    assert!(outcome.last_reasoning.unwrap().starts_with("Routing failed"));
    assert_eq!(h.engine.breaker_status(LLM_DEPENDENCY).failure_count, 1);
}

#[tokio::test]
async fn test_never_terminating_supervisor_hits_step_limit() {
    let llm = Arc::new(ScriptedLlmClient::new().with_responder(|req: &CompletionRequest| {
        Ok(if req.response_schema.is_some() {
            r#"{"next": "information", "reasoning": "more info"}"#
        } else {
            "Kevin Anderson is free at 08:00."
        }
        .to_string())
    }));
    let h = harness(llm, |c| c.workflow.step_limit = 20);

    let err = h
        .engine
        .run(RunRequest::new("1000000", "when is kevin free?"))
        .await
        .unwrap_err();
    assert_eq!(err, WorkflowError::StepLimitExceeded { limit: 20, steps: 21 });
}

#[tokio::test]
async fn test_capability_pass_cap_finishes_request() {
    let llm = Arc::new(ScriptedLlmClient::new().with_responder(|req: &CompletionRequest| {
        Ok(if req.response_schema.is_some() {
            r#"{"next": "information", "reasoning": "more info"}"#
        } else {
            "Kevin Anderson is free at 08:00."
        }
        .to_string())
    }));
    let h = harness(llm, |c| c.workflow.max_capability_passes = Some(2));

    let outcome = h
        .engine
        .run(RunRequest::new("1000000", "when is kevin free?"))
        .await
        .unwrap();
    assert_eq!(outcome.last_route, Some(Route::Information));
    assert_eq!(outcome.state.route, Some(Route::Terminate));
    assert_eq!(h.metrics.summary()["information_node"].total_calls, 2);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_times_out_and_counts_failure() {
    let llm = Arc::new(ScriptedLlmClient::new().with_latency(Duration::from_secs(5)));
    let h = harness(llm, |_| {});

    let outcome = h
        .engine
        .run(RunRequest::new("1000000", "book a dentist appointment").deadline(Duration::from_millis(200)))
        .await
        .unwrap();

    assert_eq!(outcome.state.route, Some(Route::Terminate));
    assert!(outcome.last_reasoning.unwrap().contains("timed out"));
    assert_eq!(h.engine.breaker_status(LLM_DEPENDENCY).failure_count, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_share_breaker() {
    let llm = Arc::new(
        ScriptedLlmClient::new()
            .with_latency(Duration::from_millis(20))
            .with_responder(|req: &CompletionRequest| {
                let answered = req
                    .messages
                    .last()
                    .is_some_and(|m| m.role == Role::Assistant);
                Ok(match (req.response_schema.is_some(), answered) {
                    (true, false) => r#"{"next": "booking", "reasoning": "book"}"#,
                    (true, true) => r#"{"next": "terminate", "reasoning": "done"}"#,
                    (false, _) => BOOKING_REPLY,
                }
                .to_string())
            }),
    );
    let h = harness(llm.clone(), |_| {});

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let engine = h.engine.clone();
            tokio::spawn(async move {
                engine
                    .run(RunRequest::new(format!("{}", 1_000_000 + i), "book a dentist appointment"))
                    .await
            })
        })
        .collect();

    for handle in futures_util::future::join_all(handles).await {
        let outcome = handle.unwrap().unwrap();
        assert_eq!(outcome.final_message, BOOKING_REPLY);
        assert_eq!(outcome.state.messages.len(), 3);
    }

    // 每个请求 3 次模型调用（监督、预约、监督）
    assert_eq!(llm.call_count(), 48);
    let status = h.engine.breaker_status(LLM_DEPENDENCY);
    assert_eq!(status.state, CircuitState::Closed);
    assert_eq!(status.failure_count, 0);
    assert_eq!(h.engine.breaker_statuses().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_failures_open_shared_breaker() {
    let llm = Arc::new(
        ScriptedLlmClient::new()
            .with_latency(Duration::from_millis(10))
            .with_responder(|_: &CompletionRequest| Err(LlmError::ApiError("down".into()))),
    );
    let h = harness(llm.clone(), |c| c.resilience.failure_threshold = 5);

    let handles: Vec<_> = (0..12)
        .map(|i| {
            let engine = h.engine.clone();
            tokio::spawn(async move {
                engine
                    .run(RunRequest::new(format!("p{i}"), "book a dentist appointment"))
                    .await
            })
        })
        .collect();

    // 依赖故障被吸收为正常结束的请求
    for handle in futures_util::future::join_all(handles).await {
        let outcome = handle.unwrap().unwrap();
        assert_eq!(outcome.state.route, Some(Route::Terminate));
    }
    assert_eq!(h.engine.breaker_status(LLM_DEPENDENCY).state, CircuitState::Open);

    // 打开后的新请求不再调用模型
    let before = llm.call_count();
    h.engine
        .run(RunRequest::new("late", "book a dentist appointment"))
        .await
        .unwrap();
    assert_eq!(llm.call_count(), before);
}

#[tokio::test]
async fn test_abandoned_requests_do_not_open_breaker() {
    let llm = Arc::new(
        ScriptedLlmClient::new()
            .with_latency(Duration::from_millis(200))
            .with_responder(|_: &CompletionRequest| {
                Ok(r#"{"next": "terminate", "reasoning": "Nothing to do."}"#.to_string())
            }),
    );
    let h = harness(llm.clone(), |c| c.resilience.failure_threshold = 1);

    // 调用方放弃的请求不代表依赖故障
    for i in 0..5 {
        let run = h.engine.run(RunRequest::new(format!("p{i}"), "hello"));
        assert!(tokio::time::timeout(Duration::from_millis(10), run).await.is_err());
    }
    let status = h.engine.breaker_status(LLM_DEPENDENCY);
    assert_eq!(status.state, CircuitState::Closed);
    assert_eq!(status.failure_count, 0);

    let outcome = h
        .engine
        .run(RunRequest::new("1000000", "hello"))
        .await
        .unwrap();
    assert_eq!(outcome.last_reasoning.as_deref(), Some("Nothing to do."));
    assert!(llm.call_count() >= 1);
}
