//! 单轮端到端测试：Mock 后端 + 记录型长期记忆 + 钩子/技能/项目上下文

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use drone::core::{
        AgentError, ApprovalGate, ApprovalMode, Hook, HookError, HookEvent, HookManager, HookResult,
        ProjectContext, RiskLevel,
    };
    use drone::llm::{ChatResponse, LlmError, MockLlmClient, TokenUsage};
    use drone::memory::{
        Exchange, InMemoryStore, MemoryError, MemorySnippet, MemoryStore, Message, Role, Session,
        ToolCallRequest,
    };
    use drone::react::Provenance;
    use drone::skills::{Skill, SkillError, SkillMeta, SkillRegistry};
    use drone::tools::{EchoTool, Tool, ToolExecutor, ToolRegistry};
    use drone::{Agent, AgentBuilder, AgentEvent, TurnStream};
    use futures_util::StreamExt;
    use serde_json::{json, Value};
    use tokio::sync::mpsc;

    /// 记录 search 次数并把 store 调用转发到通道
    struct RecordingMemory {
        searches: AtomicUsize,
        stored: mpsc::UnboundedSender<(String, Exchange)>,
    }

    #[async_trait]
    impl MemoryStore for RecordingMemory {
        async fn search(&self, _query: &str, _user_id: &str, _limit: usize) -> Result<Vec<MemorySnippet>, MemoryError> {
            self.searches.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }

        async fn store(&self, user_id: &str, exchange: Exchange) -> Result<(), MemoryError> {
            let _ = self.stored.send((user_id.to_string(), exchange));
            Ok(())
        }
    }

    fn recording_memory() -> (Arc<RecordingMemory>, mpsc::UnboundedReceiver<(String, Exchange)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let memory = Arc::new(RecordingMemory {
            searches: AtomicUsize::new(0),
            stored: tx,
        });
        (memory, rx)
    }

    /// 两秒后才返回的工具
    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }

        fn description(&self) -> &str {
            "Sleeps before answering"
        }

        async fn execute(&self, _args: Value) -> Result<String, String> {
            tokio::time::sleep(Duration::from_secs(2)).await;
            Ok("finally".to_string())
        }
    }

    struct BoomTool;

    #[async_trait]
    impl Tool for BoomTool {
        fn name(&self) -> &str {
            "boom"
        }

        fn description(&self) -> &str {
            "Always panics"
        }

        async fn execute(&self, _args: Value) -> Result<String, String> {
            panic!("boom exploded");
        }
    }

    /// 记录事件名；可选地改写 tool_call_before 的参数
    struct Recorder {
        seen: Arc<Mutex<Vec<String>>>,
        rewrite_args: Option<Value>,
    }

    #[async_trait]
    impl Hook for Recorder {
        async fn on_event(&self, event: HookEvent, mut data: Value) -> HookResult {
            self.seen.lock().unwrap().push(event.to_string());
            match (&self.rewrite_args, event) {
                (Some(args), HookEvent::ToolCallBefore) => {
                    data["arguments"] = args.clone();
                    Ok(Some(data))
                }
                _ => Ok(None),
            }
        }
    }

    struct Blocker(&'static str);

    #[async_trait]
    impl Hook for Blocker {
        async fn on_event(&self, _event: HookEvent, _data: Value) -> HookResult {
            Err(HookError::Blocked(self.0.to_string()))
        }
    }

    fn tools_with(tool: impl Tool + 'static) -> Arc<ToolExecutor> {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        registry.register(tool);
        Arc::new(ToolExecutor::new(registry, 5))
    }

    fn call(id: &str, name: &str) -> ToolCallRequest {
        ToolCallRequest {
            id: id.to_string(),
            name: name.to_string(),
            arguments: json!({}),
        }
    }

    async fn read_until_thinking(stream: &mut TurnStream, text: &str) {
        loop {
            match stream.next_event().await {
                Some(AgentEvent::Thinking { text: t }) if t == text => return,
                Some(_) => continue,
                None => panic!("stream ended before {:?}", text),
            }
        }
    }

    fn echo_tools() -> Arc<ToolExecutor> {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        Arc::new(ToolExecutor::new(registry, 5))
    }

    fn echo_call(id: &str, text: &str) -> ToolCallRequest {
        ToolCallRequest {
            id: id.to_string(),
            name: "echo".to_string(),
            arguments: json!({ "text": text }),
        }
    }

    fn agent_with(mock: &Arc<MockLlmClient>) -> AgentBuilder {
        AgentBuilder::new(mock.clone()).tools(echo_tools())
    }

    async fn collect(stream: TurnStream) -> Vec<AgentEvent> {
        stream.collect().await
    }

    async fn run(agent: &Agent, input: &str) -> Vec<AgentEvent> {
        collect(agent.step(input).expect("turn should start")).await
    }

    fn kinds(events: &[AgentEvent]) -> Vec<&'static str> {
        events
            .iter()
            .map(AgentEvent::kind)
            .filter(|k| *k != "thinking")
            .collect()
    }

    fn thinking(events: &[AgentEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                AgentEvent::Thinking { text } => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    fn assert_single_terminal(events: &[AgentEvent]) {
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
        assert!(events.last().unwrap().is_terminal());
    }

    #[tokio::test]
    async fn test_trivial_turn_skips_memory_and_tools() {
        let mock = Arc::new(MockLlmClient::new());
        let (memory, _rx) = recording_memory();
        let agent = agent_with(&mock).memory(memory.clone()).build();

        let events = run(&agent, "Hello").await;

        assert_single_terminal(&events);
        assert!(!thinking(&events).contains(&"Checking memories...".to_string()));
        assert_eq!(memory.searches.load(Ordering::SeqCst), 0);
        let calls = mock.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].tool_names.is_empty());
        assert_eq!(
            events.last().unwrap(),
            &AgentEvent::Response {
                text: "Echo from Mock: Hello".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_native_tool_call_executes_then_synthesizes() {
        let mock = Arc::new(
            MockLlmClient::new()
                .with_response(
                    ChatResponse::with_tool_calls("", vec![echo_call("call_1", "ping")])
                        .with_usage(TokenUsage::new(10, 5)),
                )
                .with_response(ChatResponse::text("The tool said ping.").with_usage(TokenUsage::new(20, 4))),
        );
        let agent = agent_with(&mock).build();

        let events = run(&agent, "please echo ping for me").await;

        assert_eq!(kinds(&events), vec!["tool_call", "tool_result", "response"]);
        assert_eq!(
            thinking(&events),
            vec!["Reasoning...", "Executing tools...", "Synthesizing results..."]
        );
        assert!(events.contains(&AgentEvent::ToolResult {
            name: "echo".to_string(),
            result: "ping".to_string()
        }));

        let session = agent.session_snapshot().await;
        let messages = session.get_messages();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[1].tool_calls()[0].id, "call_1");
        assert_eq!(
            messages[2],
            Message::tool("call_1", "echo", "ping")
        );
        assert_eq!(messages[3].content(), "The tool said ping.");
        assert_eq!(session.total_tokens_used, 39);

        let calls = mock.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].tool_names, vec!["echo".to_string()]);
        assert_eq!(calls[1].messages.last().unwrap().role(), Role::Tool);
    }

    #[tokio::test]
    async fn test_recovered_tool_call_from_text() {
        let mock = Arc::new(
            MockLlmClient::new()
                .with_text(r#"```json
{"name": "echo", "arguments": {"text": "hi there"}}
```"#)
                .with_text("Done echoing."),
        );
        let agent = agent_with(&mock).build();

        let events = run(&agent, "echo something please").await;

        let intent = events
            .iter()
            .find_map(|e| match e {
                AgentEvent::ToolCall { intent } => Some(intent.clone()),
                _ => None,
            })
            .expect("tool call event");
        assert_eq!(intent.provenance, Provenance::Recovered);
        assert!(intent.id.starts_with("call_"));
        assert_eq!(
            events.last().unwrap(),
            &AgentEvent::Response {
                text: "Done echoing.".to_string()
            }
        );
        let messages = agent.session_snapshot().await.get_messages();
        assert_eq!(messages[1].content(), "");
        assert_eq!(messages[2], Message::tool(intent.id.clone(), "echo", "hi there"));
    }

    #[tokio::test]
    async fn test_fake_tool_call_is_unwrapped_into_response() {
        let mock = Arc::new(
            MockLlmClient::new()
                .with_text(r#"{"name": "none", "arguments": {"message": "Nothing to run, all good."}}"#),
        );
        let agent = agent_with(&mock).build();

        let events = run(&agent, "is everything fine?").await;

        assert_eq!(kinds(&events), vec!["response"]);
        assert_eq!(
            events.last().unwrap(),
            &AgentEvent::Response {
                text: "Nothing to run, all good.".to_string()
            }
        );
        assert_eq!(mock.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_memory_context_only_in_outbound_copy() {
        let mock = Arc::new(MockLlmClient::new().with_text("Green tea."));
        let memory = Arc::new(InMemoryStore::new(10));
        memory.add_text("default", "User likes green tea");
        let agent = agent_with(&mock).memory(memory).auto_extract(false).build();

        let events = run(&agent, "which tea do I like?").await;

        assert!(thinking(&events).contains(&"Checking memories...".to_string()));
        let sent = mock.calls()[0].messages.last().unwrap().content().to_string();
        assert_eq!(
            sent,
            "which tea do I like?\n\n[MEMORY CONTEXT]\n- User likes green tea\n[/MEMORY CONTEXT]"
        );
        let stored = agent.session_snapshot().await.get_messages();
        assert_eq!(stored[0].content(), "which tea do I like?");
    }

    #[tokio::test]
    async fn test_exchange_is_stored_in_background() {
        let mock = Arc::new(MockLlmClient::new().with_text("Rust uses ownership."));
        let (memory, mut rx) = recording_memory();
        let agent = agent_with(&mock).memory(memory.clone()).user_id("alice").build();

        let events = run(&agent, "how does rust manage memory?").await;
        assert_single_terminal(&events);
        assert_eq!(memory.searches.load(Ordering::SeqCst), 1);

        let (user_id, exchange) = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("store should be called")
            .expect("channel open");
        assert_eq!(user_id, "alice");
        assert_eq!(exchange.user, "how does rust manage memory?");
        assert_eq!(exchange.assistant, "Rust uses ownership.");
    }

    #[tokio::test]
    async fn test_llm_failure_yields_single_error_and_keeps_session() {
        let mock = Arc::new(MockLlmClient::new().with_error(LlmError::Unavailable("backend down".into())));
        let agent = agent_with(&mock).build();

        let events = run(&agent, "summarize the repo layout").await;

        assert_single_terminal(&events);
        match events.last().unwrap() {
            AgentEvent::Error { message } => assert!(message.contains("backend down")),
            other => panic!("expected error event, got {:?}", other),
        }
        let session = agent.session_snapshot().await;
        assert_eq!(session.len(), 1);
        assert_eq!(session.get_messages()[0], Message::user("summarize the repo layout"));
    }

    #[tokio::test]
    async fn test_llm_timeout_is_recoverable() {
        let mock = Arc::new(MockLlmClient::new().with_delay(Duration::from_millis(500)));
        let agent = agent_with(&mock).llm_timeout(Duration::from_millis(50)).build();

        let events = run(&agent, "a slow question here").await;
        assert!(matches!(events.last().unwrap(), AgentEvent::Error { message } if message.contains("timed out")));

        let events = run(&agent, "and another slow one").await;
        assert_single_terminal(&events);
    }

    #[tokio::test]
    async fn test_step_while_turn_open_is_rejected() {
        let mock = Arc::new(MockLlmClient::new().with_delay(Duration::from_millis(200)));
        let agent = agent_with(&mock).build();

        let first = agent.step("first question please").unwrap();
        assert!(matches!(agent.step("second question"), Err(AgentError::TurnInProgress)));

        let events = collect(first).await;
        assert_single_terminal(&events);
        assert!(agent.step("third question please").is_ok());
    }

    #[tokio::test]
    async fn test_approval_needed_is_advisory_in_suggest_mode() {
        let mock = Arc::new(
            MockLlmClient::new()
                .with_response(ChatResponse::with_tool_calls("", vec![echo_call("call_9", "hey")]))
                .with_text("Echoed."),
        );
        let gate = Arc::new(ApprovalGate::new(ApprovalMode::Suggest));
        let agent = agent_with(&mock).approval_gate(gate).build();

        let events = run(&agent, "echo hey for me").await;

        assert_eq!(
            kinds(&events),
            vec!["tool_call", "approval_needed", "tool_result", "response"]
        );
        assert!(events.contains(&AgentEvent::ApprovalNeeded {
            name: "echo".to_string(),
            arguments: json!({"text": "hey"}),
            risk: RiskLevel::Low,
            reason: "Suggest mode: Echo text".to_string(),
        }));
    }

    #[tokio::test]
    async fn test_unknown_native_tool_is_not_dispatched() {
        let ghost = ToolCallRequest {
            id: "call_x".to_string(),
            name: "ghost".to_string(),
            arguments: json!({}),
        };
        let mock = Arc::new(
            MockLlmClient::new().with_response(ChatResponse::with_tool_calls("I cannot do that.", vec![ghost])),
        );
        let agent = agent_with(&mock).build();

        let events = run(&agent, "summon the ghost tool").await;

        assert_eq!(kinds(&events), vec!["response"]);
        assert_eq!(mock.calls().len(), 1);
        assert_eq!(agent.session_snapshot().await.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_content_yields_empty_response() {
        let mock = Arc::new(MockLlmClient::new().with_text(""));
        let agent = agent_with(&mock).build();

        let events = run(&agent, "say absolutely nothing").await;

        assert_eq!(
            events.last().unwrap(),
            &AgentEvent::Response { text: String::new() }
        );
        assert_eq!(agent.session_snapshot().await.len(), 1);
    }

    #[tokio::test]
    async fn test_compaction_runs_before_model_call() {
        let mock = Arc::new(MockLlmClient::new().with_text("Ownership moves values."));
        let mut session = Session::new(4, 2);
        session.add(Message::user("question one"));
        session.add(Message::assistant("answer one"));
        session.add(Message::user("question two"));
        session.add(Message::assistant("answer two"));
        let agent = agent_with(&mock).session(session).build();

        let events = run(&agent, "tell me about rust ownership").await;

        assert_eq!(thinking(&events)[0], "Compacting conversation history...");
        assert_eq!(mock.summarize_prompts().len(), 1);
        assert!(mock.summarize_prompts()[0].contains("user: question one"));

        let messages = agent.session_snapshot().await.get_messages();
        assert_eq!(
            messages[0].content(),
            "[Previous Context Summary]: Earlier conversation summarized."
        );
        assert_eq!(messages[1].content(), "answer two");
        assert_eq!(messages[2].content(), "tell me about rust ownership");
        assert_eq!(messages[3].content(), "Ownership moves values.");
        assert_eq!(messages.len(), 4);
        assert_eq!(mock.calls()[0].messages.len(), 3);
    }

    #[tokio::test]
    async fn test_dropping_stream_cancels_turn_without_writes() {
        let mock = Arc::new(MockLlmClient::new().with_delay(Duration::from_millis(300)));
        let agent = agent_with(&mock).build();

        let mut stream = agent.step("explain the borrow checker").unwrap();
        loop {
            match stream.next_event().await {
                Some(AgentEvent::Thinking { text }) if text == "Reasoning..." => break,
                Some(_) => continue,
                None => panic!("stream ended before model call"),
            }
        }
        drop(stream);

        let session = agent.session_snapshot().await;
        assert_eq!(session.len(), 1);

        let events = run(&agent, "are you still there?").await;
        assert_eq!(
            events.last().unwrap(),
            &AgentEvent::Response {
                text: "Echo from Mock: are you still there?".to_string()
            }
        );
        assert_eq!(agent.session_snapshot().await.len(), 3);
    }

    #[tokio::test]
    async fn test_system_prompt_and_session_controls() {
        let mock = Arc::new(MockLlmClient::new());
        let agent = agent_with(&mock).system_prompt("You are terse.").build();

        run(&agent, "what is a lifetime?").await;
        assert_eq!(agent.session_snapshot().await.len(), 3);
        assert_eq!(mock.calls()[0].messages[0], Message::system("You are terse."));

        agent.clear_session().await;
        assert_eq!(agent.session_snapshot().await.len(), 1);

        let previous = agent.replace_session(Session::new(10, 4)).await;
        assert_eq!(previous.len(), 1);
        assert!(agent.session_snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_turn_stays_busy_until_terminal_event_is_read() {
        let mock = Arc::new(MockLlmClient::new());
        let agent = agent_with(&mock).build();

        let mut first = agent.step("first question please").unwrap();
        // 任务已结束，终止事件还在通道里
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(agent.is_busy());
        assert!(matches!(agent.step("second question"), Err(AgentError::TurnInProgress)));

        loop {
            let event = first.next_event().await.expect("terminal event");
            if event.is_terminal() {
                break;
            }
        }
        assert!(!agent.is_busy());

        let events = collect(agent.step("second question").unwrap()).await;
        assert_single_terminal(&events);
        drop(first);
        assert_eq!(agent.session_snapshot().await.len(), 4);
    }

    #[tokio::test]
    async fn test_panicking_tool_yields_single_error() {
        let mock = Arc::new(
            MockLlmClient::new().with_response(ChatResponse::with_tool_calls("", vec![call("call_b", "boom")])),
        );
        let agent = AgentBuilder::new(mock.clone()).tools(tools_with(BoomTool)).build();

        let events = run(&agent, "run the boom tool now").await;

        assert_single_terminal(&events);
        match events.last().unwrap() {
            AgentEvent::Error { message } => assert!(message.contains("boom exploded"), "{}", message),
            other => panic!("expected error event, got {:?}", other),
        }
        assert_eq!(agent.session_snapshot().await.get_messages(), vec![Message::user("run the boom tool now")]);

        let events = run(&agent, "are you still there?").await;
        assert_single_terminal(&events);
    }

    #[tokio::test]
    async fn test_dropping_stream_during_tool_leaves_only_user_message() {
        let mock = Arc::new(
            MockLlmClient::new().with_response(ChatResponse::with_tool_calls("", vec![call("call_s", "slow")])),
        );
        let agent = AgentBuilder::new(mock.clone()).tools(tools_with(SlowTool)).build();

        let mut stream = agent.step("run the slow tool please").unwrap();
        read_until_thinking(&mut stream, "Executing tools...").await;
        drop(stream);

        let session = agent.session_snapshot().await;
        assert_eq!(session.get_messages(), vec![Message::user("run the slow tool please")]);
        assert_eq!(mock.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_synthesis_failure_keeps_history_through_tool_results() {
        let mock = Arc::new(
            MockLlmClient::new()
                .with_response(ChatResponse::with_tool_calls("", vec![echo_call("call_1", "ping")]))
                .with_error(LlmError::Unavailable("synthesis down".into())),
        );
        let agent = agent_with(&mock).build();

        let events = run(&agent, "please echo ping for me").await;

        assert_eq!(kinds(&events), vec!["tool_call", "tool_result", "error"]);
        let messages = agent.session_snapshot().await.get_messages();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1].tool_calls()[0].id, "call_1");
        assert_eq!(messages[2], Message::tool("call_1", "echo", "ping"));
    }

    #[tokio::test]
    async fn test_tool_unregistered_during_model_call_is_not_dispatched() {
        let mock = Arc::new(
            MockLlmClient::new()
                .with_delay(Duration::from_millis(300))
                .with_response(ChatResponse::with_tool_calls("", vec![echo_call("call_1", "ping")])),
        );
        let tools = echo_tools();
        let agent = AgentBuilder::new(mock.clone()).tools(tools.clone()).build();

        let mut stream = agent.step("please echo ping for me").unwrap();
        read_until_thinking(&mut stream, "Reasoning...").await;
        assert!(tools.unregister("echo"));
        let events: Vec<AgentEvent> = stream.collect().await;

        assert_eq!(kinds(&events), vec!["response"]);
        assert_eq!(mock.calls().len(), 1);
        assert_eq!(agent.session_snapshot().await.len(), 1);
    }

    #[tokio::test]
    async fn test_hooks_fire_around_tool_turn_and_rewrite_arguments() {
        let mock = Arc::new(
            MockLlmClient::new()
                .with_response(ChatResponse::with_tool_calls("", vec![echo_call("call_1", "ping")]))
                .with_text("Echoed."),
        );
        let seen = Arc::new(Mutex::new(Vec::new()));
        let hooks = Arc::new(HookManager::new());
        for event in HookEvent::ALL {
            hooks.register(event, "recorder", 100, Recorder { seen: seen.clone(), rewrite_args: None });
        }
        hooks.register(
            HookEvent::ToolCallBefore,
            "rewrite",
            10,
            Recorder {
                seen: Arc::new(Mutex::new(Vec::new())),
                rewrite_args: Some(json!({"text": "pong"})),
            },
        );
        let agent = agent_with(&mock).hooks(hooks).build();

        let events = run(&agent, "please echo ping for me").await;

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["user_input", "tool_call_before", "tool_call_after", "assistant_response"]
        );
        assert!(events.contains(&AgentEvent::ToolResult {
            name: "echo".to_string(),
            result: "pong".to_string()
        }));
        let messages = agent.session_snapshot().await.get_messages();
        assert_eq!(messages[1].tool_calls()[0].arguments, json!({"text": "pong"}));
        assert_eq!(messages[2], Message::tool("call_1", "echo", "pong"));
    }

    #[tokio::test]
    async fn test_blocking_hooks() {
        let mock = Arc::new(
            MockLlmClient::new()
                .with_response(ChatResponse::with_tool_calls("", vec![echo_call("call_1", "ping")]))
                .with_text("Could not run it."),
        );
        let seen = Arc::new(Mutex::new(Vec::new()));
        let hooks = Arc::new(HookManager::new());
        hooks.register(HookEvent::ToolCallBefore, "no_echo", 0, Blocker("echo disabled"));
        hooks.register(HookEvent::ToolCallError, "recorder", 0, Recorder { seen: seen.clone(), rewrite_args: None });
        hooks.register(HookEvent::Error, "recorder", 0, Recorder { seen: seen.clone(), rewrite_args: None });
        let agent = agent_with(&mock).hooks(hooks.clone()).build();

        let events = run(&agent, "please echo ping for me").await;
        assert!(events.contains(&AgentEvent::ToolResult {
            name: "echo".to_string(),
            result: "Error: Blocked by hook: echo disabled".to_string()
        }));
        assert_eq!(events.last().unwrap(), &AgentEvent::Response { text: "Could not run it.".to_string() });
        assert_eq!(*seen.lock().unwrap(), vec!["tool_call_error"]);

        hooks.register(HookEvent::UserInput, "gate", 0, Blocker("input rejected"));
        agent.clear_session().await;
        let events = run(&agent, "anything at all here").await;
        assert_single_terminal(&events);
        assert_eq!(
            events.last().unwrap(),
            &AgentEvent::Error {
                message: "Blocked by hook: input rejected".to_string()
            }
        );
        assert!(agent.session_snapshot().await.is_empty());
        assert_eq!(mock.calls().len(), 2);
        assert_eq!(*seen.lock().unwrap(), vec!["tool_call_error", "error"]);
    }

    #[tokio::test]
    async fn test_active_skill_prompt_reaches_model_but_not_session() {
        let mock = Arc::new(MockLlmClient::new());
        let skills = Arc::new(SkillRegistry::with_builtins());
        skills.register(Skill::new(
            SkillMeta {
                id: "reader".to_string(),
                name: "Reader".to_string(),
                description: "Needs cat".to_string(),
                version: "1.0.0".to_string(),
                tags: Vec::new(),
                dependencies: Vec::new(),
                tools: vec!["cat".to_string()],
            },
            "Read before answering.",
        ));
        let agent = agent_with(&mock).system_prompt("You are terse.").skills(skills).build();

        assert!(matches!(agent.activate_skill("reader"), Err(SkillError::MissingTool { .. })));
        agent.activate_skill("git_expert").unwrap();
        run(&agent, "what does rebase do?").await;

        let sent = mock.calls()[0].messages[0].content().to_string();
        assert!(sent.starts_with("You are terse.\n\n## Skill: Git expert\n\n"), "{}", sent);
        assert_eq!(agent.session_snapshot().await.get_messages()[0], Message::system("You are terse."));

        assert!(agent.skills().deactivate("git_expert"));
        run(&agent, "and what does merge do?").await;
        assert_eq!(mock.calls()[1].messages[0], Message::system("You are terse."));
    }

    #[tokio::test]
    async fn test_project_context_in_system_prompt_and_reload() {
        let root = tempfile::tempdir().unwrap();
        let file = root.path().join("DRONE.md");
        std::fs::write(&file, "Run cargo test before committing.").unwrap();

        let mock = Arc::new(MockLlmClient::new());
        let agent = agent_with(&mock)
            .system_prompt("Base prompt.")
            .project_context(ProjectContext::load(root.path(), None))
            .build();

        let system = agent.session_snapshot().await.get_messages()[0].content().to_string();
        assert!(system.starts_with("Base prompt.\n\n## Project Context (from DRONE.md)"), "{}", system);
        assert!(system.contains("Run cargo test before committing."));

        run(&agent, "how do I commit here?").await;
        std::fs::write(&file, "Run make check instead.").unwrap();
        let summary = agent.reload_project_context().await.expect("project context configured");
        assert!(summary.starts_with("Loaded 1 DRONE.md file(s):"));

        let messages = agent.session_snapshot().await.get_messages();
        assert_eq!(messages.len(), 3);
        assert!(messages[0].content().contains("Run make check instead."));
        assert!(!messages[0].content().contains("Run cargo test"));

        let plain = agent_with(&mock).build();
        assert!(plain.reload_project_context().await.is_none());
    }
}
