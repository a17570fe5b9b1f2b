use agentprobe_core::builtin::{ChatCompletionsLlm, build_agent};
use agentprobe_core::error::ProbeError;
use agentprobe_core::{
    ChatMessage, CompletionRequest, Instrumentation, JsonlStorage, Llm, ParseMode, RunConfig,
    Runner, Tracer, load_dataset,
};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(server: &MockServer) -> RunConfig {
    RunConfig::from_value(json!({
        "name": "direct-gpt",
        "model": "gpt-4o-mini",
        "base_url": server.uri(),
        "api_key": "test-key",
        "temperature": 0.0,
        "instructions": "Answer tersely."
    }))
    .unwrap()
}

#[tokio::test]
async fn test_chat_completion_reports_usage() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("Authorization", "Bearer test-key"))
        .and(body_partial_json(json!({"model": "gpt-4o-mini", "temperature": 0.0})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": "4"}}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 1, "total_tokens": 13}
        })))
        .mount(&mock_server)
        .await;

    let llm = ChatCompletionsLlm::from_config(&config_for(&mock_server)).unwrap();
    assert_eq!(llm.model(), "gpt-4o-mini");
    let completion = llm
        .completion(CompletionRequest::new(vec![ChatMessage::user("2+2?")]))
        .await
        .unwrap();
    assert_eq!(completion.text, "4");
    let usage = completion.usage.unwrap();
    assert_eq!((usage.prompt_tokens, usage.completion_tokens), (12, 1));
}

#[tokio::test]
async fn test_chat_completion_error_carries_status() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": {"message": "Incorrect API key provided"}
        })))
        .mount(&mock_server)
        .await;

    let llm = ChatCompletionsLlm::from_config(&config_for(&mock_server)).unwrap();
    let err = llm
        .completion(CompletionRequest::new(vec![ChatMessage::user("hi")]))
        .await
        .unwrap_err();
    match err {
        ProbeError::Llm { message, status } => {
            assert_eq!(status, Some(401));
            assert!(message.contains("Incorrect API key"));
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn test_invalid_base_url_fails_fast() {
    let config = RunConfig::from_value(json!({"base_url": "not a url"})).unwrap();
    let err = ChatCompletionsLlm::from_config(&config).err().unwrap();
    assert!(matches!(err, ProbeError::Configuration { .. }));
}

#[tokio::test]
async fn test_direct_profile_end_to_end() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({
            "messages": [{"role": "system", "content": "Answer tersely."}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": "Paris"}}],
            "usage": {"prompt_tokens": 20, "completion_tokens": 2}
        })))
        .mount(&mock_server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let dataset_path = dir.path().join("capitals.jsonl");
    std::fs::write(
        &dataset_path,
        "{\"goal\": \"Capital of France?\", \"expected\": \"Paris\"}\n{\"id\": \"de\", \"goal\": \"Capital of Germany?\"}\n",
    )
    .unwrap();
    let dataset = load_dataset(&dataset_path).unwrap();
    assert_eq!(dataset.id, "capitals");

    let tracer = Tracer::noop();
    let config = config_for(&mock_server);
    let agent = build_agent("direct", &config, &Instrumentation::new(tracer.clone())).unwrap();
    assert_eq!(agent.name(), "direct-gpt");

    let storage = JsonlStorage::create(dir.path().join("out.jsonl")).unwrap();
    let runner = Runner::new(agent, tracer, storage)
        .dataset_id(dataset.id.clone())
        .config(config);
    let summary = runner.run(&dataset.items).await.unwrap();
    assert_eq!((summary.processed, summary.failed), (2, 0));

    let records = runner.storage().read_all(ParseMode::Strict).unwrap();
    assert_eq!(records[0].item_id.as_deref(), Some("0"));
    assert_eq!(records[1].item_id.as_deref(), Some("de"));
    assert_eq!(records[0].expected, Some(json!("Paris")));
    assert_eq!(records[0].tokens_total, Some(22));
    assert_eq!(records[0].result, Some(json!("Paris")));
}

#[tokio::test]
async fn test_echo_profile_needs_no_llm() {
    let agent = build_agent("echo", &RunConfig::default(), &Instrumentation::default()).unwrap();
    let result = agent.solve("ping").await.unwrap();
    assert!(result.success);
    assert_eq!(result.output, "ping");
}
