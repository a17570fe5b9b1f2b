use agentprobe_core::error::{ProbeError, Result};
use agentprobe_core::exporters::InMemoryExporter;
use agentprobe_core::instrument::AGENT_SPAN;
use agentprobe_core::{
    Agent, ChatMessage, Completion, CompletionRequest, DatasetItem, Instrumentation, JsonlStorage,
    Llm, ParseMode, ReasoningResult, RunConfig, Runner, Tracer, TracerConfig, Usage,
    create_tracer, summarize,
};
use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::{Map, json};
use std::path::Path;
use std::sync::Arc;

struct StubLlm;

#[async_trait]
impl Llm for StubLlm {
    fn model(&self) -> &str {
        "stub"
    }

    async fn completion(&self, _request: CompletionRequest) -> Result<Completion> {
        Ok(Completion {
            text: "ok".into(),
            usage: Some(Usage::new(10, 5)),
        })
    }
}

/// Calls the LLM once per goal. Goals containing "explode" fail after the
/// call; goals containing "panic" panic.
struct ScriptedAgent {
    llm: Arc<dyn Llm>,
}

#[async_trait]
impl Agent for ScriptedAgent {
    fn name(&self) -> &str {
        "scripted"
    }

    fn version(&self) -> &str {
        "0.1.0"
    }

    async fn solve(&self, goal: &str) -> Result<ReasoningResult> {
        let completion = self
            .llm
            .completion(CompletionRequest::new(vec![ChatMessage::user(goal)]))
            .await?;
        if goal.contains("explode") {
            return Err(ProbeError::agent(format!("tool exploded on '{goal}'")));
        }
        if goal.contains("panic") {
            panic!("agent bug");
        }
        Ok(ReasoningResult::success(completion.text))
    }
}

fn items(goals: &[&str]) -> Vec<DatasetItem> {
    goals
        .iter()
        .enumerate()
        .map(|(i, g)| DatasetItem {
            id: i.to_string(),
            goal: g.to_string(),
            expected: Some(json!("ok")),
            metadata: Map::new(),
        })
        .collect()
}

fn scripted(tracer: &Tracer) -> Arc<dyn Agent> {
    let llm = Instrumentation::new(tracer.clone()).llm(Arc::new(StubLlm));
    Arc::new(ScriptedAgent { llm })
}

fn dir_entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn test_three_items_one_failure() {
    let dir = tempfile::tempdir().unwrap();
    let storage = JsonlStorage::create(dir.path().join("runs.jsonl")).unwrap();
    let tracer = Tracer::noop();

    let runner = Runner::new(scripted(&tracer), tracer, storage).dataset_id("smoke");
    let summary = runner
        .run(&items(&["first", "second", "explode please"]))
        .await
        .unwrap();
    assert_eq!((summary.processed, summary.succeeded, summary.failed), (3, 2, 1));

    let records = runner.storage().read_all(ParseMode::Strict).unwrap();
    assert_eq!(records.len(), 3);
    for r in &records[..2] {
        assert!(r.success);
        assert_eq!(r.tokens_prompt, Some(10));
        assert_eq!(r.tokens_completion, Some(5));
        assert_eq!(r.tokens_total, Some(15));
        assert_eq!(r.errors, None);
        assert_eq!(r.result, Some(json!("ok")));
        assert_eq!(r.agent_name, "scripted");
        assert_eq!(r.agent_version, "0.1.0");
        assert_eq!(r.dataset_id.as_deref(), Some("smoke"));
    }
    let failed = &records[2];
    assert!(!failed.success);
    let errors = failed.errors.as_ref().unwrap();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("tool exploded"));
    assert_eq!(failed.item_id.as_deref(), Some("2"));

    let ids: std::collections::HashSet<_> = records.iter().map(|r| r.run_id.as_str()).collect();
    assert_eq!(ids.len(), 3);
}

#[tokio::test]
async fn test_panicking_agent_is_recorded_and_batch_continues() {
    let dir = tempfile::tempdir().unwrap();
    let storage = JsonlStorage::create(dir.path().join("runs.jsonl")).unwrap();
    let exporter = Arc::new(InMemoryExporter::new());
    let tracer = Tracer::new(exporter.clone());

    let runner = Runner::new(scripted(&tracer), tracer, storage);
    let summary = runner.run(&items(&["panic now", "fine"])).await.unwrap();
    assert_eq!((summary.processed, summary.failed), (2, 1));

    let records = runner.storage().read_all(ParseMode::Strict).unwrap();
    assert!(records[0].errors.as_ref().unwrap()[0].contains("agent bug"));
    assert!(records[1].success);

    let roots: Vec<_> = exporter
        .spans()
        .into_iter()
        .filter(|s| s.name == AGENT_SPAN)
        .collect();
    assert_eq!(roots.len(), 2);
    assert_eq!(
        roots[0].error.as_deref(),
        Some("span dropped before completion")
    );
}

#[tokio::test]
async fn test_noop_tracer_writes_nothing_but_records_persist() {
    let dir = tempfile::tempdir().unwrap();
    let results = dir.path().join("results");
    let spans_path = results.join("spans.jsonl");

    let tracer_config =
        TracerConfig::from_lookup(None, None, &spans_path, |_| None).unwrap();
    let tracer = create_tracer(&tracer_config).unwrap();
    assert!(!tracer.is_recording());

    let storage = JsonlStorage::create(results.join("runs.jsonl")).unwrap();
    let runner = Runner::new(scripted(&tracer), tracer, storage);

    let goals: Vec<String> = (0..100).map(|i| format!("goal {i}")).collect();
    let goal_refs: Vec<&str> = goals.iter().map(String::as_str).collect();
    let summary = runner.run(&items(&goal_refs)).await.unwrap();
    assert_eq!(summary.processed, 100);

    assert_eq!(dir_entries(&results), vec!["runs.jsonl".to_string()]);
    let records = runner.storage().read_all(ParseMode::Strict).unwrap();
    assert_eq!(records.len(), 100);
    assert!(records.iter().all(|r| r.trace_ids.is_none()));
}

#[tokio::test]
async fn test_recording_tracer_links_records_to_traces() {
    let dir = tempfile::tempdir().unwrap();
    let storage = JsonlStorage::create(dir.path().join("runs.jsonl")).unwrap();
    let exporter = Arc::new(InMemoryExporter::new());
    let tracer = Tracer::new(exporter.clone());

    let runner = Runner::new(scripted(&tracer), tracer, storage);
    runner.run(&items(&["one"])).await.unwrap();

    let record = &runner.storage().read_all(ParseMode::Strict).unwrap()[0];
    let spans = exporter.spans();
    let root = spans.iter().find(|s| s.name == AGENT_SPAN).unwrap();
    assert_eq!(record.trace_ids, Some(vec![root.context.trace_id.clone()]));
    assert_eq!(root.run_id(), Some(record.run_id.as_str()));
    assert_eq!(
        root.attributes.get("item_id"),
        Some(&agentprobe_core::AttributeValue::from("0"))
    );
}

#[tokio::test]
async fn test_limit_and_config_hash() {
    let dir = tempfile::tempdir().unwrap();
    let storage = JsonlStorage::create(dir.path().join("runs.jsonl")).unwrap();
    let tracer = Tracer::noop();
    let config = RunConfig::from_json(
        r#"{"model": "gpt-4o-mini", "temperature": 0, "api_key": "sk-secret"}"#,
    )
    .unwrap();
    let expected_hash = agentprobe_core::config_hash(&json!({
        "temperature": 0,
        "model": "gpt-4o-mini"
    }));

    let runner = Runner::new(scripted(&tracer), tracer, storage)
        .config(config)
        .agent_name("rewoo")
        .limit(2);
    assert_eq!(runner.config_hash(), expected_hash);

    let summary = runner.run(&items(&["a", "b", "c", "d"])).await.unwrap();
    assert_eq!(summary.processed, 2);

    let records = runner.storage().read_all(ParseMode::Strict).unwrap();
    assert_eq!(records.len(), 2);
    for r in &records {
        assert_eq!(r.config_hash, expected_hash);
        assert_eq!(r.agent_name, "rewoo");
        let cfg = r.agent_config.as_ref().unwrap();
        assert!(cfg.get("api_key").is_none());
        assert_eq!(cfg["model"], json!("gpt-4o-mini"));
        assert!(r.runtime_env.as_ref().unwrap().contains_key("os"));
    }
}

#[tokio::test]
async fn test_storage_failure_aborts_the_batch() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, "").unwrap();
    let storage = JsonlStorage::new(blocker.join("runs.jsonl"));
    let exporter = Arc::new(InMemoryExporter::new());
    let tracer = Tracer::new(exporter.clone());

    let runner = Runner::new(scripted(&tracer), tracer, storage);
    let err = runner.run(&items(&["a", "b"])).await.unwrap_err();
    assert!(matches!(err, ProbeError::StorageIo { .. }));
    assert!(err.is_fatal_to_batch());

    // The first item ran and its spans were exported; the second never started.
    let roots = exporter
        .spans()
        .into_iter()
        .filter(|s| s.name == AGENT_SPAN)
        .count();
    assert_eq!(roots, 1);
}

#[tokio::test]
async fn test_runs_aggregate_by_agent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("runs.jsonl");
    let tracer = Tracer::noop();

    let rewoo = Runner::new(scripted(&tracer), tracer.clone(), JsonlStorage::new(&path))
        .agent_name("rewoo");
    rewoo
        .run(&items(&["a", "b", "explode", "c", "d"]))
        .await
        .unwrap();
    let react = Runner::new(scripted(&tracer), tracer, JsonlStorage::new(&path))
        .agent_name("react");
    react
        .run(&items(&["explode", "a", "explode"]))
        .await
        .unwrap();

    let records = JsonlStorage::new(&path).read_all(ParseMode::Strict).unwrap();
    let summary = summarize(&records, &["agent_name"]).unwrap();
    assert!((summary.group(&["rewoo"]).unwrap().success_rate - 0.8).abs() < 1e-9);
    assert!((summary.group(&["react"]).unwrap().success_rate - 1.0 / 3.0).abs() < 1e-9);
}
