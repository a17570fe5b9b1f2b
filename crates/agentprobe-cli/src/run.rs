use agentprobe_core::builtin::build_agent;
use agentprobe_core::error::Result;
use agentprobe_core::{
    Instrumentation, JsonlStorage, RunConfig, Runner, TracerConfig, create_tracer,
    default_output_path, load_dataset,
};
use tracing::info;

use crate::RunArgs;

pub async fn execute(args: RunArgs) -> Result<()> {
    // Everything that can be misconfigured is resolved before the first item runs.
    let dataset = load_dataset(&args.dataset)?;
    let config = match &args.config {
        Some(path) => RunConfig::from_file(path)?,
        None => RunConfig::default(),
    };
    let config_hash = config.hash();

    let tracer_config = TracerConfig::from_env(
        args.tracer.as_deref(),
        args.spans_path.clone(),
        &args.results_dir.join("spans.jsonl"),
    )?;
    let tracer = create_tracer(&tracer_config)?;
    info!(tracer = tracer_config.name(), "Tracer ready");

    let output = args
        .output
        .clone()
        .unwrap_or_else(|| default_output_path(&args.results_dir, &dataset.id, &config_hash));
    let storage = JsonlStorage::create(output)?;

    let instrumentation = Instrumentation::new(tracer.clone());
    let agent = build_agent(&args.agent, &config, &instrumentation)?;

    let mut runner = Runner::new(agent, tracer, storage)
        .dataset_id(dataset.id.clone())
        .config(config);
    if let Some(limit) = args.limit {
        runner = runner.limit(limit);
    }

    info!(
        dataset = %dataset.id,
        items = dataset.len(),
        agent = %args.agent,
        config_hash = runner.config_hash(),
        "Starting run"
    );
    let summary = runner.run(&dataset.items).await?;
    println!("{summary}");
    Ok(())
}
