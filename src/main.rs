use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use analysis_agent_service::engine::AgentService;
use analysis_agent_service::index::HashingEmbedder;
use analysis_agent_service::ingest::CsvParser;
use analysis_agent_service::models::QueryRequest;
use analysis_agent_service::reasoner::GeminiReasoner;
use analysis_agent_service::settings::Settings;

/// One-shot runner: upload a spreadsheet, ask one question, print the
/// answer and the execution trace.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::from_env()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("analysis_agent_service={}", settings.log_level.to_lowercase()).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Analysis Agent Service v0.1.0");
    info!("Configuration loaded:");
    info!("  Model: {}", settings.model_name);
    info!("  Max iterations: {}", settings.max_iterations);
    info!("  Retrieval k: {}", settings.retrieval_k);
    info!("  Upload dir: {}", settings.upload_dir);

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        bail!("usage: {} <spreadsheet.csv> <question> [sheet name]", args[0]);
    }
    let file_path = &args[1];
    let question = &args[2];
    let sheet_name = args.get(3).cloned();

    let bytes = tokio::fs::read(file_path)
        .await
        .with_context(|| format!("could not read '{}'", file_path))?;
    let filename = Path::new(file_path)
        .file_name()
        .and_then(|n| n.to_str())
        .context("file path has no filename component")?;

    // Keep a copy of what was analyzed next to the run.
    tokio::fs::create_dir_all(&settings.upload_dir).await?;
    tokio::fs::write(Path::new(&settings.upload_dir).join(filename), &bytes).await?;

    let reasoner = Arc::new(GeminiReasoner::new(&settings)?);
    let service = AgentService::new(
        settings,
        Box::new(CsvParser),
        reasoner,
        Arc::new(HashingEmbedder),
    );

    let uploaded = service.upload(filename, &bytes).await?;
    info!(
        "Uploaded '{}' as {} ({} columns indexed)",
        uploaded.filename, uploaded.dataset_id, uploaded.indexed_columns
    );

    let response = service
        .query(QueryRequest {
            dataset_id: uploaded.dataset_id,
            query: question.clone(),
            sheet_name,
        })
        .await?;

    for step in &response.execution_steps {
        println!("[step {}] {}", step.step, step.thought);
        if let Some(action) = &step.action {
            println!("  action: {}", action);
            if let Some(input) = &step.action_input {
                println!("  input: {}", input);
            }
        }
        println!("  observation: {}", step.observation);
    }
    println!();
    println!(
        "{} (after {} iterations)",
        if response.success { "Answer" } else { "Incomplete" },
        response.iterations
    );
    println!("{}", response.answer);

    Ok(())
}
