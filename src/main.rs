//! text2sql - batch entry point
//!
//! Loads a task batch (or decomposes `QUESTION` into one), runs it through
//! the verification pipeline and prints the final answer. The batch file is
//! rewritten after every task.

use std::sync::Arc;

use anyhow::Context;
use text2sql::agents::{LlmGenerator, LlmVerifier, QueryDecomposer, TaskOrchestrator};
use text2sql::config::Config;
use text2sql::llm::OpenAiClient;
use text2sql::mcp::StdioConnector;
use text2sql::task::{BatchContext, TaskStore};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "text2sql=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;
    info!(
        "Loaded configuration: model={}, attempts={}, scope={:?}",
        config.default_model, config.max_attempts, config.session_scope
    );

    let retrieved = match &config.context_file {
        Some(path) => Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read context file {}", path.display()))?,
        ),
        None => None,
    };

    let llm = Arc::new(OpenAiClient::new(
        config.api_key.clone(),
        &config.base_url,
        config.request_timeout,
    ));

    let store = TaskStore::new(&config.task_file);
    let batch = match &config.question {
        Some(question) => {
            let decomposer =
                QueryDecomposer::new(llm.clone(), config.default_model.clone(), config.language);
            let batch = decomposer
                .decompose(question, retrieved.as_deref())
                .await
                .context("Failed to decompose question")?;
            store.save(&batch).await?;
            info!("Wrote {} planned tasks to {}", batch.len(), store.path().display());
            batch
        }
        None => {
            let batch = store.load().await?;
            info!("Loaded {} tasks from {}", batch.len(), store.path().display());
            batch
        }
    };
    let mut context = BatchContext::new(retrieved);
    let generator = Arc::new(LlmGenerator::new(
        llm.clone(),
        config.default_model.clone(),
        config.language,
    ));
    let verifier = Arc::new(
        LlmVerifier::new(llm, config.default_model.clone())
            .with_max_tool_rounds(config.max_tool_rounds),
    );
    let connector = Arc::new(StdioConnector::new(
        config.mcp.launch_spec(),
        config.mcp.tool_call_timeout,
    ));

    let orchestrator = TaskOrchestrator::new(generator, verifier, connector)
        .with_store(store)
        .with_max_attempts(config.max_attempts)
        .with_session_scope(config.session_scope);

    let report = orchestrator.execute_tasks(batch, &mut context).await?;

    let matched = report
        .outcomes
        .iter()
        .filter(|(_, o)| matches!(o, Ok(outcome) if outcome.is_matched()))
        .count();
    info!(
        "Batch finished: {} matched, {} unresolved, {} failed",
        matched,
        report.outcomes.len() - matched - report.failures(),
        report.failures()
    );

    println!("SQL: {}", report.final_sql);
    println!("Result: {}", report.final_result);
    Ok(())
}
