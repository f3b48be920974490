use anyhow::Context;
use clap::Parser;
use credit_rag::cli::{Cli, Command};
use credit_rag::logging::{default_log_directory, init_logging};
use credit_rag::rag::search::SourceCitation;
use credit_rag::IndexService;
use tracing::warn;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.resolve_config().context("invalid configuration")?;

    let log_dir = config
        .log_directory
        .clone()
        .unwrap_or_else(default_log_directory);
    let _guard = init_logging(&log_dir)
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {}", e))?;

    let service = IndexService::from_config(config)?;

    if cli.command.needs_initialize() {
        if let Err(e) = service.initialize().await {
            if !cli.command.continues_after_init_failure(&e) {
                return Err(e).context("failed to initialize index");
            }
            warn!(error = %e, "Starting without an index");
        }
    }

    match cli.command {
        Command::Query { question, json } => {
            let result = service.query(&question).await;
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("{}\n", result.answer);
                if !result.sources.is_empty() {
                    println!("Sources:");
                    for (i, source) in result.sources.iter().enumerate() {
                        println!("  {}. {}", i + 1, describe(source));
                    }
                }
            }
        }
        Command::Refresh => {
            match service.refresh().await {
                Ok(()) => {}
                Err(e) if e.is_empty_corpus() => warn!(error = %e, "Nothing to index"),
                Err(e) => return Err(e).context("refresh failed"),
            }
            println!("{}", serde_json::to_string_pretty(&service.status().await)?);
        }
        Command::Status => {
            println!("{}", serde_json::to_string_pretty(&service.status().await)?);
        }
        Command::Search { text, k } => {
            let results = service.search(&text, k).await?;
            for result in &results {
                let citation = SourceCitation::from_result(result);
                println!("{:.4}  {}", result.score, describe(&citation));
                println!("        {}", citation.content_preview.replace('\n', " "));
            }
        }
    }

    Ok(())
}

fn describe(source: &SourceCitation) -> String {
    let mut line = format!("{} ({})", source.filename, source.document_type);
    if let Some(section) = &source.section {
        line.push_str(&format!(", {}", section));
    }
    if let Some(page) = source.page {
        line.push_str(&format!(", Page {}", page));
    }
    line
}
