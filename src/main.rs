use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use mail_assist::agents::LlmAgents;
use mail_assist::config::{AppConfig, DispatchMode};
use mail_assist::knowledge::KnowledgeBase;
use mail_assist::llm::create_provider;
use mail_assist::mail::create_mail_backend;
use mail_assist::workflow::{OutcomeKind, RunSummary, Workflow};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("failed to load configuration")?;

    // Keep the guard alive so buffered log lines are flushed on exit.
    let _log_guard = init_tracing(&config);

    eprintln!("📬 Mail Assist v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Mailbox: {} ({})", config.mailbox.address, config.mailbox.service);
    eprintln!("   Model: {}", config.llm.model);
    eprintln!(
        "   Dispatch: {}",
        match config.workflow.dispatch {
            DispatchMode::Draft => "create drafts",
            DispatchMode::Send => "send replies",
        }
    );

    // ── LLM + collaborators ─────────────────────────────────────────────
    let llm = create_provider(&config.llm).context("failed to create LLM provider")?;
    let mut agents = LlmAgents::new(llm);

    if let Some(dir) = &config.knowledge_dir {
        let kb = KnowledgeBase::load(dir)
            .await
            .with_context(|| format!("failed to load knowledge base from {}", dir.display()))?;
        eprintln!("   Knowledge: {} chunks from {}", kb.len(), dir.display());
        agents = agents.with_knowledge(Arc::new(kb));
    } else {
        eprintln!("   Knowledge: none");
    }

    // ── Mailbox ─────────────────────────────────────────────────────────
    let mailbox = create_mail_backend(&config.mailbox).context("failed to create mail backend")?;

    let workflow = Workflow::new(Arc::new(agents), Arc::new(mailbox), config.workflow.clone());

    match config.poll_interval {
        None => {
            let summary = workflow.run().await?;
            report(&summary);
        }
        Some(period) => {
            eprintln!("   Polling every {}s. Ctrl-C to stop.\n", period.as_secs());
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match workflow.run().await {
                            Ok(summary) => report(&summary),
                            Err(e) => tracing::error!(error = %e, "Workflow run failed"),
                        }
                    }
                    _ = tokio::signal::ctrl_c() => {
                        tracing::info!("Shutting down");
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}

fn init_tracing(config: &AppConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "mail-assist.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry().with(filter).with(stderr).init();
            None
        }
    }
}

fn report(summary: &RunSummary) {
    tracing::info!(
        fetched = summary.fetched,
        drafted = summary.count(|k| *k == OutcomeKind::Drafted),
        sent = summary.count(|k| *k == OutcomeKind::Sent),
        skipped = summary.count(|k| *k == OutcomeKind::Skipped),
        discarded = summary.count(|k| *k == OutcomeKind::Discarded),
        failed = summary.count(|k| matches!(k, OutcomeKind::DispatchFailed { .. })),
        "Run summary"
    );
}
