//! Interactive console for the game-master core
//!
//! Not the product UI; a development driver that exercises the full
//! stack: config, server detection, model listing, streaming chat, and
//! the web-search approval gate.

use anyhow::Result;
use async_trait::async_trait;
use clap::Parser;
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

use wyrm_agent::{
    ChatRequest, Deps, Orchestrator, PassthroughFinalizer, ProviderConfig, ProviderSummarizer,
    RetryConfig, SearchHit, SearchProvider, StreamCallbacks, TokenBudget, UiEvent,
};
use wyrm_ai::{
    ChatProvider, CloudClient, Lifecycle, OllamaClient, PerformanceTier,
    catalog::MODEL_CATALOG,
};

#[derive(Parser)]
#[command(name = "wyrm", about = "AI game-master console", version)]
struct Args {
    /// Server URL override
    #[arg(long)]
    server: Option<String>,

    /// Model override
    #[arg(long)]
    model: Option<String>,

    /// Use a hosted OpenAI-compatible endpoint instead of the local server
    #[arg(long)]
    cloud_url: Option<String>,

    /// API key for the hosted endpoint
    #[arg(long)]
    cloud_key: Option<String>,

    /// Probe the local server install and hardware fit, then exit
    #[arg(long)]
    detect: bool,

    /// List the server's models, then exit
    #[arg(long)]
    list_models: bool,
}

/// Search collaborator for the console: the console has no search index,
/// so every approved search comes back empty.
struct NoSearch;

#[async_trait]
impl SearchProvider for NoSearch {
    async fn search(&self, _query: &str, _limit: usize) -> wyrm_agent::Result<Vec<SearchHit>> {
        Ok(vec![])
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();

    let mut config = ProviderConfig::load();
    if let Some(server) = args.server {
        config.server_url = server;
    }
    if let Some(model) = args.model {
        config.model = model;
    }

    if args.detect {
        return detect(&config).await;
    }

    let provider: Arc<dyn ChatProvider> = match (&args.cloud_url, &args.cloud_key) {
        (Some(url), Some(key)) => Arc::new(CloudClient::new(url.clone(), key.clone())),
        (Some(_), None) => anyhow::bail!("--cloud-url requires --cloud-key"),
        _ => Arc::new(OllamaClient::new(&config.server_url)),
    };

    if args.list_models {
        let models = provider.list_models().await?;
        for model in models {
            println!("{}", model.name);
        }
        return Ok(());
    }

    if !provider.is_running().await {
        eprintln!(
            "warning: no inference server answering at {}",
            config.server_url
        );
    }

    let summarizer = Arc::new(ProviderSummarizer::new(
        Arc::clone(&provider),
        config.model.clone(),
    ));
    let deps = Deps {
        provider,
        search: Arc::new(NoSearch),
        retrieval: Arc::new(wyrm_agent::NullIndex),
        finalizer: Arc::new(PassthroughFinalizer),
        summarizer: Some(summarizer),
        budget: TokenBudget::default(),
        retry: RetryConfig::default(),
    };
    let orchestrator = Orchestrator::with_config(deps, config.clone());

    println!("wyrm console: model {} at {}", config.model, config.server_url);
    println!("type a message, or /quit to leave\n");

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = stdin.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" || line == "/exit" {
            break;
        }

        run_turn(&orchestrator, line, &mut stdin).await;
    }

    Ok(())
}

async fn run_turn(
    orchestrator: &Orchestrator,
    message: &str,
    stdin: &mut Lines<BufReader<Stdin>>,
) {
    let callbacks = StreamCallbacks {
        on_chunk: Box::new(|text| {
            print!("{}", text);
            let _ = std::io::stdout().flush();
        }),
        on_done: Box::new(|_response| println!()),
        on_error: Box::new(|message| eprintln!("\nerror: {}", message)),
    };

    // Subscribe before starting so no approval request is missed; the
    // StreamEnded notice covers every exit path.
    let mut events = orchestrator.subscribe_events();
    let id = orchestrator.start_chat(
        ChatRequest {
            session_id: "console".into(),
            message: message.into(),
            context_text: String::new(),
            chunk_ids: vec![],
        },
        callbacks,
    );

    while let Ok(event) = events.recv().await {
        match event {
            UiEvent::WebSearchApprovalRequest { stream_id, query } if stream_id == id => {
                println!(
                    "\nthe narrator wants to search the web for \"{}\" -- allow? [y/N]",
                    query
                );
                let answer = stdin.next_line().await.ok().flatten().unwrap_or_default();
                let approved = matches!(answer.trim(), "y" | "Y" | "yes");
                orchestrator.approve_web_search(&id, approved);
            }
            UiEvent::StreamEnded { stream_id } if stream_id == id => break,
            _ => {}
        }
    }
}

async fn detect(config: &ProviderConfig) -> Result<()> {
    let lifecycle = Lifecycle::new(&config.server_url);
    let status = lifecycle.detect().await;

    println!("installed: {}", status.installed);
    println!("running:   {}", status.running);
    if let Some(path) = status.path {
        println!("binary:    {}", path.display());
    }

    let memory = Lifecycle::system_memory_mb().await;
    if memory == 0 {
        println!("gpu:       none detected");
        return Ok(());
    }
    println!("gpu:       {} MB", memory);

    for spec in MODEL_CATALOG {
        let tier = PerformanceTier::classify(memory, spec.memory_mb);
        println!("  {:<14} {:?}", spec.name, tier);
    }

    let update = lifecycle.check_for_update().await;
    if update.update_available {
        println!(
            "update:    {} -> {}",
            update.installed.as_deref().unwrap_or("unknown"),
            update.latest.as_deref().unwrap_or("unknown")
        );
    }

    Ok(())
}
