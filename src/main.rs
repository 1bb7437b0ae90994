use anyhow::Result;
use clap::Parser;
use futures::StreamExt;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_stream::wrappers::UnboundedReceiverStream;

use seekchat::commands::{self, Input};
use seekchat::config::Config;
use seekchat::console::Console;
use seekchat::logging::init_logging;
use seekchat::worker::{RequestWorker, WorkerEvent, WorkerHandle};

#[derive(Parser, Debug)]
#[command(name = "seekchat", version, about = "Chat with an OpenAI-compatible endpoint from the terminal")]
struct Cli {
    /// Read configuration from this file instead of the per-user config.toml
    #[arg(long)]
    config: Option<PathBuf>,

    /// Model name to request
    #[arg(long)]
    model: Option<String>,

    /// Request one JSON response instead of an event stream
    #[arg(long)]
    no_stream: bool,

    /// Skip TLS certificate verification (unsafe)
    #[arg(long)]
    insecure: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    }
    .with_env_overrides();
    if let Some(model) = cli.model {
        config.model = model;
    }
    if cli.no_stream {
        config.stream = false;
    }
    if cli.insecure {
        config.accept_invalid_certs = true;
    }

    match init_logging(&config.log_level) {
        Ok(Some(path)) => tracing::info!(log = %path.display(), "logging initialised"),
        Ok(None) => {}
        Err(e) => eprintln!("Warning: file logging disabled: {}", e),
    }
    if config.api_key.is_empty() {
        eprintln!(
            "Warning: no API key configured; set {} or api_key in config.toml",
            seekchat::config::API_KEY_ENV
        );
    }

    let (worker, events) = RequestWorker::spawn(config)?;
    let res = run(worker.handle(), events).await;

    tokio::task::spawn_blocking(move || worker.shutdown()).await??;
    res
}

async fn run(
    handle: WorkerHandle,
    events: tokio::sync::mpsc::UnboundedReceiver<WorkerEvent>,
) -> Result<()> {
    let mut events = UnboundedReceiverStream::new(events);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let mut console = Console::default();
    let mut last_prompt: Option<String> = None;
    let mut input_closed = false;

    loop {
        if input_closed && console.is_idle() {
            return Ok(());
        }

        tokio::select! {
            line = lines.next_line(), if !input_closed => {
                let Some(line) = line? else {
                    // Let the request in flight finish before exiting.
                    input_closed = true;
                    continue;
                };
                let prompt = match commands::parse_line(&line) {
                    Ok(Input::Quit) => return Ok(()),
                    Ok(Input::Stop) => {
                        stop(&handle).await?;
                        continue;
                    }
                    Ok(Input::Prompt(prompt)) => prompt,
                    Ok(Input::Retry) => match &last_prompt {
                        Some(prompt) => {
                            eprintln!("[regenerate]: {}", prompt);
                            prompt.clone()
                        }
                        None => {
                            eprintln!("Nothing to regenerate yet.");
                            continue;
                        }
                    },
                    Ok(Input::Example(index)) => {
                        let Some(prompt) = commands::example_prompt(index) else {
                            continue;
                        };
                        eprintln!("[example]: {}", prompt);
                        prompt.to_string()
                    }
                    Err(e) => {
                        eprintln!("{}", e);
                        continue;
                    }
                };

                let request = seek(&handle, &prompt).await?;
                console.begin(request);
                last_prompt = Some(prompt);
            }
            Some(event) = events.next() => {
                if let Some(text) = console.render(&event) {
                    stdout.write_all(text.as_bytes()).await?;
                    stdout.flush().await?;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                if console.is_idle() {
                    return Ok(());
                }
                stop(&handle).await?;
            }
        }
    }
}

async fn seek(handle: &WorkerHandle, prompt: &str) -> Result<u64> {
    let handle = handle.clone();
    let prompt = prompt.to_string();
    tokio::task::spawn_blocking(move || handle.seek(&prompt)).await?
}

async fn stop(handle: &WorkerHandle) -> Result<()> {
    let handle = handle.clone();
    tokio::task::spawn_blocking(move || handle.stop()).await?
}
