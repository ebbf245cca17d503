use chatterbox::config::{Config, DEFAULT_CONFIG_PATH, LlmProvider};
use chatterbox::llm::{LLMFactory, adapters::gemini_agent};
use chatterbox::mail::{GmailTransportBuilder, MailTransport};
use chatterbox::shutdown::{CombinedShutdown, CtrlCShutdown, DurationBudget};
use chatterbox::utils::google_auth::GConf;
use chatterbox::{ContextHub, ConversationStore, PollerBuilder};
use clap::{Parser, Subcommand};
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "chatterbox", version, about = "Stores tagged emails as conversations")]
struct Cli {
    /// Path of the TOML configuration file.
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Poll until Ctrl-C or the configured run duration elapses (default).
    Run,
    /// Run a single poll cycle and exit.
    PollOnce,
    /// List the distinct attachments stored in a conversation.
    ListAttachments { conversation_id: String },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        error!(error = %e, "chatterbox failed");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let config = if cli.config.exists() {
        Config::load(&cli.config)?
    } else {
        info!(path = %cli.config.display(), "No config file found, using defaults");
        Config::default()
    };

    match cli.command.unwrap_or(Command::Run) {
        Command::ListAttachments { conversation_id } => {
            let store = ConversationStore::new(&config.paths.interactions_dir);
            for attachment in store.unique_attachments(&conversation_id).await? {
                println!(
                    "{}\t{}\t{}\t{}",
                    attachment.turn, attachment.size_bytes, attachment.sha256, attachment.filename
                );
            }
        }
        Command::PollOnce => {
            let mut poller = poller_builder(&config).await?.build()?;
            let report = poller.poll_once().await?;
            info!(
                cycle = report.cycle,
                cursor = %report.cursor,
                materialized = report.materialized(),
                failed = report.failed(),
                "Single poll cycle completed"
            );
        }
        Command::Run => {
            let builder = poller_builder(&config).await?;
            let builder = match config.poll.run_duration {
                Some(budget) => builder.with_shutdown_handler(CombinedShutdown::new(
                    Box::new(CtrlCShutdown::new()),
                    Box::new(DurationBudget::new(budget)),
                )),
                None => builder.with_shutdown_handler(CtrlCShutdown::new()),
            };
            builder.build()?.run().await?;
        }
    }
    Ok(())
}

async fn poller_builder(config: &Config) -> Result<PollerBuilder, Box<dyn Error>> {
    let conf = GConf::new(
        config.gmail.credentials_path.clone(),
        config.gmail.token_path.clone(),
    );
    let hub = Arc::new(ContextHub::new(conf));
    let transport: Arc<dyn MailTransport> = Arc::new(
        GmailTransportBuilder::new(hub)
            .with_user_id(&config.gmail.user_id)
            .build()
            .await?,
    );
    info!(user_id = %config.gmail.user_id, "Gmail transport ready");

    let mut builder = PollerBuilder::from_config(transport, config);
    if config.llm.provider == LlmProvider::Gemini {
        let agent = gemini_agent(&config.llm.model, &config.llm.preamble)?;
        builder = builder.with_model(LLMFactory::create(
            agent,
            Some(config.llm.retry_config()),
        ));
        info!(model = %config.llm.model, "Forwarding stored turns to the model");
    }
    Ok(builder)
}
