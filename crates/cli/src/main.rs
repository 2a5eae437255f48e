use clap::{Parser, Subcommand};
use std::io::Write;

#[derive(Parser)]
#[command(name = "lark-qa")]
#[command(about = "Lark knowledge-base QA bot", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Run the webhook gateway. Credentials are read from the environment (or a .env file).
    Serve {
        /// Config file path (default: LARK_QA_CONFIG_PATH or ~/.lark-qa/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// HTTP port (default from config or 3000)
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Answer one question locally, printing tokens as they stream and the sources at the end.
    Ask {
        /// The question to answer.
        question: String,

        /// Config file path (default: LARK_QA_CONFIG_PATH or ~/.lark-qa/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    if let Err(e) = dotenvy::dotenv() {
        log::debug!("no .env loaded: {}", e);
    }

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("lark-qa {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Serve { config, port }) => {
            if let Err(e) = run_serve(config, port).await {
                log::error!("gateway failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Ask { question, config }) => {
            if let Err(e) = run_ask(config, &question).await {
                log::error!("ask failed: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

async fn run_serve(
    config_path: Option<std::path::PathBuf>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let (mut config, _path) = lark_qa::config::load_config(config_path)?;
    if let Some(p) = port {
        config.gateway.port = p;
    }
    let credentials = lark_qa::config::Credentials::from_env()?;
    log::info!("starting gateway on {}:{}", config.gateway.bind, config.gateway.port);
    lark_qa::gateway::run_gateway(config, credentials).await
}

async fn run_ask(config_path: Option<std::path::PathBuf>, question: &str) -> anyhow::Result<()> {
    let (config, _path) = lark_qa::config::load_config(config_path)?;
    let credentials = lark_qa::config::Credentials::from_env()?;
    let services = lark_qa::gateway::Services::from_config(&config, &credentials)?;
    let mut stream = services.qa.start(question).await?;

    let mut stdout = std::io::stdout();
    while let Some(token) = stream.tokens.recv().await {
        write!(stdout, "{}", token?)?;
        stdout.flush()?;
    }
    writeln!(stdout)?;
    if let Ok(sources) = stream.citations.await {
        if !sources.is_empty() {
            writeln!(stdout, "\n{}", lark_qa::channels::render_sources(&sources))?;
        }
    }
    Ok(())
}
