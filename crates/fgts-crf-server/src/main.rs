//! FGTS CRF lookup server: entry point.

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use fgts_crf::{Cnpj, Orchestrator};
use fgts_crf_server::types::ConsultaResponse;
use fgts_crf_server::{AppState, ConfigOverrides, HttpTransport, ServerConfig};

#[derive(Parser)]
#[command(
    name = "fgts-crf-server",
    about = "HTTP API for FGTS employer regularity (CRF) lookups",
    version
)]
struct Cli {
    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    /// Captcha solving service API key.
    /// Also reads from CAPTCHA_API_KEY env var.
    #[arg(long, global = true)]
    api_key: Option<String>,

    /// Listen address (host:port).
    #[arg(long, global = true)]
    addr: Option<String>,

    /// URL of the consultation form page.
    #[arg(long, global = true)]
    form_url: Option<String>,

    /// Base URL of the captcha solving service.
    #[arg(long, global = true)]
    captcha_url: Option<String>,

    /// Overall budget per lookup, in seconds (0 disables).
    #[arg(long, global = true)]
    deadline_secs: Option<u64>,

    /// Verify the form site's TLS certificate.
    #[arg(long, global = true)]
    verify_tls: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API (default).
    Serve,

    /// Run a single lookup and print the result as JSON.
    Query {
        /// CNPJ, 14 digits without punctuation.
        cnpj: String,
    },

    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   fgts-crf-server completions bash > ~/.local/share/bash-completion/completions/fgts-crf-server
    ///   fgts-crf-server completions zsh > ~/.zfunc/_fgts-crf-server
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            api_key: self.api_key.clone(),
            addr: self.addr.clone(),
            form_url: self.form_url.clone(),
            captcha_url: self.captcha_url.clone(),
            deadline_secs: self.deadline_secs,
            verify_tls: self.verify_tls,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    match cli.command {
        None | Some(Commands::Serve) => {
            let config = ServerConfig::resolve(cli.overrides())?;
            tracing::info!("FGTS CRF lookup server");
            tracing::info!("Form: {}", config.lookup.site.form_url);
            if let Some(deadline) = config.lookup.deadline {
                tracing::info!("Deadline per lookup: {}s", deadline.as_secs());
            }

            let transport = HttpTransport::new(AppState::new(config.lookup));
            transport.run(&config.addr).await?;
        }

        Some(Commands::Query { ref cnpj }) => {
            let config = ServerConfig::resolve(cli.overrides())?;
            let cnpj = Cnpj::parse(cnpj)?;
            let outcome = Orchestrator::new(config.lookup).run_query(&cnpj).await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&ConsultaResponse::from(&outcome))?
            );
        }

        Some(Commands::Completions { shell }) => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "fgts-crf-server", &mut std::io::stdout());
        }
    }

    Ok(())
}
