use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use cookie::CookieJar;
use tracing::info;
use tracing_subscriber::EnvFilter;

use warden::config::{LogConfig, LogFormat, WardenConfig};
use warden::service::AuthService;

/// OAuth2 login, cookie sessions and rate limiting operations.
#[derive(Parser, Debug)]
#[command(name = "warden", version, about)]
struct Cli {
    /// Configuration file (YAML)
    #[arg(short, long, env = "WARDEN_CONFIG", default_value = "warden.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate the configuration and rate limit rules
    CheckConfig,
    /// Print a provider sign-in URL and the flow cookies it needs
    AuthorizeUrl {
        /// Where to land after a successful login
        #[arg(long, default_value = "/")]
        redirect: String,
    },
    /// Spend from a rate limiter
    Consume {
        #[arg(long)]
        limiter: String,
        #[arg(long)]
        key: String,
        #[arg(long, default_value_t = 1)]
        cost: u32,
    },
    /// Clear a key on a rate limiter
    Reset {
        #[arg(long)]
        limiter: String,
        #[arg(long)]
        key: String,
    },
    /// Delete the session behind a raw cookie token
    RevokeSession {
        #[arg(long)]
        token: String,
    },
}

fn init_tracing(log: &LogConfig) {
    // RUST_LOG=
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match log.format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = WardenConfig::from_file(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    init_tracing(&config.log);

    info!(version = env!("CARGO_PKG_VERSION"), "Warden starting");

    match cli.command {
        Command::CheckConfig => {
            let rules = config.rate_limiting.load_rules()?;
            println!("configuration ok");
            println!("  authorize endpoint: {}", config.oauth.authorize_endpoint()?);
            println!("  token endpoint:     {}", config.oauth.token_endpoint()?);
            println!("  userinfo endpoint:  {}", config.oauth.userinfo_endpoint()?);
            let mut names: Vec<&String> = rules.limiters.keys().collect();
            names.sort();
            for name in names {
                println!("  limiter: {}", name);
            }
        }
        Command::AuthorizeUrl { redirect } => {
            let service = AuthService::connect(&config).await?;
            let mut jar = CookieJar::new();
            let url = service.flow().signin(&mut jar, &redirect);

            println!("{}", url);
            for cookie in jar.delta() {
                println!("Set-Cookie: {}", cookie);
            }
        }
        Command::Consume { limiter, key, cost } => {
            let service = AuthService::connect(&config).await?;
            let allowed = service.limiters().consume(&limiter, &key, cost).await?;
            println!("{}", if allowed { "allowed" } else { "denied" });
        }
        Command::Reset { limiter, key } => {
            let service = AuthService::connect(&config).await?;
            service.limiters().reset(&limiter, &key).await?;
            println!("reset {} for {}", limiter, key);
        }
        Command::RevokeSession { token } => {
            let service = AuthService::connect(&config).await?;
            service.revoke_session(&token).await?;
            println!("session revoked");
        }
    }

    Ok(())
}
