use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "derailed")]
#[command(about = "Derailed CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create an account over the HTTP API and store the returned token.
    Register {
        #[arg(long, short)]
        username: String,

        #[arg(long, short)]
        password: String,

        /// Config file path (default: DERAILED_CONFIG_PATH or ~/.derailed/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Sign in over the HTTP API and store the returned token.
    Login {
        #[arg(long, short)]
        username: String,

        #[arg(long, short)]
        password: String,

        /// Config file path (default: DERAILED_CONFIG_PATH or ~/.derailed/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Forget the stored token.
    Logout,

    /// Connect to the gateway and print events as JSON lines until Ctrl-C.
    Listen {
        /// Config file path (default: DERAILED_CONFIG_PATH or ~/.derailed/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Only print these event types (repeatable). Default: every event.
        #[arg(long = "event", short, value_name = "TYPE")]
        events: Vec<String>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("derailed {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Register {
            username,
            password,
            config,
        }) => {
            if let Err(e) = run_account(config, Account::Register, &username, &password).await {
                log::error!("register failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Login {
            username,
            password,
            config,
        }) => {
            if let Err(e) = run_account(config, Account::Login, &username, &password).await {
                log::error!("login failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Logout) => {
            if let Err(e) = derailed::credentials::remove_token(&derailed::credentials::default_token_path()) {
                log::error!("logout failed: {:#}", e);
                std::process::exit(1);
            }
            println!("signed out");
        }
        Some(Commands::Listen { config, events }) => {
            if let Err(e) = run_listen(config, events).await {
                log::error!("listen failed: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

enum Account {
    Register,
    Login,
}

async fn run_account(
    config_path: Option<PathBuf>,
    action: Account,
    username: &str,
    password: &str,
) -> anyhow::Result<()> {
    let (config, _) = derailed::config::load_config(config_path)?;
    let client = derailed::client::Client::new(&config);
    log::info!("using api at {}", client.http().base_url());
    let result = match action {
        Account::Register => client.http().register(username, password).await?,
        Account::Login => client.http().login(username, password).await?,
    };
    let token_path = derailed::credentials::default_token_path();
    derailed::credentials::save_token(&token_path, &result.token)?;
    log::info!("token saved to {}", token_path.display());
    println!("{}", serde_json::to_string_pretty(&result.user)?);
    Ok(())
}

async fn run_listen(config_path: Option<PathBuf>, events: Vec<String>) -> anyhow::Result<()> {
    let (config, _) = derailed::config::load_config(config_path)?;
    let client = derailed::client::Client::new(&config);
    // Env and config win over the stored token.
    if client.credentials().get_token().is_none() {
        let stored = derailed::credentials::load_token(&derailed::credentials::default_token_path());
        if stored.is_none() {
            log::warn!("no token configured; identify will be rejected by most servers");
        }
        client.set_token(stored);
    }

    let print = |event: &derailed::gateway::Event| -> anyhow::Result<()> {
        let line = serde_json::json!({ "t": event.event_type(), "d": event.payload() });
        println!("{}", line);
        Ok(())
    };
    if events.is_empty() {
        client.events().subscribe(derailed::gateway::WILDCARD, print);
    } else {
        for name in dedup_events(events) {
            client.events().subscribe(name, print);
        }
    }

    let mut state = client.gateway().watch_state();
    client.connect();
    let watcher = tokio::spawn(async move {
        while state.changed().await.is_ok() {
            log::info!("gateway: {:?}", *state.borrow_and_update());
        }
    });

    tokio::signal::ctrl_c().await?;
    client.gateway().disconnect().await;
    watcher.abort();
    Ok(())
}

/// Drop repeated `--event` types, keeping first-seen order.
fn dedup_events(events: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    events
        .into_iter()
        .filter(|name| seen.insert(name.clone()))
        .collect()
}
