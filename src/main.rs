use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::{filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;

use vertex_session::{
    FileStore, GuestLoginHints, HttpClient, MemoryNavigation, Prompt, ReqwestHttpClient,
    ResourceClient, ResourceType, SessionConfig, SessionManager,
};

const DEFAULT_STATE_FILE: &str = "vertex-session.json";
const HTTP_TIMEOUT_SECS: u64 = 30;

#[derive(Parser, Debug)]
#[command(name = "vertex-session")]
#[command(about = "Sign in to VERTX and browse your resources from the terminal")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the current session
    Status,
    /// Start a sign-in redirect
    Login {
        /// `login` forces the account prompt, `none` fails instead of prompting
        prompt: Option<Prompt>,
    },
    /// Start a guest sign-in redirect
    Guest {
        /// Ask the identity service to skip its own UI
        #[arg(long)]
        silent: bool,
        /// Display name to assign or prefill
        #[arg(long)]
        name: Option<String>,
        /// The user already accepted the terms and conditions
        #[arg(long)]
        accept_terms: bool,
    },
    /// Complete a sign-in from the URL the identity service redirected to
    Callback { url: Url },
    /// Sign out and print the end-session URL
    Logout {
        /// Also sign out of external identity providers
        #[arg(long)]
        external: bool,
    },
    /// Poll the session until interrupted
    Watch,
    /// List resources (SceneAsset, MeshAsset, Assembly, Data)
    Resources { kind: Option<ResourceType> },
}

impl Command {
    fn guest_hints(silent: bool, name: Option<String>, accept_terms: bool) -> GuestLoginHints {
        let mut hints = GuestLoginHints::new();
        if silent {
            hints = hints.silent();
        }
        if let Some(name) = name {
            hints = hints.display_name(name);
        }
        if accept_terms {
            hints = hints.accepted_terms();
        }
        hints
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let env_file_path = dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            if cfg!(debug_assertions) {
                "vertex_session=debug,warn".into()
            } else {
                "info".into()
            }
        }))
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    if let Some(path) = env_file_path {
        debug!(path = %path.display(), "Loaded environment file");
    }

    let Cli { command } = Cli::parse();
    let config = SessionConfig::from_env().context("failed to load session configuration")?;

    let state_file = env::var("VERTEX_STATE_FILE").unwrap_or_else(|_| DEFAULT_STATE_FILE.to_string());
    let store = FileStore::open(&state_file)
        .await
        .with_context(|| format!("failed to open state file {}", state_file))?;
    debug!(path = %store.path().display(), "Using state file");

    let http: Arc<dyn HttpClient> = Arc::new(ReqwestHttpClient::with_client(
        reqwest::Client::builder()
            .user_agent(concat!("vertex-session/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()?,
    ));

    // The CLI has no browser: the "current location" is the callback URL when
    // one is given, the redirect URI otherwise.
    let current = match &command {
        Command::Callback { url } => url.clone(),
        _ => config.redirect_uri().clone(),
    };
    let navigation = MemoryNavigation::new(current);

    let manager = SessionManager::builder()
        .config(config.clone())
        .store(Arc::new(store))
        .navigation(Arc::new(navigation.clone()))
        .http_client(Arc::clone(&http))
        .build()?;

    manager.initialize().await?;
    info!(command = ?command, "Session manager ready");

    match command {
        Command::Status | Command::Callback { .. } => print_status(&manager).await?,
        Command::Login { prompt } => {
            let request = manager.login(prompt).await?;
            println!("Open this URL to sign in:\n{}", request.url);
        }
        Command::Guest {
            silent,
            name,
            accept_terms,
        } => {
            let hints = Command::guest_hints(silent, name, accept_terms);
            let request = manager.login_guest(Some(hints)).await?;
            println!("Open this URL to continue as a guest:\n{}", request.url);
        }
        Command::Logout { external } => {
            let request = manager.logout(external.then_some(true)).await?;
            println!("Signed out locally. Open this URL to end the remote session:\n{}", request.url);
        }
        Command::Watch => watch(&manager).await?,
        Command::Resources { kind } => {
            let base_url = match env::var("VERTEX_URL_BASE") {
                Ok(base) => Url::parse(&base).context("VERTEX_URL_BASE is not a valid URL")?,
                Err(_) => config.authority().join("/")?,
            };
            let client = ResourceClient::new(http, base_url, manager.token_accessor());
            debug!(base_url = %client.base_url(), "Listing resources");

            let resources = client.list_resources(kind).await?;
            if resources.is_empty() {
                println!("No resources");
            }
            for resource in resources {
                println!("{}  {:<10}  {}", resource.id, resource.kind, resource.name);
            }
        }
    }

    Ok(())
}

async fn print_status(manager: &SessionManager) -> Result<()> {
    let state = manager.state().await?;
    println!("state: {:?}", state);

    if let Some(user) = manager.get_current_user().await? {
        println!("user: {}", user.profile.name.as_deref().unwrap_or(&user.profile.sub));
        if let Some(expiration) = user.expiration() {
            println!("expires: {}", expiration.to_rfc3339());
        }
        println!("active: {}", manager.check_active().await?);
    }
    Ok(())
}

async fn watch(manager: &SessionManager) -> Result<()> {
    print_status(manager).await?;

    manager.watch_session(|event| {
        println!(
            "Session expiring ({}s left). Run `vertex-session login` to sign in again.",
            event.remaining_time
        );
        Ok(())
    });
    println!("Watching session, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    manager.stop_watching();
    Ok(())
}
