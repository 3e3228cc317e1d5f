use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::Value;
use ujsti_portal::config::ConfigError;
use ujsti_portal::net::client::ApiError;
use ujsti_portal::net::transport::TransportError;
use ujsti_portal::session::{GuardDecision, Navigator, RouteGuard, SessionError};
use ujsti_portal::store::StoreError;
use ujsti_portal::store::cookies::CookieJarFile;
use ujsti_portal::store::file::FileStore;
use ujsti_portal::{ApiClient, ClientConfig, Credentials, Role, Session};

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("credential store: {0}")]
    Store(#[from] StoreError),
    #[error("http client: {0}")]
    Transport(#[from] TransportError),
    #[error("{0}")]
    Session(#[from] SessionError),
    #[error("{0}")]
    Api(#[from] ApiError),
    #[error("not signed in to the {0} portal")]
    NotSignedIn(Role),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "ujsti", about = "UNIBEN journal portal session CLI")]
struct Cli {
    /// Overrides `API_BASE_URL`.
    #[arg(long)]
    base_url: Option<String>,

    /// Overrides `API_TIMEOUT_SECS`.
    #[arg(long)]
    timeout_secs: Option<u64>,

    #[arg(long, env = "UJSTI_ROLE", default_value = "author")]
    role: Role,

    #[arg(long, env = "UJSTI_STORE", default_value = ".ujsti/credentials.json")]
    store: PathBuf,

    /// Cookie jar holding the refresh cookie; defaults to a file next to
    /// the credential store.
    #[arg(long, env = "UJSTI_COOKIES")]
    cookies: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in through the portal's login endpoint.
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "UJSTI_PASSWORD", hide_env_values = true)]
        password: String,
    },
    Logout,
    /// Restore the stored session and verify it with the server.
    Status,
    /// Authenticated GET, refreshing the access token if needed.
    Get { path: String },
}

/// Reports route changes on stderr; a terminal has nowhere to navigate.
struct TerminalNavigator;

impl Navigator for TerminalNavigator {
    fn navigate(&self, route: &str) {
        tracing::info!(%route, "navigate");
    }
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    let (session, cookies) = open_session(&cli).await?;

    let result = run_command(cli.command, &session).await;

    // The server may have rotated or cleared the refresh cookie even when the
    // command itself failed.
    let saved = cookies.save().await.inspect_err(|e| {
        tracing::error!(error = %e, path = %cookies.path().display(), "cookie jar could not be saved");
    });
    result?;
    Ok(saved?)
}

async fn run_command(command: Command, session: &Session) -> Result<(), CliError> {
    match command {
        Command::Login { email, password } => {
            let user = session.login(&email, &password).await?;
            print_json(&serde_json::to_value(user)?)
        }
        Command::Logout => {
            session.logout().await?;
            println!("signed out of the {} portal", session.role());
            Ok(())
        }
        Command::Status => run_status(session).await,
        Command::Get { path } => {
            let json: Value = session.client().get_json(&path).await?;
            print_json(&json)
        }
    }
}

async fn open_session(cli: &Cli) -> Result<(Session, CookieJarFile), CliError> {
    let mut config = ClientConfig::from_env_with_base_url(cli.base_url.as_deref())?;
    if let Some(secs) = cli.timeout_secs {
        config.timeout = Duration::from_secs(secs.max(1));
    }

    let store = FileStore::open(&cli.store).await?;
    let cookie_path = cli.cookies.clone().unwrap_or_else(|| default_cookie_path(store.path()));
    let cookies = CookieJarFile::open(cookie_path).await?;
    tracing::debug!(
        base_url = %config.base_url,
        credentials = %store.path().display(),
        cookies = %cookies.path().display(),
        "session storage opened"
    );

    let client = ApiClient::from_config_with_cookies(config, Credentials::new(Arc::new(store)), cookies.jar())?;
    let session = Session::mount(cli.role, Arc::new(client), Arc::new(TerminalNavigator));
    Ok((session, cookies))
}

/// `credentials.json` -> `credentials.cookies.json` in the same directory.
fn default_cookie_path(store: &Path) -> PathBuf {
    store.with_extension("cookies.json")
}

async fn run_status(session: &Session) -> Result<(), CliError> {
    session.check_auth().await?;
    let state = session.state();
    match RouteGuard::new(session.role()).decide(&state) {
        GuardDecision::Allow => {
            let user = state.user.ok_or(CliError::NotSignedIn(session.role()))?;
            println!("signed in as {} <{}> ({})", user.name, user.email, user.role);
            println!("route: {}", session.role().routes().dashboard_route);
            Ok(())
        }
        GuardDecision::Redirect(route) => {
            println!("route: {route}");
            Err(CliError::NotSignedIn(session.role()))
        }
        GuardDecision::Pending => Err(CliError::NotSignedIn(session.role())),
    }
}

fn print_json(value: &Value) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}
