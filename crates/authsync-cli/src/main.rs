//! authsync - sign in, inspect, and use an authenticated API session from
//! the terminal.
//!
//! Tokens live in a cookie jar under the cache directory (or the OS keychain
//! with `--keyring`), so a session survives between invocations the same way
//! it survives page reloads in a browser. Sign-in and sign-out are announced
//! on a channel file next to the cookie jar, so `authsync watch` in another
//! terminal follows them the way a second tab would.

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use authsync_core::api::{ApiRequest, ReqwestTransport};
use authsync_core::auth::{
    AuthNotifier, CookieStore, CredentialStore, ExecutionContext, FileBroadcastChannel,
    FileCookieStore, KeyringCookieStore, Navigator, Session,
};
use authsync_core::{ApiClient, AuthConfig};

/// Directory for the rolling log file; unset means stderr only
const LOG_DIR_ENV: &str = "AUTHSYNC_LOG_DIR";

const LOG_FILE: &str = "authsync.log";

const USAGE: &str = "\
Usage: authsync [--keyring] <command>

Commands:
  login [email]                        Sign in (prompts for the password)
  whoami                               Show the signed-in user
  logout                               Sign out and clear stored tokens
  get <path>                           GET an API path with the session token
  can [--permission P]... [--role R]...  Check permissions of the signed-in user
  watch                                Wait until the session is signed out elsewhere";

/// Initialize the tracing subscriber for logging
fn init_tracing() -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match std::env::var(LOG_DIR_ENV) {
        Ok(dir) if !dir.trim().is_empty() => {
            let appender = tracing_appender::rolling::daily(dir.trim(), LOG_FILE);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        _ => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

/// The terminal has no pages; navigation is reported instead.
struct TerminalNavigator;

impl Navigator for TerminalNavigator {
    fn push(&self, route: &str) {
        info!(route, "Navigate");
        eprintln!("-> {}", route);
    }

    fn reload(&self) {
        info!("Reload requested");
        eprintln!("-> (signed in elsewhere)");
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Login(Option<String>),
    WhoAmI,
    Logout,
    Get(String),
    Can {
        permissions: Vec<String>,
        roles: Vec<String>,
    },
    Watch,
}

#[derive(Debug, PartialEq, Eq)]
struct Args {
    keyring: bool,
    command: Command,
}

fn parse_args(args: &[String]) -> Result<Args> {
    let mut keyring = false;
    let mut rest = Vec::new();
    for arg in args {
        if arg == "--keyring" {
            keyring = true;
        } else {
            rest.push(arg.as_str());
        }
    }

    let command = match rest.as_slice() {
        ["login"] => Command::Login(None),
        ["login", email] => Command::Login(Some(email.to_string())),
        ["whoami"] => Command::WhoAmI,
        ["logout"] => Command::Logout,
        ["watch"] => Command::Watch,
        ["get", path] => Command::Get(path.to_string()),
        ["can", flags @ ..] => {
            let mut permissions = Vec::new();
            let mut roles = Vec::new();
            let mut iter = flags.iter();
            while let Some(flag) = iter.next() {
                let value = iter
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("Missing value for {}", flag))?;
                match *flag {
                    "--permission" => permissions.push(value.to_string()),
                    "--role" => roles.push(value.to_string()),
                    other => anyhow::bail!("Unknown option: {}", other),
                }
            }
            Command::Can { permissions, roles }
        }
        _ => anyhow::bail!("{}", USAGE),
    };

    Ok(Args { keyring, command })
}

fn prompt_email() -> Result<String> {
    print!("Email: ");
    io::stdout().flush()?;

    let mut email = String::new();
    io::stdin().read_line(&mut email)?;
    Ok(email.trim().to_string())
}

fn build_session(config: AuthConfig, keyring: bool) -> Result<Arc<Session>> {
    let store: Arc<dyn CookieStore> = if keyring {
        Arc::new(KeyringCookieStore)
    } else {
        Arc::new(FileCookieStore::new(config.cookie_jar_path()?))
    };
    let credentials = CredentialStore::new(store, &config);

    let channel = FileBroadcastChannel::open(config.channel_path()?);
    let notifier = AuthNotifier::new(Arc::new(channel));
    let context = ExecutionContext::interactive(Arc::new(TerminalNavigator), notifier);

    let transport = ReqwestTransport::new(&config).context("Failed to build HTTP client")?;
    let client = ApiClient::new(Arc::new(transport), credentials, config, context);
    Ok(Arc::new(Session::new(client)))
}

/// Returns `false` when the command ran but did not succeed.
async fn run(args: Args) -> Result<bool> {
    let config = AuthConfig::load()?.apply_env();
    let session = build_session(config, args.keyring)?;

    match args.command {
        Command::Login(email) => {
            let email = match email {
                Some(email) => email,
                None => prompt_email()?,
            };
            let password = rpassword::prompt_password("Password: ")?;

            session.sign_in(&email, &password).await;
            match session.user() {
                Some(user) => {
                    println!("Signed in as {}", user.email);
                    Ok(true)
                }
                None => {
                    eprintln!("Sign-in failed");
                    Ok(false)
                }
            }
        }
        Command::WhoAmI => {
            session.restore().await;
            match session.user() {
                Some(user) => {
                    println!("{}", serde_json::to_string_pretty(&user)?);
                    Ok(true)
                }
                None => {
                    eprintln!("Not signed in");
                    Ok(false)
                }
            }
        }
        Command::Logout => {
            session.sign_out();
            println!("Signed out");
            Ok(true)
        }
        Command::Get(path) => {
            let response = session.client().send(ApiRequest::get(path)).await?;
            println!("{}", response.body);
            Ok(true)
        }
        Command::Can { permissions, roles } => {
            session.restore().await;
            let permissions: Vec<&str> = permissions.iter().map(String::as_str).collect();
            let roles: Vec<&str> = roles.iter().map(String::as_str).collect();
            let allowed = session.can(&permissions, &roles);
            println!("{}", if allowed { "yes" } else { "no" });
            Ok(allowed)
        }
        Command::Watch => {
            session.restore().await;
            let Some(user) = session.user() else {
                eprintln!("Not signed in");
                return Ok(false);
            };
            let listener = session
                .listen()
                .context("Session has no cross-tab channel")?;
            println!("Watching session of {}", user.email);

            listener.await.context("Session listener failed")?;
            println!("Signed out elsewhere");
            Ok(true)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let guard = init_tracing();

    let raw: Vec<String> = std::env::args().skip(1).collect();
    let args = parse_args(&raw)?;

    let succeeded = match run(args).await {
        Ok(succeeded) => succeeded,
        Err(e) => {
            warn!(error = %e, "Command failed");
            eprintln!("Error: {:#}", e);
            false
        }
    };

    // flush the file log before exiting
    drop(guard);
    if !succeeded {
        std::process::exit(1);
    }
    Ok(())
}
