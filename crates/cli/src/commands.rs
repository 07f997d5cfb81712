//! CLI commands

use anyhow::{Context, Result, bail};
use clap::Subcommand;
use tracing::info;
use warden_core::{ClientConfig, FilePersistence, Session};
use warden_http::{ClientError, SessionManager, User};

#[derive(Subcommand)]
pub enum Commands {
    /// Log in and store the session
    Login {
        #[arg(long)]
        email: String,

        /// Account password
        #[arg(long, env = "WARDEN_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Create an account (does not log in)
    Register {
        #[arg(long)]
        email: String,

        #[arg(long, env = "WARDEN_PASSWORD", hide_env_values = true)]
        password: String,

        #[arg(long)]
        full_name: Option<String>,
    },

    /// Fetch the logged-in user from the API, renewing the session if needed
    Whoami,

    /// Show the stored session without contacting the API
    Status,

    /// End the session on the server and locally
    Logout,
}

impl Commands {
    pub async fn execute(self, config: &ClientConfig) -> Result<()> {
        let manager =
            SessionManager::from_config(config).context("Failed to create session client")?;

        match self {
            Self::Login { email, password } => {
                let user = manager.login(&email, &password).await?;
                println!("Logged in as {}", describe(&user));
            }
            Self::Register {
                email,
                password,
                full_name,
            } => {
                let user = manager.register(&email, &password, full_name).await?;
                println!("Registered {}", describe(&user));
                println!("Run `warden login --email {}` to start a session", user.email);
            }
            Self::Whoami => {
                if !manager.store().is_authenticated() {
                    bail!("Not logged in");
                }
                match manager.current_user().await {
                    Ok(user) => println!("{}", describe(&user)),
                    Err(ClientError::SessionExpired(reason)) => {
                        bail!("Session expired ({reason}), log in again")
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            Self::Status => {
                println!("API:     {}", manager.base_url());
                println!(
                    "Session: {}",
                    FilePersistence::from_config(config).path().display()
                );
                println!("{}", status_line(&manager.store().read()));
            }
            Self::Logout => {
                if !manager.store().is_authenticated() {
                    info!("No stored session, logging out on the server only");
                }
                manager.logout().await?;
                println!("Logged out");
            }
        }

        Ok(())
    }
}

fn describe(user: &User) -> String {
    if user.display_name() == user.email {
        user.email.clone()
    } else {
        format!("{} <{}>", user.display_name(), user.email)
    }
}

fn status_line(session: &Session) -> String {
    match &session.user {
        Some(user) if session.is_authenticated() => format!("Logged in as {}", describe(user)),
        _ => "Not logged in".to_string(),
    }
}
