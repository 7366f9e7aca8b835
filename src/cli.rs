//! Command-line interface
//!
//! Argument types for the bellhop commands

use crate::config::BACKEND_ENV;
use clap::{Parser, Subcommand};

/// Bellhop CLI
#[derive(Parser)]
#[command(name = "bellhop")]
#[command(about = "Command-line companion for the Workdesk suite", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress non-error output (no short flag to avoid conflicts)
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Secret backend to use ("keyring" or "file")
    #[arg(long, global = true, env = BACKEND_ENV)]
    pub secrets_backend: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Sign in to a Workdesk account
    Login(LoginArgs),
    /// Remove a stored session
    Logout(LogoutArgs),
    /// Manage signed-in accounts
    Accounts(AccountsArgs),
}

/// Login command arguments
#[derive(Parser, Debug)]
pub struct LoginArgs {
    /// Account to sign in as (user@domain), also sent as a login hint
    #[arg(short = 'a', long)]
    pub account: Option<String>,

    /// Comma-separated services to request access to (defaults to all)
    #[arg(short = 's', long, value_delimiter = ',')]
    pub services: Vec<String>,

    /// Request read-only scopes
    #[arg(long)]
    pub read_only: bool,

    /// Print the authorization URL and paste the redirect back by hand
    #[arg(long, conflicts_with = "remote")]
    pub manual: bool,

    /// Two-step flow for machines without a browser
    #[arg(long)]
    pub remote: bool,

    /// Authorization code for the second remote step
    #[arg(long, requires = "remote")]
    pub code: Option<String>,

    /// Never open a browser, only print the URL
    #[arg(long)]
    pub no_browser: bool,

    /// Seconds to wait for the browser round trip
    #[arg(long, default_value_t = 120)]
    pub timeout_secs: u64,
}

/// Logout command arguments
#[derive(Parser, Debug)]
pub struct LogoutArgs {
    /// Account to log out (defaults to the resolved account)
    #[arg(short = 'a', long)]
    pub account: Option<String>,
}

/// Accounts management arguments
#[derive(Parser, Debug)]
pub struct AccountsArgs {
    #[command(subcommand)]
    pub command: AccountsCommands,
}

#[derive(Subcommand, Debug)]
pub enum AccountsCommands {
    /// List known accounts
    List {
        /// Verify each stored session still yields a usable token
        #[arg(long)]
        check: bool,
    },
    /// Set the default account
    Default {
        /// Account or alias to make the default
        account: String,
    },
    /// Define a short name for an account, or show where one points
    Alias {
        /// Alias name
        name: String,
        /// Account the alias points at; omit to show the current target
        account: Option<String>,
    },
}
