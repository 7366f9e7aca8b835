//! bellhop CLI
//!
//! Command-line companion for the Workdesk suite. Signs accounts in
//! against the Workdesk authorization server, keeps their sessions fresh
//! with automatic refresh, and hands authenticated transports to the
//! service commands.
//!
//! Credential commands:
//! - `login` - sign an account in (browser, paste-back, or remote flow)
//! - `logout` - drop a stored session
//! - `accounts` - list accounts, pick the default, manage aliases

mod auth;
mod cli;
mod config;
mod error;
mod http;

#[cfg(test)]
mod tests_auth_flows;

use anyhow::Result;
use auth::{BackendKind, CredentialManager, LoginOptions, LoginSummary};
use clap::Parser;
use cli::{Cli, Commands};
use error::AuthError;
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity flags
    let log_level = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_writer(std::io::stderr) // Log to stderr to keep stdout clean
        .init();

    let backend = cli.secrets_backend.as_deref();
    let result = match cli.command {
        Some(Commands::Login(args)) => execute_login_cli(args, backend).await,
        Some(Commands::Logout(args)) => execute_logout_cli(args, backend).await,
        Some(Commands::Accounts(args)) => execute_accounts_cli(args, backend).await,
        None => {
            eprintln!("Error: No command specified. Use --help for usage information.");
            std::process::exit(1);
        }
    };

    match result {
        Ok(output) => {
            println!("{}", output);
            Ok(())
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(get_exit_code(&e));
        }
    }
}

/// Execute login command
async fn execute_login_cli(args: cli::LoginArgs, backend: Option<&str>) -> Result<String> {
    use std::io::{self, Write};

    let mut manager = CredentialManager::open(backend)?;

    let opts = LoginOptions {
        account_hint: args.account.clone(),
        services: args.services.clone(),
        read_only: args.read_only,
        open_browser: !args.no_browser,
        timeout: Duration::from_secs(args.timeout_secs),
    };

    if args.remote {
        return match args.code {
            Some(code) => {
                let summary = manager.remote_login_finish(opts, &code).await?;
                Ok(login_message(&summary))
            }
            None => {
                let url = manager.remote_login_url(&opts)?;
                eprintln!("Visit this URL on a machine with a browser, approve access,");
                eprintln!("then run 'bellhop login --remote --code <code>' here:");
                eprintln!("\n{}\n", url);
                Ok("Waiting for the second step; no session was created yet.".to_string())
            }
        };
    }

    if args.manual {
        let (mut flow, pending) = manager.manual_login_begin(&opts)?;

        eprintln!("Open this URL in a browser and approve access:");
        eprintln!("\n{}\n", pending.auth_url);
        print!("Paste the full redirect URL here: ");
        io::stdout().flush()?;
        let mut input = String::new();
        io::stdin().read_line(&mut input)?;

        let summary = manager
            .manual_login_finish(&mut flow, &pending, &input, args.account.as_deref())
            .await?;
        return Ok(login_message(&summary));
    }

    info!("Starting browser login...");
    let summary = manager.login_interactive(opts).await?;
    Ok(login_message(&summary))
}

/// Execute logout command
async fn execute_logout_cli(args: cli::LogoutArgs, backend: Option<&str>) -> Result<String> {
    let mut manager = CredentialManager::open(backend)?;
    let summary = manager.logout(args.account.as_deref())?;

    if summary.removed {
        Ok(format!("✓ Logged out {}", summary.account))
    } else {
        Ok(format!(
            "{} was not signed in; nothing to remove",
            summary.account
        ))
    }
}

/// Execute accounts command
async fn execute_accounts_cli(args: cli::AccountsArgs, backend: Option<&str>) -> Result<String> {
    let mut manager = CredentialManager::open(backend)?;

    match args.command {
        cli::AccountsCommands::List { check } => {
            let accounts = manager.list_accounts(check).await?;

            if accounts.is_empty() {
                return Ok(
                    "No accounts stored. Use 'bellhop login' to add an account.".to_string()
                );
            }

            let mut output = format!("Signed-in accounts ({}):\n", accounts.len());
            for account in &accounts {
                let default_marker = if account.is_default { " (default)" } else { "" };
                let status = match account.usable {
                    Some(true) => " [ok]",
                    Some(false) => " [needs login]",
                    None if !account.stored => " [no credential]",
                    None => "",
                };
                output.push_str(&format!(
                    "  • {}{}{}\n",
                    account.id, default_marker, status
                ));
                if let Some(last) = account.last_login {
                    output.push_str(&format!(
                        "      last login {}\n",
                        last.format("%Y-%m-%d %H:%M UTC")
                    ));
                }
            }

            if !manager.aliases().is_empty() {
                output.push_str("Aliases:\n");
                for (alias, target) in manager.aliases() {
                    output.push_str(&format!("  {} -> {}\n", alias, target));
                }
            }

            Ok(output)
        }
        cli::AccountsCommands::Default { account } => {
            let account = manager.set_default(&account)?;
            Ok(format!("✓ Set {} as default account", account))
        }
        cli::AccountsCommands::Alias { name, account } => match account {
            Some(account) => {
                manager.set_alias(&name, &account)?;
                Ok(format!("✓ Alias {} -> {}", name, account))
            }
            None => match manager.alias_target(&name) {
                Some(target) => Ok(format!("{} -> {}", name, target)),
                None => Err(AuthError::InvalidInput(format!("no alias named '{}'", name)).into()),
            },
        },
    }
}

fn login_message(summary: &LoginSummary) -> String {
    let mut message = format!(
        "✓ Signed in as {}\n  Scopes: {}\n  Storage: {}",
        summary.account,
        summary.scopes.join(" "),
        match summary.backend {
            BackendKind::Keyring => "OS keyring",
            BackendKind::File => "encrypted file",
        }
    );
    if summary.is_default {
        message.push_str("\n  Default: yes");
    }
    message
}

/// Map errors to exit codes, using the credential error kinds when present
fn get_exit_code(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<AuthError>()
        .map(|e| e.exit_code())
        .unwrap_or(1)
}
