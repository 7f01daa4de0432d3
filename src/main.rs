//! Keycloak Web Guard - operator CLI
//!
//! Drives the library against a real realm. The session lives in a file
//! store so that `login`, `profile` and the admin commands share one token.

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Parser;
use serde::Serialize;
use tracing::{error, warn};

use keycloak_web_guard::{
    KeycloakGuard, KeycloakService, TokenSet,
    callback::CallbackServer,
    cli::{Cli, Command, RoleMappingArgs},
    config::KeycloakConfig,
    guard::split_guard,
    oidc::{Recovered, RoleRepresentation},
    setup_tracing,
    store::FileStore,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup tracing
    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("❌ {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config =
        KeycloakConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    let session = open_store(cli.session_dir.as_deref(), "session")?;
    let cache = open_store(cli.session_dir.as_deref(), "cache")?;

    let service = KeycloakService::builder(config)
        .session(Arc::new(session))
        .cache(Arc::new(cache))
        .build()
        .context("Failed to initialize Keycloak client")?;
    let guard = KeycloakGuard::new(Arc::new(service));
    let service = guard.service();

    match cli.command {
        Command::LoginUrl { register } => {
            let url = if register {
                service.register_url().await?
            } else {
                service.login_url().await?
            };
            println!("{url}");
        }

        Command::Login {
            no_browser,
            timeout,
        } => {
            let server = CallbackServer::bind(&service.config().callback_url).await?;
            let url = service.login_url().await?;

            println!("🔐 Open this URL to sign in:\n\n   {url}\n");
            if !no_browser {
                if let Err(e) = open::that(&url) {
                    warn!(error = %e, "Failed to launch browser");
                }
            }

            let callback = server.wait(Duration::from_secs(timeout)).await?;
            let token = guard
                .authenticate_callback(&callback.code, &callback.state)
                .await;
            return Ok(report_token(&token, "Signed in"));
        }

        Command::Password { username, password } => {
            let token = service.exchange_password(&username, &password).await;
            if !token.value().is_empty() {
                service.save_token(token.value());
            }
            return Ok(report_token(&token, "Signed in"));
        }

        Command::ClientCredentials => {
            let token = service.exchange_client_credentials().await;
            if !token.value().is_empty() {
                service.save_token(token.value());
            }
            return Ok(report_token(&token, "Service account token stored"));
        }

        Command::Profile => {
            let profile = guard.authenticated_user().await;
            if let Some(reason) = profile.failure() {
                bail!("No profile available: {reason}");
            }
            print_json(profile.value())?;
        }

        Command::Logout => {
            let url = guard.logout().await?;
            if url.is_empty() {
                println!("No active session");
            } else {
                println!("👋 Session closed. Finish the browser logout at:\n\n   {url}");
            }
        }

        Command::Can {
            guard: expression,
            uma,
            resource,
        } => {
            let entries = split_guard(&expression);
            let allowed = if uma {
                guard.has_permissions(&entries).await
            } else {
                guard.has_role(&entries, resource.as_deref())
            };

            if allowed {
                println!("✅ allowed: {expression}");
                return Ok(ExitCode::SUCCESS);
            }
            println!("❌ denied: {expression}");
            return Ok(ExitCode::FAILURE);
        }

        Command::Users { query } => {
            print_json(&service.list_users(&as_pairs(&query)).await?)?;
        }

        Command::Clients { query } => {
            print_json(&service.list_clients(&as_pairs(&query)).await?)?;
        }

        Command::ClientRoles { id, query } => {
            print_json(&service.list_client_roles(&id, &as_pairs(&query)).await?)?;
        }

        Command::ClientResources { id } => {
            print_json(&service.list_client_resources(&id).await?)?;
        }

        Command::UserRoles { user_id, client } => {
            print_json(&service.user_client_roles(&user_id, client.as_deref()).await?)?;
        }

        Command::GrantRoles(args) => {
            let roles = roles_of(&args);
            service
                .grant_client_roles(&args.user_id, &roles, args.client.as_deref())
                .await?;
            println!("✅ Granted {} role(s) to {}", roles.len(), args.user_id);
        }

        Command::RevokeRoles(args) => {
            let roles = roles_of(&args);
            service
                .revoke_client_roles(&args.user_id, &roles, args.client.as_deref())
                .await?;
            println!("✅ Revoked {} role(s) from {}", roles.len(), args.user_id);
        }

        Command::Discovery => {
            print_json(service.discovery().metadata().await?)?;
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn open_store(dir: Option<&Path>, name: &str) -> anyhow::Result<FileStore> {
    let store = match dir {
        Some(dir) => FileStore::new(dir.join(name)),
        None => FileStore::default_location(name),
    };
    store.with_context(|| format!("Failed to open {name} store"))
}

fn report_token(token: &Recovered<TokenSet>, success: &str) -> ExitCode {
    if let Some(reason) = token.failure() {
        eprintln!("❌ {reason}");
        return ExitCode::FAILURE;
    }

    let token = token.value();
    println!("✅ {success}");
    if let Some(expires_in) = token.expires_in {
        println!("   Expires in: {expires_in}s");
    }
    if let Some(scope) = &token.scope {
        println!("   Scope: {scope}");
    }
    let roles = token.realm_roles();
    if !roles.is_empty() {
        println!("   Realm roles: {}", roles.join(", "));
    }
    ExitCode::SUCCESS
}

fn as_pairs(query: &[(String, String)]) -> Vec<(&str, &str)> {
    query
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect()
}

fn roles_of(args: &RoleMappingArgs) -> Vec<RoleRepresentation> {
    args.roles
        .iter()
        .map(|(id, name)| RoleRepresentation::new(id, name))
        .collect()
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
