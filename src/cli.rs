//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Keycloak OpenID Connect client - sign in, inspect tokens, manage roles
#[derive(Parser, Debug)]
#[command(name = "keycloak-web-guard")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "KEYCLOAK_WEB_GUARD_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding the session and discovery cache
    /// (default: ~/.keycloak-web-guard)
    #[arg(long, env = "KEYCLOAK_WEB_GUARD_SESSION_DIR", global = true)]
    pub session_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "warn",
        env = "KEYCLOAK_WEB_GUARD_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "KEYCLOAK_WEB_GUARD_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand
    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the authorization URL (stores a fresh state)
    LoginUrl {
        /// Print the self-registration URL instead
        #[arg(long)]
        register: bool,
    },

    /// Sign in through the browser, receiving the code on `callback_url`
    Login {
        /// Do not launch a browser, only print the URL
        #[arg(long)]
        no_browser: bool,

        /// Seconds to wait for the redirect
        #[arg(long, default_value_t = 120)]
        timeout: u64,
    },

    /// Sign in with the resource-owner password grant
    Password {
        /// Username
        #[arg(short, long, env = "KEYCLOAK_USERNAME")]
        username: String,

        /// Password
        #[arg(short, long, env = "KEYCLOAK_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Obtain a service-account token with the client credentials grant
    ClientCredentials,

    /// Show the signed-in user's profile (refreshing the token if expired)
    Profile,

    /// Invalidate the session and print the logout URL
    Logout,

    /// Check roles or UMA permissions of the stored token
    Can {
        /// Roles (`a|b`) or, with --uma, permissions (`resource#scope|...`)
        #[arg(required = true)]
        guard: String,

        /// Ask Keycloak for a UMA decision instead of reading token roles
        #[arg(long)]
        uma: bool,

        /// Resource whose roles are checked (default: the client id)
        #[arg(long)]
        resource: Option<String>,
    },

    /// List users
    Users {
        /// Query parameters, e.g. `search=alice`
        #[arg(short, long = "query", value_parser = parse_key_val)]
        query: Vec<(String, String)>,
    },

    /// List clients
    Clients {
        /// Query parameters, e.g. `clientId=app1`
        #[arg(short, long = "query", value_parser = parse_key_val)]
        query: Vec<(String, String)>,
    },

    /// List the roles of a client
    ClientRoles {
        /// Client internal id
        id: String,

        /// Query parameters, e.g. `search=admin`
        #[arg(short, long = "query", value_parser = parse_key_val)]
        query: Vec<(String, String)>,
    },

    /// List the authorization resources of a client
    ClientResources {
        /// Client internal id
        id: String,
    },

    /// List a user's role mappings for a client
    UserRoles {
        /// User id
        user_id: String,

        /// Client internal id (default: the configured client id)
        #[arg(long)]
        client: Option<String>,
    },

    /// Grant client roles to a user
    GrantRoles(RoleMappingArgs),

    /// Revoke client roles from a user
    RevokeRoles(RoleMappingArgs),

    /// Print the realm's OpenID configuration
    Discovery,
}

/// Arguments shared by the role-mapping commands
#[derive(clap::Args, Debug)]
pub struct RoleMappingArgs {
    /// User id
    pub user_id: String,

    /// Roles as `id=name`
    #[arg(required = true, value_parser = parse_key_val)]
    pub roles: Vec<(String, String)>,

    /// Client internal id (default: the configured client id)
    #[arg(long)]
    pub client: Option<String>,
}

/// Parse a `key=value` argument
pub fn parse_key_val(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{s}'"))
}
