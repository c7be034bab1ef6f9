use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use url::Url;

#[derive(Parser)]
#[command(name = "oidcrp")]
#[command(about = "OIDC relying-party toolkit: inspect providers and drive flows by hand")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Relying-party configuration file
    #[arg(short, long, global = true, env = "OIDCRP_CONFIG", default_value = "oidcrp.toml")]
    pub config: PathBuf,

    /// Output format
    #[arg(short, long, global = true)]
    pub format: Option<OutputFormat>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Json,
    Text,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate the configuration file and list its handlers
    Check,
    /// Fetch and validate a provider's discovery document
    Discover(DiscoverArgs),
    /// Generate a PKCE verifier and its S256 challenge
    Pkce(PkceArgs),
    /// Build the authorization URL for a handler
    AuthorizeUrl(AuthorizeUrlArgs),
    /// Exchange a refresh token at a handler's token endpoint
    Refresh(RefreshArgs),
    /// Verify an ID Token against a handler's keys
    ValidateToken(ValidateTokenArgs),
    /// Build the RP-initiated logout URL for a handler
    LogoutUrl(LogoutUrlArgs),
}

#[derive(Args)]
pub struct DiscoverArgs {
    /// Issuer identifier (the well-known suffix is appended)
    pub issuer: Url,

    /// Accept a plain http issuer
    #[arg(long)]
    pub allow_http: bool,
}

#[derive(Args)]
pub struct PkceArgs {
    /// Derive the challenge from this verifier instead of generating one
    #[arg(long)]
    pub verifier: Option<String>,
}

#[derive(Args)]
pub struct HandlerArg {
    /// Handler name (falls back to the default handler)
    #[arg(long = "handler")]
    pub name: Option<String>,
}

#[derive(Args)]
pub struct AuthorizeUrlArgs {
    #[command(flatten)]
    pub handler: HandlerArg,

    /// Passthrough parameters, e.g. "ui_locales=fr&prompt=login"
    #[arg(long)]
    pub complementary_parameter: Option<String>,

    /// Forwarded to the provider as back_prompt_url
    #[arg(long)]
    pub back_prompt_url: Option<String>,
}

#[derive(Args)]
pub struct RefreshArgs {
    #[command(flatten)]
    pub handler: HandlerArg,

    /// Refresh token to exchange
    #[arg(long, env = "OIDCRP_REFRESH_TOKEN")]
    pub refresh_token: String,

    /// Only report whether the provider still accepts the token
    #[arg(long)]
    pub check: bool,
}

#[derive(Args)]
pub struct ValidateTokenArgs {
    #[command(flatten)]
    pub handler: HandlerArg,

    /// Compact-serialized ID Token
    pub id_token: String,

    /// Expected nonce claim
    #[arg(long)]
    pub nonce: Option<String>,
}

#[derive(Args)]
pub struct LogoutUrlArgs {
    #[command(flatten)]
    pub handler: HandlerArg,

    /// ID Token previously issued to the end user
    #[arg(long)]
    pub id_token_hint: Option<String>,

    /// Where the provider sends the user agent after logout
    #[arg(long)]
    pub post_logout_redirect_uri: Option<Url>,

    #[arg(long)]
    pub state: Option<String>,
}
