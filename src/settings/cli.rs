use super::Parser;

/// Identity provider helper between the login page and the authorization server.
#[derive(Parser, Debug)]
#[command(version)]
pub struct Cli {
    /// Path of the TOML settings file.
    #[arg(long)]
    pub settings: Option<String>,
}
