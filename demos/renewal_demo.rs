use std::time::Duration;

use clap::Parser;
use entra_tokens::{issuer::DefaultChainIssuer, CredentialsProvider, Scope, TokenManagerConfig};
use tokio::time;

#[derive(Debug, Parser)]
struct Opts {
    /// The scope to request tokens for
    #[arg(long, env = "TOKEN_SCOPE", default_value = entra_tokens::issuer::DEFAULT_SCOPE)]
    scope: Scope,

    /// Seconds between credential pulls
    #[arg(long, default_value_t = 5)]
    interval: u64,

    /// Fraction of a token's lifetime after which it is renewed
    #[arg(long, default_value_t = 0.8)]
    refresh_ratio: f64,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .pretty()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();

    let config = TokenManagerConfig::default()
        .with_expiration_refresh_ratio(opts.refresh_ratio)?
        .with_issuance_timeout(Duration::from_secs(10));

    let provider = CredentialsProvider::new(DefaultChainIssuer::from_env(opts.scope), config);

    let mut publications = provider.subscribe();
    tokio::spawn(async move {
        while publications.changed().await.is_ok() {
            if let Some(token) = publications.borrow_and_update().clone() {
                tracing::info!(
                    token = format_args!("{:#?}", token.credential()),
                    expires_at = token.expires_at().0,
                    "new token published"
                );
            }
        }
    });

    let mut interval = time::interval(Duration::from_secs(opts.interval));
    loop {
        interval.tick().await;

        let credentials = provider.get_credentials().await?;
        tracing::info!(
            username = credentials.username(),
            expires_at = credentials.expires_at().0,
            "pulled credentials"
        );
    }
}
