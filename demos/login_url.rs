//! Prints the ESIA login and logout URLs for a JSON options file.
//!
//! ```text
//! RUST_LOG=starberry_esia=debug cargo run --example login_url -- options.json [logout-redirect]
//! ```

use std::env;
use std::fs;

use starberry_esia::{Config, OpenId, Pkcs7Signer, ReqwestHttpClient, SigningMaterial};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut args = env::args().skip(1);
    let path = args.next().ok_or("usage: login_url <options.json> [logout-redirect]")?;
    let redirect = args.next();

    let options: serde_json::Value = serde_json::from_str(&fs::read_to_string(path)?)?;
    let config = Config::from_value(options)?;
    let signer = Pkcs7Signer::new(SigningMaterial::from_config(&config));
    let openid = OpenId::new(config, ReqwestHttpClient::new()?, signer);

    println!("login:  {}", openid.build_url().await?);
    println!("logout: {}", openid.build_logout_url(redirect.as_deref()));
    Ok(())
}
