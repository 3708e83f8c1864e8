//! Post a deal to a running relay
//!
//! Usage:
//!   send_deal --file deal.json
//!   send_deal --title "Trena Laser" --original-price 199,90 --price 99,90 \
//!             --discount 50 --rating 4.8 --link https://example.com/t
//!
//! The file may hold either the deal object itself or `{"deal": {...}}`.

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::Duration;

use deal_relay::deal::FieldValue;
use deal_relay::Deal;

#[derive(Parser)]
#[command(name = "send_deal")]
#[command(about = "Send a deal to the WhatsApp deal relay", long_about = None)]
struct Cli {
    /// Relay base URL
    #[arg(long, env = "RELAY_URL", default_value = "http://localhost:3001")]
    url: String,

    /// JSON file with the deal
    #[arg(short, long, conflicts_with = "title")]
    file: Option<PathBuf>,

    #[arg(long)]
    title: Option<String>,

    #[arg(long)]
    original_price: Option<String>,

    #[arg(long)]
    price: Option<String>,

    #[arg(long)]
    discount: Option<String>,

    #[arg(long)]
    rating: Option<String>,

    #[arg(long)]
    link: Option<String>,

    /// Image URL or data URI
    #[arg(long)]
    image: Option<String>,

    /// Request timeout in seconds
    #[arg(long, default_value = "120")]
    timeout: u64,
}

fn deal_from_file(path: &PathBuf) -> Result<Deal> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let mut value: Value = serde_json::from_str(&content)?;
    if let Some(inner) = value.get_mut("deal") {
        value = inner.take();
    }
    Ok(serde_json::from_value(value)?)
}

fn deal_from_flags(cli: &Cli) -> Result<Deal> {
    let Some(title) = cli.title.as_deref() else {
        bail!("either --file or --title is required");
    };
    let field = |v: &Option<String>| -> FieldValue { v.as_deref().unwrap_or_default().into() };
    Ok(Deal {
        title: title.into(),
        original_price: field(&cli.original_price),
        price: field(&cli.price),
        discount: field(&cli.discount),
        rating: field(&cli.rating),
        link: field(&cli.link),
        image: cli.image.clone(),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let deal = match &cli.file {
        Some(path) => deal_from_file(path)?,
        None => deal_from_flags(&cli)?,
    };

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(cli.timeout))
        .build()?;
    let response = http
        .post(format!("{}/send-deal", cli.url.trim_end_matches('/')))
        .json(&json!({ "deal": deal }))
        .send()
        .await
        .context("Could not connect to the relay")?;

    let status = response.status();
    let body: Value = response.json().await.unwrap_or(Value::Null);

    if !status.is_success() {
        let reason = body["error"].as_str().unwrap_or("unknown error");
        bail!("Relay error {}: {}", status, reason);
    }

    let names: Vec<&str> = body["sent_to"]
        .as_array()
        .map(|a| a.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    println!("✅ Sent to: {}", names.join(", "));
    Ok(())
}
