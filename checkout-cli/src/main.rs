//! Checkout CLI
//!
//! Operator tool that drives one configured payment provider:
//! - Load provider credentials from the environment
//! - Open checkout sessions
//! - Reconcile orders by poll or by a captured webhook delivery

mod config;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use checkout_providers::{Provider, ProviderKind, RunMode, build_provider};
use checkout_types::{
    InvoiceRequest, NotifyRequest, PayReq, PaymentEnv, PaymentProvider, PaymentState, ProviderError,
};

#[derive(Parser)]
#[command(name = "checkout")]
#[command(
    author,
    version,
    about = "Payment provider checkout and reconciliation CLI",
    long_about = None
)]
struct Cli {
    /// Overrides CHECKOUT_PROVIDER_TYPE
    #[arg(long, global = true)]
    provider: Option<ProviderKind>,

    /// Overrides CHECKOUT_RUN_MODE
    #[arg(long, global = true)]
    mode: Option<RunMode>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List supported provider types
    Providers,
    /// Open a checkout session
    Pay(PayArgs),
    /// Reconcile one order, optionally from a captured webhook
    Notify {
        #[arg(long)]
        order_id: String,
        /// Raw webhook body; omit to poll
        #[arg(long)]
        body_file: Option<PathBuf>,
        /// Webhook header as `name:value`, repeatable
        #[arg(long = "header", value_parser = parse_header)]
        headers: Vec<(String, String)>,
    },
    /// Poll until the order reaches a final state
    Poll {
        #[arg(long)]
        order_id: String,
        #[arg(long, env = "CHECKOUT_POLL_INTERVAL_SECS", default_value = "5")]
        interval_secs: u64,
        #[arg(long, env = "CHECKOUT_POLL_MAX_ATTEMPTS", default_value = "60")]
        max_attempts: u32,
    },
    /// Fetch the electronic invoice of a settled payment
    Invoice(InvoiceArgs),
    /// Print the body to acknowledge a webhook delivery with
    Ack {
        /// Error to report back; omit for a success acknowledgement
        #[arg(long)]
        error: Option<String>,
    },
}

#[derive(clap::Args)]
struct PayArgs {
    #[arg(long)]
    payment_name: String,
    #[arg(long)]
    product_name: String,
    #[arg(long)]
    display_name: String,
    /// Major-unit amount, e.g. 10.50
    #[arg(long)]
    price: Decimal,
    #[arg(long, default_value = "USD")]
    currency: String,
    #[arg(long)]
    return_url: String,
    #[arg(long, default_value = "")]
    notify_url: String,
    /// Instance name echoed back on settlement
    #[arg(long, default_value = "default")]
    provider_name: String,
    #[arg(long, default_value = "")]
    payer_name: String,
    #[arg(long, default_value = "")]
    payer_id: String,
    #[arg(long, default_value = "")]
    payer_email: String,
    #[arg(long, default_value = "")]
    description: String,
    #[arg(long, default_value = "")]
    image: String,
    /// Pay inside the WeChat in-app browser
    #[arg(long)]
    wechat_browser: bool,
}

#[derive(clap::Args)]
struct InvoiceArgs {
    #[arg(long)]
    payment_name: String,
    #[arg(long, default_value = "")]
    person_name: String,
    #[arg(long, default_value = "")]
    person_id_card: String,
    #[arg(long, default_value = "")]
    person_email: String,
    #[arg(long, default_value = "")]
    person_phone: String,
    /// Individual or Organization
    #[arg(long, default_value = "Individual")]
    invoice_type: String,
    #[arg(long, default_value = "")]
    invoice_title: String,
    #[arg(long, default_value = "")]
    invoice_tax_id: String,
}

fn parse_header(s: &str) -> Result<(String, String), String> {
    s.split_once(':')
        .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
        .filter(|(name, _)| !name.is_empty())
        .ok_or_else(|| format!("invalid header {s:?}, expected name:value"))
}

impl From<PayArgs> for PayReq {
    fn from(args: PayArgs) -> Self {
        PayReq {
            provider_name: args.provider_name,
            product_name: args.product_name,
            product_display_name: args.display_name,
            product_description: args.description,
            product_image: args.image,
            payer_name: args.payer_name,
            payer_id: args.payer_id,
            payer_email: args.payer_email,
            payment_name: args.payment_name,
            price: args.price,
            currency: args.currency,
            return_url: args.return_url,
            notify_url: args.notify_url,
            payment_env: if args.wechat_browser {
                PaymentEnv::WechatBrowser
            } else {
                PaymentEnv::Default
            },
        }
    }
}

impl From<InvoiceArgs> for InvoiceRequest {
    fn from(args: InvoiceArgs) -> Self {
        InvoiceRequest {
            payment_name: args.payment_name,
            person_name: args.person_name,
            person_id_card: args.person_id_card,
            person_email: args.person_email,
            person_phone: args.person_phone,
            invoice_type: args.invoice_type,
            invoice_title: args.invoice_title,
            invoice_tax_id: args.invoice_tax_id,
        }
    }
}

fn load_provider(cli: &Cli) -> Result<Provider> {
    let mut config = config::Config::from_env().or_else(|e| match cli.provider {
        // Credential-free providers still work without any environment.
        Some(kind @ (ProviderKind::Dummy | ProviderKind::Balance)) => Ok(config::Config {
            provider: kind,
            credentials: Default::default(),
        }),
        _ => Err(e),
    })?;
    if let Some(kind) = cli.provider {
        config.provider = kind;
    }
    if let Some(mode) = cli.mode {
        config.credentials.mode = mode;
    }

    tracing::info!(
        provider = %config.provider,
        mode = ?config.credentials.mode,
        "Loading provider"
    );
    Ok(build_provider(config.provider, &config.credentials)?)
}

async fn poll(
    provider: &Provider,
    order_id: &str,
    interval: Duration,
    max_attempts: u32,
) -> Result<()> {
    let req = NotifyRequest::poll(order_id);
    let mut last: Option<PaymentState> = None;

    for attempt in 1..=max_attempts {
        match provider.notify(&req).await {
            Ok(result) => {
                if let Some(previous) = last {
                    if !previous.can_transition_to(result.payment_status) {
                        anyhow::bail!(
                            "provider reported {} after {previous}; refusing the transition",
                            result.payment_status
                        );
                    }
                }
                tracing::info!(attempt, status = %result.payment_status, "Polled order");
                if result.payment_status.is_terminal() {
                    println!("{}", serde_json::to_string_pretty(&result)?);
                    return Ok(());
                }
                last = Some(result.payment_status);
            }
            Err(e) if e.is_transient() => {
                tracing::warn!(attempt, error = %e, "Transient failure while polling");
            }
            Err(e) => return Err(e.into()),
        }
        if attempt < max_attempts {
            tokio::time::sleep(interval).await;
        }
    }
    anyhow::bail!("order {order_id} still not final after {max_attempts} attempts")
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Logs go to stderr so stdout stays machine-readable.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,checkout_providers=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    if let Commands::Providers = cli.command {
        for kind in ProviderKind::ALL {
            println!("{kind}");
        }
        return Ok(());
    }

    let provider = load_provider(&cli)?;

    match cli.command {
        Commands::Providers => {}

        Commands::Pay(args) => {
            let resp = provider.pay(&args.into()).await?;
            println!("{}", serde_json::to_string_pretty(&resp)?);
        }

        Commands::Notify {
            order_id,
            body_file,
            headers,
        } => {
            let mut req = match body_file {
                Some(path) => {
                    let body = std::fs::read(&path)
                        .with_context(|| format!("reading webhook body {}", path.display()))?;
                    NotifyRequest::webhook(order_id, body)
                }
                None => NotifyRequest::poll(order_id),
            };
            for (name, value) in headers {
                req = req.with_header(name, value);
            }
            let result = provider.notify(&req).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }

        Commands::Poll {
            order_id,
            interval_secs,
            max_attempts,
        } => {
            poll(
                &provider,
                &order_id,
                Duration::from_secs(interval_secs),
                max_attempts,
            )
            .await?;
        }

        Commands::Invoice(args) => {
            let url = provider.get_invoice(&args.into()).await?;
            if url.is_empty() {
                println!("{} does not issue invoices", provider.name());
            } else {
                println!("{url}");
            }
        }

        Commands::Ack { error } => {
            let err = error.map(ProviderError::InvalidRequest);
            println!("{}", provider.response_error(err.as_ref()));
        }
    }

    Ok(())
}
