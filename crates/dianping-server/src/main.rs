use std::time::Duration;

use anyhow::{Context, bail};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use dianping_core::{ApiResponse, RequestContext, SeckillVoucher};
use dianping_server::config::loader::{DEFAULT_CONFIG_FILE, load_config};
use dianping_server::{CachePolicy, IdGenerator, Services, metrics, observability};
use serde::Serialize;

#[derive(Parser)]
#[command(name = "dianping")]
#[command(about = "Admin tool for the dianping cache, id and seckill layer")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to dianping.toml when present)
    #[arg(short, long, global = true, env = "DIANPING_CONFIG")]
    config: Option<String>,

    /// Print Prometheus metrics collected while running the command
    #[arg(long, global = true)]
    print_metrics: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply PostgreSQL migrations
    Migrate,
    /// Create a seckill voucher and publish its stock to the KV substrate
    PublishVoucher {
        #[arg(long)]
        voucher_id: i64,
        #[arg(long)]
        stock: i32,
        /// Sale start, RFC 3339
        #[arg(long)]
        begin: DateTime<Utc>,
        /// Sale end, RFC 3339
        #[arg(long)]
        end: DateTime<Utc>,
    },
    /// Copy a voucher's stock from the system of record to the KV substrate
    PreloadStock {
        #[arg(long)]
        voucher_id: i64,
    },
    /// Pre-warm the logical-expiry cache entry of a shop
    WarmShop {
        #[arg(long)]
        shop_id: i64,
        /// Logical TTL in seconds (defaults to cache.default_ttl_secs)
        #[arg(long)]
        ttl_secs: Option<u64>,
    },
    /// Read a shop through the cache
    Shop {
        #[arg(long)]
        shop_id: i64,
        #[arg(long, value_enum, default_value_t = PolicyArg::PassThrough)]
        policy: PolicyArg,
    },
    /// Issue ids and show how they decode
    NextId {
        #[arg(long, default_value = "order")]
        prefix: String,
        #[arg(long, default_value_t = 1)]
        count: u32,
    },
    /// Attempt one purchase
    Seckill {
        #[arg(long)]
        voucher_id: i64,
        #[arg(long)]
        user_id: i64,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PolicyArg {
    PassThrough,
    Mutex,
    LogicalExpire,
}

impl From<PolicyArg> for CachePolicy {
    fn from(policy: PolicyArg) -> Self {
        match policy {
            PolicyArg::PassThrough => CachePolicy::PassThrough,
            PolicyArg::Mutex => CachePolicy::Mutex,
            PolicyArg::LogicalExpire => CachePolicy::LogicalExpire,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct IssuedId {
    id: u64,
    issued_at: DateTime<Utc>,
    sequence: u32,
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        // Not an error if .env doesn't exist - it's optional
        if !matches!(e, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound)
        {
            eprintln!("Warning: Failed to load .env file: {e}");
        }
    }

    observability::init_tracing();
    let cli = Cli::parse();

    let cfg = load_config(cli.config.as_deref()).context("configuration error")?;
    tracing::debug!(
        path = cli.config.as_deref().unwrap_or(DEFAULT_CONFIG_FILE),
        "Configuration loaded"
    );
    observability::apply_logging_level(&cfg.logging.level);
    if cli.print_metrics {
        metrics::init_metrics();
    }

    let services = Services::connect(&cfg).await?;

    match cli.command {
        Commands::Migrate => {
            let Some(store) = services.postgres() else {
                bail!("postgres is not configured");
            };
            dianping_db_postgres::migrations::run(store.pool()).await?;
            print_json(&ApiResponse::<()>::ok_empty())?;
        }
        Commands::PublishVoucher {
            voucher_id,
            stock,
            begin,
            end,
        } => {
            if stock < 0 || begin > end {
                bail!("stock must be >= 0 and begin must not be after end");
            }
            let voucher = SeckillVoucher {
                voucher_id,
                stock,
                begin_time: begin,
                end_time: end,
            };
            services.seckill.publish_voucher(&voucher).await?;
            print_json(&ApiResponse::ok(voucher))?;
        }
        Commands::PreloadStock { voucher_id } => {
            let response = if services.seckill.preload_stock(voucher_id).await? {
                ApiResponse::ok(voucher_id)
            } else {
                ApiResponse::fail("Voucher not found")
            };
            print_json(&response)?;
        }
        Commands::WarmShop { shop_id, ttl_secs } => {
            let ttl = ttl_secs
                .map(Duration::from_secs)
                .unwrap_or_else(|| cfg.cache.default_ttl());
            let response = if services.shops.warm_shop(shop_id, ttl).await? {
                ApiResponse::ok(shop_id)
            } else {
                ApiResponse::fail("Shop not found")
            };
            print_json(&response)?;
        }
        Commands::Shop { shop_id, policy } => {
            let lookup = services.shops.query_by_id(shop_id, policy.into()).await?;
            let response = match lookup.into_value() {
                Some(shop) => ApiResponse::ok(shop),
                None => ApiResponse::fail("Shop not found"),
            };
            print_json(&response)?;
        }
        Commands::NextId { prefix, count } => {
            let mut issued = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let id = services.ids.next_id(&prefix).await?;
                let parts = IdGenerator::decode(id);
                issued.push(IssuedId {
                    id,
                    issued_at: parts.issued_at,
                    sequence: parts.sequence,
                });
            }
            print_json(&ApiResponse::ok(issued))?;
        }
        Commands::Seckill {
            voucher_id,
            user_id,
        } => {
            let ctx = RequestContext::for_user(user_id);
            let outcome = services.seckill.seckill_voucher(&ctx, voucher_id).await?;
            tracing::info!(state = ?outcome.state(), "purchase finished");
            print_json(&ApiResponse::<i64>::from(outcome))?;
        }
    }

    if let Some(report) = services.shutdown().await {
        tracing::info!(created = report.created, failed = report.failed, "queued orders written");
    }

    if cli.print_metrics
        && let Some(rendered) = metrics::render_metrics()
    {
        print!("{rendered}");
    }
    Ok(())
}
