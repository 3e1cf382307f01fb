use std::env;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::{Duration, sleep};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use outpost_core::impls::{InMemoryOutboxStore, PgOutboxStore};
use outpost_core::ports::{OutboxStore, OutboxTransaction};
use outpost_core::{
    Consumer, ConsumerError, DomainEvent, Message, MessageType, Outbox, OutboxBuilder,
    OutboxConfig, OutboxWriter,
};

#[derive(Debug, Serialize, Deserialize)]
struct OrderCancelled {
    order_id: String,
    product_ids: Vec<String>,
}

impl DomainEvent for OrderCancelled {
    const NAME: &'static str = "OrderCancelled";
}

#[derive(Debug, Serialize, Deserialize)]
struct ReindexProduct {
    product_id: String,
}

impl Message for ReindexProduct {
    fn message_type() -> MessageType {
        MessageType::new("catalog.product.reindex.v1")
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SendReceipt {
    order_id: String,
    email: String,
}

impl Message for SendReceipt {
    fn message_type() -> MessageType {
        MessageType::new("mail.receipt.v1")
    }
}

struct OrderCacheInvalidator;

#[async_trait]
impl Consumer<OrderCancelled> for OrderCacheInvalidator {
    async fn consume(&self, event: OrderCancelled) -> Result<(), ConsumerError> {
        tracing::info!(order_id = %event.order_id, "evicted order from cache");
        Ok(())
    }
}

struct SearchReindexer;

#[async_trait]
impl Consumer<ReindexProduct> for SearchReindexer {
    async fn consume(&self, message: ReindexProduct) -> Result<(), ConsumerError> {
        tracing::info!(product_id = %message.product_id, "reindexed product");
        Ok(())
    }
}

/// Mail gateway that times out a few times before accepting.
struct ReceiptMailer {
    remaining_failures: AtomicU32,
}

impl ReceiptMailer {
    fn new(n: u32) -> Self {
        Self {
            remaining_failures: AtomicU32::new(n),
        }
    }
}

#[async_trait]
impl Consumer<SendReceipt> for ReceiptMailer {
    async fn consume(&self, message: SendReceipt) -> Result<(), ConsumerError> {
        let left = self.remaining_failures.load(Ordering::Relaxed);
        if left > 0 {
            self.remaining_failures.fetch_sub(1, Ordering::Relaxed);
            return Err(ConsumerError::new(format!(
                "mail gateway timeout (left={left})"
            )));
        }
        tracing::info!(order_id = %message.order_id, email = %message.email, "receipt sent");
        Ok(())
    }
}

fn env_bool(name: &str, default: bool) -> bool {
    env::var(name)
        .ok()
        .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "yes"))
        .unwrap_or(default)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if env_bool("OUTBOX_LOG_JSON", false) {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

fn build_outbox(store: Arc<dyn OutboxStore>, config: OutboxConfig) -> anyhow::Result<Outbox> {
    let outbox = OutboxBuilder::new(store)
        .config(config)
        .register_event::<OrderCancelled, _>(OrderCacheInvalidator)?
        .register::<ReindexProduct, _>(SearchReindexer)?
        .register::<SendReceipt, _>(ReceiptMailer::new(2))?
        .expect_types(&[
            "Event:OrderCancelled",
            "catalog.product.reindex.v1",
            "mail.receipt.v1",
        ])
        .build()?;
    Ok(outbox)
}

/// Enqueue the side effects of cancelling one order.
async fn cancel_order<T>(writer: &OutboxWriter, tx: &mut T, order_id: &str) -> anyhow::Result<()>
where
    T: OutboxTransaction + ?Sized,
{
    let product_ids = vec!["sku-1".to_string(), "sku-2".to_string()];
    writer
        .enqueue_event(
            &mut *tx,
            &OrderCancelled {
                order_id: order_id.to_string(),
                product_ids: product_ids.clone(),
            },
            None,
        )
        .await?;
    for product_id in product_ids {
        writer
            .enqueue(&mut *tx, &ReindexProduct { product_id }, None)
            .await?;
    }
    writer
        .enqueue(
            &mut *tx,
            &SendReceipt {
                order_id: order_id.to_string(),
                email: "buyer@example.com".to_string(),
            },
            None,
        )
        .await?;
    // Nobody consumes this one yet; it is processed as a no-op.
    writer
        .enqueue_raw(
            &mut *tx,
            MessageType::new("analytics.order.cancelled.v2"),
            &serde_json::json!({ "order_id": order_id }),
            None,
        )
        .await?;
    Ok(())
}

async fn seed_in_memory(store: &InMemoryOutboxStore, writer: &OutboxWriter) -> anyhow::Result<()> {
    let mut tx = store.begin();
    tx.put_entity("order:o-1001", serde_json::json!({ "status": "cancelled" }));
    cancel_order(writer, &mut tx, "o-1001").await?;
    tx.commit().await?;
    Ok(())
}

async fn seed_postgres(store: &PgOutboxStore, writer: &OutboxWriter) -> anyhow::Result<()> {
    let mut tx = store.begin().await?;
    cancel_order(writer, &mut tx, "o-1001").await?;
    tx.commit().await.context("commit order cancellation")?;
    Ok(())
}

/// Run the loops until everything enqueued is processed or Ctrl-C.
async fn drive(outbox: &Outbox) -> anyhow::Result<()> {
    let service = outbox.start();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                break;
            }
            _ = sleep(Duration::from_millis(200)) => {
                let status = outbox.status(1, 10).await?;
                if status.is_drained() {
                    tracing::info!(processed = status.counts.processed, "outbox drained");
                    break;
                }
            }
        }
    }

    service.shutdown_and_join().await;

    let status = outbox.status(1, 10).await?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = OutboxConfig::from_env().context("read outbox configuration")?;

    match env::var("DATABASE_URL") {
        Ok(url) => {
            tracing::info!("using PostgreSQL store");
            let store = PgOutboxStore::connect(&url, 5)
                .await
                .context("connect to DATABASE_URL")?;
            store.migrate().await.context("apply outbox migrations")?;
            let outbox = build_outbox(Arc::new(store.clone()), config)?;
            seed_postgres(&store, outbox.writer()).await?;
            drive(&outbox).await
        }
        Err(_) => {
            tracing::info!("DATABASE_URL not set, using in-memory store");
            let store = InMemoryOutboxStore::new();
            let outbox = build_outbox(Arc::new(store.clone()), config)?;
            seed_in_memory(&store, outbox.writer()).await?;
            drive(&outbox).await
        }
    }
}
