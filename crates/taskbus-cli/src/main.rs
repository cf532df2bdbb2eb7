use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};

use anyhow::Context;
use async_trait::async_trait;
use clap::Parser;
use serde::{Deserialize, Serialize};
use tokio::time::{Duration, Instant};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use taskbus_core::app::{Broker, BrokerBuilder};
use taskbus_core::config::BrokerConfig;
use taskbus_core::domain::{ProcessError, ResolutionKind, Signature};
use taskbus_core::impls::{InMemoryNamespace, InMemoryQueue};
use taskbus_core::typed::{Handler, Task, TypedRegistry};

/// in-memory の message bus に task を流して consume するデモ
#[derive(Debug, Parser)]
#[command(name = "taskbus", version, about)]
struct Args {
    /// 設定ファイル（無ければ default + TASKBUS__* 環境変数）
    #[arg(long, default_value = "taskbus")]
    config: String,

    /// default_queue を上書き
    #[arg(long)]
    queue: Option<String>,

    #[arg(long, default_value_t = 4)]
    concurrency: usize,

    /// 登録済み task の数
    #[arg(long, default_value_t = 10)]
    tasks: usize,

    /// 未登録 task の数（abandon → max delivery count で dead-letter）
    #[arg(long, default_value_t = 2)]
    unregistered: usize,

    /// greet を N 回に 1 回失敗させる（0 で失敗しない）
    #[arg(long, default_value_t = 0)]
    fail_every: u32,

    /// 最初の task を N 秒後に scheduled delivery する
    #[arg(long, default_value_t = 0)]
    delay_secs: u64,

    /// queue がこの時間 idle なら停止する
    #[arg(long, default_value_t = 500)]
    idle_timeout_ms: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct Greet {
    name: String,
}

impl Task for Greet {
    const NAME: &'static str = "greet";
}

#[derive(Debug, Serialize, Deserialize)]
struct Add {
    a: i64,
    b: i64,
}

impl Task for Add {
    const NAME: &'static str = "add";
}

struct GreetHandler {
    calls: Arc<AtomicU32>,
    fail_every: u32,
}

#[async_trait]
impl Handler<Greet> for GreetHandler {
    async fn handle(&self, task: Greet) -> Result<(), ProcessError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_every > 0 && call % self.fail_every == 0 {
            return Err(ProcessError::new(format!("intentional failure (call={call})")));
        }
        info!(name = %task.name, "hello");
        Ok(())
    }
}

struct AddHandler {
    total: Arc<AtomicI64>,
}

#[async_trait]
impl Handler<Add> for AddHandler {
    async fn handle(&self, task: Add) -> Result<(), ProcessError> {
        self.total.fetch_add(task.a + task.b, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let mut config = BrokerConfig::load(&args.config).context("loading configuration")?;
    if let Some(queue) = &args.queue {
        config = config.with_default_queue(queue.clone());
    }

    // (A) namespace と queue を用意
    let namespace = Arc::new(
        InMemoryNamespace::new().with_max_delivery_count(config.transport.max_delivery_count),
    );
    let queue = namespace.create_queue(&config.default_queue);

    // (B) handler を登録
    let greet_calls = Arc::new(AtomicU32::new(0));
    let add_total = Arc::new(AtomicI64::new(0));
    let mut registry = TypedRegistry::new();
    registry.register::<Greet, _>(GreetHandler {
        calls: greet_calls.clone(),
        fail_every: args.fail_every,
    })?;
    registry.register::<Add, _>(AddHandler {
        total: add_total.clone(),
    })?;

    let broker = Arc::new(
        BrokerBuilder::new(config)
            .namespace(namespace)
            .registered_tasks(registry.registered_names())
            .build()
            .await?,
    );

    // (C) task を投入
    for signature in demo_signatures(&args)? {
        broker.publish(signature).await?;
    }
    info!(
        tasks = args.tasks,
        unregistered = args.unregistered,
        "published"
    );

    // (D) consume しつつ Ctrl-C か idle を待つ
    let consuming = tokio::spawn({
        let broker = broker.clone();
        let concurrency = args.concurrency;
        async move {
            broker
                .start_consuming("taskbus-cli", concurrency, Arc::new(registry))
                .await
        }
    });

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("listening for ctrl-c")?;
            info!("ctrl-c received, stopping");
        }
        _ = wait_until_idle(&queue, Duration::from_millis(args.idle_timeout_ms)) => {
            info!("queue idle, stopping");
        }
    }

    // (E) graceful shutdown（処理中のメッセージは終端まで待つ）
    broker.stop_consuming().await;
    let retry = consuming.await??;

    print_summary(&queue, &greet_calls, &add_total, retry);
    Ok(())
}

fn demo_signatures(args: &Args) -> anyhow::Result<Vec<Signature>> {
    let mut signatures = Vec::with_capacity(args.tasks + args.unregistered);
    for i in 0..args.tasks {
        let signature = if i % 2 == 0 {
            Greet {
                name: format!("user-{i}"),
            }
            .to_signature()?
        } else {
            let a = i64::try_from(i)?;
            Add { a, b: a * 2 }.to_signature()?
        };
        signatures.push(signature);
    }
    for _ in 0..args.unregistered {
        signatures.push(Signature::new("unregistered", vec![]));
    }

    if args.delay_secs > 0 {
        let delay = chrono::Duration::seconds(i64::try_from(args.delay_secs)?);
        if let Some(first) = signatures.first_mut() {
            first.eta = Some(chrono::Utc::now() + delay);
        }
    }
    Ok(signatures)
}

async fn wait_until_idle(queue: &InMemoryQueue, idle_for: Duration) {
    let mut idle_since: Option<Instant> = None;
    let mut tick = tokio::time::interval(Duration::from_millis(50));
    loop {
        tick.tick().await;
        if !queue.is_idle() {
            idle_since = None;
            continue;
        }
        let since = *idle_since.get_or_insert_with(Instant::now);
        if since.elapsed() >= idle_for {
            return;
        }
    }
}

fn print_summary(queue: &InMemoryQueue, greet_calls: &AtomicU32, add_total: &AtomicI64, retry: bool) {
    println!(
        "settlements: acknowledge={} abandon={} dead_letter={}",
        queue.settlement_count(ResolutionKind::Acknowledge),
        queue.settlement_count(ResolutionKind::Abandon),
        queue.settlement_count(ResolutionKind::DeadLetter),
    );
    for dead in queue.dead_letters() {
        println!("dead-letter: id={} reason={}", dead.message.id, dead.reason);
    }
    println!(
        "greet calls={} add total={} retry={retry}",
        greet_calls.load(Ordering::SeqCst),
        add_total.load(Ordering::SeqCst),
    );
}
