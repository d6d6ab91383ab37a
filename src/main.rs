use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::json;
use tracing_subscriber::EnvFilter;

use washalert::config::Config;
use washalert::identity::IdentityContext;
use washalert::lifecycle::NotificationPipeline;
use washalert::notifications::router::{NavigationTarget, Navigator};
use washalert::platform::PermissionState;
use washalert::platform::memory::InMemoryPlatform;
use washalert::stream::memory::InMemoryChangeStream;
use washalert::stream::record::ChangeRecord;

struct PrintingNavigator;

impl Navigator for PrintingNavigator {
    fn navigate(&self, target: NavigationTarget) {
        println!("navigate -> {}", target.route());
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref()).context("loading config")?;
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging().level()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    println!("washalert (in-memory provider walkthrough)");
    let backend = InMemoryChangeStream::new();
    let platform = InMemoryPlatform::new(PermissionState::Undetermined);
    let pipeline = NotificationPipeline::new(
        Arc::new(backend.clone()),
        Arc::new(platform.clone()),
        Arc::new(PrintingNavigator),
        &config,
    );
    pipeline.start_tap_routing().await;

    let section = pipeline.register(IdentityContext::provider("provider-1", None));
    let state = section.ready().await;
    println!("section {state:?} with {} subscription(s)", section.subscription_count());

    let table = config.stream().table().to_string();
    let mut delivered = 0;
    for _ in 0..50 {
        delivered = backend.emit(ChangeRecord::insert(
            table.clone(),
            json!({"id": "r1", "status": "pending", "address": "12 Rue X"}),
        ));
        if delivered > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    if delivered == 0 {
        anyhow::bail!("change stream never connected");
    }

    let mut presented = Vec::new();
    for _ in 0..50 {
        presented = platform.presented();
        if !presented.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let notification = presented.first().context("no notification was presented")?;
    println!(
        "presented \"{}\": {} {}",
        notification.title, notification.body, notification.data
    );

    platform.tap(notification.data.clone());
    tokio::time::sleep(Duration::from_millis(50)).await;

    section.dispose();
    pipeline.router().stop();
    Ok(())
}
