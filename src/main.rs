//! clinic-flow 命令行入口
//!
//! 用法：`clinic-flow <subject_id> <message...>`。初始化日志、加载配置、构建引擎，执行一次请求并打印结果。

use anyhow::{bail, Context};
use clinic_flow::{config::load_config, observability, AgentBuilder, RunRequest};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let mut args = std::env::args().skip(1);
    let Some(subject_id) = args.next() else {
        bail!("usage: clinic-flow <subject_id> <message...>");
    };
    let message = args.collect::<Vec<_>>().join(" ");
    if message.trim().is_empty() {
        bail!("usage: clinic-flow <subject_id> <message...>");
    }

    let config = load_config(None).context("Failed to load config")?;
    let tenant_id = config.app.tenant_id.clone();
    let engine = AgentBuilder::new(config)
        .build()
        .context("Failed to build workflow")?;

    let outcome = engine
        .run(RunRequest::new(subject_id, message).tenant(tenant_id))
        .await
        .context("Request failed")?;

    println!("{}", outcome.final_message);
    println!();
    println!(
        "route: {}",
        outcome
            .last_route
            .map(|r| r.to_string())
            .unwrap_or_else(|| "-".to_string())
    );
    println!("reasoning: {}", outcome.last_reasoning.as_deref().unwrap_or("-"));
    println!("steps: {}", outcome.steps);
    for status in engine.breaker_statuses() {
        println!("breaker {}: {} ({} failures)", status.name, status.state, status.failure_count);
    }
    Ok(())
}
