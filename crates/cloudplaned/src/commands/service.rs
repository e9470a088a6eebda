use crate::commands::status::print_instance;
use crate::daemon::Daemon;
use colored::Colorize;

pub async fn enable(
    daemon: &Daemon,
    user: &str,
    cluster_id: u64,
    service: &str,
    version: &str,
    values: Option<&str>,
) -> anyhow::Result<()> {
    let config = match values {
        Some(raw) => serde_json::from_str(raw)
            .map_err(|e| anyhow::anyhow!("--values is not valid JSON: {}", e))?,
        None => serde_json::Value::Null,
    };

    let instance = daemon
        .api
        .enable(user, cluster_id, service, version, config)
        .await?;
    println!("{} {}", "Enabled".green(), instance.key());
    print_instance(&instance);
    Ok(())
}

pub async fn disable(
    daemon: &Daemon,
    user: &str,
    cluster_id: u64,
    service: &str,
) -> anyhow::Result<()> {
    let instance = daemon.api.disable(user, cluster_id, service).await?;
    println!("{} {}", "Disabled".yellow(), instance.key());
    print_instance(&instance);
    Ok(())
}

pub async fn retry(
    daemon: &Daemon,
    user: &str,
    cluster_id: u64,
    service: &str,
) -> anyhow::Result<()> {
    let instance = daemon.api.retry(user, cluster_id, service).await?;
    println!("{} {}", "Retry requested for".cyan(), instance.key());
    Ok(())
}

pub async fn detach(daemon: &Daemon, user: &str, cluster_id: u64) -> anyhow::Result<()> {
    let keys = daemon.api.detach_cluster(user, cluster_id).await?;
    println!(
        "{} cluster {} ({} services disabled)",
        "Detached".yellow(),
        cluster_id,
        keys.len()
    );
    Ok(())
}
