use crate::daemon::Daemon;
use cloudplane_services::{ManagementStatus, Phase, ServiceError, ServiceInstance};
use colored::Colorize;

pub async fn handle(daemon: &Daemon, user: &str, cluster_id: Option<u64>) -> anyhow::Result<()> {
    let cluster_ids: Vec<u64> = match cluster_id {
        Some(id) => vec![id],
        None => {
            let mut ids: Vec<u64> = daemon.clusters.iter().map(|c| c.id).collect();
            ids.sort_unstable();
            ids
        }
    };

    let mut shown = 0;
    for id in cluster_ids {
        let instances = match daemon.api.list(user, id).await {
            Ok(instances) => instances,
            // Only the clusters the user may see are listed
            Err(ServiceError::Forbidden { .. }) if cluster_id.is_none() => continue,
            Err(e) => return Err(e.into()),
        };

        for instance in &instances {
            print_instance(instance);
            shown += 1;
        }
    }

    if shown == 0 {
        println!("{}", "No integrated services".dimmed());
    }
    Ok(())
}

pub fn print_instance(instance: &ServiceInstance) {
    let status = &instance.status;
    let phase = match status.phase {
        Some(phase) => colored_phase(phase),
        None => "-".dimmed().to_string(),
    };
    let management = match status.management_status {
        ManagementStatus::Invalid => status.management_status.to_string().red().to_string(),
        _ => status.management_status.to_string(),
    };

    println!(
        "{}  {}  {}  installed={}  requested={}{}",
        instance.key().to_string().bold(),
        phase,
        management,
        status.installed_version.as_deref().unwrap_or("-"),
        instance.spec.requested_version,
        if instance.spec.enabled {
            String::new()
        } else {
            " (disabled)".dimmed().to_string()
        }
    );
    if let Some(message) = &status.message {
        println!("    {}", message.yellow());
    }
    println!(
        "    generation {} (observed {}), updated {}",
        instance.generation,
        status.observed_generation,
        status.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
}

fn colored_phase(phase: Phase) -> String {
    if phase.is_failed() {
        phase.as_str().red().to_string()
    } else if phase.is_terminal_success() {
        phase.as_str().green().to_string()
    } else {
        phase.as_str().cyan().to_string()
    }
}
