//! Agent health CLI command

use anyhow::Result;
use colored::Colorize;
use optimizer_lib::{ComponentStatus, HealthResponse, ReadinessResponse};
use serde::Serialize;
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{color_status, format_timestamp, print_json, print_table, OutputFormat};

/// Row for component health table
#[derive(Tabled)]
struct ComponentRow {
    #[tabled(rename = "Component")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Message")]
    message: String,
    #[tabled(rename = "Last Check")]
    last_check: String,
}

#[derive(Serialize)]
struct HealthOutput {
    health: HealthResponse,
    readiness: ReadinessResponse,
}

fn status_str(status: ComponentStatus) -> &'static str {
    match status {
        ComponentStatus::Healthy => "healthy",
        ComponentStatus::Degraded => "degraded",
        ComponentStatus::Unhealthy => "unhealthy",
    }
}

fn component_rows(health: &HealthResponse) -> Vec<ComponentRow> {
    let mut rows: Vec<ComponentRow> = health
        .components
        .iter()
        .map(|(name, c)| ComponentRow {
            name: name.clone(),
            status: color_status(status_str(c.status)),
            message: c.message.clone().unwrap_or_default(),
            last_check: format_timestamp(c.last_check_timestamp),
        })
        .collect();
    rows.sort_by(|a, b| a.name.cmp(&b.name));
    rows
}

/// Show agent health and readiness
pub async fn show_health(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let health = client.health().await?;
    let readiness = client.readiness().await?;

    match format {
        OutputFormat::Json => print_json(&HealthOutput { health, readiness })?,
        OutputFormat::Table => {
            println!("{}", "Agent Health".bold());
            println!("{}", "=".repeat(50));
            println!("Agent:  {}", client.base_url().as_str().cyan());
            println!("Status: {}", color_status(status_str(health.status)));
            let ready = if readiness.ready { "ready" } else { "not ready" };
            match &readiness.reason {
                Some(reason) => println!("Ready:  {} ({})", color_status(ready), reason),
                None => println!("Ready:  {}", color_status(ready)),
            }
            println!();
            print_table(component_rows(&health));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use optimizer_lib::ComponentHealth;
    use std::collections::HashMap;

    #[test]
    fn test_component_rows_sorted() {
        colored::control::set_override(false);
        let mut components = HashMap::new();
        components.insert("scheduler".to_string(), ComponentHealth::healthy());
        components.insert("cache".to_string(), ComponentHealth::degraded("hit rate low"));
        let health = HealthResponse {
            status: ComponentStatus::Degraded,
            components,
        };

        let rows = component_rows(&health);
        assert_eq!(rows[0].name, "cache");
        assert_eq!(rows[0].status, "degraded");
        assert_eq!(rows[0].message, "hit rate low");
        assert_eq!(rows[1].message, "");
    }
}
