//! Report, pool and action CLI commands

use anyhow::Result;
use colored::Colorize;
use optimizer_lib::{AppliedAction, OptimizationReport};
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{
    color_status, color_utilization, format_ratio, format_timestamp, print_heading, print_info,
    print_json, print_table, print_warning, OutputFormat,
};

/// Row for cache levels table
#[derive(Tabled)]
struct LevelRow {
    #[tabled(rename = "Level")]
    tier: String,
    #[tabled(rename = "Policy")]
    policy: String,
    #[tabled(rename = "Entries")]
    entries: String,
    #[tabled(rename = "TTL")]
    ttl: String,
    #[tabled(rename = "Hits")]
    hits: u64,
}

/// Row for pools table
#[derive(Tabled)]
struct PoolRow {
    #[tabled(rename = "Pool")]
    name: String,
    #[tabled(rename = "In Use")]
    in_use: String,
    #[tabled(rename = "Bounds")]
    bounds: String,
    #[tabled(rename = "Utilization")]
    utilization: String,
    #[tabled(rename = "Acquired")]
    acquired: u64,
    #[tabled(rename = "Reclaimed")]
    reclaimed: u64,
}

/// Row for actions table
#[derive(Tabled)]
struct ActionRow {
    #[tabled(rename = "Applied")]
    applied_at: String,
    #[tabled(rename = "Rule")]
    rule: String,
    #[tabled(rename = "Value")]
    value: String,
    #[tabled(rename = "Threshold")]
    threshold: String,
    #[tabled(rename = "Actions")]
    actions: String,
}

fn pool_rows(report: &OptimizationReport) -> Vec<PoolRow> {
    report
        .pools
        .iter()
        .map(|p| PoolRow {
            name: p.name.clone(),
            in_use: format!("{}/{}", p.in_use, p.capacity),
            bounds: format!("{}..{}", p.min_capacity, p.max_capacity),
            utilization: color_utilization(p.utilization),
            acquired: p.total_acquired,
            reclaimed: p.total_reclaimed,
        })
        .collect()
}

fn action_rows(actions: &[AppliedAction]) -> Vec<ActionRow> {
    actions
        .iter()
        .rev()
        .map(|a| ActionRow {
            applied_at: format_timestamp(a.applied_at),
            rule: a.rule.as_str().to_string(),
            value: format!("{:.1}", a.trigger_value),
            threshold: format!("{:.1}", a.threshold),
            actions: a.actions.join(", "),
        })
        .collect()
}

fn on_off(enabled: bool) -> String {
    color_status(if enabled { "on" } else { "off" })
}

/// Show the full optimization report
pub async fn show_report(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let report = client.report().await?;

    if format == OutputFormat::Json {
        return print_json(&report);
    }

    println!("{}", "Optimization Report".bold());
    println!("Agent:     {}", client.base_url().as_str().cyan());
    println!("Generated: {}", report.generated_at.format("%Y-%m-%d %H:%M:%S"));

    let perf = &report.performance_averages;
    print_heading("Performance");
    if perf.samples == 0 {
        print_info("No samples collected yet");
    } else {
        println!("CPU:           {:.1}%", perf.cpu_percent);
        println!("Memory:        {:.1}%", perf.memory_percent);
        println!("Response time: {:.1} ms", perf.response_time_ms);
        println!("Throughput:    {:.1}/s", perf.throughput_per_sec);
        println!("Error rate:    {:.2}%", perf.error_rate_percent);
        println!("Samples:       {}", perf.samples);
    }

    let cache = &report.cache_stats;
    print_heading("Cache");
    println!(
        "Hit rate: {}  ({} hits, {} misses)",
        format_ratio(cache.hit_rate),
        cache.hits,
        cache.misses
    );
    println!(
        "Evictions: {}  Promotions: {}  Expirations: {}  Scale: {:.2}",
        cache.evictions, cache.promotions, cache.expirations, cache.scale
    );
    let levels = cache
        .levels
        .iter()
        .map(|l| LevelRow {
            tier: format!("{:?}", l.tier),
            policy: format!("{:?}", l.policy).to_uppercase(),
            entries: format!("{}/{}", l.entries, l.max_entries),
            ttl: format!("{}s", l.ttl_ms / 1000),
            hits: l.hits,
        })
        .collect();
    print_table(levels);

    let queues = &report.queue_depths;
    print_heading("Scheduler");
    println!(
        "Queued: {} high, {} medium, {} low",
        queues.high, queues.medium, queues.low
    );
    println!(
        "In flight: {}  Load: {}/{}",
        queues.in_flight, queues.current_load, queues.max_capacity
    );

    print_heading("Pools");
    println!("Efficiency: {}", format_ratio(report.pool_efficiency));
    print_table(pool_rows(&report));

    let forecast = &report.forecast_summary;
    print_heading("Forecast");
    println!(
        "Buckets: {}  Observations: {}  Peak: {:.1}  Mean confidence: {}",
        forecast.buckets_tracked,
        forecast.observations,
        forecast.peak_expected_load,
        format_ratio(forecast.mean_confidence)
    );

    let flags = &report.flags;
    print_heading("Flags");
    println!("Redundancy mode:   {}", on_off(flags.redundancy_mode));
    println!(
        "Circuit breaker:   {}",
        color_status(if flags.circuit_breaker_open { "open" } else { "closed" })
    );
    println!("Lightweight first: {}", on_off(flags.lightweight_first));
    println!("Capacity boost:    x{:.2}", flags.capacity_boost);
    println!("Cache scale:       x{:.2}", flags.cache_scale);

    print_heading("Recent Actions");
    print_table(action_rows(&report.recent_actions));

    let warnings = report.warnings();
    if !warnings.is_empty() {
        println!();
        for warning in &warnings {
            print_warning(warning);
        }
    }

    Ok(())
}

/// Show resource pool utilization
pub async fn show_pools(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let report = client.report().await?;

    match format {
        OutputFormat::Json => print_json(&report.pools)?,
        OutputFormat::Table => {
            println!(
                "{} (efficiency {})",
                "Resource Pools".bold(),
                format_ratio(report.pool_efficiency)
            );
            print_table(pool_rows(&report));
        }
    }

    Ok(())
}

/// Show the most recent optimization actions, newest first
pub async fn show_actions(client: &ApiClient, limit: usize, format: OutputFormat) -> Result<()> {
    let report = client.report().await?;
    let skip = report.recent_actions.len().saturating_sub(limit);
    let recent = &report.recent_actions[skip..];

    match format {
        OutputFormat::Json => print_json(&recent)?,
        OutputFormat::Table => {
            println!("{}", "Optimization Actions".bold());
            print_table(action_rows(recent));
            println!("\nShowing {} of {}", recent.len(), report.recent_actions.len());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use optimizer_lib::OptimizationRule;

    #[test]
    fn test_action_rows_newest_first() {
        colored::control::set_override(false);
        let actions = vec![
            AppliedAction {
                rule: OptimizationRule::CpuHigh,
                trigger_value: 91.0,
                threshold: 80.0,
                actions: vec!["cache scaled x0.80".to_string()],
                applied_at: 100,
            },
            AppliedAction {
                rule: OptimizationRule::LatencyHigh,
                trigger_value: 250.0,
                threshold: 200.0,
                actions: vec!["a".to_string(), "b".to_string()],
                applied_at: 200,
            },
        ];

        let rows = action_rows(&actions);
        assert_eq!(rows[0].rule, "latency_high");
        assert_eq!(rows[0].actions, "a, b");
        assert_eq!(rows[1].value, "91.0");
    }
}
