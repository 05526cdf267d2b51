//! Load forecast CLI commands

use anyhow::Result;
use colored::Colorize;
use optimizer_lib::Forecast;
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{
    color_confidence, format_timestamp, print_json, print_table, print_warning, OutputFormat,
};

/// Row for forecasts table
#[derive(Tabled)]
struct ForecastRow {
    #[tabled(rename = "Horizon")]
    horizon: String,
    #[tabled(rename = "Expected Load")]
    expected_load: String,
    #[tabled(rename = "Confidence")]
    confidence: String,
    #[tabled(rename = "Samples")]
    samples: usize,
    #[tabled(rename = "Produced")]
    produced_at: String,
}

fn forecast_rows(forecasts: &[Forecast]) -> Vec<ForecastRow> {
    forecasts
        .iter()
        .map(|f| ForecastRow {
            horizon: f.horizon_label.clone(),
            expected_load: format!("{:.1}", f.expected_load),
            confidence: color_confidence(f.confidence),
            samples: f.sample_count,
            produced_at: format_timestamp(f.produced_at),
        })
        .collect()
}

/// Show forecasts, either one horizon or every horizon the agent has
pub async fn show_forecast(
    client: &ApiClient,
    horizon: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let forecasts = match horizon {
        Some(label) => match client.forecast(&label).await? {
            Some(forecast) => vec![forecast],
            None => {
                print_warning(&format!("No forecast available for horizon {}", label));
                return Ok(());
            }
        },
        None => client.report().await?.forecast_summary.forecasts,
    };

    match format {
        OutputFormat::Json => print_json(&forecasts)?,
        OutputFormat::Table => {
            println!("{}", "Load Forecasts".bold());
            if forecasts.is_empty() {
                print_warning("No forecasts yet; the agent needs captured load history");
                return Ok(());
            }
            print_table(forecast_rows(&forecasts));
        }
    }

    Ok(())
}
