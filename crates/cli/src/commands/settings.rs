//! CLI configuration commands

use anyhow::Result;

use crate::client::ApiClient;
use crate::config::Config;
use crate::output::{print_info, print_json, print_success, OutputFormat};

/// Show the effective configuration
pub fn show_config(config: &Config, api_url: &str, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(config)?,
        OutputFormat::Table => {
            let path = Config::config_path()?;
            println!("Config file:    {}", path.display());
            println!("API URL:        {}", api_url);
            println!(
                "Default format: {}",
                match config.default_format.unwrap_or_default() {
                    OutputFormat::Table => "table",
                    OutputFormat::Json => "json",
                }
            );
        }
    }
    Ok(())
}

/// Persist the agent URL after checking it parses
pub fn set_api_url(mut config: Config, url: &str) -> Result<()> {
    ApiClient::new(url)?;
    config.api_url = Some(url.to_string());
    let path = config.save()?;
    print_success(&format!("API URL set to {}", url));
    print_info(&format!("Saved to {}", path.display()));
    Ok(())
}

/// Persist the default output format
pub fn set_format(mut config: Config, format: OutputFormat) -> Result<()> {
    config.default_format = Some(format);
    let path = config.save()?;
    print_success(&format!("Default format saved to {}", path.display()));
    Ok(())
}
