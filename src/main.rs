use anyhow::{Context, Result};
use nimbus_core::Config;
use nimbus_weather::{ClientConfig, ForecastCoordinator, WeatherClient};

fn main() -> Result<()> {
    // Initialize core
    nimbus_core::init()?;

    let config = Config::load_validated()?;

    let client = WeatherClient::new(ClientConfig::from(&config.weather))
        .context("Failed to build weather client")?;
    let coordinator = ForecastCoordinator::new(client);

    tracing::info!("Nimbus weather core ready");

    let weather = coordinator.client().config();
    println!("Nimbus - City Weather");
    println!("\nConfiguration:");
    println!("  Config directory: {}", config.config_dir.display());
    println!("  Provider: {}", weather.base_url);
    println!("  Language: {}", weather.lang);
    println!("  Units: {}", weather.units);
    println!(
        "  API key: {}",
        if config.weather.has_api_key() { "configured" } else { "missing" }
    );

    Ok(())
}
