//! Source listing and one-off fetches for the `sources` and `fetch`
//! commands.

use anyhow::{Context, Result};

use crate::definitions::Registries;
use crate::models::{Params, Table};

pub fn list_sources(registries: &Registries) -> Result<()> {
    println!("{:<16} {:<12} ENDPOINTS", "SOURCE", "KIND");
    for source in registries.sources.sources() {
        let name = source.source_name();
        let endpoints = registries
            .source_endpoints
            .get(name)
            .map(|e| e.join(", "))
            .unwrap_or_default();
        println!("{:<16} {:<12} {}", name, "api", endpoints);
    }

    println!();
    println!("{:<20} {:<20} PARAMETERS", "STATS ENDPOINT", "ASSET");
    for endpoint in registries.endpoints.endpoints() {
        println!(
            "{:<20} {:<20} {}",
            endpoint.name(),
            endpoint.name().to_lowercase(),
            endpoint.parameters().join(", ")
        );
    }

    Ok(())
}

/// Fetch and normalize one endpoint of a registered source.
pub async fn fetch_endpoint(
    registries: &Registries,
    source_name: &str,
    endpoint: &str,
    params: &Params,
) -> Result<Table> {
    let source = registries
        .sources
        .find(source_name)
        .with_context(|| format!("Unknown source: '{}'", source_name))?;

    let params = (!params.is_empty()).then_some(params);
    let raw = source
        .fetch_data(endpoint, params)
        .await
        .with_context(|| format!("Failed to fetch {}/{}", source_name, endpoint))?;
    let table = source.normalize_data(raw, endpoint)?;
    Ok(table)
}

/// Print a table as JSON lines.
pub fn print_json_lines(table: &Table) -> Result<()> {
    for row in table.rows() {
        println!("{}", serde_json::to_string(row)?);
    }
    Ok(())
}
