/*!
Stowage CLI - Command-line interface for inspecting Stowage stores.

This CLI lists, reads and deletes keys in file-backed stores (device logs and
record directories), compacts device logs, and probes how well each
compressor handles a file.
*/

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use stowage_core::compression::CompressionKind;
use stowage_core::encryption::EncryptionKind;
use stowage_core::serialization::SerializerKind;
use stowage_core::storage::DeviceBackend;
use stowage_core::{
    AdapterConfig, BackendKind, CodecRegistries, CompressionManager, StorageAdapter,
    StorageContext, StowageConfig, SystemClock, Value,
};
use tabled::{Table, Tabled};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "stowage")]
#[command(about = "CLI for inspecting Stowage stores")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Store URI, e.g. device://./data/app.log or indexed://./data/records
    #[arg(short, long, global = true, env = "STOWAGE_STORE", conflicts_with = "config")]
    store: Option<String>,

    /// JSON configuration file
    #[arg(short, long, global = true, env = "STOWAGE_CONFIG")]
    config: Option<PathBuf>,

    /// Adapter to use from the configuration file (default adapter if omitted)
    #[arg(short, long, global = true, requires = "config")]
    adapter: Option<String>,

    /// Key prefix for --store
    #[arg(long, global = true, default_value = "")]
    prefix: String,

    /// Serializer for --store
    #[arg(long, global = true)]
    serializer: Option<String>,

    /// Compression algorithm for --store
    #[arg(long, global = true)]
    compression: Option<String>,

    /// Cipher for --store
    #[arg(long, global = true, requires = "key")]
    encryption: Option<String>,

    /// Encryption key for --store
    #[arg(long, global = true, env = "STOWAGE_KEY", hide_env_values = true)]
    key: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the keys in a store
    Keys {
        /// Show the type and a preview of each value
        #[arg(short, long)]
        detailed: bool,
    },
    /// Print a value as JSON
    Get {
        key: String,
    },
    /// Delete a key
    Remove {
        key: String,
        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,
    },
    /// Delete every key under the adapter's prefix
    Clear {
        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,
    },
    /// Rewrite a device log with one record per live key
    Compact,
    /// Run every compressor over a file and compare sizes
    Probe {
        file: PathBuf,
    },
}

#[derive(Tabled)]
struct KeyInfo {
    #[tabled(rename = "Key")]
    key: String,
    #[tabled(rename = "Type")]
    kind: String,
    #[tabled(rename = "Preview")]
    preview: String,
}

#[derive(Tabled)]
struct ProbeRow {
    #[tabled(rename = "Algorithm")]
    algorithm: String,
    #[tabled(rename = "Original")]
    original: String,
    #[tabled(rename = "Compressed")]
    compressed: String,
    #[tabled(rename = "Ratio")]
    ratio: String,
    #[tabled(rename = "Round trip")]
    round_trip: String,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose);

    // Execute command
    match &cli.command {
        Commands::Keys { detailed } => list_keys(&cli, *detailed).await?,
        Commands::Get { key } => show_value(&cli, key).await?,
        Commands::Remove { key, force } => remove_key(&cli, key, *force).await?,
        Commands::Clear { force } => clear_store(&cli, *force).await?,
        Commands::Compact => compact_store(&cli).await?,
        Commands::Probe { file } => probe_file(file)?,
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug"))
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Parse --config when it was given
fn load_config(cli: &Cli) -> Result<Option<StowageConfig>, anyhow::Error> {
    match &cli.config {
        Some(path) => Ok(Some(
            StowageConfig::from_json_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
        )),
        None => Ok(None),
    }
}

/// Resolve the adapter the command targets from --store or --config
fn resolve_adapter_config(cli: &Cli) -> Result<(AdapterConfig, usize), anyhow::Error> {
    if let Some(config) = load_config(cli)? {
        let name = cli
            .adapter
            .as_deref()
            .or_else(|| config.default_adapter_name())
            .ok_or_else(|| anyhow!("configuration has no adapters"))?;
        let adapter = config
            .adapter(name)
            .cloned()
            .ok_or_else(|| anyhow!("no adapter named '{name}' in configuration"))?;
        return Ok((adapter, config.compression_threshold));
    }

    let uri = cli
        .store
        .as_deref()
        .ok_or_else(|| anyhow!("pass --store <uri> or --config <file>"))?;
    let mut adapter = AdapterConfig::from_uri("cli", uri)?.with_prefix(cli.prefix.clone());
    adapter.serializer = cli.serializer.as_deref().map(SerializerKind::from);
    adapter.compression = cli.compression.as_deref().map(CompressionKind::from);
    adapter.encryption = cli.encryption.as_deref().map(EncryptionKind::from);
    adapter.key = cli.key.clone().filter(|_| adapter.encryption.is_some());
    adapter.validate()?;

    if matches!(adapter.backend, BackendKind::Memory | BackendKind::Session) {
        bail!("{} stores live in memory and cannot be inspected", adapter.backend.as_str());
    }
    Ok((adapter, StowageConfig::default().compression_threshold))
}

async fn open_adapter(cli: &Cli) -> Result<Arc<dyn StorageAdapter>, anyhow::Error> {
    let (adapter_config, threshold) = resolve_adapter_config(cli)?;
    info!("Opening {} adapter '{}'", adapter_config.backend.as_str(), adapter_config.name);

    let context = StorageContext::new(CodecRegistries::with_threshold(threshold));
    Ok(context
        .build_adapter(&adapter_config, Arc::new(SystemClock))
        .await?)
}

async fn list_keys(cli: &Cli, detailed: bool) -> Result<(), anyhow::Error> {
    let adapter = open_adapter(cli).await?;
    let keys = adapter.keys().await?;

    if keys.is_empty() {
        println!("No keys found");
        return Ok(());
    }
    if !detailed {
        for key in keys {
            println!("{key}");
        }
        return Ok(());
    }

    let mut rows = Vec::with_capacity(keys.len());
    for key in keys {
        let (kind, preview) = match adapter.try_get(&key).await {
            Ok(Some(value)) => (value.type_name().to_string(), preview(&value)),
            Ok(None) => ("-".to_string(), "(expired)".to_string()),
            Err(e) => ("error".to_string(), e.to_string()),
        };
        rows.push(KeyInfo { key, kind, preview });
    }
    println!("{}", Table::new(rows));
    Ok(())
}

async fn show_value(cli: &Cli, key: &str) -> Result<(), anyhow::Error> {
    let adapter = open_adapter(cli).await?;
    match adapter.try_get(key).await {
        Ok(Some(value)) => {
            println!("{}", serde_json::to_string_pretty(&value.to_json()?)?);
            Ok(())
        }
        Ok(None) => Err(anyhow!("key '{key}' not found")),
        Err(e) => {
            error!("Failed to read '{}': {}", key, e);
            Err(e.into())
        }
    }
}

fn confirm(prompt: &str) -> Result<bool, anyhow::Error> {
    use std::io::{self, Write};
    print!("{prompt} (y/N): ");
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_lowercase().starts_with('y'))
}

async fn remove_key(cli: &Cli, key: &str, force: bool) -> Result<(), anyhow::Error> {
    if !force && !confirm(&format!("Are you sure you want to delete '{key}'?"))? {
        println!("Deletion cancelled");
        return Ok(());
    }

    let adapter = open_adapter(cli).await?;
    adapter.remove(key).await?;
    println!("✓ Key deleted");
    Ok(())
}

async fn clear_store(cli: &Cli, force: bool) -> Result<(), anyhow::Error> {
    if !force && !confirm("Are you sure you want to delete every key in this store?")? {
        println!("Clear cancelled");
        return Ok(());
    }

    let adapter = open_adapter(cli).await?;
    let count = adapter.keys().await?.len();
    adapter.clear().await?;
    println!("✓ Deleted {count} keys");
    Ok(())
}

async fn compact_store(cli: &Cli) -> Result<(), anyhow::Error> {
    let (adapter_config, _) = resolve_adapter_config(cli)?;
    if adapter_config.backend != BackendKind::Device {
        bail!(
            "compact only applies to device stores, not {}",
            adapter_config.backend.as_str()
        );
    }
    let path = adapter_config
        .path
        .as_deref()
        .ok_or_else(|| anyhow!("device store has no path"))?;

    let backend = DeviceBackend::open(path).await?;
    let stats = backend.compact().await?;
    println!(
        "✓ Compacted {}: {} records -> {}",
        path.display(),
        stats.records_before,
        stats.records_after
    );
    Ok(())
}

fn probe_file(file: &Path) -> Result<(), anyhow::Error> {
    let data = std::fs::read_to_string(file)
        .with_context(|| format!("reading {}", file.display()))?;
    let manager = CompressionManager::new();
    let rows = probe_rows(&manager, &data);

    let best = manager.find_best_compression(&data);
    println!("{}", Table::new(rows));
    println!(
        "Best: {} ({})",
        if best.is_compressed() {
            best.algorithm.to_string()
        } else {
            "none".to_string()
        },
        format_size(best.compressed_size as u64)
    );
    Ok(())
}

/// One row per compressor, best ratio first
fn probe_rows(manager: &CompressionManager, data: &str) -> Vec<ProbeRow> {
    let mut results = manager.get_all_compression_results(data);
    results.sort_by(|a, b| a.ratio.partial_cmp(&b.ratio).unwrap_or(std::cmp::Ordering::Equal));

    results
        .into_iter()
        .map(|result| {
            let round_trip = match manager.decompress(&result) {
                Ok(restored) if restored == data => "✓".to_string(),
                Ok(_) => "✗ mismatch".to_string(),
                Err(e) => format!("✗ {e}"),
            };
            ProbeRow {
                algorithm: result.algorithm.to_string(),
                original: format_size(result.original_size as u64),
                compressed: format_size(result.compressed_size as u64),
                ratio: format!("{:.3}", result.ratio),
                round_trip,
            }
        })
        .collect()
}

/// One-line preview of a value, cut at 60 characters
fn preview(value: &Value) -> String {
    let text = value
        .to_json()
        .map(|json| json.to_string())
        .unwrap_or_else(|e| format!("<{e}>"));
    if text.chars().count() > 60 {
        let cut: String = text.chars().take(57).collect();
        format!("{cut}...")
    } else {
        text
    }
}

fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.1} {}", size, UNITS[unit_index])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn test_probe_rows_sorted_by_ratio() {
        // base64 lands above 1.0 while the others shrink this input well
        // below it, so string ordering would put "1.333" ahead of "0.050"
        let data = "abcabcabc ".repeat(200);
        let rows = probe_rows(&CompressionManager::new(), &data);
        let ratios: Vec<f64> = rows.iter().map(|row| row.ratio.parse().unwrap()).collect();

        assert_eq!(rows.len(), 6);
        assert!(ratios.windows(2).all(|pair| pair[0] <= pair[1]), "{ratios:?}");
        assert_eq!(rows.last().unwrap().algorithm, "base64");
        assert!(rows.iter().all(|row| row.round_trip == "✓"));
    }

    #[test]
    fn test_preview_truncates() {
        assert_eq!(preview(&Value::from("short")), "\"short\"");
        let long = preview(&Value::from("x".repeat(100)));
        assert_eq!(long.chars().count(), 60);
        assert!(long.ends_with("..."));
    }

    #[test]
    fn test_store_flags_build_pipeline_config() {
        let cli = Cli::try_parse_from([
            "stowage",
            "--store",
            "indexed://./records",
            "--prefix",
            "cart:",
            "--compression",
            "lzw",
            "--encryption",
            "xor",
            "--key",
            "k",
            "keys",
        ])
        .unwrap();

        let (config, threshold) = resolve_adapter_config(&cli).unwrap();
        assert_eq!(config.backend, BackendKind::Indexed);
        assert_eq!(config.prefix, "cart:");
        assert_eq!(config.compression, Some(CompressionKind::Lzw));
        assert_eq!(config.encryption, Some(EncryptionKind::Xor));
        assert_eq!(threshold, 100);
    }

    #[test]
    fn test_memory_store_is_rejected() {
        let cli = Cli::try_parse_from(["stowage", "--store", "memory://", "keys"]).unwrap();
        assert!(resolve_adapter_config(&cli).is_err());
    }

    #[tokio::test]
    async fn test_compact_from_config_file() {
        let temp_dir = TempDir::new().unwrap();
        let log = temp_dir.path().join("app.log");
        let config_path = temp_dir.path().join("stowage.json");
        std::fs::write(
            &config_path,
            serde_json::json!({
                "adapters": [{"name": "device", "backend": "device", "path": log}]
            })
            .to_string(),
        )
        .unwrap();

        let backend = DeviceBackend::open(&log).await.unwrap();
        let adapter = stowage_core::storage::DeviceStorage::new(backend);
        for i in 0..5i64 {
            adapter.set("counter", Value::from(i)).await.unwrap();
        }
        drop(adapter);

        let cli = Cli::try_parse_from([
            "stowage",
            "--config",
            config_path.to_str().unwrap(),
            "compact",
        ])
        .unwrap();
        compact_store(&cli).await.unwrap();
        assert_eq!(DeviceBackend::open(&log).await.unwrap().record_count(), 1);
    }
}
