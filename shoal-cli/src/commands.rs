//! CLI command implementations

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Subcommand;
use shoal_core::config::ShoalConfig;
use shoal_core::content::{ContentAddressor, ContentRegistry, Locator};
use shoal_core::swarm::{
    HttpDiscovery, InMemoryDiscovery, SimulatorConfig, SwarmDiscovery, spawn_swarm_simulator,
};
use shoal_core::tracing_setup::{CliLogLevel, init_tracing};
use shoal_core::ShoalEngine;
use shoal_web::run_server;

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Start the API server and seed registered content
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Port to bind to
        #[arg(short, long, default_value = "3000")]
        port: u16,

        /// Directory for registry state and upload staging
        #[arg(long)]
        state_dir: Option<PathBuf>,

        /// Directory for stored video files
        #[arg(long)]
        library_dir: Option<PathBuf>,

        /// Run against an in-memory swarm with simulated peer churn
        #[arg(long)]
        simulate: bool,

        /// Restart seeding for every registered video at boot
        #[arg(long)]
        reseed: bool,

        /// Console log level
        #[arg(long, value_enum, default_value = "info")]
        log_level: CliLogLevel,
    },

    /// Compute the content id and locator for a local file
    Address {
        /// File to address
        file: PathBuf,
    },

    /// List registered videos from the durable registry
    List {
        /// Directory holding registry state
        #[arg(long)]
        state_dir: Option<PathBuf>,
    },
}

/// Handle the CLI command
///
/// # Errors
/// Returns appropriate error based on the command that fails
pub async fn handle_command(command: Commands) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Commands::Serve {
            host,
            port,
            state_dir,
            library_dir,
            simulate,
            reseed,
            log_level,
        } => {
            serve(
                host,
                port,
                state_dir,
                library_dir,
                simulate,
                reseed,
                log_level,
            )
            .await
        }
        Commands::Address { file } => address_file(file).await,
        Commands::List { state_dir } => list_registered(state_dir).await,
    }
}

/// Start the API server over a running engine
///
/// # Errors
/// - Tracing setup, engine startup, or server bind failures
#[allow(clippy::too_many_arguments)]
pub async fn serve(
    host: String,
    port: u16,
    state_dir: Option<PathBuf>,
    library_dir: Option<PathBuf>,
    simulate: bool,
    reseed: bool,
    log_level: CliLogLevel,
) -> Result<(), Box<dyn std::error::Error>> {
    init_tracing(log_level.as_tracing_level(), None)?;

    let mut config = ShoalConfig::from_env();
    if let Some(dir) = state_dir {
        config.storage.state_dir = dir;
    }
    if let Some(dir) = library_dir {
        config.storage.library_dir = dir;
    }

    let discovery: Arc<dyn SwarmDiscovery> = if simulate {
        tracing::info!("Using in-memory swarm discovery with simulated peers");
        Arc::new(InMemoryDiscovery::new())
    } else {
        Arc::new(HttpDiscovery::new(&config.discovery))
    };

    let engine = Arc::new(ShoalEngine::start(config, discovery).await?);

    if reseed {
        let started = engine.reseed_registered().await;
        tracing::info!("Reseeding started for {started} registered videos");
    }

    let simulator = simulate.then(|| {
        spawn_swarm_simulator(engine.session_table(), SimulatorConfig::default(), 42)
    });

    println!("Shoal node starting...");
    println!("API: http://{host}:{port}/api/*");
    println!("Press Ctrl+C to stop the server");

    let addr: SocketAddr = format!("{host}:{port}").parse()?;
    run_server(engine, addr).await?;

    if let Some(handle) = simulator {
        handle.abort();
    }

    Ok(())
}

/// Compute and print the content address of a local file
///
/// # Errors
/// - `ContentError` - File is empty or unreadable
pub async fn address_file(file: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let addressor = ContentAddressor::new();
    let manifest = addressor.address_file(&file).await?;

    let file_name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let config = ShoalConfig::from_env();
    let locator = Locator::build(&manifest, &file_name, &config.discovery.announce_urls);

    println!("Content Address");
    println!("{:-<60}", "");
    println!("File: {}", file.display());
    println!("Size: {}", format_size(manifest.total_length));
    println!(
        "Chunks: {} x {} bytes",
        manifest.chunk_count(),
        manifest.chunk_size
    );
    println!("Content id: {}", manifest.content_id);
    println!("Locator: {locator}");

    Ok(())
}

/// List the durable registry without starting a node
///
/// # Errors
/// - `RegistryError` - Registry state is unreadable
pub async fn list_registered(state_dir: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = ShoalConfig::from_env();
    if let Some(dir) = state_dir {
        config.storage.state_dir = dir;
    }

    let registry = ContentRegistry::load(&config.storage).await?;
    let entries = registry.list().await;

    println!("Registered Videos");
    println!("{:-<60}", "");

    if entries.is_empty() {
        println!("No videos registered yet.");
        println!("Use 'shoal serve' and upload through the API to add one.");
    } else {
        for entry in &entries {
            println!(
                "{}  {:>10}  {}",
                entry.content_id,
                format_size(entry.size),
                entry.file_name
            );
        }
        println!("\n{} videos registered", entries.len());
    }

    Ok(())
}

/// Human-readable byte count
fn format_size(bytes: u64) -> String {
    if bytes >= 1_073_741_824 {
        format!("{:.2} GB", bytes as f64 / 1_073_741_824.0)
    } else if bytes >= 1_048_576 {
        format!("{:.2} MB", bytes as f64 / 1_048_576.0)
    } else if bytes >= 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{bytes} B")
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_format_size_units() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(5 * 1_048_576), "5.00 MB");
        assert_eq!(format_size(3 * 1_073_741_824), "3.00 GB");
    }

    #[tokio::test]
    async fn test_address_local_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("clip.mp4");
        tokio::fs::write(&file, vec![1u8; 4096]).await.unwrap();

        let result = address_file(file).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_address_missing_file_fails() {
        let result = address_file(PathBuf::from("/nonexistent/clip.mp4")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_list_empty_registry() {
        let dir = TempDir::new().unwrap();
        let result = list_registered(Some(dir.path().to_path_buf())).await;
        assert!(result.is_ok());
    }
}
