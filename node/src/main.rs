//! Validator node binary.

use std::path::PathBuf;

use node::{Node, NodeConfig};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    println!("╔═══════════════════════════════════════════╗");
    println!("║         BFT REPLICATION ENGINE             ║");
    println!("╚═══════════════════════════════════════════╝");
    println!();

    let args: Vec<String> = std::env::args().collect();

    let config = if args.len() > 2 && args[1] == "--config" {
        let config_path = PathBuf::from(&args[2]);
        match NodeConfig::load(&config_path) {
            Ok(cfg) => {
                println!("Loaded config from: {:?}", config_path);
                cfg
            }
            Err(e) => {
                eprintln!("Failed to load config: {}", e);
                std::process::exit(1);
            }
        }
    } else if args.contains(&"--dev".to_string()) {
        println!("Running in development mode (single validator, no peers)...");
        NodeConfig::dev()
    } else {
        eprintln!("Usage: bftd --dev | --config <path>");
        std::process::exit(1);
    };

    match Node::new(config).await {
        Ok(mut node) => {
            println!("Node initialized.");
            println!("Press Ctrl+C to shutdown");
            println!();

            let shutdown_handle = tokio::spawn(async move {
                tokio::signal::ctrl_c().await.ok();
                println!("\nReceived shutdown signal...");
            });

            tokio::select! {
                result = node.run() => {
                    if let Err(e) = result {
                        eprintln!("Node error: {}", e);
                    }
                }
                _ = shutdown_handle => {
                    node.shutdown().await;
                }
            }

            println!("Node shutdown complete.");
        }
        Err(e) => {
            eprintln!("Failed to initialize node: {}", e);
            std::process::exit(1);
        }
    }
}
