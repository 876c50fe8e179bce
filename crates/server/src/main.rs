// Copyright (C) 2025 Sodep Developers
// SPDX-License-Identifier: Apache-2.0
use clap::Parser;
use log::{error, warn};
use std::path::PathBuf;

use sodep_core::game::Credits;

#[derive(Debug, Parser)]
struct Cli {
    /// The server listening address.
    #[clap(long, short, default_value = "127.0.0.1")]
    address: String,
    /// The server listening port.
    #[clap(long, short, default_value_t = 9871)]
    port: u16,
    /// Number of tables.
    #[clap(long, default_value_t = 10, value_parser = clap::value_parser!(u16).range(1..=100))]
    tables: u16,
    /// Number of seats per table, five card hands cap this at five.
    #[clap(long, default_value_t = 4, value_parser = clap::value_parser!(u8).range(2..=5))]
    seats: u8,
    /// The table minimum bet.
    #[clap(long, default_value_t = 10)]
    min_bet: i64,
    /// The table maximum bet.
    #[clap(long, default_value_t = 500)]
    max_bet: i64,
    /// The database file, defaults to the local data directory.
    #[clap(long)]
    db: Option<PathBuf>,
    /// The secret the hand sealing key derives from.
    #[clap(long)]
    secret: Option<String>,
}

#[tokio::main]
async fn main() {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();

    let secret = cli.secret.unwrap_or_else(|| {
        warn!("No --secret given, using the development sealing key");
        "sodep-dev-secret".to_string()
    });

    let config = sodep_server::Config {
        address: cli.address,
        port: cli.port,
        tables: cli.tables as usize,
        seats: cli.seats as usize,
        min_bet: Credits::new(cli.min_bet),
        max_bet: Credits::new(cli.max_bet),
        db_path: cli.db.or_else(default_db_path),
        secret,
    };

    if let Err(e) = sodep_server::run(config).await {
        error!("{e}");
    }
}

fn default_db_path() -> Option<PathBuf> {
    let dirs = directories::ProjectDirs::from("", "", "sodep")?;
    let dir = dirs.data_local_dir();
    std::fs::create_dir_all(dir).ok()?;
    Some(dir.join("sodep.db3"))
}
