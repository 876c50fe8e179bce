// Copyright (C) 2025 Sodep Developers
// SPDX-License-Identifier: Apache-2.0

//! Sodep server entry point.
use anyhow::{Result, anyhow, bail};
use log::{error, info};
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tokio::{
    net::{TcpListener, TcpStream},
    signal,
    sync::{broadcast, mpsc},
    time::{self, Duration},
};

use sodep_core::{
    connection::{self, EncryptedConnection},
    crypto::{HandCipher, PeerId, SigningKey},
    game::Credits,
    message::{Message, SignedMessage},
};

use crate::{
    db::Db,
    table::{Table, TableMessage},
    tables_pool::TablesPool,
};

/// Server config.
#[derive(Debug)]
pub struct Config {
    /// The server listening address.
    pub address: String,
    /// The server listening port.
    pub port: u16,
    /// The number of tables on this server.
    pub tables: usize,
    /// The number of seats per table.
    pub seats: usize,
    /// The table minimum bet.
    pub min_bet: Credits,
    /// The table maximum bet.
    pub max_bet: Credits,
    /// The database file, in memory when not given.
    pub db_path: Option<PathBuf>,
    /// The secret the hand sealing key derives from.
    pub secret: String,
}

/// The server that handles client connections and state.
struct Server {
    /// The tables on this server.
    tables: TablesPool,
    /// The server signing key shared by all connections.
    sk: Arc<SigningKey>,
    /// The server listener.
    listener: TcpListener,
    /// Shutdown notification channel.
    shutdown_broadcast_tx: broadcast::Sender<()>,
    /// Shutdown sender cloned by each connection.
    shutdown_complete_tx: mpsc::Sender<()>,
}

/// Client connection handler.
struct Handler {
    /// The table for this connection.
    table: Option<Arc<Table>>,
    /// This handler player id, set on the first join.
    player_id: Option<PeerId>,
    /// The tables on this server.
    tables: TablesPool,
    /// The server signing key shared by all connections.
    sk: Arc<SigningKey>,
    /// The sender the table uses to reach this connection.
    table_tx: mpsc::Sender<TableMessage>,
    /// Channel for listening shutdown notification.
    shutdown_broadcast_rx: broadcast::Receiver<()>,
    /// Sender that drops when this connection is done.
    _shutdown_complete_tx: mpsc::Sender<()>,
}

/// Server entry point.
pub async fn run(config: Config) -> Result<()> {
    if config.min_bet <= Credits::ZERO || config.min_bet > config.max_bet {
        bail!("Invalid bet bounds {} - {}", config.min_bet, config.max_bet);
    }

    let db = match &config.db_path {
        Some(path) => {
            info!("Opening database {}", path.display());
            Db::open(path)?
        }
        None => Db::open_in_memory()?,
    };

    let addr = format!("{}:{}", config.address, config.port);
    info!("Starting server listening on {addr}");

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| anyhow!("Tcp listener bind error: {e}"))?;

    let shutdown_signal = signal::ctrl_c();
    let (shutdown_broadcast_tx, _) = broadcast::channel(1);
    let (shutdown_complete_tx, mut shutdown_complete_rx) = mpsc::channel(1);

    let sk = Arc::new(SigningKey::default());
    let cipher = HandCipher::from_secret(&config.secret);
    let tables = TablesPool::new(
        config.tables,
        config.seats,
        config.min_bet,
        config.max_bet,
        sk.clone(),
        cipher,
        db,
        &shutdown_broadcast_tx,
        &shutdown_complete_tx,
    );

    let mut server = Server {
        tables,
        sk,
        listener,
        shutdown_broadcast_tx,
        shutdown_complete_tx,
    };

    tokio::select! {
        res = server.run() => {
            res.map_err(|e| anyhow!("Tcp listener accept error: {e}"))?;
        }
        _ = shutdown_signal => {
            info!("Received shutdown signal...");
        }
    }

    // Wait for all connections to shutdown.
    let Server {
        shutdown_broadcast_tx,
        shutdown_complete_tx,
        ..
    } = server;

    // Notify all connections to start shutdown then wait for all
    // connections to terminate and drop their shutdown channel.
    drop(shutdown_broadcast_tx);
    drop(shutdown_complete_tx);
    let _ = shutdown_complete_rx.recv().await;

    Ok(())
}

impl Server {
    /// Runs the server.
    async fn run(&mut self) -> Result<()> {
        loop {
            let (socket, addr) = self.accept_with_retry().await?;
            info!("Accepted connection from {addr}");

            let (table_tx, table_rx) = mpsc::channel(128);

            let mut handler = Handler {
                table: None,
                player_id: None,
                tables: self.tables.clone(),
                sk: self.sk.clone(),
                table_tx,
                shutdown_broadcast_rx: self.shutdown_broadcast_tx.subscribe(),
                _shutdown_complete_tx: self.shutdown_complete_tx.clone(),
            };

            // Spawn a task to handle connection messages.
            tokio::spawn(async move {
                if let Err(err) = handler.run(socket, table_rx).await {
                    error!("Connection to {addr} {err}");
                }

                info!("Connection to {addr} closed");
            });
        }
    }

    /// Accepts a connection with retries.
    async fn accept_with_retry(&self) -> Result<(TcpStream, SocketAddr)> {
        let mut retry = 0;
        loop {
            match self.listener.accept().await {
                Ok((socket, addr)) => {
                    return Ok((socket, addr));
                }
                Err(err) => {
                    if retry == 5 {
                        return Err(err.into());
                    }
                }
            }

            time::sleep(Duration::from_secs(1 << retry)).await;
            retry += 1;
        }
    }
}

impl Handler {
    /// Handle connection messages.
    async fn run(
        &mut self,
        socket: TcpStream,
        mut table_rx: mpsc::Receiver<TableMessage>,
    ) -> Result<()> {
        let mut conn = connection::accept_async(socket).await?;

        let res = loop {
            tokio::select! {
                _ = self.shutdown_broadcast_rx.recv() => {
                    break Ok(());
                }
                res = table_rx.recv() => match res {
                    Some(TableMessage::Send(msg)) => {
                        if let Err(e) = conn.send(&msg).await {
                            break Err(e);
                        }
                    }
                    Some(TableMessage::Close) | None => break Ok(()),
                },
                res = conn.recv() => match res {
                    Some(Ok(msg)) => {
                        let res = self.handle_message(&mut conn, msg).await;
                        if res.is_err() {
                            break res;
                        }
                    },
                    Some(Err(err)) => break Err(err),
                    None => break Ok(()),
                },
            }
        };

        conn.close().await;

        if let (Some(table), Some(player_id)) = (&self.table, &self.player_id) {
            table.leave(player_id).await;
        }

        res
    }

    async fn handle_message(
        &mut self,
        conn: &mut EncryptedConnection,
        msg: SignedMessage,
    ) -> Result<()> {
        let sender = msg.sender();
        match msg.message() {
            Message::JoinTable(nickname) => {
                if self.table.is_none() {
                    self.table = self
                        .tables
                        .join(&sender, nickname, self.table_tx.clone())
                        .await;
                    self.player_id = Some(sender);
                }

                if self.table.is_none() {
                    // Notify the client that there are no tables.
                    let msg = Message::Error("No table available".to_string());
                    conn.send(&SignedMessage::new(&self.sk, msg)).await?;
                    bail!("No table available");
                }
            }
            _ => {
                // The table keys every action on the verified message
                // sender, a relayed message cannot act for someone else.
                if let Some(table) = &self.table {
                    table.message(msg).await;
                } else {
                    bail!("Invalid message {sender} didn't join a table");
                }
            }
        }

        Ok(())
    }
}
