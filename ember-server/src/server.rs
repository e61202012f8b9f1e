use crate::commands::{self, CmdFn};
use crate::error::ServerResult;
use crate::resp::{self, Reply};
use ember_core::{Config, Db, EmberResult};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

/// The line-protocol front-end. Owns the engine and the verb registry;
/// serves one tokio task per connection.
#[derive(Clone)]
pub struct Server {
    db: Arc<Db>,
    commands: Arc<HashMap<&'static str, CmdFn>>,
}

impl Server {
    /// Opens the engine and builds the verb registry.
    pub fn new(config: Config) -> EmberResult<Server> {
        let db = Db::open(config)?;
        Ok(Server {
            db: Arc::new(db),
            commands: Arc::new(commands::registry()),
        })
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    /// Binds `addr` and accepts connections until the task is dropped.
    pub async fn listen(&self, addr: &str) -> ServerResult<()> {
        let listener = TcpListener::bind(addr).await?;
        info!(%addr, "ember is running, ready to accept connections");
        self.serve(listener).await
    }

    /// Accept loop over an already-bound listener.
    pub async fn serve(&self, listener: TcpListener) -> ServerResult<()> {
        loop {
            let (stream, peer) = listener.accept().await?;
            debug!(%peer, "client connected");
            let db = Arc::clone(&self.db);
            let commands = Arc::clone(&self.commands);
            tokio::spawn(async move {
                if let Err(err) = handle_connection(db, commands, stream).await {
                    warn!(%peer, error = %err, "connection closed with error");
                }
            });
        }
    }

    /// Flushes and closes the engine. Safe to call more than once.
    pub fn stop(&self) -> EmberResult<()> {
        self.db.close()
    }
}

async fn handle_connection(
    db: Arc<Db>,
    commands: Arc<HashMap<&'static str, CmdFn>>,
    stream: TcpStream,
) -> ServerResult<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    loop {
        let frame = match resp::read_command(&mut reader).await? {
            Some(frame) => frame,
            None => break,
        };
        if frame.is_empty() {
            continue;
        }

        let verb = String::from_utf8_lossy(&frame[0]).to_lowercase();
        let reply = match commands.get(verb.as_str()) {
            None => Reply::Error(format!("ERR unknown command '{}'", verb)),
            Some(command) => match command(&db, &frame[1..]) {
                Ok(reply) => reply,
                Err(err) => Reply::Error(format!("ERR {}", err)),
            },
        };
        resp::write_reply(&mut write_half, &reply).await?;
    }
    Ok(())
}
