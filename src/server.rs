//! Dev server: an axum static file server over the source root plus a
//! websocket endpoint that pushes "files changed" notifications to connected
//! browser tabs. Task units talk to it through a [`Notifier`] handle, which
//! silently drops notifications while no server is running.

use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use axum::Router;
use camino::Utf8PathBuf;
use console::style;
use tower_http::services::ServeDir;
use tungstenite::{Message, WebSocket};

use crate::config::ServerConfig;
use crate::error::ServerError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReloadMessage {
    pub paths: Vec<Utf8PathBuf>,
}

impl ReloadMessage {
    fn payload(&self) -> String {
        let paths: Vec<&str> = self.paths.iter().map(|p| p.as_str()).collect();
        serde_json::json!({
            "event": "reload",
            "paths": paths,
        })
        .to_string()
    }
}

/// Handle held by task units that notify the reload endpoint. Disconnected
/// until a server starts.
#[derive(Debug, Clone, Default)]
pub struct Notifier(Arc<Mutex<Option<Sender<ReloadMessage>>>>);

impl Notifier {
    pub fn connect(&self, tx: Sender<ReloadMessage>) {
        *self.0.lock().unwrap() = Some(tx);
    }

    /// Wire up an in-process receiver; used by tests and the server.
    pub fn connect_channel(&self) -> Receiver<ReloadMessage> {
        let (tx, rx) = std::sync::mpsc::channel();
        self.connect(tx);
        rx
    }

    pub fn notify(&self, paths: Vec<Utf8PathBuf>) {
        let guard = self.0.lock().unwrap();
        if let Some(tx) = guard.as_ref() {
            let _ = tx.send(ReloadMessage { paths });
        }
    }
}

pub struct ServerHandle {
    pub ws_port: u16,
    threads: Vec<JoinHandle<()>>,
}

impl ServerHandle {
    /// Block until the server threads exit, which in practice means until
    /// the process is torn down.
    pub fn wait(self) {
        for thread in self.threads {
            let _ = thread.join();
        }
    }
}

/// Start the websocket reload endpoint and the static file server, and
/// connect `notifier` to the reload broadcast.
pub fn start(config: &ServerConfig, notifier: &Notifier) -> Result<ServerHandle, ServerError> {
    let (tcp, ws_port) = reserve_port(config.ws_port)?;

    let clients = Arc::new(Mutex::new(vec![]));
    let thread_i = new_thread_ws_incoming(tcp, clients.clone());
    let (tx_reload, thread_o) = new_thread_ws_reload(clients);
    notifier.connect(tx_reload);

    let thread_http = new_thread_http(config.port, config.root.clone());

    tracing::info!(ws_port, "reload endpoint ready");

    Ok(ServerHandle {
        ws_port,
        threads: vec![thread_i, thread_o, thread_http],
    })
}

fn reserve_port(preferred: u16) -> Result<(TcpListener, u16), ServerError> {
    let listener = match TcpListener::bind(("127.0.0.1", preferred)) {
        Ok(sock) => sock,
        Err(_) => TcpListener::bind("127.0.0.1:0").map_err(ServerError::Bind)?,
    };

    let addr = listener.local_addr().map_err(ServerError::Bind)?;
    Ok((listener, addr.port()))
}

fn new_thread_ws_incoming(
    server: TcpListener,
    client: Arc<Mutex<Vec<WebSocket<TcpStream>>>>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        for stream in server.incoming() {
            let Ok(stream) = stream else { continue };
            match tungstenite::accept(stream) {
                Ok(socket) => client.lock().unwrap().push(socket),
                Err(e) => tracing::debug!("websocket handshake failed: {e}"),
            }
        }
    })
}

fn new_thread_ws_reload(
    client: Arc<Mutex<Vec<WebSocket<TcpStream>>>>,
) -> (Sender<ReloadMessage>, JoinHandle<()>) {
    let (tx, rx) = std::sync::mpsc::channel::<ReloadMessage>();

    let thread = std::thread::spawn(move || {
        while let Ok(message) = rx.recv() {
            let payload = message.payload();
            let mut clients = client.lock().unwrap();
            let mut broken = vec![];

            for (i, socket) in clients.iter_mut().enumerate() {
                match socket.send(Message::text(payload.clone())) {
                    Ok(_) => {}
                    Err(tungstenite::error::Error::Io(e)) => {
                        if e.kind() == std::io::ErrorKind::BrokenPipe {
                            broken.push(i);
                        }
                    }
                    Err(e) => {
                        tracing::error!("Error: {e:?}");
                    }
                }
            }

            for i in broken.into_iter().rev() {
                clients.remove(i);
            }

            // Close all but the last 10 connections
            let len = clients.len();
            if len > 10 {
                for mut socket in clients.drain(0..len - 10) {
                    socket.close(None).ok();
                }
            }
        }
    });

    (tx, thread)
}

fn new_thread_http(port: u16, root: Utf8PathBuf) -> JoinHandle<()> {
    let url = style(format!("http://localhost:{port}/")).yellow();
    eprintln!("Serving '{root}' on {url}");

    std::thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build();

        let result = match runtime {
            Ok(rt) => rt.block_on(serve(port, root)),
            Err(e) => Err(e.into()),
        };

        if let Err(e) = result {
            tracing::error!("dev server stopped: {e}");
        }
    })
}

async fn serve(port: u16, root: Utf8PathBuf) -> Result<(), anyhow::Error> {
    let address = SocketAddr::from(([127, 0, 0, 1], port));
    let address = tokio::net::TcpListener::bind(address).await?;

    let router = Router::new().fallback_service(ServeDir::new(root.as_std_path()));

    axum::serve(address, router).await?;

    Ok(())
}
