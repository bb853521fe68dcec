//! Live push channel.
//!
//! A plain TCP listener upgrades connections to WebSocket and fans
//! per-epoch JSON frames out to every client. The server is best-effort:
//! a client whose send fails is dropped silently and the epoch loop never
//! notices. Inbound `pause` / `play` text frames flip the shared pause
//! flag the driver checks between epochs.

use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tungstenite::{Message, WebSocket};

/// Default port the drivers listen on
pub const DEFAULT_PORT: u16 = 8080;

pub struct LiveServer {
    port: u16,
    clients: Arc<Mutex<Vec<Sender<String>>>>,
    paused: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
}

impl LiveServer {
    /// Bind the listener and start accepting clients on a background
    /// thread. The given pause flag is shared with the driver.
    pub fn start(port: u16, paused: Arc<AtomicBool>) -> std::io::Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", port))?;
        let port = listener.local_addr()?.port();
        listener.set_nonblocking(true)?;

        let clients: Arc<Mutex<Vec<Sender<String>>>> = Arc::new(Mutex::new(Vec::new()));
        let running = Arc::new(AtomicBool::new(true));

        {
            let clients = Arc::clone(&clients);
            let paused = Arc::clone(&paused);
            let running = Arc::clone(&running);
            thread::spawn(move || accept_loop(listener, clients, paused, running));
        }

        println!("WebSocket server listening on port {}", port);
        Ok(Self {
            port,
            clients,
            paused,
            running,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Queue a text frame for every connected client. Clients that have
    /// gone away are dropped here.
    pub fn broadcast(&self, message: &str) {
        let mut clients = self.clients.lock().unwrap();
        clients.retain(|tx| tx.send(message.to_string()).is_ok());
    }

    pub fn has_clients(&self) -> bool {
        !self.clients.lock().unwrap().is_empty()
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().unwrap().len()
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

impl Drop for LiveServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn accept_loop(
    listener: TcpListener,
    clients: Arc<Mutex<Vec<Sender<String>>>>,
    paused: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::Relaxed) {
        match listener.accept() {
            Ok((stream, _addr)) => {
                let clients = Arc::clone(&clients);
                let paused = Arc::clone(&paused);
                let running = Arc::clone(&running);
                thread::spawn(move || {
                    if let Err(e) = handle_client(stream, clients, paused, running) {
                        eprintln!("WebSocket client error: {}", e);
                    }
                });
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(100));
            }
            Err(e) => {
                eprintln!("WebSocket accept error: {}", e);
                break;
            }
        }
    }
}

/// One thread per client: forward queued broadcast frames and watch for
/// pause / play commands. Any error ends the client.
fn handle_client(
    stream: TcpStream,
    clients: Arc<Mutex<Vec<Sender<String>>>>,
    paused: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
) -> Result<(), Box<dyn std::error::Error>> {
    stream.set_nonblocking(false)?;
    let mut ws = tungstenite::accept(stream)?;
    // short read timeout so the loop alternates between inbound commands
    // and queued outbound frames
    ws.get_ref()
        .set_read_timeout(Some(Duration::from_millis(50)))?;

    let (tx, rx): (Sender<String>, Receiver<String>) = mpsc::channel();
    {
        let mut clients = clients.lock().unwrap();
        clients.push(tx);
        println!("WebSocket client connected ({} total)", clients.len());
    }

    let result = client_loop(&mut ws, &rx, &paused, &running);
    println!("WebSocket client disconnected");
    result
}

fn client_loop(
    ws: &mut WebSocket<TcpStream>,
    rx: &Receiver<String>,
    paused: &AtomicBool,
    running: &AtomicBool,
) -> Result<(), Box<dyn std::error::Error>> {
    loop {
        if !running.load(Ordering::Relaxed) {
            let _ = ws.close(None);
            return Ok(());
        }

        match ws.read() {
            Ok(Message::Text(text)) => match text.as_str() {
                "pause" => {
                    paused.store(true, Ordering::Relaxed);
                    println!("Simulation paused by client");
                }
                "play" => {
                    paused.store(false, Ordering::Relaxed);
                    println!("Simulation resumed by client");
                }
                _ => {}
            },
            Ok(Message::Close(_)) => return Ok(()),
            Ok(_) => {}
            Err(tungstenite::Error::Io(ref e))
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                // no inbound traffic; flush any queued frames
                loop {
                    match rx.try_recv() {
                        Ok(frame) => ws.send(Message::Text(frame))?,
                        Err(TryRecvError::Empty) => break,
                        Err(TryRecvError::Disconnected) => return Ok(()),
                    }
                }
            }
            Err(tungstenite::Error::ConnectionClosed)
            | Err(tungstenite::Error::AlreadyClosed) => return Ok(()),
            Err(e) => return Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wait_until<F: Fn() -> bool>(cond: F) -> bool {
        for _ in 0..100 {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(20));
        }
        false
    }

    #[test]
    fn broadcast_without_clients_is_a_no_op() {
        let paused = Arc::new(AtomicBool::new(false));
        let server = LiveServer::start(0, paused).unwrap();
        server.broadcast("{\"epoch\":0}");
        assert!(!server.has_clients());
    }

    #[test]
    fn client_receives_frames_and_can_pause() {
        let paused = Arc::new(AtomicBool::new(false));
        let server = LiveServer::start(0, Arc::clone(&paused)).unwrap();

        let url = format!("ws://127.0.0.1:{}", server.port());
        let (mut client, _response) = tungstenite::connect(url).unwrap();

        assert!(wait_until(|| server.has_clients()));

        // inbound command flips the shared pause flag
        client.send(Message::Text("pause".to_string())).unwrap();
        assert!(wait_until(|| paused.load(Ordering::Relaxed)));

        client.send(Message::Text("play".to_string())).unwrap();
        assert!(wait_until(|| !paused.load(Ordering::Relaxed)));

        // outbound frame arrives
        server.broadcast("{\"epoch\":1,\"entropy\":0.5}");
        let message = client.read().unwrap();
        assert_eq!(
            message.into_text().unwrap(),
            "{\"epoch\":1,\"entropy\":0.5}"
        );

        server.stop();
    }

    #[test]
    fn dropped_client_is_pruned_on_broadcast() {
        let paused = Arc::new(AtomicBool::new(false));
        let server = LiveServer::start(0, paused).unwrap();

        let url = format!("ws://127.0.0.1:{}", server.port());
        let (mut client, _response) = tungstenite::connect(url).unwrap();
        assert!(wait_until(|| server.client_count() == 1));

        client.close(None).unwrap();
        drop(client);

        // the handler notices the close and drops its receiver; the next
        // broadcasts prune the stale sender
        assert!(wait_until(|| {
            server.broadcast("{}");
            server.client_count() == 0
        }));

        server.stop();
    }
}
