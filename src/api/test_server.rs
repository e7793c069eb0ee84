//! One-connection-per-response HTTP server for client tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

pub(crate) struct TestServer {
  pub base: String,
  hits: Arc<AtomicUsize>,
  requests: mpsc::UnboundedReceiver<String>,
}

impl TestServer {
  /// Answer one connection per `(status line, body)` pair, in order.
  pub async fn start(responses: Vec<(&'static str, &'static str)>) -> Self {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let hits = Arc::new(AtomicUsize::new(0));
    let (tx, requests) = mpsc::unbounded_channel();

    let counter = hits.clone();
    tokio::spawn(async move {
      for (status_line, body) in responses {
        let Ok((mut socket, _)) = listener.accept().await else {
          return;
        };
        let request = read_request(&mut socket).await;
        counter.fetch_add(1, Ordering::SeqCst);
        let _ = tx.send(request);

        let response = format!(
          "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
          status_line,
          body.len(),
          body
        );
        let _ = socket.write_all(response.as_bytes()).await;
        let _ = socket.shutdown().await;
      }
    });

    Self {
      base,
      hits,
      requests,
    }
  }

  pub async fn once(status_line: &'static str, body: &'static str) -> Self {
    Self::start(vec![(status_line, body)]).await
  }

  /// Requests answered so far
  pub fn hits(&self) -> usize {
    self.hits.load(Ordering::SeqCst)
  }

  /// Full text of the next request received
  pub async fn next_request(&mut self) -> String {
    self.requests.recv().await.unwrap()
  }

  /// First line of the next request, e.g. `GET /api/visits HTTP/1.1`
  pub async fn next_request_line(&mut self) -> String {
    let request = self.next_request().await;
    request.lines().next().unwrap_or_default().to_string()
  }
}

/// Read headers, then as much body as Content-Length announces.
async fn read_request(socket: &mut TcpStream) -> String {
  let mut buf = Vec::new();
  let mut chunk = [0u8; 4096];
  loop {
    let n = match socket.read(&mut chunk).await {
      Ok(0) | Err(_) => break,
      Ok(n) => n,
    };
    buf.extend_from_slice(&chunk[..n]);

    let text = String::from_utf8_lossy(&buf);
    if let Some(end) = text.find("\r\n\r\n") {
      let length = text[..end]
        .lines()
        .find_map(|line| {
          let (name, value) = line.split_once(':')?;
          if name.eq_ignore_ascii_case("content-length") {
            value.trim().parse::<usize>().ok()
          } else {
            None
          }
        })
        .unwrap_or(0);
      if buf.len() >= end + 4 + length {
        break;
      }
    }
  }
  String::from_utf8_lossy(&buf).to_string()
}
