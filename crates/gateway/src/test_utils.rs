use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

/// One-shot fake daemon on a loopback port. It accepts a single
/// connection, reads the request until the client half-closes, sends the
/// received text on the returned channel, writes `reply` and closes.
pub(crate) async fn spawn_daemon(reply: Vec<u8>) -> (String, oneshot::Receiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr").to_string();
    let (request_tx, request_rx) = oneshot::channel();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.expect("accept");
        let mut request = Vec::new();
        socket.read_to_end(&mut request).await.expect("read request");
        let _ = request_tx.send(String::from_utf8_lossy(&request).into_owned());
        socket.write_all(&reply).await.expect("write reply");
        socket.shutdown().await.ok();
    });
    (addr, request_rx)
}
