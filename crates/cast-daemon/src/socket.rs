use cast_core::CoreHandle;
use cast_proto::protocol::{Broadcast, Message, UiState, PROTOCOL_VERSION};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Frame-stream server for UI clients.  Each client gets `Hello` with the
/// current state on connect and a `State` frame for every new revision;
/// `Intent` frames it sends are forwarded to the core.
pub fn start_server(
    bind_address: String,
    port: u16,
    core: CoreHandle,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let addr = format!("{}:{}", bind_address, port);

        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind TCP socket {}: {}", addr, e);
                return;
            }
        };

        info!("TCP server listening at {}", addr);
        serve(listener, core).await;
    })
}

async fn serve(listener: TcpListener, core: CoreHandle) {
    let connected = Arc::new(AtomicUsize::new(0));
    let mut client_id = 0usize;

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                client_id += 1;
                let id = client_id;
                let count = connected.fetch_add(1, Ordering::Relaxed) + 1;
                info!("Client {} connected from {} ({} connected)", id, peer, count);

                let core = core.clone();
                let connected = connected.clone();
                tokio::spawn(async move {
                    handle_client(stream, id, core).await;
                    let count = connected.fetch_sub(1, Ordering::Relaxed) - 1;
                    info!("Client {} disconnected ({} connected)", id, count);
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}

async fn handle_client(stream: TcpStream, client_id: usize, core: CoreHandle) {
    let (mut read_half, mut write_half) = stream.into_split();
    let mut state_rx = core.subscribe();
    let mut tmp = [0u8; 4096];
    let mut read_buf: Vec<u8> = Vec::new();

    let hello = encode_hello(&mut state_rx);
    match hello {
        Ok(encoded) => {
            if write_half.write_all(&encoded).await.is_err() {
                return;
            }
        }
        Err(e) => {
            warn!("Client {}: could not encode hello: {}", client_id, e);
            return;
        }
    }

    loop {
        tokio::select! {
            result = read_half.read(&mut tmp) => {
                match result {
                    Ok(0) => {
                        info!("Client {} closed connection", client_id);
                        break;
                    }
                    Ok(n) => {
                        read_buf.extend_from_slice(&tmp[..n]);
                        if !forward_intents(&mut read_buf, client_id, &core).await {
                            return;
                        }
                    }
                    Err(e) => {
                        error!("Read error from client {}: {}", client_id, e);
                        break;
                    }
                }
            }

            changed = state_rx.changed() => {
                if changed.is_err() {
                    debug!("Client {}: core stopped", client_id);
                    break;
                }
                let frame = encode_state(&mut state_rx);
                match frame {
                    Ok(encoded) => {
                        if write_half.write_all(&encoded).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("Client {}: could not encode state: {}", client_id, e),
                }
            }
        }
    }
}

/// Decode every complete frame in `read_buf`.  Returns false once the core is gone.
async fn forward_intents(read_buf: &mut Vec<u8>, client_id: usize, core: &CoreHandle) -> bool {
    while read_buf.len() >= 4 {
        match Message::decode(read_buf) {
            Ok((Message::Intent(intent), consumed)) => {
                read_buf.drain(..consumed);
                info!("Client {} sent intent: {:?}", client_id, intent);
                if core.intent(intent).await.is_err() {
                    warn!("Core event channel closed");
                    return false;
                }
            }
            Ok((_, consumed)) => {
                read_buf.drain(..consumed);
            }
            Err(_) if frame_complete(read_buf) => {
                // A whole frame that is not a valid message; skip it.
                let consumed = frame_len(read_buf);
                warn!("Client {} sent an unreadable frame ({} bytes)", client_id, consumed);
                read_buf.drain(..consumed);
            }
            Err(_) => break,
        }
    }
    true
}

fn frame_len(buf: &[u8]) -> usize {
    4 + u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize
}

fn frame_complete(buf: &[u8]) -> bool {
    buf.len() >= 4 && buf.len() >= frame_len(buf)
}

fn encode_hello(state_rx: &mut watch::Receiver<UiState>) -> anyhow::Result<Vec<u8>> {
    let state = state_rx.borrow_and_update().clone();
    Message::Broadcast(Broadcast::Hello {
        protocol_version: PROTOCOL_VERSION,
        state,
    })
    .encode()
}

fn encode_state(state_rx: &mut watch::Receiver<UiState>) -> anyhow::Result<Vec<u8>> {
    let data = state_rx.borrow_and_update().clone();
    Message::Broadcast(Broadcast::State { data }).encode()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cast_core::CoreEvent;
    use cast_proto::protocol::Intent;
    use tokio::sync::mpsc;

    async fn read_frame(stream: &mut TcpStream) -> Message {
        let mut len = [0u8; 4];
        stream.read_exact(&mut len).await.unwrap();
        let mut body = vec![0u8; u32::from_be_bytes(len) as usize];
        stream.read_exact(&mut body).await.unwrap();
        let mut frame = len.to_vec();
        frame.extend_from_slice(&body);
        Message::decode(&frame).unwrap().0
    }

    #[tokio::test]
    async fn test_hello_then_state_then_intent() {
        let (event_tx, mut event_rx) = mpsc::channel(8);
        let (state_tx, state_rx) = watch::channel(UiState::default());
        let core = CoreHandle::new(event_tx, state_rx);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, core));

        let mut client = TcpStream::connect(addr).await.unwrap();
        match read_frame(&mut client).await {
            Message::Broadcast(Broadcast::Hello {
                protocol_version,
                state,
            }) => {
                assert_eq!(protocol_version, PROTOCOL_VERSION);
                assert_eq!(state.rev, 0);
            }
            other => panic!("expected hello, got {:?}", other),
        }

        state_tx.send_modify(|s| {
            s.rev = 1;
            s.now_playing = Some("Band - Song".into());
        });
        match read_frame(&mut client).await {
            Message::Broadcast(Broadcast::State { data }) => {
                assert_eq!(data.rev, 1);
                assert_eq!(data.now_playing.as_deref(), Some("Band - Song"));
            }
            other => panic!("expected state, got {:?}", other),
        }

        let garbage = [0u8, 0, 0, 2, b'{', b'x'];
        client.write_all(&garbage).await.unwrap();
        let frame = Message::Intent(Intent::DismissError).encode().unwrap();
        client.write_all(&frame).await.unwrap();
        match event_rx.recv().await {
            Some(CoreEvent::Intent(Intent::DismissError)) => {}
            other => panic!("unexpected {:?}", other),
        }
    }
}
