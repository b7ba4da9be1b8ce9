//! Socket runtime: executes controller effects against a live WebSocket and
//! feeds frames, retry timers, user commands and HTTP results back in.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Sleep};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::api::ApiClient;
use crate::command::Command;
use crate::config::ConfigError;
use crate::controller::{ConversationController, Effect, Event, TransportEvent};
use crate::render::Renderer;
use crate::storage::StoreError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Handshake = Pin<Box<dyn Future<Output = Result<WsStream, String>> + Send>>;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("invalid server url: {0}")]
    Url(#[from] url::ParseError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("websocket error: {0}")]
    Transport(#[from] tungstenite::Error),
}

/// What woke the event loop.
enum Wake {
    Connected(Result<WsStream, String>),
    Frame(Option<Result<Message, tungstenite::Error>>),
    Retry,
    Command(Option<Command>),
    Side(Event),
}

/// Drive `controller` until the command channel is closed with no reply
/// outstanding, or a quit command was handled.
///
/// Connects on entry. `endpoint` is the socket URL without query; `api`
/// serves uploads and model listing when present. The handshake runs
/// alongside the other wake sources. Commands other than quit that arrive
/// while it is pending are held until it settles.
pub async fn run<R: Renderer>(
    controller: &mut ConversationController<R>,
    endpoint: &str,
    api: Option<&ApiClient>,
    mut commands: mpsc::Receiver<Command>,
) -> Result<(), ClientError> {
    let mut socket: Option<WsStream> = None;
    let mut connecting: Option<Handshake> = None;
    let mut deferred: VecDeque<Command> = VecDeque::new();
    let mut retry: Option<Pin<Box<Sleep>>> = None;
    let mut queue: VecDeque<Effect> = VecDeque::new();
    let (side_tx, mut side_rx) = mpsc::unbounded_channel::<Event>();
    let mut commands_open = true;
    let mut quitting = false;

    controller.connect();
    queue.extend(controller.take_effects());

    loop {
        while let Some(effect) = queue.pop_front() {
            debug!(?effect, "effect");
            match effect {
                Effect::Connect(params) => {
                    let url = params.url(endpoint)?;
                    let limit = controller.connection().policy().handshake_timeout;
                    connecting = Some(Box::pin(async move {
                        match timeout(limit, tokio_tungstenite::connect_async(url.as_str())).await {
                            Ok(Ok((stream, _))) => Ok(stream),
                            Ok(Err(err)) => Err(err.to_string()),
                            Err(_) => Err("handshake timed out".to_string()),
                        }
                    }));
                }
                Effect::ScheduleRetry(delay) => retry = Some(Box::pin(sleep(delay))),
                Effect::CancelRetry => retry = None,
                Effect::Transmit(frame) => {
                    let sent = match socket.as_mut() {
                        Some(ws) => ws.send(Message::Text(frame)).await.map_err(|e| e.to_string()),
                        None => Err("socket is not open".to_string()),
                    };
                    if let Err(reason) = sent {
                        socket = None;
                        let closed = Event::Transport(TransportEvent::Closed(reason));
                        queue.extend(controller.dispatch(closed));
                    }
                }
                Effect::Upload(path) => {
                    let Some(api) = api.cloned() else {
                        warn!("upload requested without an API client");
                        continue;
                    };
                    let tx = side_tx.clone();
                    tokio::spawn(async move {
                        let result = api.upload(&path).await;
                        let _ = tx.send(Event::Uploaded(result));
                    });
                }
                Effect::FetchModels => {
                    let Some(api) = api.cloned() else {
                        continue;
                    };
                    let tx = side_tx.clone();
                    tokio::spawn(async move {
                        let result = api.list_models().await;
                        let _ = tx.send(Event::ModelsListed(result));
                    });
                }
                Effect::Close => {
                    let had_transport = match socket.take() {
                        Some(mut ws) => {
                            let _ = ws.close(None).await;
                            true
                        }
                        None => connecting.take().is_some(),
                    };
                    if had_transport {
                        let closed = TransportEvent::Closed("closed by client".to_string());
                        queue.extend(controller.dispatch(Event::Transport(closed)));
                    }
                }
            }
        }

        if quitting || (!commands_open && deferred.is_empty() && !controller.is_waiting()) {
            break;
        }

        let wake = tokio::select! {
            result = wait_handshake(&mut connecting), if connecting.is_some() => {
                Wake::Connected(result)
            }
            frame = next_frame(&mut socket), if socket.is_some() => Wake::Frame(frame),
            _ = wait_retry(&mut retry), if retry.is_some() => Wake::Retry,
            command = commands.recv(), if commands_open => Wake::Command(command),
            Some(event) = side_rx.recv() => Wake::Side(event),
            else => break,
        };

        let event = match wake {
            Wake::Connected(result) => {
                connecting = None;
                let event = match result {
                    Ok(stream) => {
                        socket = Some(stream);
                        TransportEvent::Opened
                    }
                    Err(reason) => TransportEvent::Closed(reason),
                };
                queue.extend(controller.dispatch(Event::Transport(event)));
                while let Some(command) = deferred.pop_front() {
                    queue.extend(controller.dispatch(Event::Command(command)));
                }
                continue;
            }
            Wake::Frame(Some(Ok(Message::Text(text)))) => {
                Event::Transport(TransportEvent::Frame(text))
            }
            Wake::Frame(Some(Ok(Message::Close(frame)))) => {
                socket = None;
                let reason = frame.map(|f| f.reason.into_owned()).unwrap_or_default();
                Event::Transport(TransportEvent::Closed(reason))
            }
            Wake::Frame(Some(Ok(_))) => continue,
            Wake::Frame(Some(Err(err))) => {
                socket = None;
                Event::Transport(TransportEvent::Closed(err.to_string()))
            }
            Wake::Frame(None) => {
                socket = None;
                Event::Transport(TransportEvent::Closed("stream ended".to_string()))
            }
            Wake::Retry => {
                retry = None;
                Event::RetryElapsed
            }
            Wake::Command(Some(command)) => {
                if command == Command::Quit {
                    quitting = true;
                } else if connecting.is_some() {
                    deferred.push_back(command);
                    continue;
                }
                Event::Command(command)
            }
            Wake::Command(None) => {
                commands_open = false;
                continue;
            }
            Wake::Side(event) => event,
        };
        queue.extend(controller.dispatch(event));
    }

    if let Some(mut ws) = socket.take() {
        let _ = ws.close(None).await;
    }
    Ok(())
}

async fn wait_handshake(handshake: &mut Option<Handshake>) -> Result<WsStream, String> {
    match handshake {
        Some(pending) => pending.as_mut().await,
        None => std::future::pending().await,
    }
}

async fn next_frame(
    socket: &mut Option<WsStream>,
) -> Option<Result<Message, tungstenite::Error>> {
    match socket {
        Some(ws) => ws.next().await,
        None => std::future::pending().await,
    }
}

async fn wait_retry(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}
