//! JabbR chat client built on the `chat` hub.
//!
//! [`JabbrClient`] wraps a [`HubConnection`] with the JabbR command set and
//! re-emits the hub's pushes as [`JabbrEvent`]s on a broadcast channel.
//!
//! ```no_run
//! # use signalr_jabbr::jabbr::{JabbrClient, JabbrEvent};
//! # use signalr_jabbr::transport::Transport;
//! # use std::sync::Arc;
//! # async fn example(transport: Arc<dyn Transport>) -> Result<(), signalr_jabbr::SignalRError> {
//! let client = JabbrClient::new("http://jabbr.example/signalr", transport)?;
//! let mut events = client.subscribe();
//! client.connect("bob", "secret").await?;
//! client.join_room("rust").await?;
//! client.say("hello", "rust").await?;
//!
//! while let Ok(JabbrEvent::MessageReceived { message, room }) = events.recv().await {
//!     println!("[{room}] {}", message.content);
//! }
//! # Ok(())
//! # }
//! ```

mod messages;

pub use messages::{mentions, parse_json_date, ClientMessage, Mention, MessageViewModel};

use crate::{
    config::ConnectionConfig,
    connection::{Connection, StartOptions},
    error::SignalRError,
    hubs::{HubConnection, HubProxy, PendingInvocation},
    transport::Transport,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

/// Name of the JabbR hub.
pub const CHAT_HUB: &str = "chat";

const EVENT_CAPACITY: usize = 256;

/// Pushes from the chat hub.
#[derive(Debug, Clone, PartialEq)]
pub enum JabbrEvent {
    MessageReceived {
        message: MessageViewModel,
        room: String,
    },
    ChangeNote {
        user: Value,
        room: String,
    },
}

/// Chat client for a JabbR server.
pub struct JabbrClient {
    hub: HubConnection,
    chat: HubProxy,
    transport: Arc<dyn Transport>,
    events: broadcast::Sender<JabbrEvent>,
}

impl JabbrClient {
    pub fn new(url: &str, transport: Arc<dyn Transport>) -> Result<Self, SignalRError> {
        let connection = Connection::new(ConnectionConfig::builder(url).build())?;
        Ok(Self::with_connection(connection, transport))
    }

    /// Builds the client over a pre-configured connection.
    pub fn with_connection(connection: Connection, transport: Arc<dyn Transport>) -> Self {
        let hub = HubConnection::from_connection(connection);
        let chat = hub.create_proxy(CHAT_HUB);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let tx = events.clone();
        let own = Mutex::new(None::<Mention>);
        chat.on("addMessage", move |proxy, args| {
            let mut args = args.into_iter();
            let message = args.next().unwrap_or(Value::Null);
            let room = room_name(args.next());
            let mut own = own.lock();
            match proxy.state("name").as_ref().and_then(Value::as_str) {
                Some(name) if own.as_ref().map(Mention::name) != Some(name) => {
                    *own = Mention::new(name).ok();
                }
                Some(_) => {}
                None => *own = None,
            }
            match MessageViewModel::from_server(&message, own.as_ref()) {
                Ok(message) => {
                    let _ = tx.send(JabbrEvent::MessageReceived { message, room });
                }
                Err(e) => debug!("Malformed addMessage push: {}", e),
            }
        });

        let tx = events.clone();
        chat.on("changeNote", move |_, args| {
            let mut args = args.into_iter();
            let user = args.next().unwrap_or(Value::Null);
            let room = room_name(args.next());
            let _ = tx.send(JabbrEvent::ChangeNote { user, room });
        });

        chat.server_method("checkStatus", "CheckStatus")
            .server_method("join", "Join")
            .server_method("send", "Send");

        hub.create_hub_proxies();

        Self {
            hub,
            chat,
            transport,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JabbrEvent> {
        self.events.subscribe()
    }

    pub fn hub(&self) -> &HubConnection {
        &self.hub
    }

    pub fn chat(&self) -> &HubProxy {
        &self.chat
    }

    fn log(&self, message: &str) {
        self.hub.connection().log(message, None);
    }

    /// Starts the connection and joins the hub.
    ///
    /// When the server reports that the user is not known yet (`Join` returns
    /// `false`), the nick is set with `username`/`password` and the result of
    /// that command is returned; otherwise the `Join` result is returned.
    pub async fn connect(&self, username: &str, password: &str) -> Result<Value, SignalRError> {
        self.hub
            .start(StartOptions::new(self.transport.clone()))
            .await?;

        let joined = match self.chat.call("join", Vec::new()).await?.await {
            Ok(joined) => joined,
            Err(e) => {
                self.log(&format!("Failed to join hub: {e}"));
                return Err(e);
            }
        };
        self.log("Joined hub!");

        if joined == Value::Bool(false) {
            return match self.set_nick(username, password).await?.await {
                Ok(result) => Ok(result),
                Err(e) => {
                    self.log(&format!("Failed to set nick {e}"));
                    Err(e)
                }
            };
        }
        Ok(joined)
    }

    pub async fn check_status(&self) -> Result<PendingInvocation, SignalRError> {
        self.chat.call("checkStatus", Vec::new()).await
    }

    async fn send_message(
        &self,
        message: ClientMessage,
    ) -> Result<PendingInvocation, SignalRError> {
        self.chat
            .call("send", vec![serde_json::to_value(&message)?])
            .await
    }

    /// Joins an existing room, sending the command from the active room.
    pub async fn join_room(&self, room: &str) -> Result<Value, SignalRError> {
        let mut message = ClientMessage::new(format!("/join {room}"));
        message.room = self
            .chat
            .state("activeRoom")
            .and_then(|r| r.as_str().map(str::to_string));

        match self.send_message(message).await?.await {
            Ok(result) => {
                self.log(&format!("Joined {room}"));
                Ok(result)
            }
            Err(e) => {
                self.log(&format!("Failed to join room: {e}"));
                Err(e)
            }
        }
    }

    /// Sets the nick; an unknown nick is registered with the password.
    pub async fn set_nick(
        &self,
        username: &str,
        password: &str,
    ) -> Result<PendingInvocation, SignalRError> {
        self.send_message(ClientMessage::new(format!("/nick {username} {password}")))
            .await
    }

    /// Shows a flag for an ISO 3166-1 alpha-2 country code.
    pub async fn set_flag(&self, iso_country: &str) -> Result<PendingInvocation, SignalRError> {
        self.send_message(ClientMessage::new(format!("/flag {iso_country}")))
            .await
    }

    pub async fn say(&self, message: &str, room: &str) -> Result<PendingInvocation, SignalRError> {
        self.send_message(ClientMessage::new(message).in_room(room))
            .await
    }

    pub async fn set_gravatar(&self, email: &str) -> Result<PendingInvocation, SignalRError> {
        self.send_message(ClientMessage::new(format!("/gravatar {email}")))
            .await
    }

    /// Sets a note that others can see.
    pub async fn set_note(&self, note: &str) -> Result<PendingInvocation, SignalRError> {
        self.send_message(ClientMessage::new(format!("/note {note}")))
            .await
    }

    pub async fn leave_room(&self, room: &str) -> Result<Value, SignalRError> {
        self.send_message(ClientMessage::new(format!("/leave {room}")).in_room(room))
            .await?
            .await
    }

    /// Stops the hub connection, notifying the server.
    pub async fn disconnect(&self) -> Result<(), SignalRError> {
        self.hub.stop(false, true).await
    }
}

fn room_name(value: Option<Value>) -> String {
    match value {
        Some(Value::String(room)) => room,
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}
