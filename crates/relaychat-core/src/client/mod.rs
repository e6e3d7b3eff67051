//! Relay client: connection, in-chat commands, lifecycle and the chat loop

mod chat;
mod command;
mod connection;
mod state;

pub use chat::{ChatExit, ChatSession, ChatView};
pub use command::{Command, HELP};
pub use connection::{Inbox, RelayClient};
pub use state::{SessionState, StateMachine, TransitionError};

use std::io::BufRead;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Lines buffered between the input reader and the chat loop
const INPUT_CAPACITY: usize = 32;

/// Read lines from `reader` on a dedicated thread.
///
/// The channel closes at end of input. A blocking thread keeps a pending
/// read on stdin from holding up runtime shutdown.
pub fn spawn_line_reader<R>(reader: R) -> mpsc::Receiver<String>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = mpsc::channel(INPUT_CAPACITY);
    std::thread::spawn(move || {
        for line in reader.lines() {
            let Ok(line) = line else { break };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}

/// Token cancelled on the first interrupt signal (Ctrl-C)
pub fn interrupt_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::debug!("interrupt received");
            trigger.cancel();
        }
    });
    token
}
