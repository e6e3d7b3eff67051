//! Interactive client: connect, register, pick groups and chat

use std::io::BufReader;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use relaychat_core::client::{
    interrupt_token, spawn_line_reader, ChatExit, ChatSession, ChatView, RelayClient,
    SessionState, StateMachine,
};
use relaychat_core::config::ClientSettings;

use crate::ui::{menu, view, Prompt, Selection, TerminalView};

/// Main application state
pub struct App {
    settings: ClientSettings,
    /// Name to try first, from `--name`
    name: Option<String>,
    view: Arc<dyn ChatView>,
}

impl App {
    pub fn new(settings: ClientSettings, name: Option<String>) -> Self {
        Self {
            settings,
            name,
            view: Arc::new(TerminalView),
        }
    }

    /// Run against the terminal until the user quits or the relay goes away
    pub async fn run(&mut self) -> Result<()> {
        let cancel = interrupt_token();
        let mut input = spawn_line_reader(BufReader::new(std::io::stdin()));
        self.drive(&mut input, &cancel).await
    }

    /// Drive one connection through its whole lifecycle using `input` as
    /// the user's lines
    pub async fn drive(
        &self,
        input: &mut mpsc::Receiver<String>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut machine = StateMachine::new();
        let (client, inbox) = match RelayClient::connect(&self.settings).await {
            Ok(connected) => connected,
            Err(e) => {
                machine.terminate();
                return Err(e);
            }
        };
        machine.transition(SessionState::Registering)?;
        view::success(&format!("You have connected to {}!", self.settings.server));

        let name = match self.register(&client, input, cancel).await? {
            Some(name) => name,
            None => {
                machine.terminate();
                client.close();
                return Ok(());
            }
        };
        machine.transition(SessionState::SelectingGroup)?;
        menu::welcome(&client, &name).await;

        let mut inbox = Some(inbox);
        let mut connected = true;
        while let Some(current) = inbox.take() {
            let selection = {
                let mut prompt = Prompt::new(input, cancel);
                menu::main_menu(&mut prompt, &client, &name).await
            };
            let group = match selection {
                Ok(Selection::Chat(group)) => group,
                Ok(_) => break,
                Err(e) => {
                    self.view.error(&e);
                    connected = false;
                    break;
                }
            };

            let session = match ChatSession::open(
                &client,
                &name,
                &group,
                self.view.clone(),
                self.settings.request_timeout(),
            )
            .await
            {
                Ok(session) => session,
                Err(e) => {
                    self.view.error(&e);
                    if !e.is_recoverable() {
                        connected = false;
                        break;
                    }
                    inbox = Some(current);
                    continue;
                }
            };
            machine.transition(SessionState::Chatting {
                group: group.clone(),
            })?;
            view::rule();
            println!("You are now chatting in {}. Type !help for commands.", group);

            let (exit, returned) = session.run(current, input, cancel).await;
            inbox = returned;
            match exit {
                ChatExit::Left => {
                    machine.transition(SessionState::SelectingGroup)?;
                    view::hint(&format!("Left {}", group));
                }
                ChatExit::Exited | ChatExit::Interrupted => break,
                ChatExit::Disconnected => {
                    connected = false;
                    break;
                }
            }
        }

        if cancel.is_cancelled() {
            view::hint("Interrupt received. Exiting chat application.");
        }
        if connected && !client.is_closed() {
            if let Err(e) = client.unregister(&name).await {
                tracing::debug!("unregister failed: {}", e);
            }
        }
        machine.terminate();
        client.close();

        if !connected {
            anyhow::bail!("Lost connection to relay at {}", self.settings.server);
        }
        Ok(())
    }

    async fn register(
        &self,
        client: &RelayClient,
        input: &mut mpsc::Receiver<String>,
        cancel: &CancellationToken,
    ) -> Result<Option<String>> {
        if let Some(name) = &self.name {
            match client.register(name).await {
                Ok(_) => return Ok(Some(name.clone())),
                Err(e) if e.is_recoverable() => self.view.error(&e),
                Err(e) => return Err(e.into()),
            }
        }
        let mut prompt = Prompt::new(input, cancel);
        Ok(menu::register(&mut prompt, client).await?)
    }
}
