//! Numbered menus shown between chats

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use relaychat_core::client::RelayClient;
use relaychat_core::error::{RelayError, RelayResult};

use super::view;

/// Typing this at any name prompt returns to the previous menu
pub const BACK: &str = "!back";

/// Reads answers to menu prompts
pub struct Prompt<'a> {
    input: &'a mut mpsc::Receiver<String>,
    cancel: &'a CancellationToken,
}

impl<'a> Prompt<'a> {
    pub fn new(input: &'a mut mpsc::Receiver<String>, cancel: &'a CancellationToken) -> Self {
        Self { input, cancel }
    }

    /// Show `label` and read one trimmed line; `None` on end of input or
    /// interrupt
    pub async fn read(&mut self, label: &str) -> Option<String> {
        view::prompt(label);
        let line = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            line = self.input.recv() => line,
        };
        if line.is_none() {
            println!();
        }
        line.map(|line| line.trim().to_string())
    }
}

/// Where a menu leaves the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Open the chat for this group
    Chat(String),
    Back,
    Quit,
}

/// Keep asking for a name until the relay accepts one.
///
/// Returns `None` when input ends first.
pub async fn register(prompt: &mut Prompt<'_>, client: &RelayClient) -> RelayResult<Option<String>> {
    loop {
        let Some(name) = prompt.read("Username").await else {
            return Ok(None);
        };
        match client.register(&name).await {
            Ok(connection_id) => {
                tracing::debug!(connection_id = %connection_id, "registered as {}", name);
                return Ok(Some(name));
            }
            Err(RelayError::NameConflict { .. }) => {
                view::failure("That username already exists. Please choose a new one!")
            }
            Err(e) if e.is_recoverable() => view::failure(&e.to_string()),
            Err(e) => return Err(e),
        }
    }
}

/// Greeting shown after registering
pub async fn welcome(client: &RelayClient, name: &str) {
    let clients = client.client_list().await.map(|c| c.len()).unwrap_or(0);
    let groups = client.group_list().await.map(|g| g.len()).unwrap_or(0);
    println!();
    view::success(&format!("Welcome {}!", name));
    println!(
        "There are currently {} member(s) logged in and {} group(s).",
        clients, groups
    );
    println!("To disconnect, hit ctrl+c or type !exit while chatting.");
}

/// Main menu: create a group, browse groups, or quit
pub async fn main_menu(
    prompt: &mut Prompt<'_>,
    client: &RelayClient,
    name: &str,
) -> RelayResult<Selection> {
    loop {
        view::rule();
        println!("Main Menu");
        println!();
        println!("1) Create a Group");
        println!("2) View Group Options");
        println!("3) Exit Chat");
        println!();
        let Some(choice) = prompt.read("Main").await else {
            return Ok(Selection::Quit);
        };

        let selection = match choice.as_str() {
            "1" => create_group(prompt, client, name).await?,
            "2" => group_menu(prompt, client, name).await?,
            "3" => return Ok(Selection::Quit),
            _ => {
                view::failure("Please enter a valid selection between 1 and 3.");
                continue;
            }
        };
        if selection != Selection::Back {
            return Ok(selection);
        }
    }
}

async fn create_group(
    prompt: &mut Prompt<'_>,
    client: &RelayClient,
    name: &str,
) -> RelayResult<Selection> {
    loop {
        println!();
        println!("Enter the name of the group or type {} to go back to the main menu.", BACK);
        let Some(group) = prompt.read("Create").await else {
            return Ok(Selection::Quit);
        };
        if group == BACK {
            return Ok(Selection::Back);
        }

        match client.create_group(name, &group).await {
            Ok(()) => {
                view::success(&format!("Created and joined group named {}", group));
                return Ok(Selection::Chat(group));
            }
            Err(RelayError::NameConflict { .. }) => view::failure(&format!(
                "The group name \"{}\" has already been chosen. Please select a new one.",
                group
            )),
            Err(e) if e.is_recoverable() => view::failure(&e.to_string()),
            Err(e) => return Err(e),
        }
    }
}

async fn list_groups(client: &RelayClient) -> RelayResult<()> {
    let groups = client.group_list().await?;
    println!();
    if groups.is_empty() {
        view::hint("There are no groups created yet!");
    } else {
        println!("Current groups able to join:");
        view::numbered(&groups);
    }
    Ok(())
}

async fn group_menu(
    prompt: &mut Prompt<'_>,
    client: &RelayClient,
    name: &str,
) -> RelayResult<Selection> {
    list_groups(client).await?;
    loop {
        view::rule();
        println!("View Groups Menu");
        println!();
        println!("1) View a Group's Members");
        println!("2) Refresh List of Groups");
        println!("3) Join a Group");
        println!("4) Go back");
        println!();
        let Some(choice) = prompt.read("Groups").await else {
            return Ok(Selection::Quit);
        };

        match choice.as_str() {
            "1" => {
                if view_members(prompt, client).await? == Selection::Quit {
                    return Ok(Selection::Quit);
                }
            }
            "2" => list_groups(client).await?,
            "3" => {
                let selection = join_group(prompt, client, name).await?;
                if selection != Selection::Back {
                    return Ok(selection);
                }
            }
            "4" => return Ok(Selection::Back),
            _ => view::failure("Please enter a valid selection between 1 and 4."),
        }
    }
}

async fn view_members(prompt: &mut Prompt<'_>, client: &RelayClient) -> RelayResult<Selection> {
    println!();
    println!(
        "Enter the group name that you would like to view! Enter {} to go back to the menu.",
        BACK
    );
    loop {
        let Some(group) = prompt.read("View").await else {
            return Ok(Selection::Quit);
        };
        if group == BACK {
            return Ok(Selection::Back);
        }
        match client.group_members(&group).await {
            Ok(members) => {
                println!("Members of {}", group);
                view::numbered(&members);
                return Ok(Selection::Back);
            }
            Err(RelayError::GroupNotFound { .. }) => view::failure(
                "Please double check that the group name you entered actually exists.",
            ),
            Err(e) if e.is_recoverable() => view::failure(&e.to_string()),
            Err(e) => return Err(e),
        }
    }
}

async fn join_group(
    prompt: &mut Prompt<'_>,
    client: &RelayClient,
    name: &str,
) -> RelayResult<Selection> {
    loop {
        println!(
            "Enter the name of the group as it appears in the group list or enter {} to go back to the Group menu.",
            BACK
        );
        let Some(group) = prompt.read("Group Name").await else {
            return Ok(Selection::Quit);
        };
        if group == BACK {
            return Ok(Selection::Back);
        }

        match client.join_group(name, &group).await {
            Ok(true) => {
                view::success(&format!("Joined {}", group));
                return Ok(Selection::Chat(group));
            }
            Ok(false) => {
                view::hint(&format!("Already a member of {}", group));
                return Ok(Selection::Chat(group));
            }
            Err(RelayError::GroupNotFound { .. }) => view::failure(&format!(
                "The group name \"{}\" doesn't exist. Please check again.",
                group
            )),
            Err(e) if e.is_recoverable() => view::failure(&e.to_string()),
            Err(e) => return Err(e),
        }
    }
}
