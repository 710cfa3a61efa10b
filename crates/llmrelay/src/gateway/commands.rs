//! Guild administration slash commands.
//!
//! Platform adapters register [`definitions`], translate an incoming
//! interaction into a [`CommandInvocation`], and post the returned
//! [`CommandReply`].

use tracing::{info, warn};

use crate::store::GuildConfigStore;

pub const SET_LLM_CHANNEL: &str = "set-llm-channel";
pub const REMOVE_LLM_CHANNEL: &str = "remove-llm-channel";
pub const CHANNEL_OPTION: &str = "channel";

/// Channel argument of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelOption {
    pub name: &'static str,
    pub description: &'static str,
    pub required: bool,
}

/// Registration data for one command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub channel_option: Option<ChannelOption>,
}

/// Commands to register with the platform on startup.
pub fn definitions() -> [CommandDefinition; 2] {
    [
        CommandDefinition {
            name: SET_LLM_CHANNEL,
            description: "Sets the channel for LLM interactions in this server.",
            channel_option: Some(ChannelOption {
                name: CHANNEL_OPTION,
                description: "The text channel to use for the LLM bot.",
                required: true,
            }),
        },
        CommandDefinition {
            name: REMOVE_LLM_CHANNEL,
            description: "Removes the configured LLM interaction channel for this server.",
            channel_option: None,
        },
    ]
}

/// A recognized command with its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayCommand {
    SetLlmChannel { channel_id: Option<String> },
    RemoveLlmChannel,
}

impl RelayCommand {
    /// Match a command by name. Unknown names return `None`.
    pub fn parse(name: &str, channel_id: Option<String>) -> Option<Self> {
        match name {
            SET_LLM_CHANNEL => Some(Self::SetLlmChannel { channel_id }),
            REMOVE_LLM_CHANNEL => Some(Self::RemoveLlmChannel),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::SetLlmChannel { .. } => SET_LLM_CHANNEL,
            Self::RemoveLlmChannel => REMOVE_LLM_CHANNEL,
        }
    }
}

/// Whether the invoking member may manage the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    /// Member holds Manage Channels or Administrator.
    Granted,
    Denied,
    /// The platform did not report the member's permissions.
    Unknown,
}

/// A slash command as received from the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInvocation {
    pub guild_id: Option<String>,
    pub permission: Permission,
    pub command: RelayCommand,
}

/// Response to show the invoking member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandReply {
    pub content: String,
    /// Visible only to the invoking member.
    pub ephemeral: bool,
}

impl CommandReply {
    fn public(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ephemeral: false,
        }
    }

    fn private(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ephemeral: true,
        }
    }
}

/// Check permissions, apply the command to `store`, and build the reply.
pub async fn execute(store: &GuildConfigStore, invocation: CommandInvocation) -> CommandReply {
    if invocation.permission == Permission::Unknown {
        return CommandReply::public("Error: Could not verify your permissions.");
    }
    let Some(guild_id) = invocation.guild_id else {
        return CommandReply::public("This command can only be used in a server.");
    };
    if invocation.permission == Permission::Denied {
        info!(
            guild_id = %guild_id,
            command = invocation.command.name(),
            "Rejected command from member without permission"
        );
        return CommandReply::private(
            "You need 'Manage Channels' or 'Administrator' permission to use this command.",
        );
    }

    match invocation.command {
        RelayCommand::SetLlmChannel { channel_id: None } => {
            CommandReply::public("Error: Channel option not found.")
        }
        RelayCommand::SetLlmChannel {
            channel_id: Some(channel_id),
        } => match store.set(&guild_id, &channel_id).await {
            Ok(()) => CommandReply::public(format!(
                "LLM interaction channel set to <#{channel_id}> for this server."
            )),
            Err(e) => {
                warn!(guild_id = %guild_id, error = %e, "Failed to set LLM channel");
                CommandReply::public(format!("Error setting LLM channel: {e}"))
            }
        },
        RelayCommand::RemoveLlmChannel => match store.remove(&guild_id).await {
            Ok(()) => CommandReply::public(
                "LLM interaction channel configuration has been removed for this server. \
                 The bot will no longer respond to messages unless reconfigured.",
            ),
            Err(e) => {
                warn!(guild_id = %guild_id, error = %e, "Failed to remove LLM channel");
                CommandReply::public(format!("Error removing LLM channel configuration: {e}"))
            }
        },
    }
}
