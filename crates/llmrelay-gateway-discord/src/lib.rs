//! Discord gateway for llmrelay using serenity.
//!
//! [`DiscordGateway`] builds a serenity client whose event handler feeds
//! channel messages into a [`MessageDispatcher`] and answers the relay's
//! slash commands. Replies go out through [`SerenityTransport`].

mod transport;

use std::sync::Arc;

use llmrelay::gateway::commands::{self, CHANNEL_OPTION, CommandDefinition, RelayCommand};
use llmrelay::gateway::{
    BotIdentity, CommandInvocation, DispatchConfig, InboundMessage, MessageDispatcher,
    Permission,
};
use llmrelay::session::SessionCache;
use llmrelay::store::GuildConfigStore;
use serenity::all::{
    ChannelType, Command, CommandInteraction, CommandOptionType, CreateCommand,
    CreateCommandOption, CreateInteractionResponse, CreateInteractionResponseMessage,
    GatewayIntents, Permissions,
};
use serenity::async_trait;
use serenity::model::application::Interaction;
use serenity::model::channel::Message;
use serenity::model::gateway::Ready;
use serenity::prelude::*;
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};

pub use transport::SerenityTransport;

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for the Discord gateway.
#[derive(Debug, Clone)]
pub struct DiscordConfig {
    /// Discord bot token.
    pub bot_token: String,
}

impl DiscordConfig {
    /// Create a new config with the given bot token.
    pub fn new(bot_token: impl Into<String>) -> Self {
        Self {
            bot_token: bot_token.into(),
        }
    }
}

// ============================================================================
// Discord Gateway
// ============================================================================

/// Discord gateway that bridges guild channels with the relay.
pub struct DiscordGateway {
    config: DiscordConfig,
    routes: Arc<GuildConfigStore>,
    sessions: SessionCache,
    dispatch: DispatchConfig,
}

impl DiscordGateway {
    pub fn new(
        config: DiscordConfig,
        routes: Arc<GuildConfigStore>,
        sessions: SessionCache,
        dispatch: DispatchConfig,
    ) -> Self {
        Self {
            config,
            routes,
            sessions,
            dispatch,
        }
    }

    /// Build the serenity client. Call `start` on it to connect.
    pub async fn into_client(self) -> serenity::Result<Client> {
        let intents = GatewayIntents::GUILDS
            | GatewayIntents::GUILD_MESSAGES
            | GatewayIntents::MESSAGE_CONTENT;

        let handler = Handler {
            routes: self.routes,
            sessions: self.sessions,
            dispatch: self.dispatch,
            connected: OnceCell::new(),
        };

        Client::builder(&self.config.bot_token, intents)
            .event_handler(handler)
            .await
    }
}

// ============================================================================
// Event Handler
// ============================================================================

struct Handler {
    routes: Arc<GuildConfigStore>,
    sessions: SessionCache,
    dispatch: DispatchConfig,
    /// Set from the first Ready event.
    connected: OnceCell<Connected>,
}

struct Connected {
    bot: BotIdentity,
    dispatcher: MessageDispatcher,
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!(
            user = %ready.user.name,
            user_id = %ready.user.id,
            guilds = ready.guilds.len(),
            "Discord bot connected"
        );

        let connected = Connected {
            bot: BotIdentity {
                user_id: ready.user.id.to_string(),
                name: ready.user.name.clone(),
            },
            dispatcher: MessageDispatcher::new(
                Arc::clone(&self.routes),
                self.sessions.clone(),
                Arc::new(SerenityTransport::new(Arc::clone(&ctx.http))),
                self.dispatch.clone(),
            ),
        };
        if self.connected.set(connected).is_err() {
            debug!("Session re-established, keeping existing dispatcher");
        }

        register_commands(&ctx).await;
    }

    async fn message(&self, _ctx: Context, msg: Message) {
        let Some(connected) = self.connected.get() else {
            debug!(message_id = %msg.id, "Message received before ready, dropping");
            return;
        };

        let inbound = InboundMessage {
            message_id: msg.id.to_string(),
            channel_id: msg.channel_id.to_string(),
            guild_id: msg.guild_id.map(|id| id.to_string()),
            author_id: msg.author.id.to_string(),
            content: msg.content,
        };

        // Dropping the returned handle detaches any spawned reply job.
        let _ = connected
            .dispatcher
            .handle_message(&connected.bot, inbound)
            .await;
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        let Interaction::Command(command) = interaction else {
            return;
        };

        handle_command(&ctx, &command, &self.routes).await;
    }
}

async fn register_commands(ctx: &Context) {
    let definitions: Vec<CreateCommand> = commands::definitions()
        .into_iter()
        .map(create_command)
        .collect();

    match Command::set_global_commands(&ctx.http, definitions).await {
        Ok(registered) => info!(count = registered.len(), "Registered slash commands"),
        Err(e) => error!(error = %e, "Failed to register slash commands"),
    }
}

async fn handle_command(ctx: &Context, command: &CommandInteraction, routes: &GuildConfigStore) {
    let channel_id = command
        .data
        .options
        .iter()
        .find(|option| option.name == CHANNEL_OPTION)
        .and_then(|option| option.value.as_channel_id())
        .map(|id| id.to_string());

    let Some(relay_command) = RelayCommand::parse(&command.data.name, channel_id) else {
        warn!(command = %command.data.name, "Unknown slash command");
        return;
    };

    let invocation = CommandInvocation {
        guild_id: command.guild_id.map(|id| id.to_string()),
        permission: match command.member.as_deref() {
            Some(member) => classify_permissions(member.permissions),
            // Only direct messages lack a member; the guild check answers those.
            None => Permission::Denied,
        },
        command: relay_command,
    };
    let reply = commands::execute(routes, invocation).await;

    let message = CreateInteractionResponseMessage::new()
        .content(reply.content)
        .ephemeral(reply.ephemeral);
    if let Err(e) = command
        .create_response(&ctx.http, CreateInteractionResponse::Message(message))
        .await
    {
        error!(command = %command.data.name, error = %e, "Failed to respond to slash command");
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn create_command(definition: CommandDefinition) -> CreateCommand {
    let command = CreateCommand::new(definition.name).description(definition.description);
    match definition.channel_option {
        Some(option) => command.add_option(
            CreateCommandOption::new(CommandOptionType::Channel, option.name, option.description)
                .required(option.required)
                .channel_types(vec![ChannelType::Text]),
        ),
        None => command,
    }
}

/// Map a member's resolved permissions to the relay's permission check.
fn classify_permissions(permissions: Option<Permissions>) -> Permission {
    match permissions {
        Some(p) if p.intersects(Permissions::ADMINISTRATOR | Permissions::MANAGE_CHANNELS) => {
            Permission::Granted
        }
        Some(_) => Permission::Denied,
        None => Permission::Unknown,
    }
}
