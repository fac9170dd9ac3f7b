//! Discord Gateway handler for order interactions and admin slash commands.
//!
//! Components, modals and commands are turned into workflow [`Action`]s by
//! the pure `route_*` functions below, then handed to the [`OrderEngine`].
//! Every reply is ephemeral and goes only to the person who acted.

use std::collections::HashMap;
use std::sync::Arc;

use serenity::all::{
    ActionRowComponent, CommandInteraction, CommandOptionType, ComponentInteraction,
    ComponentInteractionDataKind, Context, CreateActionRow, CreateCommand, CreateCommandOption,
    CreateInputText, CreateInteractionResponse, CreateInteractionResponseMessage, CreateModal,
    EditInteractionResponse, EventHandler, GuildId, InputTextStyle, Interaction,
    ModalInteraction, Permissions, Ready, ResolvedValue, User,
};
use serenity::async_trait;
use tracing::{error, info, warn};

use crate::adapters::discord::{ControlId, HOURS_INPUT_ID};
use crate::render::Renderer;
use crate::workflow::{
    Action, Actor, OrderEngine, OrderKey, MAX_HOURS, MAX_PURGE_COUNT, MIN_HOURS,
};

/// What a component click asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routed {
    Action(Action),
    /// The hours button only opens the input modal; the modal submit commits.
    OpenHoursModal(OrderKey),
}

/// A resolved slash command option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandArg {
    Str(String),
    Int(i64),
    User { id: u64, name: String },
    Channel(u64),
}

pub fn route_component(
    custom_id: &str,
    values: &[String],
    actor: Actor,
) -> Result<Routed, String> {
    match ControlId::parse(custom_id) {
        Some(ControlId::Assign(key)) => {
            let assignee_id = values
                .first()
                .cloned()
                .ok_or_else(|| "No assignee was selected.".to_string())?;
            Ok(Routed::Action(Action::AssignmentChosen {
                key,
                assignee_id,
                actor,
            }))
        }
        Some(ControlId::Hours(key)) => Ok(Routed::OpenHoursModal(key)),
        Some(ControlId::Complete(key)) => {
            Ok(Routed::Action(Action::MarkedComplete { key, actor }))
        }
        Some(ControlId::HoursModal(_)) | None => {
            Err("This control is not recognized.".to_string())
        }
    }
}

pub fn route_modal(
    custom_id: &str,
    inputs: &HashMap<String, String>,
    actor: Actor,
) -> Result<Action, String> {
    match ControlId::parse(custom_id) {
        Some(ControlId::HoursModal(key)) => Ok(Action::HoursCommitted {
            key,
            hours_input: inputs.get(HOURS_INPUT_ID).cloned().unwrap_or_default(),
            actor,
        }),
        _ => Err("This form is not recognized.".to_string()),
    }
}

/// Maps a slash command to an administrative action. `invoked_in` is the
/// channel the command was used in, the default target for `purge`.
pub fn parse_admin_command(
    name: &str,
    args: &HashMap<String, CommandArg>,
    invoked_in: u64,
) -> Result<Action, String> {
    let user = |key: &str| match args.get(key) {
        Some(CommandArg::User { id, name }) => Some((id.to_string(), name.clone())),
        _ => None,
    };
    let int = |key: &str| match args.get(key) {
        Some(CommandArg::Int(value)) => Some(*value),
        _ => None,
    };
    let required_user = |key: &str| user(key).ok_or_else(|| format!("Missing option `{}`.", key));

    let action = match name {
        "add-admin" => {
            let (id, user_name) = required_user("user")?;
            let display_name = match args.get("name") {
                Some(CommandArg::Str(name)) if !name.trim().is_empty() => name.trim().to_string(),
                _ => user_name,
            };
            Action::AddAdmin { id, display_name }
        }
        "remove-admin" => Action::RemoveAdmin {
            id: required_user("user")?.0,
        },
        "list-admins" => Action::ListAdmins,
        "total-hours" => Action::TotalHours {
            admin_id: user("user").map(|(id, _)| id),
        },
        "status" => Action::RefreshStatus {
            admin_id: user("user").map(|(id, _)| id),
        },
        "backup" => Action::Backup,
        "restore" => Action::Restore,
        "pause" => Action::Pause,
        "resume" => Action::Resume,
        "purge" => Action::Purge {
            channel_id: match args.get("channel") {
                Some(CommandArg::Channel(id)) => *id,
                _ => invoked_in,
            },
            count: int("count").ok_or_else(|| "Missing option `count`.".to_string())?,
        },
        "cleanup" => Action::Cleanup {
            days: int("days").ok_or_else(|| "Missing option `days`.".to_string())?,
        },
        other => return Err(format!("Unknown command `{}`.", other)),
    };
    Ok(action)
}

/// Guild slash commands. All of them require the Administrator permission.
pub fn admin_commands() -> Vec<CreateCommand> {
    let user_option = |required: bool, description: &str| {
        CreateCommandOption::new(CommandOptionType::User, "user", description).required(required)
    };
    let admin_only =
        |command: CreateCommand| command.default_member_permissions(Permissions::ADMINISTRATOR);

    vec![
        CreateCommand::new("add-admin")
            .description("Register a user who can take orders")
            .add_option(user_option(true, "User to register"))
            .add_option(
                CreateCommandOption::new(CommandOptionType::String, "name", "Display name")
                    .required(false),
            ),
        CreateCommand::new("remove-admin")
            .description("Unregister an order taker")
            .add_option(user_option(true, "User to remove")),
        CreateCommand::new("list-admins").description("List registered order takers"),
        CreateCommand::new("total-hours")
            .description("Show completed hours")
            .add_option(user_option(false, "Only this user")),
        CreateCommand::new("status")
            .description("Refresh the status monitor")
            .add_option(user_option(false, "Only this user")),
        CreateCommand::new("backup").description("Back up the ledger"),
        CreateCommand::new("restore").description("Restore the most recent ledger backup"),
        CreateCommand::new("pause").description("Stop polling for new orders"),
        CreateCommand::new("resume").description("Resume polling for new orders"),
        CreateCommand::new("purge")
            .description("Delete recent messages in a channel")
            .add_option(
                CreateCommandOption::new(CommandOptionType::Integer, "count", "Messages to delete")
                    .required(true)
                    .min_int_value(1)
                    .max_int_value(MAX_PURGE_COUNT as u64),
            )
            .add_option(
                CreateCommandOption::new(CommandOptionType::Channel, "channel", "Target channel")
                    .required(false),
            ),
        CreateCommand::new("cleanup")
            .description("Delete ledger entries older than N days")
            .add_option(
                CreateCommandOption::new(CommandOptionType::Integer, "days", "Age in days")
                    .required(true)
                    .min_int_value(1),
            ),
    ]
    .into_iter()
    .map(admin_only)
    .collect()
}

fn hours_modal(key: &OrderKey) -> CreateModal {
    let input = CreateInputText::new(
        InputTextStyle::Short,
        format!("Hours ({}-{})", MIN_HOURS, MAX_HOURS),
        HOURS_INPUT_ID,
    )
    .placeholder("e.g. 3")
    .min_length(1)
    .max_length(2)
    .required(true);
    CreateModal::new(ControlId::HoursModal(key.clone()).to_custom_id(), "Commit Hours")
        .components(vec![CreateActionRow::InputText(input)])
}

fn actor_of(user: &User) -> Actor {
    Actor::new(
        user.id.get().to_string(),
        user.global_name.clone().unwrap_or_else(|| user.name.clone()),
    )
}

/// Checks the permissions resolved for the invoking member. Commands used
/// outside a guild carry none and are refused.
fn is_administrator(permissions: Option<Permissions>) -> bool {
    permissions.is_some_and(|permissions| permissions.administrator())
}

fn ephemeral(text: impl Into<String>) -> CreateInteractionResponse {
    CreateInteractionResponse::Message(
        CreateInteractionResponseMessage::new()
            .content(text)
            .ephemeral(true),
    )
}

/// Serenity event handler wired to one order engine.
pub struct OrderEventHandler<R> {
    engine: Arc<OrderEngine<R>>,
    guild_id: u64,
}

impl<R: Renderer> OrderEventHandler<R> {
    pub fn new(engine: Arc<OrderEngine<R>>, guild_id: u64) -> Self {
        Self { engine, guild_id }
    }

    async fn run(&self, action: Action) -> String {
        match self.engine.handle(action).await {
            Ok(outcome) => outcome.reply_text(),
            Err(err) => {
                if err.is_retryable() {
                    error!("order action failed: {}", err);
                }
                format!("❌ {}", err.user_message())
            }
        }
    }

    async fn on_component(&self, ctx: &Context, component: &ComponentInteraction) {
        let values = match &component.data.kind {
            ComponentInteractionDataKind::StringSelect { values } => values.clone(),
            _ => Vec::new(),
        };
        let routed = route_component(
            &component.data.custom_id,
            &values,
            actor_of(&component.user),
        );
        let result = match routed {
            Ok(Routed::OpenHoursModal(key)) => {
                let modal = CreateInteractionResponse::Modal(hours_modal(&key));
                component.create_response(&ctx.http, modal).await
            }
            Ok(Routed::Action(action)) => {
                if let Err(err) = component.defer_ephemeral(&ctx.http).await {
                    warn!(
                        "could not acknowledge component {}: {}",
                        component.data.custom_id, err
                    );
                    return;
                }
                let reply = self.run(action).await;
                component
                    .edit_response(&ctx.http, EditInteractionResponse::new().content(reply))
                    .await
                    .map(|_| ())
            }
            Err(message) => component.create_response(&ctx.http, ephemeral(message)).await,
        };
        if let Err(err) = result {
            warn!("component reply failed: {}", err);
        }
    }

    async fn on_modal(&self, ctx: &Context, modal: &ModalInteraction) {
        let inputs: HashMap<String, String> = modal
            .data
            .components
            .iter()
            .flat_map(|row| row.components.iter())
            .filter_map(|component| match component {
                ActionRowComponent::InputText(input) => Some((
                    input.custom_id.clone(),
                    input.value.clone().unwrap_or_default(),
                )),
                _ => None,
            })
            .collect();

        let action = match route_modal(&modal.data.custom_id, &inputs, actor_of(&modal.user)) {
            Ok(action) => action,
            Err(message) => {
                if let Err(err) = modal.create_response(&ctx.http, ephemeral(message)).await {
                    warn!("modal reply failed: {}", err);
                }
                return;
            }
        };
        if let Err(err) = modal.defer_ephemeral(&ctx.http).await {
            warn!("could not acknowledge modal {}: {}", modal.data.custom_id, err);
            return;
        }
        let reply = self.run(action).await;
        if let Err(err) = modal
            .edit_response(&ctx.http, EditInteractionResponse::new().content(reply))
            .await
        {
            warn!("modal reply failed: {}", err);
        }
    }

    async fn on_command(&self, ctx: &Context, command: &CommandInteraction) {
        let args: HashMap<String, CommandArg> = command
            .data
            .options()
            .into_iter()
            .filter_map(|option| {
                let arg = match option.value {
                    ResolvedValue::String(value) => CommandArg::Str(value.to_string()),
                    ResolvedValue::Integer(value) => CommandArg::Int(value),
                    ResolvedValue::User(user, _) => CommandArg::User {
                        id: user.id.get(),
                        name: user.global_name.clone().unwrap_or_else(|| user.name.clone()),
                    },
                    ResolvedValue::Channel(channel) => CommandArg::Channel(channel.id.get()),
                    _ => return None,
                };
                Some((option.name.to_string(), arg))
            })
            .collect();

        info!(
            "command /{} from {} ({} option(s))",
            command.data.name,
            command.user.id,
            args.len()
        );
        let permissions = command.member.as_ref().and_then(|member| member.permissions);
        if !is_administrator(permissions) {
            warn!(
                "refused /{} from {}: not an administrator",
                command.data.name, command.user.id
            );
            let reply = ephemeral("Only server administrators can use this command.");
            if let Err(err) = command.create_response(&ctx.http, reply).await {
                warn!("command reply failed: {}", err);
            }
            return;
        }
        let parsed = parse_admin_command(&command.data.name, &args, command.channel_id.get());
        let action = match parsed {
            Ok(action) => action,
            Err(message) => {
                if let Err(err) = command.create_response(&ctx.http, ephemeral(message)).await {
                    warn!("command reply failed: {}", err);
                }
                return;
            }
        };
        if let Err(err) = command.defer_ephemeral(&ctx.http).await {
            warn!("could not acknowledge /{}: {}", command.data.name, err);
            return;
        }
        let reply = self.run(action).await;
        if let Err(err) = command
            .edit_response(&ctx.http, EditInteractionResponse::new().content(reply))
            .await
        {
            warn!("command reply failed: {}", err);
        }
    }
}

#[async_trait]
impl<R: Renderer + 'static> EventHandler for OrderEventHandler<R> {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("Discord bot connected as {}", ready.user.name);
        match GuildId::new(self.guild_id)
            .set_commands(&ctx.http, admin_commands())
            .await
        {
            Ok(commands) => info!("registered {} guild commands", commands.len()),
            Err(err) => error!("failed to register guild commands: {}", err),
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        match interaction {
            Interaction::Component(component) => self.on_component(&ctx, &component).await,
            Interaction::Modal(modal) => self.on_modal(&ctx, &modal).await,
            Interaction::Command(command) => self.on_command(&ctx, &command).await,
            _ => {}
        }
    }
}
