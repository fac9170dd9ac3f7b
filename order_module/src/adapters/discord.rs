//! Discord rendering for the order workflow.
//!
//! - `DiscordRenderer`: implements [`Renderer`] over serenity's REST client
//! - `ControlId`: encodes order keys into component custom ids and back
//!
//! Message layout (titles, field labels, colours) lives in the pure helpers
//! at the bottom of this file so it can be tested without a connection.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use ledger_module::Entry;
use serenity::all::{
    ButtonStyle, ChannelId, ChannelType, Colour, CreateActionRow, CreateButton, CreateChannel,
    CreateEmbed, CreateEmbedFooter, CreateMessage, CreateSelectMenu, CreateSelectMenuKind,
    CreateSelectMenuOption, EditMessage, Embed, GetMessages, GuildId, Http, Message, MessageId,
    PermissionOverwrite, PermissionOverwriteType, Permissions, RoleId, UserId,
};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::reconciler::StatusView;
use crate::render::{format_local, MessageRef, RenderError, Renderer};
use crate::workflow::{Assignee, OrderKey, WorkflowInstance, WorkflowState};

pub const ASSIGNMENT_TITLE: &str = "🛒 New Order";
pub const WORK_PROMPT_TITLE: &str = "📦 Order In Progress";
pub const COMPLETED_TITLE: &str = "Order Completed";
pub const HOURS_INPUT_ID: &str = "hours_input";

const SCAN_LIMIT: u8 = 100;
const EMBED_FIELD_LIMIT: usize = 25;
const SELECT_OPTION_LIMIT: usize = 25;
const FIELD_VALUE_LIMIT: usize = 1024;
const MISSING: &str = "-";

// ============================================================================
// Control ids
// ============================================================================

/// Custom id carried by an interactive component. Only the order key is
/// encoded; the engine looks everything else up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlId {
    Assign(OrderKey),
    Hours(OrderKey),
    Complete(OrderKey),
    HoursModal(OrderKey),
}

impl ControlId {
    pub fn parse(custom_id: &str) -> Option<Self> {
        let (kind, key) = custom_id.split_once(':')?;
        if key.is_empty() {
            return None;
        }
        let key = OrderKey::new(key);
        match kind {
            "assign" => Some(ControlId::Assign(key)),
            "hours" => Some(ControlId::Hours(key)),
            "complete" => Some(ControlId::Complete(key)),
            "hours-modal" => Some(ControlId::HoursModal(key)),
            _ => None,
        }
    }

    pub fn to_custom_id(&self) -> String {
        let (kind, key) = match self {
            ControlId::Assign(key) => ("assign", key),
            ControlId::Hours(key) => ("hours", key),
            ControlId::Complete(key) => ("complete", key),
            ControlId::HoursModal(key) => ("hours-modal", key),
        };
        format!("{}:{}", kind, key)
    }
}

// ============================================================================
// Renderer
// ============================================================================

#[derive(Debug, Clone)]
pub struct DiscordSettings {
    pub guild_id: u64,
    /// Shared channel where new orders are announced.
    pub orders_channel_id: u64,
    pub status_channel_name: String,
    pub display_offset: FixedOffset,
}

enum ChannelAccess<'a> {
    /// Look up only; a missing channel is not created.
    Existing,
    Public,
    PrivateTo(&'a Assignee),
}

pub struct DiscordRenderer {
    http: Arc<Http>,
    settings: DiscordSettings,
    /// Channel name -> id. The lock also serializes channel creation.
    channels: AsyncMutex<HashMap<String, ChannelId>>,
}

impl DiscordRenderer {
    pub fn new(http: Arc<Http>, settings: DiscordSettings) -> Self {
        Self {
            http,
            settings,
            channels: AsyncMutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &DiscordSettings {
        &self.settings
    }

    async fn channel_named(
        &self,
        name: &str,
        access: ChannelAccess<'_>,
    ) -> Result<Option<ChannelId>, RenderError> {
        let mut cache = self.channels.lock().await;
        if let Some(id) = cache.get(name) {
            return Ok(Some(*id));
        }

        let guild = GuildId::new(self.settings.guild_id);
        let existing = guild
            .channels(&*self.http)
            .await?
            .into_values()
            .find(|channel| channel.name == name)
            .map(|channel| channel.id);
        let id = match (existing, access) {
            (Some(id), _) => id,
            (None, ChannelAccess::Existing) => return Ok(None),
            (None, ChannelAccess::Public) => {
                let builder = CreateChannel::new(name).kind(ChannelType::Text);
                let created = guild.create_channel(&*self.http, builder).await?;
                info!("created channel #{}", name);
                created.id
            }
            (None, ChannelAccess::PrivateTo(assignee)) => {
                let builder = CreateChannel::new(name)
                    .kind(ChannelType::Text)
                    .topic(format!("Orders handled by {}", assignee.display_name))
                    .permissions(private_overwrites(self.settings.guild_id, assignee));
                let created = guild.create_channel(&*self.http, builder).await?;
                info!("created private channel #{} for {}", name, assignee.id);
                created.id
            }
        };
        cache.insert(name.to_string(), id);
        Ok(Some(id))
    }

    async fn required_channel(
        &self,
        name: &str,
        access: ChannelAccess<'_>,
    ) -> Result<ChannelId, RenderError> {
        self.channel_named(name, access)
            .await?
            .ok_or_else(|| RenderError::ChannelUnavailable(name.to_string()))
    }

    /// Drops a cached id after a failed send so the next call looks it up again.
    async fn forget_channel(&self, name: &str) {
        self.channels.lock().await.remove(name);
    }

    async fn recent_messages(&self, channel: ChannelId) -> Result<Vec<Message>, RenderError> {
        Ok(channel
            .messages(&*self.http, GetMessages::new().limit(SCAN_LIMIT))
            .await?)
    }
}

#[async_trait]
impl Renderer for DiscordRenderer {
    fn channel_label(&self, assignee: &Assignee) -> String {
        format!("#{}", orders_channel_name(assignee))
    }

    async fn publish_assignment_prompt(
        &self,
        instance: &WorkflowInstance,
        options: &[Assignee],
    ) -> Result<MessageRef, RenderError> {
        if options.is_empty() {
            return Err(RenderError::Rejected(
                "no assignees to offer".to_string(),
            ));
        }
        let channel = ChannelId::new(self.settings.orders_channel_id);
        let message = CreateMessage::new()
            .embed(order_embed(instance, self.settings.display_offset))
            .components(vec![assignment_row(&instance.key, options)]);
        let sent = channel.send_message(&*self.http, message).await?;
        debug!("assignment prompt for {} posted as {}", instance.key, sent.id);
        Ok(message_ref(&sent))
    }

    async fn mark_assigned(
        &self,
        prompt: MessageRef,
        instance: &WorkflowInstance,
    ) -> Result<(), RenderError> {
        let edit = EditMessage::new()
            .embed(order_embed(instance, self.settings.display_offset))
            .components(Vec::new());
        ChannelId::new(prompt.channel_id)
            .edit_message(&*self.http, MessageId::new(prompt.message_id), edit)
            .await?;
        Ok(())
    }

    async fn publish_work_prompt(
        &self,
        instance: &WorkflowInstance,
        assignee: &Assignee,
    ) -> Result<MessageRef, RenderError> {
        let name = orders_channel_name(assignee);
        let channel = self
            .required_channel(&name, ChannelAccess::PrivateTo(assignee))
            .await?;
        let mention = assignee
            .id
            .parse::<u64>()
            .map(|id| format!("<@{}>", id))
            .unwrap_or_else(|_| assignee.display_name.clone());
        let message = CreateMessage::new()
            .content(format!("{} a new order is yours.", mention))
            .embed(order_embed(instance, self.settings.display_offset))
            .components(vec![work_row(&instance.key, instance.state)]);
        match channel.send_message(&*self.http, message).await {
            Ok(sent) => Ok(message_ref(&sent)),
            Err(err) => {
                self.forget_channel(&name).await;
                Err(err.into())
            }
        }
    }

    async fn update_work_prompt(
        &self,
        prompt: MessageRef,
        instance: &WorkflowInstance,
    ) -> Result<(), RenderError> {
        let edit = EditMessage::new()
            .embed(order_embed(instance, self.settings.display_offset))
            .components(vec![work_row(&instance.key, instance.state)]);
        ChannelId::new(prompt.channel_id)
            .edit_message(&*self.http, MessageId::new(prompt.message_id), edit)
            .await?;
        Ok(())
    }

    async fn remove_work_prompt(&self, prompt: MessageRef) -> Result<(), RenderError> {
        ChannelId::new(prompt.channel_id)
            .delete_message(&*self.http, MessageId::new(prompt.message_id))
            .await?;
        Ok(())
    }

    async fn append_summary(
        &self,
        instance: &WorkflowInstance,
        entry: &Entry,
    ) -> Result<(), RenderError> {
        let assignee = instance
            .assignee
            .as_ref()
            .ok_or_else(|| RenderError::Rejected("order has no assignee".to_string()))?;
        let channel = self
            .required_channel(
                &summary_channel_name(assignee),
                ChannelAccess::PrivateTo(assignee),
            )
            .await?;
        let title = summary_title(entry.timestamp, self.settings.display_offset);
        let (name, value) = summary_field(instance, entry, self.settings.display_offset);

        let today = self
            .recent_messages(channel)
            .await?
            .into_iter()
            .find_map(|message| {
                let embed = message.embeds.first()?;
                let open = embed.title.as_deref() == Some(title.as_str())
                    && embed.fields.len() < EMBED_FIELD_LIMIT;
                open.then(|| (message.id, embed.clone()))
            });

        match today {
            Some((message_id, embed)) => {
                let completed = embed.fields.len() + 1;
                let updated = CreateEmbed::from(embed)
                    .field(name, value, false)
                    .footer(CreateEmbedFooter::new(summary_footer(completed)));
                channel
                    .edit_message(&*self.http, message_id, EditMessage::new().embed(updated))
                    .await?;
            }
            None => {
                let embed = CreateEmbed::new()
                    .title(title)
                    .colour(state_colour(WorkflowState::Completed))
                    .field(name, value, false)
                    .footer(CreateEmbedFooter::new(summary_footer(1)));
                channel
                    .send_message(&*self.http, CreateMessage::new().embed(embed))
                    .await?;
            }
        }
        Ok(())
    }

    async fn count_open_orders(&self, assignee: &Assignee) -> Result<usize, RenderError> {
        let channel = match self
            .channel_named(&orders_channel_name(assignee), ChannelAccess::Existing)
            .await?
        {
            Some(channel) => channel,
            None => return Ok(0),
        };
        let messages = self.recent_messages(channel).await?;
        Ok(messages
            .iter()
            .filter(|message| message.embeds.iter().any(is_open_work_embed))
            .count())
    }

    async fn publish_status(
        &self,
        assignee: &Assignee,
        view: &StatusView,
    ) -> Result<(), RenderError> {
        let channel = self
            .required_channel(&self.settings.status_channel_name, ChannelAccess::Public)
            .await?;
        let footer = status_footer(&assignee.id);
        let embed = status_embed(view, &footer, self.settings.display_offset);

        let existing = self
            .recent_messages(channel)
            .await?
            .into_iter()
            .find(|message| {
                message.embeds.iter().any(|embed| {
                    embed.footer.as_ref().map(|f| f.text.as_str()) == Some(footer.as_str())
                })
            });
        match existing {
            Some(message) => {
                channel
                    .edit_message(&*self.http, message.id, EditMessage::new().embed(embed))
                    .await?;
            }
            None => {
                channel
                    .send_message(&*self.http, CreateMessage::new().embed(embed))
                    .await?;
            }
        }
        Ok(())
    }

    async fn purge_messages(&self, channel_id: u64, count: u8) -> Result<usize, RenderError> {
        let channel = ChannelId::new(channel_id);
        let messages = channel
            .messages(&*self.http, GetMessages::new().limit(count))
            .await?;
        let mut deleted = 0;
        for message in messages {
            match channel.delete_message(&*self.http, message.id).await {
                Ok(()) => deleted += 1,
                Err(err) => warn!("could not delete message {}: {}", message.id, err),
            }
        }
        info!("purged {} message(s) from channel {}", deleted, channel_id);
        Ok(deleted)
    }
}

fn message_ref(message: &Message) -> MessageRef {
    MessageRef {
        channel_id: message.channel_id.get(),
        message_id: message.id.get(),
    }
}

fn private_overwrites(guild_id: u64, assignee: &Assignee) -> Vec<PermissionOverwrite> {
    // The @everyone role shares the guild's id.
    let mut overwrites = vec![PermissionOverwrite {
        allow: Permissions::empty(),
        deny: Permissions::VIEW_CHANNEL,
        kind: PermissionOverwriteType::Role(RoleId::new(guild_id)),
    }];
    if let Ok(user_id) = assignee.id.parse::<u64>() {
        overwrites.push(PermissionOverwrite {
            allow: Permissions::VIEW_CHANNEL
                | Permissions::SEND_MESSAGES
                | Permissions::READ_MESSAGE_HISTORY,
            deny: Permissions::empty(),
            kind: PermissionOverwriteType::Member(UserId::new(user_id)),
        });
    }
    overwrites
}

// ============================================================================
// Layout
// ============================================================================

/// Lowercase ascii letters, digits and dashes, as Discord normalizes names.
pub fn channel_slug(assignee: &Assignee) -> String {
    let mut slug = String::new();
    for c in assignee.display_name.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() {
            slug.push(c);
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_end_matches('-').to_string();
    if slug.is_empty() {
        format!("assignee-{}", assignee.id)
    } else {
        slug
    }
}

pub fn orders_channel_name(assignee: &Assignee) -> String {
    format!("{}-orders", channel_slug(assignee))
}

pub fn summary_channel_name(assignee: &Assignee) -> String {
    format!("{}-summary", channel_slug(assignee))
}

pub fn status_footer(assignee_id: &str) -> String {
    format!("assignee:{}", assignee_id)
}

fn summary_title(at: DateTime<Utc>, offset: FixedOffset) -> String {
    format!(
        "📅 Daily Summary {}",
        at.with_timezone(&offset).format("%d/%m/%Y")
    )
}

fn summary_footer(completed: usize) -> String {
    format!("{} order(s) completed", completed)
}

fn summary_field(
    instance: &WorkflowInstance,
    entry: &Entry,
    offset: FixedOffset,
) -> (String, String) {
    let name = format!(
        "{} · {}",
        instance.order_label(),
        entry.timestamp.with_timezone(&offset).format("%H:%M")
    );
    let value = format!(
        "{} hour(s) · {}",
        entry.hours,
        instance.order.product_name.as_deref().unwrap_or(MISSING)
    );
    (name, truncate(&value))
}

fn is_open_work_embed(embed: &Embed) -> bool {
    embed.title.as_deref() == Some(WORK_PROMPT_TITLE)
}

fn state_colour(state: WorkflowState) -> Colour {
    match state {
        WorkflowState::Detected => Colour::from_rgb(241, 196, 15),
        WorkflowState::Assigned => Colour::from_rgb(52, 152, 219),
        WorkflowState::Committed => Colour::from_rgb(155, 89, 182),
        WorkflowState::Completed => Colour::from_rgb(46, 204, 113),
    }
}

fn embed_title(instance: &WorkflowInstance) -> &'static str {
    match instance.state {
        WorkflowState::Detected => ASSIGNMENT_TITLE,
        WorkflowState::Assigned | WorkflowState::Committed => WORK_PROMPT_TITLE,
        WorkflowState::Completed => COMPLETED_TITLE,
    }
}

/// `(name, value, inline)` fields describing an order in its current state.
pub fn order_fields(
    instance: &WorkflowInstance,
    offset: FixedOffset,
) -> Vec<(String, String, bool)> {
    let order = &instance.order;
    let text = |value: &Option<String>| truncate(value.as_deref().unwrap_or(MISSING));
    let mut fields = vec![
        ("📋 Nomor Pesanan".to_string(), text(&order.order_number), true),
        ("👤 Pembeli".to_string(), text(&order.buyer_name), true),
        ("🎮 Produk".to_string(), text(&order.product_name), false),
        ("📦 Jumlah".to_string(), text(&order.quantity), true),
        ("💰 Harga".to_string(), text(&order.price_text), true),
        (
            "🔑 Informasi Transaksi".to_string(),
            text(&order.transaction_secret),
            false,
        ),
        ("⏳ Batas Waktu".to_string(), text(&order.deadline_text), false),
    ];
    if let Some(assignee) = &instance.assignee {
        fields.push((
            "👷 Assignee".to_string(),
            assignee.display_name.clone(),
            true,
        ));
    }
    if let (Some(hours), Some(expected)) =
        (instance.committed_hours, instance.expected_completion_at)
    {
        fields.push(("⏱️ Committed".to_string(), format!("{} hour(s)", hours), true));
        fields.push((
            "🏁 Expected Completion".to_string(),
            format_local(expected, offset),
            true,
        ));
    }
    fields
}

fn order_embed(instance: &WorkflowInstance, offset: FixedOffset) -> CreateEmbed {
    let mut embed = CreateEmbed::new()
        .title(embed_title(instance))
        .colour(state_colour(instance.state))
        .footer(CreateEmbedFooter::new(format!(
            "Detected {} · {}",
            format_local(instance.detected_at, offset),
            instance.state
        )));
    for (name, value, inline) in order_fields(instance, offset) {
        embed = embed.field(name, value, inline);
    }
    embed
}

/// Select menus reject more than [`SELECT_OPTION_LIMIT`] options.
fn offered(options: &[Assignee]) -> &[Assignee] {
    &options[..options.len().min(SELECT_OPTION_LIMIT)]
}

fn assignment_row(key: &OrderKey, options: &[Assignee]) -> CreateActionRow {
    let options = offered(options)
        .iter()
        .map(|assignee| CreateSelectMenuOption::new(&assignee.display_name, &assignee.id))
        .collect();
    CreateActionRow::SelectMenu(
        CreateSelectMenu::new(
            ControlId::Assign(key.clone()).to_custom_id(),
            CreateSelectMenuKind::String { options },
        )
        .placeholder("Choose who handles this order"),
    )
}

fn work_row(key: &OrderKey, state: WorkflowState) -> CreateActionRow {
    let hours_committed = state != WorkflowState::Assigned;
    CreateActionRow::Buttons(vec![
        CreateButton::new(ControlId::Hours(key.clone()).to_custom_id())
            .label("⏱️ Commit Hours")
            .style(ButtonStyle::Primary)
            .disabled(hours_committed),
        CreateButton::new(ControlId::Complete(key.clone()).to_custom_id())
            .label("✅ Complete")
            .style(ButtonStyle::Success)
            .disabled(!hours_committed),
    ])
}

fn status_embed(view: &StatusView, footer: &str, offset: FixedOffset) -> CreateEmbed {
    CreateEmbed::new()
        .title(format!("📊 {}", view.assignee_name))
        .colour(Colour::from_rgb(52, 152, 219))
        .field("Admin", view.assignee_name.clone(), true)
        .field(
            "Active Orders (observed)",
            view.active_order_count.to_string(),
            true,
        )
        .field("Total Hours", view.total_hours.to_string(), true)
        .field("Channel", view.channel_label.clone(), true)
        .field("Last Update", format_local(view.last_updated_at, offset), true)
        .footer(CreateEmbedFooter::new(footer))
}

fn truncate(value: &str) -> String {
    if value.chars().count() <= FIELD_VALUE_LIMIT {
        return value.to_string();
    }
    let mut cut: String = value.chars().take(FIELD_VALUE_LIMIT - 1).collect();
    cut.push('…');
    cut
}
