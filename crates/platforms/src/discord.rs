// Discord Presence Bridge
//
// Consumes PRESENCE_UPDATE events from the Discord gateway and mirrors
// them into a presence ledger for every platform identity the scope
// directory maps. The directory is the sole authority for which Discord
// users feed which scopes; unmapped users are ignored.

use crate::directory::ScopeDirectory;
use crate::outbound::PresenceSink;
use async_trait::async_trait;
use presenti_core::{
    Adapter, AdapterState, AdapterStateCell, CoreError, PresenceBuilder, PresenceLedger,
    PresenceList, Scope,
};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use twilight_gateway::{
    Event, EventTypeFlags, Intents, MessageSender, Shard, ShardId, StreamExt as _,
};
use twilight_model::gateway::payload::outgoing::UpdatePresence;
use twilight_model::gateway::presence::{Activity, ActivityType, MinimalActivity, Status, UserOrId};

pub const DISCORD_PLATFORM: &str = "discord";

pub struct DiscordAdapter {
    bot_token: String,
    directory: Arc<ScopeDirectory>,
    ledger: Arc<PresenceLedger>,
    sender: OnceLock<MessageSender>,
    state: AdapterStateCell,
}

impl DiscordAdapter {
    pub fn new(
        bot_token: String,
        directory: Arc<ScopeDirectory>,
        ledger: Arc<PresenceLedger>,
    ) -> Self {
        Self {
            bot_token,
            directory,
            ledger,
            sender: OnceLock::new(),
            state: AdapterStateCell::new(),
        }
    }
}

#[async_trait]
impl Adapter for DiscordAdapter {
    fn state(&self) -> AdapterState {
        self.state.get()
    }

    async fn run(&self) -> Result<(), CoreError> {
        let intents = Intents::GUILDS | Intents::GUILD_PRESENCES;
        let mut shard = Shard::new(ShardId::ONE, self.bot_token.clone(), intents);
        let _ = self.sender.set(shard.sender());
        tracing::info!("Discord gateway shard created, connecting...");

        let directory = self.directory.clone();
        let ledger = self.ledger.clone();
        tokio::spawn(async move {
            while let Some(item) = shard.next_event(EventTypeFlags::all()).await {
                let event = match item {
                    Ok(event) => event,
                    Err(e) => {
                        tracing::error!("Error receiving Discord event: {}", e);
                        continue;
                    }
                };

                match event {
                    Event::Ready(_) => {
                        tracing::info!("Discord gateway ready");
                    }
                    Event::PresenceUpdate(update) => {
                        let presence = &update.0;
                        let user_id = match &presence.user {
                            UserOrId::User(user) => user.id.get(),
                            UserOrId::UserId { id } => id.get(),
                        };
                        apply_update(
                            &directory,
                            &ledger,
                            &user_id.to_string(),
                            presence.status == Status::Offline,
                            &presence.activities,
                        );
                    }
                    _ => {}
                }
            }

            tracing::warn!("Discord gateway event stream ended");
        });

        self.state.set_running();
        Ok(())
    }

    async fn activity_for_scope(&self, scope: &Scope) -> Result<PresenceList, CoreError> {
        // Directory-gated: an unlinked scope reports nothing even if stale
        // ledger data survives a link removal.
        if !self.directory.contains_scope(scope) {
            return Ok(Vec::new());
        }
        Ok(self.ledger.scoped(scope))
    }

    async fn activities(&self) -> Result<HashMap<Scope, PresenceList>, CoreError> {
        let mut map = self.ledger.activities();
        map.retain(|scope, _| self.directory.contains_scope(scope));
        Ok(map)
    }
}

#[async_trait]
impl PresenceSink for DiscordAdapter {
    /// The gateway exposes one outbound surface, the bot's own presence;
    /// when several scopes push outbound the last pushed one wins.
    async fn push_presence(
        &self,
        scope: &Scope,
        presences: &PresenceList,
    ) -> Result<(), CoreError> {
        if !self.directory.pushes_outbound(scope) {
            return Ok(());
        }
        let Some(sender) = self.sender.get() else {
            return Ok(());
        };

        let activities = outbound_activities(presences);
        if activities.is_empty() {
            // UpdatePresence requires at least one activity.
            return Ok(());
        }
        let request = UpdatePresence::new(activities, false, None, Status::Online)
            .map_err(|e| CoreError::Platform(e.to_string()))?;
        sender
            .command(&request)
            .map_err(|e| CoreError::Platform(e.to_string()))?;
        tracing::debug!("Pushed presence for {} to the Discord gateway", scope);
        Ok(())
    }
}

/// Map merged presence records to gateway activities. Records without a
/// title have no Discord representation and are dropped.
pub(crate) fn outbound_activities(presences: &[presenti_core::PresenceRecord]) -> Vec<Activity> {
    presences
        .iter()
        .filter_map(|record| {
            let name = record.title.clone()?;
            Some(Activity::from(MinimalActivity {
                kind: ActivityType::Playing,
                name,
                url: None,
            }))
        })
        .collect()
}

/// Mirror one presence update into the ledger, keyed per platform user so
/// each Discord identity replaces only its own contribution.
pub(crate) fn apply_update(
    directory: &ScopeDirectory,
    ledger: &PresenceLedger,
    user_id: &str,
    offline: bool,
    activities: &[Activity],
) {
    let Some(scope) = directory.scope_for(user_id) else {
        return;
    };

    let records = if offline {
        Vec::new()
    } else {
        records_from_activities(activities)
    };
    ledger.set(&format!("discord:{}", user_id), &scope, records);
}

fn records_from_activities(activities: &[Activity]) -> PresenceList {
    activities.iter().map(record_from_activity).collect()
}

fn record_from_activity(activity: &Activity) -> presenti_core::PresenceRecord {
    let mut builder = PresenceBuilder::new().title(activity.name.clone());

    if let Some(id) = &activity.id {
        builder = builder.id(id.clone());
    }
    if let Some(details) = &activity.details {
        builder = builder.large_text(details.clone());
    }
    if let Some(state) = &activity.state {
        builder = builder.small_text(state.clone());
    }
    if let Some(assets) = &activity.assets {
        let application_id = activity.application_id.map(|id| id.get());
        if let Some(image) = assets
            .large_image
            .as_deref()
            .and_then(|asset| asset_image_url(application_id, asset))
        {
            builder = builder.image(image);
        }
    }
    if let Some(timestamps) = &activity.timestamps {
        if let Some(start) = timestamps.start {
            builder = builder.start(start as i64);
        }
        if let Some(end) = timestamps.end {
            builder = builder.stop(end as i64);
        }
    }

    builder.build()
}

/// Resolve a raw activity asset reference to a fetchable URL. Discord uses
/// `mp:` prefixes for externally hosted media and bare snowflakes for
/// application-uploaded assets.
pub fn asset_image_url(application_id: Option<u64>, asset: &str) -> Option<String> {
    if let Some(external) = asset.strip_prefix("mp:") {
        return Some(format!("https://media.discordapp.net/{}", external));
    }
    if asset.chars().all(|c| c.is_ascii_digit()) {
        let application_id = application_id?;
        return Some(format!(
            "https://cdn.discordapp.com/app-assets/{}/{}.png",
            application_id, asset
        ));
    }
    None
}
