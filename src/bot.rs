use chrono::Utc;
use serenity::all::Command;
use serenity::all::CommandDataOptionValue;
use serenity::all::CommandInteraction;
use serenity::all::CommandOptionType;
use serenity::all::CreateCommand;
use serenity::all::CreateCommandOption;
use serenity::all::CreateInteractionResponse;
use serenity::all::CreateInteractionResponseMessage;
use serenity::all::Interaction;
use serenity::all::Ready;
use serenity::all::UserId;
use serenity::async_trait;
use serenity::model::voice::VoiceState;
use serenity::prelude::*;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::accounting::UserTimeRecord;
use crate::format::format_duration;
use crate::recorder::{TimeRecorder, TransitionOutcome, VoiceTransition};
use crate::report::{self, Timeframe};

/// Shared recorder handle, read back from serenity's type map.
pub struct RecorderKey;

impl TypeMapKey for RecorderKey {
    type Value = Arc<TimeRecorder>;
}

pub struct VoiceHandler;

#[async_trait]
impl EventHandler for VoiceHandler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("{} is connected", ready.user.name);

        for cmd in report_commands() {
            if let Err(e) = Command::create_global_command(&ctx.http, cmd).await {
                error!("global command registration failed: {e:?}");
            }
        }

        // Guild commands show up immediately, global ones can lag.
        for guild_id in ctx.cache.guilds() {
            for cmd in report_commands() {
                if let Err(e) = guild_id.create_command(&ctx.http, cmd).await {
                    error!("command registration failed for guild {guild_id}: {e:?}");
                }
            }
        }
    }

    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let recorder = shared_recorder(&ctx).await;

        let transition = VoiceTransition {
            user_id: new.user_id.to_string(),
            username: new
                .member
                .as_ref()
                .map(|member| member.user.name.clone())
                .unwrap_or_default(),
            old_channel: old
                .as_ref()
                .and_then(|state| state.channel_id)
                .map(|id| id.get()),
            new_channel: new.channel_id.map(|id| id.get()),
            at: Utc::now(),
        };

        let user_id = transition.user_id.clone();
        match recorder.apply(transition).await {
            TransitionOutcome::SessionStarted => {
                info!(user = %user_id, "voice session started");
            }
            TransitionOutcome::Credited {
                seconds, ref day, ..
            } => {
                info!(user = %user_id, seconds, day = %day, "voice session credited");
            }
            outcome => {
                debug!(user = %user_id, ?outcome, "voice transition absorbed");
            }
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::Command(cmd) = interaction {
            match cmd.data.name.as_str() {
                "voicetime" => handle_voicetime(&ctx, &cmd).await,
                "voiceweek" => handle_voiceweek(&ctx, &cmd).await,
                _ => {}
            }
        }
    }
}

fn report_commands() -> Vec<CreateCommand> {
    vec![
        CreateCommand::new("voicetime")
            .description("Show a member's accumulated voice time")
            .add_option(
                CreateCommandOption::new(
                    CommandOptionType::User,
                    "user",
                    "Member to report on (defaults to you)",
                )
                .required(false),
            )
            .add_option(
                CreateCommandOption::new(
                    CommandOptionType::String,
                    "timeframe",
                    "Window to total up",
                )
                .required(false)
                .add_string_choice("Today", "day")
                .add_string_choice("This Week", "week")
                .add_string_choice("This Month", "month")
                .add_string_choice("All Time", "alltime"),
            ),
        CreateCommand::new("voiceweek")
            .description("Day-by-day voice time for the last 7 days")
            .add_option(
                CreateCommandOption::new(
                    CommandOptionType::User,
                    "user",
                    "Member to report on (defaults to you)",
                )
                .required(false),
            ),
    ]
}

async fn handle_voicetime(ctx: &Context, cmd: &CommandInteraction) {
    let recorder = shared_recorder(ctx).await;
    let (snapshot, _) = recorder.snapshot().await;

    let (user_id, fallback_name) = target_user(cmd);
    let record = snapshot
        .record(&user_id.to_string())
        .cloned()
        .unwrap_or_default();
    let name = display_name(&record, fallback_name);

    let now = Utc::now();
    let content = match requested_timeframe(cmd) {
        Some(timeframe) => {
            let seconds = report::timeframe_seconds(&record, timeframe, now);
            format!(
                "🕒 **{}'s Voice Time ({})**: {}",
                name,
                timeframe.label(),
                format_duration(seconds as i64)
            )
        }
        None => {
            let today = report::timeframe_seconds(&record, Timeframe::Day, now);
            let all_time = report::timeframe_seconds(&record, Timeframe::AllTime, now);
            format!(
                "🕒 **{}'s Voice Time**\n📅 **Today:** {}\n🔢 **All Time:** {}",
                name,
                format_duration(today as i64),
                format_duration(all_time as i64)
            )
        }
    };

    respond(ctx, cmd, content).await;
}

async fn handle_voiceweek(ctx: &Context, cmd: &CommandInteraction) {
    let recorder = shared_recorder(ctx).await;
    let (snapshot, _) = recorder.snapshot().await;

    let (user_id, fallback_name) = target_user(cmd);
    let record = snapshot
        .record(&user_id.to_string())
        .cloned()
        .unwrap_or_default();
    let name = display_name(&record, fallback_name);

    let mut content = format!("📅 **{}'s Weekly Voice Time:**\n", name);
    for (day, seconds) in report::week_breakdown(&record, Utc::now()) {
        content.push_str(&format!(
            "📆 **{}:** {}\n",
            day,
            format_duration(seconds as i64)
        ));
    }

    respond(ctx, cmd, content).await;
}

async fn shared_recorder(ctx: &Context) -> Arc<TimeRecorder> {
    let data = ctx.data.read().await;
    data.get::<RecorderKey>()
        .expect("recorder missing from client data")
        .clone()
}

// Prefer the name recorded at credit time; new users only have the interaction to go on.
fn display_name(record: &UserTimeRecord, fallback: String) -> String {
    if record.username.is_empty() {
        fallback
    } else {
        record.username.clone()
    }
}

// The user option, defaulting to whoever ran the command.
fn target_user(cmd: &CommandInteraction) -> (UserId, String) {
    for option in &cmd.data.options {
        if option.name == "user" {
            if let CommandDataOptionValue::User(user_id) = &option.value {
                let name = cmd
                    .data
                    .resolved
                    .users
                    .get(user_id)
                    .map(|user| user.name.clone())
                    .unwrap_or_else(|| user_id.to_string());
                return (*user_id, name);
            }
        }
    }
    (cmd.user.id, cmd.user.name.clone())
}

fn requested_timeframe(cmd: &CommandInteraction) -> Option<Timeframe> {
    cmd.data
        .options
        .iter()
        .find(|option| option.name == "timeframe")
        .and_then(|option| match &option.value {
            CommandDataOptionValue::String(value) => Timeframe::parse(value),
            _ => None,
        })
}

async fn respond(ctx: &Context, cmd: &CommandInteraction, content: String) {
    let response = CreateInteractionResponse::Message(
        CreateInteractionResponseMessage::new().content(content),
    );
    if let Err(e) = cmd.create_response(&ctx.http, response).await {
        error!("interaction response failed: {e:?}");
    }
}
