use serenity::Client;
use serenity::all::GatewayIntents;
use std::sync::Arc;
use tracing::{error, info};

mod accounting;
mod bot;
mod config;
mod format;
mod recorder;
mod report;
mod session;
mod store;

use crate::bot::{RecorderKey, VoiceHandler};
use crate::config::Config;
use crate::recorder::TimeRecorder;

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let config = Config::from_env().expect("configuration error");

    let mut recorder = TimeRecorder::new(config.store.build());
    if let Some(timeout) = config.store_timeout {
        recorder = recorder.with_store_timeout(timeout);
    }
    let recorder = Arc::new(recorder);

    let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_VOICE_STATES;

    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(VoiceHandler)
        .type_map_insert::<RecorderKey>(recorder)
        .await
        .expect("failed to build the Discord client");

    info!("starting the voice time bot");

    if let Err(why) = client.start().await {
        error!("client error: {why:?}");
    }
}
