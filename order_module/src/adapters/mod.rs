//! Chat platform adapters.

pub mod discord;

pub use discord::{ControlId, DiscordRenderer, DiscordSettings, HOURS_INPUT_ID};
