// Presenti Platforms
//
// Platform bridges: the link-event-driven scope directory, the outbound
// pipe boundary, and the Discord presence adapter built on them.

pub mod directory;
pub mod discord;
pub mod outbound;

pub use directory::ScopeDirectory;
pub use discord::{DiscordAdapter, DISCORD_PLATFORM};
pub use outbound::PresenceSink;
