// Presenti Core
//
// Presence aggregation primitives: scopes, presence records, the reactive
// ledger, the adapter/supervisor tree, the gradient scheduler, and the
// collaborator boundaries (token validation, link store, palette
// extraction).

pub mod adapter;
pub mod auth;
pub mod config;
pub mod error;
pub mod events;
pub mod gradient;
pub mod ledger;
pub mod links;
pub mod presence;
pub mod scope;
pub mod storage;
pub mod supervisor;

pub use adapter::{Adapter, AdapterState, AdapterStateCell, StateAdapter};
pub use auth::{StaticTokenValidator, TokenValidator};
pub use config::Config;
pub use error::CoreError;
pub use events::{ObserverList, Updates};
pub use gradient::{GradientStateAdapter, HttpPaletteExtractor, PaletteExtractor};
pub use ledger::{LedgerCondenser, PresenceLedger};
pub use links::{LinkBus, LinkEvent, LinkStore, MemoryLinkStore, OAuthLink, PipeDirection};
pub use presence::{GradientFlag, PresenceBuilder, PresenceList, PresenceRecord};
pub use scope::{Scope, FIRST_PARTY_SCOPE};
pub use storage::{BlobStore, FileBlobStore, MemoryBlobStore, StorageAdapter};
pub use supervisor::{AdapterSupervisor, MasterSupervisor, ScopedPayload, StateSupervisor};
