//! Who is in the room, and which signaling identity reaches them.

pub mod memory;
pub mod model;
pub mod store;
pub mod sync;

pub use memory::MemoryStore;
pub use model::{AccountId, ChangeKind, Participant, ParticipantChange, ParticipantRole, SessionId};
pub use store::{ParticipantStore, StoreError, StoreResult};
pub use sync::{PresenceSubscription, PresenceSync};
