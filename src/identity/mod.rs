//! Identity-side data model and the collaborators the reconciler depends on.
//! Keep the public surface thin and split implementation across sub-modules.

mod model;
mod event;
mod provider;
mod cache;
mod memory;

pub use model::{Identity, Session, Profile, Gender};
pub use event::{ChangeEvent, ChangeKind, Subscription};
pub use provider::{IdentityProvider, ProfileStore};
pub use cache::{LocalUserCache, MemoryUserCache, FileUserCache};
pub use memory::{MemoryIdentityProvider, MemoryProfileStore};
