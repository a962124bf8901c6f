//! Profile aggregate: sealed storage, blind-index lookups, plaintext name
//! discovery, and the `profile.stored.v1` event written alongside each store.

mod crypto;
mod error;
mod repository;
mod service;
mod store;
mod types;


pub use crypto::ProfileCrypto;
pub use error::ProfileError;
pub use repository::{EventSettings, ProfileRepository};
pub use service::ProfileService;
pub use store::{
    FailurePoint, MemoryProfileStore, NAME_SEARCH_LIMIT, ProfileStore, ProfileStoreError,
    ProfileWrite, memory, postgres,
};
pub use types::{PROFILE_NAME_HEAP_TYPE, Profile, ProfileRecord, SealedProfile, SealedRow, TextHeapEntry};
