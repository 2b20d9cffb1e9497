//! Forum and messaging core: provisioning, the live channel directory,
//! live message streams and the posting gate.
//!
//! Live views are producer tasks fed by the store's change feed. Each one
//! pushes full snapshots into a bounded queue and stops when its
//! [`Subscription`] is cancelled or dropped, so subscribing requires a
//! running Tokio runtime.

pub mod collaborators;
pub mod directory;
pub mod error;
pub mod permissions;
pub mod provision;
pub mod stream;
pub mod subscription;
pub mod tenant;

pub use collaborators::{ClassRoster, ProfileStore};
pub use directory::{ChannelDirectory, UnlistedMembership};
pub use error::{ProvisionFailure, SendFailure, SubscribeError};
pub use kelas_types::views::DirectoryError;
pub use permissions::can_post;
pub use provision::{CreateForum, ForumProvisioner};
pub use stream::MessageStream;
pub use subscription::Subscription;
pub use tenant::TenantResolver;

/// Default capacity of a subscription's snapshot queue.
pub const DEFAULT_SUBSCRIPTION_BUFFER: usize = 16;
