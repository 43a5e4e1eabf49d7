//! Repository traits for index operations.

pub mod accesses;
pub mod cursors;
pub mod heads;
pub mod identities;
pub mod keys;
pub mod pools;

pub use accesses::AccessRepo;
pub use cursors::CursorRepo;
pub use heads::HeadRepo;
pub use identities::IdentityRepo;
pub use keys::KeyRepo;
pub use pools::PoolRepo;
