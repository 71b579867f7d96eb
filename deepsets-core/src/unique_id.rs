//! A simple implementation of a UID used as a unique key for tensors and
//! as the creation timestamp of backward operations.

/// An id used to associate gradients with tensors.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash, PartialOrd, Ord)]
pub struct UniqueId(pub(crate) usize);

/// Generate a [UniqueId]. Ids are monotonically increasing, so an op
/// recorded later always has a larger id than the tensors it consumed.
pub(crate) fn unique_id() -> UniqueId {
    static COUNTER: std::sync::atomic::AtomicUsize = std::sync::atomic::AtomicUsize::new(0);
    UniqueId(COUNTER.fetch_add(1, std::sync::atomic::Ordering::Relaxed))
}

impl std::ops::Deref for UniqueId {
    type Target = usize;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Something that has a [UniqueId]
pub trait HasUniqueId {
    fn id(&self) -> &UniqueId;
}
