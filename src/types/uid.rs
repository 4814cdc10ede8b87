// Copyright (c) 2024 Mike Tsao

//! Unique identifiers for various system structs, and factories that help
//! ensure they are in fact unique.
//!
//! Each arena-managed entity (audios, channels, recyclings, recalls) defines
//! its own uid newtype next to the entity; the machinery here is shared. The
//! playback group id is the load-bearing one: every concurrent playback pass
//! must mint a distinct group id for its whole lifetime, or dependency
//! notifications would cross between passes.

use core::sync::atomic::Ordering;
use core::{hash::Hash, marker::PhantomData, sync::atomic::AtomicUsize};
use serde::{Deserialize, Serialize};

/// An optional Uid trait.
pub trait IsUid: Eq + Hash + Clone + From<usize> {
    /// Returns the raw uid.
    fn as_usize(&self) -> usize;
}

/// Generates unique uids.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct UidFactory<U: IsUid> {
    pub(crate) next_uid_value: AtomicUsize,
    #[serde(skip)]
    pub(crate) _phantom: PhantomData<U>,
}
impl<U: IsUid> UidFactory<U> {
    /// Creates a new [UidFactory] starting with the given value.
    pub fn new(first_uid: usize) -> Self {
        Self {
            next_uid_value: AtomicUsize::new(first_uid),
            _phantom: Default::default(),
        }
    }

    /// Generates the next unique uid. Minting is atomic, so factories can be
    /// shared across threads without further coordination.
    pub fn mint_next(&self) -> U {
        let uid_value = self.next_uid_value.fetch_add(1, Ordering::Relaxed);
        U::from(uid_value)
    }

    /// Notifies the factory that a uid exists that might have been created
    /// elsewhere (for example, during deserialization of a project). This
    /// gives the factory an opportunity to adjust `next_uid_value` to stay
    /// consistent with all known uids.
    pub fn notify_externally_minted_uid(&self, uid: U) {
        if uid.as_usize() >= self.next_uid_value.load(Ordering::Relaxed) {
            self.next_uid_value
                .store(uid.as_usize() + 1, Ordering::Relaxed);
        }
    }
}
impl<U: IsUid> PartialEq for UidFactory<U> {
    fn eq(&self, other: &Self) -> bool {
        self.next_uid_value.load(Ordering::Relaxed) == other.next_uid_value.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use derivative::Derivative;
    use synonym::Synonym;

    #[derive(Synonym, Serialize, Deserialize, Derivative)]
    #[derivative(Default)]
    #[synonym(skip(Default))]
    pub struct TestUid(#[derivative(Default(value = "1"))] pub usize);
    impl IsUid for TestUid {
        fn as_usize(&self) -> usize {
            self.0
        }
    }
    impl Default for UidFactory<TestUid> {
        fn default() -> Self {
            Self::new(1)
        }
    }

    #[test]
    fn uid_factory() {
        let f = UidFactory::<TestUid>::default();

        let uid_1 = f.mint_next();
        let uid_2 = f.mint_next();
        assert_ne!(uid_1, uid_2, "Minted Uids should not repeat");

        let mut ids: std::collections::HashSet<TestUid> = Default::default();
        for _ in 0..64 {
            let uid = f.mint_next();
            assert!(
                !ids.contains(&uid),
                "minted uids should never repeat within a factory"
            );
            ids.insert(uid);
        }
    }

    #[test]
    fn uid_factory_with_notify_works() {
        let f = UidFactory::<TestUid>::default();

        let uid_1 = f.mint_next();
        let uid_2 = f.mint_next();
        assert_ne!(uid_1, uid_2, "Minted Uids should not repeat");

        let uid_3 = TestUid(uid_2.0 + 1);
        f.notify_externally_minted_uid(uid_3.clone());
        let uid_4 = f.mint_next();
        assert_ne!(
            uid_3, uid_4,
            "Notifying factory should cause it to skip past."
        );

        f.notify_externally_minted_uid(uid_3);
        let uid_5 = f.mint_next();
        assert_eq!(
            uid_5.0,
            uid_4.0 + 1,
            "Notifying factory about value below next should be no-op."
        );
    }
}
