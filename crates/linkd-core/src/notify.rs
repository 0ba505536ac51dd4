//! Observer registries keyed by event kind.
//!
//! Each [`NotifyKind`] has its own subscriber list. New subscribers are
//! placed at the head of the list and [`Notifiers::fire`] walks from the
//! head, so the most recently added subscriber runs first. Unsubscribing
//! removes exactly the subscription named by its handle.

use std::fmt;

/// Events observers can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotifyKind {
    /// Daemon pid changed (value: new pid)
    PidChange,
    /// Session phase changed (value: new phase)
    PhaseChange,
    /// Daemon is exiting (value: exit status)
    Exit,
    /// A signal was received (value: signal number)
    Signaled,
    /// IPv4 network came up
    IpUp,
    /// IPv4 network went down
    IpDown,
    /// IPv6 network came up
    Ipv6Up,
    /// IPv6 network went down
    Ipv6Down,
    /// Peer authenticated
    AuthUp,
    /// Link went down
    LinkDown,
    /// A child process was started (value: child pid)
    Fork,
}

impl NotifyKind {
    /// Number of distinct kinds.
    pub const COUNT: usize = 11;

    /// Every kind, in index order.
    pub const ALL: [Self; Self::COUNT] = [
        Self::PidChange,
        Self::PhaseChange,
        Self::Exit,
        Self::Signaled,
        Self::IpUp,
        Self::IpDown,
        Self::Ipv6Up,
        Self::Ipv6Down,
        Self::AuthUp,
        Self::LinkDown,
        Self::Fork,
    ];

    fn index(self) -> usize {
        match self {
            Self::PidChange => 0,
            Self::PhaseChange => 1,
            Self::Exit => 2,
            Self::Signaled => 3,
            Self::IpUp => 4,
            Self::IpDown => 5,
            Self::Ipv6Up => 6,
            Self::Ipv6Down => 7,
            Self::AuthUp => 8,
            Self::LinkDown => 9,
            Self::Fork => 10,
        }
    }
}

/// Handle returned by [`Notifiers::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Callback invoked with the event value.
pub type NotifyFn = Box<dyn FnMut(i32)>;

struct Subscriber {
    id: SubscriptionId,
    callback: NotifyFn,
}

/// Subscriber lists for every [`NotifyKind`].
pub struct Notifiers {
    // Stored oldest-first; iteration runs in reverse so the newest
    // subscriber is the head.
    lists: [Vec<Subscriber>; NotifyKind::COUNT],
    next_id: u64,
}

impl Notifiers {
    /// Create empty registries.
    pub fn new() -> Self {
        Self { lists: std::array::from_fn(|_| Vec::new()), next_id: 0 }
    }

    /// Add `callback` to the head of `kind`'s list.
    pub fn subscribe(&mut self, kind: NotifyKind, callback: impl FnMut(i32) + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.lists[kind.index()].push(Subscriber { id, callback: Box::new(callback) });
        id
    }

    /// Remove the subscription `id` from `kind`'s list.
    ///
    /// Returns `false` if it was not subscribed there.
    pub fn unsubscribe(&mut self, kind: NotifyKind, id: SubscriptionId) -> bool {
        let list = &mut self.lists[kind.index()];
        match list.iter().position(|subscriber| subscriber.id == id) {
            Some(index) => {
                list.remove(index);
                true
            },
            None => false,
        }
    }

    /// Invoke every subscriber of `kind`, newest first.
    pub fn fire(&mut self, kind: NotifyKind, value: i32) {
        for subscriber in self.lists[kind.index()].iter_mut().rev() {
            (subscriber.callback)(value);
        }
    }

    /// Number of subscribers for `kind`.
    pub fn subscriber_count(&self, kind: NotifyKind) -> usize {
        self.lists[kind.index()].len()
    }
}

impl Default for Notifiers {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Notifiers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: Vec<usize> = self.lists.iter().map(Vec::len).collect();
        f.debug_struct("Notifiers").field("subscribers", &counts).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use proptest::prelude::*;

    use super::*;

    fn recorder(log: &Rc<RefCell<Vec<(&'static str, i32)>>>, tag: &'static str) -> impl FnMut(i32) + 'static {
        let log = Rc::clone(log);
        move |value| log.borrow_mut().push((tag, value))
    }

    #[test]
    fn newest_subscriber_runs_first() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut notifiers = Notifiers::new();

        notifiers.subscribe(NotifyKind::PhaseChange, recorder(&log, "first"));
        notifiers.subscribe(NotifyKind::PhaseChange, recorder(&log, "second"));
        notifiers.fire(NotifyKind::PhaseChange, 6);

        assert_eq!(*log.borrow(), vec![("second", 6), ("first", 6)]);
    }

    #[test]
    fn kinds_are_independent() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut notifiers = Notifiers::new();

        notifiers.subscribe(NotifyKind::Exit, recorder(&log, "exit"));
        notifiers.fire(NotifyKind::PhaseChange, 1);

        assert!(log.borrow().is_empty());
        assert_eq!(notifiers.subscriber_count(NotifyKind::Exit), 1);
    }

    #[test]
    fn unsubscribe_removes_only_named_subscription() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut notifiers = Notifiers::new();

        let a = notifiers.subscribe(NotifyKind::Fork, recorder(&log, "a"));
        notifiers.subscribe(NotifyKind::Fork, recorder(&log, "b"));

        assert!(notifiers.unsubscribe(NotifyKind::Fork, a));
        assert!(!notifiers.unsubscribe(NotifyKind::Fork, a));
        notifiers.fire(NotifyKind::Fork, 42);

        assert_eq!(*log.borrow(), vec![("b", 42)]);
    }

    #[test]
    fn unsubscribe_wrong_kind_is_noop() {
        let mut notifiers = Notifiers::new();
        let id = notifiers.subscribe(NotifyKind::IpUp, |_| {});

        assert!(!notifiers.unsubscribe(NotifyKind::IpDown, id));
        assert_eq!(notifiers.subscriber_count(NotifyKind::IpUp), 1);
    }

    proptest! {
        #[test]
        fn fire_visits_survivors_newest_first(
            count in 1usize..16,
            removed in proptest::collection::vec(any::<bool>(), 16),
        ) {
            let log = Rc::new(RefCell::new(Vec::new()));
            let mut notifiers = Notifiers::new();
            let ids: Vec<_> = (0..count)
                .map(|n| {
                    let log = Rc::clone(&log);
                    notifiers.subscribe(NotifyKind::PhaseChange, move |_| log.borrow_mut().push(n))
                })
                .collect();
            for (n, id) in ids.iter().enumerate() {
                if removed[n] {
                    prop_assert!(notifiers.unsubscribe(NotifyKind::PhaseChange, *id));
                }
            }

            notifiers.fire(NotifyKind::PhaseChange, 0);

            let expected: Vec<usize> = (0..count).rev().filter(|n| !removed[*n]).collect();
            prop_assert_eq!(&*log.borrow(), &expected);
        }
    }
}
