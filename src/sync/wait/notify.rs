/*!
 * Ticket-Based Notify List
 *
 * Wait list behind `Cond`. A waiter takes a ticket *before* releasing its
 * external lock and only afterwards queues itself, so a signal issued in the
 * gap still finds it: notifications are counted in tickets, not in parked
 * threads.
 */

use super::parker::Parker;
use parking_lot::{const_mutex, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Wrapping comparison of tickets
#[inline]
fn less(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) < 0
}

pub(crate) struct NotifyList {
    /// Next ticket to hand out
    wait: AtomicU32,
    /// Next ticket to be notified; only written under `waiters`
    notify: AtomicU32,
    waiters: Mutex<VecDeque<(u32, Arc<Parker>)>>,
}

impl NotifyList {
    pub(crate) const fn new() -> Self {
        Self {
            wait: AtomicU32::new(0),
            notify: AtomicU32::new(0),
            waiters: const_mutex(VecDeque::new()),
        }
    }

    /// Reserve a ticket; pair with [`NotifyList::wait`]
    #[inline]
    pub(crate) fn add(&self) -> u32 {
        self.wait.fetch_add(1, Ordering::SeqCst)
    }

    /// Block until `ticket` has been notified
    pub(crate) fn wait(&self, ticket: u32) {
        let mut waiters = self.waiters.lock();
        if less(ticket, self.notify.load(Ordering::Acquire)) {
            return;
        }
        let parker = Arc::new(Parker::new());
        waiters.push_back((ticket, parker.clone()));
        drop(waiters);

        parker.park();
    }

    /// Notify the oldest outstanding ticket
    pub(crate) fn notify_one(&self) -> bool {
        if self.wait.load(Ordering::SeqCst) == self.notify.load(Ordering::SeqCst) {
            return false;
        }

        let mut waiters = self.waiters.lock();
        let ticket = self.notify.load(Ordering::Relaxed);
        if ticket == self.wait.load(Ordering::SeqCst) {
            return false;
        }
        self.notify.store(ticket.wrapping_add(1), Ordering::Release);

        // The waiter may not have queued yet; it will see its ticket passed
        let position = waiters.iter().position(|(t, _)| *t == ticket);
        let parker = position.and_then(|idx| waiters.remove(idx));
        drop(waiters);

        if let Some((_, parker)) = parker {
            parker.unpark();
        }
        true
    }

    /// Notify every outstanding ticket, returning how many were pending
    pub(crate) fn notify_all(&self) -> usize {
        if self.wait.load(Ordering::SeqCst) == self.notify.load(Ordering::SeqCst) {
            return 0;
        }

        let mut waiters = self.waiters.lock();
        let wait = self.wait.load(Ordering::SeqCst);
        let pending = wait.wrapping_sub(self.notify.load(Ordering::Relaxed)) as usize;
        self.notify.store(wait, Ordering::Release);
        let woken = std::mem::take(&mut *waiters);
        drop(waiters);

        for (_, parker) in woken {
            parker.unpark();
        }
        pending
    }

    /// Tickets handed out but not yet notified (diagnostic, racy)
    pub(crate) fn pending(&self) -> usize {
        self.wait
            .load(Ordering::Relaxed)
            .wrapping_sub(self.notify.load(Ordering::Relaxed)) as usize
    }
}
