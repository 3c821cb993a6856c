//! Loading/refreshing flags with single-flight semantics.

#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicBool, Ordering};

use filmlist_core::Status;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flag {
    Loading,
    Refreshing,
}

#[derive(Debug, Default)]
pub struct Lifecycle {
    loading: AtomicBool,
    refreshing: AtomicBool,
}

impl Lifecycle {
    pub fn new() -> Self { Self::default() }

    fn cell(&self, flag: Flag) -> &AtomicBool {
        match flag {
            Flag::Loading => &self.loading,
            Flag::Refreshing => &self.refreshing,
        }
    }

    /// Set `flag` if it is clear. Returns `false` when someone else already holds it.
    pub fn begin(&self, flag: Flag) -> bool {
        self.cell(flag).compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_ok()
    }

    pub fn end(&self, flag: Flag) {
        self.cell(flag).store(false, Ordering::Release);
    }

    /// Scoped form of [`begin`](Self::begin): the flag is cleared when the guard drops.
    pub fn guard(&self, flag: Flag) -> Option<FlagGuard<'_>> {
        self.begin(flag).then(|| FlagGuard { lifecycle: self, flag })
    }

    pub fn is_set(&self, flag: Flag) -> bool { self.cell(flag).load(Ordering::Acquire) }

    /// Loading wins over refreshing when both are set.
    pub fn status(&self) -> Status {
        if self.is_set(Flag::Loading) {
            Status::Loading
        } else if self.is_set(Flag::Refreshing) {
            Status::Refreshing
        } else {
            Status::Ready
        }
    }
}

pub struct FlagGuard<'a> {
    lifecycle: &'a Lifecycle,
    flag: Flag,
}

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) { self.lifecycle.end(self.flag); }
}
