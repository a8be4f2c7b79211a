//! Thread-local context for runtime threads
//!
//! Each host OS thread backing a runtime thread records which runtime it
//! belongs to and which thread id it is. The free-function API
//! (`spawn`, `yield_now`, `sleep_with_timeout`, ...) resolves through this.

use std::cell::{Cell, RefCell};
use std::sync::Arc;

use strand_core::ThreadId;

use crate::runtime::RtInner;

// Thread ids start at 1; 0 is the "no thread" sentinel.
const TID_NONE: u32 = 0;

thread_local! {
    static CURRENT_RT: RefCell<Option<Arc<RtInner>>> = const { RefCell::new(None) };
    static CURRENT_TID: Cell<u32> = const { Cell::new(TID_NONE) };
}

#[inline]
pub(crate) fn set_context(rt: &Arc<RtInner>, tid: ThreadId) {
    CURRENT_RT.with(|cell| *cell.borrow_mut() = Some(Arc::clone(rt)));
    CURRENT_TID.with(|cell| cell.set(tid.as_u32()));
}

#[inline]
pub(crate) fn clear_context() {
    CURRENT_RT.with(|cell| *cell.borrow_mut() = None);
    CURRENT_TID.with(|cell| cell.set(TID_NONE));
}

/// Runtime of the calling OS thread, if it is a runtime thread
#[inline]
pub(crate) fn current_rt() -> Option<Arc<RtInner>> {
    CURRENT_RT.with(|cell| cell.borrow().clone())
}

/// Thread id of the calling OS thread, if it is a runtime thread
#[inline]
pub(crate) fn current_tid() -> Option<ThreadId> {
    let raw = CURRENT_TID.with(|cell| cell.get());
    if raw == TID_NONE {
        None
    } else {
        Some(ThreadId::new(raw))
    }
}
