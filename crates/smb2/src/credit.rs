//! Credit based flow control.

use {
    crate::{error::Error, utils::Result},
    std::sync::Mutex,
    tokio::sync::Notify,
};

#[derive(Debug)]
struct Window {
    held: u32,
    in_use: u32,
    max: u32,
    closed: bool,
}

/// Credits held by one connection.
///
/// `in_use <= held <= max` at all times; `acquire` suspends the caller until
/// the window has room for the requested charge.
#[derive(Debug)]
pub struct CreditState {
    window: Mutex<Window>,
    notify: Notify,
}

impl CreditState {
    pub fn new(max: u16) -> CreditState {
        let max = u32::from(max.max(1));
        CreditState {
            window: Mutex::new(Window {
                held: 1,
                in_use: 0,
                max,
                closed: false,
            }),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Window> {
        self.window.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Reserve `cost` credits, waiting for grants when the window is full.
    ///
    /// Fails with `EAGAIN` when nothing is in flight and the window is still
    /// smaller than `cost`, since no response is coming to grow it.
    pub async fn acquire(&self, cost: u16) -> Result<()> {
        let cost = u32::from(cost);
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut w = self.lock();
                if w.closed {
                    return Err(Error::ConnectionLost);
                }
                if cost > w.max {
                    return Err(Error::No(crate::error::errno::EMSGSIZE));
                }
                if w.in_use + cost <= w.held {
                    w.in_use += cost;
                    return Ok(());
                }
                if w.in_use == 0 {
                    return Err(Error::No(crate::error::errno::EAGAIN));
                }
            }

            notified.await;
        }
    }

    /// Return credits reserved for a request that never reached the wire.
    pub fn cancel(&self, cost: u16) {
        let mut w = self.lock();
        w.in_use = w.in_use.saturating_sub(u32::from(cost));
        drop(w);
        self.notify.notify_waiters();
    }

    /// Account for a final response that consumed `charge` and granted `granted`.
    pub fn release(&self, charge: u16, granted: u16) {
        let mut w = self.lock();
        let charge = u32::from(charge);
        w.in_use = w.in_use.saturating_sub(charge);
        let held = (w.held.saturating_sub(charge) + u32::from(granted)).min(w.max);
        w.held = if held == 0 && w.in_use == 0 { 1 } else { held.max(w.in_use) };
        drop(w);
        self.notify.notify_waiters();
    }

    /// Interim responses grant credits without completing the request.
    pub fn grant(&self, granted: u16) {
        if granted == 0 {
            return;
        }
        let mut w = self.lock();
        w.held = (w.held + u32::from(granted)).min(w.max);
        drop(w);
        self.notify.notify_waiters();
    }

    /// How many credits a request charged `charge` should ask for so the
    /// window grows toward the maximum.
    pub fn request_for(&self, charge: u16) -> u16 {
        let w = self.lock();
        let charge = u32::from(charge);
        let room = (w.max - w.held.min(w.max)) + charge;
        room.max(charge).max(1).min(u32::from(u16::MAX)) as u16
    }

    /// Fail current and future waiters.
    pub fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_waiters();
    }

    pub fn held(&self) -> u32 {
        self.lock().held
    }

    pub fn in_use(&self) -> u32 {
        self.lock().in_use
    }

    pub fn max(&self) -> u32 {
        self.lock().max
    }
}
