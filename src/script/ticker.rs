//! Ticker scheduler
//!
//! One periodic emitter per enabled ticker. Timers only send the ticker's
//! id into the session's processing queue; they never touch the MUD socket
//! or alias state directly, keeping suspension points out of the scheduler
//! itself per the concurrency model.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::script::Ticker;

/// Owns the running timer tasks for one session's tickers.
#[derive(Debug, Default)]
pub struct TickerScheduler {
    handles: HashMap<String, JoinHandle<()>>,
}

impl TickerScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel all existing emitters and re-arm from `tickers`. Disabled
    /// tickers and tickers with `interval_secs == 0` are never scheduled.
    pub fn rearm(&mut self, tickers: &[Ticker], tx: mpsc::UnboundedSender<String>) {
        self.cancel_all();
        for ticker in tickers {
            if !ticker.enabled || ticker.interval_secs == 0 {
                continue;
            }
            let id = ticker.id.clone();
            let interval_secs = ticker.interval_secs;
            let tx = tx.clone();
            let handle = tokio::spawn(async move {
                let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
                interval.tick().await; // first tick fires immediately; skip it
                loop {
                    interval.tick().await;
                    if tx.send(id.clone()).is_err() {
                        break;
                    }
                }
            });
            self.handles.insert(ticker.id.clone(), handle);
        }
    }

    /// Cancel every running emitter, e.g. on session close.
    pub fn cancel_all(&mut self) {
        for (_, handle) in self.handles.drain() {
            handle.abort();
        }
    }

    pub fn active_count(&self) -> usize {
        self.handles.len()
    }
}

impl Drop for TickerScheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
