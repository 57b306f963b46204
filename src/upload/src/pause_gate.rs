// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Cooperative pause and resume for chunk uploads.
//!
//! Each chunk upload calls [PauseGate::check_and_wait] before its first
//! attempt. While the gate is paused the caller registers a waiter and
//! suspends until [PauseGate::unpause] releases all the waiters.
//!
//! There is no timeout. A session that is never unpaused keeps its pending
//! uploads suspended. Dropping the future returned by `check_and_wait` (or by
//! the upload that called it) abandons the waiter, `unpause` skips abandoned
//! waiters.

use std::sync::Mutex;
use tokio::sync::oneshot;

#[derive(Debug, Default)]
pub struct PauseGate {
    state: Mutex<GateState>,
}

#[derive(Debug, Default)]
struct GateState {
    paused: bool,
    waiters: Vec<oneshot::Sender<()>>,
}

impl PauseGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pauses the gate. Calling it on a paused gate has no effect.
    pub fn pause(&self) {
        self.state.lock().expect("pause gate lock is poisoned").paused = true;
    }

    /// Unpauses the gate and releases every pending waiter exactly once.
    ///
    /// Returns the number of waiters released.
    pub fn unpause(&self) -> usize {
        let waiters = {
            let mut guard = self.state.lock().expect("pause gate lock is poisoned");
            guard.paused = false;
            std::mem::take(&mut guard.waiters)
        };
        // Waiters whose receiver was dropped are gone, nothing to release.
        waiters
            .into_iter()
            .filter_map(|tx| tx.send(()).ok())
            .count()
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().expect("pause gate lock is poisoned").paused
    }

    /// Returns immediately if the gate is not paused, otherwise waits until
    /// [unpause][PauseGate::unpause] is called.
    pub async fn check_and_wait(&self) {
        let rx = {
            let mut guard = self.state.lock().expect("pause gate lock is poisoned");
            if !guard.paused {
                return;
            }
            let (tx, rx) = oneshot::channel();
            guard.waiters.push(tx);
            rx
        };
        // The sender is only dropped without sending if the gate is dropped,
        // in which case there is nothing left to wait for.
        let _ = rx.await;
    }

    #[cfg(test)]
    pub(crate) fn pending(&self) -> usize {
        self.state
            .lock()
            .expect("pause gate lock is poisoned")
            .waiters
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::task::yield_now;

    #[tokio::test]
    async fn not_paused() {
        let gate = PauseGate::new();
        assert!(!gate.is_paused());
        gate.check_and_wait().await;
        assert_eq!(gate.pending(), 0);
    }

    #[tokio::test]
    async fn paused_blocks_until_unpause() {
        let gate = Arc::new(PauseGate::new());
        gate.pause();
        gate.pause();
        assert!(gate.is_paused());

        let task = tokio::spawn({
            let gate = gate.clone();
            async move { gate.check_and_wait().await }
        });
        while gate.pending() == 0 {
            yield_now().await;
        }
        assert!(!task.is_finished());

        assert_eq!(gate.unpause(), 1);
        task.await.expect("task should complete after unpause");
        assert!(!gate.is_paused());
        assert_eq!(gate.pending(), 0);
    }

    #[tokio::test]
    async fn unpause_releases_all() {
        let gate = Arc::new(PauseGate::new());
        gate.pause();
        let tasks = (0..4)
            .map(|_| {
                let gate = gate.clone();
                tokio::spawn(async move { gate.check_and_wait().await })
            })
            .collect::<Vec<_>>();
        while gate.pending() != 4 {
            yield_now().await;
        }
        assert_eq!(gate.unpause(), 4);
        for t in tasks {
            t.await.expect("every waiter is released");
        }
        // A second unpause has nothing to release.
        assert_eq!(gate.unpause(), 0);
    }

    #[tokio::test]
    async fn abandoned_waiter() {
        let gate = Arc::new(PauseGate::new());
        gate.pause();
        let task = tokio::spawn({
            let gate = gate.clone();
            async move { gate.check_and_wait().await }
        });
        while gate.pending() == 0 {
            yield_now().await;
        }
        task.abort();
        let _ = task.await;
        assert_eq!(gate.unpause(), 0);
    }
}
