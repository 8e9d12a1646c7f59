// Copyright (c) 2025-2026 Tiller Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! In-memory prompt queue with two delivery modes.
//!
//! `steer` prompts are delivered as soon as the current turn ends, ahead
//! of any tool-result follow-up; `followUp` prompts wait until the model
//! has finished responding to outstanding tool results.  A watch channel
//! publishes a snapshot on every mutation so adapters can render queue
//! badges without polling.

mod script;

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::{oneshot, watch, Notify};

use tiller_model::Attachment;

pub use script::{parse_script, render_script};

/// Scheduling priority of a queued prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Delivered as soon as the current turn ends, before any queued
    /// tool-result follow-up.
    Steer,
    /// Delivered after the model has responded to outstanding tool
    /// results.
    FollowUp,
}

/// One queued prompt.  Owned by the queue until taken, then by the
/// orchestrator until the prompt settles.
#[derive(Debug)]
pub struct PromptQueueItem {
    pub text: String,
    pub mode: DeliveryMode,
    pub attachments: Vec<Attachment>,
    /// Adapter-provided `agent.before_start` result; when set, the
    /// orchestrator skips that hook for this prompt.
    pub before_start: Option<serde_json::Value>,
    /// Resolved with the outcome when the prompt settles; dropped
    /// unresolved senders signal "prompt queue drained" to the waiter.
    pub completion: Option<oneshot::Sender<Result<(), String>>>,
}

impl PromptQueueItem {
    pub fn new(text: impl Into<String>, mode: DeliveryMode) -> Self {
        Self {
            text: text.into(),
            mode,
            attachments: Vec::new(),
            before_start: None,
            completion: None,
        }
    }

    pub fn steer(text: impl Into<String>) -> Self {
        Self::new(text, DeliveryMode::Steer)
    }

    pub fn follow_up(text: impl Into<String>) -> Self {
        Self::new(text, DeliveryMode::FollowUp)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueCounts {
    pub steer: usize,
    pub follow_up: usize,
}

/// Read-only projection of one pending item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingPrompt {
    pub text: String,
    pub mode: DeliveryMode,
}

/// Snapshot published on every queue mutation.
#[derive(Debug, Clone, Default)]
pub struct QueueSnapshot {
    pub pending: Vec<PendingPrompt>,
    pub counts: QueueCounts,
}

/// Unbounded FIFO of [`PromptQueueItem`] with a single blocking consumer.
pub struct PromptQueue {
    inner: Mutex<VecDeque<PromptQueueItem>>,
    notify: Notify,
    state: watch::Sender<QueueSnapshot>,
}

impl PromptQueue {
    pub fn new() -> Self {
        let (state, _) = watch::channel(QueueSnapshot::default());
        Self {
            inner: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            state,
        }
    }

    /// Receive a snapshot on every mutation.
    pub fn subscribe(&self) -> watch::Receiver<QueueSnapshot> {
        self.state.subscribe()
    }

    pub fn enqueue(&self, item: PromptQueueItem) {
        {
            let mut q = self.inner.lock().unwrap();
            q.push_back(item);
            self.publish(&q);
        }
        self.notify.notify_one();
    }

    pub fn enqueue_many(&self, items: impl IntoIterator<Item = PromptQueueItem>) {
        let mut added = 0usize;
        {
            let mut q = self.inner.lock().unwrap();
            for item in items {
                q.push_back(item);
                added += 1;
            }
            self.publish(&q);
        }
        for _ in 0..added {
            self.notify.notify_one();
        }
    }

    /// Wait for the next item.  Single consumer: the orchestrator's
    /// background task is the only caller.
    pub async fn take(&self) -> PromptQueueItem {
        loop {
            if let Some(item) = self.pop_front() {
                return item;
            }
            self.notify.notified().await;
        }
    }

    /// Drain everything without blocking.
    pub fn take_all(&self) -> Vec<PromptQueueItem> {
        let mut q = self.inner.lock().unwrap();
        let items: Vec<PromptQueueItem> = q.drain(..).collect();
        self.publish(&q);
        items
    }

    /// Drain only the items of one mode, preserving the relative order
    /// of everything left behind.  The agent loop consumes steer items
    /// between turns this way while follow-ups keep waiting.
    pub fn take_by_mode(&self, mode: DeliveryMode) -> Vec<PromptQueueItem> {
        let mut q = self.inner.lock().unwrap();
        let mut taken = Vec::new();
        let mut kept = VecDeque::with_capacity(q.len());
        for item in q.drain(..) {
            if item.mode == mode {
                taken.push(item);
            } else {
                kept.push_back(item);
            }
        }
        *q = kept;
        if !taken.is_empty() {
            self.publish(&q);
        }
        taken
    }

    /// Drop all pending items.  Their completion channels close, which
    /// waiters observe as "prompt queue drained".
    pub fn clear(&self) {
        let mut q = self.inner.lock().unwrap();
        q.clear();
        self.publish(&q);
    }

    pub fn counts(&self) -> QueueCounts {
        count(&self.inner.lock().unwrap())
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }

    /// Drain the queue into its script form; `None` when there is
    /// nothing pending.
    pub fn drain_to_script(&self) -> Option<String> {
        let items = self.take_all();
        if items.is_empty() {
            return None;
        }
        Some(render_script(
            items
                .iter()
                .map(|i| (i.mode, i.text.as_str())),
        ))
    }

    /// Re-enqueue prompts from a script produced by
    /// [`drain_to_script`].  Unknown lines are ignored.
    pub fn restore_from_script(&self, text: &str) {
        let items: Vec<PromptQueueItem> = parse_script(text)
            .into_iter()
            .map(|(mode, text)| PromptQueueItem::new(text, mode))
            .collect();
        self.enqueue_many(items);
    }

    fn pop_front(&self) -> Option<PromptQueueItem> {
        let mut q = self.inner.lock().unwrap();
        let item = q.pop_front();
        if item.is_some() {
            self.publish(&q);
        }
        item
    }

    fn publish(&self, q: &VecDeque<PromptQueueItem>) {
        let snapshot = QueueSnapshot {
            pending: q
                .iter()
                .map(|i| PendingPrompt {
                    text: i.text.clone(),
                    mode: i.mode,
                })
                .collect(),
            counts: count(q),
        };
        let _ = self.state.send(snapshot);
    }
}

impl Default for PromptQueue {
    fn default() -> Self {
        Self::new()
    }
}

fn count(q: &VecDeque<PromptQueueItem>) -> QueueCounts {
    let steer = q.iter().filter(|i| i.mode == DeliveryMode::Steer).count();
    QueueCounts {
        steer,
        follow_up: q.len() - steer,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_match_mode_partition_after_every_operation() {
        let q = PromptQueue::new();
        assert_eq!(q.counts(), QueueCounts::default());

        q.enqueue(PromptQueueItem::steer("a"));
        assert_eq!(q.counts(), QueueCounts { steer: 1, follow_up: 0 });

        q.enqueue(PromptQueueItem::follow_up("b"));
        q.enqueue(PromptQueueItem::steer("c"));
        assert_eq!(q.counts(), QueueCounts { steer: 2, follow_up: 1 });

        let snapshot = q.subscribe().borrow().clone();
        assert_eq!(snapshot.pending.len(), 3);
        assert_eq!(snapshot.counts, q.counts());

        q.take_all();
        assert_eq!(q.counts(), QueueCounts::default());
    }

    #[tokio::test]
    async fn take_returns_items_in_insertion_order() {
        let q = PromptQueue::new();
        q.enqueue(PromptQueueItem::steer("first"));
        q.enqueue(PromptQueueItem::follow_up("second"));
        q.enqueue(PromptQueueItem::steer("third"));

        assert_eq!(q.take().await.text, "first");
        assert_eq!(q.take().await.text, "second");
        assert_eq!(q.take().await.text, "third");
    }

    #[tokio::test]
    async fn take_blocks_until_an_item_arrives() {
        use std::sync::Arc;
        let q = Arc::new(PromptQueue::new());
        let q2 = Arc::clone(&q);
        let waiter = tokio::spawn(async move { q2.take().await.text });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        q.enqueue(PromptQueueItem::steer("late arrival"));
        assert_eq!(waiter.await.unwrap(), "late arrival");
    }

    #[test]
    fn drain_to_script_empty_queue_is_none() {
        let q = PromptQueue::new();
        assert!(q.drain_to_script().is_none());
    }

    #[test]
    fn script_round_trip_preserves_queue_state() {
        let q = PromptQueue::new();
        q.enqueue(PromptQueueItem::steer("look at tests"));
        q.enqueue(PromptQueueItem::follow_up("then refactor"));
        q.enqueue(PromptQueueItem::steer(""));

        let script = q.drain_to_script().unwrap();
        assert!(q.is_empty());

        q.restore_from_script(&script);
        let snapshot = q.subscribe().borrow().clone();
        assert_eq!(
            snapshot.pending,
            vec![
                PendingPrompt { text: "look at tests".into(), mode: DeliveryMode::Steer },
                PendingPrompt { text: "then refactor".into(), mode: DeliveryMode::FollowUp },
                PendingPrompt { text: "".into(), mode: DeliveryMode::Steer },
            ]
        );
    }

    #[test]
    fn restore_ignores_unknown_lines_and_accepts_alias() {
        let q = PromptQueue::new();
        q.restore_from_script("/steer go\nnot a command\n/follow-up later\n/unknown x\n");
        let snapshot = q.subscribe().borrow().clone();
        assert_eq!(snapshot.pending.len(), 2);
        assert_eq!(snapshot.pending[0].mode, DeliveryMode::Steer);
        assert_eq!(snapshot.pending[1].mode, DeliveryMode::FollowUp);
        assert_eq!(snapshot.pending[1].text, "later");
    }

    #[test]
    fn take_by_mode_keeps_other_items_in_order() {
        let q = PromptQueue::new();
        q.enqueue(PromptQueueItem::follow_up("f1"));
        q.enqueue(PromptQueueItem::steer("s1"));
        q.enqueue(PromptQueueItem::follow_up("f2"));
        q.enqueue(PromptQueueItem::steer("s2"));

        let steers = q.take_by_mode(DeliveryMode::Steer);
        assert_eq!(
            steers.iter().map(|i| i.text.as_str()).collect::<Vec<_>>(),
            vec!["s1", "s2"]
        );
        let snapshot = q.subscribe().borrow().clone();
        assert_eq!(
            snapshot
                .pending
                .iter()
                .map(|p| p.text.as_str())
                .collect::<Vec<_>>(),
            vec!["f1", "f2"]
        );
        assert_eq!(snapshot.counts, QueueCounts { steer: 0, follow_up: 2 });
    }

    #[tokio::test]
    async fn clearing_drops_completion_channels() {
        let q = PromptQueue::new();
        let (tx, rx) = tokio::sync::oneshot::channel();
        let mut item = PromptQueueItem::steer("pending");
        item.completion = Some(tx);
        q.enqueue(item);

        q.clear();
        assert!(rx.await.is_err(), "sender must be dropped on clear");
    }
}
