/* Desktop keyboard-layout sources.
 *
 * A source reports the active layout once on request and then pushes every
 * change through a bounded channel until cancelled. The daemon only ever
 * consumes this trait; `kde` is the one real implementation. */

pub mod kde;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/* Pending events before the watcher task waits on the consumer */
pub const EVENT_BUFFER: usize = 16;

/* A layout as seen by the desktop. `code` is the short XKB code ("us",
 * "ru") and may be empty when the index is not in the layout list. */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutEvent {
    pub index: u32,
    pub code: String,
    pub name: String,
}

#[async_trait]
pub trait LayoutSource: Send + Sync {
    /* The layout active right now. */
    async fn current_layout(&self) -> Result<LayoutEvent>;

    /* Start forwarding layout changes. The receiver yields `None` once
     * `cancel` fires or the subscription is lost. */
    async fn subscribe(&self, cancel: CancellationToken) -> Result<mpsc::Receiver<LayoutEvent>>;

    /* Release the subscription and the bus connection. */
    async fn close(&self);
}

/* Resolve a layout index against the desktop's (code, variant, name) list. */
pub fn event_from_list(index: u32, layouts: &[(String, String, String)]) -> LayoutEvent {
    let (code, name) = usize::try_from(index)
        .ok()
        .and_then(|i| layouts.get(i))
        .map(|(code, _variant, name)| (code.clone(), name.clone()))
        .unwrap_or_default();
    LayoutEvent { index, code, name }
}
