/* Daemon main loop.
 *
 * Initialize the keyboard, apply the layout active at startup, then apply
 * every change in arrival order until the cancellation token fires or the
 * layout source goes away. Device errors inside the loop are logged and the
 * loop keeps going. The device and the source are closed on every exit. */

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::dispatcher::Dispatcher;
use crate::layout::{LayoutEvent, LayoutSource};

pub struct App {
    dispatcher: Dispatcher,
    source: Box<dyn LayoutSource>,
}

impl App {
    pub fn new(dispatcher: Dispatcher, source: Box<dyn LayoutSource>) -> Self {
        Self { dispatcher, source }
    }

    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let result = self.event_loop(&cancel).await;

        self.source.close().await;
        self.dispatcher.close().await;
        info!("Shut down");
        result
    }

    async fn event_loop(&self, cancel: &CancellationToken) -> Result<()> {
        if let Err(e) = self.dispatcher.initialize().await {
            warn!("Initialization failed, continuing: {e}");
        }

        match self.source.current_layout().await {
            Ok(event) => self.apply(&event).await,
            Err(e) => warn!("Failed to read current layout: {e:#}"),
        }

        let mut events = self
            .source
            .subscribe(cancel.clone())
            .await
            .context("Failed to watch layout changes")?;
        info!("Watching layout changes");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Cancellation requested");
                    break;
                }
                event = events.recv() => match event {
                    Some(event) => self.apply(&event).await,
                    None => {
                        warn!("Layout event stream closed");
                        break;
                    }
                },
            }
        }
        Ok(())
    }

    async fn apply(&self, event: &LayoutEvent) {
        info!("Layout changed: {} ({}) [{}]", event.code, event.name, event.index);
        if let Err(e) = self.dispatcher.apply_layout(&event.code).await {
            error!("Failed to apply layout '{}': {e}", event.code);
        }
    }
}
