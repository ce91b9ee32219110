/* KDE Plasma layout source over the session bus.
 *
 * org.kde.keyboard /Layouts org.kde.KeyboardLayouts:
 *   getLayout() -> u
 *   getLayoutsList() -> a(sss)   (code, variant, display name)
 *   signal layoutChanged(u)
 *
 * The layout list is re-read on every change so layouts added in the
 * system settings while running resolve correctly. */

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use zbus::{Connection, Proxy};

use super::{EVENT_BUFFER, LayoutEvent, LayoutSource, event_from_list};

const BUS_NAME: &str = "org.kde.keyboard";
const LAYOUTS_PATH: &str = "/Layouts";
const LAYOUTS_IFACE: &str = "org.kde.KeyboardLayouts";

const SIGNAL_LAYOUT_CHANGED: &str = "layoutChanged";

pub struct KdeLayoutSource {
    conn: Connection,
    proxy: Proxy<'static>,
    /* Cancels the forwarding task on `close` */
    watcher: Mutex<Option<CancellationToken>>,
}

impl KdeLayoutSource {
    /* Connect to the session bus. KDE's keyboard service is not contacted
     * here; it may start after us. */
    pub async fn connect() -> Result<Self> {
        let conn = Connection::session()
            .await
            .context("Cannot connect to the session DBus")?;
        let proxy = Proxy::new(&conn, BUS_NAME, LAYOUTS_PATH, LAYOUTS_IFACE)
            .await
            .context("Failed to create KeyboardLayouts proxy")?;

        info!("Connected to session bus, watching {BUS_NAME}");
        Ok(Self {
            conn,
            proxy,
            watcher: Mutex::new(None),
        })
    }
}

async fn fetch_layouts(proxy: &Proxy<'_>) -> Result<Vec<(String, String, String)>> {
    proxy
        .call("getLayoutsList", &())
        .await
        .context("getLayoutsList call failed")
}

/* A failed list lookup still yields an event: the index with an empty code,
 * which only a "*" mapping matches. */
fn event_or_unnamed(index: u32, layouts: Result<Vec<(String, String, String)>>) -> LayoutEvent {
    match layouts {
        Ok(layouts) => event_from_list(index, &layouts),
        Err(e) => {
            warn!("{e:#}");
            event_from_list(index, &[])
        }
    }
}

#[async_trait]
impl LayoutSource for KdeLayoutSource {
    async fn current_layout(&self) -> Result<LayoutEvent> {
        let index: u32 = self
            .proxy
            .call("getLayout", &())
            .await
            .context("getLayout call failed")?;
        Ok(event_or_unnamed(index, fetch_layouts(&self.proxy).await))
    }

    async fn subscribe(&self, cancel: CancellationToken) -> Result<mpsc::Receiver<LayoutEvent>> {
        let mut signals = self
            .proxy
            .receive_signal(SIGNAL_LAYOUT_CHANGED)
            .await
            .context("Failed to subscribe to layoutChanged")?;

        let cancel = cancel.child_token();
        *self.watcher.lock().await = Some(cancel.clone());

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let proxy = self.proxy.clone();

        tokio::spawn(async move {
            loop {
                let msg = tokio::select! {
                    _ = cancel.cancelled() => break,
                    msg = signals.next() => msg,
                };
                let Some(msg) = msg else {
                    warn!("layoutChanged subscription ended");
                    break;
                };

                let index: u32 = match msg.body().deserialize() {
                    Ok(index) => index,
                    Err(e) => {
                        warn!("Malformed layoutChanged signal: {e}");
                        continue;
                    }
                };
                let event = event_or_unnamed(index, fetch_layouts(&proxy).await);
                debug!("layoutChanged: {event:?}");
                if tx.send(event).await.is_err() {
                    break;
                }
            }
            debug!("Layout watcher stopped");
        });

        Ok(rx)
    }

    async fn close(&self) {
        if let Some(token) = self.watcher.lock().await.take() {
            token.cancel();
        }
        if let Err(e) = self.conn.clone().close().await {
            debug!("Closing session bus connection: {e}");
        }
    }
}
