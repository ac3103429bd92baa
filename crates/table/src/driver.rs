use std::sync::Arc;

use arc_swap::ArcSwap;
use futures::future::{join_all, BoxFuture};
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use kubeview_api::{ApiResult, QueryExecutor, QueryResponse};
use kubeview_core::columns::SortingState;
use kubeview_core::variables::VariableValue;
use kubeview_core::RowId;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::engine::{AsyncTable, RootTicket, RowTicket, SortOutcome};
use crate::TableSnapshot;

#[derive(Debug, Clone, PartialEq)]
pub enum TableCommand {
    /// Re-run discovery with the current inputs.
    Refresh,
    /// Set a variable in the table's scope and refresh.
    SetVariable { name: String, value: VariableValue },
    ToggleSort(String),
    SetSorting(SortingState),
    ToggleExpanded(RowId),
    Shutdown,
}

enum Completion {
    Root { gen: u64, result: ApiResult<QueryResponse> },
    Rows { gen: u64, results: Vec<(String, ApiResult<QueryResponse>)> },
}

/// Handle for readers to access the current snapshot and subscribe to swaps.
pub struct TableHandle<R> {
    tx: mpsc::Sender<TableCommand>,
    snap: Arc<ArcSwap<TableSnapshot<R>>>,
    epoch_rx: watch::Receiver<u64>,
}

impl<R> Clone for TableHandle<R> {
    fn clone(&self) -> Self { Self { tx: self.tx.clone(), snap: self.snap.clone(), epoch_rx: self.epoch_rx.clone() } }
}

impl<R> TableHandle<R> {
    pub fn current(&self) -> Arc<TableSnapshot<R>> { self.snap.load_full() }
    pub fn subscribe_epoch(&self) -> watch::Receiver<u64> { self.epoch_rx.clone() }

    /// `false` once the table loop has stopped.
    pub async fn send(&self, cmd: TableCommand) -> bool { self.tx.send(cmd).await.is_ok() }

    pub async fn refresh(&self) -> bool { self.send(TableCommand::Refresh).await }

    /// Wait until a published snapshot satisfies `pred`. `None` if the loop stopped first.
    pub async fn wait_for<F>(&self, pred: F) -> Option<Arc<TableSnapshot<R>>>
    where
        F: Fn(&TableSnapshot<R>) -> bool,
    {
        let mut rx = self.epoch_rx.clone();
        loop {
            let _ = rx.borrow_and_update();
            let snap = self.current();
            if pred(&snap) {
                return Some(snap);
            }
            if rx.changed().await.is_err() {
                let snap = self.current();
                return if pred(&snap) { Some(snap) } else { None };
            }
        }
    }

    /// Wait for the cycle of generation `gen` (or a later one) to settle.
    pub async fn settled_after(&self, gen: u64) -> Option<Arc<TableSnapshot<R>>> {
        self.wait_for(|s| s.generation >= gen && s.state.is_settled()).await
    }
}

fn root_future(executor: &Arc<dyn QueryExecutor>, ticket: RootTicket) -> BoxFuture<'static, Completion> {
    let executor = executor.clone();
    async move {
        let result = executor.execute(&ticket.request).await;
        Completion::Root { gen: ticket.gen, result }
    }
    .boxed()
}

/// All requests of a batch run concurrently; the batch completes once every one settled.
fn rows_future(executor: &Arc<dyn QueryExecutor>, ticket: RowTicket) -> BoxFuture<'static, Completion> {
    let executor = executor.clone();
    async move {
        let results = join_all(ticket.requests.into_iter().map(|req| {
            let executor = executor.clone();
            async move {
                let res = executor.execute(&req).await;
                (req.ref_id, res)
            }
        }))
        .await;
        Completion::Rows { gen: ticket.gen, results }
    }
    .boxed()
}

/// Spawn the table loop. The returned handle sends commands and reads snapshots.
/// Discovery starts on the first [`TableCommand::Refresh`].
pub fn spawn_table<R>(mut table: AsyncTable<R>, executor: Arc<dyn QueryExecutor>, cap: usize) -> TableHandle<R>
where
    R: Clone + Send + Sync + 'static,
{
    let (tx, mut rx) = mpsc::channel::<TableCommand>(cap.max(1));
    let snap = Arc::new(ArcSwap::from_pointee(table.snapshot()));
    let (epoch_tx, epoch_rx) = watch::channel(table.epoch());
    let snap_clone = Arc::clone(&snap);

    tokio::spawn(async move {
        let mut inflight: FuturesUnordered<BoxFuture<'static, Completion>> = FuturesUnordered::new();
        let mut published = table.epoch();
        loop {
            tokio::select! {
                maybe = rx.recv() => {
                    match maybe {
                        None | Some(TableCommand::Shutdown) => {
                            debug!(pending = inflight.len(), "table command channel closed; exiting table loop");
                            break;
                        }
                        Some(cmd) => {
                            if let Some(ticket) = handle_command(&mut table, cmd) {
                                inflight.push(root_future(&executor, ticket));
                            }
                        }
                    }
                }
                Some(done) = inflight.next(), if !inflight.is_empty() => {
                    match done {
                        Completion::Root { gen, result } => {
                            if let Some(ticket) = table.complete_root(gen, result) {
                                inflight.push(rows_future(&executor, ticket));
                            }
                        }
                        Completion::Rows { gen, results } => table.complete_rows(gen, results),
                    }
                }
            }
            if table.epoch() != published {
                published = table.epoch();
                snap_clone.store(Arc::new(table.snapshot()));
                let _ = epoch_tx.send(published);
            }
        }
        info!("table loop stopped");
    });

    TableHandle { tx, snap, epoch_rx }
}

/// Apply a command; returns a discovery query when the root inputs changed.
fn handle_command<R: Clone>(table: &mut AsyncTable<R>, cmd: TableCommand) -> Option<RootTicket> {
    match cmd {
        TableCommand::Refresh => table.begin_root().ok(),
        TableCommand::SetVariable { name, value } => {
            table.set_variable(&name, value);
            table.begin_root().ok()
        }
        TableCommand::ToggleSort(column) => match table.toggle_sort(&column) {
            SortOutcome::Requery => table.begin_root().ok(),
            SortOutcome::Local | SortOutcome::Ignored => None,
        },
        TableCommand::SetSorting(sorting) => match table.set_sorting(sorting) {
            SortOutcome::Requery => table.begin_root().ok(),
            SortOutcome::Local | SortOutcome::Ignored => None,
        },
        TableCommand::ToggleExpanded(id) => {
            if table.toggle_expanded(&id) {
                if let Some(Err(e)) = table.expanded_row(&id) {
                    warn!(row = %id, error = %e, "table: expanded row build failed");
                }
            }
            None
        }
        TableCommand::Shutdown => None,
    }
}
