//! Pod event subscription.
//!
//! Turns the kube watch stream into add/update/delete callbacks. Handlers run on a
//! pool of worker tasks and may be invoked concurrently for different pods; events
//! of one pod are always delivered to the same worker, in stream order.

use futures::{Stream, StreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::api::Api;
use kube::ResourceExt;
use kube::runtime::reflector::Store;
use kube::runtime::{WatchStreamExt, reflector, watcher};
use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::future::Future;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::pin::pin;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const WORKER_QUEUE_CAPACITY: usize = 256;

/// Receives pod lifecycle callbacks. Must tolerate concurrent invocation.
pub trait PodEventHandler: Send + Sync + 'static {
    fn on_add(&self, pod: Pod) -> impl Future<Output = anyhow::Result<()>> + Send;

    /// `old` and `new` carry the same resource version when the call is a resync.
    fn on_update(&self, old: Pod, new: Pod) -> impl Future<Output = anyhow::Result<()>> + Send;

    /// `final_state_unknown` is set when the deletion was inferred from a relist
    /// and `pod` is the last state seen before the watch lost track of it.
    fn on_delete(
        &self,
        pod: Pod,
        final_state_unknown: bool,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;
}

#[derive(Debug)]
enum PodEvent {
    Added(Pod),
    Updated { old: Pod, new: Pod },
    Deleted { pod: Pod, final_state_unknown: bool },
}

impl PodEvent {
    fn pod(&self) -> &Pod {
        match self {
            PodEvent::Added(pod) => pod,
            PodEvent::Updated { new, .. } => new,
            PodEvent::Deleted { pod, .. } => pod,
        }
    }
}

/// A pod watch with a reflector cache, ready to be subscribed to.
pub struct PodInformer {
    api: Api<Pod>,
    reader: Store<Pod>,
    writer: reflector::store::Writer<Pod>,
    workers: usize,
}

impl PodInformer {
    pub fn new(api: Api<Pod>, workers: usize) -> Self {
        let (reader, writer) = reflector::store();
        Self {
            api,
            reader,
            writer,
            workers,
        }
    }

    /// Cache of the pods currently alive, kept up to date ahead of handler invocation.
    pub fn store(&self) -> Store<Pod> {
        self.reader.clone()
    }

    pub fn subscribe<H: PodEventHandler>(self, handler: Arc<H>) -> Subscription {
        info!("Subscribing to pod events with {} workers", self.workers.max(1));
        let stream = reflector(
            self.writer,
            watcher(self.api, watcher::Config::default()),
        )
        .default_backoff();
        Subscription::spawn(stream, handler, self.workers)
    }
}

/// Handle to a running subscription.
pub struct Subscription {
    cancel: CancellationToken,
    resync: ResyncHandle,
    task: JoinHandle<()>,
}

impl Subscription {
    fn spawn<St, E, H>(stream: St, handler: Arc<H>, workers: usize) -> Self
    where
        St: Stream<Item = Result<watcher::Event<Pod>, E>> + Send + 'static,
        E: Display + Send + 'static,
        H: PodEventHandler,
    {
        let cancel = CancellationToken::new();
        let (resync_tx, resync_rx) = mpsc::channel(1);
        let task = tokio::spawn(run(stream, handler, workers.max(1), cancel.clone(), resync_rx));
        Self {
            cancel,
            resync: ResyncHandle(resync_tx),
            task,
        }
    }

    /// Stops consuming the watch. Events already queued are still handled.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn resync_handle(&self) -> ResyncHandle {
        self.resync.clone()
    }

    /// Cancels and waits until every queued event has been handled.
    pub async fn shutdown(self) {
        self.cancel();
        self.join().await;
    }

    /// Waits for the event loop to finish on its own.
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            error!("Pod event loop terminated abnormally: {}", e);
        }
    }
}

/// Requests redelivery of every known pod as an update.
#[derive(Clone)]
pub struct ResyncHandle(mpsc::Sender<()>);

impl ResyncHandle {
    pub fn request(&self) -> anyhow::Result<()> {
        match self.0.try_send(()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(())) => {
                debug!("Resync already pending");
                Ok(())
            }
            Err(TrySendError::Closed(())) => anyhow::bail!("Pod subscription is no longer running"),
        }
    }
}

async fn run<St, E, H>(
    stream: St,
    handler: Arc<H>,
    workers: usize,
    cancel: CancellationToken,
    mut resync_rx: mpsc::Receiver<()>,
) where
    St: Stream<Item = Result<watcher::Event<Pod>, E>> + Send + 'static,
    E: Display + Send + 'static,
    H: PodEventHandler,
{
    let (shards, worker_tasks): (Vec<_>, Vec<_>) = (0..workers)
        .map(|id| {
            let (tx, rx) = mpsc::channel(WORKER_QUEUE_CAPACITY);
            (tx, tokio::spawn(work(id, rx, handler.clone())))
        })
        .unzip();
    let mut router = EventRouter {
        shards,
        known: HashMap::new(),
        relisted: None,
    };

    let mut stream = pin!(stream);
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("Pod subscription cancelled");
                break;
            }
            Some(()) = resync_rx.recv() => router.resync().await,
            event = stream.next() => match event {
                Some(Ok(event)) => router.handle(event).await,
                Some(Err(e)) => warn!("Pod watch failed: {}", e),
                None => {
                    info!("Pod watch stream ended");
                    break;
                }
            },
        }
    }

    // closing the queues lets the workers drain and exit
    drop(router);
    for task in worker_tasks {
        if let Err(e) = task.await {
            error!("Pod event worker terminated abnormally: {}", e);
        }
    }
}

async fn work<H: PodEventHandler>(id: usize, mut rx: mpsc::Receiver<PodEvent>, handler: Arc<H>) {
    while let Some(event) = rx.recv().await {
        let name = event.pod().name_any();
        let result = match event {
            PodEvent::Added(pod) => handler.on_add(pod).await,
            PodEvent::Updated { old, new } => handler.on_update(old, new).await,
            PodEvent::Deleted {
                pod,
                final_state_unknown,
            } => handler.on_delete(pod, final_state_unknown).await,
        };
        if let Err(e) = result {
            error!("Worker {} failed to handle event for pod {}: {:?}", id, name, e);
        }
    }
}

/// Tracks the pods seen so far to tell adds from updates and to detect deletions
/// missed while the watch was disconnected.
struct EventRouter {
    shards: Vec<mpsc::Sender<PodEvent>>,
    known: HashMap<String, Pod>,
    relisted: Option<HashSet<String>>,
}

impl EventRouter {
    async fn handle(&mut self, event: watcher::Event<Pod>) {
        match event {
            watcher::Event::Init => {
                debug!("Pod relist started");
                self.relisted = Some(HashSet::new());
            }
            watcher::Event::InitApply(pod) => {
                if let Some(relisted) = self.relisted.as_mut() {
                    relisted.insert(pod_key(&pod));
                }
                self.apply(pod).await;
            }
            watcher::Event::InitDone => {
                let Some(relisted) = self.relisted.take() else {
                    return;
                };
                let vanished: Vec<String> = self
                    .known
                    .keys()
                    .filter(|key| !relisted.contains(*key))
                    .cloned()
                    .collect();
                debug!(
                    "Pod relist done, {} pods listed, {} vanished",
                    relisted.len(),
                    vanished.len()
                );
                for key in vanished {
                    if let Some(pod) = self.known.remove(&key) {
                        self.send(PodEvent::Deleted {
                            pod,
                            final_state_unknown: true,
                        })
                        .await;
                    }
                }
            }
            watcher::Event::Apply(pod) => self.apply(pod).await,
            watcher::Event::Delete(pod) => {
                self.known.remove(&pod_key(&pod));
                self.send(PodEvent::Deleted {
                    pod,
                    final_state_unknown: false,
                })
                .await;
            }
        }
    }

    async fn apply(&mut self, pod: Pod) {
        let event = match self.known.insert(pod_key(&pod), pod.clone()) {
            Some(old) => PodEvent::Updated { old, new: pod },
            None => PodEvent::Added(pod),
        };
        self.send(event).await;
    }

    async fn resync(&self) {
        info!("Resyncing {} pods", self.known.len());
        for pod in self.known.values() {
            self.send(PodEvent::Updated {
                old: pod.clone(),
                new: pod.clone(),
            })
            .await;
        }
    }

    async fn send(&self, event: PodEvent) {
        let mut hasher = DefaultHasher::new();
        pod_key(event.pod()).hash(&mut hasher);
        let shard = (hasher.finish() % self.shards.len() as u64) as usize;
        if self.shards[shard].send(event).await.is_err() {
            error!("Pod event worker {} is gone, dropping event", shard);
        }
    }
}

fn pod_key(pod: &Pod) -> String {
    pod.uid().unwrap_or_else(|| {
        format!("{}/{}", pod.namespace().unwrap_or_default(), pod.name_any())
    })
}
