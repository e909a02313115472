// This file is part of mixpki and is licensed under the GNU Affero General Public License v3.0 or later.
// See the LICENSE file in the project root for license details.

#![forbid(unsafe_code)]

//! Background PKI worker.
//!
//! Every pass fetches missing documents, prunes stale ones and publishes
//! this node's descriptor when due. Failures are logged and retried on the
//! next pass; nothing here terminates the node.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Notify;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::auth::Authenticator;
use crate::authority::Authority;
use crate::config::NodeConfig;
use crate::document::{validate_self, Document, DocumentStore};
use crate::epoch::EpochClock;
use crate::events::{PkiEvents, PublishOutcome, TickReport};
use crate::keys::{KeyRotation, MixKeyStore};
use crate::plan::{documents_to_fetch, PublishError, Publisher};

/// Owns the document store, the publication schedule and the mix keys.
pub struct PkiDriver<A, K> {
    config: Arc<NodeConfig>,
    clock: Arc<dyn EpochClock>,
    store: Arc<DocumentStore>,
    authority: Arc<A>,
    publisher: Publisher<K>,
    events: Arc<dyn PkiEvents>,
    stop: Arc<Notify>,
}

impl<A, K> PkiDriver<A, K>
where
    A: Authority,
    K: MixKeyStore + 'static,
{
    /// `keys` must already hold the static key when key rotation is
    /// disabled in `config`.
    pub fn new(
        config: Arc<NodeConfig>,
        clock: Arc<dyn EpochClock>,
        authority: Arc<A>,
        keys: K,
        events: Arc<dyn PkiEvents>,
    ) -> Self {
        let rotation = KeyRotation::new(keys, config.debug().disable_key_rotation);
        Self {
            config,
            clock,
            store: Arc::new(DocumentStore::new()),
            authority,
            publisher: Publisher::new(rotation),
            events,
            stop: Arc::new(Notify::new()),
        }
    }

    /// Authentication view sharing this driver's store and clock.
    pub fn authenticator(&self) -> Authenticator {
        Authenticator::new(
            Arc::clone(&self.store),
            Arc::clone(&self.clock),
            self.config.debug().disable_authentication,
        )
    }

    pub fn store(&self) -> &Arc<DocumentStore> {
        &self.store
    }

    pub fn publisher(&self) -> &Publisher<K> {
        &self.publisher
    }

    /// Signal that aborts the pass in progress and stops the worker loop.
    pub fn stop_signal(&self) -> Arc<Notify> {
        Arc::clone(&self.stop)
    }

    /// Runs a single pass. Returns `None` when halted during an authority
    /// call; nothing the interrupted call would have produced is kept.
    pub async fn tick(&mut self) -> Option<TickReport> {
        let time = self.clock.now();
        let mut report = TickReport::new(time.epoch);

        for epoch in documents_to_fetch(&self.store, time) {
            let raw = match until_halted(&self.stop, self.authority.get(epoch)).await? {
                Ok(raw) => raw,
                Err(error) => {
                    warn!(epoch, %error, "failed to fetch PKI document");
                    report.fetch_failures += 1;
                    continue;
                }
            };
            if raw.epoch != epoch {
                warn!(
                    requested = epoch,
                    received = raw.epoch,
                    "authority returned a document for the wrong epoch"
                );
                report.rejected += 1;
                continue;
            }
            let document = match Document::from_raw(
                raw,
                &self.config.identity_public(),
                self.config.role(),
            ) {
                Ok(document) => document,
                Err(error) => {
                    warn!(epoch, %error, "failed to convert PKI document");
                    report.rejected += 1;
                    continue;
                }
            };
            if let Err(error) = validate_self(&document, &self.config) {
                warn!(epoch, %error, "PKI document disagrees with local configuration");
                report.self_check_failures += 1;
            }
            self.store.put(Arc::new(document));
            report.fetched.push(epoch);
        }

        if !report.fetched.is_empty() {
            report.pruned = self.store.prune(time.epoch);
            self.events.peers_changed();
        }

        report.publish = self.publish().await?;
        self.events.tick_completed(&report);
        Some(report)
    }

    async fn publish(&mut self) -> Option<PublishOutcome> {
        let time = self.clock.now();
        let prepared = match self
            .publisher
            .prepare(time, &self.config, self.events.as_ref())
        {
            Ok(Some(prepared)) => prepared,
            Ok(None) => return Some(PublishOutcome::Idle),
            Err(PublishError::MissedDeadline { target }) => {
                warn!(
                    epoch = time.epoch,
                    next = target,
                    "missed publication deadline for the next epoch"
                );
                return Some(PublishOutcome::MissedDeadline(target));
            }
            Err(error) => {
                warn!(%error, "failed to prepare descriptor");
                return Some(PublishOutcome::Failed);
            }
        };

        let target = prepared.target;
        let keypair = self.config.identity_keypair();
        let posted = until_halted(
            &self.stop,
            self.authority.post(target, keypair, &prepared.descriptor),
        )
        .await?;
        match posted {
            Ok(()) => {
                self.publisher.mark_published(target);
                debug!(epoch = target, "posted descriptor");
                Some(PublishOutcome::Published(target))
            }
            Err(source) => {
                let error = PublishError::Post { target, source };
                warn!(%error, "failed to post descriptor");
                Some(PublishOutcome::Failed)
            }
        }
    }

    /// Moves the driver onto its own task.
    pub fn spawn(self) -> PkiWorker {
        let stop = self.stop_signal();
        let task = tokio::spawn(self.run());
        PkiWorker { stop, task }
    }

    async fn run(mut self) {
        let timing = self.config.worker();
        info!(
            node = %self.config.node_id(),
            identifier = self.config.identifier(),
            "starting PKI worker"
        );
        let mut deadline = Instant::now() + timing.initial_delay();
        loop {
            tokio::select! {
                biased;
                _ = self.stop.notified() => break,
                _ = sleep_until(deadline) => {}
            }
            if self.tick().await.is_none() {
                debug!("PKI worker halted during an authority call");
                break;
            }
            deadline = Instant::now() + timing.recheck_interval();
        }
        info!("PKI worker stopped");
    }
}

async fn until_halted<T>(stop: &Notify, fut: impl Future<Output = T>) -> Option<T> {
    tokio::select! {
        biased;
        _ = stop.notified() => None,
        out = fut => Some(out),
    }
}

/// Handle to a spawned [`PkiDriver`].
#[derive(Debug)]
pub struct PkiWorker {
    stop: Arc<Notify>,
    task: JoinHandle<()>,
}

impl PkiWorker {
    /// Asks the worker to stop; an authority call in flight is abandoned.
    pub fn halt(&self) {
        self.stop.notify_one();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Halts the worker and waits for its task to exit.
    pub async fn shutdown(self) -> Result<(), JoinError> {
        self.halt();
        self.task.await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use x25519_dalek::StaticSecret;

    use crate::config::DebugConfig;
    use crate::descriptor::{MixPublicKey, NodeId, Role};
    use crate::epoch::{Epoch, ManualClock};
    use crate::events::NoopEvents;
    use crate::keys::{MemoryMixKeys, NUM_MIX_KEYS};
    use crate::testutil::{raw_document, RecordingEvents, ScriptedAuthority, TestNode};

    const E: Epoch = 100;
    const MID: Duration = Duration::from_secs(60 * 60);

    struct Harness {
        me: TestNode,
        entry: TestNode,
        exit: TestNode,
        provider: TestNode,
        clock: Arc<ManualClock>,
        authority: Arc<ScriptedAuthority>,
        events: Arc<RecordingEvents>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                me: TestNode::new("me"),
                entry: TestNode::new("entry"),
                exit: TestNode::new("exit"),
                provider: TestNode::new("provider"),
                clock: Arc::new(ManualClock::at(E, MID)),
                authority: Arc::new(ScriptedAuthority::default()),
                events: Arc::new(RecordingEvents::default()),
            }
        }

        /// Serves a three layer topology with this node in the middle.
        fn serve(&self, epoch: Epoch) {
            self.authority.serve(
                epoch,
                raw_document(
                    epoch,
                    &[&[&self.entry], &[&self.me], &[&self.exit]],
                    &[&self.provider],
                ),
            );
        }

        fn driver(&self, debug: DebugConfig) -> PkiDriver<ScriptedAuthority, MemoryMixKeys> {
            self.driver_with(debug, MemoryMixKeys::new(), self.events.clone())
        }

        fn driver_with<K: MixKeyStore + 'static>(
            &self,
            debug: DebugConfig,
            keys: K,
            events: Arc<dyn PkiEvents>,
        ) -> PkiDriver<ScriptedAuthority, K> {
            PkiDriver::new(
                Arc::new(self.me.config(Role::Mix).with_debug(debug)),
                self.clock.clone(),
                Arc::clone(&self.authority),
                keys,
                events,
            )
        }
    }

    /// Key store whose pruning runs two epochs ahead of the clock.
    struct EagerPruner(MemoryMixKeys);

    impl MixKeyStore for EagerPruner {
        fn key_for(&self, epoch: Epoch) -> Option<MixPublicKey> {
            self.0.key_for(epoch)
        }

        fn generate_window(&mut self, target: Epoch) -> anyhow::Result<bool> {
            self.0.generate_window(target)
        }

        fn prune_expired(&mut self, now: Epoch) -> bool {
            self.0.prune_expired(now + 2)
        }
    }

    #[tokio::test]
    async fn fetched_document_drives_forwarding_and_publication() {
        let _ = tracing_subscriber::fmt::try_init();
        let harness = Harness::new();
        harness.serve(E);
        let mut driver = harness.driver(DebugConfig::default());
        let auth = driver.authenticator();

        let report = driver.tick().await.expect("not halted");
        assert_eq!(report.epoch, E);
        assert_eq!(report.fetched, vec![E]);
        assert_eq!(report.publish, PublishOutcome::Published(E));
        assert_eq!(harness.events.peer_changes(), 1);
        assert_eq!(harness.events.key_changes(), 1);

        assert!(auth.is_valid_forward_destination(&harness.exit.id()));
        assert!(!auth.is_valid_forward_destination(&harness.entry.id()));
        let entry = auth.authenticate_incoming(&harness.entry.credentials());
        let exit = auth.authenticate_incoming(&harness.exit.credentials());
        assert!(entry.can_send);
        assert!(!exit.is_valid);
        let destinations: Vec<NodeId> = auth.outgoing_destinations().into_keys().collect();
        assert_eq!(destinations, vec![harness.exit.id()]);

        let report = driver.tick().await.expect("not halted");
        assert!(report.fetched.is_empty());
        assert_eq!(report.publish, PublishOutcome::Published(E + 1));

        let report = driver.tick().await.expect("not halted");
        assert_eq!(report.publish, PublishOutcome::Idle);

        assert_eq!(harness.authority.gets(), vec![E]);
        assert_eq!(harness.authority.posted_epochs(), vec![E, E + 1]);
        let (_, first) = &harness.authority.posts()[0];
        assert_eq!(first.name, "me");
        assert_eq!(
            first.mix_keys.keys().copied().collect::<Vec<_>>(),
            (E..E + NUM_MIX_KEYS).collect::<Vec<_>>()
        );
        assert_eq!(harness.events.reports().len(), 3);
        assert_eq!(harness.events.peer_changes(), 1);
    }

    #[tokio::test]
    async fn fetches_next_document_near_transition_and_prunes_old_ones() {
        let harness = Harness::new();
        harness.serve(E);
        harness.serve(E + 1);
        let mut driver = harness.driver(DebugConfig::default());

        driver.tick().await.expect("not halted");
        harness.clock.set_till(E, Duration::from_secs(20 * 60));
        let report = driver.tick().await.expect("not halted");
        assert_eq!(report.fetched, vec![E + 1]);
        assert!(report.pruned.is_empty());

        harness.serve(E + 2);
        harness.clock.set_till(E + 1, Duration::from_secs(10 * 60));
        let report = driver.tick().await.expect("not halted");
        assert_eq!(report.fetched, vec![E + 2]);
        assert_eq!(report.pruned, vec![E]);
        assert_eq!(driver.store().epochs(), vec![E + 1, E + 2]);
    }

    #[tokio::test]
    async fn fetch_failures_are_retried_next_pass() {
        let harness = Harness::new();
        let mut driver = harness.driver(DebugConfig::default());

        let report = driver.tick().await.expect("not halted");
        assert_eq!(report.fetch_failures, 1);
        assert!(report.fetched.is_empty());
        assert!(driver.store().is_empty());
        assert_eq!(harness.events.peer_changes(), 0);

        harness.serve(E);
        let report = driver.tick().await.expect("not halted");
        assert_eq!(report.fetched, vec![E]);
        assert_eq!(harness.authority.gets(), vec![E, E]);
    }

    #[tokio::test]
    async fn unusable_documents_are_not_stored() {
        let harness = Harness::new();
        harness.authority.serve(
            E,
            raw_document(E + 5, &[&[&harness.me]], &[&harness.provider]),
        );
        let mut driver = harness.driver(DebugConfig::default());
        let report = driver.tick().await.expect("not halted");
        assert_eq!(report.rejected, 1);
        assert!(driver.store().is_empty());

        harness.authority.serve(
            E,
            raw_document(E, &[&[&harness.entry]], &[&harness.provider]),
        );
        let report = driver.tick().await.expect("not halted");
        assert_eq!(report.rejected, 1);
        assert!(driver.store().is_empty());
    }

    #[tokio::test]
    async fn self_check_failure_still_stores_document() {
        let harness = Harness::new();
        let mut document = raw_document(E, &[&[&harness.me]], &[&harness.provider]);
        document.topology[0][0].name = "someone-else".into();
        harness.authority.serve(E, document);
        let mut driver = harness.driver(DebugConfig::default());

        let report = driver.tick().await.expect("not halted");
        assert_eq!(report.self_check_failures, 1);
        assert_eq!(report.fetched, vec![E]);
        assert!(driver.store().contains(E));
    }

    #[tokio::test]
    async fn rejected_post_leaves_epoch_unpublished() {
        let harness = Harness::new();
        harness.serve(E);
        harness.authority.fail_posts_for(E);
        let mut driver = harness.driver(DebugConfig::default());

        let report = driver.tick().await.expect("not halted");
        assert_eq!(report.publish, PublishOutcome::Failed);
        assert_eq!(driver.publisher().state().last_published(), 0);

        harness.authority.accept_posts_for(E);
        let report = driver.tick().await.expect("not halted");
        assert_eq!(report.publish, PublishOutcome::Published(E));
    }

    #[tokio::test]
    async fn key_pruned_before_publication_fails_pass() {
        let harness = Harness::new();
        harness.serve(E);
        let keys = EagerPruner(MemoryMixKeys::new());
        let mut driver = harness.driver_with(DebugConfig::default(), keys, harness.events.clone());

        let report = driver.tick().await.expect("not halted");
        assert_eq!(report.fetched, vec![E]);
        assert_eq!(report.publish, PublishOutcome::Failed);
        assert_eq!(driver.publisher().state().last_published(), 0);
        assert_eq!(harness.events.key_changes(), 1);
        assert!(harness.authority.posts().is_empty());

        let report = driver.tick().await.expect("not halted");
        assert_eq!(report.publish, PublishOutcome::Failed);
        assert_eq!(harness.events.key_changes(), 2);
        assert!(harness.authority.posts().is_empty());
    }

    #[tokio::test]
    async fn static_key_is_published_for_every_epoch() {
        let harness = Harness::new();
        harness.serve(E);
        let debug = DebugConfig {
            disable_key_rotation: true,
            ..DebugConfig::default()
        };
        let keys = MemoryMixKeys::with_static_key(StaticSecret::from([9u8; 32]));
        let mut driver = harness.driver_with(debug, keys, Arc::new(NoopEvents));
        assert!(driver.publisher().keys().is_static());

        let report = driver.tick().await.expect("not halted");
        assert_eq!(report.publish, PublishOutcome::Published(E));
        let posts = harness.authority.posts();
        let (_, descriptor) = &posts[0];
        let keys: Vec<MixPublicKey> = descriptor.mix_keys.values().copied().collect();
        assert_eq!(keys.len(), NUM_MIX_KEYS as usize);
        assert!(keys.iter().all(|key| *key == keys[0]));
        assert_eq!(harness.events.key_changes(), 0);
    }

    #[tokio::test]
    async fn missed_deadline_is_reported_once() {
        let harness = Harness::new();
        harness.serve(E);
        harness.serve(E + 1);
        harness.clock.set_till(E, Duration::from_secs(30 * 60));
        let mut driver = harness.driver(DebugConfig::default());

        let outcomes: Vec<PublishOutcome> = [
            driver.tick().await,
            driver.tick().await,
            driver.tick().await,
        ]
        .into_iter()
        .map(|report| report.expect("not halted").publish)
        .collect();
        assert_eq!(
            outcomes,
            vec![
                PublishOutcome::Published(E),
                PublishOutcome::MissedDeadline(E + 1),
                PublishOutcome::Idle,
            ]
        );
    }

    #[tokio::test]
    async fn halt_during_fetch_inserts_nothing() {
        let harness = Harness::new();
        harness.serve(E);
        harness.authority.hang_gets(true);
        let mut driver = harness.driver(DebugConfig::default());
        let stop = driver.stop_signal();

        let (report, ()) = tokio::join!(driver.tick(), async move {
            tokio::task::yield_now().await;
            stop.notify_one();
        });
        assert!(report.is_none());
        assert!(driver.store().is_empty());
        assert!(harness.authority.posts().is_empty());
        assert!(harness.events.reports().is_empty());
    }

    #[tokio::test]
    async fn halt_during_post_leaves_epoch_unpublished() {
        let harness = Harness::new();
        harness.serve(E);
        harness.authority.hang_posts(true);
        let mut driver = harness.driver(DebugConfig::default());
        let stop = driver.stop_signal();

        let (report, ()) = tokio::join!(driver.tick(), async move {
            tokio::task::yield_now().await;
            stop.notify_one();
        });
        assert!(report.is_none());
        assert!(driver.store().contains(E));
        assert_eq!(driver.publisher().state().last_published(), 0);
        assert!(harness.authority.posts().is_empty());
    }

    #[tokio::test]
    async fn disabled_authentication_is_permissive() {
        let harness = Harness::new();
        let driver = harness.driver(DebugConfig {
            disable_authentication: true,
            ..DebugConfig::default()
        });
        let auth = driver.authenticator();
        let stranger = TestNode::new("stranger");
        assert!(auth.is_disabled());
        assert!(auth.authenticate_incoming(&stranger.credentials()).can_send);
        assert!(auth.authenticate_outgoing(&stranger.credentials()).can_send);
        assert!(auth.is_valid_forward_destination(&stranger.id()));
    }

    #[tokio::test(start_paused = true)]
    async fn worker_runs_after_initial_delay_and_shuts_down() {
        let harness = Harness::new();
        harness.serve(E);
        let worker = harness.driver(DebugConfig::default()).spawn();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(harness.authority.gets().is_empty());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(harness.authority.gets(), vec![E]);
        assert_eq!(harness.authority.posted_epochs(), vec![E]);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(harness.authority.posted_epochs(), vec![E, E + 1]);
        assert_eq!(harness.events.reports().len(), 2);

        worker.shutdown().await.expect("worker exits cleanly");
    }

    #[tokio::test(start_paused = true)]
    async fn worker_halted_before_first_pass_never_calls_authority() {
        let harness = Harness::new();
        let worker = harness.driver(DebugConfig::default()).spawn();
        worker.halt();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(worker.is_finished());
        assert!(harness.authority.gets().is_empty());
        worker.shutdown().await.expect("worker exits cleanly");
    }
}
