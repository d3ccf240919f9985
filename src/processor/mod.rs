//! Release processor
//!
//! Drives one release at a time through the ledgers and its candidate links:
//! entry checks, then classify → resolve → download → inspect → extract → organize
//! per link until one succeeds, then exactly one ledger or queue update.
//!
//! Split by concern:
//! - `state` - pure entry checks and disposition folding
//! - `attempt` - the per-link pipeline inside a scoped workspace
//! - `run` - the run loop, pacing and the pending-queue drain

mod attempt;
mod run;
pub mod state;


pub use run::load_releases;
pub use state::{EntryFacts, LinkOutcome, entry_check, settle};

use crate::config::Config;
use crate::cooldown::{Cooldown, SystemClock};
use crate::download::{Fetcher, HttpFetcher, build_client};
use crate::error::Result;
use crate::extraction::Extractor;
use crate::ledger::Ledgers;
use crate::organize::canonical_name;
use crate::resolver::{BrowserFallback, HeadlessBrowser, ResolverSet};
use crate::retry::RetryPolicy;
use crate::tools::{CliTools, ExternalTools};
use crate::types::{BackendKind, Disposition, Event, Release};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Collaborators the processor drives; swapped for fakes in tests
pub struct Components {
    /// Resolver per backend kind
    pub resolvers: ResolverSet,
    /// Download engine
    pub fetcher: Arc<dyn Fetcher>,
    /// Archivers (and the Mega tool, through the resolvers)
    pub tools: Arc<dyn ExternalTools>,
    /// Mega cooldown shared with the Mega resolver
    pub cooldown: Arc<Cooldown>,
}

/// Orchestrator for the acquisition pipeline
pub struct ReleaseProcessor {
    config: Arc<Config>,
    resolvers: ResolverSet,
    fetcher: Arc<dyn Fetcher>,
    extractor: Extractor,
    cooldown: Arc<Cooldown>,
    ledgers: Ledgers,
    retry: RetryPolicy,
    event_tx: broadcast::Sender<Event>,
    shutdown: Arc<AtomicBool>,
    in_flight: Option<String>,
}

impl ReleaseProcessor {
    /// Processor with the production resolvers, HTTP engine and subprocess tools
    pub fn new(config: Config) -> Result<Self> {
        let client = build_client(&config.download)?;
        let tools: Arc<dyn ExternalTools> = Arc::new(CliTools::from_config(&config.tools));
        let browser = HeadlessBrowser::from_config(&config.tools, &config.download.user_agent)
            .map(|b| Arc::new(b) as Arc<dyn BrowserFallback>);
        if browser.is_none() {
            debug!("no headless browser available, page fallback disabled");
        }
        let cooldown = Arc::new(Cooldown::with_state_file(
            Arc::new(SystemClock),
            config.mega.cooldown,
            &config.paths.cooldown_state,
        ));
        let resolvers = ResolverSet::standard(
            client.clone(),
            &config,
            cooldown.clone(),
            tools.clone(),
            browser,
        );
        let fetcher = Arc::new(HttpFetcher::new(client, &config.download));

        Self::with_components(
            config,
            Components {
                resolvers,
                fetcher,
                tools,
                cooldown,
            },
        )
    }

    /// Processor over explicit collaborators
    pub fn with_components(config: Config, components: Components) -> Result<Self> {
        let ledgers = Ledgers::open(&config.paths)?;
        let (event_tx, _rx) = broadcast::channel(1000);

        Ok(Self {
            retry: RetryPolicy::from_config(&config.download),
            config: Arc::new(config),
            resolvers: components.resolvers,
            fetcher: components.fetcher,
            extractor: Extractor::new(components.tools),
            cooldown: components.cooldown,
            ledgers,
            event_tx,
            shutdown: Arc::new(AtomicBool::new(false)),
            in_flight: None,
        })
    }

    /// Subscribe to progress events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Flag that stops the run loop before the next release once set
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Post id of the release being processed, if any
    ///
    /// Stays set when processing is abandoned by dropping the run future.
    pub fn in_flight(&self) -> Option<&str> {
        self.in_flight.as_deref()
    }

    /// Shared Mega cooldown
    pub fn cooldown(&self) -> &Arc<Cooldown> {
        &self.cooldown
    }

    /// Ledgers and pending queue
    pub fn ledgers(&self) -> &Ledgers {
        &self.ledgers
    }

    /// Mutable ledgers (for resets)
    pub fn ledgers_mut(&mut self) -> &mut Ledgers {
        &mut self.ledgers
    }

    /// Drive one release to its final disposition and record it
    ///
    /// Per-link failures never abort the release; only a ledger write failure is
    /// returned as an error.
    pub async fn process_release(&mut self, release: &Release) -> Result<Disposition> {
        self.in_flight = Some(release.post_id.clone());
        self.emit(Event::ReleaseStarted {
            post_id: release.post_id.clone(),
            name: release.to_string(),
        });

        let name = canonical_name(release);
        let facts = EntryFacts {
            completed: self.ledgers.completed.contains(&release.post_id),
            band_failed: self.ledgers.failed.band_failed(release),
            folder_exists: self.config.paths.destination.join(&name).exists(),
            has_links: !release.download_links.is_empty(),
        };

        let disposition = match entry_check(&facts) {
            Some(disposition) => {
                info!(post_id = %release.post_id, release = %release, outcome = disposition.label(), "no attempt needed");
                disposition
            }
            None => {
                info!(post_id = %release.post_id, release = %release, links = release.download_links.len(), "processing release");
                let outcomes = self.attempt_links(release, &name).await;
                settle(&outcomes)
            }
        };

        self.in_flight = None;
        self.record(release, &disposition)?;
        info!(post_id = %release.post_id, outcome = disposition.label(), "release finished");
        self.emit(Event::ReleaseFinished {
            post_id: release.post_id.clone(),
            disposition: disposition.clone(),
        });
        Ok(disposition)
    }

    /// Persist the pending queue and the cooldown deadline
    pub fn flush(&self) -> Result<()> {
        self.ledgers.pending.persist()?;
        self.cooldown.persist()?;
        Ok(())
    }

    fn record(&mut self, release: &Release, disposition: &Disposition) -> Result<()> {
        match disposition {
            Disposition::Succeeded { .. } => self.ledgers.completed.record(release)?,
            Disposition::Deferred => {
                return self.ledgers.pending.push(release.narrowed_to(BackendKind::Mega));
            }
            Disposition::Failed { reason } => {
                self.ledgers
                    .failed
                    .record(release, self.cooldown.now(), reason)?
            }
            Disposition::Partial | Disposition::AlreadyProcessed { .. } | Disposition::NoLinks => {}
        }
        self.ledgers.pending.remove(&release.post_id)?;
        Ok(())
    }

    fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    fn emit(&self, event: Event) {
        // No subscribers is fine.
        let _ = self.event_tx.send(event);
    }
}
