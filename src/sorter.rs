use std::collections::BTreeMap;
use std::time::Duration;

use itertools::Itertools;
use log::{debug, error, info};

use crate::classifier::{classify_batch, Classifier};
use crate::error::SortError;
use crate::mail_store::fetch::{fetch_all_folders, fetch_folder, FetchFilter};
use crate::mail_store::folders::{build_categories, Category};
use crate::mail_store::message::MailMessage;
use crate::mail_store::{MailStore, SessionState};
use crate::settings::{ClassifierConfig, SorterConfig};
use crate::sorter::reconcile::move_batch;

pub mod reconcile;

/// Stages of one sorting run. Terminal states are `Completed` and
/// `Failed`; reconciliation failures are per-category and only fail the
/// run when every category failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStage {
    Idle,
    BuildingCategories,
    Fetching,
    Classifying,
    Grouping,
    Reconciling,
    Completed,
    Failed,
}

/// Which folders one run considers.
#[derive(Debug, Clone)]
pub enum SortScope {
    Folder(String),
    AllFolders,
}

/// Outcome of a run: messages relocated per category, plus the categories
/// whose batches failed. Partial success is the expected common case.
#[derive(Debug, Default)]
pub struct SortReport {
    pub counts: BTreeMap<String, usize>,
    pub failed_categories: Vec<String>,
}

impl SortReport {
    pub fn total_moved(&self) -> usize {
        self.counts.values().sum()
    }

    pub fn fully_successful(&self) -> bool {
        self.failed_categories.is_empty()
    }
}

/// Classification call tuning, lifted out of the classifier section of
/// the configuration.
#[derive(Debug, Clone)]
pub struct ClassifyTuning {
    pub excerpt_max_chars: usize,
    pub concurrency: usize,
    pub batch_delay: Duration,
}

impl ClassifyTuning {
    pub fn from_config(config: &ClassifierConfig) -> Self {
        ClassifyTuning {
            excerpt_max_chars: config.excerpt_max_chars,
            concurrency: config.concurrency,
            batch_delay: Duration::from_millis(config.batch_delay_ms),
        }
    }
}

/// Drives one sorting run end to end: build the category taxonomy, fetch
/// candidates, classify, group, reconcile.
///
/// The sorter owns its mail session exclusively for the duration of a
/// run and releases it (disconnects) when the run reaches a terminal
/// state. Protocol commands are strictly sequential; only classification
/// calls fan out.
pub struct Sorter<S, C> {
    store: S,
    classifier: C,
    config: SorterConfig,
    tuning: ClassifyTuning,
    stage: RunStage,
}

impl<S: MailStore, C: Classifier> Sorter<S, C> {
    pub fn new(store: S, classifier: C, config: SorterConfig, tuning: ClassifyTuning) -> Self {
        Sorter {
            store,
            classifier,
            config,
            tuning,
            stage: RunStage::Idle,
        }
    }

    pub fn stage(&self) -> RunStage {
        self.stage
    }

    fn set_stage(&mut self, stage: RunStage) {
        debug!("run stage: {:?} -> {:?}", self.stage, stage);
        self.stage = stage;
    }

    fn default_filter(&self, unread_only: bool) -> FetchFilter {
        let base = if unread_only {
            FetchFilter::unread()
        } else {
            FetchFilter::all()
        };
        base.with_limit(self.config.fetch_limit)
    }

    pub async fn sort_unread_in_folder(&mut self, folder: &str) -> Result<SortReport, SortError> {
        let filter = self.default_filter(true);
        self.sort(SortScope::Folder(folder.to_string()), filter).await
    }

    pub async fn sort_all_in_folder(&mut self, folder: &str) -> Result<SortReport, SortError> {
        let filter = self.default_filter(false);
        self.sort(SortScope::Folder(folder.to_string()), filter).await
    }

    pub async fn sort_unread_across_all_folders(&mut self) -> Result<SortReport, SortError> {
        let filter = self.default_filter(true);
        self.sort(SortScope::AllFolders, filter).await
    }

    pub async fn sort_all_across_all_folders(&mut self) -> Result<SortReport, SortError> {
        let filter = self.default_filter(false);
        self.sort(SortScope::AllFolders, filter).await
    }

    /// Relocate every message of `folder` into the named category without
    /// consulting the classifier.
    pub async fn sort_into_category(
        &mut self,
        folder: &str,
        category_name: &str,
    ) -> Result<usize, SortError> {
        self.ensure_connected().await?;

        self.set_stage(RunStage::Fetching);
        let filter = self.default_filter(false);
        let messages = match fetch_folder(&mut self.store, folder, &filter).await {
            Ok(messages) => messages,
            Err(e) => return self.fail(e.into()).await,
        };

        self.set_stage(RunStage::Reconciling);
        let category = Category::new(category_name);
        let moved = match move_batch(&mut self.store, &category, &messages).await {
            Ok(moved) => moved,
            Err(e) => return self.fail(e.into()).await,
        };

        self.finish().await;
        Ok(moved)
    }

    /// One full classification-and-reconciliation run.
    pub async fn sort(
        &mut self,
        scope: SortScope,
        filter: FetchFilter,
    ) -> Result<SortReport, SortError> {
        self.ensure_connected().await?;

        self.set_stage(RunStage::BuildingCategories);
        let source = self.config.category_source();
        let fallback = self.config.fallback_category.clone();
        let categories = build_categories(&mut self.store, &source, &fallback).await;
        info!(
            "categories for this run: {}",
            categories.iter().map(Category::name).join(", ")
        );

        self.set_stage(RunStage::Fetching);
        let mut messages = match self.fetch(&scope, &filter).await {
            Ok(messages) => messages,
            Err(e) => return self.fail(e).await,
        };
        if messages.is_empty() {
            info!("no matching mail, nothing to sort");
            self.finish().await;
            return Ok(SortReport::default());
        }
        info!("{} candidate messages", messages.len());

        self.set_stage(RunStage::Classifying);
        classify_batch(
            &self.classifier,
            &mut messages,
            &categories,
            &fallback,
            self.tuning.excerpt_max_chars,
            self.tuning.concurrency,
            self.tuning.batch_delay,
        )
        .await;

        self.set_stage(RunStage::Grouping);
        let groups: BTreeMap<String, Vec<MailMessage>> = messages
            .into_iter()
            .map(|m| (m.category.clone().unwrap_or_else(|| fallback.clone()), m))
            .into_group_map()
            .into_iter()
            .collect();

        self.set_stage(RunStage::Reconciling);
        let total_batches = groups.len();
        let mut report = SortReport::default();
        for (name, batch) in groups {
            let category = Category::new(&name);
            match move_batch(&mut self.store, &category, &batch).await {
                Ok(moved) => {
                    report.counts.insert(name, moved);
                }
                Err(e) => {
                    // One mis-encoded folder name must not keep the other
                    // categories from being sorted.
                    error!(
                        "reconciliation failed for '{}' ({} messages): {}",
                        name,
                        batch.len(),
                        e
                    );
                    report.failed_categories.push(name);
                }
            }
        }

        if !report.failed_categories.is_empty() && report.counts.is_empty() {
            return self.fail(SortError::AllCategoriesFailed(total_batches)).await;
        }

        self.finish().await;
        Ok(report)
    }

    async fn fetch(
        &mut self,
        scope: &SortScope,
        filter: &FetchFilter,
    ) -> Result<Vec<MailMessage>, SortError> {
        match scope {
            SortScope::Folder(folder) => fetch_folder(&mut self.store, folder, filter)
                .await
                .map_err(SortError::from),
            SortScope::AllFolders => {
                let folders = self.store.list_folders().await?;
                Ok(fetch_all_folders(&mut self.store, &folders, filter).await)
            }
        }
    }

    async fn ensure_connected(&mut self) -> Result<(), SortError> {
        if self.store.state() != SessionState::Ready {
            if let Err(e) = self.store.connect().await {
                self.set_stage(RunStage::Failed);
                return Err(e.into());
            }
        }
        Ok(())
    }

    // Cleanup belongs to the orchestrator: the lower layers cannot know
    // the overall operation has ended.
    async fn fail<T>(&mut self, e: SortError) -> Result<T, SortError> {
        self.set_stage(RunStage::Failed);
        self.store.disconnect().await;
        Err(e)
    }

    async fn finish(&mut self) {
        self.set_stage(RunStage::Completed);
        self.store.disconnect().await;
    }

    /// Hand the session back, e.g. to inspect the fake store in tests.
    pub fn into_store(self) -> S {
        self.store
    }
}
