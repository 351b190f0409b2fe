//! Multi-worker batch loading
//!
//! Batches of an epoch are distributed round-robin over tokio workers. Each
//! worker decodes its samples on the blocking pool, in parallel with rayon,
//! and the stream hands batches back in epoch order.

use super::{Collate, DataError, Dataset};
use futures::stream::{Stream, StreamExt};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, instrument};

/// Batch type produced by a dataset
pub type BatchOf<D> = <<D as Dataset>::Item as Collate>::Batch;

/// Configuration for DataLoader
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataLoaderConfig {
    /// Batch size
    pub batch_size: usize,
    /// Whether to shuffle data
    pub shuffle: bool,
    /// Number of worker tasks
    pub num_workers: usize,
    /// Channel capacity between workers and the stream
    pub buffer_size: usize,
    /// Whether to drop the last incomplete batch
    pub drop_last: bool,
    /// Shuffle seed; epochs draw from `seed + epoch`
    pub seed: Option<u64>,
}

impl Default for DataLoaderConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            shuffle: true,
            num_workers: 4,
            buffer_size: 16,
            drop_last: false,
            seed: None,
        }
    }
}

/// Async data loader over any [`Dataset`]
pub struct DataLoader<D: Dataset + 'static> {
    dataset: Arc<D>,
    config: DataLoaderConfig,
    epoch: Arc<Mutex<usize>>,
    current_stream: Arc<Mutex<Option<DataLoaderStream<BatchOf<D>>>>>,
}

impl<D: Dataset + 'static> DataLoader<D> {
    /// Create a new DataLoader
    pub fn new(dataset: Arc<D>, config: DataLoaderConfig) -> Self {
        info!(
            "Creating {} loader with {} samples, batch_size={}, num_workers={}, shuffle={}",
            dataset.metadata().mode.as_str(),
            dataset.len(),
            config.batch_size,
            config.num_workers,
            config.shuffle
        );

        Self {
            dataset,
            config,
            epoch: Arc::new(Mutex::new(0)),
            current_stream: Arc::new(Mutex::new(None)),
        }
    }

    /// Get the number of batches per epoch
    pub fn num_batches(&self) -> usize {
        let dataset_size = self.dataset.len();
        let batch_size = self.config.batch_size.max(1);
        if self.config.drop_last {
            dataset_size / batch_size
        } else {
            dataset_size.div_ceil(batch_size)
        }
    }

    /// Get dataset size
    pub fn dataset_size(&self) -> usize {
        self.dataset.len()
    }

    /// Loader configuration
    pub fn config(&self) -> &DataLoaderConfig {
        &self.config
    }

    /// Underlying dataset
    pub fn dataset(&self) -> &Arc<D> {
        &self.dataset
    }

    /// Get dataset metadata
    pub fn metadata(&self) -> &super::DatasetMetadata {
        self.dataset.metadata()
    }

    /// Get current epoch
    pub async fn current_epoch(&self) -> usize {
        *self.epoch.lock().await
    }

    /// Create a stream of batches for the next epoch
    #[instrument(skip(self))]
    pub async fn epoch_stream(&self) -> DataLoaderStream<BatchOf<D>> {
        let mut epoch = self.epoch.lock().await;
        *epoch += 1;
        let current_epoch = *epoch;
        drop(epoch);

        info!("Starting epoch {} with {} batches", current_epoch, self.num_batches());

        let mut indices: Vec<usize> = (0..self.dataset.len()).collect();
        if self.config.shuffle {
            match self.config.seed {
                Some(seed) => indices.shuffle(&mut StdRng::seed_from_u64(seed.wrapping_add(current_epoch as u64))),
                None => indices.shuffle(&mut rand::rng()),
            }
            debug!("Shuffled {} indices", indices.len());
        }

        DataLoaderStream::spawn(
            self.dataset.clone(),
            self.create_batches(indices),
            self.config.num_workers.max(1),
            self.config.buffer_size.max(1),
            current_epoch,
        )
    }

    fn create_batches(&self, indices: Vec<usize>) -> Vec<Vec<usize>> {
        let batch_size = self.config.batch_size.max(1);
        let batches: Vec<Vec<usize>> = indices
            .chunks(batch_size)
            .filter(|chunk| !self.config.drop_last || chunk.len() == batch_size)
            .map(|chunk| chunk.to_vec())
            .collect();

        debug!("Created {} batches", batches.len());
        batches
    }

    /// Next batch of the running epoch; `Ok(None)` ends the epoch and the
    /// following call starts a new one
    pub async fn next_batch(&self) -> Result<Option<BatchOf<D>>, DataError> {
        let mut stream_guard = self.current_stream.lock().await;

        if stream_guard.is_none() {
            *stream_guard = Some(self.epoch_stream().await);
        }

        let Some(stream) = stream_guard.as_mut() else {
            return Ok(None);
        };
        match stream.next().await {
            Some(batch) => batch.map(Some),
            None => {
                *stream_guard = None;
                Ok(None)
            }
        }
    }
}

/// Ordered stream of an epoch's batches
pub struct DataLoaderStream<B> {
    receiver: mpsc::Receiver<(usize, Result<B, DataError>)>,
    pending: BTreeMap<usize, Result<B, DataError>>,
    next_ordinal: usize,
    batches_processed: usize,
    total_batches: usize,
    epoch: usize,
}

// Fields are never pinned structurally.
impl<B> Unpin for DataLoaderStream<B> {}

impl<B: Send + 'static> DataLoaderStream<B> {
    #[instrument(skip(dataset, batches))]
    fn spawn<D>(dataset: Arc<D>, batches: Vec<Vec<usize>>, num_workers: usize, buffer_size: usize, epoch: usize) -> Self
    where
        D: Dataset + 'static,
        D::Item: Collate<Batch = B>,
    {
        let total_batches = batches.len();
        let (sender, receiver) = mpsc::channel(buffer_size);

        debug!("Spawning {} workers for {} batches", num_workers, total_batches);

        for worker_id in 0..num_workers {
            let dataset = dataset.clone();
            let sender = sender.clone();
            let worker_batches: Vec<(usize, Vec<usize>)> = batches
                .iter()
                .cloned()
                .enumerate()
                .skip(worker_id)
                .step_by(num_workers)
                .collect();

            tokio::spawn(async move {
                worker_task(worker_id, epoch, dataset, worker_batches, sender).await;
            });
        }

        // Channel closes once every worker is done
        drop(sender);

        Self {
            receiver,
            pending: BTreeMap::new(),
            next_ordinal: 0,
            batches_processed: 0,
            total_batches,
            epoch,
        }
    }
}

impl<B> DataLoaderStream<B> {
    /// Get the number of batches yielded so far
    pub fn batches_processed(&self) -> usize {
        self.batches_processed
    }

    /// Get the total number of batches
    pub fn total_batches(&self) -> usize {
        self.total_batches
    }

    /// Get the epoch number
    pub fn epoch(&self) -> usize {
        self.epoch
    }

    /// Get progress as a fraction (0.0 to 1.0)
    pub fn progress(&self) -> f32 {
        if self.total_batches == 0 {
            1.0
        } else {
            self.batches_processed as f32 / self.total_batches as f32
        }
    }

    fn emit(&mut self, batch: Result<B, DataError>) -> Poll<Option<Result<B, DataError>>> {
        self.next_ordinal += 1;
        self.batches_processed += 1;
        if self.batches_processed % 100 == 0 {
            debug!(
                "Processed {}/{} batches in epoch {} ({:.1}%)",
                self.batches_processed,
                self.total_batches,
                self.epoch,
                self.progress() * 100.0
            );
        }
        Poll::Ready(Some(batch))
    }
}

async fn worker_task<D: Dataset + 'static>(
    worker_id: usize,
    epoch: usize,
    dataset: Arc<D>,
    batches: Vec<(usize, Vec<usize>)>,
    sender: mpsc::Sender<(usize, Result<BatchOf<D>, DataError>)>,
) {
    debug!("Worker {} starting with {} batches", worker_id, batches.len());

    for (ordinal, indices) in batches {
        let batch_result = tokio::task::spawn_blocking({
            let dataset = dataset.clone();
            move || -> Result<BatchOf<D>, DataError> {
                let items = indices
                    .par_iter()
                    .map(|&idx| dataset.get_in_epoch(idx, epoch))
                    .collect::<Result<Vec<_>, _>>()?;
                D::Item::collate(items)
            }
        })
        .await;

        let batch = match batch_result {
            Ok(Ok(batch)) => Ok(batch),
            Ok(Err(e)) => {
                error!("Worker {} batch {} failed: {}", worker_id, ordinal, e);
                Err(e)
            }
            Err(e) => {
                error!("Worker {} batch {} panicked: {}", worker_id, ordinal, e);
                Err(DataError::WorkerFailed { reason: e.to_string() })
            }
        };

        if sender.send((ordinal, batch)).await.is_err() {
            debug!("Worker {} channel closed, stopping", worker_id);
            break;
        }
    }

    debug!("Worker {} finished", worker_id);
}

impl<B> Stream for DataLoaderStream<B> {
    type Item = Result<B, DataError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if let Some(batch) = this.pending.remove(&this.next_ordinal) {
                return this.emit(batch);
            }

            match this.receiver.poll_recv(cx) {
                Poll::Ready(Some((ordinal, batch))) => {
                    this.pending.insert(ordinal, batch);
                }
                Poll::Ready(None) => {
                    // Only reachable when a worker stopped early; drain what arrived.
                    if let Some((_, batch)) = this.pending.pop_first() {
                        return this.emit(batch);
                    }
                    info!(
                        "Epoch {} completed: {}/{} batches processed",
                        this.epoch, this.batches_processed, this.total_batches
                    );
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Builder for creating DataLoaders with fluent API
pub struct DataLoaderBuilder<D: Dataset + 'static> {
    dataset: Arc<D>,
    config: DataLoaderConfig,
}

impl<D: Dataset + 'static> DataLoaderBuilder<D> {
    /// Create a new DataLoaderBuilder
    pub fn new(dataset: Arc<D>) -> Self {
        Self {
            dataset,
            config: DataLoaderConfig::default(),
        }
    }

    /// Set batch size
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.config.batch_size = batch_size;
        self
    }

    /// Set shuffle
    pub fn shuffle(mut self, shuffle: bool) -> Self {
        self.config.shuffle = shuffle;
        self
    }

    /// Set number of workers
    pub fn num_workers(mut self, num_workers: usize) -> Self {
        self.config.num_workers = num_workers;
        self
    }

    /// Set buffer size
    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.config.buffer_size = buffer_size;
        self
    }

    /// Set drop last
    pub fn drop_last(mut self, drop_last: bool) -> Self {
        self.config.drop_last = drop_last;
        self
    }

    /// Set shuffle seed
    pub fn seed(mut self, seed: Option<u64>) -> Self {
        self.config.seed = seed;
        self
    }

    /// Build the DataLoader
    pub fn build(self) -> Result<DataLoader<D>, DataError> {
        if self.config.batch_size == 0 {
            return Err(DataError::BatchCollationError {
                reason: "batch size must be positive".to_string(),
            });
        }
        Ok(DataLoader::new(self.dataset, self.config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::data::{DatasetMetadata, DatasetMode};

    struct MockItem(usize);

    impl Collate for MockItem {
        type Batch = Vec<usize>;

        fn collate(items: Vec<Self>) -> Result<Vec<usize>, DataError> {
            Ok(items.into_iter().map(|item| item.0).collect())
        }
    }

    struct MockDataset {
        size: usize,
        fail_at: Option<usize>,
        metadata: DatasetMetadata,
    }

    impl MockDataset {
        fn new(size: usize) -> Self {
            Self {
                size,
                fail_at: None,
                metadata: DatasetMetadata {
                    name: "mock_dataset".to_string(),
                    mode: DatasetMode::All,
                    num_samples: size,
                    num_classes: 2,
                },
            }
        }
    }

    impl Dataset for MockDataset {
        type Item = MockItem;

        fn len(&self) -> usize {
            self.size
        }

        fn get(&self, index: usize) -> Result<MockItem, DataError> {
            if index >= self.size || Some(index) == self.fail_at {
                return Err(DataError::InvalidIndex {
                    index,
                    dataset_size: self.size,
                });
            }
            Ok(MockItem(index))
        }

        fn metadata(&self) -> &DatasetMetadata {
            &self.metadata
        }
    }

    fn config(batch_size: usize, shuffle: bool, num_workers: usize) -> DataLoaderConfig {
        DataLoaderConfig {
            batch_size,
            shuffle,
            num_workers,
            buffer_size: 2,
            drop_last: false,
            seed: Some(42),
        }
    }

    #[tokio::test]
    async fn test_dataloader_creation() {
        let dataloader = DataLoader::new(Arc::new(MockDataset::new(100)), config(10, false, 2));
        assert_eq!(dataloader.dataset_size(), 100);
        assert_eq!(dataloader.num_batches(), 10);
    }

    #[tokio::test]
    async fn test_batches_arrive_in_order() {
        let dataloader = DataLoader::new(Arc::new(MockDataset::new(25)), config(10, false, 3));
        let mut stream = dataloader.epoch_stream().await;

        let mut batches = Vec::new();
        while let Some(batch) = stream.next().await {
            batches.push(batch.unwrap());
        }

        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0], (0..10).collect::<Vec<_>>());
        assert_eq!(batches[1], (10..20).collect::<Vec<_>>());
        assert_eq!(batches[2], (20..25).collect::<Vec<_>>());
        assert_eq!(stream.batches_processed(), 3);
        assert_eq!(stream.total_batches(), 3);
    }

    #[tokio::test]
    async fn test_shuffled_epoch_covers_every_index_once() {
        let dataloader = DataLoader::new(Arc::new(MockDataset::new(37)), config(8, true, 4));
        let mut stream = dataloader.epoch_stream().await;

        let mut seen = Vec::new();
        while let Some(batch) = stream.next().await {
            seen.extend(batch.unwrap());
        }
        assert_ne!(seen, (0..37).collect::<Vec<_>>());
        seen.sort_unstable();
        assert_eq!(seen, (0..37).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_seeded_shuffle_is_reproducible() {
        let first = DataLoader::new(Arc::new(MockDataset::new(20)), config(20, true, 1));
        let second = DataLoader::new(Arc::new(MockDataset::new(20)), config(20, true, 1));

        let a = first.next_batch().await.unwrap().unwrap();
        let b = second.next_batch().await.unwrap().unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_failed_sample_fails_only_its_batch() {
        let mut dataset = MockDataset::new(30);
        dataset.fail_at = Some(13);
        let dataloader = DataLoader::new(Arc::new(dataset), config(10, false, 2));
        let mut stream = dataloader.epoch_stream().await;

        let results: Vec<_> = stream.by_ref().collect().await;
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(DataError::InvalidIndex { index: 13, .. })));
        assert!(results[2].is_ok());
    }

    #[tokio::test]
    async fn test_next_batch_rolls_over_epochs() {
        let dataloader = DataLoader::new(Arc::new(MockDataset::new(5)), config(2, false, 1));

        let mut sizes = Vec::new();
        while let Some(batch) = dataloader.next_batch().await.unwrap() {
            sizes.push(batch.len());
        }
        assert_eq!(sizes, vec![2, 2, 1]);
        assert_eq!(dataloader.current_epoch().await, 1);

        assert!(dataloader.next_batch().await.unwrap().is_some());
        assert_eq!(dataloader.current_epoch().await, 2);
    }

    #[tokio::test]
    async fn test_dataloader_builder() {
        let dataloader = DataLoaderBuilder::new(Arc::new(MockDataset::new(52)))
            .batch_size(5)
            .shuffle(true)
            .num_workers(2)
            .buffer_size(10)
            .drop_last(true)
            .seed(Some(1))
            .build()
            .unwrap();

        assert_eq!(dataloader.dataset_size(), 52);
        assert_eq!(dataloader.num_batches(), 10);

        let mut stream = dataloader.epoch_stream().await;
        let mut count = 0;
        while let Some(batch) = stream.next().await {
            assert_eq!(batch.unwrap().len(), 5);
            count += 1;
        }
        assert_eq!(count, 10);

        assert!(DataLoaderBuilder::new(Arc::new(MockDataset::new(1))).batch_size(0).build().is_err());
    }
}
