#![allow(dead_code)]

use std::collections::BTreeSet;
use std::f64::consts::PI;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{NaiveDate, NaiveDateTime};

use enf_api::{EnfApp, Settings};
use enf_blob::{BlobAdapter, BlobConfig, BlobError, BlobResult, BlobStore, ByteStream, MemoryBlobStore, PutResult};
use enf_core::{Dataset, EnfConfigSnapshot, FrequencySample, ProviderRegistry, ReferenceProvider, YearMonth};
use enf_queue::{MemoryBackend, QueueAdapter, QueueConfig};
use enf_store::MemoryRangeStore;

pub const WAV_RATE: u32 = 8000;

pub fn day(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

pub fn ts(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
}

/// Grid frequency `second` seconds after midnight, identical every day.
pub fn reference_frequency(second: u32) -> f64 {
    let t = f64::from(second);
    50.0 + 0.03 * (t * 0.21).sin() + 0.02 * (t * 0.047).cos()
}

/// Answers every date with one sample per second from midnight.
#[derive(Default)]
pub struct HumProvider {
    pub calls: AtomicUsize,
    pub seconds_per_day: u32,
    pub fail: bool,
}

impl HumProvider {
    pub fn new(seconds_per_day: u32) -> Self {
        Self {
            seconds_per_day,
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReferenceProvider for HumProvider {
    async fn query_dates(
        &self,
        dataset: &str,
        dates: &BTreeSet<NaiveDate>,
    ) -> anyhow::Result<Vec<FrequencySample>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("grid operator unreachable");
        }
        let mut samples = Vec::new();
        for date in dates {
            let midnight = date.and_hms_opt(0, 0, 0).unwrap();
            for s in 0..self.seconds_per_day {
                samples.push(FrequencySample::new(
                    dataset,
                    midnight + chrono::Duration::seconds(i64::from(s)),
                    reference_frequency(s),
                ));
            }
        }
        Ok(samples)
    }

    async fn catalogue(&self) -> anyhow::Result<Vec<YearMonth>> {
        Ok(vec![YearMonth::new(2023, 1)?, YearMonth::new(2023, 2)?])
    }
}

/// 16-bit mono WAV whose hum follows the reference from `start_second` on,
/// at the given harmonic.
pub fn hum_wav(start_second: u32, seconds: u32, harmonic: u32) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: WAV_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        let mut phase = 0.0_f64;
        for k in 0..seconds {
            let hz = f64::from(harmonic) * reference_frequency(start_second + k);
            for _ in 0..WAV_RATE {
                writer.write_sample((0.3 * phase.sin() * 32767.0) as i16).unwrap();
                phase += 2.0 * PI * hz / f64::from(WAV_RATE);
            }
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

/// Memory blob store that counts deletes and can refuse downloads.
#[derive(Default)]
pub struct CountingBlobStore {
    pub inner: MemoryBlobStore,
    pub deletes: AtomicUsize,
    pub fail_get: bool,
}

impl CountingBlobStore {
    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlobStore for CountingBlobStore {
    async fn put(
        &self,
        key: &str,
        content_type: Option<&str>,
        stream: ByteStream,
    ) -> BlobResult<PutResult> {
        self.inner.put(key, content_type, stream).await
    }

    async fn get(&self, key: &str) -> BlobResult<Bytes> {
        if self.fail_get {
            return Err(BlobError::backend(std::io::Error::other("storage offline")));
        }
        self.inner.get(key).await
    }

    async fn delete(&self, key: &str) -> BlobResult<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete(key).await
    }
}

pub struct Harness {
    pub app: EnfApp,
    pub provider: Arc<HumProvider>,
    pub blobs: Arc<CountingBlobStore>,
    pub store: MemoryRangeStore,
}

impl Harness {
    pub async fn new(provider: HumProvider) -> Self {
        Self::with_blobs(provider, CountingBlobStore::default()).await
    }

    pub async fn with_blobs(provider: HumProvider, blobs: CountingBlobStore) -> Self {
        let provider = Arc::new(provider);
        let blobs = Arc::new(blobs);
        let store = MemoryRangeStore::new();

        let registry = ProviderRegistry::new().with_dataset(Dataset::new(
            "eso",
            50.0,
            Arc::clone(&provider) as Arc<dyn ReferenceProvider>,
        ));
        let queue = QueueAdapter::new(MemoryBackend::new()).with_config(QueueConfig {
            workers: 1,
            poll_interval: Duration::from_millis(5),
            error_backoff: Duration::from_millis(5),
            ..Default::default()
        });
        let adapter = BlobAdapter::from_arc(
            Arc::clone(&blobs) as Arc<dyn BlobStore>,
            BlobConfig::default(),
        );
        let settings = Settings::from_snapshot(&EnfConfigSnapshot::default()).unwrap();

        let app = EnfApp::from_parts(registry, Arc::new(store.clone()), adapter, queue, &settings)
            .await
            .unwrap();

        Self {
            app,
            provider,
            blobs,
            store,
        }
    }
}
