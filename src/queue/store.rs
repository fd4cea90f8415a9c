// Queue store - Durable queue state in RocksDB
//
// Layout:
//   seq                  -> next job sequence (u64 LE)
//   job/{prio}{seq BE}   -> bincode Job   (key order = priority then FIFO)
//   idem/{digest}        -> status byte + seq (dedup index, survives the job)
//
// A job record is persisted before its handler ever runs, so accepted work
// survives a crash; completion flips the idem status and drops the record.
// This is the only RocksDB consumer in the sidecar, so the store owns the
// database handle outright.

use crate::queue::job::{Job, JobKind};
use rocksdb::{Options, WriteBatch, DB};
use std::path::Path;

const SEQ_KEY: &[u8] = b"seq";
const JOB_PREFIX: &[u8] = b"job/";
const IDEM_PREFIX: &[u8] = b"idem/";

const STATUS_PENDING: u8 = 0;
const STATUS_SUCCEEDED: u8 = 1;
const STATUS_FAILED: u8 = 2;

/// Queue persistence errors
#[derive(Debug, thiserror::Error)]
pub enum QueueStoreError {
    #[error("failed to open queue store: {0}")]
    OpenFailed(String),

    #[error("queue read failed: {0}")]
    ReadFailed(String),

    #[error("queue write failed: {0}")]
    WriteFailed(String),

    #[error("queue record corrupt: {0}")]
    Corrupt(String),
}

pub struct QueueStore {
    db: DB,
}

impl QueueStore {
    /// Open or create the queue database. Records are tiny and churn fast,
    /// so WAL growth is bounded rather than tuned for throughput.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, QueueStoreError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_max_total_wal_size(32 * 1024 * 1024);
        opts.set_keep_log_file_num(4);

        let db = DB::open(&opts, path).map_err(|e| QueueStoreError::OpenFailed(e.to_string()))?;
        Ok(Self { db })
    }

    fn job_key(priority: u8, seq: u64) -> Vec<u8> {
        let mut key = Vec::with_capacity(JOB_PREFIX.len() + 9);
        key.extend_from_slice(JOB_PREFIX);
        key.push(priority);
        key.extend_from_slice(&seq.to_be_bytes());
        key
    }

    fn idem_key(kind: &JobKind) -> Vec<u8> {
        let digest = kind.idempotency_key();
        let mut key = Vec::with_capacity(IDEM_PREFIX.len() + 32);
        key.extend_from_slice(IDEM_PREFIX);
        key.extend_from_slice(digest.as_bytes());
        key
    }

    fn read(&self, key: &[u8]) -> Result<Option<Vec<u8>>, QueueStoreError> {
        self.db
            .get(key)
            .map_err(|e| QueueStoreError::ReadFailed(e.to_string()))
    }

    fn next_seq(&self) -> Result<u64, QueueStoreError> {
        let seq = match self.read(SEQ_KEY)? {
            Some(bytes) => {
                let arr: [u8; 8] = bytes
                    .try_into()
                    .map_err(|_| QueueStoreError::Corrupt("sequence key".to_string()))?;
                u64::from_le_bytes(arr)
            }
            None => 0,
        };
        self.db
            .put(SEQ_KEY, (seq + 1).to_le_bytes())
            .map_err(|e| QueueStoreError::WriteFailed(e.to_string()))?;
        Ok(seq)
    }

    /// Persist a new job unless its idempotency key is already known.
    /// Returns the job when accepted, `None` when collapsed.
    pub fn enqueue(&self, kind: JobKind) -> Result<Option<Job>, QueueStoreError> {
        let idem_key = Self::idem_key(&kind);
        if self.read(&idem_key)?.is_some() {
            return Ok(None);
        }

        let seq = self.next_seq()?;
        let job = Job {
            seq,
            kind,
            attempts: 0,
        };

        let record = bincode::serialize(&job)
            .map_err(|e| QueueStoreError::Corrupt(e.to_string()))?;
        let mut idem_value = Vec::with_capacity(9);
        idem_value.push(STATUS_PENDING);
        idem_value.extend_from_slice(&seq.to_le_bytes());

        let mut batch = WriteBatch::default();
        batch.put(Self::job_key(job.kind.priority().as_byte(), seq), record);
        batch.put(idem_key, idem_value);
        self.db
            .write(batch)
            .map_err(|e| QueueStoreError::WriteFailed(e.to_string()))?;

        Ok(Some(job))
    }

    /// All persisted jobs in priority-then-FIFO order (crash recovery).
    /// The key layout makes RocksDB's iteration order the schedule.
    pub fn pending_jobs(&self) -> Result<Vec<Job>, QueueStoreError> {
        let mut jobs = Vec::new();
        for item in self.db.prefix_iterator(JOB_PREFIX) {
            let (key, value) = item.map_err(|e| QueueStoreError::ReadFailed(e.to_string()))?;
            if !key.starts_with(JOB_PREFIX) {
                break;
            }
            let job: Job = bincode::deserialize(&value)
                .map_err(|e| QueueStoreError::Corrupt(e.to_string()))?;
            jobs.push(job);
        }
        Ok(jobs)
    }

    pub fn pending_count(&self) -> Result<usize, QueueStoreError> {
        let mut count = 0;
        for item in self.db.prefix_iterator(JOB_PREFIX) {
            let (key, _) = item.map_err(|e| QueueStoreError::ReadFailed(e.to_string()))?;
            if !key.starts_with(JOB_PREFIX) {
                break;
            }
            count += 1;
        }
        Ok(count)
    }

    /// Persist an attempt bump so retries survive a crash
    pub fn record_attempt(&self, job: &Job) -> Result<(), QueueStoreError> {
        let record = bincode::serialize(job)
            .map_err(|e| QueueStoreError::Corrupt(e.to_string()))?;
        self.db
            .put(Self::job_key(job.kind.priority().as_byte(), job.seq), record)
            .map_err(|e| QueueStoreError::WriteFailed(e.to_string()))
    }

    pub fn mark_succeeded(&self, job: &Job) -> Result<(), QueueStoreError> {
        self.finish(job, STATUS_SUCCEEDED)
    }

    pub fn mark_failed(&self, job: &Job) -> Result<(), QueueStoreError> {
        self.finish(job, STATUS_FAILED)
    }

    fn finish(&self, job: &Job, status: u8) -> Result<(), QueueStoreError> {
        let mut idem_value = Vec::with_capacity(9);
        idem_value.push(status);
        idem_value.extend_from_slice(&job.seq.to_le_bytes());

        let mut batch = WriteBatch::default();
        batch.delete(Self::job_key(job.kind.priority().as_byte(), job.seq));
        batch.put(Self::idem_key(&job.kind), idem_value);
        self.db
            .write(batch)
            .map_err(|e| QueueStoreError::WriteFailed(e.to_string()))
    }
}
