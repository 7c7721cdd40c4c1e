//! Commit journal: one CBOR record per frame.

use super::tables::{Mutation, Snapshot, Tables};
use crate::error::{CoreError, CoreResult};
use calsync_storage::{frame, Sealer, StorageBackend};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Record format version written into every frame.
pub(crate) const JOURNAL_VERSION: u16 = 1;

#[derive(Serialize)]
struct EntryRef<'a> {
    version: u16,
    sequence: u64,
    body: BodyRef<'a>,
}

#[derive(Serialize)]
#[serde(rename = "Body")]
enum BodyRef<'a> {
    Commit(&'a [Mutation]),
    Snapshot(&'a Snapshot),
}

#[derive(Deserialize)]
struct Entry {
    version: u16,
    sequence: u64,
    body: Body,
}

#[derive(Deserialize)]
enum Body {
    Commit(Vec<Mutation>),
    Snapshot(Snapshot),
}

/// State recovered from a journal.
pub(crate) struct Replayed {
    pub(crate) tables: Tables,
    pub(crate) sequence: u64,
    pub(crate) records: usize,
    pub(crate) torn_tail: bool,
}

pub(crate) struct Journal {
    backend: Mutex<Box<dyn StorageBackend>>,
    sealer: Option<Sealer>,
    sync_on_commit: bool,
}

impl Journal {
    pub(crate) fn new(
        backend: Box<dyn StorageBackend>,
        sealer: Option<Sealer>,
        sync_on_commit: bool,
    ) -> Self {
        Self {
            backend: Mutex::new(backend),
            sealer,
            sync_on_commit,
        }
    }

    /// Rebuilds the tables from every intact frame.
    ///
    /// A torn final frame is cut off so later appends start on a frame
    /// boundary.
    pub(crate) fn replay(&self) -> CoreResult<Replayed> {
        let mut backend = self.backend.lock();
        let bytes = backend.read_all()?;
        let decoded = frame::decode_all(&bytes)?;

        let mut tables = Tables::default();
        let mut sequence = 0;
        for payload in &decoded.frames {
            let entry = self.decode(payload)?;
            if entry.version > JOURNAL_VERSION {
                return Err(CoreError::corrupt_journal(format!(
                    "unsupported journal version {}",
                    entry.version
                )));
            }
            match entry.body {
                Body::Commit(mutations) => {
                    for mutation in mutations {
                        tables.apply(mutation);
                    }
                }
                Body::Snapshot(snapshot) => tables = Tables::from_snapshot(snapshot),
            }
            sequence = entry.sequence;
        }

        if decoded.torn_tail {
            tracing::warn!(
                valid_len = decoded.valid_len,
                total_len = bytes.len(),
                "dropping torn journal tail"
            );
            let keep = usize::try_from(decoded.valid_len)
                .map_err(|_| CoreError::corrupt_journal("journal length overflow"))?;
            backend.replace(&bytes[..keep])?;
        }

        Ok(Replayed {
            tables,
            sequence,
            records: decoded.frames.len(),
            torn_tail: decoded.torn_tail,
        })
    }

    pub(crate) fn append_commit(&self, sequence: u64, mutations: &[Mutation]) -> CoreResult<()> {
        let payload = self.encode(&EntryRef {
            version: JOURNAL_VERSION,
            sequence,
            body: BodyRef::Commit(mutations),
        })?;
        let mut backend = self.backend.lock();
        backend.append(&frame::encode(&payload))?;
        if self.sync_on_commit {
            backend.sync()?;
        }
        Ok(())
    }

    /// Replaces the whole journal with a single snapshot frame.
    pub(crate) fn compact(&self, sequence: u64, tables: &Tables) -> CoreResult<()> {
        let snapshot = tables.to_snapshot();
        let payload = self.encode(&EntryRef {
            version: JOURNAL_VERSION,
            sequence,
            body: BodyRef::Snapshot(&snapshot),
        })?;
        let mut backend = self.backend.lock();
        backend.replace(&frame::encode(&payload))?;
        backend.sync()?;
        Ok(())
    }

    pub(crate) fn flush(&self) -> CoreResult<()> {
        self.backend.lock().sync()?;
        Ok(())
    }

    pub(crate) fn size(&self) -> CoreResult<u64> {
        Ok(self.backend.lock().size()?)
    }

    fn encode(&self, entry: &EntryRef<'_>) -> CoreResult<Vec<u8>> {
        let mut cbor = Vec::new();
        ciborium::into_writer(entry, &mut cbor).map_err(CoreError::codec)?;
        match &self.sealer {
            Some(sealer) => Ok(sealer.seal(&cbor)?),
            None => Ok(cbor),
        }
    }

    fn decode(&self, payload: &[u8]) -> CoreResult<Entry> {
        let opened;
        let cbor = match &self.sealer {
            Some(sealer) => {
                opened = sealer.open(payload)?;
                opened.as_slice()
            }
            None => payload,
        };
        ciborium::from_reader(cbor).map_err(CoreError::codec)
    }
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal")
            .field("sealed", &self.sealer.is_some())
            .field("sync_on_commit", &self.sync_on_commit)
            .finish_non_exhaustive()
    }
}
