//! Engine facade: one lock, one transaction per call

use std::panic::{self, AssertUnwindSafe};

use parking_lot::Mutex;
use serde_json::Value;

use crate::collection::CollectionService;
use crate::config::EngineConfig;
use crate::data::DataService;
use crate::error::{EngineError, EngineResult};
use crate::file::{DiskService, FileDiskService};
use crate::index::{IndexKey, IndexQuery, IndexService};
use crate::logger::{LogLevel, Logger};
use crate::page::{CollectionPage, DocumentRef, HeaderPage};
use crate::pager::Pager;
use crate::transaction::{self, TransactionService};


struct EngineInner {
    pager: Pager,
    trans: TransactionService,
}

/// Services available to an action running inside [`Engine::transaction`]
pub struct Session<'a> {
    pager: &'a mut Pager,
    log: &'a Logger,
}

impl<'a> Session<'a> {
    pub fn collections(&mut self) -> CollectionService<'_> {
        CollectionService::new(self.pager)
    }

    pub fn data(&mut self) -> DataService<'_> {
        DataService::new(self.pager)
    }

    pub fn indexes(&mut self) -> IndexService<'_> {
        IndexService::new(self.pager)
    }

    pub fn pager(&mut self) -> &mut Pager {
        self.pager
    }

    /// Look up a collection, creating it when `add_if_not_exists` is set.
    /// A `None` name resolves to `None`.
    pub fn resolve_collection(
        &mut self,
        name: Option<&str>,
        add_if_not_exists: bool,
    ) -> EngineResult<Option<CollectionPage>> {
        let Some(name) = name else {
            return Ok(None);
        };

        let mut collections = self.collections();
        match collections.get(name)? {
            Some(collection) => Ok(Some(collection)),
            None if add_if_not_exists => {
                self.log.write(
                    LogLevel::COMMAND,
                    format_args!("create new collection '{}'", name),
                );
                self.collections().add(name).map(Some)
            }
            None => Ok(None),
        }
    }
}

/// Embedded document store over one datafile.
///
/// Every call runs as a single transaction under one engine-wide lock, so
/// calls from different threads are applied one after another.
pub struct Engine {
    inner: Mutex<EngineInner>,
    log: Logger,
}

impl Engine {
    /// Open an engine over `disk` with the default settings
    pub fn new<D: DiskService + 'static>(disk: D) -> EngineResult<Self> {
        Self::with_config(disk, EngineConfig::default())
    }

    /// Open the datafile named by `config.filename`
    pub fn open(config: EngineConfig) -> EngineResult<Self> {
        let filename = config.filename.clone().ok_or_else(|| {
            EngineError::InvalidArgument("no filename in engine configuration".to_string())
        })?;
        let disk = FileDiskService::with_journal(filename, config.journal);
        Self::with_config(disk, config)
    }

    /// Open `disk`, undo any interrupted commit and initialize a new datafile.
    /// Journaling follows the disk's own setting; `config.journal` is not
    /// consulted here.
    pub fn with_config<D: DiskService + 'static>(
        mut disk: D,
        config: EngineConfig,
    ) -> EngineResult<Self> {
        let log = Logger::new(config.log_level());

        disk.open()?;
        transaction::recover(&mut disk, &log)?;

        let mut pager = Pager::new(Box::new(disk), config.cache_size, log.clone());
        let mut trans = TransactionService::new(log.clone());

        if pager.page_count()? == 0 {
            trans.begin(&mut pager)?;
            let init = pager
                .store(&HeaderPage::new())
                .and_then(|_| trans.commit(&mut pager));
            if let Err(error) = init {
                log.write(LogLevel::ERROR, format_args!("cannot initialize datafile: {}", error));
                trans.rollback(&mut pager)?;
                return Err(error);
            }
        } else {
            // checks the magic and version
            pager.header()?;
        }

        Ok(Self {
            inner: Mutex::new(EngineInner { pager, trans }),
            log,
        })
    }

    pub fn log(&self) -> &Logger {
        &self.log
    }

    /// Run `action` as one transaction.
    ///
    /// The collection `name` is resolved first (and created when
    /// `add_if_not_exists` is set). `Ok` commits and returns the action's
    /// value. Any error is logged and rolled back, then returned unchanged; if
    /// the rollback fails too, both errors come back as
    /// [`EngineError::TransactionAborted`]. A panic in `action` rolls back
    /// before it propagates.
    pub fn transaction<T, F>(
        &self,
        name: Option<&str>,
        add_if_not_exists: bool,
        action: F,
    ) -> EngineResult<T>
    where
        F: FnOnce(&mut Session<'_>, Option<CollectionPage>) -> EngineResult<T>,
    {
        let mut guard = self.inner.lock();
        let EngineInner { pager, trans } = &mut *guard;

        trans.begin(pager)?;

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            Self::run(pager, &self.log, name, add_if_not_exists, action)
                .and_then(|value| trans.commit(pager).map(|_| value))
        }));

        let result = match outcome {
            Ok(result) => result,
            Err(payload) => {
                self.log
                    .write(LogLevel::ERROR, "transaction panicked, rolling back");
                if let Err(rollback) = trans.rollback(pager) {
                    self.log
                        .write(LogLevel::ERROR, format_args!("rollback failed: {}", rollback));
                }
                panic::resume_unwind(payload);
            }
        };

        match result {
            Ok(value) => Ok(value),
            Err(error) => {
                self.log.write(LogLevel::ERROR, &error);
                match trans.rollback(pager) {
                    Ok(()) => Err(error),
                    Err(rollback) => {
                        self.log
                            .write(LogLevel::ERROR, format_args!("rollback failed: {}", rollback));
                        Err(EngineError::TransactionAborted {
                            source: Box::new(error),
                            rollback: Box::new(rollback),
                        })
                    }
                }
            }
        }
    }

    fn run<T, F>(
        pager: &mut Pager,
        log: &Logger,
        name: Option<&str>,
        add_if_not_exists: bool,
        action: F,
    ) -> EngineResult<T>
    where
        F: FnOnce(&mut Session<'_>, Option<CollectionPage>) -> EngineResult<T>,
    {
        let mut session = Session { pager, log };
        let collection = session.resolve_collection(name, add_if_not_exists)?;
        action(&mut session, collection)
    }

    // ========== Documents ==========

    /// Insert a document, creating the collection when needed. Returns its `_id`.
    pub fn insert(&self, collection: &str, document: Value) -> EngineResult<IndexKey> {
        self.transaction(Some(collection), true, |session, col| {
            let mut col = resolved(collection, col)?;
            session.collections().insert_document(&mut col, document)
        })
    }

    /// Insert every document in one transaction: all of them or none.
    pub fn insert_bulk<I>(&self, collection: &str, documents: I) -> EngineResult<Vec<IndexKey>>
    where
        I: IntoIterator<Item = Value>,
    {
        self.transaction(Some(collection), true, |session, col| {
            let mut col = resolved(collection, col)?;
            let mut collections = session.collections();
            documents
                .into_iter()
                .map(|document| collections.insert_document(&mut col, document))
                .collect()
        })
    }

    /// Replace the document with the same `_id`. Returns `false` when absent.
    pub fn update(&self, collection: &str, document: Value) -> EngineResult<bool> {
        self.transaction(Some(collection), false, |session, col| match col {
            Some(mut col) => session.collections().update_document(&mut col, document),
            None => Ok(false),
        })
    }

    /// Delete the document with `_id` equal to `id`. Returns `false` when absent.
    pub fn delete(&self, collection: &str, id: impl Into<IndexKey>) -> EngineResult<bool> {
        let id = id.into();
        self.transaction(Some(collection), false, |session, col| match col {
            Some(mut col) => session.collections().delete_document(&mut col, &id),
            None => Ok(false),
        })
    }

    /// Documents whose `field` matches `query`. A missing collection holds none.
    pub fn find(
        &self,
        collection: &str,
        field: &str,
        query: IndexQuery,
    ) -> EngineResult<Vec<Value>> {
        self.transaction(Some(collection), false, |session, col| match col {
            Some(col) => session.collections().find_documents(&col, field, &query),
            None => Ok(Vec::new()),
        })
    }

    pub fn find_one(
        &self,
        collection: &str,
        field: &str,
        query: IndexQuery,
    ) -> EngineResult<Option<Value>> {
        Ok(self.find(collection, field, query)?.into_iter().next())
    }

    pub fn find_by_id(
        &self,
        collection: &str,
        id: impl Into<IndexKey>,
    ) -> EngineResult<Option<Value>> {
        let id = id.into();
        self.transaction(Some(collection), false, |session, col| match col {
            Some(col) => session.collections().find_by_id(&col, &id),
            None => Ok(None),
        })
    }

    pub fn count(&self, collection: &str) -> EngineResult<u64> {
        self.transaction(Some(collection), false, |_, col| {
            Ok(col.map_or(0, |col| col.document_count))
        })
    }

    /// Raw bytes of a stored document
    pub fn read_raw(&self, collection: &str, document: DocumentRef) -> EngineResult<Vec<u8>> {
        self.transaction(Some(collection), false, |session, col| {
            resolved(collection, col)?;
            session.data().read(document)
        })
    }

    // ========== Schema ==========

    /// Create an index on `field`, creating the collection when needed.
    /// Returns `false` when the index already exists.
    pub fn ensure_index(&self, collection: &str, field: &str, unique: bool) -> EngineResult<bool> {
        self.transaction(Some(collection), true, |session, col| {
            let mut col = resolved(collection, col)?;
            session.collections().ensure_index(&mut col, field, unique)
        })
    }

    pub fn drop_index(&self, collection: &str, field: &str) -> EngineResult<bool> {
        self.transaction(Some(collection), false, |session, col| match col {
            Some(mut col) => session.collections().drop_index(&mut col, field),
            None => Ok(false),
        })
    }

    pub fn drop_collection(&self, collection: &str) -> EngineResult<bool> {
        self.transaction(None, false, |session, _| {
            let dropped = session.collections().drop(collection)?;
            if dropped {
                self.log.write(
                    LogLevel::COMMAND,
                    format_args!("drop collection '{}'", collection),
                );
            }
            Ok(dropped)
        })
    }

    pub fn collection_names(&self) -> EngineResult<Vec<String>> {
        self.transaction(None, false, |session, _| session.collections().names())
    }

    /// Release the datafile. Only committed pages reach the disk.
    pub fn dispose(self) -> EngineResult<()> {
        let mut inner = self.inner.into_inner();
        inner.pager.dispose()
    }
}

fn resolved(name: &str, collection: Option<CollectionPage>) -> EngineResult<CollectionPage> {
    collection.ok_or_else(|| EngineError::NotFound(format!("collection '{}'", name)))
}
