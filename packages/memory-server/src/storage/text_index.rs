//! Full-text side-index backed by `tantivy`, rebuilt and refreshed by the
//! Index Worker. The Store's redb tables remain authoritative; this index is
//! a disposable acceleration structure the `rebuild_index` task can always
//! reconstruct from scratch.

use std::path::Path as FsPath;

use memory_palace_core::MemoryId;
use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::{Schema, FAST, STORED, TEXT};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error(transparent)]
    Tantivy(#[from] tantivy::TantivyError),
    #[error(transparent)]
    Query(#[from] tantivy::query::QueryParserError),
    #[error("index_enqueue_dropped")]
    QueueFull,
}

/// One keyword-stage hit: the memory id and its BM25 score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextHit {
    pub memory_id: MemoryId,
    pub score: f32,
}

/// Thin wrapper over a tantivy index with a single `{id, content}` schema,
/// used by the Retrieval Pipeline's keyword stage.
pub struct TextIndex {
    index: Index,
    reader: IndexReader,
    id_field: tantivy::schema::Field,
    content_field: tantivy::schema::Field,
}

impl TextIndex {
    fn schema() -> (Schema, tantivy::schema::Field, tantivy::schema::Field) {
        let mut builder = Schema::builder();
        let id_field = builder.add_text_field("id", STORED | FAST);
        let content_field = builder.add_text_field("content", TEXT | STORED);
        (builder.build(), id_field, content_field)
    }

    /// Opens a persistent index directory, creating it if absent.
    pub fn open_or_create(dir: impl AsRef<FsPath>) -> Result<Self, IndexError> {
        std::fs::create_dir_all(&dir).map_err(|e| {
            tantivy::TantivyError::IoError(std::sync::Arc::new(e)).into()
        })?;
        let (schema, id_field, content_field) = Self::schema();
        let mmap_dir = tantivy::directory::MmapDirectory::open(&dir)?;
        let index = Index::open_or_create(mmap_dir, schema)?;
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()?;
        Ok(Self {
            index,
            reader,
            id_field,
            content_field,
        })
    }

    /// In-memory index, used in tests and for ephemeral `memory-paladmin`
    /// runs without a configured store path.
    pub fn in_memory() -> Result<Self, IndexError> {
        let (schema, id_field, content_field) = Self::schema();
        let index = Index::create_in_ram(schema);
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()?;
        Ok(Self {
            index,
            reader,
            id_field,
            content_field,
        })
    }

    /// Wipes and rewrites every document. Used by `rebuild_index`.
    pub fn rebuild<'a>(&self, documents: impl Iterator<Item = (MemoryId, &'a str)>) -> Result<(), IndexError> {
        let mut writer: IndexWriter = self.index.writer(32 * 1024 * 1024)?;
        writer.delete_all_documents()?;
        for (id, content) in documents {
            writer.add_document(doc!(
                self.id_field => id.to_string(),
                self.content_field => content,
            ))?;
        }
        writer.commit()?;
        self.reader.reload()?;
        Ok(())
    }

    /// Re-indexes a single memory, replacing any prior document for the same
    /// id. Idempotent: running it twice with the same content is a no-op in
    /// effect.
    pub fn reindex_one(&self, id: MemoryId, content: &str) -> Result<(), IndexError> {
        let mut writer: IndexWriter = self.index.writer(8 * 1024 * 1024)?;
        let term = tantivy::Term::from_field_text(self.id_field, &id.to_string());
        writer.delete_term(term);
        writer.add_document(doc!(
            self.id_field => id.to_string(),
            self.content_field => content,
        ))?;
        writer.commit()?;
        self.reader.reload()?;
        Ok(())
    }

    /// BM25-ranked keyword search, returning up to `limit` hits.
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<TextHit>, IndexError> {
        let searcher = self.reader.searcher();
        let parser = QueryParser::for_index(&self.index, vec![self.content_field]);
        let parsed = parser.parse_query(query)?;
        let top = searcher.search(&parsed, &TopDocs::with_limit(limit))?;

        let mut hits = Vec::with_capacity(top.len());
        for (score, addr) in top {
            let doc: TantivyDocument = searcher.doc(addr)?;
            if let Some(id_value) = doc.get_first(self.id_field) {
                if let Some(id_str) = id_value.as_str() {
                    if let Ok(id) = id_str.parse::<MemoryId>() {
                        hits.push(TextHit { memory_id: id, score });
                    }
                }
            }
        }
        Ok(hits)
    }
}
