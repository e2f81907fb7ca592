use crate::aggregation::Aggregations;
use crate::bulk::{BulkItemOutcome, BulkResponse};
use crate::config::AppConfig;
use crate::error::AppError;
use crate::item::Item;
use crate::page::Page;
use crate::query::{BoolQuery, NativeQuery, Query, Sort, SortOrder};
use crate::repository::ItemRepository;
use async_trait::async_trait;
use std::cmp::Ordering;
use std::ops::Bound;
use std::sync::{Arc, Mutex};
use tantivy::collector::{Count, TopDocs};
use tantivy::directory::MmapDirectory;
use tantivy::query::{
    AllQuery, BooleanQuery, EmptyQuery, Occur, Query as TantivyQuery, RangeQuery, TermQuery,
};
use tantivy::schema::{
    Document, Field, FieldType, IndexRecordOption, Schema, Term, INDEXED, STORED, STRING, TEXT,
};
use tantivy::tokenizer::TokenStream;
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, TantivyError};

const WRITER_HEAP_BYTES: usize = 50_000_000;

#[derive(Debug, Clone, Copy)]
struct ItemFields {
    id: Field,
    title: Field,
    category: Field,
    brand: Field,
    price: Field,
    image_url: Field,
}

fn item_schema() -> (Schema, ItemFields) {
    let mut schema_builder = Schema::builder();

    let fields = ItemFields {
        id: schema_builder.add_i64_field("id", INDEXED | STORED),
        title: schema_builder.add_text_field("title", TEXT | STORED),
        category: schema_builder.add_text_field("category", STRING | STORED),
        brand: schema_builder.add_text_field("brand", STRING | STORED),
        price: schema_builder.add_f64_field("price", INDEXED | STORED),
        image_url: schema_builder.add_text_field("imageUrl", STORED),
    };

    (schema_builder.build(), fields)
}

/// Embedded backend. Every write commits and reloads the reader, so it is
/// visible to search as soon as the call returns.
pub struct TantivySearcher {
    inner: Arc<Inner>,
}

struct Inner {
    index: Index,
    schema: Schema,
    fields: ItemFields,
    reader: IndexReader,
    writer: Mutex<IndexWriter>,
}

impl TantivySearcher {
    pub fn new(config: &AppConfig) -> Result<Self, AppError> {
        let (schema, fields) = item_schema();

        let index = match &config.tantivy_index_path {
            Some(index_path) => {
                log::debug!("Initializing Tantivy searcher with index path: {}", index_path);
                std::fs::create_dir_all(index_path)?;
                let directory = MmapDirectory::open(index_path).map_err(TantivyError::from)?;
                Index::open_or_create(directory, schema.clone())?
            }
            None => {
                log::debug!("Initializing in-memory Tantivy searcher.");
                Index::create_in_ram(schema.clone())
            }
        };

        let reader: IndexReader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;
        let writer = index.writer(WRITER_HEAP_BYTES)?;
        log::debug!("Tantivy searcher initialized successfully.");

        Ok(Self {
            inner: Arc::new(Inner {
                index,
                schema,
                fields,
                reader,
                writer: Mutex::new(writer),
            }),
        })
    }

    /// In-memory index, independent of any configuration.
    pub fn in_memory() -> Result<Self, AppError> {
        Self::new(&AppConfig {
            tantivy_index_path: None,
            ..AppConfig::default()
        })
    }

    async fn run<T, F>(&self, work: F) -> Result<T, AppError>
    where
        T: Send + 'static,
        F: FnOnce(&Inner) -> Result<T, AppError> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || work(&inner)).await?
    }
}

impl Inner {
    fn field(&self, name: &str) -> Result<Field, AppError> {
        self.schema
            .get_field(name)
            .ok_or_else(|| AppError::UnknownField(name.to_string()))
    }

    fn lock_writer(&self) -> Result<std::sync::MutexGuard<'_, IndexWriter>, AppError> {
        self.writer
            .lock()
            .map_err(|_| AppError::Generic("index writer lock poisoned".to_string()))
    }

    fn id_term(&self, id: i64) -> Term {
        Term::from_field_i64(self.fields.id, id)
    }

    fn to_document(&self, item: &Item) -> Document {
        let mut doc = Document::default();
        doc.add_i64(self.fields.id, item.id);
        doc.add_text(self.fields.title, &item.title);
        doc.add_text(self.fields.category, &item.category);
        doc.add_text(self.fields.brand, &item.brand);
        doc.add_f64(self.fields.price, item.price);
        doc.add_text(self.fields.image_url, &item.image_url);
        doc
    }

    fn to_item(&self, doc: &Document) -> Result<Item, AppError> {
        let text = |field: Field| {
            doc.get_first(field)
                .and_then(|v| v.as_text())
                .unwrap_or_default()
                .to_string()
        };
        let id = doc
            .get_first(self.fields.id)
            .and_then(|v| v.as_i64())
            .ok_or_else(|| AppError::MalformedResponse("stored document has no id".to_string()))?;
        let price = doc
            .get_first(self.fields.price)
            .and_then(|v| v.as_f64())
            .ok_or_else(|| {
                AppError::MalformedResponse(format!("stored document {} has no price", id))
            })?;

        Ok(Item {
            id,
            title: text(self.fields.title),
            category: text(self.fields.category),
            brand: text(self.fields.brand),
            price,
            image_url: text(self.fields.image_url),
        })
    }

    fn exists(&self, id: i64) -> Result<bool, AppError> {
        let query = TermQuery::new(self.id_term(id), IndexRecordOption::Basic);
        let count = self.reader.searcher().search(&query, &Count)?;
        Ok(count > 0)
    }

    fn commit(&self, writer: &mut IndexWriter) -> Result<(), AppError> {
        writer.commit()?;
        self.reader.reload()?;
        log::trace!("Tantivy index writer committed changes.");
        Ok(())
    }

    /// Replaces any document with the same id. Returns the engine-style result.
    fn upsert(&self, writer: &mut IndexWriter, item: &Item) -> Result<&'static str, AppError> {
        let existed = self.exists(item.id)?;
        writer.delete_term(self.id_term(item.id));
        writer.add_document(self.to_document(item))?;
        Ok(if existed { "updated" } else { "created" })
    }

    fn save(&self, item: &Item) -> Result<(), AppError> {
        let mut writer = self.lock_writer()?;
        let result = self.upsert(&mut writer, item)?;
        self.commit(&mut writer)?;
        log::debug!("Item {} {} in Tantivy index", item.id, result);
        Ok(())
    }

    fn save_all(&self, items: &[Item]) -> Result<BulkResponse, AppError> {
        let mut writer = self.lock_writer()?;
        let mut outcomes = Vec::with_capacity(items.len());
        for item in items {
            let result = self.upsert(&mut writer, item)?;
            outcomes.push(BulkItemOutcome {
                id: item.document_id(),
                status: if result == "created" { 201 } else { 200 },
                result: Some(result.to_string()),
                error: None,
            });
        }
        self.commit(&mut writer)?;
        log::debug!("Bulk indexed {} items into Tantivy index", items.len());
        Ok(BulkResponse::from_items(outcomes))
    }

    fn find_by_id(&self, id: i64) -> Result<Option<Item>, AppError> {
        let searcher = self.reader.searcher();
        let query = TermQuery::new(self.id_term(id), IndexRecordOption::Basic);
        let top_docs = searcher.search(&query, &TopDocs::with_limit(1))?;
        match top_docs.first() {
            Some((_score, doc_address)) => {
                let doc = searcher.doc(*doc_address)?;
                Ok(Some(self.to_item(&doc)?))
            }
            None => Ok(None),
        }
    }

    fn delete_by_id(&self, id: i64) -> Result<bool, AppError> {
        let mut writer = self.lock_writer()?;
        if !self.exists(id)? {
            return Ok(false);
        }
        writer.delete_term(self.id_term(id));
        self.commit(&mut writer)?;
        log::debug!("Deleted item {} from Tantivy index", id);
        Ok(true)
    }

    fn delete_all(&self) -> Result<(), AppError> {
        let mut writer = self.lock_writer()?;
        writer.delete_all_documents()?;
        self.commit(&mut writer)
    }

    fn compile(&self, query: &Query) -> Result<Box<dyn TantivyQuery>, AppError> {
        match query {
            Query::MatchAll => Ok(Box::new(AllQuery)),
            Query::Match { field: name, text } => self.compile_match(name, text),
            Query::Term { field: name, value } => {
                let field = self.field(name)?;
                let term = match self.schema.get_field_entry(field).field_type() {
                    FieldType::Str(_) => Term::from_field_text(field, value),
                    FieldType::I64(_) => Term::from_field_i64(
                        field,
                        value
                            .parse()
                            .map_err(|_| AppError::invalid_field(name, "expected an integer"))?,
                    ),
                    FieldType::F64(_) => Term::from_field_f64(
                        field,
                        value
                            .parse()
                            .map_err(|_| AppError::invalid_field(name, "expected a number"))?,
                    ),
                    _ => return Err(AppError::invalid_field(name, "term queries unsupported")),
                };
                Ok(Box::new(TermQuery::new(term, IndexRecordOption::Basic)))
            }
            Query::Range {
                field: name,
                gte,
                lte,
            } => {
                let field = self.field(name)?;
                match self.schema.get_field_entry(field).field_type() {
                    FieldType::F64(_) => Ok(Box::new(RangeQuery::new_f64_bounds(
                        field,
                        included(*gte),
                        included(*lte),
                    ))),
                    FieldType::I64(_) => Ok(Box::new(RangeQuery::new_i64_bounds(
                        field,
                        included(gte.map(|v| v.ceil() as i64)),
                        included(lte.map(|v| v.floor() as i64)),
                    ))),
                    _ => Err(AppError::invalid_field(name, "range queries need a numeric field")),
                }
            }
            Query::Bool(b) => self.compile_bool(b),
        }
    }

    /// Analyzes `text` with the field's tokenizer and matches any resulting
    /// term. The text is never read as query syntax. Numeric fields fall
    /// back to an exact term.
    fn compile_match(&self, name: &str, text: &str) -> Result<Box<dyn TantivyQuery>, AppError> {
        let field = self.field(name)?;
        match self.schema.get_field_entry(field).field_type() {
            FieldType::Str(options) => {
                if options.get_indexing_options().is_none() {
                    return Err(AppError::invalid_field(name, "field is not indexed"));
                }
            }
            _ => {
                return self.compile(&Query::Term {
                    field: name.to_string(),
                    value: text.trim().to_string(),
                })
            }
        }

        let analyzer = self.index.tokenizer_for_field(field)?;
        let mut terms = Vec::new();
        let mut stream = analyzer.token_stream(text);
        stream.process(&mut |token| terms.push(Term::from_field_text(field, &token.text)));

        if terms.is_empty() {
            return Ok(Box::new(EmptyQuery));
        }
        let clauses: Vec<(Occur, Box<dyn TantivyQuery>)> = terms
            .into_iter()
            .map(|term| {
                let query: Box<dyn TantivyQuery> =
                    Box::new(TermQuery::new(term, IndexRecordOption::WithFreqs));
                (Occur::Should, query)
            })
            .collect();
        Ok(Box::new(BooleanQuery::new(clauses)))
    }

    fn compile_bool(&self, b: &BoolQuery) -> Result<Box<dyn TantivyQuery>, AppError> {
        let mut clauses: Vec<(Occur, Box<dyn TantivyQuery>)> = Vec::new();
        for (occur, queries) in [
            (Occur::Must, &b.must),
            (Occur::Must, &b.filter),
            (Occur::Should, &b.should),
            (Occur::MustNot, &b.must_not),
        ] {
            for q in queries {
                clauses.push((occur, self.compile(q)?));
            }
        }

        // a bool made only of exclusions matches everything else
        if b.must.is_empty() && b.filter.is_empty() && b.should.is_empty() {
            clauses.push((Occur::Must, Box::new(AllQuery)));
        }

        Ok(Box::new(BooleanQuery::new(clauses)))
    }

    /// Every match, best score first.
    fn collect(&self, query: &Query) -> Result<Vec<Item>, AppError> {
        let compiled = self.compile(query)?;
        let searcher = self.reader.searcher();

        let total = searcher.search(&*compiled, &Count)?;
        if total == 0 {
            return Ok(Vec::new());
        }

        let top_docs = searcher.search(&*compiled, &TopDocs::with_limit(total))?;
        let mut items = Vec::with_capacity(top_docs.len());
        for (_score, doc_address) in top_docs {
            let retrieved_doc = searcher.doc(doc_address)?;
            items.push(self.to_item(&retrieved_doc)?);
        }
        Ok(items)
    }

    fn search_page(&self, query: &NativeQuery) -> Result<Page<Item>, AppError> {
        let mut items = self.collect(&query.query)?;
        for sort in &query.sorts {
            self.field(&sort.field)?;
        }
        if !query.sorts.is_empty() {
            items.sort_by(|a, b| compare_by(&query.sorts, a, b));
        }

        let aggregations = if query.aggregations.is_empty() {
            None
        } else {
            let refs: Vec<&Item> = items.iter().collect();
            Some(Aggregations::compute(&query.aggregations, &refs)?)
        };

        let total = items.len() as u64;
        let content = if query.fetch_hits {
            items
                .into_iter()
                .skip(query.pageable.offset())
                .take(query.pageable.size)
                .collect()
        } else {
            Vec::new()
        };

        let page = Page::new(content, query.pageable.page, query.pageable.size, total);
        Ok(match aggregations {
            Some(aggregations) => page.with_aggregations(aggregations),
            None => page,
        })
    }
}

fn included<T>(bound: Option<T>) -> Bound<T> {
    match bound {
        Some(v) => Bound::Included(v),
        None => Bound::Unbounded,
    }
}

fn compare_by(sorts: &[Sort], a: &Item, b: &Item) -> Ordering {
    for sort in sorts {
        let ordering = match (a.field(&sort.field), b.field(&sort.field)) {
            (Some(x), Some(y)) => x.total_cmp(&y),
            _ => Ordering::Equal,
        };
        let ordering = match sort.order {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

#[async_trait]
impl ItemRepository for TantivySearcher {
    async fn create_index(&self) -> Result<bool, AppError> {
        // Tantivy creates the index on new, so this is a no-op
        log::debug!("Tantivy index existence is handled during initialization.");
        Ok(false)
    }

    async fn put_mapping(&self) -> Result<(), AppError> {
        log::debug!("Tantivy schema is fixed at initialization.");
        Ok(())
    }

    /// The index itself lives as long as the searcher, so this clears it.
    /// Returns `false` when it was already empty.
    async fn delete_index(&self) -> Result<bool, AppError> {
        let had_documents = self
            .run(|inner| {
                let had_documents = inner.reader.searcher().num_docs() > 0;
                inner.delete_all()?;
                Ok(had_documents)
            })
            .await?;
        log::info!("Tantivy index cleared.");
        Ok(had_documents)
    }

    async fn refresh(&self) -> Result<(), AppError> {
        self.run(|inner| Ok(inner.reader.reload()?)).await
    }

    async fn save(&self, item: &Item) -> Result<(), AppError> {
        let item = item.clone();
        self.run(move |inner| inner.save(&item)).await
    }

    async fn save_all(&self, items: &[Item]) -> Result<BulkResponse, AppError> {
        if items.is_empty() {
            return Ok(BulkResponse::default());
        }
        let items = items.to_vec();
        self.run(move |inner| inner.save_all(&items)).await
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Item>, AppError> {
        self.run(move |inner| inner.find_by_id(id)).await
    }

    async fn exists_by_id(&self, id: i64) -> Result<bool, AppError> {
        self.run(move |inner| inner.exists(id)).await
    }

    async fn count(&self) -> Result<u64, AppError> {
        self.run(|inner| Ok(inner.reader.searcher().num_docs())).await
    }

    async fn find_all(&self) -> Result<Vec<Item>, AppError> {
        let items = self.run(|inner| inner.collect(&Query::MatchAll)).await?;
        log::debug!("Found {} items in Tantivy index", items.len());
        Ok(items)
    }

    async fn search(&self, query: &Query) -> Result<Vec<Item>, AppError> {
        log::debug!("Searching Tantivy with query: {:?}", query);
        let query = query.clone();
        self.run(move |inner| inner.collect(&query)).await
    }

    async fn search_page(&self, query: &NativeQuery) -> Result<Page<Item>, AppError> {
        log::debug!(
            "Searching Tantivy page {} (size {}) with query: {:?}",
            query.pageable.page,
            query.pageable.size,
            query.query
        );
        let query = query.clone();
        self.run(move |inner| inner.search_page(&query)).await
    }

    async fn delete_by_id(&self, id: i64) -> Result<bool, AppError> {
        self.run(move |inner| inner.delete_by_id(id)).await
    }

    async fn delete_all(&self) -> Result<(), AppError> {
        self.run(|inner| inner.delete_all()).await
    }
}
