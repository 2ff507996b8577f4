use anyhow::Result;
use parking_lot::Mutex;
use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::{Field, Value};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};

use crate::tantivy_utils::{build_schema, register_tokenizer, ID_FIELD, TEXT_FIELD};

const WRITER_HEAP_BYTES: usize = 15_000_000;

/// BM25 index over `(id, text)` pairs held entirely in RAM.
///
/// Writes are last-write-wins on `id`: the previous document is deleted in
/// the same commit that adds the new one.
pub struct LexicalIndex {
	index: Index,
	reader: IndexReader,
	writer: Mutex<IndexWriter>,
	id_field: Field,
	text_field: Field,
}

impl LexicalIndex {
	pub fn new() -> Result<Self> {
		let schema = build_schema();
		let index = Index::create_in_ram(schema.clone());
		register_tokenizer(&index);
		let writer = index.writer_with_num_threads(1, WRITER_HEAP_BYTES)?;
		let reader = index.reader_builder().reload_policy(ReloadPolicy::Manual).try_into()?;
		Ok(Self {
			id_field: schema.get_field(ID_FIELD)?,
			text_field: schema.get_field(TEXT_FIELD)?,
			index,
			reader,
			writer: Mutex::new(writer),
		})
	}

	pub fn upsert<'a, I>(&self, docs: I) -> Result<usize>
	where
		I: IntoIterator<Item = (&'a str, &'a str)>,
	{
		let mut writer = self.writer.lock();
		let mut count = 0;
		for (id, text) in docs {
			writer.delete_term(Term::from_field_text(self.id_field, id));
			writer.add_document(doc!(self.id_field => id.to_string(), self.text_field => text.to_string()))?;
			count += 1;
		}
		writer.commit()?;
		self.reader.reload()?;
		tracing::debug!(count, "lexical index committed");
		Ok(count)
	}

	pub fn len(&self) -> usize {
		self.reader.searcher().num_docs() as usize
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Top `k` ids by BM25 score, best first. Query syntax errors are
	/// tolerated: whatever parses is searched.
	pub fn search(&self, query: &str, k: usize) -> Result<Vec<(String, f32)>> {
		if k == 0 || query.trim().is_empty() {
			return Ok(Vec::new());
		}
		let searcher = self.reader.searcher();
		let qp = QueryParser::for_index(&self.index, vec![self.text_field]);
		let (q, errors) = qp.parse_query_lenient(query);
		if !errors.is_empty() {
			tracing::debug!(?errors, query, "lenient query parse");
		}
		let top_docs = searcher.search(&q, &TopDocs::with_limit(k))?;
		let mut hits = Vec::with_capacity(top_docs.len());
		for (score, addr) in top_docs {
			let doc: TantivyDocument = searcher.doc(addr)?;
			let id = doc.get_first(self.id_field).and_then(|v| v.as_str()).unwrap_or("").to_string();
			hits.push((id, score));
		}
		Ok(hits)
	}
}
