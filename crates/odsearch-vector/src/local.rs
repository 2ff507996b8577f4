//! Embedded index: brute-force inner product over the dense vectors plus a
//! tantivy BM25 index over the text, fused in process.
//!
//! Meant for development, tests and small catalogues. It honors the same
//! contract as the remote service, including rejecting a `metadata` field
//! the collection schema does not declare.
//!
//! [`LocalIndex::open`] keeps the state in a JSON snapshot inside a data
//! directory, rewritten after every change. The BM25 side is rebuilt from
//! the stored texts on open. [`LocalIndex::new`] is memory only.

use std::collections::{BTreeMap, HashMap};
use std::f32::consts::PI;
use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use odsearch_core::filter::Filter;
use odsearch_core::schema::CollectionSpec;
use odsearch_core::traits::{AnnData, AnnRequest, CollectionAdmin, HybridRequest, UpsertRow, VectorIndex};
use odsearch_core::types::{CollectionInfo, Hit, Metadata, RawHit};
use odsearch_core::{Error, Result};
use odsearch_text::LexicalIndex;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::schema::{DENSE_FIELD, ID_FIELD, METADATA_FIELD, TEXT_FIELD};

const SNAPSHOT_FILE: &str = "local_index.json";

#[derive(Serialize, Deserialize)]
struct Point {
    text: String,
    dense: Vec<f32>,
    metadata: Option<Metadata>,
}

struct LocalCollection {
    spec: CollectionSpec,
    points: HashMap<String, Point>,
    lexical: LexicalIndex,
    loaded: bool,
}

impl LocalCollection {
    fn has_metadata(&self) -> bool {
        self.spec.has_field(METADATA_FIELD)
    }

    fn passes(&self, id: &str, filter: Option<&Filter>) -> Result<bool> {
        let Some(f) = filter else { return Ok(true) };
        let meta = self.points.get(id).and_then(|p| p.metadata.as_ref());
        f.matches(meta).ok_or_else(|| {
            Error::UnsupportedOperation("the embedded index cannot evaluate raw filter expressions".to_string())
        })
    }

    /// Normalized scores of one sub-request for query `q`.
    fn sub_scores(&self, req: &AnnRequest, q: usize) -> Result<Vec<(String, f32)>> {
        let mut scored = match &req.data {
            AnnData::Dense(vectors) => {
                let Some(query) = vectors.get(q) else { return Ok(Vec::new()) };
                let mut out = Vec::new();
                for (id, p) in &self.points {
                    if self.passes(id, req.filter.as_ref())? {
                        out.push((id.clone(), normalize_ip(dot(query, &p.dense))));
                    }
                }
                out
            }
            AnnData::Text(texts) => {
                let Some(query) = texts.get(q) else { return Ok(Vec::new()) };
                let k = if req.filter.is_some() { self.points.len() } else { req.limit };
                let hits = self
                    .lexical
                    .search(query, k)
                    .map_err(|e| Error::provider("bm25_search", &self.spec.name, e))?;
                let mut out = Vec::with_capacity(hits.len());
                for (id, score) in hits {
                    if self.passes(&id, req.filter.as_ref())? {
                        out.push((id, normalize_bm25(score)));
                    }
                }
                out
            }
        };
        sort_scored(&mut scored);
        scored.truncate(req.limit);
        Ok(scored)
    }

    fn hit(&self, id: &str, distance: Option<f32>, output_fields: &[String]) -> Option<RawHit> {
        let p = self.points.get(id)?;
        let wants = |f: &str| output_fields.iter().any(|o| o == f);
        Some(RawHit::Entity(Hit {
            id: id.to_string(),
            distance,
            text: wants(TEXT_FIELD).then(|| p.text.clone()),
            metadata: if wants(METADATA_FIELD) { p.metadata.clone() } else { None },
            dense: wants(DENSE_FIELD).then(|| p.dense.clone()),
        }))
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Inner product in (-inf, inf) mapped to (0, 1).
fn normalize_ip(s: f32) -> f32 {
    0.5 + s.atan() / PI
}

/// BM25 in [0, inf) mapped to [0, 1).
fn normalize_bm25(s: f32) -> f32 {
    2.0 * s.atan() / PI
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    collections: Vec<StoredRef<'a>>,
    aliases: &'a BTreeMap<String, String>,
}

#[derive(Serialize)]
struct StoredRef<'a> {
    spec: &'a CollectionSpec,
    loaded: bool,
    points: &'a HashMap<String, Point>,
}

#[derive(Deserialize)]
struct Snapshot {
    collections: Vec<StoredCollection>,
    #[serde(default)]
    aliases: BTreeMap<String, String>,
}

#[derive(Deserialize)]
struct StoredCollection {
    spec: CollectionSpec,
    loaded: bool,
    points: HashMap<String, Point>,
}

fn sort_scored(v: &mut [(String, f32)]) {
    v.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
}

#[derive(Default)]
pub struct LocalIndex {
    collections: RwLock<HashMap<String, LocalCollection>>,
    /// alias -> collection
    aliases: RwLock<BTreeMap<String, String>>,
    snapshot: Option<PathBuf>,
    persist_lock: Mutex<()>,
}

impl LocalIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens (or starts) an index persisted under `dir`.
    pub fn open(dir: &Path) -> Result<Self> {
        let target = dir.display().to_string();
        fs::create_dir_all(dir).map_err(|e| Error::provider("open", &target, e))?;
        let path = dir.join(SNAPSHOT_FILE);
        let index = Self { snapshot: Some(path.clone()), ..Self::default() };
        if !path.exists() {
            tracing::info!(path = %path.display(), "starting empty local index");
            return Ok(index);
        }

        let bytes = fs::read(&path).map_err(|e| Error::provider("open", &target, e))?;
        let snapshot: Snapshot = serde_json::from_slice(&bytes)
            .map_err(|e| Error::DataIntegrity(format!("unreadable snapshot {}: {e}", path.display())))?;
        let restored = snapshot.collections.len();
        {
            let mut collections = index.collections.write();
            for stored in snapshot.collections {
                let name = stored.spec.name.clone();
                let lexical = LexicalIndex::new().map_err(|e| Error::provider("open", &name, e))?;
                lexical
                    .upsert(stored.points.iter().map(|(id, p)| (id.as_str(), p.text.as_str())))
                    .map_err(|e| Error::provider("open", &name, e))?;
                tracing::debug!(collection = %name, documents = lexical.len(), "bm25 index rebuilt");
                collections.insert(
                    name,
                    LocalCollection { spec: stored.spec, points: stored.points, lexical, loaded: stored.loaded },
                );
            }
        }
        *index.aliases.write() = snapshot.aliases;
        tracing::info!(path = %path.display(), collections = restored, "local index restored");
        Ok(index)
    }

    /// Rewrites the snapshot, if there is one. Must not be called while a
    /// collections or aliases guard is held.
    fn persist(&self) -> Result<()> {
        let Some(path) = &self.snapshot else { return Ok(()) };
        let _writer = self.persist_lock.lock();
        let bytes = {
            let collections = self.collections.read();
            let aliases = self.aliases.read();
            let mut stored: Vec<StoredRef<'_>> = collections
                .values()
                .map(|c| StoredRef { spec: &c.spec, loaded: c.loaded, points: &c.points })
                .collect();
            stored.sort_by(|a, b| a.spec.name.cmp(&b.spec.name));
            serde_json::to_vec(&SnapshotRef { collections: stored, aliases: &*aliases })
                .map_err(|e| Error::provider("persist", path.display().to_string(), e))?
        };
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, &bytes)
            .and_then(|()| fs::rename(&tmp, path))
            .map_err(|e| Error::provider("persist", path.display().to_string(), e))?;
        tracing::debug!(path = %path.display(), bytes = bytes.len(), "local index persisted");
        Ok(())
    }

    fn resolve(&self, name: &str) -> String {
        self.aliases.read().get(name).cloned().unwrap_or_else(|| name.to_string())
    }

    fn with_collection<T>(&self, name: &str, f: impl FnOnce(&LocalCollection) -> Result<T>) -> Result<T> {
        let real = self.resolve(name);
        let guard = self.collections.read();
        let c = guard.get(&real).ok_or_else(|| Error::NotFound(format!("collection '{name}'")))?;
        f(c)
    }

    fn with_collection_mut<T>(&self, name: &str, f: impl FnOnce(&mut LocalCollection) -> Result<T>) -> Result<T> {
        let real = self.resolve(name);
        let mut guard = self.collections.write();
        let c = guard.get_mut(&real).ok_or_else(|| Error::NotFound(format!("collection '{name}'")))?;
        f(c)
    }

    fn require_loaded(c: &LocalCollection) -> Result<()> {
        if c.loaded {
            Ok(())
        } else {
            Err(Error::provider("search", &c.spec.name, "collection not loaded"))
        }
    }

    fn require_metadata(c: &LocalCollection, operation: &str, fields: &[String]) -> Result<()> {
        if fields.iter().any(|f| f == METADATA_FIELD) && !c.has_metadata() {
            return Err(Error::SchemaCompatibility(format!(
                "{operation} on '{}': field {METADATA_FIELD} not exist",
                c.spec.name
            )));
        }
        Ok(())
    }

    fn aliases_of(&self, collection: &str) -> Vec<String> {
        self.aliases
            .read()
            .iter()
            .filter(|(_, target)| target.as_str() == collection)
            .map(|(alias, _)| alias.clone())
            .collect()
    }
}

#[async_trait]
impl VectorIndex for LocalIndex {
    fn name(&self) -> &str {
        "local"
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.collections.read().keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn has_collection(&self, collection: &str) -> Result<bool> {
        let real = self.resolve(collection);
        Ok(self.collections.read().contains_key(&real))
    }

    async fn create_collection(&self, spec: &CollectionSpec) -> Result<()> {
        for field in [ID_FIELD, TEXT_FIELD, DENSE_FIELD] {
            if !spec.has_field(field) {
                return Err(Error::Validation(format!("collection '{}' needs a '{field}' field", spec.name)));
            }
        }
        {
            let mut guard = self.collections.write();
            if guard.contains_key(&spec.name) || self.aliases.read().contains_key(&spec.name) {
                return Err(Error::provider("create_collection", &spec.name, "collection already exists"));
            }
            let lexical = LexicalIndex::new().map_err(|e| Error::provider("create_collection", &spec.name, e))?;
            guard.insert(
                spec.name.clone(),
                LocalCollection { spec: spec.clone(), points: HashMap::new(), lexical, loaded: true },
            );
        }
        tracing::info!(collection = %spec.name, "local collection created");
        self.persist()
    }

    async fn drop_collection(&self, collection: &str) -> Result<()> {
        let real = self.resolve(collection);
        let removed = self.collections.write().remove(&real).is_some();
        if removed {
            self.aliases.write().retain(|_, target| *target != real);
            self.persist()?;
        }
        Ok(())
    }

    async fn upsert(&self, collection: &str, rows: &[UpsertRow]) -> Result<()> {
        self.with_collection_mut(collection, |c| {
            let dim = c.spec.dense_dim().unwrap_or_default();
            let id_max = c.spec.field(ID_FIELD).and_then(|f| f.max_length);
            let text_max = c.spec.field(TEXT_FIELD).and_then(|f| f.max_length);
            for row in rows {
                if row.metadata.is_some() && !c.has_metadata() {
                    return Err(Error::SchemaCompatibility(format!(
                        "upsert on '{}': field {METADATA_FIELD} not exist",
                        c.spec.name
                    )));
                }
                if row.text_dense.len() != dim {
                    return Err(Error::provider(
                        "upsert",
                        &c.spec.name,
                        format!("vector of '{}' has dim {}, expected {dim}", row.id, row.text_dense.len()),
                    ));
                }
                if id_max.is_some_and(|m| row.id.len() > m) {
                    return Err(Error::provider("upsert", &c.spec.name, format!("id '{}' exceeds max length", row.id)));
                }
                if let Some(max) = text_max.filter(|m| row.text.len() > *m) {
                    let detail = format!("text of '{}' is {} bytes, max length {max}", row.id, row.text.len());
                    return Err(Error::provider("upsert", &c.spec.name, detail));
                }
            }
            c.lexical
                .upsert(rows.iter().map(|r| (r.id.as_str(), r.text.as_str())))
                .map_err(|e| Error::provider("upsert", &c.spec.name, e))?;
            for row in rows {
                c.points.insert(
                    row.id.clone(),
                    Point { text: row.text.clone(), dense: row.text_dense.clone(), metadata: row.metadata.clone() },
                );
            }
            tracing::debug!(collection = %c.spec.name, rows = rows.len(), total = c.points.len(), "local upsert");
            Ok(())
        })?;
        self.persist()
    }

    async fn hybrid_search(&self, collection: &str, request: &HybridRequest) -> Result<Vec<Vec<RawHit>>> {
        self.with_collection(collection, |c| {
            Self::require_loaded(c)?;
            Self::require_metadata(c, "hybrid_search", &request.output_fields)?;
            let weights = request.weights.as_array();
            let mut out = Vec::with_capacity(request.num_queries());
            for q in 0..request.num_queries() {
                let mut fused: HashMap<String, f32> = HashMap::new();
                for (i, req) in request.requests.iter().enumerate() {
                    let w = weights.get(i).copied().unwrap_or(0.0);
                    for (id, score) in c.sub_scores(req, q)? {
                        *fused.entry(id).or_insert(0.0) += w * score;
                    }
                }
                let mut ranked: Vec<(String, f32)> = fused.into_iter().collect();
                sort_scored(&mut ranked);
                ranked.truncate(request.limit);
                out.push(
                    ranked
                        .iter()
                        .filter_map(|(id, score)| c.hit(id, Some(*score), &request.output_fields))
                        .collect(),
                );
            }
            Ok(out)
        })
    }

    async fn get(&self, collection: &str, ids: &[String], output_fields: &[String]) -> Result<Vec<RawHit>> {
        self.with_collection(collection, |c| {
            Self::require_loaded(c)?;
            Self::require_metadata(c, "get", output_fields)?;
            Ok(ids.iter().filter_map(|id| c.hit(id, None, output_fields)).collect())
        })
    }
}

#[async_trait]
impl CollectionAdmin for LocalIndex {
    async fn describe(&self, collection: &str) -> Result<Value> {
        self.with_collection(collection, |c| {
            let schema = serde_json::to_value(&c.spec).map_err(|e| Error::provider("describe", collection, e))?;
            Ok(json!({ "collectionName": c.spec.name, "schema": schema, "loaded": c.loaded }))
        })
    }

    async fn collection_info(&self, collection: &str) -> Result<CollectionInfo> {
        let (name, loaded, n) =
            self.with_collection(collection, |c| Ok((c.spec.name.clone(), c.loaded, c.points.len() as u64)))?;
        let (state, state_code) = if loaded { ("LOADED", 3) } else { ("DISK", 1) };
        let aliases = self.aliases_of(&name);
        Ok(CollectionInfo { name, state: state.to_string(), state_code, n_entities: Some(n), aliases })
    }

    async fn load(&self, collection: &str) -> Result<()> {
        self.with_collection_mut(collection, |c| {
            c.loaded = true;
            Ok(())
        })?;
        self.persist()
    }

    async fn release(&self, collection: &str) -> Result<()> {
        self.with_collection_mut(collection, |c| {
            c.loaded = false;
            Ok(())
        })?;
        self.persist()
    }

    async fn rename(&self, collection: &str, new_name: &str) -> Result<()> {
        {
            let mut guard = self.collections.write();
            if guard.contains_key(new_name) {
                return Err(Error::provider("rename", collection, format!("collection '{new_name}' already exists")));
            }
            let mut c =
                guard.remove(collection).ok_or_else(|| Error::NotFound(format!("collection '{collection}'")))?;
            c.spec.name = new_name.to_string();
            guard.insert(new_name.to_string(), c);
            for target in self.aliases.write().values_mut() {
                if target.as_str() == collection {
                    *target = new_name.to_string();
                }
            }
        }
        self.persist()
    }

    async fn list_aliases(&self, collection: &str) -> Result<Vec<String>> {
        if !self.collections.read().contains_key(collection) {
            return Err(Error::NotFound(format!("collection '{collection}'")));
        }
        Ok(self.aliases_of(collection))
    }

    async fn create_alias(&self, collection: &str, alias: &str) -> Result<()> {
        if !self.collections.read().contains_key(collection) {
            return Err(Error::NotFound(format!("collection '{collection}'")));
        }
        if self.collections.read().contains_key(alias) {
            return Err(Error::provider("create_alias", alias, "a collection with that name exists"));
        }
        {
            let mut aliases = self.aliases.write();
            if let Some(existing) = aliases.get(alias) {
                if existing != collection {
                    return Err(Error::provider(
                        "create_alias",
                        alias,
                        format!("alias already points to '{existing}'"),
                    ));
                }
            }
            aliases.insert(alias.to_string(), collection.to_string());
        }
        self.persist()
    }

    async fn drop_alias(&self, alias: &str) -> Result<()> {
        let removed = self.aliases.write().remove(alias);
        match removed {
            Some(_) => self.persist(),
            None => Err(Error::NotFound(format!("alias '{alias}'"))),
        }
    }
}
