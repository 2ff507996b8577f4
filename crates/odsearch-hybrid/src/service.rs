//! Application-layer search: object-type filters, request deadlines and the
//! minimal `{id, metadata}` projection.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use odsearch_core::blocking;
use odsearch_core::filter::Filter;
use odsearch_core::types::{SearchItem, SearchResult};
use odsearch_core::{Error, Result};

use crate::retriever::Retriever;

pub struct SearchService {
    retriever: Arc<Retriever>,
    timeout: Option<Duration>,
}

impl SearchService {
    pub fn new(retriever: Arc<Retriever>) -> Self {
        Self { retriever, timeout: None }
    }

    /// Bounds every call; on expiry the in-flight embedding and index
    /// requests are dropped and `Timeout` is returned.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout.filter(|t| !t.is_zero());
        self
    }

    pub fn retriever(&self) -> &Arc<Retriever> {
        &self.retriever
    }

    /// Blank queries short-circuit to an empty result without touching the
    /// store.
    pub async fn asearch_by_query(&self, query: &str, top_k: usize, types: Option<&[String]>) -> Result<Vec<SearchResult>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        check_top_k(top_k)?;
        let filter = build_filter(types);
        tracing::debug!(query, top_k, filtered = filter.is_some(), "search by query");
        let items = self
            .deadline("search_by_query", self.retriever.aretrieve(query, top_k, filter.as_ref()))
            .await?;
        Ok(items.into_iter().map(to_result).collect())
    }

    pub async fn asearch_similar_by_id(
        &self,
        source_id: &str,
        top_k: usize,
        types: Option<&[String]>,
    ) -> Result<Vec<SearchResult>> {
        let source_id = source_id.trim();
        if source_id.is_empty() {
            return Err(Error::Validation("source_id must not be empty".to_string()));
        }
        check_top_k(top_k)?;
        let filter = build_filter(types);
        tracing::debug!(source_id, top_k, filtered = filter.is_some(), "search similar");
        let items = self
            .deadline("search_similar_by_id", self.retriever.aretrieve_similar(source_id, top_k, filter.as_ref()))
            .await?;
        Ok(items.into_iter().map(to_result).collect())
    }

    /// Blocking form of [`Self::asearch_by_query`]. Refused with
    /// `UnsupportedOperation` when called from inside a runtime.
    pub fn search_by_query(&self, query: &str, top_k: usize, types: Option<&[String]>) -> Result<Vec<SearchResult>> {
        blocking::block_on(self.asearch_by_query(query, top_k, types))?
    }

    pub fn search_similar_by_id(
        &self,
        source_id: &str,
        top_k: usize,
        types: Option<&[String]>,
    ) -> Result<Vec<SearchResult>> {
        blocking::block_on(self.asearch_similar_by_id(source_id, top_k, types))?
    }

    async fn deadline<T>(&self, operation: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        match self.timeout {
            None => fut.await,
            Some(limit) => match tokio::time::timeout(limit, fut).await {
                Ok(res) => res,
                Err(_) => {
                    tracing::warn!(operation, timeout_ms = limit.as_millis() as u64, "request timed out");
                    Err(Error::Timeout(format!("{operation} exceeded {} ms", limit.as_millis())))
                }
            },
        }
    }
}

fn check_top_k(top_k: usize) -> Result<()> {
    if top_k == 0 {
        return Err(Error::Validation("top_k must be at least 1".to_string()));
    }
    Ok(())
}

/// `None` and lists with only blank entries mean "no filter".
pub fn build_filter(types: Option<&[String]>) -> Option<Filter> {
    types.and_then(Filter::object_types)
}

fn to_result(item: SearchItem) -> SearchResult {
    SearchResult { id: item.id.to_string(), metadata: item.metadata.unwrap_or_default() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_covers_both_type_keys() {
        let types = vec!["dataset".to_string(), "resource".to_string()];
        let f = build_filter(Some(&types)).expect("filter");
        assert_eq!(
            f.to_expression(),
            r#"(metadata["type"] in ["dataset", "resource"]) or (metadata["object_type"] in ["dataset", "resource"])"#
        );
    }

    #[test]
    fn absent_or_blank_types_mean_no_filter() {
        assert!(build_filter(None).is_none());
        assert!(build_filter(Some(&[])).is_none());
        assert!(build_filter(Some(&[" ".to_string()])).is_none());
    }
}
