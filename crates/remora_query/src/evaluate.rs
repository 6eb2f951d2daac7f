//! The offline query evaluator.

use crate::description::{QueryDescription, QuerySource, SortKey};
use crate::error::{QueryError, QueryResult};
use crate::include::resolve_include_path;
use crate::predicate::{matches_where, SubQueryRunner};
use crate::sort::sort_records;
use remora_datastore::LocalDatastore;
use remora_value::{decode_object, ObjectData};
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

/// Evaluates query descriptions against the offline datastore.
///
/// The pipeline mirrors the remote engine: load the candidate set from
/// the pin-set source, decode, filter, stable-sort, window, project, and
/// hydrate includes. Sub-queries recurse against the same source.
pub struct QueryEvaluator {
    store: Arc<LocalDatastore>,
}

/// Page size used by `each` when paginating on ascending object id.
const EACH_BATCH_SIZE: usize = 100;

struct SourcedRunner<'a> {
    evaluator: &'a QueryEvaluator,
    source: &'a QuerySource,
}

impl SubQueryRunner for SourcedRunner<'_> {
    fn run_sub_query(
        &self,
        class_name: &str,
        where_clause: &serde_json::Value,
    ) -> QueryResult<Vec<ObjectData>> {
        let mut sub_query = QueryDescription::new(class_name);
        sub_query.where_clause = where_clause.clone();
        sub_query.source = self.source.clone();
        self.evaluator.filtered(&sub_query)
    }
}

impl QueryEvaluator {
    /// Creates an evaluator over a datastore.
    pub fn new(store: Arc<LocalDatastore>) -> Self {
        Self { store }
    }

    /// The datastore this evaluator reads.
    pub fn store(&self) -> &Arc<LocalDatastore> {
        &self.store
    }

    fn candidate_keys(&self, query: &QueryDescription) -> QueryResult<Vec<String>> {
        let prefix = format!("{}_", query.class_name);
        let keys = match &query.source {
            QuerySource::AllPinned => self.store.keys_of_class(&query.class_name)?,
            QuerySource::DefaultPin => self
                .store
                .pin_list(None)?
                .into_iter()
                .filter(|key| key.starts_with(&prefix))
                .collect(),
            QuerySource::NamedPin(name) => self
                .store
                .pin_list(Some(name))?
                .into_iter()
                .filter(|key| key.starts_with(&prefix))
                .collect(),
        };
        Ok(keys)
    }

    /// Loads, decodes, and filters the candidate set — the shared front
    /// half of every evaluation.
    fn filtered(&self, query: &QueryDescription) -> QueryResult<Vec<ObjectData>> {
        let runner = SourcedRunner {
            evaluator: self,
            source: &query.source,
        };

        let mut results = Vec::new();
        for key in self.candidate_keys(query)? {
            // Pin sets and records are not updated transactionally; a
            // membership entry may momentarily outlive its record.
            let record = match self.store.get_record(&key)? {
                Some(record) => record,
                None => continue,
            };
            let map = record.as_object().ok_or_else(|| {
                remora_datastore::StoreError::corrupt_record(&key, "record is not an object")
            })?;
            let data = decode_object(map)?;
            if matches_where(&data, &query.where_clause, &runner)? {
                results.push(data);
            }
        }
        Ok(results)
    }

    fn project(query: &QueryDescription, data: &mut ObjectData) {
        let keys = match &query.keys {
            Some(keys) => keys,
            None => return,
        };
        let mut retained: Vec<String> = keys.clone();
        // Include roots stay visible even under a select-keys projection.
        for path in &query.include {
            if let Some(root) = path.split('.').next() {
                retained.push(root.to_string());
            }
        }
        data.attributes
            .retain(|attr, _| retained.iter().any(|k| k == attr));
    }

    /// Runs the full pipeline and returns matching records in order.
    pub fn find(&self, query: &QueryDescription) -> QueryResult<Vec<ObjectData>> {
        let mut results = self.filtered(query)?;
        debug!(
            class = %query.class_name,
            candidates = results.len(),
            "offline query matched"
        );

        sort_records(&mut results, &query.order)?;

        let skipped = results.len().min(query.skip);
        results.drain(..skipped);
        if let Some(limit) = query.limit {
            results.truncate(limit);
        }

        for data in &mut results {
            Self::project(query, data);
            for path in &query.include {
                resolve_include_path(&self.store, data, path)?;
            }
        }
        Ok(results)
    }

    /// Number of matching records. Skip is ignored; limit applies.
    pub fn count(&self, query: &QueryDescription) -> QueryResult<usize> {
        let results = self.filtered(query)?;
        // Sorting cannot change the count, but an invalid sort key is
        // still an execution error.
        let mut sortable: Vec<ObjectData> = Vec::new();
        sort_records(&mut sortable, &query.order)?;

        let count = results.len();
        Ok(match query.limit {
            Some(limit) => count.min(limit),
            None => count,
        })
    }

    /// The first matching record in query order.
    pub fn first(&self, query: &QueryDescription) -> QueryResult<Option<ObjectData>> {
        let mut limited = query.clone().limit(1);
        limited.skip = query.skip;
        Ok(self.find(&limited)?.into_iter().next())
    }

    /// Looks up one record of the query's class by object id, hydrating
    /// the query's include paths.
    pub fn get(&self, query: &QueryDescription, object_id: &str) -> QueryResult<Option<ObjectData>> {
        let mut by_id = query.clone();
        by_id.where_clause = json!({"objectId": object_id});
        by_id.order.clear();
        by_id.skip = 0;
        Ok(self.find(&by_id.limit(1))?.into_iter().next())
    }

    /// Streams every matching record through `callback`, paginating
    /// internally by ascending object id.
    ///
    /// Fails if the query carries sort, skip, or a limit — the internal
    /// id-pagination would silently violate them.
    pub fn each(
        &self,
        query: &QueryDescription,
        mut callback: impl FnMut(ObjectData) -> QueryResult<()>,
    ) -> QueryResult<usize> {
        if !query.order.is_empty() || query.skip > 0 || query.limit.is_some() {
            return Err(QueryError::EachWithConstraints);
        }

        let mut seen = 0usize;
        let mut last_id: Option<String> = None;
        loop {
            let mut page = query.clone();
            if let Some(last) = &last_id {
                let tree = page
                    .where_clause
                    .as_object_mut()
                    .ok_or_else(|| QueryError::invalid_constraint("where clause is not an object"))?;
                tree.insert("objectId".into(), json!({"$gt": last}));
            }
            page.order = vec![SortKey {
                key: "objectId".into(),
                descending: false,
            }];
            let page = page.limit(EACH_BATCH_SIZE);

            let batch = self.find(&page)?;
            let batch_len = batch.len();
            for data in batch {
                last_id = data.object_id.clone();
                seen += 1;
                callback(data)?;
            }
            if batch_len < EACH_BATCH_SIZE {
                return Ok(seen);
            }
        }
    }
}
