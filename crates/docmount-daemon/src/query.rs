//! Query engine
//!
//! Label-set and modification-time filters over records already resident in
//! the metadata store. Queries never trigger a remote listing. The scope
//! argument only names the result bucket; it does not restrict the search.

use std::collections::{BTreeMap, BTreeSet};

use tracing::trace;

use docmount_core::{AttributeRecord, DocPath, TimeRange};

use crate::metadata::MetadataStore;

/// Records matched by a query, keyed by path, under the requested scope
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub scope: DocPath,
    pub records: BTreeMap<DocPath, AttributeRecord>,
}

impl QueryResult {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, path: &DocPath) -> bool {
        self.records.contains_key(path)
    }
}

/// Index-backed queries over a metadata store
pub struct QueryEngine<'a> {
    metadata: &'a MetadataStore,
}

impl<'a> QueryEngine<'a> {
    pub fn new(metadata: &'a MetadataStore) -> Self {
        Self { metadata }
    }

    /// Records holding every label in `required` (all records if empty)
    pub fn by_labels(&self, scope: &DocPath, required: &BTreeSet<String>) -> QueryResult {
        let records = self.metadata.with_labels(required);
        trace!("label query {:?}: {} matches", required, records.len());
        Self::collect(scope, records)
    }

    /// Records with `min <= mtime <= max`
    pub fn by_time_range(&self, scope: &DocPath, range: TimeRange) -> QueryResult {
        let records = self.metadata.in_time_range(range);
        trace!("time query {:?}: {} matches", range, records.len());
        Self::collect(scope, records)
    }

    /// Conjunction of a label query and a time query
    pub fn by_labels_and_time_range(
        &self,
        scope: &DocPath,
        required: &BTreeSet<String>,
        range: TimeRange,
    ) -> QueryResult {
        if range.is_empty() {
            return Self::collect(scope, Vec::new());
        }
        let records = if required.is_empty() {
            self.metadata.in_time_range(range)
        } else {
            self.metadata
                .with_labels(required)
                .into_iter()
                .filter(|(_, record)| range.contains(record.mtime))
                .collect()
        };
        Self::collect(scope, records)
    }

    fn collect(scope: &DocPath, records: Vec<(DocPath, AttributeRecord)>) -> QueryResult {
        QueryResult {
            scope: scope.clone(),
            records: records.into_iter().collect(),
        }
    }
}
