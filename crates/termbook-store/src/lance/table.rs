use arrow_array::{Array, Int64Array, RecordBatch, RecordBatchIterator, StringArray};
use arrow_schema::ArrowError;
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase, Select};
use lancedb::{connect, Connection, Table};
use std::sync::Arc;
use tracing::debug;

use termbook_core::traits::RecordBackend;
use termbook_core::types::{Record, RecordId};
use termbook_core::{Error, Result};

use super::schema::{build_record_schema, DEFINITION_COLUMN, ID_COLUMN, TERM_COLUMN};

/// Rows decoded per step of a prefix scan.
const SCAN_CHUNK: u64 = 2048;

pub struct LanceBackend {
	db: Connection,
}

impl LanceBackend {
	pub async fn open(uri: &str) -> Result<Self> {
		let db = connect(uri).execute().await.map_err(Error::storage)?;
		Ok(Self { db })
	}

	async fn open_table(&self, collection: &str) -> Result<Table> {
		self.db.open_table(collection).execute().await.map_err(|e| match e {
			lancedb::Error::TableNotFound { .. } => Error::NotFound(format!("collection '{collection}'")),
			other => Error::storage(other),
		})
	}

	async fn collect(&self, table: &Table, filter: String) -> Result<Vec<Record>> {
		let query = table
			.query()
			.select(Select::columns(&[ID_COLUMN, TERM_COLUMN, DEFINITION_COLUMN]))
			.only_if(filter);
		let mut stream = query.execute().await.map_err(Error::storage)?;
		let mut out = Vec::new();
		while let Some(batch) = stream.try_next().await.map_err(Error::storage)? {
			out.extend(batch_to_records(&batch)?);
		}
		// Scan order follows fragments; ids carry insertion order.
		out.sort_by_key(|r| r.id);
		Ok(out)
	}
}

fn records_to_batch(records: &[Record]) -> Result<RecordBatch> {
	let ids: Vec<i64> = records.iter().map(|r| r.id as i64).collect();
	let terms: Vec<&str> = records.iter().map(|r| r.term.as_str()).collect();
	let definitions: Vec<&str> = records.iter().map(|r| r.definition.as_str()).collect();
	RecordBatch::try_new(
		build_record_schema(),
		vec![
			Arc::new(Int64Array::from(ids)),
			Arc::new(StringArray::from(terms)),
			Arc::new(StringArray::from(definitions)),
		],
	)
	.map_err(Error::storage)
}

fn batch_to_records(batch: &RecordBatch) -> Result<Vec<Record>> {
	let ids = batch
		.column_by_name(ID_COLUMN)
		.and_then(|c| c.as_any().downcast_ref::<Int64Array>())
		.ok_or_else(|| Error::Storage("records.id column missing".into()))?;
	let terms = batch
		.column_by_name(TERM_COLUMN)
		.and_then(|c| c.as_any().downcast_ref::<StringArray>())
		.ok_or_else(|| Error::Storage("records.term column missing".into()))?;
	let definitions = batch
		.column_by_name(DEFINITION_COLUMN)
		.and_then(|c| c.as_any().downcast_ref::<StringArray>())
		.ok_or_else(|| Error::Storage("records.definition column missing".into()))?;
	let mut out = Vec::with_capacity(batch.num_rows());
	for i in 0..batch.num_rows() {
		if ids.is_null(i) { continue; }
		out.push(Record {
			id: ids.value(i) as RecordId,
			term: terms.value(i).to_string(),
			definition: definitions.value(i).to_string(),
		});
	}
	Ok(out)
}

#[async_trait]
impl RecordBackend for LanceBackend {
	async fn ensure_collection(&self, collection: &str) -> Result<()> {
		let names = self.db.table_names().execute().await.map_err(Error::storage)?;
		if names.iter().any(|n| n == collection) {
			return Ok(());
		}
		// create empty table with 0 rows
		let schema = build_record_schema();
		let empty: Vec<std::result::Result<RecordBatch, ArrowError>> = Vec::new();
		let iter = RecordBatchIterator::new(empty.into_iter(), schema);
		self.db.create_table(collection, Box::new(iter)).execute().await.map_err(Error::storage)?;
		debug!(collection, "created record table");
		Ok(())
	}

	async fn count(&self, collection: &str) -> Result<usize> {
		let table = self.open_table(collection).await?;
		table.count_rows(None).await.map_err(Error::storage)
	}

	async fn append(&self, collection: &str, records: &[Record]) -> Result<()> {
		if records.is_empty() { return Ok(()); }
		let table = self.open_table(collection).await?;
		let batch = records_to_batch(records)?;
		let schema = batch.schema();
		let reader = Box::new(RecordBatchIterator::new(vec![Ok(batch)].into_iter(), schema));
		// One add is one Lance commit, so the rows become visible together.
		table.add(reader).execute().await.map_err(Error::storage)?;
		Ok(())
	}

	async fn read_range(&self, collection: &str, offset: usize, limit: usize) -> Result<Vec<Record>> {
		let table = self.open_table(collection).await?;
		// Ids are 1..=count, so offset i lives at id i + 1.
		let lo = offset as u64;
		let hi = lo.saturating_add(limit as u64);
		let filter = format!("{ID_COLUMN} > {lo} AND {ID_COLUMN} <= {hi}");
		self.collect(&table, filter).await
	}

	async fn prefix_scan(&self, collection: &str, prefix_lower: &str, limit: usize) -> Result<Vec<Record>> {
		if limit == 0 { return Ok(Vec::new()); }
		let table = self.open_table(collection).await?;
		let total = table.count_rows(None).await.map_err(Error::storage)? as u64;
		// Walk id ranges in order and stop at `limit` hits; only one chunk is decoded at a time.
		let mut matches = Vec::new();
		let mut lo = 0u64;
		while lo < total && matches.len() < limit {
			let hi = lo.saturating_add(SCAN_CHUNK);
			let filter = format!("{ID_COLUMN} > {lo} AND {ID_COLUMN} <= {hi}");
			let chunk = self.collect(&table, filter).await?;
			matches.extend(chunk.into_iter().filter(|r| r.term.to_lowercase().starts_with(prefix_lower)));
			lo = hi;
		}
		debug!(collection, scanned = lo.min(total), hits = matches.len(), "prefix scan");
		matches.truncate(limit);
		Ok(matches)
	}
}
