use crate::config::SHARED_TABLE_NAME;
use crate::definition::{
    CollectionDefinition, FIELD_CREATED_AT, FIELD_ID, FIELD_UPDATED_AT,
};
use crate::error::DyndbError;
use crate::query::{PageInfo, QueryRequest, QueryResult};
use crate::storage::backend::SqliteBackend;
use crate::storage::sql::{order_clause, quote_ident, translate_filters};
use crate::storage::{display_value, CollectionStore};
use crate::value::{now_millis, Record, Value};
use rusqlite::params_from_iter;

/// Shared-table strategy: every document-mode collection stores its
/// records as JSON documents in one multi-tenant table. The document
/// column is schema-less, so definition changes need no physical work.
pub struct DocumentStore {
    backend: SqliteBackend,
}

impl DocumentStore {
    pub fn new(backend: SqliteBackend) -> Result<Self, DyndbError> {
        backend.with_conn(|conn| {
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {SHARED_TABLE_NAME} (\
                 collection TEXT NOT NULL, \
                 id TEXT NOT NULL, \
                 doc TEXT NOT NULL, \
                 created_at BIGINT NOT NULL, \
                 updated_at BIGINT NOT NULL, \
                 PRIMARY KEY (collection, id))"
            ))?;
            Ok(())
        })?;
        Ok(Self { backend })
    }

    /// Non-system fields live inside the document column and are reached
    /// through a path accessor instead of a native column.
    fn field_expr(field: &str) -> String {
        match field {
            FIELD_ID | FIELD_CREATED_AT | FIELD_UPDATED_AT => quote_ident(field),
            other => format!("json_extract(doc, '$.{other}')"),
        }
    }

    fn encode_doc(def: &CollectionDefinition, record: &Record) -> String {
        let mut doc = serde_json::Map::new();
        for field in &def.fields {
            if let Some(value) = record.get(&field.name) {
                doc.insert(field.name.clone(), value.to_json());
            }
        }
        serde_json::Value::Object(doc).to_string()
    }

    fn decode_doc(def: &CollectionDefinition, doc: &str) -> Result<Record, DyndbError> {
        let parsed: serde_json::Value = serde_json::from_str(doc)?;
        let mut record = Record::new();
        for field in &def.fields {
            let value = match parsed.get(&field.name) {
                Some(json) => Value::from_json(field.field_type, json)
                    .map_err(|e| DyndbError::Decode(e.to_string()))?,
                None => Value::Null,
            };
            record.insert(field.name.clone(), value);
        }
        Ok(record)
    }

    fn decode_row(
        def: &CollectionDefinition,
        row: &rusqlite::Row<'_>,
    ) -> Result<Record, DyndbError> {
        let id: String = row.get(0)?;
        let doc: String = row.get(1)?;
        let created_at: i64 = row.get(2)?;
        let updated_at: i64 = row.get(3)?;
        let mut record = Self::decode_doc(def, &doc)?;
        record.insert(FIELD_ID.to_string(), Value::Text(id.into()));
        record.insert(FIELD_CREATED_AT.to_string(), Value::DateTime(created_at));
        record.insert(FIELD_UPDATED_AT.to_string(), Value::DateTime(updated_at));
        Ok(record)
    }

    fn apply_projection(record: Record, fields: &Option<Vec<String>>) -> Record {
        match fields {
            None => record,
            Some(selected) => {
                let mut projected = Record::new();
                for field in selected {
                    if let Some(value) = record.get(field) {
                        projected.insert(field.clone(), value.clone());
                    }
                }
                projected
            }
        }
    }

    /// Uniqueness probe inside an open transaction so check and write
    /// cannot interleave with another writer.
    fn check_unique_in_tx(
        tx: &rusqlite::Transaction<'_>,
        def: &CollectionDefinition,
        record: &Record,
        exclude_id: Option<&str>,
    ) -> Result<(), DyndbError> {
        for field in def.fields.iter().filter(|f| f.unique) {
            let Some(value) = record.get(&field.name) else {
                continue;
            };
            if value.is_null() {
                continue;
            }
            let mut sql = format!(
                "SELECT COUNT(*) FROM {SHARED_TABLE_NAME} \
                 WHERE collection = ? AND {} = ?",
                Self::field_expr(&field.name)
            );
            let mut params = vec![
                rusqlite::types::Value::Text(def.name.clone()),
                value.to_sql(),
            ];
            if let Some(id) = exclude_id {
                sql.push_str(" AND id <> ?");
                params.push(rusqlite::types::Value::Text(id.to_string()));
            }
            let count: i64 =
                tx.query_row(&sql, params_from_iter(params.iter()), |row| row.get(0))?;
            if count > 0 {
                return Err(DyndbError::UniqueViolation {
                    collection: def.name.clone(),
                    field: field.name.clone(),
                    value: display_value(value),
                });
            }
        }
        Ok(())
    }
}

impl CollectionStore for DocumentStore {
    fn initialize_collection(&self, _def: &CollectionDefinition) -> Result<(), DyndbError> {
        // The shared table is created once at store construction.
        Ok(())
    }

    fn update_schema(
        &self,
        _old: &CollectionDefinition,
        _new: &CollectionDefinition,
    ) -> Result<(), DyndbError> {
        // Schema-less document column: nothing to reconcile.
        Ok(())
    }

    fn query(
        &self,
        def: &CollectionDefinition,
        request: &QueryRequest,
    ) -> Result<QueryResult, DyndbError> {
        request.validate(def)?;
        let (filter_body, filter_params) =
            translate_filters(def, &request.filters, |f| Self::field_expr(f))?;
        let mut where_clause = "WHERE collection = ?".to_string();
        if !filter_body.is_empty() {
            where_clause.push_str(&format!(" AND {filter_body}"));
        }
        let mut params = vec![rusqlite::types::Value::Text(def.name.clone())];
        params.extend(filter_params);
        let order = order_clause(def, &request.sort, |f| Self::field_expr(f), "id")?;

        self.backend.with_conn(|conn| {
            let total_count: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM {SHARED_TABLE_NAME} {where_clause}"),
                params_from_iter(params.iter()),
                |row| row.get(0),
            )?;

            let page_sql = format!(
                "SELECT id, doc, created_at, updated_at FROM {SHARED_TABLE_NAME} \
                 {where_clause} ORDER BY {order} LIMIT ? OFFSET ?"
            );
            let mut page_params = params.clone();
            page_params.push(rusqlite::types::Value::Integer(request.page.size as i64));
            page_params.push(rusqlite::types::Value::Integer(request.page.offset() as i64));

            let mut stmt = conn.prepare(&page_sql)?;
            let mut rows = stmt.query(params_from_iter(page_params.iter()))?;
            let mut records = Vec::new();
            while let Some(row) = rows.next()? {
                let record = Self::decode_row(def, row)?;
                records.push(Self::apply_projection(record, &request.fields));
            }
            Ok(QueryResult {
                records,
                page: PageInfo::new(total_count as u64, request.page.number, request.page.size),
            })
        })
    }

    fn get_by_id(
        &self,
        def: &CollectionDefinition,
        id: &str,
    ) -> Result<Option<Record>, DyndbError> {
        self.backend.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT id, doc, created_at, updated_at FROM {SHARED_TABLE_NAME} \
                 WHERE collection = ? AND id = ?"
            ))?;
            let mut rows = stmt.query([&def.name, &id.to_string()])?;
            match rows.next()? {
                Some(row) => Ok(Some(Self::decode_row(def, row)?)),
                None => Ok(None),
            }
        })
    }

    fn create(&self, def: &CollectionDefinition, record: Record) -> Result<Record, DyndbError> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = now_millis();
        let mut stored = Record::new();
        for field in &def.fields {
            let value = record.get(&field.name).cloned().unwrap_or(Value::Null);
            stored.insert(field.name.clone(), value);
        }
        let doc = Self::encode_doc(def, &stored);

        self.backend.with_tx(|tx| {
            Self::check_unique_in_tx(tx, def, &stored, None)?;
            tx.execute(
                &format!(
                    "INSERT INTO {SHARED_TABLE_NAME} \
                     (collection, id, doc, created_at, updated_at) VALUES (?, ?, ?, ?, ?)"
                ),
                rusqlite::params![def.name, id, doc, now, now],
            )?;
            Ok(())
        })?;

        stored.insert(FIELD_ID.to_string(), Value::Text(id.into()));
        stored.insert(FIELD_CREATED_AT.to_string(), Value::DateTime(now));
        stored.insert(FIELD_UPDATED_AT.to_string(), Value::DateTime(now));
        Ok(stored)
    }

    fn update(
        &self,
        def: &CollectionDefinition,
        id: &str,
        patch: Record,
    ) -> Result<Record, DyndbError> {
        let now = now_millis();
        let merged = self.backend.with_tx(|tx| {
            let existing: Option<(String, i64)> = {
                let mut stmt = tx.prepare(&format!(
                    "SELECT doc, created_at FROM {SHARED_TABLE_NAME} \
                     WHERE collection = ? AND id = ?"
                ))?;
                let mut rows = stmt.query([&def.name, &id.to_string()])?;
                match rows.next()? {
                    Some(row) => Some((row.get(0)?, row.get(1)?)),
                    None => None,
                }
            };
            let Some((doc, created_at)) = existing else {
                return Err(DyndbError::RecordNotFound {
                    collection: def.name.clone(),
                    id: id.to_string(),
                });
            };
            let mut record = Self::decode_doc(def, &doc)?;
            for (field, value) in &patch {
                record.insert(field.clone(), value.clone());
            }
            Self::check_unique_in_tx(tx, def, &patch, Some(id))?;
            tx.execute(
                &format!(
                    "UPDATE {SHARED_TABLE_NAME} SET doc = ?, updated_at = ? \
                     WHERE collection = ? AND id = ?"
                ),
                rusqlite::params![Self::encode_doc(def, &record), now, def.name, id],
            )?;
            record.insert(FIELD_ID.to_string(), Value::Text(id.into()));
            record.insert(FIELD_CREATED_AT.to_string(), Value::DateTime(created_at));
            record.insert(FIELD_UPDATED_AT.to_string(), Value::DateTime(now));
            Ok(record)
        })?;
        Ok(merged)
    }

    fn delete(&self, def: &CollectionDefinition, id: &str) -> Result<bool, DyndbError> {
        let deleted = self.backend.with_conn(|conn| {
            Ok(conn.execute(
                &format!("DELETE FROM {SHARED_TABLE_NAME} WHERE collection = ? AND id = ?"),
                [&def.name, &id.to_string()],
            )?)
        })?;
        Ok(deleted > 0)
    }

    fn is_unique(
        &self,
        def: &CollectionDefinition,
        field: &str,
        value: &Value,
        exclude_id: Option<&str>,
    ) -> Result<bool, DyndbError> {
        if !def.has_field(field) {
            return Err(DyndbError::unknown_field(&def.name, field));
        }
        if value.is_null() {
            return Ok(true);
        }
        let mut sql = format!(
            "SELECT COUNT(*) FROM {SHARED_TABLE_NAME} WHERE collection = ? AND {} = ?",
            Self::field_expr(field)
        );
        let mut params = vec![
            rusqlite::types::Value::Text(def.name.clone()),
            value.to_sql(),
        ];
        if let Some(id) = exclude_id {
            sql.push_str(" AND id <> ?");
            params.push(rusqlite::types::Value::Text(id.to_string()));
        }
        let count: i64 = self.backend.with_conn(|conn| {
            Ok(conn.query_row(&sql, params_from_iter(params.iter()), |row| row.get(0))?)
        })?;
        Ok(count == 0)
    }
}
