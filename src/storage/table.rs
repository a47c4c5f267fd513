use crate::definition::{CollectionDefinition, FIELD_CREATED_AT, FIELD_ID, FIELD_UPDATED_AT};
use crate::error::DyndbError;
use crate::migration::MigrationEngine;
use crate::query::{PageInfo, QueryRequest, QueryResult};
use crate::storage::backend::SqliteBackend;
use crate::storage::sql::{
    column_type, field_type_of, order_clause, quote_ident, translate_filters,
};
use crate::storage::{display_value, CollectionStore};
use crate::value::{now_millis, Record, Value};
use rusqlite::params_from_iter;
use std::sync::Arc;

/// Dedicated-table strategy: one physical table per collection, columns
/// generated 1:1 from the field definitions plus the system columns.
pub struct TableStore {
    backend: SqliteBackend,
    migrations: Arc<MigrationEngine>,
}

impl TableStore {
    pub fn new(backend: SqliteBackend, migrations: Arc<MigrationEngine>) -> Self {
        Self {
            backend,
            migrations,
        }
    }

    fn create_table_statement(def: &CollectionDefinition) -> String {
        let mut columns = vec![format!("{} TEXT PRIMARY KEY", quote_ident(FIELD_ID))];
        for field in &def.fields {
            let mut column = format!(
                "{} {}",
                quote_ident(&field.name),
                column_type(field.field_type)
            );
            if field.unique {
                column.push_str(" UNIQUE");
            }
            columns.push(column);
        }
        columns.push(format!("{} BIGINT NOT NULL", quote_ident(FIELD_CREATED_AT)));
        columns.push(format!("{} BIGINT NOT NULL", quote_ident(FIELD_UPDATED_AT)));
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote_ident(&def.physical_table()),
            columns.join(", ")
        )
    }

    fn all_fields(def: &CollectionDefinition) -> Vec<String> {
        let mut fields = Vec::with_capacity(def.fields.len() + 3);
        fields.push(FIELD_ID.to_string());
        fields.extend(def.fields.iter().map(|f| f.name.clone()));
        fields.push(FIELD_CREATED_AT.to_string());
        fields.push(FIELD_UPDATED_AT.to_string());
        fields
    }

    fn selected_fields(def: &CollectionDefinition, request: &QueryRequest) -> Vec<String> {
        match &request.fields {
            Some(fields) => fields.clone(),
            None => Self::all_fields(def),
        }
    }

    fn decode_row(
        def: &CollectionDefinition,
        fields: &[String],
        row: &rusqlite::Row<'_>,
    ) -> Result<Record, DyndbError> {
        let mut record = Record::new();
        for (idx, field) in fields.iter().enumerate() {
            let field_type = field_type_of(def, field)?;
            let value = Value::from_sql(field_type, row.get_ref(idx)?)?;
            record.insert(field.clone(), value);
        }
        Ok(record)
    }

    fn map_write_error(
        def: &CollectionDefinition,
        record: &Record,
        err: rusqlite::Error,
    ) -> DyndbError {
        if let Some(column) = SqliteBackend::unique_violation_column(&err) {
            let value = record
                .get(&column)
                .map(display_value)
                .unwrap_or_default();
            return DyndbError::UniqueViolation {
                collection: def.name.clone(),
                field: column,
                value,
            };
        }
        err.into()
    }
}

impl CollectionStore for TableStore {
    /// Safe to call when the table already exists; only an actual
    /// creation is recorded in the migration log.
    fn initialize_collection(&self, def: &CollectionDefinition) -> Result<(), DyndbError> {
        if self.backend.table_exists(&def.physical_table())? {
            return Ok(());
        }
        let statement = Self::create_table_statement(def);
        self.migrations.create_table(&def.name, &statement)?;
        Ok(())
    }

    fn update_schema(
        &self,
        old: &CollectionDefinition,
        new: &CollectionDefinition,
    ) -> Result<(), DyndbError> {
        self.migrations.migrate(old, new)?;
        Ok(())
    }

    fn query(
        &self,
        def: &CollectionDefinition,
        request: &QueryRequest,
    ) -> Result<QueryResult, DyndbError> {
        request.validate(def)?;
        let table = quote_ident(&def.physical_table());
        let (where_body, params) = translate_filters(def, &request.filters, quote_ident)?;
        let where_clause = if where_body.is_empty() {
            String::new()
        } else {
            format!(" WHERE {where_body}")
        };
        let order = order_clause(def, &request.sort, quote_ident, "\"id\"")?;
        let fields = Self::selected_fields(def, request);
        let select_list: Vec<String> = fields.iter().map(|f| quote_ident(f)).collect();

        self.backend.with_conn(|conn| {
            // The filtered total cannot be inferred from one page; the
            // count runs over the identical predicate.
            let total_count: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM {table}{where_clause}"),
                params_from_iter(params.iter()),
                |row| row.get(0),
            )?;

            let page_sql = format!(
                "SELECT {} FROM {table}{where_clause} ORDER BY {order} LIMIT ? OFFSET ?",
                select_list.join(", ")
            );
            let mut page_params = params.clone();
            page_params.push(rusqlite::types::Value::Integer(request.page.size as i64));
            page_params.push(rusqlite::types::Value::Integer(request.page.offset() as i64));

            let mut stmt = conn.prepare(&page_sql)?;
            let mut rows = stmt.query(params_from_iter(page_params.iter()))?;
            let mut records = Vec::new();
            while let Some(row) = rows.next()? {
                records.push(Self::decode_row(def, &fields, row)?);
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
        let fields = Self::all_fields(def);
        let select_list: Vec<String> = fields.iter().map(|f| quote_ident(f)).collect();
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = ?",
            select_list.join(", "),
            quote_ident(&def.physical_table()),
            quote_ident(FIELD_ID)
        );
        self.backend.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query([id])?;
            match rows.next()? {
                Some(row) => Ok(Some(Self::decode_row(def, &fields, row)?)),
                None => Ok(None),
            }
        })
    }

    fn create(&self, def: &CollectionDefinition, record: Record) -> Result<Record, DyndbError> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = now_millis();
        let mut stored = Record::new();
        stored.insert(FIELD_ID.to_string(), Value::Text(id.as_str().into()));
        for field in &def.fields {
            let value = record.get(&field.name).cloned().unwrap_or(Value::Null);
            stored.insert(field.name.clone(), value);
        }
        stored.insert(FIELD_CREATED_AT.to_string(), Value::DateTime(now));
        stored.insert(FIELD_UPDATED_AT.to_string(), Value::DateTime(now));

        let columns: Vec<&String> = stored.keys().collect();
        let column_list: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
        let placeholders = vec!["?"; columns.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({placeholders})",
            quote_ident(&def.physical_table()),
            column_list.join(", ")
        );
        let params: Vec<rusqlite::types::Value> = stored.values().map(Value::to_sql).collect();

        self.backend.with_conn(|conn| {
            conn.execute(&sql, params_from_iter(params.iter()))
                .map_err(|err| Self::map_write_error(def, &stored, err))?;
            Ok(())
        })?;
        Ok(stored)
    }

    fn update(
        &self,
        def: &CollectionDefinition,
        id: &str,
        patch: Record,
    ) -> Result<Record, DyndbError> {
        let now = now_millis();
        let mut assignments = Vec::with_capacity(patch.len() + 1);
        let mut params: Vec<rusqlite::types::Value> = Vec::with_capacity(patch.len() + 2);
        for (field, value) in &patch {
            assignments.push(format!("{} = ?", quote_ident(field)));
            params.push(value.to_sql());
        }
        assignments.push(format!("{} = ?", quote_ident(FIELD_UPDATED_AT)));
        params.push(rusqlite::types::Value::Integer(now));
        params.push(rusqlite::types::Value::Text(id.to_string()));
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ?",
            quote_ident(&def.physical_table()),
            assignments.join(", "),
            quote_ident(FIELD_ID)
        );

        let changed = self.backend.with_conn(|conn| {
            conn.execute(&sql, params_from_iter(params.iter()))
                .map_err(|err| Self::map_write_error(def, &patch, err))
        })?;
        if changed == 0 {
            return Err(DyndbError::RecordNotFound {
                collection: def.name.clone(),
                id: id.to_string(),
            });
        }
        self.get_by_id(def, id)?
            .ok_or_else(|| DyndbError::RecordNotFound {
                collection: def.name.clone(),
                id: id.to_string(),
            })
    }

    fn delete(&self, def: &CollectionDefinition, id: &str) -> Result<bool, DyndbError> {
        let sql = format!(
            "DELETE FROM {} WHERE {} = ?",
            quote_ident(&def.physical_table()),
            quote_ident(FIELD_ID)
        );
        let deleted = self.backend.with_conn(|conn| Ok(conn.execute(&sql, [id])?))?;
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
            "SELECT COUNT(*) FROM {} WHERE {} = ?",
            quote_ident(&def.physical_table()),
            quote_ident(field)
        );
        let mut params = vec![value.to_sql()];
        if let Some(id) = exclude_id {
            sql.push_str(&format!(" AND {} <> ?", quote_ident(FIELD_ID)));
            params.push(rusqlite::types::Value::Text(id.to_string()));
        }
        let count: i64 = self.backend.with_conn(|conn| {
            Ok(conn.query_row(&sql, params_from_iter(params.iter()), |row| row.get(0))?)
        })?;
        Ok(count == 0)
    }
}
