use crate::config::MIGRATION_LOG_TABLE;
use crate::definition::{CollectionDefinition, FieldDefinition, FieldType};
use crate::error::DyndbError;
use crate::storage::backend::SqliteBackend;
use crate::storage::sql::{column_type, quote_ident};
use crate::value::now_millis;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationKind {
    CreateTable,
    AddColumn,
    DeprecateColumn,
    AlterColumnType,
}

impl MigrationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MigrationKind::CreateTable => "create_table",
            MigrationKind::AddColumn => "add_column",
            MigrationKind::DeprecateColumn => "deprecate_column",
            MigrationKind::AlterColumnType => "alter_column_type",
        }
    }

    fn parse(token: &str) -> Result<Self, DyndbError> {
        match token {
            "create_table" => Ok(MigrationKind::CreateTable),
            "add_column" => Ok(MigrationKind::AddColumn),
            "deprecate_column" => Ok(MigrationKind::DeprecateColumn),
            "alter_column_type" => Ok(MigrationKind::AlterColumnType),
            other => Err(DyndbError::Decode(format!(
                "unknown migration kind '{other}' in log"
            ))),
        }
    }
}

/// Append-only audit entry for one executed schema action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationRecord {
    pub collection: String,
    pub kind: MigrationKind,
    pub statement: String,
    pub executed_at_millis: i64,
    pub checksum_hex: String,
}

/// Disjoint field-level difference between two definition versions.
#[derive(Debug, Clone, Default)]
pub struct MigrationPlan {
    pub added: Vec<FieldDefinition>,
    pub removed: Vec<FieldDefinition>,
    pub retyped: Vec<(FieldDefinition, FieldDefinition)>,
}

impl MigrationPlan {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.retyped.is_empty()
    }
}

/// Reconciles a dedicated table's columns with a changed definition.
///
/// Columns are never dropped: a removed field's column is renamed to a
/// deprecated name, so a definition change cannot destroy data. Every
/// action appends to the migration log in the same transaction that
/// executes its DDL.
pub struct MigrationEngine {
    backend: SqliteBackend,
}

impl MigrationEngine {
    pub fn new(backend: SqliteBackend) -> Result<Self, DyndbError> {
        backend.with_conn(|conn| {
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {MIGRATION_LOG_TABLE} (\
                 seq INTEGER PRIMARY KEY AUTOINCREMENT, \
                 collection TEXT NOT NULL, \
                 kind TEXT NOT NULL, \
                 statement TEXT NOT NULL, \
                 checksum TEXT NOT NULL, \
                 executed_at BIGINT NOT NULL)"
            ))?;
            Ok(())
        })?;
        Ok(Self { backend })
    }

    pub fn plan(old: &CollectionDefinition, new: &CollectionDefinition) -> MigrationPlan {
        let mut plan = MigrationPlan::default();
        for field in &new.fields {
            match old.field(&field.name) {
                None => plan.added.push(field.clone()),
                Some(prev) if prev.field_type != field.field_type => {
                    plan.retyped.push((prev.clone(), field.clone()));
                }
                Some(_) => {}
            }
        }
        for field in &old.fields {
            if new.field(&field.name).is_none() {
                plan.removed.push(field.clone());
            }
        }
        plan
    }

    /// Widening numeric conversions are the only permitted retypes.
    pub fn check_compatibility(
        collection: &str,
        old_field: &FieldDefinition,
        new_field: &FieldDefinition,
    ) -> Result<(), DyndbError> {
        let compatible = matches!(
            (old_field.field_type, new_field.field_type),
            (FieldType::Integer, FieldType::BigInt)
                | (FieldType::Integer, FieldType::Double)
                | (FieldType::BigInt, FieldType::Double)
        );
        if compatible {
            Ok(())
        } else {
            Err(DyndbError::IncompatibleSchemaChange {
                collection: collection.to_string(),
                field: new_field.name.clone(),
                from: old_field.field_type.as_str().to_string(),
                to: new_field.field_type.as_str().to_string(),
            })
        }
    }

    /// Applies the difference between `old` and `new` to the dedicated
    /// table. A failing action aborts the remaining actions; everything
    /// already applied stays applied and logged.
    pub fn migrate(
        &self,
        old: &CollectionDefinition,
        new: &CollectionDefinition,
    ) -> Result<Vec<MigrationRecord>, DyndbError> {
        let plan = Self::plan(old, new);
        // Retypes are vetted up front so an incompatible change rejects
        // the whole definition change before any DDL runs.
        for (old_field, new_field) in &plan.retyped {
            Self::check_compatibility(&new.name, old_field, new_field)?;
        }
        let table = quote_ident(&new.physical_table());
        let mut records = Vec::new();
        for field in &plan.added {
            let statement = format!(
                "ALTER TABLE {table} ADD COLUMN {} {}",
                quote_ident(&field.name),
                column_type(field.field_type)
            );
            records.push(self.apply(&new.name, MigrationKind::AddColumn, &statement)?);
        }
        for (_, new_field) in &plan.retyped {
            let statement =
                retype_script(&table, &new_field.name, new_field.field_type, old.version);
            records.push(self.apply(&new.name, MigrationKind::AlterColumnType, &statement)?);
        }
        for field in &plan.removed {
            let statement = format!(
                "ALTER TABLE {table} RENAME COLUMN {} TO {}",
                quote_ident(&field.name),
                quote_ident(&deprecated_name(&field.name, old.version))
            );
            records.push(self.apply(&new.name, MigrationKind::DeprecateColumn, &statement)?);
        }
        Ok(records)
    }

    /// Logs and executes a table-creation statement.
    pub fn create_table(
        &self,
        collection: &str,
        statement: &str,
    ) -> Result<MigrationRecord, DyndbError> {
        self.apply(collection, MigrationKind::CreateTable, statement)
    }

    pub fn history(&self, collection: &str) -> Result<Vec<MigrationRecord>, DyndbError> {
        self.backend.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT collection, kind, statement, checksum, executed_at \
                 FROM {MIGRATION_LOG_TABLE} WHERE collection = ? ORDER BY seq"
            ))?;
            let rows = stmt.query_map([collection], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            })?;
            let mut records = Vec::new();
            for row in rows {
                let (collection, kind, statement, checksum_hex, executed_at_millis) = row?;
                records.push(MigrationRecord {
                    collection,
                    kind: MigrationKind::parse(&kind)?,
                    statement,
                    executed_at_millis,
                    checksum_hex,
                });
            }
            Ok(records)
        })
    }

    /// One action: log append and DDL execution share a transaction, so
    /// the log can never record less than what was applied.
    fn apply(
        &self,
        collection: &str,
        kind: MigrationKind,
        statement: &str,
    ) -> Result<MigrationRecord, DyndbError> {
        let record = MigrationRecord {
            collection: collection.to_string(),
            kind,
            statement: statement.to_string(),
            executed_at_millis: now_millis(),
            checksum_hex: checksum_hex(statement),
        };
        self.backend.with_tx(|tx| {
            tx.execute(
                &format!(
                    "INSERT INTO {MIGRATION_LOG_TABLE} \
                     (collection, kind, statement, checksum, executed_at) \
                     VALUES (?, ?, ?, ?, ?)"
                ),
                rusqlite::params![
                    record.collection,
                    record.kind.as_str(),
                    record.statement,
                    record.checksum_hex,
                    record.executed_at_millis,
                ],
            )?;
            tx.execute_batch(statement)?;
            Ok(())
        })?;
        tracing::info!(
            collection = %record.collection,
            kind = record.kind.as_str(),
            "schema action applied"
        );
        Ok(record)
    }
}

pub fn deprecated_name(field: &str, version: u64) -> String {
    format!("{field}__deprecated_v{version}")
}

/// SQLite cannot alter a column's type in place; the column is rebuilt
/// beside the old one and the old data kept under a deprecated name.
fn retype_script(table: &str, field: &str, new_type: FieldType, version: u64) -> String {
    let col = quote_ident(field);
    let tmp = quote_ident(&format!("{field}__retype_tmp"));
    let pre = quote_ident(&format!("{field}__pre_v{version}"));
    let ty = column_type(new_type);
    format!(
        "ALTER TABLE {table} ADD COLUMN {tmp} {ty};\n\
         UPDATE {table} SET {tmp} = CAST({col} AS {ty});\n\
         ALTER TABLE {table} RENAME COLUMN {col} TO {pre};\n\
         ALTER TABLE {table} RENAME COLUMN {tmp} TO {col};"
    )
}

fn checksum_hex(statement: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(statement.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::{deprecated_name, MigrationEngine, MigrationKind};
    use crate::config::DyndbConfig;
    use crate::definition::{
        CollectionDefinition, CollectionSpec, FieldDefinition, FieldType,
    };
    use crate::storage::backend::SqliteBackend;

    fn def(fields: Vec<FieldDefinition>) -> CollectionDefinition {
        CollectionDefinition::new(CollectionSpec {
            name: "items".into(),
            fields,
            ..CollectionSpec::default()
        })
        .expect("valid definition")
    }

    fn engine() -> MigrationEngine {
        let backend = SqliteBackend::open(&DyndbConfig::default()).expect("open");
        backend
            .with_conn(|conn| {
                conn.execute_batch(
                    "CREATE TABLE c_items (\
                     id TEXT PRIMARY KEY, \"qty\" INTEGER, \"label\" TEXT, \
                     created_at BIGINT NOT NULL, updated_at BIGINT NOT NULL)",
                )?;
                Ok(())
            })
            .expect("seed table");
        MigrationEngine::new(backend).expect("engine")
    }

    #[test]
    fn plan_partitions_added_removed_retyped() {
        let old = def(vec![
            FieldDefinition::new("qty", FieldType::Integer),
            FieldDefinition::new("label", FieldType::Text),
        ]);
        let new = old
            .revised(CollectionSpec {
                name: "items".into(),
                fields: vec![
                    FieldDefinition::new("qty", FieldType::BigInt),
                    FieldDefinition::new("note", FieldType::Text),
                ],
                ..CollectionSpec::default()
            })
            .expect("revision");
        let plan = MigrationEngine::plan(&old, &new);
        assert_eq!(plan.added.len(), 1);
        assert_eq!(plan.added[0].name, "note");
        assert_eq!(plan.removed.len(), 1);
        assert_eq!(plan.removed[0].name, "label");
        assert_eq!(plan.retyped.len(), 1);
        assert_eq!(plan.retyped[0].1.field_type, FieldType::BigInt);
    }

    #[test]
    fn narrowing_and_cross_family_retypes_are_rejected() {
        let old_field = FieldDefinition::new("qty", FieldType::BigInt);
        let narrow = FieldDefinition::new("qty", FieldType::Integer);
        let err = MigrationEngine::check_compatibility("items", &old_field, &narrow).unwrap_err();
        assert_eq!(err.code_str(), "incompatible_schema_change");

        let text_field = FieldDefinition::new("qty", FieldType::Text);
        assert!(MigrationEngine::check_compatibility("items", &old_field, &text_field).is_err());
    }

    #[test]
    fn migrate_applies_and_logs_every_action() {
        let engine = engine();
        let old = def(vec![
            FieldDefinition::new("qty", FieldType::Integer),
            FieldDefinition::new("label", FieldType::Text),
        ]);
        let new = old
            .revised(CollectionSpec {
                name: "items".into(),
                fields: vec![
                    FieldDefinition::new("qty", FieldType::Double),
                    FieldDefinition::new("note", FieldType::Text),
                ],
                ..CollectionSpec::default()
            })
            .expect("revision");
        let records = engine.migrate(&old, &new).expect("migrate");
        assert_eq!(records.len(), 3);

        let history = engine.history("items").expect("history");
        let kinds: Vec<_> = history.iter().map(|r| r.kind).collect();
        assert_eq!(
            kinds,
            [
                MigrationKind::AddColumn,
                MigrationKind::AlterColumnType,
                MigrationKind::DeprecateColumn,
            ]
        );
        assert!(history.iter().all(|r| !r.checksum_hex.is_empty()));
    }

    #[test]
    fn incompatible_retype_aborts_before_any_ddl() {
        let engine = engine();
        let old = def(vec![FieldDefinition::new("qty", FieldType::Integer)]);
        let new = old
            .revised(CollectionSpec {
                name: "items".into(),
                fields: vec![
                    FieldDefinition::new("qty", FieldType::Boolean),
                    FieldDefinition::new("extra", FieldType::Text),
                ],
                ..CollectionSpec::default()
            })
            .expect("revision");
        let err = engine.migrate(&old, &new).unwrap_err();
        assert_eq!(err.code_str(), "incompatible_schema_change");
        assert!(engine.history("items").expect("history").is_empty());
    }

    #[test]
    fn deprecated_names_carry_the_replaced_version() {
        assert_eq!(deprecated_name("label", 3), "label__deprecated_v3");
    }
}
