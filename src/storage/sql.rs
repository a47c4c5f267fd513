use crate::definition::{
    CollectionDefinition, FieldType, FIELD_CREATED_AT, FIELD_ID, FIELD_UPDATED_AT,
};
use crate::error::DyndbError;
use crate::query::{Filter, FilterOp, Order, SortSpec};
use crate::value::Value;

/// Deterministic field-type to column-type map. SQLite applies affinity,
/// so BIGINT/BOOLEAN/DATE resolve to INTEGER/NUMERIC/NUMERIC classes.
pub fn column_type(field_type: FieldType) -> &'static str {
    match field_type {
        FieldType::Text => "TEXT",
        FieldType::Integer => "INTEGER",
        FieldType::BigInt => "BIGINT",
        FieldType::Double => "REAL",
        FieldType::Boolean => "BOOLEAN",
        FieldType::Date => "DATE",
        FieldType::DateTime => "BIGINT",
        FieldType::Json => "TEXT",
    }
}

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Declared type of a field, covering the implicit system fields.
pub fn field_type_of(def: &CollectionDefinition, field: &str) -> Result<FieldType, DyndbError> {
    match field {
        FIELD_ID => Ok(FieldType::Text),
        FIELD_CREATED_AT | FIELD_UPDATED_AT => Ok(FieldType::DateTime),
        _ => def
            .field(field)
            .map(|f| f.field_type)
            .ok_or_else(|| DyndbError::unknown_field(&def.name, field)),
    }
}

/// Escapes LIKE metacharacters so user input matches literally. Patterns
/// built from the result must carry `ESCAPE '\'`.
pub fn escape_like(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// One translated filter: a SQL fragment plus its bound parameters.
#[derive(Debug, Clone)]
pub struct Predicate {
    pub sql: String,
    pub params: Vec<rusqlite::types::Value>,
}

/// Translates a single filter against the definition. `lhs` is the
/// already-rendered left-hand expression for the field (a quoted column
/// or a document-path accessor, depending on the storage strategy).
pub fn translate_filter(
    def: &CollectionDefinition,
    filter: &Filter,
    lhs: &str,
) -> Result<Predicate, DyndbError> {
    let field_type = field_type_of(def, &filter.field)?;
    if field_type == FieldType::Json {
        return Err(DyndbError::invalid_query(format!(
            "field '{}' is structured and cannot be filtered",
            filter.field
        )));
    }
    let predicate = match filter.op {
        FilterOp::Eq => bound(format!("{lhs} = ?"), field_type, &filter.value)?,
        FilterOp::Neq => bound(format!("{lhs} <> ?"), field_type, &filter.value)?,
        FilterOp::Gt => bound(format!("{lhs} > ?"), field_type, &filter.value)?,
        FilterOp::Lt => bound(format!("{lhs} < ?"), field_type, &filter.value)?,
        FilterOp::Gte => bound(format!("{lhs} >= ?"), field_type, &filter.value)?,
        FilterOp::Lte => bound(format!("{lhs} <= ?"), field_type, &filter.value)?,
        FilterOp::IsNull => {
            let null_wanted = match filter.value.as_str() {
                "true" | "1" => true,
                "false" | "0" => false,
                other => {
                    return Err(DyndbError::invalid_query(format!(
                        "isnull expects a boolean value, got '{other}'"
                    )))
                }
            };
            // Never a bound comparison; NULL semantics need IS [NOT] NULL.
            let sql = if null_wanted {
                format!("{lhs} IS NULL")
            } else {
                format!("{lhs} IS NOT NULL")
            };
            Predicate {
                sql,
                params: Vec::new(),
            }
        }
        FilterOp::Ieq => {
            require_text(field_type, filter)?;
            Predicate {
                sql: format!("lower({lhs}) = lower(?)"),
                params: vec![rusqlite::types::Value::Text(filter.value.clone())],
            }
        }
        FilterOp::Contains | FilterOp::Starts | FilterOp::Ends => {
            require_text(field_type, filter)?;
            Predicate {
                sql: format!("{lhs} LIKE ? ESCAPE '\\'"),
                params: vec![rusqlite::types::Value::Text(pattern(
                    filter.op,
                    &filter.value,
                ))],
            }
        }
        FilterOp::IContains | FilterOp::IStarts | FilterOp::IEnds => {
            require_text(field_type, filter)?;
            Predicate {
                sql: format!("lower({lhs}) LIKE lower(?) ESCAPE '\\'"),
                params: vec![rusqlite::types::Value::Text(pattern(
                    filter.op,
                    &filter.value,
                ))],
            }
        }
    };
    Ok(predicate)
}

/// Conjunction of all filters (AND-only). Returns the WHERE body and the
/// flattened parameter list; an empty filter set yields an empty body.
pub fn translate_filters<F>(
    def: &CollectionDefinition,
    filters: &[Filter],
    lhs: F,
) -> Result<(String, Vec<rusqlite::types::Value>), DyndbError>
where
    F: Fn(&str) -> String,
{
    let mut fragments = Vec::with_capacity(filters.len());
    let mut params = Vec::new();
    for filter in filters {
        let predicate = translate_filter(def, filter, &lhs(&filter.field))?;
        fragments.push(predicate.sql);
        params.extend(predicate.params);
    }
    Ok((fragments.join(" AND "), params))
}

/// ORDER BY body. List position is tie-break precedence; a trailing id
/// ordering keeps page boundaries deterministic when sort keys collide.
pub fn order_clause<F>(
    def: &CollectionDefinition,
    sorts: &[SortSpec],
    lhs: F,
    id_lhs: &str,
) -> Result<String, DyndbError>
where
    F: Fn(&str) -> String,
{
    let mut parts = Vec::with_capacity(sorts.len() + 1);
    for sort in sorts {
        let field_type = field_type_of(def, &sort.field)?;
        if field_type == FieldType::Json {
            return Err(DyndbError::invalid_query(format!(
                "field '{}' is structured and cannot be sorted",
                sort.field
            )));
        }
        let direction = match sort.order {
            Order::Asc => "ASC",
            Order::Desc => "DESC",
        };
        parts.push(format!("{} {direction}", lhs(&sort.field)));
    }
    parts.push(format!("{id_lhs} ASC"));
    Ok(parts.join(", "))
}

fn bound(sql: String, field_type: FieldType, raw: &str) -> Result<Predicate, DyndbError> {
    let value = Value::coerce_filter(field_type, raw)?;
    Ok(Predicate {
        sql,
        params: vec![value.to_sql()],
    })
}

fn require_text(field_type: FieldType, filter: &Filter) -> Result<(), DyndbError> {
    if field_type == FieldType::Text {
        Ok(())
    } else {
        Err(DyndbError::invalid_query(format!(
            "operator '{}' requires a text field, '{}' is {}",
            filter.op.as_str(),
            filter.field,
            field_type.as_str()
        )))
    }
}

fn pattern(op: FilterOp, raw: &str) -> String {
    let escaped = escape_like(raw);
    match op {
        FilterOp::Contains | FilterOp::IContains => format!("%{escaped}%"),
        FilterOp::Starts | FilterOp::IStarts => format!("{escaped}%"),
        FilterOp::Ends | FilterOp::IEnds => format!("%{escaped}"),
        _ => escaped,
    }
}
