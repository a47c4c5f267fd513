use crate::config::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
use crate::definition::CollectionDefinition;
use crate::error::DyndbError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortSpec {
    pub field: String,
    pub order: Order,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Neq,
    Ieq,
    Gt,
    Lt,
    Gte,
    Lte,
    IsNull,
    Contains,
    Starts,
    Ends,
    IContains,
    IStarts,
    IEnds,
}

impl FilterOp {
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "eq" => Some(FilterOp::Eq),
            "neq" => Some(FilterOp::Neq),
            "ieq" => Some(FilterOp::Ieq),
            "gt" => Some(FilterOp::Gt),
            "lt" => Some(FilterOp::Lt),
            "gte" => Some(FilterOp::Gte),
            "lte" => Some(FilterOp::Lte),
            "isnull" => Some(FilterOp::IsNull),
            "contains" => Some(FilterOp::Contains),
            "starts" => Some(FilterOp::Starts),
            "ends" => Some(FilterOp::Ends),
            "icontains" => Some(FilterOp::IContains),
            "istarts" => Some(FilterOp::IStarts),
            "iends" => Some(FilterOp::IEnds),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FilterOp::Eq => "eq",
            FilterOp::Neq => "neq",
            FilterOp::Ieq => "ieq",
            FilterOp::Gt => "gt",
            FilterOp::Lt => "lt",
            FilterOp::Gte => "gte",
            FilterOp::Lte => "lte",
            FilterOp::IsNull => "isnull",
            FilterOp::Contains => "contains",
            FilterOp::Starts => "starts",
            FilterOp::Ends => "ends",
            FilterOp::IContains => "icontains",
            FilterOp::IStarts => "istarts",
            FilterOp::IEnds => "iends",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageSpec {
    pub number: u64,
    pub size: u64,
}

impl Default for PageSpec {
    fn default() -> Self {
        Self {
            number: 1,
            size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl PageSpec {
    pub fn offset(&self) -> u64 {
        self.number.saturating_sub(1).saturating_mul(self.size)
    }
}

/// Structured query request parsed from an external string-keyed parameter
/// surface: `page[number]`, `page[size]`, `sort`, `fields`,
/// `filter[<field>][<op>]=<value>`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryRequest {
    pub page: PageSpec,
    pub sort: Vec<SortSpec>,
    pub filters: Vec<Filter>,
    /// Projected field names; `None` means all fields.
    pub fields: Option<Vec<String>>,
}

impl QueryRequest {
    /// Parses raw parameters. Total and permissive: malformed sort tokens,
    /// unknown parameter keys and filter keys with unrecognized operators
    /// are dropped silently. Rejection happens once, in [`Self::validate`].
    pub fn parse<'a, I>(params: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut request = QueryRequest::default();
        for (key, value) in params {
            match key {
                "page[number]" => {
                    if let Ok(n) = value.parse::<u64>() {
                        if n >= 1 {
                            request.page.number = n;
                        }
                    }
                }
                "page[size]" => {
                    // Kept verbatim when numeric; range enforcement is
                    // validate's job, not the parser's.
                    if let Ok(n) = value.parse::<u64>() {
                        request.page.size = n;
                    }
                }
                "sort" => {
                    request.sort = parse_sort(value);
                }
                "fields" => {
                    let fields: Vec<String> = value
                        .split(',')
                        .map(str::trim)
                        .filter(|f| !f.is_empty())
                        .map(str::to_string)
                        .collect();
                    request.fields = if fields.is_empty() {
                        None
                    } else {
                        Some(fields)
                    };
                }
                _ => {
                    if let Some((field, op)) = parse_filter_key(key) {
                        request.filters.push(Filter {
                            field: field.to_string(),
                            op,
                            value: value.to_string(),
                        });
                    }
                }
            }
        }
        request
    }

    /// Pre-execution validation against a definition: every referenced
    /// field must exist and the page size must be inside its bounds.
    /// Violation fails the whole operation; nothing partial executes.
    pub fn validate(&self, def: &CollectionDefinition) -> Result<(), DyndbError> {
        self.validate_with(def, MAX_PAGE_SIZE)
    }

    pub fn validate_with(
        &self,
        def: &CollectionDefinition,
        max_page_size: u64,
    ) -> Result<(), DyndbError> {
        if self.page.number < 1 {
            return Err(DyndbError::invalid_query("page number must be at least 1"));
        }
        if self.page.size < 1 || self.page.size > max_page_size {
            return Err(DyndbError::invalid_query(format!(
                "page size {} out of range [1, {max_page_size}]",
                self.page.size
            )));
        }
        for sort in &self.sort {
            if !def.has_field(&sort.field) {
                return Err(DyndbError::unknown_field(&def.name, &sort.field));
            }
        }
        for filter in &self.filters {
            if !def.has_field(&filter.field) {
                return Err(DyndbError::unknown_field(&def.name, &filter.field));
            }
        }
        if let Some(fields) = &self.fields {
            for field in fields {
                if !def.has_field(field) {
                    return Err(DyndbError::unknown_field(&def.name, field));
                }
            }
        }
        Ok(())
    }
}

/// Comma-separated field list; a leading minus marks descending. Position
/// in the list is tie-break precedence.
fn parse_sort(value: &str) -> Vec<SortSpec> {
    value
        .split(',')
        .map(str::trim)
        .filter_map(|token| {
            let (order, field) = match token.strip_prefix('-') {
                Some(rest) => (Order::Desc, rest),
                None => (Order::Asc, token),
            };
            if field.is_empty() {
                return None;
            }
            Some(SortSpec {
                field: field.to_string(),
                order,
            })
        })
        .collect()
}

/// Matches the shape `filter[<field>][<op>]`.
fn parse_filter_key(key: &str) -> Option<(&str, FilterOp)> {
    let rest = key.strip_prefix("filter[")?;
    let (field, rest) = rest.split_once("][")?;
    let op_token = rest.strip_suffix(']')?;
    if field.is_empty() || op_token.contains(']') {
        return None;
    }
    let op = FilterOp::parse(op_token)?;
    Some((field, op))
}
