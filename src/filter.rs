use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Reserved field resolved against the file's path instead of the schema.
pub const SYSTEM_PATH_FIELD: &str = "file_path";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    In,
    NotIn,
    Contains,
    NotContains,
    Gt,
    Lt,
    Gte,
    Lte,
    Exists,
    NotExists,
    Range,
}

impl FilterOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOp::Eq => "=",
            FilterOp::Ne => "!=",
            FilterOp::In => "in",
            FilterOp::NotIn => "not in",
            FilterOp::Contains => "~",
            FilterOp::NotContains => "!~",
            FilterOp::Gt => ">",
            FilterOp::Lt => "<",
            FilterOp::Gte => ">=",
            FilterOp::Lte => "<=",
            FilterOp::Exists => "exists",
            FilterOp::NotExists => "!exists",
            FilterOp::Range => "range",
        }
    }

    fn is_numeric(&self) -> bool {
        matches!(
            self,
            FilterOp::Gt | FilterOp::Lt | FilterOp::Gte | FilterOp::Lte
        )
    }

    fn is_string_set(&self) -> bool {
        matches!(
            self,
            FilterOp::In | FilterOp::NotIn | FilterOp::Contains | FilterOp::NotContains
        )
    }
}

impl fmt::Display for FilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterCondition {
    pub field: String,
    pub op: FilterOp,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Str,
    Number,
    List,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Str => "string",
            FieldType::Number => "number",
            FieldType::List => "list",
        }
    }

    pub fn parse(raw: &str) -> FieldType {
        match raw {
            "number" => FieldType::Number,
            "list" => FieldType::List,
            _ => FieldType::Str,
        }
    }
}

/// Field name to type mapping used for operator validation and value
/// resolution. Sourced from the store's field registry, never mutated here.
#[derive(Debug, Clone, Default)]
pub struct FieldSchema {
    types: BTreeMap<String, FieldType>,
}

impl FieldSchema {
    pub fn new(types: BTreeMap<String, FieldType>) -> Self {
        Self { types }
    }

    pub fn field_type(&self, field: &str) -> Option<FieldType> {
        self.types.get(field).copied()
    }

    pub fn field_names(&self) -> Vec<String> {
        self.types.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("unknown field '{field}' (available fields: {})", .available.join(", "))]
    UnknownField {
        field: String,
        available: Vec<String>,
    },
    #[error("operator '{op}' is not supported for {kind} field '{field}'")]
    IncompatibleOperator {
        field: String,
        op: String,
        kind: String,
    },
    #[error("invalid range '{value}': both bounds must be numeric")]
    InvalidRange { value: String },
}

// Scan order mirrors the filter grammar: within one string the longest
// matching operator wins, so `!=` is never read as `=` and `not in` is
// never read as `in`. Word operators only match space-delimited.
const OPERATOR_SCAN: &[(&str, FilterOp)] = &[
    ("!=", FilterOp::Ne),
    (">=", FilterOp::Gte),
    ("<=", FilterOp::Lte),
    ("!~", FilterOp::NotContains),
    ("~", FilterOp::Contains),
    (" in ", FilterOp::In),
    (" not in ", FilterOp::NotIn),
    ("=", FilterOp::Eq),
    (">", FilterOp::Gt),
    ("<", FilterOp::Lt),
    (" exists", FilterOp::Exists),
    (" !exists", FilterOp::NotExists),
];

/// Parse a list of filter strings into conditions. Each string may contain
/// several `;`-joined sub-conditions; all conditions combine with AND and
/// input order is preserved.
pub fn parse_filters(raw: &[String], schema: &FieldSchema) -> Result<Vec<FilterCondition>, FilterError> {
    let mut conditions = Vec::new();
    for arg in raw {
        for part in arg.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            conditions.push(parse_condition(part, schema)?);
        }
    }
    Ok(conditions)
}

/// Parse a single `field OP value` expression.
pub fn parse_condition(raw: &str, schema: &FieldSchema) -> Result<FilterCondition, FilterError> {
    // Range syntax takes precedence over the operator scan.
    if raw.contains('=') && raw.contains("..") {
        return parse_range(raw, schema);
    }

    let mut best: Option<(usize, &str, FilterOp)> = None;
    for (needle, op) in OPERATOR_SCAN {
        if let Some(pos) = raw.find(needle) {
            let better = match best {
                Some((_, found, _)) => needle.len() > found.len(),
                None => true,
            };
            if better {
                best = Some((pos, *needle, *op));
            }
        }
    }

    let (field, op, value) = match best {
        Some((pos, needle, op)) => {
            let field = raw[..pos].trim().to_string();
            let value = raw[pos + needle.len()..].trim().to_string();
            (field, op, value)
        }
        // Bare field name: presence check.
        None => (raw.trim().to_string(), FilterOp::Exists, String::new()),
    };

    validate_field(&field, op, schema)?;
    Ok(FilterCondition { field, op, value })
}

fn parse_range(raw: &str, schema: &FieldSchema) -> Result<FilterCondition, FilterError> {
    let (field, value) = match raw.split_once('=') {
        Some((field, value)) => (field.trim().to_string(), value.trim().to_string()),
        None => {
            return Err(FilterError::InvalidRange {
                value: raw.to_string(),
            });
        }
    };
    let Some((min, max)) = value.split_once("..") else {
        return Err(FilterError::InvalidRange { value });
    };
    if parse_number(min).is_none() || parse_number(max).is_none() {
        return Err(FilterError::InvalidRange { value });
    }
    validate_field(&field, FilterOp::Range, schema)?;
    Ok(FilterCondition {
        field,
        op: FilterOp::Range,
        value,
    })
}

fn validate_field(field: &str, op: FilterOp, schema: &FieldSchema) -> Result<(), FilterError> {
    if field == SYSTEM_PATH_FIELD {
        return Ok(());
    }
    let Some(kind) = schema.field_type(field) else {
        return Err(FilterError::UnknownField {
            field: field.to_string(),
            available: schema.field_names(),
        });
    };
    match kind {
        FieldType::List if op.is_numeric() => Err(FilterError::IncompatibleOperator {
            field: field.to_string(),
            op: op.to_string(),
            kind: kind.as_str().to_string(),
        }),
        FieldType::Number if op.is_string_set() => Err(FilterError::IncompatibleOperator {
            field: field.to_string(),
            op: op.to_string(),
            kind: kind.as_str().to_string(),
        }),
        _ => Ok(()),
    }
}

/// Field names referenced by a condition list, deduplicated. Used to force
/// filtered-on fields into the fetch projection.
pub fn referenced_fields(conditions: &[FilterCondition]) -> Vec<String> {
    let mut fields = Vec::new();
    for cond in conditions {
        if cond.field == SYSTEM_PATH_FIELD {
            continue;
        }
        if !fields.iter().any(|f| f == &cond.field) {
            fields.push(cond.field.clone());
        }
    }
    fields
}

/// Resolved representation of a metadata value: plain scalar, JSON-encoded
/// list, or absent. Resolution happens once per lookup, directed by the
/// field schema with a JSON sniff fallback for unregistered fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataValue {
    Scalar(String),
    List(Vec<String>),
    Absent,
}

fn resolve_value(raw: Option<&str>, kind: Option<FieldType>) -> MetadataValue {
    let Some(raw) = raw else {
        return MetadataValue::Absent;
    };
    match kind {
        Some(FieldType::List) => match parse_json_list(raw) {
            Some(items) => MetadataValue::List(items),
            None => MetadataValue::Scalar(raw.to_string()),
        },
        Some(_) => MetadataValue::Scalar(raw.to_string()),
        None => match parse_json_list(raw) {
            Some(items) => MetadataValue::List(items),
            None => MetadataValue::Scalar(raw.to_string()),
        },
    }
}

pub fn parse_json_list(raw: &str) -> Option<Vec<String>> {
    let trimmed = raw.trim();
    if !trimmed.starts_with('[') {
        return None;
    }
    let value: serde_json::Value = serde_json::from_str(trimmed).ok()?;
    let items = value.as_array()?;
    Some(
        items
            .iter()
            .map(|item| match item {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect(),
    )
}

// All comparisons lowercase both sides first; numeric parsing runs on the
// lowercased text, which never changes what parses as a number.
fn parse_number(raw: &str) -> Option<f64> {
    raw.trim().to_lowercase().parse::<f64>().ok()
}

/// Evaluate every condition against one file's metadata. Returns true iff
/// all conditions hold; an empty condition list matches everything.
pub fn check_filters(
    path: &str,
    fields: &BTreeMap<String, String>,
    schema: &FieldSchema,
    conditions: &[FilterCondition],
) -> bool {
    conditions
        .iter()
        .all(|cond| check_condition(path, fields, schema, cond))
}

fn check_condition(
    path: &str,
    fields: &BTreeMap<String, String>,
    schema: &FieldSchema,
    cond: &FilterCondition,
) -> bool {
    let value = if cond.field == SYSTEM_PATH_FIELD {
        MetadataValue::Scalar(path.to_string())
    } else {
        resolve_value(
            fields.get(&cond.field).map(String::as_str),
            schema.field_type(&cond.field),
        )
    };

    match cond.op {
        FilterOp::Exists => !matches!(value, MetadataValue::Absent),
        FilterOp::NotExists => matches!(value, MetadataValue::Absent),
        _ => match value {
            MetadataValue::Absent => false,
            MetadataValue::Scalar(scalar) => check_scalar(&scalar, cond),
            MetadataValue::List(items) => check_list(&items, cond),
        },
    }
}

fn check_scalar(raw: &str, cond: &FilterCondition) -> bool {
    let value = raw.to_lowercase();
    let target = cond.value.to_lowercase();
    match cond.op {
        FilterOp::Eq => value == target,
        FilterOp::Ne => value != target,
        FilterOp::In => split_target_list(&target).iter().any(|t| *t == value),
        FilterOp::NotIn => !split_target_list(&target).iter().any(|t| *t == value),
        FilterOp::Contains => value.contains(&target),
        FilterOp::NotContains => !value.contains(&target),
        FilterOp::Gt | FilterOp::Lt | FilterOp::Gte | FilterOp::Lte => {
            let (Some(left), Some(right)) = (parse_number(&value), parse_number(&target)) else {
                return false;
            };
            match cond.op {
                FilterOp::Gt => left > right,
                FilterOp::Lt => left < right,
                FilterOp::Gte => left >= right,
                FilterOp::Lte => left <= right,
                _ => unreachable!(),
            }
        }
        FilterOp::Range => {
            let Some((min, max)) = parse_range_bounds(&target) else {
                return false;
            };
            let Some(num) = parse_number(&value) else {
                return false;
            };
            num >= min && num <= max
        }
        FilterOp::Exists | FilterOp::NotExists => true,
    }
}

// Array semantics mirror the scalar operators as membership tests over the
// elements; numeric comparisons never match against arrays.
fn check_list(items: &[String], cond: &FilterCondition) -> bool {
    let items: Vec<String> = items.iter().map(|item| item.to_lowercase()).collect();
    let target = cond.value.to_lowercase();
    match cond.op {
        FilterOp::Eq => items.iter().any(|item| *item == target),
        FilterOp::Ne => !items.iter().any(|item| *item == target),
        FilterOp::In => {
            let targets = split_target_list(&target);
            items.iter().any(|item| targets.iter().any(|t| t == item))
        }
        FilterOp::NotIn => {
            let targets = split_target_list(&target);
            !items.iter().any(|item| targets.iter().any(|t| t == item))
        }
        FilterOp::Contains => items.iter().any(|item| item.contains(&target)),
        FilterOp::NotContains => !items.iter().any(|item| item.contains(&target)),
        FilterOp::Gt | FilterOp::Lt | FilterOp::Gte | FilterOp::Lte | FilterOp::Range => false,
        FilterOp::Exists | FilterOp::NotExists => true,
    }
}

fn split_target_list(target: &str) -> Vec<String> {
    target
        .split(',')
        .map(|part| part.trim().to_string())
        .filter(|part| !part.is_empty())
        .collect()
}

fn parse_range_bounds(target: &str) -> Option<(f64, f64)> {
    let (min, max) = target.split_once("..")?;
    Some((parse_number(min)?, parse_number(max)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> FieldSchema {
        let mut types = BTreeMap::new();
        types.insert("risk_level".to_string(), FieldType::Str);
        types.insert("role".to_string(), FieldType::Str);
        types.insert("loc".to_string(), FieldType::Number);
        types.insert("topics".to_string(), FieldType::List);
        FieldSchema::new(types)
    }

    fn fields(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn parse_simple_equality() {
        let cond = parse_condition("risk_level=high", &schema()).unwrap();
        assert_eq!(cond.field, "risk_level");
        assert_eq!(cond.op, FilterOp::Eq);
        assert_eq!(cond.value, "high");
    }

    #[test]
    fn parse_prefers_longest_operator() {
        let cond = parse_condition("loc>=10", &schema()).unwrap();
        assert_eq!(cond.op, FilterOp::Gte);
        let cond = parse_condition("risk_level!=low", &schema()).unwrap();
        assert_eq!(cond.op, FilterOp::Ne);
        let cond = parse_condition("role not in user,system", &schema()).unwrap();
        assert_eq!(cond.op, FilterOp::NotIn);
        assert_eq!(cond.value, "user,system");
    }

    #[test]
    fn parse_range_condition() {
        let cond = parse_condition("loc=10..50", &schema()).unwrap();
        assert_eq!(cond.field, "loc");
        assert_eq!(cond.op, FilterOp::Range);
        assert_eq!(cond.value, "10..50");
    }

    #[test]
    fn parse_range_rejects_non_numeric_bounds() {
        let err = parse_condition("loc=abc..50", &schema()).unwrap_err();
        assert!(matches!(err, FilterError::InvalidRange { .. }));
    }

    #[test]
    fn parse_rejects_unknown_field() {
        let err = parse_condition("owner=alice", &schema()).unwrap_err();
        match err {
            FilterError::UnknownField { field, available } => {
                assert_eq!(field, "owner");
                assert!(available.contains(&"risk_level".to_string()));
            }
            other => panic!("expected UnknownField, got {other:?}"),
        }
    }

    #[test]
    fn parse_rejects_incompatible_operators() {
        let err = parse_condition("topics>3", &schema()).unwrap_err();
        assert!(matches!(err, FilterError::IncompatibleOperator { .. }));
        let err = parse_condition("loc~5", &schema()).unwrap_err();
        assert!(matches!(err, FilterError::IncompatibleOperator { .. }));
        let err = parse_condition("loc in 1,2", &schema()).unwrap_err();
        assert!(matches!(err, FilterError::IncompatibleOperator { .. }));
    }

    #[test]
    fn parse_allows_system_path_field() {
        let cond = parse_condition("file_path~src/", &schema()).unwrap();
        assert_eq!(cond.field, SYSTEM_PATH_FIELD);
        assert_eq!(cond.op, FilterOp::Contains);
    }

    #[test]
    fn parse_exists_variants() {
        let cond = parse_condition("topics exists", &schema()).unwrap();
        assert_eq!(cond.op, FilterOp::Exists);
        assert_eq!(cond.value, "");
        let cond = parse_condition("topics !exists", &schema()).unwrap();
        assert_eq!(cond.op, FilterOp::NotExists);
        // bare field reads as a presence check
        let cond = parse_condition("topics", &schema()).unwrap();
        assert_eq!(cond.op, FilterOp::Exists);
    }

    #[test]
    fn parse_splits_semicolon_joined_conditions() {
        let raw = vec!["risk_level=high;loc>100".to_string()];
        let conditions = parse_filters(&raw, &schema()).unwrap();
        assert_eq!(conditions.len(), 2);
        assert_eq!(conditions[0].field, "risk_level");
        assert_eq!(conditions[1].op, FilterOp::Gt);
    }

    #[test]
    fn eval_scalar_equality_is_case_insensitive() {
        let m = fields(&[("role", "assistant")]);
        let cond = parse_condition("role=assistant", &schema()).unwrap();
        assert!(check_filters("a.rs", &m, &schema(), &[cond]));
        let cond = parse_condition("role=ASSISTANT", &schema()).unwrap();
        assert!(check_filters("a.rs", &m, &schema(), &[cond]));
    }

    #[test]
    fn eval_array_membership() {
        let m = fields(&[("topics", r#"["security","auth"]"#)]);
        let s = schema();
        let eq = parse_condition("topics=security", &s).unwrap();
        assert!(check_filters("a.rs", &m, &s, &[eq]));
        let miss = parse_condition("topics=crypto", &s).unwrap();
        assert!(!check_filters("a.rs", &m, &s, &[miss]));
        let contains = parse_condition("topics~auth", &s).unwrap();
        assert!(check_filters("a.rs", &m, &s, &[contains]));
    }

    #[test]
    fn eval_missing_field_fails_everything_but_not_exists() {
        let m = fields(&[("role", "assistant")]);
        let s = schema();
        let eq = parse_condition("risk_level=high", &s).unwrap();
        assert!(!check_filters("a.rs", &m, &s, &[eq]));
        let not_exists = parse_condition("risk_level !exists", &s).unwrap();
        assert!(check_filters("a.rs", &m, &s, &[not_exists]));
    }

    #[test]
    fn eval_numeric_comparisons() {
        let m = fields(&[("loc", "120")]);
        let s = schema();
        assert!(check_filters(
            "a.rs",
            &m,
            &s,
            &[parse_condition("loc>100", &s).unwrap()]
        ));
        assert!(!check_filters(
            "a.rs",
            &m,
            &s,
            &[parse_condition("loc<100", &s).unwrap()]
        ));
        assert!(check_filters(
            "a.rs",
            &m,
            &s,
            &[parse_condition("loc=100..150", &s).unwrap()]
        ));
        assert!(!check_filters(
            "a.rs",
            &m,
            &s,
            &[parse_condition("loc=10..50", &s).unwrap()]
        ));
    }

    #[test]
    fn eval_non_numeric_operand_is_false_not_error() {
        let m = fields(&[("loc", "many")]);
        let s = schema();
        assert!(!check_filters(
            "a.rs",
            &m,
            &s,
            &[parse_condition("loc>100", &s).unwrap()]
        ));
    }

    #[test]
    fn eval_numeric_operators_never_match_arrays() {
        let mut types = BTreeMap::new();
        types.insert("scores".to_string(), FieldType::List);
        let s = FieldSchema::new(types);
        let m = fields(&[("scores", "[1,2,3]")]);
        let cond = FilterCondition {
            field: "scores".to_string(),
            op: FilterOp::Gt,
            value: "0".to_string(),
        };
        assert!(!check_filters("a.rs", &m, &s, &[cond]));
    }

    #[test]
    fn eval_in_and_not_in() {
        let m = fields(&[("role", "assistant")]);
        let s = schema();
        assert!(check_filters(
            "a.rs",
            &m,
            &s,
            &[parse_condition("role in user, assistant", &s).unwrap()]
        ));
        assert!(!check_filters(
            "a.rs",
            &m,
            &s,
            &[parse_condition("role not in user,assistant", &s).unwrap()]
        ));
    }

    #[test]
    fn eval_file_path_field() {
        let m = fields(&[]);
        let s = schema();
        let cond = parse_condition("file_path~src/", &s).unwrap();
        assert!(check_filters("src/main.rs", &m, &s, &[cond.clone()]));
        assert!(!check_filters("docs/readme.md", &m, &s, &[cond]));
    }

    #[test]
    fn eval_is_a_pure_conjunction() {
        let m = fields(&[("role", "assistant"), ("loc", "120")]);
        let s = schema();
        let conditions = vec![
            parse_condition("role=assistant", &s).unwrap(),
            parse_condition("loc>100", &s).unwrap(),
        ];
        let all = check_filters("a.rs", &m, &s, &conditions);
        let each = conditions
            .iter()
            .all(|cond| check_filters("a.rs", &m, &s, std::slice::from_ref(cond)));
        assert!(all);
        assert_eq!(all, each);
    }

    #[test]
    fn eval_empty_condition_list_matches_everything() {
        assert!(check_filters("a.rs", &fields(&[]), &schema(), &[]));
    }

    #[test]
    fn referenced_fields_skips_system_path() {
        let s = schema();
        let conditions = vec![
            parse_condition("risk_level=high", &s).unwrap(),
            parse_condition("file_path~src/", &s).unwrap(),
            parse_condition("risk_level!=low", &s).unwrap(),
        ];
        assert_eq!(referenced_fields(&conditions), vec!["risk_level"]);
    }
}
