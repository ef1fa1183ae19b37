use serde_json::Value;

/// Fixed column projections per entity type. Unknown types fall back to the
/// key set of the first record.
fn columns(entity_type: &str, records: &[Value]) -> Vec<String> {
    let fixed: Option<&[&str]> = match entity_type {
        "jobs" => Some(&[
            "id",
            "status",
            "property_name",
            "template_name",
            "scheduled_date",
            "created_at",
        ]),
        "properties" => Some(&["id", "name", "address", "city", "state", "zip"]),
        "people" => Some(&["id", "first_name", "last_name", "email", "phone"]),
        "opps" => Some(&[
            "id",
            "workflow_status",
            "property_name",
            "service_template_name",
            "due_date",
            "created_at",
        ]),
        _ => None,
    };

    match fixed {
        Some(cols) => cols.iter().map(|c| c.to_string()).collect(),
        None => records
            .first()
            .and_then(Value::as_object)
            .map(|obj| obj.keys().cloned().collect())
            .unwrap_or_default(),
    }
}

/// Nested fallback paths for canonical columns that may live under a joined
/// sub-object on the raw record.
fn fallback_path(column: &str) -> Option<&'static [&'static str]> {
    match column {
        "property_name" => Some(&["properties", "name"]),
        "template_name" => Some(&["job_templates", "name"]),
        "service_template_name" => Some(&["service_templates", "name"]),
        _ => None,
    }
}

fn field_value(record: &Value, column: &str) -> String {
    let direct = record.get(column).filter(|v| !v.is_null());
    let value = match direct {
        Some(v) => Some(v),
        None => fallback_path(column).and_then(|path| {
            let mut cur = record;
            for key in path {
                cur = cur.get(key)?;
            }
            (!cur.is_null()).then_some(cur)
        }),
    };

    match value {
        None => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// A field containing a comma, double quote or newline is wrapped in double
/// quotes with internal double quotes doubled.
fn escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Serialize a record array to CSV with the projection for `entity_type`.
/// Empty input yields an empty string.
pub fn to_csv(records: &[Value], entity_type: &str) -> String {
    if records.is_empty() {
        return String::new();
    }

    let cols = columns(entity_type, records);
    let header = cols.join(",");

    let mut rows = Vec::with_capacity(records.len() + 1);
    rows.push(header);
    for record in records {
        let row: Vec<String> = cols
            .iter()
            .map(|col| escape(&field_value(record, col)))
            .collect();
        rows.push(row.join(","));
    }

    rows.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_jobs_projection_and_quoting() {
        let records = vec![json!({
            "id": 1,
            "status": "Complete",
            "property_name": "A, B"
        })];
        let csv = to_csv(&records, "jobs");
        let mut lines = csv.lines();
        assert_eq!(
            lines.next().unwrap(),
            "id,status,property_name,template_name,scheduled_date,created_at"
        );
        assert_eq!(lines.next().unwrap(), "1,Complete,\"A, B\",,,");
        assert!(lines.next().is_none());
    }

    #[test]
    fn test_nested_fallbacks() {
        let records = vec![json!({
            "id": "j1",
            "status": "scheduled",
            "properties": {"name": "Oak House"},
            "job_templates": {"name": "Spring Service"}
        })];
        let csv = to_csv(&records, "jobs");
        assert_eq!(csv.lines().nth(1).unwrap(), "j1,scheduled,Oak House,Spring Service,,");
    }

    #[test]
    fn test_quote_and_newline_escaping() {
        let records = vec![json!({
            "id": "p1",
            "name": "The \"Lodge\"",
            "address": "1 Elm\nRear unit",
            "city": "Bern",
            "state": null
        })];
        let csv = to_csv(&records, "properties");
        assert_eq!(
            csv.lines().count(),
            3, // header + one row split by the embedded newline
        );
        assert!(csv.contains("\"The \"\"Lodge\"\"\""));
        assert!(csv.contains("\"1 Elm\nRear unit\""));
        // null and absent columns both render empty
        assert!(csv.ends_with("Bern,,"));
    }

    #[test]
    fn test_unknown_type_uses_first_record_keys() {
        let records = vec![json!({"beta": 2, "alpha": 1})];
        let csv = to_csv(&records, "widgets");
        // serde_json maps are key-ordered
        assert_eq!(csv, "alpha,beta\n1,2");
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(to_csv(&[], "jobs"), "");
    }
}
