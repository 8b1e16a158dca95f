//! Local JSON dataset collaborator.
//!
//! The dataset is a JSON array of flat objects (sensor readings, operator
//! reports, maintenance logs). Records are filtered by the request's filters
//! and ranked by how many query terms they mention.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::{Capability, Evidence, RetrievalAgent};
use crate::error::{RcaError, Result};
use crate::state_machine::Filters;

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "what", "why", "was", "were", "with", "this", "that", "from", "show",
    "did", "does", "caused", "cause", "are", "any", "all", "about", "into", "last", "me",
];

const TEXT_FIELDS: &[&str] = &["description", "summary", "notes", "issue", "observation", "message"];
const ID_FIELDS: &[&str] = &["id", "report_id", "log_id", "reading_id"];
const TIME_FIELDS: &[&str] = &["timestamp", "date", "reported_at"];

pub struct DatasetAgent {
    capability: Capability,
    path: PathBuf,
    records: Vec<Map<String, Value>>,
}

impl DatasetAgent {
    pub fn load(capability: Capability, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let contents = std::fs::read_to_string(&path)?;
        let records = match serde_json::from_str::<Value>(&contents)? {
            Value::Array(items) => items
                .into_iter()
                .filter_map(|v| match v {
                    Value::Object(map) => Some(map),
                    _ => None,
                })
                .collect(),
            _ => {
                return Err(RcaError::Config(format!(
                    "dataset {} must be a JSON array of objects",
                    path.display()
                )));
            }
        };
        Ok(Self {
            capability,
            path,
            records,
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    fn matches_filters(record: &Map<String, Value>, filters: &Filters) -> bool {
        if let Some(machine) = &filters.machine_id
            && !field_equals(record, &["machine_id", "machineId"], machine)
        {
            return false;
        }
        if let Some(sensor) = &filters.sensor_type
            && !field_equals(record, &["sensor_type", "sensorType"], sensor)
        {
            return false;
        }
        // ISO-8601 strings order lexicographically; records without a time field pass.
        if let Some(ts) = first_str(record, TIME_FIELDS) {
            if let Some(start) = &filters.start_date
                && ts < start.as_str()
            {
                return false;
            }
            if let Some(end) = &filters.end_date
                && !ts.starts_with(end.as_str())
                && ts > end.as_str()
            {
                return false;
            }
        }
        true
    }

    fn evidence(&self, index: usize, record: &Map<String, Value>, score: usize) -> Evidence {
        let source = first_str(record, ID_FIELDS)
            .map(str::to_string)
            .unwrap_or_else(|| {
                let name = self
                    .path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| self.capability.name().to_string());
                format!("{name}#{index}")
            });
        let text = first_str(record, TEXT_FIELDS)
            .map(str::to_string)
            .unwrap_or_else(|| Value::Object(record.clone()).to_string());
        Evidence {
            source: Some(source),
            text,
            score: Some(score as f64),
            metadata: Value::Object(record.clone()),
        }
    }
}

#[async_trait]
impl RetrievalAgent for DatasetAgent {
    fn capability(&self) -> Capability {
        self.capability
    }

    async fn retrieve(&self, query: &str, filters: &Filters) -> Result<Vec<Evidence>> {
        let terms = query_terms(query);
        let narrowed = filters.machine_id.is_some() || filters.sensor_type.is_some();

        let mut scored: Vec<(usize, usize)> = self
            .records
            .iter()
            .enumerate()
            .filter(|(_, r)| Self::matches_filters(r, filters))
            .map(|(i, r)| {
                let haystack = Value::Object(r.clone()).to_string().to_lowercase();
                let score = terms.iter().filter(|t| haystack.contains(t.as_str())).count();
                (i, score)
            })
            .filter(|(_, score)| *score > 0 || narrowed)
            .collect();

        // Stable: equal scores keep dataset order.
        scored.sort_by(|a, b| b.1.cmp(&a.1));
        scored.truncate(filters.top_k());

        Ok(scored
            .into_iter()
            .map(|(i, score)| self.evidence(i, &self.records[i], score))
            .collect())
    }
}

fn query_terms(query: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for term in query
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .map(str::to_lowercase)
        .filter(|t| t.len() >= 3 && !STOPWORDS.contains(&t.as_str()))
    {
        if !terms.contains(&term) {
            terms.push(term);
        }
    }
    terms
}

fn first_str<'a>(record: &'a Map<String, Value>, fields: &[&str]) -> Option<&'a str> {
    fields
        .iter()
        .find_map(|f| record.get(*f).and_then(Value::as_str))
}

fn field_equals(record: &Map<String, Value>, fields: &[&str], expected: &str) -> bool {
    first_str(record, fields).is_some_and(|v| v.eq_ignore_ascii_case(expected))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_dataset(json: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file
    }

    fn maintenance_logs() -> tempfile::NamedTempFile {
        write_dataset(
            r#"[
                {"log_id": "ML-1", "machine_id": "MCH_003", "date": "2024-03-01", "description": "Replaced cooling fan bearing"},
                {"log_id": "ML-2", "machine_id": "MCH_007", "date": "2024-03-04", "description": "Hydraulic pump seal repair"},
                {"log_id": "ML-3", "machine_id": "MCH_003", "date": "2024-03-09", "description": "Cooling fan inspection, bearing noise"},
                {"log_id": "ML-4", "machine_id": "MCH_012", "date": "2024-03-10", "description": "Firmware update"}
            ]"#,
        )
    }

    #[tokio::test]
    async fn ranks_by_term_matches() {
        let file = maintenance_logs();
        let agent = DatasetAgent::load(Capability::Maintenance, file.path()).unwrap();
        assert_eq!(agent.len(), 4);

        let evidence = agent
            .retrieve("cooling fan bearing noise", &Filters::default())
            .await
            .unwrap();
        let sources: Vec<_> = evidence.iter().map(|e| e.source.clone().unwrap()).collect();
        assert_eq!(sources, vec!["ML-3", "ML-1"]);
        assert_eq!(evidence[0].text, "Cooling fan inspection, bearing noise");
        assert_eq!(evidence[0].score, Some(4.0));
    }

    #[tokio::test]
    async fn machine_filter_narrows_results() {
        let file = maintenance_logs();
        let agent = DatasetAgent::load(Capability::Maintenance, file.path()).unwrap();
        let filters = Filters {
            machine_id: Some("mch_003".into()),
            ..Default::default()
        };

        // Filtered records are returned even without term matches.
        let evidence = agent.retrieve("history", &filters).await.unwrap();
        assert_eq!(evidence.len(), 2);
        assert!(evidence.iter().all(|e| e.metadata["machine_id"] == "MCH_003"));
    }

    #[tokio::test]
    async fn date_range_and_top_k() {
        let file = maintenance_logs();
        let agent = DatasetAgent::load(Capability::Maintenance, file.path()).unwrap();
        let filters = Filters {
            start_date: Some("2024-03-02".into()),
            end_date: Some("2024-03-09".into()),
            top_k: Some(1),
            ..Default::default()
        };

        let evidence = agent.retrieve("pump seal bearing", &filters).await.unwrap();
        assert_eq!(evidence.len(), 1);
        assert_eq!(evidence[0].source.as_deref(), Some("ML-2"));
    }

    #[tokio::test]
    async fn no_matches_is_empty_success() {
        let file = maintenance_logs();
        let agent = DatasetAgent::load(Capability::Maintenance, file.path()).unwrap();
        let evidence = agent.retrieve("quantum flux", &Filters::default()).await.unwrap();
        assert!(evidence.is_empty());
    }

    #[test]
    fn rejects_non_array_dataset() {
        let file = write_dataset(r#"{"not": "an array"}"#);
        let err = DatasetAgent::load(Capability::Sensor, file.path()).err().unwrap();
        assert!(matches!(err, RcaError::Config(_)));
    }

    #[test]
    fn query_terms_drop_short_and_stopwords() {
        assert_eq!(
            query_terms("What caused the temperature spike on MCH_003?"),
            vec!["temperature", "spike", "mch_003"]
        );
        assert_eq!(
            query_terms("spike on MCH_003 after the temperature spike"),
            vec!["spike", "mch_003", "after", "temperature"]
        );
    }
}
