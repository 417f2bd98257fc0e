use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A neighbor in a similarity result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarItem {
    pub id: String,
    pub score: f64,
}

/// `{ data }` for aggregate widgets, `{ items }` for similarity widgets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WidgetOutput {
    Aggregate { data: Map<String, Value> },
    Similarity { items: Vec<SimilarItem> },
}

/// What `compute` returns to the embedding layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetResult {
    pub widget: String,
    #[serde(flatten)]
    pub output: WidgetOutput,
    pub computed_at: DateTime<Utc>,
    pub from_cache: bool,
    /// Matched documents left out because they could not be parsed
    #[serde(default)]
    pub skipped_documents: usize,
}

impl WidgetResult {
    /// Aggregate data, if this is an aggregate result
    pub fn data(&self) -> Option<&Map<String, Value>> {
        match &self.output {
            WidgetOutput::Aggregate { data } => Some(data),
            WidgetOutput::Similarity { .. } => None,
        }
    }

    /// Ranked neighbors, if this is a similarity result
    pub fn items(&self) -> Option<&[SimilarItem]> {
        match &self.output {
            WidgetOutput::Similarity { items } => Some(items),
            WidgetOutput::Aggregate { .. } => None,
        }
    }

    /// One aggregate field
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.data().and_then(|data| data.get(field))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_shape() {
        let computed_at = Utc::now();
        let mut data = Map::new();
        data.insert("avg".to_string(), json!(7.0));
        let result = WidgetResult {
            widget: "stats".to_string(),
            output: WidgetOutput::Aggregate { data },
            computed_at,
            from_cache: true,
            skipped_documents: 0,
        };

        let wire = serde_json::to_value(&result).unwrap();
        assert_eq!(wire["data"]["avg"], json!(7.0));
        assert_eq!(wire["fromCache"], json!(true));
        assert!(wire.get("computedAt").is_some());
        assert!(wire.get("output").is_none());

        let back: WidgetResult = serde_json::from_value(wire).unwrap();
        assert_eq!(back, result);
        assert_eq!(back.get("avg"), Some(&json!(7.0)));
    }

    #[test]
    fn test_similarity_shape() {
        let result = WidgetResult {
            widget: "related".to_string(),
            output: WidgetOutput::Similarity {
                items: vec![SimilarItem {
                    id: "b.md".to_string(),
                    score: 0.5,
                }],
            },
            computed_at: Utc::now(),
            from_cache: false,
            skipped_documents: 1,
        };
        let wire = serde_json::to_value(&result).unwrap();
        assert_eq!(wire["items"][0]["id"], "b.md");
        assert_eq!(wire["skippedDocuments"], 1);
        assert!(result.data().is_none());
        assert_eq!(result.items().unwrap().len(), 1);
    }
}
