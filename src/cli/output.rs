use std::path::PathBuf;

use serde_json::{Value, json};

use crate::models::{IndexStats, OutputFormat, Retrieval, RetrievedPassage};
use crate::services::{IngestOutcome, IngestReport};

pub trait Formatter {
    fn format_search_results(&self, query: &str, results: &[RetrievedPassage], duration_ms: u64)
    -> String;
    fn format_retrieval(&self, retrieval: &Retrieval) -> String;
    fn format_ingest_report(&self, report: &IngestReport) -> String;
    fn format_status(&self, status: &StatusInfo) -> String;
    fn format_message(&self, message: &str) -> String;
    fn format_error(&self, error: &str) -> String;
}

#[derive(Debug, Clone)]
pub struct StatusInfo {
    pub index: IndexStats,
    pub index_dir: PathBuf,
    pub backend: String,
    pub embedder: String,
    pub dimension: u32,
}

impl StatusInfo {
    /// Whether the persisted index was built by the configured embedder.
    pub fn embedder_matches(&self) -> bool {
        self.index.embedder_id.as_deref().is_none_or(|id| id == self.embedder)
    }
}

pub struct TextFormatter;

impl Formatter for TextFormatter {
    fn format_search_results(
        &self,
        query: &str,
        results: &[RetrievedPassage],
        duration_ms: u64,
    ) -> String {
        if results.is_empty() {
            return format!("No results found for: {query}\n");
        }

        let mut output = format!("Search results for: \"{query}\"\n");
        output.push_str(&format!(
            "Found {} results in {duration_ms}ms\n\n",
            results.len()
        ));

        for (i, result) in results.iter().enumerate() {
            output.push_str(&format!("{}. [Score: {:.3}]\n", i + 1, result.score));
            output.push_str(&format!("   {}\n", result.citation()));
            output.push_str("   ---\n");

            let preview: String = result.content.chars().take(200).collect();
            let preview = if result.content.chars().count() > 200 {
                format!("{preview}...")
            } else {
                preview
            };
            for line in preview.lines() {
                output.push_str(&format!("   {line}\n"));
            }
            output.push('\n');
        }

        output
    }

    fn format_retrieval(&self, retrieval: &Retrieval) -> String {
        format!("{}\n", retrieval.user_message().trim_end())
    }

    fn format_ingest_report(&self, report: &IngestReport) -> String {
        let duration_ms = (report.finished_at - report.started_at).num_milliseconds();
        let mut output = String::new();
        match &report.outcome {
            IngestOutcome::Promoted { .. } => output.push_str("Ingestion Complete\n------------------\n"),
            IngestOutcome::Failed { phase, error } => {
                output.push_str(&format!("Ingestion Failed ({phase})\n-----------------\n"));
                output.push_str(&format!("Error: {error}\n"));
            }
            IngestOutcome::Cancelled => output.push_str("Ingestion Cancelled\n-------------------\n"),
        }
        output.push_str(&format!("Documents:      {}\n", report.documents_total));
        output.push_str(&format!("Ingested:       {}\n", report.documents_ingested));
        output.push_str(&format!("Skipped:        {}\n", report.failures.len()));
        output.push_str(&format!("Passages:       {}\n", report.passages));
        output.push_str(&format!("Reused vectors: {}\n", report.reused_vectors));
        output.push_str(&format!("Duration:       {duration_ms}ms\n"));

        if !report.failures.is_empty() {
            output.push_str("\nSkipped documents:\n");
            for failure in &report.failures {
                output.push_str(&format!(
                    "  {} ({}): {}\n",
                    failure.document, failure.phase, failure.reason
                ));
            }
        }
        output
    }

    fn format_status(&self, status: &StatusInfo) -> String {
        let mut output = String::from("Status\n------\n");
        output.push_str(&format!(
            "Embedding:     {} ({}, d{})\n",
            status.embedder, status.backend, status.dimension
        ));
        output.push_str(&format!("Index path:    {}\n", status.index_dir.display()));

        let index = &status.index;
        if !index.built {
            output.push_str("Index:         [EMPTY]\n");
            return output;
        }
        output.push_str("Index:         [LOADED]\n");
        output.push_str(&format!("  Documents:   {}\n", index.documents));
        output.push_str(&format!("  Passages:    {}\n", index.passages));
        output.push_str(&format!("  Dimension:   {}\n", index.dimension));
        if let Some(id) = &index.embedder_id {
            output.push_str(&format!("  Embedder:    {id}\n"));
        }
        if let Some(built_at) = &index.built_at {
            output.push_str(&format!("  Built:       {built_at}\n"));
        }
        output
    }

    fn format_message(&self, message: &str) -> String {
        format!("{message}\n")
    }

    fn format_error(&self, error: &str) -> String {
        format!("Error: {error}\n")
    }
}

pub struct JsonFormatter {
    pub pretty: bool,
}

impl JsonFormatter {
    pub fn new(pretty: bool) -> Self {
        Self { pretty }
    }

    fn render(&self, value: &Value) -> String {
        let rendered = if self.pretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        };
        rendered.unwrap_or_else(|e| json!({ "error": e.to_string() }).to_string())
    }
}

impl Formatter for JsonFormatter {
    fn format_search_results(
        &self,
        query: &str,
        results: &[RetrievedPassage],
        duration_ms: u64,
    ) -> String {
        self.render(&json!({
            "query": query,
            "total": results.len(),
            "duration_ms": duration_ms,
            "results": results,
        }))
    }

    fn format_retrieval(&self, retrieval: &Retrieval) -> String {
        let mut value = serde_json::to_value(retrieval).unwrap_or(Value::Null);
        if let Value::Object(map) = &mut value {
            map.insert("message".to_string(), json!(retrieval.user_message()));
        }
        self.render(&value)
    }

    fn format_ingest_report(&self, report: &IngestReport) -> String {
        let outcome = match &report.outcome {
            IngestOutcome::Promoted {
                passages,
                dimension,
            } => json!({ "status": "promoted", "passages": passages, "dimension": dimension }),
            IngestOutcome::Failed { phase, error } => {
                json!({ "status": "failed", "phase": phase, "error": error.to_string() })
            }
            IngestOutcome::Cancelled => json!({ "status": "cancelled" }),
        };

        self.render(&json!({
            "started_at": report.started_at.to_rfc3339(),
            "finished_at": report.finished_at.to_rfc3339(),
            "documents_total": report.documents_total,
            "documents_ingested": report.documents_ingested,
            "passages": report.passages,
            "reused_vectors": report.reused_vectors,
            "failures": report.failures,
            "outcome": outcome,
        }))
    }

    fn format_status(&self, status: &StatusInfo) -> String {
        self.render(&json!({
            "embedding": {
                "backend": status.backend,
                "embedder": status.embedder,
                "dimension": status.dimension,
            },
            "index_dir": status.index_dir,
            "index": status.index,
            "embedder_matches": status.embedder_matches(),
        }))
    }

    fn format_message(&self, message: &str) -> String {
        json!({ "message": message }).to_string()
    }

    fn format_error(&self, error: &str) -> String {
        json!({ "error": error }).to_string()
    }
}

pub fn get_formatter(format: OutputFormat) -> Box<dyn Formatter> {
    match format {
        OutputFormat::Text => Box::new(TextFormatter),
        OutputFormat::Json => Box::new(JsonFormatter::new(true)),
    }
}
