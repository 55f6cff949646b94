//! Analysis Orchestrator
//!
//! Turns a captured query into a stored analysis: existence check, prompt,
//! one provider call, lenient parse, persist.

use std::sync::Arc;

use super::client::{AnalysisProvider, ProviderClient};
use super::models::*;
use super::parser::parse_analysis_response;
use super::prompt::build_optimization_prompt;
use crate::models::{NewQueryAnalysis, QueryRecord};
use crate::services::{LedgerError, QueryLedger};

pub struct QueryAnalyzer {
    provider: Arc<dyn AnalysisProvider>,
    model: String,
    ledger: QueryLedger,
}

impl QueryAnalyzer {
    pub fn new(provider: Arc<dyn AnalysisProvider>, model: impl Into<String>, ledger: QueryLedger) -> Self {
        Self { provider, model: model.into(), ledger }
    }

    /// Build the configured provider client
    pub fn from_settings(settings: &ProviderSettings, ledger: QueryLedger) -> Result<Self, ProviderError> {
        let client = ProviderClient::from_settings(settings)?;
        Ok(Self::new(Arc::new(client), settings.model.clone(), ledger))
    }

    pub fn provider(&self) -> ProviderKind {
        self.provider.kind()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Analyze a stored record by id
    pub async fn analyze_record(&self, record_id: i64) -> Result<AnalysisOutcome, LedgerError> {
        let record = self
            .ledger
            .get_record(record_id)
            .await?
            .ok_or(LedgerError::RecordNotFound(record_id))?;
        self.analyze_query(&record).await
    }

    /// Provider failures come back as [`AnalysisOutcome::Unavailable`]; only
    /// ledger failures are errors.
    pub async fn analyze_query(&self, record: &QueryRecord) -> Result<AnalysisOutcome, LedgerError> {
        if let Some(existing) = self.ledger.get_analysis_for_record(record.id).await? {
            return Ok(AnalysisOutcome::AlreadyAnalyzed(existing));
        }

        let prompt = build_optimization_prompt(record);
        let answer = match self.provider.analyze(&prompt, &self.model).await {
            Ok(answer) => answer,
            Err(e) => {
                tracing::info!("AI analysis failed with {}: {}", self.provider.kind(), e);
                return Ok(AnalysisOutcome::Unavailable);
            },
        };

        let analysis = parse_analysis_response(&answer);
        let new_analysis = NewQueryAnalysis::from_analysis(record.id, analysis);

        match self.ledger.insert_analysis(&new_analysis).await {
            Ok(stored) => {
                tracing::info!("Stored analysis {} for query {}", stored.id, record.id);
                Ok(AnalysisOutcome::Analyzed(stored))
            },
            Err(LedgerError::AlreadyAnalyzed(_)) => {
                tracing::debug!("Query {} was analyzed concurrently", record.id);
                let existing = self
                    .ledger
                    .get_analysis_for_record(record.id)
                    .await?
                    .ok_or(LedgerError::AlreadyAnalyzed(record.id))?;
                Ok(AnalysisOutcome::AlreadyAnalyzed(existing))
            },
            Err(e) => Err(e),
        }
    }
}
