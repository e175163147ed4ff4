use crate::engine::MarketDataAggregator;
use crate::engine::condition;
use crate::engine::confidence;
use crate::engine::identify::{self, LookupHint};
use crate::engine::pricing;
use crate::engine::signals::{self, TextSignals};
use crate::engine::types::{
    ConditionAssessment, ConditionGrade, ConfidenceReport, Identification, MarketSnapshot,
    PricingRecommendation,
};
use crate::llm::{LlmClient, LlmConfig, vision};
use crate::models::{AnalysisRequest, AnalysisResponse, ImagesSource, MarketSummary, StageReport};
use crate::security::AuthContext;
use crate::sources::{ListingSource, barcode, ebay::EbaySource, stockx::StockxSource};
use serde_json::{Value, json};
use std::{
    collections::HashSet,
    future::Future,
    sync::Arc,
    time::Instant,
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

#[derive(Clone)]
pub struct Pipeline {
    pub llm: Arc<LlmClient>,
    pub aggregator: Arc<MarketDataAggregator>,
}

impl Pipeline {
    pub fn new() -> Self {
        let llm = LlmClient::new(LlmConfig::from_env());
        let sources: Vec<Arc<dyn ListingSource>> = vec![
            Arc::new(EbaySource) as Arc<dyn ListingSource>,
            Arc::new(StockxSource),
        ];
        Self {
            llm: Arc::new(llm),
            aggregator: Arc::new(MarketDataAggregator::new(sources)),
        }
    }

    pub async fn run(
        &self,
        request: AnalysisRequest,
        auth: Option<AuthContext>,
    ) -> Result<AnalysisResponse, PipelineError> {
        self.run_with_cancel(request, auth, CancellationToken::new())
            .await
    }

    pub async fn run_with_cancel(
        &self,
        request: AnalysisRequest,
        auth: Option<AuthContext>,
        cancel: CancellationToken,
    ) -> Result<AnalysisResponse, PipelineError> {
        if let Some(context) = auth.as_ref() {
            info!(
                target = "magpie.api",
                org_id = %context.org_id,
                api_key = %context.api_key_id,
                "analysis pipeline invoked",
            );
        }

        let request = Arc::new(request);
        let mut stages = Vec::new();

        let input = self
            .capture_stage("validate_input", &cancel, &mut stages, {
                let req = request.clone();
                async move { stages::validate_input(&req) }
            })
            .await?;

        let text_signals = self
            .capture_stage("classify_signals", &cancel, &mut stages, {
                let input = input.clone();
                async move { stages::classify_signals(&input) }
            })
            .await?;

        let llm = self.llm.clone();
        let identification = self
            .capture_stage("identify_item", &cancel, &mut stages, {
                let req = request.clone();
                let input = input.clone();
                let text_signals = text_signals.clone();
                let llm = llm.clone();
                async move {
                    stages::identify_item(&llm, &input, &text_signals, req.category_hint.as_deref())
                        .await
                }
            })
            .await?;

        let condition = self
            .capture_stage("assess_condition", &cancel, &mut stages, {
                let req = request.clone();
                let input = input.clone();
                let llm = llm.clone();
                async move {
                    stages::assess_condition(
                        &llm,
                        &input,
                        req.condition_override,
                        req.condition_notes.as_deref(),
                    )
                    .await
                }
            })
            .await?;

        if request.dry_run {
            return Ok(AnalysisResponse {
                analysis_id: format!("PREVIEW-{}", Uuid::new_v4().simple()),
                identification,
                condition,
                market: None,
                pricing: None,
                confidence: None,
                stages,
            });
        }

        let snapshot = self
            .capture_stage("fetch_market", &cancel, &mut stages, {
                let aggregator = self.aggregator.clone();
                let identification = identification.clone();
                let grade = condition.grade;
                async move { stages::fetch_market(&aggregator, &identification, grade).await }
            })
            .await?;

        self.capture_stage("analyze_trend", &cancel, &mut stages, {
            let snapshot = snapshot.clone();
            async move { stages::analyze_trend(&snapshot) }
        })
        .await?;

        self.capture_stage("estimate_demand", &cancel, &mut stages, {
            let snapshot = snapshot.clone();
            async move { stages::estimate_demand(&snapshot) }
        })
        .await?;

        let pricing = self
            .capture_stage("price_item", &cancel, &mut stages, {
                let snapshot = snapshot.clone();
                let identification = identification.clone();
                let grade = condition.grade;
                async move { stages::price_item(&snapshot, grade, &identification) }
            })
            .await?;

        let confidence = self
            .capture_stage("score_confidence", &cancel, &mut stages, {
                let snapshot = snapshot.clone();
                let identification = identification.clone();
                let condition = condition.clone();
                async move { stages::score_confidence(&identification, &condition, &snapshot) }
            })
            .await?;

        Ok(AnalysisResponse {
            analysis_id: format!("MAG-{}", Uuid::new_v4().simple()),
            identification,
            condition,
            market: Some(MarketSummary::from(&snapshot)),
            pricing: Some(pricing),
            confidence: Some(confidence),
            stages,
        })
    }

    async fn capture_stage<T, Fut>(
        &self,
        name: &'static str,
        cancel: &CancellationToken,
        stages: &mut Vec<StageReport>,
        fut: Fut,
    ) -> Result<T, PipelineError>
    where
        Fut: Future<Output = Result<StageOutcome<T>, PipelineError>>,
    {
        if cancel.is_cancelled() {
            return Err(PipelineError::cancelled(name));
        }
        let started = Instant::now();
        let outcome = tokio::select! {
            _ = cancel.cancelled() => return Err(PipelineError::cancelled(name)),
            outcome = fut => outcome?,
        };
        let elapsed_ms = started.elapsed().as_millis();
        crate::metrics::stage_elapsed(name, elapsed_ms);
        stages.push(StageReport::new(name, elapsed_ms, outcome.output));
        Ok(outcome.value)
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Error)]
#[error("stage `{stage}` failed: {message}")]
pub struct PipelineError {
    stage: &'static str,
    message: String,
    kind: PipelineErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineErrorKind {
    InvalidInput,
    Internal,
    Cancelled,
}

impl PipelineError {
    pub fn invalid_input(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: PipelineErrorKind::InvalidInput,
        }
    }

    pub fn internal(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: PipelineErrorKind::Internal,
        }
    }

    pub fn cancelled(stage: &'static str) -> Self {
        Self {
            stage,
            message: "cancelled".to_string(),
            kind: PipelineErrorKind::Cancelled,
        }
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    pub fn kind(&self) -> PipelineErrorKind {
        self.kind
    }

    pub fn detail(&self) -> &str {
        &self.message
    }
}

#[derive(Debug)]
pub struct StageOutcome<T> {
    pub value: T,
    pub output: Value,
}

impl<T> StageOutcome<T> {
    fn new(value: T, output: Value) -> Self {
        Self { value, output }
    }
}

/// The cleaned request inputs every later stage works from.
#[derive(Debug, Clone)]
pub struct ValidatedInput {
    pub images: Vec<String>,
    pub text: Vec<String>,
    pub barcode: Option<String>,
}

pub mod stages {
    use super::*;

    pub fn validate_input(
        request: &AnalysisRequest,
    ) -> Result<StageOutcome<ValidatedInput>, PipelineError> {
        let mut images = match request.images_source.clone() {
            Some(ImagesSource::Single(value)) => tokenize(&value),
            Some(ImagesSource::Multiple(values)) => values
                .into_iter()
                .flat_map(|value| tokenize(&value))
                .collect(),
            None => Vec::new(),
        };
        images = deduplicate(images);

        let max_images = max_images_allowed();
        if images.len() > max_images {
            return Err(PipelineError::invalid_input(
                "validate_input",
                "too_many_images",
            ));
        }

        let allowlist = image_domain_allowlist();
        for url in &images {
            match reqwest::Url::parse(url) {
                Ok(parsed) => {
                    if !matches!(parsed.scheme(), "http" | "https") {
                        return Err(PipelineError::invalid_input(
                            "validate_input",
                            format!("unsupported_url_scheme: {url}"),
                        ));
                    }
                    if let Some(allowed) = &allowlist
                        && let Some(host) = parsed.host_str()
                        && !host_allowed(host, allowed)
                    {
                        return Err(PipelineError::invalid_input(
                            "validate_input",
                            format!("domain_not_allowed: {host}"),
                        ));
                    }
                }
                Err(_) => {
                    return Err(PipelineError::invalid_input(
                        "validate_input",
                        format!("invalid_image_url: {url}"),
                    ));
                }
            }
        }

        let text: Vec<String> = request
            .text_snippets
            .iter()
            .map(|snippet| snippet.trim().to_string())
            .filter(|snippet| !snippet.is_empty())
            .collect();

        let barcode = request
            .barcode
            .as_deref()
            .map(str::trim)
            .filter(|code| !code.is_empty())
            .map(str::to_string);
        if let Some(code) = &barcode
            && (!(8..=14).contains(&code.len()) || !code.chars().all(|ch| ch.is_ascii_digit()))
        {
            return Err(PipelineError::invalid_input(
                "validate_input",
                "invalid_barcode",
            ));
        }

        if images.is_empty() && text.is_empty() && barcode.is_none() {
            return Err(PipelineError::invalid_input(
                "validate_input",
                "no usable input: provide images, text, or a barcode",
            ));
        }

        let input = ValidatedInput {
            images,
            text,
            barcode,
        };
        let output = json!({
            "images": input.images.len(),
            "preview": input.images.iter().take(2).collect::<Vec<_>>(),
            "text_snippets": input.text.len(),
            "has_barcode": input.barcode.is_some(),
        });
        Ok(StageOutcome::new(input, output))
    }

    pub fn classify_signals(
        input: &ValidatedInput,
    ) -> Result<StageOutcome<TextSignals>, PipelineError> {
        let mut corpus = input.text.clone();
        if let Some(code) = &input.barcode {
            corpus.push(code.clone());
        }
        let text_signals = signals::classify(&corpus);
        let output = json!({
            "brands": text_signals.brands,
            "sizes": text_signals.sizes.len(),
            "style_codes": text_signals.style_codes.len(),
            "barcodes": text_signals.barcodes.len(),
            "prices": text_signals.prices.len(),
            "total": text_signals.signal_count(),
        });
        Ok(StageOutcome::new(text_signals, output))
    }

    pub async fn identify_item(
        llm: &LlmClient,
        input: &ValidatedInput,
        text_signals: &TextSignals,
        category_hint: Option<&str>,
    ) -> Result<StageOutcome<Identification>, PipelineError> {
        let guess = vision::identify(llm, &input.images, &input.text).await;

        let lookup = match &input.barcode {
            Some(code) => match barcode::lookup(code).await {
                Some(record) => LookupHint {
                    name: record.title,
                    brand: record.brand,
                    category_hint: record.category,
                },
                None => LookupHint::default(),
            },
            None => LookupHint::default(),
        };

        let identification = identify::aggregate(guess.as_ref(), text_signals, &lookup, category_hint);
        let output = json!({
            "name": identification.name,
            "brand": identification.brand,
            "category": identification.category,
            "method": identification.method,
            "confidence": identification.confidence,
            "search_key": identification.search_key(),
            "vision_used": guess.is_some(),
        });
        Ok(StageOutcome::new(identification, output))
    }

    pub async fn assess_condition(
        llm: &LlmClient,
        input: &ValidatedInput,
        override_grade: Option<ConditionGrade>,
        notes: Option<&str>,
    ) -> Result<StageOutcome<ConditionAssessment>, PipelineError> {
        if let Some(grade) = override_grade {
            let assessment = ConditionAssessment {
                grade,
                confidence: 1.0,
                factors: Vec::new(),
            };
            let output = json!({
                "grade": grade.key(),
                "confidence": 1.0,
                "source": "override",
            });
            return Ok(StageOutcome::new(assessment, output));
        }

        let narrative = vision::condition_narrative(llm, &input.images, notes).await;
        let narrative_used = narrative.is_some();
        let mut text = narrative.unwrap_or_default();
        if let Some(notes) = notes {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(notes);
        }

        let assessment = condition::assess(&text);
        let output = json!({
            "grade": assessment.grade.key(),
            "confidence": assessment.confidence,
            "factors": assessment.factors.len(),
            "narrative_used": narrative_used,
        });
        Ok(StageOutcome::new(assessment, output))
    }

    pub async fn fetch_market(
        aggregator: &MarketDataAggregator,
        identification: &Identification,
        grade: ConditionGrade,
    ) -> Result<StageOutcome<MarketSnapshot>, PipelineError> {
        let snapshot = aggregator.market_snapshot(identification, grade).await;
        let output = json!({
            "search_key": identification.search_key(),
            "grade": grade.key(),
            "sold_count": snapshot.sold_count,
            "average": snapshot.average,
            "competition": snapshot.competition,
            "fallback": snapshot.fallback,
        });
        Ok(StageOutcome::new(snapshot, output))
    }

    pub fn analyze_trend(
        snapshot: &MarketSnapshot,
    ) -> Result<StageOutcome<crate::engine::types::Trend>, PipelineError> {
        let trend = snapshot.trend.clone();
        let output = json!(&trend);
        Ok(StageOutcome::new(trend, output))
    }

    pub fn estimate_demand(
        snapshot: &MarketSnapshot,
    ) -> Result<StageOutcome<crate::engine::types::DemandIndicators>, PipelineError> {
        let demand = snapshot.demand.clone();
        let output = json!(&demand);
        Ok(StageOutcome::new(demand, output))
    }

    pub fn price_item(
        snapshot: &MarketSnapshot,
        grade: ConditionGrade,
        identification: &Identification,
    ) -> Result<StageOutcome<PricingRecommendation>, PipelineError> {
        let recommendation = pricing::recommend(snapshot, grade, identification);
        let output = json!({
            "recommended": recommendation.recommended,
            "quick_sale": recommendation.quick_sale,
            "max_profit": recommendation.max_profit,
            "strategy": recommendation.strategy,
            "justification": recommendation.justification,
        });
        Ok(StageOutcome::new(recommendation, output))
    }

    pub fn score_confidence(
        identification: &Identification,
        condition: &ConditionAssessment,
        snapshot: &MarketSnapshot,
    ) -> Result<StageOutcome<ConfidenceReport>, PipelineError> {
        // The synthetic fallback listing is not evidence.
        let samples = if snapshot.fallback {
            0
        } else {
            snapshot.sold_count
        };
        let report = confidence::score(identification.confidence, condition.confidence, samples);
        let output = json!({
            "overall": report.overall,
            "identification": report.identification,
            "condition": report.condition,
            "data": report.data,
            "quality": report.quality,
        });
        Ok(StageOutcome::new(report, output))
    }

    fn tokenize(value: &str) -> Vec<String> {
        if value.chars().any(|ch| matches!(ch, '\n' | ',' | ';' | '|')) {
            value
                .split(['\n', ',', ';', '|'])
                .map(|entry| entry.trim())
                .filter(|entry| !entry.is_empty())
                .map(|entry| entry.to_string())
                .collect()
        } else {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                Vec::new()
            } else {
                vec![trimmed.to_string()]
            }
        }
    }

    fn deduplicate(values: Vec<String>) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut result = Vec::new();
        for value in values {
            if seen.insert(value.clone()) {
                result.push(value);
            }
        }
        result
    }

    fn image_domain_allowlist() -> Option<Vec<String>> {
        std::env::var("IMAGE_DOMAIN_ALLOWLIST")
            .ok()
            .map(|raw| {
                raw.split([',', ' ', '\n', '\t'])
                    .map(|entry| entry.trim().to_lowercase())
                    .filter(|entry| !entry.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|entries| !entries.is_empty())
    }

    fn host_allowed(host: &str, allowed: &[String]) -> bool {
        let host = host.to_lowercase();
        allowed
            .iter()
            .any(|domain| host == *domain || host.ends_with(&format!(".{domain}")))
    }

    fn max_images_allowed() -> usize {
        std::env::var("MAX_IMAGES")
            .ok()
            .and_then(|value| value.parse::<usize>().ok())
            .filter(|value| *value >= 1)
            .unwrap_or(8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AnalysisRequest, ImagesSource};

    fn sample_request() -> AnalysisRequest {
        AnalysisRequest {
            images_source: Some(ImagesSource::Multiple(vec![
                "https://example.com/a.jpg".to_string(),
                "https://example.com/b.jpg".to_string(),
            ])),
            text_snippets: vec!["Nike Air Force 1".to_string(), "Size 10".to_string()],
            barcode: None,
            condition_notes: Some("light scuff on left toe".to_string()),
            category_hint: None,
            condition_override: None,
            dry_run: false,
        }
    }

    #[test]
    fn validate_input_resolves_and_counts() {
        let out = stages::validate_input(&sample_request()).expect("validate");
        assert_eq!(out.value.images.len(), 2);
        assert_eq!(out.value.text.len(), 2);
        assert_eq!(out.output["images"], serde_json::json!(2));
    }

    #[test]
    fn validate_input_splits_comma_joined_single_source() {
        let req = AnalysisRequest {
            images_source: Some(ImagesSource::Single(
                "https://example.com/a.jpg, https://example.com/b.jpg".to_string(),
            )),
            ..sample_request()
        };
        let out = stages::validate_input(&req).expect("validate");
        assert_eq!(out.value.images.len(), 2);
    }

    #[test]
    fn validate_input_rejects_non_http_schemes() {
        let req = AnalysisRequest {
            images_source: Some(ImagesSource::Multiple(vec![
                "ftp://example.com/a.jpg".to_string(),
            ])),
            ..sample_request()
        };
        let err = stages::validate_input(&req).expect_err("should reject");
        assert_eq!(err.kind(), PipelineErrorKind::InvalidInput);
        assert_eq!(err.stage(), "validate_input");
    }

    #[test]
    fn validate_input_rejects_malformed_barcodes() {
        let req = AnalysisRequest {
            barcode: Some("12AB".to_string()),
            ..sample_request()
        };
        let err = stages::validate_input(&req).expect_err("should reject");
        assert_eq!(err.kind(), PipelineErrorKind::InvalidInput);
    }

    #[test]
    fn validate_input_requires_some_input() {
        let req = AnalysisRequest {
            images_source: None,
            text_snippets: vec![],
            barcode: None,
            condition_notes: None,
            category_hint: None,
            condition_override: None,
            dry_run: false,
        };
        let err = stages::validate_input(&req).expect_err("should reject");
        assert_eq!(err.kind(), PipelineErrorKind::InvalidInput);
    }

    #[test]
    fn classify_signals_buckets_brand_and_size() {
        let input = stages::validate_input(&sample_request()).unwrap().value;
        let out = stages::classify_signals(&input).expect("classify");
        assert_eq!(out.value.brands, vec!["Nike".to_string()]);
        assert_eq!(out.value.sizes.len(), 1);
    }

    #[tokio::test]
    async fn condition_override_skips_grading() {
        let llm = LlmClient::new(LlmConfig::from_env());
        let input = ValidatedInput {
            images: vec!["https://example.com/a.jpg".to_string()],
            text: vec![],
            barcode: None,
        };
        let out = stages::assess_condition(
            &llm,
            &input,
            Some(ConditionGrade::LikeNew),
            Some("notes should be ignored"),
        )
        .await
        .expect("assess");
        assert_eq!(out.value.grade, ConditionGrade::LikeNew);
        assert_eq!(out.value.confidence, 1.0);
        assert_eq!(out.output["source"], serde_json::json!("override"));
    }

    #[tokio::test]
    async fn pipeline_run_stage_sequence() {
        let pipeline = Pipeline::new();
        let resp = pipeline
            .run(sample_request(), None)
            .await
            .expect("pipeline run");
        let names: Vec<String> = resp.stages.iter().map(|s| s.name.clone()).collect();
        assert_eq!(
            names,
            vec![
                "validate_input",
                "classify_signals",
                "identify_item",
                "assess_condition",
                "fetch_market",
                "analyze_trend",
                "estimate_demand",
                "price_item",
                "score_confidence",
            ]
        );
        assert!(resp.analysis_id.starts_with("MAG-"));
        let market = resp.market.expect("market summary");
        assert!(market.used_fallback);
        let pricing = resp.pricing.expect("pricing");
        assert!(pricing.recommended >= 5.0);
        assert!(pricing.quick_sale < pricing.recommended);
        assert!(pricing.max_profit > pricing.recommended);
    }

    #[tokio::test]
    async fn pipeline_dry_run_stops_after_grading() {
        let pipeline = Pipeline::new();
        let mut req = sample_request();
        req.dry_run = true;
        let resp = pipeline.run(req, None).await.expect("pipeline run");
        let names: Vec<String> = resp.stages.iter().map(|s| s.name.clone()).collect();
        assert_eq!(
            names,
            vec![
                "validate_input",
                "classify_signals",
                "identify_item",
                "assess_condition",
            ]
        );
        assert!(resp.analysis_id.starts_with("PREVIEW-"));
        assert!(resp.market.is_none());
        assert!(resp.pricing.is_none());
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_first_stage() {
        let pipeline = Pipeline::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = pipeline
            .run_with_cancel(sample_request(), None, cancel)
            .await
            .expect_err("should cancel");
        assert_eq!(err.kind(), PipelineErrorKind::Cancelled);
        assert_eq!(err.stage(), "validate_input");
    }
}
