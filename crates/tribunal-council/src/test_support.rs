//! Deterministic advisors for tests and offline runs.
//!
//! `ScenarioAdvisor` reads `features` / `portfolio_context` and applies the
//! same rules the role prompts describe, so council behavior can be exercised
//! end to end without the Claude CLI. The remaining advisors script a fixed
//! answer, a failure, a hang, or a panic.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::Value;
use tribunal_models::{AdvisorAction, AdvisorJudgment, AdvisorRequest};

use crate::advisor::Advisor;
use crate::error::AdvisorError;

fn number(data: Option<&Value>, key: &str) -> Option<f64> {
    data.and_then(|d| d.get(key)).and_then(Value::as_f64)
}

fn to_decimal(value: f64) -> Decimal {
    Decimal::try_from(value.clamp(0.0, 1.0))
        .unwrap_or_default()
        .round_dp(2)
}

fn judgment(action: AdvisorAction, confidence: f64, rationale: Vec<String>, risks: Vec<String>) -> AdvisorJudgment {
    let risk_score = to_decimal(0.2 + 0.2 * risks.len() as f64);
    AdvisorJudgment {
        action,
        confidence: to_decimal(confidence.clamp(0.05, 0.95)),
        rationale: if rationale.is_empty() {
            "no decisive signal in the inputs".to_string()
        } else {
            rationale.join("; ")
        },
        risk_factors: risks,
        risk_score: Some(risk_score),
    }
}

fn direction(score: i32) -> AdvisorAction {
    match score {
        s if s > 0 => AdvisorAction::Buy,
        s if s < 0 => AdvisorAction::Sell,
        _ => AdvisorAction::Hold,
    }
}

fn evaluate_technical(request: &AdvisorRequest) -> AdvisorJudgment {
    let features = Some(&request.features);
    let mut score = 0i32;
    let mut confidence = 0.50f64;
    let mut notes = Vec::new();
    let mut risks = Vec::new();

    if let Some(rsi) = number(features, "rsi_14") {
        if rsi < 30.0 {
            score += 1;
            confidence += if rsi < 20.0 { 0.25 } else { 0.15 };
            notes.push(format!("RSI {rsi:.1} oversold"));
        } else if rsi > 70.0 {
            score -= 1;
            confidence += if rsi > 80.0 { 0.25 } else { 0.15 };
            notes.push(format!("RSI {rsi:.1} overbought"));
        }
    }

    let price = number(features, "price");
    let sma = number(features, "sma_20");
    let macd = number(features, "macd_histogram");
    if let (Some(price), Some(sma), Some(macd)) = (price, sma, macd) {
        if price < sma && macd < 0.0 {
            score -= 1;
            confidence += 0.10;
            notes.push("below SMA20 with falling MACD".to_string());
            risks.push("downtrend".to_string());
        } else if price > sma && macd > 0.0 {
            score += 1;
            confidence += 0.10;
            notes.push("above SMA20 with rising MACD".to_string());
        }
    }

    if number(features, "atr_percent").is_some_and(|atr| atr > 4.0) {
        confidence -= 0.10;
        risks.push("high volatility".to_string());
    }

    judgment(direction(score), confidence, notes, risks)
}

fn evaluate_fundamental(request: &AdvisorRequest) -> AdvisorJudgment {
    let features = Some(&request.features);
    let mut notes = Vec::new();
    let mut risks = Vec::new();
    let mut thesis_broken = false;

    let sentiment = number(features, "sentiment").unwrap_or(0.0);
    if sentiment < -0.5 {
        thesis_broken = true;
        risks.push(format!("sentiment {sentiment:.2}"));
    }
    if let Some(supply) = number(features, "supply_chain_risk").filter(|v| *v > 0.7) {
        thesis_broken = true;
        risks.push(format!("supply chain risk {supply:.2}"));
    }
    if let Some(policy) = number(features, "policy_risk").filter(|v| *v > 60.0) {
        thesis_broken = true;
        risks.push(format!("policy risk {policy:.0}"));
    }
    if request.features.get("guidance").and_then(Value::as_str) == Some("lowered") {
        risks.push("guidance lowered".to_string());
    }

    if thesis_broken {
        notes.push("fundamental thesis broken".to_string());
        return judgment(AdvisorAction::Sell, 0.80, notes, risks);
    }

    if sentiment > 0.2 {
        notes.push(format!("constructive sentiment {sentiment:.2}"));
        judgment(AdvisorAction::Buy, 0.60 + sentiment * 0.3, notes, risks)
    } else {
        judgment(AdvisorAction::Hold, 0.50, notes, risks)
    }
}

fn evaluate_risk(request: &AdvisorRequest) -> AdvisorJudgment {
    let features = Some(&request.features);
    let portfolio = request.portfolio_context.as_ref();
    let mut risks = Vec::new();

    if number(features, "drawdown_percent").is_some_and(|d| d <= -25.0) {
        risks.push("deep drawdown".to_string());
    }
    if number(features, "atr_percent").is_some_and(|atr| atr > 4.0) {
        risks.push("high volatility".to_string());
    }
    if number(portfolio, "exposure_percent").is_some_and(|e| e > 20.0) {
        risks.push("concentrated exposure".to_string());
    }
    if number(portfolio, "cash_percent").is_some_and(|c| c < 10.0) {
        risks.push("low cash".to_string());
    }

    let notes = vec![format!("{} risk factor(s)", risks.len())];
    match risks.len() {
        0 => judgment(AdvisorAction::Buy, 0.75, notes, risks),
        1 => judgment(AdvisorAction::Hold, 0.50, notes, risks),
        _ => judgment(AdvisorAction::Sell, 0.80, notes, risks),
    }
}

/// Rule-based advisor for a fixed role.
pub struct ScenarioAdvisor {
    pub id: String,
    pub role: String,
}

impl ScenarioAdvisor {
    pub fn new(id: &str, role: &str) -> Self {
        Self {
            id: id.to_string(),
            role: role.to_string(),
        }
    }

    pub fn technical() -> Self {
        Self::new("technical", "technical")
    }

    pub fn fundamental() -> Self {
        Self::new("fundamental", "fundamental")
    }

    pub fn risk() -> Self {
        Self::new("risk", "risk")
    }
}

#[async_trait]
impl Advisor for ScenarioAdvisor {
    fn id(&self) -> &str {
        &self.id
    }

    fn role(&self) -> &str {
        &self.role
    }

    async fn analyze(&self, request: &AdvisorRequest) -> Result<AdvisorJudgment, AdvisorError> {
        match request.role.as_str() {
            "technical" => Ok(evaluate_technical(request)),
            "fundamental" => Ok(evaluate_fundamental(request)),
            "risk" => Ok(evaluate_risk(request)),
            other => Err(AdvisorError::UnknownRole(other.to_string())),
        }
    }
}

/// Always returns the same judgment. Counts calls.
pub struct ScriptedAdvisor {
    pub id: String,
    pub judgment: AdvisorJudgment,
    calls: AtomicUsize,
}

impl ScriptedAdvisor {
    pub fn new(id: &str, action: AdvisorAction, confidence: Decimal) -> Self {
        Self::with_judgment(
            id,
            AdvisorJudgment {
                action,
                confidence,
                rationale: format!("scripted {action:?}"),
                risk_factors: Vec::new(),
                risk_score: None,
            },
        )
    }

    pub fn with_judgment(id: &str, judgment: AdvisorJudgment) -> Self {
        Self {
            id: id.to_string(),
            judgment,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_risks(mut self, risks: &[&str]) -> Self {
        self.judgment.risk_factors = risks.iter().map(|r| r.to_string()).collect();
        self
    }

    pub fn with_risk_score(mut self, score: Decimal) -> Self {
        self.judgment.risk_score = Some(score);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Advisor for ScriptedAdvisor {
    fn id(&self) -> &str {
        &self.id
    }

    fn role(&self) -> &str {
        "scripted"
    }

    async fn analyze(&self, _request: &AdvisorRequest) -> Result<AdvisorJudgment, AdvisorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.judgment.clone())
    }
}

/// Always fails with a CLI error.
pub struct FailingAdvisor {
    pub id: String,
}

impl FailingAdvisor {
    pub fn new(id: &str) -> Self {
        Self { id: id.to_string() }
    }
}

#[async_trait]
impl Advisor for FailingAdvisor {
    fn id(&self) -> &str {
        &self.id
    }

    fn role(&self) -> &str {
        "failing"
    }

    async fn analyze(&self, _request: &AdvisorRequest) -> Result<AdvisorJudgment, AdvisorError> {
        Err(AdvisorError::Cli("connection reset by peer".to_string()))
    }
}

/// Sleeps before answering `hold`. `completed` counts calls that ran to the end.
pub struct SlowAdvisor {
    pub id: String,
    pub delay: Duration,
    completed: AtomicUsize,
}

impl SlowAdvisor {
    pub fn new(id: &str, delay: Duration) -> Self {
        Self {
            id: id.to_string(),
            delay,
            completed: AtomicUsize::new(0),
        }
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Advisor for SlowAdvisor {
    fn id(&self) -> &str {
        &self.id
    }

    fn role(&self) -> &str {
        "slow"
    }

    async fn analyze(&self, _request: &AdvisorRequest) -> Result<AdvisorJudgment, AdvisorError> {
        tokio::time::sleep(self.delay).await;
        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(AdvisorJudgment {
            action: AdvisorAction::Hold,
            confidence: Decimal::new(5, 1),
            rationale: "late answer".to_string(),
            risk_factors: Vec::new(),
            risk_score: None,
        })
    }
}

/// Panics inside `analyze`.
pub struct PanickingAdvisor {
    pub id: String,
}

impl PanickingAdvisor {
    pub fn new(id: &str) -> Self {
        Self { id: id.to_string() }
    }
}

#[async_trait]
impl Advisor for PanickingAdvisor {
    fn id(&self) -> &str {
        &self.id
    }

    fn role(&self) -> &str {
        "panicking"
    }

    async fn analyze(&self, _request: &AdvisorRequest) -> Result<AdvisorJudgment, AdvisorError> {
        panic!("advisor {} blew up", self.id);
    }
}
