//! Remote classifier: any OpenAI-compatible chat-completions endpoint.
//!
//! Two JSON-mode calls per context: usage classification (targeting, quoting,
//! reclaiming) and severity scoring. Transport problems map to
//! `LabelError::Unavailable`, schema or range problems to `LabelError::Malformed`.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{ContextLabel, ContextLabeler, TargetType};
use crate::error::LabelError;
use crate::text::Context;

pub const SOURCE_TAG: &str = "remote_json_v1";

const USAGE_PROMPT: &str = "You classify how a term is used in one sentence. \
Reply with a single JSON object with keys: is_targeted (bool), \
target_type (\"individual\"|\"group\"|\"none\"|\"unknown\"), is_quoted (bool), \
is_reclaimed (bool), targetedness_0_1 (number 0..1), confidence_0_1 (number 0..1).";

const SEVERITY_PROMPT: &str = "You score the harm of one sentence that uses a term. \
Rubric: 0.0-0.2 neutral, 0.2-0.5 ambiguous insult, 0.5-0.8 targeted abuse, 0.8-1.0 violent hate. \
Reply with a single JSON object with keys: severity_0_1 (number 0..1), \
harm_type (\"harassment\"|\"hate\"|\"threat\"|\"none\"|\"unknown\"), \
violence_signal (bool), confidence_0_1 (number 0..1).";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UsageClassification {
    pub is_targeted: bool,
    pub target_type: TargetType,
    pub is_quoted: bool,
    pub is_reclaimed: bool,
    pub targetedness_0_1: f64,
    pub confidence_0_1: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SeverityClassification {
    pub severity_0_1: f64,
    pub harm_type: String,
    pub violence_signal: bool,
    pub confidence_0_1: f64,
}

fn unit(name: &str, v: f64) -> Result<f64, LabelError> {
    if v.is_finite() && (0.0..=1.0).contains(&v) {
        Ok(v)
    } else {
        Err(LabelError::Malformed(format!("{name} out of range: {v}")))
    }
}

pub fn parse_usage(content: &str) -> Result<UsageClassification, LabelError> {
    let u: UsageClassification = serde_json::from_str(content.trim())
        .map_err(|e| LabelError::Malformed(format!("usage: {e}")))?;
    unit("targetedness_0_1", u.targetedness_0_1)?;
    unit("confidence_0_1", u.confidence_0_1)?;
    Ok(u)
}

pub fn parse_severity(content: &str) -> Result<SeverityClassification, LabelError> {
    let s: SeverityClassification = serde_json::from_str(content.trim())
        .map_err(|e| LabelError::Malformed(format!("severity: {e}")))?;
    unit("severity_0_1", s.severity_0_1)?;
    unit("confidence_0_1", s.confidence_0_1)?;
    match s.harm_type.as_str() {
        "harassment" | "hate" | "threat" | "none" | "unknown" => Ok(s),
        other => Err(LabelError::Malformed(format!("unknown harm_type: {other}"))),
    }
}

/// Merge both classifications into one label.
pub fn combine(usage: &UsageClassification, severity: &SeverityClassification) -> ContextLabel {
    ContextLabel {
        targetedness: usage.targetedness_0_1,
        severity: severity.severity_0_1,
        is_quoted: usage.is_quoted,
        is_reclaimed: usage.is_reclaimed,
        target_type: usage.target_type,
        confidence: ((usage.confidence_0_1 + severity.confidence_0_1) / 2.0).clamp(0.0, 1.0),
        source: SOURCE_TAG.to_string(),
    }
}

pub struct RemoteClassifierLabeler {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl RemoteClassifierLabeler {
    pub fn new(
        base_url: &str,
        model: &str,
        api_key: String,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("eigenslur/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(4))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key,
            model: model.to_string(),
        })
    }

    /// One JSON-mode completion; returns the raw message content.
    async fn complete(&self, system: &str, user: &str) -> Result<String, LabelError> {
        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct ResponseFormat {
            #[serde(rename = "type")]
            kind: &'static str,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            messages: Vec<Msg<'a>>,
            temperature: f32,
            response_format: ResponseFormat,
        }
        #[derive(Deserialize)]
        struct Resp {
            choices: Vec<Choice>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMsg,
        }
        #[derive(Deserialize)]
        struct ChoiceMsg {
            content: Option<String>,
        }

        let req = Req {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: system,
                },
                Msg {
                    role: "user",
                    content: user,
                },
            ],
            temperature: 0.0,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await
            .map_err(|e| LabelError::Unavailable(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(LabelError::Unavailable(format!("backend status {status}")));
        }
        let body: Resp = resp
            .json()
            .await
            .map_err(|e| LabelError::Malformed(format!("completion body: {e}")))?;
        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| LabelError::Malformed("empty completion".to_string()))
    }
}

#[async_trait]
impl ContextLabeler for RemoteClassifierLabeler {
    async fn label(
        &self,
        term: &str,
        context: &Context,
        locale: &str,
    ) -> Result<ContextLabel, LabelError> {
        let payload = serde_json::json!({
            "term": term,
            "sentence": context.raw,
            "locale": locale,
        })
        .to_string();

        let usage = parse_usage(&self.complete(USAGE_PROMPT, &payload).await?)?;
        let severity = parse_severity(&self.complete(SEVERITY_PROMPT, &payload).await?)?;
        Ok(combine(&usage, &severity))
    }

    fn name(&self) -> &'static str {
        "remote_classifier"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_usage_and_severity() {
        let u = parse_usage(
            r#"{"is_targeted":true,"target_type":"individual","is_quoted":false,
                "is_reclaimed":false,"targetedness_0_1":0.8,"confidence_0_1":0.9}"#,
        )
        .unwrap();
        let s = parse_severity(
            r#"{"severity_0_1":0.6,"harm_type":"harassment","violence_signal":false,"confidence_0_1":0.7}"#,
        )
        .unwrap();
        let label = combine(&u, &s);
        assert_eq!(label.target_type, TargetType::Individual);
        assert!((label.confidence - 0.8).abs() < 1e-12);
        assert_eq!(label.severity, 0.6);
        assert_eq!(label.source, SOURCE_TAG);
    }

    #[test]
    fn out_of_range_is_malformed() {
        let err = parse_severity(
            r#"{"severity_0_1":1.4,"harm_type":"hate","violence_signal":true,"confidence_0_1":0.7}"#,
        )
        .unwrap_err();
        assert!(matches!(err, LabelError::Malformed(_)));
    }

    #[test]
    fn schema_violations_are_malformed() {
        assert!(matches!(parse_usage("not json"), Err(LabelError::Malformed(_))));
        assert!(matches!(
            parse_usage(r#"{"is_targeted":true}"#),
            Err(LabelError::Malformed(_))
        ));
        assert!(matches!(
            parse_severity(
                r#"{"severity_0_1":0.1,"harm_type":"spam","violence_signal":false,"confidence_0_1":0.5}"#
            ),
            Err(LabelError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn unreachable_backend_is_unavailable() {
        let labeler = RemoteClassifierLabeler::new(
            "http://127.0.0.1:9",
            "test-model",
            "sk-test".into(),
            Duration::from_millis(500),
        )
        .unwrap();
        let ctx = Context::new("you slur1", &["slur1".to_string()]);
        let err = labeler.label("slur1", &ctx, "en-US").await.unwrap_err();
        assert!(matches!(err, LabelError::Unavailable(_)));
    }
}
