pub mod events;
pub mod sse;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tracing::warn;

use crate::core::credentials::Credentials;
use crate::core::error::Error;
use crate::core::store::types::{Investigation, Runbook};
use events::{AgentEvent, normalize_envelope};
use sse::SseLineBuffer;

/// Iteration budget handed to the runtime; past experience says
/// investigations that have not concluded by then never will.
pub const MAX_ITERATIONS: u32 = 15;
pub const INITIAL_PHASE: &str = "triage";

/// Playbook summary shipped to the runtime alongside the alert.
#[derive(Debug, Clone, Serialize)]
pub struct RunbookBrief {
    pub name: String,
    pub investigation_steps: Vec<crate::core::store::types::RunbookStep>,
    pub if_found_actions: std::collections::BTreeMap<String, String>,
}

impl RunbookBrief {
    pub fn from_runbook(runbook: &Runbook) -> Self {
        Self {
            name: runbook.name.clone(),
            investigation_steps: runbook.investigation_steps.clone(),
            if_found_actions: runbook.if_found_actions.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InvestigationContext {
    pub investigation_id: String,
    pub org_id: String,
    pub alert_name: String,
    pub service: Option<String>,
    pub severity: Option<String>,
    pub runbook: Option<RunbookBrief>,
}

/// One call against the external agent runtime: an ad hoc chat message or a
/// full investigation, plus phase, iteration budget, and resolved
/// credentials.
#[derive(Debug, Clone, Serialize)]
pub struct AgentRunRequest {
    pub message: String,
    pub thread_id: Option<String>,
    pub phase: String,
    pub max_iterations: u32,
    pub context: Option<InvestigationContext>,
    pub credentials: Credentials,
}

impl AgentRunRequest {
    pub fn chat(message: String, thread_id: Option<String>, credentials: Credentials) -> Self {
        Self {
            message,
            thread_id,
            phase: INITIAL_PHASE.to_string(),
            max_iterations: MAX_ITERATIONS,
            context: None,
            credentials,
        }
    }

    pub fn investigation(
        investigation: &Investigation,
        runbook: Option<&Runbook>,
        credentials: Credentials,
    ) -> Self {
        Self {
            message: investigation_prompt(investigation),
            thread_id: None,
            phase: INITIAL_PHASE.to_string(),
            max_iterations: MAX_ITERATIONS,
            context: Some(InvestigationContext {
                investigation_id: investigation.id.clone(),
                org_id: investigation.org_id.clone(),
                alert_name: investigation.alert_name.clone(),
                service: investigation.service.clone(),
                severity: investigation.severity.map(|s| s.as_str().to_string()),
                runbook: runbook.map(RunbookBrief::from_runbook),
            }),
            credentials,
        }
    }
}

/// Opening message for an investigation run.
fn investigation_prompt(investigation: &Investigation) -> String {
    format!(
        "A production incident requires investigation.\n\n\
         **Alert**: {}\n\
         **Service**: {}\n\
         **Severity**: {}\n\n\
         Begin your investigation:\n\
         1. Understand the alert and current service health\n\
         2. Check for recent deployments or changes\n\
         3. Identify the root cause\n\
         4. Provide actionable recommendations",
        investigation.alert_name,
        investigation.service.as_deref().unwrap_or("unknown"),
        investigation
            .severity
            .map(|s| s.as_str())
            .unwrap_or("unknown"),
    )
}

/// Boundary to the external reasoning engine. Implementations produce a
/// normalized event stream; channel closure marks upstream exhaustion.
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    async fn run(&self, request: AgentRunRequest) -> Result<mpsc::Receiver<AgentEvent>, Error>;
}

/// Talks to a LangGraph-style agent server over HTTP, reading its SSE stream.
pub struct HttpAgentRuntime {
    client: reqwest::Client,
    base_url: String,
}

impl HttpAgentRuntime {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl AgentRuntime for HttpAgentRuntime {
    async fn run(&self, request: AgentRunRequest) -> Result<mpsc::Receiver<AgentEvent>, Error> {
        let url = format!("{}/runs/stream", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Streaming(format!("agent runtime unreachable: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::Streaming(format!(
                "agent runtime returned {}",
                response.status()
            )));
        }

        let (tx, rx) = mpsc::channel::<AgentEvent>(32);
        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut lines = SseLineBuffer::new();

            while let Some(chunk) = stream.next().await {
                let bytes = match chunk {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        let _ = tx
                            .send(AgentEvent::Error {
                                message: format!("stream read failed: {e}"),
                            })
                            .await;
                        return;
                    }
                };

                for payload in lines.push(&bytes) {
                    match serde_json::from_str::<serde_json::Value>(&payload) {
                        Ok(envelope) => {
                            for event in normalize_envelope(&envelope) {
                                if tx.send(event).await.is_err() {
                                    // Downstream hung up; stop pulling.
                                    return;
                                }
                            }
                        }
                        Err(e) => {
                            // A bad record is logged and skipped; the stream
                            // itself stays alive.
                            warn!("skipping unparseable stream record: {e}");
                        }
                    }
                }
            }
        });

        Ok(rx)
    }
}
