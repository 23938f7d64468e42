//! Submission gate: the upstream seam that may veto or annotate a task
//! before it is enqueued.

use serde::{Deserialize, Serialize};

use crate::core::{Params, TaskKind};

/// What the gate decided for an accepted submission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GateVerdict {
    /// Replacement params; `None` keeps the submitted ones.
    pub params: Option<Params>,
    /// Opaque annotation stored on the task.
    pub risk: Option<serde_json::Value>,
}

impl GateVerdict {
    pub fn accept() -> Self {
        Self::default()
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.params = Some(params);
        self
    }

    pub fn with_risk(mut self, risk: serde_json::Value) -> Self {
        self.risk = Some(risk);
        self
    }
}

/// Reviews submissions. `Err(reason)` rejects the submission.
pub trait SubmissionGate: Send + Sync {
    fn review(&self, kind: &TaskKind, params: &Params) -> Result<GateVerdict, String>;
}

impl<F> SubmissionGate for F
where
    F: Fn(&TaskKind, &Params) -> Result<GateVerdict, String> + Send + Sync,
{
    fn review(&self, kind: &TaskKind, params: &Params) -> Result<GateVerdict, String> {
        self(kind, params)
    }
}

/// Accepts everything unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenGate;

impl SubmissionGate for OpenGate {
    fn review(&self, _kind: &TaskKind, _params: &Params) -> Result<GateVerdict, String> {
        Ok(GateVerdict::accept())
    }
}
